//! The single "what is the pipeline doing right now" message.
//!
//! Each stage overwrites the message as it starts; nothing is queued and no
//! history is kept. A [`StatusReporter`] is a cheap cloneable handle, so a
//! poller (the CLI spinner, an HTTP status endpoint) can read the message from
//! another task while a batch runs.

use std::sync::{Arc, Mutex};

/// Shared, lock-guarded latest status message.
#[derive(Debug, Clone, Default)]
pub struct StatusReporter {
    message: Arc<Mutex<String>>,
}

impl StatusReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current message.
    pub fn set(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(status = %message, "status updated");
        // Poisoning is ignored: the guarded String is always a valid value.
        let mut guard = self.message.lock().unwrap_or_else(|e| e.into_inner());
        *guard = message;
    }

    /// Read the current message.
    pub fn get(&self) -> String {
        self.message
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Reset to the empty message.
    pub fn clear(&self) {
        self.set(String::new());
    }
}
