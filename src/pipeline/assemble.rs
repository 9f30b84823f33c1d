//! Document assembly: rendered artifacts → one paginated document.
//!
//! Assembly walks the records in canonical order, never in render-completion
//! order, so the document is a pure function of (records, generation
//! directory). Two certificates go on each page with a spacer between them:
//!
//! ```text
//! page 1: [A1] [spacer] [A2]
//! page 2: [A3] [spacer] [A4]
//! page 3: [A5]
//! ```
//!
//! A record whose artifact is missing is skipped and reported; the
//! remaining artifacts close up so pagination is computed over what was
//! actually placed.
//!
//! The document is written as self-contained HTML (images embedded as
//! base64 data URIs), which any HTML→PDF converter accepts.

use crate::config::PipelineConfig;
use crate::error::CertError;
use crate::pipeline::normalize::Record;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One element of the document flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Artifact { seat_no: String, path: PathBuf },
    Spacer,
}

/// An ordered flow of artifacts and spacers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    pub blocks: Vec<Block>,
}

impl Document {
    /// Number of artifacts placed.
    pub fn artifacts(&self) -> usize {
        self.blocks
            .iter()
            .filter(|b| matches!(b, Block::Artifact { .. }))
            .count()
    }

    /// Number of pages the document occupies.
    pub fn pages(&self) -> usize {
        self.artifacts().div_ceil(2)
    }

    /// Blocks split at page boundaries (after every second artifact).
    pub fn page_blocks(&self) -> Vec<&[Block]> {
        let mut pages = Vec::new();
        let mut start = 0;
        let mut placed = 0;
        for (i, block) in self.blocks.iter().enumerate() {
            if let Block::Artifact { .. } = block {
                placed += 1;
                if placed % 2 == 0 {
                    pages.push(&self.blocks[start..=i]);
                    start = i + 1;
                }
            }
        }
        if start < self.blocks.len() {
            pages.push(&self.blocks[start..]);
        }
        pages
    }
}

/// Result of [`assemble`].
#[derive(Debug, Clone, Default)]
pub struct AssemblyReport {
    pub document: Document,
    pub placed: usize,
    /// Seat numbers whose artifact was missing, in canonical order.
    pub skipped: Vec<String>,
}

/// Lay out the artifacts of `records` in order.
pub fn assemble(records: &[Record], config: &PipelineConfig) -> AssemblyReport {
    let mut present = Vec::with_capacity(records.len());
    let mut skipped = Vec::new();

    for record in records {
        let path = config.artifact_path(&record.seat_no);
        if path.is_file() {
            present.push((record.seat_no.clone(), path));
        } else {
            warn!("Certificate for seat {} not found, skipping", record.seat_no);
            skipped.push(record.seat_no.clone());
        }
    }

    let report = layout(present, skipped);
    info!(
        "Assembled {} certificates on {} pages ({} skipped)",
        report.placed,
        report.document.pages(),
        report.skipped.len()
    );
    report
}

fn layout(present: Vec<(String, PathBuf)>, skipped: Vec<String>) -> AssemblyReport {
    let placed = present.len();
    let mut blocks = Vec::with_capacity(placed + placed / 2);

    for (i, (seat_no, path)) in present.into_iter().enumerate() {
        blocks.push(Block::Artifact { seat_no, path });
        // Spacer after the 1st, 3rd, ... artifact, unless it is the last one.
        if i % 2 == 0 && i + 1 < placed {
            blocks.push(Block::Spacer);
        }
    }

    AssemblyReport {
        document: Document { blocks },
        placed,
        skipped,
    }
}

// ── HTML writer ──────────────────────────────────────────────────────────

const STYLE: &str = "\
@page { size: A4; margin: 0.5in; }
body { margin: 0; }
.page { page-break-after: always; text-align: center; }
.page:last-child { page-break-after: auto; }
.page img { width: 5in; display: block; margin: 0 auto; }
.spacer { height: 0.4in; }
";

/// Render `document` to HTML.
pub fn render_html(document: &Document) -> Result<String, CertError> {
    let mut html = String::from("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n");
    html.push_str("<title>Certificates</title>\n<style>\n");
    html.push_str(STYLE);
    html.push_str("</style>\n</head>\n<body>\n");

    for page in document.page_blocks() {
        html.push_str("<section class=\"page\">\n");
        for block in page {
            match block {
                Block::Artifact { seat_no, path } => {
                    let bytes = std::fs::read(path).map_err(|e| CertError::Io {
                        path: path.clone(),
                        source: e,
                    })?;
                    html.push_str(&format!(
                        "<img alt=\"{}\" src=\"data:image/png;base64,{}\">\n",
                        escape_attr(seat_no),
                        STANDARD.encode(&bytes)
                    ));
                }
                Block::Spacer => html.push_str("<div class=\"spacer\"></div>\n"),
            }
        }
        html.push_str("</section>\n");
    }

    html.push_str("</body>\n</html>\n");
    Ok(html)
}

/// Write `document` to `path` atomically and confirm it landed.
pub fn write_document(document: &Document, path: &Path) -> Result<(), CertError> {
    let html = render_html(document)?;

    let write_err = |source| CertError::DocumentWriteFailed {
        path: path.to_path_buf(),
        source,
    };
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).map_err(write_err)?;

    let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(write_err)?;
    tmp.write_all(html.as_bytes()).map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;

    if !path.is_file() {
        return Err(CertError::DocumentMissing {
            path: path.to_path_buf(),
        });
    }
    debug!("Document written: {} ({} bytes)", path.display(), html.len());
    Ok(())
}

fn escape_attr(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::normalize::{Gender, Score};
    use tempfile::TempDir;

    fn record(seat: &str) -> Record {
        Record {
            seat_no: seat.into(),
            name: None,
            college_no: "0001".into(),
            page_no: "0001".into(),
            gender: Gender::NotApplicable,
            score: Score::Grade(None),
        }
    }

    fn present(k: usize) -> Vec<(String, PathBuf)> {
        (1..=k)
            .map(|i| (i.to_string(), PathBuf::from(format!("{i}.png"))))
            .collect()
    }

    fn shape(doc: &Document) -> String {
        doc.blocks
            .iter()
            .map(|b| match b {
                Block::Artifact { seat_no, .. } => seat_no.as_str(),
                Block::Spacer => "-",
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn pagination_is_two_per_page() {
        for k in 0..=7 {
            let doc = layout(present(k), vec![]).document;
            assert_eq!(doc.artifacts(), k);
            assert_eq!(doc.pages(), k.div_ceil(2), "k = {k}");
            assert_eq!(doc.page_blocks().len(), k.div_ceil(2), "k = {k}");
        }
    }

    #[test]
    fn spacer_after_odd_positions_except_last() {
        assert_eq!(shape(&layout(present(1), vec![]).document), "1");
        assert_eq!(shape(&layout(present(2), vec![]).document), "1 - 2");
        assert_eq!(shape(&layout(present(3), vec![]).document), "1 - 2 3");
        assert_eq!(shape(&layout(present(5), vec![]).document), "1 - 2 3 - 4 5");
    }

    #[test]
    fn missing_artifacts_are_skipped_and_reported() {
        let dir = TempDir::new().unwrap();
        let config = PipelineConfig::builder()
            .gen_dir(dir.path())
            .build()
            .unwrap();
        for seat in ["10", "30"] {
            std::fs::write(config.artifact_path(seat), b"png").unwrap();
        }

        let report = assemble(&[record("10"), record("20"), record("30")], &config);
        assert_eq!(report.placed, 2);
        assert_eq!(report.skipped, vec!["20".to_string()]);
        assert_eq!(shape(&report.document), "10 - 30");
    }

    #[test]
    fn html_embeds_every_artifact_in_order() {
        let dir = TempDir::new().unwrap();
        let config = PipelineConfig::builder()
            .gen_dir(dir.path())
            .build()
            .unwrap();
        let records: Vec<_> = ["3", "1", "2"].iter().map(|s| record(s)).collect();
        for r in &records {
            std::fs::write(config.artifact_path(&r.seat_no), r.seat_no.as_bytes()).unwrap();
        }

        let report = assemble(&records, &config);
        write_document(&report.document, &config.document_path()).unwrap();

        let html = std::fs::read_to_string(config.document_path()).unwrap();
        assert_eq!(html.matches("<section class=\"page\">").count(), 2);
        assert_eq!(html.matches("<div class=\"spacer\">").count(), 1);
        let pos = |seat: &str| html.find(&format!("alt=\"{seat}\"")).unwrap();
        assert!(pos("3") < pos("1") && pos("1") < pos("2"));
        assert!(html.contains(&STANDARD.encode(b"3")));
    }

    #[test]
    fn empty_document_still_writes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out").join("doc.html");
        write_document(&Document::default(), &path).unwrap();
        assert!(path.is_file());
    }
}
