//! Drawing primitive: template image + text placements → PNG bytes.
//!
//! [`CertificateDrawer`] is the seam; the renderer never touches pixels
//! itself. [`TemplateDrawer`] is the built-in implementation: it stamps text
//! with a 5×7 bitmap font scaled by each placement's font size, which needs
//! no font files on the host. Callers who want typeset output plug in their
//! own drawer.

use crate::pipeline::text::TextPlacement;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::debug;

/// Failure inside a drawing primitive.
#[derive(Debug, Error)]
pub enum DrawError {
    #[error("cannot load template '{path}': {detail}")]
    Template { path: PathBuf, detail: String },

    #[error("{0}")]
    Render(String),
}

/// Renders one certificate. Must be a pure function of its inputs.
pub trait CertificateDrawer: Send + Sync {
    fn draw(&self, template: &Path, texts: &[TextPlacement]) -> Result<Vec<u8>, DrawError>;
}

/// Bitmap-font drawer backed by the `image` crate.
///
/// The decoded template is cached, so a batch decodes it once rather than
/// once per record.
#[derive(Debug, Default)]
pub struct TemplateDrawer {
    cache: Mutex<Option<(PathBuf, Arc<RgbImage>)>>,
}

impl TemplateDrawer {
    pub fn new() -> Self {
        Self::default()
    }

    fn template(&self, path: &Path) -> Result<Arc<RgbImage>, DrawError> {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((cached_path, img)) = cache.as_ref() {
            if cached_path == path {
                return Ok(Arc::clone(img));
            }
        }

        let img = image::open(path)
            .map_err(|e| DrawError::Template {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })?
            .to_rgb8();
        debug!(
            "Loaded template {} ({}x{})",
            path.display(),
            img.width(),
            img.height()
        );
        let img = Arc::new(img);
        *cache = Some((path.to_path_buf(), Arc::clone(&img)));
        Ok(img)
    }
}

impl CertificateDrawer for TemplateDrawer {
    fn draw(&self, template: &Path, texts: &[TextPlacement]) -> Result<Vec<u8>, DrawError> {
        let mut canvas = (*self.template(template)?).clone();
        for placement in texts {
            stamp_text(&mut canvas, placement);
        }

        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(canvas)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .map_err(|e| DrawError::Render(format!("PNG encoding failed: {e}")))?;
        Ok(buf)
    }
}

// ── Bitmap font ──────────────────────────────────────────────────────────

const GLYPH_ROWS: u32 = 7;
const GLYPH_COLS: u32 = 5;
const ADVANCE_COLS: u32 = 6;
/// Pixels per font dot at font size 1.0.
const DOTS_PER_SIZE: f32 = 3.0;

/// Stamp one line; pixels outside the canvas are clipped.
fn stamp_text(canvas: &mut RgbImage, placement: &TextPlacement) {
    let dot = ((placement.font_size * DOTS_PER_SIZE).round() as u32).max(1);
    let top = i64::from(placement.y) - i64::from(GLYPH_ROWS * dot);
    let colour = Rgb(placement.color);

    for (i, ch) in placement.text.chars().enumerate() {
        let Some(rows) = glyph(ch) else { continue };
        let left = i64::from(placement.x) + (i as i64) * i64::from(ADVANCE_COLS * dot);

        for (r, bits) in rows.iter().enumerate() {
            for c in 0..GLYPH_COLS {
                if bits & (1 << (GLYPH_COLS - 1 - c)) == 0 {
                    continue;
                }
                let x0 = left + i64::from(c * dot);
                let y0 = top + (r as i64) * i64::from(dot);
                fill_square(canvas, x0, y0, dot, colour);
            }
        }
    }
}

fn fill_square(canvas: &mut RgbImage, x0: i64, y0: i64, size: u32, colour: Rgb<u8>) {
    let (w, h) = (i64::from(canvas.width()), i64::from(canvas.height()));
    for y in y0.max(0)..(y0 + i64::from(size)).min(h) {
        for x in x0.max(0)..(x0 + i64::from(size)).min(w) {
            canvas.put_pixel(x as u32, y as u32, colour);
        }
    }
}

/// Row bitmaps (bit 4 = leftmost column). `None` for blanks.
fn glyph(ch: char) -> Option<[u8; 7]> {
    let rows = match ch.to_ascii_uppercase() {
        ' ' => return None,
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1E],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x11, 0x19, 0x15, 0x13, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x11, 0x0A, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        ':' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00],
        '/' => [0x00, 0x01, 0x02, 0x04, 0x08, 0x10, 0x00],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        '(' => [0x02, 0x04, 0x08, 0x08, 0x08, 0x04, 0x02],
        ')' => [0x08, 0x04, 0x02, 0x02, 0x02, 0x04, 0x08],
        '&' => [0x0C, 0x12, 0x14, 0x08, 0x15, 0x12, 0x0D],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        ',' => [0x00, 0x00, 0x00, 0x00, 0x0C, 0x04, 0x08],
        '+' => [0x00, 0x04, 0x04, 0x1F, 0x04, 0x04, 0x00],
        _ => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x00, 0x04],
    };
    Some(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn white_template(dir: &TempDir, w: u32, h: u32) -> PathBuf {
        let path = dir.path().join("template.png");
        RgbImage::from_pixel(w, h, Rgb([255, 255, 255]))
            .save(&path)
            .unwrap();
        path
    }

    fn placement(text: &str, x: u32, y: u32) -> TextPlacement {
        TextPlacement {
            text: text.into(),
            x,
            y,
            font_size: 1.0,
            color: [0, 0, 0],
        }
    }

    #[test]
    fn stamps_text_onto_template() {
        let dir = TempDir::new().unwrap();
        let template = white_template(&dir, 80, 40);
        let png = TemplateDrawer::new()
            .draw(&template, &[placement("I", 10, 30)])
            .unwrap();

        let img = image::load_from_memory(&png).unwrap().to_rgb8();
        assert_eq!(img.dimensions(), (80, 40));
        // Top bar of 'I' spans columns 1..4 of the glyph, row 0 → y = 30 - 21.
        assert_eq!(img.get_pixel(10 + 3 * 2, 9), &Rgb([0, 0, 0]));
        assert_eq!(img.get_pixel(0, 0), &Rgb([255, 255, 255]));
    }

    #[test]
    fn out_of_bounds_text_is_clipped() {
        let dir = TempDir::new().unwrap();
        let template = white_template(&dir, 16, 16);
        let png = TemplateDrawer::new()
            .draw(&template, &[placement("CLIPPED TEXT", 1700, 2300)])
            .unwrap();
        let img = image::load_from_memory(&png).unwrap().to_rgb8();
        assert!(img.pixels().all(|p| *p == Rgb([255, 255, 255])));
    }

    #[test]
    fn missing_template_is_an_error() {
        let err = TemplateDrawer::new()
            .draw(Path::new("/no/such/template.png"), &[])
            .unwrap_err();
        assert!(matches!(err, DrawError::Template { .. }));
    }

    #[test]
    fn lowercase_maps_to_uppercase_glyphs() {
        assert_eq!(glyph('a'), glyph('A'));
        assert!(glyph(' ').is_none());
        assert!(glyph('~').is_some());
    }
}
