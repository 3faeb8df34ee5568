//! Draws face boxes and labels onto frames.

use crate::types::BoundingBox;
use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::path::Path;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const BOX_THICKNESS: i32 = 2;
const LABEL_SCALE: f32 = 20.0;
const LABEL_OFFSET: i32 = 24;

pub struct Annotator {
    font: Option<FontVec>,
}

impl Annotator {
    /// Boxes only.
    pub fn without_labels() -> Self {
        Self { font: None }
    }

    /// Load a TTF/OTF font for labels. A missing or unreadable font is not
    /// fatal: boxes are still drawn.
    pub fn with_font_file(path: &Path) -> Self {
        let font = std::fs::read(path)
            .map_err(|e| e.to_string())
            .and_then(|bytes| FontVec::try_from_vec(bytes).map_err(|e| e.to_string()));
        match font {
            Ok(font) => Self { font: Some(font) },
            Err(error) => {
                tracing::warn!(path = %path.display(), %error, "label font unavailable, drawing boxes only");
                Self::without_labels()
            }
        }
    }

    pub fn draws_labels(&self) -> bool {
        self.font.is_some()
    }

    /// Draw one face box with its label above it.
    pub fn draw(&self, frame: &mut RgbImage, face: &BoundingBox, label: &str) {
        let Some(rect) = clip(face, frame.width(), frame.height()) else {
            return;
        };
        for inset in 0..BOX_THICKNESS {
            let w = rect.width() as i32 - 2 * inset;
            let h = rect.height() as i32 - 2 * inset;
            if w <= 0 || h <= 0 {
                break;
            }
            let ring = Rect::at(rect.left() + inset, rect.top() + inset).of_size(w as u32, h as u32);
            draw_hollow_rect_mut(frame, ring, BOX_COLOR);
        }

        if let Some(font) = &self.font {
            let y = (rect.top() - LABEL_OFFSET).max(0);
            draw_text_mut(frame, TEXT_COLOR, rect.left(), y, PxScale::from(LABEL_SCALE), font, label);
        }
    }
}

/// Clip a detection to the frame. `None` when nothing of it is visible.
fn clip(face: &BoundingBox, width: u32, height: u32) -> Option<Rect> {
    let (top, right, bottom, left) = face.trbl();
    let left = left.max(0);
    let top = top.max(0);
    let right = right.min(width as i32);
    let bottom = bottom.min(height as i32);
    if right - left < 1 || bottom - top < 1 {
        return None;
    }
    Some(Rect::at(left, top).of_size((right - left) as u32, (bottom - top) as u32))
}
