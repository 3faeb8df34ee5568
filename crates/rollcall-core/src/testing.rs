//! Model-free extractor for tests.

use crate::extractor::{DetectionError, EmbeddingExtractor};
use crate::types::{BoundingBox, Embedding};
use image::RgbImage;

/// Treats any frame whose top-left pixel is not black as holding one face
/// covering the whole frame; the embedding is that pixel scaled to [0, 1].
pub struct PixelExtractor;

impl EmbeddingExtractor for PixelExtractor {
    fn locate_faces(&mut self, frame: &RgbImage) -> Result<Vec<BoundingBox>, DetectionError> {
        if frame.get_pixel(0, 0).0 == [0, 0, 0] {
            return Ok(vec![]);
        }
        Ok(vec![BoundingBox {
            x: 0.0,
            y: 0.0,
            width: frame.width() as f32,
            height: frame.height() as f32,
            confidence: 1.0,
            landmarks: None,
        }])
    }

    fn encode(&mut self, frame: &RgbImage, boxes: &[BoundingBox]) -> Result<Vec<Embedding>, DetectionError> {
        let p = frame.get_pixel(0, 0).0;
        Ok(boxes
            .iter()
            .map(|_| Embedding::new(p.iter().map(|&c| c as f32 / 255.0).collect()))
            .collect())
    }
}
