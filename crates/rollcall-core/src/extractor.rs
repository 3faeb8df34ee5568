//! Face location + embedding, behind a trait so the pipeline and gallery
//! can run against any model backend.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{BoundingBox, Embedding};
use image::RgbImage;
use thiserror::Error;

/// The model could not process a frame or one of its face regions.
#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("empty frame ({width}x{height})")]
    EmptyFrame { width: u32, height: u32 },
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("encoder returned {got} embeddings for {expected} faces")]
    CountMismatch { expected: usize, got: usize },
}

pub trait EmbeddingExtractor {
    /// Locate faces in a frame. Order is backend-defined.
    fn locate_faces(&mut self, frame: &RgbImage) -> Result<Vec<BoundingBox>, DetectionError>;

    /// One embedding per box, in the order of `boxes`.
    fn encode(&mut self, frame: &RgbImage, boxes: &[BoundingBox]) -> Result<Vec<Embedding>, DetectionError>;
}

/// SCRFD detection + ArcFace recognition.
pub struct OnnxExtractor {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxExtractor {
    pub fn new(detector: FaceDetector, recognizer: FaceRecognizer) -> Self {
        Self { detector, recognizer }
    }

    /// Load both models from their ONNX files.
    pub fn load(detector_path: &str, recognizer_path: &str) -> Result<Self, DetectionError> {
        let detector = FaceDetector::load(detector_path)?;
        let recognizer = FaceRecognizer::load(recognizer_path)?;
        Ok(Self::new(detector, recognizer))
    }
}

fn ensure_nonempty(frame: &RgbImage) -> Result<(), DetectionError> {
    if frame.width() == 0 || frame.height() == 0 {
        return Err(DetectionError::EmptyFrame { width: frame.width(), height: frame.height() });
    }
    Ok(())
}

impl EmbeddingExtractor for OnnxExtractor {
    fn locate_faces(&mut self, frame: &RgbImage) -> Result<Vec<BoundingBox>, DetectionError> {
        ensure_nonempty(frame)?;
        Ok(self.detector.detect(frame)?)
    }

    fn encode(&mut self, frame: &RgbImage, boxes: &[BoundingBox]) -> Result<Vec<Embedding>, DetectionError> {
        ensure_nonempty(frame)?;
        let embeddings = boxes
            .iter()
            .map(|face| self.recognizer.extract(frame, face))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(embeddings)
    }
}

impl<T: EmbeddingExtractor + ?Sized> EmbeddingExtractor for Box<T> {
    fn locate_faces(&mut self, frame: &RgbImage) -> Result<Vec<BoundingBox>, DetectionError> {
        (**self).locate_faces(frame)
    }

    fn encode(&mut self, frame: &RgbImage, boxes: &[BoundingBox]) -> Result<Vec<Embedding>, DetectionError> {
        (**self).encode(frame, boxes)
    }
}
