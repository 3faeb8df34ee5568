//! rollcall-core — Face-matching attendance engine.
//!
//! SCRFD detection and ArcFace embeddings via ONNX Runtime, first-match
//! gallery lookup, per-day attendance deduplication against a CSV log, and
//! the frame pipeline that ties them together.

pub mod alignment;
pub mod annotate;
pub mod attendance;
pub mod config;
pub mod dedup;
pub mod detector;
pub mod enroll;
pub mod extractor;
pub mod gallery;
pub mod pipeline;
pub mod recognizer;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;
pub mod types;

pub use annotate::Annotator;
pub use attendance::{AttendanceEvent, AttendanceLog, CsvAttendanceLog, LogWriteError};
pub use config::Config;
pub use dedup::Deduplicator;
pub use detector::FaceDetector;
pub use extractor::{DetectionError, EmbeddingExtractor, OnnxExtractor};
pub use gallery::{GalleryError, GalleryStore};
pub use pipeline::{FaceReport, FrameOutcome, FramePipeline};
pub use recognizer::FaceRecognizer;
pub use types::{
    BoundingBox, Embedding, FirstMatchMatcher, Gallery, Identity, MatchResult, Matcher, DEFAULT_MATCH_THRESHOLD,
};

/// Annotator for a configured font path, boxes only when unset.
pub fn annotator_for(config: &Config) -> Annotator {
    match &config.font_path {
        Some(path) => Annotator::with_font_file(path),
        None => Annotator::without_labels(),
    }
}

/// Build a pipeline from configuration: ONNX models, gallery scan and CSV log.
pub fn build_pipeline(config: &Config) -> Result<FramePipeline<OnnxExtractor, CsvAttendanceLog>, BuildError> {
    let mut extractor = OnnxExtractor::load(&config.detector_model_path(), &config.recognizer_model_path())?;
    let gallery = GalleryStore::new(&config.enrollment_dir).load(&mut extractor)?;
    let today = chrono::Local::now().date_naive();
    let dedup = Deduplicator::new(CsvAttendanceLog::new(&config.log_path), today);
    Ok(FramePipeline::new(extractor, gallery, dedup, annotator_for(config), config.match_threshold))
}

#[derive(thiserror::Error, Debug)]
pub enum BuildError {
    #[error("model load failed: {0}")]
    Models(#[from] DetectionError),
    #[error(transparent)]
    Gallery(#[from] GalleryError),
}
