//! Per-frame orchestration: locate → encode → match → dedup → annotate.

use crate::annotate::Annotator;
use crate::attendance::{AttendanceEvent, AttendanceLog, LogWriteError};
use crate::dedup::Deduplicator;
use crate::extractor::{DetectionError, EmbeddingExtractor};
use crate::gallery::{GalleryError, GalleryStore};
use crate::types::{BoundingBox, Embedding, FirstMatchMatcher, Gallery, MatchResult, Matcher};
use chrono::NaiveDateTime;
use image::RgbImage;

/// One face found in a frame and what it matched.
#[derive(Debug, Clone)]
pub struct FaceReport {
    pub face: BoundingBox,
    pub result: MatchResult,
}

/// Everything `process_frame` produced for one frame.
#[derive(Debug)]
pub struct FrameOutcome {
    /// The input frame, annotated when faces were found.
    pub frame: RgbImage,
    pub faces: Vec<FaceReport>,
    /// Attendance rows written for this frame.
    pub events: Vec<AttendanceEvent>,
    /// Log writes that failed; those people are retried on their next sighting.
    pub log_errors: Vec<LogWriteError>,
}

impl FrameOutcome {
    fn untouched(frame: RgbImage) -> Self {
        Self { frame, faces: Vec::new(), events: Vec::new(), log_errors: Vec::new() }
    }
}

/// Processes a single stream of frames, in delivery order.
pub struct FramePipeline<E, L> {
    extractor: E,
    gallery: Gallery,
    matcher: Box<dyn Matcher + Send>,
    threshold: f32,
    dedup: Deduplicator<L>,
    annotator: Annotator,
}

impl<E: EmbeddingExtractor, L: AttendanceLog> FramePipeline<E, L> {
    pub fn new(extractor: E, gallery: Gallery, dedup: Deduplicator<L>, annotator: Annotator, threshold: f32) -> Self {
        Self {
            extractor,
            gallery,
            matcher: Box::new(FirstMatchMatcher),
            threshold,
            dedup,
            annotator,
        }
    }

    pub fn with_matcher(mut self, matcher: impl Matcher + Send + 'static) -> Self {
        self.matcher = Box::new(matcher);
        self
    }

    /// Process a frame stamped with the local wall clock.
    pub fn process_frame(&mut self, frame: RgbImage) -> FrameOutcome {
        self.process_frame_at(frame, chrono::Local::now().naive_local())
    }

    /// Process a frame observed at `now`.
    ///
    /// Detection failures are treated as an empty frame. Log failures are
    /// reported in the outcome but never stop annotation.
    pub fn process_frame_at(&mut self, mut frame: RgbImage, now: NaiveDateTime) -> FrameOutcome {
        let faces = match self.observe(&frame) {
            Ok(observed) => observed,
            Err(error) => {
                tracing::warn!(%error, "face extraction failed, frame treated as empty");
                return FrameOutcome::untouched(frame);
            }
        };
        if faces.is_empty() {
            return FrameOutcome::untouched(frame);
        }

        let mut reports = Vec::with_capacity(faces.len());
        let mut events = Vec::new();
        let mut log_errors = Vec::new();
        for (face, embedding) in faces {
            let result = self.matcher.compare(&embedding, &self.gallery, self.threshold);
            if let Some(name) = result.name() {
                match self.dedup.observe(name, now) {
                    Ok(Some(event)) => events.push(event),
                    Ok(None) => {}
                    Err(error) => {
                        tracing::warn!(name, %error, "attendance not recorded, will retry");
                        log_errors.push(error);
                    }
                }
            }
            reports.push(FaceReport { face, result });
        }

        for report in &reports {
            self.annotator.draw(&mut frame, &report.face, report.result.label());
        }
        tracing::debug!(faces = reports.len(), events = events.len(), "frame processed");

        FrameOutcome { frame, faces: reports, events, log_errors }
    }

    fn observe(&mut self, frame: &RgbImage) -> Result<Vec<(BoundingBox, Embedding)>, DetectionError> {
        let boxes = self.extractor.locate_faces(frame)?;
        if boxes.is_empty() {
            return Ok(Vec::new());
        }
        let embeddings = self.extractor.encode(frame, &boxes)?;
        if embeddings.len() != boxes.len() {
            return Err(DetectionError::CountMismatch { expected: boxes.len(), got: embeddings.len() });
        }
        Ok(boxes.into_iter().zip(embeddings).collect())
    }

    /// Replace the gallery with a fresh scan of `store`. Returns the number
    /// of identities loaded. The old gallery stays in place on error.
    pub fn reload_gallery(&mut self, store: &GalleryStore) -> Result<usize, GalleryError> {
        let gallery = store.load(&mut self.extractor)?;
        let count = gallery.len();
        self.gallery = gallery;
        Ok(count)
    }

    pub fn gallery(&self) -> &Gallery {
        &self.gallery
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn deduplicator(&self) -> &Deduplicator<L> {
        &self.dedup
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attendance::CsvAttendanceLog;
    use crate::dedup::tests::{day, moment, FlakyLog};
    use crate::testing::PixelExtractor;
    use crate::types::{Identity, DEFAULT_MATCH_THRESHOLD};
    use image::Rgb;

    /// Returns a fixed set of faces for every frame, or a fixed failure.
    struct ScriptedExtractor {
        faces: Vec<(BoundingBox, Embedding)>,
        fail: bool,
    }

    impl EmbeddingExtractor for ScriptedExtractor {
        fn locate_faces(&mut self, _: &RgbImage) -> Result<Vec<BoundingBox>, DetectionError> {
            if self.fail {
                return Err(DetectionError::EmptyFrame { width: 0, height: 0 });
            }
            Ok(self.faces.iter().map(|(b, _)| b.clone()).collect())
        }

        fn encode(&mut self, _: &RgbImage, boxes: &[BoundingBox]) -> Result<Vec<Embedding>, DetectionError> {
            Ok(boxes
                .iter()
                .map(|b| {
                    self.faces
                        .iter()
                        .find(|(fb, _)| fb == b)
                        .map(|(_, e)| e.clone())
                        .unwrap_or_else(|| Embedding::new(vec![]))
                })
                .collect())
        }
    }

    fn face_at(x: f32) -> BoundingBox {
        BoundingBox { x, y: 4.0, width: 10.0, height: 10.0, confidence: 0.9, landmarks: None }
    }

    fn alice_gallery() -> Gallery {
        Gallery::new(vec![Identity {
            name: "alice".into(),
            embedding: Embedding::new(vec![1.0, 0.0]),
            source: "alice.jpg".into(),
        }])
    }

    fn pipeline<L: AttendanceLog>(faces: Vec<(BoundingBox, Embedding)>, log: L) -> FramePipeline<ScriptedExtractor, L> {
        FramePipeline::new(
            ScriptedExtractor { faces, fail: false },
            alice_gallery(),
            Deduplicator::new(log, day(7)),
            Annotator::without_labels(),
            DEFAULT_MATCH_THRESHOLD,
        )
    }

    fn frame() -> RgbImage {
        RgbImage::from_pixel(40, 20, Rgb([30, 30, 30]))
    }

    #[test]
    fn test_no_faces_returns_frame_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance.csv");
        let mut p = pipeline(vec![], CsvAttendanceLog::new(&path));

        let outcome = p.process_frame_at(frame(), moment(7, 9));
        assert_eq!(outcome.frame, frame());
        assert!(outcome.faces.is_empty() && outcome.events.is_empty());
        assert!(!path.exists());
    }

    #[test]
    fn test_detection_error_is_empty_frame() {
        let mut p = pipeline(vec![(face_at(2.0), Embedding::new(vec![1.0, 0.0]))], FlakyLog::default());
        p.extractor.fail = true;

        let outcome = p.process_frame_at(frame(), moment(7, 9));
        assert_eq!(outcome.frame, frame());
        assert!(outcome.faces.is_empty());
        assert_eq!(p.deduplicator().log().writes, 0);
    }

    #[test]
    fn test_two_frames_of_alice_write_one_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance.csv");
        let mut p = pipeline(vec![(face_at(2.0), Embedding::new(vec![1.0, 0.0]))], CsvAttendanceLog::new(&path));

        let first = p.process_frame_at(frame(), moment(7, 9));
        let second = p.process_frame_at(frame(), moment(7, 10));
        assert_eq!(first.events.len(), 1);
        assert!(second.events.is_empty());
        assert_eq!(second.faces[0].result.name(), Some("alice"));

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "Name,Date,Time\nalice,2024-03-07,09:00:00\n");
    }

    #[test]
    fn test_every_face_is_annotated() {
        let faces = vec![
            (face_at(2.0), Embedding::new(vec![1.0, 0.0])),
            (face_at(20.0), Embedding::new(vec![-5.0, 5.0])),
        ];
        let mut p = pipeline(faces, FlakyLog::default());

        let outcome = p.process_frame_at(frame(), moment(7, 9));
        let labels: Vec<_> = outcome.faces.iter().map(|f| f.result.label()).collect();
        assert_eq!(labels, ["alice", "Unknown"]);
        assert_eq!(*outcome.frame.get_pixel(2, 4), Rgb([0, 255, 0]));
        assert_eq!(*outcome.frame.get_pixel(20, 4), Rgb([0, 255, 0]));
        // unknown faces never reach the log
        assert_eq!(p.deduplicator().log().writes, 1);
    }

    #[test]
    fn test_log_failure_keeps_video_and_retries() {
        let log = FlakyLog { failures: 1, ..Default::default() };
        let mut p = pipeline(vec![(face_at(2.0), Embedding::new(vec![1.0, 0.0]))], log);

        let failed = p.process_frame_at(frame(), moment(7, 9));
        assert_eq!(failed.log_errors.len(), 1);
        assert!(failed.events.is_empty());
        assert_eq!(*failed.frame.get_pixel(2, 4), Rgb([0, 255, 0]));

        let retried = p.process_frame_at(frame(), moment(7, 9));
        assert_eq!(retried.events.len(), 1);
        assert!(retried.log_errors.is_empty());
    }

    #[test]
    fn test_continuous_run_past_midnight_records_next_day() {
        let mut p = pipeline(vec![(face_at(2.0), Embedding::new(vec![1.0, 0.0]))], FlakyLog::default());

        assert_eq!(p.process_frame_at(frame(), moment(7, 23)).events.len(), 1);
        assert!(p.process_frame_at(frame(), moment(7, 23)).events.is_empty());
        let next = p.process_frame_at(frame(), moment(8, 0));
        assert_eq!(next.events.len(), 1);
        assert_eq!(next.events[0].date, "2024-03-08");
    }

    #[test]
    fn test_reload_gallery_picks_up_new_enrollment() {
        let dir = tempfile::tempdir().unwrap();
        let store = GalleryStore::new(dir.path());
        let mut p = FramePipeline::new(
            PixelExtractor,
            Gallery::default(),
            Deduplicator::new(FlakyLog::default(), day(7)),
            Annotator::without_labels(),
            DEFAULT_MATCH_THRESHOLD,
        );
        let probe = RgbImage::from_pixel(8, 8, Rgb([255, 0, 0]));
        assert_eq!(p.process_frame_at(probe.clone(), moment(7, 9)).faces[0].result, MatchResult::Unknown);

        probe.save(dir.path().join("alice.png")).unwrap();
        assert_eq!(p.reload_gallery(&store).unwrap(), 1);

        let outcome = p.process_frame_at(probe, moment(7, 9));
        assert_eq!(outcome.faces[0].result.name(), Some("alice"));
        assert_eq!(outcome.events.len(), 1);
    }
}
