use rollcall_core::{
    Config, CsvAttendanceLog, EmbeddingExtractor, FrameOutcome, FramePipeline, GalleryError, GalleryStore,
    OnnxExtractor,
};
use rollcall_hw::{Camera, FrameStream};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, oneshot};

/// Pause after a failed capture before trying again.
const CAPTURE_BACKOFF: Duration = Duration::from_millis(200);

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] rollcall_hw::CameraError),
    #[error("pipeline setup failed: {0}")]
    Build(#[from] rollcall_core::BuildError),
    #[error("gallery reload failed: {0}")]
    Gallery(#[from] GalleryError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Snapshot of the engine's counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineStatus {
    pub camera: String,
    pub gallery_size: usize,
    pub skipped_enrollments: usize,
    pub frames_processed: u64,
    pub dark_frames: u64,
    pub capture_errors: u64,
    pub faces_seen: u64,
    pub events_recorded: u64,
    pub log_errors: u64,
    pub last_event: Option<String>,
    pub tracking_day: String,
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Status { reply: oneshot::Sender<EngineStatus> },
    ReloadGallery { reply: oneshot::Sender<Result<usize, EngineError>> },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Status { reply })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Rescan the enrollment directory. Returns the new gallery size.
    pub async fn reload_gallery(&self) -> Result<usize, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::ReloadGallery { reply })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Everything the frame loop owns.
struct Engine<E: EmbeddingExtractor> {
    pipeline: FramePipeline<E, CsvAttendanceLog>,
    store: GalleryStore,
    preview_path: Option<PathBuf>,
    preview_every: u64,
    status: EngineStatus,
}

impl<E: EmbeddingExtractor> Engine<E> {
    fn handle(&mut self, request: EngineRequest) {
        match request {
            EngineRequest::Status { reply } => {
                let mut status = self.status.clone();
                status.gallery_size = self.pipeline.gallery().len();
                status.skipped_enrollments = self.pipeline.gallery().skipped().len();
                status.tracking_day = self.pipeline.deduplicator().day().to_string();
                let _ = reply.send(status);
            }
            EngineRequest::ReloadGallery { reply } => {
                let result = self.pipeline.reload_gallery(&self.store).map_err(EngineError::from);
                match &result {
                    Ok(count) => tracing::info!(identities = count, "gallery reloaded"),
                    Err(error) => tracing::warn!(%error, "gallery reload failed, keeping previous gallery"),
                }
                let _ = reply.send(result);
            }
        }
    }

    fn record(&mut self, outcome: &FrameOutcome) {
        self.status.frames_processed += 1;
        self.status.faces_seen += outcome.faces.len() as u64;
        self.status.events_recorded += outcome.events.len() as u64;
        self.status.log_errors += outcome.log_errors.len() as u64;
        if let Some(event) = outcome.events.last() {
            self.status.last_event = Some(format!("{} {} {}", event.name, event.date, event.time));
        }

        let due = self.preview_every > 0 && self.status.frames_processed % self.preview_every == 0;
        if let (Some(path), true) = (&self.preview_path, due) {
            if let Err(error) = outcome.frame.save(path) {
                tracing::warn!(path = %path.display(), %error, "failed to write preview frame");
            }
        }
    }

    /// Process frames until every handle is dropped.
    fn run(&mut self, stream: &mut FrameStream<'_>, rx: &mut mpsc::Receiver<EngineRequest>) {
        loop {
            loop {
                match rx.try_recv() {
                    Ok(request) => self.handle(request),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => return,
                }
            }

            let frame = match stream.next_frame() {
                Ok(frame) => frame,
                Err(error) => {
                    self.status.capture_errors += 1;
                    tracing::warn!(%error, "frame capture failed");
                    std::thread::sleep(CAPTURE_BACKOFF);
                    continue;
                }
            };
            if frame.is_dark {
                self.status.dark_frames += 1;
                tracing::debug!(seq = frame.sequence, "skipping dark frame");
                continue;
            }

            let captured = frame.timestamp;
            let outcome = self.pipeline.process_frame(frame.image);
            tracing::trace!(
                seq = frame.sequence,
                latency_ms = captured.elapsed().as_millis() as u64,
                faces = outcome.faces.len(),
                "frame done"
            );
            self.record(&outcome);
        }
    }
}

/// Pull and drop `count` frames while exposure settles. Returns how many
/// captures failed.
fn discard_warmup<F>(count: usize, mut next: impl FnMut() -> Result<F, rollcall_hw::CameraError>) -> usize {
    let mut failed = 0;
    for i in 0..count {
        if let Err(error) = next() {
            failed += 1;
            tracing::debug!(frame = i, %error, "warmup capture failed");
        }
    }
    failed
}

/// Spawn the engine on a dedicated OS thread.
///
/// Opens the camera, loads both ONNX models and the gallery, discards
/// warmup frames, then processes frames strictly in capture order. Fails
/// fast at startup if any resource is unavailable.
pub fn spawn_engine(config: &Config) -> Result<EngineHandle, EngineError> {
    let camera = Camera::open(&config.camera_device)?;
    tracing::info!(
        device = %config.camera_device,
        width = camera.width,
        height = camera.height,
        fourcc = ?camera.fourcc,
        "camera opened"
    );

    let pipeline: FramePipeline<OnnxExtractor, CsvAttendanceLog> = rollcall_core::build_pipeline(config)?;
    tracing::info!(
        identities = pipeline.gallery().len(),
        threshold = pipeline.threshold(),
        "pipeline ready"
    );

    let mut engine = Engine {
        pipeline,
        store: GalleryStore::new(&config.enrollment_dir),
        preview_path: config.preview_path.clone(),
        preview_every: config.preview_every,
        status: EngineStatus { camera: config.camera_device.clone(), ..Default::default() },
    };
    let warmup_frames = config.warmup_frames;
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            let mut stream = match camera.stream() {
                Ok(stream) => stream,
                Err(error) => {
                    tracing::error!(%error, "failed to start capture stream");
                    return;
                }
            };

            if warmup_frames > 0 {
                tracing::info!(count = warmup_frames, "discarding warmup frames");
                discard_warmup(warmup_frames, || stream.next_frame());
            }

            tracing::info!("engine thread started");
            engine.run(&mut stream, &mut rx);
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use rollcall_core::testing::PixelExtractor;
    use rollcall_core::{Annotator, Deduplicator, Gallery, DEFAULT_MATCH_THRESHOLD};

    fn engine(dir: &std::path::Path, preview_every: u64) -> Engine<PixelExtractor> {
        let today = chrono::Local::now().date_naive();
        Engine {
            pipeline: FramePipeline::new(
                PixelExtractor,
                Gallery::default(),
                Deduplicator::new(CsvAttendanceLog::new(dir.join("attendance.csv")), today),
                Annotator::without_labels(),
                DEFAULT_MATCH_THRESHOLD,
            ),
            store: GalleryStore::new(dir.join("known_faces")),
            preview_path: Some(dir.join("preview.png")),
            preview_every,
            status: EngineStatus::default(),
        }
    }

    #[test]
    fn test_reload_then_status() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine(dir.path(), 0);
        std::fs::create_dir_all(dir.path().join("known_faces")).unwrap();
        RgbImage::from_pixel(8, 8, Rgb([255, 0, 0]))
            .save(dir.path().join("known_faces/alice.png"))
            .unwrap();

        let (reply, mut rx) = oneshot::channel();
        engine.handle(EngineRequest::ReloadGallery { reply });
        assert_eq!(rx.try_recv().unwrap().unwrap(), 1);

        let (reply, mut rx) = oneshot::channel();
        engine.handle(EngineRequest::Status { reply });
        let status = rx.try_recv().unwrap();
        assert_eq!(status.gallery_size, 1);
        assert_eq!(status.tracking_day, chrono::Local::now().date_naive().to_string());
    }

    #[test]
    fn test_warmup_survives_capture_errors() {
        let mut calls = 0;
        let failed = discard_warmup(4, || {
            calls += 1;
            if calls % 2 == 0 {
                Err(rollcall_hw::CameraError::CaptureFailed("dequeue timeout".into()))
            } else {
                Ok(())
            }
        });
        assert_eq!(calls, 4);
        assert_eq!(failed, 2);
    }

    #[test]
    fn test_record_counts_and_writes_preview() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = engine(dir.path(), 2);
        let frame = RgbImage::from_pixel(8, 8, Rgb([0, 255, 0]));

        let outcome = engine.pipeline.process_frame(frame.clone());
        engine.record(&outcome);
        assert!(!dir.path().join("preview.png").exists());

        let outcome = engine.pipeline.process_frame(frame);
        engine.record(&outcome);
        assert!(dir.path().join("preview.png").exists());
        assert_eq!(engine.status.frames_processed, 2);
        assert_eq!(engine.status.faces_seen, 2);
        assert_eq!(engine.status.events_recorded, 0);
    }
}
