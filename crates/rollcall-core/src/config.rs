//! Shared configuration: optional TOML file, then `ROLLCALL_*` environment
//! overrides.

use crate::types::DEFAULT_MATCH_THRESHOLD;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("invalid config {path}: {source}")]
    Parse { path: PathBuf, source: toml::de::Error },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// One image per enrolled person; file stem is the name.
    pub enrollment_dir: PathBuf,
    /// CSV attendance log.
    pub log_path: PathBuf,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Maximum embedding distance for a match.
    pub match_threshold: f32,
    /// V4L2 device path.
    pub camera_device: String,
    /// Frames to discard after opening the camera (AGC/AE stabilization).
    pub warmup_frames: usize,
    /// TTF/OTF font used for face labels. When unset or unreadable, faces
    /// get boxes only and a warning is logged once at startup.
    pub font_path: Option<PathBuf>,
    /// Where the daemon writes its latest annotated frame, if anywhere.
    pub preview_path: Option<PathBuf>,
    /// Write the preview every N processed frames.
    pub preview_every: u64,
    /// Register on the system bus instead of the session bus.
    pub system_bus: bool,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = data_dir();
        Self {
            enrollment_dir: data_dir.join("known_faces"),
            log_path: data_dir.join("attendance.csv"),
            model_dir: data_dir.join("models"),
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            camera_device: "/dev/video0".to_string(),
            warmup_frames: 4,
            font_path: Some(PathBuf::from("/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf")),
            preview_path: None,
            preview_every: 30,
            system_bus: false,
        }
    }
}

impl Config {
    /// Load from `ROLLCALL_CONFIG` (or the XDG default path, if present),
    /// then apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let explicit = std::env::var("ROLLCALL_CONFIG").ok().map(PathBuf::from);
        let path = explicit.clone().unwrap_or_else(|| config_dir().join("config.toml"));

        let mut config = if explicit.is_some() || path.exists() {
            Self::from_file(&path)?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Override fields from `ROLLCALL_*` variables. Unparseable numbers are
    /// ignored with a warning.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("ROLLCALL_ENROLLMENT_DIR") {
            self.enrollment_dir = v.into();
        }
        if let Some(v) = var("ROLLCALL_LOG_PATH") {
            self.log_path = v.into();
        }
        if let Some(v) = var("ROLLCALL_MODEL_DIR") {
            self.model_dir = v.into();
        }
        if let Some(v) = var("ROLLCALL_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = var("ROLLCALL_FONT_PATH") {
            self.font_path = (!v.is_empty()).then(|| v.into());
        }
        if let Some(v) = var("ROLLCALL_PREVIEW_PATH") {
            self.preview_path = (!v.is_empty()).then(|| v.into());
        }
        if let Some(v) = var("ROLLCALL_SYSTEM_BUS") {
            self.system_bus = v != "0";
        }
        parse_into(&var, "ROLLCALL_MATCH_THRESHOLD", &mut self.match_threshold);
        parse_into(&var, "ROLLCALL_WARMUP_FRAMES", &mut self.warmup_frames);
        parse_into(&var, "ROLLCALL_PREVIEW_EVERY", &mut self.preview_every);
    }

    /// Path to the SCRFD detection model.
    pub fn detector_model_path(&self) -> String {
        self.model_dir.join("det_10g.onnx").to_string_lossy().into_owned()
    }

    /// Path to the ArcFace recognition model.
    pub fn recognizer_model_path(&self) -> String {
        self.model_dir.join("w600k_r50.onnx").to_string_lossy().into_owned()
    }
}

fn parse_into<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    if let Some(raw) = var(key) {
        match raw.parse() {
            Ok(v) => *slot = v,
            Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable value"),
        }
    }
}

fn home() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string()))
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home().join(".local/share"))
        .join("rollcall")
}

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home().join(".config"))
        .join("rollcall")
}
