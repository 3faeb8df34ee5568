use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Euclidean distance under which two embeddings are treated as the same person.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// Pixel-space `(top, right, bottom, left)` edges, rounded to the nearest pixel.
    pub fn trbl(&self) -> (i32, i32, i32, i32) {
        (
            self.y.round() as i32,
            (self.x + self.width).round() as i32,
            (self.y + self.height).round() as i32,
            self.x.round() as i32,
        )
    }

    /// Intersection-over-union with another box; 0.0 for degenerate boxes.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let inter_w = ((self.x + self.width).min(other.x + other.width) - self.x.max(other.x)).max(0.0);
        let inter_h =
            ((self.y + self.height).min(other.y + other.height) - self.y.max(other.y)).max(0.0);
        let inter = inter_w * inter_h;
        let union = self.width * self.height + other.width * other.height - inter;
        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values, model_version: None }
    }

    /// Euclidean distance between two embeddings.
    ///
    /// Vectors of different length are compared over their common prefix.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(&other.values)
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// An enrolled person: display name plus the reference embedding taken from
/// their enrollment image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub embedding: Embedding,
    /// Enrollment image the embedding was extracted from.
    pub source: PathBuf,
}

/// An enrollment image that produced no identity.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedEnrollment {
    pub path: PathBuf,
    pub reason: String,
}

/// Ordered collection of enrolled identities.
///
/// Order matters: when several identities fall within the threshold the
/// earliest one wins.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    identities: Vec<Identity>,
    skipped: Vec<SkippedEnrollment>,
}

impl Gallery {
    pub fn new(identities: Vec<Identity>) -> Self {
        Self { identities, skipped: Vec::new() }
    }

    pub(crate) fn with_skipped(identities: Vec<Identity>, skipped: Vec<SkippedEnrollment>) -> Self {
        Self { identities, skipped }
    }

    pub fn identities(&self) -> &[Identity] {
        &self.identities
    }

    /// Enrollment images that were left out at load time.
    pub fn skipped(&self) -> &[SkippedEnrollment] {
        &self.skipped
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.identities.iter().any(|i| i.name == name)
    }
}

/// Result of matching a probe embedding against a gallery.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchResult {
    Matched {
        /// Position of the identity in gallery order.
        index: usize,
        name: String,
        distance: f32,
    },
    Unknown,
}

impl MatchResult {
    pub fn name(&self) -> Option<&str> {
        match self {
            MatchResult::Matched { name, .. } => Some(name),
            MatchResult::Unknown => None,
        }
    }

    /// Text drawn next to the face box.
    pub fn label(&self) -> &str {
        self.name().unwrap_or("Unknown")
    }
}

/// Strategy for comparing a probe embedding against a gallery of enrolled faces.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, gallery: &Gallery, threshold: f32) -> MatchResult;
}

/// Euclidean matcher returning the first identity in gallery order whose
/// distance is within the threshold.
///
/// This is not a nearest-neighbour search: a later, closer identity never
/// displaces an earlier one that already qualifies.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstMatchMatcher;

impl Matcher for FirstMatchMatcher {
    fn compare(&self, probe: &Embedding, gallery: &Gallery, threshold: f32) -> MatchResult {
        gallery
            .identities()
            .iter()
            .enumerate()
            .find_map(|(index, identity)| {
                let distance = probe.euclidean_distance(&identity.embedding);
                (distance <= threshold).then(|| MatchResult::Matched {
                    index,
                    name: identity.name.clone(),
                    distance,
                })
            })
            .unwrap_or(MatchResult::Unknown)
    }
}
