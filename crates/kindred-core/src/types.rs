use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::embedding::Embedding;

pub type PhotoId = i64;
pub type FaceId = i64;
pub type PersonId = i64;

/// Number of facial landmarks per detection:
/// [left_eye, right_eye, nose, left_mouth, right_mouth].
pub const LANDMARK_COUNT: usize = 5;

pub type Landmarks = [(f32, f32); LANDMARK_COUNT];

/// Bounding box for a detected face, in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    /// A usable box has non-negative origin and strictly positive extent.
    pub fn is_valid(&self) -> bool {
        self.x >= 0.0 && self.y >= 0.0 && self.width > 0.0 && self.height > 0.0
    }
}

/// One face region produced by a detector, before persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub landmarks: Landmarks,
    /// Detector confidence in [0, 1].
    pub confidence: f32,
}

/// A gallery photo row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Photo {
    pub id: PhotoId,
    pub path: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub file_size: Option<u64>,
    /// Set exactly once every detected face in the photo has been processed.
    pub analyzed: bool,
    pub added_at: DateTime<Utc>,
}

/// A detected face, immutable once created. The embedding itself is read
/// separately through [`IdentityStore::face_embedding`](crate::store::IdentityStore::face_embedding).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Face {
    pub id: FaceId,
    pub photo_id: PhotoId,
    pub bbox: BoundingBox,
    pub landmarks: Landmarks,
    pub confidence: f32,
    pub detected_at: DateTime<Utc>,
}

/// Parameters for persisting a newly detected face.
#[derive(Debug, Clone)]
pub struct NewFace {
    pub photo_id: PhotoId,
    pub bbox: BoundingBox,
    pub landmarks: Landmarks,
    pub embedding: Embedding,
    pub confidence: f32,
}

/// A known person. The representative embedding is never stored; it is
/// derived on demand as the renormalized mean of the member faces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Person {
    pub id: PersonId,
    pub name: Option<String>,
    pub contact_id: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Association between one face and one person. A face maps to at most
/// one person at a time; re-mapping replaces the prior association.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mapping {
    pub face_id: FaceId,
    pub person_id: PersonId,
    /// The similarity that produced the association. Absent for
    /// user-declared mappings where no score was computed.
    pub similarity: Option<f32>,
    /// True only when a human confirmed the association.
    pub verified: bool,
    pub mapped_at: DateTime<Utc>,
}

/// Outcome of resolving a candidate embedding against the known persons.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MatchOutcome {
    Matched {
        person_id: PersonId,
        similarity: f32,
    },
    /// No person scored at or above the recognition threshold. The best
    /// losing similarity is reported for diagnostics.
    NoMatch { best_similarity: f32 },
}

impl MatchOutcome {
    pub fn is_match(&self) -> bool {
        matches!(self, MatchOutcome::Matched { .. })
    }

    pub fn person_id(&self) -> Option<PersonId> {
        match self {
            MatchOutcome::Matched { person_id, .. } => Some(*person_id),
            MatchOutcome::NoMatch { .. } => None,
        }
    }

    pub fn similarity(&self) -> f32 {
        match self {
            MatchOutcome::Matched { similarity, .. } => *similarity,
            MatchOutcome::NoMatch { best_similarity } => *best_similarity,
        }
    }
}
