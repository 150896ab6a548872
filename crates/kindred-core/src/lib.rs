//! kindred-core — face identity resolution for personal photo galleries.
//!
//! Given face embeddings produced by an external detector/embedder pair,
//! this crate decides which persistent person identity each face belongs
//! to, groups unmapped faces into provisional clusters for review, and
//! maintains person mappings as faces are confirmed or reassigned.

pub mod cluster;
pub mod config;
pub mod detector;
pub mod embedder;
pub mod embedding;
pub mod engine;
pub mod pipeline;
pub mod resolver;
pub mod store;
pub mod types;

pub use config::EngineConfig;
pub use embedding::{Embedding, EmbeddingError};
pub use engine::{Engine, EngineError, PersonSummary};
pub use pipeline::{BatchProgress, BatchReport, Flow, Pipeline};
pub use resolver::IdentityResolver;
pub use store::{IdentityStore, MemoryStore, StoreError, StoreStats};
pub use types::{
    BoundingBox, Detection, Face, FaceId, Mapping, MatchOutcome, NewFace, Person, PersonId,
    Photo, PhotoId,
};
