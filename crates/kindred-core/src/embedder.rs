//! Face embedder interface.
//!
//! The embedder is an opaque collaborator: it aligns the detected region
//! using its landmarks and produces a fixed-length, L2-normalized
//! embedding. Only that output contract matters to the engine.

use image::DynamicImage;
use thiserror::Error;

use crate::embedding::Embedding;
use crate::types::Detection;

#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("face crop cannot be processed: {0}")]
    UnusableCrop(String),
    #[error("embedder backend: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl EmbedError {
    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        EmbedError::Backend(Box::new(err))
    }
}

/// Converts an aligned face crop into a unit-norm embedding of fixed
/// length. Fails per crop; a failure never invalidates other faces from
/// the same photo.
pub trait FaceEmbedder {
    fn embed(&mut self, image: &DynamicImage, face: &Detection) -> Result<Embedding, EmbedError>;

    /// Length of the vectors this embedder produces.
    fn embedding_dim(&self) -> usize;
}
