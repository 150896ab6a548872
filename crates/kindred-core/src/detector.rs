//! Face detector interface.
//!
//! Detection is an external collaborator: the engine only consumes face
//! regions and never depends on how they were produced.

use image::DynamicImage;
use thiserror::Error;

use crate::types::Detection;

#[derive(Error, Debug)]
pub enum DetectError {
    #[error("detector backend: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl DetectError {
    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        DetectError::Backend(Box::new(err))
    }
}

/// Produces zero or more face regions from a decoded image.
///
/// Finding no face is an empty result, never an error; errors are
/// reserved for backend failures.
pub trait FaceDetector {
    fn detect(&mut self, image: &DynamicImage) -> Result<Vec<Detection>, DetectError>;
}
