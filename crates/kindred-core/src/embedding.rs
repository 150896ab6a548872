//! Embedding vector math.
//!
//! All stored embeddings are unit L2 norm; comparisons assume both sides
//! are already normalized. Callers normalize once on write and compose
//! normalized centroids on read.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum EmbeddingError {
    #[error("cannot compute a centroid from zero embeddings")]
    Empty,
    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// Face embedding vector (typically 512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Scale to unit L2 norm. A zero vector has no direction and is
    /// returned unchanged rather than divided by zero.
    pub fn normalize(mut self) -> Self {
        let norm: f32 = self.values.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut self.values {
                *v /= norm;
            }
        }
        self
    }

    /// Similarity of two unit-norm embeddings, mapped from cosine
    /// similarity in [-1, 1] into [0, 1]. Higher = more similar.
    ///
    /// Does not re-normalize its inputs. An undefined comparison
    /// (mismatched or zero-length vectors) scores 0.0, never an error.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        if self.values.is_empty() || self.values.len() != other.values.len() {
            return 0.0;
        }
        let dot: f32 = self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| a * b)
            .sum();
        (dot + 1.0) / 2.0
    }

    /// Re-normalized arithmetic mean of a non-empty set of same-length
    /// embeddings. This is how a person's representative embedding is
    /// derived from its member faces.
    pub fn centroid(embeddings: &[Embedding]) -> Result<Embedding, EmbeddingError> {
        let first = embeddings.first().ok_or(EmbeddingError::Empty)?;
        let dim = first.values.len();

        let mut sum = vec![0.0f32; dim];
        for e in embeddings {
            if e.values.len() != dim {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: dim,
                    got: e.values.len(),
                });
            }
            for (acc, v) in sum.iter_mut().zip(e.values.iter()) {
                *acc += v;
            }
        }

        let count = embeddings.len() as f32;
        for v in &mut sum {
            *v /= count;
        }

        Ok(Embedding::new(sum).normalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(values: Vec<f32>) -> Embedding {
        Embedding::new(values).normalize()
    }

    #[test]
    fn test_normalize_produces_unit_norm() {
        let e = Embedding::new(vec![3.0, 4.0]).normalize();
        let norm: f32 = e.values.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let once = Embedding::new(vec![1.0, 2.0, 2.0]).normalize();
        let twice = once.clone().normalize();
        for (a, b) in once.values.iter().zip(twice.values.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_normalize_zero_vector_unchanged() {
        let e = Embedding::new(vec![0.0, 0.0, 0.0]).normalize();
        assert_eq!(e.values, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_similarity_identical_is_one() {
        let a = unit(vec![1.0, 0.0, 0.0]);
        assert!((a.similarity(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_similarity_orthogonal_is_half() {
        // Cosine 0 maps to the middle of the [0, 1] range.
        let a = unit(vec![1.0, 0.0]);
        let b = unit(vec![0.0, 1.0]);
        assert!((a.similarity(&b) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_similarity_opposite_is_zero() {
        let a = unit(vec![1.0, 0.0]);
        let b = unit(vec![-1.0, 0.0]);
        assert!(a.similarity(&b).abs() < 1e-6);
    }

    #[test]
    fn test_similarity_is_symmetric() {
        let a = unit(vec![0.3, 0.7, -0.2]);
        let b = unit(vec![-0.1, 0.9, 0.4]);
        assert_eq!(a.similarity(&b), b.similarity(&a));
    }

    #[test]
    fn test_similarity_mismatched_lengths_is_zero() {
        let a = unit(vec![1.0, 0.0]);
        let b = unit(vec![1.0, 0.0, 0.0]);
        assert_eq!(a.similarity(&b), 0.0);
    }

    #[test]
    fn test_similarity_empty_is_zero() {
        let a = Embedding::new(vec![]);
        assert_eq!(a.similarity(&a), 0.0);
    }

    #[test]
    fn test_centroid_of_empty_set_fails() {
        assert_eq!(Embedding::centroid(&[]), Err(EmbeddingError::Empty));
    }

    #[test]
    fn test_centroid_single_member_is_identity() {
        let a = unit(vec![0.6, 0.8]);
        let c = Embedding::centroid(std::slice::from_ref(&a)).unwrap();
        for (x, y) in a.values.iter().zip(c.values.iter()) {
            assert!((x - y).abs() < 1e-6);
        }
    }

    #[test]
    fn test_centroid_is_renormalized() {
        let a = unit(vec![1.0, 0.0]);
        let b = unit(vec![0.0, 1.0]);
        let c = Embedding::centroid(&[a, b]).unwrap();
        let norm: f32 = c.values.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
        // Mean of the two axes points along the diagonal.
        assert!((c.values[0] - c.values[1]).abs() < 1e-6);
    }

    #[test]
    fn test_centroid_rejects_mixed_dimensions() {
        let a = unit(vec![1.0, 0.0]);
        let b = unit(vec![1.0, 0.0, 0.0]);
        assert_eq!(
            Embedding::centroid(&[a, b]),
            Err(EmbeddingError::DimensionMismatch { expected: 2, got: 3 })
        );
    }
}
