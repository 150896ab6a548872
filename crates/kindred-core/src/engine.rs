//! Assignment workflow and person lifecycle.
//!
//! The engine is constructed with an explicit store and configuration
//! and passed to callers; there is no ambient global instance.

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::cluster;
use crate::config::EngineConfig;
use crate::detector::DetectError;
use crate::embedding::Embedding;
use crate::resolver::{person_centroid, IdentityResolver};
use crate::store::{IdentityStore, StoreError, StoreStats};
use crate::types::{FaceId, MatchOutcome, Person, PersonId};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("could not read image {path}")]
    InputUnreadable {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("face {0} has no usable embedding")]
    EmbeddingUnavailable(FaceId),
    #[error("candidate embedding must have {expected} dimensions, got {got}")]
    MalformedCandidate { expected: usize, got: usize },
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("detector: {0}")]
    Detector(#[from] DetectError),
    #[error("could not read gallery directory {path}")]
    GalleryUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A person with aggregate membership counts, for listings.
#[derive(Debug, Clone, Serialize)]
pub struct PersonSummary {
    #[serde(flatten)]
    pub person: Person,
    pub face_count: usize,
    pub photo_count: usize,
}

/// Identity-resolution engine over a single store.
pub struct Engine<S> {
    store: S,
    resolver: IdentityResolver,
    config: EngineConfig,
}

impl<S: IdentityStore> Engine<S> {
    pub fn new(store: S, config: EngineConfig) -> Self {
        let resolver = IdentityResolver::new(config.recognition_threshold);
        Self { store, resolver, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Match a candidate embedding against all known persons.
    ///
    /// A candidate of the wrong length is malformed input and fails
    /// hard; it would otherwise score 0.0 against every centroid and
    /// masquerade as a plausible no-match.
    pub fn resolve(&self, candidate: &Embedding) -> Result<MatchOutcome, EngineError> {
        if candidate.len() != self.config.embedding_dim {
            return Err(EngineError::MalformedCandidate {
                expected: self.config.embedding_dim,
                got: candidate.len(),
            });
        }
        Ok(self.resolver.resolve(&self.store, candidate)?)
    }

    /// Match a stored face against all known persons. Fails fast when
    /// the face has no usable embedding; no scan is attempted.
    pub fn resolve_face(&self, face_id: FaceId) -> Result<MatchOutcome, EngineError> {
        let candidate = self
            .store
            .face_embedding(face_id)?
            .ok_or(EngineError::EmbeddingUnavailable(face_id))?;
        self.resolve(&candidate)
    }

    /// Group the unmapped faces for review, using the configured
    /// threshold unless one is given.
    pub fn cluster_unmapped(
        &self,
        threshold: Option<f32>,
    ) -> Result<Vec<Vec<FaceId>>, EngineError> {
        let threshold = threshold.unwrap_or(self.config.cluster_threshold);
        Ok(cluster::cluster_unmapped(&self.store, threshold)?)
    }

    /// Create a new person from a face the user identified. The mapping
    /// is verified ground truth; no similarity is recorded.
    pub fn create_person_from_face(
        &self,
        face_id: FaceId,
        name: Option<&str>,
        contact_id: Option<&str>,
    ) -> Result<PersonId, EngineError> {
        // Check the face first so a bad id cannot leave an orphan person.
        self.store
            .face(face_id)?
            .ok_or(StoreError::FaceNotFound(face_id))?;

        let person_id = self.store.add_person(name, contact_id, None)?;
        self.store.upsert_mapping(face_id, person_id, None, true)?;
        tracing::info!(face_id, person_id, name, "created person from face");
        Ok(person_id)
    }

    /// Assign a face to an existing person, recording the similarity of
    /// the face against the person's current centroid. A person with no
    /// member faces yet accepts the face at similarity 1.0.
    ///
    /// Returns the similarity that was recorded.
    pub fn assign_face(
        &self,
        face_id: FaceId,
        person_id: PersonId,
        verified: bool,
    ) -> Result<f32, EngineError> {
        self.store
            .person(person_id)?
            .ok_or(StoreError::PersonNotFound(person_id))?;
        let embedding = self
            .store
            .face_embedding(face_id)?
            .ok_or(EngineError::EmbeddingUnavailable(face_id))?;

        let similarity = match person_centroid(&self.store, person_id)? {
            Some(centroid) => embedding.similarity(&centroid),
            None => 1.0,
        };

        self.store
            .upsert_mapping(face_id, person_id, Some(similarity), verified)?;
        tracing::info!(face_id, person_id, similarity, verified, "assigned face to person");
        Ok(similarity)
    }

    /// Remove a face's person association. The face and the person both
    /// survive.
    pub fn unassign_face(&self, face_id: FaceId) -> Result<(), EngineError> {
        self.store.delete_mapping(face_id)?;
        tracing::info!(face_id, "unassigned face");
        Ok(())
    }

    /// Record that a human confirmed an automatic match. The similarity
    /// that produced the mapping is untouched.
    pub fn verify_mapping(&self, face_id: FaceId) -> Result<(), EngineError> {
        self.store.mark_mapping_verified(face_id)?;
        tracing::info!(face_id, "mapping verified");
        Ok(())
    }

    pub fn person_summary(&self, person_id: PersonId) -> Result<PersonSummary, EngineError> {
        let person = self
            .store
            .person(person_id)?
            .ok_or(StoreError::PersonNotFound(person_id))?;
        let face_count = self.store.faces_for_person(person_id)?.len();
        let photo_count = self.store.person_photo_count(person_id)?;
        Ok(PersonSummary { person, face_count, photo_count })
    }

    pub fn people_summaries(&self) -> Result<Vec<PersonSummary>, EngineError> {
        self.store
            .all_persons()?
            .into_iter()
            .map(|p| self.person_summary(p.id))
            .collect()
    }

    pub fn statistics(&self) -> Result<StoreStats, EngineError> {
        Ok(self.store.statistics()?)
    }
}
