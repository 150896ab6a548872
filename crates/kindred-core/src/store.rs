//! Identity store abstraction.
//!
//! The engine reads and writes photos, faces, persons, and face→person
//! mappings only through [`IdentityStore`]. Persistence backends live in
//! their own crates; [`MemoryStore`] here is a complete reference
//! implementation used by tests and previews.

use std::sync::Mutex;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;

use crate::embedding::Embedding;
use crate::types::{Face, FaceId, Mapping, NewFace, Person, PersonId, Photo, PhotoId};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("photo {0} not found")]
    PhotoNotFound(PhotoId),
    #[error("face {0} not found")]
    FaceNotFound(FaceId),
    #[error("person {0} not found")]
    PersonNotFound(PersonId),
    #[error("no mapping exists for face {0}")]
    MappingNotFound(FaceId),
    #[error("embedding must have {expected} dimensions, got {got}")]
    InvalidEmbedding { expected: usize, got: usize },
    #[error("bounding box must have non-negative origin and positive extent")]
    InvalidBoundingBox,
    #[error("storage backend: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        StoreError::Backend(Box::new(err))
    }
}

/// Aggregate counts across the whole store.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StoreStats {
    pub total_photos: usize,
    pub analyzed_photos: usize,
    pub total_faces: usize,
    pub total_persons: usize,
    pub mapped_faces: usize,
    pub verified_mappings: usize,
    pub unmapped_faces: usize,
}

/// Narrow read/write contract between the engine and durable storage.
///
/// Ordering contract: `unmapped_faces` and `faces_for_person` return
/// newest detections first; `all_persons` sorts by name with unnamed
/// persons first. The resolver and clustering depend on these orders
/// being stable between calls.
pub trait IdentityStore {
    // Photos
    fn add_photo(
        &self,
        path: &str,
        width: Option<u32>,
        height: Option<u32>,
        file_size: Option<u64>,
    ) -> Result<PhotoId, StoreError>;
    fn photo(&self, id: PhotoId) -> Result<Option<Photo>, StoreError>;
    fn photo_by_path(&self, path: &str) -> Result<Option<Photo>, StoreError>;
    fn unanalyzed_photos(&self) -> Result<Vec<Photo>, StoreError>;
    fn mark_photo_analyzed(&self, id: PhotoId) -> Result<(), StoreError>;

    // Faces
    fn add_face(&self, face: NewFace) -> Result<FaceId, StoreError>;
    fn face(&self, id: FaceId) -> Result<Option<Face>, StoreError>;
    /// Read a face's stored embedding. `Ok(None)` means the face exists
    /// but its embedding is unusable; an absent face is `FaceNotFound`.
    fn face_embedding(&self, id: FaceId) -> Result<Option<Embedding>, StoreError>;
    fn unmapped_faces(&self) -> Result<Vec<Face>, StoreError>;

    // Persons
    fn add_person(
        &self,
        name: Option<&str>,
        contact_id: Option<&str>,
        notes: Option<&str>,
    ) -> Result<PersonId, StoreError>;
    fn person(&self, id: PersonId) -> Result<Option<Person>, StoreError>;
    fn all_persons(&self) -> Result<Vec<Person>, StoreError>;
    fn update_person(
        &self,
        id: PersonId,
        name: Option<&str>,
        contact_id: Option<&str>,
        notes: Option<&str>,
    ) -> Result<(), StoreError>;
    /// Delete a person and cascade its mappings. Faces and photos survive.
    fn delete_person(&self, id: PersonId) -> Result<(), StoreError>;
    fn faces_for_person(&self, id: PersonId) -> Result<Vec<Face>, StoreError>;
    fn person_photo_count(&self, id: PersonId) -> Result<usize, StoreError>;

    // Mappings
    /// Associate a face with a person, replacing any prior mapping for
    /// that face. At most one mapping per face is a hard invariant.
    fn upsert_mapping(
        &self,
        face_id: FaceId,
        person_id: PersonId,
        similarity: Option<f32>,
        verified: bool,
    ) -> Result<(), StoreError>;
    fn mapping_for_face(&self, face_id: FaceId) -> Result<Option<Mapping>, StoreError>;
    /// Flip `verified` on an existing mapping without touching similarity.
    fn mark_mapping_verified(&self, face_id: FaceId) -> Result<(), StoreError>;
    fn delete_mapping(&self, face_id: FaceId) -> Result<(), StoreError>;

    // Maintenance
    fn statistics(&self) -> Result<StoreStats, StoreError>;
    /// Remove every photo, face, person, and mapping.
    fn clear_all(&self) -> Result<(), StoreError>;
}

#[derive(Default)]
struct MemoryInner {
    photos: Vec<Photo>,
    faces: Vec<(Face, Option<Embedding>)>,
    persons: Vec<Person>,
    mappings: Vec<Mapping>,
    next_photo: PhotoId,
    next_face: FaceId,
    next_person: PersonId,
}

/// In-memory [`IdentityStore`] with the same ordering contract as the
/// SQLite backend. Not durable; intended for tests and previews.
pub struct MemoryStore {
    embedding_dim: usize,
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new(embedding_dim: usize) -> Self {
        Self {
            embedding_dim,
            inner: Mutex::new(MemoryInner::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        // A poisoned lock means a panic mid-write in this process; the
        // data is plain values, so continue with what is there.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn sort_newest_first(faces: &mut [Face]) {
    faces.sort_by(|a, b| {
        b.detected_at
            .cmp(&a.detected_at)
            .then(b.id.cmp(&a.id))
    });
}

impl IdentityStore for MemoryStore {
    fn add_photo(
        &self,
        path: &str,
        width: Option<u32>,
        height: Option<u32>,
        file_size: Option<u64>,
    ) -> Result<PhotoId, StoreError> {
        let mut inner = self.lock();
        inner.next_photo += 1;
        let id = inner.next_photo;
        inner.photos.push(Photo {
            id,
            path: path.to_string(),
            width,
            height,
            file_size,
            analyzed: false,
            added_at: Utc::now(),
        });
        Ok(id)
    }

    fn photo(&self, id: PhotoId) -> Result<Option<Photo>, StoreError> {
        Ok(self.lock().photos.iter().find(|p| p.id == id).cloned())
    }

    fn photo_by_path(&self, path: &str) -> Result<Option<Photo>, StoreError> {
        Ok(self.lock().photos.iter().find(|p| p.path == path).cloned())
    }

    fn unanalyzed_photos(&self) -> Result<Vec<Photo>, StoreError> {
        let mut photos: Vec<Photo> = self
            .lock()
            .photos
            .iter()
            .filter(|p| !p.analyzed)
            .cloned()
            .collect();
        photos.sort_by(|a, b| b.added_at.cmp(&a.added_at).then(b.id.cmp(&a.id)));
        Ok(photos)
    }

    fn mark_photo_analyzed(&self, id: PhotoId) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let photo = inner
            .photos
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or(StoreError::PhotoNotFound(id))?;
        photo.analyzed = true;
        Ok(())
    }

    fn add_face(&self, face: NewFace) -> Result<FaceId, StoreError> {
        if !face.bbox.is_valid() {
            return Err(StoreError::InvalidBoundingBox);
        }
        if face.embedding.len() != self.embedding_dim {
            return Err(StoreError::InvalidEmbedding {
                expected: self.embedding_dim,
                got: face.embedding.len(),
            });
        }
        let mut inner = self.lock();
        if !inner.photos.iter().any(|p| p.id == face.photo_id) {
            return Err(StoreError::PhotoNotFound(face.photo_id));
        }
        inner.next_face += 1;
        let id = inner.next_face;
        let record = Face {
            id,
            photo_id: face.photo_id,
            bbox: face.bbox,
            landmarks: face.landmarks,
            confidence: face.confidence,
            detected_at: Utc::now(),
        };
        inner.faces.push((record, Some(face.embedding)));
        Ok(id)
    }

    fn face(&self, id: FaceId) -> Result<Option<Face>, StoreError> {
        Ok(self
            .lock()
            .faces
            .iter()
            .find(|(f, _)| f.id == id)
            .map(|(f, _)| f.clone()))
    }

    fn face_embedding(&self, id: FaceId) -> Result<Option<Embedding>, StoreError> {
        let inner = self.lock();
        let (_, embedding) = inner
            .faces
            .iter()
            .find(|(f, _)| f.id == id)
            .ok_or(StoreError::FaceNotFound(id))?;
        Ok(embedding.clone())
    }

    fn unmapped_faces(&self) -> Result<Vec<Face>, StoreError> {
        let inner = self.lock();
        let mut faces: Vec<Face> = inner
            .faces
            .iter()
            .filter(|(f, _)| !inner.mappings.iter().any(|m| m.face_id == f.id))
            .map(|(f, _)| f.clone())
            .collect();
        sort_newest_first(&mut faces);
        Ok(faces)
    }

    fn add_person(
        &self,
        name: Option<&str>,
        contact_id: Option<&str>,
        notes: Option<&str>,
    ) -> Result<PersonId, StoreError> {
        let mut inner = self.lock();
        inner.next_person += 1;
        let id = inner.next_person;
        let now = Utc::now();
        inner.persons.push(Person {
            id,
            name: name.map(str::to_string),
            contact_id: contact_id.map(str::to_string),
            notes: notes.map(str::to_string),
            created_at: now,
            updated_at: now,
        });
        Ok(id)
    }

    fn person(&self, id: PersonId) -> Result<Option<Person>, StoreError> {
        Ok(self.lock().persons.iter().find(|p| p.id == id).cloned())
    }

    fn all_persons(&self) -> Result<Vec<Person>, StoreError> {
        let mut persons = self.lock().persons.clone();
        // Unnamed persons first, then by name, stable on id.
        persons.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(persons)
    }

    fn update_person(
        &self,
        id: PersonId,
        name: Option<&str>,
        contact_id: Option<&str>,
        notes: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let person = inner
            .persons
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or(StoreError::PersonNotFound(id))?;
        if let Some(name) = name {
            person.name = Some(name.to_string());
        }
        if let Some(contact_id) = contact_id {
            person.contact_id = Some(contact_id.to_string());
        }
        if let Some(notes) = notes {
            person.notes = Some(notes.to_string());
        }
        person.updated_at = Utc::now();
        Ok(())
    }

    fn delete_person(&self, id: PersonId) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let before = inner.persons.len();
        inner.persons.retain(|p| p.id != id);
        if inner.persons.len() == before {
            return Err(StoreError::PersonNotFound(id));
        }
        inner.mappings.retain(|m| m.person_id != id);
        Ok(())
    }

    fn faces_for_person(&self, id: PersonId) -> Result<Vec<Face>, StoreError> {
        let inner = self.lock();
        let mut faces: Vec<Face> = inner
            .faces
            .iter()
            .filter(|(f, _)| {
                inner
                    .mappings
                    .iter()
                    .any(|m| m.face_id == f.id && m.person_id == id)
            })
            .map(|(f, _)| f.clone())
            .collect();
        sort_newest_first(&mut faces);
        Ok(faces)
    }

    fn person_photo_count(&self, id: PersonId) -> Result<usize, StoreError> {
        let inner = self.lock();
        let mut photo_ids: Vec<PhotoId> = inner
            .faces
            .iter()
            .filter(|(f, _)| {
                inner
                    .mappings
                    .iter()
                    .any(|m| m.face_id == f.id && m.person_id == id)
            })
            .map(|(f, _)| f.photo_id)
            .collect();
        photo_ids.sort_unstable();
        photo_ids.dedup();
        Ok(photo_ids.len())
    }

    fn upsert_mapping(
        &self,
        face_id: FaceId,
        person_id: PersonId,
        similarity: Option<f32>,
        verified: bool,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if !inner.faces.iter().any(|(f, _)| f.id == face_id) {
            return Err(StoreError::FaceNotFound(face_id));
        }
        if !inner.persons.iter().any(|p| p.id == person_id) {
            return Err(StoreError::PersonNotFound(person_id));
        }
        inner.mappings.retain(|m| m.face_id != face_id);
        inner.mappings.push(Mapping {
            face_id,
            person_id,
            similarity,
            verified,
            mapped_at: Utc::now(),
        });
        Ok(())
    }

    fn mapping_for_face(&self, face_id: FaceId) -> Result<Option<Mapping>, StoreError> {
        Ok(self
            .lock()
            .mappings
            .iter()
            .find(|m| m.face_id == face_id)
            .cloned())
    }

    fn mark_mapping_verified(&self, face_id: FaceId) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let mapping = inner
            .mappings
            .iter_mut()
            .find(|m| m.face_id == face_id)
            .ok_or(StoreError::MappingNotFound(face_id))?;
        mapping.verified = true;
        Ok(())
    }

    fn delete_mapping(&self, face_id: FaceId) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let before = inner.mappings.len();
        inner.mappings.retain(|m| m.face_id != face_id);
        if inner.mappings.len() == before {
            return Err(StoreError::MappingNotFound(face_id));
        }
        Ok(())
    }

    fn statistics(&self) -> Result<StoreStats, StoreError> {
        let inner = self.lock();
        let total_faces = inner.faces.len();
        let mapped_faces = inner.mappings.len();
        Ok(StoreStats {
            total_photos: inner.photos.len(),
            analyzed_photos: inner.photos.iter().filter(|p| p.analyzed).count(),
            total_faces,
            total_persons: inner.persons.len(),
            mapped_faces,
            verified_mappings: inner.mappings.iter().filter(|m| m.verified).count(),
            unmapped_faces: total_faces - mapped_faces,
        })
    }

    fn clear_all(&self) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.mappings.clear();
        inner.faces.clear();
        inner.persons.clear();
        inner.photos.clear();
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::testutil::{clear_embedding, insert_face, test_bbox, test_landmarks, TEST_DIM};
    use super::*;
    use crate::types::NewFace;

    #[test]
    fn test_add_face_rejects_wrong_dimension() {
        let store = MemoryStore::new(TEST_DIM);
        let photo_id = store.add_photo("/g/a.jpg", None, None, None).unwrap();
        let result = store.add_face(NewFace {
            photo_id,
            bbox: test_bbox(),
            landmarks: test_landmarks(),
            embedding: Embedding::new(vec![1.0, 0.0]),
            confidence: 0.9,
        });
        assert!(matches!(
            result,
            Err(StoreError::InvalidEmbedding { expected: TEST_DIM, got: 2 })
        ));
    }

    #[test]
    fn test_add_face_rejects_degenerate_bbox() {
        let store = MemoryStore::new(TEST_DIM);
        let photo_id = store.add_photo("/g/a.jpg", None, None, None).unwrap();
        let result = store.add_face(NewFace {
            photo_id,
            bbox: crate::types::BoundingBox { x: 0.0, y: 0.0, width: 0.0, height: 5.0 },
            landmarks: test_landmarks(),
            embedding: Embedding::new(vec![1.0, 0.0, 0.0, 0.0]),
            confidence: 0.9,
        });
        assert!(matches!(result, Err(StoreError::InvalidBoundingBox)));
    }

    #[test]
    fn test_face_embedding_missing_face_is_not_found() {
        let store = MemoryStore::new(TEST_DIM);
        assert!(matches!(
            store.face_embedding(42),
            Err(StoreError::FaceNotFound(42))
        ));
    }

    #[test]
    fn test_cleared_embedding_reads_back_as_unusable_not_missing() {
        let store = MemoryStore::new(TEST_DIM);
        let face = insert_face(&store, "/g/a.jpg", vec![1.0, 0.0, 0.0, 0.0]);
        clear_embedding(&store, face);

        // The face row survives; only the embedding is gone.
        assert!(store.face(face).unwrap().is_some());
        assert!(store.face_embedding(face).unwrap().is_none());
    }

    #[test]
    fn test_upsert_replaces_prior_mapping() {
        let store = MemoryStore::new(TEST_DIM);
        let face = insert_face(&store, "/g/a.jpg", vec![1.0, 0.0, 0.0, 0.0]);
        let alice = store.add_person(Some("Alice"), None, None).unwrap();
        let bob = store.add_person(Some("Bob"), None, None).unwrap();

        store.upsert_mapping(face, alice, Some(0.8), false).unwrap();
        store.upsert_mapping(face, bob, Some(0.9), true).unwrap();

        let mapping = store.mapping_for_face(face).unwrap().unwrap();
        assert_eq!(mapping.person_id, bob);
        assert_eq!(mapping.similarity, Some(0.9));
        assert!(mapping.verified);
        // Replacement, not accumulation.
        assert_eq!(store.statistics().unwrap().mapped_faces, 1);
    }

    #[test]
    fn test_unmapped_faces_excludes_mapped() {
        let store = MemoryStore::new(TEST_DIM);
        let a = insert_face(&store, "/g/a.jpg", vec![1.0, 0.0, 0.0, 0.0]);
        let b = insert_face(&store, "/g/b.jpg", vec![0.0, 1.0, 0.0, 0.0]);
        let person = store.add_person(Some("Alice"), None, None).unwrap();
        store.upsert_mapping(a, person, Some(0.9), false).unwrap();

        let unmapped: Vec<FaceId> = store.unmapped_faces().unwrap().iter().map(|f| f.id).collect();
        assert_eq!(unmapped, vec![b]);
    }

    #[test]
    fn test_delete_person_cascades_mappings_but_keeps_faces() {
        let store = MemoryStore::new(TEST_DIM);
        let face = insert_face(&store, "/g/a.jpg", vec![1.0, 0.0, 0.0, 0.0]);
        let person = store.add_person(Some("Alice"), None, None).unwrap();
        store.upsert_mapping(face, person, Some(0.9), true).unwrap();

        store.delete_person(person).unwrap();
        assert!(store.mapping_for_face(face).unwrap().is_none());
        assert!(store.face(face).unwrap().is_some());
    }

    #[test]
    fn test_mark_mapping_verified_keeps_similarity() {
        let store = MemoryStore::new(TEST_DIM);
        let face = insert_face(&store, "/g/a.jpg", vec![1.0, 0.0, 0.0, 0.0]);
        let person = store.add_person(Some("Alice"), None, None).unwrap();
        store.upsert_mapping(face, person, Some(0.72), false).unwrap();

        store.mark_mapping_verified(face).unwrap();
        let mapping = store.mapping_for_face(face).unwrap().unwrap();
        assert!(mapping.verified);
        assert_eq!(mapping.similarity, Some(0.72));
    }

    #[test]
    fn test_statistics_counts() {
        let store = MemoryStore::new(TEST_DIM);
        let a = insert_face(&store, "/g/a.jpg", vec![1.0, 0.0, 0.0, 0.0]);
        let _b = insert_face(&store, "/g/b.jpg", vec![0.0, 1.0, 0.0, 0.0]);
        let person = store.add_person(Some("Alice"), None, None).unwrap();
        store.upsert_mapping(a, person, Some(0.9), true).unwrap();
        let photo = store.photo_by_path("/g/a.jpg").unwrap().unwrap();
        store.mark_photo_analyzed(photo.id).unwrap();

        let stats = store.statistics().unwrap();
        assert_eq!(stats.total_photos, 2);
        assert_eq!(stats.analyzed_photos, 1);
        assert_eq!(stats.total_faces, 2);
        assert_eq!(stats.total_persons, 1);
        assert_eq!(stats.mapped_faces, 1);
        assert_eq!(stats.verified_mappings, 1);
        assert_eq!(stats.unmapped_faces, 1);
    }

    #[test]
    fn test_clear_all_empties_every_table() {
        let store = MemoryStore::new(TEST_DIM);
        let face = insert_face(&store, "/g/a.jpg", vec![1.0, 0.0, 0.0, 0.0]);
        let person = store.add_person(Some("Alice"), None, None).unwrap();
        store.upsert_mapping(face, person, None, true).unwrap();

        store.clear_all().unwrap();
        let stats = store.statistics().unwrap();
        assert_eq!(stats.total_photos, 0);
        assert_eq!(stats.total_faces, 0);
        assert_eq!(stats.total_persons, 0);
        assert_eq!(stats.mapped_faces, 0);
    }
}
