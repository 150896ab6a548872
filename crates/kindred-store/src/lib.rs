//! kindred-store — SQLite persistence for the identity engine.
//!
//! Implements [`IdentityStore`] over a single `rusqlite` connection.
//! Embeddings are stored as little-endian `f32` blobs, landmarks as
//! JSON. Timestamps are written from Rust as RFC 3339 text.

mod schema;

use std::path::Path;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

use kindred_core::embedding::Embedding;
use kindred_core::store::{IdentityStore, StoreError, StoreStats};
use kindred_core::types::{
    BoundingBox, Face, FaceId, Landmarks, Mapping, NewFace, Person, PersonId, Photo, PhotoId,
};

/// SQLite-backed identity store.
///
/// `embedding_dim` is fixed at open time; faces with a different vector
/// length are rejected on write, and stored blobs that no longer decode
/// to that length read back as unusable (`Ok(None)`), not as errors.
pub struct SqliteStore {
    conn: Connection,
    embedding_dim: usize,
}

fn backend(err: rusqlite::Error) -> StoreError {
    StoreError::backend(err)
}

fn encode_embedding(embedding: &Embedding) -> Vec<u8> {
    let mut blob = Vec::with_capacity(embedding.len() * 4);
    for value in &embedding.values {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

fn decode_embedding(blob: &[u8], dim: usize) -> Option<Embedding> {
    if blob.len() != dim * 4 {
        return None;
    }
    let values = blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Some(Embedding::new(values))
}

fn photo_from_row(row: &Row<'_>) -> rusqlite::Result<Photo> {
    Ok(Photo {
        id: row.get("id")?,
        path: row.get("path")?,
        width: row.get::<_, Option<i64>>("width")?.map(|v| v as u32),
        height: row.get::<_, Option<i64>>("height")?.map(|v| v as u32),
        file_size: row.get::<_, Option<i64>>("file_size")?.map(|v| v as u64),
        analyzed: row.get("analyzed")?,
        added_at: row.get("added_at")?,
    })
}

fn face_from_row(row: &Row<'_>) -> rusqlite::Result<Face> {
    let landmarks_json: String = row.get("landmarks")?;
    let landmarks: Landmarks = serde_json::from_str(&landmarks_json).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(err))
    })?;
    Ok(Face {
        id: row.get("id")?,
        photo_id: row.get("photo_id")?,
        bbox: BoundingBox {
            x: row.get("bbox_x")?,
            y: row.get("bbox_y")?,
            width: row.get("bbox_width")?,
            height: row.get("bbox_height")?,
        },
        landmarks,
        confidence: row.get("confidence")?,
        detected_at: row.get("detected_at")?,
    })
}

fn person_from_row(row: &Row<'_>) -> rusqlite::Result<Person> {
    Ok(Person {
        id: row.get("id")?,
        name: row.get("name")?,
        contact_id: row.get("contact_id")?,
        notes: row.get("notes")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn mapping_from_row(row: &Row<'_>) -> rusqlite::Result<Mapping> {
    Ok(Mapping {
        face_id: row.get("face_id")?,
        person_id: row.get("person_id")?,
        similarity: row.get("similarity")?,
        verified: row.get("verified")?,
        mapped_at: row.get("mapped_at")?,
    })
}

const FACE_COLUMNS: &str =
    "id, photo_id, bbox_x, bbox_y, bbox_width, bbox_height, landmarks, confidence, detected_at";
const PHOTO_COLUMNS: &str = "id, path, width, height, file_size, analyzed, added_at";

impl SqliteStore {
    /// Open (or create) the database at `path`, creating parent
    /// directories as needed.
    pub fn open(path: impl AsRef<Path>, embedding_dim: usize) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(StoreError::backend)?;
        }
        let conn = Connection::open(path).map_err(backend)?;
        tracing::info!(path = %path.display(), embedding_dim, "opened identity database");
        Self::init(conn, embedding_dim)
    }

    /// Open a private in-memory database, mainly for tests.
    pub fn open_in_memory(embedding_dim: usize) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(backend)?;
        Self::init(conn, embedding_dim)
    }

    fn init(conn: Connection, embedding_dim: usize) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", true).map_err(backend)?;
        conn.execute_batch(schema::SCHEMA).map_err(backend)?;
        Ok(Self { conn, embedding_dim })
    }

    fn photo_exists(&self, id: PhotoId) -> Result<bool, StoreError> {
        self.conn
            .query_row("SELECT 1 FROM photos WHERE id = ?1", [id], |_| Ok(()))
            .optional()
            .map(|found| found.is_some())
            .map_err(backend)
    }

    fn face_exists(&self, id: FaceId) -> Result<bool, StoreError> {
        self.conn
            .query_row("SELECT 1 FROM faces WHERE id = ?1", [id], |_| Ok(()))
            .optional()
            .map(|found| found.is_some())
            .map_err(backend)
    }

    fn person_exists(&self, id: PersonId) -> Result<bool, StoreError> {
        self.conn
            .query_row("SELECT 1 FROM people WHERE id = ?1", [id], |_| Ok(()))
            .optional()
            .map(|found| found.is_some())
            .map_err(backend)
    }

    fn count(&self, sql: &str) -> Result<usize, StoreError> {
        self.conn
            .query_row(sql, [], |row| row.get::<_, i64>(0))
            .map(|n| n as usize)
            .map_err(backend)
    }
}

impl IdentityStore for SqliteStore {
    fn add_photo(
        &self,
        path: &str,
        width: Option<u32>,
        height: Option<u32>,
        file_size: Option<u64>,
    ) -> Result<PhotoId, StoreError> {
        self.conn
            .execute(
                "INSERT INTO photos (path, width, height, file_size, analyzed, added_at)
                 VALUES (?1, ?2, ?3, ?4, 0, ?5)",
                params![
                    path,
                    width.map(|v| v as i64),
                    height.map(|v| v as i64),
                    file_size.map(|v| v as i64),
                    Utc::now(),
                ],
            )
            .map_err(backend)?;
        Ok(self.conn.last_insert_rowid())
    }

    fn photo(&self, id: PhotoId) -> Result<Option<Photo>, StoreError> {
        self.conn
            .query_row(
                &format!("SELECT {PHOTO_COLUMNS} FROM photos WHERE id = ?1"),
                [id],
                photo_from_row,
            )
            .optional()
            .map_err(backend)
    }

    fn photo_by_path(&self, path: &str) -> Result<Option<Photo>, StoreError> {
        self.conn
            .query_row(
                &format!("SELECT {PHOTO_COLUMNS} FROM photos WHERE path = ?1"),
                [path],
                photo_from_row,
            )
            .optional()
            .map_err(backend)
    }

    fn unanalyzed_photos(&self) -> Result<Vec<Photo>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {PHOTO_COLUMNS} FROM photos WHERE analyzed = 0
                 ORDER BY added_at DESC, id DESC"
            ))
            .map_err(backend)?;
        let photos = stmt
            .query_map([], photo_from_row)
            .map_err(backend)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(backend)?;
        Ok(photos)
    }

    fn mark_photo_analyzed(&self, id: PhotoId) -> Result<(), StoreError> {
        let changed = self
            .conn
            .execute("UPDATE photos SET analyzed = 1 WHERE id = ?1", [id])
            .map_err(backend)?;
        if changed == 0 {
            return Err(StoreError::PhotoNotFound(id));
        }
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
        if !self.photo_exists(face.photo_id)? {
            return Err(StoreError::PhotoNotFound(face.photo_id));
        }

        let landmarks = serde_json::to_string(&face.landmarks).map_err(StoreError::backend)?;
        self.conn
            .execute(
                "INSERT INTO faces
                   (photo_id, bbox_x, bbox_y, bbox_width, bbox_height,
                    landmarks, embedding, confidence, detected_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    face.photo_id,
                    face.bbox.x,
                    face.bbox.y,
                    face.bbox.width,
                    face.bbox.height,
                    landmarks,
                    encode_embedding(&face.embedding),
                    face.confidence,
                    Utc::now(),
                ],
            )
            .map_err(backend)?;
        Ok(self.conn.last_insert_rowid())
    }

    fn face(&self, id: FaceId) -> Result<Option<Face>, StoreError> {
        self.conn
            .query_row(
                &format!("SELECT {FACE_COLUMNS} FROM faces WHERE id = ?1"),
                [id],
                face_from_row,
            )
            .optional()
            .map_err(backend)
    }

    fn face_embedding(&self, id: FaceId) -> Result<Option<Embedding>, StoreError> {
        let blob: Vec<u8> = self
            .conn
            .query_row("SELECT embedding FROM faces WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .optional()
            .map_err(backend)?
            .ok_or(StoreError::FaceNotFound(id))?;

        match decode_embedding(&blob, self.embedding_dim) {
            Some(embedding) => Ok(Some(embedding)),
            None => {
                tracing::warn!(
                    face_id = id,
                    blob_len = blob.len(),
                    expected = self.embedding_dim * 4,
                    "stored embedding has unexpected size; treating as unusable"
                );
                Ok(None)
            }
        }
    }

    fn unmapped_faces(&self) -> Result<Vec<Face>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT f.id, f.photo_id, f.bbox_x, f.bbox_y, f.bbox_width, f.bbox_height,
                        f.landmarks, f.confidence, f.detected_at
                 FROM faces f
                 LEFT JOIN face_mapping fm ON f.id = fm.face_id
                 WHERE fm.face_id IS NULL
                 ORDER BY f.detected_at DESC, f.id DESC",
            )
            .map_err(backend)?;
        let faces = stmt
            .query_map([], face_from_row)
            .map_err(backend)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(backend)?;
        Ok(faces)
    }

    fn add_person(
        &self,
        name: Option<&str>,
        contact_id: Option<&str>,
        notes: Option<&str>,
    ) -> Result<PersonId, StoreError> {
        let now = Utc::now();
        self.conn
            .execute(
                "INSERT INTO people (name, contact_id, notes, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![name, contact_id, notes, now],
            )
            .map_err(backend)?;
        Ok(self.conn.last_insert_rowid())
    }

    fn person(&self, id: PersonId) -> Result<Option<Person>, StoreError> {
        self.conn
            .query_row("SELECT * FROM people WHERE id = ?1", [id], person_from_row)
            .optional()
            .map_err(backend)
    }

    fn all_persons(&self) -> Result<Vec<Person>, StoreError> {
        // NULL names sort first, matching MemoryStore's ordering.
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM people ORDER BY name, id")
            .map_err(backend)?;
        let persons = stmt
            .query_map([], person_from_row)
            .map_err(backend)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(backend)?;
        Ok(persons)
    }

    fn update_person(
        &self,
        id: PersonId,
        name: Option<&str>,
        contact_id: Option<&str>,
        notes: Option<&str>,
    ) -> Result<(), StoreError> {
        if !self.person_exists(id)? {
            return Err(StoreError::PersonNotFound(id));
        }
        if name.is_none() && contact_id.is_none() && notes.is_none() {
            return Ok(());
        }
        let mut sets = Vec::new();
        let mut values: Vec<&dyn rusqlite::ToSql> = Vec::new();
        if let Some(name) = &name {
            sets.push("name = ?");
            values.push(name);
        }
        if let Some(contact_id) = &contact_id {
            sets.push("contact_id = ?");
            values.push(contact_id);
        }
        if let Some(notes) = &notes {
            sets.push("notes = ?");
            values.push(notes);
        }
        let now = Utc::now();
        sets.push("updated_at = ?");
        values.push(&now);
        values.push(&id);

        let sql = format!(
            "UPDATE people SET {} WHERE id = ?",
            sets.join(", ")
        );
        self.conn.execute(&sql, &values[..]).map_err(backend)?;
        Ok(())
    }

    fn delete_person(&self, id: PersonId) -> Result<(), StoreError> {
        let changed = self
            .conn
            .execute("DELETE FROM people WHERE id = ?1", [id])
            .map_err(backend)?;
        if changed == 0 {
            return Err(StoreError::PersonNotFound(id));
        }
        Ok(())
    }

    fn faces_for_person(&self, id: PersonId) -> Result<Vec<Face>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT f.id, f.photo_id, f.bbox_x, f.bbox_y, f.bbox_width, f.bbox_height,
                        f.landmarks, f.confidence, f.detected_at
                 FROM faces f
                 JOIN face_mapping fm ON f.id = fm.face_id
                 WHERE fm.person_id = ?1
                 ORDER BY f.detected_at DESC, f.id DESC",
            )
            .map_err(backend)?;
        let faces = stmt
            .query_map([id], face_from_row)
            .map_err(backend)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(backend)?;
        Ok(faces)
    }

    fn person_photo_count(&self, id: PersonId) -> Result<usize, StoreError> {
        self.conn
            .query_row(
                "SELECT COUNT(DISTINCT f.photo_id) FROM faces f
                 JOIN face_mapping fm ON f.id = fm.face_id
                 WHERE fm.person_id = ?1",
                [id],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n as usize)
            .map_err(backend)
    }

    fn upsert_mapping(
        &self,
        face_id: FaceId,
        person_id: PersonId,
        similarity: Option<f32>,
        verified: bool,
    ) -> Result<(), StoreError> {
        if !self.face_exists(face_id)? {
            return Err(StoreError::FaceNotFound(face_id));
        }
        if !self.person_exists(person_id)? {
            return Err(StoreError::PersonNotFound(person_id));
        }
        self.conn
            .execute(
                "INSERT INTO face_mapping (face_id, person_id, similarity, verified, mapped_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (face_id) DO UPDATE SET
                   person_id = excluded.person_id,
                   similarity = excluded.similarity,
                   verified = excluded.verified,
                   mapped_at = excluded.mapped_at",
                params![face_id, person_id, similarity, verified, Utc::now()],
            )
            .map_err(backend)?;
        Ok(())
    }

    fn mapping_for_face(&self, face_id: FaceId) -> Result<Option<Mapping>, StoreError> {
        self.conn
            .query_row(
                "SELECT face_id, person_id, similarity, verified, mapped_at
                 FROM face_mapping WHERE face_id = ?1",
                [face_id],
                mapping_from_row,
            )
            .optional()
            .map_err(backend)
    }

    fn mark_mapping_verified(&self, face_id: FaceId) -> Result<(), StoreError> {
        let changed = self
            .conn
            .execute(
                "UPDATE face_mapping SET verified = 1 WHERE face_id = ?1",
                [face_id],
            )
            .map_err(backend)?;
        if changed == 0 {
            return Err(StoreError::MappingNotFound(face_id));
        }
        Ok(())
    }

    fn delete_mapping(&self, face_id: FaceId) -> Result<(), StoreError> {
        let changed = self
            .conn
            .execute("DELETE FROM face_mapping WHERE face_id = ?1", [face_id])
            .map_err(backend)?;
        if changed == 0 {
            return Err(StoreError::MappingNotFound(face_id));
        }
        Ok(())
    }

    fn statistics(&self) -> Result<StoreStats, StoreError> {
        let total_faces = self.count("SELECT COUNT(*) FROM faces")?;
        let mapped_faces = self.count("SELECT COUNT(*) FROM face_mapping")?;
        Ok(StoreStats {
            total_photos: self.count("SELECT COUNT(*) FROM photos")?,
            analyzed_photos: self.count("SELECT COUNT(*) FROM photos WHERE analyzed = 1")?,
            total_faces,
            total_persons: self.count("SELECT COUNT(*) FROM people")?,
            mapped_faces,
            verified_mappings: self.count("SELECT COUNT(*) FROM face_mapping WHERE verified = 1")?,
            unmapped_faces: total_faces - mapped_faces,
        })
    }

    fn clear_all(&self) -> Result<(), StoreError> {
        // Delete order respects the foreign keys.
        self.conn
            .execute_batch(
                "DELETE FROM face_mapping;
                 DELETE FROM faces;
                 DELETE FROM people;
                 DELETE FROM photos;",
            )
            .map_err(backend)?;
        tracing::info!("cleared all identity data");
        Ok(())
    }
}
