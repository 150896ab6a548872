//! Database schema.
//!
//! `face_mapping.face_id` is UNIQUE on its own: a face maps to at most
//! one person at a time, and re-mapping replaces the prior row.

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS photos (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT UNIQUE NOT NULL,
    width INTEGER,
    height INTEGER,
    file_size INTEGER,
    analyzed BOOLEAN NOT NULL DEFAULT 0,
    added_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS faces (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    photo_id INTEGER NOT NULL,
    bbox_x REAL NOT NULL,
    bbox_y REAL NOT NULL,
    bbox_width REAL NOT NULL,
    bbox_height REAL NOT NULL,
    landmarks TEXT NOT NULL,
    embedding BLOB NOT NULL,
    confidence REAL NOT NULL,
    detected_at TEXT NOT NULL,
    FOREIGN KEY (photo_id) REFERENCES photos (id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS people (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT,
    contact_id TEXT,
    notes TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS face_mapping (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    face_id INTEGER NOT NULL UNIQUE,
    person_id INTEGER NOT NULL,
    similarity REAL,
    verified BOOLEAN NOT NULL DEFAULT 0,
    mapped_at TEXT NOT NULL,
    FOREIGN KEY (face_id) REFERENCES faces (id) ON DELETE CASCADE,
    FOREIGN KEY (person_id) REFERENCES people (id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_photos_analyzed ON photos (analyzed);
CREATE INDEX IF NOT EXISTS idx_faces_photo ON faces (photo_id);
CREATE INDEX IF NOT EXISTS idx_faces_confidence ON faces (confidence);
CREATE INDEX IF NOT EXISTS idx_mapping_person ON face_mapping (person_id);
"#;
