//! Per-photo orchestration: detect, embed, persist, resolve.

use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;

use crate::detector::FaceDetector;
use crate::embedder::FaceEmbedder;
use crate::engine::{Engine, EngineError};
use crate::store::IdentityStore;
use crate::types::{BoundingBox, FaceId, MatchOutcome, NewFace, PhotoId};

/// File extensions considered gallery photos.
const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];

/// Cooperative control signal returned by progress callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Stop before the next photo. Work already committed stays.
    Cancel,
}

/// Progress notification, delivered once per photo before processing it.
#[derive(Debug, Clone, Copy)]
pub struct BatchProgress<'a> {
    /// 1-based index of the photo about to be processed.
    pub current: usize,
    pub total: usize,
    pub path: &'a Path,
}

/// One persisted face from a processed photo.
#[derive(Debug, Clone, Serialize)]
pub struct FaceReport {
    pub face_id: FaceId,
    pub bbox: BoundingBox,
    pub confidence: f32,
    /// `None` when automatic recognition was not requested.
    pub recognition: Option<MatchOutcome>,
}

/// Result of processing a single photo.
#[derive(Debug, Clone, Serialize)]
pub struct PhotoReport {
    pub photo_id: PhotoId,
    pub path: PathBuf,
    /// Number of regions the detector produced.
    pub detections: usize,
    pub faces: Vec<FaceReport>,
    /// Regions whose embedding failed; counted, not persisted.
    pub skipped_faces: usize,
    pub elapsed_ms: u64,
}

/// Result of a sequential batch run.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub processed: Vec<PhotoReport>,
    pub failures: Vec<(PathBuf, EngineError)>,
    pub cancelled: bool,
}

/// Ties a detector and an embedder to the engine and its store.
///
/// Processing is synchronous and single-threaded: each photo runs to
/// completion before the next begins.
pub struct Pipeline<S> {
    engine: Engine<S>,
    detector: Box<dyn FaceDetector>,
    embedder: Box<dyn FaceEmbedder>,
}

impl<S: IdentityStore> Pipeline<S> {
    pub fn new(
        engine: Engine<S>,
        detector: Box<dyn FaceDetector>,
        embedder: Box<dyn FaceEmbedder>,
    ) -> Self {
        Self { engine, detector, embedder }
    }

    pub fn engine(&self) -> &Engine<S> {
        &self.engine
    }

    /// Process one photo: detect faces, embed and persist each region,
    /// and (optionally) match each against the known persons.
    ///
    /// A face whose embedding fails is skipped; the remaining faces of
    /// the same photo are still recorded. The photo is marked analyzed
    /// once every detection has been handled, including when there were
    /// none.
    pub fn process_photo(
        &mut self,
        path: &Path,
        auto_recognize: bool,
    ) -> Result<PhotoReport, EngineError> {
        let started = Instant::now();

        let image = image::open(path).map_err(|source| EngineError::InputUnreadable {
            path: path.to_path_buf(),
            source,
        })?;
        let path_str = path.to_string_lossy();
        let file_size = std::fs::metadata(path).ok().map(|m| m.len());

        let store = self.engine.store();
        let photo_id = match store.photo_by_path(&path_str)? {
            Some(photo) => photo.id,
            None => store.add_photo(
                &path_str,
                Some(image.width()),
                Some(image.height()),
                file_size,
            )?,
        };

        let detections = self.detector.detect(&image)?;
        tracing::debug!(photo_id, path = %path_str, detections = detections.len(), "detected faces");

        let mut faces = Vec::new();
        let mut skipped_faces = 0usize;

        for detection in &detections {
            let embedding = match self.embedder.embed(&image, detection) {
                Ok(embedding) => embedding.normalize(),
                Err(err) => {
                    tracing::warn!(photo_id, error = %err, "embedding failed; skipping face");
                    skipped_faces += 1;
                    continue;
                }
            };

            let store = self.engine.store();
            let face_id = store.add_face(NewFace {
                photo_id,
                bbox: detection.bbox,
                landmarks: detection.landmarks,
                embedding: embedding.clone(),
                confidence: detection.confidence,
            })?;

            let recognition = if auto_recognize {
                let outcome = self.engine.resolve(&embedding)?;
                if let MatchOutcome::Matched { person_id, similarity } = outcome {
                    self.engine.store().upsert_mapping(
                        face_id,
                        person_id,
                        Some(similarity),
                        false,
                    )?;
                    tracing::info!(face_id, person_id, similarity, "auto-matched face");
                }
                Some(outcome)
            } else {
                None
            };

            faces.push(FaceReport {
                face_id,
                bbox: detection.bbox,
                confidence: detection.confidence,
                recognition,
            });
        }

        self.engine.store().mark_photo_analyzed(photo_id)?;

        Ok(PhotoReport {
            photo_id,
            path: path.to_path_buf(),
            detections: detections.len(),
            faces,
            skipped_faces,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Process photos sequentially. A failing photo is recorded and the
    /// batch continues; the progress callback runs before each photo and
    /// may cancel between photos, leaving completed work committed.
    pub fn process_batch(
        &mut self,
        paths: &[PathBuf],
        auto_recognize: bool,
        mut progress: impl FnMut(BatchProgress<'_>) -> Flow,
    ) -> BatchReport {
        let mut report = BatchReport::default();
        let total = paths.len();

        for (index, path) in paths.iter().enumerate() {
            let flow = progress(BatchProgress {
                current: index + 1,
                total,
                path,
            });
            if flow == Flow::Cancel {
                tracing::info!(processed = report.processed.len(), total, "batch cancelled");
                report.cancelled = true;
                break;
            }

            match self.process_photo(path, auto_recognize) {
                Ok(photo) => report.processed.push(photo),
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "photo failed; continuing batch");
                    report.failures.push((path.clone(), err));
                }
            }
        }

        report
    }

    /// Recursively collect and process every image file under a gallery
    /// directory, in sorted path order.
    pub fn scan_gallery(
        &mut self,
        gallery: &Path,
        auto_recognize: bool,
        progress: impl FnMut(BatchProgress<'_>) -> Flow,
    ) -> Result<BatchReport, EngineError> {
        let mut paths = Vec::new();
        collect_images(gallery, &mut paths)?;
        paths.sort();
        tracing::info!(gallery = %gallery.display(), photos = paths.len(), "scanning gallery");
        Ok(self.process_batch(&paths, auto_recognize, progress))
    }
}

fn collect_images(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), EngineError> {
    let entries = std::fs::read_dir(dir).map_err(|source| EngineError::GalleryUnreadable {
        path: dir.to_path_buf(),
        source,
    })?;
    for entry in entries {
        let entry = entry.map_err(|source| EngineError::GalleryUnreadable {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.is_dir() {
            collect_images(&path, out)?;
        } else if is_image(&path) {
            out.push(path);
        }
    }
    Ok(())
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let lower = e.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&lower.as_str())
        })
        .unwrap_or(false)
}
