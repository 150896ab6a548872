use std::path::PathBuf;

/// Engine configuration, loaded from `KINDRED_*` environment variables
/// with defaults.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Minimum similarity for the resolver to accept a match.
    pub recognition_threshold: f32,
    /// Default similarity threshold for grouping unmapped faces.
    pub cluster_threshold: f32,
    /// Expected embedding vector length.
    pub embedding_dim: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            recognition_threshold: 0.65,
            cluster_threshold: 0.7,
            embedding_dim: 512,
        }
    }
}

impl EngineConfig {
    /// Load configuration from `KINDRED_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            recognition_threshold: env_f32(
                "KINDRED_RECOGNITION_THRESHOLD",
                defaults.recognition_threshold,
            ),
            cluster_threshold: env_f32("KINDRED_CLUSTER_THRESHOLD", defaults.cluster_threshold),
            embedding_dim: env_usize("KINDRED_EMBEDDING_DIM", defaults.embedding_dim),
        }
    }
}

/// Default SQLite database location: `$XDG_DATA_HOME/kindred/gallery.db`,
/// overridable via `KINDRED_DB_PATH`.
pub fn default_db_path() -> PathBuf {
    if let Ok(path) = std::env::var("KINDRED_DB_PATH") {
        return PathBuf::from(path);
    }
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("kindred")
        .join("gallery.db")
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
