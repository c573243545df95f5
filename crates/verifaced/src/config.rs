use std::path::PathBuf;
use veriface_core::DEFAULT_MATCH_THRESHOLD;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Address the HTTP server binds to.
    pub listen_addr: String,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Directory holding the gallery image files.
    pub images_dir: PathBuf,
    /// Path to the SQLite embedding cache.
    pub db_path: PathBuf,
    /// Maximum cosine distance for a positive match.
    pub match_threshold: f32,
    /// Timeout in seconds for one embed call.
    pub embed_timeout_secs: u64,
    /// Upload body size cap in megabytes.
    pub max_upload_mb: usize,
}

impl Config {
    /// Load configuration from `VERIFACE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let model_dir = std::env::var("VERIFACE_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| veriface_core::default_model_dir());

        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("veriface");

        let images_dir = std::env::var("VERIFACE_IMAGES_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("images"));

        let db_path = std::env::var("VERIFACE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("faces.db"));

        Self {
            listen_addr: std::env::var("VERIFACE_LISTEN_ADDR")
                .unwrap_or_else(|_| "127.0.0.1:8090".to_string()),
            model_dir,
            images_dir,
            db_path,
            match_threshold: env_f32("VERIFACE_MATCH_THRESHOLD", DEFAULT_MATCH_THRESHOLD),
            embed_timeout_secs: env_u64("VERIFACE_EMBED_TIMEOUT_SECS", 10),
            max_upload_mb: env_usize("VERIFACE_MAX_UPLOAD_MB", 8),
        }
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
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
