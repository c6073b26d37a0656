use std::path::PathBuf;
use std::time::Duration;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Root of the service data directory.
    pub data_dir: PathBuf,
    /// Watched ingestion directory (default: `<data>/inbox`).
    pub inbox_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Settle window for the first file stability probe.
    pub settle_window: Duration,
    /// Longer settle window for the second, final probe.
    pub retry_window: Duration,
    /// External analyzer command line (required).
    pub analyzer_cmd: Option<String>,
    /// Re-embed all stored samples before watching the inbox.
    pub retrain_on_start: bool,
}

impl Config {
    /// Load configuration from `MIEN_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("MIEN_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_data_dir());

        let inbox_dir = std::env::var("MIEN_INBOX_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("inbox"));

        let db_path = std::env::var("MIEN_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("mien.db"));

        Self {
            data_dir,
            inbox_dir,
            db_path,
            settle_window: Duration::from_millis(env_u64("MIEN_SETTLE_MS", 500)),
            retry_window: Duration::from_millis(env_u64("MIEN_RETRY_MS", 1000)),
            analyzer_cmd: std::env::var("MIEN_ANALYZER_CMD")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            retrain_on_start: std::env::var("MIEN_RETRAIN_ON_START")
                .map(|v| v == "1")
                .unwrap_or(false),
        }
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("mien")
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
