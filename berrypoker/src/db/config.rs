//! Durable store configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Settings for the SQLite-backed store.
#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    /// Database file location. Created on first use.
    pub path: PathBuf,
    /// How long to wait on a locked database before failing a statement.
    pub busy_timeout: Duration,
}

impl DatabaseConfig {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout: Duration::from_secs(5),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::new("./berrypoker.db")
    }
}
