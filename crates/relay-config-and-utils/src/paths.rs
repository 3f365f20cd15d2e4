//! File system paths for the relay.

use crate::{CoreError, CoreResult};
use std::path::PathBuf;

/// Base directory name under the user's home.
const BASE_DIR_NAME: &str = ".attendance-relay";
/// SQLite outbox filename.
const DATABASE_FILE_NAME: &str = "attendance.sqlite";

/// Everything the relay keeps on disk lives under one base directory.
#[derive(Debug, Clone)]
pub struct Paths {
    base_dir: PathBuf,
}

impl Paths {
    /// Rooted at `~/.attendance-relay`.
    pub fn new() -> CoreResult<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| CoreError::Path("no home directory; pass --base-dir".to_string()))?;

        Ok(Self {
            base_dir: home.join(BASE_DIR_NAME),
        })
    }

    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// `config.json`, read at startup if present.
    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Default outbox location, unless `database_path` is configured.
    pub fn database_file(&self) -> PathBuf {
        self.base_dir.join(DATABASE_FILE_NAME)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    pub fn log_file(&self) -> PathBuf {
        self.logs_dir().join("relay.jsonl")
    }

    /// Create the base and log directories.
    pub fn ensure_dirs(&self) -> CoreResult<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}
