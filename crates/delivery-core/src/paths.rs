//! File system layout of the delivery subsystem.

use crate::{CoreError, CoreResult};
use std::path::PathBuf;

/// Directory name under the home directory.
const BASE_DIR_NAME: &str = ".embrace";

/// Manages file system paths used by the delivery pipeline.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Base directory (~/.embrace)
    base_dir: PathBuf,
}

impl Paths {
    /// Create a new Paths instance rooted at `~/.embrace`.
    pub fn new() -> CoreResult<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| CoreError::Path("Could not determine home directory".to_string()))?;
        Ok(Self {
            base_dir: home.join(BASE_DIR_NAME),
        })
    }

    /// Create a new Paths instance with a custom base directory.
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Get the config file path (~/.embrace/config.json).
    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Directory holding one file per undelivered payload.
    pub fn payload_dir(&self) -> PathBuf {
        self.base_dir.join("payloads")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    /// Get the JSONL log file path (~/.embrace/logs/delivery.jsonl).
    pub fn log_file(&self) -> PathBuf {
        self.logs_dir().join("delivery.jsonl")
    }

    /// Ensure all required directories exist.
    pub fn ensure_dirs(&self) -> CoreResult<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        std::fs::create_dir_all(self.payload_dir())?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}
