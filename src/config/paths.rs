//! Path management for cipherbook
//!
//! Only settings live on disk. Keys, credentials and decrypted records never
//! do.
//!
//! ## Path Resolution Order
//!
//! 1. `CIPHERBOOK_DATA_DIR` environment variable (if set)
//! 2. The platform config directory for `cipherbook` (via `directories`)

use std::path::{Path, PathBuf};

use directories::ProjectDirs;

use crate::error::{CipherbookError, CipherbookResult};

/// Environment variable that overrides the base directory
pub const DATA_DIR_ENV: &str = "CIPHERBOOK_DATA_DIR";

/// Manages all paths used by cipherbook
#[derive(Debug, Clone)]
pub struct CipherbookPaths {
    base_dir: PathBuf,
}

impl CipherbookPaths {
    /// Resolve the base directory
    ///
    /// # Errors
    ///
    /// Returns an error if no home directory can be determined and no
    /// override is set.
    pub fn new() -> CipherbookResult<Self> {
        let base_dir = match std::env::var_os(DATA_DIR_ENV) {
            Some(custom) if !custom.is_empty() => PathBuf::from(custom),
            _ => resolve_default_path()?,
        };

        Ok(Self { base_dir })
    }

    /// Create paths rooted at a custom base directory (useful for testing)
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Get the path to the settings file
    pub fn settings_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Ensure the base directory exists
    pub fn ensure_directories(&self) -> CipherbookResult<()> {
        std::fs::create_dir_all(&self.base_dir).map_err(|e| {
            CipherbookError::Io(format!("Failed to create config directory: {}", e))
        })
    }

    /// Check whether a settings file has been written
    pub fn is_initialized(&self) -> bool {
        self.settings_file().exists()
    }
}

fn resolve_default_path() -> CipherbookResult<PathBuf> {
    ProjectDirs::from("", "", "cipherbook")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .ok_or_else(|| CipherbookError::Config("Could not determine a home directory".into()))
}
