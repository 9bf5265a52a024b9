//! User settings for cipherbook
//!
//! Connection and key-derivation settings. Nothing secret is ever stored
//! here.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use super::paths::CipherbookPaths;
use crate::crypto::key_derivation::KeyDerivationParams;
use crate::error::{CipherbookError, CipherbookResult};

/// User settings for cipherbook
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Schema version for migration support
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    /// Base URL of the sync server
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Account name; also the key-derivation salt input
    #[serde(default)]
    pub username: Option<String>,

    /// Argon2id cost parameters
    #[serde(default)]
    pub key_derivation: KeyDerivationParams,

    /// Deadline for ordinary remote calls
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Deadline for each repository call during a credential rotation
    #[serde(default = "default_rotation_timeout")]
    pub rotation_timeout_secs: u64,

    /// Total attempts per repository when a rotation call hits a transport error
    #[serde(default = "default_rotation_attempts")]
    pub rotation_max_attempts: u32,
}

fn default_schema_version() -> u32 {
    1
}

fn default_server_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_rotation_timeout() -> u64 {
    60
}

fn default_rotation_attempts() -> u32 {
    2
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            server_url: default_server_url(),
            username: None,
            key_derivation: KeyDerivationParams::default(),
            request_timeout_secs: default_request_timeout(),
            rotation_timeout_secs: default_rotation_timeout(),
            rotation_max_attempts: default_rotation_attempts(),
        }
    }
}

impl Settings {
    /// Load settings from disk, or fall back to defaults if the file doesn't exist
    pub fn load_or_create(paths: &CipherbookPaths) -> CipherbookResult<Self> {
        let settings_path = paths.settings_file();

        if !settings_path.exists() {
            // Don't save yet - let caller decide when to persist
            return Ok(Settings::default());
        }

        let contents = std::fs::read_to_string(&settings_path)
            .map_err(|e| CipherbookError::Io(format!("Failed to read settings file: {}", e)))?;

        let settings: Settings = serde_json::from_str(&contents).map_err(|e| {
            CipherbookError::Config(format!("Failed to parse settings file: {}", e))
        })?;

        settings.validate()?;
        Ok(settings)
    }

    /// Save settings to disk
    pub fn save(&self, paths: &CipherbookPaths) -> CipherbookResult<()> {
        paths.ensure_directories()?;

        let contents = serde_json::to_string_pretty(self).map_err(|e| {
            CipherbookError::Config(format!("Failed to serialize settings: {}", e))
        })?;

        std::fs::write(paths.settings_file(), contents)
            .map_err(|e| CipherbookError::Io(format!("Failed to write settings file: {}", e)))?;

        Ok(())
    }

    /// Reject values that would make every remote call fail
    pub fn validate(&self) -> CipherbookResult<()> {
        self.server_url()?;
        if self.request_timeout_secs == 0 || self.rotation_timeout_secs == 0 {
            return Err(CipherbookError::Config("Timeouts must be at least one second".into()));
        }
        if self.rotation_max_attempts == 0 {
            return Err(CipherbookError::Config(
                "rotation_max_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// The parsed server URL
    pub fn server_url(&self) -> CipherbookResult<Url> {
        Url::parse(&self.server_url).map_err(|e| {
            CipherbookError::Config(format!("Invalid server URL '{}': {}", self.server_url, e))
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn rotation_timeout(&self) -> Duration {
        Duration::from_secs(self.rotation_timeout_secs)
    }
}
