//! TOML storage for [`FeedConfig`].
//!
//! A missing or empty file means defaults. Unknown keys are rejected so that a
//! misspelled option fails loudly instead of silently using the default.

use crate::storage::write_atomic;
use feedsync_core::config::FeedConfig;
use feedsync_core::error::{FeedError, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// A config file handle.
pub struct ConfigStorage {
    path: PathBuf,
}

impl ConfigStorage {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the config.
    ///
    /// # Returns
    ///
    /// - `Ok(FeedConfig)`: Parsed config, or the default if the file is missing or empty
    /// - `Err(FeedError::Config)`: The file is not valid TOML or has unknown keys
    /// - `Err(FeedError::Io)`: The file could not be read
    pub fn load(&self) -> Result<FeedConfig> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(
                    "[ConfigStorage] {} not found, using defaults",
                    self.path.display()
                );
                return Ok(FeedConfig::default());
            }
            Err(e) => return Err(e.into()),
        };

        if content.trim().is_empty() {
            return Ok(FeedConfig::default());
        }

        toml::from_str(&content)
            .map_err(|e| FeedError::config(format!("{}: {}", self.path.display(), e)))
    }

    /// Writes the config atomically.
    pub fn save(&self, config: &FeedConfig) -> Result<()> {
        let toml_string = toml::to_string_pretty(config)?;
        write_atomic(&self.path, toml_string.as_bytes())
    }
}

/// Loads a [`FeedConfig`] from `path`.
pub fn load_config(path: impl AsRef<Path>) -> Result<FeedConfig> {
    ConfigStorage::new(path.as_ref().to_path_buf()).load()
}

/// Saves a [`FeedConfig`] to `path`.
pub fn save_config(path: impl AsRef<Path>, config: &FeedConfig) -> Result<()> {
    ConfigStorage::new(path.as_ref().to_path_buf()).save(config)
}
