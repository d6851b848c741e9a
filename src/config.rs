use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Runtime settings for the lock service. All fields have defaults so a
/// missing or partial config file still yields a working service.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Directory holding both flat storage files.
    pub data_dir: PathBuf,
    /// Autosave period for dirty stores.
    pub autosave_interval_secs: u64,
    /// Vertical distance between stacked marker lines.
    pub line_spacing: f64,
    /// Characters kept per marker line; longer input is truncated.
    pub max_line_length: usize,
    /// Lines accepted per marker stack.
    pub max_lines: usize,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            autosave_interval_secs: 15 * 60,
            line_spacing: 0.25,
            max_line_length: 16,
            max_lines: 3,
        }
    }
}

impl LockConfig {
    pub fn autosave_interval(&self) -> Duration {
        Duration::from_secs(self.autosave_interval_secs.max(1))
    }

    /// Reads a JSON config file, falling back to defaults when the file is
    /// missing or malformed (with a warning in the malformed case).
    pub fn load_or_default(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    info!("loaded config from {}", path.display());
                    config
                }
                Err(err) => {
                    warn!(
                        "bad config file {}, using defaults: {}",
                        path.display(),
                        err
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(err) => {
                warn!(
                    "failed to read config {}, using defaults: {}",
                    path.display(),
                    err
                );
                Self::default()
            }
        }
    }
}
