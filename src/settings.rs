//! Persisted client settings.
//!
//! The only setting the connection layer reads is the tunnel URL, stored
//! under [`TUNNEL_URL_KEY`]. Absence is a normal state.
//!
//! # Example
//!
//! ```ignore
//! use lifeops_link::settings::{FileSettings, SettingsStore, TUNNEL_URL_KEY};
//!
//! let settings = FileSettings::new("/var/lib/lifeops/settings.json");
//! settings.set(TUNNEL_URL_KEY, Some("https://abc.tunnel.example"))?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::error::Result;
use crate::persist::{read_json, write_json_atomic};

// ============================================================================
// Constants
// ============================================================================

/// Key holding the tunnel base URL.
pub const TUNNEL_URL_KEY: &str = "tunnel_url";

// ============================================================================
// SettingsStore
// ============================================================================

/// Key/value storage for client settings.
pub trait SettingsStore: Send + Sync + 'static {
    /// Returns the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Stores `value` under `key`; `None` removes the entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be written.
    fn set(&self, key: &str, value: Option<&str>) -> Result<()>;
}

// ============================================================================
// MemorySettings
// ============================================================================

/// Process-local settings.
#[derive(Debug, Default)]
pub struct MemorySettings {
    values: Mutex<FxHashMap<String, String>>,
}

impl MemorySettings {
    /// Creates an empty store.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettings {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: Option<&str>) -> Result<()> {
        let mut values = self.values.lock();
        match value {
            Some(value) => {
                values.insert(key.to_string(), value.to_string());
            }
            None => {
                values.remove(key);
            }
        }
        Ok(())
    }
}

// ============================================================================
// FileSettings
// ============================================================================

/// Settings kept in a JSON object file.
///
/// A missing file reads as empty. Every write replaces the file atomically.
pub struct FileSettings {
    path: PathBuf,
    lock: Mutex<()>,
}

impl fmt::Debug for FileSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSettings")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl FileSettings {
    /// Creates a store backed by `path`. The file is created on first write.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Returns the backing file path.
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for FileSettings {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.lock.lock();
        let mut values: BTreeMap<String, String> = read_json(&self.path)?;
        Ok(values.remove(key))
    }

    fn set(&self, key: &str, value: Option<&str>) -> Result<()> {
        let _guard = self.lock.lock();
        let mut values: BTreeMap<String, String> = read_json(&self.path)?;

        let changed = match value {
            Some(value) => values.insert(key.to_string(), value.to_string()).as_deref() != Some(value),
            None => values.remove(key).is_some(),
        };

        if changed {
            write_json_atomic(&self.path, &values)?;
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
