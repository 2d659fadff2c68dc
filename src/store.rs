//! Persisted holder of the access/refresh token pair.
//!
//! SYSTEM CONTEXT
//! ==============
//! The store is the single source of truth for credentials. It is injected
//! into the session client as a trait object so tests use the in-memory
//! variant and the CLI persists to a JSON file that survives restarts.
//! Reads and writes replace the whole pair; there is no field-level setter.

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::types::TokenPair;

/// Synchronous get/set/clear over the current token pair.
pub trait TokenStore: Send + Sync {
    fn get(&self) -> Option<TokenPair>;

    /// Replace both tokens at once.
    fn set(&self, pair: TokenPair);

    fn clear(&self);
}

// =============================================================================
// MEMORY
// =============================================================================

/// Process-local store. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    pair: RwLock<Option<TokenPair>>,
}

impl MemoryTokenStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_pair(pair: TokenPair) -> Self {
        Self { pair: RwLock::new(Some(pair)) }
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self) -> Option<TokenPair> {
        self.pair.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn set(&self, pair: TokenPair) {
        *self.pair.write().unwrap_or_else(PoisonError::into_inner) = Some(pair);
    }

    fn clear(&self) {
        *self.pair.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

// =============================================================================
// FILE
// =============================================================================

/// On-disk shape. Both fields optional so a hand-edited or truncated file
/// degrades to "no session" instead of an error.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredTokens {
    #[serde(default)]
    access: Option<String>,
    #[serde(default)]
    refresh: Option<String>,
}

/// JSON file store with an in-memory cache.
///
/// The file is loaded once at open; afterwards the cache is authoritative and
/// every `set`/`clear` is written through. Write failures are logged and the
/// cache still updates, so the running process keeps a consistent view.
#[derive(Debug)]
pub struct FileTokenStore {
    path: PathBuf,
    cache: RwLock<Option<TokenPair>>,
}

impl FileTokenStore {
    /// Open the store at `path`, loading any pair already persisted there.
    #[must_use]
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let pair = load_pair(&path);
        Self { path, cache: RwLock::new(pair) }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TokenStore for FileTokenStore {
    fn get(&self) -> Option<TokenPair> {
        self.cache.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn set(&self, pair: TokenPair) {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        let stored = StoredTokens { access: Some(pair.access.clone()), refresh: Some(pair.refresh.clone()) };
        if let Err(error) = write_atomic(&self.path, &stored) {
            tracing::warn!(path = %self.path.display(), %error, "token store write failed");
        }
        *cache = Some(pair);
    }

    fn clear(&self) {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
            Err(error) => tracing::warn!(path = %self.path.display(), %error, "token store clear failed"),
        }
        *cache = None;
    }
}

fn load_pair(path: &Path) -> Option<TokenPair> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return None,
        Err(error) => {
            tracing::warn!(path = %path.display(), %error, "token store read failed");
            return None;
        }
    };
    match serde_json::from_str::<StoredTokens>(&raw) {
        Ok(stored) => TokenPair::from_parts(stored.access, stored.refresh),
        Err(error) => {
            tracing::warn!(path = %path.display(), %error, "token store file unreadable; ignoring");
            None
        }
    }
}

/// Write to a sibling temp file then rename over the target.
fn write_atomic(path: &Path, stored: &StoredTokens) -> std::io::Result<()> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    let raw = serde_json::to_vec_pretty(stored).map_err(std::io::Error::other)?;
    let tmp = path.with_extension("json.tmp");
    {
        let mut file = open_private(&tmp)?;
        file.write_all(&raw)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)
}

#[cfg(unix)]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt as _;
    fs::OpenOptions::new().write(true).create(true).truncate(true).mode(0o600).open(path)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    fs::OpenOptions::new().write(true).create(true).truncate(true).open(path)
}

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
