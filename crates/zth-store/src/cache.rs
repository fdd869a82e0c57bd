//! Persistent key/value cache for code snapshots and preference flags.
//!
//! Code snapshots live under scoped keys of the form
//! `<prefix>_<problem id>`, or `<prefix>_global` when no problem is selected.
//! Flags live under `pref_<name>`, so `pref` is not a valid code prefix.
//! Every mutation is written through to disk; reads are served from memory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::file::JsonFile;
use crate::Result;

/// Key prefix used for code snapshots unless configured otherwise.
pub const DEFAULT_PREFIX: &str = "code";

/// Scope sentinel used when no problem is selected.
pub const GLOBAL_SCOPE: &str = "global";

/// Key prefix reserved for preference flags.
pub const FLAG_PREFIX: &str = "pref";

/// Device-local cache of code buffers and preference flags.
///
/// # Example
///
/// ```
/// use zth_store::CodeCache;
///
/// let mut cache = CodeCache::in_memory("code");
/// let key = cache.scoped_key(Some(7));
/// assert_eq!(key, "code_7");
///
/// cache.set(&key, "print('hi')").unwrap();
/// assert_eq!(cache.get(&key), Some("print('hi')"));
/// assert_eq!(cache.get("code_8"), None);
/// ```
#[derive(Debug)]
pub struct CodeCache {
    prefix: String,
    file: JsonFile,
    entries: BTreeMap<String, String>,
}

impl CodeCache {
    /// Opens the cache stored at `path`, creating it lazily on first write.
    pub fn open(path: impl Into<PathBuf>, prefix: impl Into<String>) -> Result<Self> {
        let file = JsonFile::at(path);
        let entries = file.load()?;
        let cache = Self {
            prefix: prefix.into(),
            file,
            entries,
        };
        debug!(entries = cache.entries.len(), "Code cache opened");
        Ok(cache)
    }

    /// Creates a cache that is never written to disk.
    #[must_use]
    pub fn in_memory(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            file: JsonFile::in_memory(),
            entries: BTreeMap::new(),
        }
    }

    /// Returns the backing file, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.file.path()
    }

    /// Builds the scoped key for a problem, or the global key for `None`.
    #[must_use]
    pub fn scoped_key(&self, problem_id: Option<u64>) -> String {
        problem_id.map_or_else(
            || format!("{}_{GLOBAL_SCOPE}", self.prefix),
            |id| format!("{}_{id}", self.prefix),
        )
    }

    /// Returns the stored value. An empty string is a hit, not a miss.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Returns `true` if the key has a stored value.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Stores a value and writes the cache through to disk.
    ///
    /// The in-memory value is updated even when the write fails, so the
    /// running session keeps seeing its latest edits.
    pub fn set(&mut self, key: &str, value: impl Into<String>) -> Result<()> {
        self.entries.insert(key.to_string(), value.into());
        self.file.save(&self.entries)
    }

    /// Removes a value. Returns whether anything was removed.
    pub fn remove(&mut self, key: &str) -> Result<bool> {
        if self.entries.remove(key).is_none() {
            return Ok(false);
        }
        self.file.save(&self.entries)?;
        Ok(true)
    }

    /// Reads a preference flag.
    #[must_use]
    pub fn flag(&self, name: &str) -> Option<bool> {
        match self.get(&flag_key(name))? {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        }
    }

    /// Writes a preference flag.
    pub fn set_flag(&mut self, name: &str, value: bool) -> Result<()> {
        self.set(&flag_key(name), value.to_string())
    }

    /// Number of stored entries, flags included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn flag_key(name: &str) -> String {
    format!("{FLAG_PREFIX}_{name}")
}
