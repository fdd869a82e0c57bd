//! Atomic JSON document persistence shared by both stores.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::{Result, StoreError};

/// A JSON document on disk, or nowhere when running in memory.
#[derive(Debug, Clone)]
pub(crate) struct JsonFile {
    path: Option<PathBuf>,
}

impl JsonFile {
    pub(crate) fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    pub(crate) const fn in_memory() -> Self {
        Self { path: None }
    }

    pub(crate) fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Reads the document, returning an empty map when the file is missing.
    ///
    /// A document that fails to parse is logged and treated as empty so a
    /// damaged cache never blocks the editor.
    pub(crate) fn load<V: DeserializeOwned>(&self) -> Result<BTreeMap<String, V>> {
        let Some(path) = &self.path else {
            return Ok(BTreeMap::new());
        };

        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(source) => {
                return Err(StoreError::Read {
                    path: path.clone(),
                    source,
                })
            }
        };

        match serde_json::from_str(&contents) {
            Ok(map) => Ok(map),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Discarding unreadable store file");
                Ok(BTreeMap::new())
            }
        }
    }

    /// Writes the document via a temporary file and a rename.
    pub(crate) fn save<V: Serialize>(&self, map: &BTreeMap<String, V>) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let json = serde_json::to_string_pretty(map).map_err(|source| StoreError::Encode {
            path: path.clone(),
            source,
        })?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Write {
                path: path.clone(),
                source,
            })?;
        }

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|source| StoreError::Write {
            path: tmp.clone(),
            source,
        })?;
        std::fs::rename(&tmp, path).map_err(|source| StoreError::Write {
            path: path.clone(),
            source,
        })
    }
}
