//! Durable storage for the geocode cache.
//!
//! The whole cache lives in a single JSON object mapping exact keys to entries.
//! It is read once and rewritten in full on every flush; there is no incremental
//! format. Two processes sharing one file will overwrite each other's additions.
//!
//! Entries are decoded one by one. An entry that cannot be decoded is skipped
//! with a warning and kept verbatim, so the next rewrite does not lose it.

use super::GeocodeEntry;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// File name used when no explicit cache path is configured
pub const DEFAULT_CACHE_FILE_NAME: &str = "nominatim_urls.json";

/// Decoded contents of a cache file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheContents {
    pub entries: HashMap<String, GeocodeEntry>,
    /// Entries that could not be decoded, by key, as found in the file
    pub unreadable: Map<String, Value>,
}

/// What gets written under one key
#[derive(Serialize)]
#[serde(untagged)]
enum StoredEntry<'a> {
    Entry(&'a GeocodeEntry),
    Verbatim(&'a Value),
}

/// JSON file holding every cached entry
#[derive(Debug, Clone)]
pub struct CacheFile {
    path: PathBuf,
}

impl CacheFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Determine a good default cache file path for the current user.
    /// Uses environment variables when available:
    /// - On Windows: %LOCALAPPDATA%/phototrack/nominatim_urls.json
    /// - Else: $HOME/.cache/nominatim_urls.json
    pub fn default_path() -> PathBuf {
        if cfg!(windows)
            && let Ok(local_appdata) = std::env::var("LOCALAPPDATA")
        {
            return Path::new(&local_appdata)
                .join("phototrack")
                .join(DEFAULT_CACHE_FILE_NAME);
        }

        if let Ok(home) = std::env::var("HOME") {
            return Path::new(&home).join(".cache").join(DEFAULT_CACHE_FILE_NAME);
        }

        // Fallback to current directory
        Path::new(".").join(DEFAULT_CACHE_FILE_NAME)
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read all entries
    ///
    /// A missing or blank file is an empty cache, not an error. A file that is not
    /// a JSON object is an error; single entries that do not decode are set aside
    /// in [`CacheContents::unreadable`].
    pub fn load(&self) -> Result<CacheContents, CacheError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(CacheContents::default());
            }
            Err(source) => {
                return Err(CacheError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        if contents.trim().is_empty() {
            return Ok(CacheContents::default());
        }

        let raw: Map<String, Value> = serde_json::from_str(&contents)?;
        let mut loaded = CacheContents::default();
        for (key, value) in raw {
            match GeocodeEntry::deserialize(&value) {
                Ok(entry) => {
                    loaded.entries.insert(key, entry);
                }
                Err(e) => {
                    tracing::warn!(
                        key,
                        path = %self.path.display(),
                        "Skipping unreadable cache entry: {}",
                        e
                    );
                    loaded.unreadable.insert(key, value);
                }
            }
        }
        Ok(loaded)
    }

    /// Rewrite the file with all entries, sorted by key
    ///
    /// `unreadable` entries are written back unchanged unless `entries` has a
    /// replacement under the same key.
    pub fn save(
        &self,
        entries: &HashMap<String, GeocodeEntry>,
        unreadable: &Map<String, Value>,
    ) -> Result<(), CacheError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|source| CacheError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let mut sorted: BTreeMap<&String, StoredEntry<'_>> = unreadable
            .iter()
            .map(|(key, value)| (key, StoredEntry::Verbatim(value)))
            .collect();
        sorted.extend(
            entries
                .iter()
                .map(|(key, entry)| (key, StoredEntry::Entry(entry))),
        );
        let json = serde_json::to_string_pretty(&sorted)?;
        fs::write(&self.path, json).map_err(|source| CacheError::Io {
            path: self.path.clone(),
            source,
        })
    }
}
