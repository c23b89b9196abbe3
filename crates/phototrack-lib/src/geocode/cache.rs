//! GeocodeCache - exact map plus bounding-box index over resolved places

use super::{CacheError, CacheFile, GeocodeEntry, ReverseGeocoder};
use crate::utils;

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Pause after every external lookup, as required by the Nominatim usage policy
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(2);

/// Configuration for the geocode cache
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "use-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CacheConfig {
    /// Cache file; `None` selects [`CacheFile::default_path`]
    pub path: Option<PathBuf>,
    /// Whether entries are written to disk at all
    pub persist: bool,
    /// Blocking pause after each external lookup
    pub cooldown: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: None,
            persist: true,
            cooldown: DEFAULT_COOLDOWN,
        }
    }
}

impl CacheConfig {
    /// A cache that never touches the filesystem
    pub fn in_memory() -> Self {
        Self {
            persist: false,
            ..Self::default()
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }
}

/// Counters for the end-of-run summary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub exact_hits: usize,
    pub near_hits: usize,
    pub external_calls: usize,
    pub failures: usize,
}

/// Two-tier cache of reverse-geocoding results
///
/// Entries live in a map keyed by coordinates rounded to 4 decimals. A secondary
/// index maps 2-decimal cells to the exact keys filed in them; it is always
/// derived from the exact map and never edited on its own.
///
/// The backing file is loaded lazily on first use and rewritten in full by
/// [`GeocodeCache::flush`]. If a write fails, persistence is switched off for the
/// rest of the run and the cache keeps working in memory.
#[derive(Debug)]
pub struct GeocodeCache {
    config: CacheConfig,
    /// Backing file, `None` when persistence is off or has failed
    storage: Option<CacheFile>,
    entries: HashMap<String, GeocodeEntry>,
    /// Undecodable file entries, written back as they were
    unreadable: serde_json::Map<String, serde_json::Value>,
    cell_index: HashMap<String, Vec<String>>,
    loaded: bool,
    dirty: bool,
    stats: CacheStats,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl GeocodeCache {
    /// Open a cache; the file is not read until the first lookup
    pub fn open(config: CacheConfig) -> Self {
        let storage = config.persist.then(|| {
            CacheFile::new(config.path.clone().unwrap_or_else(CacheFile::default_path))
        });

        Self {
            config,
            storage,
            entries: HashMap::new(),
            unreadable: serde_json::Map::new(),
            cell_index: HashMap::new(),
            loaded: false,
            dirty: false,
            stats: CacheStats::default(),
        }
    }

    /// Configuration the cache was opened with
    #[inline]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Whether changes are still being written to disk
    #[inline]
    pub fn is_persistent(&self) -> bool {
        self.storage.is_some()
    }

    /// Load the backing file if that has not happened yet
    pub fn ensure_loaded(&mut self) {
        if self.loaded {
            return;
        }
        self.loaded = true;

        let Some(storage) = &self.storage else {
            return;
        };
        match storage.load() {
            Ok(contents) => {
                tracing::debug!(
                    path = %storage.path().display(),
                    entries = contents.entries.len(),
                    unreadable = contents.unreadable.len(),
                    "Loaded geocode cache"
                );
                self.unreadable = contents.unreadable;
                for (key, entry) in contents.entries {
                    self.insert_loaded(key, entry);
                }
            }
            Err(e) => {
                tracing::warn!(
                    "Could not read geocode cache {}, starting empty: {}",
                    storage.path().display(),
                    e
                );
            }
        }
    }

    /// File a loaded entry under the key matching its coordinates
    fn insert_loaded(&mut self, key: String, mut entry: GeocodeEntry) {
        // The key records the query position; older files may store the place position
        // in lat/lon instead
        match utils::parse_key(&key) {
            Some((lat, lon)) => {
                entry.lat = utils::quantize(lat, utils::EXACT_KEY_DECIMALS);
                entry.lon = utils::quantize(lon, utils::EXACT_KEY_DECIMALS);
            }
            None => {
                tracing::warn!(key, "Re-keying cache entry with unparsable key");
            }
        }
        self.insert_entry(entry);
    }

    /// Insert into the exact map and the cell index
    ///
    /// Re-inserting an entry under an existing key replaces it without duplicating
    /// the index reference.
    fn insert_entry(&mut self, entry: GeocodeEntry) {
        let key = entry.key();
        let bucket = self.cell_index.entry(entry.cell_key()).or_default();
        if !bucket.contains(&key) {
            bucket.push(key.clone());
        }
        self.entries.insert(key, entry);
    }

    /// Look up the exact 4-decimal position
    ///
    /// On a hit `image` is added to the entry's users (once). No external call is made.
    pub fn lookup_exact(&mut self, lat: f64, lon: f64, image: &str) -> Option<&GeocodeEntry> {
        self.ensure_loaded();

        let entry = self.entries.get_mut(&utils::exact_key(lat, lon))?;
        if entry.record_use(image) {
            self.dirty = true;
        }
        self.stats.exact_hits += 1;
        Some(entry)
    }

    /// Look for a cached place whose bounding box interior contains the position
    ///
    /// Only entries in the query's 2-decimal cell are considered; the first one whose
    /// box, shrunk by 25% on each side, strictly contains the point is returned.
    pub fn lookup_near(&mut self, lat: f64, lon: f64, image: &str) -> Option<&GeocodeEntry> {
        self.ensure_loaded();

        let key = self
            .cell_index
            .get(&utils::cell_key(lat, lon))?
            .iter()
            .find(|key| {
                self.entries
                    .get(*key)
                    .is_some_and(|entry| entry.bounding_box.interior_contains(lat, lon))
            })?
            .clone();

        let entry = self.entries.get_mut(&key)?;
        if entry.record_use(image) {
            self.dirty = true;
        }
        self.stats.near_hits += 1;
        Some(entry)
    }

    /// Resolve a position to a place name
    ///
    /// Tries [`lookup_exact`](Self::lookup_exact), then
    /// [`lookup_near`](Self::lookup_near), and only then asks `geocoder`. Every
    /// external call is followed by the configured cooldown. A failed lookup is
    /// logged and yields `None`; it is never cached.
    pub fn resolve(
        &mut self,
        lat: f64,
        lon: f64,
        image: &str,
        geocoder: &dyn ReverseGeocoder,
    ) -> Option<String> {
        if let Some(entry) = self.lookup_exact(lat, lon, image) {
            let name = entry.display_name.clone();
            tracing::info!(
                image,
                cached = %entry.cached,
                used = entry.used.len(),
                "[cache] {}",
                name
            );
            self.flush_quietly();
            return Some(name);
        }

        if let Some(entry) = self.lookup_near(lat, lon, image) {
            let name = entry.display_name.clone();
            tracing::info!(
                image,
                cached = %entry.cached,
                near = %entry.key(),
                "[cache bbox] {}",
                name
            );
            self.flush_quietly();
            return Some(name);
        }

        self.stats.external_calls += 1;
        let name = match geocoder.reverse(lat, lon) {
            Ok(place) => {
                let entry = GeocodeEntry::from_place(lat, lon, place, image, today());
                let name = entry.display_name.clone();
                tracing::info!(image, "[lookup] {}", name);
                self.insert_entry(entry);
                self.dirty = true;
                self.flush_quietly();
                Some(name)
            }
            Err(e) => {
                self.stats.failures += 1;
                tracing::warn!(image, lat, lon, "Reverse geocoding failed: {}", e);
                None
            }
        };

        if !self.config.cooldown.is_zero() {
            tracing::debug!("Geocoding cooldown: {:?}", self.config.cooldown);
            std::thread::sleep(self.config.cooldown);
        }
        name
    }

    /// Write the whole cache if anything changed since the last write
    ///
    /// A failed write disables persistence for the remaining run; the error is
    /// returned once and later flushes are no-ops.
    pub fn flush(&mut self) -> Result<(), CacheError> {
        if !self.dirty {
            return Ok(());
        }
        let Some(storage) = &self.storage else {
            self.dirty = false;
            return Ok(());
        };

        match storage.save(&self.entries, &self.unreadable) {
            Ok(()) => {
                self.dirty = false;
                Ok(())
            }
            Err(e) => {
                tracing::error!(
                    "Could not write geocode cache {}, caching to disk disabled: {}",
                    storage.path().display(),
                    e
                );
                self.storage = None;
                self.dirty = false;
                Err(e)
            }
        }
    }

    fn flush_quietly(&mut self) {
        // Already logged by flush
        let _ = self.flush();
    }

    /// All entries by exact key
    #[inline]
    pub fn entries(&self) -> &HashMap<String, GeocodeEntry> {
        &self.entries
    }

    /// Exact keys filed in the cell containing `(lat, lon)`
    pub fn cell(&self, lat: f64, lon: f64) -> &[String] {
        self.cell_index
            .get(&utils::cell_key(lat, lon))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn stats(&self) -> CacheStats {
        self.stats
    }
}

/// Today's date as `YYYY-MM-DD`, local if the offset is known
fn today() -> String {
    time::OffsetDateTime::now_local()
        .unwrap_or_else(|_| time::OffsetDateTime::now_utc())
        .date()
        .to_string()
}
