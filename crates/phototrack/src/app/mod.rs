pub mod exiv2;
pub mod nominatim;
pub mod settings;

use exiv2::{Exiv2, ToolError};
use nominatim::NominatimClient;
use phototrack_lib::exif::{ExifTags, GpsPosition, PhotoTime};
use phototrack_lib::{
    CacheStats, Correlation, GeocodeCache, GeocodeError, MatchFlags, ReverseGeocoder, TrackStore,
};
use settings::Settings;
use std::path::Path;
use thiserror::Error;

/// Errors that abort the whole run
#[derive(Error, Debug)]
pub enum AppError {
    #[error("EXIF tool unavailable: {0}")]
    ToolUnavailable(#[source] ToolError),

    #[error("Could not set up geocoding: {0}")]
    Geocoder(#[from] GeocodeError),
}

/// Reads the raw EXIF values of an image
pub trait ExifReader {
    fn read_tags(&self, image: &Path) -> Result<ExifTags, ToolError>;
}

/// Writes coordinates and a comment into an image
pub trait ExifWriter {
    fn write_tags(&self, image: &Path, update: &ExifUpdate) -> Result<(), ToolError>;
}

/// Values to write into one image
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExifUpdate {
    pub position: Option<GpsPosition>,
    pub comment: Option<String>,
}

impl ExifUpdate {
    pub fn is_empty(&self) -> bool {
        self.position.is_none() && self.comment.is_none()
    }
}

/// Per-run tagging options
#[derive(Debug, Clone, PartialEq)]
pub struct TagOptions {
    pub photo_time: PhotoTime,
    pub max_offset: time::Duration,
    /// Free text placed before the place name in the comment
    pub tags: Vec<String>,
    pub dry_run: bool,
    pub overwrite: bool,
}

impl Default for TagOptions {
    fn default() -> Self {
        Self {
            photo_time: PhotoTime::default(),
            max_offset: time::Duration::minutes(5),
            tags: Vec::new(),
            dry_run: false,
            overwrite: false,
        }
    }
}

/// Counters reported at the end of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub images: usize,
    pub exact: usize,
    pub snapped: usize,
    pub too_far: usize,
    pub ambiguous: usize,
    pub gps_present: usize,
    pub no_timestamp: usize,
    pub named: usize,
    pub written: usize,
    pub failed: usize,
}

impl RunSummary {
    fn record(&mut self, flags: MatchFlags) {
        if flags.contains(MatchFlags::EXACT) {
            self.exact += 1;
        }
        if flags.contains(MatchFlags::SNAPPED) {
            self.snapped += 1;
        }
        if flags.contains(MatchFlags::TOO_FAR) {
            self.too_far += 1;
        }
        if flags.contains(MatchFlags::AMBIGUOUS) {
            self.ambiguous += 1;
        }
        if flags.contains(MatchFlags::GPS_PRESENT) {
            self.gps_present += 1;
        }
    }
}

/// Place-name resolution: the cache plus the service behind it
pub struct Geocoding {
    pub cache: GeocodeCache,
    pub geocoder: Box<dyn ReverseGeocoder>,
}

/// Join the user tags and the place name into one comment
pub fn compose_comment(tags: &[String], place: Option<&str>) -> Option<String> {
    let parts: Vec<&str> = tags
        .iter()
        .map(|tag| tag.trim())
        .chain(place.map(str::trim))
        .filter(|part| !part.is_empty())
        .collect();
    (!parts.is_empty()).then(|| parts.join("; "))
}

/// Geotags images against a track store
pub struct PhotoTagger {
    store: TrackStore,
    options: TagOptions,
    geocoding: Option<Geocoding>,
    summary: RunSummary,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl PhotoTagger {
    pub fn new(store: TrackStore, options: TagOptions) -> Self {
        Self {
            store,
            options,
            geocoding: None,
            summary: RunSummary::default(),
        }
    }

    pub fn with_geocoding(mut self, geocoding: Geocoding) -> Self {
        self.geocoding = Some(geocoding);
        self
    }

    pub fn store(&self) -> &TrackStore {
        &self.store
    }

    pub fn summary(&self) -> RunSummary {
        self.summary
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.geocoding.as_ref().map(|g| g.cache.stats())
    }

    /// Process every image in order
    ///
    /// Only an unavailable EXIF tool stops the run; every other problem is logged
    /// and the image skipped. The geocode cache is flushed at the end either way.
    pub fn run<P: AsRef<Path>>(
        &mut self,
        images: &[P],
        reader: &dyn ExifReader,
        writer: &dyn ExifWriter,
    ) -> Result<RunSummary, AppError> {
        let result = images
            .iter()
            .try_for_each(|image| self.process_image(image.as_ref(), reader, writer));

        if let Some(geocoding) = &mut self.geocoding
            && let Err(e) = geocoding.cache.flush()
        {
            tracing::warn!("Final cache flush failed: {}", e);
        }

        result?;
        self.log_summary();
        Ok(self.summary)
    }

    fn process_image(
        &mut self,
        image: &Path,
        reader: &dyn ExifReader,
        writer: &dyn ExifWriter,
    ) -> Result<(), AppError> {
        self.summary.images += 1;
        let name = image_name(image);

        let tags = match reader.read_tags(image) {
            Ok(tags) => tags,
            Err(e) if e.is_unavailable() => return Err(AppError::ToolUnavailable(e)),
            Err(e) => {
                tracing::warn!(image = %name, "Could not read EXIF: {}", e);
                self.summary.failed += 1;
                return Ok(());
            }
        };

        let existing = match GpsPosition::from_tags(&tags) {
            Ok(existing) => existing,
            Err(e) => {
                tracing::warn!(image = %name, "Ignoring unreadable GPS data: {}", e);
                None
            }
        };

        let capture_time = match self.options.photo_time.capture_time(&tags) {
            Ok(time) => time,
            Err(e) => {
                tracing::warn!(image = %name, "Skipping image without usable timestamp: {}", e);
                self.summary.no_timestamp += 1;
                return Ok(());
            }
        };

        let correlation = self
            .store
            .correlate(capture_time, self.options.max_offset)
            .with_gps_present(existing.is_some());
        self.summary.record(correlation.flags);
        log_correlation(&name, capture_time, &correlation);

        let (position, write_position) = match (existing, &correlation.matched) {
            (Some(existing), _) if !self.options.overwrite => (Some(existing), false),
            (_, Some(matched)) => (
                Some(GpsPosition::new(
                    matched.point.lat(),
                    matched.point.lon(),
                    matched.point.elevation,
                )),
                true,
            ),
            (existing, None) => (existing, false),
        };

        let place = match (&mut self.geocoding, &position) {
            (Some(geocoding), Some(position)) => geocoding.cache.resolve(
                position.lat,
                position.lon,
                &name,
                geocoding.geocoder.as_ref(),
            ),
            _ => None,
        };
        if place.is_some() {
            self.summary.named += 1;
        }

        let update = ExifUpdate {
            position: if write_position { position } else { None },
            comment: compose_comment(&self.options.tags, place.as_deref()),
        };
        if update.is_empty() {
            tracing::debug!(image = %name, "Nothing to write");
            return Ok(());
        }

        if self.options.dry_run {
            tracing::info!(image = %name, ?update, "Dry run, not writing");
            return Ok(());
        }

        match writer.write_tags(image, &update) {
            Ok(()) => {
                self.summary.written += 1;
                Ok(())
            }
            Err(e) if e.is_unavailable() => Err(AppError::ToolUnavailable(e)),
            Err(e) => {
                tracing::warn!(image = %name, "Could not write EXIF: {}", e);
                self.summary.failed += 1;
                Ok(())
            }
        }
    }

    fn log_summary(&self) {
        let s = &self.summary;
        tracing::info!(
            images = s.images,
            exact = s.exact,
            snapped = s.snapped,
            too_far = s.too_far,
            ambiguous = s.ambiguous,
            gps_present = s.gps_present,
            no_timestamp = s.no_timestamp,
            named = s.named,
            written = s.written,
            failed = s.failed,
            "Run finished"
        );
        if let Some(stats) = self.cache_stats() {
            tracing::info!(
                exact_hits = stats.exact_hits,
                near_hits = stats.near_hits,
                external_calls = stats.external_calls,
                failures = stats.failures,
                "Geocode cache"
            );
        }
    }
}

fn log_correlation(name: &str, capture_time: time::OffsetDateTime, correlation: &Correlation) {
    match &correlation.matched {
        Some(matched) => tracing::info!(
            image = %name,
            flags = %correlation.flags,
            offset = %matched.offset,
            segment = matched.segment_index,
            "{} at {:.6}, {:.6}",
            capture_time,
            matched.point.lat(),
            matched.point.lon()
        ),
        None => tracing::info!(
            image = %name,
            flags = %correlation.flags,
            best_offset = ?correlation.best_offset,
            "{} has no track point in range",
            capture_time
        ),
    }
}

/// Name an image is recorded under in the geocode cache: its path as given
fn image_name(image: &Path) -> String {
    image.to_string_lossy().into_owned()
}

/// Run the tagger as configured on the command line
pub fn run(settings: &Settings) -> Result<RunSummary, AppError> {
    let (track_files, images) = settings.track_and_image_files();

    let mut store = TrackStore::new();
    let report = store.load_files(&track_files);
    let info = store.info();
    tracing::info!(
        files = report.files_loaded,
        failed = report.files_failed,
        segments = info.segment_count,
        points = info.total_points,
        "Loaded tracks"
    );
    if store.is_empty() {
        tracing::warn!("No track points loaded, no image can be matched");
    }

    let mut tagger = PhotoTagger::new(store, settings.tag_options());
    if settings.geocode {
        let geocoder = NominatimClient::new(&settings.nominatim_url)?;
        tagger = tagger.with_geocoding(Geocoding {
            cache: GeocodeCache::open(settings.cache_config()),
            geocoder: Box::new(geocoder),
        });
    }

    let exiv2 = Exiv2::default();
    tagger.run(&images, &exiv2, &exiv2)
}
