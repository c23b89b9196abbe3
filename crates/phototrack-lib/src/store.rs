//! TrackStore - Top-level holder of time-ordered track segments
//!
//! Segments are accumulated from one or more GPX files and are read-only once
//! loading has finished. Correlation queries live in [`crate::Correlation`].

use crate::{Result, Segment, TrackPoint, track};

use std::io::Read;
use std::path::Path;
use time::OffsetDateTime;

/// Summary of the loaded track data
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreInfo {
    /// Number of accepted segments
    pub segment_count: usize,
    /// Total number of track points
    pub total_points: usize,
    /// Earliest timestamp over all segments (None if empty)
    pub start: Option<OffsetDateTime>,
    /// Latest timestamp over all segments (None if empty)
    pub end: Option<OffsetDateTime>,
}

/// Outcome of loading one or more track files
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Files that could be read and parsed
    pub files_loaded: usize,
    /// Files skipped because they could not be opened or parsed
    pub files_failed: usize,
    /// Segments added to the store
    pub segments_added: usize,
    /// Segments dropped (empty or out of order)
    pub segments_rejected: usize,
    /// Points contained in the added segments
    pub points_loaded: usize,
}

impl LoadReport {
    fn absorb(&mut self, other: LoadReport) {
        self.files_loaded += other.files_loaded;
        self.files_failed += other.files_failed;
        self.segments_added += other.segments_added;
        self.segments_rejected += other.segments_rejected;
        self.points_loaded += other.points_loaded;
    }
}

/// Cached statistics, updated incrementally as segments are added
#[derive(Debug, Clone, Default)]
struct CachedStats {
    total_points: usize,
    time_range: Option<(OffsetDateTime, OffsetDateTime)>,
}

/// All track segments of a run, in insertion order
#[derive(Debug, Clone, Default)]
pub struct TrackStore {
    segments: Vec<Segment>,
    cached_stats: CachedStats,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl TrackStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a segment built from time-sorted points
    ///
    /// Empty or unordered point lists are not added. The rejection is logged as a
    /// warning and returned so the caller can account for it; it is never fatal.
    pub fn add_segment(&mut self, points: Vec<TrackPoint>) -> Result<()> {
        self.add_labeled_segment(points, None)
    }

    fn add_labeled_segment(&mut self, points: Vec<TrackPoint>, source: Option<&str>) -> Result<()> {
        let segment = match Segment::new(points) {
            Ok(segment) => segment,
            Err(e) => {
                tracing::warn!(
                    source = source.unwrap_or("<memory>"),
                    "Dropping track segment: {}",
                    e
                );
                return Err(e);
            }
        };
        let segment = match source {
            Some(source) => segment.with_source(source),
            None => segment,
        };

        self.update_stats_for_added_segment(&segment);
        self.segments.push(segment);
        Ok(())
    }

    /// Parse a GPX document and add each of its segments
    ///
    /// `source` labels the segments for diagnostics (usually the file name). Each
    /// point's `<extensions>` leaf values end up in [`TrackPoint::extensions`].
    pub fn load_gpx<R: Read>(&mut self, mut reader: R, source: &str) -> Result<LoadReport> {
        let mut document = Vec::new();
        reader.read_to_end(&mut document)?;
        let gpx_data = gpx::read(document.as_slice())?;
        let extensions = track::read_point_extensions(document.as_slice())?;

        let mut report = LoadReport {
            files_loaded: 1,
            ..LoadReport::default()
        };
        for points in track::gpx_point_lists(&gpx_data, &extensions) {
            let len = points.len();
            match self.add_labeled_segment(points, Some(source)) {
                Ok(()) => {
                    report.segments_added += 1;
                    report.points_loaded += len;
                }
                Err(_) => report.segments_rejected += 1,
            }
        }

        tracing::debug!(
            source,
            segments = report.segments_added,
            rejected = report.segments_rejected,
            points = report.points_loaded,
            "Loaded track file"
        );
        Ok(report)
    }

    /// Load a single GPX file
    pub fn load_file<P: AsRef<Path>>(&mut self, path: P) -> Result<LoadReport> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        self.load_gpx(reader, &path.display().to_string())
    }

    /// Load several GPX files, skipping those that fail
    ///
    /// An unreadable or malformed file is logged and counted in
    /// [`LoadReport::files_failed`]; the remaining files are still loaded.
    pub fn load_files<P: AsRef<Path>>(&mut self, paths: &[P]) -> LoadReport {
        let mut report = LoadReport::default();
        for path in paths {
            match self.load_file(path) {
                Ok(file_report) => report.absorb(file_report),
                Err(e) => {
                    tracing::error!("Skipping track file {}: {}", path.as_ref().display(), e);
                    report.files_failed += 1;
                }
            }
        }
        report
    }

    /// Read-only view of all segments in insertion order
    #[inline]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    #[inline]
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Get total number of points across all segments
    ///
    /// This is O(1) as the value is cached and updated incrementally.
    #[inline]
    pub fn total_points(&self) -> usize {
        self.cached_stats.total_points
    }

    /// Overall `(start, end)` over all segments, or `None` when empty
    #[inline]
    pub fn time_range(&self) -> Option<(OffsetDateTime, OffsetDateTime)> {
        self.cached_stats.time_range
    }

    /// Get store information
    pub fn info(&self) -> StoreInfo {
        StoreInfo {
            segment_count: self.segments.len(),
            total_points: self.cached_stats.total_points,
            start: self.cached_stats.time_range.map(|(start, _)| start),
            end: self.cached_stats.time_range.map(|(_, end)| end),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    #[inline]
    fn update_stats_for_added_segment(&mut self, segment: &Segment) {
        self.cached_stats.total_points += segment.len();

        let (start, end) = (segment.start(), segment.end());
        self.cached_stats.time_range = Some(match self.cached_stats.time_range {
            Some((min, max)) => (min.min(start), max.max(end)),
            None => (start, end),
        });
    }
}
