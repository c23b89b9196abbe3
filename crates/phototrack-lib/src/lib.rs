//! PhotoTrack Library - Core Data Structures for Photo Geotagging
//!
//! This library matches photo capture times against recorded GPX tracks and resolves
//! the resulting coordinates to place names through a persistent two-tier cache that
//! keeps calls to the external reverse-geocoding service to a minimum.
//!
//! # Architecture
//!
//! - **[`TrackStore`]**: Time-ordered [`Segment`]s loaded from one or more GPX files
//! - **[`Correlation`]**: Nearest track point for a query time, with [`MatchFlags`]
//! - **[`GeocodeCache`]**: Exact-key cache plus a coarse bounding-box index
//! - **[`exif`]**: Conversions between EXIF string encodings and plain values
//!
//! # Performance Characteristics
//!
//! - **Correlation**: O(log n) per segment overlapping the query time
//! - **Exact cache lookup**: O(1)
//! - **Near cache lookup**: O(k) where k = entries in one ~1.1 km index cell

mod correlate;
pub mod exif;
pub mod geocode;
mod segment;
mod store;
mod track;
pub mod utils;

// Public API exports
pub use correlate::{Correlation, MatchFlags, TrackMatch};
pub use geocode::{
    BoundingBox, CacheConfig, CacheStats, GeocodeCache, GeocodeEntry, GeocodeError, Place,
    ReverseGeocoder,
};
pub use segment::{Segment, TrackPoint};
pub use store::{LoadReport, StoreInfo, TrackStore};
pub use track::{PointExtensions, gpx_point_lists, read_point_extensions, waypoint_to_point};

/// Error types for the track data module
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("GPX parsing error: {0}")]
    GpxParse(#[from] gpx::errors::GpxError),

    #[error("GPX extension parsing error: {0}")]
    XmlParse(#[from] xml::reader::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Empty segment")]
    EmptySegment,

    #[error("Segment timestamps decrease at point {index}")]
    UnorderedSegment { index: usize },
}

pub type Result<T> = std::result::Result<T, DataError>;
