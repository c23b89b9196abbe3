//! Track points and time-ordered segments

use crate::{DataError, Result};
use std::collections::BTreeMap;
use time::OffsetDateTime;

/// A single timestamped track point
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "use-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrackPoint {
    /// Absolute capture instant, normalized to UTC
    pub timestamp: OffsetDateTime,
    /// Position (x = longitude, y = latitude)
    pub position: geo::Point<f64>,
    /// Elevation in meters, if recorded
    pub elevation: Option<f64>,
    /// Auxiliary per-point values keyed by GPX tag name
    pub extensions: BTreeMap<String, String>,
}

impl TrackPoint {
    /// Create a point without auxiliary data
    pub fn new(timestamp: OffsetDateTime, lat: f64, lon: f64, elevation: Option<f64>) -> Self {
        Self {
            timestamp: timestamp.to_offset(time::UtcOffset::UTC),
            position: geo::Point::new(lon, lat),
            elevation,
            extensions: BTreeMap::new(),
        }
    }

    /// Attach an auxiliary value
    pub fn with_extension(mut self, tag: impl Into<String>, value: impl Into<String>) -> Self {
        self.extensions.insert(tag.into(), value.into());
        self
    }

    #[inline]
    pub fn lat(&self) -> f64 {
        self.position.y()
    }

    #[inline]
    pub fn lon(&self) -> f64 {
        self.position.x()
    }
}

/// A run of points with non-decreasing timestamps
#[derive(Clone, Debug)]
#[cfg_attr(feature = "use-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Segment {
    points: Vec<TrackPoint>,
    /// Where the segment came from (track file name), for diagnostics
    source: Option<String>,
}

impl Segment {
    /// Create a segment from points already sorted by time
    ///
    /// # Errors
    /// [`DataError::EmptySegment`] when `points` is empty and
    /// [`DataError::UnorderedSegment`] when a timestamp is earlier than its predecessor.
    pub fn new(points: Vec<TrackPoint>) -> Result<Self> {
        if points.is_empty() {
            return Err(DataError::EmptySegment);
        }

        if let Some(index) = points
            .windows(2)
            .position(|pair| pair[1].timestamp < pair[0].timestamp)
        {
            return Err(DataError::UnorderedSegment { index: index + 1 });
        }

        Ok(Self {
            points,
            source: None,
        })
    }

    /// Label the segment with its origin
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    #[inline]
    pub fn points(&self) -> &[TrackPoint] {
        &self.points
    }

    #[inline]
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// Earliest timestamp in the segment
    #[inline]
    pub fn start(&self) -> OffsetDateTime {
        // Non-empty and ordered by construction
        self.points[0].timestamp
    }

    /// Latest timestamp in the segment
    #[inline]
    pub fn end(&self) -> OffsetDateTime {
        self.points[self.points.len() - 1].timestamp
    }

    /// Whether `instant` falls within `[start, end]`
    #[inline]
    pub fn covers(&self, instant: OffsetDateTime) -> bool {
        self.start() <= instant && instant <= self.end()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Always false for a constructed segment
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}
