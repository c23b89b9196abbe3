//! Temporal correlation of a query instant against the track store
//!
//! For every segment whose `[start, end]` covers the query, a binary search finds
//! the bracketing pair of points and keeps the one closer in absolute time (ties
//! go to the later point). The best candidate over all segments is then
//! classified against the caller's tolerance.

use crate::{Segment, TrackPoint, TrackStore};
use std::fmt;
use time::{Duration, OffsetDateTime};

/// Offsets strictly below this are considered an exact hit
const EXACT_THRESHOLD: Duration = Duration::SECOND;

/// Classification of a correlation outcome
///
/// Several flags may be set at once, e.g. `GPS_PRESENT | SNAPPED`.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MatchFlags(u8);

impl MatchFlags {
    /// The photo already carried coordinates
    pub const GPS_PRESENT: Self = Self(1 << 0);
    /// Best offset below one second
    pub const EXACT: Self = Self(1 << 1);
    /// Best offset at least one second but within tolerance
    pub const SNAPPED: Self = Self(1 << 2);
    /// No candidate within tolerance
    pub const TOO_FAR: Self = Self(1 << 3);
    /// Several segments produced equally good candidates
    pub const AMBIGUOUS: Self = Self(1 << 4);

    const NAMES: [(Self, &'static str); 5] = [
        (Self::GPS_PRESENT, "GPS_PRESENT"),
        (Self::EXACT, "EXACT"),
        (Self::SNAPPED, "SNAPPED"),
        (Self::TOO_FAR, "TOO_FAR"),
        (Self::AMBIGUOUS, "AMBIGUOUS"),
    ];

    #[inline]
    pub const fn empty() -> Self {
        Self(0)
    }

    #[inline]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Whether every flag in `other` is set
    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

impl std::ops::BitOr for MatchFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for MatchFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.insert(rhs);
    }
}

impl fmt::Display for MatchFlags {
    /// Formats as `{EXACT, GPS_PRESENT}`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        let mut first = true;
        for (flag, name) in Self::NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str(", ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        f.write_str("}")
    }
}

impl fmt::Debug for MatchFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MatchFlags({})", self)
    }
}

/// The track point chosen for a query
#[derive(Clone, Debug, PartialEq)]
pub struct TrackMatch {
    /// The matched point
    pub point: TrackPoint,
    /// Signed offset `point.timestamp - query`
    pub offset: Duration,
    /// Index of the producing segment in [`TrackStore::segments`]
    pub segment_index: usize,
}

/// Result of a correlation query
///
/// `matched` is `None` when the store has no candidate within tolerance; the
/// flags remain available for diagnostics in that case.
#[derive(Clone, Debug, PartialEq)]
pub struct Correlation {
    pub matched: Option<TrackMatch>,
    pub flags: MatchFlags,
    /// Best absolute offset over all candidates, even if out of tolerance
    pub best_offset: Option<Duration>,
}

impl Correlation {
    /// Mark that the photo already had coordinates
    pub fn with_gps_present(mut self, present: bool) -> Self {
        if present {
            self.flags.insert(MatchFlags::GPS_PRESENT);
        }
        self
    }

    #[inline]
    pub fn is_match(&self) -> bool {
        self.matched.is_some()
    }
}

impl Segment {
    /// Index of the point closest in time to `query`, if the segment covers it
    ///
    /// The distance comparison is on absolute offsets; on equal distance the later
    /// point of the bracket wins.
    pub fn nearest_index(&self, query: OffsetDateTime) -> Option<usize> {
        if !self.covers(query) {
            return None;
        }

        let points = self.points();
        // Number of points at or before the query; at least 1 since start <= query
        let upper = points.partition_point(|p| p.timestamp <= query);
        let lower = upper - 1;
        if upper == points.len() {
            return Some(lower);
        }

        let before = (query - points[lower].timestamp).abs();
        let after = (points[upper].timestamp - query).abs();
        if after <= before {
            Some(upper)
        } else {
            Some(lower)
        }
    }
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl TrackStore {
    /// Find the track point nearest in time to `query`
    ///
    /// Every segment covering `query` contributes at most one candidate. Among the
    /// candidates the smallest absolute offset wins; exact ties keep the first
    /// segment in insertion order and set [`MatchFlags::AMBIGUOUS`].
    ///
    /// Classification:
    /// - best `|offset| > max_offset` or no covering segment: `TOO_FAR`, no match
    /// - `|offset| < 1s`: `EXACT`
    /// - otherwise: `SNAPPED`
    pub fn correlate(&self, query: OffsetDateTime, max_offset: Duration) -> Correlation {
        let max_offset = max_offset.abs();
        let mut best: Option<(usize, usize, Duration)> = None;
        let mut ambiguous = false;

        for (segment_index, segment) in self.segments().iter().enumerate() {
            let Some(point_index) = segment.nearest_index(query) else {
                continue;
            };
            let distance = (segment.points()[point_index].timestamp - query).abs();

            match best {
                Some((_, _, best_distance)) if distance > best_distance => {}
                Some((_, _, best_distance)) if distance == best_distance => ambiguous = true,
                _ => {
                    best = Some((segment_index, point_index, distance));
                    ambiguous = false;
                }
            }
        }

        let mut flags = MatchFlags::empty();
        let best_offset = best.map(|(_, _, distance)| distance);

        let matched = match best {
            Some((segment_index, point_index, distance)) if distance <= max_offset => {
                let point = self.segments()[segment_index].points()[point_index].clone();
                flags.insert(if distance < EXACT_THRESHOLD {
                    MatchFlags::EXACT
                } else {
                    MatchFlags::SNAPPED
                });
                if ambiguous {
                    flags.insert(MatchFlags::AMBIGUOUS);
                }
                Some(TrackMatch {
                    offset: point.timestamp - query,
                    point,
                    segment_index,
                })
            }
            _ => {
                flags.insert(MatchFlags::TOO_FAR);
                None
            }
        };

        tracing::trace!(%query, flags = %flags, ?best_offset, "Correlated");

        Correlation {
            matched,
            flags,
            best_offset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    const BASE: OffsetDateTime = datetime!(2016-10-26 10:00:00 UTC);

    fn point(offset_secs: i64, lat: f64, lon: f64) -> TrackPoint {
        TrackPoint::new(BASE + Duration::seconds(offset_secs), lat, lon, None)
    }

    fn scenario_store() -> TrackStore {
        let mut store = TrackStore::new();
        store
            .add_segment(vec![point(0, 50.00, -5.00), point(300, 50.01, -5.01)])
            .unwrap();
        store
    }

    /// Deterministic pseudo-random sequence for property-style checks
    fn lcg(state: &mut u64) -> u64 {
        *state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        *state >> 33
    }

    #[test]
    fn test_scenario_snapped_to_first_point() {
        let store = scenario_store();
        let result = store.correlate(datetime!(2016-10-26 10:01:00 UTC), Duration::seconds(300));

        let matched = result.matched.unwrap();
        assert_eq!(matched.point.lat(), 50.00);
        assert_eq!(matched.point.lon(), -5.00);
        assert_eq!(matched.offset, Duration::seconds(-60));
        assert_eq!(result.flags, MatchFlags::SNAPPED);
    }

    #[test]
    fn test_scenario_too_far() {
        let store = scenario_store();
        let result = store.correlate(datetime!(2016-10-26 10:20:00 UTC), Duration::seconds(300));

        assert!(result.matched.is_none());
        assert_eq!(result.flags, MatchFlags::TOO_FAR);
    }

    #[test]
    fn test_exact_match() {
        let store = scenario_store();
        let query = BASE + Duration::seconds(300) - Duration::milliseconds(400);
        let result = store.correlate(query, Duration::seconds(300));

        let matched = result.matched.unwrap();
        assert_eq!(matched.point.lat(), 50.01);
        assert_eq!(matched.offset, Duration::milliseconds(400));
        assert_eq!(result.flags, MatchFlags::EXACT);
    }

    #[test]
    fn test_offset_beyond_tolerance_inside_segment() {
        let store = scenario_store();
        // 150s from both points, tolerance 100s
        let result = store.correlate(BASE + Duration::seconds(150), Duration::seconds(100));
        assert!(result.matched.is_none());
        assert_eq!(result.flags, MatchFlags::TOO_FAR);
        assert_eq!(result.best_offset, Some(Duration::seconds(150)));
    }

    #[test]
    fn test_tie_within_bracket_prefers_later_point() {
        let store = scenario_store();
        let result = store.correlate(BASE + Duration::seconds(150), Duration::seconds(300));

        let matched = result.matched.unwrap();
        assert_eq!(matched.point.lat(), 50.01);
        assert_eq!(matched.offset, Duration::seconds(150));
        assert_eq!(result.flags, MatchFlags::SNAPPED);
    }

    #[test]
    fn test_query_on_segment_bounds() {
        let store = scenario_store();

        let at_start = store.correlate(BASE, Duration::seconds(10));
        assert_eq!(at_start.matched.unwrap().point.lat(), 50.00);
        assert!(at_start.flags.contains(MatchFlags::EXACT));

        let at_end = store.correlate(BASE + Duration::seconds(300), Duration::seconds(10));
        assert_eq!(at_end.matched.unwrap().point.lat(), 50.01);
        assert!(at_end.flags.contains(MatchFlags::EXACT));
    }

    #[test]
    fn test_single_point_segment() {
        let mut store = TrackStore::new();
        store.add_segment(vec![point(0, 48.0, 2.0)]).unwrap();

        let result = store.correlate(BASE, Duration::seconds(5));
        assert_eq!(result.matched.unwrap().point.lat(), 48.0);

        let result = store.correlate(BASE + Duration::seconds(1), Duration::seconds(5));
        assert_eq!(result.flags, MatchFlags::TOO_FAR);
    }

    #[test]
    fn test_empty_store_is_too_far() {
        let store = TrackStore::new();
        let result = store.correlate(BASE, Duration::hours(1));
        assert!(!result.is_match());
        assert_eq!(result.flags, MatchFlags::TOO_FAR);
        assert_eq!(result.best_offset, None);
    }

    #[test]
    fn test_best_candidate_across_segments() {
        let mut store = TrackStore::new();
        store
            .add_segment(vec![point(0, 1.0, 1.0), point(600, 1.1, 1.1)])
            .unwrap();
        store
            .add_segment(vec![point(100, 2.0, 2.0), point(200, 2.1, 2.1)])
            .unwrap();

        let result = store.correlate(BASE + Duration::seconds(190), Duration::seconds(300));
        let matched = result.matched.unwrap();
        assert_eq!(matched.segment_index, 1);
        assert_eq!(matched.point.lat(), 2.1);
        assert_eq!(matched.offset, Duration::seconds(10));
        assert!(!result.flags.contains(MatchFlags::AMBIGUOUS));
    }

    #[test]
    fn test_tie_across_segments_is_ambiguous() {
        let mut store = TrackStore::new();
        store
            .add_segment(vec![point(0, 1.0, 1.0), point(100, 1.1, 1.1)])
            .unwrap();
        store
            .add_segment(vec![point(20, 2.0, 2.0), point(140, 2.1, 2.1)])
            .unwrap();

        // Segment 0 offers the point at 100s, segment 1 the point at 20s: both 40s away
        let result = store.correlate(BASE + Duration::seconds(60), Duration::seconds(300));
        let matched = result.matched.unwrap();
        assert_eq!(matched.segment_index, 0);
        assert_eq!(matched.point.lat(), 1.1);
        assert_eq!(result.flags, MatchFlags::SNAPPED | MatchFlags::AMBIGUOUS);

        // A strictly better candidate clears the ambiguity
        let result = store.correlate(BASE + Duration::seconds(30), Duration::seconds(300));
        assert_eq!(result.matched.unwrap().segment_index, 1);
        assert!(!result.flags.contains(MatchFlags::AMBIGUOUS));
    }

    #[test]
    fn test_gps_present_flag_is_independent() {
        let store = scenario_store();
        let result = store
            .correlate(datetime!(2016-10-26 10:20:00 UTC), Duration::seconds(300))
            .with_gps_present(true);
        assert!(result.flags.contains(MatchFlags::GPS_PRESENT));
        assert!(result.flags.contains(MatchFlags::TOO_FAR));
    }

    #[test]
    fn test_matches_brute_force_scan() {
        let mut state = 42u64;
        for _ in 0..50 {
            let len = 1 + (lcg(&mut state) % 200) as usize;
            let mut t = 0i64;
            let points: Vec<TrackPoint> = (0..len)
                .map(|i| {
                    t += 1 + (lcg(&mut state) % 30) as i64;
                    point(t, i as f64, 0.0)
                })
                .collect();
            let span = t;

            let mut store = TrackStore::new();
            store.add_segment(points.clone()).unwrap();

            for _ in 0..40 {
                let query_ms = 1000 + (lcg(&mut state) as i64 % ((span - 1).max(1) * 1000));
                let query = BASE + Duration::milliseconds(query_ms);
                if !store.segments()[0].covers(query) {
                    continue;
                }

                let expected = points
                    .iter()
                    .map(|p| (p.timestamp - query).abs())
                    .min()
                    .unwrap();

                let result = store.correlate(query, Duration::days(1));
                let matched = result.matched.unwrap();
                assert_eq!(matched.offset.abs(), expected);
            }
        }
    }

    #[test]
    fn test_flags_display() {
        let flags = MatchFlags::GPS_PRESENT | MatchFlags::SNAPPED;
        assert_eq!(flags.to_string(), "{GPS_PRESENT, SNAPPED}");
        assert_eq!(MatchFlags::empty().to_string(), "{}");

        let mut flags = flags;
        flags.remove(MatchFlags::GPS_PRESENT);
        assert_eq!(flags, MatchFlags::SNAPPED);
        assert!(!flags.is_empty());
    }
}
