//! GPX track-file conversion
//!
//! Turns parsed GPX data into per-segment point lists in file order. Validation
//! (emptiness, time ordering) is left to [`crate::TrackStore::add_segment`].
//!
//! The `gpx` crate does not expose `<extensions>`, so those are collected in a
//! separate pass over the same document by [`read_point_extensions`].

use crate::{Result, TrackPoint};
use std::collections::BTreeMap;
use std::io::Read;
use time::OffsetDateTime;
use xml::reader::{EventReader, XmlEvent};

/// Extension values of one track point, by element local name (`atemp`, `hr`, ...)
pub type PointExtensions = BTreeMap<String, String>;

/// Convert every `trkseg` of a GPX document into a list of [`TrackPoint`]s
///
/// Waypoints without a `<time>` element cannot be correlated and are skipped.
/// A segment consisting only of such waypoints yields an empty list.
/// `extensions` holds one list per `trkseg`, as returned by
/// [`read_point_extensions`]; pass an empty slice to load points without them.
pub fn gpx_point_lists(
    gpx_data: &gpx::Gpx,
    extensions: &[Vec<PointExtensions>],
) -> Vec<Vec<TrackPoint>> {
    #[cfg(feature = "profiling")]
    profiling::scope!("track::gpx_point_lists");

    let mut lists = Vec::new();
    for (track_index, track) in gpx_data.tracks.iter().enumerate() {
        for (segment_index, segment) in track.segments.iter().enumerate() {
            let segment_extensions = extensions.get(lists.len());
            let points: Vec<TrackPoint> = segment
                .points
                .iter()
                .enumerate()
                .filter_map(|(i, waypoint)| {
                    let mut point = waypoint_to_point(waypoint)?;
                    if let Some(values) = segment_extensions.and_then(|s| s.get(i)) {
                        point.extensions = values.clone();
                    }
                    Some(point)
                })
                .collect();

            let skipped = segment.points.len() - points.len();
            if skipped > 0 {
                tracing::debug!(
                    track = track_index,
                    segment = segment_index,
                    skipped,
                    "Skipping waypoints without timestamp"
                );
            }
            lists.push(points);
        }
    }
    lists
}

/// Convert a single GPX waypoint, or `None` when it carries no timestamp
///
/// The returned point has no extension values; see [`gpx_point_lists`].
pub fn waypoint_to_point(waypoint: &gpx::Waypoint) -> Option<TrackPoint> {
    let timestamp: OffsetDateTime = waypoint.time.clone()?.into();
    let position = waypoint.point();
    Some(TrackPoint::new(
        timestamp,
        position.y(),
        position.x(),
        waypoint.elevation,
    ))
}

/// An element still open while scanning
struct OpenElement {
    name: String,
    text: String,
    has_children: bool,
}

/// Collect the `<extensions>` of every `trkpt`, grouped by `trkseg` in document order
///
/// Every leaf element below a point's `<extensions>` contributes its trimmed text
/// under its local name, so `<gpxtpx:TrackPointExtension><gpxtpx:hr>97</gpxtpx:hr>`
/// yields `hr = 97`. The first of two leaves with the same local name wins. Points
/// without extensions get an empty map, which keeps indexes aligned with
/// [`gpx::TrackSegment::points`].
pub fn read_point_extensions<R: Read>(reader: R) -> Result<Vec<Vec<PointExtensions>>> {
    let mut segments: Vec<Vec<PointExtensions>> = Vec::new();
    let mut stack: Vec<OpenElement> = Vec::new();
    // Stack depth of the current point's <extensions> element
    let mut extensions_depth: Option<usize> = None;

    for event in EventReader::new(reader) {
        match event? {
            XmlEvent::StartElement { name, .. } => {
                let parent = stack.last().map(|open| open.name.as_str());
                match (parent, name.local_name.as_str()) {
                    (Some("trk"), "trkseg") => segments.push(Vec::new()),
                    (Some("trkseg"), "trkpt") => {
                        if let Some(segment) = segments.last_mut() {
                            segment.push(PointExtensions::new());
                        }
                    }
                    (Some("trkpt"), "extensions") => extensions_depth = Some(stack.len()),
                    _ => {}
                }

                if let Some(parent) = stack.last_mut() {
                    parent.has_children = true;
                }
                stack.push(OpenElement {
                    name: name.local_name,
                    text: String::new(),
                    has_children: false,
                });
            }
            XmlEvent::Characters(text) | XmlEvent::CData(text) => {
                if let Some(open) = stack.last_mut() {
                    open.text.push_str(&text);
                }
            }
            XmlEvent::EndElement { .. } => {
                let Some(closed) = stack.pop() else {
                    continue;
                };
                match extensions_depth {
                    Some(depth) if stack.len() == depth => extensions_depth = None,
                    Some(depth) if stack.len() > depth && !closed.has_children => {
                        let value = closed.text.trim();
                        if !value.is_empty()
                            && let Some(point) = segments.last_mut().and_then(|s| s.last_mut())
                        {
                            point
                                .entry(closed.name)
                                .or_insert_with(|| value.to_string());
                        }
                    }
                    _ => {}
                }
            }
            _ => {}
        }
    }
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpx::{Gpx, Track, TrackSegment, Waypoint};
    use time::macros::datetime;

    fn create_test_waypoint(lat: f64, lon: f64, time: Option<OffsetDateTime>) -> Waypoint {
        let mut waypoint = Waypoint::new(geo::Point::new(lon, lat));
        waypoint.time = time.map(Into::into);
        waypoint.elevation = Some(21.77);
        waypoint
    }

    #[test]
    fn test_waypoint_conversion() {
        let mut waypoint = create_test_waypoint(
            50.1439479925,
            -5.4180954862,
            Some(datetime!(2016-10-26 10:13:08 UTC)),
        );
        waypoint.name = Some("start".to_string());

        let point = waypoint_to_point(&waypoint).unwrap();
        assert_eq!(point.timestamp, datetime!(2016-10-26 10:13:08 UTC));
        assert_eq!(point.lat(), 50.1439479925);
        assert_eq!(point.lon(), -5.4180954862);
        assert_eq!(point.elevation, Some(21.77));
        assert!(point.extensions.is_empty());
    }

    #[test]
    fn test_waypoint_without_time_is_skipped() {
        let waypoint = create_test_waypoint(50.0, -5.0, None);
        assert!(waypoint_to_point(&waypoint).is_none());
    }

    #[test]
    fn test_point_lists_follow_segments() {
        let mut gpx = Gpx::default();
        let mut track = Track::default();

        let mut first = TrackSegment::default();
        first.points.push(create_test_waypoint(
            50.0,
            -5.0,
            Some(datetime!(2016-10-26 10:00:00 UTC)),
        ));
        first.points.push(create_test_waypoint(50.1, -5.1, None));
        first.points.push(create_test_waypoint(
            50.2,
            -5.2,
            Some(datetime!(2016-10-26 10:01:00 UTC)),
        ));

        let mut second = TrackSegment::default();
        second.points.push(create_test_waypoint(51.0, -4.0, None));

        track.segments.push(first);
        track.segments.push(second);
        gpx.tracks.push(track);

        let lists = gpx_point_lists(&gpx, &[]);
        assert_eq!(lists.len(), 2);
        assert_eq!(lists[0].len(), 2);
        assert!(lists[1].is_empty());

        // Extension maps follow waypoint indexes, including the skipped ones
        let extensions = vec![vec![
            PointExtensions::from([("hr".to_string(), "90".to_string())]),
            PointExtensions::from([("hr".to_string(), "95".to_string())]),
            PointExtensions::from([("hr".to_string(), "97".to_string())]),
        ]];
        let lists = gpx_point_lists(&gpx, &extensions);
        assert_eq!(lists[0][0].extensions["hr"], "90");
        assert_eq!(lists[0][1].extensions["hr"], "97");
        assert!(lists[1].is_empty());
    }

    const EXTENSIONS_GPX: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="test"
     xmlns="http://www.topografix.com/GPX/1/1"
     xmlns:gpxtpx="http://www.garmin.com/xmlschemas/TrackPointExtension/v1">
  <wpt lat="50.0" lon="-5.0"><extensions><note>not a track point</note></extensions></wpt>
  <trk>
    <extensions><color>red</color></extensions>
    <trkseg>
      <trkpt lat="50.1439479925" lon="-5.4180954862">
        <time>2016-10-26T10:13:08Z</time>
        <extensions>
          <gpxtpx:TrackPointExtension>
            <gpxtpx:atemp>14.0</gpxtpx:atemp>
            <gpxtpx:hr>97</gpxtpx:hr>
          </gpxtpx:TrackPointExtension>
        </extensions>
      </trkpt>
      <trkpt lat="50.1440000000" lon="-5.4181000000">
        <time>2016-10-26T10:13:18Z</time>
      </trkpt>
    </trkseg>
    <trkseg>
      <trkpt lat="50.2" lon="-5.5">
        <time>2016-10-26T11:00:00Z</time>
        <extensions><cadence> 80 </cadence><empty/></extensions>
      </trkpt>
    </trkseg>
  </trk>
</gpx>"#;

    #[test]
    fn test_read_point_extensions() {
        let segments = read_point_extensions(EXTENSIONS_GPX.as_bytes()).unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].len(), 2);
        assert_eq!(
            segments[0][0],
            PointExtensions::from([
                ("atemp".to_string(), "14.0".to_string()),
                ("hr".to_string(), "97".to_string()),
            ])
        );
        assert!(segments[0][1].is_empty());
        assert_eq!(
            segments[1],
            [PointExtensions::from([("cadence".to_string(), "80".to_string())])]
        );
    }

    #[test]
    fn test_read_point_extensions_malformed() {
        assert!(read_point_extensions("<gpx><trk>".as_bytes()).is_err());
    }
}
