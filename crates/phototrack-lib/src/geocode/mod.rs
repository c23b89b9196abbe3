//! Reverse geocoding with a persistent two-tier cache
//!
//! The external service is reached through the [`ReverseGeocoder`] trait; the
//! [`GeocodeCache`] answers from previous results whenever it can:
//!
//! 1. exact hit on the coordinates rounded to 4 decimals (~11 m),
//! 2. a cached place whose bounding box interior contains the point, searched in
//!    the ~1.1 km index cell of the query,
//! 3. otherwise one external call followed by a fixed cooldown.

mod cache;
mod entry;
mod storage;

pub use cache::{CacheConfig, CacheStats, GeocodeCache};
pub use entry::{BoundingBox, GeocodeEntry};
pub use storage::{CacheContents, CacheError, CacheFile};

use serde::{Deserialize, Serialize};

/// Errors reported by a reverse-geocoding collaborator
#[derive(Debug, thiserror::Error)]
pub enum GeocodeError {
    #[error("Geocoding service unavailable: {0}")]
    Unavailable(String),

    #[error("Geocoding service returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed geocoding response: {0}")]
    Malformed(String),

    #[error("No place found: {0}")]
    NoResult(String),
}

/// A place as returned by the reverse-geocoding service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub display_name: String,
    #[serde(rename = "boundingbox")]
    pub bounding_box: BoundingBox,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "entry::place_id")]
    pub place_id: Option<u64>,
    /// Any further fields of the response, kept verbatim
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Place {
    pub fn new(display_name: impl Into<String>, bounding_box: BoundingBox) -> Self {
        Self {
            display_name: display_name.into(),
            bounding_box,
            place_id: None,
            extra: serde_json::Map::new(),
        }
    }
}

/// External reverse-geocoding lookup
///
/// Implementations block until the lookup finishes. Rate limiting is handled by
/// the cache, not the implementation.
pub trait ReverseGeocoder {
    fn reverse(&self, lat: f64, lon: f64) -> Result<Place, GeocodeError>;
}

impl<F> ReverseGeocoder for F
where
    F: Fn(f64, f64) -> Result<Place, GeocodeError>,
{
    fn reverse(&self, lat: f64, lon: f64) -> Result<Place, GeocodeError> {
        self(lat, lon)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_place_from_nominatim_json() {
        let json = r#"{
            "place_id": 198234,
            "lat": "50.1439",
            "lon": "-5.4181",
            "display_name": "Penzance, Cornwall, England, United Kingdom",
            "boundingbox": ["50.1", "50.2", "-5.6", "-5.5"],
            "osm_type": "relation"
        }"#;

        let place: Place = serde_json::from_str(json).unwrap();
        assert_eq!(place.place_id, Some(198234));
        assert_eq!(place.bounding_box, BoundingBox::new(50.1, 50.2, -5.6, -5.5));
        assert_eq!(
            place.extra.get("osm_type").and_then(|v| v.as_str()),
            Some("relation")
        );
    }

    #[test]
    fn test_place_id_string_is_accepted() {
        let json = r#"{
            "place_id": "85995478",
            "display_name": "Penzance",
            "boundingbox": ["50.1", "50.2", "-5.6", "-5.5"]
        }"#;
        let place: Place = serde_json::from_str(json).unwrap();
        assert_eq!(place.place_id, Some(85995478));
        assert!(place.extra.is_empty());
    }

    #[test]
    fn test_closure_geocoder() {
        let geocoder = |_lat: f64, _lon: f64| -> Result<Place, GeocodeError> {
            Err(GeocodeError::NoResult("Unable to geocode".to_string()))
        };
        assert!(geocoder.reverse(0.0, 0.0).is_err());
    }
}
