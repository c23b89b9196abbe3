//! Cached geocoding results

use super::Place;
use crate::utils;
use geo::Rect;
use serde::de::{self, Deserializer};
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};

/// Fraction of the bounding box trimmed from each side for near-hit tests
const INTERIOR_MARGIN: f64 = 0.25;

/// Extent a geocoding result is valid within, in degrees
///
/// Serialized like the service encodes it: `[south, north, west, east]` as strings.
/// Numbers are accepted as well when reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub south: f64,
    pub north: f64,
    pub west: f64,
    pub east: f64,
}

impl BoundingBox {
    pub fn new(south: f64, north: f64, west: f64, east: f64) -> Self {
        Self {
            south,
            north,
            west,
            east,
        }
    }

    /// The box shrunk inward by 25% on every side (the middle 50% of each axis)
    pub fn interior(&self) -> Rect<f64> {
        let lat_span = self.north - self.south;
        let lon_span = self.east - self.west;
        Rect::new(
            geo::Coord {
                x: self.west + lon_span * INTERIOR_MARGIN,
                y: self.south + lat_span * INTERIOR_MARGIN,
            },
            geo::Coord {
                x: self.west + lon_span * (1.0 - INTERIOR_MARGIN),
                y: self.south + lat_span * (1.0 - INTERIOR_MARGIN),
            },
        )
    }

    /// Whether the point lies strictly inside the interior region
    pub fn interior_contains(&self, lat: f64, lon: f64) -> bool {
        let interior = self.interior();
        interior.min().y < lat
            && lat < interior.max().y
            && interior.min().x < lon
            && lon < interior.max().x
    }
}

impl Serialize for BoundingBox {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(4))?;
        for value in [self.south, self.north, self.west, self.east] {
            seq.serialize_element(&value.to_string())?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for BoundingBox {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let values = Vec::<NumberOrString>::deserialize(deserializer)?;
        if values.len() != 4 {
            return Err(de::Error::invalid_length(
                values.len(),
                &"four values [south, north, west, east]",
            ));
        }
        let mut floats = [0.0; 4];
        for (slot, value) in floats.iter_mut().zip(values) {
            *slot = value.into_f64::<D::Error>()?;
        }
        let [south, north, west, east] = floats;
        Ok(Self::new(south, north, west, east))
    }
}

/// JSON value that may carry a number either natively or as a string
#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(f64),
    String(String),
}

impl NumberOrString {
    fn into_f64<E: de::Error>(self) -> Result<f64, E> {
        match self {
            NumberOrString::Number(value) => Ok(value),
            NumberOrString::String(s) => s
                .trim()
                .parse()
                .map_err(|_| E::custom(format!("invalid number: {s:?}"))),
        }
    }
}

/// Coordinates stored as strings, read from strings or numbers
mod coordinate {
    use super::NumberOrString;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        NumberOrString::deserialize(deserializer)?.into_f64()
    }
}

/// Place ids, read from numbers or numeric strings and written as numbers
pub(super) mod place_id {
    use serde::{Deserialize, Deserializer, Serializer, de};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(u64),
        String(String),
    }

    pub fn serialize<S: Serializer>(value: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(id) => serializer.serialize_some(id),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
        match Option::<Repr>::deserialize(deserializer)? {
            None => Ok(None),
            Some(Repr::Number(id)) => Ok(Some(id)),
            Some(Repr::String(s)) if s.trim().is_empty() => Ok(None),
            Some(Repr::String(s)) => s
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| de::Error::custom(format!("invalid place id: {s:?}"))),
        }
    }
}

/// A resolved place filed under quantized query coordinates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocodeEntry {
    /// Query latitude rounded to 4 decimals
    #[serde(with = "coordinate")]
    pub lat: f64,
    /// Query longitude rounded to 4 decimals
    #[serde(with = "coordinate")]
    pub lon: f64,
    pub display_name: String,
    #[serde(rename = "boundingbox")]
    pub bounding_box: BoundingBox,
    /// Date of the external lookup, `YYYY-MM-DD`
    pub cached: String,
    /// Images that used this entry, without duplicates
    #[serde(default)]
    pub used: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "place_id")]
    pub place_id: Option<u64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl GeocodeEntry {
    /// Build an entry for a fresh lookup at `(lat, lon)`
    pub fn from_place(lat: f64, lon: f64, place: Place, image: &str, cached: String) -> Self {
        let mut extra = place.extra;
        // These names belong to the entry itself
        for key in ["lat", "lon", "cached", "used"] {
            extra.remove(key);
        }

        Self {
            lat: utils::quantize(lat, utils::EXACT_KEY_DECIMALS),
            lon: utils::quantize(lon, utils::EXACT_KEY_DECIMALS),
            display_name: place.display_name,
            bounding_box: place.bounding_box,
            cached,
            used: vec![image.to_string()],
            place_id: place.place_id,
            extra,
        }
    }

    /// Exact cache key of this entry
    #[inline]
    pub fn key(&self) -> String {
        utils::exact_key(self.lat, self.lon)
    }

    /// Bounding-box index cell of this entry
    #[inline]
    pub fn cell_key(&self) -> String {
        utils::cell_key(self.lat, self.lon)
    }

    /// Record that `image` used this entry; returns false if it already had
    pub fn record_use(&mut self, image: &str) -> bool {
        if self.used.iter().any(|used| used == image) {
            return false;
        }
        self.used.push(image.to_string());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_entry() -> GeocodeEntry {
        let place = Place::new(
            "Penzance, Cornwall",
            BoundingBox::new(50.10, 50.20, -5.60, -5.50),
        );
        GeocodeEntry::from_place(
            50.1439479925,
            -5.4180954862,
            place,
            "IMG_0001.JPG",
            "2016-10-26".to_string(),
        )
    }

    #[test]
    fn test_entry_is_quantized() {
        let entry = create_test_entry();
        assert_eq!(entry.lat, 50.1439);
        assert_eq!(entry.lon, -5.4181);
        assert_eq!(entry.key(), "50.1439:-5.4181");
        assert_eq!(entry.cell_key(), "50.14:-5.42");
    }

    #[test]
    fn test_record_use_deduplicates() {
        let mut entry = create_test_entry();
        assert!(!entry.record_use("IMG_0001.JPG"));
        assert!(entry.record_use("IMG_0002.JPG"));
        assert!(!entry.record_use("IMG_0002.JPG"));
        assert_eq!(entry.used, vec!["IMG_0001.JPG", "IMG_0002.JPG"]);
    }

    #[test]
    fn test_interior_contains() {
        let bbox = BoundingBox::new(50.0, 50.4, -5.4, -5.0);
        // Interior is lat (50.1, 50.3), lon (-5.3, -5.1)
        assert!(bbox.interior_contains(50.2, -5.2));
        assert!(bbox.interior_contains(50.29, -5.11));
        // Inside the full box, outside the interior
        assert!(!bbox.interior_contains(50.05, -5.2));
        assert!(!bbox.interior_contains(50.2, -5.35));
        // Outside entirely
        assert!(!bbox.interior_contains(51.0, -5.2));
    }

    #[test]
    fn test_degenerate_box_contains_nothing() {
        let bbox = BoundingBox::new(50.0, 50.0, -5.0, -5.0);
        assert!(!bbox.interior_contains(50.0, -5.0));
    }

    #[test]
    fn test_legacy_json_with_string_and_number_values() {
        let json = r#"{
            "lat": "50.1439", "lon": -5.4181,
            "display_name": "Penzance",
            "boundingbox": ["50.1", 50.2, "-5.6", "-5.5"],
            "cached": "2016-10-26",
            "used": ["a.jpg"],
            "place_id": 42,
            "licence": "ODbL"
        }"#;
        let entry: GeocodeEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry.lat, 50.1439);
        assert_eq!(entry.lon, -5.4181);
        assert_eq!(entry.bounding_box.north, 50.2);
        assert_eq!(entry.place_id, Some(42));
        assert_eq!(entry.extra.get("licence").and_then(|v| v.as_str()), Some("ODbL"));
    }

    #[test]
    fn test_place_id_as_string() {
        let base = r#""lat": "50.1439", "lon": "-5.4181", "display_name": "Penzance",
            "boundingbox": ["50.1", "50.2", "-5.6", "-5.5"], "cached": "2016-10-26""#;

        let entry: GeocodeEntry =
            serde_json::from_str(&format!(r#"{{{base}, "place_id": "85995478"}}"#)).unwrap();
        assert_eq!(entry.place_id, Some(85995478));
        // Written back as a number
        assert!(serde_json::to_string(&entry).unwrap().contains(r#""place_id":85995478"#));

        let entry: GeocodeEntry =
            serde_json::from_str(&format!(r#"{{{base}, "place_id": null}}"#)).unwrap();
        assert_eq!(entry.place_id, None);
        assert!(!serde_json::to_string(&entry).unwrap().contains("place_id"));

        let result: Result<GeocodeEntry, _> =
            serde_json::from_str(&format!(r#"{{{base}, "place_id": "way/12"}}"#));
        assert!(result.is_err());
    }

    #[test]
    fn test_bounding_box_wrong_length_fails() {
        let result: Result<BoundingBox, _> = serde_json::from_str(r#"["1", "2", "3"]"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_from_place_drops_reserved_fields() {
        let mut place = Place::new("Somewhere", BoundingBox::new(0.0, 1.0, 0.0, 1.0));
        place
            .extra
            .insert("lat".to_string(), serde_json::Value::from("0.5"));
        place
            .extra
            .insert("osm_id".to_string(), serde_json::Value::from(7));

        let entry = GeocodeEntry::from_place(0.25, 0.75, place, "x.jpg", "2020-01-01".into());
        assert!(!entry.extra.contains_key("lat"));
        assert!(entry.extra.contains_key("osm_id"));

        let json = serde_json::to_string(&entry).unwrap();
        assert_eq!(json.matches("\"lat\"").count(), 1);
    }
}
