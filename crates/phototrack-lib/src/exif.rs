//! Conversions between EXIF tag values and plain numbers and times
//!
//! Tag values arrive as the raw strings printed by EXIF tools, keyed by the bare
//! tag name (`GPSLatitude`, `DateTimeOriginal`, ...). GPS coordinates are stored as
//! up to three rationals `D/Dd M/Md S/Sd` plus a reference letter, capture times
//! as `YYYY:MM:DD HH:MM:SS` in the camera's local time without an offset.

use std::collections::BTreeMap;
use thiserror::Error;
use time::macros::format_description;
use time::{Duration, OffsetDateTime, PrimitiveDateTime, UtcOffset};

/// Raw EXIF values by tag name
pub type ExifTags = BTreeMap<String, String>;

pub const GPS_LATITUDE: &str = "GPSLatitude";
pub const GPS_LATITUDE_REF: &str = "GPSLatitudeRef";
pub const GPS_LONGITUDE: &str = "GPSLongitude";
pub const GPS_LONGITUDE_REF: &str = "GPSLongitudeRef";
pub const GPS_ALTITUDE: &str = "GPSAltitude";
pub const GPS_ALTITUDE_REF: &str = "GPSAltitudeRef";
pub const DATE_TIME_ORIGINAL: &str = "DateTimeOriginal";
pub const DATE_TIME: &str = "DateTime";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExifError {
    #[error("Invalid rational value: {0:?}")]
    InvalidRational(String),

    #[error("Invalid EXIF date/time: {0:?}")]
    InvalidDateTime(String),

    #[error("Missing EXIF field: {0}")]
    MissingField(String),

    #[error("Malformed EXIF field {tag}: {reason}")]
    Malformed { tag: String, reason: String },
}

/// Parse `D/Dd M/Md S/Sd` into a plain value
///
/// Between one and three terms are accepted; each later term is worth a further
/// sixtieth. A term without a denominator counts as `n/1`.
pub fn parse_rational_triple(value: &str) -> Result<f64, ExifError> {
    let invalid = || ExifError::InvalidRational(value.to_string());

    let mut result = 0.0;
    let mut factor = 1.0;
    let mut terms = 0;
    for term in value.split_whitespace() {
        terms += 1;
        if terms > 3 {
            return Err(invalid());
        }

        let (numerator, denominator) = term.split_once('/').unwrap_or((term, "1"));
        let numerator: f64 = numerator.parse().map_err(|_| invalid())?;
        let denominator: f64 = denominator.parse().map_err(|_| invalid())?;
        if denominator == 0.0 || !numerator.is_finite() || !denominator.is_finite() {
            return Err(invalid());
        }

        result += numerator / (factor * denominator);
        factor *= 60.0;
    }

    if terms == 0 {
        return Err(invalid());
    }
    Ok(result)
}

/// Encode the absolute value as `D/1 M/1 S/1000`
pub fn format_rational_triple(value: f64) -> String {
    let total = (value.abs() * 3_600_000.0).round() as u64;
    let degrees = total / 3_600_000;
    let minutes = (total % 3_600_000) / 60_000;
    let millis = total % 60_000;
    format!("{degrees}/1 {minutes}/1 {millis}/1000")
}

/// Apply a reference to an unsigned value
///
/// `S` and `W` (coordinates) and `1` (altitude below sea level) negate.
pub fn signed_coordinate(value: f64, reference: &str) -> f64 {
    match reference.trim() {
        "S" | "s" | "W" | "w" | "1" => -value,
        _ => value,
    }
}

/// Coordinates stored in (or destined for) an image
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpsPosition {
    pub lat: f64,
    pub lon: f64,
    /// Meters, negative below sea level
    pub altitude: Option<f64>,
}

impl GpsPosition {
    pub fn new(lat: f64, lon: f64, altitude: Option<f64>) -> Self {
        Self { lat, lon, altitude }
    }

    /// Read the GPS block of an image
    ///
    /// Returns `Ok(None)` if neither latitude nor longitude is present. A partial or
    /// unparsable position is an error; a bad altitude is dropped with a warning.
    pub fn from_tags(tags: &ExifTags) -> Result<Option<Self>, ExifError> {
        let lat = tags.get(GPS_LATITUDE);
        let lon = tags.get(GPS_LONGITUDE);
        let (lat, lon) = match (lat, lon) {
            (None, None) => return Ok(None),
            (Some(lat), Some(lon)) => (lat, lon),
            (None, Some(_)) => return Err(ExifError::MissingField(GPS_LATITUDE.to_string())),
            (Some(_), None) => return Err(ExifError::MissingField(GPS_LONGITUDE.to_string())),
        };

        let lat = signed_coordinate(
            parse_field(GPS_LATITUDE, lat)?,
            reference(tags, GPS_LATITUDE_REF)?,
        );
        let lon = signed_coordinate(
            parse_field(GPS_LONGITUDE, lon)?,
            reference(tags, GPS_LONGITUDE_REF)?,
        );
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return Err(ExifError::Malformed {
                tag: GPS_LATITUDE.to_string(),
                reason: format!("position {lat}, {lon} out of range"),
            });
        }

        let altitude = match tags.get(GPS_ALTITUDE) {
            Some(value) => match parse_rational_triple(value) {
                Ok(altitude) => Some(signed_coordinate(
                    altitude,
                    tags.get(GPS_ALTITUDE_REF).map_or("0", String::as_str),
                )),
                Err(e) => {
                    tracing::warn!("Ignoring altitude: {}", e);
                    None
                }
            },
            None => None,
        };

        Ok(Some(Self { lat, lon, altitude }))
    }

    /// Tag values encoding this position, as `(tag, value)` pairs
    pub fn to_tags(&self) -> Vec<(&'static str, String)> {
        let mut tags = vec![
            (GPS_LATITUDE, format_rational_triple(self.lat)),
            (
                GPS_LATITUDE_REF,
                if self.lat < 0.0 { "S" } else { "N" }.to_string(),
            ),
            (GPS_LONGITUDE, format_rational_triple(self.lon)),
            (
                GPS_LONGITUDE_REF,
                if self.lon < 0.0 { "W" } else { "E" }.to_string(),
            ),
        ];
        if let Some(altitude) = self.altitude {
            tags.push((
                GPS_ALTITUDE,
                format!("{}/100", (altitude.abs() * 100.0).round() as u64),
            ));
            tags.push((
                GPS_ALTITUDE_REF,
                if altitude < 0.0 { "1" } else { "0" }.to_string(),
            ));
        }
        tags
    }
}

fn parse_field(tag: &str, value: &str) -> Result<f64, ExifError> {
    parse_rational_triple(value).map_err(|e| ExifError::Malformed {
        tag: tag.to_string(),
        reason: e.to_string(),
    })
}

fn reference<'a>(tags: &'a ExifTags, tag: &str) -> Result<&'a str, ExifError> {
    tags.get(tag)
        .map(String::as_str)
        .ok_or_else(|| ExifError::MissingField(tag.to_string()))
}

/// Parse an EXIF `YYYY:MM:DD HH:MM:SS` timestamp
pub fn parse_exif_datetime(value: &str) -> Result<PrimitiveDateTime, ExifError> {
    let format = format_description!("[year]:[month]:[day] [hour]:[minute]:[second]");
    PrimitiveDateTime::parse(value.trim(), format)
        .map_err(|_| ExifError::InvalidDateTime(value.to_string()))
}

/// How the camera clock relates to UTC
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhotoTime {
    /// Offset of the camera's local time from UTC
    pub timezone: UtcOffset,
    /// Correction added to the camera time (camera running slow is positive)
    pub clock_offset: Duration,
}

impl Default for PhotoTime {
    fn default() -> Self {
        Self {
            timezone: UtcOffset::UTC,
            clock_offset: Duration::ZERO,
        }
    }
}

impl PhotoTime {
    pub fn new(timezone: UtcOffset, clock_offset: Duration) -> Self {
        Self {
            timezone,
            clock_offset,
        }
    }

    /// Convert a camera timestamp to an absolute UTC instant
    ///
    /// Fails with [`ExifError::InvalidDateTime`] when the corrected instant falls
    /// outside the representable range.
    pub fn to_utc(&self, local: PrimitiveDateTime) -> Result<OffsetDateTime, ExifError> {
        let timezone = Duration::seconds(i64::from(self.timezone.whole_seconds()));
        local
            .assume_utc()
            .checked_sub(timezone)
            .and_then(|utc| utc.checked_add(self.clock_offset))
            .ok_or_else(|| ExifError::InvalidDateTime(local.to_string()))
    }

    /// Capture instant of an image, from `DateTimeOriginal` or else `DateTime`
    pub fn capture_time(&self, tags: &ExifTags) -> Result<OffsetDateTime, ExifError> {
        let value = tags
            .get(DATE_TIME_ORIGINAL)
            .or_else(|| tags.get(DATE_TIME))
            .ok_or_else(|| ExifError::MissingField(DATE_TIME_ORIGINAL.to_string()))?;
        self.to_utc(parse_exif_datetime(value)?)
    }
}
