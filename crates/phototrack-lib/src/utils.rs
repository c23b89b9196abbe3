//! Utility functions for coordinate quantization

/// Decimal places of the exact cache key (~11 m)
pub const EXACT_KEY_DECIMALS: usize = 4;

/// Decimal places of the bounding-box index cell (~1.1 km)
pub const CELL_KEY_DECIMALS: usize = 2;

/// Format `lat:lon` rounded to `decimals` places
///
/// Used both as a cache key and as a spatial index cell.
#[inline]
pub fn quantized_key(lat: f64, lon: f64, decimals: usize) -> String {
    format!("{:.*}:{:.*}", decimals, lat, decimals, lon)
}

/// Exact cache key, e.g. `50.1439:-5.4181`
#[inline]
pub fn exact_key(lat: f64, lon: f64) -> String {
    quantized_key(lat, lon, EXACT_KEY_DECIMALS)
}

/// Bounding-box index cell key, e.g. `50.14:-5.42`
#[inline]
pub fn cell_key(lat: f64, lon: f64) -> String {
    quantized_key(lat, lon, CELL_KEY_DECIMALS)
}

/// Parse a `lat:lon` key back into its coordinates
pub fn parse_key(key: &str) -> Option<(f64, f64)> {
    let (lat, lon) = key.split_once(':')?;
    Some((lat.trim().parse().ok()?, lon.trim().parse().ok()?))
}

/// Round to `decimals` places through the same formatting as the keys
///
/// Keeps stored coordinates consistent with the key they were filed under.
#[inline]
pub fn quantize(value: f64, decimals: usize) -> f64 {
    format!("{:.*}", decimals, value).parse().unwrap_or(value)
}
