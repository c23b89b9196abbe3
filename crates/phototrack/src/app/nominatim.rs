//! Nominatim reverse-geocoding client
//!
//! Blocking; requests are rate limited by the geocode cache, which pauses after
//! every call. See <https://operations.osmfoundation.org/policies/nominatim/>.

use phototrack_lib::{GeocodeError, Place, ReverseGeocoder};
use std::time::Duration;

const USER_AGENT: &str = concat!(
    "phototrack/",
    env!("CARGO_PKG_VERSION"),
    " (https://github.com/Yeicor/phototrack)"
);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Reverse geocoder backed by a Nominatim server
pub struct NominatimClient {
    http_client: reqwest::blocking::Client,
    base_url: String,
}

impl NominatimClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, GeocodeError> {
        let http_client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| GeocodeError::Unavailable(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn reverse_url(&self) -> String {
        format!("{}/reverse", self.base_url)
    }
}

impl ReverseGeocoder for NominatimClient {
    fn reverse(&self, lat: f64, lon: f64) -> Result<Place, GeocodeError> {
        let url = self.reverse_url();
        tracing::debug!(lat, lon, url = %url, "Querying Nominatim");

        let response = self
            .http_client
            .get(&url)
            .query(&[
                ("format", "jsonv2".to_string()),
                ("lat", lat.to_string()),
                ("lon", lon.to_string()),
            ])
            .send()
            .map_err(|e| GeocodeError::Unavailable(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|e| GeocodeError::Unavailable(e.to_string()))?;
        if !status.is_success() {
            return Err(GeocodeError::Status {
                status: status.as_u16(),
                body,
            });
        }

        parse_reverse_response(&body)
    }
}

/// Interpret a `/reverse?format=jsonv2` body
pub fn parse_reverse_response(body: &str) -> Result<Place, GeocodeError> {
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| GeocodeError::Malformed(e.to_string()))?;

    if let Some(error) = value.get("error") {
        let message = error
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(GeocodeError::NoResult(message));
    }

    serde_json::from_value(value).map_err(|e| GeocodeError::Malformed(e.to_string()))
}
