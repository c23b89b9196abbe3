//! PhotoTrack - Command-line geotagging
//!
//! Ties the track store, the correlator and the geocode cache from
//! `phototrack-lib` to the `exiv2` tool and the Nominatim service.

mod app;
mod logging;

pub use app::exiv2::{Exiv2, ToolError, parse_print_values};
pub use app::nominatim::NominatimClient;
pub use app::settings::Settings;
pub use app::{
    AppError, ExifReader, ExifUpdate, ExifWriter, Geocoding, PhotoTagger, RunSummary, TagOptions,
    compose_comment, run,
};
pub use logging::setup_logging;
