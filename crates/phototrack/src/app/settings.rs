use super::TagOptions;
use clap::Parser;
use phototrack_lib::CacheConfig;
use phototrack_lib::exif::PhotoTime;
use std::path::PathBuf;
use time::UtcOffset;
use time::macros::format_description;

/// Public Nominatim instance
pub const DEFAULT_NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org";

#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
/// PhotoTrack - Geotag photos from GPX tracks and name their locations
///
/// Positional files are images. To pass tracks positionally, list them first and
/// separate the images with `--`: `phototrack day1.gpx day2.gpx -- *.jpg`.
pub struct Settings {
    /// GPX files to correlate against
    #[clap(short, long = "gpx", value_name = "FILE")]
    pub gpx_files: Vec<PathBuf>,

    /// Images, or tracks when followed by `--` and images
    #[clap(value_name = "FILE")]
    pub inputs: Vec<PathBuf>,

    /// Images after `--`
    #[clap(last = true, value_name = "IMAGE")]
    pub images_after_separator: Vec<PathBuf>,

    /// UTC offset of the camera clock, e.g. +02:00, -0530 or Z
    #[clap(short, long, default_value = "+00:00", value_parser = parse_utc_offset)]
    pub timezone: UtcOffset,

    /// Seconds added to camera time to correct a drifting clock
    #[clap(long, default_value = "0", allow_negative_numbers = true)]
    pub clock_offset: i64,

    /// Largest accepted gap in seconds between photo and track point
    #[clap(short, long, default_value = "300")]
    pub max_offset: u64,

    /// Free-text tag embedded in the image comment (repeatable)
    #[clap(long = "tag", value_name = "TEXT")]
    pub tags: Vec<String>,

    /// Resolve place names through Nominatim and add them to the comment
    #[clap(long, default_value = "false")]
    pub geocode: bool,

    /// Geocode cache file (default: ~/.cache/nominatim_urls.json)
    #[clap(long, value_name = "FILE")]
    pub cache_file: Option<PathBuf>,

    /// Seconds to wait after each Nominatim request
    #[clap(long, default_value = "2.0", allow_negative_numbers = true)]
    pub cooldown: f64,

    /// Base URL of the Nominatim service
    #[clap(long, default_value = DEFAULT_NOMINATIM_URL)]
    pub nominatim_url: String,

    /// Report what would be written without modifying any image
    #[clap(short = 'n', long, default_value = "false")]
    pub dry_run: bool,

    /// Replace coordinates already present in an image
    #[clap(long, default_value = "false")]
    pub overwrite: bool,
}

impl Settings {
    /// Parse the process arguments, exiting with usage on error
    pub fn from_cli() -> Self {
        match Settings::try_parse() {
            Ok(args) => args,
            Err(e) => e.exit(),
        }
    }

    /// Split the inputs into `(tracks, images)`
    pub fn track_and_image_files(&self) -> (Vec<PathBuf>, Vec<PathBuf>) {
        let mut tracks = self.gpx_files.clone();
        if self.images_after_separator.is_empty() {
            (tracks, self.inputs.clone())
        } else {
            tracks.extend(self.inputs.iter().cloned());
            (tracks, self.images_after_separator.clone())
        }
    }

    pub fn tag_options(&self) -> TagOptions {
        TagOptions {
            photo_time: PhotoTime::new(self.timezone, time::Duration::seconds(self.clock_offset)),
            max_offset: time::Duration::seconds(self.max_offset.min(i64::MAX as u64) as i64),
            tags: self.tags.clone(),
            dry_run: self.dry_run,
            overwrite: self.overwrite,
        }
    }

    pub fn cache_config(&self) -> CacheConfig {
        let cooldown = std::time::Duration::try_from_secs_f64(self.cooldown).unwrap_or_default();
        let config = CacheConfig::default().with_cooldown(cooldown);
        match &self.cache_file {
            Some(path) => config.with_path(path),
            None => config,
        }
    }
}

/// Parse `+HH:MM`, `+HHMM`, `+HH` or `Z`/`UTC`
pub fn parse_utc_offset(value: &str) -> Result<UtcOffset, String> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("z") || value.eq_ignore_ascii_case("utc") {
        return Ok(UtcOffset::UTC);
    }

    let with_colon = format_description!("[offset_hour sign:mandatory]:[offset_minute]");
    let without_colon = format_description!("[offset_hour sign:mandatory][offset_minute]");
    let hours_only = format_description!("[offset_hour sign:mandatory]");
    UtcOffset::parse(value, with_colon)
        .or_else(|_| UtcOffset::parse(value, without_colon))
        .or_else(|_| UtcOffset::parse(value, hours_only))
        .map_err(|_| format!("invalid UTC offset {value:?}, expected e.g. +02:00"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::offset;

    fn parse(args: &[&str]) -> Settings {
        Settings::try_parse_from(std::iter::once("phototrack").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults() {
        let settings = parse(&["a.jpg"]);
        assert_eq!(settings.timezone, UtcOffset::UTC);
        assert_eq!(settings.max_offset, 300);
        assert_eq!(settings.cooldown, 2.0);
        assert!(!settings.geocode);
        assert!(!settings.dry_run);

        let config = settings.cache_config();
        assert_eq!(config.path, None);
        assert_eq!(config.cooldown, std::time::Duration::from_secs(2));
    }

    #[test]
    fn test_gpx_flag_with_positional_images() {
        let settings = parse(&["-g", "day1.gpx", "--gpx", "day2.gpx", "a.jpg", "b.jpg"]);
        let (tracks, images) = settings.track_and_image_files();
        assert_eq!(tracks, [PathBuf::from("day1.gpx"), PathBuf::from("day2.gpx")]);
        assert_eq!(images, [PathBuf::from("a.jpg"), PathBuf::from("b.jpg")]);
    }

    #[test]
    fn test_separator_splits_tracks_from_images() {
        let settings = parse(&["day1.gpx", "day2.gpx", "--", "a.jpg"]);
        let (tracks, images) = settings.track_and_image_files();
        assert_eq!(tracks, [PathBuf::from("day1.gpx"), PathBuf::from("day2.gpx")]);
        assert_eq!(images, [PathBuf::from("a.jpg")]);
    }

    #[test]
    fn test_tag_options() {
        let settings = parse(&[
            "--timezone",
            "+02:00",
            "--clock-offset",
            "-45",
            "--max-offset",
            "60",
            "--tag",
            "holiday",
            "--tag",
            "cornwall",
            "--dry-run",
            "a.jpg",
        ]);
        let options = settings.tag_options();
        assert_eq!(options.photo_time.timezone, offset!(+2));
        assert_eq!(options.photo_time.clock_offset, time::Duration::seconds(-45));
        assert_eq!(options.max_offset, time::Duration::seconds(60));
        assert_eq!(options.tags, ["holiday", "cornwall"]);
        assert!(options.dry_run);
        assert!(!options.overwrite);
    }

    #[test]
    fn test_parse_utc_offset() {
        assert_eq!(parse_utc_offset("+02:00"), Ok(offset!(+2)));
        assert_eq!(parse_utc_offset("-0530"), Ok(offset!(-5:30)));
        assert_eq!(parse_utc_offset("+09"), Ok(offset!(+9)));
        assert_eq!(parse_utc_offset("Z"), Ok(UtcOffset::UTC));
        assert!(parse_utc_offset("02:00").is_err());
        assert!(parse_utc_offset("Europe/London").is_err());
    }

    #[test]
    fn test_cache_file_and_negative_cooldown() {
        let settings = parse(&["--cache-file", "/tmp/c.json", "--cooldown", "-1", "a.jpg"]);
        let config = settings.cache_config();
        assert_eq!(config.path, Some(PathBuf::from("/tmp/c.json")));
        assert_eq!(config.cooldown, std::time::Duration::ZERO);
    }
}
