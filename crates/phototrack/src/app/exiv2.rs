//! EXIF access through the `exiv2` command-line tool

use super::{ExifReader, ExifUpdate, ExifWriter};
use phototrack_lib::exif::{self, ExifTags};
use regex::Regex;
use std::io;
use std::path::Path;
use std::process::{Command, Output};
use std::sync::LazyLock;
use thiserror::Error;

/// One line of `exiv2 -pv`: `0x0002 GPSInfo GPSLatitude Rational 3 50/1 8/1 38213/1000`
static PV_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^0x[0-9a-fA-F]{4}\s+(\w+)\s+(\w+)\s+\w+\s+\d+\s*(.*)$")
        .unwrap_or_else(|e| panic!("invalid exiv2 line pattern: {e}"))
});

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("{program} is not available: {source}")]
    Unavailable {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} failed with status {status:?}: {stderr}")]
    Failed {
        program: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("Unexpected output from {program}: {line}")]
    MalformedOutput { program: String, line: String },
}

impl ToolError {
    /// Whether the tool cannot be run at all, as opposed to failing on one image
    pub fn is_unavailable(&self) -> bool {
        matches!(self, ToolError::Unavailable { .. })
    }
}

/// Key and value type exiv2 expects for a GPS tag
fn exiv2_key(tag: &str) -> (String, &'static str) {
    let kind = match tag {
        exif::GPS_LATITUDE_REF | exif::GPS_LONGITUDE_REF => "Ascii",
        exif::GPS_ALTITUDE_REF => "Byte",
        _ => "Rational",
    };
    (format!("Exif.GPSInfo.{tag}"), kind)
}

/// The `exiv2` binary
#[derive(Debug, Clone)]
pub struct Exiv2 {
    program: String,
}

impl Default for Exiv2 {
    fn default() -> Self {
        Self::new("exiv2")
    }
}

impl Exiv2 {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn run(&self, args: &[String], image: &Path) -> Result<Output, ToolError> {
        tracing::trace!(program = %self.program, ?args, image = %image.display(), "Running");
        Command::new(&self.program)
            .args(args)
            .arg(image)
            .output()
            .map_err(|source| ToolError::Unavailable {
                program: self.program.clone(),
                source,
            })
    }

    fn failed(&self, output: &Output) -> ToolError {
        ToolError::Failed {
            program: self.program.clone(),
            status: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }
    }

    /// Modify commands writing `update`
    pub fn modify_commands(update: &ExifUpdate) -> Vec<String> {
        let mut commands = Vec::new();
        if let Some(position) = &update.position {
            commands.push("set Exif.GPSInfo.GPSVersionID Byte 2 2 0 0".to_string());
            for (tag, value) in position.to_tags() {
                let (key, kind) = exiv2_key(tag);
                commands.push(format!("set {key} {kind} {value}"));
            }
        }
        if let Some(comment) = &update.comment {
            commands.push(format!(
                "set Exif.Photo.UserComment Comment charset=Unicode {comment}"
            ));
        }
        commands
    }
}

/// Parse `exiv2 -pv` output into values keyed by tag name
///
/// The first occurrence of a tag name wins, so IFD0 values take precedence over
/// the thumbnail IFD. Lines that are not tag lines are skipped; output with
/// content but no tag line at all is an error.
pub fn parse_print_values(program: &str, stdout: &str) -> Result<ExifTags, ToolError> {
    let mut tags = ExifTags::new();
    let mut first_unmatched = None;
    for line in stdout.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }
        match PV_LINE.captures(line) {
            Some(captures) => {
                let tag = &captures[2];
                let value = captures[3].trim();
                tags.entry(tag.to_string())
                    .or_insert_with(|| value.to_string());
            }
            None => {
                first_unmatched.get_or_insert(line);
            }
        }
    }

    match first_unmatched {
        Some(line) if tags.is_empty() => Err(ToolError::MalformedOutput {
            program: program.to_string(),
            line: line.to_string(),
        }),
        _ => Ok(tags),
    }
}

impl ExifReader for Exiv2 {
    fn read_tags(&self, image: &Path) -> Result<ExifTags, ToolError> {
        let output = self.run(&["-pv".to_string()], image)?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        // exiv2 exits non-zero for images without metadata
        if !output.status.success() && stdout.trim().is_empty() {
            return Err(self.failed(&output));
        }
        parse_print_values(&self.program, &stdout)
    }
}

impl ExifWriter for Exiv2 {
    fn write_tags(&self, image: &Path, update: &ExifUpdate) -> Result<(), ToolError> {
        let commands = Self::modify_commands(update);
        if commands.is_empty() {
            return Ok(());
        }

        let args: Vec<String> = commands
            .into_iter()
            .flat_map(|command| ["-M".to_string(), command])
            .collect();
        let output = self.run(&args, image)?;
        if !output.status.success() {
            return Err(self.failed(&output));
        }
        Ok(())
    }
}
