//! Directory listing parser
//!
//! Decodes the human-oriented report printed by `mdir -i <image>`:
//!
//! ```text
//!  Volume in drive : has no label
//!  Volume Serial Number is 6515-5815
//! Directory for ::/
//!
//! 5years1         901120 2018-12-02  20:30
//! 5years1  adf    901120 2018-12-02  20:30
//! BARBAR~1 ADF    901120 2018-11-24  22:44  Barbarian Plus 6.adf
//!         3 files           2 703 360 bytes
//!                           1 024 000 bytes free
//! ```
//!
//! Everything up to the `Directory for ::/` line is header. Every later
//! line is tried as an entry; lines that do not parse (the summary footer,
//! subdirectories, garbage) are skipped rather than failing the listing.

use chrono::{Local, NaiveDateTime, TimeZone};
use thiserror::Error;
use tracing::trace;

use super::types::FileEntry;

const DOS_NAME_LEN: usize = 8;
const DOS_EXT_LEN: usize = 3;
/// NAME, separator column, EXT
const DOS_LEN: usize = DOS_NAME_LEN + 1 + DOS_EXT_LEN;

/// Marker on the line that ends the header
const ROOT_MARKER: &str = "::/";

/// Date and time are separated by two spaces
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d  %H:%M";

/// Why a single listing line was not an entry
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ListingError {
    #[error("size not found")]
    MissingSize,

    #[error("invalid size '{0}'")]
    InvalidSize(String),

    #[error("invalid timestamp '{0}'")]
    InvalidTimestamp(String),
}

/// Streaming parser over one listing; yields entries in tool order
pub struct ListingParser<'a> {
    lines: std::str::Lines<'a>,
    in_directory: bool,
}

impl<'a> ListingParser<'a> {
    pub fn new(output: &'a str) -> Self {
        Self {
            lines: output.lines(),
            in_directory: false,
        }
    }
}

impl Iterator for ListingParser<'_> {
    type Item = FileEntry;

    fn next(&mut self) -> Option<FileEntry> {
        for line in self.lines.by_ref() {
            if line.is_empty() {
                continue;
            }
            if line.contains(ROOT_MARKER) {
                self.in_directory = true;
                continue;
            }
            if !self.in_directory {
                continue;
            }
            match parse_entry(line) {
                Ok(entry) => return Some(entry),
                Err(e) => trace!("Skipping listing line {:?}: {}", line, e),
            }
        }
        None
    }
}

/// Parse a whole listing
pub fn parse_listing(output: &str) -> Vec<FileEntry> {
    ListingParser::new(output).collect()
}

/// Parse one entry line
///
/// The 8.3 short name only becomes the display name when the tool printed
/// no long name, which happens for names that fit the DOS limits.
pub fn parse_entry(line: &str) -> Result<FileEntry, ListingError> {
    let split = line
        .char_indices()
        .nth(DOS_LEN)
        .map_or(line.len(), |(i, _)| i);
    let (dos_name, rest) = line.split_at(split);

    let size_start = rest.find(|c| c != ' ').ok_or(ListingError::MissingSize)?;
    let rest = &rest[size_start..];
    let size_end = rest.find(' ').unwrap_or(rest.len());
    let size = rest[..size_end]
        .parse::<u64>()
        .map_err(|_| ListingError::InvalidSize(rest[..size_end].to_string()))?;

    let rest = &rest[size_end..];
    let rest = rest.strip_prefix(' ').unwrap_or(rest);

    let (stamp, long_name) = split_timestamp(rest)?;
    let mtime = parse_timestamp(stamp)?;

    let name = if long_name.is_empty() {
        short_name(dos_name)
    } else {
        long_name.to_string()
    };

    Ok(FileEntry::new(name, size, mtime))
}

/// Split `YYYY-MM-DD  HH:MM[  long name]` into timestamp and long name
fn split_timestamp(rest: &str) -> Result<(&str, &str), ListingError> {
    let invalid = || ListingError::InvalidTimestamp(rest.to_string());
    let time_start = rest.find("  ").ok_or_else(invalid)? + 2;
    match rest[time_start..].find("  ") {
        Some(end) => {
            let end = time_start + end;
            Ok((&rest[..end], &rest[end + 2..]))
        }
        None => Ok((rest.trim_end(), "")),
    }
}

fn parse_timestamp(stamp: &str) -> Result<i64, ListingError> {
    let invalid = || ListingError::InvalidTimestamp(stamp.to_string());

    // Single-digit hours are space padded, which widens the gap.
    let mut parts = stamp.split_whitespace();
    let (date, time) = match (parts.next(), parts.next(), parts.next()) {
        (Some(date), Some(time), None) => (date, time),
        _ => return Err(invalid()),
    };
    let normalized = format!("{}  {}", date, time);
    let naive = NaiveDateTime::parse_from_str(&normalized, TIMESTAMP_FORMAT)
        .map_err(|_| invalid())?;

    // The tool prints host-local wall-clock time.
    Ok(Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|t| t.timestamp())
        .unwrap_or_else(|| naive.and_utc().timestamp()))
}

fn short_name(dos_name: &str) -> String {
    let name: String = dos_name.chars().take(DOS_NAME_LEN).collect();
    let ext: String = dos_name
        .chars()
        .skip(DOS_NAME_LEN + 1)
        .take(DOS_EXT_LEN)
        .collect();
    let name = name.trim();
    let ext = ext.trim_end();
    if ext.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", name, ext)
    }
}
