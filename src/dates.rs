//! Publication date parsing.
//!
//! Feeds in the wild disagree about how `pubDate` should look. Each
//! accepted layout is tried in order and the first one that parses wins.

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unable to parse date {input:?} (last tried {layout}: {detail})")]
pub struct DateParseError {
    pub input: String,
    pub layout: &'static str,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// `Mon, 02 Jan 2006 15:04:05 -0700`
    Rfc1123Z,
    /// `Mon, 02 Jan 2006 15:04:05 MST`
    Rfc1123,
    /// `2006-01-02T15:04:05Z07:00`
    Rfc3339,
    /// `02 Jan 06 15:04 -0700`
    Rfc822Z,
}

pub const LAYOUTS: [Layout; 4] = [
    Layout::Rfc1123Z,
    Layout::Rfc1123,
    Layout::Rfc3339,
    Layout::Rfc822Z,
];

impl Layout {
    pub fn name(self) -> &'static str {
        match self {
            Layout::Rfc1123Z => "RFC1123Z",
            Layout::Rfc1123 => "RFC1123",
            Layout::Rfc3339 => "RFC3339",
            Layout::Rfc822Z => "RFC822Z",
        }
    }

    fn parse(self, input: &str) -> Result<DateTime<Utc>, String> {
        match self {
            Layout::Rfc1123Z => {
                let rest = strip_weekday(input)?;
                DateTime::parse_from_str(rest, "%d %b %Y %H:%M:%S %z")
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| e.to_string())
            }
            Layout::Rfc1123 => {
                let rest = strip_weekday(input)?;
                let (datetime, zone) = rest
                    .rsplit_once(' ')
                    .ok_or_else(|| "missing time zone".to_string())?;
                let offset = zone_offset(zone)?;
                let naive = NaiveDateTime::parse_from_str(datetime, "%d %b %Y %H:%M:%S")
                    .map_err(|e| e.to_string())?;
                offset
                    .from_local_datetime(&naive)
                    .single()
                    .map(|dt| dt.with_timezone(&Utc))
                    .ok_or_else(|| "ambiguous local time".to_string())
            }
            Layout::Rfc3339 => DateTime::parse_from_rfc3339(input)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| e.to_string()),
            Layout::Rfc822Z => DateTime::parse_from_str(input, "%d %b %y %H:%M %z")
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| e.to_string()),
        }
    }
}

/// Parse a feed publication date, trying every accepted layout in order.
pub fn parse_pub_date(input: &str) -> Result<DateTime<Utc>, DateParseError> {
    let trimmed = input.trim();
    let mut last = (LAYOUTS[0], String::from("empty input"));

    for layout in LAYOUTS {
        match layout.parse(trimmed) {
            Ok(dt) => return Ok(dt),
            Err(detail) => last = (layout, detail),
        }
    }

    Err(DateParseError {
        input: input.to_string(),
        layout: last.0.name(),
        detail: last.1,
    })
}

/// Drop the leading `Mon, ` from an RFC 1123 date.
///
/// Publishers get the weekday wrong often enough that it is not checked
/// against the date itself.
fn strip_weekday(input: &str) -> Result<&str, String> {
    let (weekday, rest) = input
        .split_once(", ")
        .ok_or_else(|| "missing weekday".to_string())?;
    if weekday.len() != 3 || !weekday.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(format!("invalid weekday {:?}", weekday));
    }
    Ok(rest.trim_start())
}

/// Offsets for the zone names RFC 822 defines. Any other alphabetic zone
/// is read as UTC.
fn zone_offset(zone: &str) -> Result<FixedOffset, String> {
    if zone.is_empty() || !zone.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(format!("invalid time zone {:?}", zone));
    }

    let hours = match zone.to_ascii_uppercase().as_str() {
        "EST" => -5,
        "EDT" => -4,
        "CST" => -6,
        "CDT" => -5,
        "MST" => -7,
        "MDT" => -6,
        "PST" => -8,
        "PDT" => -7,
        _ => 0,
    };

    FixedOffset::east_opt(hours * 3600).ok_or_else(|| format!("invalid offset for {}", zone))
}
