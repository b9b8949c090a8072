//! # Date Handling Utilities
//!
//! This module converts temporal values between their wire representation,
//! the text shown in a table cell, and the text placed in an edit field.
//!
//! Wire forms produced by [`ValueCodec::from_editable`]:
//!
//! | type          | wire form                         |
//! |---------------|-----------------------------------|
//! | `date`        | `YYYY-MM-DD`                      |
//! | `time`        | `HH:MM:SS[.fff]`                  |
//! | `timetz`      | `HH:MM:SS[.fff]+HH:MM`            |
//! | `timestamp`   | `YYYY-MM-DDTHH:MM:SS[.fff]`       |
//! | `timestamptz` | `YYYY-MM-DDTHH:MM:SS[.fff]+HH:MM` |
//!
//! Editable forms drop the offset and are expressed in the viewer's local
//! time; `from_editable` re-attaches the viewer's offset. None of the public
//! functions fail: anything that does not parse is passed through unchanged.

use chrono::{DateTime, FixedOffset, Local, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeZone, Timelike, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tabula_types::CanonicalType;
use tracing::debug;

const DISPLAY_DATE_FORMAT: &str = "%d.%m.%Y";
const DISPLAY_TIME_FORMAT: &str = "%H:%M:%S";
const DISPLAY_TIMESTAMP_FORMAT: &str = "%d.%m.%Y %H:%M:%S";
const WIRE_DATE_FORMAT: &str = "%Y-%m-%d";
const WIRE_TIME_FORMAT: &str = "%H:%M:%S%.f";
const WIRE_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

const NAIVE_TIMESTAMP_FORMATS: [&str; 4] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"];

const SECONDS_PER_DAY: i64 = 86_400;

static TIME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{1,2}):(\d{2})(?::(\d{2})(\.\d{1,9})?)?\s*(Z|z|[+-]\d{2}(?::?\d{2})?)?$").expect("valid time pattern")
});

static TRAILING_OFFSET_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.+?)\s*(Z|z|[+-]\d{2}(?::?\d{2})?)$").expect("valid offset pattern"));

/// Converts temporal values relative to one viewer's UTC offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueCodec {
    viewer_offset: FixedOffset,
}

impl Default for ValueCodec {
    fn default() -> Self {
        Self::local()
    }
}

impl ValueCodec {
    pub fn new(viewer_offset: FixedOffset) -> Self {
        Self { viewer_offset }
    }

    /// Codec using the host's current local offset.
    pub fn local() -> Self {
        Self::new(*Local::now().offset())
    }

    /// Codec for a viewer `minutes` east of UTC. Out-of-range values fall back to UTC.
    pub fn with_offset_minutes(minutes: i32) -> Self {
        let offset = FixedOffset::east_opt(minutes.saturating_mul(60)).unwrap_or_else(utc_offset);
        Self::new(offset)
    }

    pub fn viewer_offset(&self) -> FixedOffset {
        self.viewer_offset
    }

    /// Formats a wire value for display in a table cell.
    ///
    /// # Arguments
    /// * `raw` - The wire string
    /// * `kind` - The column's temporal type
    ///
    /// # Returns
    /// Localized display text, the raw text when it does not parse, or an
    /// empty string for blank input.
    ///
    /// # Example
    /// ```rust
    /// use tabula_types::CanonicalType;
    /// use tabula_util::ValueCodec;
    ///
    /// let codec = ValueCodec::with_offset_minutes(0);
    /// assert_eq!(codec.to_display("2024-03-09", CanonicalType::Date), "09.03.2024");
    /// assert_eq!(codec.to_display("not a date", CanonicalType::Date), "not a date");
    /// ```
    pub fn to_display(&self, raw: &str, kind: CanonicalType) -> String {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return String::new();
        }
        let formatted = match kind {
            CanonicalType::Date => parse_date(trimmed).map(|date| date.format(DISPLAY_DATE_FORMAT).to_string()),
            CanonicalType::Time => parse_time(trimmed).map(|(time, _)| time.format(DISPLAY_TIME_FORMAT).to_string()),
            CanonicalType::TimeTz => {
                parse_time(trimmed).map(|(time, offset)| self.shift_time(time, offset).format(DISPLAY_TIME_FORMAT).to_string())
            }
            CanonicalType::Timestamp => parse_naive_timestamp(trimmed).map(|stamp| stamp.format(DISPLAY_TIMESTAMP_FORMAT).to_string()),
            CanonicalType::TimestampTz => parse_zoned_timestamp(trimmed).map(|stamp| {
                let local = stamp.with_timezone(&self.viewer_offset);
                format!("{} ({})", local.format(DISPLAY_TIMESTAMP_FORMAT), format_offset(*stamp.offset()))
            }),
        };
        formatted.unwrap_or_else(|| passthrough(trimmed, kind, "display"))
    }

    /// Formats a wire value as text suitable for an edit field.
    ///
    /// Offset-bearing types are converted to the viewer's wall time and the
    /// offset is dropped; [`ValueCodec::from_editable`] puts it back.
    pub fn to_editable(&self, raw: &str, kind: CanonicalType) -> String {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return String::new();
        }
        let formatted = match kind {
            CanonicalType::Date => parse_date(trimmed).map(|date| date.format(WIRE_DATE_FORMAT).to_string()),
            CanonicalType::Time => parse_time(trimmed).map(|(time, _)| time.format(WIRE_TIME_FORMAT).to_string()),
            CanonicalType::TimeTz => parse_time(trimmed).map(|(time, offset)| self.shift_time(time, offset).format(WIRE_TIME_FORMAT).to_string()),
            CanonicalType::Timestamp => parse_naive_timestamp(trimmed).map(|stamp| stamp.format(WIRE_TIMESTAMP_FORMAT).to_string()),
            CanonicalType::TimestampTz => parse_zoned_timestamp(trimmed).map(|stamp| {
                stamp
                    .with_timezone(&self.viewer_offset)
                    .naive_local()
                    .format(WIRE_TIMESTAMP_FORMAT)
                    .to_string()
            }),
        };
        formatted.unwrap_or_else(|| passthrough(trimmed, kind, "editable"))
    }

    /// Converts edit-field text back to its wire form.
    ///
    /// Missing seconds are zero-filled and offset-bearing types receive the
    /// viewer's offset. An offset typed by the user is kept as entered.
    pub fn from_editable(&self, text: &str, kind: CanonicalType) -> String {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return String::new();
        }
        let formatted = match kind {
            CanonicalType::Date => parse_date(trimmed).map(|date| date.format(WIRE_DATE_FORMAT).to_string()),
            CanonicalType::Time => parse_time(trimmed).map(|(time, _)| time.format(WIRE_TIME_FORMAT).to_string()),
            CanonicalType::TimeTz => parse_time(trimmed).map(|(time, offset)| {
                let offset = offset.unwrap_or(self.viewer_offset);
                format!("{}{}", time.format(WIRE_TIME_FORMAT), format_offset(offset))
            }),
            CanonicalType::Timestamp => parse_naive_timestamp(trimmed).map(|stamp| stamp.format(WIRE_TIMESTAMP_FORMAT).to_string()),
            CanonicalType::TimestampTz => split_trailing_offset(trimmed)
                .or_else(|| parse_naive(trimmed).map(|naive| (naive, self.viewer_offset)))
                .map(|(naive, offset)| format!("{}{}", naive.format(WIRE_TIMESTAMP_FORMAT), format_offset(offset))),
        };
        formatted.unwrap_or_else(|| passthrough(trimmed, kind, "wire"))
    }

    /// Renders any cell value: temporal strings go through [`ValueCodec::to_display`],
    /// everything else through [`format_fallback`].
    pub fn display_value(&self, value: &Value, kind: Option<CanonicalType>) -> String {
        match (value, kind) {
            (Value::String(raw), Some(kind)) => self.to_display(raw, kind),
            (other, _) => format_fallback(other),
        }
    }

    fn shift_time(&self, time: NaiveTime, offset: Option<FixedOffset>) -> NaiveTime {
        let Some(offset) = offset else {
            return time;
        };
        let delta = i64::from(self.viewer_offset.local_minus_utc() - offset.local_minus_utc());
        let seconds = (i64::from(time.num_seconds_from_midnight()) + delta).rem_euclid(SECONDS_PER_DAY);
        NaiveTime::from_num_seconds_from_midnight_opt(seconds as u32, time.nanosecond()).unwrap_or(time)
    }
}

/// Generic formatter used when no temporal type applies or parsing failed.
///
/// Strings pass through unchanged, `null` renders empty, and every other
/// value is rendered as compact JSON.
///
/// # Example
/// ```rust
/// use serde_json::json;
/// use tabula_util::format_fallback;
///
/// assert_eq!(format_fallback(&json!("text")), "text");
/// assert_eq!(format_fallback(&json!({"a": [1, 2]})), r#"{"a":[1,2]}"#);
/// assert_eq!(format_fallback(&json!(null)), "");
/// ```
pub fn format_fallback(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Bool(_) | Value::Number(_) => value.to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

/// Formats an offset as `+HH:MM` / `-HH:MM`.
pub fn format_offset(offset: FixedOffset) -> String {
    let total_minutes = offset.local_minus_utc() / 60;
    let sign = if total_minutes < 0 { '-' } else { '+' };
    let absolute = total_minutes.abs();
    format!("{}{:02}:{:02}", sign, absolute / 60, absolute % 60)
}

fn passthrough(raw: &str, kind: CanonicalType, representation: &str) -> String {
    debug!(kind = %kind, representation, "temporal value did not parse; passing through");
    raw.to_string()
}

fn utc_offset() -> FixedOffset {
    Utc.fix()
}

/// Only the first ten characters carry the date; anything after is ignored.
fn parse_date(raw: &str) -> Option<NaiveDate> {
    let head: String = raw.chars().take(10).collect();
    NaiveDate::parse_from_str(&head, WIRE_DATE_FORMAT).ok()
}

fn parse_time(raw: &str) -> Option<(NaiveTime, Option<FixedOffset>)> {
    let captures = TIME_PATTERN.captures(raw)?;
    let hours: u32 = captures.get(1)?.as_str().parse().ok()?;
    let minutes: u32 = captures.get(2)?.as_str().parse().ok()?;
    let seconds: u32 = captures.get(3).map_or(Some(0), |m| m.as_str().parse().ok())?;
    let nanos = captures.get(4).map_or(Some(0), |m| parse_fraction(m.as_str()))?;
    let time = NaiveTime::from_hms_nano_opt(hours, minutes, seconds, nanos)?;
    let offset = match captures.get(5) {
        Some(m) => Some(parse_offset(m.as_str())?),
        None => None,
    };
    Some((time, offset))
}

/// `".5"` → 500_000_000 nanoseconds.
fn parse_fraction(fraction: &str) -> Option<u32> {
    let digits = fraction.trim_start_matches('.');
    let padded = format!("{:0<9}", digits);
    padded.get(..9)?.parse().ok()
}

fn parse_offset(raw: &str) -> Option<FixedOffset> {
    if raw.eq_ignore_ascii_case("z") {
        return FixedOffset::east_opt(0);
    }
    let sign = match raw.as_bytes().first()? {
        b'+' => 1,
        b'-' => -1,
        _ => return None,
    };
    let digits: String = raw[1..].chars().filter(|c| c.is_ascii_digit()).collect();
    let hours: i32 = digits.get(..2)?.parse().ok()?;
    let minutes: i32 = match digits.get(2..4) {
        Some(minutes) => minutes.parse().ok()?,
        None => 0,
    };
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

fn parse_naive(raw: &str) -> Option<NaiveDateTime> {
    NAIVE_TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
}

fn split_trailing_offset(raw: &str) -> Option<(NaiveDateTime, FixedOffset)> {
    let captures = TRAILING_OFFSET_PATTERN.captures(raw)?;
    let naive = parse_naive(captures.get(1)?.as_str().trim())?;
    let offset = parse_offset(captures.get(2)?.as_str())?;
    Some((naive, offset))
}

/// A timestamp without zone; a trailing offset, if any, is dropped.
fn parse_naive_timestamp(raw: &str) -> Option<NaiveDateTime> {
    parse_naive(raw).or_else(|| split_trailing_offset(raw).map(|(naive, _)| naive))
}

/// A zoned timestamp; values without an offset are taken as UTC.
fn parse_zoned_timestamp(raw: &str) -> Option<DateTime<FixedOffset>> {
    if let Some((naive, offset)) = split_trailing_offset(raw) {
        return offset.from_local_datetime(&naive).single();
    }
    parse_naive(raw).and_then(|naive| utc_offset().from_local_datetime(&naive).single())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn codec(minutes: i32) -> ValueCodec {
        ValueCodec::with_offset_minutes(minutes)
    }

    #[test]
    fn blank_input_yields_empty_output() {
        let codec = codec(0);
        for kind in [
            CanonicalType::Date,
            CanonicalType::Time,
            CanonicalType::TimeTz,
            CanonicalType::Timestamp,
            CanonicalType::TimestampTz,
        ] {
            assert_eq!(codec.to_display("   ", kind), "");
            assert_eq!(codec.to_editable("", kind), "");
            assert_eq!(codec.from_editable(" ", kind), "");
        }
    }

    #[test]
    fn date_truncates_to_first_ten_characters() {
        let codec = codec(0);
        assert_eq!(codec.to_display("2024-03-09T00:00:00.000Z", CanonicalType::Date), "09.03.2024");
        assert_eq!(codec.to_editable("2024-03-09 12:00", CanonicalType::Date), "2024-03-09");
    }

    #[test]
    fn time_zero_fills_seconds() {
        let codec = codec(0);
        assert_eq!(codec.to_display("7:05", CanonicalType::Time), "07:05:00");
        assert_eq!(codec.from_editable("07:05", CanonicalType::Time), "07:05:00");
    }

    #[test]
    fn timetz_shifts_to_viewer_wall_time() {
        let codec = codec(180);
        assert_eq!(codec.to_display("22:30:00+00", CanonicalType::TimeTz), "01:30:00");
        assert_eq!(codec.to_editable("22:30:00Z", CanonicalType::TimeTz), "01:30:00");
        assert_eq!(codec.from_editable("01:30", CanonicalType::TimeTz), "01:30:00+03:00");
    }

    #[test]
    fn timestamp_renders_day_first() {
        let codec = codec(0);
        assert_eq!(codec.to_display("2024-01-05 10:04:09", CanonicalType::Timestamp), "05.01.2024 10:04:09");
        assert_eq!(codec.to_editable("2024-01-05 10:04:09", CanonicalType::Timestamp), "2024-01-05T10:04:09");
        assert_eq!(codec.from_editable("2024-01-05T10:04", CanonicalType::Timestamp), "2024-01-05T10:04:00");
    }

    #[test]
    fn timestamptz_appends_original_offset() {
        let codec = codec(120);
        assert_eq!(
            codec.to_display("2024-01-05T10:00:00+00:00", CanonicalType::TimestampTz),
            "05.01.2024 12:00:00 (+00:00)"
        );
        assert_eq!(codec.to_editable("2024-01-05 10:00:00-0130", CanonicalType::TimestampTz), "2024-01-05T13:30:00");
    }

    #[test]
    fn editable_round_trips_canonical_wire_values() {
        let codec = codec(180);
        let samples = [
            ("2024-02-29", CanonicalType::Date),
            ("23:59:58", CanonicalType::Time),
            ("08:15:00.250", CanonicalType::Time),
            ("08:15:00+03:00", CanonicalType::TimeTz),
            ("2024-02-29T23:59:58", CanonicalType::Timestamp),
            ("2024-02-29T23:59:58.125", CanonicalType::Timestamp),
            ("2024-02-29T23:59:58+03:00", CanonicalType::TimestampTz),
        ];
        for (raw, kind) in samples {
            let editable = codec.to_editable(raw, kind);
            assert_eq!(codec.from_editable(&editable, kind), raw, "round trip of {raw} as {kind}");
        }
    }

    #[test]
    fn foreign_offsets_round_trip_to_the_same_instant() {
        let codec = codec(180);
        let raw = "2024-06-01T21:00:00-04:00";
        let wire = codec.from_editable(&codec.to_editable(raw, CanonicalType::TimestampTz), CanonicalType::TimestampTz);

        assert_eq!(wire, "2024-06-02T04:00:00+03:00");
        assert_eq!(parse_zoned_timestamp(&wire), parse_zoned_timestamp(raw));
    }

    #[test]
    fn unparseable_values_pass_through() {
        let codec = codec(0);
        assert_eq!(codec.to_display("soon", CanonicalType::Timestamp), "soon");
        assert_eq!(codec.to_editable("25:99", CanonicalType::Time), "25:99");
        assert_eq!(codec.from_editable("yesterday", CanonicalType::TimestampTz), "yesterday");
    }

    #[test]
    fn display_value_compacts_non_scalars() {
        let codec = codec(0);
        assert_eq!(codec.display_value(&json!([1, {"a": true}]), Some(CanonicalType::Date)), r#"[1,{"a":true}]"#);
        assert_eq!(codec.display_value(&json!(42), None), "42");
        assert_eq!(codec.display_value(&json!("2024-03-09"), Some(CanonicalType::Date)), "09.03.2024");
    }

    #[test]
    fn offsets_format_with_sign_and_minutes() {
        assert_eq!(format_offset(FixedOffset::east_opt(-(5 * 3600 + 30 * 60)).expect("offset")), "-05:30");
        assert_eq!(format_offset(FixedOffset::east_opt(0).expect("offset")), "+00:00");
    }
}
