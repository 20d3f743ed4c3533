//! PostgreSQL text-format encoding (Rust → PostgreSQL).
//!
//! Every encoder produces the text the server accepts as input for the
//! matching type. Encoded text must never carry a NUL byte; values that would
//! are rejected by [`encode_value`] before anything is sent.

use chrono::{FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use pgline_core::{EncodeErrorKind, Error, Interval, Point, Result, Value, ZonedDateTime};

pub(crate) const DATE_FORMAT: &str = "%Y-%m-%d";
pub(crate) const TIME_FORMAT: &str = "%H:%M:%S";
pub(crate) const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Encode a value to PostgreSQL text format.
pub trait TextEncode {
    /// Encode to a PostgreSQL text representation.
    fn encode_text(&self) -> String;
}

// ==================== Boolean ====================

impl TextEncode for bool {
    fn encode_text(&self) -> String {
        String::from(if *self { "t" } else { "f" })
    }
}

// ==================== Numbers ====================

impl TextEncode for i16 {
    fn encode_text(&self) -> String {
        self.to_string()
    }
}

impl TextEncode for i32 {
    fn encode_text(&self) -> String {
        self.to_string()
    }
}

impl TextEncode for i64 {
    fn encode_text(&self) -> String {
        self.to_string()
    }
}

impl TextEncode for f64 {
    fn encode_text(&self) -> String {
        if self.is_nan() {
            "NaN".to_string()
        } else if self.is_infinite() {
            if self.is_sign_positive() {
                "Infinity".to_string()
            } else {
                "-Infinity".to_string()
            }
        } else {
            self.to_string()
        }
    }
}

// ==================== Strings ====================

impl TextEncode for str {
    fn encode_text(&self) -> String {
        self.to_string()
    }
}

impl TextEncode for String {
    fn encode_text(&self) -> String {
        self.clone()
    }
}

// ==================== Bytes ====================

/// Escape format: printable ASCII passes through, backslash is doubled, and
/// every other byte becomes a three-digit octal escape.
impl TextEncode for [u8] {
    fn encode_text(&self) -> String {
        let mut s = String::with_capacity(self.len());
        for &byte in self {
            match byte {
                b'\\' => s.push_str("\\\\"),
                0x20..=0x7e => s.push(char::from(byte)),
                _ => s.push_str(&format!("\\{:03o}", byte)),
            }
        }
        s
    }
}

impl TextEncode for Vec<u8> {
    fn encode_text(&self) -> String {
        self.as_slice().encode_text()
    }
}

// ==================== Geometry ====================

impl TextEncode for Point {
    fn encode_text(&self) -> String {
        format!("({},{})", self.x.encode_text(), self.y.encode_text())
    }
}

// ==================== Date/Time ====================

impl TextEncode for NaiveDate {
    fn encode_text(&self) -> String {
        self.format(DATE_FORMAT).to_string()
    }
}

/// Whole seconds only; any fraction is dropped.
impl TextEncode for NaiveTime {
    fn encode_text(&self) -> String {
        self.format(TIME_FORMAT).to_string()
    }
}

/// Whole seconds only; any fraction is dropped.
impl TextEncode for NaiveDateTime {
    fn encode_text(&self) -> String {
        self.format(TIMESTAMP_FORMAT).to_string()
    }
}

/// Calendar text plus an explicit `+HH` / `-HH` offset (`+HH:MM` for
/// fractional-hour zones). A local timestamp carries no suffix.
impl TextEncode for ZonedDateTime {
    fn encode_text(&self) -> String {
        let mut s = self.datetime.encode_text();
        if let Some(offset) = self.offset {
            s.push_str(&format_offset(offset));
        }
        s
    }
}

fn format_offset(offset: FixedOffset) -> String {
    let secs = offset.local_minus_utc();
    let sign = if secs < 0 { '-' } else { '+' };
    let abs = secs.abs();
    let (hours, minutes, seconds) = (abs / 3600, abs % 3600 / 60, abs % 60);
    match (minutes, seconds) {
        (0, 0) => format!("{}{:02}", sign, hours),
        (_, 0) => format!("{}{:02}:{:02}", sign, hours, minutes),
        _ => format!("{}{:02}:{:02}:{:02}", sign, hours, minutes, seconds),
    }
}

/// Always the long form, e.g. `1 years 2 mons 3 days 14706 seconds`. The
/// server accepts it, but prints intervals differently.
impl TextEncode for Interval {
    fn encode_text(&self) -> String {
        format!(
            "{} years {} mons {} days {} seconds",
            self.years, self.months, self.days, self.seconds
        )
    }
}

// ==================== Arrays ====================

/// `{e1,e2,...}`. Elements are joined as-is.
impl TextEncode for [i64] {
    fn encode_text(&self) -> String {
        let items: Vec<String> = self.iter().map(ToString::to_string).collect();
        format!("{{{}}}", items.join(","))
    }
}

impl TextEncode for Vec<i64> {
    fn encode_text(&self) -> String {
        self.as_slice().encode_text()
    }
}

// ==================== Void ====================

impl TextEncode for () {
    fn encode_text(&self) -> String {
        String::new()
    }
}

// ==================== Value Encoding ====================

/// Natural text form of a dynamic value, or `None` for NULL.
pub fn encode_text_value(value: &Value) -> Option<String> {
    let text = match value {
        Value::Null => return None,
        Value::Bool(v) => v.encode_text(),
        Value::SmallInt(v) => v.encode_text(),
        Value::Int(v) => v.encode_text(),
        Value::BigInt(v) => v.encode_text(),
        Value::Double(v) => v.encode_text(),
        Value::Text(v) => v.encode_text(),
        Value::Bytes(v) => v.encode_text(),
        Value::Point(v) => v.encode_text(),
        Value::Date(v) => v.encode_text(),
        Value::Time(v) => v.encode_text(),
        Value::Timestamp(v) => v.encode_text(),
        Value::TimestampTz(v) => v.encode_text(),
        Value::Interval(v) => v.encode_text(),
        Value::IntArray(v) => v.encode_text(),
        Value::Void => ().encode_text(),
    };
    Some(text)
}

/// Encode a dynamic value as a bind parameter. NULL becomes `None`.
pub fn encode_value(value: &Value) -> Result<Option<Vec<u8>>> {
    encode_text_value(value)
        .map(|text| check_nul(text).map(String::into_bytes))
        .transpose()
}

/// Reject text that would carry an embedded NUL onto the wire.
pub(crate) fn check_nul(text: String) -> Result<String> {
    if text.as_bytes().contains(&0) {
        return Err(Error::encode(
            EncodeErrorKind::EmbeddedNul,
            "encoded value contains an embedded NUL byte",
        ));
    }
    Ok(text)
}
