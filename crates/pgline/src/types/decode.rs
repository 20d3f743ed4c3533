//! PostgreSQL text-format decoding (PostgreSQL → Rust).
//!
//! Decoders accept exactly what the server prints for each type and fail on
//! anything else; they never truncate silently. Time and timestamp text may
//! carry a fractional-seconds suffix, which is dropped.

use std::sync::OnceLock;

use chrono::{FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use pgline_core::{Error, Interval, Point, Result, TypeError, ZonedDateTime};
use regex::Regex;

use super::encode::{DATE_FORMAT, TIME_FORMAT, TIMESTAMP_FORMAT};

/// Decode a value from PostgreSQL text format.
pub trait TextDecode: Sized {
    /// Decode from a PostgreSQL text representation.
    fn decode_text(s: &str) -> Result<Self>;
}

// ==================== Boolean ====================

impl TextDecode for bool {
    fn decode_text(s: &str) -> Result<Self> {
        match s {
            "t" | "true" | "TRUE" | "1" | "y" | "yes" | "on" => Ok(true),
            "f" | "false" | "FALSE" | "0" | "n" | "no" | "off" => Ok(false),
            _ => Err(type_error("bool", s)),
        }
    }
}

// ==================== Numbers ====================

impl TextDecode for i16 {
    fn decode_text(s: &str) -> Result<Self> {
        s.parse().map_err(|_| type_error("int2", s))
    }
}

impl TextDecode for i32 {
    fn decode_text(s: &str) -> Result<Self> {
        s.parse().map_err(|_| type_error("int4", s))
    }
}

impl TextDecode for i64 {
    fn decode_text(s: &str) -> Result<Self> {
        s.parse().map_err(|_| type_error("int8", s))
    }
}

impl TextDecode for f64 {
    fn decode_text(s: &str) -> Result<Self> {
        match s {
            "NaN" => Ok(f64::NAN),
            "Infinity" => Ok(f64::INFINITY),
            "-Infinity" => Ok(f64::NEG_INFINITY),
            _ => s.parse().map_err(|_| type_error("float8", s)),
        }
    }
}

// ==================== Strings ====================

impl TextDecode for String {
    fn decode_text(s: &str) -> Result<Self> {
        Ok(s.to_string())
    }
}

// ==================== Bytes ====================

/// Accepts both output styles: `\x` hex and the octal escape format.
impl TextDecode for Vec<u8> {
    fn decode_text(s: &str) -> Result<Self> {
        if let Some(hex) = s.strip_prefix("\\x") {
            return decode_hex(hex).ok_or_else(|| type_error("bytea", s));
        }
        decode_escape(s).ok_or_else(|| type_error("bytea", s))
    }
}

fn decode_hex(hex: &str) -> Option<Vec<u8>> {
    let bytes = hex.as_bytes();
    if bytes.len() % 2 != 0 {
        return None;
    }
    bytes
        .chunks(2)
        .map(|pair| {
            let hi = char::from(pair[0]).to_digit(16)?;
            let lo = char::from(pair[1]).to_digit(16)?;
            u8::try_from(hi * 16 + lo).ok()
        })
        .collect()
}

fn decode_escape(s: &str) -> Option<Vec<u8>> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'\\' {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        match bytes.get(i + 1..i + 4) {
            _ if bytes.get(i + 1) == Some(&b'\\') => {
                out.push(b'\\');
                i += 2;
            }
            Some(digits) if digits.iter().all(|d| (b'0'..=b'7').contains(d)) => {
                let value = digits
                    .iter()
                    .fold(0_u32, |acc, d| acc * 8 + u32::from(d - b'0'));
                out.push(u8::try_from(value).ok()?);
                i += 4;
            }
            _ => return None,
        }
    }
    Some(out)
}

// ==================== Geometry ====================

impl TextDecode for Point {
    fn decode_text(s: &str) -> Result<Self> {
        let inner = s
            .trim()
            .strip_prefix('(')
            .and_then(|rest| rest.strip_suffix(')'))
            .ok_or_else(|| type_error("point", s))?;
        let (x, y) = inner.split_once(',').ok_or_else(|| type_error("point", s))?;
        let x = f64::decode_text(x.trim()).map_err(|_| type_error("point", s))?;
        let y = f64::decode_text(y.trim()).map_err(|_| type_error("point", s))?;
        Ok(Point::new(x, y))
    }
}

// ==================== Date/Time ====================

impl TextDecode for NaiveDate {
    fn decode_text(s: &str) -> Result<Self> {
        NaiveDate::parse_from_str(s, DATE_FORMAT).map_err(|_| type_error("date", s))
    }
}

impl TextDecode for NaiveTime {
    fn decode_text(s: &str) -> Result<Self> {
        NaiveTime::parse_from_str(strip_fraction(s), TIME_FORMAT).map_err(|_| type_error("time", s))
    }
}

impl TextDecode for NaiveDateTime {
    fn decode_text(s: &str) -> Result<Self> {
        NaiveDateTime::parse_from_str(strip_fraction(s), TIMESTAMP_FORMAT)
            .map_err(|_| type_error("timestamp", s))
    }
}

/// A trailing `+HH[:MM[:SS]]` / `-HH[...]` zone is split off first; without
/// one the timestamp is local.
impl TextDecode for ZonedDateTime {
    fn decode_text(s: &str) -> Result<Self> {
        let (body, zone) = split_zone(s);
        let datetime = NaiveDateTime::parse_from_str(strip_fraction(body), TIMESTAMP_FORMAT)
            .map_err(|_| type_error("timestamptz", s))?;
        let offset = match zone {
            Some(zone) => Some(parse_offset(zone).ok_or_else(|| type_error("timestamptz", s))?),
            None => None,
        };
        Ok(ZonedDateTime { datetime, offset })
    }
}

/// Drop a `.ffffff` fractional-seconds suffix.
fn strip_fraction(s: &str) -> &str {
    s.find('.').map_or(s, |dot| &s[..dot])
}

/// Split `2024-01-02 03:04:05.6+02` into the calendar part and the zone.
fn split_zone(s: &str) -> (&str, Option<&str>) {
    let Some(space) = s.find(' ') else {
        return (s, None);
    };
    match s[space..].rfind(['+', '-']) {
        Some(at) => (&s[..space + at], Some(&s[space + at..])),
        None => (s, None),
    }
}

fn parse_offset(zone: &str) -> Option<FixedOffset> {
    let (sign, rest) = match zone.as_bytes().first()? {
        b'+' => (1, &zone[1..]),
        b'-' => (-1, &zone[1..]),
        _ => return None,
    };
    let mut secs = 0_i32;
    let mut parts = 0;
    for (part, scale) in rest.split(':').zip([3600, 60, 1]) {
        if part.len() != 2 {
            return None;
        }
        secs += part.parse::<i32>().ok()? * scale;
        parts += 1;
    }
    if parts == 0 || rest.split(':').count() > 3 {
        return None;
    }
    FixedOffset::east_opt(sign * secs)
}

// ==================== Interval ====================

fn interval_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?P<sign>[+-])?(?P<h>\d+):(?P<m>\d{2}):(?P<s>\d{2})(?:\.\d+)?|(?P<num>[+-]?\d+)\s+(?P<unit>[A-Za-z]+)",
        )
        .ok()
    })
    .as_ref()
}

/// Accepts the server's default output (`1 year 2 mons 3 days 04:05:06`,
/// `-1 days +02:03:00.5`) and the long form this crate encodes
/// (`1 years 2 mons 3 days 14706 seconds`). Fractional seconds are dropped.
impl TextDecode for Interval {
    fn decode_text(s: &str) -> Result<Self> {
        let fail = || type_error("interval", s);
        let re = interval_regex().ok_or_else(fail)?;

        let mut iv = Interval::default();
        let mut end = 0;
        let mut parts = 0;
        for caps in re.captures_iter(s) {
            let Some(whole) = caps.get(0) else { continue };
            if !s[end..whole.start()].trim().is_empty() {
                return Err(fail());
            }
            end = whole.end();
            parts += 1;

            if let (Some(h), Some(m), Some(sec)) = (caps.name("h"), caps.name("m"), caps.name("s"))
            {
                let sign = if caps.name("sign").is_some_and(|c| c.as_str() == "-") {
                    -1
                } else {
                    1
                };
                for (part, scale) in [(h, 3600), (m, 60), (sec, 1)] {
                    add_seconds(&mut iv.seconds, parse_i64(part.as_str())?, sign * scale)
                        .ok_or_else(fail)?;
                }
                continue;
            }

            let (Some(num), Some(unit)) = (caps.name("num"), caps.name("unit")) else {
                return Err(fail());
            };
            let n = parse_i64(num.as_str())?;
            match unit.as_str() {
                "year" | "years" => add_field(&mut iv.years, n).ok_or_else(fail)?,
                "mon" | "mons" | "month" | "months" => {
                    add_field(&mut iv.months, n).ok_or_else(fail)?;
                }
                "day" | "days" => add_field(&mut iv.days, n).ok_or_else(fail)?,
                "hour" | "hours" => add_seconds(&mut iv.seconds, n, 3600).ok_or_else(fail)?,
                "min" | "mins" | "minute" | "minutes" => {
                    add_seconds(&mut iv.seconds, n, 60).ok_or_else(fail)?;
                }
                "sec" | "secs" | "second" | "seconds" => {
                    add_seconds(&mut iv.seconds, n, 1).ok_or_else(fail)?;
                }
                _ => return Err(fail()),
            }
        }

        if parts == 0 || !s[end..].trim().is_empty() {
            return Err(fail());
        }
        Ok(iv)
    }
}

fn parse_i64(s: &str) -> Result<i64> {
    s.parse().map_err(|_| type_error("interval", s))
}

fn add_seconds(total: &mut i64, n: i64, scale: i64) -> Option<()> {
    *total = total.checked_add(n.checked_mul(scale)?)?;
    Some(())
}

fn add_field(field: &mut i32, n: i64) -> Option<()> {
    *field = field.checked_add(i32::try_from(n).ok()?)?;
    Some(())
}

// ==================== Arrays ====================

/// One-dimensional `{e1,e2,...}` of non-null integers.
impl TextDecode for Vec<i64> {
    fn decode_text(s: &str) -> Result<Self> {
        let inner = s
            .trim()
            .strip_prefix('{')
            .and_then(|rest| rest.strip_suffix('}'))
            .ok_or_else(|| type_error("integer array", s))?;
        if inner.trim().is_empty() {
            return Ok(Vec::new());
        }
        inner
            .split(',')
            .map(|item| item.trim().parse().map_err(|_| type_error("integer array", s)))
            .collect()
    }
}

// ==================== Void ====================

impl TextDecode for () {
    fn decode_text(_s: &str) -> Result<Self> {
        Ok(())
    }
}

// ==================== Helper Functions ====================

pub(crate) fn type_error(expected: &'static str, actual: &str) -> Error {
    let shown: String = actual.chars().take(64).collect();
    Error::Type(TypeError {
        expected,
        actual: format!("'{}'", shown),
        oid: None,
        column: None,
    })
}
