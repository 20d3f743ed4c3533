//! Dynamic SQL values.
//!
//! These are the native-side counterparts of the text-format wire values the
//! type codec registry understands.

use chrono::{FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};

/// A dynamically-typed SQL value.
///
/// This enum represents every value the text codecs can produce or consume
/// and is used for parameter binding and result decoding.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// NULL value
    Null,

    /// Boolean value
    Bool(bool),

    /// 16-bit signed integer
    SmallInt(i16),

    /// 32-bit signed integer
    Int(i32),

    /// 64-bit signed integer
    BigInt(i64),

    /// 64-bit floating point (also carries `numeric`, see the registry)
    Double(f64),

    /// Text string
    Text(String),

    /// Binary data
    Bytes(Vec<u8>),

    /// 2-D point
    Point(Point),

    /// Calendar date
    Date(NaiveDate),

    /// Time of day without zone
    Time(NaiveTime),

    /// Timestamp without zone
    Timestamp(NaiveDateTime),

    /// Timestamp with an optional explicit offset
    TimestampTz(ZonedDateTime),

    /// Calendar interval
    Interval(Interval),

    /// One-dimensional integer array
    IntArray(Vec<i64>),

    /// The `void` pseudo-type
    Void,
}

impl Value {
    /// Check if this value is NULL.
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get the type name of this value.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "BOOLEAN",
            Value::SmallInt(_) => "SMALLINT",
            Value::Int(_) => "INTEGER",
            Value::BigInt(_) => "BIGINT",
            Value::Double(_) => "DOUBLE",
            Value::Text(_) => "TEXT",
            Value::Bytes(_) => "BYTEA",
            Value::Point(_) => "POINT",
            Value::Date(_) => "DATE",
            Value::Time(_) => "TIME",
            Value::Timestamp(_) => "TIMESTAMP",
            Value::TimestampTz(_) => "TIMESTAMPTZ",
            Value::Interval(_) => "INTERVAL",
            Value::IntArray(_) => "INTEGER[]",
            Value::Void => "VOID",
        }
    }

    /// Try to convert this value to a bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Try to convert this value to an i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::SmallInt(v) => Some(i64::from(*v)),
            Value::Int(v) => Some(i64::from(*v)),
            Value::BigInt(v) => Some(*v),
            _ => None,
        }
    }

    /// Try to convert this value to an f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            Value::SmallInt(v) => Some(f64::from(*v)),
            Value::Int(v) => Some(f64::from(*v)),
            Value::BigInt(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Try to get this value as a string reference.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get this value as a byte slice.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            Value::Text(s) => Some(s.as_bytes()),
            _ => None,
        }
    }
}

/// A point in the plane, `(x,y)` on the wire.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A calendar interval split the way the wire text presents it.
///
/// Years and months are kept apart from days, and days apart from seconds,
/// because none of them convert into each other without a reference date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Interval {
    pub years: i32,
    pub months: i32,
    pub days: i32,
    pub seconds: i64,
}

impl Interval {
    pub const fn new(years: i32, months: i32, days: i32, seconds: i64) -> Self {
        Self {
            years,
            months,
            days,
            seconds,
        }
    }

    /// Build from an `H:M:S` clock component.
    pub const fn from_hms(hours: i64, minutes: i64, seconds: i64) -> Self {
        Self::new(0, 0, 0, hours * 3600 + minutes * 60 + seconds)
    }
}

/// A wall-clock timestamp with the zone it was expressed in.
///
/// `offset == None` means "local": the value carried no explicit zone and is
/// interpreted in the server session's time zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZonedDateTime {
    pub datetime: NaiveDateTime,
    pub offset: Option<FixedOffset>,
}

impl ZonedDateTime {
    /// A timestamp pinned to UTC.
    pub fn utc(datetime: NaiveDateTime) -> Self {
        Self {
            datetime,
            offset: FixedOffset::east_opt(0),
        }
    }

    /// A timestamp without an explicit zone.
    pub const fn local(datetime: NaiveDateTime) -> Self {
        Self {
            datetime,
            offset: None,
        }
    }

    /// A timestamp at a whole-hour offset east of UTC. `None` when out of range.
    pub fn with_offset_hours(datetime: NaiveDateTime, hours: i32) -> Option<Self> {
        Some(Self {
            datetime,
            offset: Some(FixedOffset::east_opt(hours * 3600)?),
        })
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::SmallInt(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::BigInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<Point> for Value {
    fn from(v: Point) -> Self {
        Value::Point(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl From<NaiveTime> for Value {
    fn from(v: NaiveTime) -> Self {
        Value::Time(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::Timestamp(v)
    }
}

impl From<ZonedDateTime> for Value {
    fn from(v: ZonedDateTime) -> Self {
        Value::TimestampTz(v)
    }
}

impl From<Interval> for Value {
    fn from(v: Interval) -> Self {
        Value::Interval(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}
