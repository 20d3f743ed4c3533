//! PostgreSQL type system and text-format conversion.
//!
//! This module provides:
//! - OID constants for the built-in types the client understands
//! - [`TextEncode`] / [`TextDecode`] for native Rust types
//! - [`TypeRegistry`], a static OID → codec table used to encode parameters
//!   and decode result rows as [`Value`]s
//!
//! # Example
//!
//! ```rust,ignore
//! use pgline::types::{TypeRegistry, oid};
//!
//! let value = TypeRegistry::global().decode(oid::INT4, "42")?;
//! assert_eq!(value, Value::Int(42));
//! ```

pub mod decode;
pub mod encode;
pub mod oid;

use std::collections::HashMap;
use std::sync::OnceLock;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use pgline_core::{
    ConfigError, EncodeErrorKind, Error, Interval, Point, Result, TypeError, Value, ZonedDateTime,
};

use crate::protocol::{FieldDescription, RawRow};

pub use decode::TextDecode;
pub use encode::{TextEncode, encode_text_value, encode_value};

/// Converts one server type between its wire text and a [`Value`].
#[derive(Debug, Clone, Copy)]
pub struct TypeCodec {
    /// The type's OID
    pub oid: u32,
    /// Canonical type name (e.g., "int4", "timestamptz")
    pub name: &'static str,
    /// Native value → wire text. Must not emit a NUL byte.
    pub encode: fn(&Value) -> Result<String>,
    /// Wire text → native value. Fails on malformed text.
    pub decode: fn(&str) -> Result<Value>,
}

impl TypeCodec {
    pub const fn new(
        oid: u32,
        name: &'static str,
        encode: fn(&Value) -> Result<String>,
        decode: fn(&str) -> Result<Value>,
    ) -> Self {
        Self {
            oid,
            name,
            encode,
            decode,
        }
    }
}

/// Registry of text codecs keyed by OID.
///
/// Entries are only ever added; registering an OID twice is an error.
#[derive(Debug)]
pub struct TypeRegistry {
    by_oid: HashMap<u32, TypeCodec>,
    by_name: HashMap<&'static str, u32>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    /// Create a registry holding every built-in codec.
    pub fn new() -> Self {
        let mut registry = Self {
            by_oid: HashMap::new(),
            by_name: HashMap::new(),
        };
        for codec in BUILTINS {
            registry.by_name.insert(codec.name, codec.oid);
            registry.by_oid.insert(codec.oid, *codec);
        }
        registry
    }

    /// The process-wide registry of built-in codecs.
    pub fn global() -> &'static TypeRegistry {
        static REGISTRY: OnceLock<TypeRegistry> = OnceLock::new();
        REGISTRY.get_or_init(TypeRegistry::new)
    }

    /// Look up a codec by OID.
    pub fn get(&self, oid: u32) -> Option<&TypeCodec> {
        self.by_oid.get(&oid)
    }

    /// Look up a codec by canonical name.
    pub fn by_name(&self, name: &str) -> Option<&TypeCodec> {
        self.by_name.get(name).and_then(|oid| self.by_oid.get(oid))
    }

    /// Canonical name for an OID.
    pub fn type_name(&self, oid: u32) -> Option<&'static str> {
        self.get(oid).map(|c| c.name)
    }

    /// Add a codec for a type the built-ins do not cover.
    pub fn register(&mut self, codec: TypeCodec) -> Result<()> {
        if let Some(existing) = self.by_oid.get(&codec.oid) {
            return Err(Error::Config(ConfigError {
                message: format!(
                    "type OID {} is already registered as {}",
                    codec.oid, existing.name
                ),
                source: None,
            }));
        }
        self.by_name.insert(codec.name, codec.oid);
        self.by_oid.insert(codec.oid, codec);
        Ok(())
    }

    /// Encode a value as the wire text of type `oid`. NULL becomes `None`.
    pub fn encode(&self, oid: u32, value: &Value) -> Result<Option<Vec<u8>>> {
        if value.is_null() {
            return Ok(None);
        }
        let codec = self.get(oid).ok_or_else(|| unknown_oid(oid))?;
        let text = (codec.encode)(value)?;
        encode::check_nul(text).map(|t| Some(t.into_bytes()))
    }

    /// Decode wire text of type `oid`.
    pub fn decode(&self, oid: u32, text: &str) -> Result<Value> {
        let codec = self.get(oid).ok_or_else(|| unknown_oid(oid))?;
        (codec.decode)(text).map_err(|e| match e {
            Error::Type(mut te) => {
                te.oid = Some(oid);
                Error::Type(te)
            }
            other => other,
        })
    }

    /// Encode bind parameters against the types a statement described.
    ///
    /// Values past the end of `oids` use their natural encoding.
    pub fn encode_params(&self, oids: &[u32], values: &[Value]) -> Result<Vec<Option<Vec<u8>>>> {
        values
            .iter()
            .enumerate()
            .map(|(i, value)| match oids.get(i) {
                Some(&oid) => self.encode(oid, value),
                None => encode_value(value),
            })
            .collect()
    }

    /// Decode one result row using the column types of its RowDescription.
    pub fn decode_row(&self, fields: &[FieldDescription], row: &RawRow) -> Result<Vec<Value>> {
        if fields.len() != row.len() {
            return Err(Error::protocol(format!(
                "row has {} fields but the description has {}",
                row.len(),
                fields.len()
            )));
        }
        fields
            .iter()
            .zip(row)
            .map(|(field, raw)| {
                let Some(bytes) = raw else {
                    return Ok(Value::Null);
                };
                let text = std::str::from_utf8(bytes).map_err(|_| {
                    Error::Type(TypeError {
                        expected: "UTF-8 text",
                        actual: format!("{} bytes", bytes.len()),
                        oid: Some(field.type_oid),
                        column: Some(field.name.clone()),
                    })
                })?;
                self.decode(field.type_oid, text).map_err(|e| match e {
                    Error::Type(mut te) => {
                        te.column = Some(field.name.clone());
                        Error::Type(te)
                    }
                    other => other,
                })
            })
            .collect()
    }
}

/// Encode parameters in their natural text form, without a type lookup.
pub fn encode_params(values: &[Value]) -> Result<Vec<Option<Vec<u8>>>> {
    values.iter().map(encode_value).collect()
}

/// Decode a result row through the global registry.
pub fn decode_row(fields: &[FieldDescription], row: &RawRow) -> Result<Vec<Value>> {
    TypeRegistry::global().decode_row(fields, row)
}

// ==================== Built-in Codecs ====================

static BUILTINS: &[TypeCodec] = &[
    TypeCodec::new(oid::BOOL, "bool", enc_bool, |s| bool::decode_text(s).map(Value::Bool)),
    TypeCodec::new(oid::BYTEA, "bytea", enc_bytea, |s| {
        Vec::<u8>::decode_text(s).map(Value::Bytes)
    }),
    TypeCodec::new(oid::CHAR, "char", enc_text, dec_text),
    TypeCodec::new(oid::NAME, "name", enc_text, dec_text),
    TypeCodec::new(oid::INT8, "int8", enc_int8, |s| i64::decode_text(s).map(Value::BigInt)),
    TypeCodec::new(oid::INT2, "int2", enc_int2, |s| {
        i16::decode_text(s).map(Value::SmallInt)
    }),
    TypeCodec::new(oid::INT4, "int4", enc_int4, |s| i32::decode_text(s).map(Value::Int)),
    TypeCodec::new(oid::TEXT, "text", enc_text, dec_text),
    TypeCodec::new(oid::OID, "oid", enc_int8, |s| i64::decode_text(s).map(Value::BigInt)),
    TypeCodec::new(oid::POINT, "point", enc_point, |s| {
        Point::decode_text(s).map(Value::Point)
    }),
    TypeCodec::new(oid::FLOAT4, "float4", enc_float, dec_float),
    TypeCodec::new(oid::FLOAT8, "float8", enc_float, dec_float),
    TypeCodec::new(oid::UNKNOWN, "unknown", enc_text, dec_text),
    TypeCodec::new(oid::BPCHAR, "bpchar", enc_text, dec_text),
    TypeCodec::new(oid::VARCHAR, "varchar", enc_text, dec_text),
    TypeCodec::new(oid::DATE, "date", enc_date, |s| {
        NaiveDate::decode_text(s).map(Value::Date)
    }),
    TypeCodec::new(oid::TIME, "time", enc_time, |s| {
        NaiveTime::decode_text(s).map(Value::Time)
    }),
    TypeCodec::new(oid::TIMESTAMP, "timestamp", enc_timestamp, |s| {
        NaiveDateTime::decode_text(s).map(Value::Timestamp)
    }),
    TypeCodec::new(oid::TIMESTAMPTZ, "timestamptz", enc_timestamptz, |s| {
        ZonedDateTime::decode_text(s).map(Value::TimestampTz)
    }),
    TypeCodec::new(oid::INTERVAL, "interval", enc_interval, |s| {
        Interval::decode_text(s).map(Value::Interval)
    }),
    // numeric is carried as a float regardless of precision and scale
    TypeCodec::new(oid::NUMERIC, "numeric", enc_float, dec_float),
    TypeCodec::new(oid::INT2_ARRAY, "_int2", enc_int_array, dec_int_array),
    TypeCodec::new(oid::INT4_ARRAY, "_int4", enc_int_array, dec_int_array),
    TypeCodec::new(oid::INT8_ARRAY, "_int8", enc_int_array, dec_int_array),
    TypeCodec::new(oid::VOID, "void", enc_void, |s| <()>::decode_text(s).map(|()| Value::Void)),
];

fn enc_bool(value: &Value) -> Result<String> {
    match value {
        Value::Bool(v) => Ok(v.encode_text()),
        other => Err(mismatch("bool", other)),
    }
}

fn enc_int2(value: &Value) -> Result<String> {
    let v = as_int("int2", value)?;
    i16::try_from(v)
        .map(|v| v.encode_text())
        .map_err(|_| out_of_range("int2", v))
}

fn enc_int4(value: &Value) -> Result<String> {
    let v = as_int("int4", value)?;
    i32::try_from(v)
        .map(|v| v.encode_text())
        .map_err(|_| out_of_range("int4", v))
}

fn enc_int8(value: &Value) -> Result<String> {
    as_int("int8", value).map(|v| v.encode_text())
}

fn enc_float(value: &Value) -> Result<String> {
    value
        .as_f64()
        .map(|v| v.encode_text())
        .ok_or_else(|| mismatch("float8", value))
}

fn dec_float(s: &str) -> Result<Value> {
    f64::decode_text(s).map(Value::Double)
}

/// Text columns take any value in its natural form.
fn enc_text(value: &Value) -> Result<String> {
    encode_text_value(value).ok_or_else(|| mismatch("text", value))
}

fn dec_text(s: &str) -> Result<Value> {
    Ok(Value::Text(s.to_string()))
}

fn enc_bytea(value: &Value) -> Result<String> {
    match value {
        Value::Bytes(v) => Ok(v.encode_text()),
        Value::Text(v) => Ok(v.as_bytes().encode_text()),
        other => Err(mismatch("bytea", other)),
    }
}

fn enc_point(value: &Value) -> Result<String> {
    match value {
        Value::Point(v) => Ok(v.encode_text()),
        other => Err(mismatch("point", other)),
    }
}

fn enc_date(value: &Value) -> Result<String> {
    match value {
        Value::Date(v) => Ok(v.encode_text()),
        Value::Timestamp(v) => Ok(v.date().encode_text()),
        other => Err(mismatch("date", other)),
    }
}

fn enc_time(value: &Value) -> Result<String> {
    match value {
        Value::Time(v) => Ok(v.encode_text()),
        other => Err(mismatch("time", other)),
    }
}

fn enc_timestamp(value: &Value) -> Result<String> {
    match value {
        Value::Timestamp(v) => Ok(v.encode_text()),
        Value::TimestampTz(v) => Ok(v.datetime.encode_text()),
        other => Err(mismatch("timestamp", other)),
    }
}

fn enc_timestamptz(value: &Value) -> Result<String> {
    match value {
        Value::TimestampTz(v) => Ok(v.encode_text()),
        Value::Timestamp(v) => Ok(ZonedDateTime::local(*v).encode_text()),
        other => Err(mismatch("timestamptz", other)),
    }
}

fn enc_interval(value: &Value) -> Result<String> {
    match value {
        Value::Interval(v) => Ok(v.encode_text()),
        other => Err(mismatch("interval", other)),
    }
}

fn enc_int_array(value: &Value) -> Result<String> {
    match value {
        Value::IntArray(v) => Ok(v.encode_text()),
        other => Err(mismatch("integer array", other)),
    }
}

fn dec_int_array(s: &str) -> Result<Value> {
    Vec::<i64>::decode_text(s).map(Value::IntArray)
}

fn enc_void(value: &Value) -> Result<String> {
    match value {
        Value::Void => Ok(().encode_text()),
        other => Err(mismatch("void", other)),
    }
}

// ==================== Helper Functions ====================

fn as_int(target: &str, value: &Value) -> Result<i64> {
    value.as_i64().ok_or_else(|| mismatch(target, value))
}

fn mismatch(target: &str, value: &Value) -> Error {
    Error::encode(
        EncodeErrorKind::TypeMismatch,
        format!("cannot encode {} as {}", value.type_name(), target),
    )
}

fn out_of_range(target: &str, v: i64) -> Error {
    Error::encode(
        EncodeErrorKind::OutOfRange,
        format!("{} is out of range for {}", v, target),
    )
}

fn unknown_oid(oid: u32) -> Error {
    Error::Type(TypeError {
        expected: "a registered type",
        actual: format!("unknown type OID {}", oid),
        oid: Some(oid),
        column: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str, type_oid: u32) -> FieldDescription {
        FieldDescription {
            name: name.to_string(),
            table_oid: None,
            column_id: None,
            type_oid,
            type_size: -1,
            type_modifier: -1,
        }
    }

    #[test]
    fn test_builtin_lookup() {
        let registry = TypeRegistry::global();
        assert_eq!(registry.type_name(oid::INT4), Some("int4"));
        assert_eq!(registry.by_name("timestamptz").map(|c| c.oid), Some(oid::TIMESTAMPTZ));
        assert_eq!(registry.type_name(oid::NUMERIC), Some("numeric"));
        assert!(registry.get(3802).is_none());
    }

    #[test]
    fn test_register_rejects_duplicate() {
        let mut registry = TypeRegistry::new();
        let citext = TypeCodec::new(90_001, "citext", enc_text, dec_text);
        registry.register(citext).unwrap();
        assert_eq!(registry.decode(90_001, "Hi").unwrap(), Value::Text("Hi".into()));
        let err = registry.register(TypeCodec::new(oid::INT4, "int", enc_text, dec_text));
        assert!(matches!(err, Err(Error::Config(_))));
        assert_eq!(registry.type_name(oid::INT4), Some("int4"));
    }

    #[test]
    fn test_unknown_oid_is_named() {
        let err = TypeRegistry::global().decode(3802, "{}").unwrap_err();
        assert!(err.to_string().contains("3802"));
        let err = TypeRegistry::global()
            .encode(3802, &Value::Int(1))
            .unwrap_err();
        assert!(matches!(err, Error::Type(ref t) if t.oid == Some(3802)));
    }

    #[test]
    fn test_encode_checks_range_and_type() {
        let registry = TypeRegistry::global();
        assert_eq!(
            registry.encode(oid::INT2, &Value::BigInt(7)).unwrap(),
            Some(b"7".to_vec())
        );
        let err = registry.encode(oid::INT2, &Value::Int(40_000)).unwrap_err();
        assert!(matches!(err, Error::Encode(ref e) if e.kind == EncodeErrorKind::OutOfRange));
        let err = registry.encode(oid::BOOL, &Value::Int(1)).unwrap_err();
        assert!(matches!(err, Error::Encode(ref e) if e.kind == EncodeErrorKind::TypeMismatch));
        let err = registry.encode(oid::TEXT, &Value::Text("a\0".into())).unwrap_err();
        assert!(matches!(err, Error::Encode(ref e) if e.kind == EncodeErrorKind::EmbeddedNul));
        assert_eq!(registry.encode(oid::INT4, &Value::Null).unwrap(), None);
    }

    #[test]
    fn test_numeric_decodes_as_float() {
        let value = TypeRegistry::global().decode(oid::NUMERIC, "12.50").unwrap();
        assert_eq!(value, Value::Double(12.5));
    }

    #[test]
    fn test_decode_error_carries_oid() {
        let err = TypeRegistry::global().decode(oid::INT4, "x").unwrap_err();
        assert!(matches!(err, Error::Type(ref t) if t.oid == Some(oid::INT4)));
    }

    #[test]
    fn test_interval_round_trip_is_not_byte_identical() {
        let registry = TypeRegistry::global();
        let value = registry
            .decode(oid::INTERVAL, "1 years 2 mons 3 days 04:05:06")
            .unwrap();
        assert_eq!(value, Value::Interval(Interval::new(1, 2, 3, 14_706)));
        // same interval, different spelling than the server's output
        assert_eq!(
            registry.encode(oid::INTERVAL, &value).unwrap(),
            Some(b"1 years 2 mons 3 days 14706 seconds".to_vec())
        );
    }

    #[test]
    fn test_int_array_round_trip() {
        let registry = TypeRegistry::global();
        let value = registry.decode(oid::INT4_ARRAY, "{1,2,3}").unwrap();
        assert_eq!(value, Value::IntArray(vec![1, 2, 3]));
        assert_eq!(
            registry.encode(oid::INT4_ARRAY, &value).unwrap(),
            Some(b"{1,2,3}".to_vec())
        );
    }

    #[test]
    fn test_temporal_round_trip() {
        let registry = TypeRegistry::global();
        for (type_oid, text) in [
            (oid::DATE, "2024-02-29"),
            (oid::TIME, "13:04:05"),
            (oid::TIMESTAMP, "2024-02-29 13:04:05"),
            (oid::TIMESTAMPTZ, "2024-02-29 13:04:05+05:30"),
            (oid::TIMESTAMPTZ, "2024-02-29 13:04:05"),
            (oid::POINT, "(1.5,-2)"),
            (oid::BYTEA, "a\\\\b\\000"),
        ] {
            let value = registry.decode(type_oid, text).unwrap();
            let encoded = registry.encode(type_oid, &value).unwrap().unwrap();
            assert_eq!(String::from_utf8(encoded).unwrap(), text);
        }
    }

    #[test]
    fn test_decode_row() {
        let fields = [field("id", oid::INT8), field("name", oid::TEXT), field("ok", oid::BOOL)];
        let row: RawRow = vec![Some(b"42".to_vec()), None, Some(b"t".to_vec())];
        assert_eq!(
            decode_row(&fields, &row).unwrap(),
            vec![Value::BigInt(42), Value::Null, Value::Bool(true)]
        );

        let row: RawRow = vec![Some(b"x".to_vec()), None, None];
        let err = decode_row(&fields, &row).unwrap_err();
        assert!(matches!(err, Error::Type(ref t) if t.column.as_deref() == Some("id")));

        let err = decode_row(&fields, &vec![None]).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_encode_params() {
        let params = encode_params(&[Value::Int(1), Value::Null, Value::Text("x".into())]).unwrap();
        assert_eq!(params, vec![Some(b"1".to_vec()), None, Some(b"x".to_vec())]);

        let typed = TypeRegistry::global()
            .encode_params(&[oid::INT2], &[Value::BigInt(3), Value::Bool(true)])
            .unwrap();
        assert_eq!(typed, vec![Some(b"3".to_vec()), Some(b"t".to_vec())]);
    }
}
