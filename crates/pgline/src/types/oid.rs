//! PostgreSQL type Object IDs (OIDs).
//!
//! PostgreSQL identifies types by numeric OIDs. These are the built-in types
//! the text codec registry knows about.

/// Boolean type
pub const BOOL: u32 = 16;

/// Byte array (bytea)
pub const BYTEA: u32 = 17;

/// Single character (char)
pub const CHAR: u32 = 18;

/// Name type (internal, 63-byte identifier)
pub const NAME: u32 = 19;

/// 8-byte signed integer (int8/bigint)
pub const INT8: u32 = 20;

/// 2-byte signed integer (int2/smallint)
pub const INT2: u32 = 21;

/// 4-byte signed integer (int4/integer)
pub const INT4: u32 = 23;

/// Variable-length text (text)
pub const TEXT: u32 = 25;

/// Object identifier (oid)
pub const OID: u32 = 26;

/// Geometric point
pub const POINT: u32 = 600;

/// Single-precision floating point (float4/real)
pub const FLOAT4: u32 = 700;

/// Double-precision floating point (float8/double precision)
pub const FLOAT8: u32 = 701;

/// Untyped literal
pub const UNKNOWN: u32 = 705;

/// Blank-padded char (bpchar)
pub const BPCHAR: u32 = 1042;

/// Variable-length char (varchar)
pub const VARCHAR: u32 = 1043;

/// Calendar date
pub const DATE: u32 = 1082;

/// Time of day without zone
pub const TIME: u32 = 1083;

/// Timestamp without zone
pub const TIMESTAMP: u32 = 1114;

/// Timestamp with zone
pub const TIMESTAMPTZ: u32 = 1184;

/// Time interval
pub const INTERVAL: u32 = 1186;

/// Arbitrary precision numeric
pub const NUMERIC: u32 = 1700;

/// int2[]
pub const INT2_ARRAY: u32 = 1005;

/// int4[]
pub const INT4_ARRAY: u32 = 1007;

/// int8[]
pub const INT8_ARRAY: u32 = 1016;

/// The `void` pseudo-type
pub const VOID: u32 = 2278;
