//! Synchronous PostgreSQL client.
//!
//! `pgline` speaks the PostgreSQL frontend/backend protocol (version 3.0)
//! directly over a blocking byte stream. It provides:
//!
//! - Message framing and parsing
//! - Authentication (trust, cleartext, MD5)
//! - The extended query protocol: prepare, bind/execute, describe, close
//! - Text-format conversion between PostgreSQL and Rust types
//! - Optional per-operation timing records
//!
//! Every operation writes its whole request, flushes, and reads its whole
//! reply before returning. A connection has one owner at a time.
//!
//! # Type System
//!
//! The `types` module maps built-in type OIDs to text codecs:
//!
//! - OID constants for the supported built-in types
//! - `TextEncode` / `TextDecode` for native Rust types
//! - `TypeRegistry` for runtime lookup by OID or name
//!
//! # Example
//!
//! ```rust,ignore
//! use pgline::{PgConfig, PgConnection, Value};
//!
//! let config = PgConfig::from_env()?.host("localhost").database("mydb");
//! let mut conn = PgConnection::connect(config)?;
//!
//! conn.prepare("", "select $1::int4 + 1", &[])?;
//! let rows = conn.execute("", "", &[Some(b"41".to_vec())])?;
//! assert_eq!(rows, vec![vec![Some(b"42".to_vec())]]);
//!
//! let rows = conn.query("select now() - $1::timestamptz", &[Value::Null])?;
//! conn.close()?;
//! ```

pub mod auth;
pub mod config;
pub mod connection;
pub mod profile;
pub mod protocol;
pub mod query;
pub mod stream;
pub mod types;

pub use config::{PgConfig, Verbosity};
pub use connection::{ConnectionState, PgConnection};
pub use protocol::{FieldDescription, RawRow, TransactionStatus};
pub use query::StatementDescription;
pub use stream::{PgAddress, PgStream};
pub use types::{TypeCodec, TypeRegistry};

pub use pgline_core::{
    ConfigError, ConnectionError, ConnectionErrorKind, EncodeError, EncodeErrorKind, Error,
    Interval, Point, ProtocolError, Result, ServerError, ServerErrorKind, TypeError, Value,
    ZonedDateTime,
};
