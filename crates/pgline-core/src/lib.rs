//! Core types for pgline.
//!
//! This crate provides the pieces shared by every layer of the client:
//!
//! - `Error` and its families (server rejections vs. protocol/transport
//!   failures vs. local validation failures)
//! - `Value`, the dynamic value the text codecs convert to and from
//! - Calendar and geometric helpers (`Interval`, `Point`, `ZonedDateTime`)

pub mod error;
pub mod value;

pub use error::{
    ConfigError, ConnectionError, ConnectionErrorKind, EncodeError, EncodeErrorKind, Error,
    ProtocolError, Result, ServerError, ServerErrorKind, TypeError,
};
pub use value::{Interval, Point, Value, ZonedDateTime};
