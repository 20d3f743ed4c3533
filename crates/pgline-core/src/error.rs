//! Error types for pgline operations.
//!
//! Errors fall into two families. Server rejections (`Error::Server`) and
//! local validation failures (`Error::Encode`, `Error::Type`) leave the
//! connection usable. Framing, transport and protocol failures
//! (`Error::Protocol`, `Error::Connection`, `Error::Io`) mean the byte stream
//! may be mid-frame and the connection should be closed.

use std::fmt;

/// The primary error type for all pgline operations.
#[derive(Debug)]
pub enum Error {
    /// Connection-related errors (resolve, connect, authenticate, disconnect)
    Connection(ConnectionError),
    /// An `ErrorResponse` sent by the server
    Server(ServerError),
    /// Type conversion errors (decode failure, unknown OID)
    Type(TypeError),
    /// Protocol errors (framing, unexpected messages)
    Protocol(ProtocolError),
    /// Invalid caller input rejected before anything was sent
    Encode(EncodeError),
    /// Configuration errors
    Config(ConfigError),
    /// I/O errors
    Io(std::io::Error),
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to establish connection
    Connect,
    /// Connection refused by the peer
    Refused,
    /// Host name did not resolve to a usable address
    DnsResolution,
    /// Server asked for an authentication method we do not implement
    UnsupportedAuth,
    /// Connection lost during operation
    Disconnected,
    /// Operation attempted on a closed connection
    Closed,
    /// Operation attempted after a framing or protocol failure
    Broken,
}

/// A server `ErrorResponse`, keeping every field in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    fields: Vec<(u8, String)>,
}

/// Coarse classification of a server error, derived from its SQLSTATE class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerErrorKind {
    /// Class 42: syntax error or access rule violation
    Syntax,
    /// Class 23: integrity constraint violation
    Constraint,
    /// 40001: serialization failure
    Serialization,
    /// Class 40 other than 40001
    Deadlock,
    /// 57014: query canceled
    Cancelled,
    /// Class 57 other than 57014
    Timeout,
    /// Class 28: invalid authorization specification
    Authentication,
    /// Class 08: connection exception
    Connection,
    /// Anything else
    Other,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub oid: Option<u32>,
    pub column: Option<String>,
}

#[derive(Debug)]
pub struct ProtocolError {
    pub message: String,
    pub raw_data: Option<Vec<u8>>,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeError {
    pub kind: EncodeErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeErrorKind {
    /// Text contains an embedded NUL byte
    EmbeddedNul,
    /// Integer outside the range of the wire field
    OutOfRange,
    /// Text or message exceeds the protocol length ceiling
    TooLong,
    /// Value cannot be encoded as the requested server type
    TypeMismatch,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ServerError {
    /// Build from the raw `(field type, text)` pairs of an `ErrorResponse`.
    pub fn new(fields: Vec<(u8, String)>) -> Self {
        Self { fields }
    }

    /// All fields in the order the server sent them.
    pub fn fields(&self) -> &[(u8, String)] {
        &self.fields
    }

    /// Look up a field by its single-byte code.
    pub fn field(&self, code: u8) -> Option<&str> {
        self.fields
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, v)| v.as_str())
    }

    /// Severity (`ERROR`, `FATAL`, ...). Prefers the non-localized `V` field.
    pub fn severity(&self) -> &str {
        self.field(b'V').or_else(|| self.field(b'S')).unwrap_or("")
    }

    /// SQLSTATE code.
    pub fn code(&self) -> &str {
        self.field(b'C').unwrap_or("")
    }

    /// Primary human-readable message.
    pub fn message(&self) -> &str {
        self.field(b'M').unwrap_or("")
    }

    pub fn detail(&self) -> Option<&str> {
        self.field(b'D')
    }

    pub fn hint(&self) -> Option<&str> {
        self.field(b'H')
    }

    /// Cursor position into the query string (1-based).
    pub fn position(&self) -> Option<usize> {
        self.field(b'P').and_then(|p| p.parse().ok())
    }

    /// Classify by SQLSTATE.
    pub fn kind(&self) -> ServerErrorKind {
        let code = self.code();
        match code.get(..2) {
            Some("42") => ServerErrorKind::Syntax,
            Some("23") => ServerErrorKind::Constraint,
            Some("40") if code == "40001" => ServerErrorKind::Serialization,
            Some("40") => ServerErrorKind::Deadlock,
            Some("57") if code == "57014" => ServerErrorKind::Cancelled,
            Some("57") => ServerErrorKind::Timeout,
            Some("28") => ServerErrorKind::Authentication,
            Some("08") => ServerErrorKind::Connection,
            _ => ServerErrorKind::Other,
        }
    }
}

impl EncodeError {
    pub fn new(kind: EncodeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl Error {
    /// Did the server reject the request?
    pub fn is_server_error(&self) -> bool {
        matches!(self, Error::Server(_))
    }

    /// Is this an error that leaves the connection unusable?
    pub fn is_connection_error(&self) -> bool {
        match self {
            Error::Connection(_) | Error::Protocol(_) | Error::Io(_) => true,
            Error::Server(s) => s.severity() == "FATAL" || s.severity() == "PANIC",
            _ => false,
        }
    }

    /// Get SQLSTATE if available (e.g., "23505" for unique violation)
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Server(s) => Some(s.code()),
            _ => None,
        }
    }

    /// Shorthand for a connection error without a source.
    pub fn connection(kind: ConnectionErrorKind, message: impl Into<String>) -> Self {
        Error::Connection(ConnectionError {
            kind,
            message: message.into(),
            source: None,
        })
    }

    /// Shorthand for a protocol error without raw data.
    pub fn protocol(message: impl Into<String>) -> Self {
        Error::Protocol(ProtocolError {
            message: message.into(),
            raw_data: None,
            source: None,
        })
    }

    /// Shorthand for an encode error.
    pub fn encode(kind: EncodeErrorKind, message: impl Into<String>) -> Self {
        Error::Encode(EncodeError::new(kind, message))
    }

    /// A connection-state error for operations that must not touch the stream.
    pub fn closed() -> Self {
        Self::connection(ConnectionErrorKind::Closed, "connection is closed")
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Server(e) => write!(f, "Server error: {}", e),
            Error::Type(e) => write!(f, "Type error: {}", e),
            Error::Protocol(e) => write!(f, "Protocol error: {}", e.message),
            Error::Encode(e) => write!(f, "Encode error: {}", e.message),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Protocol(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} (SQLSTATE {})", self.severity(), self.message(), self.code())
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.column, self.oid) {
            (Some(col), _) => write!(
                f,
                "expected {} for column '{}', found {}",
                self.expected, col, self.actual
            ),
            (None, Some(oid)) => write!(
                f,
                "expected {} (OID {}), found {}",
                self.expected, oid, self.actual
            ),
            (None, None) => write!(f, "expected {}, found {}", self.expected, self.actual),
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<ServerError> for Error {
    fn from(err: ServerError) -> Self {
        Error::Server(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Error::Protocol(err)
    }
}

impl From<EncodeError> for Error {
    fn from(err: EncodeError) -> Self {
        Error::Encode(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

/// Result type alias for pgline operations.
pub type Result<T> = std::result::Result<T, Error>;
