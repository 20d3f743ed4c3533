//! PostgreSQL connection implementation.
//!
//! A [`PgConnection`] owns one duplex byte stream and runs every exchange to
//! completion before returning: the request is fully written and flushed, then
//! the reply is read up to the message that ends it. The stream type is
//! generic so the same state machine runs over TCP, a Unix-domain socket, or
//! an in-memory peer.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::io::{Read, Write};

use pgline_core::{ConnectionError, ConnectionErrorKind, Error, Result};
use serde_json::json;

use crate::auth::md5_password;
use crate::config::{PgConfig, Verbosity};
use crate::profile::Profiler;
use crate::protocol::{
    BackendMessage, ErrorFields, FrontendMessage, MessageWriter, PROTOCOL_VERSION,
    TransactionStatus, read_message,
};
use crate::stream::{PgAddress, PgStream};

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Startup packet sent, handshake not finished
    Startup,
    /// Ready for the next request
    Ready(TransactionStatus),
    /// A transport or framing failure left the stream in an unknown position
    Broken,
    /// Terminate has been sent
    Closed,
}

/// PostgreSQL connection.
///
/// Manages the byte stream to a server, handling authentication, framing and
/// state tracking. Not meant for concurrent use: one logical owner at a time.
pub struct PgConnection<S: Read + Write = PgStream> {
    stream: S,
    state: ConnectionState,
    /// Correlation id used in logs and profile records
    id: String,
    /// Backend process ID (for query cancellation)
    process_id: i32,
    /// Secret key (for query cancellation)
    secret_key: i32,
    /// Server parameters received via ParameterStatus
    parameters: HashMap<String, String>,
    config: PgConfig,
    writer: MessageWriter,
    profiler: Profiler,
    private_data: Option<Box<dyn Any + Send>>,
}

impl<S: Read + Write> fmt::Debug for PgConnection<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgConnection")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("process_id", &self.process_id)
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("database", &self.config.database)
            .finish_non_exhaustive()
    }
}

impl PgConnection<PgStream> {
    /// Establish a new connection to the PostgreSQL server.
    ///
    /// Resolves the address (TCP when a host is set, otherwise the local
    /// socket), opens the transport and runs the handshake to ReadyForQuery.
    pub fn connect(config: PgConfig) -> Result<Self> {
        let id = connection_id();
        let profiler = Profiler::new(config.profile_log.clone(), id.clone());
        let started = profiler.start();

        let result = PgAddress::resolve(&config).and_then(|addr| {
            tracing::debug!(conn = %id, address = %addr, "connecting");
            let stream = addr.connect()?;
            Self::start(stream, config.clone(), id.clone(), profiler.clone())
        });

        profiler.finish(started, "connect", &result, |conn| {
            let mut details = json!({
                "host": config.host,
                "port": config.port,
                "user": config.user,
                "database": config.database,
            });
            if let Some(conn) = conn {
                details["process_id"] = json!(conn.process_id);
            }
            details
        });
        result
    }
}

impl<S: Read + Write> PgConnection<S> {
    /// Run the startup handshake over an already-open stream.
    pub fn handshake(stream: S, config: PgConfig) -> Result<Self> {
        let id = connection_id();
        let profiler = Profiler::new(config.profile_log.clone(), id.clone());
        Self::start(stream, config, id, profiler)
    }

    fn start(stream: S, config: PgConfig, id: String, profiler: Profiler) -> Result<Self> {
        let mut conn = Self {
            stream,
            state: ConnectionState::Startup,
            id,
            process_id: 0,
            secret_key: 0,
            parameters: HashMap::new(),
            config,
            writer: MessageWriter::new(),
            profiler,
            private_data: None,
        };
        conn.send_startup()?;
        conn.authenticate()?;
        tracing::debug!(
            conn = %conn.id,
            process_id = conn.process_id,
            user = %conn.config.user,
            database = %conn.config.database,
            "connection ready"
        );
        Ok(conn)
    }

    // ==================== Introspection ====================

    /// Identifier used to correlate log lines and profile records.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Check if the connection is ready for requests.
    pub fn is_ready(&self) -> bool {
        matches!(self.state, ConnectionState::Ready(_))
    }

    /// Transaction status from the last ReadyForQuery.
    pub fn transaction_status(&self) -> Option<TransactionStatus> {
        match self.state {
            ConnectionState::Ready(status) => Some(status),
            _ => None,
        }
    }

    /// Get the backend process ID (for query cancellation).
    pub fn process_id(&self) -> i32 {
        self.process_id
    }

    /// Get the secret key (for query cancellation).
    pub fn secret_key(&self) -> i32 {
        self.secret_key
    }

    /// Get a server parameter value.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    pub fn config(&self) -> &PgConfig {
        &self.config
    }

    /// The underlying stream.
    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    // ==================== Private Data ====================

    /// Attach a caller value to the connection, replacing any previous one.
    pub fn set_private_data<T: Any + Send>(&mut self, data: T) {
        self.private_data = Some(Box::new(data));
    }

    /// The attached value, if one of type `T` is set.
    pub fn private_data<T: Any + Send>(&self) -> Option<&T> {
        self.private_data.as_deref().and_then(|d| d.downcast_ref())
    }

    pub fn private_data_mut<T: Any + Send>(&mut self) -> Option<&mut T> {
        self.private_data.as_deref_mut().and_then(|d| d.downcast_mut())
    }

    /// Remove and return the attached value if it is a `T`.
    pub fn take_private_data<T: Any + Send>(&mut self) -> Option<T> {
        if !self.private_data.as_deref().is_some_and(|d| d.is::<T>()) {
            return None;
        }
        self.private_data
            .take()
            .and_then(|d| d.downcast::<T>().ok())
            .map(|d| *d)
    }

    // ==================== Lifecycle ====================

    /// Close the connection gracefully: send Terminate, flush, release the stream.
    pub fn close(mut self) -> Result<()> {
        let started = self.profiler.start();
        let result = self.terminate();
        self.profiler.finish(started, "close", &result, |_| json!({}));
        tracing::debug!(conn = %self.id, "connection closed");
        result
    }

    fn terminate(&mut self) -> Result<()> {
        if self.state == ConnectionState::Closed {
            return Err(Error::closed());
        }
        let result = self.send(&[FrontendMessage::Terminate]);
        self.state = ConnectionState::Closed;
        result
    }

    /// Bring the stream back to a message boundary.
    ///
    /// Sends Sync and discards everything up to the next ReadyForQuery. Use
    /// after a failed prepare, describe or close when the connection should
    /// be reused.
    pub fn resync(&mut self) -> Result<()> {
        self.check_usable()?;
        self.send(&[FrontendMessage::Sync])?;
        self.drain_to_ready()
    }

    // ==================== Startup ====================

    fn send_startup(&mut self) -> Result<()> {
        let params = self.config.startup_params();
        self.writer.clear();
        self.writer.append(&FrontendMessage::Startup {
            version: PROTOCOL_VERSION,
            params: &params,
        })?;
        self.flush_buffered()
    }

    fn authenticate(&mut self) -> Result<()> {
        loop {
            match self.receive()? {
                BackendMessage::AuthenticationOk => {
                    tracing::debug!(conn = %self.id, "authentication accepted");
                }
                BackendMessage::BackendKeyData {
                    process_id,
                    secret_key,
                } => {
                    self.process_id = process_id;
                    self.secret_key = secret_key;
                }
                BackendMessage::ParameterStatus { name, value } => {
                    self.parameters.insert(name, value);
                }
                BackendMessage::NoticeResponse(fields) => self.log_notice(&fields),
                BackendMessage::AuthenticationCleartextPassword => {
                    let password = self.config.password.clone();
                    self.send(&[FrontendMessage::PasswordMessage(&password)])?;
                }
                BackendMessage::AuthenticationMD5Password(salt) => {
                    let hash = md5_password(&self.config.user, &self.config.password, salt);
                    self.send(&[FrontendMessage::PasswordMessage(&hash)])?;
                }
                msg @ (BackendMessage::AuthenticationKerberosV5
                | BackendMessage::AuthenticationCryptPassword(_)
                | BackendMessage::AuthenticationSCMCredential
                | BackendMessage::AuthenticationUnknown { .. }) => {
                    self.state = ConnectionState::Broken;
                    return Err(Error::connection(
                        ConnectionErrorKind::UnsupportedAuth,
                        format!("unsupported authentication method: {}", msg.name()),
                    ));
                }
                BackendMessage::ErrorResponse(fields) => {
                    let err = self.server_error(fields);
                    // a FATAL is followed by EOF rather than ReadyForQuery
                    let _ = self.drain_to_ready();
                    return Err(err);
                }
                BackendMessage::ReadyForQuery(status) => {
                    self.state = ConnectionState::Ready(status);
                    return Ok(());
                }
                other => self.ignore(&other),
            }
        }
    }

    // ==================== Low-Level I/O ====================

    /// Fail unless the connection can carry a request.
    pub(crate) fn check_usable(&self) -> Result<()> {
        match self.state {
            ConnectionState::Closed => Err(Error::closed()),
            ConnectionState::Broken => Err(Error::connection(
                ConnectionErrorKind::Broken,
                "connection is broken after a transport or protocol failure",
            )),
            ConnectionState::Startup | ConnectionState::Ready(_) => Ok(()),
        }
    }

    /// Encode `msgs` and write them in one flush. Nothing is written if any
    /// message fails to encode.
    pub(crate) fn send(&mut self, msgs: &[FrontendMessage<'_>]) -> Result<()> {
        self.writer.clear();
        for msg in msgs {
            self.writer.append(msg)?;
        }
        if self.config.verbosity >= Verbosity::Trace {
            for msg in msgs {
                tracing::trace!(conn = %self.id, ?msg, "send");
            }
        }
        self.flush_buffered()
    }

    fn flush_buffered(&mut self) -> Result<()> {
        let written = self
            .stream
            .write_all(self.writer.as_bytes())
            .and_then(|()| self.stream.flush());
        written.map_err(|e| {
            self.state = ConnectionState::Broken;
            Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Disconnected,
                message: format!("failed to write to server: {}", e),
                source: Some(Box::new(e)),
            })
        })
    }

    /// Read the next backend message. Framing and transport failures mark
    /// the connection broken.
    pub(crate) fn receive(&mut self) -> Result<BackendMessage> {
        match read_message(&mut self.stream, self.config.max_message_size) {
            Ok(msg) => {
                if self.config.verbosity >= Verbosity::Trace {
                    tracing::trace!(conn = %self.id, ?msg, "receive");
                }
                Ok(msg)
            }
            Err(e) => {
                self.state = ConnectionState::Broken;
                Err(e)
            }
        }
    }

    /// Discard messages up to and including the next ReadyForQuery.
    pub(crate) fn drain_to_ready(&mut self) -> Result<()> {
        loop {
            match self.receive()? {
                BackendMessage::ReadyForQuery(status) => {
                    self.state = ConnectionState::Ready(status);
                    return Ok(());
                }
                BackendMessage::NoticeResponse(fields) => self.log_notice(&fields),
                BackendMessage::ParameterStatus { name, value } => {
                    self.parameters.insert(name, value);
                }
                other => self.ignore(&other),
            }
        }
    }

    pub(crate) fn set_ready(&mut self, status: TransactionStatus) {
        self.state = ConnectionState::Ready(status);
    }

    pub(crate) fn record_parameter(&mut self, name: String, value: String) {
        self.parameters.insert(name, value);
    }

    pub(crate) fn profiler(&self) -> &Profiler {
        &self.profiler
    }

    /// Turn an ErrorResponse into an error, logging it per the verbosity.
    pub(crate) fn server_error(&self, fields: ErrorFields) -> Error {
        let err = fields.into_server_error();
        if self.config.verbosity >= Verbosity::Errors {
            tracing::warn!(
                conn = %self.id,
                severity = err.severity(),
                code = err.code(),
                "{}",
                err.message()
            );
        }
        Error::Server(err)
    }

    pub(crate) fn log_notice(&self, fields: &ErrorFields) {
        if self.config.verbosity >= Verbosity::Notices {
            tracing::info!(
                conn = %self.id,
                severity = fields.get(b'S').unwrap_or(""),
                "{}",
                fields.message()
            );
        }
    }

    pub(crate) fn ignore(&self, msg: &BackendMessage) {
        if self.config.verbosity >= Verbosity::Trace {
            tracing::trace!(conn = %self.id, message = msg.name(), "ignored");
        }
    }

    /// A protocol violation: the stream can no longer be trusted.
    pub(crate) fn unexpected(&mut self, msg: &BackendMessage, during: &str) -> Error {
        self.state = ConnectionState::Broken;
        Error::protocol(format!("unexpected {} during {}", msg.name(), during))
    }
}

impl<S: Read + Write> Drop for PgConnection<S> {
    fn drop(&mut self) {
        if self.is_ready() {
            // best effort; the server cleans up either way
            let _ = self.send(&[FrontendMessage::Terminate]);
            self.state = ConnectionState::Closed;
        }
    }
}

fn connection_id() -> String {
    format!("{:08x}-{:016x}", std::process::id(), rand::random::<u64>())
}
