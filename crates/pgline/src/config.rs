//! PostgreSQL connection configuration.
//!
//! Every field resolves independently: an explicit builder call wins, then
//! the matching environment variable, then a built-in default. Resolution goes
//! through an injectable lookup so it can be exercised without touching the
//! process environment.

use std::path::PathBuf;

use pgline_core::{ConfigError, Error, Result};

use crate::protocol::MAX_MESSAGE_LEN;

/// Default TCP port.
pub const DEFAULT_PORT: u16 = 5432;

/// User name used when neither `PGUSER` nor an OS login name is available.
pub const FALLBACK_USER: &str = "postgres";

/// Directory holding the server's Unix-domain socket, fixed at build time.
pub const DEFAULT_SOCKET_DIR: &str = match option_env!("PGLINE_SOCKET_DIR") {
    Some(dir) => dir,
    None => "/tmp",
};

/// Which server diagnostics a connection forwards to `tracing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Verbosity {
    /// Emit nothing
    Silent,
    /// Server errors only
    #[default]
    Errors,
    /// Server errors and notices
    Notices,
    /// Everything, including each frame sent and received
    Trace,
}

/// PostgreSQL connection configuration.
#[derive(Debug, Clone)]
pub struct PgConfig {
    /// Hostname or IP address; `None` selects the Unix-domain socket
    pub host: Option<String>,
    /// Port number (default: 5432)
    pub port: u16,
    /// Username for authentication
    pub user: String,
    /// Password for authentication (empty for trust auth)
    pub password: String,
    /// Database name to connect to
    pub database: String,
    /// Directory searched for `.s.PGSQL.<port>` when no host is set
    pub socket_dir: PathBuf,
    /// JSON-lines file receiving one timing record per operation
    pub profile_log: Option<PathBuf>,
    /// Largest inbound payload accepted before the connection gives up
    pub max_message_size: usize,
    /// Diagnostics forwarded to `tracing`
    pub verbosity: Verbosity,
}

impl Default for PgConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: DEFAULT_PORT,
            user: FALLBACK_USER.to_string(),
            password: String::new(),
            database: FALLBACK_USER.to_string(),
            socket_dir: PathBuf::from(DEFAULT_SOCKET_DIR),
            profile_log: None,
            max_message_size: MAX_MESSAGE_LEN,
            verbosity: Verbosity::default(),
        }
    }
}

impl PgConfig {
    /// Create a configuration for the given user and database on the local socket.
    pub fn new(user: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            database: database.into(),
            ..Default::default()
        }
    }

    /// Resolve every field from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve every field through `lookup`, which plays the role of the environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let user = get("PGUSER")
            .or_else(|| get("USER"))
            .or_else(|| get("LOGNAME"))
            .or_else(|| get("USERNAME"))
            .unwrap_or_else(|| FALLBACK_USER.to_string());
        let database = get("PGDATABASE").unwrap_or_else(|| user.clone());
        let port = match get("PGPORT") {
            Some(raw) => raw.trim().parse::<u16>().map_err(|e| {
                Error::Config(ConfigError {
                    message: format!("PGPORT '{}' is not a valid port", raw),
                    source: Some(Box::new(e)),
                })
            })?,
            None => DEFAULT_PORT,
        };

        Ok(Self {
            host: get("PGHOST"),
            port,
            user,
            password: get("PGPASSWORD").unwrap_or_default(),
            database,
            profile_log: get("PGLINE_PROFILE_LOG").map(PathBuf::from),
            ..Default::default()
        })
    }

    /// Set the host. Passing a host switches the transport to TCP.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Use the Unix-domain socket even if a host was resolved.
    pub fn unix_socket(mut self) -> Self {
        self.host = None;
        self
    }

    /// Set the port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Set the password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn socket_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.socket_dir = dir.into();
        self
    }

    /// Append operation timings to `path`.
    pub fn profile_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.profile_log = Some(path.into());
        self
    }

    pub fn max_message_size(mut self, bytes: usize) -> Self {
        self.max_message_size = bytes.min(MAX_MESSAGE_LEN);
        self
    }

    pub fn verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Build the startup parameters to send to the server.
    pub fn startup_params(&self) -> [(&str, &str); 2] {
        [("user", self.user.as_str()), ("database", self.database.as_str())]
    }

    /// Path of the server socket for the configured directory and port.
    pub fn socket_path(&self) -> PathBuf {
        self.socket_dir.join(format!(".s.PGSQL.{}", self.port))
    }
}
