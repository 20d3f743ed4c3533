//! Transport selection and the duplex byte stream.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use std::path::PathBuf;

use pgline_core::{ConnectionError, ConnectionErrorKind, Error, Result};
use rand::seq::SliceRandom;

use crate::config::PgConfig;

/// Where a connection goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PgAddress {
    /// A resolved internet address
    Tcp(SocketAddr),
    /// A Unix-domain socket path
    Unix(PathBuf),
}

impl PgAddress {
    /// Pick the transport for `config`.
    ///
    /// With a host, the name is resolved and one of the returned addresses is
    /// chosen uniformly at random. Without one, the local socket
    /// `<socket_dir>/.s.PGSQL.<port>` is used.
    pub fn resolve(config: &PgConfig) -> Result<Self> {
        let Some(host) = config.host.as_deref() else {
            return Ok(PgAddress::Unix(config.socket_path()));
        };

        let addrs: Vec<SocketAddr> = (host, config.port)
            .to_socket_addrs()
            .map_err(|e| {
                Error::Connection(ConnectionError {
                    kind: ConnectionErrorKind::DnsResolution,
                    message: format!("could not resolve host '{}': {}", host, e),
                    source: Some(Box::new(e)),
                })
            })?
            .collect();

        addrs
            .choose(&mut rand::thread_rng())
            .map(|addr| PgAddress::Tcp(*addr))
            .ok_or_else(|| {
                Error::connection(
                    ConnectionErrorKind::DnsResolution,
                    format!("host '{}' resolved to no usable address", host),
                )
            })
    }

    /// Open the transport.
    pub fn connect(&self) -> Result<PgStream> {
        match self {
            PgAddress::Tcp(addr) => {
                let stream = TcpStream::connect(addr).map_err(|e| connect_error(self, e))?;
                stream.set_nodelay(true).ok();
                Ok(PgStream::Tcp(stream))
            }
            #[cfg(unix)]
            PgAddress::Unix(path) => UnixStream::connect(path)
                .map(PgStream::Unix)
                .map_err(|e| connect_error(self, e)),
            #[cfg(not(unix))]
            PgAddress::Unix(path) => Err(Error::connection(
                ConnectionErrorKind::Connect,
                format!(
                    "Unix-domain sockets are not available on this platform ({})",
                    path.display()
                ),
            )),
        }
    }
}

impl fmt::Display for PgAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PgAddress::Tcp(addr) => write!(f, "{}", addr),
            PgAddress::Unix(path) => write!(f, "{}", path.display()),
        }
    }
}

fn connect_error(addr: &PgAddress, e: io::Error) -> Error {
    let kind = if e.kind() == io::ErrorKind::ConnectionRefused {
        ConnectionErrorKind::Refused
    } else {
        ConnectionErrorKind::Connect
    };
    Error::Connection(ConnectionError {
        kind,
        message: format!("failed to connect to {}: {}", addr, e),
        source: Some(Box::new(e)),
    })
}

/// An open connection to the server.
#[derive(Debug)]
pub enum PgStream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Read for PgStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            PgStream::Tcp(s) => s.read(buf),
            #[cfg(unix)]
            PgStream::Unix(s) => s.read(buf),
        }
    }
}

impl Write for PgStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            PgStream::Tcp(s) => s.write(buf),
            #[cfg(unix)]
            PgStream::Unix(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            PgStream::Tcp(s) => s.flush(),
            #[cfg(unix)]
            PgStream::Unix(s) => s.flush(),
        }
    }
}
