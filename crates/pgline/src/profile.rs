//! Operation timing log.
//!
//! When a log path is configured, each top-level operation appends one JSON
//! object per line:
//!
//! ```text
//! {"version":1,"conn":"…","op":"execute","elapsed_ms":0.84,"outcome":"ok","statement":"","rows":1}
//! ```
//!
//! Several connections, possibly in different processes, may share one file.
//! Each append holds an exclusive advisory lock on the whole file for the
//! duration of the single write. Without a path nothing is timed and no file
//! is touched.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use pgline_core::Result;
use serde::Serialize;
use serde_json::{Map, Value};

/// Record schema version.
pub const PROFILE_VERSION: u32 = 1;

#[derive(Debug, Serialize)]
struct ProfileRecord<'a> {
    version: u32,
    conn: &'a str,
    op: &'a str,
    elapsed_ms: f64,
    outcome: String,
    #[serde(flatten)]
    details: Map<String, Value>,
}

/// Appends timing records for one connection.
#[derive(Debug, Clone)]
pub struct Profiler {
    path: Option<PathBuf>,
    conn: String,
}

impl Profiler {
    pub fn new(path: Option<PathBuf>, conn: impl Into<String>) -> Self {
        Self {
            path,
            conn: conn.into(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.path.is_some()
    }

    /// Start timing an operation. `None` when profiling is off.
    pub fn start(&self) -> Option<Instant> {
        self.path.as_ref().map(|_| Instant::now())
    }

    /// Append the record for an operation started with [`Profiler::start`].
    ///
    /// `details` receives the value on success and `None` on failure, so the
    /// fields describing the request are logged either way. It is only
    /// evaluated when profiling is on. A failure to write the log is reported
    /// through `tracing` and never fails the operation.
    pub fn finish<T, F>(&self, started: Option<Instant>, op: &str, result: &Result<T>, details: F)
    where
        F: FnOnce(Option<&T>) -> Value,
    {
        let (Some(path), Some(started)) = (self.path.as_deref(), started) else {
            return;
        };
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        let outcome = match result {
            Ok(_) => "ok".to_string(),
            Err(e) => e.to_string(),
        };
        let details = details(result.as_ref().ok());
        let details = match details {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("detail".to_string(), other);
                map
            }
        };

        let record = ProfileRecord {
            version: PROFILE_VERSION,
            conn: &self.conn,
            op,
            elapsed_ms,
            outcome,
            details,
        };
        if let Err(e) = append_record(path, &record) {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to append profile record"
            );
        }
    }
}

fn append_record(path: &Path, record: &ProfileRecord<'_>) -> std::io::Result<()> {
    let mut line = serde_json::to_vec(record)?;
    line.push(b'\n');

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.lock()?;
    let written = write_line(&mut file, &line);
    let unlocked = file.unlock();
    written.and(unlocked)
}

fn write_line(file: &mut File, line: &[u8]) -> std::io::Result<()> {
    file.write_all(line)?;
    file.flush()
}
