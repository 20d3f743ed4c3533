//! Extended-query protocol operations.
//!
//! Prepare, describe and close end their request with Flush and return a
//! server error as soon as it arrives, leaving the server waiting for a Sync.
//! Execute ends with Sync and reads through the ReadyForQuery that follows an
//! error before returning it. After a failed prepare, describe or close, call
//! [`PgConnection::resync`] before reusing the connection.

use std::io::{Read, Write};

use pgline_core::{Error, Result, TypeError, Value};
use serde_json::json;

use crate::connection::PgConnection;
use crate::protocol::{BackendMessage, DescribeKind, FieldDescription, FrontendMessage, RawRow};
use crate::types::{TextDecode, TypeRegistry, encode_value, oid};

/// All parameters and all result columns use the text format.
const TEXT_FORMAT: &[i16] = &[0];

/// Parameter and result shape of a prepared statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementDescription {
    /// Parameter type OIDs, one per placeholder
    pub params: Vec<u32>,
    /// Result columns; `None` when the statement returns no rows
    pub fields: Option<Vec<FieldDescription>>,
}

impl<S: Read + Write> PgConnection<S> {
    // ==================== Prepare ====================

    /// Parse `query` into the statement `name` (`""` is the unnamed statement).
    ///
    /// `param_types` may be shorter than the placeholder count, or empty, to
    /// let the server infer the rest.
    pub fn prepare(&mut self, name: &str, query: &str, param_types: &[u32]) -> Result<()> {
        let started = self.profiler().start();
        let result = self.run_prepare(name, query, param_types);
        self.profiler().finish(started, "prepare", &result, |_| {
            json!({ "statement": name, "query": query })
        });
        result
    }

    fn run_prepare(&mut self, name: &str, query: &str, param_types: &[u32]) -> Result<()> {
        self.check_usable()?;
        self.send(&[
            FrontendMessage::Parse {
                name,
                query,
                param_types,
            },
            FrontendMessage::Flush,
        ])?;
        match self.next_reply()? {
            BackendMessage::ParseComplete => Ok(()),
            BackendMessage::ErrorResponse(fields) => Err(self.server_error(fields)),
            other => Err(self.unexpected(&other, "prepare")),
        }
    }

    // ==================== Execute ====================

    /// Bind `params` to `statement` as `portal`, run it to completion and
    /// return the rows in arrival order.
    pub fn execute(
        &mut self,
        statement: &str,
        portal: &str,
        params: &[Option<Vec<u8>>],
    ) -> Result<Vec<RawRow>> {
        self.profiled_execute(statement, portal, params, false)
    }

    /// Like [`execute`](Self::execute), with the rows last-to-first.
    pub fn execute_reversed(
        &mut self,
        statement: &str,
        portal: &str,
        params: &[Option<Vec<u8>>],
    ) -> Result<Vec<RawRow>> {
        self.profiled_execute(statement, portal, params, true)
    }

    fn profiled_execute(
        &mut self,
        statement: &str,
        portal: &str,
        params: &[Option<Vec<u8>>],
        reversed: bool,
    ) -> Result<Vec<RawRow>> {
        let started = self.profiler().start();
        let mut result = self.run_execute(statement, portal, params);
        if reversed {
            if let Ok(rows) = &mut result {
                rows.reverse();
            }
        }
        self.profiler().finish(started, "execute", &result, |rows| {
            let mut details = json!({
                "statement": statement,
                "portal": portal,
                "params": params.len(),
                "reversed": reversed,
            });
            if let Some(rows) = rows {
                details["rows"] = json!(rows.len());
            }
            details
        });
        result
    }

    fn run_execute(
        &mut self,
        statement: &str,
        portal: &str,
        params: &[Option<Vec<u8>>],
    ) -> Result<Vec<RawRow>> {
        self.check_usable()?;
        self.send(&[
            FrontendMessage::Bind {
                portal,
                statement,
                param_formats: TEXT_FORMAT,
                params,
                result_formats: TEXT_FORMAT,
            },
            FrontendMessage::Execute { portal, max_rows: 0 },
            FrontendMessage::Sync,
        ])?;

        let mut rows = Vec::new();
        loop {
            match self.receive()? {
                BackendMessage::DataRow(row) => rows.push(row),
                BackendMessage::ReadyForQuery(status) => {
                    self.set_ready(status);
                    return Ok(rows);
                }
                BackendMessage::ErrorResponse(fields) => {
                    let err = self.server_error(fields);
                    // a failed drain has already marked the connection broken
                    let _ = self.drain_to_ready();
                    return Err(err);
                }
                BackendMessage::NoticeResponse(fields) => self.log_notice(&fields),
                BackendMessage::ParameterStatus { name, value } => {
                    self.record_parameter(name, value);
                }
                msg @ (BackendMessage::BindComplete
                | BackendMessage::CommandComplete(_)
                | BackendMessage::EmptyQueryResponse
                | BackendMessage::NoData) => self.ignore(&msg),
                other => return Err(self.unexpected(&other, "execute")),
            }
        }
    }

    // ==================== Describe ====================

    /// Parameter types and result columns of a prepared statement.
    pub fn describe_statement(&mut self, name: &str) -> Result<StatementDescription> {
        self.check_usable()?;
        self.send(&[DescribeKind::Statement.describe(name), FrontendMessage::Flush])?;
        let params = match self.next_reply()? {
            BackendMessage::ParameterDescription(oids) => oids,
            BackendMessage::ErrorResponse(fields) => return Err(self.server_error(fields)),
            other => return Err(self.unexpected(&other, "describe")),
        };
        let fields = self.row_shape()?;
        Ok(StatementDescription { params, fields })
    }

    /// Result columns of a bound portal.
    pub fn describe_portal(&mut self, name: &str) -> Result<Option<Vec<FieldDescription>>> {
        self.check_usable()?;
        self.send(&[DescribeKind::Portal.describe(name), FrontendMessage::Flush])?;
        self.row_shape()
    }

    fn row_shape(&mut self) -> Result<Option<Vec<FieldDescription>>> {
        match self.next_reply()? {
            BackendMessage::NoData => Ok(None),
            BackendMessage::RowDescription(fields) => Ok(Some(fields)),
            BackendMessage::ErrorResponse(fields) => Err(self.server_error(fields)),
            other => Err(self.unexpected(&other, "describe")),
        }
    }

    // ==================== Close ====================

    /// Release a prepared statement.
    pub fn close_statement(&mut self, name: &str) -> Result<()> {
        self.close_target(DescribeKind::Statement, name)
    }

    /// Release a portal.
    pub fn close_portal(&mut self, name: &str) -> Result<()> {
        self.close_target(DescribeKind::Portal, name)
    }

    fn close_target(&mut self, kind: DescribeKind, name: &str) -> Result<()> {
        self.check_usable()?;
        self.send(&[kind.close(name), FrontendMessage::Flush])?;
        match self.next_reply()? {
            BackendMessage::CloseComplete => Ok(()),
            BackendMessage::ErrorResponse(fields) => Err(self.server_error(fields)),
            other => Err(self.unexpected(&other, "close")),
        }
    }

    /// Next reply, skipping notices and parameter updates.
    fn next_reply(&mut self) -> Result<BackendMessage> {
        loop {
            match self.receive()? {
                BackendMessage::NoticeResponse(fields) => self.log_notice(&fields),
                BackendMessage::ParameterStatus { name, value } => {
                    self.record_parameter(name, value);
                }
                msg => return Ok(msg),
            }
        }
    }

    // ==================== Transactions ====================

    pub fn begin(&mut self) -> Result<()> {
        self.run_command("begin")
    }

    pub fn commit(&mut self) -> Result<()> {
        self.run_command("commit")
    }

    pub fn rollback(&mut self) -> Result<()> {
        self.run_command("rollback")
    }

    fn run_command(&mut self, sql: &str) -> Result<()> {
        self.prepare("", sql, &[])?;
        self.execute("", "", &[])?;
        Ok(())
    }

    // ==================== Sequences ====================

    /// Current value of `sequence` in this session (`currval`).
    pub fn serial(&mut self, sequence: &str) -> Result<i64> {
        let param = encode_value(&Value::from(sequence))?;
        self.prepare("", "select currval($1)", &[])?;
        let rows = self.execute("", "", &[param])?;

        let missing = || {
            Error::Type(TypeError {
                expected: "int8",
                actual: "no value".to_string(),
                oid: Some(oid::INT8),
                column: Some("currval".to_string()),
            })
        };
        let raw = rows
            .first()
            .and_then(|row| row.first())
            .and_then(Option::as_deref)
            .ok_or_else(missing)?;
        let text = std::str::from_utf8(raw).map_err(|_| missing())?;
        i64::decode_text(text)
    }

    /// [`serial`](Self::serial) truncated to 32 bits.
    #[allow(clippy::cast_possible_truncation)]
    pub fn serial32(&mut self, sequence: &str) -> Result<i32> {
        self.serial(sequence).map(|v| v as i32)
    }

    // ==================== Convenience ====================

    /// Round-trip a Sync to check the connection is alive.
    pub fn ping(&mut self) -> Result<()> {
        let started = self.profiler().start();
        let result = self.resync();
        self.profiler().finish(started, "ping", &result, |_| json!({}));
        result
    }

    /// Run `sql` through the unnamed statement with typed parameters and
    /// decoded rows.
    ///
    /// Parameters are encoded for the types the server describes. A server
    /// error at any step leaves the connection resynchronised.
    pub fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Vec<Value>>> {
        let described = match self
            .prepare("", sql, &[])
            .and_then(|()| self.describe_statement(""))
        {
            Ok(described) => described,
            Err(e) => {
                if e.is_server_error() {
                    let _ = self.resync();
                }
                return Err(e);
            }
        };

        let registry = TypeRegistry::global();
        let encoded = registry.encode_params(&described.params, params)?;
        let rows = self.execute("", "", &encoded)?;
        let Some(fields) = described.fields else {
            return Ok(Vec::new());
        };
        rows.iter()
            .map(|row| registry.decode_row(&fields, row))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PgConfig;
    use crate::protocol::{ErrorFields, MessageWriter, TransactionStatus};
    use std::io::Cursor;

    struct Peer {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Read for Peer {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Peer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.output.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn ready() -> BackendMessage {
        BackendMessage::ReadyForQuery(TransactionStatus::Idle)
    }

    /// Connection whose handshake succeeded and whose later replies are `script`.
    fn connected(script: &[BackendMessage]) -> PgConnection<Peer> {
        let mut w = MessageWriter::new();
        w.append_backend(&ready()).unwrap();
        for msg in script {
            w.append_backend(msg).unwrap();
        }
        let peer = Peer {
            input: Cursor::new(w.as_bytes().to_vec()),
            output: Vec::new(),
        };
        PgConnection::handshake(peer, PgConfig::default()).unwrap()
    }

    fn sent_after_startup(conn: &PgConnection<Peer>) -> Vec<u8> {
        let out = &conn.get_ref().output;
        let startup_len = i32::from_be_bytes([out[0], out[1], out[2], out[3]]) as usize;
        out[startup_len..].to_vec()
    }

    fn error(code: &str) -> BackendMessage {
        BackendMessage::ErrorResponse(ErrorFields {
            fields: vec![
                (b'S', "ERROR".into()),
                (b'C', code.into()),
                (b'M', "boom".into()),
            ],
        })
    }

    #[test]
    fn test_prepare_sends_parse_and_flush() {
        let mut conn = connected(&[BackendMessage::ParseComplete]);
        conn.prepare("s1", "select $1", &[oid::INT4]).unwrap();
        assert_eq!(
            sent_after_startup(&conn),
            b"P\0\0\0\x17s1\0select $1\0\0\x01\0\0\0\x17H\0\0\0\x04".to_vec()
        );
    }

    #[test]
    fn test_execute_sends_bind_execute_sync() {
        let mut conn = connected(&[
            BackendMessage::BindComplete,
            BackendMessage::DataRow(vec![Some(b"1".to_vec()), None, Some(Vec::new())]),
            BackendMessage::CommandComplete("SELECT 1".into()),
            ready(),
        ]);
        let rows = conn.execute("", "", &[Some(b"7".to_vec()), None]).unwrap();
        assert_eq!(rows, vec![vec![Some(b"1".to_vec()), None, Some(Vec::new())]]);

        let mut expected = b"B\0\0\0\x19\0\0\0\x01\0\0\0\x02\0\0\0\x017\xff\xff\xff\xff\0\x01\0\0".to_vec();
        expected.extend_from_slice(b"E\0\0\0\x09\0\0\0\0\0S\0\0\0\x04");
        assert_eq!(sent_after_startup(&conn), expected);
        assert!(conn.is_ready());
    }

    #[test]
    fn test_execute_reversed_order() {
        let rows = |conn: &mut PgConnection<Peer>, reversed: bool| {
            if reversed {
                conn.execute_reversed("", "", &[]).unwrap()
            } else {
                conn.execute("", "", &[]).unwrap()
            }
        };
        let script = [
            BackendMessage::DataRow(vec![Some(b"a".to_vec())]),
            BackendMessage::DataRow(vec![Some(b"b".to_vec())]),
            ready(),
        ];
        let forward = rows(&mut connected(&script), false);
        let backward = rows(&mut connected(&script), true);
        assert_eq!(forward[0][0].as_deref(), Some(&b"a"[..]));
        assert_eq!(backward[0][0].as_deref(), Some(&b"b"[..]));
        assert_eq!(backward.len(), 2);
    }

    #[test]
    fn test_execute_error_drains_to_ready() {
        let mut conn = connected(&[
            error("08P01"),
            BackendMessage::NoticeResponse(ErrorFields::default()),
            BackendMessage::ReadyForQuery(TransactionStatus::Error),
        ]);
        let err = conn.execute("", "", &[]).unwrap_err();
        assert_eq!(err.sqlstate(), Some("08P01"));
        assert_eq!(conn.transaction_status(), Some(TransactionStatus::Error));
    }

    #[test]
    fn test_prepare_error_is_not_drained() {
        let mut conn = connected(&[error("42601"), ready()]);
        let err = conn.prepare("", "selec", &[]).unwrap_err();
        assert_eq!(err.sqlstate(), Some("42601"));
        // the ReadyForQuery is still unread
        conn.resync().unwrap();
        assert!(conn.is_ready());
    }

    #[test]
    fn test_describe_statement() {
        let field = FieldDescription {
            name: "n".into(),
            table_oid: None,
            column_id: None,
            type_oid: oid::INT4,
            type_size: 4,
            type_modifier: -1,
        };
        let mut conn = connected(&[
            BackendMessage::ParameterDescription(vec![oid::TEXT]),
            BackendMessage::RowDescription(vec![field.clone()]),
            BackendMessage::ParameterDescription(vec![]),
            BackendMessage::NoData,
        ]);
        let described = conn.describe_statement("s").unwrap();
        assert_eq!(described.params, vec![oid::TEXT]);
        assert_eq!(described.fields, Some(vec![field]));
        let described = conn.describe_statement("s").unwrap();
        assert!(described.params.is_empty());
        assert!(described.fields.is_none());
    }

    #[test]
    fn test_unexpected_reply_breaks_connection() {
        let mut conn = connected(&[BackendMessage::BindComplete]);
        let err = conn.close_statement("s").unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
        assert!(conn.close_portal("p").is_err());
    }

    #[test]
    fn test_encode_error_leaves_connection_usable() {
        let mut conn = connected(&[BackendMessage::ParseComplete]);
        let err = conn.prepare("", "select '\0'", &[]).unwrap_err();
        assert!(matches!(err, Error::Encode(_)));
        assert!(conn.is_ready());
        assert!(sent_after_startup(&conn).is_empty());
        conn.prepare("", "select 1", &[]).unwrap();
    }

    #[test]
    fn test_serial() {
        let mut conn = connected(&[
            BackendMessage::ParseComplete,
            BackendMessage::BindComplete,
            BackendMessage::DataRow(vec![Some(b"4294967298".to_vec())]),
            ready(),
        ]);
        assert_eq!(conn.serial("ids").unwrap(), 4_294_967_298);
    }

    #[test]
    fn test_serial32_truncates() {
        let mut conn = connected(&[
            BackendMessage::ParseComplete,
            BackendMessage::DataRow(vec![Some(b"4294967298".to_vec())]),
            ready(),
        ]);
        assert_eq!(conn.serial32("ids").unwrap(), 2);
    }

    #[test]
    fn test_serial_without_row() {
        let mut conn = connected(&[BackendMessage::ParseComplete, ready()]);
        let err = conn.serial("ids").unwrap_err();
        assert!(matches!(err, Error::Type(_)));
    }
}
