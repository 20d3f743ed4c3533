//! Protocol driver scenarios against an in-memory backend.
//!
//! The peer replays a fixed byte script and records everything the client
//! writes, so each test can assert on both sides of the exchange.

use std::io::{Cursor, Read, Write};

use pgline::auth::md5_password;
use pgline::protocol::{BackendMessage, ErrorFields, MessageWriter, TransactionStatus};
use pgline::types::oid;
use pgline::{
    ConnectionErrorKind, ConnectionState, EncodeErrorKind, Error, FieldDescription, Interval, PgConfig,
    PgConnection, Value,
};
use tempdir::TempDir;

struct ScriptedPeer {
    input: Cursor<Vec<u8>>,
    output: Vec<u8>,
}

impl ScriptedPeer {
    fn new(script: &[BackendMessage]) -> Self {
        let mut w = MessageWriter::new();
        for msg in script {
            w.append_backend(msg).unwrap();
        }
        Self::from_bytes(w.as_bytes().to_vec())
    }

    fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            input: Cursor::new(bytes),
            output: Vec::new(),
        }
    }

    /// Tags of the frontend messages written after the startup packet.
    fn sent_tags(&self) -> Vec<u8> {
        let out = &self.output;
        let mut at = be_i32(&out[0..4]) as usize;
        let mut tags = Vec::new();
        while at < out.len() {
            tags.push(out[at]);
            at += 1 + be_i32(&out[at + 1..at + 5]) as usize;
        }
        tags
    }
}

impl Read for ScriptedPeer {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.input.read(buf)
    }
}

impl Write for ScriptedPeer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.output.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn be_i32(b: &[u8]) -> i32 {
    i32::from_be_bytes([b[0], b[1], b[2], b[3]])
}

fn ready() -> BackendMessage {
    BackendMessage::ReadyForQuery(TransactionStatus::Idle)
}

fn handshake() -> Vec<BackendMessage> {
    vec![
        BackendMessage::AuthenticationOk,
        BackendMessage::ParameterStatus {
            name: "client_encoding".into(),
            value: "UTF8".into(),
        },
        BackendMessage::BackendKeyData {
            process_id: 4242,
            secret_key: 7,
        },
        ready(),
    ]
}

fn connect(script: &[BackendMessage]) -> PgConnection<ScriptedPeer> {
    connect_with(script, PgConfig::new("alice", "shop"))
}

fn connect_with(script: &[BackendMessage], config: PgConfig) -> PgConnection<ScriptedPeer> {
    let mut all = handshake();
    all.extend_from_slice(script);
    PgConnection::handshake(ScriptedPeer::new(&all), config).unwrap()
}

fn server_error(code: &str, message: &str) -> BackendMessage {
    BackendMessage::ErrorResponse(ErrorFields {
        fields: vec![
            (b'S', "ERROR".into()),
            (b'V', "ERROR".into()),
            (b'C', code.into()),
            (b'M', message.into()),
        ],
    })
}

fn column(name: &str, type_oid: u32) -> FieldDescription {
    FieldDescription {
        name: name.into(),
        table_oid: None,
        column_id: None,
        type_oid,
        type_size: -1,
        type_modifier: -1,
    }
}

fn text_row(values: &[&str]) -> BackendMessage {
    BackendMessage::DataRow(values.iter().map(|v| Some(v.as_bytes().to_vec())).collect())
}

// ==================== Handshake ====================

#[test]
fn md5_challenge_gets_salted_digest() {
    let salt = [0x01, 0x02, 0x03, 0x04];
    let mut script = vec![BackendMessage::AuthenticationMD5Password(salt)];
    script.extend(handshake());
    let config = PgConfig::new("user", "db").password("pencil");
    let conn = PgConnection::handshake(ScriptedPeer::new(&script), config).unwrap();

    let expected = md5_password("user", "pencil", salt);
    assert_eq!(expected, "md54376eb6913b38f9aaff38dc7cf19ca76");
    let mut message = vec![b'p'];
    message.extend_from_slice(&(4 + expected.len() as i32 + 1).to_be_bytes());
    message.extend_from_slice(expected.as_bytes());
    message.push(0);
    assert!(conn.get_ref().output.ends_with(&message));
    assert_eq!(conn.process_id(), 4242);
    assert_eq!(conn.parameter("client_encoding"), Some("UTF8"));
}

#[test]
fn handshake_failure_drains_then_reports() {
    let script = [
        BackendMessage::AuthenticationCleartextPassword,
        server_error("28P01", "password authentication failed for user \"alice\""),
        ready(),
    ];
    let err = PgConnection::handshake(ScriptedPeer::new(&script), PgConfig::new("alice", "shop"))
        .unwrap_err();
    let server = match err {
        Error::Server(server) => server,
        other => panic!("expected server error, got {other:?}"),
    };
    assert_eq!(server.code(), "28P01");
    assert!(server.message().contains("alice"));
}

#[test]
fn unknown_auth_code_is_rejected() {
    let script = [BackendMessage::AuthenticationUnknown {
        code: 10,
        data: b"SCRAM-SHA-256\0\0".to_vec(),
    }];
    let err = PgConnection::handshake(ScriptedPeer::new(&script), PgConfig::default()).unwrap_err();
    assert!(matches!(
        err,
        Error::Connection(ref c) if c.kind == ConnectionErrorKind::UnsupportedAuth
    ));
}

// ==================== Prepare / Execute ====================

#[test]
fn select_one() {
    let mut conn = connect(&[
        BackendMessage::ParseComplete,
        BackendMessage::BindComplete,
        text_row(&["1"]),
        BackendMessage::CommandComplete("SELECT 1".into()),
        ready(),
    ]);
    conn.prepare("", "select 1", &[]).unwrap();
    let rows = conn.execute("", "", &[]).unwrap();
    assert_eq!(rows, vec![vec![Some(b"1".to_vec())]]);
    assert_eq!(conn.get_ref().sent_tags(), b"PHBES".to_vec());
}

#[test]
fn execute_error_leaves_connection_ready() {
    let mut conn = connect(&[
        BackendMessage::ParseComplete,
        server_error("08P01", "bind message supplies 1 parameters, but prepared statement \"\" requires 0"),
        BackendMessage::ReadyForQuery(TransactionStatus::Idle),
        BackendMessage::ParseComplete,
        BackendMessage::BindComplete,
        text_row(&["2"]),
        BackendMessage::CommandComplete("SELECT 1".into()),
        ready(),
    ]);
    conn.prepare("", "select 1", &[]).unwrap();
    let err = conn.execute("", "", &[Some(b"x".to_vec())]).unwrap_err();
    assert!(err.is_server_error());
    assert_eq!(err.sqlstate(), Some("08P01"));
    assert!(conn.is_ready());

    conn.prepare("", "select 2", &[]).unwrap();
    let rows = conn.execute("", "", &[]).unwrap();
    assert_eq!(rows, vec![vec![Some(b"2".to_vec())]]);
}

#[test]
fn prepare_error_needs_explicit_resync() {
    let mut conn = connect(&[
        server_error("42601", "syntax error at or near \"selec\""),
        ready(),
        BackendMessage::ParseComplete,
    ]);
    let err = conn.prepare("", "selec 1", &[]).unwrap_err();
    assert_eq!(err.sqlstate(), Some("42601"));

    conn.resync().unwrap();
    conn.prepare("", "select 1", &[]).unwrap();
    assert_eq!(conn.get_ref().sent_tags(), b"PHSPH".to_vec());
}

#[test]
fn reversed_rows() {
    let script = [
        BackendMessage::ParseComplete,
        text_row(&["1"]),
        text_row(&["2"]),
        text_row(&["3"]),
        ready(),
    ];
    let mut conn = connect(&script);
    conn.prepare("", "select generate_series(1, 3)", &[]).unwrap();
    let rows = conn.execute_reversed("", "", &[]).unwrap();
    let firsts: Vec<_> = rows.iter().map(|r| r[0].clone().unwrap()).collect();
    assert_eq!(firsts, vec![b"3".to_vec(), b"2".to_vec(), b"1".to_vec()]);
}

#[test]
fn null_and_empty_fields_stay_distinct() {
    let mut conn = connect(&[
        BackendMessage::DataRow(vec![None, Some(Vec::new()), Some(b"x".to_vec())]),
        ready(),
    ]);
    let rows = conn.execute("", "", &[]).unwrap();
    assert_eq!(rows[0], vec![None, Some(Vec::new()), Some(b"x".to_vec())]);
}

// ==================== Describe / Close ====================

#[test]
fn describe_and_close() {
    let mut conn = connect(&[
        BackendMessage::ParseComplete,
        BackendMessage::ParameterDescription(vec![oid::INT4, oid::TEXT]),
        BackendMessage::RowDescription(vec![column("id", oid::INT4), column("name", oid::TEXT)]),
        BackendMessage::RowDescription(vec![column("id", oid::INT4)]),
        ready(),
        BackendMessage::CloseComplete,
    ]);
    conn.prepare("find", "select id, name from t where id = $1 and name = $2", &[])
        .unwrap();
    let described = conn.describe_statement("find").unwrap();
    assert_eq!(described.params, vec![oid::INT4, oid::TEXT]);
    let names: Vec<_> = described
        .fields
        .unwrap()
        .into_iter()
        .map(|f| f.name)
        .collect();
    assert_eq!(names, vec!["id", "name"]);

    let portal = conn.describe_portal("cur").unwrap().unwrap();
    assert_eq!(portal[0].type_oid, oid::INT4);
    conn.resync().unwrap();

    conn.close_statement("find").unwrap();
}

#[test]
fn describe_error_is_not_drained() {
    let mut conn = connect(&[
        server_error("26000", "prepared statement \"nope\" does not exist"),
        ready(),
    ]);
    let err = conn.describe_statement("nope").unwrap_err();
    assert_eq!(err.sqlstate(), Some("26000"));
    assert!(conn.is_ready());
    conn.ping().unwrap();
}

// ==================== Helpers ====================

#[test]
fn transactions_and_serial() {
    let mut conn = connect(&[
        BackendMessage::ParseComplete,
        BackendMessage::CommandComplete("BEGIN".into()),
        BackendMessage::ReadyForQuery(TransactionStatus::Transaction),
        BackendMessage::ParseComplete,
        text_row(&["17"]),
        BackendMessage::ReadyForQuery(TransactionStatus::Transaction),
        BackendMessage::ParseComplete,
        BackendMessage::CommandComplete("COMMIT".into()),
        ready(),
    ]);
    conn.begin().unwrap();
    assert_eq!(conn.transaction_status(), Some(TransactionStatus::Transaction));
    assert_eq!(conn.serial("orders_id_seq").unwrap(), 17);
    conn.commit().unwrap();
    assert_eq!(conn.transaction_status(), Some(TransactionStatus::Idle));
    assert!(
        conn.get_ref()
            .output
            .windows(b"orders_id_seq".len())
            .any(|w| w == b"orders_id_seq")
    );
}

#[test]
fn query_decodes_interval_and_array() {
    let mut conn = connect(&[
        BackendMessage::ParseComplete,
        BackendMessage::ParameterDescription(vec![oid::INT8]),
        BackendMessage::RowDescription(vec![
            column("span", oid::INTERVAL),
            column("ids", oid::INT4_ARRAY),
            column("missing", oid::TEXT),
        ]),
        BackendMessage::BindComplete,
        BackendMessage::DataRow(vec![
            Some(b"1 years 2 mons 3 days 04:05:06".to_vec()),
            Some(b"{1,2,3}".to_vec()),
            None,
        ]),
        ready(),
    ]);
    let rows = conn
        .query("select span, ids, missing from t where id = $1", &[Value::Int(9)])
        .unwrap();
    assert_eq!(
        rows,
        vec![vec![
            Value::Interval(Interval::new(1, 2, 3, 4 * 3600 + 5 * 60 + 6)),
            Value::IntArray(vec![1, 2, 3]),
            Value::Null,
        ]]
    );
    assert!(conn.get_ref().output.windows(5).any(|w| w == b"\0\0\0\x019"));
}

#[test]
fn query_server_error_resyncs() {
    let mut conn = connect(&[
        server_error("42P01", "relation \"nope\" does not exist"),
        ready(),
    ]);
    let err = conn.query("select * from nope", &[]).unwrap_err();
    assert_eq!(err.sqlstate(), Some("42P01"));
    assert!(conn.is_ready());
    assert_eq!(conn.get_ref().sent_tags(), b"PHS".to_vec());
}

// ==================== Failure Modes ====================

#[test]
fn oversize_message_breaks_connection() {
    let mut w = MessageWriter::new();
    for msg in handshake() {
        w.append_backend(&msg).unwrap();
    }
    w.append_backend(&BackendMessage::ParseComplete).unwrap();
    w.append_backend(&BackendMessage::DataRow(vec![Some(vec![b'x'; 256])]))
        .unwrap();
    w.append_backend(&ready()).unwrap();

    let config = PgConfig::new("alice", "shop").max_message_size(64);
    let mut conn =
        PgConnection::handshake(ScriptedPeer::from_bytes(w.as_bytes().to_vec()), config).unwrap();
    conn.prepare("", "select repeat('x', 256)", &[]).unwrap();
    let err = conn.execute("", "", &[]).unwrap_err();
    assert!(matches!(err, Error::Protocol(_)));
    assert_eq!(conn.state(), ConnectionState::Broken);
    assert!(conn.execute("", "", &[]).is_err());
}

#[test]
fn out_of_range_parameter_count_is_local() {
    let mut conn = connect(&[ready()]);
    let params = vec![None; 70_000];
    let err = conn.execute("", "", &params).unwrap_err();
    assert!(matches!(err, Error::Encode(_)));
    assert!(conn.is_ready());
    conn.ping().unwrap();
}

#[test]
fn nul_in_text_parameter_is_local() {
    let mut conn = connect(&[ready()]);
    let sent = conn.get_ref().output.len();
    let err = conn.execute("", "", &[Some(b"a\0b".to_vec())]).unwrap_err();
    assert!(matches!(
        err,
        Error::Encode(ref e) if e.kind == EncodeErrorKind::EmbeddedNul
    ));
    assert_eq!(conn.get_ref().output.len(), sent);
    assert!(conn.is_ready());
    conn.ping().unwrap();
}

#[test]
fn truncated_stream_is_disconnect() {
    let mut w = MessageWriter::new();
    for msg in handshake() {
        w.append_backend(&msg).unwrap();
    }
    let mut bytes = w.as_bytes().to_vec();
    bytes.extend_from_slice(b"1\0\0\0");
    let mut conn =
        PgConnection::handshake(ScriptedPeer::from_bytes(bytes), PgConfig::default()).unwrap();
    let err = conn.prepare("", "select 1", &[]).unwrap_err();
    assert!(err.is_connection_error());
    assert_eq!(conn.state(), ConnectionState::Broken);
}

// ==================== Profiling ====================

#[test]
fn profile_records_operations() {
    let dir = TempDir::new("pgline-scripted").unwrap();
    let path = dir.path().join("profile.jsonl");
    let config = PgConfig::new("alice", "shop").profile_log(&path);
    let mut conn = connect_with(
        &[
            BackendMessage::ParseComplete,
            text_row(&["1"]),
            ready(),
            ready(),
        ],
        config,
    );
    conn.prepare("", "select 1", &[]).unwrap();
    conn.execute("", "", &[]).unwrap();
    conn.ping().unwrap();
    conn.close().unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    let records: Vec<serde_json::Value> = text
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    let ops: Vec<_> = records.iter().map(|r| r["op"].as_str().unwrap()).collect();
    assert_eq!(ops, vec!["prepare", "execute", "ping", "close"]);
    assert!(records.iter().all(|r| r["outcome"] == "ok"));
    assert_eq!(records[1]["rows"], 1);
    assert_eq!(records[0]["conn"], records[3]["conn"]);
}

#[test]
fn failed_prepare_is_profiled_with_its_query() {
    let dir = TempDir::new("pgline-scripted").unwrap();
    let path = dir.path().join("profile.jsonl");
    let config = PgConfig::new("alice", "shop").profile_log(&path);
    let mut conn = connect_with(
        &[
            server_error("42601", "syntax error at or near \"selec\""),
            ready(),
            server_error("08P01", "bind message supplies 1 parameters"),
            ready(),
        ],
        config,
    );
    conn.prepare("s1", "selec 1", &[]).unwrap_err();
    conn.resync().unwrap();
    conn.execute("s1", "", &[Some(b"1".to_vec())]).unwrap_err();

    let text = std::fs::read_to_string(&path).unwrap();
    let records: Vec<serde_json::Value> = text
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["op"], "prepare");
    assert!(records[0]["outcome"].as_str().unwrap().contains("42601"));
    assert_eq!(records[0]["statement"], "s1");
    assert_eq!(records[0]["query"], "selec 1");
    assert_eq!(records[1]["op"], "execute");
    assert_eq!(records[1]["statement"], "s1");
    assert_eq!(records[1]["params"], 1);
    assert!(records[1].get("rows").is_none());
}
