//! Scenarios against a running server.
//!
//! Skipped unless `PGLINE_TEST_LIVE` is set. Connection settings come from the
//! usual `PGHOST` / `PGPORT` / `PGUSER` / `PGPASSWORD` / `PGDATABASE`.

use pgline::types::oid;
use pgline::{ConnectionErrorKind, Error, Interval, PgAddress, PgConfig, PgConnection, Value};

const LIVE_ENV: &str = "PGLINE_TEST_LIVE";

fn live_config() -> Option<PgConfig> {
    if std::env::var_os(LIVE_ENV).is_none() {
        eprintln!("skipping live PostgreSQL tests: set {LIVE_ENV} to run them");
        return None;
    }
    Some(PgConfig::from_env().expect("valid PG* environment"))
}

fn connect() -> Option<PgConnection> {
    let config = live_config()?;
    Some(PgConnection::connect(config).expect("connect to live server"))
}

#[test]
fn select_one() {
    let Some(mut conn) = connect() else { return };
    conn.prepare("", "select 1", &[]).unwrap();
    let rows = conn.execute("", "", &[]).unwrap();
    assert_eq!(rows, vec![vec![Some(b"1".to_vec())]]);
    conn.close().unwrap();
}

#[test]
fn parameter_count_mismatch_resyncs() {
    let Some(mut conn) = connect() else { return };
    conn.prepare("", "select 1", &[]).unwrap();
    let err = conn.execute("", "", &[Some(b"1".to_vec())]).unwrap_err();
    assert!(err.is_server_error());
    assert!(conn.is_ready());

    conn.prepare("", "select 2", &[]).unwrap();
    let rows = conn.execute("", "", &[]).unwrap();
    assert_eq!(rows, vec![vec![Some(b"2".to_vec())]]);
}

#[test]
fn describe_reports_shapes() {
    let Some(mut conn) = connect() else { return };
    conn.prepare("s", "select $1::int4 as n, now() as at", &[])
        .unwrap();
    let described = conn.describe_statement("s").unwrap();
    assert_eq!(described.params, vec![oid::INT4]);
    let fields = described.fields.unwrap();
    assert_eq!(fields[0].name, "n");
    assert_eq!(fields[1].type_oid, oid::TIMESTAMPTZ);
    conn.close_statement("s").unwrap();
    conn.resync().unwrap();
}

#[test]
fn interval_and_array_values() {
    let Some(mut conn) = connect() else { return };
    let rows = conn
        .query(
            "select '1 year 2 mons 3 days 04:05:06'::interval, '{1,2,3}'::int4[], $1::int8",
            &[Value::BigInt(-5)],
        )
        .unwrap();
    assert_eq!(
        rows,
        vec![vec![
            Value::Interval(Interval::new(1, 2, 3, 14_706)),
            Value::IntArray(vec![1, 2, 3]),
            Value::BigInt(-5),
        ]]
    );
}

#[test]
fn transaction_and_sequence() {
    let Some(mut conn) = connect() else { return };
    conn.begin().unwrap();
    conn.query("create temporary sequence pgline_live_seq", &[]).unwrap();
    conn.query("select nextval('pgline_live_seq')", &[]).unwrap();
    assert_eq!(conn.serial("pgline_live_seq").unwrap(), 1);
    assert_eq!(conn.serial32("pgline_live_seq").unwrap(), 1);
    conn.rollback().unwrap();
}

#[test]
fn unresolvable_host() {
    if live_config().is_none() {
        return;
    }
    let config = PgConfig::new("u", "db").host("no-such-host.invalid");
    let err = PgAddress::resolve(&config).unwrap_err();
    assert!(matches!(
        err,
        Error::Connection(ref c) if c.kind == ConnectionErrorKind::DnsResolution
    ));
}
