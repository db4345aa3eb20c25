//! Tests for multi-address connect and cancel

mod common;

use std::path::PathBuf;
use std::time::Duration;

use common::get_opts;
use pgcore::tokio::Conn;
use pgcore::{Error, ServerAddress};

fn missing_socket() -> ServerAddress {
    ServerAddress::Unix(PathBuf::from("/nonexistent/pgcore/.s.PGSQL.5432"))
}

#[tokio::test]
async fn unreachable_addresses_are_skipped() {
    let Some(mut opts) = get_opts() else {
        return;
    };
    opts.addresses.insert(0, missing_socket());
    opts.addresses.insert(
        1,
        ServerAddress::Tcp {
            host: "pgcore-unresolvable.invalid".into(),
            port: 5432,
        },
    );
    let mut conn = Conn::connect(opts).await.unwrap();
    assert_eq!(conn.query("SELECT 1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn all_addresses_failing_reports_the_last() {
    let Some(mut opts) = get_opts() else {
        return;
    };
    opts.addresses = vec![
        missing_socket(),
        ServerAddress::Tcp {
            host: "pgcore-unresolvable.invalid".into(),
            port: 5432,
        },
    ];
    let err = Conn::connect(opts).await.unwrap_err();
    assert!(matches!(err, Error::Connection { .. }));
    assert!(err.to_string().contains("pgcore-unresolvable.invalid"));
}

#[tokio::test]
async fn cancel_stops_a_running_query() {
    let Some(opts) = get_opts() else {
        return;
    };
    let conn = Conn::connect(opts).await.unwrap();
    let pending = conn.executor().query("SELECT pg_sleep(30)");
    tokio::time::sleep(Duration::from_millis(300)).await;
    conn.cancel_handle().cancel().await;

    let response = pending.wait(Duration::from_secs(20)).await.unwrap();
    let err = response.result.unwrap_err();
    assert_eq!(err.sqlstate(), Some("57014"));
}

#[tokio::test]
async fn timeouts_leave_the_connection_usable() {
    let Some(opts) = get_opts() else {
        return;
    };
    let mut conn = Conn::connect(opts).await.unwrap();
    let err = conn
        .executor()
        .query("SELECT pg_sleep(0.5)")
        .wait(Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(err.is_timeout());
    // Requests still run in submission order after the timed-out one.
    assert_eq!(conn.query("SELECT 1").await.unwrap().len(), 1);
}
