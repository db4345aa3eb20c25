//! Tests for cancelling the blocking client
#![cfg(feature = "sync")]

mod common;

use std::thread;
use std::time::Duration;

use common::get_opts;
use pgcore::sync::Conn;

#[test]
fn another_thread_cancels_a_blocked_query() {
    let Some(opts) = get_opts() else {
        return;
    };
    let mut conn = Conn::connect(opts).unwrap();
    let handle = conn.cancel_handle();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(300));
        handle.cancel();
    });

    let err = conn.query("SELECT pg_sleep(30)").unwrap_err();
    assert_eq!(err.sqlstate(), Some("57014"));
    canceller.join().unwrap();

    assert_eq!(conn.query("SELECT 1").unwrap().len(), 1);
    conn.close();
}
