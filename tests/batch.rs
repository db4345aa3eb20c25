//! Tests for execute_batch

mod common;

use std::sync::atomic::{AtomicU32, Ordering};

use common::{get_conn, get_conn_with};
use pgcore::tokio::Conn;
use pgcore::{BatchStatus, Value};

static TABLE_COUNTER: AtomicU32 = AtomicU32::new(0);

async fn create_table(conn: &mut Conn) -> String {
    let id = TABLE_COUNTER.fetch_add(1, Ordering::SeqCst);
    let name = format!("pgcore_batch_{}", id);
    conn.query(&format!(
        "CREATE TEMP TABLE {} (id INT PRIMARY KEY, name TEXT)",
        name
    ))
    .await
    .unwrap();
    name
}

async fn count(conn: &mut Conn, table: &str) -> i64 {
    conn.query(&format!("SELECT COUNT(*) FROM {}", table))
        .await
        .unwrap()
        .get(0, 0)
        .unwrap()
}

#[tokio::test]
async fn every_entry_reports_its_status() {
    let Some(mut conn) = get_conn().await else {
        return;
    };
    let table = create_table(&mut conn).await;

    let mut insert = conn.prepare(format!("INSERT INTO {} VALUES ($1, $2)", table));
    for (id, name) in [(1, "alice"), (2, "bob"), (3, "carol")] {
        insert.bind(0, id).bind(1, name);
        insert.add_batch().unwrap();
    }
    let results = insert.execute_batch().await.unwrap();
    assert!(results.is_success());
    assert!(results.iter().all(|s| matches!(s, BatchStatus::Success(Some(1)))));
    assert_eq!(insert.batch_len(), 0);
    insert.close().await.unwrap();

    assert_eq!(count(&mut conn, &table).await, 3);
}

#[tokio::test]
async fn null_entries_take_the_previous_types() {
    let Some(mut conn) = get_conn().await else {
        return;
    };
    let table = create_table(&mut conn).await;

    let mut insert = conn.prepare(format!("INSERT INTO {} VALUES ($1, $2)", table));
    insert.bind(0, 1_i32).bind(1, "first");
    insert.add_batch().unwrap();
    insert.bind(0, 2_i32).bind(1, Value::Null);
    insert.add_batch().unwrap();
    let results = insert.execute_batch().await.unwrap();
    assert!(results.is_success());
    insert.close().await.unwrap();

    assert_eq!(count(&mut conn, &table).await, 2);
}

#[tokio::test]
async fn failures_do_not_stop_the_batch() {
    let Some(mut conn) = get_conn().await else {
        return;
    };
    let table = create_table(&mut conn).await;

    let mut insert = conn.prepare(format!("INSERT INTO {} VALUES ($1, $2)", table));
    for id in [1, 1, 2] {
        insert.bind(0, id).bind(1, "x");
        insert.add_batch().unwrap();
    }
    let results = insert.execute_batch().await.unwrap();
    let failed: Vec<usize> = results.failures().map(|(index, _)| index).collect();
    assert_eq!(failed, [1]);
    let (_, err) = results.failures().next().unwrap();
    assert_eq!(err.sqlstate(), Some("23505"));
    insert.close().await.unwrap();

    assert_eq!(count(&mut conn, &table).await, 2);
}

#[tokio::test]
async fn strict_mode_aborts_on_the_first_failure() {
    let Some(mut conn) = get_conn_with(|opts| opts.strict_mode = true).await else {
        return;
    };
    let table = create_table(&mut conn).await;

    let mut insert = conn.prepare(format!("INSERT INTO {} VALUES ($1, $2)", table));
    for id in [1, 1, 2] {
        insert.bind(0, id).bind(1, "x");
        insert.add_batch().unwrap();
    }
    let statuses = insert.execute_batch().await.unwrap().into_statuses();
    assert!(matches!(statuses[0], BatchStatus::Success(_)));
    assert!(matches!(statuses[1], BatchStatus::Failed(_)));
    assert!(matches!(statuses[2], BatchStatus::NotExecuted));
    insert.close().await.unwrap();

    assert_eq!(count(&mut conn, &table).await, 1);
}

#[tokio::test]
async fn strict_mode_rejects_row_results() {
    let Some(mut conn) = get_conn_with(|opts| opts.strict_mode = true).await else {
        return;
    };
    let mut select = conn.prepare("SELECT $1::int4");
    select.bind(0, 1_i32);
    select.add_batch().unwrap();
    select.add_batch().unwrap();
    let statuses = select.execute_batch().await.unwrap().into_statuses();
    assert!(matches!(statuses[0], BatchStatus::Failed(_)));
    assert!(matches!(statuses[1], BatchStatus::NotExecuted));
}

#[tokio::test]
async fn entries_must_agree_on_parameter_count() {
    let Some(mut conn) = get_conn().await else {
        return;
    };
    let mut query = conn.prepare("SELECT $1::int4, $2::int4");
    query.bind(0, 1_i32).bind(1, 2_i32);
    query.add_batch().unwrap();
    query.clear_parameters();
    query.bind(0, 1_i32);
    let err = query.add_batch().unwrap_err();
    assert!(matches!(err, pgcore::Error::CacheConsistency(_)));
}
