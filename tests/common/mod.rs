//! Shared helpers for tests against a live server.
//!
//! Every test returns early when `DATABASE_URL` is not set.

#![allow(dead_code)]

use std::env;

use pgcore::Opts;
use pgcore::tokio::Conn;

pub fn database_url() -> Option<String> {
    let mut db_url = env::var("DATABASE_URL").ok()?;
    if !db_url.contains("sslmode=") {
        if db_url.contains('?') {
            db_url.push_str("&sslmode=disable");
        } else {
            db_url.push_str("?sslmode=disable");
        }
    }
    Some(db_url)
}

pub fn get_opts() -> Option<Opts> {
    let db_url = database_url()?;
    Some(Opts::try_from(db_url.as_str()).expect("Invalid DATABASE_URL"))
}

pub async fn get_conn() -> Option<Conn> {
    let opts = get_opts()?;
    Some(Conn::connect(opts).await.expect("Failed to connect"))
}

pub async fn get_conn_with(configure: impl FnOnce(&mut Opts)) -> Option<Conn> {
    let mut opts = get_opts()?;
    configure(&mut opts);
    Some(Conn::connect(opts).await.expect("Failed to connect"))
}
