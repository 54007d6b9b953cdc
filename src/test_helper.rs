use std::str::FromStr;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::NaiveDate;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tower::ServiceExt;

use crate::config::Config;
use crate::ledger::Ledger;
use crate::models::{NewAttendance, Status};
use crate::{app, store};

/// A fresh ledger over a private in-memory database.
///
/// One connection only: every pooled connection to `sqlite::memory:` would
/// otherwise see its own empty database.
pub async fn ledger() -> Ledger {
    let options = SqliteConnectOptions::from_str("sqlite::memory:").unwrap();
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .unwrap();
    store::init_schema(&pool).await.unwrap();
    Ledger::new(pool)
}

pub fn math_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 10).unwrap()
}

pub fn entry(student_id: i64, status: Status) -> NewAttendance {
    NewAttendance {
        student_id,
        subject: "Math".into(),
        date: math_day(),
        status,
        hour: 1,
    }
}

/// Writes straight to the table, bypassing the ledger.
pub async fn tamper(ledger: &Ledger, sql: &str, id: i64) {
    sqlx::query(sql)
        .bind(id)
        .execute(ledger.pool())
        .await
        .unwrap();
}

pub async fn call(
    ledger: &Ledger,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let uploads = std::env::temp_dir().join("attendance-ledger-tests");
    let config = Config {
        uploads_dir: uploads,
        ..Config::default()
    };
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(match body {
            Some(json) => Body::from(json.to_string()),
            None => Body::empty(),
        })
        .unwrap();
    let response = app(ledger.clone(), config).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}
