//! Reads and writes of attendance rows and their hash fields.
//!
//! Every function takes the connection it runs on, so callers decide which
//! transaction a read or write belongs to.

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{SqliteConnection, SqlitePool};

use crate::config::Config;
use crate::hashing::{DATE_FORMAT, GENESIS_HASH};
use crate::models::{NewAttendance, PendingChange, PendingChangeRow, Status, StoredRecord};
use crate::Error;

/// Content columns come back NULL unless they hold the storage class the
/// ledger writes. A hash stored as a blob comes back empty, so it can never
/// match.
const RECORD_COLUMNS: &str = "id,
    CASE typeof(student_id) WHEN 'integer' THEN student_id END AS student_id,
    CASE typeof(subject) WHEN 'text' THEN subject END AS subject,
    CASE typeof(date) WHEN 'text' THEN date END AS date,
    CASE typeof(status) WHEN 'text' THEN status END AS status,
    CASE typeof(hour) WHEN 'integer' THEN hour END AS hour,
    CASE typeof(previous_hash) WHEN 'blob' THEN '' ELSE previous_hash END AS previous_hash,
    CASE typeof(current_hash) WHEN 'blob' THEN '' ELSE current_hash END AS current_hash";

const PENDING_COLUMNS: &str =
    "id, attendance_id, new_status, requested_by, request_role, timestamp, comment, document_path";

pub async fn connect(config: &Config) -> Result<SqlitePool, Error> {
    let options = SqliteConnectOptions::from_str(&config.database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(config.busy_timeout);
    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.busy_timeout.max(Duration::from_secs(1)))
        .connect_with(options)
        .await?;
    Ok(pool)
}

pub async fn init_schema(pool: &SqlitePool) -> Result<(), Error> {
    let mut conn = pool.acquire().await?;
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS attendance (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            student_id INTEGER NOT NULL,
            subject TEXT NOT NULL,
            date TEXT NOT NULL,
            status TEXT NOT NULL,
            hour INTEGER NOT NULL,
            previous_hash TEXT,
            current_hash TEXT
        )",
    )
    .execute(&mut *conn)
    .await?;
    ensure_hash_columns(&mut conn).await?;
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS attendance_slot
            ON attendance (student_id, subject, date, hour)",
    )
    .execute(&mut *conn)
    .await?;
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS pending_attendance_changes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            attendance_id INTEGER NOT NULL UNIQUE,
            new_status TEXT NOT NULL,
            requested_by TEXT NOT NULL,
            request_role TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            comment TEXT NOT NULL,
            document_path TEXT,
            FOREIGN KEY(attendance_id) REFERENCES attendance(id)
        )",
    )
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Tables created before the chain existed lack the hash columns.
async fn ensure_hash_columns(conn: &mut SqliteConnection) -> Result<(), Error> {
    for column in ["previous_hash", "current_hash"] {
        let present: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM pragma_table_info('attendance') WHERE name = ?",
        )
        .bind(column)
        .fetch_one(&mut *conn)
        .await?;
        if present == 0 {
            log::info!("Adding missing `{}` column to attendance", column);
            sqlx::query(&format!("ALTER TABLE attendance ADD COLUMN {} TEXT", column))
                .execute(&mut *conn)
                .await?;
        }
    }
    Ok(())
}

/// `current_hash` of the row with the greatest id, or genesis when empty.
pub async fn last_hash(conn: &mut SqliteConnection) -> Result<String, Error> {
    let last: Option<Option<String>> = sqlx::query_scalar(
        "SELECT CASE typeof(current_hash) WHEN 'blob' THEN '' ELSE current_hash END \
            FROM attendance ORDER BY id DESC LIMIT 1",
    )
    .fetch_optional(&mut *conn)
    .await?;
    Ok(last.flatten().unwrap_or_else(|| GENESIS_HASH.to_string()))
}

/// `current_hash` of the row immediately before `start_id`, or genesis.
pub async fn predecessor_hash(conn: &mut SqliteConnection, start_id: i64) -> Result<String, Error> {
    let prev: Option<Option<String>> = sqlx::query_scalar(
        "SELECT CASE typeof(current_hash) WHEN 'blob' THEN '' ELSE current_hash END \
            FROM attendance WHERE id < ? ORDER BY id DESC LIMIT 1",
    )
    .bind(start_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(prev.flatten().unwrap_or_else(|| GENESIS_HASH.to_string()))
}

pub async fn records_from(
    conn: &mut SqliteConnection,
    start_id: i64,
) -> Result<Vec<StoredRecord>, Error> {
    let rows = sqlx::query_as::<_, StoredRecord>(&format!(
        "SELECT {} FROM attendance WHERE id >= ? ORDER BY id ASC",
        RECORD_COLUMNS
    ))
    .bind(start_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows)
}

pub async fn all_records(conn: &mut SqliteConnection) -> Result<Vec<StoredRecord>, Error> {
    records_from(conn, i64::MIN).await
}

pub async fn find_record(
    conn: &mut SqliteConnection,
    id: i64,
) -> Result<Option<StoredRecord>, Error> {
    let row = sqlx::query_as::<_, StoredRecord>(&format!(
        "SELECT {} FROM attendance WHERE id = ?",
        RECORD_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row)
}

pub async fn find_slot(
    conn: &mut SqliteConnection,
    student_id: i64,
    subject: &str,
    date: &str,
    hour: i64,
) -> Result<Option<StoredRecord>, Error> {
    let row = sqlx::query_as::<_, StoredRecord>(&format!(
        "SELECT {} FROM attendance WHERE attendance.student_id = ? AND attendance.subject = ? \
            AND attendance.date = ? AND attendance.hour = ?",
        RECORD_COLUMNS
    ))
    .bind(student_id)
    .bind(subject)
    .bind(date)
    .bind(hour)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(row)
}

/// Smallest id whose hash columns were never filled in.
pub async fn first_unchained_id(conn: &mut SqliteConnection) -> Result<Option<i64>, Error> {
    let id: Option<i64> = sqlx::query_scalar(
        "SELECT MIN(id) FROM attendance WHERE previous_hash IS NULL OR current_hash IS NULL",
    )
    .fetch_one(&mut *conn)
    .await?;
    Ok(id)
}

pub async fn insert_record(
    conn: &mut SqliteConnection,
    entry: &NewAttendance,
    previous_hash: &str,
    current_hash: &str,
) -> Result<i64, Error> {
    let res = sqlx::query(
        "INSERT INTO attendance (student_id, subject, date, status, hour, previous_hash, current_hash)
            VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(entry.student_id)
    .bind(&entry.subject)
    .bind(entry.date.format(DATE_FORMAT).to_string())
    .bind(entry.status.as_str())
    .bind(entry.hour)
    .bind(previous_hash)
    .bind(current_hash)
    .execute(&mut *conn)
    .await?;
    Ok(res.last_insert_rowid())
}

/// Changes only the status column. Hashes are left for the caller to repair.
pub async fn update_status(
    conn: &mut SqliteConnection,
    id: i64,
    status: Status,
) -> Result<bool, Error> {
    let res = sqlx::query("UPDATE attendance SET status = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(res.rows_affected() >= 1)
}

pub async fn update_hashes(
    conn: &mut SqliteConnection,
    id: i64,
    previous_hash: &str,
    current_hash: &str,
) -> Result<(), Error> {
    sqlx::query("UPDATE attendance SET previous_hash = ?, current_hash = ? WHERE id = ?")
        .bind(previous_hash)
        .bind(current_hash)
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn delete_record(conn: &mut SqliteConnection, id: i64) -> Result<bool, Error> {
    let res = sqlx::query("DELETE FROM attendance WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(res.rows_affected() >= 1)
}

pub async fn insert_pending(
    conn: &mut SqliteConnection,
    change: &PendingChange,
) -> Result<i64, Error> {
    let res = sqlx::query(
        "INSERT INTO pending_attendance_changes
            (attendance_id, new_status, requested_by, request_role, timestamp, comment, document_path)
            VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(change.attendance_id)
    .bind(change.new_status.as_str())
    .bind(&change.requested_by)
    .bind(change.request_role.as_str())
    .bind(change.timestamp)
    .bind(&change.comment)
    .bind(&change.document_path)
    .execute(&mut *conn)
    .await?;
    Ok(res.last_insert_rowid())
}

pub async fn find_pending(
    conn: &mut SqliteConnection,
    id: i64,
) -> Result<Option<PendingChange>, Error> {
    let row = sqlx::query_as::<_, PendingChangeRow>(&format!(
        "SELECT {} FROM pending_attendance_changes WHERE id = ?",
        PENDING_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;
    row.map(decode_pending).transpose()
}

pub async fn pending_for_record(
    conn: &mut SqliteConnection,
    attendance_id: i64,
) -> Result<Option<PendingChange>, Error> {
    let row = sqlx::query_as::<_, PendingChangeRow>(&format!(
        "SELECT {} FROM pending_attendance_changes WHERE attendance_id = ?",
        PENDING_COLUMNS
    ))
    .bind(attendance_id)
    .fetch_optional(&mut *conn)
    .await?;
    row.map(decode_pending).transpose()
}

pub async fn list_pending(conn: &mut SqliteConnection) -> Result<Vec<PendingChange>, Error> {
    let rows = sqlx::query_as::<_, PendingChangeRow>(&format!(
        "SELECT {} FROM pending_attendance_changes ORDER BY timestamp DESC, id DESC",
        PENDING_COLUMNS
    ))
    .fetch_all(&mut *conn)
    .await?;
    rows.into_iter().map(decode_pending).collect()
}

pub async fn delete_pending(conn: &mut SqliteConnection, id: i64) -> Result<bool, Error> {
    let res = sqlx::query("DELETE FROM pending_attendance_changes WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(res.rows_affected() >= 1)
}

pub async fn delete_pending_for_record(
    conn: &mut SqliteConnection,
    attendance_id: i64,
) -> Result<u64, Error> {
    let res = sqlx::query("DELETE FROM pending_attendance_changes WHERE attendance_id = ?")
        .bind(attendance_id)
        .execute(&mut *conn)
        .await?;
    Ok(res.rows_affected())
}

fn decode_pending(row: PendingChangeRow) -> Result<PendingChange, Error> {
    let id = row.id;
    PendingChange::try_from(row).map_err(|reason| Error::InternalError {
        kind: "DecodeError",
        message: format!("pending change {}: {}", id, reason),
    })
}
