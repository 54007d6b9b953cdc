use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::hashing::DATE_FORMAT;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Status {
    Present,
    Absent,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Present => "Present",
            Status::Absent => "Absent",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exact match only: `"present"` is not a status.
impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Present" => Ok(Status::Present),
            "Absent" => Ok(Status::Absent),
            other => Err(format!("unknown attendance status `{}`", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestRole {
    Student,
    Teacher,
}

impl RequestRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestRole::Student => "student",
            RequestRole::Teacher => "teacher",
        }
    }
}

impl fmt::Display for RequestRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "student" => Ok(RequestRole::Student),
            "teacher" => Ok(RequestRole::Teacher),
            other => Err(format!("unknown request role `{}`", other)),
        }
    }
}

/// An attendance row exactly as it sits in the store.
///
/// SQLite does not enforce column types, so every content field is loaded
/// only when it holds the expected storage class and is `None` otherwise.
/// A hand-edited row can then still be loaded and reported instead of
/// failing to decode.
#[derive(Debug, Clone, Eq, PartialEq, sqlx::FromRow)]
pub struct StoredRecord {
    pub id: i64,
    pub student_id: Option<i64>,
    pub subject: Option<String>,
    pub date: Option<String>,
    pub status: Option<String>,
    pub hour: Option<i64>,
    pub previous_hash: Option<String>,
    pub current_hash: Option<String>,
}

/// A chained attendance row with its fields parsed.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub id: i64,
    pub student_id: i64,
    pub subject: String,
    pub date: NaiveDate,
    pub status: Status,
    pub hour: i64,
    pub previous_hash: Option<String>,
    pub current_hash: Option<String>,
}

impl StoredRecord {
    /// Accepts only the exact text the ledger writes, so `2024-1-10` is
    /// refused even though it names the same day.
    pub fn parse_date(&self) -> Result<NaiveDate, String> {
        let text = self.date.as_deref().ok_or("date is not text")?;
        let date = NaiveDate::parse_from_str(text, DATE_FORMAT)
            .map_err(|err| format!("unparseable date `{}`: {}", text, err))?;
        if date.format(DATE_FORMAT).to_string() != text {
            return Err(format!("non-canonical date `{}`", text));
        }
        Ok(date)
    }

    pub fn parse_status(&self) -> Result<Status, String> {
        Status::from_str(self.status.as_deref().ok_or("status is not text")?)
    }

    pub fn has_status(&self, status: Status) -> bool {
        self.status.as_deref() == Some(status.as_str())
    }
}

impl TryFrom<StoredRecord> for AttendanceRecord {
    type Error = String;

    fn try_from(row: StoredRecord) -> Result<Self, Self::Error> {
        let date = row.parse_date()?;
        let status = row.parse_status()?;
        Ok(AttendanceRecord {
            id: row.id,
            student_id: row.student_id.ok_or("student_id is not an integer")?,
            subject: row.subject.ok_or("subject is not text")?,
            date,
            status,
            hour: row.hour.ok_or("hour is not an integer")?,
            previous_hash: row.previous_hash,
            current_hash: row.current_hash,
        })
    }
}

/// The content of a row about to be appended.
#[derive(Debug, Clone, Eq, PartialEq, Deserialize)]
pub struct NewAttendance {
    pub student_id: i64,
    pub subject: String,
    pub date: NaiveDate,
    pub status: Status,
    pub hour: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PendingChangeRow {
    pub id: i64,
    pub attendance_id: i64,
    pub new_status: String,
    pub requested_by: String,
    pub request_role: String,
    pub timestamp: NaiveDateTime,
    pub comment: String,
    pub document_path: Option<String>,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct PendingChange {
    pub id: i64,
    pub attendance_id: i64,
    pub new_status: Status,
    pub requested_by: String,
    pub request_role: RequestRole,
    pub timestamp: NaiveDateTime,
    pub comment: String,
    pub document_path: Option<String>,
}

impl TryFrom<PendingChangeRow> for PendingChange {
    type Error = String;

    fn try_from(row: PendingChangeRow) -> Result<Self, Self::Error> {
        Ok(PendingChange {
            id: row.id,
            attendance_id: row.attendance_id,
            new_status: Status::from_str(&row.new_status)?,
            requested_by: row.requested_by,
            request_role: RequestRole::from_str(&row.request_role)?,
            timestamp: row.timestamp,
            comment: row.comment,
            document_path: row.document_path,
        })
    }
}
