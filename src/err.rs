#![allow(non_snake_case)]

use crate::models::RequestRole;
use crate::{IntoResponse, Uri};

use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;

use serde::Serialize;

pub async fn handler404(path: Uri) -> (StatusCode, Json<Error>) {
    (
        StatusCode::NOT_FOUND,
        Json(Error::NotFound {
            message: format!("Invalid path: {}", path),
        }),
    )
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Maybe<T> {
    Nothing(Error),
    Fine(Success<T>),
}

pub fn Fine<V>(v: V) -> Maybe<V>
where
    V: Serialize,
{
    Maybe::Fine(Success::of(v))
}

pub fn Nothing<V>(err: Error) -> Maybe<V> {
    Maybe::Nothing(err)
}

#[derive(Debug, Clone, Serialize)]
pub struct Success<V> {
    success: bool,
    #[serde(flatten)]
    value: V,
}

impl<T> IntoResponse for Maybe<T>
where
    T: Serialize,
{
    fn into_response(self) -> Response {
        match self {
            Maybe::Nothing(err) => err.into_response(),
            Maybe::Fine(success) => Json::into_response(Json(success)),
        }
    }
}

impl<V: Serialize> Success<V> {
    pub fn of(value: V) -> Self {
        Self {
            success: true,
            value,
        }
    }
}

#[derive(Debug, Clone, Serialize, thiserror::Error)]
#[serde(tag = "error")]
pub enum Error {
    #[error("{message}")]
    NotFound { message: String },
    #[error("{message}")]
    InvalidPayload { message: String },
    #[error("a change request for attendance record {attendance_id} is already pending from {role}")]
    AlreadyPending {
        attendance_id: i64,
        role: RequestRole,
        message: String,
    },
    #[error("attendance record {record_id} is malformed: {reason}")]
    MalformedRecord { record_id: i64, reason: String },
    #[error("{message}")]
    ConcurrentWriteConflict { message: String },
    #[error("{kind}: {message}")]
    InternalError { kind: &'static str, message: String },
    #[error("{message}")]
    Unknown { message: String },
}

impl Error {
    pub fn unknown<S: Into<String>>(msg: S) -> Error {
        Error::Unknown {
            message: msg.into(),
        }
    }

    pub fn not_found<S: Into<String>>(msg: S) -> Error {
        Error::NotFound {
            message: msg.into(),
        }
    }

    pub fn invalid<S: Into<String>>(msg: S) -> Error {
        Error::InvalidPayload {
            message: msg.into(),
        }
    }

    pub fn already_pending(attendance_id: i64, role: RequestRole) -> Error {
        let requester = match role {
            RequestRole::Teacher => "a teacher",
            RequestRole::Student => "a student",
        };
        Error::AlreadyPending {
            attendance_id,
            role,
            message: format!(
                "A change request for this record is already pending from {}.",
                requester
            ),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::InvalidPayload { .. } => StatusCode::BAD_REQUEST,
            Error::AlreadyPending { .. } => StatusCode::CONFLICT,
            Error::MalformedRecord { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Error::ConcurrentWriteConflict { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Error::InternalError { .. } | Error::Unknown { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self)).into_response()
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            // SQLite reports extended result codes; the low byte is the primary code.
            let primary = db
                .code()
                .and_then(|code| code.parse::<i32>().ok())
                .map(|code| code & 0xff);
            if let Some(5) | Some(6) = primary {
                return Self::ConcurrentWriteConflict {
                    message: db.message().to_string(),
                };
            }
        }
        if let sqlx::Error::PoolTimedOut = err {
            return Self::ConcurrentWriteConflict {
                message: err.to_string(),
            };
        }
        Self::InternalError {
            kind: "DatabaseError",
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(io: std::io::Error) -> Self {
        Self::InternalError {
            kind: "IOError",
            message: io.to_string(),
        }
    }
}

impl From<hex::FromHexError> for Error {
    fn from(err: hex::FromHexError) -> Self {
        Self::InvalidPayload {
            message: format!("document content is not valid hex: {}", err),
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Unknown {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_serialize_with_their_kind() {
        let json = serde_json::to_value(Error::already_pending(4, RequestRole::Teacher)).unwrap();
        assert_eq!(json["error"], "AlreadyPending");
        assert_eq!(json["attendance_id"], 4);
        assert_eq!(json["role"], "teacher");
        assert_eq!(
            json["message"],
            "A change request for this record is already pending from a teacher."
        );
    }

    #[test]
    fn success_envelope_flattens_value() {
        #[derive(Serialize)]
        struct Count {
            count: u32,
        }
        let json = serde_json::to_value(Fine(Count { count: 3 })).unwrap();
        assert_eq!(json, serde_json::json!({ "success": true, "count": 3 }));
    }

    #[test]
    fn status_codes_follow_kind() {
        assert_eq!(Error::not_found("x").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            Error::already_pending(1, RequestRole::Student).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            Error::ConcurrentWriteConflict {
                message: "busy".into()
            }
            .status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
