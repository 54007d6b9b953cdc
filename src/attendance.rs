use axum::extract::Path;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::integrity::IntegrityReport;
use crate::ledger::{Ledger, Recalculation, RosterOutcome, RosterSubmission};
use crate::models::{AttendanceRecord, Status};
use crate::{proceeds, Payload};

pub async fn submit_attendance(
    Json(submission): Json<RosterSubmission>,
    Extension(ledger): Extension<Ledger>,
) -> Payload<RosterOutcome> {
    let outcome = ledger.submit_roster(submission).await?;
    proceeds(outcome)
}

pub async fn read_attendance(
    Path(id): Path<i64>,
    Extension(ledger): Extension<Ledger>,
) -> Payload<AttendanceRecord> {
    proceeds(ledger.record(id).await?)
}

pub async fn edit_status(
    Path(id): Path<i64>,
    Json(EditStatus { status }): Json<EditStatus>,
    Extension(ledger): Extension<Ledger>,
) -> Payload<StatusEdited> {
    let recalculation = ledger.edit_status(id, status).await?;
    let record = ledger.record(id).await?;
    proceeds(StatusEdited {
        record,
        recalculation,
    })
}

pub async fn delete_attendance(
    Path(id): Path<i64>,
    Extension(ledger): Extension<Ledger>,
) -> Payload<AttendanceDeleted> {
    ledger.delete_record(id).await?;
    proceeds(AttendanceDeleted {
        attendance_id: id,
        chain_repaired: false,
    })
}

pub async fn verify_integrity(Extension(ledger): Extension<Ledger>) -> Payload<IntegrityReport> {
    proceeds(ledger.verify_chain().await?)
}

pub async fn migrate_hashes(Extension(ledger): Extension<Ledger>) -> Payload<HashesMigrated> {
    let recalculation = ledger.migrate_hashes().await?;
    proceeds(HashesMigrated { recalculation })
}

#[derive(Debug, Clone, Deserialize)]
pub struct EditStatus {
    pub status: Status,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusEdited {
    pub record: AttendanceRecord,
    pub recalculation: Option<Recalculation>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttendanceDeleted {
    pub attendance_id: i64,
    pub chain_repaired: bool,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
pub struct HashesMigrated {
    pub recalculation: Option<Recalculation>,
}
