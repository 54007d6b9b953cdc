//! Pending status changes and the admin decisions on them.
//!
//! Approval is the only way besides a direct admin edit that a stored status
//! changes, and it always repairs the chain in the same transaction.

use std::collections::HashMap;
use std::path::Path;

use chrono::{NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;

use crate::io::{discard_document, save_document};
use crate::ledger::{recalculate_in, Ledger, Recalculation};
use crate::models::{PendingChange, RequestRole, Status};
use crate::{store, Error};

/// Separates the shared reason of a batch from a per-record note.
pub const NOTE_SEPARATOR: &str = " | ";

#[derive(Debug, Clone, Deserialize)]
pub struct DocumentUpload {
    pub file_name: String,
    pub content_hex: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChangeRequest {
    pub attendance_id: i64,
    pub new_status: Status,
    pub requested_by: String,
    pub request_role: RequestRole,
    pub comment: String,
    pub document: Option<DocumentUpload>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchRecordChange {
    pub attendance_id: i64,
    pub new_status: Status,
    pub note: Option<String>,
}

/// Several records changed for one shared reason, as a teacher submits them.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchChangeRequest {
    pub requested_by: String,
    pub request_role: RequestRole,
    pub reason: String,
    #[serde(default)]
    pub use_same_comment: bool,
    pub changes: Vec<BatchRecordChange>,
}

#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize)]
pub struct BatchRequestOutcome {
    pub submitted: Vec<i64>,
    pub skipped_student_pending: usize,
    pub skipped_teacher_pending: usize,
    pub skipped_unchanged: usize,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct PendingGroup {
    pub requested_by: String,
    pub request_role: RequestRole,
    pub timestamp: NaiveDateTime,
    pub reason: String,
    pub changes: Vec<PendingChange>,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct Approval {
    pub approved: usize,
    pub recalculation: Option<Recalculation>,
}

impl Ledger {
    pub async fn request_change(
        &self,
        request: ChangeRequest,
        uploads_dir: &Path,
    ) -> Result<PendingChange, Error> {
        if request.requested_by.trim().is_empty() {
            return Err(Error::invalid("`requested_by` parameter was empty"));
        }
        if request.comment.trim().is_empty() {
            return Err(Error::invalid("A reason is required for change requests."));
        }
        let document = match &request.document {
            Some(doc) => Some((doc.file_name.clone(), hex::decode(&doc.content_hex)?)),
            None => None,
        };

        let mut scope = self.begin_write().await?;
        check_requestable(&mut scope.tx, request.attendance_id, request.new_status).await?;

        let timestamp = now();
        let document_path = match document {
            Some((file_name, bytes)) => {
                let path = save_document(
                    uploads_dir,
                    &request.requested_by,
                    timestamp,
                    &file_name,
                    &bytes,
                )
                .await?;
                Some(path.to_string_lossy().into_owned())
            }
            None => None,
        };

        let mut change = PendingChange {
            id: 0,
            attendance_id: request.attendance_id,
            new_status: request.new_status,
            requested_by: request.requested_by,
            request_role: request.request_role,
            timestamp,
            comment: request.comment.trim().to_string(),
            document_path,
        };
        let inserted = store::insert_pending(&mut scope.tx, &change).await;
        let stored = match inserted {
            Ok(id) => scope.commit().await.map(|()| id),
            Err(err) => Err(err),
        };
        change.id = match stored {
            Ok(id) => id,
            Err(err) => {
                if let Some(path) = &change.document_path {
                    discard_document(Path::new(path)).await;
                }
                return Err(err);
            }
        };
        log::info!(
            "Change request {} from {} {}: record {} -> {}",
            change.id,
            change.request_role,
            change.requested_by,
            change.attendance_id,
            change.new_status
        );
        Ok(change)
    }

    /// Files one request per record; records already pending or already at
    /// the requested status are skipped and counted.
    pub async fn request_changes(
        &self,
        batch: BatchChangeRequest,
    ) -> Result<BatchRequestOutcome, Error> {
        let reason = batch.reason.trim();
        if reason.is_empty() {
            return Err(Error::invalid("A reason is required for change requests."));
        }
        if batch.requested_by.trim().is_empty() {
            return Err(Error::invalid("`requested_by` parameter was empty"));
        }

        let mut scope = self.begin_write().await?;
        let timestamp = now();
        let mut outcome = BatchRequestOutcome::default();
        for item in batch.changes {
            match check_requestable(&mut scope.tx, item.attendance_id, item.new_status).await {
                Ok(()) => {}
                Err(Error::AlreadyPending { role, .. }) => {
                    match role {
                        RequestRole::Student => outcome.skipped_student_pending += 1,
                        RequestRole::Teacher => outcome.skipped_teacher_pending += 1,
                    }
                    continue;
                }
                Err(Error::InvalidPayload { .. }) => {
                    outcome.skipped_unchanged += 1;
                    continue;
                }
                Err(err) => return Err(err),
            }
            let note = item.note.as_deref().map(str::trim).unwrap_or("");
            let comment = if batch.use_same_comment || note.is_empty() {
                reason.to_string()
            } else {
                format!("{}{}{}", reason, NOTE_SEPARATOR, note)
            };
            let change = PendingChange {
                id: 0,
                attendance_id: item.attendance_id,
                new_status: item.new_status,
                requested_by: batch.requested_by.clone(),
                request_role: batch.request_role,
                timestamp,
                comment,
                document_path: None,
            };
            store::insert_pending(&mut scope.tx, &change).await?;
            outcome.submitted.push(item.attendance_id);
        }
        scope.commit().await?;
        log::info!(
            "Change request submitted for {} records. Skipped {} (already pending from student), {} (already pending from teacher).",
            outcome.submitted.len(),
            outcome.skipped_student_pending,
            outcome.skipped_teacher_pending
        );
        Ok(outcome)
    }

    /// Newest first.
    pub async fn list_pending(&self) -> Result<Vec<PendingChange>, Error> {
        let mut conn = self.pool().acquire().await?;
        store::list_pending(&mut conn).await
    }

    pub async fn pending_groups(&self) -> Result<Vec<PendingGroup>, Error> {
        Ok(group_pending(self.list_pending().await?))
    }

    pub async fn approve_change(&self, change_id: i64) -> Result<Approval, Error> {
        self.approve_batch(&[change_id]).await
    }

    /// Applies every status first, then repairs the chain once from the
    /// smallest edited id. Any failure rolls the whole batch back.
    pub async fn approve_batch(&self, change_ids: &[i64]) -> Result<Approval, Error> {
        let mut scope = self.begin_write().await?;
        let mut edited = Vec::with_capacity(change_ids.len());
        for &change_id in change_ids {
            let change = store::find_pending(&mut scope.tx, change_id)
                .await?
                .ok_or_else(|| {
                    Error::not_found(format!("Change request {} does not exist", change_id))
                })?;
            if !store::update_status(&mut scope.tx, change.attendance_id, change.new_status).await? {
                return Err(Error::not_found(format!(
                    "Attendance record {} for change request {} does not exist",
                    change.attendance_id, change_id
                )));
            }
            store::delete_pending(&mut scope.tx, change_id).await?;
            edited.push(change.attendance_id);
        }
        let recalculation = match edited.iter().copied().min() {
            Some(start_id) => Some(recalculate_in(&mut scope.tx, start_id).await?),
            None => None,
        };
        scope.commit().await?;
        log::info!("{} change(s) approved", edited.len());
        Ok(Approval {
            approved: edited.len(),
            recalculation,
        })
    }

    pub async fn reject_change(&self, change_id: i64) -> Result<usize, Error> {
        self.reject_batch(&[change_id]).await
    }

    pub async fn reject_batch(&self, change_ids: &[i64]) -> Result<usize, Error> {
        let mut scope = self.begin_write().await?;
        for &change_id in change_ids {
            if !store::delete_pending(&mut scope.tx, change_id).await? {
                return Err(Error::not_found(format!(
                    "Change request {} does not exist",
                    change_id
                )));
            }
        }
        scope.commit().await?;
        log::info!("{} change(s) rejected", change_ids.len());
        Ok(change_ids.len())
    }
}

/// Refuses unknown records, requests that change nothing, and a second
/// request for a record that already has one.
async fn check_requestable(
    conn: &mut SqliteConnection,
    attendance_id: i64,
    new_status: Status,
) -> Result<(), Error> {
    let record = store::find_record(conn, attendance_id)
        .await?
        .ok_or_else(|| {
            Error::not_found(format!("Attendance record {} does not exist", attendance_id))
        })?;
    if let Some(existing) = store::pending_for_record(conn, attendance_id).await? {
        return Err(Error::already_pending(attendance_id, existing.request_role));
    }
    if record.has_status(new_status) {
        return Err(Error::invalid(format!(
            "Attendance record {} is already {}",
            attendance_id, new_status
        )));
    }
    Ok(())
}

/// Groups changes submitted together: same requester, same second, same
/// shared reason. Group order follows the first change seen.
pub fn group_pending(changes: Vec<PendingChange>) -> Vec<PendingGroup> {
    let mut index: HashMap<(String, NaiveDateTime, String), usize> = HashMap::new();
    let mut groups: Vec<PendingGroup> = Vec::new();
    for change in changes {
        let reason = change
            .comment
            .split(NOTE_SEPARATOR)
            .next()
            .unwrap_or("")
            .to_string();
        let second = change.timestamp.with_nanosecond(0).unwrap_or(change.timestamp);
        let key = (change.requested_by.clone(), second, reason.clone());
        match index.get(&key) {
            Some(&at) => groups[at].changes.push(change),
            None => {
                index.insert(key, groups.len());
                groups.push(PendingGroup {
                    requested_by: change.requested_by.clone(),
                    request_role: change.request_role,
                    timestamp: second,
                    reason,
                    changes: vec![change],
                });
            }
        }
    }
    groups
}

fn now() -> NaiveDateTime {
    let now = chrono::Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}
