use axum::extract::Path;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use crate::approvals::{Approval, BatchChangeRequest, BatchRequestOutcome, ChangeRequest, PendingGroup};
use crate::config::Config;
use crate::ledger::Ledger;
use crate::models::PendingChange;
use crate::err::Error;
use crate::{breaks, proceeds, Payload};

pub async fn request_change(
    Json(request): Json<ChangeRequest>,
    Extension(ledger): Extension<Ledger>,
    Extension(config): Extension<Config>,
) -> Payload<PendingChange> {
    proceeds(ledger.request_change(request, &config.uploads_dir).await?)
}

pub async fn request_changes(
    Json(batch): Json<BatchChangeRequest>,
    Extension(ledger): Extension<Ledger>,
) -> Payload<BatchRequestOutcome> {
    proceeds(ledger.request_changes(batch).await?)
}

pub async fn list_pending(Extension(ledger): Extension<Ledger>) -> Payload<PendingList> {
    proceeds(PendingList {
        groups: ledger.pending_groups().await?,
    })
}

pub async fn approve_change(
    Path(id): Path<i64>,
    Extension(ledger): Extension<Ledger>,
) -> Payload<Approval> {
    proceeds(ledger.approve_change(id).await?)
}

pub async fn reject_change(
    Path(id): Path<i64>,
    Extension(ledger): Extension<Ledger>,
) -> Payload<Rejected> {
    let rejected = ledger.reject_change(id).await?;
    proceeds(Rejected { rejected })
}

pub async fn approve_batch(
    Json(ChangeIds { change_ids }): Json<ChangeIds>,
    Extension(ledger): Extension<Ledger>,
) -> Payload<Approval> {
    if change_ids.is_empty() {
        return breaks(Error::invalid("No changes selected"));
    }
    proceeds(ledger.approve_batch(&change_ids).await?)
}

pub async fn reject_batch(
    Json(ChangeIds { change_ids }): Json<ChangeIds>,
    Extension(ledger): Extension<Ledger>,
) -> Payload<Rejected> {
    if change_ids.is_empty() {
        return breaks(Error::invalid("No changes selected"));
    }
    let rejected = ledger.reject_batch(&change_ids).await?;
    proceeds(Rejected { rejected })
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChangeIds {
    pub change_ids: Vec<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PendingList {
    pub groups: Vec<PendingGroup>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Rejected {
    pub rejected: usize,
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::models::Status;
    use crate::test_helper::{call, entry, ledger};

    #[tokio::test]
    async fn request_conflict_and_batch_approval_over_http() {
        let ledger = ledger().await;
        ledger
            .append_batch((1..=3).map(|s| entry(s, Status::Absent)).collect())
            .await
            .unwrap();

        let request = json!({
            "attendance_id": 2,
            "new_status": "Present",
            "requested_by": "1RV21CS002",
            "request_role": "student",
            "comment": "medical leave"
        });
        let (status, created) = call(&ledger, "POST", "/changes", Some(request.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(created["request_role"], "student");

        let (status, conflict) = call(&ledger, "POST", "/changes", Some(request)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(conflict["error"], "AlreadyPending");
        assert_eq!(conflict["role"], "student");

        let (_, listed) = call(&ledger, "GET", "/changes", None).await;
        assert_eq!(listed["groups"][0]["reason"], "medical leave");

        let id = created["id"].as_i64().unwrap();
        let (status, approval) = call(
            &ledger,
            "POST",
            "/batch/approve",
            Some(json!({ "change_ids": [id] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(approval["approved"], 1);
        assert_eq!(approval["recalculation"]["start_id"], 2);

        let (_, report) = call(&ledger, "GET", "/admin/verify_integrity", None).await;
        assert_eq!(report["status"], "valid");
    }

    #[tokio::test]
    async fn empty_batch_is_rejected() {
        let ledger = ledger().await;
        let (status, body) = call(
            &ledger,
            "POST",
            "/batch/reject",
            Some(json!({ "change_ids": [] })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "No changes selected");
    }
}
