//! Full scan of the chain that reports the first inconsistent record.
//!
//! A tampered chain is a finding, not an error: [`verify_records`] always
//! returns a report, and only storage failures surface as `Err` from
//! [`Ledger::verify_chain`].

use serde::Serialize;
use serde_with::skip_serializing_none;

use crate::hashing::{record_hash, GENESIS_HASH, HASH_ENCODING_VERSION};
use crate::ledger::Ledger;
use crate::models::{AttendanceRecord, StoredRecord};
use crate::{store, Error};

#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainStatus {
    Valid,
    Tampered,
    MigrationRequired,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Finding {
    /// `previous_hash` does not point at the record before it.
    ChainBroken {
        record_id: i64,
        expected_previous_hash: String,
        stored_previous_hash: String,
    },
    /// The stored fields no longer produce the stored hash.
    ContentTampered {
        record_id: i64,
        calculated_hash: String,
        stored_hash: String,
    },
    /// A stored status or date that no writer could have produced.
    MalformedRecord { record_id: i64, reason: String },
    /// Hash columns were never filled in for this row.
    Unchained { record_id: i64 },
}

impl Finding {
    pub fn record_id(&self) -> i64 {
        match self {
            Finding::ChainBroken { record_id, .. }
            | Finding::ContentTampered { record_id, .. }
            | Finding::MalformedRecord { record_id, .. }
            | Finding::Unchained { record_id } => *record_id,
        }
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct IntegrityReport {
    pub status: ChainStatus,
    pub message: String,
    pub records_verified: u64,
    pub hash_encoding: u8,
    pub details: Option<Finding>,
}

impl IntegrityReport {
    pub fn is_valid(&self) -> bool {
        self.status == ChainStatus::Valid
    }

    pub fn record_id(&self) -> Option<i64> {
        self.details.as_ref().map(Finding::record_id)
    }

    fn valid(records_verified: u64) -> Self {
        let message = if records_verified == 0 {
            "No records found. Chain is empty but valid.".to_string()
        } else {
            format!(
                "Integrity verified. All {} records are valid.",
                records_verified
            )
        };
        Self {
            status: ChainStatus::Valid,
            message,
            records_verified,
            hash_encoding: HASH_ENCODING_VERSION,
            details: None,
        }
    }

    fn finding(records_verified: u64, finding: Finding) -> Self {
        let (status, message) = match &finding {
            Finding::ChainBroken { record_id, .. } => (
                ChainStatus::Tampered,
                format!(
                    "Chain broken at Record ID {}. Previous hash mismatch.",
                    record_id
                ),
            ),
            Finding::ContentTampered { record_id, .. } => (
                ChainStatus::Tampered,
                format!(
                    "Data tampering detected at Record ID {}. Hash mismatch.",
                    record_id
                ),
            ),
            Finding::MalformedRecord { record_id, reason } => (
                ChainStatus::Tampered,
                format!("Record ID {} holds invalid data: {}.", record_id, reason),
            ),
            Finding::Unchained { record_id } => (
                ChainStatus::MigrationRequired,
                format!(
                    "Record ID {} has no hashes. Run the hash migration before verifying.",
                    record_id
                ),
            ),
        };
        Self {
            status,
            message,
            records_verified,
            hash_encoding: HASH_ENCODING_VERSION,
            details: Some(finding),
        }
    }
}

/// Checks `records`, which must be in ascending id order, and stops at the
/// first record that breaks the chain.
pub fn verify_records(records: &[StoredRecord]) -> IntegrityReport {
    let mut expected_previous = GENESIS_HASH.to_string();
    let mut verified = 0;

    for record in records {
        let (stored_previous, stored_current) =
            match (&record.previous_hash, &record.current_hash) {
                (Some(prev), Some(curr)) => (prev, curr),
                _ => {
                    return IntegrityReport::finding(
                        verified,
                        Finding::Unchained {
                            record_id: record.id,
                        },
                    )
                }
            };

        if *stored_previous != expected_previous {
            return IntegrityReport::finding(
                verified,
                Finding::ChainBroken {
                    record_id: record.id,
                    expected_previous_hash: expected_previous,
                    stored_previous_hash: stored_previous.clone(),
                },
            );
        }

        let parsed = match AttendanceRecord::try_from(record.clone()) {
            Ok(parsed) => parsed,
            Err(reason) => {
                return IntegrityReport::finding(
                    verified,
                    Finding::MalformedRecord {
                        record_id: record.id,
                        reason,
                    },
                )
            }
        };

        let calculated = record_hash(
            parsed.student_id,
            &parsed.subject,
            parsed.date,
            parsed.status,
            parsed.hour,
            stored_previous,
        );
        if calculated != *stored_current {
            return IntegrityReport::finding(
                verified,
                Finding::ContentTampered {
                    record_id: record.id,
                    calculated_hash: calculated,
                    stored_hash: stored_current.clone(),
                },
            );
        }

        expected_previous = calculated;
        verified += 1;
    }

    IntegrityReport::valid(verified)
}

impl Ledger {
    /// Reads the whole table in one statement and verifies it.
    pub async fn verify_chain(&self) -> Result<IntegrityReport, Error> {
        let mut conn = self.pool().acquire().await?;
        let records = store::all_records(&mut conn).await?;
        let report = verify_records(&records);
        if report.is_valid() {
            log::info!("{}", report.message);
        } else {
            log::warn!("{}", report.message);
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Status;
    use crate::test_helper::{entry, ledger, tamper};

    async fn two_record_chain() -> (Ledger, i64, i64) {
        let ledger = ledger().await;
        let s1 = ledger.append(entry(1, Status::Present)).await.unwrap();
        let s2 = ledger.append(entry(2, Status::Absent)).await.unwrap();
        (ledger, s1.id, s2.id)
    }

    #[test]
    fn empty_chain_is_valid() {
        let report = verify_records(&[]);
        assert_eq!(report.status, ChainStatus::Valid);
        assert_eq!(report.records_verified, 0);
        assert_eq!(report.message, "No records found. Chain is empty but valid.");
    }

    #[tokio::test]
    async fn valid_chain_reports_count() {
        let (ledger, _, _) = two_record_chain().await;
        let report = ledger.verify_chain().await.unwrap();
        assert!(report.is_valid());
        assert_eq!(report.records_verified, 2);
        assert_eq!(report.message, "Integrity verified. All 2 records are valid.");
    }

    #[tokio::test]
    async fn status_edit_without_repair_is_content_tampering() {
        let (ledger, s1, _) = two_record_chain().await;
        tamper(&ledger, "UPDATE attendance SET status = 'Absent' WHERE id = ?", s1).await;

        let report = ledger.verify_chain().await.unwrap();
        assert_eq!(report.status, ChainStatus::Tampered);
        assert_eq!(report.records_verified, 0);
        match report.details {
            Some(Finding::ContentTampered {
                record_id,
                calculated_hash,
                stored_hash,
            }) => {
                assert_eq!(record_id, s1);
                assert_ne!(calculated_hash, stored_hash);
            }
            other => panic!("unexpected finding {:?}", other),
        }
    }

    #[tokio::test]
    async fn every_single_field_mutation_is_caught() {
        let mutations = [
            "UPDATE attendance SET status = 'Absent' WHERE id = ?",
            "UPDATE attendance SET hour = hour + 1 WHERE id = ?",
            "UPDATE attendance SET subject = 'Physics' WHERE id = ?",
            "UPDATE attendance SET date = '2024-01-11' WHERE id = ?",
            "UPDATE attendance SET student_id = 99 WHERE id = ?",
            "UPDATE attendance SET previous_hash = current_hash WHERE id = ?",
            "UPDATE attendance SET current_hash = previous_hash WHERE id = ?",
            "UPDATE attendance SET date = '2024-1-10' WHERE id = ?",
            "UPDATE attendance SET hour = 'x' WHERE id = ?",
            "UPDATE attendance SET student_id = 2.5 WHERE id = ?",
            "UPDATE attendance SET subject = CAST('Math' AS BLOB) WHERE id = ?",
            "UPDATE attendance SET current_hash = CAST(current_hash AS BLOB) WHERE id = ?",
        ];
        for sql in mutations.iter() {
            let ledger = ledger().await;
            ledger
                .append_batch((1..=3).map(|s| entry(s, Status::Present)).collect())
                .await
                .unwrap();
            tamper(&ledger, sql, 2).await;
            let report = ledger.verify_chain().await.unwrap();
            assert_eq!(report.status, ChainStatus::Tampered, "{}", sql);
            let at = report.record_id().unwrap();
            assert!(at == 2 || at == 3, "{} reported at {}", sql, at);
        }
    }

    #[tokio::test]
    async fn case_variant_status_is_malformed() {
        let (ledger, s1, _) = two_record_chain().await;
        tamper(&ledger, "UPDATE attendance SET status = 'present' WHERE id = ?", s1).await;
        let report = ledger.verify_chain().await.unwrap();
        assert_eq!(report.status, ChainStatus::Tampered);
        assert!(matches!(
            report.details,
            Some(Finding::MalformedRecord { record_id, .. }) if record_id == s1
        ));
    }

    #[tokio::test]
    async fn rehashed_record_breaks_the_next_link() {
        let (ledger, s1, s2) = two_record_chain().await;
        tamper(&ledger, "UPDATE attendance SET status = 'Absent' WHERE id = ?", s1).await;
        // Rewriting the first hash to match its new content leaves the second
        // record pointing at the old one.
        let mut conn = ledger.pool().acquire().await.unwrap();
        let rows = store::all_records(&mut conn).await.unwrap();
        let first = AttendanceRecord::try_from(rows[0].clone()).unwrap();
        let reissued = record_hash(
            first.student_id,
            &first.subject,
            first.date,
            Status::Absent,
            first.hour,
            GENESIS_HASH,
        );
        store::update_hashes(&mut conn, s1, GENESIS_HASH, &reissued)
            .await
            .unwrap();
        drop(conn);

        let report = ledger.verify_chain().await.unwrap();
        assert_eq!(report.records_verified, 1);
        match report.details {
            Some(Finding::ChainBroken {
                record_id,
                expected_previous_hash,
                ..
            }) => {
                assert_eq!(record_id, s2);
                assert_eq!(expected_previous_hash, reissued);
            }
            other => panic!("unexpected finding {:?}", other),
        }
    }

    #[tokio::test]
    async fn values_of_the_wrong_type_are_reported() {
        for sql in [
            "UPDATE attendance SET hour = 'one' WHERE id = ?",
            "UPDATE attendance SET student_id = 2.5 WHERE id = ?",
        ] {
            let (ledger, _, s2) = two_record_chain().await;
            tamper(&ledger, sql, s2).await;
            let report = ledger.verify_chain().await.unwrap();
            assert_eq!(report.status, ChainStatus::Tampered, "{}", sql);
            assert_eq!(report.records_verified, 1);
            assert!(matches!(
                report.details,
                Some(Finding::MalformedRecord { record_id, .. }) if record_id == s2
            ));
        }
    }

    #[tokio::test]
    async fn unpadded_date_is_malformed() {
        let (ledger, s1, _) = two_record_chain().await;
        tamper(&ledger, "UPDATE attendance SET date = '2024-1-10' WHERE id = ?", s1).await;
        let report = ledger.verify_chain().await.unwrap();
        match report.details {
            Some(Finding::MalformedRecord { record_id, reason }) => {
                assert_eq!(record_id, s1);
                assert!(reason.contains("2024-1-10"), "{}", reason);
            }
            other => panic!("unexpected finding {:?}", other),
        }
    }

    #[tokio::test]
    async fn null_hashes_require_migration() {
        let (ledger, s1, _) = two_record_chain().await;
        tamper(&ledger, "UPDATE attendance SET current_hash = NULL WHERE id = ?", s1).await;
        let report = ledger.verify_chain().await.unwrap();
        assert_eq!(report.status, ChainStatus::MigrationRequired);
        assert_eq!(report.record_id(), Some(s1));
    }

    #[test]
    fn report_serializes_for_operators() {
        let report = IntegrityReport::finding(
            4,
            Finding::ChainBroken {
                record_id: 5,
                expected_previous_hash: "a".repeat(64),
                stored_previous_hash: "b".repeat(64),
            },
        );
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "tampered");
        assert_eq!(json["details"]["kind"], "chain_broken");
        assert_eq!(json["details"]["record_id"], 5);
        assert_eq!(json["message"], "Chain broken at Record ID 5. Previous hash mismatch.");

        let valid = serde_json::to_value(IntegrityReport::valid(2)).unwrap();
        assert!(valid.get("details").is_none());
        assert_eq!(valid["hash_encoding"], 1);
    }
}
