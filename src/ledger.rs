//! The hash-chained attendance table: appends, repairs and the writers' lock.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use tokio::sync::{Mutex, MutexGuard};

use crate::config::Config;
use crate::hashing::{record_hash, DATE_FORMAT};
use crate::models::{AttendanceRecord, NewAttendance, Status, StoredRecord};
use crate::{store, Error};

/// Handle to the chain. Cheap to clone; all clones share one write lock.
#[derive(Debug, Clone)]
pub struct Ledger {
    pool: SqlitePool,
    write_lock: Arc<Mutex<()>>,
}

/// An open write: the writers' lock plus the store transaction it guards.
pub struct WriteScope<'a> {
    // Dropped before the guard, so an abandoned transaction is rolled back
    // before the next writer gets in.
    pub tx: Transaction<'static, Sqlite>,
    _guard: MutexGuard<'a, ()>,
}

impl<'a> WriteScope<'a> {
    pub async fn commit(self) -> Result<(), Error> {
        self.tx.commit().await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RosterSubmission {
    pub subject: String,
    pub hour: i64,
    pub date: Option<NaiveDate>,
    pub roster: Vec<i64>,
    #[serde(default)]
    pub present_student_ids: Vec<i64>,
}

#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize)]
pub struct RosterOutcome {
    pub appended: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub recalculated_from: Option<i64>,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct Recalculation {
    pub start_id: i64,
    pub records_rehashed: u64,
}

impl Ledger {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub async fn connect(config: &Config) -> Result<Self, Error> {
        let pool = store::connect(config).await?;
        store::init_schema(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Serialises every chain writer: the tail read, the insert or repair,
    /// and the commit happen while no other writer can run.
    pub async fn begin_write(&self) -> Result<WriteScope<'_>, Error> {
        let guard = self.write_lock.lock().await;
        let tx = self.pool.begin().await?;
        Ok(WriteScope { tx, _guard: guard })
    }

    pub async fn record(&self, id: i64) -> Result<AttendanceRecord, Error> {
        let mut conn = self.pool.acquire().await?;
        let row = store::find_record(&mut conn, id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Attendance record {} does not exist", id)))?;
        parse_record(row)
    }

    pub async fn append(&self, entry: NewAttendance) -> Result<AttendanceRecord, Error> {
        let mut appended = self.append_batch(vec![entry]).await?;
        appended
            .pop()
            .ok_or_else(|| Error::unknown("append produced no record"))
    }

    /// Appends the entries in order. The running hash is carried in memory
    /// from one entry to the next rather than re-read from the store.
    pub async fn append_batch(
        &self,
        entries: Vec<NewAttendance>,
    ) -> Result<Vec<AttendanceRecord>, Error> {
        let mut scope = self.begin_write().await?;
        let mut previous = store::last_hash(&mut scope.tx).await?;
        let mut appended = Vec::with_capacity(entries.len());
        for entry in entries {
            let record = append_in(&mut scope.tx, entry, &previous).await?;
            previous = record.current_hash.clone().unwrap_or_default();
            appended.push(record);
        }
        scope.commit().await?;
        Ok(appended)
    }

    /// Marks a whole class for one subject and hour.
    ///
    /// Students not yet recorded for the slot are appended; recorded ones
    /// whose status changed are updated and the chain is repaired once from
    /// the earliest of them.
    pub async fn submit_roster(&self, submission: RosterSubmission) -> Result<RosterOutcome, Error> {
        if submission.subject.trim().is_empty() {
            return Err(Error::invalid("`subject` parameter was empty"));
        }
        if submission.hour < 1 {
            return Err(Error::invalid("`hour` must be a positive period number"));
        }
        if submission.roster.is_empty() {
            return Err(Error::invalid("`roster` parameter was empty"));
        }
        let date = submission
            .date
            .unwrap_or_else(|| chrono::Local::now().date_naive());
        let date_text = date.format(DATE_FORMAT).to_string();

        let mut scope = self.begin_write().await?;
        let mut outcome = RosterOutcome::default();
        let mut previous = store::last_hash(&mut scope.tx).await?;
        let mut edited = Vec::new();

        for student_id in submission.roster.iter().copied() {
            let status = if submission.present_student_ids.contains(&student_id) {
                Status::Present
            } else {
                Status::Absent
            };
            let existing = store::find_slot(
                &mut scope.tx,
                student_id,
                &submission.subject,
                &date_text,
                submission.hour,
            )
            .await?;
            match existing {
                Some(row) if row.has_status(status) => outcome.unchanged += 1,
                Some(row) => {
                    store::update_status(&mut scope.tx, row.id, status).await?;
                    edited.push(row.id);
                    outcome.updated += 1;
                }
                None => {
                    let entry = NewAttendance {
                        student_id,
                        subject: submission.subject.clone(),
                        date,
                        status,
                        hour: submission.hour,
                    };
                    let record = append_in(&mut scope.tx, entry, &previous).await?;
                    previous = record.current_hash.unwrap_or_default();
                    outcome.appended += 1;
                }
            }
        }

        if let Some(start_id) = edited.iter().copied().min() {
            recalculate_in(&mut scope.tx, start_id).await?;
            outcome.recalculated_from = Some(start_id);
        }
        scope.commit().await?;
        log::info!(
            "Roster for `{}` hour {} on {}: {} appended, {} updated, {} unchanged",
            submission.subject,
            submission.hour,
            date_text,
            outcome.appended,
            outcome.updated,
            outcome.unchanged
        );
        Ok(outcome)
    }

    /// Direct admin edit: the status changes and the chain is repaired from
    /// the edited record forward.
    pub async fn edit_status(&self, id: i64, status: Status) -> Result<Option<Recalculation>, Error> {
        let mut scope = self.begin_write().await?;
        let row = store::find_record(&mut scope.tx, id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Attendance record {} does not exist", id)))?;
        if row.has_status(status) {
            return Ok(None);
        }
        store::update_status(&mut scope.tx, id, status).await?;
        let recalculation = recalculate_in(&mut scope.tx, id).await?;
        scope.commit().await?;
        log::info!("Record {} set to {} by direct edit", id, status);
        Ok(Some(recalculation))
    }

    pub async fn recalculate(&self, start_id: i64) -> Result<Recalculation, Error> {
        let mut scope = self.begin_write().await?;
        let recalculation = recalculate_in(&mut scope.tx, start_id).await?;
        scope.commit().await?;
        Ok(recalculation)
    }

    /// Removes a record without repairing the chain. The record after it
    /// keeps pointing at the removed hash, so the gap stays visible to
    /// verification.
    pub async fn delete_record(&self, id: i64) -> Result<(), Error> {
        let mut scope = self.begin_write().await?;
        let dropped = store::delete_pending_for_record(&mut scope.tx, id).await?;
        if !store::delete_record(&mut scope.tx, id).await? {
            return Err(Error::not_found(format!(
                "Attendance record {} does not exist",
                id
            )));
        }
        scope.commit().await?;
        log::info!(
            "Deleted attendance record {} ({} pending change(s) discarded); chain left unrepaired",
            id,
            dropped
        );
        Ok(())
    }

    /// Fills in hashes for rows written before the chain existed, starting at
    /// the first such row.
    pub async fn migrate_hashes(&self) -> Result<Option<Recalculation>, Error> {
        let mut scope = self.begin_write().await?;
        let start_id = match store::first_unchained_id(&mut scope.tx).await? {
            Some(id) => id,
            None => return Ok(None),
        };
        let recalculation = recalculate_in(&mut scope.tx, start_id).await?;
        scope.commit().await?;
        log::info!(
            "Migrated {} record(s) into the chain from id {}",
            recalculation.records_rehashed,
            start_id
        );
        Ok(Some(recalculation))
    }
}

/// Inserts one record chained onto `previous_hash`.
pub async fn append_in(
    conn: &mut SqliteConnection,
    entry: NewAttendance,
    previous_hash: &str,
) -> Result<AttendanceRecord, Error> {
    let current_hash = record_hash(
        entry.student_id,
        &entry.subject,
        entry.date,
        entry.status,
        entry.hour,
        previous_hash,
    );
    let id = store::insert_record(conn, &entry, previous_hash, &current_hash).await?;
    log::debug!("Appended record {} with hash {}", id, current_hash);
    Ok(AttendanceRecord {
        id,
        student_id: entry.student_id,
        subject: entry.subject,
        date: entry.date,
        status: entry.status,
        hour: entry.hour,
        previous_hash: Some(previous_hash.to_string()),
        current_hash: Some(current_hash),
    })
}

/// Rewrites the hashes of every record from `start_id` to the tail, chaining
/// from the record before `start_id`.
pub async fn recalculate_in(
    conn: &mut SqliteConnection,
    start_id: i64,
) -> Result<Recalculation, Error> {
    let mut previous = store::predecessor_hash(conn, start_id).await?;
    let suffix = store::records_from(conn, start_id).await?;
    let mut records_rehashed = 0;
    for row in suffix {
        let record = parse_record(row)?;
        let current = record_hash(
            record.student_id,
            &record.subject,
            record.date,
            record.status,
            record.hour,
            &previous,
        );
        store::update_hashes(conn, record.id, &previous, &current).await?;
        previous = current;
        records_rehashed += 1;
    }
    log::info!(
        "Recalculated {} record(s) from id {}",
        records_rehashed,
        start_id
    );
    Ok(Recalculation {
        start_id,
        records_rehashed,
    })
}

fn parse_record(row: StoredRecord) -> Result<AttendanceRecord, Error> {
    let record_id = row.id;
    AttendanceRecord::try_from(row).map_err(|reason| Error::MalformedRecord { record_id, reason })
}
