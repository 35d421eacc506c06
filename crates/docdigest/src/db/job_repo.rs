//! Job repository: queue state operations for the `jobs` table.
//!
//! Every mutation of a leased job is conditional on `lease_owner`, so a worker
//! whose lease expired (and was taken over) can no longer move the job.

use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};

use super::{Database, DatabaseError};

/// A raw job row from the database.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: String,
    pub source_ref: String,
    pub display_name: String,
    pub owner_id: String,
    pub state: String,
    pub attempt: u32,
    pub max_attempts: u32,
    pub lease_owner: Option<String>,
    pub lease_expires_at: Option<String>,
    pub available_at: String,
    pub dead_lettered: bool,
    pub last_error_class: Option<String>,
    pub last_error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            source_ref: row.get("source_ref")?,
            display_name: row.get("display_name")?,
            owner_id: row.get("owner_id")?,
            state: row.get("state")?,
            attempt: row.get("attempt")?,
            max_attempts: row.get("max_attempts")?,
            lease_owner: row.get("lease_owner")?,
            lease_expires_at: row.get("lease_expires_at")?,
            available_at: row.get("available_at")?,
            dead_lettered: row.get("dead_lettered")?,
            last_error_class: row.get("last_error_class")?,
            last_error: row.get("last_error")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            completed_at: row.get("completed_at")?,
        })
    }
}

/// Predicate selecting jobs a worker may lease at time `?1`.
const LEASABLE: &str = "available_at <= ?1 AND (state = 'queued' OR (state = 'active' AND \
     (lease_owner IS NULL OR lease_expires_at <= ?1)))";

/// Inserts a new job row.
pub fn insert(db: &Database, job: &JobRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO jobs (id, source_ref, display_name, owner_id, state, attempt,
             max_attempts, lease_owner, lease_expires_at, available_at, dead_lettered,
             last_error_class, last_error, created_at, updated_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                job.id,
                job.source_ref,
                job.display_name,
                job.owner_id,
                job.state,
                job.attempt,
                job.max_attempts,
                job.lease_owner,
                job.lease_expires_at,
                job.available_at,
                job.dead_lettered,
                job.last_error_class,
                job.last_error,
                job.created_at,
                job.updated_at,
                job.completed_at,
            ],
        )?;
        Ok(())
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row("SELECT * FROM jobs WHERE id = ?1", params![id], JobRow::from_row)
            .optional()?;
        Ok(row)
    })
}

/// Dead-letters jobs whose lease expired on their final attempt.
///
/// Such jobs were abandoned by a crashed worker and have no attempts left, so
/// they must not be handed out again.
pub fn expire_exhausted_leases(db: &Database, now: &str) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET state = 'failed', dead_lettered = 1, lease_owner = NULL,
             lease_expires_at = NULL, last_error_class = 'transient',
             last_error = 'lease expired on final attempt', updated_at = ?1, completed_at = ?1
             WHERE state = 'active' AND lease_owner IS NOT NULL
             AND lease_expires_at <= ?1 AND attempt >= max_attempts",
            params![now],
        )?;
        Ok(changed)
    })
}

/// Atomically claims the oldest leasable job for `worker_id`.
///
/// Runs inside an immediate transaction: the select and the conditional
/// update cannot interleave with another claimer, in this process or another.
pub fn claim_next(
    db: &Database,
    worker_id: &str,
    now: &str,
    lease_expires_at: &str,
) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn_mut(|conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let candidate: Option<String> = tx
            .query_row(
                &format!(
                    "SELECT id FROM jobs WHERE {} ORDER BY available_at, created_at LIMIT 1",
                    LEASABLE
                ),
                params![now],
                |r| r.get(0),
            )
            .optional()?;

        let Some(id) = candidate else {
            tx.commit()?;
            return Ok(None);
        };

        let changed = tx.execute(
            &format!(
                "UPDATE jobs SET state = 'active', lease_owner = ?2, lease_expires_at = ?3,
                 attempt = attempt + 1, updated_at = ?1 WHERE id = ?4 AND {}",
                LEASABLE
            ),
            params![now, worker_id, lease_expires_at, id],
        )?;

        if changed != 1 {
            tx.commit()?;
            return Ok(None);
        }

        let row = tx.query_row(
            "SELECT * FROM jobs WHERE id = ?1",
            params![id],
            JobRow::from_row,
        )?;
        tx.commit()?;
        Ok(Some(row))
    })
}

/// Extends the lease held by `worker_id`. Returns the number of rows changed.
pub fn renew_lease(
    db: &Database,
    id: &str,
    worker_id: &str,
    lease_expires_at: &str,
    now: &str,
) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET lease_expires_at = ?3, updated_at = ?4
             WHERE id = ?1 AND state = 'active' AND lease_owner = ?2",
            params![id, worker_id, lease_expires_at, now],
        )?;
        Ok(changed)
    })
}

/// Marks a leased job completed.
pub fn mark_completed(
    db: &Database,
    id: &str,
    worker_id: &str,
    now: &str,
) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET state = 'completed', lease_owner = NULL, lease_expires_at = NULL,
             updated_at = ?3, completed_at = ?3
             WHERE id = ?1 AND state = 'active' AND lease_owner = ?2",
            params![id, worker_id, now],
        )?;
        Ok(changed)
    })
}

/// Records a failed attempt and releases the lease, keeping the job `active`
/// so it becomes leasable again at `available_at`.
#[allow(clippy::too_many_arguments)]
pub fn mark_requeued(
    db: &Database,
    id: &str,
    worker_id: &str,
    available_at: &str,
    error_class: &str,
    error: &str,
    now: &str,
) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET lease_owner = NULL, lease_expires_at = NULL, available_at = ?3,
             last_error_class = ?4, last_error = ?5, updated_at = ?6
             WHERE id = ?1 AND state = 'active' AND lease_owner = ?2 AND attempt < max_attempts",
            params![id, worker_id, available_at, error_class, error, now],
        )?;
        Ok(changed)
    })
}

/// Moves a leased job to the terminal dead-letter state.
pub fn mark_dead_lettered(
    db: &Database,
    id: &str,
    worker_id: &str,
    error_class: &str,
    error: &str,
    now: &str,
) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET state = 'failed', dead_lettered = 1, lease_owner = NULL,
             lease_expires_at = NULL, last_error_class = ?3, last_error = ?4,
             updated_at = ?5, completed_at = ?5
             WHERE id = ?1 AND state = 'active' AND lease_owner = ?2",
            params![id, worker_id, error_class, error, now],
        )?;
        Ok(changed)
    })
}

/// Gives a lease back without consuming the attempt.
pub fn release(db: &Database, id: &str, worker_id: &str, now: &str) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET lease_owner = NULL, lease_expires_at = NULL,
             attempt = MAX(attempt - 1, 0), available_at = ?3, updated_at = ?3
             WHERE id = ?1 AND state = 'active' AND lease_owner = ?2",
            params![id, worker_id, now],
        )?;
        Ok(changed)
    })
}

/// Returns all dead-lettered jobs, oldest first.
pub fn list_dead_lettered(db: &Database) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM jobs WHERE state = 'failed' AND dead_lettered = 1
             ORDER BY completed_at",
        )?;
        let rows = stmt
            .query_map([], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Puts a dead-lettered job back at the head of the queue with a fresh attempt budget.
pub fn reset_dead_lettered(db: &Database, id: &str, now: &str) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET state = 'queued', dead_lettered = 0, attempt = 0,
             available_at = ?2, updated_at = ?2, completed_at = NULL
             WHERE id = ?1 AND state = 'failed' AND dead_lettered = 1",
            params![id, now],
        )?;
        Ok(changed)
    })
}

/// Counts jobs in a given state.
pub fn count_by_state(db: &Database, state: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE state = ?1",
            params![state],
            |r| r.get(0),
        )?;
        Ok(count.max(0) as u64)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_row(id: &str, available_at: &str) -> JobRow {
        JobRow {
            id: id.to_string(),
            source_ref: format!("/uploads/{}.pdf", id),
            display_name: format!("{}.pdf", id),
            owner_id: "user-1".to_string(),
            state: "queued".to_string(),
            attempt: 0,
            max_attempts: 2,
            lease_owner: None,
            lease_expires_at: None,
            available_at: available_at.to_string(),
            dead_lettered: false,
            last_error_class: None,
            last_error: None,
            created_at: available_at.to_string(),
            updated_at: available_at.to_string(),
            completed_at: None,
        }
    }

    const T0: &str = "2026-01-01T00:00:00.000Z";
    const T1: &str = "2026-01-01T00:00:01.000Z";
    const T5: &str = "2026-01-01T00:00:05.000Z";
    const T9: &str = "2026-01-01T00:00:09.000Z";

    #[test]
    fn test_insert_and_find() {
        let db = Database::open_in_memory().unwrap();
        insert(&db, &make_row("j1", T0)).unwrap();

        let found = find_by_id(&db, "j1").unwrap().unwrap();
        assert_eq!(found.display_name, "j1.pdf");
        assert_eq!(found.state, "queued");
        assert!(find_by_id(&db, "missing").unwrap().is_none());
    }

    #[test]
    fn test_claim_takes_oldest_and_increments_attempt() {
        let db = Database::open_in_memory().unwrap();
        insert(&db, &make_row("later", T1)).unwrap();
        insert(&db, &make_row("first", T0)).unwrap();

        let claimed = claim_next(&db, "w1", T1, T5).unwrap().unwrap();
        assert_eq!(claimed.id, "first");
        assert_eq!(claimed.state, "active");
        assert_eq!(claimed.attempt, 1);
        assert_eq!(claimed.lease_owner.as_deref(), Some("w1"));
    }

    #[test]
    fn test_claim_skips_live_lease() {
        let db = Database::open_in_memory().unwrap();
        insert(&db, &make_row("j1", T0)).unwrap();

        assert!(claim_next(&db, "w1", T0, T5).unwrap().is_some());
        assert!(claim_next(&db, "w2", T1, T5).unwrap().is_none());
    }

    #[test]
    fn test_claim_reclaims_expired_lease() {
        let db = Database::open_in_memory().unwrap();
        insert(&db, &make_row("j1", T0)).unwrap();

        claim_next(&db, "w1", T0, T1).unwrap().unwrap();
        let reclaimed = claim_next(&db, "w2", T5, T9).unwrap().unwrap();
        assert_eq!(reclaimed.lease_owner.as_deref(), Some("w2"));
        assert_eq!(reclaimed.attempt, 2);
    }

    #[test]
    fn test_expire_exhausted_leases_dead_letters() {
        let db = Database::open_in_memory().unwrap();
        insert(&db, &make_row("j1", T0)).unwrap();

        claim_next(&db, "w1", T0, T1).unwrap().unwrap();
        claim_next(&db, "w2", T1, T5).unwrap().unwrap();
        assert_eq!(expire_exhausted_leases(&db, T9).unwrap(), 1);

        let row = find_by_id(&db, "j1").unwrap().unwrap();
        assert_eq!(row.state, "failed");
        assert!(row.dead_lettered);
        assert!(claim_next(&db, "w3", T9, T9).unwrap().is_none());
    }

    #[test]
    fn test_mutations_require_lease_owner() {
        let db = Database::open_in_memory().unwrap();
        insert(&db, &make_row("j1", T0)).unwrap();
        claim_next(&db, "w1", T0, T5).unwrap().unwrap();

        assert_eq!(mark_completed(&db, "j1", "w2", T1).unwrap(), 0);
        assert_eq!(renew_lease(&db, "j1", "w2", T9, T1).unwrap(), 0);
        assert_eq!(mark_completed(&db, "j1", "w1", T1).unwrap(), 1);
        assert_eq!(find_by_id(&db, "j1").unwrap().unwrap().state, "completed");
    }

    #[test]
    fn test_requeue_respects_available_at() {
        let db = Database::open_in_memory().unwrap();
        insert(&db, &make_row("j1", T0)).unwrap();
        claim_next(&db, "w1", T0, T5).unwrap().unwrap();

        assert_eq!(
            mark_requeued(&db, "j1", "w1", T5, "transient", "timeout", T1).unwrap(),
            1
        );
        assert!(claim_next(&db, "w1", T1, T9).unwrap().is_none());
        let again = claim_next(&db, "w1", T5, T9).unwrap().unwrap();
        assert_eq!(again.attempt, 2);
        assert_eq!(again.last_error.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_release_returns_attempt() {
        let db = Database::open_in_memory().unwrap();
        insert(&db, &make_row("j1", T0)).unwrap();
        claim_next(&db, "w1", T0, T5).unwrap().unwrap();

        assert_eq!(release(&db, "j1", "w1", T1).unwrap(), 1);
        let row = find_by_id(&db, "j1").unwrap().unwrap();
        assert_eq!(row.attempt, 0);
        assert!(row.lease_owner.is_none());
    }

    #[test]
    fn test_dead_letter_and_reset() {
        let db = Database::open_in_memory().unwrap();
        insert(&db, &make_row("j1", T0)).unwrap();
        claim_next(&db, "w1", T0, T5).unwrap().unwrap();

        mark_dead_lettered(&db, "j1", "w1", "permanent", "corrupt", T1).unwrap();
        let dead = list_dead_lettered(&db).unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(count_by_state(&db, "failed").unwrap(), 1);

        assert_eq!(reset_dead_lettered(&db, "j1", T5).unwrap(), 1);
        let row = find_by_id(&db, "j1").unwrap().unwrap();
        assert_eq!(row.state, "queued");
        assert_eq!(row.attempt, 0);
        assert!(list_dead_lettered(&db).unwrap().is_empty());
    }
}
