use std::path::PathBuf;

use chrono::{DateTime, Utc};

use super::{
    ErrorClass, FailureDisposition, Job, JobQueue, JobState, Lease, NewJob, QueueCounts,
    QueueSettings,
};
use crate::db::job_repo::{self, JobRow};
use crate::db::{format_timestamp, parse_timestamp, Database, DatabaseError};
use crate::error::QueueError;

/// SQLite-backed [`JobQueue`].
///
/// Leasing runs in an immediate transaction, so several queues (or several
/// processes) can share one database file.
#[derive(Clone)]
pub struct SqliteJobQueue {
    db: Database,
    settings: QueueSettings,
}

impl SqliteJobQueue {
    pub fn new(db: Database, settings: QueueSettings) -> Self {
        Self { db, settings }
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    fn lease_deadline(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let timeout = chrono::Duration::from_std(self.settings.lease_timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(600));
        now + timeout
    }

    /// Turns "0 rows changed" into the precise reason.
    fn explain_miss(&self, job_id: &str, worker_id: &str) -> QueueError {
        match job_repo::find_by_id(&self.db, job_id) {
            Ok(None) => QueueError::NotFound(job_id.to_string()),
            Ok(Some(row)) if row.state == "active" => QueueError::LeaseLost {
                job_id: job_id.to_string(),
                worker_id: worker_id.to_string(),
            },
            Ok(Some(row)) => QueueError::InvalidTransition {
                job_id: job_id.to_string(),
                reason: format!("job is {}", row.state),
            },
            Err(e) => e.into(),
        }
    }

    fn held_row(&self, job_id: &str, worker_id: &str) -> Result<JobRow, QueueError> {
        let row = job_repo::find_by_id(&self.db, job_id)?
            .ok_or_else(|| QueueError::NotFound(job_id.to_string()))?;
        if row.state != "active" || row.lease_owner.as_deref() != Some(worker_id) {
            return Err(self.explain_miss(job_id, worker_id));
        }
        Ok(row)
    }
}

fn row_to_job(row: JobRow) -> Result<Job, DatabaseError> {
    let state = JobState::parse(&row.state).ok_or_else(|| DatabaseError::Decode {
        column: "state",
        value: row.state.clone(),
    })?;
    let lease = match (row.lease_owner, row.lease_expires_at) {
        (Some(worker_id), Some(expires)) => Some(Lease {
            worker_id,
            expires_at: parse_timestamp(&expires),
        }),
        _ => None,
    };
    Ok(Job {
        id: row.id,
        source_ref: PathBuf::from(row.source_ref),
        display_name: row.display_name,
        owner_id: row.owner_id,
        state,
        attempt: row.attempt,
        max_attempts: row.max_attempts,
        created_at: parse_timestamp(&row.created_at),
        lease,
        dead_lettered: row.dead_lettered,
        last_error: row.last_error,
    })
}

impl JobQueue for SqliteJobQueue {
    fn enqueue(&self, job: NewJob) -> Result<String, QueueError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = format_timestamp(Utc::now());
        let row = JobRow {
            id: id.clone(),
            source_ref: job.source_ref.to_string_lossy().to_string(),
            display_name: job.display_name,
            owner_id: job.owner_id,
            state: JobState::Queued.as_str().to_string(),
            attempt: 0,
            max_attempts: self.settings.max_attempts,
            lease_owner: None,
            lease_expires_at: None,
            available_at: now.clone(),
            dead_lettered: false,
            last_error_class: None,
            last_error: None,
            created_at: now.clone(),
            updated_at: now,
            completed_at: None,
        };
        job_repo::insert(&self.db, &row)?;
        log::info!("Enqueued job {}", id);
        Ok(id)
    }

    fn lease(&self, worker_id: &str) -> Result<Option<Job>, QueueError> {
        let now = Utc::now();
        let now_str = format_timestamp(now);

        let expired = job_repo::expire_exhausted_leases(&self.db, &now_str)?;
        if expired > 0 {
            log::warn!(
                "Dead-lettered {} job(s) whose lease expired on the final attempt",
                expired
            );
        }

        let deadline = format_timestamp(self.lease_deadline(now));
        let Some(row) = job_repo::claim_next(&self.db, worker_id, &now_str, &deadline)? else {
            return Ok(None);
        };
        let job = row_to_job(row)?;
        log::debug!(
            "Worker {} leased job {} (attempt {}/{})",
            worker_id,
            job.id,
            job.attempt,
            job.max_attempts
        );
        Ok(Some(job))
    }

    fn renew_lease(&self, job_id: &str, worker_id: &str) -> Result<(), QueueError> {
        let now = Utc::now();
        let changed = job_repo::renew_lease(
            &self.db,
            job_id,
            worker_id,
            &format_timestamp(self.lease_deadline(now)),
            &format_timestamp(now),
        )?;
        if changed == 0 {
            return Err(self.explain_miss(job_id, worker_id));
        }
        Ok(())
    }

    fn complete(&self, job_id: &str, worker_id: &str) -> Result<(), QueueError> {
        let changed =
            job_repo::mark_completed(&self.db, job_id, worker_id, &format_timestamp(Utc::now()))?;
        if changed == 0 {
            return Err(self.explain_miss(job_id, worker_id));
        }
        log::info!("Job {} completed", job_id);
        Ok(())
    }

    fn fail(
        &self,
        job_id: &str,
        worker_id: &str,
        class: ErrorClass,
        error: &str,
    ) -> Result<FailureDisposition, QueueError> {
        let row = self.held_row(job_id, worker_id)?;

        if class == ErrorClass::Transient && row.attempt < row.max_attempts {
            let retry_at = self.requeue(job_id, worker_id, class, error)?;
            return Ok(FailureDisposition::Requeued {
                attempt: row.attempt,
                retry_at,
            });
        }

        self.dead_letter(job_id, worker_id, class, error)?;
        Ok(FailureDisposition::DeadLettered)
    }

    fn requeue(
        &self,
        job_id: &str,
        worker_id: &str,
        class: ErrorClass,
        error: &str,
    ) -> Result<DateTime<Utc>, QueueError> {
        let row = self.held_row(job_id, worker_id)?;
        if row.attempt >= row.max_attempts {
            return Err(QueueError::InvalidTransition {
                job_id: job_id.to_string(),
                reason: format!("attempts exhausted ({}/{})", row.attempt, row.max_attempts),
            });
        }

        let now = Utc::now();
        let delay = self.settings.backoff.delay_after(row.attempt);
        let retry_at = now
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        let changed = job_repo::mark_requeued(
            &self.db,
            job_id,
            worker_id,
            &format_timestamp(retry_at),
            class.as_str(),
            error,
            &format_timestamp(now),
        )?;
        if changed == 0 {
            return Err(self.explain_miss(job_id, worker_id));
        }
        log::warn!(
            "Job {} requeued after attempt {}/{}, retry in {}ms: {}",
            job_id,
            row.attempt,
            row.max_attempts,
            delay.as_millis(),
            error
        );
        Ok(retry_at)
    }

    fn dead_letter(
        &self,
        job_id: &str,
        worker_id: &str,
        class: ErrorClass,
        error: &str,
    ) -> Result<(), QueueError> {
        let changed = job_repo::mark_dead_lettered(
            &self.db,
            job_id,
            worker_id,
            class.as_str(),
            error,
            &format_timestamp(Utc::now()),
        )?;
        if changed == 0 {
            return Err(self.explain_miss(job_id, worker_id));
        }
        log::error!("Job {} dead-lettered ({}): {}", job_id, class.as_str(), error);
        Ok(())
    }

    fn release(&self, job_id: &str, worker_id: &str) -> Result<(), QueueError> {
        let changed =
            job_repo::release(&self.db, job_id, worker_id, &format_timestamp(Utc::now()))?;
        if changed == 0 {
            return Err(self.explain_miss(job_id, worker_id));
        }
        log::info!("Job {} released by {}", job_id, worker_id);
        Ok(())
    }

    fn get(&self, job_id: &str) -> Result<Option<Job>, QueueError> {
        match job_repo::find_by_id(&self.db, job_id)? {
            Some(row) => Ok(Some(row_to_job(row)?)),
            None => Ok(None),
        }
    }

    fn list_dead_letters(&self) -> Result<Vec<Job>, QueueError> {
        job_repo::list_dead_lettered(&self.db)?
            .into_iter()
            .map(|row| row_to_job(row).map_err(QueueError::from))
            .collect()
    }

    fn retry_dead_letter(&self, job_id: &str) -> Result<(), QueueError> {
        let changed =
            job_repo::reset_dead_lettered(&self.db, job_id, &format_timestamp(Utc::now()))?;
        if changed == 0 {
            return match job_repo::find_by_id(&self.db, job_id)? {
                None => Err(QueueError::NotFound(job_id.to_string())),
                Some(row) => Err(QueueError::InvalidTransition {
                    job_id: job_id.to_string(),
                    reason: format!("job is {}, not dead-lettered", row.state),
                }),
            };
        }
        log::info!("Dead-lettered job {} reset to queued", job_id);
        Ok(())
    }

    fn counts(&self) -> Result<QueueCounts, QueueError> {
        Ok(QueueCounts {
            queued: job_repo::count_by_state(&self.db, JobState::Queued.as_str())?,
            active: job_repo::count_by_state(&self.db, JobState::Active.as_str())?,
            completed: job_repo::count_by_state(&self.db, JobState::Completed.as_str())?,
            failed: job_repo::count_by_state(&self.db, JobState::Failed.as_str())?,
        })
    }
}
