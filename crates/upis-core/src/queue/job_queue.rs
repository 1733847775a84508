//! Durable job queue with due-time scheduling and lease-based recovery.
//!
//! Each runner tick picks up to `parallelism` due jobs ordered by
//! `(due_at, queued_at)`, pushes their `due_at` out by the lease timeout in
//! the same transaction, then runs them concurrently. A job whose handler
//! never reports back (crash, hang, error) becomes due again once the lease
//! runs out.

use crate::{
    Clock, CoreResult,
    model::{Job, JobOutcome, JobPayload},
    store::Database,
};

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use rusqlite::{Connection, TransactionBehavior, params};
use tokio::{sync::watch, task::JoinSet};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Maximum number of jobs run per tick.
pub const PARALLELISM: usize = 5;
/// Sleep between ticks that found nothing to do.
pub const POLL_INTERVAL: Duration = Duration::from_millis(1000);
/// How long a picked-up job stays invisible to other runners.
pub const LEASE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Runner tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSettings {
    /// Maximum number of jobs run per tick.
    pub parallelism: usize,
    /// Sleep between ticks that found nothing to do.
    pub poll_interval: Duration,
    /// Lease applied to every picked-up job.
    pub lease_timeout: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            parallelism: PARALLELISM,
            poll_interval: POLL_INTERVAL,
            lease_timeout: LEASE_TIMEOUT,
        }
    }
}

/// Executes one job and tells the runner what to do with it.
///
/// An `Err` (or a panic) leaves the job leased; it is retried once the lease
/// expires.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    /// Handle one job.
    async fn handle(&self, job: &Job) -> CoreResult<JobOutcome>;
}

/// Handle to the persisted job table.
#[derive(Clone)]
pub struct JobQueue {
    db: Database,
    settings: QueueSettings,
    clock: Arc<dyn Clock>,
}

impl JobQueue {
    /// Create a queue handle over `db`.
    pub fn open(db: Database, settings: QueueSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            db,
            settings,
            clock,
        }
    }

    /// Runner tuning in effect.
    pub fn settings(&self) -> QueueSettings {
        self.settings
    }

    /// Durably add a job. `due_at` defaults to immediately due.
    ///
    /// # Errors
    ///
    /// Returns error if the payload cannot be encoded or the write fails.
    #[instrument(skip(self))]
    pub async fn add_job(&self, payload: JobPayload, due_at: Option<i64>) -> CoreResult<Uuid> {
        let id = Uuid::new_v4();
        let queued_at = self.clock.now_ms();
        let due_at = due_at.unwrap_or(0);
        let encoded = serde_json::to_string(&payload)?;

        self.db
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO jobs (id, queued_at, due_at, payload) VALUES (?1, ?2, ?3, ?4)",
                    params![id.to_string(), queued_at, due_at, encoded],
                )?;
                Ok(())
            })
            .await?;

        info!(job_id = %id, due_at, recording = %payload.recording(), "Job added");

        Ok(id)
    }

    /// Every decodable job in `(due_at, queued_at)` order.
    pub async fn pending_jobs(&self) -> CoreResult<Vec<Job>> {
        self.db
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, queued_at, due_at, payload FROM jobs ORDER BY due_at, queued_at",
                )?;
                let rows = stmt
                    .query_map([], read_row)?
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(rows
                    .into_iter()
                    .filter_map(|raw| decode(raw).ok())
                    .collect())
            })
            .await
    }

    /// One runner tick: lease the due jobs, run them, settle their outcomes.
    ///
    /// Returns the number of jobs handed to `handler`.
    ///
    /// # Errors
    ///
    /// Returns error if the due jobs cannot be selected or leased. Failures
    /// while settling individual jobs are logged, not returned.
    pub async fn run_once(&self, handler: &Arc<dyn JobHandler>) -> CoreResult<usize> {
        let now = self.clock.now_ms();
        let lease_until = now.saturating_add(duration_ms(self.settings.lease_timeout));
        let limit = i64::try_from(self.settings.parallelism).unwrap_or(i64::MAX);

        let leased = self
            .db
            .call(move |conn| lease_due_jobs(conn, now, lease_until, limit))
            .await?;

        if leased.is_empty() {
            return Ok(0);
        }

        debug!(count = leased.len(), lease_until, "Leased due jobs");

        let count = leased.len();
        let mut running = JoinSet::new();

        for job in leased {
            let queue = self.clone();
            let handler = Arc::clone(handler);

            running.spawn(async move {
                let job_id = job.id;
                // Inner task so a panicking handler surfaces as a JoinError
                // here instead of tearing down the batch.
                let result = tokio::spawn(async move { handler.handle(&job).await }).await;
                queue.settle(job_id, result).await;
            });
        }

        while let Some(joined) = running.join_next().await {
            if let Err(e) = joined {
                error!(error = ?e, "Job settle task failed");
            }
        }

        Ok(count)
    }

    /// Run ticks until `shutdown` turns true or its sender is dropped.
    ///
    /// The in-flight batch always finishes and is settled before returning.
    #[instrument(skip(self, handler, shutdown))]
    pub async fn run(&self, handler: Arc<dyn JobHandler>, mut shutdown: watch::Receiver<bool>) {
        info!(
            parallelism = self.settings.parallelism,
            poll_interval_ms = duration_ms(self.settings.poll_interval),
            "Job runner started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let ran = match self.run_once(&handler).await {
                Ok(n) => n,
                Err(e) => {
                    error!(error = ?e, "Job runner tick failed");
                    0
                }
            };

            if ran == 0 {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(self.settings.poll_interval) => {}
                }
            }
        }

        info!("Job runner stopped");
    }

    async fn settle(
        &self,
        job_id: Uuid,
        result: Result<CoreResult<JobOutcome>, tokio::task::JoinError>,
    ) {
        let settled = match result {
            Ok(Ok(JobOutcome::Done)) => self.delete(job_id).await,
            Ok(Ok(JobOutcome::RetryAfter(delay))) => self.reschedule(job_id, delay).await,
            Ok(Ok(JobOutcome::Refuse)) => {
                warn!(job_id = %job_id, "Handler refused job, leaving it leased");
                Ok(())
            }
            Ok(Err(e)) => {
                error!(job_id = %job_id, error = ?e, "Job handler failed, leaving it leased");
                Ok(())
            }
            Err(e) => {
                error!(job_id = %job_id, error = ?e, "Job handler panicked, leaving it leased");
                Ok(())
            }
        };

        if let Err(e) = settled {
            error!(job_id = %job_id, error = ?e, "Failed to settle job");
        }
    }

    async fn delete(&self, job_id: Uuid) -> CoreResult<()> {
        self.db
            .call(move |conn| {
                conn.execute("DELETE FROM jobs WHERE id = ?1", params![job_id.to_string()])?;
                Ok(())
            })
            .await?;

        debug!(job_id = %job_id, "Job done");
        Ok(())
    }

    async fn reschedule(&self, job_id: Uuid, delay: Duration) -> CoreResult<()> {
        let due_at = self.clock.now_ms().saturating_add(duration_ms(delay));

        self.db
            .call(move |conn| {
                conn.execute(
                    "UPDATE jobs SET due_at = ?2 WHERE id = ?1",
                    params![job_id.to_string(), due_at],
                )?;
                Ok(())
            })
            .await?;

        info!(job_id = %job_id, delay_ms = duration_ms(delay), due_at, "Job rescheduled");
        Ok(())
    }
}

struct RawJob {
    id: String,
    queued_at: i64,
    due_at: i64,
    payload: String,
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawJob> {
    Ok(RawJob {
        id: row.get(0)?,
        queued_at: row.get(1)?,
        due_at: row.get(2)?,
        payload: row.get(3)?,
    })
}

fn decode(raw: RawJob) -> Result<Job, String> {
    let id = Uuid::parse_str(&raw.id).map_err(|e| format!("bad job id: {}", e))?;
    let payload = serde_json::from_str(&raw.payload).map_err(|e| format!("bad payload: {}", e))?;

    Ok(Job {
        id,
        queued_at: raw.queued_at,
        due_at: raw.due_at,
        payload,
    })
}

/// Select and lease due jobs in one transaction.
///
/// Rows that no longer decode are deleted: retrying them can never succeed.
fn lease_due_jobs(
    conn: &mut Connection,
    now: i64,
    lease_until: i64,
    limit: i64,
) -> CoreResult<Vec<Job>> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let due = {
        let mut stmt = tx.prepare(
            "SELECT id, queued_at, due_at, payload FROM jobs
             WHERE due_at < ?1 OR (due_at = ?1 AND queued_at <= ?1)
             ORDER BY due_at, queued_at
             LIMIT ?2",
        )?;
        stmt.query_map(params![now, limit], read_row)?
            .collect::<Result<Vec<_>, _>>()?
    };

    let mut leased = Vec::with_capacity(due.len());

    for raw in due {
        let raw_id = raw.id.clone();
        match decode(raw) {
            Ok(mut job) => {
                tx.execute(
                    "UPDATE jobs SET due_at = ?2 WHERE id = ?1",
                    params![raw_id, lease_until],
                )?;
                job.due_at = lease_until;
                leased.push(job);
            }
            Err(reason) => {
                error!(job_id = %raw_id, reason = %reason, "Dropping undecodable job");
                tx.execute("DELETE FROM jobs WHERE id = ?1", params![raw_id])?;
            }
        }
    }

    tx.commit()?;

    Ok(leased)
}

fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
