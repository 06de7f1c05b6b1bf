use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use tracing::info;

use jobwheel_core::{JobId, TriggerStatus};

use crate::{
    error::{Result, SchedulerError},
    schedule::next_valid_time,
    types::{split_addresses, JobRecord, NewJob, TriggerTarget},
};

/// Name of the sentinel row every coordinator locks before polling.
pub const SCHEDULE_LOCK: &str = "schedule_lock";

/// Initialise the scheduler schema in `conn`.
///
/// Creates the `jobs` table (idempotent), the index the poller's range scan
/// relies on, and the `job_lock` table holding the schedule lock sentinel.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS jobs (
            id                  INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
            job_desc            TEXT    NOT NULL DEFAULT '',
            schedule_cron       TEXT    NOT NULL,
            trigger_status      INTEGER NOT NULL DEFAULT 0,   -- 1 running, 0 stopped
            trigger_last_time   INTEGER NOT NULL DEFAULT 0,   -- epoch ms, 0 = none
            trigger_next_time   INTEGER NOT NULL DEFAULT 0,   -- epoch ms, 0 = none
            executor_handler    TEXT    NOT NULL DEFAULT '',
            executor_param      TEXT,
            executor_addresses  TEXT    NOT NULL DEFAULT '',  -- comma-separated
            executor_timeout    INTEGER NOT NULL DEFAULT 0,
            fail_retry_count    INTEGER NOT NULL DEFAULT 0,
            created_at          TEXT    NOT NULL,
            updated_at          TEXT    NOT NULL
        ) STRICT;

        -- Poller scan: WHERE trigger_status = 1 AND trigger_next_time <= ?
        CREATE INDEX IF NOT EXISTS idx_jobs_trigger
            ON jobs (trigger_status, trigger_next_time);

        CREATE TABLE IF NOT EXISTS job_lock (
            lock_name   TEXT    NOT NULL PRIMARY KEY,
            locked_at   INTEGER NOT NULL DEFAULT 0
        ) STRICT;

        INSERT OR IGNORE INTO job_lock (lock_name, locked_at) VALUES ('schedule_lock', 0);
        ",
    )?;
    Ok(())
}

/// Take the cluster-wide schedule lock.
///
/// Opens an IMMEDIATE transaction (SQLite's write lock) and touches the
/// sentinel row. The lock is held until the returned transaction commits;
/// dropping it rolls back and releases the lock.
///
/// `clock` is read after the lock is acquired; the reading is returned with
/// the transaction.
pub fn lock_schedule<C>(conn: &mut Connection, clock: C) -> Result<(Transaction<'_>, i64)>
where
    C: FnOnce() -> i64,
{
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let now_ms = clock();
    let n = tx.execute(
        "UPDATE job_lock SET locked_at = ?1 WHERE lock_name = ?2",
        params![now_ms, SCHEDULE_LOCK],
    )?;
    if n == 0 {
        return Err(SchedulerError::LockUnavailable(format!(
            "sentinel row '{SCHEDULE_LOCK}' is missing"
        )));
    }
    Ok((tx, now_ms))
}

/// Running jobs whose next trigger is at or before `max_next_time`.
pub fn schedule_scan(conn: &Connection, max_next_time: i64, limit: usize) -> Result<Vec<JobRecord>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, schedule_cron, trigger_status, trigger_last_time, trigger_next_time
         FROM jobs
         WHERE trigger_status = 1 AND trigger_next_time <= ?1
         LIMIT ?2",
    )?;
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let rows = stmt
        .query_map(params![max_next_time, limit], |row| {
            Ok(JobRecord {
                id: row.get(0)?,
                schedule_cron: row.get(1)?,
                trigger_status: TriggerStatus::from_i64(row.get(2)?),
                trigger_last_time: row.get(3)?,
                trigger_next_time: row.get(4)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Persist the fields the poller owns.
pub fn schedule_update(conn: &Connection, job: &JobRecord) -> Result<()> {
    conn.prepare_cached(
        "UPDATE jobs SET trigger_status = ?1, trigger_last_time = ?2,
                         trigger_next_time = ?3, updated_at = ?4
         WHERE id = ?5",
    )?
    .execute(params![
        job.trigger_status.as_i64(),
        job.trigger_last_time,
        job.trigger_next_time,
        Utc::now().to_rfc3339(),
        job.id
    ])?;
    Ok(())
}

/// Owner of one SQLite connection to the job table.
///
/// The poller and the dispatch path each hold their own store so the
/// schedule lock transaction never contends with trigger lookups in-process.
pub struct JobStore {
    conn: Connection,
}

impl JobStore {
    /// Wrap `conn`, initialising the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self { conn })
    }

    /// Open the database at `path` with a lock wait of `busy_timeout`.
    pub fn open(path: &str, busy_timeout: Duration) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::new(conn)
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Insert a job. Enabled jobs get their first trigger computed from now.
    pub fn add_job(&self, job: &NewJob) -> Result<JobRecord> {
        let now = Utc::now();
        let now_str = now.to_rfc3339();
        let (status, next) = if job.enabled {
            match next_valid_time(&job.schedule_cron, now.timestamp_millis())? {
                Some(next) => (TriggerStatus::Running, next),
                None => (TriggerStatus::Stopped, 0),
            }
        } else {
            // Still validate so bad expressions are rejected at creation.
            crate::schedule::parse_cron(&job.schedule_cron)?;
            (TriggerStatus::Stopped, 0)
        };

        self.conn.execute(
            "INSERT INTO jobs
             (job_desc, schedule_cron, trigger_status, trigger_last_time, trigger_next_time,
              executor_handler, executor_param, executor_addresses, executor_timeout,
              fail_retry_count, created_at, updated_at)
             VALUES (?1,?2,?3,0,?4,?5,?6,?7,?8,?9,?10,?10)",
            params![
                job.job_desc,
                job.schedule_cron,
                status.as_i64(),
                next,
                job.executor_handler,
                job.executor_param,
                job.executor_addresses.join(","),
                job.executor_timeout,
                job.fail_retry_count,
                now_str
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        info!(job_id = id, cron = %job.schedule_cron, "job added");

        Ok(JobRecord {
            id,
            schedule_cron: job.schedule_cron.clone(),
            trigger_status: status,
            trigger_last_time: 0,
            trigger_next_time: next,
        })
    }

    pub fn get_job(&self, id: JobId) -> Result<JobRecord> {
        self.conn
            .query_row(
                "SELECT id, schedule_cron, trigger_status, trigger_last_time, trigger_next_time
                 FROM jobs WHERE id = ?1",
                [id],
                |row| {
                    Ok(JobRecord {
                        id: row.get(0)?,
                        schedule_cron: row.get(1)?,
                        trigger_status: TriggerStatus::from_i64(row.get(2)?),
                        trigger_last_time: row.get(3)?,
                        trigger_next_time: row.get(4)?,
                    })
                },
            )
            .optional()?
            .ok_or(SchedulerError::JobNotFound { id })
    }

    /// External start/stop edit. Starting recomputes the next trigger from now.
    pub fn set_trigger_status(&self, id: JobId, status: TriggerStatus) -> Result<JobRecord> {
        let mut job = self.get_job(id)?;
        match status {
            TriggerStatus::Running => {
                let now = Utc::now().timestamp_millis();
                match next_valid_time(&job.schedule_cron, now)? {
                    Some(next) => {
                        job.trigger_status = TriggerStatus::Running;
                        job.trigger_last_time = 0;
                        job.trigger_next_time = next;
                    }
                    None => crate::schedule::stop_job(&mut job),
                }
            }
            TriggerStatus::Stopped => crate::schedule::stop_job(&mut job),
        }
        schedule_update(&self.conn, &job)?;
        info!(job_id = id, status = ?job.trigger_status, "job trigger status changed");
        Ok(job)
    }

    /// Executor-facing fields for one job, read by the dispatch path.
    pub fn trigger_target(&self, id: JobId) -> Result<TriggerTarget> {
        self.conn
            .query_row(
                "SELECT id, executor_handler, executor_param, executor_addresses,
                        executor_timeout, fail_retry_count
                 FROM jobs WHERE id = ?1",
                [id],
                |row| {
                    Ok(TriggerTarget {
                        job_id: row.get(0)?,
                        executor_handler: row.get(1)?,
                        executor_param: row.get(2)?,
                        executor_addresses: split_addresses(&row.get::<_, String>(3)?),
                        executor_timeout: row.get(4)?,
                        fail_retry_count: row.get(5)?,
                    })
                },
            )
            .optional()?
            .ok_or(SchedulerError::JobNotFound { id })
    }

    /// Overwrite the poller-owned fields directly. Used to seed fixtures
    /// and by operators repairing a stuck job.
    pub fn update_schedule(&self, job: &JobRecord) -> Result<()> {
        schedule_update(&self.conn, job)
    }
}
