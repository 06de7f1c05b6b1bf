use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use jobwheel_core::{config::ScheduleConfig, JobId};

use crate::{
    db::{self, JobStore},
    dispatch::TriggerDispatch,
    error::{Result, SchedulerError},
    ring::{slot_for, TimeWheel, WHEEL_SLOTS},
    schedule::{refresh_next_valid_time, stop_job},
    types::{JobRecord, TriggerRequest},
};

/// Lookahead window: jobs due within this many ms are pre-read each poll.
pub const PRE_READ_MS: i64 = 5000;
/// Buckets drained per sweeper tick: the current second plus one behind.
const RING_LOOKBACK: u32 = 2;
/// Polls slower than this skip the inter-iteration sleep.
const SCAN_OVERTIME: Duration = Duration::from_millis(1000);
const DRAIN_POLL: Duration = Duration::from_millis(100);

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Sleep that lands on a whole-second boundary: `interval - now mod 1000`.
pub fn align_sleep(interval_ms: i64, now_ms: i64) -> Duration {
    let ms = (interval_ms - now_ms.rem_euclid(1000)).max(0);
    Duration::from_millis(ms as u64)
}

/// Counters for one poller iteration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollOutcome {
    pub scanned: usize,
    pub dispatched: usize,
    pub ring_pushed: usize,
    /// Wheel pushes held back because the job was still pending in the wheel.
    /// The row keeps its next trigger time and is picked up by a later poll.
    pub deferred: usize,
    pub misfired: usize,
    /// Jobs stopped this iteration (expression exhausted or unparseable).
    pub disabled: usize,
}

/// Side effects deferred until the schedule transaction has committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Effect {
    Dispatch(JobId),
    Ring { slot: u32, job_id: JobId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Plan {
    Scheduled,
    Misfired,
    /// Next occurrence left in place: the wheel already holds this job.
    Deferred,
}

/// Classify one pre-read job against `now_ms` and advance its trigger times.
///
/// `pending` says whether the wheel already holds the job. A job may sit in
/// at most one slot, so a wheel push for a pending job is not planned and
/// its `trigger_next_time` stays where it is.
fn plan_job(
    job: &mut JobRecord,
    now_ms: i64,
    pending: bool,
    effects: &mut Vec<Effect>,
) -> Result<Plan> {
    if now_ms > job.trigger_next_time + PRE_READ_MS {
        // Misfire: too late to be meaningful. Skip, never backfill.
        warn!(
            job_id = job.id,
            planned = job.trigger_next_time,
            "schedule misfire, trigger skipped"
        );
        refresh_next_valid_time(job, now_ms)?;
        return Ok(Plan::Misfired);
    }

    if now_ms > job.trigger_next_time {
        effects.push(Effect::Dispatch(job.id));
        refresh_next_valid_time(job, now_ms)?;

        // The following occurrence is also inside the window: queue it now.
        if job.trigger_status.is_running() && now_ms + PRE_READ_MS > job.trigger_next_time {
            if pending {
                return Ok(Plan::Deferred);
            }
            effects.push(Effect::Ring {
                slot: slot_for(job.trigger_next_time),
                job_id: job.id,
            });
            let from = job.trigger_next_time;
            refresh_next_valid_time(job, from)?;
        }
    } else {
        if pending {
            return Ok(Plan::Deferred);
        }
        effects.push(Effect::Ring {
            slot: slot_for(job.trigger_next_time),
            job_id: job.id,
        });
        let from = job.trigger_next_time;
        refresh_next_valid_time(job, from)?;
    }
    Ok(Plan::Scheduled)
}

/// Reads due and near-due jobs under the schedule lock and routes each to
/// immediate dispatch, the time wheel, or the misfire path.
pub struct SchedulePoller {
    store: JobStore,
    wheel: Arc<TimeWheel>,
    dispatch: Arc<dyn TriggerDispatch>,
    pre_read_count: usize,
}

impl SchedulePoller {
    pub fn new(
        store: JobStore,
        wheel: Arc<TimeWheel>,
        dispatch: Arc<dyn TriggerDispatch>,
        pre_read_count: usize,
    ) -> Self {
        Self {
            store,
            wheel,
            dispatch,
            pre_read_count,
        }
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    /// Run one iteration against the wall clock.
    pub fn poll_once(&mut self) -> Result<PollOutcome> {
        self.poll_once_with(now_ms)
    }

    /// Run one iteration, reading the time from `clock` once the schedule
    /// lock is held.
    ///
    /// Storage errors abandon the whole batch: the transaction rolls back and
    /// nothing is dispatched or queued.
    pub fn poll_once_with<C>(&mut self, clock: C) -> Result<PollOutcome>
    where
        C: FnOnce() -> i64,
    {
        let mut outcome = PollOutcome::default();
        let mut effects = Vec::new();

        let (tx, now_ms) = db::lock_schedule(self.store.connection_mut(), clock)?;
        let mut jobs = db::schedule_scan(&tx, now_ms + PRE_READ_MS, self.pre_read_count)?;
        outcome.scanned = jobs.len();

        for job in jobs.iter_mut() {
            let mark = effects.len();
            let pending = self.wheel.slot_of(job.id).is_some();
            match plan_job(job, now_ms, pending, &mut effects) {
                Ok(Plan::Scheduled) => {}
                Ok(Plan::Misfired) => outcome.misfired += 1,
                Ok(Plan::Deferred) => {
                    outcome.deferred += 1;
                    debug!(job_id = job.id, next = job.trigger_next_time, "job still pending in time-ring, push deferred");
                }
                Err(e) => {
                    error!(job_id = job.id, cron = %job.schedule_cron, "next trigger computation failed, stopping job: {e}");
                    effects.truncate(mark);
                    stop_job(job);
                }
            }
            if !job.trigger_status.is_running() {
                outcome.disabled += 1;
            }
        }

        for job in &jobs {
            db::schedule_update(&tx, job)?;
        }
        tx.commit()?;

        for effect in effects {
            match effect {
                Effect::Dispatch(job_id) => {
                    self.dispatch.submit(TriggerRequest::cron(job_id));
                    outcome.dispatched += 1;
                    debug!(job_id, "schedule push trigger");
                }
                Effect::Ring { slot, job_id } => {
                    if self.wheel.push(slot, job_id) {
                        outcome.ring_pushed += 1;
                        debug!(job_id, slot, "schedule push time-ring");
                    } else {
                        error!(job_id, slot, "job already pending in time-ring, push rejected");
                    }
                }
            }
        }

        Ok(outcome)
    }

    /// Poller loop. Runs until `stop` is raised.
    pub async fn run(mut self, stop: Arc<AtomicBool>, mut interrupt: watch::Receiver<bool>) {
        pause(align_sleep(1000, now_ms()), &stop, &mut interrupt).await;
        info!(pre_read = self.pre_read_count, "schedule poller started");

        while !stop.load(Ordering::Acquire) {
            let started = Instant::now();
            let found = match self.poll_once() {
                Ok(outcome) => {
                    if outcome.scanned > 0 {
                        debug!(?outcome, "schedule poll complete");
                    }
                    outcome.scanned > 0
                }
                Err(e) => {
                    if !stop.load(Ordering::Acquire) {
                        error!("schedule poll failed: {e}");
                    }
                    true
                }
            };

            if started.elapsed() < SCAN_OVERTIME {
                let interval = if found { 1000 } else { PRE_READ_MS };
                pause(align_sleep(interval, now_ms()), &stop, &mut interrupt).await;
            }
        }
        info!("schedule poller stopped");
    }
}

/// Drains the time wheel once per second and submits what it finds.
pub struct RingSweeper {
    wheel: Arc<TimeWheel>,
    dispatch: Arc<dyn TriggerDispatch>,
}

impl RingSweeper {
    pub fn new(wheel: Arc<TimeWheel>, dispatch: Arc<dyn TriggerDispatch>) -> Self {
        Self { wheel, dispatch }
    }

    /// Drain the bucket for `now_second` and the one before it.
    ///
    /// The extra bucket covers a tick that ran late and crossed a second.
    pub fn sweep(&self, now_second: u32) -> usize {
        let now_second = now_second % WHEEL_SLOTS;
        let mut due = Vec::new();
        for back in 0..RING_LOOKBACK {
            due.extend(self.wheel.drain((now_second + WHEEL_SLOTS - back) % WHEEL_SLOTS));
        }
        debug!(second = now_second, ?due, "time-ring beat");
        for job_id in &due {
            self.dispatch.submit(TriggerRequest::cron(*job_id));
        }
        due.len()
    }

    pub async fn run(self, stop: Arc<AtomicBool>, mut interrupt: watch::Receiver<bool>) {
        pause(align_sleep(1000, now_ms()), &stop, &mut interrupt).await;
        info!("ring sweeper started");

        while !stop.load(Ordering::Acquire) {
            self.sweep(slot_for(now_ms()));
            pause(align_sleep(1000, now_ms()), &stop, &mut interrupt).await;
        }
        info!("ring sweeper stopped");
    }
}

/// Sleep for `duration` unless interrupted.
///
/// An interrupt while `stop` is clear is unexpected and logged as an error.
/// If the controlling handle has gone away the loop is told to stop.
async fn pause(duration: Duration, stop: &AtomicBool, interrupt: &mut watch::Receiver<bool>) {
    tokio::select! {
        _ = tokio::time::sleep(duration) => {}
        changed = interrupt.changed() => {
            match changed {
                Ok(()) if !stop.load(Ordering::Acquire) => {
                    error!("scheduler loop sleep interrupted while running");
                }
                Ok(()) => {}
                Err(_) => {
                    warn!("scheduler handle dropped, stopping loop");
                    stop.store(true, Ordering::Release);
                }
            }
        }
    }
}

/// Cheap, cloneable view of which loops are alive.
#[derive(Debug, Clone, Default)]
pub struct LifecycleProbe {
    poller: Arc<AtomicBool>,
    sweeper: Arc<AtomicBool>,
}

impl LifecycleProbe {
    pub fn poller_running(&self) -> bool {
        self.poller.load(Ordering::Acquire)
    }

    pub fn sweeper_running(&self) -> bool {
        self.sweeper.load(Ordering::Acquire)
    }
}

struct LoopHandle {
    name: &'static str,
    stop: Arc<AtomicBool>,
    interrupt: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl LoopHandle {
    fn spawn<F, Fut>(name: &'static str, running: Arc<AtomicBool>, body: F) -> Self
    where
        F: FnOnce(Arc<AtomicBool>, watch::Receiver<bool>) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let (interrupt, interrupt_rx) = watch::channel(false);
        let fut = body(Arc::clone(&stop), interrupt_rx);
        running.store(true, Ordering::Release);
        let join = tokio::spawn(async move {
            fut.await;
            running.store(false, Ordering::Release);
        });
        Self {
            name,
            stop,
            interrupt,
            join,
        }
    }

    /// Raise the flag, give the current iteration `grace` to finish, then
    /// interrupt any sleep and wait for the task to exit.
    async fn shutdown(self, grace: Duration) {
        self.stop.store(true, Ordering::Release);
        if !self.join.is_finished() {
            tokio::time::sleep(grace).await;
        }
        if !self.join.is_finished() {
            let _ = self.interrupt.send(true);
        }
        if let Err(e) = self.join.await {
            error!(task = self.name, "scheduler loop ended abnormally: {e}");
        }
    }
}

/// Owns the poller and sweeper for one coordinator process.
///
/// `start` spawns both loops; `stop` shuts the poller down first, lets the
/// sweeper flush whatever the wheel still holds, then stops the sweeper.
pub struct JobScheduler {
    config: ScheduleConfig,
    wheel: Arc<TimeWheel>,
    dispatch: Arc<dyn TriggerDispatch>,
    store: Option<JobStore>,
    poller: Option<LoopHandle>,
    sweeper: Option<LoopHandle>,
    probe: LifecycleProbe,
}

impl JobScheduler {
    pub fn new(store: JobStore, dispatch: Arc<dyn TriggerDispatch>, config: ScheduleConfig) -> Self {
        Self {
            config,
            wheel: Arc::new(TimeWheel::new()),
            dispatch,
            store: Some(store),
            poller: None,
            sweeper: None,
            probe: LifecycleProbe::default(),
        }
    }

    pub fn wheel(&self) -> Arc<TimeWheel> {
        Arc::clone(&self.wheel)
    }

    pub fn probe(&self) -> LifecycleProbe {
        self.probe.clone()
    }

    /// Spawn both loops on the current tokio runtime. Once per lifecycle.
    pub fn start(&mut self) -> Result<()> {
        let store = self.store.take().ok_or(SchedulerError::AlreadyStarted)?;

        let poller = SchedulePoller::new(
            store,
            Arc::clone(&self.wheel),
            Arc::clone(&self.dispatch),
            self.config.pre_read_count(),
        );
        self.poller = Some(LoopHandle::spawn(
            "schedule-poller",
            Arc::clone(&self.probe.poller),
            move |stop, interrupt| poller.run(stop, interrupt),
        ));

        let sweeper = RingSweeper::new(Arc::clone(&self.wheel), Arc::clone(&self.dispatch));
        self.sweeper = Some(LoopHandle::spawn(
            "ring-sweeper",
            Arc::clone(&self.probe.sweeper),
            move |stop, interrupt| sweeper.run(stop, interrupt),
        ));

        info!("job scheduler started");
        Ok(())
    }

    /// Staged shutdown. No-op if the scheduler was never started.
    pub async fn stop(&mut self) {
        let grace = Duration::from_millis(self.config.stop_grace_ms);

        let Some(poller) = self.poller.take() else {
            return;
        };
        poller.shutdown(grace).await;

        if !self.wheel.is_empty() {
            let limit = Duration::from_secs(self.config.ring_drain_grace_secs);
            info!(
                pending = self.wheel.pending(),
                "waiting up to {}s for time-ring to drain",
                limit.as_secs()
            );
            let deadline = Instant::now() + limit;
            while !self.wheel.is_empty() {
                let now = Instant::now();
                if now >= deadline {
                    warn!(pending = self.wheel.pending(), "time-ring not drained before shutdown");
                    break;
                }
                tokio::time::sleep(DRAIN_POLL.min(deadline - now)).await;
            }
        }

        if let Some(sweeper) = self.sweeper.take() {
            sweeper.shutdown(grace).await;
        }
        info!("job scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use jobwheel_core::TriggerStatus;
    use rusqlite::Connection;
    use tokio::sync::mpsc;

    use crate::types::NewJob;

    /// 2024-01-01T00:00:30Z
    fn now() -> i64 {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 30)
            .unwrap()
            .timestamp_millis()
    }

    fn sec(s: i64) -> i64 {
        now() - 30_000 + s * 1000
    }

    struct Fixture {
        poller: SchedulePoller,
        sweeper: RingSweeper,
        wheel: Arc<TimeWheel>,
        rx: mpsc::Receiver<TriggerRequest>,
    }

    fn fixture(jobs: &[(&str, i64)], pre_read: usize) -> (Fixture, Vec<JobId>) {
        let store = JobStore::new(Connection::open_in_memory().unwrap()).unwrap();
        let mut ids = Vec::new();
        for (cron, next) in jobs {
            let mut job = store
                .add_job(&NewJob {
                    schedule_cron: cron.to_string(),
                    ..Default::default()
                })
                .unwrap();
            job.trigger_status = TriggerStatus::Running;
            job.trigger_next_time = *next;
            store.update_schedule(&job).unwrap();
            ids.push(job.id);
        }
        let wheel = Arc::new(TimeWheel::new());
        let (tx, rx) = mpsc::channel(64);
        let sweeper = RingSweeper::new(Arc::clone(&wheel), Arc::new(tx.clone()));
        let poller = SchedulePoller::new(store, Arc::clone(&wheel), Arc::new(tx), pre_read);
        (
            Fixture {
                poller,
                sweeper,
                wheel,
                rx,
            },
            ids,
        )
    }

    fn drain_rx(rx: &mut mpsc::Receiver<TriggerRequest>) -> Vec<JobId> {
        let mut out = Vec::new();
        while let Ok(req) = rx.try_recv() {
            out.push(req.job_id);
        }
        out
    }

    #[test]
    fn align_sleep_targets_whole_seconds() {
        assert_eq!(align_sleep(1000, 12_345), Duration::from_millis(655));
        assert_eq!(align_sleep(1000, 12_000), Duration::from_millis(1000));
        assert_eq!(align_sleep(5000, 12_250), Duration::from_millis(4750));
    }

    #[test]
    fn misfire_skips_and_recomputes_from_now() {
        let (mut f, ids) = fixture(&[("*/10 * * * * *", sec(24))], 100);
        let outcome = f.poller.poll_once_with(now).unwrap();

        assert_eq!(outcome.misfired, 1);
        assert_eq!(outcome.dispatched, 0);
        assert!(drain_rx(&mut f.rx).is_empty());
        let job = f.poller.store().get_job(ids[0]).unwrap();
        // From now (:30), not from the missed instant (:24 -> :30).
        assert_eq!(job.trigger_next_time, sec(40));
        assert_eq!(job.trigger_last_time, sec(24));
        assert!(f.wheel.is_empty());
    }

    #[test]
    fn due_job_dispatches_immediately() {
        let (mut f, ids) = fixture(&[("*/10 * * * * *", sec(28))], 100);
        let outcome = f.poller.poll_once_with(now).unwrap();

        assert_eq!(outcome.dispatched, 1);
        assert_eq!(outcome.ring_pushed, 0);
        assert_eq!(drain_rx(&mut f.rx), vec![ids[0]]);
        let job = f.poller.store().get_job(ids[0]).unwrap();
        assert_eq!(job.trigger_next_time, sec(40));
        assert_eq!(job.trigger_last_time, sec(28));
    }

    #[test]
    fn due_job_with_close_successor_is_also_queued() {
        let (mut f, ids) = fixture(&[("* * * * * *", sec(28))], 100);
        let outcome = f.poller.poll_once_with(now).unwrap();

        assert_eq!(outcome.dispatched, 1);
        assert_eq!(outcome.ring_pushed, 1);
        assert_eq!(f.wheel.slot_of(ids[0]), Some(31));
        let job = f.poller.store().get_job(ids[0]).unwrap();
        // The wheel holds :31; the row has moved past it.
        assert_eq!(job.trigger_last_time, sec(31));
        assert_eq!(job.trigger_next_time, sec(32));
    }

    #[test]
    fn near_future_job_goes_to_wheel() {
        let (mut f, ids) = fixture(&[("*/10 * * * * *", sec(33))], 100);
        let outcome = f.poller.poll_once_with(now).unwrap();

        assert_eq!(outcome.ring_pushed, 1);
        assert_eq!(outcome.dispatched, 0);
        assert_eq!(f.wheel.peek(33), vec![ids[0]]);
        let job = f.poller.store().get_job(ids[0]).unwrap();
        assert_eq!(job.trigger_next_time, sec(40));
        assert_eq!(job.trigger_last_time, sec(33));
    }

    #[test]
    fn jobs_beyond_lookahead_are_not_read() {
        let (mut f, ids) = fixture(&[("*/10 * * * * *", sec(36))], 100);
        let outcome = f.poller.poll_once_with(now).unwrap();
        assert_eq!(outcome, PollOutcome::default());
        let job = f.poller.store().get_job(ids[0]).unwrap();
        assert_eq!(job.trigger_next_time, sec(36));
    }

    #[test]
    fn exhausted_job_is_stopped_after_final_fire() {
        let (mut f, ids) = fixture(&[("0 0 0 1 1 ? 2000", sec(28))], 100);
        let outcome = f.poller.poll_once_with(now).unwrap();

        assert_eq!(outcome.dispatched, 1);
        assert_eq!(outcome.disabled, 1);
        let job = f.poller.store().get_job(ids[0]).unwrap();
        assert_eq!(job.trigger_status, TriggerStatus::Stopped);
        assert_eq!(job.trigger_next_time, 0);
        assert_eq!(job.trigger_last_time, 0);

        // Stays stopped on later polls.
        let again = f.poller.poll_once_with(|| now() + 1000).unwrap();
        assert_eq!(again.scanned, 0);
    }

    #[test]
    fn bad_cron_is_isolated_to_its_job() {
        let (mut f, ids) = fixture(&[("*/10 * * * * *", sec(28))], 100);
        f.poller
            .store
            .connection_mut()
            .execute(
                "INSERT INTO jobs (schedule_cron, trigger_status, trigger_next_time, created_at, updated_at)
                 VALUES ('garbage', 1, ?1, 'x', 'x')",
                [sec(28)],
            )
            .unwrap();
        let bad_id = f.poller.store.connection_mut().last_insert_rowid();

        let outcome = f.poller.poll_once_with(now).unwrap();
        assert_eq!(outcome.scanned, 2);
        assert_eq!(outcome.disabled, 1);
        assert_eq!(drain_rx(&mut f.rx), vec![ids[0]]);

        let bad = f.poller.store().get_job(bad_id).unwrap();
        assert_eq!(bad.trigger_status, TriggerStatus::Stopped);
        let good = f.poller.store().get_job(ids[0]).unwrap();
        assert_eq!(good.trigger_next_time, sec(40));
    }

    #[test]
    fn pending_job_keeps_next_trigger_until_swept() {
        let (mut f, ids) = fixture(&[("* * * * * *", sec(31))], 100);
        f.poller.poll_once_with(now).unwrap();
        assert_eq!(f.wheel.slot_of(ids[0]), Some(31));

        // Row now points at :32, still inside the window, but :31 is queued.
        let outcome = f.poller.poll_once_with(now).unwrap();
        assert_eq!(outcome.deferred, 1);
        assert_eq!(outcome.ring_pushed, 0);
        assert_eq!(f.wheel.slot_of(ids[0]), Some(31));
        let job = f.poller.store().get_job(ids[0]).unwrap();
        assert_eq!(job.trigger_last_time, sec(31));
        assert_eq!(job.trigger_next_time, sec(32));

        // Once :31 is swept, the next poll queues :32.
        f.sweeper.sweep(31);
        assert_eq!(drain_rx(&mut f.rx), vec![ids[0]]);
        let outcome = f.poller.poll_once_with(|| sec(31)).unwrap();
        assert_eq!(outcome.ring_pushed, 1);
        assert_eq!(f.wheel.slot_of(ids[0]), Some(32));
        assert_eq!(f.poller.store().get_job(ids[0]).unwrap().trigger_next_time, sec(33));
    }

    #[test]
    fn short_period_job_fires_every_occurrence() {
        // Poll at various points within each second, sweeping first as the
        // two loops would.
        for offset in [0, 250, 999] {
            let (mut f, ids) = fixture(&[("*/2 * * * * *", sec(30))], 100);
            for t in 0..20 {
                let at = sec(30 + t) + offset;
                f.sweeper.sweep(slot_for(at));
                let outcome = f.poller.poll_once_with(|| at).unwrap();
                assert_eq!(outcome.misfired, 0, "offset {offset}, t {t}");
            }

            // :30, :32, ... :48 have fired; :50 is waiting in the wheel.
            let fired = drain_rx(&mut f.rx);
            assert_eq!(fired.len(), 10, "offset {offset}");
            assert!(fired.iter().all(|id| *id == ids[0]));
            assert_eq!(f.wheel.slot_of(ids[0]), Some(50));
        }
    }

    #[test]
    fn clock_is_read_after_waiting_for_the_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.db");
        let path = path.to_str().unwrap().to_string();

        let store = JobStore::open(&path, Duration::from_secs(10)).unwrap();
        let mut job = store
            .add_job(&NewJob {
                schedule_cron: "0 0 0 1 1 ? 2099".into(),
                ..Default::default()
            })
            .unwrap();
        job.trigger_status = TriggerStatus::Running;
        job.trigger_next_time = Utc::now().timestamp_millis() + 1000;
        store.update_schedule(&job).unwrap();

        let wheel = Arc::new(TimeWheel::new());
        let (tx, mut rx) = mpsc::channel(8);
        let mut poller = SchedulePoller::new(store, Arc::clone(&wheel), Arc::new(tx), 100);

        // Another coordinator holds the lock past the job's due time.
        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let holder_path = path.clone();
        let holder = std::thread::spawn(move || {
            let mut conn = Connection::open(holder_path).unwrap();
            let (lock, _) = db::lock_schedule(&mut conn, || 0).unwrap();
            locked_tx.send(()).unwrap();
            std::thread::sleep(Duration::from_millis(2000));
            lock.commit().unwrap();
        });
        locked_rx.recv().unwrap();

        let outcome = poller.poll_once().unwrap();
        holder.join().unwrap();

        // Due by the time the lock was granted: fired directly, not queued
        // into a slot the sweeper has already passed.
        assert_eq!(outcome.dispatched, 1);
        assert_eq!(outcome.ring_pushed, 0);
        assert!(wheel.is_empty());
        assert_eq!(drain_rx(&mut rx), vec![job.id]);
    }

    #[test]
    fn failed_iteration_fires_nothing() {
        let (mut f, ids) = fixture(
            &[("*/10 * * * * *", sec(28)), ("*/10 * * * * *", sec(33))],
            100,
        );
        f.poller
            .store
            .connection_mut()
            .execute_batch(
                "CREATE TRIGGER jobs_frozen BEFORE UPDATE ON jobs
                 BEGIN SELECT RAISE(ABORT, 'jobs table is frozen'); END;",
            )
            .unwrap();

        let err = f.poller.poll_once_with(now).unwrap_err();
        assert!(matches!(err, SchedulerError::Database(_)));
        assert!(drain_rx(&mut f.rx).is_empty());
        assert!(f.wheel.is_empty());
        let due = f.poller.store().get_job(ids[0]).unwrap();
        assert_eq!(due.trigger_next_time, sec(28));

        // Lock released by the rollback; the next iteration goes through.
        f.poller
            .store
            .connection_mut()
            .execute_batch("DROP TRIGGER jobs_frozen;")
            .unwrap();
        let outcome = f.poller.poll_once_with(now).unwrap();
        assert_eq!(outcome.dispatched, 1);
        assert_eq!(outcome.ring_pushed, 1);
        assert_eq!(drain_rx(&mut f.rx), vec![ids[0]]);
        assert_eq!(f.wheel.slot_of(ids[1]), Some(33));
    }

    #[test]
    fn scan_respects_pre_read_count() {
        let jobs = [
            ("*/10 * * * * *", sec(28)),
            ("*/10 * * * * *", sec(28)),
            ("*/10 * * * * *", sec(28)),
        ];
        let (mut f, _) = fixture(&jobs, 2);
        assert_eq!(f.poller.poll_once_with(now).unwrap().scanned, 2);
        assert_eq!(f.poller.poll_once_with(now).unwrap().scanned, 1);
    }

    #[test]
    fn sweep_drains_current_and_previous_second() {
        let wheel = Arc::new(TimeWheel::new());
        let (tx, mut rx) = mpsc::channel(16);
        let sweeper = RingSweeper::new(Arc::clone(&wheel), Arc::new(tx));
        wheel.push(10, 1);
        wheel.push(9, 2);
        wheel.push(8, 3);

        assert_eq!(sweeper.sweep(10), 2);
        let mut fired = drain_rx(&mut rx);
        fired.sort();
        assert_eq!(fired, vec![1, 2]);
        assert_eq!(wheel.peek(8), vec![3]);
        assert!(wheel.peek(9).is_empty());
        assert!(wheel.peek(10).is_empty());
    }

    #[test]
    fn sweep_wraps_around_minute() {
        let wheel = Arc::new(TimeWheel::new());
        let (tx, mut rx) = mpsc::channel(16);
        let sweeper = RingSweeper::new(Arc::clone(&wheel), Arc::new(tx));
        wheel.push(59, 7);

        assert_eq!(sweeper.sweep(0), 1);
        assert_eq!(drain_rx(&mut rx), vec![7]);
        assert!(wheel.is_empty());
    }
}
