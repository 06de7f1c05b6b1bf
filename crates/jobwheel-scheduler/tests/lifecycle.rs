// Start/stop behaviour of the scheduler loops, driven on paused tokio time.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rusqlite::Connection;
use tokio::sync::mpsc;
use tokio::time::Instant;

use jobwheel_core::config::ScheduleConfig;
use jobwheel_scheduler::ring::slot_for;
use jobwheel_scheduler::{JobScheduler, JobStore, SchedulerError, TriggerRequest};

fn scheduler() -> (JobScheduler, mpsc::Receiver<TriggerRequest>) {
    let store = JobStore::new(Connection::open_in_memory().unwrap()).unwrap();
    let (tx, rx) = mpsc::channel(64);
    (
        JobScheduler::new(store, Arc::new(tx), ScheduleConfig::default()),
        rx,
    )
}

/// A slot the wall clock will not reach while the test runs.
fn far_slot() -> u32 {
    (slot_for(Utc::now().timestamp_millis()) + 30) % 60
}

#[tokio::test(start_paused = true)]
async fn start_is_once_per_lifecycle() {
    let (mut sched, _rx) = scheduler();
    sched.start().unwrap();
    assert!(matches!(sched.start(), Err(SchedulerError::AlreadyStarted)));

    let probe = sched.probe();
    assert!(probe.poller_running());
    assert!(probe.sweeper_running());

    sched.stop().await;
    assert!(!probe.poller_running());
    assert!(!probe.sweeper_running());
    assert!(matches!(sched.start(), Err(SchedulerError::AlreadyStarted)));
}

#[tokio::test(start_paused = true)]
async fn stop_without_start_is_noop() {
    let (mut sched, _rx) = scheduler();
    let started = Instant::now();
    sched.stop().await;
    assert_eq!(started.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn empty_wheel_skips_drain_grace() {
    let (mut sched, _rx) = scheduler();
    sched.start().unwrap();

    let started = Instant::now();
    sched.stop().await;
    assert!(started.elapsed() < Duration::from_secs(8));
}

#[tokio::test(start_paused = true)]
async fn pending_wheel_delays_sweeper_stop() {
    let (mut sched, _rx) = scheduler();
    sched.start().unwrap();
    let probe = sched.probe();
    let wheel = sched.wheel();
    assert!(wheel.push(far_slot(), 99));

    let started = Instant::now();
    let stopper = tokio::spawn(async move {
        sched.stop().await;
        sched
    });

    tokio::time::sleep(Duration::from_secs(3)).await;
    // Poller is down first; the sweeper keeps running through the grace period.
    assert!(!probe.poller_running());
    assert!(probe.sweeper_running());

    let _sched = stopper.await.unwrap();
    assert!(started.elapsed() >= Duration::from_secs(8));
    assert!(!probe.sweeper_running());
    // Nothing swept it, so it is still there.
    assert_eq!(wheel.pending(), 1);
}

#[tokio::test(start_paused = true)]
async fn drained_wheel_ends_grace_early() {
    let (mut sched, _rx) = scheduler();
    sched.start().unwrap();
    let wheel = sched.wheel();
    let slot = far_slot();
    assert!(wheel.push(slot, 7));

    let drainer = {
        let wheel = Arc::clone(&wheel);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            wheel.drain(slot)
        })
    };

    let started = Instant::now();
    sched.stop().await;
    let elapsed = started.elapsed();

    assert_eq!(drainer.await.unwrap(), vec![7]);
    assert!(elapsed >= Duration::from_secs(2));
    assert!(elapsed < Duration::from_secs(8));
}
