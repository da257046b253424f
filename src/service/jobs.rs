//! Background jobs
//!
//! Each job is driven by its own timer. A tick that arrives while the previous
//! run of the same job is still in flight is dropped, never queued.
//!
//! ```text
//! Idle ──tick──▶ Running ──ok──▶ Idle
//!                   │
//!                   └──err/panic──▶ Failed ──logged──▶ Idle
//! ```

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{Days, NaiveDate, Utc};
use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::data::{Database, EntityKind, QueryCache};
use crate::error::{Errors, Result};
use crate::metrics::{JOB_RUNS_TOTAL, JOB_TICKS_SKIPPED_TOTAL, SWEPT_ROWS_TOTAL};

use super::reconciler::Reconciler;

/// A unit of periodic background work
#[async_trait]
pub trait Job: Send + Sync + 'static {
    /// Stable name used in logs and metrics
    fn name(&self) -> &'static str;

    async fn run(&self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum JobState {
    Idle = 0,
    Running = 1,
    Failed = 2,
}

impl JobState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => JobState::Running,
            2 => JobState::Failed,
            _ => JobState::Idle,
        }
    }
}

/// Result of asking a job to start
#[derive(Debug)]
pub enum Trigger {
    /// The body was spawned; the handle resolves when it finishes
    Started(JoinHandle<()>),
    /// A previous run is still in flight; this tick was dropped
    Skipped,
}

impl Trigger {
    pub fn is_started(&self) -> bool {
        matches!(self, Trigger::Started(_))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Returns the job to `Idle` however its body ends, aborts included
struct IdleOnDrop(Arc<AtomicU8>);

impl Drop for IdleOnDrop {
    fn drop(&mut self) {
        self.0.store(JobState::Idle as u8, Ordering::Release);
    }
}

/// A job guarded by a single atomic state flag
#[derive(Clone)]
pub struct ScheduledJob {
    job: Arc<dyn Job>,
    state: Arc<AtomicU8>,
}

impl ScheduledJob {
    pub fn new(job: Arc<dyn Job>) -> Self {
        Self {
            job,
            state: Arc::new(AtomicU8::new(JobState::Idle as u8)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.job.name()
    }

    pub fn state(&self) -> JobState {
        JobState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Start the job unless it is already running
    pub fn trigger(&self) -> Trigger {
        let name = self.job.name();
        if self
            .state
            .compare_exchange(
                JobState::Idle as u8,
                JobState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            JOB_TICKS_SKIPPED_TOTAL.with_label_values(&[name]).inc();
            tracing::debug!(job = name, "Previous run still in flight; tick dropped");
            return Trigger::Skipped;
        }

        let job = self.job.clone();
        let state = self.state.clone();
        let handle = tokio::spawn(async move {
            let _idle = IdleOnDrop(state.clone());
            let started = Instant::now();
            tracing::info!(job = name, "Job started");

            let outcome = AssertUnwindSafe(job.run()).catch_unwind().await;
            match outcome {
                Ok(Ok(())) => {
                    JOB_RUNS_TOTAL.with_label_values(&[name, "success"]).inc();
                    tracing::info!(
                        job = name,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Job finished"
                    );
                }
                Ok(Err(error)) => {
                    state.store(JobState::Failed as u8, Ordering::Release);
                    JOB_RUNS_TOTAL.with_label_values(&[name, "failure"]).inc();
                    tracing::error!(
                        job = name,
                        status = error.status_code().as_u16(),
                        %error,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Job failed"
                    );
                }
                Err(panic) => {
                    state.store(JobState::Failed as u8, Ordering::Release);
                    JOB_RUNS_TOTAL.with_label_values(&[name, "failure"]).inc();
                    tracing::error!(
                        job = name,
                        panic = panic_message(panic.as_ref()),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Job panicked"
                    );
                }
            }
        });

        Trigger::Started(handle)
    }

    /// Trigger the job after `initial_delay`, then every `interval`
    pub fn spawn_timer(&self, initial_delay: Duration, interval: Duration) -> JoinHandle<()> {
        let job = self.clone();
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + initial_delay;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                job.trigger();
            }
        })
    }
}

/// Owns the timer tasks of every scheduled job
#[derive(Default)]
pub struct Scheduler {
    timers: Vec<(&'static str, JoinHandle<()>)>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the timer of `job`
    pub fn schedule(&mut self, job: &ScheduledJob, initial_delay: Duration, interval: Duration) {
        tracing::info!(
            job = job.name(),
            initial_delay_secs = initial_delay.as_secs(),
            interval_secs = interval.as_secs(),
            "Job scheduled"
        );
        self.timers
            .push((job.name(), job.spawn_timer(initial_delay, interval)));
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Stop every timer; runs already in flight finish on their own
    pub fn shutdown(&mut self) {
        for (name, handle) in self.timers.drain(..) {
            handle.abort();
            tracing::info!(job = name, "Job timer stopped");
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// =============================================================================
// Jobs
// =============================================================================

/// Runs one reconciliation cycle per tick
pub struct SyncJob {
    reconciler: Arc<Reconciler>,
}

impl SyncJob {
    pub fn new(reconciler: Arc<Reconciler>) -> Self {
        Self { reconciler }
    }
}

#[async_trait]
impl Job for SyncJob {
    fn name(&self) -> &'static str {
        "sync"
    }

    async fn run(&self) -> Result<()> {
        self.reconciler.reconcile().await.into_result().map(|_| ())
    }
}

/// Removes prayer times that fell out of the retention window
pub struct BroomJob {
    db: Arc<Database>,
    cache: Arc<QueryCache>,
    effect: Days,
}

impl BroomJob {
    pub fn new(db: Arc<Database>, cache: Arc<QueryCache>, effect_days: u32) -> Self {
        Self {
            db,
            cache,
            effect: Days::new(u64::from(effect_days)),
        }
    }

    /// Delete rows dated before `today - effect`; rows on the boundary stay
    pub async fn sweep_at(&self, today: NaiveDate) -> Result<u64> {
        let cutoff = today.checked_sub_days(self.effect).ok_or_else(|| {
            Errors::invalid_input(format!("retention window reaches before {today}"))
        })?;

        let removed = self.db.delete_prayer_times_before(cutoff).await?;
        SWEPT_ROWS_TOTAL
            .with_label_values(&[EntityKind::PrayerTime.as_str()])
            .inc_by(removed);
        if removed > 0 {
            self.cache.invalidate(EntityKind::PrayerTime);
        }
        self.cache.run_pending_tasks().await;

        tracing::info!(%cutoff, removed, "Swept expired prayer times");
        Ok(removed)
    }
}

#[async_trait]
impl Job for BroomJob {
    fn name(&self) -> &'static str {
        "broom"
    }

    async fn run(&self) -> Result<()> {
        self.sweep_at(Utc::now().date_naive()).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    /// Job that blocks until released
    struct GatedJob {
        gate: Arc<Notify>,
        runs: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl Job for GatedJob {
        fn name(&self) -> &'static str {
            "gated"
        }

        async fn run(&self) -> Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            self.gate.notified().await;
            if self.fail {
                Err(Errors::request_failed("provider down"))
            } else {
                Ok(())
            }
        }
    }

    /// Job that takes a fixed amount of (virtual) time
    struct SlowJob {
        runs: Arc<AtomicUsize>,
        takes: Duration,
    }

    #[async_trait]
    impl Job for SlowJob {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn run(&self) -> Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.takes).await;
            Ok(())
        }
    }

    struct PanickingJob;

    #[async_trait]
    impl Job for PanickingJob {
        fn name(&self) -> &'static str {
            "panicking"
        }

        async fn run(&self) -> Result<()> {
            panic!("parser invariant broken");
        }
    }

    fn gated(fail: bool) -> (ScheduledJob, Arc<Notify>, Arc<AtomicUsize>) {
        let gate = Arc::new(Notify::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let job = ScheduledJob::new(Arc::new(GatedJob {
            gate: gate.clone(),
            runs: runs.clone(),
            fail,
        }));
        (job, gate, runs)
    }

    #[tokio::test]
    async fn test_second_trigger_while_running_is_skipped() {
        let (job, gate, runs) = gated(false);

        let Trigger::Started(handle) = job.trigger() else {
            panic!("first trigger must start");
        };
        assert_eq!(job.state(), JobState::Running);

        assert!(matches!(job.trigger(), Trigger::Skipped));
        assert_eq!(job.state(), JobState::Running);

        gate.notify_one();
        handle.await.unwrap();
        assert_eq!(job.state(), JobState::Idle);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        assert!(job.trigger().is_started());
        gate.notify_one();
    }

    #[tokio::test]
    async fn test_failure_returns_to_idle() {
        let (job, gate, _runs) = gated(true);

        let Trigger::Started(handle) = job.trigger() else {
            panic!("first trigger must start");
        };
        gate.notify_one();
        handle.await.unwrap();

        assert_eq!(job.state(), JobState::Idle);
        assert!(job.trigger().is_started(), "failed is never terminal");
        gate.notify_one();
    }

    #[tokio::test]
    async fn test_panic_is_counted_as_failure() {
        let job = ScheduledJob::new(Arc::new(PanickingJob));
        let failures = JOB_RUNS_TOTAL.with_label_values(&["panicking", "failure"]);
        let before = failures.get();

        let Trigger::Started(handle) = job.trigger() else {
            panic!("first trigger must start");
        };
        handle.await.expect("panic is caught inside the job task");

        assert_eq!(failures.get(), before + 1);
        assert_eq!(job.state(), JobState::Idle);
        assert!(job.trigger().is_started());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_honors_delay_and_interval() {
        let runs = Arc::new(AtomicUsize::new(0));
        let job = ScheduledJob::new(Arc::new(SlowJob {
            runs: runs.clone(),
            takes: Duration::from_millis(1),
        }));

        let mut scheduler = Scheduler::new();
        scheduler.schedule(&job, Duration::from_secs(5), Duration::from_secs(10));

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(22)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);

        scheduler.shutdown();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_ticks_are_dropped() {
        let runs = Arc::new(AtomicUsize::new(0));
        let job = ScheduledJob::new(Arc::new(SlowJob {
            runs: runs.clone(),
            takes: Duration::from_secs(15),
        }));

        let mut scheduler = Scheduler::new();
        scheduler.schedule(&job, Duration::ZERO, Duration::from_secs(10));

        // ticks at 0 (runs until 15), 10 (dropped), 20 (runs), 30 (dropped)
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(job.state(), JobState::Running);
    }
}
