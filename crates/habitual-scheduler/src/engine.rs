//! Minute ticker and the engine that drives the jobs.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, DurationRound, Utc};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use habitual_push::PushGateway;
use habitual_store::ReminderStore;

use crate::jobs::{ChallengeReminderJob, DailyLogJob, Job, JobReport, KindBroadcastJob, Tick};
use crate::{LocalTime, SchedulerError, TimezoneCatalog};

/// Default local time of the per-kind morning broadcast.
pub const DEFAULT_BROADCAST_TIME: LocalTime = LocalTime::from_parts(6, 30);

/// Default local time of the daily log reminder.
pub const DEFAULT_DAILY_LOG_TIME: LocalTime = LocalTime::from_parts(20, 0);

/// Default cap on concurrent push requests per job run.
pub const DEFAULT_MAX_CONCURRENT_SENDS: usize = 16;

/// Default number of missed minutes replayed after falling behind.
pub const DEFAULT_MAX_REPLAY_MINUTES: u32 = 5;

/// Buffered ticks per job before a slow job starts lagging.
const TICK_CHANNEL_CAPACITY: usize = 64;

/// Dispatch engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Local time of the per-kind topic broadcast.
    pub broadcast_time: LocalTime,
    /// Local time of the daily log reminder.
    pub daily_log_time: LocalTime,
    /// Minute of each hour at which challenge reminders are evaluated.
    pub reminder_minute: u32,
    /// Cap on concurrent push requests per job run.
    pub max_concurrent_sends: usize,
    /// How many missed minutes the ticker replays after falling behind.
    pub max_replay_minutes: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            broadcast_time: DEFAULT_BROADCAST_TIME,
            daily_log_time: DEFAULT_DAILY_LOG_TIME,
            reminder_minute: 0,
            max_concurrent_sends: DEFAULT_MAX_CONCURRENT_SENDS,
            max_replay_minutes: DEFAULT_MAX_REPLAY_MINUTES,
        }
    }
}

/// `now` truncated to the start of its minute.
pub fn floor_minute(now: DateTime<Utc>) -> DateTime<Utc> {
    now.duration_trunc(chrono::Duration::minutes(1))
        .unwrap_or(now)
}

/// Start of the minute after `now`.
pub fn next_minute_boundary(now: DateTime<Utc>) -> DateTime<Utc> {
    floor_minute(now) + chrono::Duration::minutes(1)
}

/// Ticks to emit at `now` given the last emitted minute.
///
/// The current minute is always included unless already emitted. Missed
/// minutes in between are replayed oldest first, at most `max_replay` of
/// them; the second value counts the older ones that were dropped.
pub fn due_ticks(
    last: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    max_replay: u32,
) -> (Vec<Tick>, u64) {
    let current = floor_minute(now);
    let Some(last) = last else {
        return (vec![Tick { at: current }], 0);
    };
    if current <= last {
        return (Vec::new(), 0);
    }

    let missed = ((current - last).num_minutes() - 1).max(0) as u64;
    let replayed = missed.min(u64::from(max_replay));
    let dropped = missed - replayed;

    let ticks = (0..=replayed)
        .rev()
        .map(|back| Tick {
            at: current - chrono::Duration::minutes(back as i64),
        })
        .collect();
    (ticks, dropped)
}

/// Emits one tick per wall-clock minute on a broadcast channel.
pub struct Ticker {
    sender: broadcast::Sender<Tick>,
    max_replay_minutes: u32,
}

impl Ticker {
    pub fn new(max_replay_minutes: u32) -> Self {
        let (sender, _) = broadcast::channel(TICK_CHANNEL_CAPACITY);
        Self {
            sender,
            max_replay_minutes,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Tick> {
        self.sender.subscribe()
    }

    /// Tick until shutdown. Dropping the ticker closes every receiver.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut last: Option<DateTime<Utc>> = None;

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let now = Utc::now();
            let wait = (next_minute_boundary(now) - now)
                .to_std()
                .unwrap_or(Duration::ZERO);

            tokio::select! {
                biased;
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                    continue;
                }
                _ = tokio::time::sleep(wait) => {}
            }

            let (ticks, dropped) = due_ticks(last, Utc::now(), self.max_replay_minutes);
            if dropped > 0 {
                warn!(dropped, "ticker fell behind, dropping missed minutes");
            }
            for tick in ticks {
                last = Some(tick.at);
                if self.sender.send(tick).is_err() {
                    debug!(at = %tick.at, "no tick subscribers");
                }
            }
        }

        info!("ticker stopped");
    }
}

/// Runs a set of jobs, each in its own task, against a shared minute ticker.
pub struct DispatchEngine {
    jobs: Vec<Arc<dyn Job>>,
    max_replay_minutes: u32,
}

impl DispatchEngine {
    pub fn new(max_replay_minutes: u32) -> Self {
        Self {
            jobs: Vec::new(),
            max_replay_minutes,
        }
    }

    /// The kind broadcast, daily log and challenge reminder jobs.
    pub fn standard(
        config: &DispatchConfig,
        catalog: Arc<TimezoneCatalog>,
        store: Arc<dyn ReminderStore>,
        gateway: Arc<dyn PushGateway>,
    ) -> Self {
        Self::new(config.max_replay_minutes)
            .with_job(KindBroadcastJob::new(
                catalog.clone(),
                gateway.clone(),
                config.broadcast_time,
                config.max_concurrent_sends,
            ))
            .with_job(DailyLogJob::new(
                catalog,
                store.clone(),
                gateway.clone(),
                config.daily_log_time,
                config.max_concurrent_sends,
            ))
            .with_job(ChallengeReminderJob::new(
                store,
                gateway,
                config.reminder_minute,
                config.max_concurrent_sends,
            ))
    }

    pub fn with_job(mut self, job: impl Job + 'static) -> Self {
        self.jobs.push(Arc::new(job));
        self
    }

    pub fn job_names(&self) -> Vec<&'static str> {
        self.jobs.iter().map(|j| j.name()).collect()
    }

    /// Run every job once for `tick`, in order.
    pub async fn run_tick(&self, tick: Tick) -> Vec<(&'static str, Result<JobReport, SchedulerError>)> {
        let mut results = Vec::with_capacity(self.jobs.len());
        for job in &self.jobs {
            results.push((job.name(), job.run(tick).await));
        }
        results
    }

    /// Run until `shutdown_rx` turns true. In-flight job runs finish first.
    pub async fn run(self, shutdown_rx: watch::Receiver<bool>) {
        info!(jobs = ?self.job_names(), "dispatch engine starting");

        let ticker = Ticker::new(self.max_replay_minutes);
        let mut handles = Vec::with_capacity(self.jobs.len());
        for job in self.jobs {
            let ticks = ticker.subscribe();
            let shutdown = shutdown_rx.clone();
            handles.push(tokio::spawn(job_loop(job, ticks, shutdown)));
        }

        ticker.run(shutdown_rx).await;

        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "job task panicked");
            }
        }

        info!("dispatch engine shut down gracefully");
    }
}

async fn job_loop(
    job: Arc<dyn Job>,
    mut ticks: broadcast::Receiver<Tick>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            tick = ticks.recv() => match tick {
                Ok(tick) => execute(job.as_ref(), tick).await,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(job = job.name(), skipped, "job fell behind, skipped ticks");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
    debug!(job = job.name(), "job loop stopped");
}

async fn execute(job: &dyn Job, tick: Tick) {
    match job.run(tick).await {
        Ok(report) if report.targets > 0 || report.skipped > 0 => {
            info!(
                job = job.name(),
                at = %tick.at,
                targets = report.targets,
                delivered = report.delivered,
                failed = report.failed,
                skipped = report.skipped,
                "job run completed"
            );
        }
        Ok(_) => {}
        Err(e) => {
            error!(job = job.name(), at = %tick.at, error = %e, "job run failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, h, m, s).unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = DispatchConfig::default();
        assert_eq!(config.broadcast_time.to_string(), "06:30");
        assert_eq!(config.daily_log_time.to_string(), "20:00");
        assert_eq!(config.reminder_minute, 0);
        assert_eq!(config.max_replay_minutes, 5);
    }

    #[test]
    fn test_minute_boundaries() {
        assert_eq!(floor_minute(at(10, 15, 42)), at(10, 15, 0));
        assert_eq!(next_minute_boundary(at(10, 15, 42)), at(10, 16, 0));
        assert_eq!(next_minute_boundary(at(23, 59, 0)), Utc.with_ymd_and_hms(2026, 1, 16, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_first_tick_is_current_minute() {
        let (ticks, dropped) = due_ticks(None, at(6, 30, 1), 5);
        assert_eq!(ticks, vec![Tick { at: at(6, 30, 0) }]);
        assert_eq!(dropped, 0);
    }

    #[test]
    fn test_same_minute_not_repeated() {
        let (ticks, _) = due_ticks(Some(at(6, 30, 0)), at(6, 30, 59), 5);
        assert!(ticks.is_empty());
    }

    #[test]
    fn test_missed_minutes_replayed_in_order() {
        let (ticks, dropped) = due_ticks(Some(at(6, 27, 0)), at(6, 30, 2), 5);
        let minutes: Vec<_> = ticks.iter().map(|t| t.at).collect();
        assert_eq!(minutes, vec![at(6, 28, 0), at(6, 29, 0), at(6, 30, 0)]);
        assert_eq!(dropped, 0);
    }

    #[test]
    fn test_replay_is_capped() {
        let (ticks, dropped) = due_ticks(Some(at(6, 0, 0)), at(6, 30, 0), 5);
        assert_eq!(ticks.len(), 6);
        assert_eq!(ticks.first().map(|t| t.at), Some(at(6, 25, 0)));
        assert_eq!(ticks.last().map(|t| t.at), Some(at(6, 30, 0)));
        assert_eq!(dropped, 24);
    }

    struct CountingJob;

    #[async_trait]
    impl Job for CountingJob {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn run(&self, _tick: Tick) -> Result<JobReport, SchedulerError> {
            Ok(JobReport {
                targets: 1,
                delivered: 1,
                ..Default::default()
            })
        }
    }

    #[tokio::test]
    async fn test_run_tick_runs_every_job() {
        let engine = DispatchEngine::new(5).with_job(CountingJob).with_job(CountingJob);
        let results = engine.run_tick(Tick { at: at(6, 30, 0) }).await;

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|(name, r)| *name == "counting" && r.is_ok()));
    }

    #[tokio::test]
    async fn test_engine_stops_on_shutdown() {
        let engine = DispatchEngine::new(5).with_job(CountingJob);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(engine.run(shutdown_rx));
        shutdown_tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("engine did not stop")
            .unwrap();
    }
}
