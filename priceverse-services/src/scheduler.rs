//! Schedule registry
//!
//! Jobs are keyed by a stable name; registering the same name twice fails
//! fast. A job runs either on a fixed interval or on a cron expression
//! (5-field subset: minute and hour accept `*`, `*/n`, and literals; the
//! remaining fields must be `*`). Cron times are evaluated in UTC. Every
//! job loop honors the shutdown signal.

use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use priceverse_core::{CoreError, CoreResult};

pub type JobFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type JobFn = Arc<dyn Fn() -> JobFuture + Send + Sync>;

/// When a job fires
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    Every(Duration),
    Cron(CronSpec),
}

impl Schedule {
    /// Parse a 5-field cron string into the supported subset
    pub fn cron(expr: &str) -> CoreResult<Schedule> {
        CronSpec::parse(expr).map(Schedule::Cron)
    }
}

/// Supported cron subset: minute and hour fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSpec {
    minute: CronField,
    hour: CronField,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum CronField {
    Any,
    Step(u32),
    Literal(u32),
}

impl CronField {
    fn parse(text: &str, max: u32) -> CoreResult<Self> {
        if text == "*" {
            return Ok(CronField::Any);
        }
        if let Some(step) = text.strip_prefix("*/") {
            let step: u32 = step
                .parse()
                .map_err(|_| CoreError::invalid_params(format!("bad cron step: {text}")))?;
            if step == 0 || step > max {
                return Err(CoreError::invalid_params(format!("bad cron step: {text}")));
            }
            return Ok(CronField::Step(step));
        }
        let literal: u32 = text
            .parse()
            .map_err(|_| CoreError::invalid_params(format!("bad cron field: {text}")))?;
        if literal > max {
            return Err(CoreError::invalid_params(format!(
                "cron field out of range: {text}"
            )));
        }
        Ok(CronField::Literal(literal))
    }

    fn matches(&self, value: u32) -> bool {
        match self {
            CronField::Any => true,
            CronField::Step(step) => value % step == 0,
            CronField::Literal(literal) => value == *literal,
        }
    }
}

impl CronSpec {
    pub fn parse(expr: &str) -> CoreResult<Self> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CoreError::invalid_params(format!(
                "cron expression must have 5 fields: {expr}"
            )));
        }
        for tail in &fields[2..] {
            if *tail != "*" {
                return Err(CoreError::invalid_params(format!(
                    "unsupported cron field (only minute/hour schedules): {tail}"
                )));
            }
        }
        Ok(Self {
            minute: CronField::parse(fields[0], 59)?,
            hour: CronField::parse(fields[1], 23)?,
        })
    }

    /// Next matching minute strictly after `after`
    pub fn next_fire(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        let mut candidate = (after + ChronoDuration::minutes(1))
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(after);
        // Bounded walk; the subset always matches within 24h
        for _ in 0..(24 * 60 + 1) {
            if self.minute.matches(candidate.minute()) && self.hour.matches(candidate.hour()) {
                return candidate;
            }
            candidate += ChronoDuration::minutes(1);
        }
        candidate
    }
}

struct Job {
    schedule: Schedule,
    run: JobFn,
}

/// Named-job scheduler with fail-fast duplicate registration
pub struct Scheduler {
    jobs: parking_lot::Mutex<HashMap<String, Job>>,
    shutdown_tx: watch::Sender<bool>,
    handles: tokio::sync::Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            jobs: parking_lot::Mutex::new(HashMap::new()),
            shutdown_tx,
            handles: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    /// Register a job; a duplicate name is an error
    pub fn register<F>(&self, name: &str, schedule: Schedule, job: F) -> CoreResult<()>
    where
        F: Fn() -> JobFuture + Send + Sync + 'static,
    {
        let mut jobs = self.jobs.lock();
        if jobs.contains_key(name) {
            return Err(CoreError::invalid_params(format!(
                "duplicate schedule registration: {name}"
            )));
        }
        jobs.insert(
            name.to_string(),
            Job {
                schedule,
                run: Arc::new(job),
            },
        );
        Ok(())
    }

    pub fn job_names(&self) -> Vec<String> {
        self.jobs.lock().keys().cloned().collect()
    }

    /// Spawn one task per registered job
    pub async fn start(&self) {
        self.shutdown_tx.send_replace(false);
        let jobs: Vec<(String, Schedule, JobFn)> = self
            .jobs
            .lock()
            .iter()
            .map(|(name, job)| (name.clone(), job.schedule.clone(), Arc::clone(&job.run)))
            .collect();

        let mut handles = self.handles.lock().await;
        for (name, schedule, run) in jobs {
            let mut shutdown_rx = self.shutdown_tx.subscribe();
            handles.push(tokio::spawn(async move {
                info!("[Scheduler] job '{}' started ({:?})", name, schedule);
                match schedule {
                    Schedule::Every(period) => {
                        let mut ticker = tokio::time::interval(period);
                        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                        ticker.tick().await;
                        loop {
                            tokio::select! {
                                _ = ticker.tick() => run().await,
                                _ = shutdown_rx.changed() => {
                                    if *shutdown_rx.borrow() {
                                        break;
                                    }
                                }
                            }
                        }
                    }
                    Schedule::Cron(spec) => loop {
                        let now = Utc::now();
                        let next = spec.next_fire(now);
                        let wait = (next - now)
                            .to_std()
                            .unwrap_or(Duration::from_secs(1));
                        tokio::select! {
                            _ = tokio::time::sleep(wait) => run().await,
                            _ = shutdown_rx.changed() => {
                                if *shutdown_rx.borrow() {
                                    break;
                                }
                            }
                        }
                    },
                }
                info!("[Scheduler] job '{}' stopped", name);
            }));
        }
    }

    pub async fn stop(&self) {
        self.shutdown_tx.send_replace(true);
        let mut handles = self.handles.lock().await;
        for task in handles.drain(..) {
            if let Err(e) = task.await {
                warn!("[Scheduler] job join error: {}", e);
            }
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_daily_at_three() {
        let spec = CronSpec::parse("0 3 * * *").unwrap();
        let after = Utc.with_ymd_and_hms(2024, 6, 15, 1, 30, 0).unwrap();
        assert_eq!(
            spec.next_fire(after),
            Utc.with_ymd_and_hms(2024, 6, 15, 3, 0, 0).unwrap()
        );

        let past_three = Utc.with_ymd_and_hms(2024, 6, 15, 3, 0, 0).unwrap();
        assert_eq!(
            spec.next_fire(past_three),
            Utc.with_ymd_and_hms(2024, 6, 16, 3, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_parse_every_five_minutes() {
        let spec = CronSpec::parse("*/5 * * * *").unwrap();
        let after = Utc.with_ymd_and_hms(2024, 6, 15, 12, 2, 10).unwrap();
        assert_eq!(
            spec.next_fire(after),
            Utc.with_ymd_and_hms(2024, 6, 15, 12, 5, 0).unwrap()
        );
        // A firing boundary schedules the next block, not itself
        let boundary = Utc.with_ymd_and_hms(2024, 6, 15, 12, 5, 0).unwrap();
        assert_eq!(
            spec.next_fire(boundary),
            Utc.with_ymd_and_hms(2024, 6, 15, 12, 10, 0).unwrap()
        );
    }

    #[test]
    fn test_parse_top_of_hour_and_midnight() {
        let hourly = CronSpec::parse("0 * * * *").unwrap();
        let after = Utc.with_ymd_and_hms(2024, 6, 15, 12, 30, 0).unwrap();
        assert_eq!(
            hourly.next_fire(after),
            Utc.with_ymd_and_hms(2024, 6, 15, 13, 0, 0).unwrap()
        );

        let midnight = CronSpec::parse("0 0 * * *").unwrap();
        assert_eq!(
            midnight.next_fire(after),
            Utc.with_ymd_and_hms(2024, 6, 16, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_unsupported_fields_rejected() {
        assert!(CronSpec::parse("0 3 1 * *").is_err());
        assert!(CronSpec::parse("0 3 * * 1").is_err());
        assert!(CronSpec::parse("not a cron").is_err());
        assert!(CronSpec::parse("61 * * * *").is_err());
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let scheduler = Scheduler::new();
        scheduler
            .register("sweep", Schedule::Every(Duration::from_secs(60)), || {
                Box::pin(async {})
            })
            .unwrap();
        let err = scheduler
            .register("sweep", Schedule::Every(Duration::from_secs(30)), || {
                Box::pin(async {})
            })
            .unwrap_err();
        assert!(err.message.contains("duplicate"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_job_fires() {
        let counter = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let scheduler = Scheduler::new();
        let job_counter = Arc::clone(&counter);
        scheduler
            .register("tick", Schedule::Every(Duration::from_secs(5)), move || {
                let counter = Arc::clone(&job_counter);
                Box::pin(async move {
                    counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                })
            })
            .unwrap();
        scheduler.start().await;

        tokio::time::sleep(Duration::from_secs(16)).await;
        scheduler.stop().await;
        assert!(counter.load(std::sync::atomic::Ordering::SeqCst) >= 3);
    }
}
