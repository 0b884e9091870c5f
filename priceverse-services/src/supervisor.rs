//! Worker supervision
//!
//! Starts workers in dependency order and stops them in reverse, each stop
//! bounded by a hard cap. A worker whose stop overruns the cap is abandoned
//! and logged as an unclean exit. Worker-isolated processes get up to five
//! restarts per sliding minute before the supervisor gives up on them.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::{error, info, warn};

use priceverse_core::CoreResult;

/// Bounded wait for each worker's stop
const STOP_CAP: Duration = Duration::from_secs(8);

/// Restart budget window
const RESTART_WINDOW: Duration = Duration::from_secs(60);

/// Restarts allowed inside the window
const MAX_RESTARTS_PER_WINDOW: u32 = 5;

/// Anything the supervisor owns the lifecycle of
#[async_trait]
pub trait Lifecycle: Send + Sync {
    fn name(&self) -> &str;
    async fn start(&self) -> CoreResult<()>;
    async fn stop(&self);
}

/// Decision for a worker that just died
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    Restart,
    GiveUp,
}

#[derive(Default)]
struct RestartTracker {
    history: HashMap<String, VecDeque<Instant>>,
    terminally_failed: HashSet<String>,
}

pub struct Supervisor {
    workers: Vec<Arc<dyn Lifecycle>>,
    /// Worker names stopped first, in this order; the rest follow in
    /// reverse registration order
    stop_first: Vec<String>,
    restarts: parking_lot::Mutex<RestartTracker>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self {
            workers: Vec::new(),
            stop_first: Vec::new(),
            restarts: parking_lot::Mutex::new(RestartTracker::default()),
        }
    }

    /// Register a worker; registration order is start order
    pub fn register(&mut self, worker: Arc<dyn Lifecycle>) {
        self.workers.push(worker);
    }

    /// Pin the head of the stop sequence. The pipeline requires the OHLCV
    /// aggregator down before the stream aggregator, and both before the
    /// collectors, which is not the exact reverse of the start order.
    pub fn set_stop_order(&mut self, names: &[&str]) {
        self.stop_first = names.iter().map(|n| n.to_string()).collect();
    }

    pub fn worker_names(&self) -> Vec<String> {
        self.workers.iter().map(|w| w.name().to_string()).collect()
    }

    fn stop_sequence(&self) -> Vec<Arc<dyn Lifecycle>> {
        let mut sequence: Vec<Arc<dyn Lifecycle>> = Vec::with_capacity(self.workers.len());
        for name in &self.stop_first {
            if let Some(worker) = self.workers.iter().find(|w| w.name() == name) {
                sequence.push(Arc::clone(worker));
            }
        }
        for worker in self.workers.iter().rev() {
            if !sequence.iter().any(|w| w.name() == worker.name()) {
                sequence.push(Arc::clone(worker));
            }
        }
        sequence
    }

    /// Start every worker in registration order; the first failure aborts
    /// and the already-started workers are stopped in reverse.
    pub async fn start_all(&self) -> CoreResult<()> {
        for (index, worker) in self.workers.iter().enumerate() {
            info!("[Supervisor] starting {}", worker.name());
            if let Err(e) = worker.start().await {
                error!("[Supervisor] {} failed to start: {}", worker.name(), e);
                for started in self.workers[..index].iter().rev() {
                    Self::stop_one(started.as_ref()).await;
                }
                return Err(e);
            }
        }
        info!("[Supervisor] all {} workers started", self.workers.len());
        Ok(())
    }

    /// Stop workers: the pinned head first, then the rest in reverse
    /// registration order
    pub async fn stop_all(&self) {
        for worker in self.stop_sequence() {
            Self::stop_one(worker.as_ref()).await;
        }
        info!("[Supervisor] shutdown complete");
    }

    async fn stop_one(worker: &dyn Lifecycle) {
        info!("[Supervisor] stopping {}", worker.name());
        if timeout(STOP_CAP, worker.stop()).await.is_err() {
            warn!(
                "[Supervisor] {} did not stop within {:?}, abandoning (unclean exit)",
                worker.name(),
                STOP_CAP
            );
        }
    }

    /// Record a worker failure and decide whether it may restart
    pub fn note_failure(&self, name: &str) -> RestartDecision {
        let mut tracker = self.restarts.lock();
        if tracker.terminally_failed.contains(name) {
            return RestartDecision::GiveUp;
        }

        let now = Instant::now();
        let history = tracker.history.entry(name.to_string()).or_default();
        while let Some(front) = history.front() {
            if now.duration_since(*front) > RESTART_WINDOW {
                history.pop_front();
            } else {
                break;
            }
        }
        history.push_back(now);

        if history.len() as u32 > MAX_RESTARTS_PER_WINDOW {
            error!(
                "[Supervisor] {} exceeded {} restarts per {:?}, giving up",
                name, MAX_RESTARTS_PER_WINDOW, RESTART_WINDOW
            );
            tracker.terminally_failed.insert(name.to_string());
            RestartDecision::GiveUp
        } else {
            RestartDecision::Restart
        }
    }

    pub fn is_terminally_failed(&self, name: &str) -> bool {
        self.restarts.lock().terminally_failed.contains(name)
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct RecordingWorker {
        name: String,
        log: Arc<Mutex<Vec<String>>>,
        stall_stop: bool,
    }

    #[async_trait]
    impl Lifecycle for RecordingWorker {
        fn name(&self) -> &str {
            &self.name
        }

        async fn start(&self) -> CoreResult<()> {
            self.log.lock().push(format!("start:{}", self.name));
            Ok(())
        }

        async fn stop(&self) {
            if self.stall_stop {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            self.log.lock().push(format!("stop:{}", self.name));
        }
    }

    fn worker(name: &str, log: &Arc<Mutex<Vec<String>>>) -> Arc<RecordingWorker> {
        Arc::new(RecordingWorker {
            name: name.to_string(),
            log: Arc::clone(log),
            stall_stop: false,
        })
    }

    #[tokio::test]
    async fn test_pipeline_shutdown_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut supervisor = Supervisor::new();
        for name in [
            "fiat",
            "stream-aggregator",
            "ohlcv-aggregator",
            "collector-binance",
            "collector-kraken",
            "rpc",
        ] {
            supervisor.register(worker(name, &log));
        }
        supervisor.set_stop_order(&["ohlcv-aggregator", "stream-aggregator"]);

        supervisor.start_all().await.unwrap();
        supervisor.stop_all().await;

        let entries = log.lock().clone();
        let position = |entry: &str| entries.iter().position(|e| e == entry).unwrap();

        // Start order follows registration
        assert_eq!(entries[0], "start:fiat");

        // OHLCV stops before the stream aggregator, which stops before any
        // collector; fiat goes after the collectors
        assert!(position("stop:ohlcv-aggregator") < position("stop:stream-aggregator"));
        assert!(position("stop:stream-aggregator") < position("stop:collector-binance"));
        assert!(position("stop:stream-aggregator") < position("stop:collector-kraken"));
        assert!(position("stop:collector-binance") < position("stop:fiat"));
        assert!(position("stop:collector-kraken") < position("stop:fiat"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_stop_is_abandoned() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut supervisor = Supervisor::new();
        supervisor.register(worker("ok", &log));
        supervisor.register(Arc::new(RecordingWorker {
            name: "stuck".to_string(),
            log: Arc::clone(&log),
            stall_stop: true,
        }));

        supervisor.start_all().await.unwrap();
        supervisor.stop_all().await;

        let entries = log.lock().clone();
        // The stuck worker never logged its stop, the rest still stopped
        assert!(entries.contains(&"stop:ok".to_string()));
        assert!(!entries.contains(&"stop:stuck".to_string()));
    }

    #[tokio::test]
    async fn test_restart_window_gives_up() {
        let supervisor = Supervisor::new();
        for _ in 0..MAX_RESTARTS_PER_WINDOW {
            assert_eq!(supervisor.note_failure("worker"), RestartDecision::Restart);
        }
        assert_eq!(supervisor.note_failure("worker"), RestartDecision::GiveUp);
        assert!(supervisor.is_terminally_failed("worker"));
        // Terminal failure is sticky
        assert_eq!(supervisor.note_failure("worker"), RestartDecision::GiveUp);
    }
}
