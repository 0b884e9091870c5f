//! Lifecycle adapters for the supervisor

use async_trait::async_trait;
use std::sync::Arc;

use priceverse_core::{CoreError, CoreResult};
use priceverse_services::{CbrRateSource, Lifecycle, Scheduler, StreamAggregator};
use priceverse_venues::Collector;

pub struct FiatWorker {
    pub source: Arc<CbrRateSource>,
}

#[async_trait]
impl Lifecycle for FiatWorker {
    fn name(&self) -> &str {
        "fiat-rate"
    }

    async fn start(&self) -> CoreResult<()> {
        self.source.clone().start().await;
        Ok(())
    }

    async fn stop(&self) {
        self.source.stop().await;
    }
}

pub struct StreamAggregatorWorker {
    pub aggregator: Arc<StreamAggregator>,
}

#[async_trait]
impl Lifecycle for StreamAggregatorWorker {
    fn name(&self) -> &str {
        "stream-aggregator"
    }

    async fn start(&self) -> CoreResult<()> {
        self.aggregator.clone().start().await
    }

    async fn stop(&self) {
        self.aggregator.stop().await;
    }
}

/// Owns the wall-clock jobs: OHLCV roll-ups, retention, alert scan
pub struct SchedulerWorker {
    pub scheduler: Arc<Scheduler>,
}

#[async_trait]
impl Lifecycle for SchedulerWorker {
    fn name(&self) -> &str {
        "ohlcv-scheduler"
    }

    async fn start(&self) -> CoreResult<()> {
        self.scheduler.start().await;
        Ok(())
    }

    async fn stop(&self) {
        self.scheduler.stop().await;
    }
}

pub struct CollectorWorker {
    pub name: String,
    pub collector: Arc<Collector>,
}

impl CollectorWorker {
    pub fn new(venue: priceverse_core::Venue, collector: Arc<Collector>) -> Self {
        Self {
            name: format!("collector-{venue}"),
            collector,
        }
    }
}

#[async_trait]
impl Lifecycle for CollectorWorker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self) -> CoreResult<()> {
        self.collector
            .start()
            .await
            .map_err(|e| CoreError::internal(format!("{}: {e}", self.name)))
    }

    async fn stop(&self) {
        self.collector.stop().await;
    }
}
