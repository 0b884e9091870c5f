//! Priceverse API server
//!
//! Composition root: wires the store, Redis surfaces, fiat source,
//! aggregators, collectors, and schedules, hands their lifecycles to the
//! supervisor, and serves the RPC surface.

mod routes;
mod services;
mod workers;

use axum::{
    http::{header, Method},
    Router,
};
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use priceverse_core::{AppConfig, Pair, Venue};
use priceverse_services::{
    AlertManager, AlertScanInputs, AlertSink, CandleRepo, CbrRateSource, Database, HealthProbe,
    LogSink, OhlcvAggregator, PriceBroadcaster, PriceBus, PriceHistoryRepo, RateLimiter,
    RedisPriceBus, RedisRateLimitStore, RedisVenueLog, RetentionSweeper, Schedule, Scheduler,
    StreamAggregator, StreamAggregatorConfig, Supervisor, TradeBuffer, VenueLog, VenueLogSink,
    WebhookSink,
};
use priceverse_venues::{adapter_for, Collector, CollectorConfig};

use services::{ChartsService, HealthService, PricesService};
use workers::{CollectorWorker, FiatWorker, SchedulerWorker, StreamAggregatorWorker};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub prices_service: Arc<PricesService>,
    pub charts_service: Arc<ChartsService>,
    pub health_service: Arc<HealthService>,
    pub probe: Arc<HealthProbe>,
    pub broadcaster: Arc<PriceBroadcaster>,
    pub limiter: Option<Arc<RateLimiter>>,
    pub streaming: priceverse_core::config::StreamingConfig,
    /// Flips to true on shutdown; open streams abort on it
    pub shutdown: watch::Receiver<bool>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,priceverse=debug")),
        )
        .init();

    info!("Starting Priceverse");

    let config_path = std::env::var("PRICEVERSE_CONFIG").ok();
    let config = AppConfig::load(config_path.as_deref().or(Some("config/priceverse")))?;

    // Storage
    let db = Database::open(&config.database.database)?;
    let prices = Arc::new(PriceHistoryRepo::new(db.clone()));
    let candles = Arc::new(CandleRepo::new(db.clone()));
    info!("Database ready at {}", config.database.database);

    // Redis surfaces: venue log, price cache/pub-sub, rate-limit store
    let redis_url = config.redis.url();
    let venue_log: Arc<dyn VenueLog> = Arc::new(RedisVenueLog::connect(&redis_url).await?);
    let bus: Arc<dyn PriceBus> = Arc::new(RedisPriceBus::connect(&redis_url).await?);
    info!("Redis ready at {}:{}", config.redis.host, config.redis.port);

    let limiter = if config.api.rate_limit.enabled {
        let store = Arc::new(RedisRateLimitStore::connect(&redis_url).await?);
        Some(Arc::new(RateLimiter::new(
            store,
            config.api.rate_limit.max_requests,
            Duration::from_millis(config.api.rate_limit.window_ms),
        )))
    } else {
        None
    };

    // Fiat rate source
    let fiat = Arc::new(CbrRateSource::new(config.cbr.clone()));

    // Stream aggregator
    let pairs = parse_pairs(&config.aggregation.pairs);
    let venues = parse_venues(&config.exchanges.enabled);
    let buffer = Arc::new(TradeBuffer::new());
    let broadcaster = Arc::new(PriceBroadcaster::new(config.api.streaming.max_queue_size));
    let aggregator = Arc::new(StreamAggregator::new(
        StreamAggregatorConfig {
            tick_interval: Duration::from_millis(config.aggregation.interval_ms),
            window: Duration::from_millis(config.aggregation.window_size_ms),
            pairs,
            venues: venues.clone(),
            max_consecutive_errors: config.aggregation.max_consecutive_errors,
            price_cache_ttl: Duration::from_secs(config.api.cache.price_ttl_secs),
        },
        venue_log.clone(),
        buffer,
        prices.clone(),
        fiat.clone(),
        bus.clone(),
        broadcaster.clone(),
    ));

    // Collectors for the enabled venues
    let sink = Arc::new(VenueLogSink::new(venue_log.clone()));
    let collectors: Vec<(Venue, Arc<Collector>)> = venues
        .iter()
        .map(|venue| {
            let collector = Arc::new(Collector::new(
                adapter_for(*venue),
                sink.clone(),
                CollectorConfig::default(),
            ));
            (*venue, collector)
        })
        .collect();

    // OHLCV roll-up, retention, alerts on the schedule registry
    let ohlcv = Arc::new(OhlcvAggregator::new(prices.clone(), candles.clone()));
    let sweeper = Arc::new(RetentionSweeper::new(
        config.retention.clone(),
        prices.clone(),
        candles.clone(),
    ));
    let alert_sink: Box<dyn AlertSink> = match &config.alerts.webhook_url {
        Some(url) => Box::new(WebhookSink::new(url)),
        None => Box::new(LogSink),
    };
    let alert_manager = Arc::new(AlertManager::new(
        config.alerts.clone(),
        alert_sink,
        std::env::var("PRICEVERSE_ENV").unwrap_or_else(|_| "development".to_string()),
    ));

    let scheduler = Arc::new(Scheduler::new());
    register_schedules(
        &scheduler,
        &config,
        ohlcv,
        sweeper,
        alert_manager,
        &collectors,
        aggregator.clone(),
        fiat.clone(),
    )?;

    // Health probe
    let probe = Arc::new(HealthProbe::new(Some(db.clone()), Some(bus.clone())));
    for (venue, collector) in &collectors {
        let collector = Arc::clone(collector);
        probe.register(&format!("collector-{venue}"), move || collector.health());
    }
    {
        let aggregator = aggregator.clone();
        probe.register("stream-aggregator", move || aggregator.health());
    }
    {
        let fiat = fiat.clone();
        probe.register("fiat-rate", move || fiat.health());
    }

    // Supervisor: start order fiat -> aggregators -> collectors; stop order
    // ohlcv -> stream aggregator -> collectors -> fiat, transports last
    let mut supervisor = Supervisor::new();
    supervisor.register(Arc::new(FiatWorker { source: fiat }));
    supervisor.register(Arc::new(StreamAggregatorWorker {
        aggregator: aggregator.clone(),
    }));
    supervisor.register(Arc::new(SchedulerWorker {
        scheduler: scheduler.clone(),
    }));
    for (venue, collector) in &collectors {
        supervisor.register(Arc::new(CollectorWorker::new(*venue, collector.clone())));
    }
    let mut stop_order: Vec<String> =
        vec!["ohlcv-scheduler".to_string(), "stream-aggregator".to_string()];
    stop_order.extend(collectors.iter().map(|(v, _)| format!("collector-{v}")));
    stop_order.push("fiat-rate".to_string());
    supervisor.set_stop_order(&stop_order.iter().map(|s| s.as_str()).collect::<Vec<_>>());

    supervisor.start_all().await?;
    let supervisor = Arc::new(supervisor);

    // RPC surface
    let (stream_shutdown_tx, stream_shutdown_rx) = watch::channel(false);
    let state = AppState {
        prices_service: Arc::new(PricesService::new(
            prices,
            bus,
            Duration::from_secs(config.api.cache.stale_after_secs),
        )),
        charts_service: Arc::new(ChartsService::new(candles)),
        health_service: Arc::new(HealthService::new(probe.clone())),
        probe,
        broadcaster,
        limiter,
        streaming: config.api.streaming.clone(),
        shutdown: stream_shutdown_rx,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    let app = Router::new()
        .merge(routes::api_routes())
        .merge(routes::ws_routes())
        .layer(cors)
        .with_state(state);

    let addr = SocketAddr::new(config.app.host.parse()?, config.app.port);
    info!("Server listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Streams abort first, then workers stop, then the transport goes down
    let shutdown_supervisor = supervisor.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("shutdown signal error: {}", e);
            }
            info!("Shutdown requested");
            stream_shutdown_tx.send_replace(true);
            shutdown_supervisor.stop_all().await;
        })
        .await?;

    info!("Priceverse stopped");
    Ok(())
}

fn parse_pairs(raw: &[String]) -> Vec<Pair> {
    let mut pairs = Vec::new();
    for text in raw {
        match Pair::from_str(text) {
            Ok(pair) if pair.is_base() => pairs.push(pair),
            Ok(pair) => warn!("ignoring non-base pair in aggregation config: {pair}"),
            Err(_) => warn!("ignoring unknown pair in aggregation config: {text}"),
        }
    }
    if pairs.is_empty() {
        pairs = Pair::base_pairs().to_vec();
    }
    pairs
}

fn parse_venues(raw: &[String]) -> Vec<Venue> {
    let mut venues = Vec::new();
    for text in raw {
        match Venue::from_str(text) {
            Ok(venue) => venues.push(venue),
            Err(_) => warn!("ignoring unknown venue in exchanges config: {text}"),
        }
    }
    if venues.is_empty() {
        venues = Venue::all().to_vec();
    }
    venues
}

#[allow(clippy::too_many_arguments)]
fn register_schedules(
    scheduler: &Scheduler,
    config: &AppConfig,
    ohlcv: Arc<OhlcvAggregator>,
    sweeper: Arc<RetentionSweeper>,
    alert_manager: Arc<AlertManager>,
    collectors: &[(Venue, Arc<Collector>)],
    aggregator: Arc<StreamAggregator>,
    fiat: Arc<CbrRateSource>,
) -> anyhow::Result<()> {
    use priceverse_core::Resolution;

    for (name, cron, resolution) in [
        ("candles-5min", "*/5 * * * *", Resolution::FiveMin),
        ("candles-1hour", "0 * * * *", Resolution::OneHour),
        ("candles-1day", "0 0 * * *", Resolution::OneDay),
    ] {
        let ohlcv = ohlcv.clone();
        scheduler.register(name, Schedule::cron(cron)?, move || {
            let ohlcv = ohlcv.clone();
            Box::pin(async move {
                ohlcv.run_resolution(resolution, chrono::Utc::now()).await;
            })
        })?;
    }

    if config.retention.enabled {
        let schedule = Schedule::cron(&config.retention.cleanup_schedule)?;
        scheduler.register("retention-sweep", schedule, move || {
            let sweeper = sweeper.clone();
            Box::pin(async move {
                sweeper.sweep(chrono::Utc::now());
            })
        })?;
    }

    if config.alerts.enabled {
        let collectors: Vec<Arc<Collector>> =
            collectors.iter().map(|(_, c)| c.clone()).collect();
        scheduler.register(
            "alert-scan",
            Schedule::Every(Duration::from_secs(30)),
            move || {
                let manager = alert_manager.clone();
                let collectors = collectors.clone();
                let aggregator = aggregator.clone();
                let fiat = fiat.clone();
                Box::pin(async move {
                    let inputs = AlertScanInputs {
                        collectors: collectors.iter().map(|c| c.stats()).collect(),
                        aggregator_consecutive_errors: aggregator.stats().consecutive_errors,
                        fiat_status: Some(fiat.health().status),
                    };
                    manager.scan(&inputs).await;
                })
            },
        )?;
    }

    Ok(())
}
