use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use store_monitoring::{
    clock::{Clock, SystemClock},
    config::{Config, StorageConfig, read_config_file},
    monitor::{MonitorEvent, Reconciler, ReconcilerConfig, Scheduler},
    notify::{Notifier, NotifierHandle},
    probe::{StatusProbe, TieredProbe},
    registry::BitableRegistry,
    storage::{MemoryStore, StateStore},
};
use tokio::sync::broadcast;
use tracing::{debug, info, level_filters::LevelFilter, trace};
use tracing_subscriber::{EnvFilter, filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: String,
}

fn init() {
    // RUST_LOG replaces the default targets when set
    let env_filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|directives| directives.parse::<EnvFilter>().ok());
    let targets = env_filter.is_none().then(|| {
        filter::Targets::new().with_targets(vec![
            ("store_monitoring", LevelFilter::DEBUG),
            ("storewatch", LevelFilter::TRACE),
        ])
    });

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(targets)
        .with(env_filter)
        .init();
}

async fn build_store(config: &Config) -> anyhow::Result<Arc<dyn StateStore>> {
    match config.storage.clone().unwrap_or_default() {
        StorageConfig::None => {
            info!("using in-memory state, the first sync rebuilds it");
            Ok(Arc::new(MemoryStore::new()))
        }
        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite { path } => {
            let store = store_monitoring::storage::sqlite::SqliteStore::new(&path)
                .await
                .with_context(|| format!("failed to open {}", path.display()))?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { .. } => anyhow::bail!("built without SQLite support"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = read_config_file(&args.file)?;
    let origin = config.origin();

    let store = build_store(&config).await?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let probe: Arc<dyn StatusProbe> = Arc::new(
        TieredProbe::new(&config.probe, clock.clone()).context("failed to build store probe")?,
    );

    let (event_tx, _) = broadcast::channel::<MonitorEvent>(256);

    let notifier = config.alert.clone().map(|alert| {
        debug!("alerts enabled");
        NotifierHandle::spawn(Notifier::new(alert, origin.clone()), event_tx.subscribe())
    });

    let mut schedulers = Vec::new();
    for monitor in &config.monitors {
        let registry = Arc::new(
            BitableRegistry::new(&config.registry, monitor)
                .with_context(|| format!("failed to build registry client for {}", monitor.class))?,
        );

        let reconciler = Reconciler::new(
            monitor.class,
            registry,
            store.clone(),
            probe.clone(),
            event_tx.clone(),
        )
        .with_config(ReconcilerConfig::from_monitor(monitor, origin.clone()))
        .with_clock(clock.clone());

        let scheduler = Arc::new(
            Scheduler::new(Arc::new(reconciler), monitor.interval())
                .with_run_on_start(monitor.run_on_start),
        );
        scheduler.start();
        schedulers.push(scheduler);
    }

    #[cfg(feature = "api")]
    if let Some(api) = &config.api {
        use store_monitoring::api::{ApiConfig, ApiState, spawn_api_server};

        let state = ApiState::new(schedulers.iter().cloned(), store.clone());
        spawn_api_server(ApiConfig::from(api), state).await?;
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    for scheduler in &schedulers {
        scheduler.shutdown().await;
    }
    if let Some(notifier) = notifier {
        notifier.abort();
    }
    store.close().await?;

    Ok(())
}
