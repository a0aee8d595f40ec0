use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

use fleet_tracker_rs::api::{self, AppState};
use fleet_tracker_rs::battery_anomaly::BatteryConfig;
use fleet_tracker_rs::cache::LocalCache;
use fleet_tracker_rs::notify::{AlertDispatcher, LogDispatcher, WebhookDispatcher};
use fleet_tracker_rs::pipeline::{DetectorConfig, IngestPipeline};
use fleet_tracker_rs::remote_log::{HttpRemoteLog, InMemoryRemoteLog, RemoteLog};
use fleet_tracker_rs::route_history::RouteCompactor;
use fleet_tracker_rs::triggers::TriggerStore;

#[derive(Parser, Debug)]
#[command(name = "fleet_tracker")]
#[command(about = "Fleet telemetry anomaly detection and retention engine", long_about = None)]
struct Args {
    /// HTTP listen port
    #[arg(long, default_value = "3000")]
    port: u16,

    /// Data directory for the local cache and trigger state
    #[arg(long, default_value = "fleet_tracker_data")]
    data_dir: PathBuf,

    /// Local cache retention window in days
    #[arg(long, default_value = "3")]
    retention_days: i64,

    /// Off-route distance threshold in kilometers
    #[arg(long, default_value = "10.0")]
    distance_threshold_km: f64,

    /// Minimum history size before battery anomaly detection engages
    #[arg(long, default_value = "30")]
    battery_min_samples: usize,

    /// Acceptance band half-width in standard deviations
    #[arg(long, default_value = "0.5")]
    battery_band_sigma: f64,

    /// Alert cooldown per device per kind, in hours
    #[arg(long, default_value = "12")]
    cooldown_hours: i64,

    /// Route-history ring buffer capacity
    #[arg(long, default_value = "288")]
    route_capacity: usize,

    /// Minimum seconds between route-history samples per device
    #[arg(long, default_value = "300")]
    sample_gate_secs: i64,

    /// Base URL of the remote durable log; in-memory when omitted
    #[arg(long)]
    remote_url: Option<String>,

    /// Alert webhook URL; alerts go to the process log when omitted
    #[arg(long)]
    webhook_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    log::info!("Fleet Tracker RS starting");
    log::info!("  Data dir: {}", args.data_dir.display());
    log::info!("  Retention: {} days", args.retention_days);
    log::info!(
        "  Detection: {} km threshold, >{} battery samples, {}h cooldown",
        args.distance_threshold_km,
        args.battery_min_samples,
        args.cooldown_hours
    );

    let cache = Arc::new(LocalCache::new(
        args.data_dir.join("cache"),
        args.retention_days,
    ));
    let triggers = Arc::new(TriggerStore::open(args.data_dir.join("triggers.json"))?);

    let remote: Arc<dyn RemoteLog> = match &args.remote_url {
        Some(url) => {
            log::info!("  Remote log: {}", url);
            Arc::new(HttpRemoteLog::new(url))
        }
        None => {
            log::info!("  Remote log: in-memory");
            Arc::new(InMemoryRemoteLog::new())
        }
    };

    let dispatcher: Arc<dyn AlertDispatcher> = match &args.webhook_url {
        Some(url) => {
            log::info!("  Alerts: webhook {}", url);
            Arc::new(WebhookDispatcher::new(url))
        }
        None => {
            log::info!("  Alerts: process log");
            Arc::new(LogDispatcher)
        }
    };

    let config = DetectorConfig {
        distance_threshold_km: args.distance_threshold_km,
        battery: BatteryConfig {
            min_samples: args.battery_min_samples,
            band_sigma: args.battery_band_sigma,
        },
        cooldown_hours: args.cooldown_hours,
    };

    let compactor = RouteCompactor::new(remote.clone(), args.route_capacity, args.sample_gate_secs);
    let pipeline = Arc::new(IngestPipeline::new(
        cache.clone(),
        compactor,
        triggers,
        remote,
        dispatcher,
        config,
    ));

    let app = api::router(AppState { pipeline, cache });
    let addr = format!("0.0.0.0:{}", args.port);
    log::info!("Listening on http://{}", addr);

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
