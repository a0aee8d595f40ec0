use crate::battery_anomaly::{self, BatteryConfig};
use crate::cache::{CacheError, LocalCache};
use crate::notify::AlertDispatcher;
use crate::remote_log::RemoteLog;
use crate::route_deviation::is_on_route;
use crate::route_history::RouteCompactor;
use crate::triggers::TriggerStore;
use crate::types::{AlertKind, Position, Reading};
use chrono::{Duration, Utc};
use std::sync::Arc;

/// Operating parameters for the detection stages.
#[derive(Clone, Copy, Debug)]
pub struct DetectorConfig {
    /// Off-route distance threshold in kilometers.
    pub distance_threshold_km: f64,
    pub battery: BatteryConfig,
    /// Minimum interval between repeat alerts of the same kind for the
    /// same device.
    pub cooldown_hours: i64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        DetectorConfig {
            distance_threshold_km: 10.0,
            battery: BatteryConfig::default(),
            cooldown_hours: 12,
        }
    }
}

/// Orchestrates retention, compaction, detection and debounced alerting for
/// every accepted telemetry reading.
///
/// Straight-line pipeline, no branching back: cache append, route-history
/// compaction, route-deviation check, battery check. Only the cache append
/// decides the ingestion outcome; everything after it is a best-effort side
/// effect whose failure is logged and contained.
pub struct IngestPipeline {
    cache: Arc<LocalCache>,
    compactor: RouteCompactor,
    triggers: Arc<TriggerStore>,
    remote: Arc<dyn RemoteLog>,
    dispatcher: Arc<dyn AlertDispatcher>,
    config: DetectorConfig,
}

impl IngestPipeline {
    pub fn new(
        cache: Arc<LocalCache>,
        compactor: RouteCompactor,
        triggers: Arc<TriggerStore>,
        remote: Arc<dyn RemoteLog>,
        dispatcher: Arc<dyn AlertDispatcher>,
        config: DetectorConfig,
    ) -> Self {
        IngestPipeline {
            cache,
            compactor,
            triggers,
            remote,
            dispatcher,
            config,
        }
    }

    /// Process one accepted reading. The returned result reflects the
    /// storage of the reading itself; detection and alerting never change it.
    pub async fn ingest(&self, device_id: &str, reading: Reading) -> Result<(), CacheError> {
        let latest = reading.clone();

        // 1. Local retention cache: the authoritative store of the reading.
        self.cache.append(device_id, reading).await?;

        // Mirror to the remote durable log; failures stay out of the outcome.
        if let Err(e) = self.remote.append_entry(device_id, &latest).await {
            log::warn!("Remote log append failed for {}: {}", device_id, e);
        }

        // 2. Route-history compaction, gated to one sample per interval.
        if let Err(e) = self
            .compactor
            .maybe_append(device_id, latest.position(), latest.timestamp)
            .await
        {
            log::warn!("Route-history compaction skipped for {}: {}", device_id, e);
        }

        // History for both detectors: cache contents minus the reading we
        // just appended.
        let cached = self.cache.read_all(device_id).await;
        let history = Self::split_history(&cached);

        // 3. Route deviation.
        let positions: Vec<Position> = history.iter().map(|r| r.position()).collect();
        if !is_on_route(&positions, latest.position(), self.config.distance_threshold_km) {
            let message = format!("Truck {} is on a new route.", device_id);
            self.fire(AlertKind::LocationWarning, device_id, &message).await;
        }

        // 4. Battery anomaly.
        let hist_v1: Vec<f64> = history.iter().map(|r| r.battery_v1).collect();
        let hist_v2: Vec<f64> = history.iter().map(|r| r.battery_v2).collect();
        if let Some(report) = battery_anomaly::check(
            latest.battery_v1,
            latest.battery_v2,
            &hist_v1,
            &hist_v2,
            &self.config.battery,
        ) {
            let message = format!(
                "Truck {} has a possible battery fault. The current battery voltages are {}V and {}V.",
                device_id, report.v1, report.v2
            );
            self.fire(AlertKind::BatteryWarning, device_id, &message).await;
        }

        Ok(())
    }

    /// Drop the just-appended reading off the comparison set. The cache may
    /// hold it more than once only if the producer re-sent it, in which case
    /// dropping a single trailing copy is still the right split.
    fn split_history(cached: &[Reading]) -> &[Reading] {
        match cached.len() {
            0 => cached,
            n => &cached[..n - 1],
        }
    }

    /// Consult the debounce store and dispatch at most one alert. A failed
    /// trigger write suppresses the alert: alerting without a recorded
    /// trigger would re-fire on every subsequent reading.
    async fn fire(&self, kind: AlertKind, device_id: &str, message: &str) {
        let cooldown = Duration::hours(self.config.cooldown_hours);
        match self
            .triggers
            .fire_if_due(kind, device_id, Utc::now(), cooldown)
            .await
        {
            Ok(true) => {
                self.dispatcher.notify(device_id, kind, message).await;
            }
            Ok(false) => {
                log::debug!("{} for {} suppressed (cooldown)", kind, device_id);
            }
            Err(e) => {
                log::error!("Trigger store write failed for {}: {}", device_id, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::AlertDispatcher;
    use crate::remote_log::InMemoryRemoteLog;
    use async_trait::async_trait;
    use std::env;
    use std::fs;
    use std::path::PathBuf;
    use tokio::sync::Mutex;

    /// Records every dispatched alert for assertions.
    struct RecordingDispatcher {
        calls: Mutex<Vec<(String, AlertKind, String)>>,
    }

    impl RecordingDispatcher {
        fn new() -> Self {
            RecordingDispatcher {
                calls: Mutex::new(Vec::new()),
            }
        }

        async fn calls(&self) -> Vec<(String, AlertKind, String)> {
            self.calls.lock().await.clone()
        }
    }

    #[async_trait]
    impl AlertDispatcher for RecordingDispatcher {
        async fn notify(&self, device_id: &str, kind: AlertKind, message: &str) {
            self.calls
                .lock()
                .await
                .push((device_id.to_string(), kind, message.to_string()));
        }
    }

    struct Fixture {
        pipeline: IngestPipeline,
        dispatcher: Arc<RecordingDispatcher>,
        remote: Arc<InMemoryRemoteLog>,
        dir: PathBuf,
    }

    fn fixture(name: &str, config: DetectorConfig) -> Fixture {
        let dir = env::temp_dir().join(format!("fleet_pipeline_{}", name));
        let _ = fs::remove_dir_all(&dir);

        let cache = Arc::new(LocalCache::new(dir.join("cache"), 3));
        let triggers = Arc::new(TriggerStore::open(dir.join("triggers.json")).unwrap());
        let remote = Arc::new(InMemoryRemoteLog::new());
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let compactor = RouteCompactor::new(remote.clone(), 288, 300);

        let pipeline = IngestPipeline::new(
            cache,
            compactor,
            triggers,
            remote.clone(),
            dispatcher.clone(),
            config,
        );

        Fixture {
            pipeline,
            dispatcher,
            remote,
            dir,
        }
    }

    fn reading(minutes_ago: i64, v1: f64, v2: f64, lat: f64, lon: f64) -> Reading {
        Reading {
            timestamp: Utc::now() - Duration::minutes(minutes_ago),
            battery_v1: v1,
            battery_v2: v2,
            latitude: lat,
            longitude: lon,
            status: Some("moving".to_string()),
        }
    }

    #[tokio::test]
    async fn test_battery_alert_fires_once_end_to_end() {
        let f = fixture("battery_e2e", DetectorConfig::default());

        // 39 readings with constant voltages, 1 minute apart
        for i in 0..39 {
            f.pipeline
                .ingest("AB123", reading(40 - i, 50.0, 50.0, 0.0, 0.0))
                .await
                .unwrap();
        }
        assert!(f.dispatcher.calls().await.is_empty());

        // 40th reading: 30% below the mean on both rails
        f.pipeline
            .ingest("AB123", reading(1, 35.0, 35.0, 0.0, 0.0))
            .await
            .unwrap();

        let calls = f.dispatcher.calls().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, AlertKind::BatteryWarning);
        assert!(calls[0].2.contains("35V"));

        // 41st reading inside the cooldown: no second alert
        f.pipeline
            .ingest("AB123", reading(0, 50.0, 50.0, 0.0, 0.0))
            .await
            .unwrap();
        assert_eq!(f.dispatcher.calls().await.len(), 1);

        let _ = fs::remove_dir_all(&f.dir);
    }

    #[tokio::test]
    async fn test_first_reading_raises_no_alerts() {
        let f = fixture("fresh_device", DetectorConfig::default());

        f.pipeline
            .ingest("AB123", reading(0, 50.0, 50.0, 51.5, -0.12))
            .await
            .unwrap();

        // Empty history: on-route by policy, battery below sample minimum
        assert!(f.dispatcher.calls().await.is_empty());

        let _ = fs::remove_dir_all(&f.dir);
    }

    #[tokio::test]
    async fn test_off_route_alert_is_debounced() {
        let f = fixture("off_route", DetectorConfig::default());

        // Build a short track around the origin
        for i in 0..3 {
            f.pipeline
                .ingest("AB123", reading(10 - i, 50.0, 50.0, 0.0, 0.001 * i as f64))
                .await
                .unwrap();
        }

        // Jump ~22 km east, twice
        f.pipeline
            .ingest("AB123", reading(1, 50.0, 50.0, 0.0, 0.2))
            .await
            .unwrap();
        f.pipeline
            .ingest("AB123", reading(0, 50.0, 50.0, 0.0, 0.4))
            .await
            .unwrap();

        let calls = f.dispatcher.calls().await;
        assert_eq!(calls.len(), 1, "second off-route event must be debounced");
        assert_eq!(calls[0].1, AlertKind::LocationWarning);
        assert!(calls[0].2.contains("AB123"));

        let _ = fs::remove_dir_all(&f.dir);
    }

    #[tokio::test]
    async fn test_reading_mirrored_to_remote_log() {
        let f = fixture("remote_mirror", DetectorConfig::default());
        let since = Utc::now() - Duration::hours(1);

        f.pipeline
            .ingest("AB123", reading(0, 50.0, 50.0, 0.0, 0.0))
            .await
            .unwrap();

        let entries = f.remote.recent_entries("AB123", since).await.unwrap();
        assert_eq!(entries.len(), 1);

        // The compactor also wrote the first route-history sample
        let history = f.remote.route_history("AB123").await.unwrap();
        assert_eq!(history.len(), 1);

        let _ = fs::remove_dir_all(&f.dir);
    }

    #[tokio::test]
    async fn test_detectors_keyed_per_device() {
        let f = fixture("per_device", DetectorConfig::default());

        // Device CD456 stays put while AB123 builds a track and deviates
        for i in 0..3 {
            f.pipeline
                .ingest("AB123", reading(10 - i, 50.0, 50.0, 0.0, 0.0))
                .await
                .unwrap();
            f.pipeline
                .ingest("CD456", reading(10 - i, 50.0, 50.0, 45.0, 45.0))
                .await
                .unwrap();
        }

        f.pipeline
            .ingest("AB123", reading(0, 50.0, 50.0, 0.0, 0.3))
            .await
            .unwrap();

        let calls = f.dispatcher.calls().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "AB123");

        let _ = fs::remove_dir_all(&f.dir);
    }
}
