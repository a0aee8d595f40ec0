use crate::types::Reading;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Errors from the local cache persistence layer.
#[derive(Debug, Clone)]
pub enum CacheError {
    Io(String),
    Serialize(String),
}

impl Display for CacheError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            CacheError::Io(msg) => write!(f, "Cache I/O error: {}", msg),
            CacheError::Serialize(msg) => write!(f, "Cache serialization error: {}", msg),
        }
    }
}

impl std::error::Error for CacheError {}

struct DeviceEntry {
    hydrated: bool,
    readings: VecDeque<Reading>,
}

impl DeviceEntry {
    fn empty() -> Self {
        DeviceEntry {
            hydrated: false,
            readings: VecDeque::new(),
        }
    }
}

/// Per-device, time-windowed store of recent readings.
///
/// # Architecture
/// - In-memory map of device ID -> ordered readings (chronological ascending)
/// - Write-through JSON file per device: `{data_dir}/{device_id}.json`
/// - Lazy hydration from disk on first touch after a restart
/// - Age-based eviction runs on every append (and on read), so correctness
///   never depends on a background sweeper
///
/// Each device owns an independent lock; a pending write for one device
/// never delays another.
pub struct LocalCache {
    data_dir: PathBuf,
    retention: Duration,
    devices: RwLock<HashMap<String, Arc<Mutex<DeviceEntry>>>>,
}

impl LocalCache {
    /// Create a cache rooted at `data_dir`, keeping readings for
    /// `retention_days` (3 days in production).
    pub fn new(data_dir: PathBuf, retention_days: i64) -> Self {
        if !data_dir.exists() {
            if let Err(e) = fs::create_dir_all(&data_dir) {
                log::warn!("Failed to create cache dir {}: {}", data_dir.display(), e);
            }
        }

        LocalCache {
            data_dir,
            retention: Duration::days(retention_days),
            devices: RwLock::new(HashMap::new()),
        }
    }

    /// Append a reading, evict everything older than the retention window,
    /// and persist the device file.
    ///
    /// The write-through is the authoritative storage of the reading; a
    /// failure here must surface to the producer.
    pub async fn append(&self, device_id: &str, reading: Reading) -> Result<(), CacheError> {
        let slot = self.slot(device_id).await;
        let mut entry = slot.lock().await;
        self.hydrate(device_id, &mut entry);

        entry.readings.push_back(reading);
        Self::evict(&mut entry.readings, Utc::now(), self.retention);

        self.persist(device_id, &entry.readings)
    }

    /// All cached readings for a device in chronological order. Unknown
    /// devices and missing files read as empty, never as an error.
    pub async fn read_all(&self, device_id: &str) -> Vec<Reading> {
        let slot = self.slot(device_id).await;
        let mut entry = slot.lock().await;
        self.hydrate(device_id, &mut entry);

        // Evict on read as well; the file catches up on the next append.
        Self::evict(&mut entry.readings, Utc::now(), self.retention);

        entry.readings.iter().cloned().collect()
    }

    /// Timestamp of the most recently appended reading, if any.
    pub async fn last_appended(&self, device_id: &str) -> Option<DateTime<Utc>> {
        let slot = self.slot(device_id).await;
        let mut entry = slot.lock().await;
        self.hydrate(device_id, &mut entry);
        entry.readings.back().map(|r| r.timestamp)
    }

    /// Most recent reading snapshot for a device.
    pub async fn latest(&self, device_id: &str) -> Option<Reading> {
        let slot = self.slot(device_id).await;
        let mut entry = slot.lock().await;
        self.hydrate(device_id, &mut entry);
        entry.readings.back().cloned()
    }

    async fn slot(&self, device_id: &str) -> Arc<Mutex<DeviceEntry>> {
        {
            let devices = self.devices.read().await;
            if let Some(slot) = devices.get(device_id) {
                return slot.clone();
            }
        }

        let mut devices = self.devices.write().await;
        devices
            .entry(device_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(DeviceEntry::empty())))
            .clone()
    }

    fn hydrate(&self, device_id: &str, entry: &mut DeviceEntry) {
        if entry.hydrated {
            return;
        }
        entry.readings = self.load_from_disk(device_id);
        entry.hydrated = true;
    }

    fn evict(readings: &mut VecDeque<Reading>, now: DateTime<Utc>, retention: Duration) {
        let cutoff = now - retention;
        while let Some(front) = readings.front() {
            if front.timestamp < cutoff {
                readings.pop_front();
            } else {
                break;
            }
        }
    }

    fn device_path(&self, device_id: &str) -> PathBuf {
        self.data_dir.join(format!("{}.json", device_id))
    }

    fn load_from_disk(&self, device_id: &str) -> VecDeque<Reading> {
        let path = self.device_path(device_id);

        if !path.exists() {
            return VecDeque::new();
        }

        let json = match fs::read_to_string(&path) {
            Ok(json) => json,
            Err(e) => {
                log::warn!("Failed to read cache file {}: {}", path.display(), e);
                return VecDeque::new();
            }
        };

        match serde_json::from_str::<Vec<Reading>>(&json) {
            Ok(readings) => readings.into(),
            Err(e) => {
                log::warn!("Corrupt cache file {}: {}", path.display(), e);
                VecDeque::new()
            }
        }
    }

    fn persist(&self, device_id: &str, readings: &VecDeque<Reading>) -> Result<(), CacheError> {
        let path = self.device_path(device_id);

        let snapshot: Vec<&Reading> = readings.iter().collect();
        let json = serde_json::to_string(&snapshot)
            .map_err(|e| CacheError::Serialize(e.to_string()))?;

        fs::write(&path, json).map_err(|e| CacheError::Io(e.to_string()))
    }
}
