use crate::types::AlertKind;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::PathBuf;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub enum TriggerError {
    Io(String),
    Serialize(String),
}

impl Display for TriggerError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            TriggerError::Io(msg) => write!(f, "Trigger store I/O error: {}", msg),
            TriggerError::Serialize(msg) => write!(f, "Trigger store serialization error: {}", msg),
        }
    }
}

impl std::error::Error for TriggerError {}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct TriggerDoc {
    location_triggers: HashMap<String, DateTime<Utc>>,
    battery_triggers: HashMap<String, DateTime<Utc>>,
}

impl TriggerDoc {
    fn map(&self, kind: AlertKind) -> &HashMap<String, DateTime<Utc>> {
        match kind {
            AlertKind::LocationWarning => &self.location_triggers,
            AlertKind::BatteryWarning => &self.battery_triggers,
        }
    }

    fn map_mut(&mut self, kind: AlertKind) -> &mut HashMap<String, DateTime<Utc>> {
        match kind {
            AlertKind::LocationWarning => &mut self.location_triggers,
            AlertKind::BatteryWarning => &mut self.battery_triggers,
        }
    }
}

/// Durable last-alert timestamps per device per alert kind.
///
/// This is the one globally shared mutable structure in the engine. All
/// access goes through a single mutex, so the cooldown check and the
/// subsequent write are atomic per (kind, device) pair: two concurrent
/// off-route events for the same device cannot both pass the check and
/// double-alert. Every write persists the whole document.
pub struct TriggerStore {
    path: PathBuf,
    doc: Mutex<TriggerDoc>,
}

impl TriggerStore {
    /// Open the store at `path`. A missing or unreadable file initializes
    /// both sub-maps empty and persists the empty document immediately, so
    /// later readers always find a well-formed file.
    pub fn open(path: PathBuf) -> Result<Self, TriggerError> {
        let doc = match fs::read_to_string(&path) {
            Ok(json) => match serde_json::from_str::<TriggerDoc>(&json) {
                Ok(doc) => doc,
                Err(e) => {
                    log::warn!("Corrupt trigger file {}: {}", path.display(), e);
                    TriggerDoc::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let doc = TriggerDoc::default();
                Self::persist(&path, &doc)?;
                doc
            }
            Err(e) => return Err(TriggerError::Io(e.to_string())),
        };

        Ok(TriggerStore {
            path,
            doc: Mutex::new(doc),
        })
    }

    /// Last trigger instant for (kind, device), if one was ever recorded.
    pub async fn get(&self, kind: AlertKind, device_id: &str) -> Option<DateTime<Utc>> {
        let doc = self.doc.lock().await;
        doc.map(kind).get(device_id).copied()
    }

    /// Record a trigger instant and persist the full document.
    pub async fn set(
        &self,
        kind: AlertKind,
        device_id: &str,
        instant: DateTime<Utc>,
    ) -> Result<(), TriggerError> {
        let mut doc = self.doc.lock().await;
        doc.map_mut(kind).insert(device_id.to_string(), instant);
        Self::persist(&self.path, &doc)
    }

    /// Atomic check-then-record: returns true and records `now` iff no
    /// trigger exists for (kind, device) or the last one is older than
    /// `cooldown`. Holding the store lock across check and write is what
    /// keeps two racing detections from both firing.
    pub async fn fire_if_due(
        &self,
        kind: AlertKind,
        device_id: &str,
        now: DateTime<Utc>,
        cooldown: Duration,
    ) -> Result<bool, TriggerError> {
        let mut doc = self.doc.lock().await;

        if let Some(last) = doc.map(kind).get(device_id) {
            if now - *last <= cooldown {
                return Ok(false);
            }
        }

        doc.map_mut(kind).insert(device_id.to_string(), now);
        Self::persist(&self.path, &doc)?;
        Ok(true)
    }

    fn persist(path: &PathBuf, doc: &TriggerDoc) -> Result<(), TriggerError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| TriggerError::Io(e.to_string()))?;
        }
        let json =
            serde_json::to_string_pretty(doc).map_err(|e| TriggerError::Serialize(e.to_string()))?;
        fs::write(path, json).map_err(|e| TriggerError::Io(e.to_string()))
    }
}
