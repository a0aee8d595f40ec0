use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One ingested telemetry sample for a tracked vehicle.
///
/// Readings are immutable once constructed; the ingestion boundary has
/// already validated field ranges by the time one of these exists.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Reading {
    pub timestamp: DateTime<Utc>,
    pub battery_v1: f64,
    pub battery_v2: f64,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl Reading {
    pub fn position(&self) -> Position {
        Position {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }
}

/// A GPS coordinate pair.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

/// The two alert conditions the engine can raise.
///
/// Debounce state is keyed by (kind, device), so a location warning never
/// suppresses a battery warning for the same vehicle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertKind {
    LocationWarning,
    BatteryWarning,
}

impl std::fmt::Display for AlertKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertKind::LocationWarning => write!(f, "Location Warning"),
            AlertKind::BatteryWarning => write!(f, "Battery Warning"),
        }
    }
}
