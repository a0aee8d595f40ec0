use crate::remote_log::{RemoteError, RemoteLog};
use crate::types::Position;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Maintains the long-horizon route-history ring buffer per device.
///
/// # Architecture
/// - Fixed-capacity FIFO of coarse position samples (288 entries, ~24h at
///   5-minute spacing) persisted through the [`RemoteLog`] collaborator
/// - A per-device last-sample marker gates appends to at most one per
///   `sample_gate`, throttling write volume against the remote store
/// - Read-then-write: the existing buffer is fetched before every append;
///   a failed read aborts the operation with no partial write
pub struct RouteCompactor {
    remote: Arc<dyn RemoteLog>,
    capacity: usize,
    sample_gate: Duration,
    last_sampled: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl RouteCompactor {
    pub fn new(remote: Arc<dyn RemoteLog>, capacity: usize, sample_gate_secs: i64) -> Self {
        RouteCompactor {
            remote,
            capacity,
            sample_gate: Duration::seconds(sample_gate_secs),
            last_sampled: Mutex::new(HashMap::new()),
        }
    }

    /// Append `position` to the device's ring buffer if the sampling gate
    /// allows it. Returns `Ok(true)` when a sample was written, `Ok(false)`
    /// when the gate skipped it.
    pub async fn maybe_append(
        &self,
        device_id: &str,
        position: Position,
        now: DateTime<Utc>,
    ) -> Result<bool, RemoteError> {
        {
            let last_sampled = self.last_sampled.lock().await;
            if let Some(last) = last_sampled.get(device_id) {
                if now - *last <= self.sample_gate {
                    return Ok(false);
                }
            }
        }

        // Read-then-write: no append without a successful prior read
        let mut history = self.remote.route_history(device_id).await?;

        history.push(position);
        while history.len() > self.capacity {
            history.remove(0);
        }

        self.remote.update_route_history(device_id, &history).await?;

        let mut last_sampled = self.last_sampled.lock().await;
        last_sampled.insert(device_id.to_string(), now);
        Ok(true)
    }
}
