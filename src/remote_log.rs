use crate::types::{Position, Reading};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};

/// Errors from the remote durable log.
#[derive(Debug, Clone)]
pub enum RemoteError {
    NetworkTimeout,
    HttpError(u16),
    RateLimited,
    Decode(String),
    UnknownError(String),
}

impl Display for RemoteError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            RemoteError::NetworkTimeout => write!(f, "Network timeout"),
            RemoteError::HttpError(code) => write!(f, "HTTP error: {}", code),
            RemoteError::RateLimited => write!(f, "Rate limited by remote log"),
            RemoteError::Decode(msg) => write!(f, "Decode error: {}", msg),
            RemoteError::UnknownError(msg) => write!(f, "Unknown error: {}", msg),
        }
    }
}

impl std::error::Error for RemoteError {}

/// The remote per-device durable log the engine writes through.
///
/// The route-history compactor depends on read-then-write against this
/// interface; everything behind it (document store, network) belongs to an
/// external collaborator.
#[async_trait]
pub trait RemoteLog: Send + Sync {
    async fn append_entry(&self, device_id: &str, reading: &Reading) -> Result<(), RemoteError>;

    async fn recent_entries(
        &self,
        device_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Reading>, RemoteError>;

    async fn route_history(&self, device_id: &str) -> Result<Vec<Position>, RemoteError>;

    async fn update_route_history(
        &self,
        device_id: &str,
        positions: &[Position],
    ) -> Result<(), RemoteError>;
}

/// In-memory remote log for tests and single-node local mode.
#[derive(Default)]
pub struct InMemoryRemoteLog {
    logs: RwLock<HashMap<String, Vec<Reading>>>,
    routes: RwLock<HashMap<String, Vec<Position>>>,
}

impl InMemoryRemoteLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RemoteLog for InMemoryRemoteLog {
    async fn append_entry(&self, device_id: &str, reading: &Reading) -> Result<(), RemoteError> {
        let mut logs = self.logs.write().await;
        logs.entry(device_id.to_string())
            .or_default()
            .push(reading.clone());
        Ok(())
    }

    async fn recent_entries(
        &self,
        device_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Reading>, RemoteError> {
        let logs = self.logs.read().await;
        Ok(logs
            .get(device_id)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|r| r.timestamp >= since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn route_history(&self, device_id: &str) -> Result<Vec<Position>, RemoteError> {
        let routes = self.routes.read().await;
        Ok(routes.get(device_id).cloned().unwrap_or_default())
    }

    async fn update_route_history(
        &self,
        device_id: &str,
        positions: &[Position],
    ) -> Result<(), RemoteError> {
        let mut routes = self.routes.write().await;
        routes.insert(device_id.to_string(), positions.to_vec());
        Ok(())
    }
}

struct RateLimit {
    last_request: Instant,
    min_interval: Duration,
}

impl RateLimit {
    fn new(min_interval: Duration) -> Self {
        RateLimit {
            last_request: Instant::now() - min_interval,
            min_interval,
        }
    }
}

/// HTTP-backed remote log.
///
/// # Endpoints
/// - `POST {base}/devices/{id}/logs` — append one reading
/// - `GET  {base}/devices/{id}/logs?since=<rfc3339>` — recent readings
/// - `GET  {base}/devices/{id}/route-history` — full ring buffer
/// - `PUT  {base}/devices/{id}/route-history` — replace ring buffer
///
/// # Error Handling
/// - Network timeout: transient, returned to the caller
/// - HTTP 429: sleep and retry, bounded
/// - 5xx: retry with exponential backoff (1s, 2s, 4s), bounded
pub struct HttpRemoteLog {
    client: reqwest::Client,
    base_url: String,
    rate_limit: Mutex<RateLimit>,
}

const MAX_RETRIES: u32 = 3;

impl HttpRemoteLog {
    pub fn new(base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("Fleet Tracker RS/0.1.0")
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        HttpRemoteLog {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            rate_limit: Mutex::new(RateLimit::new(Duration::from_millis(100))),
        }
    }

    fn device_url(&self, device_id: &str, suffix: &str) -> String {
        format!("{}/devices/{}/{}", self.base_url, device_id, suffix)
    }

    async fn respect_rate_limit(&self) {
        let mut rate_limit = self.rate_limit.lock().await;
        let elapsed = rate_limit.last_request.elapsed();
        if elapsed < rate_limit.min_interval {
            tokio::time::sleep(rate_limit.min_interval - elapsed).await;
        }
        rate_limit.last_request = Instant::now();
    }

    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, RemoteError> {
        for attempt in 0..MAX_RETRIES {
            self.respect_rate_limit().await;

            let request = match request.try_clone() {
                Some(r) => r,
                None => return Err(RemoteError::UnknownError("Unclonable request".to_string())),
            };

            let response = match request.send().await {
                Ok(resp) => resp,
                Err(e) => {
                    if e.is_timeout() {
                        return Err(RemoteError::NetworkTimeout);
                    }
                    return Err(RemoteError::UnknownError(e.to_string()));
                }
            };

            let status = response.status();
            if status == 429 {
                log::warn!("Rate limited by remote log, backing off");
                tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
                continue;
            }
            if status.is_server_error() {
                let backoff = 2u64.pow(attempt);
                log::warn!(
                    "Remote log returned {} on attempt {}/{}, retrying in {}s",
                    status,
                    attempt + 1,
                    MAX_RETRIES,
                    backoff
                );
                tokio::time::sleep(Duration::from_secs(backoff)).await;
                continue;
            }
            if !status.is_success() {
                return Err(RemoteError::HttpError(status.as_u16()));
            }

            return Ok(response);
        }

        Err(RemoteError::RateLimited)
    }
}

#[async_trait]
impl RemoteLog for HttpRemoteLog {
    async fn append_entry(&self, device_id: &str, reading: &Reading) -> Result<(), RemoteError> {
        let url = self.device_url(device_id, "logs");
        self.execute(self.client.post(&url).json(reading)).await?;
        Ok(())
    }

    async fn recent_entries(
        &self,
        device_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Reading>, RemoteError> {
        let url = self.device_url(device_id, "logs");
        let response = self
            .execute(self.client.get(&url).query(&[("since", since.to_rfc3339())]))
            .await?;
        response
            .json::<Vec<Reading>>()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))
    }

    async fn route_history(&self, device_id: &str) -> Result<Vec<Position>, RemoteError> {
        let url = self.device_url(device_id, "route-history");
        let response = self.execute(self.client.get(&url)).await?;
        response
            .json::<Vec<Position>>()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))
    }

    async fn update_route_history(
        &self,
        device_id: &str,
        positions: &[Position],
    ) -> Result<(), RemoteError> {
        let url = self.device_url(device_id, "route-history");
        self.execute(self.client.put(&url).json(&positions.to_vec()))
            .await?;
        Ok(())
    }
}
