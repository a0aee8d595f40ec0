pub mod api;
pub mod battery_anomaly;
pub mod cache;
pub mod geo;
pub mod notify;
pub mod pipeline;
pub mod remote_log;
pub mod route_deviation;
pub mod route_history;
pub mod triggers;
pub mod types;

pub use types::{AlertKind, Position, Reading};
