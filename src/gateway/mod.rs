// Request/response side of the backend: start, stop, history.

mod history;
mod http;

pub use history::HistoryPoller;
pub use http::HttpGateway;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::LifecycleError;
use crate::models::{HistoricalSession, PostureStatistics};

/// Reply to `POST /start_feed`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StartAck {
    pub message: Option<String>,
    /// Backend clock at start. Recorded, never used for elapsed time.
    pub start_time: Option<DateTime<Utc>>,
}

/// Reply to `POST /stop_feed`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StopSummary {
    #[serde(default)]
    pub message: Option<String>,
    /// `HH:MM:SS` as computed by the backend.
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub posture_statistics: Option<PostureStatistics>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct StartAckWire {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    start_time: Option<String>,
}

impl From<StartAckWire> for StartAck {
    fn from(wire: StartAckWire) -> Self {
        let start_time = wire.start_time.as_deref().and_then(|raw| {
            DateTime::parse_from_rfc3339(raw)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|err| log::warn!("ignoring backend start_time '{raw}': {err}"))
                .ok()
        });
        Self {
            message: wire.message,
            start_time,
        }
    }
}

/// Backend lifecycle calls. Implementations own their retry policy.
#[async_trait]
pub trait LifecycleGateway: Send + Sync {
    async fn start_feed(&self) -> Result<StartAck, LifecycleError>;
    async fn stop_feed(&self) -> Result<StopSummary, LifecycleError>;
    async fn fetch_history(&self) -> Result<Vec<HistoricalSession>, LifecycleError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_ack_tolerates_odd_start_time() {
        let wire: StartAckWire =
            serde_json::from_str(r#"{"message":"Streaming started","start_time":"2024-11-02T10:00:00+07:00"}"#)
                .unwrap();
        let ack = StartAck::from(wire);
        assert_eq!(ack.start_time.unwrap().to_rfc3339(), "2024-11-02T03:00:00+00:00");

        let wire: StartAckWire =
            serde_json::from_str(r#"{"start_time":"2024-11-02 10:00:00"}"#).unwrap();
        assert_eq!(StartAck::from(wire), StartAck::default());
    }
}
