use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::stats::StatisticsSnapshot;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    Idle,
    Connecting,
    Active,
    Stopping,
    Stopped,
    Errored,
}

impl SessionStatus {
    pub const ALL: [SessionStatus; 6] = [
        SessionStatus::Idle,
        SessionStatus::Connecting,
        SessionStatus::Active,
        SessionStatus::Stopping,
        SessionStatus::Stopped,
        SessionStatus::Errored,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Idle => "Idle",
            SessionStatus::Connecting => "Connecting",
            SessionStatus::Active => "Active",
            SessionStatus::Stopping => "Stopping",
            SessionStatus::Stopped => "Stopped",
            SessionStatus::Errored => "Errored",
        }
    }
}

impl Default for SessionStatus {
    fn default() -> Self {
        SessionStatus::Idle
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One monitoring interval. Elapsed time is never stored here; it is derived
/// from `started_at` by the clock.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub generation: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Start time as reported by the backend, kept for display only.
    pub backend_started_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(id: String, generation: u64) -> Self {
        Self {
            id,
            generation,
            started_at: None,
            ended_at: None,
            backend_started_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum StatisticsSource {
    Local,
    Server,
}

/// Final account of a stopped session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReport {
    pub id: String,
    pub generation: u64,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub elapsed_formatted: String,
    pub backend_duration: Option<String>,
    pub statistics: StatisticsSnapshot,
    pub statistics_source: StatisticsSource,
}
