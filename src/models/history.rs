use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::format_hms_secs;

/// Finalized statistics computed by the backend. Values are occurrence counts.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PostureStatistics {
    #[serde(default)]
    pub sit: BTreeMap<String, f64>,
    #[serde(default)]
    pub spine: BTreeMap<String, f64>,
    #[serde(default)]
    pub dominant_sit: Option<String>,
    #[serde(default)]
    pub dominant_spine: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HistoryDuration {
    #[serde(default)]
    pub hours: u64,
    #[serde(default)]
    pub minutes: u64,
    #[serde(default)]
    pub seconds: u64,
    #[serde(default)]
    pub total_seconds: Option<f64>,
}

impl HistoryDuration {
    pub fn as_secs(&self) -> u64 {
        match self.total_seconds {
            Some(total) if total.is_finite() && total >= 0.0 => total.floor() as u64,
            _ => self.hours * 3600 + self.minutes * 60 + self.seconds,
        }
    }
}

/// A past session as recorded by the backend. Read-only to this crate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoricalSession {
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration: Option<HistoryDuration>,
    #[serde(default)]
    pub posture_statistics: Option<PostureStatistics>,
}

impl HistoricalSession {
    pub fn elapsed_formatted(&self) -> String {
        format_hms_secs(self.duration.as_ref().map(HistoryDuration::as_secs).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_history_record_decodes() {
        let raw = r#"[
            {
                "start_time": "2024-11-02T10:00:00.000001+07:00",
                "end_time": "2024-11-02T11:02:03.500000+07:00",
                "duration": {"hours": 1, "minutes": 2, "seconds": 3, "total_seconds": 3723.499999}
            },
            {"start_time": "2024-11-03T08:00:00+07:00"}
        ]"#;

        let sessions: Vec<HistoricalSession> = serde_json::from_str(raw).unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].elapsed_formatted(), "01:02:03");
        assert_eq!(sessions[1].elapsed_formatted(), "00:00:00");
        assert!(sessions[1].end_time.is_none());
    }

    #[test]
    fn test_duration_without_total_uses_parts() {
        let duration = HistoryDuration {
            hours: 0,
            minutes: 5,
            seconds: 9,
            total_seconds: None,
        };
        assert_eq!(duration.as_secs(), 309);
    }
}
