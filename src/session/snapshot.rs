use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{ClassificationEvent, SessionStatus, StatisticsSource};
use crate::stats::FamilySnapshot;

/// Latest diagnosis shown to the user. Cleared when a session (re)starts.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LiveDiagnosis {
    pub sit: Option<String>,
    pub spine: Option<String>,
    pub advisory: Option<String>,
    pub sit_confidence: Option<f64>,
    pub spine_confidence: Option<f64>,
    pub observed_at: Option<DateTime<Utc>>,
}

impl LiveDiagnosis {
    pub fn observe(&mut self, event: &ClassificationEvent) {
        *self = Self {
            sit: Some(event.sit_label.clone()),
            spine: Some(event.spine_label.clone()),
            // A resync reply carries no advice; keep the last one.
            advisory: event.advisory_text.clone().or_else(|| self.advisory.take()),
            sit_confidence: event.sit_confidence,
            spine_confidence: event.spine_confidence,
            observed_at: Some(event.timestamp),
        };
    }
}

/// Push-channel health, independent of the session status.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum Connectivity {
    #[default]
    Offline,
    Connected,
    Degraded {
        attempt: u32,
        budget: u32,
        reason: String,
    },
    Unreachable {
        reason: String,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatisticsView {
    pub sit: FamilySnapshot,
    pub spine: FamilySnapshot,
    pub source: Option<StatisticsSource>,
}

/// Everything presentation needs, as one immutable value.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub generation: u64,
    pub session_id: Option<String>,
    pub status: SessionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub elapsed_ms: u64,
    pub elapsed_formatted: String,
    pub live_diagnosis: LiveDiagnosis,
    pub statistics: StatisticsView,
    pub connectivity: Connectivity,
    pub last_error: Option<String>,
}

impl SessionSnapshot {
    /// One-line summary for terminals and logs.
    pub fn status_line(&self) -> String {
        let mut line = format!("[{}] {}", self.status, self.elapsed_formatted);

        if let (Some(sit), Some(spine)) = (&self.live_diagnosis.sit, &self.live_diagnosis.spine) {
            line.push_str(&format!(" | now: {sit}/{spine}"));
        }

        let sit = &self.statistics.sit;
        if let Some(dominant) = &sit.dominant {
            let share = sit.percentages.get(dominant).copied().unwrap_or(0.0);
            line.push_str(&format!(" | sit: {dominant} {share:.1}%"));
        }
        let spine = &self.statistics.spine;
        if let Some(dominant) = &spine.dominant {
            let share = spine.percentages.get(dominant).copied().unwrap_or(0.0);
            line.push_str(&format!(" | spine: {dominant} {share:.1}%"));
        }

        match &self.connectivity {
            Connectivity::Degraded {
                attempt, budget, ..
            } => line.push_str(&format!(" | reconnecting {attempt}/{budget}")),
            Connectivity::Unreachable { .. } => line.push_str(" | backend unreachable"),
            _ => {}
        }

        if let Some(advisory) = &self.live_diagnosis.advisory {
            line.push_str(&format!(" | {advisory}"));
        }
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EventOrigin;
    use chrono::TimeZone;

    #[test]
    fn test_resync_keeps_previous_advice() {
        let mut live = LiveDiagnosis::default();
        let mut event = ClassificationEvent {
            timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            sit_label: "bad".into(),
            spine_label: "kifosis".into(),
            advisory_text: Some("Straighten up.".into()),
            sit_confidence: Some(0.9),
            spine_confidence: Some(0.6),
            origin: EventOrigin::Live,
            hints: None,
        };
        live.observe(&event);

        event.origin = EventOrigin::Resync;
        event.advisory_text = None;
        event.sit_confidence = None;
        event.sit_label = "good".into();
        live.observe(&event);

        assert_eq!(live.sit.as_deref(), Some("good"));
        assert_eq!(live.advisory.as_deref(), Some("Straighten up."));
        assert_eq!(live.sit_confidence, None);
    }

    #[test]
    fn test_connectivity_serializes_tagged() {
        let degraded = Connectivity::Degraded {
            attempt: 2,
            budget: 5,
            reason: "ping timeout".into(),
        };
        assert_eq!(
            serde_json::to_value(&degraded).unwrap(),
            serde_json::json!({"state": "degraded", "attempt": 2, "budget": 5, "reason": "ping timeout"})
        );
        assert_eq!(
            serde_json::to_value(Connectivity::Offline).unwrap(),
            serde_json::json!({"state": "offline"})
        );
    }
}
