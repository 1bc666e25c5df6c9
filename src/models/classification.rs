use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MalformedEventError;

/// Whether an event is a fresh classification or a restatement of the
/// backend's current diagnosis (the reply to `request_analysis`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum EventOrigin {
    Live,
    Resync,
}

/// Running statistics the backend may attach to an update. Informational only.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerHints {
    pub dominant_sit: Option<String>,
    pub dominant_spine: Option<String>,
    pub sit_percentages: Option<BTreeMap<String, f64>>,
    pub spine_percentages: Option<BTreeMap<String, f64>>,
}

impl ServerHints {
    fn is_empty(&self) -> bool {
        self.dominant_sit.is_none()
            && self.dominant_spine.is_none()
            && self.sit_percentages.is_none()
            && self.spine_percentages.is_none()
    }
}

/// One inference result. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationEvent {
    pub timestamp: DateTime<Utc>,
    pub sit_label: String,
    pub spine_label: String,
    pub advisory_text: Option<String>,
    pub sit_confidence: Option<f64>,
    pub spine_confidence: Option<f64>,
    pub origin: EventOrigin,
    pub hints: Option<ServerHints>,
}

/// `analysis_update` payload as emitted by the backend.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnalysisUpdate {
    pub diagnosis_sit: Option<String>,
    pub diagnosis_spine: Option<String>,
    pub probability_sit: Option<Vec<f64>>,
    pub probability_spine: Option<Vec<f64>>,
    pub timestamp: Option<String>,
    pub saran: Option<String>,
    pub dominant_sit: Option<String>,
    pub dominant_spine: Option<String>,
    pub sit_percentages: Option<BTreeMap<String, f64>>,
    pub spine_percentages: Option<BTreeMap<String, f64>>,
}

impl AnalysisUpdate {
    pub fn from_value(value: serde_json::Value) -> Result<Self, MalformedEventError> {
        serde_json::from_value(value).map_err(|err| MalformedEventError::Decode(err.to_string()))
    }
}

fn required(value: Option<String>, field: &'static str) -> Result<String, MalformedEventError> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(MalformedEventError::MissingField(field)),
    }
}

fn max_probability(values: &Option<Vec<f64>>) -> Option<f64> {
    values
        .as_ref()?
        .iter()
        .copied()
        .filter(|p| p.is_finite())
        .fold(None, |best: Option<f64>, p| Some(best.map_or(p, |b| b.max(p))))
}

impl TryFrom<AnalysisUpdate> for ClassificationEvent {
    type Error = MalformedEventError;

    fn try_from(update: AnalysisUpdate) -> Result<Self, Self::Error> {
        let sit_label = required(update.diagnosis_sit, "diagnosis_sit")?;
        let spine_label = required(update.diagnosis_spine, "diagnosis_spine")?;
        let raw_timestamp = required(update.timestamp, "timestamp")?;
        let timestamp = DateTime::parse_from_rfc3339(&raw_timestamp)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|err| {
                MalformedEventError::Decode(format!("invalid timestamp '{raw_timestamp}': {err}"))
            })?;

        // The request_analysis reply carries labels only.
        let origin = if update.probability_sit.is_none() && update.probability_spine.is_none() {
            EventOrigin::Resync
        } else {
            EventOrigin::Live
        };

        let hints = ServerHints {
            dominant_sit: update.dominant_sit,
            dominant_spine: update.dominant_spine,
            sit_percentages: update.sit_percentages,
            spine_percentages: update.spine_percentages,
        };

        Ok(Self {
            timestamp,
            sit_label,
            spine_label,
            advisory_text: update.saran.filter(|s| !s.trim().is_empty()),
            sit_confidence: max_probability(&update.probability_sit),
            spine_confidence: max_probability(&update.probability_spine),
            origin,
            hints: (!hints.is_empty()).then_some(hints),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_live_update_decodes() {
        let update = AnalysisUpdate::from_value(json!({
            "diagnosis_sit": "good",
            "diagnosis_spine": "normal",
            "probability_sit": [0.9, 0.1],
            "probability_spine": [0.2, 0.7, 0.1],
            "timestamp": "2024-11-02T10:15:30.123456+07:00",
            "saran": "Keep your back straight."
        }))
        .unwrap();

        let event = ClassificationEvent::try_from(update).unwrap();
        assert_eq!(event.sit_label, "good");
        assert_eq!(event.spine_label, "normal");
        assert_eq!(event.origin, EventOrigin::Live);
        assert_eq!(event.sit_confidence, Some(0.9));
        assert_eq!(event.spine_confidence, Some(0.7));
        assert_eq!(event.timestamp.to_rfc3339(), "2024-11-02T03:15:30.123456+00:00");
        assert!(event.hints.is_none());
    }

    #[test]
    fn test_resync_reply_has_no_probabilities() {
        let update = AnalysisUpdate::from_value(json!({
            "diagnosis_sit": "bad",
            "diagnosis_spine": "kifosis",
            "timestamp": "2024-11-02T10:15:30+07:00"
        }))
        .unwrap();

        let event = ClassificationEvent::try_from(update).unwrap();
        assert_eq!(event.origin, EventOrigin::Resync);
        assert_eq!(event.advisory_text, None);
    }

    #[test]
    fn test_missing_fields_are_rejected() {
        let update = AnalysisUpdate::from_value(json!({
            "diagnosis_spine": "normal",
            "timestamp": "2024-11-02T10:15:30+07:00"
        }))
        .unwrap();
        assert_eq!(
            ClassificationEvent::try_from(update),
            Err(MalformedEventError::MissingField("diagnosis_sit"))
        );

        let update = AnalysisUpdate::from_value(json!({
            "diagnosis_sit": "good",
            "diagnosis_spine": "normal",
            "timestamp": "yesterday"
        }))
        .unwrap();
        assert!(matches!(
            ClassificationEvent::try_from(update),
            Err(MalformedEventError::Decode(_))
        ));
    }

    #[test]
    fn test_wrong_types_fail_to_decode() {
        let result = AnalysisUpdate::from_value(json!({ "diagnosis_sit": 3 }));
        assert!(matches!(result, Err(MalformedEventError::Decode(_))));
    }

    #[test]
    fn test_hints_are_kept() {
        let update = AnalysisUpdate::from_value(json!({
            "diagnosis_sit": "good",
            "diagnosis_spine": "normal",
            "probability_sit": [0.6, 0.4],
            "timestamp": "2024-11-02T10:15:30+07:00",
            "dominant_sit": "good",
            "sit_percentages": { "good": 75.0, "bad": 25.0 }
        }))
        .unwrap();

        let hints = ClassificationEvent::try_from(update).unwrap().hints.unwrap();
        assert_eq!(hints.dominant_sit.as_deref(), Some("good"));
        assert_eq!(hints.sit_percentages.unwrap()["bad"], 25.0);
    }
}
