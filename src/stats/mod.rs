mod family;

pub use family::{FamilyKind, FamilySnapshot, StatisticFamily};

use serde::{Deserialize, Serialize};

use crate::error::MalformedEventError;
use crate::models::{ClassificationEvent, PostureStatistics};

/// Classes emitted by the backend's sit and spine models.
pub const DEFAULT_SIT_LABELS: [&str; 2] = ["Baik", "Buruk"];
pub const DEFAULT_SPINE_LABELS: [&str; 3] = ["Normal", "Lordosis", "Kifosis"];

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatisticsSnapshot {
    pub sit: FamilySnapshot,
    pub spine: FamilySnapshot,
}

/// Folds classification events into the sit and spine families.
///
/// Not idempotent: folding the same event twice counts it twice. Callers
/// own at-most-once delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct StatAggregator {
    sit: StatisticFamily,
    spine: StatisticFamily,
}

impl Default for StatAggregator {
    fn default() -> Self {
        let sit: Vec<String> = DEFAULT_SIT_LABELS.iter().map(|s| s.to_string()).collect();
        let spine: Vec<String> = DEFAULT_SPINE_LABELS.iter().map(|s| s.to_string()).collect();
        Self::new(&sit, &spine)
    }
}

impl StatAggregator {
    pub fn new(sit_labels: &[String], spine_labels: &[String]) -> Self {
        Self {
            sit: StatisticFamily::new(FamilyKind::Sit, sit_labels),
            spine: StatisticFamily::new(FamilyKind::Spine, spine_labels),
        }
    }

    pub fn family(&self, kind: FamilyKind) -> &StatisticFamily {
        match kind {
            FamilyKind::Sit => &self.sit,
            FamilyKind::Spine => &self.spine,
        }
    }

    /// Rejects the event when any label is unknown, without folding either.
    pub fn validate(&self, event: &ClassificationEvent) -> Result<(usize, usize), MalformedEventError> {
        let sit = self.sit.index_of(&event.sit_label)?;
        let spine = self.spine.index_of(&event.spine_label)?;
        Ok((sit, spine))
    }

    pub fn fold(&mut self, event: &ClassificationEvent) -> Result<(), MalformedEventError> {
        let (sit, spine) = self.validate(event)?;
        self.sit.increment(sit);
        self.spine.increment(spine);
        Ok(())
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            sit: self.sit.snapshot(),
            spine: self.spine.snapshot(),
        }
    }

    pub fn reset(&mut self) {
        self.sit.reset();
        self.spine.reset();
    }

    /// Replaces both families with the backend's finalized counts. Nothing is
    /// replaced unless both families validate.
    pub fn replace_with(&mut self, stats: &PostureStatistics) -> Result<(), MalformedEventError> {
        let sit = StatisticFamily::from_counts(
            FamilyKind::Sit,
            self.sit.labels(),
            &stats.sit,
            stats.dominant_sit.as_deref(),
        )?;
        let spine = StatisticFamily::from_counts(
            FamilyKind::Spine,
            self.spine.labels(),
            &stats.spine,
            stats.dominant_spine.as_deref(),
        )?;
        self.sit = sit;
        self.spine = spine;
        Ok(())
    }
}
