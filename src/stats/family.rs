use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::MalformedEventError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum FamilyKind {
    Sit,
    Spine,
}

impl FamilyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FamilyKind::Sit => "sit",
            FamilyKind::Spine => "spine",
        }
    }
}

impl fmt::Display for FamilyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accumulator for one categorical dimension with a fixed label set.
///
/// `counts` is parallel to `labels`. The dominant label only changes when a
/// label strictly exceeds the current maximum, so on a tie the label that
/// reached the maximum first keeps the lead.
#[derive(Debug, Clone, PartialEq)]
pub struct StatisticFamily {
    kind: FamilyKind,
    labels: Vec<String>,
    counts: Vec<u64>,
    total: u64,
    leader: Option<usize>,
}

impl StatisticFamily {
    pub fn new(kind: FamilyKind, labels: &[String]) -> Self {
        let mut unique: Vec<String> = Vec::with_capacity(labels.len());
        for label in labels {
            let label = label.trim();
            if !label.is_empty() && !unique.iter().any(|l| l.eq_ignore_ascii_case(label)) {
                unique.push(label.to_string());
            }
        }
        let counts = vec![0; unique.len()];
        Self {
            kind,
            labels: unique,
            counts,
            total: 0,
            leader: None,
        }
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Labels match case-insensitively; the configured spelling is canonical.
    pub fn index_of(&self, label: &str) -> Result<usize, MalformedEventError> {
        let label = label.trim();
        self.labels
            .iter()
            .position(|l| l.eq_ignore_ascii_case(label))
            .ok_or_else(|| MalformedEventError::UnknownLabel {
                family: self.kind,
                label: label.to_string(),
            })
    }

    pub fn dominant(&self) -> Option<&str> {
        self.leader.map(|idx| self.labels[idx].as_str())
    }

    pub fn fold(&mut self, label: &str) -> Result<(), MalformedEventError> {
        let idx = self.index_of(label)?;
        self.increment(idx);
        Ok(())
    }

    pub(crate) fn increment(&mut self, idx: usize) {
        self.counts[idx] += 1;
        self.total += 1;

        let leading = self.leader.map(|lead| self.counts[lead]).unwrap_or(0);
        if self.counts[idx] > leading {
            self.leader = Some(idx);
        }
    }

    pub fn reset(&mut self) {
        self.counts.iter_mut().for_each(|c| *c = 0);
        self.total = 0;
        self.leader = None;
    }

    /// Builds a family from externally computed counts.
    ///
    /// Without insertion order the tie-break falls back to `preferred` when it
    /// is one of the tied leaders, else to configured label order.
    pub fn from_counts(
        kind: FamilyKind,
        labels: &[String],
        counts: &BTreeMap<String, f64>,
        preferred: Option<&str>,
    ) -> Result<Self, MalformedEventError> {
        let mut family = Self::new(kind, labels);
        for (label, value) in counts {
            let idx = family.index_of(label)?;
            if !value.is_finite() || *value < 0.0 {
                return Err(MalformedEventError::Decode(format!(
                    "invalid {kind} count {value} for '{label}'"
                )));
            }
            let count = value.round() as u64;
            let overflow = || {
                MalformedEventError::Decode(format!("{kind} count for '{label}' overflows"))
            };
            family.counts[idx] = family.counts[idx]
                .checked_add(count)
                .ok_or_else(overflow)?;
            family.total = family
                .total
                .checked_add(count)
                .ok_or_else(overflow)?;
        }

        let max = family.counts.iter().copied().max().unwrap_or(0);
        if max > 0 {
            let preferred = preferred
                .and_then(|p| family.index_of(p).ok())
                .filter(|&idx| family.counts[idx] == max);
            family.leader = preferred.or_else(|| family.counts.iter().position(|&c| c == max));
        }
        Ok(family)
    }

    pub fn snapshot(&self) -> FamilySnapshot {
        let counts = self
            .labels
            .iter()
            .cloned()
            .zip(self.counts.iter().copied())
            .collect();
        let percentages = self
            .labels
            .iter()
            .zip(self.counts.iter())
            .map(|(label, &count)| (label.clone(), round_percentage(count, self.total)))
            .collect();

        FamilySnapshot {
            counts,
            total: self.total,
            dominant: self.dominant().map(str::to_string),
            percentages,
        }
    }
}

fn round_percentage(count: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (count as f64 / total as f64 * 1000.0).round() / 10.0
}

/// Immutable view of a family for presentation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FamilySnapshot {
    pub counts: BTreeMap<String, u64>,
    pub total: u64,
    pub dominant: Option<String>,
    pub percentages: BTreeMap<String, f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sit() -> StatisticFamily {
        StatisticFamily::new(FamilyKind::Sit, &["good".to_string(), "bad".to_string()])
    }

    #[test]
    fn test_majority_dominates() {
        let mut family = sit();
        for label in ["good", "bad", "good"] {
            family.fold(label).unwrap();
        }
        let snap = family.snapshot();
        assert_eq!(snap.dominant.as_deref(), Some("good"));
        assert_eq!(snap.percentages["good"], 66.7);
        assert_eq!(snap.percentages["bad"], 33.3);
        assert_eq!(snap.total, 3);
    }

    #[test]
    fn test_tie_keeps_first_leader() {
        let mut family = sit();
        family.fold("good").unwrap();
        family.fold("bad").unwrap();
        assert_eq!(family.dominant(), Some("good"));

        family.fold("bad").unwrap();
        assert_eq!(family.dominant(), Some("bad"));

        // Re-tie at 2-2: bad reached 2 first.
        family.fold("good").unwrap();
        assert_eq!(family.dominant(), Some("bad"));
    }

    #[test]
    fn test_total_matches_counts_after_every_fold() {
        let mut family = StatisticFamily::new(
            FamilyKind::Spine,
            &["normal".to_string(), "lordosis".to_string(), "kifosis".to_string()],
        );
        let sequence = ["normal", "kifosis", "KIFOSIS", "lordosis", "normal", "normal", "kifosis"];
        for label in sequence {
            family.fold(label).unwrap();
            let snap = family.snapshot();
            assert_eq!(snap.total, snap.counts.values().sum::<u64>());
        }
        assert_eq!(family.snapshot().counts["kifosis"], 3);
        assert_eq!(family.dominant(), Some("normal"));
    }

    #[test]
    fn test_unknown_label_is_rejected_without_mutation() {
        let mut family = sit();
        family.fold("good").unwrap();
        let before = family.clone();

        let err = family.fold("slouched").unwrap_err();
        assert_eq!(
            err,
            MalformedEventError::UnknownLabel {
                family: FamilyKind::Sit,
                label: "slouched".into()
            }
        );
        assert_eq!(family, before);
    }

    #[test]
    fn test_empty_family_reports_zero() {
        let family = sit();
        let snap = family.snapshot();
        assert_eq!(snap.dominant, None);
        assert_eq!(snap.percentages["good"], 0.0);
        assert_eq!(snap.percentages["bad"], 0.0);
    }

    #[test]
    fn test_from_counts_honours_preferred_on_tie() {
        let labels = ["good".to_string(), "bad".to_string()];
        let counts = BTreeMap::from([("good".to_string(), 4.0), ("bad".to_string(), 4.0)]);

        let family =
            StatisticFamily::from_counts(FamilyKind::Sit, &labels, &counts, Some("bad")).unwrap();
        assert_eq!(family.dominant(), Some("bad"));
        assert_eq!(family.total(), 8);

        let family = StatisticFamily::from_counts(FamilyKind::Sit, &labels, &counts, None).unwrap();
        assert_eq!(family.dominant(), Some("good"));
    }

    #[test]
    fn test_from_counts_rejects_unknown_labels() {
        let labels = ["good".to_string(), "bad".to_string()];
        let counts = BTreeMap::from([("meh".to_string(), 1.0)]);
        assert!(StatisticFamily::from_counts(FamilyKind::Sit, &labels, &counts, None).is_err());
    }

    #[test]
    fn test_from_counts_rejects_overflowing_totals() {
        let labels = ["good".to_string(), "bad".to_string()];
        let counts = BTreeMap::from([("good".to_string(), 1e19), ("bad".to_string(), 1e19)]);

        let err = StatisticFamily::from_counts(FamilyKind::Sit, &labels, &counts, None).unwrap_err();
        assert!(matches!(err, MalformedEventError::Decode(_)));
    }
}
