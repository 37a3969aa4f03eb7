//! Class distribution statistics
//!
//! Percentages are always relative to the total voxel count of the volume,
//! so the unlabeled share (label 0) and the class shares add up to 100.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Count and share of one label value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassCount {
    pub label: u32,
    pub count: u64,
    pub percentage: f64,
}

/// Per-label voxel counts of a label or prediction volume.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassDistribution {
    total: u64,
    counts: BTreeMap<u32, u64>,
}

impl ClassDistribution {
    /// Count every label yielded by `labels`.
    pub fn from_labels<I>(labels: I) -> Self
    where
        I: IntoIterator<Item = u32>,
    {
        let mut counts = BTreeMap::new();
        let mut total = 0u64;
        for label in labels {
            *counts.entry(label).or_insert(0) += 1;
            total += 1;
        }
        Self { total, counts }
    }

    /// Build from precomputed counts; `total` is the volume size.
    pub fn from_counts(total: u64, counts: BTreeMap<u32, u64>) -> Self {
        Self { total, counts }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn count(&self, label: u32) -> u64 {
        self.counts.get(&label).copied().unwrap_or(0)
    }

    /// Share of `label` in percent of the whole volume.
    pub fn percentage(&self, label: u32) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.count(label) as f64 / self.total as f64 * 100.0
    }

    /// Share of unlabeled voxels (label 0).
    pub fn unlabeled_percentage(&self) -> f64 {
        self.percentage(0)
    }

    /// Labels present in the volume, ascending.
    pub fn labels(&self) -> Vec<u32> {
        self.counts.keys().copied().collect()
    }

    /// All entries including label 0, ascending by label.
    pub fn entries(&self) -> Vec<ClassCount> {
        self.counts
            .iter()
            .map(|(&label, &count)| ClassCount {
                label,
                count,
                percentage: self.percentage(label),
            })
            .collect()
    }

    /// Entries for real classes only (label > 0).
    pub fn class_entries(&self) -> Vec<ClassCount> {
        self.entries()
            .into_iter()
            .filter(|entry| entry.label > 0)
            .collect()
    }

    /// Number of voxels carrying any class.
    pub fn labeled_count(&self) -> u64 {
        self.total - self.count(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ten_percent_painted() {
        let labels = std::iter::repeat(1u32)
            .take(10)
            .chain(std::iter::repeat(0u32).take(90));
        let dist = ClassDistribution::from_labels(labels);

        assert_eq!(dist.total(), 100);
        assert!((dist.percentage(0) - 90.0).abs() < 1e-9);
        assert!((dist.percentage(1) - 10.0).abs() < 1e-9);
        assert_eq!(dist.labeled_count(), 10);
        assert_eq!(dist.labels(), vec![0, 1]);
    }

    #[test]
    fn class_entries_exclude_unlabeled() {
        let dist = ClassDistribution::from_labels([0, 0, 2, 3, 3]);
        let classes = dist.class_entries();
        assert_eq!(classes.len(), 2);
        assert_eq!(classes[0].label, 2);
        assert_eq!(classes[1].count, 2);
        assert!((classes[1].percentage - 40.0).abs() < 1e-9);
    }

    #[test]
    fn empty_distribution_has_no_share() {
        let dist = ClassDistribution::default();
        assert_eq!(dist.percentage(0), 0.0);
        assert!(dist.entries().is_empty());
    }
}
