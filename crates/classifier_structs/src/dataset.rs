use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Per-class image counts of a dataset directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSummary {
    /// Image count per class directory, keyed by class name.
    pub counts: BTreeMap<String, usize>,
    /// Sum of all counts.
    pub total: usize,
}

impl DatasetSummary {
    /// Builds a summary from per-class counts.
    #[must_use]
    pub fn from_counts(counts: BTreeMap<String, usize>) -> Self {
        let total = counts.values().sum();
        Self { counts, total }
    }

    /// Returns true once the dataset holds at least `threshold` images.
    #[must_use]
    pub const fn is_ready(&self, threshold: usize) -> bool {
        self.total >= threshold
    }
}
