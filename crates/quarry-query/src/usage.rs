//! Per-dialect run accounting

use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Counts runs that reached the running stage, per SQL dialect
#[derive(Debug, Default)]
pub struct QueryUsage {
    counts: RwLock<BTreeMap<String, u64>>,
}

impl QueryUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, dialect: &str) {
        *self.counts.write().entry(dialect.to_string()).or_default() += 1;
    }

    pub fn count(&self, dialect: &str) -> u64 {
        self.counts.read().get(dialect).copied().unwrap_or(0)
    }

    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.counts.read().clone()
    }

    pub fn total(&self) -> u64 {
        self.counts.read().values().sum()
    }
}
