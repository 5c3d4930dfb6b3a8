use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::pipeline::processing::validate::{RejectionReason, ValidationOutcome};

/// Counters for one pipeline run.
///
/// `accepted`, `accepted_with_default` and `rejected` are disjoint and
/// always add up to `total`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatistics {
    pub run_id: Uuid,
    pub domain: String,
    pub origin: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total: usize,
    pub accepted: usize,
    pub accepted_with_default: usize,
    pub rejected: usize,
    pub duplicates_removed: usize,
    pub output: usize,
    /// Number of substitutions per field
    pub defaults_by_field: BTreeMap<String, usize>,
    /// Number of rejections per reason label, e.g. `missing-field:name`
    pub rejections_by_reason: BTreeMap<String, usize>,
}

impl RunStatistics {
    pub fn new(domain: &str, origin: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            domain: domain.to_string(),
            origin: origin.to_string(),
            started_at,
            completed_at: None,
            total: 0,
            accepted: 0,
            accepted_with_default: 0,
            rejected: 0,
            duplicates_removed: 0,
            output: 0,
            defaults_by_field: BTreeMap::new(),
            rejections_by_reason: BTreeMap::new(),
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.accepted + self.accepted_with_default + self.rejected == self.total
    }

    /// Fold another run's counters into this one. The earliest start and
    /// latest completion are kept.
    pub fn merge(&mut self, other: &RunStatistics) {
        self.total += other.total;
        self.accepted += other.accepted;
        self.accepted_with_default += other.accepted_with_default;
        self.rejected += other.rejected;
        self.duplicates_removed += other.duplicates_removed;
        self.output += other.output;
        for (field, n) in &other.defaults_by_field {
            *self.defaults_by_field.entry(field.clone()).or_insert(0) += n;
        }
        for (reason, n) in &other.rejections_by_reason {
            *self.rejections_by_reason.entry(reason.clone()).or_insert(0) += n;
        }
        self.started_at = self.started_at.min(other.started_at);
        self.completed_at = match (self.completed_at, other.completed_at) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }
}

/// Accumulates statistics while a run is in progress
#[derive(Debug, Clone)]
pub struct StatsCollector {
    stats: RunStatistics,
}

impl StatsCollector {
    pub fn new(domain: &str, origin: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            stats: RunStatistics::new(domain, origin, started_at),
        }
    }

    pub fn observe(&mut self, outcome: &ValidationOutcome) {
        self.stats.total += 1;
        match outcome {
            ValidationOutcome::Accepted(_) => self.stats.accepted += 1,
            ValidationOutcome::AcceptedWithDefault(_, subs) => {
                self.stats.accepted_with_default += 1;
                for sub in subs {
                    *self.stats.defaults_by_field.entry(sub.field.clone()).or_insert(0) += 1;
                }
            }
            ValidationOutcome::Rejected(reason) => self.reject(reason),
        }
    }

    fn reject(&mut self, reason: &RejectionReason) {
        self.stats.rejected += 1;
        *self.stats.rejections_by_reason.entry(reason.to_string()).or_insert(0) += 1;
    }

    pub fn record_dedupe(&mut self, removed: usize, output: usize) {
        self.stats.duplicates_removed = removed;
        self.stats.output = output;
    }

    /// A consistent view of the counters so far
    pub fn snapshot(&self) -> RunStatistics {
        self.stats.clone()
    }

    pub fn finish(mut self, completed_at: DateTime<Utc>) -> RunStatistics {
        self.stats.completed_at = Some(completed_at);
        self.stats
    }
}
