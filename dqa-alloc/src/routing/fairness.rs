//! Per-annotator double-pass fairness cap
//!
//! Counts `(double_pass, total)` assignments per annotator over a rolling
//! lookback window. A second pass is refused when the annotator is already
//! at the cap, or when granting it would push them past the cap.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

use crate::model::AssignmentRecord;

/// Rolling counts for one annotator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnnotatorStats {
    pub double_pass: u32,
    pub total: u32,
}

impl AnnotatorStats {
    /// Share of double passes; 0 with no assignments
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            f64::from(self.double_pass) / f64::from(self.total)
        }
    }

    /// Ratio after one more double pass
    pub fn projected_ratio(&self) -> f64 {
        f64::from(self.double_pass + 1) / f64::from(self.total + 1)
    }
}

/// Fairness ledger for one allocation cycle
#[derive(Debug, Clone)]
pub struct AnnotatorLedger {
    stats: HashMap<String, AnnotatorStats>,
    cap: f64,
}

impl AnnotatorLedger {
    pub fn new(cap: f64) -> Self {
        Self {
            stats: HashMap::new(),
            cap,
        }
    }

    /// Build from assignment rows inside `[now - lookback, now]`
    ///
    /// Rows without a timestamp cannot be placed in the window and are
    /// ignored.
    pub fn from_records(records: &[AssignmentRecord], lookback: Duration, now: DateTime<Utc>, cap: f64) -> Self {
        let cutoff = now.checked_sub_signed(lookback).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let mut ledger = Self::new(cap);
        for record in records {
            let Some(at) = record.assigned_at else {
                continue;
            };
            if at < cutoff || at > now {
                continue;
            }
            ledger.record(&record.annotator_id, record.is_double_pass());
        }
        ledger
    }

    pub fn stats(&self, annotator_id: &str) -> AnnotatorStats {
        self.stats.get(annotator_id).copied().unwrap_or_default()
    }

    /// Whether one more double pass keeps the annotator within the cap
    pub fn admits(&self, annotator_id: &str) -> bool {
        let stats = self.stats(annotator_id);
        if stats.ratio() >= self.cap {
            return false;
        }
        stats.projected_ratio() <= self.cap
    }

    pub fn record(&mut self, annotator_id: &str, double_pass: bool) {
        let stats = self.stats.entry(annotator_id.to_string()).or_default();
        stats.total += 1;
        if double_pass {
            stats.double_pass += 1;
        }
    }
}
