//! Assignment lease tracking
//!
//! Assignment rows younger than the activity window are leases: the item is
//! out with an annotator and is not offered as first-pass work. Leasing is
//! best effort; there is no lock between the availability check and the
//! lease write.

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};

use crate::model::{AssignmentRecord, ItemRow};

/// Default lease window in hours
pub const ASSIGNMENT_ACTIVE_HOURS: f64 = 6.0;

/// Longest accepted lease window in hours
pub const MAX_ASSIGNMENT_ACTIVE_HOURS: f64 = 720.0;

/// Active leases plus the per-item annotator history of the assignment rows
#[derive(Debug, Clone, Default)]
pub struct LeaseTracker {
    active: HashSet<String>,
    annotators: HashMap<String, HashSet<String>>,
}

impl LeaseTracker {
    /// Build from assignment rows as of `now`
    ///
    /// A row without a parseable timestamp counts as an active lease. A
    /// window reaching past the earliest representable time leases every row.
    pub fn new(records: &[AssignmentRecord], window: Duration, now: DateTime<Utc>) -> Self {
        let cutoff = now.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let mut tracker = Self::default();
        for record in records {
            let active = match record.assigned_at {
                Some(at) => at >= cutoff,
                None => true,
            };
            if active {
                tracker.active.insert(record.item_id.clone());
            }
            tracker
                .annotators
                .entry(record.item_id.clone())
                .or_default()
                .insert(record.annotator_id.clone());
        }
        tracker
    }

    pub fn is_leased(&self, item_id: &str) -> bool {
        self.active.contains(item_id)
    }

    /// Number of distinct items under an active lease
    pub fn leased_count(&self) -> usize {
        self.active.len()
    }

    /// Whether any assignment row ties `annotator_id` to `item_id`
    pub fn has_assigned(&self, item_id: &str, annotator_id: &str) -> bool {
        self.annotators
            .get(item_id)
            .is_some_and(|set| set.contains(annotator_id))
    }

    /// Items free of an active lease, in pool order
    pub fn available(&self, pool: &[ItemRow]) -> Vec<ItemRow> {
        pool.iter()
            .filter(|row| !self.is_leased(&row.id))
            .cloned()
            .collect()
    }

    /// Assignment rows for items delivered to `annotator_id`
    ///
    /// One row per (item, annotator) pair: an item already leased by another
    /// annotator still gets a row, since the row is also the permanent record
    /// that this annotator has the item. Pairs already on record are skipped,
    /// and the tracker records the new rows so a second call is a no-op.
    pub fn new_leases<'a, I>(
        &mut self,
        delivered: I,
        annotator_id: &str,
        now: DateTime<Utc>,
    ) -> Vec<AssignmentRecord>
    where
        I: IntoIterator<Item = (&'a str, u8)>,
    {
        let mut rows = Vec::new();
        for (item_id, pass_number) in delivered {
            let fresh = self
                .annotators
                .entry(item_id.to_string())
                .or_default()
                .insert(annotator_id.to_string());
            if !fresh {
                continue;
            }
            self.active.insert(item_id.to_string());
            rows.push(AssignmentRecord::new(item_id, annotator_id, pass_number, now));
        }
        rows
    }
}
