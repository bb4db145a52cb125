//! Stratified weighted sampling without replacement
//!
//! Items are bucketed by every cell they belong to. Each draw picks a cell by
//! weight (restricted to cells that still have items), then an item uniformly
//! from that cell. A drawn item leaves every bucket it sits in, so a
//! multi-speaker item is never drawn twice through another of its cells.
//!
//! Weighted draws can run dry before `limit`. The remainder is topped up from
//! the unselected available items in discovery order, then from a shuffle of
//! the whole pool, so a request is never starved by coverage weighting alone.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

use crate::cells::{derive_cell_keys, derive_primary_cell};
use crate::model::ItemRow;
use crate::weights::{pick_weighted_cell, restrict_weights, WeightMap};

/// How an item entered the selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionOrigin {
    /// Drawn through a weighted cell
    Weighted,
    /// Top-up from unselected available items
    Fill,
    /// Top-up from the shuffled whole pool
    Pool,
}

/// One selected item and the cell it is attributed to
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub row: ItemRow,
    pub cell: String,
    pub origin: SelectionOrigin,
}

struct Entry<'a> {
    row: &'a ItemRow,
    cells: Vec<String>,
}

/// Weighted draws only; may return fewer than `limit`
pub fn select_with_allocator<R: Rng + ?Sized>(
    available: &[ItemRow],
    weights: &WeightMap,
    limit: usize,
    rng: &mut R,
) -> Vec<Selection> {
    if weights.is_empty() || available.is_empty() || limit == 0 {
        return Vec::new();
    }

    let mut seen = HashSet::new();
    let entries: Vec<Entry> = available
        .iter()
        .filter(|row| seen.insert(row.id.as_str()))
        .map(|row| Entry {
            row,
            cells: derive_cell_keys(&row.fields),
        })
        .collect();

    let mut buckets: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (index, entry) in entries.iter().enumerate() {
        for cell in &entry.cells {
            buckets.entry(cell.as_str()).or_default().push(index);
        }
    }

    let mut selections = Vec::new();
    while selections.len() < limit {
        let restricted = restrict_weights(weights, |key| {
            buckets.get(key).is_some_and(|bucket| !bucket.is_empty())
        });
        let Some(cell) = pick_weighted_cell(&restricted, rng) else {
            break;
        };
        let Some(bucket) = buckets.get(cell) else {
            break;
        };
        let Some(&index) = bucket.choose(rng) else {
            break;
        };

        let entry = &entries[index];
        selections.push(Selection {
            row: entry.row.clone(),
            cell: cell.to_string(),
            origin: SelectionOrigin::Weighted,
        });

        for key in &entry.cells {
            if let Some(bucket) = buckets.get_mut(key.as_str()) {
                bucket.retain(|i| *i != index);
            }
        }
    }

    selections
}

/// Top up `selections` to `limit`, never repeating an identifier
pub fn fill_selection<R: Rng + ?Sized>(
    selections: &mut Vec<Selection>,
    available: &[ItemRow],
    pool: &[ItemRow],
    limit: usize,
    rng: &mut R,
) {
    let mut chosen: HashSet<String> = selections.iter().map(|s| s.row.id.clone()).collect();

    for row in available {
        if selections.len() >= limit {
            return;
        }
        if chosen.insert(row.id.clone()) {
            selections.push(Selection {
                row: row.clone(),
                cell: derive_primary_cell(&row.fields),
                origin: SelectionOrigin::Fill,
            });
        }
    }

    if selections.len() >= limit {
        return;
    }

    let mut remainder: Vec<&ItemRow> = pool.iter().filter(|row| !chosen.contains(&row.id)).collect();
    remainder.shuffle(rng);
    for row in remainder {
        if selections.len() >= limit {
            return;
        }
        if chosen.insert(row.id.clone()) {
            selections.push(Selection {
                row: row.clone(),
                cell: derive_primary_cell(&row.fields),
                origin: SelectionOrigin::Pool,
            });
        }
    }
}

/// Weighted draws followed by the two top-up passes
pub fn stratified_select<R: Rng + ?Sized>(
    available: &[ItemRow],
    pool: &[ItemRow],
    weights: Option<&WeightMap>,
    limit: usize,
    rng: &mut R,
) -> Vec<Selection> {
    let mut selections = match weights {
        Some(weights) => select_with_allocator(available, weights, limit, rng),
        None => Vec::new(),
    };
    fill_selection(&mut selections, available, pool, limit, rng);
    selections
}
