//! Allocator weight calculation
//!
//! Turns per-cell coverage deficits into a sampling distribution. Cells far
//! from their target get quadratically more weight; cells at or past target
//! get none.

use rand::Rng;
use std::collections::BTreeMap;

use crate::coverage::CoverageSnapshot;

/// Exponent applied to the remaining share `(1 - pct)`
pub const ALLOCATOR_ALPHA: f64 = 2.0;

/// Multiplier for cells below half of target
pub const UNDER_HALF_BOOST: f64 = 1.25;

/// Multiplier for cells with a large absolute deficit
pub const DEFICIT_BOOST: f64 = 1.15;

/// Deficit at which [`DEFICIT_BOOST`] applies
pub const DEFICIT_BOOST_THRESHOLD: f64 = 20.0;

/// Cell key → weight. Ordered so a seeded draw is reproducible.
pub type WeightMap = BTreeMap<String, f64>;

/// Unnormalized score for one cell, `None` when the cell gets no weight
pub fn cell_score(target: f64, count: f64, deficit: Option<f64>) -> Option<f64> {
    if !(target > 0.0) {
        return None;
    }
    let pct = (count / target).clamp(0.0, 1.0);
    let mut score = (1.0 - pct).max(0.0).powf(ALLOCATOR_ALPHA);
    if !(score > 0.0) {
        return None;
    }
    if pct < 0.5 {
        score *= UNDER_HALF_BOOST;
    }
    if deficit.is_some_and(|d| d >= DEFICIT_BOOST_THRESHOLD) {
        score *= DEFICIT_BOOST;
    }
    Some(score)
}

/// Normalized sampling weights for every cell with remaining deficit
///
/// Duplicate keys accumulate. The returned weights sum to 1, or the map is
/// empty when no cell has positive weight.
pub fn compute_allocator_weights(snapshot: &CoverageSnapshot) -> WeightMap {
    let mut weights = WeightMap::new();
    for cell in &snapshot.cells {
        let Some(target) = cell.target else {
            continue;
        };
        if let Some(score) = cell_score(target, cell.count, cell.deficit) {
            *weights.entry(cell.cell_key.clone()).or_insert(0.0) += score;
        }
    }
    normalize(weights)
}

fn normalize(weights: WeightMap) -> WeightMap {
    let total: f64 = weights.values().sum();
    if !(total > 0.0) {
        return WeightMap::new();
    }
    weights
        .into_iter()
        .map(|(key, value)| (key, value / total))
        .collect()
}

/// Restrict to cells that still have available entries, then renormalize
pub fn restrict_weights<F>(weights: &WeightMap, has_available: F) -> WeightMap
where
    F: Fn(&str) -> bool,
{
    let filtered: WeightMap = weights
        .iter()
        .filter(|(key, value)| **value > 0.0 && has_available(key))
        .map(|(key, value)| (key.clone(), *value))
        .collect();
    normalize(filtered)
}

/// Cumulative-sum roulette draw
pub fn pick_weighted_cell<'a, R: Rng + ?Sized>(weights: &'a WeightMap, rng: &mut R) -> Option<&'a str> {
    let total: f64 = weights.values().sum();
    if !(total > 0.0) {
        return None;
    }
    let roll = rng.gen::<f64>() * total;
    let mut cumulative = 0.0;
    let mut last = None;
    for (key, value) in weights {
        cumulative += value;
        last = Some(key.as_str());
        if roll <= cumulative {
            return last;
        }
    }
    last
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coverage::CoverageCell;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn cell(key: &str, target: f64, count: f64, deficit: Option<f64>) -> CoverageCell {
        CoverageCell {
            cell_key: key.to_string(),
            target: Some(target),
            count,
            deficit,
            median_f1: None,
            cues_in_bounds_pct: None,
        }
    }

    #[test]
    fn test_complete_cell_gets_zero_weight() {
        let snapshot = CoverageSnapshot {
            cells: vec![cell("a:a:a:a", 10.0, 10.0, None), cell("b:b:b:b", 10.0, 12.0, None), cell("c:c:c:c", 10.0, 5.0, None)],
        };
        let weights = compute_allocator_weights(&snapshot);
        assert!(!weights.contains_key("a:a:a:a"));
        assert!(!weights.contains_key("b:b:b:b"));
        assert_eq!(weights.get("c:c:c:c"), Some(&1.0));
    }

    #[test]
    fn test_scores_and_boosts() {
        // pct 0.6: (0.4)^2 = 0.16, no boosts
        assert!((cell_score(10.0, 6.0, None).unwrap() - 0.16).abs() < 1e-12);
        // pct 0.2: (0.8)^2 * 1.25 = 0.8
        assert!((cell_score(10.0, 2.0, Some(8.0)).unwrap() - 0.8).abs() < 1e-12);
        // pct 0.0 with deficit 20: 1 * 1.25 * 1.15
        assert!((cell_score(20.0, 0.0, Some(20.0)).unwrap() - 1.4375).abs() < 1e-12);
        assert!(cell_score(0.0, 0.0, None).is_none());
        assert!(cell_score(-3.0, 0.0, None).is_none());
    }

    #[test]
    fn test_weights_normalized_and_duplicates_accumulate() {
        let snapshot = CoverageSnapshot {
            cells: vec![cell("a:a:a:a", 10.0, 6.0, None), cell("a:a:a:a", 10.0, 6.0, None), cell("b:b:b:b", 10.0, 6.0, None)],
        };
        let weights = compute_allocator_weights(&snapshot);
        let total: f64 = weights.values().sum();
        assert!((total - 1.0).abs() < 1e-12);
        assert!((weights["a:a:a:a"] - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_all_complete_yields_empty_map() {
        let snapshot = CoverageSnapshot {
            cells: vec![cell("a:a:a:a", 10.0, 10.0, None)],
        };
        assert!(compute_allocator_weights(&snapshot).is_empty());
    }

    #[test]
    fn test_restrict_renormalizes() {
        let mut weights = WeightMap::new();
        weights.insert("a".to_string(), 0.5);
        weights.insert("b".to_string(), 0.25);
        weights.insert("c".to_string(), 0.25);
        let restricted = restrict_weights(&weights, |key| key != "a");
        assert_eq!(restricted.len(), 2);
        assert!((restricted["b"] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_pick_respects_weights() {
        let mut weights = WeightMap::new();
        weights.insert("heavy".to_string(), 0.9);
        weights.insert("light".to_string(), 0.1);
        let mut rng = StdRng::seed_from_u64(7);
        let heavy = (0..2000)
            .filter(|_| pick_weighted_cell(&weights, &mut rng) == Some("heavy"))
            .count();
        assert!(heavy > 1650 && heavy < 1950, "heavy drawn {} times", heavy);
    }

    #[test]
    fn test_pick_empty() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(pick_weighted_cell(&WeightMap::new(), &mut rng), None);
    }
}
