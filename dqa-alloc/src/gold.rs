//! Gold calibration item injection

use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashSet;

/// Substitutes offered items with calibration items at a fixed rate
///
/// Each gold identifier is used at most once per manifest and never
/// collides with an item already in the manifest.
#[derive(Debug, Clone, Default)]
pub struct GoldInjector {
    rate: f64,
    pool: Vec<String>,
    taken: HashSet<String>,
}

impl GoldInjector {
    pub fn new(rate: f64, pool: Vec<String>) -> Self {
        let mut seen = HashSet::new();
        let pool = pool
            .into_iter()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty() && seen.insert(id.clone()))
            .collect();
        Self {
            rate: if rate.is_finite() { rate.clamp(0.0, 1.0) } else { 0.0 },
            pool,
            taken: HashSet::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.rate > 0.0 && !self.pool.is_empty()
    }

    /// Mark identifiers that must not be drawn as gold
    pub fn exclude<'a, I>(&mut self, ids: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.taken.extend(ids.into_iter().map(str::to_string));
    }

    /// Roll for one slot; returns the gold identifier that replaces it
    pub fn draw<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<String> {
        if !self.is_active() || rng.gen::<f64>() >= self.rate {
            return None;
        }
        let candidates: Vec<&String> = self.pool.iter().filter(|id| !self.taken.contains(*id)).collect();
        let chosen = (*candidates.choose(rng)?).clone();
        self.taken.insert(chosen.clone());
        Some(chosen)
    }
}
