//! Double-pass QA router
//!
//! Gates each selected item on its routing state, then decides whether an
//! item with exactly one prior pass is re-issued for an independent second
//! pass. Items that lose the draw or hit the fairness cap are dropped for
//! this cycle; they are never demoted to ordinary first-pass work.

use dqa_common::RoutingConfig;
use rand::Rng;
use serde::Serialize;

use super::fairness::AnnotatorLedger;
use super::state::{ItemRoutingState, RoutingStage};
use crate::coverage::CoverageCell;
use crate::model::MAX_PASSES_PER_ASSET;

/// QA health of the cell an item is routed through
///
/// A missing metric never triggers a boost.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CellHealth {
    pub coverage_pct: Option<f64>,
    pub median_f1: Option<f64>,
    pub cues_in_bounds_pct: Option<f64>,
}

impl From<&CoverageCell> for CellHealth {
    fn from(cell: &CoverageCell) -> Self {
        Self {
            coverage_pct: cell.completion_ratio(),
            median_f1: cell.median_f1,
            cues_in_bounds_pct: cell.cues_in_bounds_pct,
        }
    }
}

/// Probability of issuing a second pass, in `[0, p_max]`
pub fn double_pass_probability(config: &RoutingConfig, health: &CellHealth) -> f64 {
    let below = |value: Option<f64>, threshold: f64| value.is_some_and(|v| v < threshold);

    let mut p = config.p_base;
    if below(health.coverage_pct, config.coverage_boost_threshold) {
        p *= config.coverage_boost_factor;
    }
    if below(health.median_f1, config.qa_boost_f1_threshold)
        || below(health.cues_in_bounds_pct, config.qa_boost_cue_in_bounds_threshold)
    {
        p *= config.qa_boost_factor;
    }

    let p_max = config.p_max.max(0.0);
    if p.is_nan() {
        return 0.0;
    }
    p.clamp(0.0, p_max)
}

/// Why an item was left out of this cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Locked or terminally reviewed
    Locked,
    /// Annotator already holds an assignment for the item
    AlreadySeen,
    /// Item reached the pass limit
    PassesExhausted,
    /// Annotator at the double-pass cap
    FairnessCap,
    /// Probability draw failed
    LostDraw,
}

/// Result of the state gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    FirstPass,
    /// Exactly one prior pass by someone else
    SecondPassCandidate,
    Skip(SkipReason),
}

/// Outcome of routing a second-pass candidate
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RouteDecision {
    DoublePass { pass_number: u8, probability: f64 },
    Skip(SkipReason),
}

/// Gate an item on its routing state
///
/// `already_seen` folds in assignment rows outside the routing record.
pub fn gate(state: &ItemRoutingState, annotator_id: &str, already_seen: bool) -> Gate {
    let stage = state.stage();
    if stage == RoutingStage::Locked {
        return Gate::Skip(SkipReason::Locked);
    }
    if already_seen || state.has_annotator(annotator_id) {
        return Gate::Skip(SkipReason::AlreadySeen);
    }
    match stage {
        RoutingStage::Unassigned => Gate::FirstPass,
        RoutingStage::Pass1Assigned => Gate::SecondPassCandidate,
        RoutingStage::Pass2Assigned | RoutingStage::Locked => Gate::Skip(SkipReason::PassesExhausted),
    }
}

/// Routes second-pass candidates for one annotator
pub struct DoublePassRouter<'a> {
    config: &'a RoutingConfig,
    annotator_id: &'a str,
}

impl<'a> DoublePassRouter<'a> {
    pub fn new(config: &'a RoutingConfig, annotator_id: &'a str) -> Self {
        Self {
            config,
            annotator_id,
        }
    }

    /// Decide one candidate, recording a grant in the ledger
    pub fn route<R: Rng + ?Sized>(
        &self,
        state: &ItemRoutingState,
        health: &CellHealth,
        ledger: &mut AnnotatorLedger,
        rng: &mut R,
    ) -> RouteDecision {
        if !ledger.admits(self.annotator_id) {
            return RouteDecision::Skip(SkipReason::FairnessCap);
        }

        let probability = double_pass_probability(self.config, health);
        if rng.gen::<f64>() >= probability {
            return RouteDecision::Skip(SkipReason::LostDraw);
        }

        ledger.record(self.annotator_id, true);
        let prior = state.pass_count().min(MAX_PASSES_PER_ASSET - 1);
        RouteDecision::DoublePass {
            pass_number: (prior + 1) as u8,
            probability,
        }
    }
}
