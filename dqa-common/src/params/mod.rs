//! Double-pass routing parameters
//!
//! Tunables that drive second-pass QA routing. A `RoutingConfig` is an
//! explicit value: it is loaded per request (or through a caller-owned
//! cache with a TTL) and passed into the allocator. There is no process-wide
//! singleton.
//!
//! # Loading
//!
//! Each key is parsed and validated independently against its
//! [`ParamMetadata`]. A missing, mistyped or out-of-range key logs a warning
//! and keeps its default; the remaining keys still load. A source that is not
//! a JSON object yields full defaults.
//!
//! ```rust
//! use dqa_common::params::RoutingConfig;
//! use serde_json::json;
//!
//! let config = RoutingConfig::from_json(&json!({ "p_base": 0.2, "p_max": "nope" }));
//! assert_eq!(config.p_base, 0.2);
//! assert_eq!(config.p_max, RoutingConfig::default().p_max);
//! ```

use serde::Serialize;
use tracing::warn;

mod metadata;
#[cfg(test)]
mod tests;

/// Routing tunables for second-pass QA routing
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RoutingConfig {
    /// Base probability of issuing a second pass
    ///
    /// Valid range: [0.0, 1.0]
    /// Default: 0.15
    pub p_base: f64,

    /// Cell completion ratio below which the coverage boost applies
    ///
    /// Valid range: [0.0, 1.0]
    /// Default: 0.5
    pub coverage_boost_threshold: f64,

    /// Multiplier applied when the cell is under-covered
    ///
    /// Valid range: [1.0, 10.0]
    /// Default: 1.5
    pub coverage_boost_factor: f64,

    /// Median F1 below which the QA boost applies
    ///
    /// Valid range: [0.0, 1.0]
    /// Default: 0.8
    pub qa_boost_f1_threshold: f64,

    /// Cues-in-bounds percentage below which the QA boost applies
    ///
    /// Valid range: [0.0, 1.0]
    /// Default: 0.85
    pub qa_boost_cue_in_bounds_threshold: f64,

    /// Multiplier applied when cell QA metrics are weak
    ///
    /// Valid range: [1.0, 10.0]
    /// Default: 1.5
    pub qa_boost_factor: f64,

    /// Upper clamp for the boosted probability
    ///
    /// Valid range: [0.0, 1.0]
    /// Default: 0.4
    pub p_max: f64,

    /// Maximum share of an annotator's recent assignments that may be second passes
    ///
    /// Valid range: [0.0, 1.0]
    /// Default: 0.3
    pub annotator_daily_cap: f64,

    /// Lookback window for the per-annotator fairness ratio (hours)
    ///
    /// Valid range: (0.0, 720.0]
    /// Default: 24
    pub annotator_lookback_hours: f64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            p_base: 0.15,
            coverage_boost_threshold: 0.5,
            coverage_boost_factor: 1.5,
            qa_boost_f1_threshold: 0.8,
            qa_boost_cue_in_bounds_threshold: 0.85,
            qa_boost_factor: 1.5,
            p_max: 0.4,
            annotator_daily_cap: 0.3,
            annotator_lookback_hours: 24.0,
        }
    }
}

impl RoutingConfig {
    /// Build a config from a JSON record, defaulting keys individually
    pub fn from_json(value: &serde_json::Value) -> Self {
        let mut config = Self::default();

        let Some(object) = value.as_object() else {
            warn!("Routing config is not an object, using defaults");
            return config;
        };

        for meta in Self::metadata() {
            let Some(raw) = object.get(meta.key) else {
                continue;
            };
            let text = match raw {
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::String(s) => s.trim().to_string(),
                serde_json::Value::Null => continue,
                other => {
                    warn!("{}: unsupported value {}, using default ({})", meta.key, other, meta.default_value);
                    continue;
                }
            };
            if let Err(e) = config.set(meta.key, &text) {
                warn!("{}, using default ({})", e, meta.default_value);
            }
        }

        config
    }

    /// Validate and update one key from its textual form
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), String> {
        let meta = Self::metadata()
            .iter()
            .find(|m| m.key == key)
            .ok_or_else(|| format!("{}: unknown routing parameter", key))?;

        (meta.validator)(value)?;
        // Validator accepted the text, so it parses
        let v: f64 = value
            .parse()
            .map_err(|_| format!("{}: invalid number format", key))?;

        match key {
            "p_base" => self.p_base = v,
            "coverage_boost_threshold" => self.coverage_boost_threshold = v,
            "coverage_boost_factor" => self.coverage_boost_factor = v,
            "qa_boost_f1_threshold" => self.qa_boost_f1_threshold = v,
            "qa_boost_cue_in_bounds_threshold" => self.qa_boost_cue_in_bounds_threshold = v,
            "qa_boost_factor" => self.qa_boost_factor = v,
            "p_max" => self.p_max = v,
            "annotator_daily_cap" => self.annotator_daily_cap = v,
            "annotator_lookback_hours" => self.annotator_lookback_hours = v,
            _ => return Err(format!("{}: unknown routing parameter", key)),
        }
        Ok(())
    }

    /// Fairness lookback window as a chrono duration
    pub fn lookback(&self) -> chrono::Duration {
        crate::time::hours(self.annotator_lookback_hours)
    }
}

// ============================================================================
// Parameter Metadata
// ============================================================================

/// Metadata for a single routing parameter
///
/// Single place that knows a parameter's name, default, range and
/// validation. Used by [`RoutingConfig::from_json`] and
/// [`RoutingConfig::set`].
///
/// Validators have signature `fn(&str) -> Result<(), String>` and report
/// errors as `"{param_name}: {specific_reason}"`.
pub struct ParamMetadata {
    pub key: &'static str,
    pub data_type: &'static str,
    pub default_value: &'static str,
    pub description: &'static str,
    pub validation_range: &'static str,
    pub validator: fn(&str) -> Result<(), String>,
}
