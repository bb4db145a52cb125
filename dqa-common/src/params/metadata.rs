//! Routing parameter metadata definitions

use super::{ParamMetadata, RoutingConfig};

fn unit_interval(key: &str, s: &str) -> Result<(), String> {
    let v: f64 = s
        .parse()
        .map_err(|_| format!("{}: invalid number format", key))?;
    if !v.is_finite() || !(0.0..=1.0).contains(&v) {
        return Err(format!("{}: value {} out of range [0.0, 1.0]", key, v));
    }
    Ok(())
}

fn boost_factor(key: &str, s: &str) -> Result<(), String> {
    let v: f64 = s
        .parse()
        .map_err(|_| format!("{}: invalid number format", key))?;
    // Boosts multiply and must never shrink the probability
    if !v.is_finite() || !(1.0..=10.0).contains(&v) {
        return Err(format!("{}: value {} out of range [1.0, 10.0]", key, v));
    }
    Ok(())
}

impl RoutingConfig {
    /// Get metadata for all routing parameters
    ///
    /// ```rust
    /// # use dqa_common::params::RoutingConfig;
    /// let meta = RoutingConfig::metadata()
    ///     .iter()
    ///     .find(|m| m.key == "p_max")
    ///     .unwrap();
    ///
    /// assert!((meta.validator)("0.4").is_ok());
    /// assert!((meta.validator)("1.5").is_err());
    /// ```
    pub fn metadata() -> &'static [ParamMetadata] {
        &[
            ParamMetadata {
                key: "p_base",
                data_type: "f64",
                default_value: "0.15",
                description: "Base second-pass probability",
                validation_range: "0.0-1.0",
                validator: |s| unit_interval("p_base", s),
            },
            ParamMetadata {
                key: "coverage_boost_threshold",
                data_type: "f64",
                default_value: "0.5",
                description: "Completion ratio below which coverage boost applies",
                validation_range: "0.0-1.0",
                validator: |s| unit_interval("coverage_boost_threshold", s),
            },
            ParamMetadata {
                key: "coverage_boost_factor",
                data_type: "f64",
                default_value: "1.5",
                description: "Coverage boost multiplier",
                validation_range: "1.0-10.0",
                validator: |s| boost_factor("coverage_boost_factor", s),
            },
            ParamMetadata {
                key: "qa_boost_f1_threshold",
                data_type: "f64",
                default_value: "0.8",
                description: "Median F1 below which QA boost applies",
                validation_range: "0.0-1.0",
                validator: |s| unit_interval("qa_boost_f1_threshold", s),
            },
            ParamMetadata {
                key: "qa_boost_cue_in_bounds_threshold",
                data_type: "f64",
                default_value: "0.85",
                description: "Cues-in-bounds share below which QA boost applies",
                validation_range: "0.0-1.0",
                validator: |s| unit_interval("qa_boost_cue_in_bounds_threshold", s),
            },
            ParamMetadata {
                key: "qa_boost_factor",
                data_type: "f64",
                default_value: "1.5",
                description: "QA boost multiplier",
                validation_range: "1.0-10.0",
                validator: |s| boost_factor("qa_boost_factor", s),
            },
            ParamMetadata {
                key: "p_max",
                data_type: "f64",
                default_value: "0.4",
                description: "Upper clamp for second-pass probability",
                validation_range: "0.0-1.0",
                validator: |s| unit_interval("p_max", s),
            },
            ParamMetadata {
                key: "annotator_daily_cap",
                data_type: "f64",
                default_value: "0.3",
                description: "Max rolling share of second passes per annotator",
                validation_range: "0.0-1.0",
                validator: |s| unit_interval("annotator_daily_cap", s),
            },
            ParamMetadata {
                key: "annotator_lookback_hours",
                data_type: "f64",
                default_value: "24",
                description: "Fairness ratio lookback window (hours)",
                validation_range: "(0.0, 720.0]",
                validator: |s| {
                    let v: f64 = s
                        .parse()
                        .map_err(|_| "annotator_lookback_hours: invalid number format".to_string())?;
                    if !v.is_finite() || v <= 0.0 || v > 720.0 {
                        return Err(format!(
                            "annotator_lookback_hours: value {} out of range (0.0, 720.0]",
                            v
                        ));
                    }
                    Ok(())
                },
            },
        ]
    }
}
