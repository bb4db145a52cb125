use super::*;
use serde_json::json;

#[test]
fn test_defaults_match_metadata() {
    let config = RoutingConfig::default();
    for meta in RoutingConfig::metadata() {
        let mut probe = RoutingConfig::default();
        probe.set(meta.key, meta.default_value).unwrap();
        assert_eq!(probe, config, "default for {} disagrees with metadata", meta.key);
    }
}

#[test]
fn test_metadata_covers_nine_parameters() {
    assert_eq!(RoutingConfig::metadata().len(), 9);
}

#[test]
fn test_from_json_full_record() {
    let config = RoutingConfig::from_json(&json!({
        "p_base": 0.15,
        "coverage_boost_threshold": 0.5,
        "coverage_boost_factor": 1.5,
        "qa_boost_f1_threshold": 0.8,
        "qa_boost_cue_in_bounds_threshold": 0.85,
        "qa_boost_factor": 1.5,
        "p_max": 0.4,
        "annotator_daily_cap": 0.5,
        "annotator_lookback_hours": 12
    }));
    assert_eq!(config.annotator_daily_cap, 0.5);
    assert_eq!(config.annotator_lookback_hours, 12.0);
    assert_eq!(config.lookback(), chrono::Duration::hours(12));
}

#[test]
fn test_missing_keys_default_individually() {
    let config = RoutingConfig::from_json(&json!({ "p_base": 0.3 }));
    assert_eq!(config.p_base, 0.3);
    assert_eq!(config.p_max, 0.4);
    assert_eq!(config.qa_boost_factor, 1.5);
}

#[test]
fn test_numeric_strings_accepted() {
    let config = RoutingConfig::from_json(&json!({ "p_max": " 0.6 " }));
    assert_eq!(config.p_max, 0.6);
}

#[test]
fn test_invalid_key_keeps_default_others_load() {
    let config = RoutingConfig::from_json(&json!({
        "p_base": 7.0,
        "coverage_boost_factor": 0.5,
        "qa_boost_factor": [1, 2],
        "p_max": 0.35
    }));
    assert_eq!(config.p_base, 0.15);
    assert_eq!(config.coverage_boost_factor, 1.5);
    assert_eq!(config.qa_boost_factor, 1.5);
    assert_eq!(config.p_max, 0.35);
}

#[test]
fn test_non_object_yields_defaults() {
    assert_eq!(RoutingConfig::from_json(&json!("garbage")), RoutingConfig::default());
    assert_eq!(RoutingConfig::from_json(&json!(null)), RoutingConfig::default());
}

#[test]
fn test_set_unknown_key_rejected() {
    let mut config = RoutingConfig::default();
    assert!(config.set("p_min", "0.1").is_err());
}

#[test]
fn test_lookback_validator_rejects_zero() {
    let mut config = RoutingConfig::default();
    assert!(config.set("annotator_lookback_hours", "0").is_err());
    assert_eq!(config.annotator_lookback_hours, 24.0);
}
