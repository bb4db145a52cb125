//! Integration tests for configuration resolution and graceful degradation
//!
//! Tests that touch process environment variables are marked #[serial]
//! so they never run in parallel with each other.

use dqa_common::config::{resolve_config_path, SettingsResolver};
use serial_test::serial;
use std::env;
use std::io::Write;
use tempfile::{NamedTempFile, TempDir};

fn write_toml(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
#[serial]
fn test_env_overrides_toml() {
    let file = write_toml(
        r#"
        [store]
        url = "https://from-toml.example"
        "#,
    );
    let resolver = SettingsResolver::load(Some(file.path()));

    env::set_var("DQA_TEST_STORE_URL", "https://from-env.example");
    let resolved = resolver.string(&["DQA_TEST_STORE_URL"], "store.url");
    env::remove_var("DQA_TEST_STORE_URL");

    assert_eq!(resolved, Some("https://from-env.example".to_string()));
}

#[test]
#[serial]
fn test_first_non_empty_alias_wins() {
    env::set_var("DQA_TEST_ALIAS_A", "  ");
    env::set_var("DQA_TEST_ALIAS_B", "second");
    let resolver = SettingsResolver::env_only();
    let resolved = resolver.string(&["DQA_TEST_ALIAS_A", "DQA_TEST_ALIAS_B"], "unused");
    env::remove_var("DQA_TEST_ALIAS_A");
    env::remove_var("DQA_TEST_ALIAS_B");

    assert_eq!(resolved, Some("second".to_string()));
}

#[test]
#[serial]
fn test_toml_used_when_env_missing() {
    env::remove_var("DQA_TEST_ACTIVE_HOURS");
    let file = write_toml(
        r#"
        [assignments]
        active_hours = 3
        "#,
    );
    let resolver = SettingsResolver::load(Some(file.path()));
    assert_eq!(
        resolver.parsed_or(&["DQA_TEST_ACTIVE_HOURS"], "assignments.active_hours", 6.0f64),
        3.0
    );
}

#[test]
fn test_missing_file_degrades_to_env_only() {
    let dir = TempDir::new().unwrap();
    let resolver = SettingsResolver::load(Some(&dir.path().join("absent.toml")));
    assert_eq!(resolver.string_or(&["DQA_TEST_NEVER_SET"], "store.url", "none"), "none");
}

#[test]
fn test_malformed_file_degrades_to_env_only() {
    let file = write_toml("this is = = not toml");
    let resolver = SettingsResolver::load(Some(file.path()));
    assert_eq!(resolver.parsed_or(&["DQA_TEST_NEVER_SET"], "store.page_chunk", 1000usize), 1000);
}

#[test]
#[serial]
fn test_config_path_priority() {
    env::set_var("DQA_TEST_CONFIG", "/tmp/from-env.toml");

    let cli = resolve_config_path(Some("/tmp/from-cli.toml"), "DQA_TEST_CONFIG", "dqa-alloc.toml");
    assert_eq!(cli.unwrap().to_string_lossy(), "/tmp/from-cli.toml");

    let from_env = resolve_config_path(None, "DQA_TEST_CONFIG", "dqa-alloc.toml");
    assert_eq!(from_env.unwrap().to_string_lossy(), "/tmp/from-env.toml");

    env::remove_var("DQA_TEST_CONFIG");
}
