//! Service configuration
//!
//! Every setting resolves environment → TOML → default through
//! [`SettingsResolver`]. Environment names follow the deployment's existing
//! variables (first non-empty alias wins); TOML keys are grouped by section.
//!
//! Store credentials are optional. Without them the service still answers
//! requests, degrading to the seed manifest.

use dqa_common::config::{LoggingConfig, SettingsResolver};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

use crate::lease::{ASSIGNMENT_ACTIVE_HOURS, MAX_ASSIGNMENT_ACTIVE_HOURS};

/// Remote store connection
#[derive(Debug, Clone, PartialEq)]
pub struct StoreSettings {
    pub url: Option<String>,
    pub key: Option<String>,
    /// Rows per paged item request
    pub page_chunk: usize,
    pub items_timeout: Duration,
    pub assignments_timeout: Duration,
    pub gold_timeout: Duration,
}

/// Optional prefill artifact columns of the item table
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrefillColumns {
    pub diarization_rttm: Option<String>,
    pub transcript_vtt: Option<String>,
    pub transcript_ctm: Option<String>,
    pub translation_vtt: Option<String>,
    pub code_switch_vtt: Option<String>,
}

impl PrefillColumns {
    /// Configured columns, in manifest order
    pub fn configured(&self) -> impl Iterator<Item = &str> {
        [
            &self.diarization_rttm,
            &self.transcript_vtt,
            &self.transcript_ctm,
            &self.translation_vtt,
            &self.code_switch_vtt,
        ]
        .into_iter()
        .filter_map(|c| c.as_deref())
    }
}

/// Item ("keep") table layout
#[derive(Debug, Clone, PartialEq)]
pub struct ItemTableSettings {
    pub table: String,
    pub file_column: String,
    pub decision_column: String,
    pub keep_value: String,
    pub audio_column: Option<String>,
    pub prefill: PrefillColumns,
}

impl ItemTableSettings {
    /// Projected column set for item reads
    pub fn projection(&self) -> Vec<String> {
        let mut columns = vec![self.file_column.clone(), self.decision_column.clone()];
        if let Some(audio) = &self.audio_column {
            columns.push(audio.clone());
        }
        columns.extend(self.prefill.configured().map(str::to_string));
        let mut unique = Vec::with_capacity(columns.len());
        for column in columns {
            if !unique.contains(&column) {
                unique.push(column);
            }
        }
        unique
    }
}

/// Media URL construction
#[derive(Debug, Clone, PartialEq)]
pub struct MediaSettings {
    pub media_base: Option<String>,
    pub audio_proxy_base: Option<String>,
    pub audio_proxy_ext: String,
}

/// Assignment (lease/history) table layout
#[derive(Debug, Clone, PartialEq)]
pub struct AssignmentSettings {
    pub table: String,
    pub file_column: String,
    pub user_column: String,
    pub time_column: String,
    pub pass_column: String,
    pub active_hours: f64,
}

/// Gold calibration source
#[derive(Debug, Clone, PartialEq)]
pub struct GoldSettings {
    pub table: Option<String>,
    pub file_column: String,
    pub rate: f64,
}

/// Coverage snapshot sources
#[derive(Debug, Clone, PartialEq)]
pub struct CoverageSettings {
    pub endpoint: Option<String>,
    pub snapshot_paths: Vec<PathBuf>,
    pub timeout: Duration,
}

/// Routing state and routing config sources
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingSettings {
    pub state_table: String,
    pub state_file_column: String,
    pub state_column: String,
    pub namespace: String,
    pub config_table: String,
    pub config_key: String,
    /// Zero re-reads the routing config on every request
    pub cache_ttl: Duration,
}

/// Complete service configuration
#[derive(Debug, Clone, PartialEq)]
pub struct AllocConfig {
    pub bind_address: String,
    pub store: StoreSettings,
    pub items: ItemTableSettings,
    pub media: MediaSettings,
    pub assignments: AssignmentSettings,
    pub gold: GoldSettings,
    pub coverage: CoverageSettings,
    pub routing: RoutingSettings,
    pub logging: LoggingConfig,
}

const SNAPSHOT_FILE: &str = "coverage_snapshot.json";

impl Default for AllocConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:5740".to_string(),
            store: StoreSettings {
                url: None,
                key: None,
                page_chunk: 1000,
                items_timeout: Duration::from_secs(20),
                assignments_timeout: Duration::from_secs(20),
                gold_timeout: Duration::from_secs(15),
            },
            items: ItemTableSettings {
                table: "keep".to_string(),
                file_column: "file_name".to_string(),
                decision_column: "decision".to_string(),
                keep_value: "keep".to_string(),
                audio_column: None,
                prefill: PrefillColumns::default(),
            },
            media: MediaSettings {
                media_base: None,
                audio_proxy_base: None,
                audio_proxy_ext: ".opus".to_string(),
            },
            assignments: AssignmentSettings {
                table: "clip_assignments_stage2".to_string(),
                file_column: "file_name".to_string(),
                user_column: "assigned_to".to_string(),
                time_column: "assigned_at".to_string(),
                pass_column: "pass_number".to_string(),
                active_hours: ASSIGNMENT_ACTIVE_HOURS,
            },
            gold: GoldSettings {
                table: None,
                file_column: "file_name".to_string(),
                rate: 0.0,
            },
            coverage: CoverageSettings {
                endpoint: None,
                snapshot_paths: default_snapshot_paths(),
                timeout: Duration::from_secs(5),
            },
            routing: RoutingSettings {
                state_table: "clip_routing_state".to_string(),
                state_file_column: "file_name".to_string(),
                state_column: "state".to_string(),
                namespace: "double_pass".to_string(),
                config_table: "remote_config".to_string(),
                config_key: "double_pass_routing".to_string(),
                cache_ttl: Duration::ZERO,
            },
            logging: LoggingConfig::default(),
        }
    }
}

fn default_snapshot_paths() -> Vec<PathBuf> {
    vec![
        PathBuf::from(SNAPSHOT_FILE),
        PathBuf::from("public").join(SNAPSHOT_FILE),
    ]
}

impl AllocConfig {
    /// Resolve every setting
    pub fn resolve(settings: &SettingsResolver) -> Self {
        let d = Self::default();

        let store = StoreSettings {
            url: settings
                .string(&["SUPABASE_URL", "NEXT_PUBLIC_SUPABASE_URL", "SUPABASE_PROJECT_URL"], "store.url")
                .map(|url| url.trim_end_matches('/').to_string()),
            key: settings.string(
                &[
                    "SUPABASE_SERVICE_ROLE_KEY",
                    "SUPABASE_SERVICE_KEY",
                    "SUPABASE_KEY",
                    "SUPABASE_ANON_KEY",
                ],
                "store.key",
            ),
            page_chunk: positive(
                "store.page_chunk",
                settings.parsed_or(&["DQA_PAGE_CHUNK"], "store.page_chunk", d.store.page_chunk),
                d.store.page_chunk,
            ),
            items_timeout: seconds(settings, "DQA_ITEMS_TIMEOUT_SECS", "store.items_timeout_secs", d.store.items_timeout),
            assignments_timeout: seconds(
                settings,
                "DQA_ASSIGNMENTS_TIMEOUT_SECS",
                "store.assignments_timeout_secs",
                d.store.assignments_timeout,
            ),
            gold_timeout: seconds(settings, "DQA_GOLD_TIMEOUT_SECS", "store.gold_timeout_secs", d.store.gold_timeout),
        };

        let items = ItemTableSettings {
            table: settings.string_or(&["SUPABASE_KEEP_TABLE", "KEEP_TABLE"], "items.table", &d.items.table),
            file_column: settings.string_or(&["SUPABASE_FILE_COL", "FILE_COL"], "items.file_column", &d.items.file_column),
            decision_column: settings.string_or(
                &["SUPABASE_DECISION_COL", "DECISION_COL"],
                "items.decision_column",
                &d.items.decision_column,
            ),
            keep_value: settings.string_or(&["SUPABASE_KEEP_VALUE", "KEEP_VALUE"], "items.keep_value", &d.items.keep_value),
            audio_column: settings.string(&["SUPABASE_KEEP_AUDIO_COL"], "items.audio_column"),
            prefill: PrefillColumns {
                diarization_rttm: settings.string(&["SUPABASE_KEEP_DIA_RTTM_COL", "PREFILL_DIA"], "items.prefill.diarization_rttm"),
                transcript_vtt: settings.string(&["SUPABASE_KEEP_TR_VTT_COL", "PREFILL_TR_VTT"], "items.prefill.transcript_vtt"),
                transcript_ctm: settings.string(&["SUPABASE_KEEP_TR_CTM_COL", "PREFILL_TR_CTM"], "items.prefill.transcript_ctm"),
                translation_vtt: settings.string(&["SUPABASE_KEEP_TL_VTT_COL", "PREFILL_TL_VTT"], "items.prefill.translation_vtt"),
                code_switch_vtt: settings.string(&["SUPABASE_KEEP_CS_VTT_COL", "PREFILL_CS_VTT"], "items.prefill.code_switch_vtt"),
            },
        };

        let media = MediaSettings {
            media_base: settings.string(&["BUNNY_KEEP_URL", "BUNNY_BASE", "BUNNY_PULL_BASE"], "media.base_url"),
            audio_proxy_base: settings.string(&["AUDIO_PROXY_BASE"], "media.audio_proxy_base"),
            audio_proxy_ext: settings.string_or(&["AUDIO_PROXY_EXT"], "media.audio_proxy_ext", &d.media.audio_proxy_ext),
        };

        let assignments = AssignmentSettings {
            table: settings.string_or(&["SUPABASE_ASSIGN_STAGE2_TABLE"], "assignments.table", &d.assignments.table),
            file_column: settings.string_or(
                &["SUPABASE_ASSIGN_STAGE2_FILE_COL"],
                "assignments.file_column",
                &d.assignments.file_column,
            ),
            user_column: settings.string_or(
                &["SUPABASE_ASSIGN_STAGE2_USER_COL"],
                "assignments.user_column",
                &d.assignments.user_column,
            ),
            time_column: settings.string_or(
                &["SUPABASE_ASSIGN_STAGE2_TIME_COL"],
                "assignments.time_column",
                &d.assignments.time_column,
            ),
            pass_column: settings.string_or(
                &["SUPABASE_ASSIGN_STAGE2_PASS_COL"],
                "assignments.pass_column",
                &d.assignments.pass_column,
            ),
            active_hours: active_hours(
                settings.parsed_or(&["ASSIGNMENT_ACTIVE_HOURS"], "assignments.active_hours", d.assignments.active_hours),
                d.assignments.active_hours,
            ),
        };

        let gold_rate: f64 = settings.parsed_or(&["GOLD_INJECTION_RATE"], "gold.rate", d.gold.rate);
        let gold = GoldSettings {
            table: settings.string(&["SUPABASE_GOLD_TABLE"], "gold.table"),
            file_column: settings.string(&["SUPABASE_GOLD_FILE_COL"], "gold.file_column").unwrap_or_else(|| items.file_column.clone()),
            rate: if (0.0..=1.0).contains(&gold_rate) {
                gold_rate
            } else {
                warn!("gold.rate: {} outside [0, 1], gold injection disabled", gold_rate);
                0.0
            },
        };

        let coverage = CoverageSettings {
            endpoint: coverage_endpoint(settings),
            snapshot_paths: snapshot_paths(settings),
            timeout: seconds(settings, "COVERAGE_TIMEOUT_SECS", "coverage.timeout_secs", d.coverage.timeout),
        };

        let routing = RoutingSettings {
            state_table: settings.string_or(&["ROUTING_STATE_TABLE"], "routing.state_table", &d.routing.state_table),
            state_file_column: settings
                .string(&["ROUTING_STATE_FILE_COL"], "routing.state_file_column")
                .unwrap_or_else(|| items.file_column.clone()),
            state_column: settings.string_or(&["ROUTING_STATE_COL"], "routing.state_column", &d.routing.state_column),
            namespace: settings.string_or(&["ROUTING_STATE_NAMESPACE"], "routing.namespace", &d.routing.namespace),
            config_table: settings.string_or(&["REMOTE_CONFIG_TABLE"], "routing.config_table", &d.routing.config_table),
            config_key: settings.string_or(&["ROUTING_CONFIG_KEY"], "routing.config_key", &d.routing.config_key),
            cache_ttl: seconds(settings, "ROUTING_CONFIG_CACHE_SECS", "routing.cache_ttl_secs", d.routing.cache_ttl),
        };

        Self {
            bind_address: settings.string_or(&["DQA_BIND_ADDRESS"], "server.bind_address", &d.bind_address),
            store,
            items,
            media,
            assignments,
            gold,
            coverage,
            routing,
            logging: settings.logging(),
        }
    }

    /// Store URL and key, when both are configured
    pub fn store_credentials(&self) -> Option<(&str, &str)> {
        Some((self.store.url.as_deref()?, self.store.key.as_deref()?))
    }
}

fn positive<T>(key: &str, value: T, default: T) -> T
where
    T: PartialOrd + Default + std::fmt::Display + Copy,
{
    if value > T::default() {
        value
    } else {
        warn!("{}: {} must be positive, using default ({})", key, value, default);
        default
    }
}

fn active_hours(value: f64, default: f64) -> f64 {
    if value.is_finite() && value > 0.0 && value <= MAX_ASSIGNMENT_ACTIVE_HOURS {
        value
    } else {
        warn!(
            "assignments.active_hours: {} out of range (0.0, {}], using default ({})",
            value, MAX_ASSIGNMENT_ACTIVE_HOURS, default
        );
        default
    }
}

fn seconds(settings: &SettingsResolver, env: &str, toml_key: &str, default: Duration) -> Duration {
    let secs = settings.parsed_or(&[env], toml_key, default.as_secs_f64());
    if secs.is_finite() && secs >= 0.0 {
        Duration::from_secs_f64(secs)
    } else {
        warn!("{}: {} is not a valid duration, using default", toml_key, secs);
        default
    }
}

fn coverage_endpoint(settings: &SettingsResolver) -> Option<String> {
    if let Some(endpoint) = settings.string(&["COVERAGE_ENDPOINT_URL"], "coverage.endpoint") {
        return Some(endpoint);
    }
    settings
        .string(&["COVERAGE_BASE_URL", "PUBLIC_BASE_URL", "SITE_URL"], "coverage.base_url")
        .map(|base| format!("{}/api/coverage", base.trim_end_matches('/')))
}

fn snapshot_paths(settings: &SettingsResolver) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(path) = settings.string(&["COVERAGE_SNAPSHOT_PATH"], "coverage.snapshot_path") {
        paths.push(PathBuf::from(path));
    }
    if let Some(dir) = settings.string(&["COVERAGE_SNAPSHOT_DIR"], "coverage.snapshot_dir") {
        paths.push(PathBuf::from(dir).join(SNAPSHOT_FILE));
    }
    paths.extend(default_snapshot_paths());
    paths
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver(src: &str) -> SettingsResolver {
        SettingsResolver::with_table(toml::from_str(src).unwrap())
    }

    #[test]
    fn test_projection_deduplicates() {
        let mut items = AllocConfig::default().items;
        items.audio_column = Some("audio_url".to_string());
        items.prefill.transcript_vtt = Some("tr_vtt".to_string());
        items.prefill.translation_vtt = Some("tr_vtt".to_string());
        assert_eq!(items.projection(), vec!["file_name", "decision", "audio_url", "tr_vtt"]);
    }

    #[test]
    fn test_toml_sections() {
        let config = AllocConfig::resolve(&resolver(
            r#"
            [store]
            url = "https://db.example/"
            key = "secret"
            page_chunk = 0

            [items]
            file_column = "clip"

            [coverage]
            base_url = "https://site.example/"
            snapshot_dir = "/var/dqa"

            [gold]
            table = "gold_clips"
            rate = 1.5

            [routing]
            cache_ttl_secs = 30
            "#,
        ));
        assert_eq!(config.store_credentials(), Some(("https://db.example", "secret")));
        assert_eq!(config.store.page_chunk, 1000);
        assert_eq!(config.gold.file_column, "clip");
        assert_eq!(config.gold.rate, 0.0);
        assert_eq!(config.routing.state_file_column, "clip");
        assert_eq!(config.routing.cache_ttl, Duration::from_secs(30));
        assert_eq!(config.coverage.endpoint.as_deref(), Some("https://site.example/api/coverage"));
        assert_eq!(config.coverage.snapshot_paths[0], PathBuf::from("/var/dqa/coverage_snapshot.json"));
    }

    #[test]
    fn test_active_hours_bounded() {
        for raw in ["1e10", "inf", "-2", "0", "NaN"] {
            let config = AllocConfig::resolve(&resolver(&format!("[assignments]\nactive_hours = \"{}\"", raw)));
            assert_eq!(config.assignments.active_hours, ASSIGNMENT_ACTIVE_HOURS, "{}", raw);
        }
        let config = AllocConfig::resolve(&resolver("[assignments]\nactive_hours = 12.5"));
        assert_eq!(config.assignments.active_hours, 12.5);
    }

    #[test]
    fn test_missing_credentials() {
        let config = AllocConfig::resolve(&resolver("[store]\nurl = \"https://db.example\""));
        assert_eq!(config.store_credentials(), None);
    }
}
