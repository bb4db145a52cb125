//! Task manifest returned to the annotator
//!
//! Thin assembly layer: turns routed selections into manifest items with
//! resolved media URLs and prefill references, and carries the diagnostics
//! block describing how the request was served.

use serde::Serialize;

use crate::cells::{GOLD_CELL_KEY, UNKNOWN_CELL_KEY};
use crate::config::{MediaSettings, PrefillColumns};
use crate::model::ItemRow;

/// Identifier of the fixed seed item
pub const SEED_ASSET_ID: &str = "sample-001";

/// Media of the fixed seed item
pub const SEED_MEDIA_URL: &str = "/public/sample.mp4";

const LANGUAGE_HINT: &str = "ar";

/// Full manifest
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Manifest {
    pub annotator_id: String,
    pub stage: u8,
    pub items: Vec<ManifestItem>,
    pub diagnostics: Diagnostics,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct Media {
    pub audio_proxy_url: Option<String>,
    pub video_hls_url: Option<String>,
    pub poster_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct Prefill {
    pub diarization_rttm_url: Option<String>,
    pub transcript_vtt_url: Option<String>,
    pub transcript_ctm_url: Option<String>,
    pub translation_vtt_url: Option<String>,
    pub code_switch_vtt_url: Option<String>,
}

impl Prefill {
    /// Prefill references of an item row
    pub fn from_row(row: &ItemRow, columns: &PrefillColumns) -> Self {
        let get = |column: &Option<String>| {
            column
                .as_deref()
                .and_then(|c| row.text(c))
                .map(str::to_string)
        };
        Self {
            diarization_rttm_url: get(&columns.diarization_rttm),
            transcript_vtt_url: get(&columns.transcript_vtt),
            transcript_ctm_url: get(&columns.transcript_ctm),
            translation_vtt_url: get(&columns.translation_vtt),
            code_switch_vtt_url: get(&columns.code_switch_vtt),
        }
    }
}

/// One task in the manifest
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ManifestItem {
    pub asset_id: String,
    pub media: Media,
    pub prefill: Prefill,
    pub is_gold: bool,
    pub stage0_status: String,
    pub stage1_status: String,
    pub language_hint: String,
    pub notes: Option<String>,
    pub assigned_cell: String,
    pub double_pass_target: bool,
    pub pass_number: u8,
    pub previous_annotators: Vec<String>,
}

impl ManifestItem {
    /// Ordinary or double-pass task for a store item
    pub fn task(asset_id: &str, media: Media, prefill: Prefill, assigned_cell: String) -> Self {
        Self {
            asset_id: asset_id.to_string(),
            media,
            prefill,
            is_gold: false,
            stage0_status: "validated".to_string(),
            stage1_status: "validated".to_string(),
            language_hint: LANGUAGE_HINT.to_string(),
            notes: None,
            assigned_cell,
            double_pass_target: false,
            pass_number: 1,
            previous_annotators: Vec::new(),
        }
    }

    /// Calibration task; never routed, never leased
    pub fn gold(asset_id: &str, media: Media) -> Self {
        Self {
            is_gold: true,
            ..Self::task(asset_id, media, Prefill::default(), GOLD_CELL_KEY.to_string())
        }
    }

    /// Fixed placeholder item served when nothing else is available
    pub fn seed() -> Self {
        Self {
            stage0_status: "seed".to_string(),
            stage1_status: "seed".to_string(),
            ..Self::task(
                SEED_ASSET_ID,
                Media {
                    audio_proxy_url: Some(SEED_MEDIA_URL.to_string()),
                    ..Default::default()
                },
                Prefill::default(),
                UNKNOWN_CELL_KEY.to_string(),
            )
        }
    }
}

/// Resolves media URLs for an asset
#[derive(Debug, Clone)]
pub struct MediaResolver {
    settings: MediaSettings,
    audio_column: Option<String>,
}

impl MediaResolver {
    pub fn new(settings: MediaSettings, audio_column: Option<String>) -> Self {
        Self {
            settings,
            audio_column,
        }
    }

    /// Media for `file`; `row` supplies the audio column when present
    pub fn resolve(&self, file: &str, row: Option<&ItemRow>) -> Media {
        let relative = file.trim_start_matches('/');
        let media_url = match &self.settings.media_base {
            Some(base) => format!("{}/{}", base.trim_end_matches('/'), relative),
            None => file.to_string(),
        };

        let column_audio = self
            .audio_column
            .as_deref()
            .zip(row)
            .and_then(|(column, row)| row.text(column))
            .map(str::to_string);

        let audio_url = match (column_audio, &self.settings.audio_proxy_base) {
            (Some(url), _) => url,
            (None, Some(base)) => {
                let stem = file.rsplit_once('.').map_or(file, |(stem, _)| stem);
                let ext = &self.settings.audio_proxy_ext;
                let ext = if ext.starts_with('.') {
                    ext.clone()
                } else {
                    format!(".{}", ext)
                };
                format!("{}/{}{}", base.trim_end_matches('/'), stem.trim_start_matches('/'), ext)
            }
            (None, None) => format!("/api/proxy_audio?file={}", urlencoding::encode(file)),
        };

        Media {
            audio_proxy_url: Some(audio_url),
            video_hls_url: media_url.ends_with(".m3u8").then(|| media_url.clone()),
            poster_url: None,
        }
    }
}

/// How the request was served
///
/// Store fields describe the item query; counters describe what the engine
/// did with the pool.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct Diagnostics {
    pub contacted_store: bool,
    pub table: Option<String>,
    pub error_type: Option<&'static str>,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing_columns: Vec<String>,
    pub keep_rows: usize,
    pub skipped_missing_transcript: usize,
    pub available: usize,
    pub leased: usize,
    pub weighted_selections: usize,
    pub fallback_selections: usize,
    pub double_pass_offers: usize,
    pub double_pass_skipped: usize,
    pub gold_injected: usize,
    pub lease_write_failed: bool,
    pub coverage_loaded: bool,
    pub routing_config_source: &'static str,
    pub seeded: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn settings(base: Option<&str>, proxy: Option<&str>, ext: &str) -> MediaSettings {
        MediaSettings {
            media_base: base.map(str::to_string),
            audio_proxy_base: proxy.map(str::to_string),
            audio_proxy_ext: ext.to_string(),
        }
    }

    #[test]
    fn test_audio_column_wins() {
        let resolver = MediaResolver::new(
            settings(Some("https://cdn.example/keep/"), Some("https://audio.example"), ".opus"),
            Some("audio_url".to_string()),
        );
        let row = ItemRow::from_json(json!({"file_name": "a.wav", "audio_url": "https://x/a.mp3"}), "file_name").unwrap();
        let media = resolver.resolve("a.wav", Some(&row));
        assert_eq!(media.audio_proxy_url.as_deref(), Some("https://x/a.mp3"));
        assert_eq!(media.video_hls_url, None);
    }

    #[test]
    fn test_proxy_base_uses_stem_and_extension() {
        let resolver = MediaResolver::new(settings(None, Some("https://audio.example/"), "mp3"), None);
        let media = resolver.resolve("clips/a.b.wav", None);
        assert_eq!(media.audio_proxy_url.as_deref(), Some("https://audio.example/clips/a.b.mp3"));
    }

    #[test]
    fn test_proxy_route_fallback_is_encoded() {
        let resolver = MediaResolver::new(settings(None, None, ".opus"), None);
        let media = resolver.resolve("my clip&1.wav", None);
        assert_eq!(
            media.audio_proxy_url.as_deref(),
            Some("/api/proxy_audio?file=my%20clip%261.wav")
        );
    }

    #[test]
    fn test_hls_only_for_playlists() {
        let resolver = MediaResolver::new(settings(Some("https://cdn.example"), None, ".opus"), None);
        let media = resolver.resolve("/stream/a.m3u8", None);
        assert_eq!(media.video_hls_url.as_deref(), Some("https://cdn.example/stream/a.m3u8"));
    }

    #[test]
    fn test_prefill_from_configured_columns() {
        let row = ItemRow::from_json(
            json!({"file_name": "a.wav", "tr": "https://x/a.vtt", "dia": ""}),
            "file_name",
        )
        .unwrap();
        let columns = PrefillColumns {
            transcript_vtt: Some("tr".to_string()),
            diarization_rttm: Some("dia".to_string()),
            ..Default::default()
        };
        let prefill = Prefill::from_row(&row, &columns);
        assert_eq!(prefill.transcript_vtt_url.as_deref(), Some("https://x/a.vtt"));
        assert_eq!(prefill.diarization_rttm_url, None);
        assert_eq!(prefill.translation_vtt_url, None);
    }

    #[test]
    fn test_seed_and_gold_items() {
        let seed = ManifestItem::seed();
        assert_eq!(seed.asset_id, SEED_ASSET_ID);
        assert_eq!(seed.assigned_cell, UNKNOWN_CELL_KEY);
        assert_eq!(seed.stage0_status, "seed");

        let gold = ManifestItem::gold("g.wav", Media::default());
        assert!(gold.is_gold);
        assert_eq!(gold.assigned_cell, GOLD_CELL_KEY);
        assert!(!gold.double_pass_target);

        let value = serde_json::to_value(&seed).unwrap();
        assert_eq!(value["language_hint"], "ar");
        assert!(value["notes"].is_null());
    }
}
