//! Cell key derivation
//!
//! A cell is the stratification bucket `dialect_family:subregion:gender:age_band`.
//! Item metadata arrives in many shapes: plain columns, nested objects,
//! JSON-encoded strings, lists of any of those. [`MetaValue`] classifies a raw
//! value once and [`MetaValue::into_maps`] flattens it into the list of
//! key/value maps the field lookup works on.

use serde_json::{Map, Value};

/// Fallback cell when no dimension resolves
pub const UNKNOWN_CELL_KEY: &str = "unknown:unknown:unknown:unknown";

/// Reserved cell for calibration items
pub const GOLD_CELL_KEY: &str = "gold:gold:gold:gold";

/// Columns that may hold nested metadata containers
const METADATA_KEYS: &[&str] = &["metadata", "meta", "clip_metadata", "extra_metadata", "data"];

/// Keys that may hold speaker profile lists
const PROFILE_KEYS: &[&str] = &["speaker_profiles", "speakerProfiles", "profiles", "speakers"];

pub const DIALECT_KEYS: &[&str] = &[
    "dialect_family",
    "dialectFamily",
    "dialect_family_code",
    "dialect_family_label",
    "dialect",
    "family",
];

pub const SUBREGION_KEYS: &[&str] = &[
    "dialect_subregion",
    "dialectSubregion",
    "dialect_region",
    "subregion",
    "region",
    "province",
];

pub const GENDER_KEYS: &[&str] = &[
    "apparent_gender",
    "apparentGender",
    "gender",
    "gender_norm",
    "speaker_gender",
];

pub const AGE_KEYS: &[&str] = &[
    "apparent_age_band",
    "apparentAgeBand",
    "age_band",
    "ageBand",
    "age",
    "age_group",
    "ageGroup",
];

/// Raw metadata value, classified once
#[derive(Debug, Clone, PartialEq)]
pub enum MetaValue {
    /// Null, bool or number; never a container
    Scalar(Value),
    Object(Map<String, Value>),
    Array(Vec<MetaValue>),
    /// String that may carry JSON
    EncodedText(String),
}

impl From<&Value> for MetaValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Object(map) => MetaValue::Object(map.clone()),
            Value::Array(items) => MetaValue::Array(items.iter().map(MetaValue::from).collect()),
            Value::String(text) => MetaValue::EncodedText(text.clone()),
            other => MetaValue::Scalar(other.clone()),
        }
    }
}

impl MetaValue {
    /// Flatten into the list of maps it contains, in order
    ///
    /// Text that is not valid JSON, and scalars, contribute nothing.
    pub fn into_maps(self) -> Vec<Map<String, Value>> {
        match self {
            MetaValue::Scalar(_) => Vec::new(),
            MetaValue::Object(map) => vec![map],
            MetaValue::Array(items) => items.into_iter().flat_map(MetaValue::into_maps).collect(),
            MetaValue::EncodedText(text) => match serde_json::from_str::<Value>(&text) {
                Ok(parsed) => MetaValue::from(&parsed).into_maps(),
                Err(_) => Vec::new(),
            },
        }
    }
}

/// Normalize one dimension value: trimmed, lower-cased, `unknown` if empty
pub fn normalize_category(value: Option<&Value>) -> String {
    let text = match value {
        None | Some(Value::Null) => return "unknown".to_string(),
        Some(Value::Bool(b)) => return b.to_string(),
        Some(Value::Number(n)) => return n.to_string(),
        Some(Value::String(s)) => s.trim().to_lowercase(),
        Some(other) => other.to_string().trim().to_lowercase(),
    };
    if text.is_empty() {
        "unknown".to_string()
    } else {
        text
    }
}

/// Join four dimension values into a cell key
pub fn build_cell_key(
    dialect_family: Option<&Value>,
    subregion: Option<&Value>,
    gender: Option<&Value>,
    age_band: Option<&Value>,
) -> String {
    [
        normalize_category(dialect_family),
        normalize_category(subregion),
        normalize_category(gender),
        normalize_category(age_band),
    ]
    .join(":")
}

/// Nested metadata maps of a record, in column priority order
fn metadata_maps(record: &Map<String, Value>) -> Vec<Map<String, Value>> {
    METADATA_KEYS
        .iter()
        .filter_map(|key| record.get(*key))
        .flat_map(|value| MetaValue::from(value).into_maps())
        .collect()
}

/// Null, false, empty strings and empty containers
pub(crate) fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(_) => false,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
    }
}

/// Speaker profile maps found on the record or inside its metadata
fn speaker_profiles(record: &Map<String, Value>, metadata: &[Map<String, Value>]) -> Vec<Map<String, Value>> {
    std::iter::once(record)
        .chain(metadata.iter())
        .flat_map(|source| {
            PROFILE_KEYS
                .iter()
                .filter_map(move |key| source.get(*key))
                .filter(|value| !is_blank(value))
                .flat_map(|value| MetaValue::from(value).into_maps())
        })
        .collect()
}

/// First non-empty value for any alias, scanning contexts in order
fn first_defined<'a>(contexts: &[&'a Map<String, Value>], keys: &[&str]) -> Option<&'a Value> {
    for context in contexts {
        for key in keys {
            match context.get(*key) {
                None | Some(Value::Null) => continue,
                Some(Value::String(s)) if s.trim().is_empty() => continue,
                Some(value) => return Some(value),
            }
        }
    }
    None
}

fn key_from_contexts(contexts: &[&Map<String, Value>]) -> String {
    build_cell_key(
        first_defined(contexts, DIALECT_KEYS),
        first_defined(contexts, SUBREGION_KEYS),
        first_defined(contexts, GENDER_KEYS),
        first_defined(contexts, AGE_KEYS),
    )
}

/// Derive every cell an item belongs to
///
/// One key per speaker profile (profile fields first, then the item's own
/// fields as fallback); a single item-level key when there are no profiles.
/// The result is deduplicated, keeps first-seen order and is never empty.
pub fn derive_cell_keys(record: &Map<String, Value>) -> Vec<String> {
    let metadata = metadata_maps(record);
    let mut item_contexts: Vec<&Map<String, Value>> = Vec::with_capacity(metadata.len() + 1);
    item_contexts.push(record);
    item_contexts.extend(metadata.iter());

    let profiles = speaker_profiles(record, &metadata);

    let mut cells = Vec::new();
    if profiles.is_empty() {
        cells.push(key_from_contexts(&item_contexts));
    } else {
        for profile in &profiles {
            let profile_metadata = metadata_maps(profile);
            let mut contexts: Vec<&Map<String, Value>> = Vec::new();
            contexts.push(profile);
            contexts.extend(profile_metadata.iter());
            contexts.extend(item_contexts.iter().copied());
            cells.push(key_from_contexts(&contexts));
        }
    }

    let mut ordered: Vec<String> = Vec::with_capacity(cells.len());
    for cell in cells {
        if !ordered.contains(&cell) {
            ordered.push(cell);
        }
    }
    if ordered.is_empty() {
        ordered.push(UNKNOWN_CELL_KEY.to_string());
    }
    ordered
}

/// First derived cell, used when an item is selected outside a weighted draw
pub fn derive_primary_cell(record: &Map<String, Value>) -> String {
    derive_cell_keys(record)
        .into_iter()
        .next()
        .unwrap_or_else(|| UNKNOWN_CELL_KEY.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_item_level_fields() {
        let keys = derive_cell_keys(&record(json!({
            "file_name": "a.wav",
            "dialect_family": " Levantine ",
            "subregion": "Beirut",
            "apparent_gender": "F",
            "apparent_age_band": "25-34"
        })));
        assert_eq!(keys, vec!["levantine:beirut:f:25-34"]);
    }

    #[test]
    fn test_nothing_resolves_to_unknown() {
        let keys = derive_cell_keys(&record(json!({"file_name": "a.wav"})));
        assert_eq!(keys, vec![UNKNOWN_CELL_KEY]);
    }

    #[test]
    fn test_alias_priority_within_context() {
        let keys = derive_cell_keys(&record(json!({
            "dialect": "gulf",
            "dialectFamily": "maghrebi",
            "gender": "",
            "speaker_gender": "M"
        })));
        assert_eq!(keys, vec!["maghrebi:unknown:m:unknown"]);
    }

    #[test]
    fn test_encoded_metadata_string() {
        let keys = derive_cell_keys(&record(json!({
            "file_name": "a.wav",
            "metadata": "{\"dialect_family\": \"Egyptian\", \"age\": 40}"
        })));
        assert_eq!(keys, vec!["egyptian:unknown:unknown:40"]);
    }

    #[test]
    fn test_one_key_per_profile_with_item_fallback() {
        let keys = derive_cell_keys(&record(json!({
            "dialect_family": "levantine",
            "region": "damascus",
            "meta": {
                "speaker_profiles": [
                    {"gender": "female", "age_band": "18-24"},
                    {"gender": "male", "age_band": "35-44"},
                    {"gender": "male", "age_band": "35-44"}
                ]
            }
        })));
        assert_eq!(
            keys,
            vec![
                "levantine:damascus:female:18-24",
                "levantine:damascus:male:35-44",
            ]
        );
    }

    #[test]
    fn test_profile_fields_override_item_fields() {
        let keys = derive_cell_keys(&record(json!({
            "dialect_family": "gulf",
            "speakers": "[{\"dialect_family\": \"iraqi\"}, {\"metadata\": {\"gender\": \"f\"}}]"
        })));
        assert_eq!(keys, vec!["iraqi:unknown:unknown:unknown", "gulf:unknown:f:unknown"]);
    }

    #[test]
    fn test_malformed_encoded_text_is_ignored() {
        let keys = derive_cell_keys(&record(json!({
            "metadata": "{not json",
            "profiles": [],
            "gender": "M"
        })));
        assert_eq!(keys, vec!["unknown:unknown:m:unknown"]);
    }

    #[test]
    fn test_scalar_normalization() {
        assert_eq!(normalize_category(Some(&json!(true))), "true");
        assert_eq!(normalize_category(Some(&json!(30))), "30");
        assert_eq!(normalize_category(Some(&json!("  "))), "unknown");
        assert_eq!(normalize_category(None), "unknown");
    }

    #[test]
    fn test_meta_value_flattening() {
        let value = json!([{"a": 1}, "[{\"b\": 2}]", 5, [{"c": 3}]]);
        let maps = MetaValue::from(&value).into_maps();
        assert_eq!(maps.len(), 3);
        assert!(maps[1].contains_key("b"));
    }
}
