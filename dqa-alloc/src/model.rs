//! Core records read from and written to the stores

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Maximum number of independent annotation passes per asset
pub const MAX_PASSES_PER_ASSET: usize = 2;

/// One annotatable clip from the item store
///
/// The identifier is the clip's file name. All other projected columns
/// (decision, prefill references, audio column, nested metadata) stay in
/// `fields` untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemRow {
    pub id: String,
    pub fields: Map<String, Value>,
}

impl ItemRow {
    /// Build from a store row; rows without a usable identifier are dropped
    pub fn from_json(value: Value, id_column: &str) -> Option<Self> {
        let Value::Object(fields) = value else {
            return None;
        };
        let id = match fields.get(id_column)? {
            Value::String(s) if !s.trim().is_empty() => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        Some(Self { id, fields })
    }

    /// Convenience constructor for callers that already hold the fields
    pub fn new(id: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Non-empty string column value
    pub fn text(&self, column: &str) -> Option<&str> {
        match self.fields.get(column)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.as_str()),
            _ => None,
        }
    }
}

/// One assignment of an item to an annotator
///
/// Append-only. Rows younger than the activity window act as leases; all
/// rows together form the permanent assignment history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentRecord {
    pub item_id: String,
    pub annotator_id: String,
    #[serde(default = "default_pass_number")]
    pub pass_number: u8,
    /// `None` when the store row carried no parseable timestamp
    #[serde(default)]
    pub assigned_at: Option<DateTime<Utc>>,
}

fn default_pass_number() -> u8 {
    1
}

impl AssignmentRecord {
    pub fn new(
        item_id: impl Into<String>,
        annotator_id: impl Into<String>,
        pass_number: u8,
        assigned_at: DateTime<Utc>,
    ) -> Self {
        Self {
            item_id: item_id.into(),
            annotator_id: annotator_id.into(),
            pass_number,
            assigned_at: Some(assigned_at),
        }
    }

    /// Second or later pass
    pub fn is_double_pass(&self) -> bool {
        self.pass_number >= 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_item_row_requires_identifier() {
        assert!(ItemRow::from_json(json!({"file_name": "a.wav"}), "file_name").is_some());
        assert!(ItemRow::from_json(json!({"file_name": "  "}), "file_name").is_none());
        assert!(ItemRow::from_json(json!({"other": "a.wav"}), "file_name").is_none());
        assert!(ItemRow::from_json(json!(["a.wav"]), "file_name").is_none());
    }

    #[test]
    fn test_item_row_text() {
        let row = ItemRow::from_json(
            json!({"file_name": "a.wav", "transcript_vtt_url": "", "audio": "https://cdn/a.opus"}),
            "file_name",
        )
        .unwrap();
        assert_eq!(row.text("audio"), Some("https://cdn/a.opus"));
        assert_eq!(row.text("transcript_vtt_url"), None);
        assert_eq!(row.text("missing"), None);
    }

    #[test]
    fn test_assignment_record_defaults() {
        let record: AssignmentRecord =
            serde_json::from_value(json!({"item_id": "a.wav", "annotator_id": "ann-1"})).unwrap();
        assert_eq!(record.pass_number, 1);
        assert!(record.assigned_at.is_none());
        assert!(!record.is_double_pass());
    }
}
