//! Per-item routing state
//!
//! Written by the submission side; read here before each allocation. The
//! record is namespaced inside a per-item JSON document and may be missing,
//! partial or corrupt. Anything unreadable is treated as the empty state.

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;

use crate::model::{AssignmentRecord, MAX_PASSES_PER_ASSET};

/// Review statuses after which an item is never re-offered
pub const TERMINAL_REVIEW_STATUSES: &[&str] =
    &["approved", "rejected", "adjudicated", "finalized", "locked"];

/// Routing stage of one item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStage {
    Unassigned,
    Pass1Assigned,
    Pass2Assigned,
    /// Terminal
    Locked,
}

/// Cumulative routing record of one item
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ItemRoutingState {
    pub assignments: Vec<AssignmentRecord>,
    pub review_status: Option<String>,
    pub locked: bool,
    pub assigned_cell: Option<String>,
}

impl ItemRoutingState {
    /// Lenient parse of the routing record for `item_id`
    ///
    /// The record may be the namespaced object itself, a document holding it
    /// under `namespace`, or either of those encoded as a JSON string.
    pub fn from_json(value: &Value, item_id: &str, namespace: &str) -> Self {
        let decoded;
        let value = match value {
            Value::String(text) => match serde_json::from_str::<Value>(text) {
                Ok(parsed) => {
                    decoded = parsed;
                    &decoded
                }
                Err(e) => {
                    warn!(item = item_id, "Routing state is not valid JSON, treating as empty: {}", e);
                    return Self::default();
                }
            },
            other => other,
        };

        let Some(object) = value.as_object() else {
            if !value.is_null() {
                warn!(item = item_id, "Routing state is not an object, treating as empty");
            }
            return Self::default();
        };

        match object.get(namespace) {
            Some(Value::Object(inner)) => Self::from_map(inner, item_id),
            Some(Value::String(_)) => Self::from_json(&object[namespace], item_id, namespace),
            _ => Self::from_map(object, item_id),
        }
    }

    fn from_map(object: &Map<String, Value>, item_id: &str) -> Self {
        let assignments = object
            .get("assignments")
            .and_then(Value::as_array)
            .map(|rows| {
                rows.iter()
                    .filter_map(|row| parse_assignment(row, item_id))
                    .collect()
            })
            .unwrap_or_default();

        let locked = match object.get("locked") {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => matches!(s.trim().to_lowercase().as_str(), "true" | "1" | "yes"),
            Some(Value::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
            _ => false,
        };

        Self {
            assignments,
            review_status: text_field(object, "review_status").map(|s| s.to_lowercase()),
            locked,
            assigned_cell: text_field(object, "assigned_cell"),
        }
    }

    /// Locked, or reviewed to a terminal status
    pub fn is_terminal(&self) -> bool {
        self.locked
            || self
                .review_status
                .as_deref()
                .is_some_and(|status| TERMINAL_REVIEW_STATUSES.contains(&status))
    }

    pub fn pass_count(&self) -> usize {
        self.assignments.len()
    }

    pub fn has_annotator(&self, annotator_id: &str) -> bool {
        self.assignments.iter().any(|a| a.annotator_id == annotator_id)
    }

    /// Annotators of earlier passes, in assignment order
    pub fn previous_annotators(&self) -> Vec<String> {
        let mut annotators: Vec<String> = Vec::new();
        for assignment in &self.assignments {
            if !annotators.contains(&assignment.annotator_id) {
                annotators.push(assignment.annotator_id.clone());
            }
        }
        annotators
    }

    pub fn stage(&self) -> RoutingStage {
        if self.is_terminal() {
            return RoutingStage::Locked;
        }
        match self.pass_count() {
            0 => RoutingStage::Unassigned,
            n if n < MAX_PASSES_PER_ASSET => RoutingStage::Pass1Assigned,
            _ => RoutingStage::Pass2Assigned,
        }
    }
}

fn text_field(object: &Map<String, Value>, key: &str) -> Option<String> {
    object
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn parse_assignment(row: &Value, item_id: &str) -> Option<AssignmentRecord> {
    let object = row.as_object()?;
    let annotator_id = ["annotator_id", "annotator", "user_id", "assigned_to"]
        .iter()
        .find_map(|key| text_field(object, key))?;
    let pass_number = object
        .get("pass_number")
        .and_then(|v| match v {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
        .map(|n| n.clamp(1, u8::MAX as u64) as u8)
        .unwrap_or(1);
    let assigned_at = object
        .get("assigned_at")
        .and_then(Value::as_str)
        .and_then(dqa_common::time::parse_timestamp);

    Some(AssignmentRecord {
        item_id: item_id.to_string(),
        annotator_id,
        pass_number,
        assigned_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const NS: &str = "routing";

    #[test]
    fn test_namespaced_record() {
        let state = ItemRoutingState::from_json(
            &json!({
                "routing": {
                    "assignments": [
                        {"annotator_id": "ann-1", "pass_number": 1, "assigned_at": "2024-05-01T10:00:00Z"}
                    ],
                    "review_status": "Pending",
                    "assigned_cell": "gulf:kuwait:m:18-24"
                },
                "other": {}
            }),
            "a.wav",
            NS,
        );
        assert_eq!(state.pass_count(), 1);
        assert_eq!(state.assignments[0].item_id, "a.wav");
        assert!(state.assignments[0].assigned_at.is_some());
        assert_eq!(state.review_status.as_deref(), Some("pending"));
        assert_eq!(state.stage(), RoutingStage::Pass1Assigned);
        assert!(state.has_annotator("ann-1"));
    }

    #[test]
    fn test_corrupt_records_default() {
        for value in [json!("{not json"), json!(42), json!(null), json!([1, 2])] {
            let state = ItemRoutingState::from_json(&value, "a.wav", NS);
            assert_eq!(state, ItemRoutingState::default());
            assert_eq!(state.stage(), RoutingStage::Unassigned);
        }
    }

    #[test]
    fn test_encoded_and_partial_assignments() {
        let encoded = json!({
            "routing": "{\"assignments\": [{\"annotator\": \"a\"}, {\"pass_number\": 2}, 5, {\"user_id\": \"b\", \"pass_number\": \"2\"}]}"
        });
        let state = ItemRoutingState::from_json(&encoded, "a.wav", NS);
        assert_eq!(state.pass_count(), 2);
        assert_eq!(state.assignments[1].pass_number, 2);
        assert_eq!(state.previous_annotators(), vec!["a", "b"]);
        assert_eq!(state.stage(), RoutingStage::Pass2Assigned);
    }

    #[test]
    fn test_terminal_states() {
        let locked = ItemRoutingState::from_json(&json!({"locked": "true"}), "a", NS);
        assert_eq!(locked.stage(), RoutingStage::Locked);

        let approved = ItemRoutingState::from_json(&json!({"review_status": "approved"}), "a", NS);
        assert!(approved.is_terminal());

        let pending = ItemRoutingState::from_json(&json!({"review_status": "needs_review"}), "a", NS);
        assert!(!pending.is_terminal());
    }
}
