//! In-memory store
//!
//! Serves every store role from owned data. Each read can be made to fail
//! with a chosen [`StoreError`], and inserted lease rows are kept so tests
//! can inspect them.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::Mutex;

use super::{AssignmentStore, GoldStore, ItemPage, ItemStore, RoutingConfigSource, RoutingStateStore, StoreError};
use crate::model::{AssignmentRecord, ItemRow};
use crate::routing::ItemRoutingState;

/// Default namespace of routing-state documents
const NAMESPACE: &str = "double_pass";

#[derive(Debug, Default)]
struct Failures {
    items: Option<StoreError>,
    assignments: Option<StoreError>,
    insert: Option<StoreError>,
    gold: Option<StoreError>,
    states: Option<StoreError>,
    routing_config: Option<StoreError>,
}

/// Store backed by process memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: Vec<ItemRow>,
    reported_total: Option<usize>,
    assignments: Mutex<Vec<AssignmentRecord>>,
    inserted: Mutex<Vec<AssignmentRecord>>,
    gold: Vec<String>,
    states: HashMap<String, Value>,
    routing_config: Option<Value>,
    failures: Failures,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_items(mut self, items: Vec<ItemRow>) -> Self {
        self.items = items;
        self
    }

    /// Total reported alongside the items instead of the row count
    pub fn with_reported_total(mut self, total: usize) -> Self {
        self.reported_total = Some(total);
        self
    }

    pub fn with_assignments(self, rows: Vec<AssignmentRecord>) -> Self {
        Self {
            assignments: Mutex::new(rows),
            ..self
        }
    }

    pub fn with_gold(mut self, ids: Vec<String>) -> Self {
        self.gold = ids;
        self
    }

    /// Raw routing-state document for an item
    pub fn with_state(mut self, item_id: &str, document: Value) -> Self {
        self.states.insert(item_id.to_string(), document);
        self
    }

    pub fn with_routing_config(mut self, record: Value) -> Self {
        self.routing_config = Some(record);
        self
    }

    pub fn failing_items(mut self, error: StoreError) -> Self {
        self.failures.items = Some(error);
        self
    }

    pub fn failing_assignments(mut self, error: StoreError) -> Self {
        self.failures.assignments = Some(error);
        self
    }

    pub fn failing_inserts(mut self, error: StoreError) -> Self {
        self.failures.insert = Some(error);
        self
    }

    pub fn failing_gold(mut self, error: StoreError) -> Self {
        self.failures.gold = Some(error);
        self
    }

    pub fn failing_states(mut self, error: StoreError) -> Self {
        self.failures.states = Some(error);
        self
    }

    pub fn failing_routing_config(mut self, error: StoreError) -> Self {
        self.failures.routing_config = Some(error);
        self
    }

    /// Lease rows written so far
    pub async fn inserted(&self) -> Vec<AssignmentRecord> {
        self.inserted.lock().await.clone()
    }
}

fn fail(error: &Option<StoreError>) -> Result<(), StoreError> {
    match error {
        Some(e) => Err(e.clone()),
        None => Ok(()),
    }
}

#[async_trait]
impl ItemStore for MemoryStore {
    async fn fetch_keep_items(&self) -> Result<ItemPage, StoreError> {
        fail(&self.failures.items)?;
        Ok(ItemPage {
            rows: self.items.clone(),
            total: self.reported_total.unwrap_or(self.items.len()),
        })
    }
}

#[async_trait]
impl AssignmentStore for MemoryStore {
    async fn fetch_assignments(&self) -> Result<Vec<AssignmentRecord>, StoreError> {
        fail(&self.failures.assignments)?;
        Ok(self.assignments.lock().await.clone())
    }

    async fn insert_assignments(&self, rows: &[AssignmentRecord]) -> Result<(), StoreError> {
        fail(&self.failures.insert)?;
        self.assignments.lock().await.extend_from_slice(rows);
        self.inserted.lock().await.extend_from_slice(rows);
        Ok(())
    }
}

#[async_trait]
impl GoldStore for MemoryStore {
    async fn fetch_gold_ids(&self, limit: usize) -> Result<Vec<String>, StoreError> {
        fail(&self.failures.gold)?;
        Ok(self.gold.iter().take(limit.max(1)).cloned().collect())
    }
}

#[async_trait]
impl RoutingStateStore for MemoryStore {
    async fn fetch_states(&self, item_ids: &[String]) -> Result<HashMap<String, ItemRoutingState>, StoreError> {
        fail(&self.failures.states)?;
        Ok(item_ids
            .iter()
            .filter_map(|id| {
                let document = self.states.get(id)?;
                Some((id.clone(), ItemRoutingState::from_json(document, id, NAMESPACE)))
            })
            .collect())
    }
}

#[async_trait]
impl RoutingConfigSource for MemoryStore {
    async fn fetch_routing_config(&self) -> Result<Option<Value>, StoreError> {
        fail(&self.failures.routing_config)?;
        Ok(self.routing_config.clone())
    }
}
