//! Backing store interfaces
//!
//! The allocator reads items, assignment rows, gold identifiers, routing
//! states and the routing config through these traits, and writes lease
//! rows. [`rest::RestStore`] talks to the PostgREST deployment;
//! [`memory::MemoryStore`] backs tests.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::model::{AssignmentRecord, ItemRow};
use crate::routing::ItemRoutingState;

pub mod memory;
pub mod rest;

/// Store errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    #[error("Store not configured: {0}")]
    NotConfigured(String),

    #[error("Table \"{0}\" does not exist")]
    MissingTable(String),

    #[error("Missing columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Decode error: {0}")]
    Decode(String),
}

impl StoreError {
    /// Diagnostics classification; `None` when the store was never queried
    pub fn error_type(&self) -> Option<&'static str> {
        match self {
            StoreError::NotConfigured(_) => None,
            StoreError::MissingTable(_) => Some("missing_table"),
            StoreError::MissingColumns(_) => Some("missing_columns"),
            StoreError::Query(_) | StoreError::Network(_) | StoreError::Timeout | StoreError::Decode(_) => {
                Some("query_error")
            }
        }
    }

    /// Classify a failed query from the store's error message
    ///
    /// Projected columns named as not existing make it `MissingColumns`;
    /// any other "does not exist" is taken to be the table.
    pub fn classify(message: &str, table: &str, columns: &[String]) -> Self {
        let lower = message.to_lowercase();
        let missing: Vec<String> = columns
            .iter()
            .filter(|column| {
                let column = column.to_lowercase();
                lower.contains(&format!("\"{}\" does not exist", column))
                    || lower.contains(&format!("column {} does not exist", column))
                    || lower.contains(&format!("column {}.{} does not exist", table.to_lowercase(), column))
            })
            .cloned()
            .collect();

        if !missing.is_empty() {
            StoreError::MissingColumns(missing)
        } else if lower.contains("does not exist") || lower.contains("could not find the table") {
            StoreError::MissingTable(table.to_string())
        } else {
            StoreError::Query(message.to_string())
        }
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            StoreError::Timeout
        } else if e.is_decode() {
            StoreError::Decode(e.to_string())
        } else {
            StoreError::Network(e.to_string())
        }
    }
}

/// One full read of the keep items
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemPage {
    pub rows: Vec<ItemRow>,
    /// Reported total, or the number of rows read when none was reported
    pub total: usize,
}

/// Clip ("keep") items
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// All items with the keep decision, paged internally
    async fn fetch_keep_items(&self) -> Result<ItemPage, StoreError>;
}

/// Assignment rows: leases and permanent history
#[async_trait]
pub trait AssignmentStore: Send + Sync {
    async fn fetch_assignments(&self) -> Result<Vec<AssignmentRecord>, StoreError>;

    /// Batch insert; not retried
    async fn insert_assignments(&self, rows: &[AssignmentRecord]) -> Result<(), StoreError>;
}

/// Calibration items
#[async_trait]
pub trait GoldStore: Send + Sync {
    /// Up to `limit` gold identifiers; empty when no gold source is configured
    async fn fetch_gold_ids(&self, limit: usize) -> Result<Vec<String>, StoreError>;
}

/// Per-item routing states
#[async_trait]
pub trait RoutingStateStore: Send + Sync {
    /// States for the given items; items without a record are absent
    async fn fetch_states(&self, item_ids: &[String]) -> Result<HashMap<String, ItemRoutingState>, StoreError>;
}

/// Routing tunables record
#[async_trait]
pub trait RoutingConfigSource: Send + Sync {
    /// Raw record, `None` when the source holds none
    async fn fetch_routing_config(&self) -> Result<Option<Value>, StoreError>;
}

/// Every store the allocator consults
#[derive(Clone)]
pub struct Stores {
    pub items: Arc<dyn ItemStore>,
    pub assignments: Arc<dyn AssignmentStore>,
    pub gold: Arc<dyn GoldStore>,
    pub routing_states: Arc<dyn RoutingStateStore>,
    pub routing_config: Arc<dyn RoutingConfigSource>,
}

impl Stores {
    /// One backend serving every role
    pub fn from_backend<S>(backend: Arc<S>) -> Self
    where
        S: ItemStore + AssignmentStore + GoldStore + RoutingStateStore + RoutingConfigSource + 'static,
    {
        Self {
            items: backend.clone(),
            assignments: backend.clone(),
            gold: backend.clone(),
            routing_states: backend.clone(),
            routing_config: backend,
        }
    }
}
