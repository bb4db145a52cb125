//! dqa-alloc library - annotation task allocation and double-pass routing
//!
//! Hands out dialect QA clips to annotators: coverage-weighted stratified
//! sampling over clip cells, lease-based avoidance of duplicate delivery,
//! probabilistic second-pass routing under a per-annotator fairness cap,
//! and gold calibration injection.

use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub mod allocator;
pub mod api;
pub mod cells;
pub mod config;
pub mod coverage;
pub mod gold;
pub mod lease;
pub mod manifest;
pub mod model;
pub mod routing;
pub mod sampler;
pub mod store;
pub mod weights;

pub use allocator::{AllocationRequest, Allocator};
pub use config::AllocConfig;
pub use manifest::Manifest;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub allocator: Arc<Allocator>,
}

impl AppState {
    pub fn new(allocator: Allocator) -> Self {
        Self {
            allocator: Arc::new(allocator),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .route("/api/tasks", get(api::get_tasks))
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
