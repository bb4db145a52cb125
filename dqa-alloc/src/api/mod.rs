//! HTTP API handlers for dqa-alloc

pub mod health;
pub mod tasks;

pub use health::health_routes;
pub use tasks::get_tasks;
