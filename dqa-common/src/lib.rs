//! # DQA Common Library
//!
//! Shared code for the dialect QA task services:
//! - Error type
//! - Configuration resolution (environment → TOML → defaults)
//! - Double-pass routing parameters with per-key validation
//! - Timestamp helpers

pub mod config;
pub mod error;
pub mod params;
pub mod time;

pub use error::{Error, Result};
pub use params::RoutingConfig;
