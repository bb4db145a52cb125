//! Double-pass QA routing
//!
//! - [`state`]: per-item routing record read from the routing-state store
//! - [`fairness`]: rolling per-annotator double-pass ledger
//! - [`router`]: state gate, probability model and the routing decision

pub mod fairness;
pub mod router;
pub mod state;

pub use fairness::{AnnotatorLedger, AnnotatorStats};
pub use router::{double_pass_probability, gate, CellHealth, DoublePassRouter, Gate, RouteDecision, SkipReason};
pub use state::{ItemRoutingState, RoutingStage};
