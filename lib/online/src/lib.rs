//! # linkvec Online
//!
//! Incremental evaluation of an index graph.
//!
//! [`OnlineDagEvaluator`] takes batches of parsed entities and events:
//!
//! - entity updates are evaluated through the schema's projection, reusing
//!   stored results of spaces whose fields did not change
//! - events are folded into the affected entity's event aggregations with
//!   temporal decay ([`EventAggregator`]), then the affected entity is
//!   re-evaluated
//!
//! Records of a batch fail independently; see [`BatchReport`].

pub mod cache;
pub mod evaluator;
pub mod event;

pub use cache::EvaluationCache;
pub use evaluator::{BatchFailure, BatchReport, OnlineDagEvaluator};
pub use event::{time_modifier, update_metadata, EventAggregator};
