//! Event reconciliation
//!
//! - [`engine`]: applies one event to account state
//! - [`reprovision`]: creates a fresh billing customer after a deletion
//! - [`processor`]: queueing, retries and timing around the engine

pub mod engine;
pub mod processor;
pub mod reprovision;

pub use engine::{EngineOptions, Outcome, ReconciliationEngine};
pub use processor::{Delivery, EventProcessor, ProcessorHandle, ProcessorSummary};
pub use reprovision::CustomerRecreation;
