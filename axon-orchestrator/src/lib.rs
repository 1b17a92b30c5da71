//! # axon-orchestrator — the state-machine pipeline
//!
//! Composes the protocol pieces into the per-event execution pipeline:
//!
//! | Piece | What it does |
//! |-------|-------------|
//! | [`resource`] | Subject validation + lock/read/write/unlock with the fail-fast / tolerant-release discipline |
//! | [`factory`] | Drafts → routed, schema-validated outbound events |
//! | [`pipeline`] | The `execute` method: the canonical step order, the error taxonomy, the system-error conversion |
//! | [`output`] | The domain-segregated return shape |
//!
//! The resumable variant (`axon-resumable`) reuses everything here
//! except the machine step.

#![deny(missing_docs)]

pub mod factory;
pub mod output;
pub mod pipeline;
pub mod resource;

// Re-exports for convenience
pub use factory::{
    EventFactory, TraceInheritance, init_parent_subject, system_error_domained,
    system_error_event,
};
pub use output::{DomainedEvents, ExecutionOutput};
pub use pipeline::Orchestrator;
pub use resource::{EventResource, LockState};
