//! # axon-machine — synchronous state-chart workflows
//!
//! A workflow machine is a typed state chart pinned to one orchestrator
//! contract version. The pieces:
//!
//! | Piece | What it does |
//! |-------|-------------|
//! | [`chart`] | Config tree + behavior table. The types admit no async features — a chart that compiles is a chart the engine can step synchronously. |
//! | [`builder`] | Validates the chart, rejects reserved names, detects parallel regions, derives the locking requirement, and seals an immutable [`Machine`]. |
//! | [`engine`] | Pure synchronous step: one event in, transitions to quiescence, drafts drained from the typed outbox, optional terminal output. |
//! | [`registry`] | Resolves the right machine version for an incoming event's subject. |

#![deny(missing_docs)]

pub mod builder;
pub mod chart;
pub mod engine;
pub mod registry;

// Re-exports for convenience
pub use builder::{BuildError, Machine, MachineBuilder};
pub use chart::{
    Behavior, MachineConfig, RESERVED_CONTEXT_KEY, RESERVED_ENQUEUE_ACTION, RESERVED_NODE_NAMES,
    StateKind, StateNode, StepScope, StepView, TransitionConfig,
};
pub use engine::{MachineState, StepResult, execute};
pub use registry::{MachineRegistry, RegistryError};
