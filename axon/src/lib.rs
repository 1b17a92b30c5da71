#![deny(missing_docs)]
//! # axon — umbrella crate
//!
//! Provides a single import surface for the axon workspace. Re-exports
//! the protocol and the pipeline crates behind feature flags, plus a
//! `prelude` for the happy path.

pub use axon_protocol;

#[cfg(feature = "machine")]
pub use axon_machine;

#[cfg(feature = "memory")]
pub use axon_memory;

#[cfg(feature = "memory-fs")]
pub use axon_memory_fs;

#[cfg(feature = "orchestrator")]
pub use axon_orchestrator;

#[cfg(feature = "resumable")]
pub use axon_resumable;

/// Happy-path imports for composing axon workflows.
pub mod prelude {
    pub use axon_protocol::{
        ContractKind, ContractSet, DomainedEvent, Event, EventDraft, MachineMemory,
        MachineMemoryRecord, Subject, VersionedContract, Violation, WorkflowStatus,
    };

    #[cfg(feature = "machine")]
    pub use axon_machine::{
        Behavior, MachineBuilder, MachineConfig, MachineRegistry, StateNode, TransitionConfig,
    };

    #[cfg(feature = "orchestrator")]
    pub use axon_orchestrator::{ExecutionOutput, Orchestrator, TraceInheritance};

    #[cfg(feature = "resumable")]
    pub use axon_resumable::{HandlerInput, HandlerOutput, Resumable, ResumableHandler};

    #[cfg(feature = "memory")]
    pub use axon_memory::MemoryBackend;

    #[cfg(feature = "memory-fs")]
    pub use axon_memory_fs::FsBackend;
}
