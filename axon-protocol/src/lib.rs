//! # axon-protocol — types and traits for contract-driven orchestration
//!
//! This crate defines the vocabulary every axon crate speaks:
//!
//! | Concern | Types |
//! |---------|-------|
//! | Events | [`Event`], [`EventDraft`], [`DomainedEvent`], [`ErrorPayload`] |
//! | Addressing | [`Subject`] and its codec |
//! | Contracts | [`VersionedContract`], [`ContractKind`], [`ContractSet`] |
//! | Persistence | [`MachineMemory`], [`MachineMemoryRecord`] |
//! | Failure | [`Violation`], [`StepError`], [`WorkflowError`] |
//!
//! ## Design Principle
//!
//! The types here are operation-defined, not mechanism-defined: a
//! [`Subject`] is "the address of one workflow instance", not "a base64
//! string"; [`MachineMemory::lock`] is "gain exclusive ownership of a
//! subject", not "SET NX PX". That is what lets backends and transports
//! swap freely above and below this crate.
//!
//! ## Dependency Notes
//!
//! Payloads are `serde_json::Value` throughout. Contracts pin payload
//! shapes with JSON Schema documents, which is the interchange form the
//! rest of the ecosystem already speaks; typed payloads live at the
//! edges, where handlers deserialize what they need.

#![deny(missing_docs)]

pub mod contract;
pub mod event;
pub mod memory;
pub mod subject;
pub mod violation;

// Re-exports for convenience
pub use contract::{
    ContractError, ContractKind, ContractSet, ContractSetError, InputValidation,
    VersionedContract,
};
pub use event::{
    DEFAULT_DOMAIN, DomainedEvent, ErrorPayload, Event, EventDraft, PARENT_SUBJECT_FIELD,
};
pub use memory::{
    MachineMemory, MachineMemoryRecord, MemoryError, ProducedEvent, RecordEvents, WorkflowStatus,
};
pub use subject::{
    META_REDIRECT_TO, Subject, SubjectContent, SubjectError, SubjectExecution,
    SubjectOrchestrator,
};
pub use violation::{StepError, TransactionCause, Violation, WorkflowError};
