//! # axon-resumable — handler-function workflows
//!
//! The alternative to a state chart: an async handler per contract
//! version advances the workflow, with the pipeline tracking which of
//! the requests it produced are still awaiting responses. Reuses the
//! orchestrator crate's resource, factory, and return shape — the two
//! variants differ only in how an advance is computed.
//!
//! A workflow completes when its handler returns a terminal output; the
//! record goes `done` and later events on that subject are ignored.

#![deny(missing_docs)]

pub mod handler;
pub mod pipeline;

// Re-exports for convenience
pub use handler::{HandlerInput, HandlerOutput, ResumableHandler, ResumableVersion};
pub use pipeline::Resumable;
