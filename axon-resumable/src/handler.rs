//! The resumable handler seam — one async function per contract
//! version advances the workflow.

use async_trait::async_trait;
use axon_protocol::contract::ContractSet;
use axon_protocol::event::{Event, EventDraft};
use axon_protocol::memory::MachineMemoryRecord;
use axon_protocol::violation::WorkflowError;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// What a handler sees on each advance.
pub struct HandlerInput<'a> {
    /// The persisted handler context, absent on the first advance.
    pub context: Option<Value>,
    /// A read-only view of the stored record, absent on the first
    /// advance.
    pub record: Option<&'a MachineMemoryRecord>,
    /// The event being consumed — the init event or a service response.
    pub event: &'a Event,
    /// The contracts this workflow speaks.
    pub contracts: &'a ContractSet,
    /// Responses collected so far, keyed by response event type. The
    /// event being consumed is already included when it answers an
    /// expected request.
    pub collected: &'a BTreeMap<String, Vec<Event>>,
}

/// What a handler decided.
#[derive(Debug, Default)]
pub struct HandlerOutput {
    /// Replacement context; `None` keeps the stored context.
    pub context: Option<Value>,
    /// Terminal output. Setting this completes the workflow: a
    /// completion event is emitted and the record goes `done`.
    pub complete: Option<Value>,
    /// Service requests to send. Their responses arrive as later
    /// events on this subject.
    pub services: Vec<EventDraft>,
}

impl HandlerOutput {
    /// An output that neither completes nor requests anything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored context.
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    /// Complete the workflow with this terminal output.
    pub fn with_complete(mut self, output: Value) -> Self {
        self.complete = Some(output);
        self
    }

    /// Request a service.
    pub fn with_service(mut self, draft: EventDraft) -> Self {
        self.services.push(draft);
        self
    }
}

/// Protocol — one workflow advance.
///
/// Handlers are plain async functions behind a trait: read the context
/// and the collected responses, decide, return new context plus the
/// requests (or the terminal output). Failures are business failures —
/// the pipeline converts them to a system-error event addressed to the
/// initiator.
#[async_trait]
pub trait ResumableHandler: Send + Sync {
    /// Advance the workflow by one event.
    async fn handle(&self, input: HandlerInput<'_>) -> Result<HandlerOutput, WorkflowError>;
}

/// One version of a resumable workflow: its contracts and its handler.
#[derive(Clone)]
pub struct ResumableVersion {
    /// The contracts this version speaks.
    pub contracts: ContractSet,
    /// The handler advancing it.
    pub handler: Arc<dyn ResumableHandler>,
}

impl ResumableVersion {
    /// Pair a contract set with its handler.
    pub fn new(contracts: ContractSet, handler: Arc<dyn ResumableHandler>) -> Self {
        Self { contracts, handler }
    }
}
