//! The orchestrator pipeline — one event in, routed events out,
//! state persisted under the subject lock.
//!
//! Canonical order: validate subject → parse → resolve machine →
//! validate input → lock → load state → step the machine → append the
//! completion draft → build emittable events → persist → release the
//! lock. The lock release runs on every exit path; the write runs only
//! after everything before it succeeded.

use crate::factory::{
    EventFactory, TraceInheritance, init_parent_subject, system_error_domained,
    system_error_event,
};
use crate::output::ExecutionOutput;
use crate::resource::{EventResource, LockState};
use axon_machine::builder::Machine;
use axon_machine::engine::{self, MachineState};
use axon_machine::registry::MachineRegistry;
use axon_protocol::contract::InputValidation;
use axon_protocol::event::{Event, EventDraft};
use axon_protocol::memory::{
    MachineMemory, MachineMemoryRecord, ProducedEvent, RecordEvents, WorkflowStatus,
};
use axon_protocol::subject::{META_REDIRECT_TO, Subject, SubjectContent};
use axon_protocol::violation::{StepError, TransactionCause, Violation};
use rust_decimal::Decimal;
use serde_json::Value;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tracing::Instrument;

/// Filled in as the pipeline learns the workflow's lineage, so a
/// workflow error caught later still addresses its system-error event
/// correctly.
#[derive(Default)]
struct ErrorContext {
    parent_subject: Option<Subject>,
    init_event_id: Option<String>,
}

/// The state-machine orchestrator: a function from (event, memory) to
/// (events, memory').
///
/// One `execute` call processes exactly one event under per-subject
/// mutual exclusion. Infrastructure failures raise a [`Violation`];
/// workflow failures return normally as a single system-error event.
pub struct Orchestrator {
    memory: Arc<dyn MachineMemory>,
    registry: MachineRegistry,
    execution_cost: Decimal,
    locking_override: Option<bool>,
    trace: TraceInheritance,
}

impl Orchestrator {
    /// Create an orchestrator over a memory backend and a machine
    /// registry. `execution_cost` is the per-event unit cost stamped on
    /// outbound events; it must be non-negative.
    pub fn new(
        memory: Arc<dyn MachineMemory>,
        registry: MachineRegistry,
        execution_cost: Decimal,
    ) -> Result<Self, Violation> {
        if execution_cost < Decimal::ZERO {
            return Err(Violation::config(format!(
                "execution cost must be non-negative, got {execution_cost}"
            )));
        }
        Ok(Self {
            memory,
            registry,
            execution_cost,
            locking_override: None,
            trace: TraceInheritance::default(),
        })
    }

    /// Force the locking decision instead of deriving it per machine.
    pub fn with_locking_override(mut self, requires_locking: bool) -> Self {
        self.locking_override = Some(requires_locking);
        self
    }

    /// Choose where outbound events take their trace headers from.
    pub fn with_trace_inheritance(mut self, trace: TraceInheritance) -> Self {
        self.trace = trace;
        self
    }

    /// The orchestrator source — the event type that starts a workflow
    /// here, and the `source` every outbound event carries.
    pub fn source(&self) -> &str {
        self.registry.source()
    }

    /// Process one event.
    pub async fn execute(&self, event: Event) -> Result<ExecutionOutput, Violation> {
        let span = tracing::info_span!(
            "workflow.execute",
            source = self.source(),
            event_id = %event.id,
            event_type = %event.event_type,
        );
        self.execute_impl(event).instrument(span).await
    }

    async fn execute_impl(&self, event: Event) -> Result<ExecutionOutput, Violation> {
        let content = EventResource::validate_subject(&event.subject)?;

        if content.orchestrator.name != self.source() {
            tracing::warn!(
                addressed = %content.orchestrator.name,
                source = self.source(),
                "event subject addresses a different orchestrator; ignoring",
            );
            return Ok(ExecutionOutput::empty());
        }

        let Some(machine) = self.registry.resolve_content(&content)? else {
            return Ok(ExecutionOutput::empty());
        };

        match machine.validate_input(&event) {
            InputValidation::Valid => {}
            InputValidation::Unresolved(reason) => return Err(Violation::config(reason)),
            InputValidation::Invalid(detail) => return Err(Violation::contract(detail)),
        }

        let requires_locking = self
            .locking_override
            .unwrap_or_else(|| machine.requires_locking());
        let resource = EventResource::new(Arc::clone(&self.memory), requires_locking);

        let mut lock_state: Option<LockState> = None;
        let mut error_ctx = ErrorContext::default();
        let result = self
            .run(&event, &content, machine, &resource, &mut lock_state, &mut error_ctx)
            .await;
        // Cleanup path: runs whatever `run` returned.
        resource.release_lock(&event.subject, lock_state).await;

        match result {
            Ok(output) => Ok(output),
            Err(StepError::Violation(violation)) => Err(violation),
            Err(StepError::Workflow(error)) => {
                tracing::warn!(
                    %error,
                    subject = %event.subject,
                    "workflow error; emitting system error event",
                );
                let sys = system_error_event(
                    self.source(),
                    error.as_ref(),
                    &event,
                    Some(content.execution.initiator.as_str()),
                    error_ctx.parent_subject.as_ref(),
                    error_ctx.init_event_id.as_deref(),
                    self.execution_cost,
                    self.trace,
                );
                Ok(ExecutionOutput::from_domained(vec![system_error_domained(
                    sys,
                )]))
            }
        }
    }

    async fn run(
        &self,
        event: &Event,
        content: &SubjectContent,
        machine: &Machine,
        resource: &EventResource,
        lock_state: &mut Option<LockState>,
        error_ctx: &mut ErrorContext,
    ) -> Result<ExecutionOutput, StepError> {
        let acquired = resource.acquire_lock(&event.subject).await?;
        *lock_state = Some(acquired);
        if acquired == LockState::NotAcquired {
            return Err(Violation::transaction(
                TransactionCause::LockUnacquired,
                format!("subject {} is locked by a concurrent invocation", event.subject),
            )
            .into());
        }

        let prev = resource.acquire_state(&event.subject).await?;

        let (parent_subject, init_event_id, prev_state) = match &prev {
            None => {
                if event.event_type != machine.source() {
                    tracing::warn!(
                        event_type = %event.event_type,
                        source = machine.source(),
                        "subject has no state and the event is not an init event; ignoring",
                    );
                    return Ok(ExecutionOutput::empty());
                }
                (init_parent_subject(event)?, event.id.clone(), None)
            }
            Some(record) => {
                let state: MachineState =
                    serde_json::from_value(record.state.clone()).map_err(|e| {
                        Violation::execution(format!(
                            "stored state for subject {} does not deserialize: {e}",
                            event.subject
                        ))
                    })?;
                (
                    record.parent_subject.clone(),
                    record.init_event_id.clone(),
                    Some(state),
                )
            }
        };
        error_ctx.parent_subject = parent_subject.clone();
        error_ctx.init_event_id = Some(init_event_id.clone());

        // The engine step is pure and synchronous; a panic in user
        // actions converts to a violation instead of poisoning the
        // invocation with the lock still held.
        let step = match catch_unwind(AssertUnwindSafe(|| {
            engine::execute(machine, prev_state, event)
        })) {
            Ok(result) => result?,
            Err(_) => {
                return Err(Violation::execution(format!(
                    "machine {:?} panicked while consuming event {}",
                    machine.id(),
                    event.id
                ))
                .into());
            }
        };

        let mut drafts = step.events;
        if let Some(output) = step.final_output {
            let to = content
                .meta
                .get(META_REDIRECT_TO)
                .cloned()
                .unwrap_or_else(|| content.execution.initiator.clone());
            drafts.push(
                EventDraft::new(machine.contracts().complete_event_type(), output).with_to(to),
            );
        }

        let factory = EventFactory::new(machine.contracts(), self.execution_cost, self.trace);
        let mut produced = Vec::with_capacity(drafts.len());
        for draft in drafts {
            produced.push(factory.build(
                draft,
                event,
                content,
                parent_subject.as_ref(),
                &init_event_id,
            )?);
        }

        let record = MachineMemoryRecord {
            init_event_id,
            subject: event.subject.clone(),
            parent_subject,
            status: if step.state.done {
                WorkflowStatus::Done
            } else {
                WorkflowStatus::Active
            },
            value: serde_json::to_value(&step.state.configuration).unwrap_or(Value::Null),
            state: serde_json::to_value(&step.state).map_err(|e| {
                Violation::execution(format!("machine state does not serialize: {e}"))
            })?,
            events: RecordEvents {
                consumed: Some(event.clone()),
                produced: produced
                    .iter()
                    .map(|d| {
                        (
                            d.event.id.clone(),
                            ProducedEvent {
                                event: d.event.clone(),
                                domains: d.domains.clone(),
                            },
                        )
                    })
                    .collect(),
                expected: None,
            },
            machine_definition: Some(machine.definition_json()),
        };
        resource
            .persist_state(&event.subject, &record, prev.as_ref())
            .await?;

        Ok(ExecutionOutput::from_domained(produced))
    }
}
