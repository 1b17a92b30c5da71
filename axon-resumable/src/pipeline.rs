//! The resumable pipeline — the handler-function sibling of the
//! state-machine orchestrator.
//!
//! Same skeleton, no chart: a handler per contract version advances the
//! workflow, and the pipeline tracks which produced requests are still
//! awaiting responses. An inbound event whose `parentid` matches an
//! awaited request id is filed into its bucket before the handler runs;
//! when the handler emits new requests, the awaited set is reset to
//! them.

use crate::handler::{HandlerInput, HandlerOutput, ResumableVersion};
use axon_orchestrator::factory::{
    EventFactory, TraceInheritance, init_parent_subject, system_error_domained,
    system_error_event,
};
use axon_orchestrator::output::ExecutionOutput;
use axon_orchestrator::resource::{EventResource, LockState};
use axon_protocol::contract::InputValidation;
use axon_protocol::event::{DomainedEvent, Event, EventDraft};
use axon_protocol::memory::{
    MachineMemory, MachineMemoryRecord, ProducedEvent, RecordEvents, WorkflowStatus,
};
use axon_protocol::subject::{META_REDIRECT_TO, Subject, SubjectContent};
use axon_protocol::violation::{StepError, TransactionCause, Violation};
use rust_decimal::Decimal;
use semver::Version;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::Instrument;

#[derive(Default)]
struct ErrorContext {
    parent_subject: Option<Subject>,
    init_event_id: Option<String>,
}

/// The handler-function orchestrator: same contract as the
/// state-machine pipeline, with workflow logic supplied as one async
/// handler per version instead of a chart.
///
/// Construction validates everything up front — shared source, unique
/// versions, non-negative cost — and surfaces problems as config
/// violations.
pub struct Resumable {
    source: String,
    versions: BTreeMap<Version, ResumableVersion>,
    memory: Arc<dyn MachineMemory>,
    execution_cost: Decimal,
    requires_locking: bool,
    trace: TraceInheritance,
}

impl std::fmt::Debug for Resumable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resumable")
            .field("source", &self.source)
            .field("versions", &self.versions.keys().collect::<Vec<_>>())
            .field("execution_cost", &self.execution_cost)
            .field("requires_locking", &self.requires_locking)
            .field("trace", &self.trace)
            .finish()
    }
}

impl Resumable {
    /// Create a resumable workflow over a memory backend and one
    /// handler per version.
    ///
    /// All versions must share one source; versions must be unique;
    /// `execution_cost` must be non-negative. Locking defaults to on —
    /// a workflow awaiting several responses is exactly the
    /// concurrent-writer case — and can be disabled with
    /// [`Resumable::with_locking`].
    pub fn new(
        memory: Arc<dyn MachineMemory>,
        versions: Vec<ResumableVersion>,
        execution_cost: Decimal,
    ) -> Result<Self, Violation> {
        if execution_cost < Decimal::ZERO {
            return Err(Violation::config(format!(
                "execution cost must be non-negative, got {execution_cost}"
            )));
        }
        let mut iter = versions.into_iter();
        let first = iter
            .next()
            .ok_or_else(|| Violation::config("a resumable workflow needs at least one version"))?;
        let source = first.contracts.source().to_string();
        let mut map = BTreeMap::new();
        map.insert(first.contracts.self_contract().version().clone(), first);
        for version in iter {
            if version.contracts.source() != source {
                return Err(Violation::config(format!(
                    "handler for {:?} registered alongside {:?}; all versions must share one source",
                    version.contracts.source(),
                    source
                )));
            }
            let key = version.contracts.self_contract().version().clone();
            if map.insert(key.clone(), version).is_some() {
                return Err(Violation::config(format!(
                    "duplicate handler version {key} for {source:?}"
                )));
            }
        }
        Ok(Self {
            source,
            versions: map,
            memory,
            execution_cost,
            requires_locking: true,
            trace: TraceInheritance::default(),
        })
    }

    /// Override the locking decision.
    pub fn with_locking(mut self, requires_locking: bool) -> Self {
        self.requires_locking = requires_locking;
        self
    }

    /// Choose where outbound events take their trace headers from.
    pub fn with_trace_inheritance(mut self, trace: TraceInheritance) -> Self {
        self.trace = trace;
        self
    }

    /// The workflow source — the event type that starts it.
    pub fn source(&self) -> &str {
        &self.source
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

        if content.orchestrator.name != self.source {
            tracing::warn!(
                addressed = %content.orchestrator.name,
                source = %self.source,
                "event subject addresses a different orchestrator; ignoring",
            );
            return Ok(ExecutionOutput::empty());
        }

        let version = self
            .versions
            .get(&content.orchestrator.version)
            .ok_or_else(|| {
                Violation::config(format!(
                    "no handler registered for {:?} at version {}",
                    self.source, content.orchestrator.version
                ))
            })?;

        match version.contracts.validate_input(&event) {
            InputValidation::Valid => {}
            InputValidation::Unresolved(reason) => return Err(Violation::config(reason)),
            InputValidation::Invalid(detail) => return Err(Violation::contract(detail)),
        }

        let resource = EventResource::new(Arc::clone(&self.memory), self.requires_locking);
        let mut lock_state: Option<LockState> = None;
        let mut error_ctx = ErrorContext::default();
        let result = self
            .run(&event, &content, version, &resource, &mut lock_state, &mut error_ctx)
            .await;
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
                    &self.source,
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
        version: &ResumableVersion,
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

        if let Some(record) = &prev {
            if record.status == WorkflowStatus::Done {
                tracing::warn!(
                    subject = %event.subject,
                    event_id = %event.id,
                    "workflow is done; ignoring event",
                );
                return Ok(ExecutionOutput::empty());
            }
        }

        let (parent_subject, init_event_id, context) = match &prev {
            None => {
                if event.event_type != self.source {
                    tracing::warn!(
                        event_type = %event.event_type,
                        source = %self.source,
                        "subject has no state and the event is not an init event; ignoring",
                    );
                    return Ok(ExecutionOutput::empty());
                }
                (init_parent_subject(event)?, event.id.clone(), None)
            }
            Some(record) => {
                let context = if record.value.is_null() {
                    None
                } else {
                    Some(record.value.clone())
                };
                (
                    record.parent_subject.clone(),
                    record.init_event_id.clone(),
                    context,
                )
            }
        };
        error_ctx.parent_subject = parent_subject.clone();
        error_ctx.init_event_id = Some(init_event_id.clone());

        // File the response into its awaited bucket before the handler
        // sees anything.
        let mut expected: BTreeMap<String, Vec<Event>> = prev
            .as_ref()
            .and_then(|r| r.events.expected.clone())
            .unwrap_or_default();
        if let Some(parentid) = &event.parentid {
            if let Some(bucket) = expected.get_mut(parentid) {
                bucket.push(event.clone());
            }
        }
        let collected = collect_by_type(&expected);

        let output = version
            .handler
            .handle(HandlerInput {
                context: context.clone(),
                record: prev.as_ref(),
                event,
                contracts: &version.contracts,
                collected: &collected,
            })
            .await
            .map_err(StepError::Workflow)?;

        let HandlerOutput {
            context: new_context,
            complete,
            services,
        } = output;

        let factory = EventFactory::new(&version.contracts, self.execution_cost, self.trace);
        let mut produced: Vec<DomainedEvent> = Vec::with_capacity(services.len() + 1);
        for draft in services {
            produced.push(factory.build(
                draft,
                event,
                content,
                parent_subject.as_ref(),
                &init_event_id,
            )?);
        }
        let request_ids: Vec<String> =
            produced.iter().map(|d| d.event.id.clone()).collect();

        // The completion draft goes last, after every service request.
        if let Some(terminal) = &complete {
            let to = content
                .meta
                .get(META_REDIRECT_TO)
                .cloned()
                .unwrap_or_else(|| content.execution.initiator.clone());
            let draft = EventDraft::new(
                version.contracts.complete_event_type(),
                terminal.clone(),
            )
            .with_to(to);
            produced.push(factory.build(
                draft,
                event,
                content,
                parent_subject.as_ref(),
                &init_event_id,
            )?);
        }

        // New requests reset the awaited set; otherwise the appended
        // buckets carry forward.
        let expected_new: BTreeMap<String, Vec<Event>> = if request_ids.is_empty() {
            expected
        } else {
            request_ids
                .into_iter()
                .map(|id| (id, Vec::new()))
                .collect()
        };
        let produced_map: BTreeMap<String, ProducedEvent> = if produced.is_empty() {
            prev.as_ref().map(|r| r.events.produced.clone()).unwrap_or_default()
        } else {
            produced
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
                .collect()
        };

        let final_context = new_context.or(context);
        let record = MachineMemoryRecord {
            init_event_id,
            subject: event.subject.clone(),
            parent_subject,
            status: if complete.is_some() {
                WorkflowStatus::Done
            } else {
                WorkflowStatus::Active
            },
            value: final_context.clone().unwrap_or(Value::Null),
            state: json!({ "context": final_context }),
            events: RecordEvents {
                consumed: Some(event.clone()),
                produced: produced_map,
                expected: Some(expected_new),
            },
            machine_definition: None,
        };
        resource
            .persist_state(&event.subject, &record, prev.as_ref())
            .await?;

        Ok(ExecutionOutput::from_domained(produced))
    }
}

/// Regroup awaited-response buckets by the response event type — the
/// view handlers consume.
fn collect_by_type(expected: &BTreeMap<String, Vec<Event>>) -> BTreeMap<String, Vec<Event>> {
    let mut by_type: BTreeMap<String, Vec<Event>> = BTreeMap::new();
    for bucket in expected.values() {
        for event in bucket {
            by_type
                .entry(event.event_type.clone())
                .or_default()
                .push(event.clone());
        }
    }
    by_type
}
