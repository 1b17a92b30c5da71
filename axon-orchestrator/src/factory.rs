//! The emittable-event factory — drafts in, routed events out.
//!
//! Each draft is classified exactly once: a completion (the self
//! contract's terminal type), a service request (matched by a service
//! contract's accepted type), or a pass-through (no contract — the
//! escape hatch, emitted unvalidated). Classification decides the
//! outbound subject, the consumer, the causal parent, and which schema
//! the payload must satisfy; the common routing fields are then filled
//! the same way for all three.

use axon_protocol::contract::ContractSet;
use axon_protocol::event::{
    DEFAULT_DOMAIN, DomainedEvent, ErrorPayload, Event, EventDraft, PARENT_SUBJECT_FIELD,
};
use axon_protocol::subject::{META_REDIRECT_TO, Subject, SubjectContent};
use axon_protocol::violation::{StepError, Violation};
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::BTreeMap;

/// Where outbound events take their trace headers from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TraceInheritance {
    /// Copy `traceparent`/`tracestate` from the consumed event.
    #[default]
    EventHeaders,
    /// Leave the headers unset; the ambient tracing subscriber owns
    /// propagation.
    AmbientContext,
}

/// Builds fully-formed outbound events from drafts.
pub struct EventFactory<'a> {
    contracts: &'a ContractSet,
    execution_cost: Decimal,
    trace: TraceInheritance,
}

impl<'a> EventFactory<'a> {
    /// Create a factory for one invocation.
    pub fn new(
        contracts: &'a ContractSet,
        execution_cost: Decimal,
        trace: TraceInheritance,
    ) -> Self {
        Self {
            contracts,
            execution_cost,
            trace,
        }
    }

    /// Transform one draft into a routed, validated outbound event.
    ///
    /// Schema mismatches are workflow errors (the machine produced bad
    /// data — the initiator hears about it as a system-error event); a
    /// malformed parent subject is an execution violation.
    pub fn build(
        &self,
        draft: EventDraft,
        consumed: &Event,
        consumed_content: &SubjectContent,
        parent_subject: Option<&Subject>,
        init_event_id: &str,
    ) -> Result<DomainedEvent, StepError> {
        let domains = dedupe_domains(&draft.domains);
        let source = self.contracts.source().to_string();
        let self_contract = self.contracts.self_contract();

        let (subject, to, parentid, dataschema) =
            if draft.event_type == self.contracts.complete_event_type() {
                self_contract
                    .validate_emit(&draft.event_type, &draft.data)
                    .map_err(workflow)?;
                let subject = parent_subject
                    .cloned()
                    .unwrap_or_else(|| consumed.subject.clone());
                let to = draft.to.clone().unwrap_or_else(|| {
                    consumed_content
                        .meta
                        .get(META_REDIRECT_TO)
                        .cloned()
                        .unwrap_or_else(|| consumed_content.execution.initiator.clone())
                });
                (
                    subject,
                    to,
                    init_event_id.to_string(),
                    Some(self_contract.dataschema()),
                )
            } else if let Some(callee) = self.contracts.service_accepting(&draft.event_type) {
                callee
                    .validate_accepts(&draft.data)
                    .map_err(workflow)?;
                let subject = if callee.is_orchestrator() {
                    self.mint_callee_subject(&draft, callee.accepts_type(), callee.version())?
                } else {
                    consumed.subject.clone()
                };
                let to = draft
                    .to
                    .clone()
                    .unwrap_or_else(|| draft.event_type.clone());
                (
                    subject,
                    to,
                    consumed.id.clone(),
                    Some(callee.dataschema()),
                )
            } else {
                // No contract — pass through untouched.
                let to = draft
                    .to
                    .clone()
                    .unwrap_or_else(|| draft.event_type.clone());
                (
                    consumed.subject.clone(),
                    to,
                    consumed.id.clone(),
                    draft.dataschema.clone(),
                )
            };

        let mut event = Event::new(draft.event_type, source.clone(), subject, draft.data)
            .with_to(to)
            .with_parentid(parentid);
        event.dataschema = dataschema;
        // Deliberately not inherited from the consumed event: an
        // orchestrator's own completion routing is pinned in its
        // subject meta, not forwarded downstream.
        event.redirectto = Some(draft.redirectto.unwrap_or(source));
        event.accesscontrol = draft
            .accesscontrol
            .or_else(|| consumed.accesscontrol.clone());
        event.executionunits = Some(draft.executionunits.unwrap_or(self.execution_cost));
        if self.trace == TraceInheritance::EventHeaders {
            event.traceparent = consumed.traceparent.clone();
            event.tracestate = consumed.tracestate.clone();
        }

        Ok(DomainedEvent {
            event,
            domains,
        })
    }

    /// Compute the subject a peer-orchestrator request travels under:
    /// derived from the draft's `parentSubject$$` when it names one,
    /// minted fresh otherwise, with completion rerouted back to us (or
    /// wherever the draft redirects).
    fn mint_callee_subject(
        &self,
        draft: &EventDraft,
        callee_name: &str,
        callee_version: &semver::Version,
    ) -> Result<Subject, StepError> {
        let mut meta = BTreeMap::new();
        meta.insert(
            META_REDIRECT_TO.to_string(),
            draft
                .redirectto
                .clone()
                .unwrap_or_else(|| self.contracts.source().to_string()),
        );
        match draft.data.get(PARENT_SUBJECT_FIELD) {
            Some(Value::String(parent)) => {
                Subject::from_parent(&Subject::from(parent.as_str()), callee_name, callee_version, meta)
                    .map_err(|e| {
                        Violation::execution(format!(
                            "draft for {:?} carries an invalid parent subject: {e}",
                            draft.event_type
                        ))
                        .into()
                    })
            }
            None | Some(Value::Null) => Subject::with_meta(
                callee_name,
                callee_version,
                self.contracts.source(),
                meta,
            )
            .map_err(|e| {
                Violation::execution(format!(
                    "cannot mint subject for {:?}: {e}",
                    draft.event_type
                ))
                .into()
            }),
            Some(other) => Err(Violation::execution(format!(
                "{PARENT_SUBJECT_FIELD} in a draft for {:?} must be a string or null, got {other}",
                draft.event_type
            ))
            .into()),
        }
    }
}

/// Build the single `sys.<source>.error` event a caught workflow error
/// turns into: addressed to the initiator, on the parent's subject when
/// one exists, causally tied to the init event.
pub fn system_error_event(
    source: &str,
    error: &(dyn std::error::Error + Send + Sync),
    consumed: &Event,
    initiator: Option<&str>,
    parent_subject: Option<&Subject>,
    init_event_id: Option<&str>,
    execution_cost: Decimal,
    trace: TraceInheritance,
) -> Event {
    let payload =
        serde_json::to_value(ErrorPayload::from_error(error)).unwrap_or(Value::Null);
    let subject = parent_subject
        .cloned()
        .unwrap_or_else(|| consumed.subject.clone());
    let mut event = Event::new(
        format!("sys.{source}.error"),
        source,
        subject,
        payload,
    )
    .with_to(initiator.unwrap_or(&consumed.source))
    .with_parentid(init_event_id.unwrap_or(&consumed.id))
    .with_executionunits(execution_cost);
    if trace == TraceInheritance::EventHeaders {
        event.traceparent = consumed.traceparent.clone();
        event.tracestate = consumed.tracestate.clone();
    }
    event
}

/// Tag a system-error event with the default domain.
pub fn system_error_domained(event: Event) -> DomainedEvent {
    DomainedEvent {
        event,
        domains: vec![DEFAULT_DOMAIN.to_string()],
    }
}

/// Read and validate the `parentSubject$$` field of an init event:
/// absent or null means a root workflow, a string must decode as a
/// subject, anything else is an execution violation.
pub fn init_parent_subject(event: &Event) -> Result<Option<Subject>, StepError> {
    match event.data.get(PARENT_SUBJECT_FIELD) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => {
            let subject = Subject::from(s.as_str());
            subject.parse().map_err(|e| {
                Violation::execution(format!(
                    "init event {} carries an invalid {PARENT_SUBJECT_FIELD}: {e}",
                    event.id
                ))
            })?;
            Ok(Some(subject))
        }
        Some(other) => Err(Violation::execution(format!(
            "{PARENT_SUBJECT_FIELD} on init event {} must be a string or null, got {other}",
            event.id
        ))
        .into()),
    }
}

fn workflow(e: impl std::error::Error + Send + Sync + 'static) -> StepError {
    StepError::Workflow(Box::new(e))
}

fn dedupe_domains(domains: &[String]) -> Vec<String> {
    if domains.is_empty() {
        return vec![DEFAULT_DOMAIN.to_string()];
    }
    let mut seen = Vec::with_capacity(domains.len());
    for domain in domains {
        if !seen.contains(domain) {
            seen.push(domain.clone());
        }
    }
    seen
}
