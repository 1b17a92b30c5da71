//! Event types — the wire unit every workflow consumes and produces.

use crate::subject::Subject;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Write as _;

/// The domain tag assigned to outbound events that declare none.
pub const DEFAULT_DOMAIN: &str = "default";

/// Data field through which an init event (or a draft invoking a peer
/// orchestrator) names the parent orchestration's subject.
pub const PARENT_SUBJECT_FIELD: &str = "parentSubject$$";

/// One broker event.
///
/// The shape follows the CloudEvents attribute vocabulary plus the
/// routing extensions the orchestrator relies on. Keep the four address
/// fields distinct — they answer different questions:
///
/// - `source` — who emitted this event,
/// - `to` — who should consume it next,
/// - `redirectto` — where the eventual *completion* should go instead
///   of the initiator,
/// - `parentid` — causal lineage (which event this one answers).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique event id (uuid v4 unless the transport supplies one).
    pub id: String,
    /// The event type, e.g. `com.number.increment`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Emitter identity.
    pub source: String,
    /// The workflow instance this event belongs to.
    pub subject: Subject,
    /// Next consumer. Defaults to the event type when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    /// Canonical `uri/version` of the schema `data` satisfies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataschema: Option<String>,
    /// Opaque payload.
    pub data: Value,
    /// W3C trace context header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traceparent: Option<String>,
    /// W3C trace state header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracestate: Option<String>,
    /// Opaque access-control token, inherited along the event chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accesscontrol: Option<String>,
    /// Completion-routing override carried by requests into an
    /// orchestrator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirectto: Option<String>,
    /// Id of the event this one answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parentid: Option<String>,
    /// Cost units charged for producing this event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executionunits: Option<Decimal>,
}

impl Event {
    /// Create an event with a fresh uuid id; routing fields start unset.
    pub fn new(
        event_type: impl Into<String>,
        source: impl Into<String>,
        subject: Subject,
        data: Value,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            source: source.into(),
            subject,
            to: None,
            dataschema: None,
            data,
            traceparent: None,
            tracestate: None,
            accesscontrol: None,
            redirectto: None,
            parentid: None,
            executionunits: None,
        }
    }

    /// Replace the generated id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the consumer address.
    pub fn with_to(mut self, to: impl Into<String>) -> Self {
        self.to = Some(to.into());
        self
    }

    /// Set the causal parent id.
    pub fn with_parentid(mut self, parentid: impl Into<String>) -> Self {
        self.parentid = Some(parentid.into());
        self
    }

    /// Set the completion-routing override.
    pub fn with_redirectto(mut self, redirectto: impl Into<String>) -> Self {
        self.redirectto = Some(redirectto.into());
        self
    }

    /// Set the schema pointer.
    pub fn with_dataschema(mut self, dataschema: impl Into<String>) -> Self {
        self.dataschema = Some(dataschema.into());
        self
    }

    /// Set the access-control token.
    pub fn with_accesscontrol(mut self, accesscontrol: impl Into<String>) -> Self {
        self.accesscontrol = Some(accesscontrol.into());
        self
    }

    /// Set the execution-unit cost.
    pub fn with_executionunits(mut self, units: Decimal) -> Self {
        self.executionunits = Some(units);
        self
    }

    /// Set the W3C trace context headers.
    pub fn with_trace(mut self, traceparent: impl Into<String>, tracestate: Option<String>) -> Self {
        self.traceparent = Some(traceparent.into());
        self.tracestate = tracestate;
        self
    }
}

/// A raw outbound-event descriptor, produced by machine actions or
/// resumable handlers before contract resolution.
///
/// The emittable-event factory turns a draft into a full [`Event`]:
/// picking the matching contract, validating `data`, computing the
/// outbound subject, and filling the routing fields. Drafts whose type
/// matches no contract pass through unvalidated — the escape hatch for
/// emitting out-of-contract events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDraft {
    /// The outbound event type.
    #[serde(rename = "type")]
    pub event_type: String,
    /// The outbound payload.
    pub data: Value,
    /// Consumer override; defaults to the event type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    /// Schema pointer for pass-through drafts; contract-matched drafts
    /// get the contract's canonical form instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataschema: Option<String>,
    /// Completion-routing override for the produced event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirectto: Option<String>,
    /// Access-control override; defaults to the consumed event's token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accesscontrol: Option<String>,
    /// Cost override; defaults to the orchestrator's configured cost.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executionunits: Option<Decimal>,
    /// Broadcast domain tags; empty means `default`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub domains: Vec<String>,
}

impl EventDraft {
    /// Create a draft with only type and payload.
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            to: None,
            dataschema: None,
            redirectto: None,
            accesscontrol: None,
            executionunits: None,
            domains: Vec::new(),
        }
    }

    /// Set the consumer address.
    pub fn with_to(mut self, to: impl Into<String>) -> Self {
        self.to = Some(to.into());
        self
    }

    /// Set the completion-routing override.
    pub fn with_redirectto(mut self, redirectto: impl Into<String>) -> Self {
        self.redirectto = Some(redirectto.into());
        self
    }

    /// Set the schema pointer (pass-through drafts only).
    pub fn with_dataschema(mut self, dataschema: impl Into<String>) -> Self {
        self.dataschema = Some(dataschema.into());
        self
    }

    /// Set the access-control override.
    pub fn with_accesscontrol(mut self, accesscontrol: impl Into<String>) -> Self {
        self.accesscontrol = Some(accesscontrol.into());
        self
    }

    /// Set the cost override.
    pub fn with_executionunits(mut self, units: Decimal) -> Self {
        self.executionunits = Some(units);
        self
    }

    /// Add a broadcast domain tag.
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domains.push(domain.into());
        self
    }
}

/// A fully-formed outbound event together with its broadcast domains.
///
/// An event tagged with several domains is delivered once per domain
/// bucket but appears exactly once in the flat `all` view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainedEvent {
    /// The event.
    pub event: Event,
    /// Deduplicated domain tags, first occurrence first.
    pub domains: Vec<String>,
}

/// Payload of a `sys.<source>.error` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    /// Stable failure class name.
    pub error_name: String,
    /// Human-readable message.
    pub error_message: String,
    /// Flattened cause chain, when one exists.
    #[serde(default)]
    pub error_stack: Option<String>,
}

impl ErrorPayload {
    /// Build a payload from any error, flattening its source chain.
    pub fn from_error<E>(error: &E) -> Self
    where
        E: std::error::Error + ?Sized,
    {
        let mut stack = String::new();
        let mut source = error.source();
        while let Some(cause) = source {
            if !stack.is_empty() {
                stack.push('\n');
            }
            let _ = write!(stack, "caused by: {cause}");
            source = cause.source();
        }
        Self {
            error_name: "WorkflowError".to_string(),
            error_message: error.to_string(),
            error_stack: (!stack.is_empty()).then_some(stack),
        }
    }
}
