//! Contracts — the schema-pinned vocabulary a workflow speaks.
//!
//! A [`VersionedContract`] is the versioned view of one service or
//! orchestrator API: the event type it accepts, the event types it
//! emits, and a JSON Schema per payload. Whether a contract belongs to a
//! peer orchestrator is a [`ContractKind`] variant, so "am I invoking a
//! peer?" is a pattern match rather than a metadata probe.
//!
//! A [`ContractSet`] bundles one orchestrator's own contract with the
//! services it may call, and owns ingress validation for both pipeline
//! variants.

use crate::event::{ErrorPayload, Event};
use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Whether a contract describes a plain service or a peer orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractKind {
    /// Request/response service: responses come back on the caller's
    /// subject.
    Regular,
    /// A peer orchestrator: invoking it mints a new subject, and its
    /// terminal output arrives as the declared completion type.
    Orchestrator {
        /// The event type signalling terminal workflow output.
        complete_event_type: String,
    },
}

/// Contract validation errors.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ContractError {
    /// The payload fails the schema for the named event type.
    #[error("data for {event_type:?} violates its schema: {detail}")]
    SchemaMismatch {
        /// The event type whose schema was checked.
        event_type: String,
        /// First schema error, path and message.
        detail: String,
    },

    /// The contract declares no emit of the named type.
    #[error("contract {uri:?} declares no emit named {event_type:?}")]
    UnknownEmit {
        /// The contract URI.
        uri: String,
        /// The requested emit type.
        event_type: String,
    },

    /// The stored schema document itself does not compile.
    #[error("schema for {event_type:?} is not a valid JSON Schema: {detail}")]
    InvalidSchema {
        /// The event type whose schema failed to compile.
        event_type: String,
        /// Compiler error.
        detail: String,
    },
}

/// One version of one contract: accepted type, emitted types, schemas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedContract {
    uri: String,
    version: Version,
    accepts_type: String,
    accepts_schema: Value,
    emits: BTreeMap<String, Value>,
    kind: ContractKind,
}

impl VersionedContract {
    /// A plain service contract.
    pub fn regular(
        uri: impl Into<String>,
        version: Version,
        accepts_type: impl Into<String>,
        accepts_schema: Value,
    ) -> Self {
        Self {
            uri: uri.into(),
            version,
            accepts_type: accepts_type.into(),
            accepts_schema,
            emits: BTreeMap::new(),
            kind: ContractKind::Regular,
        }
    }

    /// An orchestrator contract. The completion emit is registered
    /// under `complete_event_type` with `complete_schema`.
    pub fn orchestrator(
        uri: impl Into<String>,
        version: Version,
        accepts_type: impl Into<String>,
        init_schema: Value,
        complete_event_type: impl Into<String>,
        complete_schema: Value,
    ) -> Self {
        let complete_event_type = complete_event_type.into();
        let mut emits = BTreeMap::new();
        emits.insert(complete_event_type.clone(), complete_schema);
        Self {
            uri: uri.into(),
            version,
            accepts_type: accepts_type.into(),
            accepts_schema: init_schema,
            emits,
            kind: ContractKind::Orchestrator {
                complete_event_type,
            },
        }
    }

    /// Register an additional emit type.
    pub fn with_emit(mut self, event_type: impl Into<String>, schema: Value) -> Self {
        self.emits.insert(event_type.into(), schema);
        self
    }

    /// The contract URI.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// The pinned version.
    pub fn version(&self) -> &Version {
        &self.version
    }

    /// The event type this contract accepts.
    pub fn accepts_type(&self) -> &str {
        &self.accepts_type
    }

    /// The declared emit types and their schemas.
    pub fn emits(&self) -> &BTreeMap<String, Value> {
        &self.emits
    }

    /// Which kind of contract this is.
    pub fn kind(&self) -> &ContractKind {
        &self.kind
    }

    /// Whether this contract belongs to a peer orchestrator.
    pub fn is_orchestrator(&self) -> bool {
        matches!(self.kind, ContractKind::Orchestrator { .. })
    }

    /// The completion type, for orchestrator contracts.
    pub fn complete_event_type(&self) -> Option<&str> {
        match &self.kind {
            ContractKind::Orchestrator {
                complete_event_type,
            } => Some(complete_event_type),
            ContractKind::Regular => None,
        }
    }

    /// Canonical `uri/version` schema pointer.
    pub fn dataschema(&self) -> String {
        format!("{}/{}", self.uri, self.version)
    }

    /// The system-error event type paired with this contract.
    pub fn system_error_type(&self) -> String {
        format!("sys.{}.error", self.accepts_type)
    }

    /// Validate a payload against the accepted type's schema.
    pub fn validate_accepts(&self, data: &Value) -> Result<(), ContractError> {
        check_schema(&self.accepts_schema, &self.accepts_type, data)
    }

    /// Validate a payload against a declared emit's schema.
    pub fn validate_emit(&self, event_type: &str, data: &Value) -> Result<(), ContractError> {
        let schema = self
            .emits
            .get(event_type)
            .ok_or_else(|| ContractError::UnknownEmit {
                uri: self.uri.clone(),
                event_type: event_type.to_string(),
            })?;
        check_schema(schema, event_type, data)
    }
}

fn check_schema(schema: &Value, event_type: &str, data: &Value) -> Result<(), ContractError> {
    let validator =
        jsonschema::validator_for(schema).map_err(|e| ContractError::InvalidSchema {
            event_type: event_type.to_string(),
            detail: e.to_string(),
        })?;
    validator
        .validate(data)
        .map_err(|e| ContractError::SchemaMismatch {
            event_type: event_type.to_string(),
            detail: e.to_string(),
        })
}

/// Errors building a [`ContractSet`].
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ContractSetError {
    /// The self contract is not an orchestrator contract.
    #[error("self contract {0:?} must be an orchestrator contract")]
    SelfNotOrchestrator(String),

    /// Two services were registered under the same name.
    #[error("duplicate service name {0:?}")]
    DuplicateServiceName(String),

    /// Two service contracts share a URI.
    #[error("duplicate service contract uri {0:?}")]
    DuplicateServiceUri(String),

    /// The self contract's URI also appears as a service — workflows
    /// may not invoke themselves.
    #[error("self contract uri {0:?} registered as a service")]
    SelfInvocation(String),
}

/// Outcome of validating an inbound event against a contract set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputValidation {
    /// The event belongs to a contract and its payload satisfies the
    /// schema.
    Valid,
    /// No contract accepts or emits this event type — a wiring problem,
    /// not a data problem.
    Unresolved(String),
    /// A contract matched but the payload fails its schema.
    Invalid(String),
}

/// One orchestrator's own contract plus the services it may invoke.
///
/// Only constructible through [`ContractSet::new`], which is where the
/// uniqueness and no-self-invocation invariants are enforced.
#[derive(Debug, Clone, PartialEq)]
pub struct ContractSet {
    self_contract: VersionedContract,
    services: BTreeMap<String, VersionedContract>,
    complete_event_type: String,
}

impl ContractSet {
    /// Bundle a self contract with named service contracts.
    ///
    /// Enforced here, once: the self contract is orchestrator-kind,
    /// service names and URIs are unique, and the self URI is not among
    /// the services.
    pub fn new(
        self_contract: VersionedContract,
        services: impl IntoIterator<Item = (String, VersionedContract)>,
    ) -> Result<Self, ContractSetError> {
        let complete_event_type = match self_contract.complete_event_type() {
            Some(t) => t.to_string(),
            None => {
                return Err(ContractSetError::SelfNotOrchestrator(
                    self_contract.uri().to_string(),
                ));
            }
        };
        let mut map = BTreeMap::new();
        let mut uris = BTreeSet::new();
        for (name, contract) in services {
            if contract.uri() == self_contract.uri() {
                return Err(ContractSetError::SelfInvocation(contract.uri().to_string()));
            }
            if !uris.insert(contract.uri().to_string()) {
                return Err(ContractSetError::DuplicateServiceUri(
                    contract.uri().to_string(),
                ));
            }
            if map.insert(name.clone(), contract).is_some() {
                return Err(ContractSetError::DuplicateServiceName(name));
            }
        }
        Ok(Self {
            self_contract,
            services: map,
            complete_event_type,
        })
    }

    /// The orchestrator's own contract.
    pub fn self_contract(&self) -> &VersionedContract {
        &self.self_contract
    }

    /// The registered service contracts, by name.
    pub fn services(&self) -> &BTreeMap<String, VersionedContract> {
        &self.services
    }

    /// The orchestrator source: the event type the self contract
    /// accepts, and the identity outbound events carry as `source`.
    pub fn source(&self) -> &str {
        self.self_contract.accepts_type()
    }

    /// The self contract's completion event type.
    pub fn complete_event_type(&self) -> &str {
        &self.complete_event_type
    }

    /// The service contract accepting the given event type, if any.
    pub fn service_accepting(&self, event_type: &str) -> Option<&VersionedContract> {
        self.services
            .values()
            .find(|c| c.accepts_type() == event_type)
    }

    /// Whether any service declares more than one non-system-error emit
    /// type — the fan-in shape that forces pessimistic locking.
    pub fn has_multi_emit_service(&self) -> bool {
        self.services.values().any(|c| {
            let sys = c.system_error_type();
            c.emits().keys().filter(|t| **t != sys).count() > 1
        })
    }

    /// Validate an inbound event: the init type against the self
    /// contract, service responses against the matching emit schema,
    /// system errors against the error payload shape.
    pub fn validate_input(&self, event: &Event) -> InputValidation {
        if event.event_type == self.source() {
            return match self.self_contract.validate_accepts(&event.data) {
                Ok(()) => InputValidation::Valid,
                Err(e) => InputValidation::Invalid(e.to_string()),
            };
        }
        if self
            .services
            .values()
            .any(|c| c.system_error_type() == event.event_type)
        {
            return match serde_json::from_value::<ErrorPayload>(event.data.clone()) {
                Ok(_) => InputValidation::Valid,
                Err(e) => InputValidation::Invalid(format!(
                    "system error payload for {:?} is malformed: {e}",
                    event.event_type
                )),
            };
        }
        for contract in self.services.values() {
            if contract.emits().contains_key(&event.event_type) {
                return match contract.validate_emit(&event.event_type, &event.data) {
                    Ok(()) => InputValidation::Valid,
                    Err(e) => InputValidation::Invalid(e.to_string()),
                };
            }
        }
        InputValidation::Unresolved(format!(
            "event type {:?} matches no contract known to {:?}",
            event.event_type,
            self.source()
        ))
    }
}
