//! Chart validation and the immutable [`Machine`] it produces.

use crate::chart::{
    Behavior, MachineConfig, RESERVED_ENQUEUE_ACTION, RESERVED_NODE_NAMES, StateKind, StateNode,
    TransitionConfig,
};
use axon_protocol::contract::{ContractSet, ContractSetError, InputValidation, VersionedContract};
use axon_protocol::event::Event;
use semver::Version;
use std::collections::BTreeMap;
use thiserror::Error;

/// Chart construction errors.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum BuildError {
    /// The chart version and the self contract version disagree.
    #[error("chart version {config} does not match self contract version {contract}")]
    VersionMismatch {
        /// Version declared by the chart config.
        config: Version,
        /// Version pinned by the self contract.
        contract: Version,
    },

    /// A reserved name was used for a state, transition event, or
    /// action.
    #[error("reserved name {name:?} used as {position}")]
    ReservedName {
        /// The offending name.
        name: String,
        /// Where it appeared.
        position: &'static str,
    },

    /// A transition targets a state that does not exist.
    #[error("state {path:?}: unknown transition target {target:?}")]
    UnknownTarget {
        /// Source state path.
        path: String,
        /// The unresolved target.
        target: String,
    },

    /// A transition or node references an unregistered action.
    #[error("state {path:?}: unknown action {name:?}")]
    UnknownAction {
        /// State path referencing the action.
        path: String,
        /// The missing action name.
        name: String,
    },

    /// A transition references an unregistered guard.
    #[error("state {path:?}: unknown guard {name:?}")]
    UnknownGuard {
        /// State path referencing the guard.
        path: String,
        /// The missing guard name.
        name: String,
    },

    /// A compound state's `initial` is missing or not one of its
    /// children.
    #[error("compound state {path:?} has missing or unknown initial state")]
    BadInitial {
        /// The compound state's path.
        path: String,
    },

    /// A parallel state needs at least two regions.
    #[error("parallel state {0:?} needs at least two regions")]
    DegenerateParallel(String),

    /// Final states are leaves: no children, no transitions.
    #[error("final state {0:?} may not declare children or transitions")]
    FinalWithBehavior(String),

    /// An atomic state declares children.
    #[error("atomic state {0:?} declares children; mark it compound or parallel")]
    AtomicWithChildren(String),

    /// The contract set itself is invalid.
    #[error(transparent)]
    Contracts(#[from] ContractSetError),
}

/// Validates a chart config against its behavior table and contracts,
/// and derives the machine's locking requirement.
pub struct MachineBuilder {
    config: MachineConfig,
    behavior: Behavior,
    self_contract: VersionedContract,
    services: Vec<(String, VersionedContract)>,
}

impl MachineBuilder {
    /// Start building a machine from its chart, behavior, and self
    /// contract.
    pub fn new(
        config: MachineConfig,
        behavior: Behavior,
        self_contract: VersionedContract,
    ) -> Self {
        Self {
            config,
            behavior,
            self_contract,
            services: Vec::new(),
        }
    }

    /// Register a service contract this machine may invoke.
    pub fn service(mut self, name: impl Into<String>, contract: VersionedContract) -> Self {
        self.services.push((name.into(), contract));
        self
    }

    /// Validate everything and produce the immutable [`Machine`].
    pub fn build(self) -> Result<Machine, BuildError> {
        let contracts = ContractSet::new(self.self_contract, self.services)?;

        if self.config.version != *contracts.self_contract().version() {
            return Err(BuildError::VersionMismatch {
                config: self.config.version.clone(),
                contract: contracts.self_contract().version().clone(),
            });
        }

        for name in self.behavior.action_names() {
            if name == RESERVED_ENQUEUE_ACTION || RESERVED_NODE_NAMES.contains(&name) {
                return Err(BuildError::ReservedName {
                    name: name.to_string(),
                    position: "an action name",
                });
            }
        }

        if !self.config.states.contains_key(&self.config.initial) {
            return Err(BuildError::BadInitial {
                path: self.config.id.clone(),
            });
        }

        let parallel_detected = walk(&self.config, &self.behavior)?;
        let requires_locking = parallel_detected || contracts.has_multi_emit_service();

        Ok(Machine {
            id: self.config.id.clone(),
            config: self.config,
            behavior: self.behavior,
            contracts,
            requires_locking,
        })
    }
}

/// Stack-based traversal: validates every node and reports whether any
/// parallel region exists.
fn walk(config: &MachineConfig, behavior: &Behavior) -> Result<bool, BuildError> {
    let mut parallel = false;
    let mut stack: Vec<(String, &BTreeMap<String, StateNode>, &StateNode)> = config
        .states
        .iter()
        .map(|(name, node)| (name.clone(), &config.states, node))
        .collect();

    while let Some((path, siblings, node)) = stack.pop() {
        let name = leaf_name(&path);
        if RESERVED_NODE_NAMES.contains(&name) {
            return Err(BuildError::ReservedName {
                name: name.to_string(),
                position: "a state name",
            });
        }

        match node.kind {
            StateKind::Atomic => {
                if !node.states.is_empty() {
                    return Err(BuildError::AtomicWithChildren(path));
                }
            }
            StateKind::Compound => {
                let ok = node
                    .initial
                    .as_ref()
                    .is_some_and(|i| node.states.contains_key(i));
                if !ok {
                    return Err(BuildError::BadInitial { path });
                }
            }
            StateKind::Parallel => {
                parallel = true;
                if node.states.len() < 2 {
                    return Err(BuildError::DegenerateParallel(path));
                }
            }
            StateKind::Final => {
                if !node.states.is_empty() || !node.on.is_empty() || !node.always.is_empty() {
                    return Err(BuildError::FinalWithBehavior(path));
                }
            }
        }

        for action in node.entry.iter().chain(node.exit.iter()) {
            check_action(&path, action, behavior)?;
        }

        for (event_type, transitions) in &node.on {
            if RESERVED_NODE_NAMES.contains(&event_type.as_str()) {
                return Err(BuildError::ReservedName {
                    name: event_type.clone(),
                    position: "a transition event",
                });
            }
            for t in transitions {
                check_transition(&path, t, siblings, behavior)?;
            }
        }
        for t in &node.always {
            check_transition(&path, t, siblings, behavior)?;
        }

        for (child_name, child) in &node.states {
            stack.push((format!("{path}.{child_name}"), &node.states, child));
        }
    }

    Ok(parallel)
}

fn check_transition(
    path: &str,
    t: &TransitionConfig,
    siblings: &BTreeMap<String, StateNode>,
    behavior: &Behavior,
) -> Result<(), BuildError> {
    if let Some(guard) = &t.guard {
        if behavior.lookup_guard(guard).is_none() {
            return Err(BuildError::UnknownGuard {
                path: path.to_string(),
                name: guard.clone(),
            });
        }
    }
    for action in &t.actions {
        check_action(path, action, behavior)?;
    }
    if let Some(target) = &t.target {
        if !target_resolves(target, siblings) {
            return Err(BuildError::UnknownTarget {
                path: path.to_string(),
                target: target.clone(),
            });
        }
    }
    Ok(())
}

fn check_action(path: &str, name: &str, behavior: &Behavior) -> Result<(), BuildError> {
    if name == RESERVED_ENQUEUE_ACTION {
        return Err(BuildError::ReservedName {
            name: name.to_string(),
            position: "a referenced action",
        });
    }
    if behavior.lookup_action(name).is_none() {
        return Err(BuildError::UnknownAction {
            path: path.to_string(),
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Targets name a sibling, optionally dotted down into its descendants.
fn target_resolves(target: &str, siblings: &BTreeMap<String, StateNode>) -> bool {
    let mut segments = target.split('.');
    let Some(head) = segments.next() else {
        return false;
    };
    let Some(mut node) = siblings.get(head) else {
        return false;
    };
    for segment in segments {
        match node.states.get(segment) {
            Some(child) => node = child,
            None => return false,
        }
    }
    true
}

fn leaf_name(path: &str) -> &str {
    path.rsplit('.').next().unwrap_or(path)
}

/// A validated, immutable workflow machine: chart + behavior +
/// contracts + the locking requirement derived from its shape.
#[derive(Debug)]
pub struct Machine {
    id: String,
    config: MachineConfig,
    behavior: Behavior,
    contracts: ContractSet,
    requires_locking: bool,
}

impl Machine {
    /// The chart id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The pinned contract version.
    pub fn version(&self) -> &Version {
        self.contracts.self_contract().version()
    }

    /// The orchestrator source this machine answers to.
    pub fn source(&self) -> &str {
        self.contracts.source()
    }

    /// The machine's contract set.
    pub fn contracts(&self) -> &ContractSet {
        &self.contracts
    }

    /// Whether executing this machine requires the subject lock: true
    /// iff the chart has parallel regions or any service contract
    /// declares more than one non-system-error emit.
    pub fn requires_locking(&self) -> bool {
        self.requires_locking
    }

    /// The validated chart config.
    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    pub(crate) fn behavior(&self) -> &Behavior {
        &self.behavior
    }

    /// Validate an inbound event against this machine's contracts.
    pub fn validate_input(&self, event: &Event) -> InputValidation {
        self.contracts.validate_input(event)
    }

    /// The chart serialized for the persisted record's audit field.
    pub fn definition_json(&self) -> String {
        serde_json::to_string(&self.config).unwrap_or_default()
    }
}
