//! Chart configuration — the typed shape of a synchronous workflow.
//!
//! The node types here deliberately have no field for invoked actors,
//! delayed transitions, or any other asynchrony: a chart that compiles
//! is a chart the engine can step synchronously. Behavior (actions,
//! guards, the context factory, the output mapping) is registered by
//! name in a [`Behavior`] table, which keeps the tree itself plain data
//! — serializable for the audit trail a persisted record carries.

use axon_protocol::event::{Event, EventDraft};
use axon_protocol::violation::WorkflowError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A named side-effect run on entry, exit, or along a transition.
pub type ActionFn = Arc<dyn Fn(&mut StepScope<'_>) -> Result<(), WorkflowError> + Send + Sync>;

/// A named predicate deciding whether a transition is enabled.
pub type GuardFn = Arc<dyn Fn(&StepView<'_>) -> Result<bool, WorkflowError> + Send + Sync>;

/// Builds the initial context from the workflow's init event.
pub type ContextFn = Arc<dyn Fn(&Event) -> Result<Value, WorkflowError> + Send + Sync>;

/// Maps the final context to the workflow's terminal output.
pub type OutputFn = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// The action name reserved for the built-in event outbox. User
/// behaviors may not register under it; [`StepScope::enqueue`] is the
/// typed replacement.
pub const RESERVED_ENQUEUE_ACTION: &str = "enqueueArvoEvent";

/// The context key reserved for engine bookkeeping. A context factory
/// producing a top-level `arvo` key is rejected at runtime.
pub const RESERVED_CONTEXT_KEY: &str = "arvo";

/// Node, child, and transition-event names the config may not use:
/// they denote asynchronous chart features this engine does not run.
pub const RESERVED_NODE_NAMES: [&str; 2] = ["invoke", "after"];

/// Mutable view handed to actions during a step: the chart context, the
/// event being consumed, and the outbound-event queue.
pub struct StepScope<'a> {
    context: &'a mut Value,
    event: &'a Event,
    outbox: &'a mut Vec<EventDraft>,
}

impl<'a> StepScope<'a> {
    pub(crate) fn new(
        context: &'a mut Value,
        event: &'a Event,
        outbox: &'a mut Vec<EventDraft>,
    ) -> Self {
        Self {
            context,
            event,
            outbox,
        }
    }

    /// The chart context.
    pub fn context(&self) -> &Value {
        self.context
    }

    /// The chart context, mutably.
    pub fn context_mut(&mut self) -> &mut Value {
        self.context
    }

    /// The event being consumed.
    pub fn event(&self) -> &Event {
        self.event
    }

    /// Queue an outbound event draft. Drained into the step result when
    /// the chart goes quiescent; never part of persisted state. Drafts
    /// whose type matches no contract pass through the event factory
    /// unvalidated — this is the escape hatch for out-of-contract
    /// events.
    pub fn enqueue(&mut self, draft: EventDraft) {
        self.outbox.push(draft);
    }
}

/// Read-only view handed to guards.
pub struct StepView<'a> {
    /// The chart context.
    pub context: &'a Value,
    /// The event being consumed.
    pub event: &'a Event,
}

/// What kind of state a node is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StateKind {
    /// A leaf state.
    #[default]
    Atomic,
    /// A state with children, exactly one active at a time.
    Compound,
    /// A state whose children are all active at once.
    Parallel,
    /// A terminal state. Final at the top level ends the workflow.
    Final,
}

/// One transition out of a state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionConfig {
    /// Target sibling (optionally dotted into its descendants). `None`
    /// is an internal transition: actions run, no state changes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Guard name; unguarded transitions are always enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<String>,
    /// Action names run between exit and entry.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<String>,
}

impl TransitionConfig {
    /// A transition to a sibling state.
    pub fn to(target: impl Into<String>) -> Self {
        Self {
            target: Some(target.into()),
            guard: None,
            actions: Vec::new(),
        }
    }

    /// An internal transition: runs actions, stays put.
    pub fn internal() -> Self {
        Self {
            target: None,
            guard: None,
            actions: Vec::new(),
        }
    }

    /// Guard this transition.
    pub fn when(mut self, guard: impl Into<String>) -> Self {
        self.guard = Some(guard.into());
        self
    }

    /// Append a transition action.
    pub fn then(mut self, action: impl Into<String>) -> Self {
        self.actions.push(action.into());
        self
    }
}

/// One state in the chart tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StateNode {
    /// The node kind.
    pub kind: StateKind,
    /// Initial child, for compound states.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial: Option<String>,
    /// Child states.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub states: BTreeMap<String, StateNode>,
    /// Actions run on entering this state.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entry: Vec<String>,
    /// Actions run on leaving this state.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exit: Vec<String>,
    /// Event-triggered transitions: event type → candidates in
    /// declaration order, first enabled wins.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub on: BTreeMap<String, Vec<TransitionConfig>>,
    /// Eventless transitions, evaluated until the chart is quiescent.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub always: Vec<TransitionConfig>,
}

impl StateNode {
    /// A leaf state.
    pub fn atomic() -> Self {
        Self::default()
    }

    /// A compound state with the given initial child.
    pub fn compound(initial: impl Into<String>) -> Self {
        Self {
            kind: StateKind::Compound,
            initial: Some(initial.into()),
            ..Self::default()
        }
    }

    /// A parallel state; all children run at once.
    pub fn parallel() -> Self {
        Self {
            kind: StateKind::Parallel,
            ..Self::default()
        }
    }

    /// A terminal state.
    pub fn final_state() -> Self {
        Self {
            kind: StateKind::Final,
            ..Self::default()
        }
    }

    /// Add a child state.
    pub fn child(mut self, name: impl Into<String>, node: StateNode) -> Self {
        self.states.insert(name.into(), node);
        self
    }

    /// Add an entry action.
    pub fn on_entry(mut self, action: impl Into<String>) -> Self {
        self.entry.push(action.into());
        self
    }

    /// Add an exit action.
    pub fn on_exit(mut self, action: impl Into<String>) -> Self {
        self.exit.push(action.into());
        self
    }

    /// Add an event-triggered transition.
    pub fn on(mut self, event_type: impl Into<String>, transition: TransitionConfig) -> Self {
        self.on.entry(event_type.into()).or_default().push(transition);
        self
    }

    /// Add an eventless transition.
    pub fn always(mut self, transition: TransitionConfig) -> Self {
        self.always.push(transition);
        self
    }
}

/// The chart: a named, versioned tree of states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineConfig {
    /// Chart id, unique within a registry.
    pub id: String,
    /// Must match the self contract's pinned version.
    pub version: semver::Version,
    /// The initial top-level state.
    pub initial: String,
    /// Top-level states.
    pub states: BTreeMap<String, StateNode>,
}

impl MachineConfig {
    /// Start a chart with its id, version, and initial state name.
    pub fn new(
        id: impl Into<String>,
        version: semver::Version,
        initial: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            version,
            initial: initial.into(),
            states: BTreeMap::new(),
        }
    }

    /// Add a top-level state.
    pub fn state(mut self, name: impl Into<String>, node: StateNode) -> Self {
        self.states.insert(name.into(), node);
        self
    }
}

/// The chart's registered behavior: context factory, named actions and
/// guards, and the optional output mapping.
#[derive(Clone)]
pub struct Behavior {
    context: ContextFn,
    actions: BTreeMap<String, ActionFn>,
    guards: BTreeMap<String, GuardFn>,
    output: Option<OutputFn>,
}

impl Behavior {
    /// Create a behavior table around a context factory.
    pub fn new<F>(context: F) -> Self
    where
        F: Fn(&Event) -> Result<Value, WorkflowError> + Send + Sync + 'static,
    {
        Self {
            context: Arc::new(context),
            actions: BTreeMap::new(),
            guards: BTreeMap::new(),
            output: None,
        }
    }

    /// Register a named action. Reserved names are rejected at build
    /// time, not here.
    pub fn action<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut StepScope<'_>) -> Result<(), WorkflowError> + Send + Sync + 'static,
    {
        self.actions.insert(name.into(), Arc::new(f));
        self
    }

    /// Register a named guard.
    pub fn guard<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&StepView<'_>) -> Result<bool, WorkflowError> + Send + Sync + 'static,
    {
        self.guards.insert(name.into(), Arc::new(f));
        self
    }

    /// Declare the terminal output mapping. Charts without one still
    /// terminate, but emit no completion event.
    pub fn output<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        self.output = Some(Arc::new(f));
        self
    }

    pub(crate) fn context_fn(&self) -> &ContextFn {
        &self.context
    }

    pub(crate) fn lookup_action(&self, name: &str) -> Option<&ActionFn> {
        self.actions.get(name)
    }

    pub(crate) fn lookup_guard(&self, name: &str) -> Option<&GuardFn> {
        self.guards.get(name)
    }

    pub(crate) fn output_fn(&self) -> Option<&OutputFn> {
        self.output.as_ref()
    }

    pub(crate) fn action_names(&self) -> impl Iterator<Item = &str> {
        self.actions.keys().map(String::as_str)
    }
}

impl fmt::Debug for Behavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Behavior")
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .field("guards", &self.guards.keys().collect::<Vec<_>>())
            .field("output", &self.output.is_some())
            .finish()
    }
}
