//! The synchronous step engine.
//!
//! One call consumes exactly one event: eventful transitions fire
//! first, then eventless (`always`) transitions run until the chart is
//! quiescent, all under a microstep bound that turns transition loops
//! into execution violations instead of hangs. The engine is pure —
//! given identical (previous state, event, machine) it produces
//! identical results — and performs no I/O.

use crate::builder::Machine;
use crate::chart::{RESERVED_CONTEXT_KEY, StateKind, StateNode, StepScope, StepView, TransitionConfig};
use axon_protocol::event::{Event, EventDraft};
use axon_protocol::violation::{StepError, Violation};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// Transition loops are cut off here and reported as execution
/// violations.
const MICROSTEP_BOUND: usize = 128;

/// A serializable snapshot of a running chart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineState {
    /// Active leaf state paths, dot-separated from the top level.
    pub configuration: BTreeSet<String>,
    /// The chart context.
    pub context: Value,
    /// Whether a top-level final state has been reached.
    pub done: bool,
}

/// What one engine step produced.
#[derive(Debug)]
pub struct StepResult {
    /// The chart state to persist.
    pub state: MachineState,
    /// Drafts drained from the outbox, in enqueue order. Cleared from
    /// the persisted state by construction — the outbox is never part
    /// of [`MachineState`].
    pub events: Vec<EventDraft>,
    /// The declared output mapping over the final context, when this
    /// step reached a top-level final state and the chart declares one.
    pub final_output: Option<Value>,
}

/// Step the chart once, consuming `event`.
///
/// `prev == None` initializes: the event's type must equal the
/// machine's source, the context factory seeds context from it, the
/// initial configuration is entered, and the event is then dispatched
/// through the chart. A state that is already done absorbs the event
/// and returns unchanged.
pub fn execute(
    machine: &Machine,
    prev: Option<MachineState>,
    event: &Event,
) -> Result<StepResult, StepError> {
    let mut outbox: Vec<EventDraft> = Vec::new();

    let (mut cfg, mut ctx, initializing) = match prev {
        Some(state) => {
            if state.done {
                return Ok(StepResult {
                    state,
                    events: Vec::new(),
                    final_output: None,
                });
            }
            (state.configuration, state.context, false)
        }
        None => {
            if event.event_type != machine.source() {
                return Err(Violation::execution(format!(
                    "cannot initialize machine {:?} from event type {:?}; expected {:?}",
                    machine.id(),
                    event.event_type,
                    machine.source()
                ))
                .into());
            }
            let ctx = (machine.behavior().context_fn())(event).map_err(StepError::Workflow)?;
            if ctx.get(RESERVED_CONTEXT_KEY).is_some() {
                return Err(Violation::execution(format!(
                    "context factory produced reserved top-level key {RESERVED_CONTEXT_KEY:?}"
                ))
                .into());
            }
            (BTreeSet::new(), ctx, true)
        }
    };

    if initializing {
        let initial = machine.config().initial.clone();
        enter_chain(machine, "", &initial, &mut cfg, &mut ctx, event, &mut outbox)?;
    }

    let mut microsteps = 0usize;

    let selected = select_eventful(machine, &cfg, event, &ctx)?;
    for (source, transition) in selected {
        // An earlier firing may have exited this source.
        if !active_under(&cfg, &source) {
            continue;
        }
        fire(machine, &source, &transition, &mut cfg, &mut ctx, event, &mut outbox)?;
        microsteps += 1;
    }

    while let Some((source, transition)) = select_always(machine, &cfg, event, &ctx)? {
        microsteps += 1;
        if microsteps > MICROSTEP_BOUND {
            return Err(Violation::execution(format!(
                "chart did not quiesce within {MICROSTEP_BOUND} microsteps; transition loop?"
            ))
            .into());
        }
        fire(machine, &source, &transition, &mut cfg, &mut ctx, event, &mut outbox)?;
    }

    let done = is_done(machine, &cfg);
    let final_output = if done {
        machine.behavior().output_fn().map(|f| f(&ctx))
    } else {
        None
    };

    Ok(StepResult {
        state: MachineState {
            configuration: cfg,
            context: ctx,
            done,
        },
        events: outbox,
        final_output,
    })
}

fn node_at<'m>(machine: &'m Machine, path: &str) -> Option<&'m StateNode> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut node = machine.config().states.get(first)?;
    for segment in segments {
        node = node.states.get(segment)?;
    }
    Some(node)
}

fn require_node<'m>(machine: &'m Machine, path: &str) -> Result<&'m StateNode, StepError> {
    node_at(machine, path).ok_or_else(|| {
        Violation::execution(format!(
            "machine {:?} has no state at {path:?}; stored configuration is inconsistent",
            machine.id()
        ))
        .into()
    })
}

fn parent_path(path: &str) -> Option<&str> {
    path.rsplit_once('.').map(|(parent, _)| parent)
}

fn depth(path: &str) -> usize {
    path.matches('.').count()
}

fn active_under(cfg: &BTreeSet<String>, path: &str) -> bool {
    cfg.iter()
        .any(|leaf| leaf == path || leaf.starts_with(&format!("{path}.")))
}

fn run_actions(
    machine: &Machine,
    names: &[String],
    ctx: &mut Value,
    event: &Event,
    outbox: &mut Vec<EventDraft>,
) -> Result<(), StepError> {
    for name in names {
        let action = machine.behavior().lookup_action(name).ok_or_else(|| {
            Violation::execution(format!("action {name:?} vanished from the behavior table"))
        })?;
        let mut scope = StepScope::new(&mut *ctx, event, &mut *outbox);
        action(&mut scope).map_err(StepError::Workflow)?;
    }
    Ok(())
}

fn first_enabled<'t>(
    machine: &Machine,
    candidates: &'t [TransitionConfig],
    ctx: &Value,
    event: &Event,
) -> Result<Option<&'t TransitionConfig>, StepError> {
    for t in candidates {
        let enabled = match &t.guard {
            None => true,
            Some(name) => {
                let guard = machine.behavior().lookup_guard(name).ok_or_else(|| {
                    Violation::execution(format!("guard {name:?} vanished from the behavior table"))
                })?;
                guard(&StepView {
                    context: ctx,
                    event,
                })
                .map_err(StepError::Workflow)?
            }
        };
        if enabled {
            return Ok(Some(t));
        }
    }
    Ok(None)
}

/// Pick at most one transition per source state for the consumed event,
/// innermost state first along each active branch.
fn select_eventful(
    machine: &Machine,
    cfg: &BTreeSet<String>,
    event: &Event,
    ctx: &Value,
) -> Result<Vec<(String, TransitionConfig)>, StepError> {
    let mut selected: Vec<(String, TransitionConfig)> = Vec::new();
    for leaf in cfg {
        let mut current = Some(leaf.clone());
        while let Some(path) = current {
            let node = require_node(machine, &path)?;
            if let Some(candidates) = node.on.get(&event.event_type) {
                if let Some(t) = first_enabled(machine, candidates, ctx, event)? {
                    if !selected.iter().any(|(p, _)| *p == path) {
                        selected.push((path.clone(), t.clone()));
                    }
                    break;
                }
            }
            current = parent_path(&path).map(str::to_string);
        }
    }
    Ok(selected)
}

/// Find the first enabled eventless transition among active states,
/// scanning leaves in order and walking each branch leaf-to-root.
fn select_always(
    machine: &Machine,
    cfg: &BTreeSet<String>,
    event: &Event,
    ctx: &Value,
) -> Result<Option<(String, TransitionConfig)>, StepError> {
    for leaf in cfg {
        let mut current = Some(leaf.clone());
        while let Some(path) = current {
            let node = require_node(machine, &path)?;
            if let Some(t) = first_enabled(machine, &node.always, ctx, event)? {
                return Ok(Some((path, t.clone())));
            }
            current = parent_path(&path).map(str::to_string);
        }
    }
    Ok(None)
}

/// Exit the source subtree, run transition actions, enter the target.
fn fire(
    machine: &Machine,
    source: &str,
    transition: &TransitionConfig,
    cfg: &mut BTreeSet<String>,
    ctx: &mut Value,
    event: &Event,
    outbox: &mut Vec<EventDraft>,
) -> Result<(), StepError> {
    match &transition.target {
        None => run_actions(machine, &transition.actions, ctx, event, outbox),
        Some(target) => {
            exit_subtree(machine, source, cfg, ctx, event, outbox)?;
            run_actions(machine, &transition.actions, ctx, event, outbox)?;
            let parent = parent_path(source).unwrap_or("");
            enter_chain(machine, parent, target, cfg, ctx, event, outbox)
        }
    }
}

/// Run exit actions deepest-first for every active state at or under
/// `source`, and drop those leaves from the configuration.
fn exit_subtree(
    machine: &Machine,
    source: &str,
    cfg: &mut BTreeSet<String>,
    ctx: &mut Value,
    event: &Event,
    outbox: &mut Vec<EventDraft>,
) -> Result<(), StepError> {
    let child_prefix = format!("{source}.");
    let affected: Vec<String> = cfg
        .iter()
        .filter(|leaf| *leaf == source || leaf.starts_with(&child_prefix))
        .cloned()
        .collect();

    let mut exited: BTreeSet<String> = BTreeSet::new();
    for leaf in &affected {
        let mut path = leaf.clone();
        loop {
            exited.insert(path.clone());
            if path == source {
                break;
            }
            match path.rsplit_once('.') {
                Some((parent, _)) => path = parent.to_string(),
                None => break,
            }
        }
    }

    let mut ordered: Vec<String> = exited.into_iter().collect();
    ordered.sort_by(|a, b| depth(b).cmp(&depth(a)).then_with(|| a.cmp(b)));
    for path in &ordered {
        let node = require_node(machine, path)?;
        run_actions(machine, &node.exit, ctx, event, outbox)?;
    }

    for leaf in affected {
        cfg.remove(&leaf);
    }
    Ok(())
}

/// Enter a (possibly dotted) target under `parent`: entry actions run
/// for each segment on the way down, and the last segment descends
/// through initial/parallel children as usual.
fn enter_chain(
    machine: &Machine,
    parent: &str,
    target: &str,
    cfg: &mut BTreeSet<String>,
    ctx: &mut Value,
    event: &Event,
    outbox: &mut Vec<EventDraft>,
) -> Result<(), StepError> {
    let segments: Vec<&str> = target.split('.').collect();
    let mut current = parent.to_string();
    for (i, segment) in segments.iter().enumerate() {
        current = if current.is_empty() {
            (*segment).to_string()
        } else {
            format!("{current}.{segment}")
        };
        if i + 1 == segments.len() {
            enter(machine, current.clone(), cfg, ctx, event, outbox)?;
        } else {
            let node = require_node(machine, &current)?;
            let entry = node.entry.clone();
            run_actions(machine, &entry, ctx, event, outbox)?;
        }
    }
    Ok(())
}

/// Enter a state: run its entry actions, then descend — compound states
/// enter their initial child, parallel states enter every region.
fn enter(
    machine: &Machine,
    path: String,
    cfg: &mut BTreeSet<String>,
    ctx: &mut Value,
    event: &Event,
    outbox: &mut Vec<EventDraft>,
) -> Result<(), StepError> {
    let node = require_node(machine, &path)?;
    let entry = node.entry.clone();
    run_actions(machine, &entry, ctx, event, outbox)?;
    match node.kind {
        StateKind::Atomic | StateKind::Final => {
            cfg.insert(path);
        }
        StateKind::Compound => {
            let initial = node.initial.clone().ok_or_else(|| {
                Violation::execution(format!("compound state {path:?} has no initial child"))
            })?;
            enter(machine, format!("{path}.{initial}"), cfg, ctx, event, outbox)?;
        }
        StateKind::Parallel => {
            let regions: Vec<String> = node.states.keys().cloned().collect();
            for region in regions {
                enter(machine, format!("{path}.{region}"), cfg, ctx, event, outbox)?;
            }
        }
    }
    Ok(())
}

fn is_done(machine: &Machine, cfg: &BTreeSet<String>) -> bool {
    cfg.iter().any(|path| {
        !path.contains('.')
            && node_at(machine, path).is_some_and(|node| node.kind == StateKind::Final)
    })
}
