use axon_machine::builder::{Machine, MachineBuilder};
use axon_machine::chart::{Behavior, MachineConfig, StateNode, TransitionConfig};
use axon_machine::engine::{MachineState, execute};
use axon_protocol::contract::VersionedContract;
use axon_protocol::event::{Event, EventDraft};
use axon_protocol::subject::Subject;
use axon_protocol::violation::{StepError, Violation};
use semver::Version;
use serde_json::json;

fn v001() -> Version {
    Version::new(0, 0, 1)
}

fn orc_contract() -> VersionedContract {
    VersionedContract::orchestrator(
        "#/test/orc",
        v001(),
        "arvo.orc.test",
        json!({ "type": "object" }),
        "arvo.orc.test.done",
        json!({ "type": "object" }),
    )
}

fn subject() -> Subject {
    Subject::new("arvo.orc.test", &v001(), "com.test.service").unwrap()
}

fn init_event(data: serde_json::Value) -> Event {
    Event::new("arvo.orc.test", "com.test.service", subject(), data)
}

/// A chart that requests an increment on entry and completes on the
/// service's success response.
fn increment_machine() -> Machine {
    let config = MachineConfig::new("increment", v001(), "incrementing")
        .state(
            "incrementing",
            StateNode::atomic().on_entry("requestIncrement").on(
                "evt.number.increment.success",
                TransitionConfig::to("finished").then("recordResult"),
            ),
        )
        .state("finished", StateNode::final_state());

    let behavior = Behavior::new(|event| {
        Ok(json!({ "delta": event.data["delta"], "value": 0 }))
    })
    .action("requestIncrement", |scope| {
        let delta = scope.context()["delta"].clone();
        scope.enqueue(EventDraft::new(
            "com.number.increment",
            json!({ "delta": delta }),
        ));
        Ok(())
    })
    .action("recordResult", |scope| {
        let new_value = scope.event().data["newValue"].clone();
        scope.context_mut()["value"] = new_value;
        Ok(())
    })
    .output(|ctx| json!({ "final": ctx["value"] }));

    MachineBuilder::new(config, behavior, orc_contract())
        .build()
        .unwrap()
}

// --- Initialization ---

#[test]
fn init_requires_the_source_event_type() {
    let machine = increment_machine();
    let stray = Event::new("com.unrelated", "elsewhere", subject(), json!({}));

    let err = execute(&machine, None, &stray).unwrap_err();
    assert!(matches!(err, StepError::Violation(Violation::Execution(_))));
}

#[test]
fn init_seeds_context_and_drains_entry_drafts() {
    let machine = increment_machine();
    let step = execute(&machine, None, &init_event(json!({ "delta": 3 }))).unwrap();

    assert_eq!(step.events.len(), 1);
    assert_eq!(step.events[0].event_type, "com.number.increment");
    assert_eq!(step.events[0].data, json!({ "delta": 3 }));

    assert!(!step.state.done);
    assert!(step.final_output.is_none());
    assert!(step.state.configuration.contains("incrementing"));
    assert_eq!(step.state.context["delta"], json!(3));
    // The outbox never leaks into persisted state.
    assert_eq!(
        serde_json::to_value(&step.state).unwrap()["context"],
        json!({ "delta": 3, "value": 0 })
    );
}

#[test]
fn context_factory_error_is_a_workflow_error() {
    let config = MachineConfig::new("failing", v001(), "working")
        .state("working", StateNode::atomic());
    let behavior = Behavior::new(|_event| Err("cannot build context".into()));
    let machine = MachineBuilder::new(config, behavior, orc_contract())
        .build()
        .unwrap();

    let err = execute(&machine, None, &init_event(json!({}))).unwrap_err();
    assert!(matches!(err, StepError::Workflow(_)));
}

#[test]
fn reserved_context_key_is_rejected() {
    let config = MachineConfig::new("reserved", v001(), "working")
        .state("working", StateNode::atomic());
    let behavior = Behavior::new(|_event| Ok(json!({ "arvo": {} })));
    let machine = MachineBuilder::new(config, behavior, orc_contract())
        .build()
        .unwrap();

    let err = execute(&machine, None, &init_event(json!({}))).unwrap_err();
    assert!(matches!(err, StepError::Violation(Violation::Execution(_))));
}

// --- Stepping ---

#[test]
fn response_event_completes_the_chart() {
    let machine = increment_machine();
    let init = execute(&machine, None, &init_event(json!({ "delta": 1 }))).unwrap();

    let response = Event::new(
        "evt.number.increment.success",
        "com.number.increment",
        subject(),
        json!({ "newValue": 1 }),
    );
    let step = execute(&machine, Some(init.state), &response).unwrap();

    assert!(step.state.done);
    assert_eq!(step.final_output, Some(json!({ "final": 1 })));
    assert!(step.state.configuration.contains("finished"));
    assert!(step.events.is_empty());
}

#[test]
fn done_state_absorbs_further_events() {
    let machine = increment_machine();
    let init = execute(&machine, None, &init_event(json!({ "delta": 1 }))).unwrap();
    let response = Event::new(
        "evt.number.increment.success",
        "com.number.increment",
        subject(),
        json!({ "newValue": 1 }),
    );
    let done = execute(&machine, Some(init.state), &response).unwrap();

    let late = Event::new(
        "evt.number.increment.success",
        "com.number.increment",
        subject(),
        json!({ "newValue": 99 }),
    );
    let absorbed = execute(&machine, Some(done.state.clone()), &late).unwrap();

    assert_eq!(absorbed.state, done.state);
    assert!(absorbed.events.is_empty());
    // No repeated completion: the output only fires on the step that
    // reached the final state.
    assert!(absorbed.final_output.is_none());
}

#[test]
fn unmatched_event_is_a_no_op() {
    let machine = increment_machine();
    let init = execute(&machine, None, &init_event(json!({ "delta": 1 }))).unwrap();

    let stray = Event::new("com.mystery", "elsewhere", subject(), json!({}));
    let step = execute(&machine, Some(init.state.clone()), &stray).unwrap();

    assert_eq!(step.state, init.state);
    assert!(step.events.is_empty());
}

#[test]
fn execution_is_deterministic() {
    let machine = increment_machine();
    let a = execute(&machine, None, &init_event(json!({ "delta": 2 }))).unwrap();
    let b = execute(&machine, None, &init_event(json!({ "delta": 2 }))).unwrap();

    assert_eq!(a.state, b.state);
    assert_eq!(a.events, b.events);
    assert_eq!(a.final_output, b.final_output);
}

// --- Guards and always transitions ---

#[test]
fn guards_select_among_candidates() {
    let config = MachineConfig::new("guarded", v001(), "deciding")
        .state(
            "deciding",
            StateNode::atomic()
                .on(
                    "evt.decide",
                    TransitionConfig::to("high").when("is_high"),
                )
                .on("evt.decide", TransitionConfig::to("low")),
        )
        .state("high", StateNode::atomic())
        .state("low", StateNode::atomic());
    let behavior = Behavior::new(|event| Ok(json!({ "n": event.data["n"] })))
        .guard("is_high", |view| {
            Ok(view.context["n"].as_i64().unwrap_or(0) > 10)
        });
    let machine = MachineBuilder::new(config, behavior, orc_contract())
        .build()
        .unwrap();

    let low = execute(&machine, None, &init_event(json!({ "n": 5 }))).unwrap();
    let decide = Event::new("evt.decide", "com.test.service", subject(), json!({}));
    let step = execute(&machine, Some(low.state), &decide).unwrap();
    assert!(step.state.configuration.contains("low"));

    let high = execute(&machine, None, &init_event(json!({ "n": 50 }))).unwrap();
    let step = execute(&machine, Some(high.state), &decide).unwrap();
    assert!(step.state.configuration.contains("high"));
}

#[test]
fn always_transitions_run_to_quiescence() {
    let config = MachineConfig::new("chained", v001(), "a")
        .state("a", StateNode::atomic().on("evt.go", TransitionConfig::to("b")))
        .state("b", StateNode::atomic().always(TransitionConfig::to("c").then("mark")))
        .state("c", StateNode::final_state());
    let behavior = Behavior::new(|_event| Ok(json!({ "marked": false })))
        .action("mark", |scope| {
            scope.context_mut()["marked"] = json!(true);
            Ok(())
        })
        .output(|ctx| ctx.clone());
    let machine = MachineBuilder::new(config, behavior, orc_contract())
        .build()
        .unwrap();

    let init = execute(&machine, None, &init_event(json!({}))).unwrap();
    let go = Event::new("evt.go", "com.test.service", subject(), json!({}));
    let step = execute(&machine, Some(init.state), &go).unwrap();

    assert!(step.state.done);
    assert_eq!(step.final_output, Some(json!({ "marked": true })));
}

#[test]
fn transition_loops_hit_the_microstep_bound() {
    let config = MachineConfig::new("spinning", v001(), "a")
        .state("a", StateNode::atomic().always(TransitionConfig::to("b")))
        .state("b", StateNode::atomic().always(TransitionConfig::to("a")));
    let behavior = Behavior::new(|_event| Ok(json!({})));
    let machine = MachineBuilder::new(config, behavior, orc_contract())
        .build()
        .unwrap();

    let err = execute(&machine, None, &init_event(json!({}))).unwrap_err();
    assert!(matches!(err, StepError::Violation(Violation::Execution(_))));
}

// --- Parallel regions ---

#[test]
fn parallel_regions_both_receive_the_event() {
    let config = MachineConfig::new("fanout", v001(), "running").state(
        "running",
        StateNode::parallel()
            .child(
                "left",
                StateNode::compound("waiting")
                    .child(
                        "waiting",
                        StateNode::atomic()
                            .on("evt.tick", TransitionConfig::to("ticked").then("markLeft")),
                    )
                    .child("ticked", StateNode::atomic()),
            )
            .child(
                "right",
                StateNode::compound("waiting")
                    .child(
                        "waiting",
                        StateNode::atomic()
                            .on("evt.tick", TransitionConfig::to("ticked").then("markRight")),
                    )
                    .child("ticked", StateNode::atomic()),
            ),
    );
    let behavior = Behavior::new(|_event| Ok(json!({ "left": false, "right": false })))
        .action("markLeft", |scope| {
            scope.context_mut()["left"] = json!(true);
            Ok(())
        })
        .action("markRight", |scope| {
            scope.context_mut()["right"] = json!(true);
            Ok(())
        });
    let machine = MachineBuilder::new(config, behavior, orc_contract())
        .build()
        .unwrap();
    assert!(machine.requires_locking());

    let init = execute(&machine, None, &init_event(json!({}))).unwrap();
    assert!(init.state.configuration.contains("running.left.waiting"));
    assert!(init.state.configuration.contains("running.right.waiting"));

    let tick = Event::new("evt.tick", "com.test.service", subject(), json!({}));
    let step = execute(&machine, Some(init.state), &tick).unwrap();

    assert_eq!(step.state.context, json!({ "left": true, "right": true }));
    assert!(step.state.configuration.contains("running.left.ticked"));
    assert!(step.state.configuration.contains("running.right.ticked"));
}

// --- Workflow errors from user code ---

#[test]
fn action_errors_are_workflow_errors() {
    let config = MachineConfig::new("failing", v001(), "working")
        .state("working", StateNode::atomic().on_entry("explode"));
    let behavior = Behavior::new(|_event| Ok(json!({})))
        .action("explode", |_scope| Err("the business said no".into()));
    let machine = MachineBuilder::new(config, behavior, orc_contract())
        .build()
        .unwrap();

    let err = execute(&machine, None, &init_event(json!({}))).unwrap_err();
    match err {
        StepError::Workflow(e) => assert!(e.to_string().contains("the business said no")),
        other => panic!("expected a workflow error, got {other:?}"),
    }
}

// --- Persistence round trip ---

#[test]
fn machine_state_round_trips_through_json() {
    let machine = increment_machine();
    let step = execute(&machine, None, &init_event(json!({ "delta": 1 }))).unwrap();

    let wire = serde_json::to_value(&step.state).unwrap();
    let back: MachineState = serde_json::from_value(wire).unwrap();
    assert_eq!(back, step.state);
}
