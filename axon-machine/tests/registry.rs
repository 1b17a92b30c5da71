use axon_machine::builder::{Machine, MachineBuilder};
use axon_machine::chart::{Behavior, MachineConfig, StateNode};
use axon_machine::registry::{MachineRegistry, RegistryError};
use axon_protocol::contract::VersionedContract;
use axon_protocol::event::Event;
use axon_protocol::subject::Subject;
use axon_protocol::violation::Violation;
use semver::Version;
use serde_json::json;

fn machine(source: &str, version: Version) -> Machine {
    let contract = VersionedContract::orchestrator(
        format!("#/test/{source}"),
        version.clone(),
        source,
        json!({ "type": "object" }),
        format!("{source}.done"),
        json!({ "type": "object" }),
    );
    let config = MachineConfig::new(format!("{source}-chart"), version, "working")
        .state("working", StateNode::atomic());
    MachineBuilder::new(config, Behavior::new(|_| Ok(json!({}))), contract)
        .build()
        .unwrap()
}

// --- Construction ---

#[test]
fn empty_registry_is_rejected() {
    assert!(matches!(
        MachineRegistry::new(vec![]),
        Err(RegistryError::Empty)
    ));
}

#[test]
fn mixed_sources_are_rejected() {
    let err = MachineRegistry::new(vec![
        machine("arvo.orc.a", Version::new(0, 0, 1)),
        machine("arvo.orc.b", Version::new(0, 0, 2)),
    ])
    .unwrap_err();
    assert!(matches!(err, RegistryError::MixedSources { .. }));
}

#[test]
fn duplicate_versions_are_rejected() {
    let err = MachineRegistry::new(vec![
        machine("arvo.orc.a", Version::new(0, 0, 1)),
        machine("arvo.orc.a", Version::new(0, 0, 1)),
    ])
    .unwrap_err();
    assert!(matches!(err, RegistryError::DuplicateVersion(_)));
}

// --- Resolution ---

#[test]
fn resolves_the_subject_version() {
    let registry = MachineRegistry::new(vec![
        machine("arvo.orc.a", Version::new(0, 0, 1)),
        machine("arvo.orc.a", Version::new(0, 0, 2)),
    ])
    .unwrap();

    let subject = Subject::new("arvo.orc.a", &Version::new(0, 0, 2), "com.test").unwrap();
    let event = Event::new("arvo.orc.a", "com.test", subject, json!({}));

    let resolved = registry.resolve(&event).unwrap().unwrap();
    assert_eq!(resolved.version(), &Version::new(0, 0, 2));
}

#[test]
fn foreign_name_is_a_soft_miss() {
    let registry =
        MachineRegistry::new(vec![machine("arvo.orc.a", Version::new(0, 0, 1))]).unwrap();

    let subject = Subject::new("arvo.orc.b", &Version::new(0, 0, 1), "com.test").unwrap();
    let event = Event::new("arvo.orc.b", "com.test", subject, json!({}));

    assert!(registry.resolve(&event).unwrap().is_none());
}

#[test]
fn unknown_version_is_a_config_violation() {
    let registry =
        MachineRegistry::new(vec![machine("arvo.orc.a", Version::new(0, 0, 1))]).unwrap();

    let subject = Subject::new("arvo.orc.a", &Version::new(2, 0, 0), "com.test").unwrap();
    let event = Event::new("arvo.orc.a", "com.test", subject, json!({}));

    assert!(matches!(
        registry.resolve(&event).unwrap_err(),
        Violation::Config(_)
    ));
}
