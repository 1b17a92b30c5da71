use async_trait::async_trait;
use axon_memory::MemoryBackend;
use axon_protocol::contract::{ContractSet, VersionedContract};
use axon_protocol::event::{Event, EventDraft};
use axon_protocol::memory::{MachineMemory, WorkflowStatus};
use axon_protocol::subject::Subject;
use axon_protocol::violation::{TransactionCause, Violation, WorkflowError};
use axon_resumable::handler::{HandlerInput, HandlerOutput, ResumableHandler, ResumableVersion};
use axon_resumable::pipeline::Resumable;
use rust_decimal::Decimal;
use semver::Version;
use serde_json::json;
use std::sync::Arc;

fn v001() -> Version {
    Version::new(0, 0, 1)
}

fn orc_contract() -> VersionedContract {
    VersionedContract::orchestrator(
        "#/test/orc",
        v001(),
        "arvo.orc.test",
        json!({
            "type": "object",
            "properties": { "delta": { "type": "number" } },
            "required": ["delta"]
        }),
        "arvo.orc.test.done",
        json!({
            "type": "object",
            "properties": { "final": { "type": "number" } },
            "required": ["final"]
        }),
    )
}

fn increment_contract() -> VersionedContract {
    VersionedContract::regular(
        "#/test/service/increment",
        v001(),
        "com.number.increment",
        json!({
            "type": "object",
            "properties": { "delta": { "type": "number" } },
            "required": ["delta"]
        }),
    )
    .with_emit(
        "evt.number.increment.success",
        json!({
            "type": "object",
            "properties": { "newValue": { "type": "number" } },
            "required": ["newValue"]
        }),
    )
}

fn contracts() -> ContractSet {
    ContractSet::new(
        orc_contract(),
        vec![("increment".to_string(), increment_contract())],
    )
    .unwrap()
}

/// Requests one increment on init; completes from the collected
/// response — proving the response was filed before the handler ran.
struct IncrementHandler;

#[async_trait]
impl ResumableHandler for IncrementHandler {
    async fn handle(&self, input: HandlerInput<'_>) -> Result<HandlerOutput, WorkflowError> {
        if input.event.event_type == input.contracts.source() {
            let delta = input.event.data["delta"].clone();
            return Ok(HandlerOutput::new()
                .with_context(json!({ "delta": delta }))
                .with_service(EventDraft::new(
                    "com.number.increment",
                    json!({ "delta": delta }),
                )));
        }
        let responses = input
            .collected
            .get("evt.number.increment.success")
            .ok_or("no increment response collected")?;
        let new_value = responses
            .first()
            .ok_or("empty response bucket")?
            .data["newValue"]
            .clone();
        Ok(HandlerOutput::new().with_complete(json!({ "final": new_value })))
    }
}

/// Completes immediately while also requesting a service — both go out,
/// and the run still ends.
struct CompleteAndRequest;

#[async_trait]
impl ResumableHandler for CompleteAndRequest {
    async fn handle(&self, input: HandlerInput<'_>) -> Result<HandlerOutput, WorkflowError> {
        let delta = input.event.data["delta"].clone();
        Ok(HandlerOutput::new()
            .with_service(EventDraft::new(
                "com.number.increment",
                json!({ "delta": delta }),
            ))
            .with_complete(json!({ "final": 0 })))
    }
}

struct AlwaysFails;

#[async_trait]
impl ResumableHandler for AlwaysFails {
    async fn handle(&self, _input: HandlerInput<'_>) -> Result<HandlerOutput, WorkflowError> {
        Err("ledger unavailable".into())
    }
}

fn resumable_with(
    handler: Arc<dyn ResumableHandler>,
    backend: Arc<MemoryBackend>,
) -> Resumable {
    Resumable::new(
        backend,
        vec![ResumableVersion::new(contracts(), handler)],
        Decimal::ZERO,
    )
    .unwrap()
}

fn subject() -> Subject {
    Subject::new("arvo.orc.test", &v001(), "com.test.service").unwrap()
}

fn init_event(subject: &Subject) -> Event {
    Event::new(
        "arvo.orc.test",
        "com.test.service",
        subject.clone(),
        json!({ "delta": 1 }),
    )
}

fn response(subject: &Subject, request_id: &str) -> Event {
    Event::new(
        "evt.number.increment.success",
        "com.number.increment",
        subject.clone(),
        json!({ "newValue": 1 }),
    )
    .with_parentid(request_id)
}

// --- Init ---

#[tokio::test]
async fn init_sends_the_request_and_tracks_it_as_expected() {
    let backend = Arc::new(MemoryBackend::new());
    let workflow = resumable_with(Arc::new(IncrementHandler), Arc::clone(&backend));
    let s0 = subject();

    let output = workflow.execute(init_event(&s0)).await.unwrap();

    assert_eq!(output.events.len(), 1);
    let request = &output.events[0];
    assert_eq!(request.event_type, "com.number.increment");
    assert_eq!(request.subject, s0);

    let record = backend.read(&s0).await.unwrap().unwrap();
    assert_eq!(record.status, WorkflowStatus::Active);
    assert_eq!(record.value, json!({ "delta": 1 }));
    let expected = record.events.expected.unwrap();
    assert_eq!(expected.len(), 1);
    assert!(expected.get(&request.id).unwrap().is_empty());
}

#[tokio::test]
async fn non_init_event_without_state_is_ignored() {
    let backend = Arc::new(MemoryBackend::new());
    let workflow = resumable_with(Arc::new(IncrementHandler), Arc::clone(&backend));
    let s0 = subject();

    let output = workflow.execute(response(&s0, "evt-nobody")).await.unwrap();
    assert!(output.is_empty());
    assert!(backend.read(&s0).await.unwrap().is_none());
}

// --- Collection and completion ---

#[tokio::test]
async fn response_is_collected_then_completion_routes_to_initiator() {
    let backend = Arc::new(MemoryBackend::new());
    let workflow = resumable_with(Arc::new(IncrementHandler), Arc::clone(&backend));
    let s0 = subject();

    let init = init_event(&s0);
    let init_id = init.id.clone();
    let first = workflow.execute(init).await.unwrap();
    let request_id = first.events[0].id.clone();

    let second = workflow.execute(response(&s0, &request_id)).await.unwrap();

    assert_eq!(second.events.len(), 1);
    let done = &second.events[0];
    assert_eq!(done.event_type, "arvo.orc.test.done");
    assert_eq!(done.to.as_deref(), Some("com.test.service"));
    assert_eq!(done.subject, s0);
    assert_eq!(done.data, json!({ "final": 1 }));
    assert_eq!(done.parentid.as_deref(), Some(init_id.as_str()));

    let record = backend.read(&s0).await.unwrap().unwrap();
    assert_eq!(record.status, WorkflowStatus::Done);
}

#[tokio::test]
async fn unexpected_parentid_is_not_collected() {
    let backend = Arc::new(MemoryBackend::new());
    let workflow = resumable_with(Arc::new(IncrementHandler), Arc::clone(&backend));
    let s0 = subject();

    workflow.execute(init_event(&s0)).await.unwrap();

    // Valid response type, but answering a request we never made: the
    // collected buckets stay empty and the handler fails accordingly.
    let output = workflow
        .execute(response(&s0, "evt-stranger"))
        .await
        .unwrap();
    assert_eq!(output.events.len(), 1);
    assert_eq!(output.events[0].event_type, "sys.arvo.orc.test.error");
}

// --- Terminal behaviour ---

#[tokio::test]
async fn done_subject_ignores_further_events() {
    let backend = Arc::new(MemoryBackend::new());
    let workflow = resumable_with(Arc::new(IncrementHandler), Arc::clone(&backend));
    let s0 = subject();

    let first = workflow.execute(init_event(&s0)).await.unwrap();
    let request_id = first.events[0].id.clone();
    workflow.execute(response(&s0, &request_id)).await.unwrap();

    let before = backend.read(&s0).await.unwrap().unwrap();
    let output = workflow.execute(response(&s0, &request_id)).await.unwrap();

    assert!(output.is_empty());
    assert_eq!(backend.read(&s0).await.unwrap().unwrap(), before);
}

#[tokio::test]
async fn complete_and_services_both_emit_and_the_run_ends() {
    let backend = Arc::new(MemoryBackend::new());
    let workflow = resumable_with(Arc::new(CompleteAndRequest), Arc::clone(&backend));
    let s0 = subject();

    let output = workflow.execute(init_event(&s0)).await.unwrap();

    assert_eq!(output.events.len(), 2);
    assert_eq!(output.events[0].event_type, "com.number.increment");
    assert_eq!(output.events[1].event_type, "arvo.orc.test.done");

    let record = backend.read(&s0).await.unwrap().unwrap();
    assert_eq!(record.status, WorkflowStatus::Done);
}

// --- Failures ---

#[tokio::test]
async fn handler_error_becomes_a_system_error_event() {
    let backend = Arc::new(MemoryBackend::new());
    let workflow = resumable_with(Arc::new(AlwaysFails), Arc::clone(&backend));
    let s0 = subject();

    let output = workflow.execute(init_event(&s0)).await.unwrap();

    assert_eq!(output.events.len(), 1);
    let sys = &output.events[0];
    assert_eq!(sys.event_type, "sys.arvo.orc.test.error");
    assert_eq!(sys.to.as_deref(), Some("com.test.service"));
    assert_eq!(sys.data["errorMessage"], json!("ledger unavailable"));

    assert!(backend.read(&s0).await.unwrap().is_none());
}

#[tokio::test]
async fn locking_defaults_on_and_contention_raises() {
    let backend = Arc::new(MemoryBackend::new());
    let workflow = resumable_with(Arc::new(IncrementHandler), Arc::clone(&backend));
    let s0 = subject();

    assert!(backend.lock(&s0).await.unwrap());
    let err = workflow.execute(init_event(&s0)).await.unwrap_err();
    assert!(matches!(
        err,
        Violation::Transaction {
            cause: TransactionCause::LockUnacquired,
            ..
        }
    ));
}

// --- Construction ---

#[tokio::test]
async fn versions_must_share_one_source() {
    let other = VersionedContract::orchestrator(
        "#/test/other",
        Version::new(0, 0, 2),
        "arvo.orc.other",
        json!({ "type": "object" }),
        "arvo.orc.other.done",
        json!({ "type": "object" }),
    );
    let err = Resumable::new(
        Arc::new(MemoryBackend::new()),
        vec![
            ResumableVersion::new(contracts(), Arc::new(IncrementHandler)),
            ResumableVersion::new(
                ContractSet::new(other, Vec::new()).unwrap(),
                Arc::new(IncrementHandler),
            ),
        ],
        Decimal::ZERO,
    )
    .unwrap_err();
    assert!(matches!(err, Violation::Config(_)));
}
