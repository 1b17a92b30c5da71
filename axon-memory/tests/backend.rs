use axon_memory::MemoryBackend;
use axon_protocol::memory::{
    MachineMemory, MachineMemoryRecord, MemoryError, RecordEvents, WorkflowStatus,
};
use axon_protocol::subject::Subject;
use semver::Version;
use serde_json::json;
use std::time::Duration;

fn subject(name: &str) -> Subject {
    Subject::new(name, &Version::new(0, 0, 1), "com.test.service").unwrap()
}

fn record(subject: &Subject, init: &str) -> MachineMemoryRecord {
    MachineMemoryRecord {
        init_event_id: init.to_string(),
        subject: subject.clone(),
        parent_subject: None,
        status: WorkflowStatus::Active,
        value: json!(null),
        state: json!({}),
        events: RecordEvents::default(),
        machine_definition: None,
    }
}

// --- Read and write ---

#[tokio::test]
async fn read_missing_returns_none() {
    let backend = MemoryBackend::new();
    let s = subject("arvo.orc.a");
    assert!(backend.read(&s).await.unwrap().is_none());
}

#[tokio::test]
async fn write_then_read() {
    let backend = MemoryBackend::new();
    let s = subject("arvo.orc.a");
    let rec = record(&s, "evt-0");

    backend.write(&s, &rec, None).await.unwrap();
    assert_eq!(backend.read(&s).await.unwrap(), Some(rec));
}

#[tokio::test]
async fn subjects_are_isolated() {
    let backend = MemoryBackend::new();
    let a = subject("arvo.orc.a");
    let b = subject("arvo.orc.b");

    backend.write(&a, &record(&a, "evt-a"), None).await.unwrap();

    assert!(backend.read(&b).await.unwrap().is_none());
    assert_eq!(
        backend.read(&a).await.unwrap().unwrap().init_event_id,
        "evt-a"
    );
}

// --- Compare and swap ---

#[tokio::test]
async fn write_with_matching_prev_succeeds() {
    let backend = MemoryBackend::new();
    let s = subject("arvo.orc.a");
    let first = record(&s, "evt-0");
    backend.write(&s, &first, None).await.unwrap();

    let mut second = first.clone();
    second.status = WorkflowStatus::Done;
    backend.write(&s, &second, Some(&first)).await.unwrap();

    assert_eq!(
        backend.read(&s).await.unwrap().unwrap().status,
        WorkflowStatus::Done
    );
}

#[tokio::test]
async fn stale_prev_fails_fast() {
    let backend = MemoryBackend::new();
    let s = subject("arvo.orc.a");
    let first = record(&s, "evt-0");
    backend.write(&s, &first, None).await.unwrap();

    // A competing writer replaced the record in between.
    let mut competing = first.clone();
    competing.init_event_id = "evt-other".to_string();
    backend.write(&s, &competing, Some(&first)).await.unwrap();

    let mut mine = first.clone();
    mine.status = WorkflowStatus::Done;
    let err = backend.write(&s, &mine, Some(&first)).await.unwrap_err();
    assert!(matches!(err, MemoryError::WriteFailed(_)));
}

#[tokio::test]
async fn none_prev_on_existing_record_fails() {
    let backend = MemoryBackend::new();
    let s = subject("arvo.orc.a");
    backend.write(&s, &record(&s, "evt-0"), None).await.unwrap();

    let err = backend
        .write(&s, &record(&s, "evt-1"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, MemoryError::WriteFailed(_)));
}

// --- Locks ---

#[tokio::test]
async fn lock_is_exclusive() {
    let backend = MemoryBackend::new();
    let s = subject("arvo.orc.a");

    assert!(backend.lock(&s).await.unwrap());
    assert!(!backend.lock(&s).await.unwrap());
}

#[tokio::test]
async fn unlock_releases() {
    let backend = MemoryBackend::new();
    let s = subject("arvo.orc.a");

    assert!(backend.lock(&s).await.unwrap());
    assert!(backend.unlock(&s).await.unwrap());
    assert!(backend.lock(&s).await.unwrap());
}

#[tokio::test]
async fn unlock_without_lock_reports_false() {
    let backend = MemoryBackend::new();
    let s = subject("arvo.orc.a");
    assert!(!backend.unlock(&s).await.unwrap());
}

#[tokio::test]
async fn locks_are_per_subject() {
    let backend = MemoryBackend::new();
    let a = subject("arvo.orc.a");
    let b = subject("arvo.orc.b");

    assert!(backend.lock(&a).await.unwrap());
    assert!(backend.lock(&b).await.unwrap());
}

#[tokio::test]
async fn lock_expires_after_ttl() {
    let backend = MemoryBackend::with_lock_ttl(Duration::from_millis(20));
    let s = subject("arvo.orc.a");

    assert!(backend.lock(&s).await.unwrap());
    assert!(!backend.lock(&s).await.unwrap());

    tokio::time::sleep(Duration::from_millis(40)).await;
    assert!(backend.lock(&s).await.unwrap());
}
