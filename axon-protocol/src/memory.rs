//! The memory protocol — how workflow state persists between events.
//!
//! One record per subject, owned by the backend except while a pipeline
//! invocation holds the subject's lock. The trait is deliberately
//! minimal — read, compare-and-swap write, lock, unlock — so backends
//! range from a test HashMap to Redis or Postgres.

use crate::event::{DomainedEvent, Event};
use crate::subject::Subject;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Memory backend errors.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum MemoryError {
    /// A read failed after the backend's own (bounded) retries.
    #[error("read failed: {0}")]
    ReadFailed(String),

    /// A write failed. Writes are fail-fast: no retries.
    #[error("write failed: {0}")]
    WriteFailed(String),

    /// Lock acquisition errored (distinct from the lock being held).
    #[error("lock failed: {0}")]
    LockFailed(String),

    /// Lock release errored. Callers tolerate this; the TTL is the
    /// backstop.
    #[error("unlock failed: {0}")]
    UnlockFailed(String),

    /// Record (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Catch-all. Include context.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Where a workflow stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Mid-flight; further events advance it.
    Active,
    /// Terminal. The resumable pipeline ignores further events for a
    /// done subject.
    Done,
}

/// An event produced by a past invocation, with its broadcast domains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProducedEvent {
    /// The produced event.
    pub event: Event,
    /// The domain tags it was delivered under.
    pub domains: Vec<String>,
}

impl From<DomainedEvent> for ProducedEvent {
    fn from(de: DomainedEvent) -> Self {
        Self {
            event: de.event,
            domains: de.domains,
        }
    }
}

/// The event bookkeeping section of a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RecordEvents {
    /// The last event this workflow consumed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumed: Option<Event>,
    /// Events produced by the last invocation, by event id.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub produced: BTreeMap<String, ProducedEvent>,
    /// Resumable variant only: produced-event id → responses collected
    /// so far.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<BTreeMap<String, Vec<Event>>>,
}

/// The persisted state of one workflow instance.
///
/// JSON-serializable; field additions are backward compatible, removals
/// require a record schema version bump. Never deleted by the core —
/// retention is the backend's concern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineMemoryRecord {
    /// Id of the event that started this workflow; stable for the
    /// workflow's whole life.
    pub init_event_id: String,
    /// The subject this record belongs to.
    pub subject: Subject,
    /// The parent orchestration's subject, for child workflows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_subject: Option<Subject>,
    /// Where the workflow stands.
    pub status: WorkflowStatus,
    /// The workflow's chart value (or handler context) — opaque here.
    pub value: Value,
    /// The full state snapshot, context included — opaque here.
    pub state: Value,
    /// Event bookkeeping.
    #[serde(default)]
    pub events: RecordEvents,
    /// Serialized chart definition, for audit. Optional.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_definition: Option<String>,
}

/// Protocol — workflow state persistence.
///
/// Mindset mandated by the pipelines: **fail fast on acquire, be
/// tolerant on release**. `lock` must pair with a finite TTL so a
/// crashed holder cannot deadlock the subject forever.
///
/// Implementations:
/// - `axon_memory::MemoryBackend`: HashMap + TTL lock table (testing,
///   single-process)
/// - Redis / Postgres / DynamoDB: bring your own; the trait doesn't
///   care, only the discipline above does.
#[async_trait]
pub trait MachineMemory: Send + Sync {
    /// Read the record for a subject. `None` means the workflow has not
    /// started. Backends may retry internally, bounded.
    async fn read(&self, subject: &Subject)
    -> Result<Option<MachineMemoryRecord>, MemoryError>;

    /// Persist a record. `prev` is the record the caller read under the
    /// lock; backends supporting compare-and-swap must reject a stale
    /// `prev`. Fail fast — no retries.
    async fn write(
        &self,
        subject: &Subject,
        record: &MachineMemoryRecord,
        prev: Option<&MachineMemoryRecord>,
    ) -> Result<(), MemoryError>;

    /// Try to acquire the subject's lock. `Ok(false)` means someone
    /// else holds it. The lock must expire on its own after a TTL.
    async fn lock(&self, subject: &Subject) -> Result<bool, MemoryError>;

    /// Release the subject's lock. `Ok(false)` means there was nothing
    /// to release (already expired or never held).
    async fn unlock(&self, subject: &Subject) -> Result<bool, MemoryError>;
}
