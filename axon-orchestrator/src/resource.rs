//! The subject/lock/state resource — the transactional half of a
//! pipeline invocation.
//!
//! Discipline: **fail fast on acquire, be tolerant on release.** Every
//! acquire-side backend failure translates into a precise
//! [`Violation`]; release failures are logged and swallowed, because
//! the backend's lock TTL is the real safety net.

use axon_protocol::memory::{MachineMemory, MachineMemoryRecord};
use axon_protocol::subject::{Subject, SubjectContent};
use axon_protocol::violation::{TransactionCause, Violation};
use std::sync::Arc;

/// Where a lock acquisition landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    /// We hold the lock and must release it.
    Acquired,
    /// Someone else holds it.
    NotAcquired,
    /// Locking is disabled for this machine; nothing to hold.
    Noop,
}

/// Wraps a memory backend with subject validation and the pipeline's
/// violation vocabulary.
#[derive(Clone)]
pub struct EventResource {
    memory: Arc<dyn MachineMemory>,
    requires_locking: bool,
}

impl EventResource {
    /// Wrap a backend. When `requires_locking` is false, lock and
    /// unlock are no-ops — correctness then relies on the machine shape
    /// admitting no intra-workflow concurrency.
    pub fn new(memory: Arc<dyn MachineMemory>, requires_locking: bool) -> Self {
        Self {
            memory,
            requires_locking,
        }
    }

    /// Whether this resource actually locks.
    pub fn requires_locking(&self) -> bool {
        self.requires_locking
    }

    /// Decode a subject before any memory access. Associated rather
    /// than a method: the pipelines validate before they know the
    /// machine (and hence the locking flag) this resource is built
    /// with.
    pub fn validate_subject(subject: &Subject) -> Result<SubjectContent, Violation> {
        subject
            .parse()
            .map_err(|e| Violation::transaction(TransactionCause::InvalidSubject, e))
    }

    /// Try to take the subject's lock.
    pub async fn acquire_lock(&self, subject: &Subject) -> Result<LockState, Violation> {
        if !self.requires_locking {
            return Ok(LockState::Noop);
        }
        match self.memory.lock(subject).await {
            Ok(true) => Ok(LockState::Acquired),
            Ok(false) => Ok(LockState::NotAcquired),
            Err(e) => Err(Violation::transaction(TransactionCause::LockFailure, e)),
        }
    }

    /// Load the subject's record.
    pub async fn acquire_state(
        &self,
        subject: &Subject,
    ) -> Result<Option<MachineMemoryRecord>, Violation> {
        self.memory
            .read(subject)
            .await
            .map_err(|e| Violation::transaction(TransactionCause::ReadFailure, e))
    }

    /// Persist the subject's record. Fail fast; no retries.
    pub async fn persist_state(
        &self,
        subject: &Subject,
        record: &MachineMemoryRecord,
        prev: Option<&MachineMemoryRecord>,
    ) -> Result<(), Violation> {
        self.memory
            .write(subject, record, prev)
            .await
            .map_err(|e| Violation::transaction(TransactionCause::WriteFailure, e))
    }

    /// Release the lock. Safe with any acquisition outcome, including
    /// none at all; backend failures are logged, never raised.
    pub async fn release_lock(&self, subject: &Subject, state: Option<LockState>) {
        if state != Some(LockState::Acquired) {
            return;
        }
        match self.memory.unlock(subject).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(subject = %subject, "lock was already released or expired");
            }
            Err(error) => {
                tracing::warn!(subject = %subject, %error, "failed to release lock; TTL will reclaim it");
            }
        }
    }
}
