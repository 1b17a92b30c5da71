#![deny(missing_docs)]
//! In-memory implementation of axon-protocol's MachineMemory trait.
//!
//! Records live in a `HashMap` behind a `RwLock`; subject locks live in
//! a separate table with `Instant`-based expiry, so a holder that
//! crashes without unlocking cannot deadlock the subject past the TTL.
//! Writes are compare-and-swap: a `prev` that no longer matches the
//! stored record fails fast. Suitable for tests and single-process use.

use async_trait::async_trait;
use axon_protocol::memory::{MachineMemory, MachineMemoryRecord, MemoryError};
use axon_protocol::subject::Subject;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};

const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(30);

/// In-memory machine memory with TTL'd subject locks.
pub struct MemoryBackend {
    records: RwLock<HashMap<String, MachineMemoryRecord>>,
    locks: Mutex<HashMap<String, Instant>>,
    lock_ttl: Duration,
}

impl MemoryBackend {
    /// Create an empty backend with the default 30 s lock TTL.
    pub fn new() -> Self {
        Self::with_lock_ttl(DEFAULT_LOCK_TTL)
    }

    /// Create an empty backend with a custom lock TTL.
    pub fn with_lock_ttl(lock_ttl: Duration) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
            lock_ttl,
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MachineMemory for MemoryBackend {
    async fn read(
        &self,
        subject: &Subject,
    ) -> Result<Option<MachineMemoryRecord>, MemoryError> {
        let records = self.records.read().await;
        Ok(records.get(subject.as_str()).cloned())
    }

    async fn write(
        &self,
        subject: &Subject,
        record: &MachineMemoryRecord,
        prev: Option<&MachineMemoryRecord>,
    ) -> Result<(), MemoryError> {
        let mut records = self.records.write().await;
        let stored = records.get(subject.as_str());
        if stored != prev {
            return Err(MemoryError::WriteFailed(format!(
                "stale write for subject {}: stored record changed since read",
                subject
            )));
        }
        records.insert(subject.as_str().to_string(), record.clone());
        Ok(())
    }

    async fn lock(&self, subject: &Subject) -> Result<bool, MemoryError> {
        let mut locks = self.locks.lock().await;
        let now = Instant::now();
        locks.retain(|_, expires| *expires > now);
        if locks.contains_key(subject.as_str()) {
            return Ok(false);
        }
        locks.insert(subject.as_str().to_string(), now + self.lock_ttl);
        Ok(true)
    }

    async fn unlock(&self, subject: &Subject) -> Result<bool, MemoryError> {
        let mut locks = self.locks.lock().await;
        Ok(locks.remove(subject.as_str()).is_some())
    }
}
