#![deny(missing_docs)]
//! Filesystem-backed implementation of axon-protocol's MachineMemory
//! trait.
//!
//! Each subject maps to one `.json` record file under the root, named
//! by a deterministic hash of the subject's encoded form. Locks are
//! companion `.lock` files created exclusively; a lock whose file is
//! older than the TTL counts as expired and may be taken over, so a
//! crashed holder cannot deadlock the subject. Writes are
//! compare-and-swap against the record currently on disk. Provides
//! true persistence across process restarts.

use async_trait::async_trait;
use axon_protocol::memory::{MachineMemory, MachineMemoryRecord, MemoryError};
use axon_protocol::subject::Subject;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(30);

/// Filesystem-backed machine memory.
///
/// Directory layout:
/// ```text
/// root/
///   subject-<hash>.json
///   subject-<hash>.lock
/// ```
///
/// Suitable for development, single-machine deployments, and cases
/// where workflow state must survive restarts without a database.
pub struct FsBackend {
    root: PathBuf,
    lock_ttl: Duration,
}

impl FsBackend {
    /// Create a backend rooted at the given directory, with the default
    /// 30 s lock TTL. The directory is created lazily on first write.
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            lock_ttl: DEFAULT_LOCK_TTL,
        }
    }

    /// Override the lock TTL.
    pub fn with_lock_ttl(mut self, lock_ttl: Duration) -> Self {
        self.lock_ttl = lock_ttl;
        self
    }

    fn record_path(&self, subject: &Subject) -> PathBuf {
        self.root.join(format!("{}.json", subject_stem(subject)))
    }

    fn lock_path(&self, subject: &Subject) -> PathBuf {
        self.root.join(format!("{}.lock", subject_stem(subject)))
    }

    async fn read_record(
        &self,
        subject: &Subject,
    ) -> Result<Option<MachineMemoryRecord>, MemoryError> {
        match tokio::fs::read_to_string(self.record_path(subject)).await {
            Ok(contents) => {
                let record: MachineMemoryRecord = serde_json::from_str(&contents)
                    .map_err(|e| MemoryError::Serialization(e.to_string()))?;
                Ok(Some(record))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(MemoryError::ReadFailed(e.to_string())),
        }
    }
}

/// Derive a deterministic, filesystem-safe file stem from a subject.
/// Encoded subjects can exceed filename limits, so hash them down.
fn subject_stem(subject: &Subject) -> String {
    let mut hash: u64 = 5381;
    for byte in subject.as_str().as_bytes() {
        hash = hash.wrapping_mul(33).wrapping_add(*byte as u64);
    }
    format!("subject-{hash:016x}")
}

#[async_trait]
impl MachineMemory for FsBackend {
    async fn read(
        &self,
        subject: &Subject,
    ) -> Result<Option<MachineMemoryRecord>, MemoryError> {
        self.read_record(subject).await
    }

    async fn write(
        &self,
        subject: &Subject,
        record: &MachineMemoryRecord,
        prev: Option<&MachineMemoryRecord>,
    ) -> Result<(), MemoryError> {
        let stored = self.read_record(subject).await?;
        if stored.as_ref() != prev {
            return Err(MemoryError::WriteFailed(format!(
                "stale write for subject {}: stored record changed since read",
                subject
            )));
        }

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| MemoryError::WriteFailed(e.to_string()))?;
        let contents = serde_json::to_string_pretty(record)
            .map_err(|e| MemoryError::Serialization(e.to_string()))?;
        tokio::fs::write(self.record_path(subject), contents)
            .await
            .map_err(|e| MemoryError::WriteFailed(e.to_string()))
    }

    async fn lock(&self, subject: &Subject) -> Result<bool, MemoryError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| MemoryError::LockFailed(e.to_string()))?;
        let path = self.lock_path(subject);

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create_new(true);

        match options.open(&path).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                // Held by someone — unless the holder died past the TTL.
                let expired = match tokio::fs::metadata(&path).await {
                    Ok(meta) => meta
                        .modified()
                        .ok()
                        .and_then(|m| m.elapsed().ok())
                        .is_some_and(|age| age > self.lock_ttl),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
                    Err(e) => return Err(MemoryError::LockFailed(e.to_string())),
                };
                if !expired {
                    return Ok(false);
                }
                let _ = tokio::fs::remove_file(&path).await;
                match options.open(&path).await {
                    Ok(_) => Ok(true),
                    Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
                    Err(e) => Err(MemoryError::LockFailed(e.to_string())),
                }
            }
            Err(e) => Err(MemoryError::LockFailed(e.to_string())),
        }
    }

    async fn unlock(&self, subject: &Subject) -> Result<bool, MemoryError> {
        match tokio::fs::remove_file(self.lock_path(subject)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(MemoryError::UnlockFailed(e.to_string())),
        }
    }
}
