//! The subject codec — one opaque string per workflow instance.
//!
//! A subject addresses exactly one orchestration: it carries the
//! orchestrator's name and pinned version, a fresh execution id, the
//! initiator that started the root workflow, and free-form routing meta.
//! The wire form is canonical JSON, zlib-deflated, then URL-safe
//! unpadded base64 — printable, transport-friendly, and a few hundred
//! bytes at most. Consumers treat it as opaque; equality is byte
//! equality; `parse(encode(x)) == x`.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io::{Read, Write};
use thiserror::Error;

/// Meta key read by the pipelines to reroute a completion event away
/// from the initiator.
pub const META_REDIRECT_TO: &str = "redirectto";

/// Decoded subjects are bounded; anything larger than this after
/// inflation is rejected as malformed.
const MAX_DECODED_LEN: u64 = 64 * 1024;

/// Subject codec errors.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum SubjectError {
    /// A name or initiator is empty or uses characters outside
    /// `[A-Za-z0-9._-]`.
    #[error("invalid identifier {0:?}: must be non-empty [A-Za-z0-9._-]")]
    InvalidIdentifier(String),

    /// The string is not a well-formed encoded subject.
    #[error("subject decode failed: {0}")]
    Decode(String),

    /// Serialization of the subject content failed.
    #[error("subject encode failed: {0}")]
    Encode(String),
}

/// The orchestrator identity a subject is addressed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectOrchestrator {
    /// Orchestrator name; equal to the event type its contract accepts.
    pub name: String,
    /// The contract version this workflow instance is pinned to.
    pub version: Version,
}

/// The execution identity carried by a subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectExecution {
    /// A fresh nonce per mint; distinguishes two otherwise-identical
    /// workflow instances.
    pub id: String,
    /// The source that started the root workflow. Preserved across
    /// parent → child subject derivation.
    pub initiator: String,
}

/// The decoded form of a [`Subject`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectContent {
    /// Who this subject addresses.
    pub orchestrator: SubjectOrchestrator,
    /// Who is running and who asked for it.
    pub execution: SubjectExecution,
    /// Free-form routing metadata. The core reads [`META_REDIRECT_TO`].
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, String>,
}

/// An encoded workflow-instance address.
///
/// Opaque to consumers: two subjects are equal iff their bytes are
/// equal. Construct via [`Subject::new`] / [`Subject::from_parent`], or
/// wrap a string received from the transport (validity is only
/// established by [`Subject::parse`]).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Subject(String);

impl Subject {
    /// Mint a fresh root subject.
    ///
    /// Two calls with identical arguments produce distinct subjects —
    /// each mint draws a new execution id.
    pub fn new(name: &str, version: &Version, initiator: &str) -> Result<Self, SubjectError> {
        Self::with_meta(name, version, initiator, BTreeMap::new())
    }

    /// Mint a fresh root subject carrying routing meta.
    pub fn with_meta(
        name: &str,
        version: &Version,
        initiator: &str,
        meta: BTreeMap<String, String>,
    ) -> Result<Self, SubjectError> {
        check_identifier(name)?;
        check_identifier(initiator)?;
        Self::encode(&SubjectContent {
            orchestrator: SubjectOrchestrator {
                name: name.to_string(),
                version: version.clone(),
            },
            execution: SubjectExecution {
                id: uuid::Uuid::new_v4().to_string(),
                initiator: initiator.to_string(),
            },
            meta,
        })
    }

    /// Mint a child subject from a parent.
    ///
    /// The child keeps the parent's `execution.initiator`, draws a fresh
    /// execution id, and merges meta (child keys win over the parent's).
    pub fn from_parent(
        parent: &Subject,
        name: &str,
        version: &Version,
        meta: BTreeMap<String, String>,
    ) -> Result<Self, SubjectError> {
        check_identifier(name)?;
        let content = parent.parse()?;
        let mut merged = content.meta;
        merged.extend(meta);
        Self::encode(&SubjectContent {
            orchestrator: SubjectOrchestrator {
                name: name.to_string(),
                version: version.clone(),
            },
            execution: SubjectExecution {
                id: uuid::Uuid::new_v4().to_string(),
                initiator: content.execution.initiator,
            },
            meta: merged,
        })
    }

    /// Decode this subject.
    pub fn parse(&self) -> Result<SubjectContent, SubjectError> {
        let compressed = URL_SAFE_NO_PAD
            .decode(self.0.as_bytes())
            .map_err(|e| SubjectError::Decode(e.to_string()))?;
        let mut json = Vec::new();
        ZlibDecoder::new(compressed.as_slice())
            .take(MAX_DECODED_LEN)
            .read_to_end(&mut json)
            .map_err(|e| SubjectError::Decode(e.to_string()))?;
        serde_json::from_slice(&json).map_err(|e| SubjectError::Decode(e.to_string()))
    }

    /// Whether this subject decodes cleanly.
    pub fn is_valid(&self) -> bool {
        self.parse().is_ok()
    }

    /// Borrow the encoded form.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn encode(content: &SubjectContent) -> Result<Self, SubjectError> {
        let json =
            serde_json::to_vec(content).map_err(|e| SubjectError::Encode(e.to_string()))?;
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(&json)
            .map_err(|e| SubjectError::Encode(e.to_string()))?;
        let compressed = enc
            .finish()
            .map_err(|e| SubjectError::Encode(e.to_string()))?;
        Ok(Subject(URL_SAFE_NO_PAD.encode(compressed)))
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Subject {
    fn from(s: &str) -> Self {
        Subject(s.to_owned())
    }
}

impl From<String> for Subject {
    fn from(s: String) -> Self {
        Subject(s)
    }
}

fn check_identifier(s: &str) -> Result<(), SubjectError> {
    let ok = !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if ok {
        Ok(())
    } else {
        Err(SubjectError::InvalidIdentifier(s.to_string()))
    }
}
