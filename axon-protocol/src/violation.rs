//! The pipeline error taxonomy: violations and workflow errors.
//!
//! Two orthogonal failure kinds flow through an orchestration step:
//!
//! - A [`Violation`] means continuing would risk data corruption or the
//!   deployment is misconfigured. Violations propagate to the caller and
//!   are never turned into events — the surrounding infrastructure must
//!   handle them (alerting, dead-lettering, redeploy).
//! - A [`WorkflowError`] is an expected business failure raised by user
//!   code (an action, a guard, a handler). The pipelines catch it and
//!   convert it into a single `sys.<source>.error` event addressed to the
//!   workflow's initiator, so callers can compose retries or compensation
//!   out of ordinary event flow.

use std::fmt;
use thiserror::Error;

/// What went wrong inside the transactional half of the pipeline.
///
/// The names mirror the phases of the subject/lock/state resource: a
/// subject that does not decode, a lock call that errored, a lock held by
/// someone else, and read/write failures at the backend.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionCause {
    /// The event subject does not parse.
    InvalidSubject,
    /// The backend errored while acquiring the lock.
    LockFailure,
    /// The lock is held by a concurrent invocation.
    LockUnacquired,
    /// The backend errored while reading state.
    ReadFailure,
    /// The backend errored while persisting state.
    WriteFailure,
}

impl fmt::Display for TransactionCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            TransactionCause::InvalidSubject => "INVALID_SUBJECT",
            TransactionCause::LockFailure => "LOCK_FAILURE",
            TransactionCause::LockUnacquired => "LOCK_UNACQUIRED",
            TransactionCause::ReadFailure => "READ_FAILURE",
            TransactionCause::WriteFailure => "WRITE_FAILURE",
        };
        write!(f, "{code}")
    }
}

/// An infrastructure-level failure that must reach the caller.
///
/// Exactly one of four kinds, so callers can route on the variant:
///
/// | Variant | When |
/// |---------|------|
/// | `Transaction` | Subject malformed; lock/read/write failed at the backend |
/// | `Config` | No machine/handler for the resolved version; no contract matches an event type |
/// | `Contract` | An event payload fails schema validation on ingress |
/// | `Execution` | An invariant broke mid-pipeline (bad parent subject, corrupt stored state, engine panic) |
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Violation {
    /// The subject/lock/state resource failed.
    #[error("transaction violation ({cause}): {message}")]
    Transaction {
        /// Which resource phase failed.
        cause: TransactionCause,
        /// Backend or codec detail.
        message: String,
    },

    /// The deployment is misconfigured for this event.
    #[error("config violation: {0}")]
    Config(String),

    /// An event payload does not satisfy its contract schema.
    #[error("contract violation: {0}")]
    Contract(String),

    /// A pipeline invariant broke mid-flight.
    #[error("execution violation: {0}")]
    Execution(String),
}

impl Violation {
    /// Build a transaction violation.
    pub fn transaction(cause: TransactionCause, message: impl fmt::Display) -> Self {
        Violation::Transaction {
            cause,
            message: message.to_string(),
        }
    }

    /// Build a config violation.
    pub fn config(message: impl Into<String>) -> Self {
        Violation::Config(message.into())
    }

    /// Build a contract violation.
    pub fn contract(message: impl Into<String>) -> Self {
        Violation::Contract(message.into())
    }

    /// Build an execution violation.
    pub fn execution(message: impl Into<String>) -> Self {
        Violation::Execution(message.into())
    }
}

/// A business failure raised by user code. Include context.
pub type WorkflowError = Box<dyn std::error::Error + Send + Sync>;

/// The failure type of one workflow advance: either an infrastructure
/// [`Violation`] (escalated to the caller) or a [`WorkflowError`]
/// (converted to a system-error event by the pipeline).
#[derive(Debug, Error)]
pub enum StepError {
    /// Infrastructure failure — propagates out of `execute`.
    #[error(transparent)]
    Violation(#[from] Violation),

    /// Business failure — becomes a `sys.<source>.error` event.
    #[error("workflow error: {0}")]
    Workflow(#[source] WorkflowError),
}

impl From<WorkflowError> for StepError {
    fn from(err: WorkflowError) -> Self {
        StepError::Workflow(err)
    }
}
