// Error taxonomy for the session core
//
// Each kind maps to one recovery policy:
// - TransportError: recovered by the channel's own retry budget
// - LifecycleError: surfaced to the operator, state rolls back
// - MalformedEventError: event dropped and logged
// - SessionError::StaleCompletion: discarded silently

use thiserror::Error;

use crate::models::SessionStatus;
use crate::stats::FamilyKind;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("connection closed: {0}")]
    Closed(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LifecycleError {
    /// The request did not complete at the transport level.
    #[error("network error: {message}")]
    Network { message: String, connect: bool },

    #[error("backend rejected request with status {status}{}", reason_suffix(.message))]
    Rejected { status: u16, message: Option<String> },

    #[error("invalid backend response: {0}")]
    InvalidResponse(String),
}

fn reason_suffix(message: &Option<String>) -> String {
    message
        .as_deref()
        .map(|m| format!(": {m}"))
        .unwrap_or_default()
}

impl LifecycleError {
    pub fn is_retryable(&self) -> bool {
        match self {
            LifecycleError::Network { .. } => true,
            LifecycleError::Rejected { status, .. } => *status >= 500,
            LifecycleError::InvalidResponse(_) => false,
        }
    }

    /// True when the request is known not to have reached the backend.
    pub fn never_sent(&self) -> bool {
        matches!(self, LifecycleError::Network { connect: true, .. })
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MalformedEventError {
    #[error("unknown {family} label '{label}'")]
    UnknownLabel { family: FamilyKind, label: String },

    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("undecodable event: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SessionError {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("stale completion for generation {found} (current {expected})")]
    StaleCompletion { expected: u64, found: u64 },

    #[error("cannot {trigger} while {status}")]
    InvalidTransition {
        status: SessionStatus,
        trigger: &'static str,
    },

    #[error("no session has been started")]
    NoSession,
}

pub type SessionResult<T> = Result<T, SessionError>;
