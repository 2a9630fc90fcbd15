//! Error types for cityfeed-origin.

use std::fmt;

use thiserror::Error;

use cityfeed_core::Origin;

use crate::transport::tls_name_mismatch_hint;

/// No status line was obtained: DNS, connect, TLS, or timeout.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TransportError {
    message: String,
}

impl TransportError {
    /// Build from a transport message, appending the dotted-bucket TLS hint
    /// when the failure looks like a certificate name mismatch.
    pub fn from_message(origin: &Origin, message: impl Into<String>) -> Self {
        let mut message = message.into();
        let lower = message.to_ascii_lowercase();
        if lower.contains("not valid for name") || lower.contains("notvalidforname") {
            if let Some(hint) = tls_name_mismatch_hint(origin) {
                message = format!("{message} ({hint})");
            }
        }
        Self { message }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Why one origin was given up on for a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    /// Transport failure or interrupted body; retried until the wait budget ran out.
    Transport(TransportError),
    /// Any status other than 200. `excerpt` is a single-line prefix of the body.
    Status { code: u16, excerpt: String },
    /// The body arrived but the caller refused it (hash mismatch, bad manifest).
    Rejected(String),
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCause::Transport(err) => write!(f, "{err}"),
            FailureCause::Status { code, excerpt } if excerpt.is_empty() => {
                write!(f, "HTTP {code}")
            }
            FailureCause::Status { code, excerpt } => write!(f, "HTTP {code}: {excerpt}"),
            FailureCause::Rejected(reason) => write!(f, "rejected: {reason}"),
        }
    }
}

/// Failure record for one origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginFailure {
    pub origin: Origin,
    pub attempts: u32,
    pub cause: FailureCause,
}

impl fmt::Display for OriginFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.origin, self.cause)?;
        if self.attempts > 1 {
            write!(f, " ({} attempts)", self.attempts)?;
        }
        Ok(())
    }
}

/// Every origin failed for `resource`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct Exhausted {
    pub resource: String,
    pub failures: Vec<OriginFailure>,
}

impl Exhausted {
    /// True when every origin answered but refused on content grounds.
    pub fn all_rejected(&self) -> bool {
        !self.failures.is_empty()
            && self
                .failures
                .iter()
                .all(|f| matches!(f.cause, FailureCause::Rejected(_)))
    }
}

impl fmt::Display for Exhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: all origins failed", self.resource)?;
        for failure in &self.failures {
            write!(f, "; [{failure}]")?;
        }
        Ok(())
    }
}

/// Outcome of a failed [`crate::OriginClient::fetch`].
///
/// `E` is the caller's local error type (e.g. a filesystem error while
/// spooling an object), which stops the fetch instead of failing over.
#[derive(Debug, Error)]
pub enum FetchError<E: std::error::Error + 'static> {
    #[error(transparent)]
    Exhausted(Exhausted),

    #[error(transparent)]
    Local(E),
}

impl<E: std::error::Error + 'static> From<Exhausted> for FetchError<E> {
    fn from(err: Exhausted) -> Self {
        FetchError::Exhausted(err)
    }
}
