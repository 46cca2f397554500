use std::fmt;

use thiserror::Error;

/// Error taxonomy shared by every core operation. Callers decide retry vs.
/// abort vs. no-op from the variant, never from string matching.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Input rejected before any write (empty text, self-contact, malformed
    /// contact code, mutation of a deleted message).
    #[error("{0}")]
    Validation(String),

    /// The named entity does not exist.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// The named entity already exists. Informational, not a failure: the
    /// caller resolves to the existing entity.
    #[error("{0} already exists")]
    AlreadyExists(&'static str),

    /// The caller is authenticated but not allowed to perform this mutation
    /// (e.g. deleting someone else's message).
    #[error("not permitted")]
    Forbidden,

    /// The backing store failed. Transient, worth retrying.
    #[error("storage error: {0}")]
    Storage(String),

    /// An external collaborator (translation service) failed. Localized to
    /// the single call, worth retrying.
    #[error("external service error: {0}")]
    External(String),
}

impl ChatError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn storage(err: impl fmt::Display) -> Self {
        Self::Storage(err.to_string())
    }

    pub fn external(err: impl fmt::Display) -> Self {
        Self::External(err.to_string())
    }

    /// True for failures where retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::External(_))
    }
}

pub type ChatResult<T> = Result<T, ChatError>;
