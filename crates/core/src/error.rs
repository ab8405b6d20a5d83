//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic failures of the authorization domain
/// (validation, referential conflicts, missing resources). Infrastructure
/// concerns belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (malformed enum, empty scope/verbs, wrong
    /// identifier shape). Rejected before any permission evaluation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier could not be parsed.
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested resource was not found.
    #[error("not found")]
    NotFound,

    /// A referential conflict: the request is well-formed but references
    /// state it cannot (a nonexistent entity, a duplicate registration, or a
    /// grant the requester lacks the privilege to create). Distinct from
    /// `NotFound` because the invalid reference is payload data, not a path
    /// identifier.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The request carried no usable credentials.
    #[error("unauthorized")]
    Unauthorized,
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }
}
