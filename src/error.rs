//!
//! Defines error types for the ownership layer.

use crate::ops::Op;
use crate::rebac::StoreError;
use crate::storage::StorageError;

/// Errors raised while mediating a query or mutation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccessError {
    /// Subject or organization could not be resolved and no bypass token was present.
    #[error("Authorization context missing: {0}")]
    AuthContextMissing(String),
    /// The storage mutation does not expose a capability this layer requires.
    #[error("Mutation on {object_type} does not support {capability}")]
    UnsupportedMutationShape {
        object_type: String,
        capability: &'static str,
    },
    /// Writing or deleting relationship tuples failed; the mutation is rolled back.
    #[error("Tuple synchronization failed: {0}")]
    TupleSyncFailure(StoreError),
    /// The rule chain denied the operation (explicitly or by exhaustion).
    #[error("Forbidden: {op} on {object_type}: {reason}")]
    PolicyDenied {
        object_type: String,
        op: String,
        reason: String,
    },
    /// The ReBAC store could not answer an access check.
    #[error("Access check unavailable: {0}")]
    AccessCheckUnavailable(StoreError),
    /// An update tried to change an owner field that is fixed at creation.
    #[error("Field {field} of {object_type} is immutable")]
    ImmutableField { object_type: String, field: String },
    /// A create carried no owner for a declaration that requires one.
    #[error("Missing owner field {field} on {object_type}")]
    MissingOwner { object_type: String, field: String },
    /// No policy was composed for the entity type.
    #[error("Unknown entity type: {0}")]
    UnknownEntityType(String),
    /// The request was cancelled before the operation finished.
    #[error("Request cancelled")]
    Cancelled,
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// How an [`AccessError`] surfaces to the outer API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Unauthenticated,
    Forbidden,
    Unavailable,
    Invalid,
    Internal,
}

impl ErrorClass {
    /// HTTP-style status code for the class.
    pub fn status_code(self) -> u16 {
        match self {
            ErrorClass::Unauthenticated => 401,
            ErrorClass::Forbidden => 403,
            ErrorClass::Invalid => 400,
            ErrorClass::Unavailable => 503,
            ErrorClass::Internal => 500,
        }
    }
}

impl AccessError {
    pub fn denied(object_type: &str, op: impl std::fmt::Display, reason: impl Into<String>) -> Self {
        AccessError::PolicyDenied {
            object_type: object_type.to_string(),
            op: op.to_string(),
            reason: reason.into(),
        }
    }

    pub fn denied_op(object_type: &str, op: Op, reason: impl Into<String>) -> Self {
        Self::denied(object_type, op.as_str(), reason)
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            AccessError::AuthContextMissing(_) => ErrorClass::Unauthenticated,
            AccessError::PolicyDenied { .. } => ErrorClass::Forbidden,
            AccessError::AccessCheckUnavailable(_) => ErrorClass::Unavailable,
            AccessError::TupleSyncFailure(StoreError::Unavailable(_)) => ErrorClass::Unavailable,
            AccessError::ImmutableField { .. } | AccessError::MissingOwner { .. } => ErrorClass::Invalid,
            AccessError::Cancelled => ErrorClass::Unavailable,
            AccessError::TupleSyncFailure(_)
            | AccessError::UnsupportedMutationShape { .. }
            | AccessError::UnknownEntityType(_)
            | AccessError::Storage(_)
            | AccessError::Config(_) => ErrorClass::Internal,
        }
    }

    /// Only transient store outages are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AccessError::AccessCheckUnavailable(StoreError::Unavailable(_))
                | AccessError::TupleSyncFailure(StoreError::Unavailable(_))
        )
    }
}

/// Errors raised while composing declarations or building the registry. These
/// happen at startup, never while serving a request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A user-owned (or object-owned) declaration has no reverse-edge name.
    #[error("Declaration for {0} has an empty reverse edge reference")]
    EmptyReference(String),
    /// An object-owned declaration has no parent kind and was not marked as inherited-only.
    #[error("Declaration for {0} is object owned but names no parent kind")]
    MissingParentKind(String),
    /// `allow_empty_for_admin` requires an organization owner field.
    #[error("Declaration for {0} allows empty owner for admins without an organization owner")]
    AdminEmptyWithoutOrganization(String),
    #[error("Entity type {0} is declared more than once")]
    DuplicateEntityType(String),
    #[error("Registry lists unknown entity type {0}")]
    UnknownCreatableType(String),
    #[error("Registry lists {0} more than once")]
    DuplicateCreatableType(String),
    #[error("Invalid name: {0:?}")]
    InvalidName(String),
    /// Creator groups reference a type the registry does not list.
    #[error("Creator group type {0} is not in the registry")]
    UnregisteredCreatorGroup(String),
    #[error("Entity type {object_type} has no edge named {edge}")]
    UnknownEdge { object_type: String, edge: String },
    #[error("Failed to read configuration: {0}")]
    Io(String),
    #[error("Failed to parse configuration: {0}")]
    Parse(String),
}
