//! Domain error model.
//!
//! Every failure crossing the engine boundary is a `DomainError`: a stable
//! [`ErrorKind`] plus a human-readable detail carried by `Display`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// state legality, resource exhaustion, conflicts). Storage failures are mapped
/// into it at the infrastructure boundary.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed input (missing product, non-positive amounts, empty reason).
    #[error("validation failed: {0}")]
    Validation(String),

    /// The lot already reached a terminal audit status.
    #[error("already audited: {0}")]
    AlreadyAudited(String),

    /// Line items may only change while the request is under revision.
    #[error("invalid state for edit: {0}")]
    InvalidStateForEdit(String),

    /// The requested transition is illegal in the entity's current state.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// Placing stock would overflow the cell.
    #[error("capacity exceeded in cell {cell}: requested {requested}, available {available}")]
    CapacityExceeded {
        cell: String,
        requested: i64,
        available: i64,
    },

    /// A single stock record cannot cover the requested draw.
    #[error(
        "insufficient stock in record {record}: requested {requested_quantity} units / {requested_weight} g, \
         available {available_quantity} units / {available_weight} g"
    )]
    InsufficientStock {
        record: String,
        requested_quantity: i64,
        requested_weight: i64,
        available_quantity: i64,
        available_weight: i64,
    },

    /// All allocatable stock of a product cannot cover the request.
    #[error("insufficient inventory for product {product}: requested {requested}, available {available}")]
    InsufficientInventory {
        product: String,
        requested: i64,
        available: i64,
    },

    /// Concurrent modification detected while applying a dispatch.
    #[error("allocation conflict: {0}")]
    AllocationConflict(String),

    /// Referenced entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// An internal consistency rule was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// The actor lacks the capability required by the operation.
    #[error("unauthorized: missing capability '{0}'")]
    Unauthorized(String),
}

/// Stable machine-readable error kind.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    AlreadyAudited,
    InvalidStateForEdit,
    InvalidTransition,
    CapacityExceeded,
    InsufficientStock,
    InsufficientInventory,
    AllocationConflict,
    NotFound,
    InvariantViolation,
    Unauthorized,
}

/// Error families a caller can branch on.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Validation,
    State,
    Resource,
    Conflict,
    NotFound,
    Authorization,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::AlreadyAudited => "already_audited",
            ErrorKind::InvalidStateForEdit => "invalid_state_for_edit",
            ErrorKind::InvalidTransition => "invalid_transition",
            ErrorKind::CapacityExceeded => "capacity_exceeded",
            ErrorKind::InsufficientStock => "insufficient_stock",
            ErrorKind::InsufficientInventory => "insufficient_inventory",
            ErrorKind::AllocationConflict => "allocation_conflict",
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvariantViolation => "invariant_violation",
            ErrorKind::Unauthorized => "unauthorized",
        }
    }

    pub fn category(self) -> ErrorCategory {
        match self {
            ErrorKind::Validation => ErrorCategory::Validation,
            ErrorKind::AlreadyAudited
            | ErrorKind::InvalidStateForEdit
            | ErrorKind::InvalidTransition => ErrorCategory::State,
            ErrorKind::CapacityExceeded
            | ErrorKind::InsufficientStock
            | ErrorKind::InsufficientInventory => ErrorCategory::Resource,
            ErrorKind::AllocationConflict => ErrorCategory::Conflict,
            ErrorKind::NotFound => ErrorCategory::NotFound,
            ErrorKind::Unauthorized => ErrorCategory::Authorization,
            ErrorKind::InvariantViolation => ErrorCategory::Internal,
        }
    }
}

impl core::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn already_audited(msg: impl Into<String>) -> Self {
        Self::AlreadyAudited(msg.into())
    }

    pub fn invalid_state_for_edit(msg: impl Into<String>) -> Self {
        Self::InvalidStateForEdit(msg.into())
    }

    pub fn invalid_transition(msg: impl Into<String>) -> Self {
        Self::InvalidTransition(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::AllocationConflict(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn unauthorized(capability: impl Into<String>) -> Self {
        Self::Unauthorized(capability.into())
    }

    pub fn not_found(entity: &'static str, id: impl core::fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DomainError::Validation(_) => ErrorKind::Validation,
            DomainError::AlreadyAudited(_) => ErrorKind::AlreadyAudited,
            DomainError::InvalidStateForEdit(_) => ErrorKind::InvalidStateForEdit,
            DomainError::InvalidTransition(_) => ErrorKind::InvalidTransition,
            DomainError::CapacityExceeded { .. } => ErrorKind::CapacityExceeded,
            DomainError::InsufficientStock { .. } => ErrorKind::InsufficientStock,
            DomainError::InsufficientInventory { .. } => ErrorKind::InsufficientInventory,
            DomainError::AllocationConflict(_) => ErrorKind::AllocationConflict,
            DomainError::NotFound { .. } => ErrorKind::NotFound,
            DomainError::InvariantViolation(_) => ErrorKind::InvariantViolation,
            DomainError::Unauthorized(_) => ErrorKind::Unauthorized,
        }
    }

    /// Whether the orchestrator's full-transaction retry applies.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DomainError::AllocationConflict(_))
    }
}
