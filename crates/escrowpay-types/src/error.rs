//! Error types for the EscrowPay settlement core.
//!
//! All errors use the `EP_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by subsystem:
//! - 1xx: Request errors (validation, authorization, lookup)
//! - 2xx: Admission gate errors
//! - 3xx: Escrow ledger errors
//! - 4xx: Wallet errors
//! - 5xx: Provider / dispatch errors
//! - 6xx: Invariant errors
//! - 9xx: General / internal errors

use thiserror::Error;

use crate::{Amount, EscrowId, EscrowStatus, ProviderId};

/// Central error enum for all EscrowPay operations.
#[derive(Debug, Error)]
pub enum EscrowPayError {
    // =================================================================
    // Request Errors (1xx)
    // =================================================================
    /// Malformed input.
    #[error("EP_ERR_100: Validation failed: {reason}")]
    Validation { reason: String },

    /// The actor is not allowed to perform this action.
    #[error("EP_ERR_101: Unauthorized: {reason}")]
    Unauthorized { reason: String },

    /// The referenced entity does not exist.
    #[error("EP_ERR_102: {entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    // =================================================================
    // Admission Errors (2xx)
    // =================================================================
    /// The fraud gate refused the payment attempt.
    #[error("EP_ERR_200: Payment attempt blocked (risk score {risk_score}): {}", .risks.join(", "))]
    FraudBlocked { risk_score: u32, risks: Vec<String> },

    // =================================================================
    // Escrow Errors (3xx)
    // =================================================================
    /// The escrow row was not in a state that permits the requested transition.
    #[error("EP_ERR_300: Invalid state transition for escrow {id}: {from} -> {to}")]
    InvalidStateTransition {
        id: EscrowId,
        from: EscrowStatus,
        to: EscrowStatus,
    },

    /// The booking already has a non-terminal escrow.
    #[error("EP_ERR_301: Booking {booking} already has an active escrow")]
    DuplicateEscrow { booking: String },

    /// Another payment for the booking is between gate and escrow creation.
    #[error("EP_ERR_302: Booking {booking} has a payment in progress")]
    PaymentInProgress { booking: String },

    // =================================================================
    // Wallet Errors (4xx)
    // =================================================================
    /// Not enough wallet balance for a debit.
    #[error("EP_ERR_400: Insufficient funds: need {needed}, have {available}")]
    InsufficientFunds { needed: Amount, available: Amount },

    /// A wallet movement (or escrow collection) with this reference already exists.
    #[error("EP_ERR_401: Duplicate reference: {reference}")]
    DuplicateReference { reference: String },

    // =================================================================
    // Provider Errors (5xx)
    // =================================================================
    /// Retryable provider failure (timeout, outage, in-flight duplicate).
    #[error("EP_ERR_500: Provider {provider} temporarily failed, retry later: {reason}")]
    ProviderTransientFailure { provider: ProviderId, reason: String },

    /// Non-retryable provider failure (declined, unsupported, rejected).
    #[error("EP_ERR_501: Provider {provider} failed permanently: {reason}")]
    ProviderPermanentFailure { provider: ProviderId, reason: String },

    // =================================================================
    // Invariant Errors (6xx)
    // =================================================================
    /// Escrow exits and wallet credits disagree. Critical safety alert.
    #[error("EP_ERR_600: Money conservation violation: {reason}")]
    ConservationViolation { reason: String },

    // =================================================================
    // General / Internal (9xx)
    // =================================================================
    /// Unrecoverable internal error.
    #[error("EP_ERR_900: Internal error: {0}")]
    Internal(String),

    /// Configuration error (invalid config document, inconsistent values).
    #[error("EP_ERR_901: Configuration error: {0}")]
    Configuration(String),

    /// Serialization / deserialization error.
    #[error("EP_ERR_902: Serialization error: {0}")]
    Serialization(String),
}

impl EscrowPayError {
    /// Whether the caller (or a scheduler) may retry the same operation later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ProviderTransientFailure { .. } | Self::PaymentInProgress { .. }
        )
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, EscrowPayError>;

impl From<serde_json::Error> for EscrowPayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Shorthand used by lookups across the workspace.
#[must_use]
pub fn not_found(entity: &'static str, id: impl ToString) -> EscrowPayError {
    EscrowPayError::NotFound {
        entity,
        id: id.to_string(),
    }
}
