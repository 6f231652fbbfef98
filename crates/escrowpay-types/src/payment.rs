//! Records of completed collections and withdrawals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Amount, BookingId, EscrowId, PaymentId, PaymentReference, ProviderId, UserId};

/// A buyer collection that succeeded and funded an escrow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub id: PaymentId,
    pub booking_id: BookingId,
    pub payer_id: Option<UserId>,
    pub amount: Amount,
    pub provider: ProviderId,
    pub reference: PaymentReference,
    pub provider_transaction_id: String,
    pub escrow_id: EscrowId,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle of a withdrawal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalStatus {
    /// Wallet debited, provider outcome unknown. Retry with the same reference.
    InFlight,
    Completed,
    /// Provider rejected the disbursement; the debit was credited back.
    Reversed,
}

impl std::fmt::Display for WithdrawalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InFlight => write!(f, "in_flight"),
            Self::Completed => write!(f, "completed"),
            Self::Reversed => write!(f, "reversed"),
        }
    }
}

/// A wallet withdrawal to an external account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalRecord {
    pub reference: PaymentReference,
    pub user_id: UserId,
    pub amount: Amount,
    pub provider: ProviderId,
    /// Phone number, account number or other provider-specific handle.
    pub destination: String,
    pub status: WithdrawalStatus,
    pub provider_transaction_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
