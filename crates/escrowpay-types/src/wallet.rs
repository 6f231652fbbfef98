//! Wallet movements.
//!
//! A user's balance is never written directly: it is the running sum of
//! [`WalletEntry`] rows, each tied to exactly one business reference.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Amount, UserId, WalletEntryId};

/// Business reason for a wallet movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceType {
    /// Seller credit when an escrow is released (reference = escrow id).
    EscrowRelease,
    /// Buyer credit when an escrow is refunded (reference = escrow id).
    EscrowRefund,
    /// Debit for a withdrawal to an external account (reference = `WDR-…`).
    Withdrawal,
    /// Credit undoing a withdrawal the provider rejected.
    WithdrawalReversal,
}

impl std::fmt::Display for ReferenceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EscrowRelease => write!(f, "escrow_release"),
            Self::EscrowRefund => write!(f, "escrow_refund"),
            Self::Withdrawal => write!(f, "withdrawal"),
            Self::WithdrawalReversal => write!(f, "withdrawal_reversal"),
        }
    }
}

/// Idempotency key of a wallet movement: `(reference_type, reference_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WalletReference {
    pub reference_type: ReferenceType,
    pub reference_id: String,
}

impl WalletReference {
    #[must_use]
    pub fn new(reference_type: ReferenceType, reference_id: impl ToString) -> Self {
        Self {
            reference_type,
            reference_id: reference_id.to_string(),
        }
    }
}

impl std::fmt::Display for WalletReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.reference_type, self.reference_id)
    }
}

/// Direction of a movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryDirection {
    Credit,
    Debit,
}

/// One row of the wallet transaction log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletEntry {
    pub id: WalletEntryId,
    pub user_id: UserId,
    pub direction: EntryDirection,
    pub amount: Amount,
    pub reference: WalletReference,
    pub description: String,
    /// Balance immediately after this entry was applied.
    pub balance_after: Amount,
    pub created_at: DateTime<Utc>,
}

impl WalletEntry {
    /// Signed effect of this entry on the balance, in minor units.
    #[must_use]
    pub fn signed_delta(&self) -> i128 {
        let units = i128::from(self.amount.minor_units());
        match self.direction {
            EntryDirection::Credit => units,
            EntryDirection::Debit => -units,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_display() {
        let r = WalletReference::new(ReferenceType::EscrowRelease, "abc");
        assert_eq!(r.to_string(), "escrow_release:abc");
    }

    #[test]
    fn signed_delta_follows_direction() {
        let mut entry = WalletEntry {
            id: WalletEntryId::new(),
            user_id: UserId::new(),
            direction: EntryDirection::Credit,
            amount: Amount::new(500),
            reference: WalletReference::new(ReferenceType::Withdrawal, "WDR-1"),
            description: String::new(),
            balance_after: Amount::new(500),
            created_at: Utc::now(),
        };
        assert_eq!(entry.signed_delta(), 500);
        entry.direction = EntryDirection::Debit;
        assert_eq!(entry.signed_delta(), -500);
    }
}
