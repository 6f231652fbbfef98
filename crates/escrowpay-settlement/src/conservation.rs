//! Money conservation checker.
//!
//! Invariants checked against the escrow ledger and the wallet:
//! ```text
//! ∀ seller: Σ(net_amount of RELEASED escrows) == Σ(EscrowRelease credits)
//! ∀ buyer:  Σ(amount of REFUNDED escrows)     == Σ(EscrowRefund credits)
//! ∀ escrow: at most one of {release credit, refund credit} exists, and it
//!           exists iff the escrow is in the matching terminal state
//! ```
//!
//! A violation means money was created or lost; callers should treat it
//! as a critical alert.

use std::collections::{HashMap, HashSet};

use escrowpay_types::{
    Amount, EscrowPayError, EscrowStatus, EscrowTransaction, ReferenceType, Result, UserId,
    WalletReference,
};

use crate::wallet::{WalletLedger, credited_total};

/// Expected terminal credits, accumulated from escrow rows.
#[derive(Debug, Default)]
pub struct MoneyConservation {
    /// Σ net amount of released escrows per seller.
    releases: HashMap<UserId, Amount>,
    /// Σ gross amount of refunded escrows per buyer.
    refunds: HashMap<UserId, Amount>,
}

impl MoneyConservation {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build expectations from a ledger snapshot.
    pub fn from_escrows<'a>(rows: impl IntoIterator<Item = &'a EscrowTransaction>) -> Result<Self> {
        let mut sc = Self::new();
        for row in rows {
            match row.status {
                EscrowStatus::Released => sc.record_release(row.seller_id, row.net_amount)?,
                EscrowStatus::Refunded => sc.record_refund(row.buyer_id, row.amount)?,
                _ => {}
            }
        }
        Ok(sc)
    }

    pub fn record_release(&mut self, seller: UserId, net_amount: Amount) -> Result<()> {
        let total = self.releases.entry(seller).or_insert(Amount::ZERO);
        *total = total.checked_add(net_amount)?;
        Ok(())
    }

    pub fn record_refund(&mut self, buyer: UserId, amount: Amount) -> Result<()> {
        let total = self.refunds.entry(buyer).or_insert(Amount::ZERO);
        *total = total.checked_add(amount)?;
        Ok(())
    }

    #[must_use]
    pub fn expected_release(&self, seller: UserId) -> Amount {
        self.releases.get(&seller).copied().unwrap_or(Amount::ZERO)
    }

    #[must_use]
    pub fn expected_refund(&self, buyer: UserId) -> Amount {
        self.refunds.get(&buyer).copied().unwrap_or(Amount::ZERO)
    }

    /// Compare per-user expectations with the wallet's actual credits.
    ///
    /// # Errors
    /// Returns [`EscrowPayError::ConservationViolation`] on the first mismatch.
    pub fn verify(&self, wallet: &dyn WalletLedger) -> Result<()> {
        let mut users: HashSet<UserId> = wallet.users().into_iter().collect();
        users.extend(self.releases.keys().copied());
        users.extend(self.refunds.keys().copied());

        for user in users {
            let released = credited_total(wallet, user, ReferenceType::EscrowRelease)?;
            let expected = self.expected_release(user);
            if released != expected {
                return Err(EscrowPayError::ConservationViolation {
                    reason: format!(
                        "user {user}: release credits {released} != released escrow net {expected}"
                    ),
                });
            }

            let refunded = credited_total(wallet, user, ReferenceType::EscrowRefund)?;
            let expected = self.expected_refund(user);
            if refunded != expected {
                return Err(EscrowPayError::ConservationViolation {
                    reason: format!(
                        "user {user}: refund credits {refunded} != refunded escrow amount {expected}"
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Check that every escrow has exactly the terminal credit its status implies.
///
/// # Errors
/// Returns [`EscrowPayError::ConservationViolation`] naming the first bad row.
pub fn verify_exits(rows: &[EscrowTransaction], wallet: &dyn WalletLedger) -> Result<()> {
    for row in rows {
        let released = wallet
            .entry_for(&WalletReference::new(ReferenceType::EscrowRelease, row.id))
            .is_some();
        let refunded = wallet
            .entry_for(&WalletReference::new(ReferenceType::EscrowRefund, row.id))
            .is_some();

        let ok = match row.status {
            EscrowStatus::Released => released && !refunded,
            EscrowStatus::Refunded => refunded && !released,
            _ => !released && !refunded,
        };
        if !ok {
            return Err(EscrowPayError::ConservationViolation {
                reason: format!(
                    "escrow {} in {}: release credit={released}, refund credit={refunded}",
                    row.id, row.status
                ),
            });
        }
    }
    Ok(())
}

/// Both checks over a full ledger snapshot.
pub fn verify_ledger(rows: &[EscrowTransaction], wallet: &dyn WalletLedger) -> Result<()> {
    verify_exits(rows, wallet)?;
    MoneyConservation::from_escrows(rows)?.verify(wallet)
}
