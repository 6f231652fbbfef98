//! User wallets.
//!
//! Balances only move through [`WalletLedger::credit`] and
//! [`WalletLedger::debit`]; each call appends a [`WalletEntry`] tied to a
//! `(reference_type, reference_id)` that can be applied at most once. The
//! balance is therefore always the sum of the user's entries.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use escrowpay_types::{
    Amount, EntryDirection, EscrowPayError, ReferenceType, Result, UserId, WalletEntry,
    WalletEntryId, WalletReference,
};
use parking_lot::Mutex;
use tracing::info;

/// Wallet storage. Implementations must apply each reference at most once.
pub trait WalletLedger: Send + Sync {
    /// Add `amount` to `user`'s balance.
    ///
    /// # Errors
    /// [`EscrowPayError::DuplicateReference`] if `reference` was already applied.
    fn credit(
        &self,
        user: UserId,
        amount: Amount,
        reference: WalletReference,
        description: &str,
    ) -> Result<WalletEntry>;

    /// Remove `amount` from `user`'s balance.
    ///
    /// # Errors
    /// [`EscrowPayError::InsufficientFunds`] if the balance is too low, or
    /// [`EscrowPayError::DuplicateReference`] if `reference` was already applied.
    fn debit(
        &self,
        user: UserId,
        amount: Amount,
        reference: WalletReference,
        description: &str,
    ) -> Result<WalletEntry>;

    fn balance(&self, user: UserId) -> Amount;

    /// Entries for `user`, oldest first.
    fn entries(&self, user: UserId) -> Vec<WalletEntry>;

    /// The entry applied under `reference`, if any.
    fn entry_for(&self, reference: &WalletReference) -> Option<WalletEntry>;

    /// Every user with at least one entry.
    fn users(&self) -> Vec<UserId>;
}

#[derive(Debug, Default)]
struct WalletState {
    balances: HashMap<UserId, Amount>,
    entries: Vec<WalletEntry>,
    applied: HashSet<WalletReference>,
}

/// Process-local wallet ledger.
#[derive(Debug, Default)]
pub struct InMemoryWallet {
    state: Mutex<WalletState>,
}

impl InMemoryWallet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sum of all balances.
    pub fn total_balance(&self) -> Result<Amount> {
        Amount::sum(self.state.lock().balances.values().copied())
    }

    /// Total credited to `user` under one reference type.
    pub fn credited(&self, user: UserId, reference_type: ReferenceType) -> Result<Amount> {
        credited_total(self, user, reference_type)
    }

    fn apply(
        &self,
        user: UserId,
        direction: EntryDirection,
        amount: Amount,
        reference: WalletReference,
        description: &str,
    ) -> Result<WalletEntry> {
        let mut state = self.state.lock();
        if state.applied.contains(&reference) {
            return Err(EscrowPayError::DuplicateReference {
                reference: reference.to_string(),
            });
        }

        let current = state.balances.get(&user).copied().unwrap_or(Amount::ZERO);
        let balance_after = match direction {
            EntryDirection::Credit => current.checked_add(amount)?,
            EntryDirection::Debit => {
                if current < amount {
                    return Err(EscrowPayError::InsufficientFunds {
                        needed: amount,
                        available: current,
                    });
                }
                current.checked_sub(amount)?
            }
        };

        let entry = WalletEntry {
            id: WalletEntryId::new(),
            user_id: user,
            direction,
            amount,
            reference: reference.clone(),
            description: description.to_string(),
            balance_after,
            created_at: Utc::now(),
        };
        state.balances.insert(user, balance_after);
        state.applied.insert(reference);
        state.entries.push(entry.clone());

        info!(
            user = %user,
            ?direction,
            %amount,
            reference = %entry.reference,
            %balance_after,
            "Wallet entry applied"
        );
        Ok(entry)
    }
}

impl WalletLedger for InMemoryWallet {
    fn credit(
        &self,
        user: UserId,
        amount: Amount,
        reference: WalletReference,
        description: &str,
    ) -> Result<WalletEntry> {
        self.apply(user, EntryDirection::Credit, amount, reference, description)
    }

    fn debit(
        &self,
        user: UserId,
        amount: Amount,
        reference: WalletReference,
        description: &str,
    ) -> Result<WalletEntry> {
        self.apply(user, EntryDirection::Debit, amount, reference, description)
    }

    fn balance(&self, user: UserId) -> Amount {
        self.state
            .lock()
            .balances
            .get(&user)
            .copied()
            .unwrap_or(Amount::ZERO)
    }

    fn entries(&self, user: UserId) -> Vec<WalletEntry> {
        self.state
            .lock()
            .entries
            .iter()
            .filter(|e| e.user_id == user)
            .cloned()
            .collect()
    }

    fn entry_for(&self, reference: &WalletReference) -> Option<WalletEntry> {
        self.state
            .lock()
            .entries
            .iter()
            .find(|e| &e.reference == reference)
            .cloned()
    }

    fn users(&self) -> Vec<UserId> {
        self.state.lock().balances.keys().copied().collect()
    }
}

/// Total credited to `user` under `reference_type`, through any ledger.
pub fn credited_total(
    wallet: &(impl WalletLedger + ?Sized),
    user: UserId,
    reference_type: ReferenceType,
) -> Result<Amount> {
    Amount::sum(
        wallet
            .entries(user)
            .iter()
            .filter(|e| {
                e.direction == EntryDirection::Credit
                    && e.reference.reference_type == reference_type
            })
            .map(|e| e.amount),
    )
}
