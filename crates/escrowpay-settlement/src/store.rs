//! Escrow row storage with compare-and-swap transitions.
//!
//! [`EscrowStore::try_transition`] is the only way a stored row changes. It
//! runs under that row's lock:
//!
//! 1. the current status must be one of `expected`;
//! 2. the move must be legal per [`EscrowStatus::can_transition_to`];
//! 3. `apply` runs against a draft copy (wallet credit, timestamps);
//! 4. only if `apply` succeeds is the draft written back.
//!
//! Two racing transitions on one row serialize on the row lock: the first
//! wins, the second sees the new status and fails with
//! [`EscrowPayError::InvalidStateTransition`].

use std::collections::HashMap;
use std::sync::Arc;

use escrowpay_types::{
    BookingId, EscrowId, EscrowPayError, EscrowStatus, EscrowTransaction, PaymentReference, Result,
};
use parking_lot::{Mutex, RwLock};

/// Mutation hook run inside the row critical section.
pub type TransitionFn<'a> = dyn FnMut(&mut EscrowTransaction) -> Result<()> + 'a;

/// Row before and after a successful transition.
#[derive(Debug, Clone)]
pub struct Transitioned {
    pub before: EscrowTransaction,
    pub after: EscrowTransaction,
}

/// Escrow repository. Every method is atomic with respect to the others.
pub trait EscrowStore: Send + Sync {
    /// Insert a new row.
    ///
    /// # Errors
    /// - [`EscrowPayError::DuplicateEscrow`] if the booking already has a
    ///   non-terminal row
    /// - [`EscrowPayError::DuplicateReference`] if the payment reference is
    ///   already used
    fn insert(&self, row: EscrowTransaction) -> Result<()>;

    fn get(&self, id: EscrowId) -> Option<EscrowTransaction>;

    fn by_reference(&self, reference: &PaymentReference) -> Option<EscrowTransaction>;

    /// All rows for a booking, oldest first.
    fn by_booking(&self, booking: BookingId) -> Vec<EscrowTransaction>;

    fn list_by_status(&self, status: EscrowStatus) -> Vec<EscrowTransaction>;

    /// Every row, oldest first.
    fn all(&self) -> Vec<EscrowTransaction>;

    /// Compare-and-swap status change (see module docs).
    fn try_transition(
        &self,
        id: EscrowId,
        expected: &[EscrowStatus],
        to: EscrowStatus,
        apply: &mut TransitionFn<'_>,
    ) -> Result<Transitioned>;
}

#[derive(Debug, Default)]
struct StoreIndex {
    rows: HashMap<EscrowId, Arc<Mutex<EscrowTransaction>>>,
    by_reference: HashMap<PaymentReference, EscrowId>,
    by_booking: HashMap<BookingId, Vec<EscrowId>>,
}

impl StoreIndex {
    fn snapshot(&self, id: &EscrowId) -> Option<EscrowTransaction> {
        self.rows.get(id).map(|row| row.lock().clone())
    }
}

/// Process-local escrow store with per-row locks.
#[derive(Debug, Default)]
pub struct InMemoryEscrowStore {
    index: RwLock<StoreIndex>,
}

impl InMemoryEscrowStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.index.read().rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.read().rows.is_empty()
    }

    fn collect(&self, mut keep: impl FnMut(&EscrowTransaction) -> bool) -> Vec<EscrowTransaction> {
        let index = self.index.read();
        let mut rows: Vec<_> = index
            .rows
            .values()
            .map(|row| row.lock().clone())
            .filter(|row| keep(row))
            .collect();
        rows.sort_by_key(|row| row.id);
        rows
    }
}

impl EscrowStore for InMemoryEscrowStore {
    fn insert(&self, row: EscrowTransaction) -> Result<()> {
        let mut index = self.index.write();

        if index.by_reference.contains_key(&row.payment_reference) {
            return Err(EscrowPayError::DuplicateReference {
                reference: row.payment_reference.to_string(),
            });
        }
        let active = index
            .by_booking
            .get(&row.booking_id)
            .into_iter()
            .flatten()
            .filter_map(|id| index.rows.get(id))
            .any(|existing| !existing.lock().status.is_terminal());
        if active {
            return Err(EscrowPayError::DuplicateEscrow {
                booking: row.booking_id.to_string(),
            });
        }

        index
            .by_reference
            .insert(row.payment_reference.clone(), row.id);
        index.by_booking.entry(row.booking_id).or_default().push(row.id);
        index.rows.insert(row.id, Arc::new(Mutex::new(row)));
        Ok(())
    }

    fn get(&self, id: EscrowId) -> Option<EscrowTransaction> {
        self.index.read().snapshot(&id)
    }

    fn by_reference(&self, reference: &PaymentReference) -> Option<EscrowTransaction> {
        let index = self.index.read();
        index
            .by_reference
            .get(reference)
            .and_then(|id| index.snapshot(id))
    }

    fn by_booking(&self, booking: BookingId) -> Vec<EscrowTransaction> {
        let index = self.index.read();
        index
            .by_booking
            .get(&booking)
            .into_iter()
            .flatten()
            .filter_map(|id| index.snapshot(id))
            .collect()
    }

    fn list_by_status(&self, status: EscrowStatus) -> Vec<EscrowTransaction> {
        self.collect(|row| row.status == status)
    }

    fn all(&self) -> Vec<EscrowTransaction> {
        self.collect(|_| true)
    }

    fn try_transition(
        &self,
        id: EscrowId,
        expected: &[EscrowStatus],
        to: EscrowStatus,
        apply: &mut TransitionFn<'_>,
    ) -> Result<Transitioned> {
        // Take the row handle, then drop the index lock before locking the row.
        let handle = self
            .index
            .read()
            .rows
            .get(&id)
            .cloned()
            .ok_or_else(|| escrowpay_types::not_found("escrow", id))?;

        let mut row = handle.lock();
        let from = row.status;
        if !expected.contains(&from) || !from.can_transition_to(to) {
            return Err(EscrowPayError::InvalidStateTransition { id, from, to });
        }

        let mut draft = row.clone();
        draft.status = to;
        apply(&mut draft)?;

        let before = std::mem::replace(&mut *row, draft);
        Ok(Transitioned {
            before,
            after: row.clone(),
        })
    }
}
