//! Interfaces to systems the settlement core reads from or reports to,
//! with in-process implementations.

use std::collections::HashMap;
use std::sync::Arc;

use escrowpay_types::{AuditEvent, BookingId, BookingInfo, CategoryId, Result};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;

use crate::store::{EscrowStore, InMemoryEscrowStore};
use crate::wallet::{InMemoryWallet, WalletLedger};

/// Booking lookup.
pub trait BookingDirectory: Send + Sync {
    fn booking(&self, id: BookingId) -> Option<BookingInfo>;
}

/// Category commission lookup. `None` means "use the default rate".
pub trait CategoryDirectory: Send + Sync {
    fn commission_rate(&self, category: CategoryId) -> Option<Decimal>;
}

/// Audit log sink. Failures are reported to the caller but never undo the
/// audited action.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: &AuditEvent) -> Result<()>;
}

/// Storage and collaborator handles shared by the ledger and orchestrator.
#[derive(Clone)]
pub struct SettlementServices {
    pub store: Arc<dyn EscrowStore>,
    pub wallet: Arc<dyn WalletLedger>,
    pub bookings: Arc<dyn BookingDirectory>,
    pub categories: Arc<dyn CategoryDirectory>,
    pub audit: Arc<dyn AuditSink>,
}

impl SettlementServices {
    /// In-memory store and wallet around the given directories, auditing to
    /// tracing.
    #[must_use]
    pub fn in_memory(
        bookings: Arc<dyn BookingDirectory>,
        categories: Arc<dyn CategoryDirectory>,
    ) -> Self {
        Self {
            store: Arc::new(InMemoryEscrowStore::new()),
            wallet: Arc::new(InMemoryWallet::new()),
            bookings,
            categories,
            audit: Arc::new(TracingAuditSink),
        }
    }
}

// ---------------------------------------------------------------------------
// Bookings
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct InMemoryBookings {
    bookings: RwLock<HashMap<BookingId, BookingInfo>>,
}

impl InMemoryBookings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, booking: BookingInfo) {
        self.bookings.write().insert(booking.booking_id, booking);
    }
}

impl BookingDirectory for InMemoryBookings {
    fn booking(&self, id: BookingId) -> Option<BookingInfo> {
        self.bookings.read().get(&id).cloned()
    }
}

// ---------------------------------------------------------------------------
// Categories
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct InMemoryCategories {
    rates: RwLock<HashMap<CategoryId, Decimal>>,
}

impl InMemoryCategories {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the commission rate (percent) for a category.
    pub fn set_rate(&self, category: CategoryId, rate_percent: Decimal) {
        self.rates.write().insert(category, rate_percent);
    }
}

impl CategoryDirectory for InMemoryCategories {
    fn commission_rate(&self, category: CategoryId) -> Option<Decimal> {
        self.rates.read().get(&category).copied()
    }
}

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

/// Writes audit events to the `escrowpay::audit` tracing target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: &AuditEvent) -> Result<()> {
        tracing::info!(
            target: "escrowpay::audit",
            action = %event.action,
            entity_type = %event.entity_type,
            entity_id = %event.entity_id,
            actor_type = %event.actor_type,
            actor_id = ?event.actor_id,
            new_values = ?event.new_values,
            "audit"
        );
        Ok(())
    }
}

/// Keeps events in memory; used by tests and local tooling.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    /// Recorded actions, in order.
    #[must_use]
    pub fn actions(&self) -> Vec<String> {
        self.events.lock().iter().map(|e| e.action.clone()).collect()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: &AuditEvent) -> Result<()> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    #[test]
    fn bookings_lookup() {
        let dir = InMemoryBookings::new();
        let booking = BookingInfo::dummy();
        dir.insert(booking.clone());
        assert_eq!(dir.booking(booking.booking_id), Some(booking));
        assert!(dir.booking(BookingId::new()).is_none());
    }

    #[test]
    fn category_rates() {
        let dir = InMemoryCategories::new();
        let cat = CategoryId::new();
        assert!(dir.commission_rate(cat).is_none());
        dir.set_rate(cat, Decimal::new(125, 1));
        assert_eq!(dir.commission_rate(cat), Some(Decimal::new(125, 1)));
    }

    #[test]
    fn memory_sink_keeps_order() {
        let sink = MemoryAuditSink::new();
        let now = Utc::now();
        sink.record(&AuditEvent::system("escrow.created", "escrow", "1", now)).unwrap();
        sink.record(&AuditEvent::system("escrow.released", "escrow", "1", now)).unwrap();
        assert_eq!(sink.actions(), vec!["escrow.created", "escrow.released"]);
    }

    #[test]
    fn tracing_sink_never_fails() {
        let event = AuditEvent::system("escrow.refunded", "escrow", "1", Utc::now());
        assert!(TracingAuditSink.record(&event).is_ok());
    }
}
