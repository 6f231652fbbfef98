//! Escrow ledger: creation and every guarded status transition.
//!
//! ## Lifecycle
//!
//! ```text
//! create ─▶ HELD ─customer_approve─▶ CUSTOMER_APPROVED ─sweep─▶ REFUND_PERIOD_PASSED
//!            │                                                       │
//!            │ instant_payout                          admin_approve │
//!            ▼                                                       ▼
//!         RELEASED ◀──────────────────release──────────────── ADMIN_APPROVED
//!
//! refund: any non-terminal state ─▶ REFUNDED
//! ```
//!
//! Release and refund credit the wallet inside the store's row critical
//! section, so the credit and the terminal status are applied together or
//! not at all. Each escrow id is used as the wallet reference, which makes
//! a second credit for the same exit impossible.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use escrowpay_ingress::SplitCalculator;
use escrowpay_types::{
    ActorType, Amount, AuditEvent, BookingId, EscrowConfig, EscrowId, EscrowPayError,
    EscrowStatus, EscrowTransaction, PaymentReference, ReferenceType, Result, UserId,
    WalletReference,
};
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::collaborators::{AuditSink, BookingDirectory, CategoryDirectory, SettlementServices};
use crate::conservation;
use crate::store::{EscrowStore, Transitioned};
use crate::wallet::WalletLedger;

/// States a refund may start from.
const REFUNDABLE: [EscrowStatus; 4] = [
    EscrowStatus::Held,
    EscrowStatus::CustomerApproved,
    EscrowStatus::RefundPeriodPassed,
    EscrowStatus::AdminApproved,
];

/// The escrow state machine over a store and a wallet.
pub struct EscrowLedger {
    store: Arc<dyn EscrowStore>,
    wallet: Arc<dyn WalletLedger>,
    bookings: Arc<dyn BookingDirectory>,
    categories: Arc<dyn CategoryDirectory>,
    audit: Arc<dyn AuditSink>,
    splitter: SplitCalculator,
    config: EscrowConfig,
}

impl EscrowLedger {
    pub fn new(config: EscrowConfig, services: &SettlementServices) -> Result<Self> {
        let splitter = SplitCalculator::with_default_rate(config.default_commission_rate)?;
        Ok(Self {
            store: Arc::clone(&services.store),
            wallet: Arc::clone(&services.wallet),
            bookings: Arc::clone(&services.bookings),
            categories: Arc::clone(&services.categories),
            audit: Arc::clone(&services.audit),
            splitter,
            config,
        })
    }

    // -----------------------------------------------------------------
    // Creation
    // -----------------------------------------------------------------

    /// Open a `HELD` escrow for a successful collection.
    pub fn create(
        &self,
        booking_id: BookingId,
        amount: Amount,
        reference: PaymentReference,
    ) -> Result<EscrowTransaction> {
        self.create_at(booking_id, amount, reference, Utc::now())
    }

    pub fn create_at(
        &self,
        booking_id: BookingId,
        amount: Amount,
        reference: PaymentReference,
        now: DateTime<Utc>,
    ) -> Result<EscrowTransaction> {
        if amount.is_zero() {
            return Err(EscrowPayError::Validation {
                reason: "escrow amount must be positive".into(),
            });
        }
        let booking = self
            .bookings
            .booking(booking_id)
            .ok_or_else(|| escrowpay_types::not_found("booking", booking_id))?;

        let rate = self.categories.commission_rate(booking.category_id);
        let split = self.splitter.split(amount, rate)?;
        let refund_deadline = now + self.config.refund_period();

        let row = EscrowTransaction {
            id: EscrowId::new(),
            booking_id,
            buyer_id: booking.buyer_id,
            seller_id: booking.seller_id,
            amount,
            commission: split.platform_fee,
            net_amount: split.seller_amount,
            status: EscrowStatus::Held,
            payment_reference: reference,
            refund_deadline,
            auto_release_date: Some(refund_deadline),
            customer_approved_at: None,
            admin_approved_by: None,
            admin_approved_at: None,
            released_at: None,
            refunded_at: None,
            refunded_by: None,
            notes: None,
            created_at: now,
        };
        self.store.insert(row.clone())?;

        info!(
            escrow_id = %row.id,
            booking_id = %booking_id,
            amount = %row.amount,
            commission = %row.commission,
            rate = %split.commission_rate,
            "Escrow created (HELD)"
        );
        self.record_audit(
            AuditEvent::system("escrow.created", "escrow", row.id, now).with_change(
                None,
                Some(json!({
                    "status": row.status,
                    "amount": row.amount,
                    "commission": row.commission,
                    "net_amount": row.net_amount,
                    "payment_reference": row.payment_reference,
                })),
            ),
        );
        Ok(row)
    }

    // -----------------------------------------------------------------
    // Forward chain
    // -----------------------------------------------------------------

    /// Buyer confirms the booking went as agreed. `HELD → CUSTOMER_APPROVED`.
    pub fn customer_approve(&self, id: EscrowId, customer: UserId) -> Result<EscrowTransaction> {
        self.customer_approve_at(id, customer, Utc::now())
    }

    pub fn customer_approve_at(
        &self,
        id: EscrowId,
        customer: UserId,
        now: DateTime<Utc>,
    ) -> Result<EscrowTransaction> {
        let row = self.get(id)?;
        if row.buyer_id != customer {
            warn!(escrow_id = %id, %customer, "Approval attempted by non-buyer");
            return Err(EscrowPayError::Unauthorized {
                reason: format!("user {customer} is not the buyer of escrow {id}"),
            });
        }

        let t = self.store.try_transition(
            id,
            &[EscrowStatus::Held],
            EscrowStatus::CustomerApproved,
            &mut |draft| {
                draft.customer_approved_at = Some(now);
                Ok(())
            },
        )?;
        Ok(self.transitioned(t, "escrow.customer_approved", ActorType::Customer, Some(customer), now))
    }

    /// Move every `CUSTOMER_APPROVED` escrow whose deadline has passed to
    /// `REFUND_PERIOD_PASSED`. Safe to run repeatedly and concurrently.
    pub fn sweep_refund_periods(&self, now: DateTime<Utc>) -> Vec<EscrowTransaction> {
        let mut moved = Vec::new();
        for row in self.store.list_by_status(EscrowStatus::CustomerApproved) {
            if !row.refund_period_elapsed(now) {
                continue;
            }
            match self.store.try_transition(
                row.id,
                &[EscrowStatus::CustomerApproved],
                EscrowStatus::RefundPeriodPassed,
                &mut |_| Ok(()),
            ) {
                Ok(t) => moved.push(self.transitioned(
                    t,
                    "escrow.refund_period_passed",
                    ActorType::System,
                    None,
                    now,
                )),
                // Refunded or swept by someone else in the meantime.
                Err(EscrowPayError::InvalidStateTransition { from, .. }) => {
                    debug!(escrow_id = %row.id, %from, "Sweep skipped row");
                }
                Err(err) => warn!(escrow_id = %row.id, error = %err, "Sweep failed for row"),
            }
        }
        if !moved.is_empty() {
            info!(count = moved.len(), "Refund periods swept");
        }
        moved
    }

    /// Admin approves the payout, then the escrow is released immediately.
    /// `REFUND_PERIOD_PASSED → ADMIN_APPROVED → RELEASED`.
    ///
    /// If the release step fails the row stays `ADMIN_APPROVED` and
    /// [`EscrowLedger::release`] can be retried.
    pub fn admin_approve(&self, id: EscrowId, admin: UserId) -> Result<EscrowTransaction> {
        self.admin_approve_at(id, admin, Utc::now())
    }

    pub fn admin_approve_at(
        &self,
        id: EscrowId,
        admin: UserId,
        now: DateTime<Utc>,
    ) -> Result<EscrowTransaction> {
        let t = self.store.try_transition(
            id,
            &[EscrowStatus::RefundPeriodPassed],
            EscrowStatus::AdminApproved,
            &mut |draft| {
                draft.admin_approved_by = Some(admin);
                draft.admin_approved_at = Some(now);
                Ok(())
            },
        )?;
        self.transitioned(t, "escrow.admin_approved", ActorType::Admin, Some(admin), now);
        self.release_from(id, EscrowStatus::AdminApproved, ActorType::Admin, Some(admin), now)
    }

    /// Credit the seller. `ADMIN_APPROVED → RELEASED`.
    pub fn release(&self, id: EscrowId) -> Result<EscrowTransaction> {
        self.release_at(id, Utc::now())
    }

    pub fn release_at(&self, id: EscrowId, now: DateTime<Utc>) -> Result<EscrowTransaction> {
        self.release_from(id, EscrowStatus::AdminApproved, ActorType::System, None, now)
    }

    /// Fast path for trusted sellers. `HELD → RELEASED`.
    pub fn instant_payout(&self, id: EscrowId) -> Result<EscrowTransaction> {
        self.instant_payout_at(id, Utc::now())
    }

    pub fn instant_payout_at(&self, id: EscrowId, now: DateTime<Utc>) -> Result<EscrowTransaction> {
        self.release_from(id, EscrowStatus::Held, ActorType::System, None, now)
    }

    /// The single release primitive behind admin approval and instant payout.
    fn release_from(
        &self,
        id: EscrowId,
        expected: EscrowStatus,
        actor_type: ActorType,
        actor: Option<UserId>,
        now: DateTime<Utc>,
    ) -> Result<EscrowTransaction> {
        let t = self.store.try_transition(id, &[expected], EscrowStatus::Released, &mut |draft| {
            credit_once(
                self.wallet.as_ref(),
                draft.seller_id,
                draft.net_amount,
                WalletReference::new(ReferenceType::EscrowRelease, draft.id),
                &WalletReference::new(ReferenceType::EscrowRefund, draft.id),
                "escrow release",
            )?;
            draft.released_at = Some(now);
            Ok(())
        })?;
        info!(
            escrow_id = %id,
            seller = %t.after.seller_id,
            net_amount = %t.after.net_amount,
            from = %t.before.status,
            "Escrow released"
        );
        Ok(self.transitioned(t, "escrow.released", actor_type, actor, now))
    }

    // -----------------------------------------------------------------
    // Refund
    // -----------------------------------------------------------------

    /// Credit the buyer the full amount. Any non-terminal state `→ REFUNDED`.
    pub fn refund(
        &self,
        id: EscrowId,
        reason: &str,
        admin: Option<UserId>,
    ) -> Result<EscrowTransaction> {
        self.refund_at(id, reason, admin, Utc::now())
    }

    pub fn refund_at(
        &self,
        id: EscrowId,
        reason: &str,
        admin: Option<UserId>,
        now: DateTime<Utc>,
    ) -> Result<EscrowTransaction> {
        let t = self.store.try_transition(id, &REFUNDABLE, EscrowStatus::Refunded, &mut |draft| {
            credit_once(
                self.wallet.as_ref(),
                draft.buyer_id,
                draft.amount,
                WalletReference::new(ReferenceType::EscrowRefund, draft.id),
                &WalletReference::new(ReferenceType::EscrowRelease, draft.id),
                "escrow refund",
            )?;
            draft.refunded_at = Some(now);
            draft.refunded_by = admin;
            draft.notes = Some(reason.to_string());
            Ok(())
        })?;
        info!(
            escrow_id = %id,
            buyer = %t.after.buyer_id,
            amount = %t.after.amount,
            from = %t.before.status,
            reason,
            "Escrow refunded"
        );
        let actor_type = if admin.is_some() {
            ActorType::Admin
        } else {
            ActorType::System
        };
        Ok(self.transitioned(t, "escrow.refunded", actor_type, admin, now))
    }

    // -----------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------

    pub fn get(&self, id: EscrowId) -> Result<EscrowTransaction> {
        self.store
            .get(id)
            .ok_or_else(|| escrowpay_types::not_found("escrow", id))
    }

    /// All escrows ever opened for a booking, oldest first.
    #[must_use]
    pub fn by_booking(&self, booking_id: BookingId) -> Vec<EscrowTransaction> {
        self.store.by_booking(booking_id)
    }

    /// The booking's non-terminal escrow, if any.
    #[must_use]
    pub fn active_for_booking(&self, booking_id: BookingId) -> Option<EscrowTransaction> {
        self.store
            .by_booking(booking_id)
            .into_iter()
            .find(|row| !row.is_terminal())
    }

    #[must_use]
    pub fn by_reference(&self, reference: &PaymentReference) -> Option<EscrowTransaction> {
        self.store.by_reference(reference)
    }

    #[must_use]
    pub fn list_by_status(&self, status: EscrowStatus) -> Vec<EscrowTransaction> {
        self.store.list_by_status(status)
    }

    /// Admin work queue: escrows whose refund period has passed.
    #[must_use]
    pub fn awaiting_admin_approval(&self) -> Vec<EscrowTransaction> {
        self.store.list_by_status(EscrowStatus::RefundPeriodPassed)
    }

    #[must_use]
    pub fn all(&self) -> Vec<EscrowTransaction> {
        self.store.all()
    }

    /// Check every escrow exit against the wallet.
    pub fn verify_conservation(&self) -> Result<()> {
        conservation::verify_ledger(&self.store.all(), self.wallet.as_ref())
    }

    // -----------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------

    fn transitioned(
        &self,
        t: Transitioned,
        action: &str,
        actor_type: ActorType,
        actor: Option<UserId>,
        now: DateTime<Utc>,
    ) -> EscrowTransaction {
        debug!(
            escrow_id = %t.after.id,
            from = %t.before.status,
            to = %t.after.status,
            "Escrow transition"
        );
        self.record_audit(
            AuditEvent::system(action, "escrow", t.after.id, now)
                .by(actor_type, actor)
                .with_change(
                    Some(json!({ "status": t.before.status })),
                    Some(json!({ "status": t.after.status })),
                ),
        );
        t.after
    }

    fn record_audit(&self, event: AuditEvent) {
        if let Err(err) = self.audit.record(&event) {
            warn!(
                action = %event.action,
                entity_id = %event.entity_id,
                error = %err,
                "Audit sink failed; transition stands"
            );
        }
    }
}

/// Credit `reference` once. A duplicate that matches the intended credit
/// means an earlier attempt already paid out (crash between credit and
/// status flip), so the transition may complete.
///
/// An escrow exits one way only: if the `opposite` exit was already
/// credited, nothing is paid and the row keeps its status.
fn credit_once(
    wallet: &dyn WalletLedger,
    user: UserId,
    amount: Amount,
    reference: WalletReference,
    opposite: &WalletReference,
    description: &str,
) -> Result<()> {
    if let Some(prior) = wallet.entry_for(opposite) {
        error!(
            %reference,
            opposite = %prior.reference,
            user = %prior.user_id,
            amount = %prior.amount,
            "Escrow already exited the other way; refusing second exit"
        );
        return Err(EscrowPayError::ConservationViolation {
            reason: format!("{opposite} already credited; {reference} would pay the escrow out twice"),
        });
    }
    match wallet.credit(user, amount, reference.clone(), description) {
        Ok(_) => Ok(()),
        Err(EscrowPayError::DuplicateReference { .. }) => {
            let existing = wallet.entry_for(&reference);
            match existing {
                Some(entry) if entry.user_id == user && entry.amount == amount => {
                    warn!(%reference, "Credit already applied; completing transition");
                    Ok(())
                }
                _ => Err(EscrowPayError::ConservationViolation {
                    reason: format!("existing credit for {reference} does not match {user}/{amount}"),
                }),
            }
        }
        Err(err) => Err(err),
    }
}
