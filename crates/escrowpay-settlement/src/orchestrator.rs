//! Settlement orchestrator: the single entry point composing the gate,
//! provider selection, dispatch and the escrow ledger.
//!
//! ## Payment pipeline
//!
//! ```text
//! PaymentRequest
//!   │
//!   ├─ 1. validate amount, booking; claim booking; no active escrow
//!   ├─ 2. AttemptThrottle.admit()     refused ─▶ FraudBlocked (attempt logged)
//!   ├─ 3. ProviderSelector.select()
//!   ├─ 4. PayoutDispatcher.dispatch(Collect, fresh PAY- reference)
//!   │        transient ─▶ attempt back to PENDING, nothing written
//!   │        permanent ─▶ attempt FAILED (feeds auto-block)
//!   └─ 5. EscrowLedger.create() ─▶ HELD, PaymentRecord, attempt COMPLETED
//! ```
//!
//! The booking is claimed until the pipeline returns or its future is
//! dropped. A second payment for the same booking is refused with
//! `PaymentInProgress` before it reaches the gate or the provider.
//!
//! Withdrawals debit the wallet first, then disburse under a `WDR-`
//! reference. A permanent provider failure credits the debit back; a
//! transient one leaves the withdrawal `in_flight` for
//! [`SettlementOrchestrator::retry_withdrawal`].

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use escrowpay_ingress::{AttemptThrottle, ProviderSelector};
use escrowpay_types::{
    ActorType, Amount, AttemptId, AttemptStatus, AuditEvent, BookingId, CardFingerprint,
    EscrowId, EscrowPayError, EscrowTransaction, GateAction, GateDecision, PaymentAttempt,
    PaymentId, PaymentRecord, PaymentReference, Priority, ProviderId, ReferenceType, Result,
    SettlementConfig, UserId, WalletReference, WithdrawalRecord, WithdrawalStatus,
};
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::collaborators::{AuditSink, BookingDirectory, SettlementServices};
use crate::dispatcher::{DispatchKind, DispatchRequest, PayoutDispatcher};
use crate::escrow_ledger::EscrowLedger;
use crate::wallet::WalletLedger;

/// Who is paying and from where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayerContext {
    pub user_id: Option<UserId>,
    pub ip: IpAddr,
    pub card: Option<CardFingerprint>,
    pub device_fingerprint: String,
    /// Phone number or account the provider collects from.
    pub payer_handle: String,
}

/// A buyer's request to pay for a booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequest {
    pub booking_id: BookingId,
    pub amount: Amount,
    /// Preferred provider; unknown ids fall back to scoring.
    pub method: Option<ProviderId>,
    pub priority: Priority,
    pub payer: PayerContext,
}

/// Result of a successful payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentOutcome {
    pub payment: PaymentRecord,
    pub escrow: EscrowTransaction,
    /// Gate verdict. `action == Review` means the payment went through but
    /// should be looked at.
    pub decision: GateDecision,
}

pub struct SettlementOrchestrator {
    throttle: AttemptThrottle,
    selector: ProviderSelector,
    dispatcher: Arc<PayoutDispatcher>,
    ledger: EscrowLedger,
    wallet: Arc<dyn WalletLedger>,
    bookings: Arc<dyn BookingDirectory>,
    audit: Arc<dyn AuditSink>,
    payments: RwLock<HashMap<PaymentId, PaymentRecord>>,
    withdrawals: RwLock<HashMap<PaymentReference, WithdrawalRecord>>,
    /// Bookings with a payment between claim and escrow creation.
    paying: Mutex<HashSet<BookingId>>,
}

/// Exclusive right to pay for one booking. Released on drop.
struct BookingClaim<'a> {
    paying: &'a Mutex<HashSet<BookingId>>,
    booking_id: BookingId,
}

impl<'a> BookingClaim<'a> {
    fn acquire(paying: &'a Mutex<HashSet<BookingId>>, booking_id: BookingId) -> Result<Self> {
        if !paying.lock().insert(booking_id) {
            return Err(EscrowPayError::PaymentInProgress {
                booking: booking_id.to_string(),
            });
        }
        Ok(Self { paying, booking_id })
    }
}

impl Drop for BookingClaim<'_> {
    fn drop(&mut self) {
        self.paying.lock().remove(&self.booking_id);
    }
}

impl SettlementOrchestrator {
    /// Wire the orchestrator. `dispatcher` must already have its providers
    /// registered.
    pub fn new(
        config: &SettlementConfig,
        services: SettlementServices,
        dispatcher: PayoutDispatcher,
    ) -> Result<Self> {
        config.validate()?;
        let ledger = EscrowLedger::new(config.escrow.clone(), &services)?;
        info!(
            providers = dispatcher.provider_ids().len(),
            refund_period_days = config.escrow.refund_period_days,
            "Settlement orchestrator ready"
        );
        Ok(Self {
            throttle: AttemptThrottle::with_config(config.gate.clone()),
            selector: ProviderSelector::new(config.providers.clone()),
            dispatcher: Arc::new(dispatcher),
            ledger,
            wallet: services.wallet,
            bookings: services.bookings,
            audit: services.audit,
            payments: RwLock::new(HashMap::new()),
            withdrawals: RwLock::new(HashMap::new()),
            paying: Mutex::new(HashSet::new()),
        })
    }

    // =================================================================
    // Payments
    // =================================================================

    /// Run a payment through the full pipeline (see module docs).
    pub async fn initiate_payment(&self, request: PaymentRequest) -> Result<PaymentOutcome> {
        self.initiate_payment_at(request, Utc::now()).await
    }

    pub async fn initiate_payment_at(
        &self,
        request: PaymentRequest,
        now: DateTime<Utc>,
    ) -> Result<PaymentOutcome> {
        if request.amount.is_zero() {
            return Err(EscrowPayError::Validation {
                reason: "payment amount must be positive".into(),
            });
        }
        if self.bookings.booking(request.booking_id).is_none() {
            return Err(escrowpay_types::not_found("booking", request.booking_id));
        }
        let _claim = BookingClaim::acquire(&self.paying, request.booking_id)?;
        if self.ledger.active_for_booking(request.booking_id).is_some() {
            return Err(EscrowPayError::DuplicateEscrow {
                booking: request.booking_id.to_string(),
            });
        }

        let payer = &request.payer;
        let attempt = PaymentAttempt::new(
            payer.user_id,
            payer.ip,
            payer.card.clone(),
            request.amount,
            payer.device_fingerprint.clone(),
            now,
        );
        let (decision, attempt_id) = self.throttle.admit(attempt);
        if !decision.allowed {
            self.record_audit(
                AuditEvent::system("payment.blocked", "payment_attempt", attempt_id, now)
                    .by(ActorType::Customer, payer.user_id)
                    .with_change(
                        None,
                        Some(json!({
                            "booking_id": request.booking_id,
                            "risk_score": decision.risk_score,
                            "risks": decision.risks,
                        })),
                    ),
            );
            return Err(EscrowPayError::FraudBlocked {
                risk_score: decision.risk_score,
                risks: decision.risk_tags(),
            });
        }
        if decision.action == GateAction::Review {
            warn!(
                attempt_id = %attempt_id,
                booking_id = %request.booking_id,
                risk_score = decision.risk_score,
                risks = ?decision.risk_tags(),
                "Payment admitted for review"
            );
        }

        let provider = self.selector.select(
            request.amount,
            request.method.as_ref(),
            request.priority,
        )?;
        let reference = PaymentReference::new_payment();
        self.settle_attempt(attempt_id, AttemptStatus::Processing, now);

        let dispatch = DispatchRequest {
            kind: DispatchKind::Collect,
            provider: provider.clone(),
            counterparty: payer.payer_handle.clone(),
            amount: request.amount,
            reference: reference.clone(),
        };
        let receipt = match self.dispatcher.dispatch(&dispatch).await {
            Ok(receipt) => receipt,
            Err(err @ EscrowPayError::ProviderPermanentFailure { .. }) => {
                self.settle_attempt(attempt_id, AttemptStatus::Failed, now);
                return Err(err);
            }
            Err(err) => {
                self.settle_attempt(attempt_id, AttemptStatus::Pending, now);
                return Err(err);
            }
        };

        let escrow = match self
            .ledger
            .create_at(request.booking_id, request.amount, reference.clone(), now)
        {
            Ok(escrow) => escrow,
            Err(err) => {
                // Funds were collected; the payer must not be charged again.
                self.settle_attempt(attempt_id, AttemptStatus::Completed, now);
                error!(
                    booking_id = %request.booking_id,
                    reference = %reference,
                    transaction_id = %receipt.transaction_id,
                    error = %err,
                    "Collected payment has no escrow; manual reconciliation required"
                );
                return Err(err);
            }
        };

        let payment = PaymentRecord {
            id: PaymentId::new(),
            booking_id: request.booking_id,
            payer_id: payer.user_id,
            amount: request.amount,
            provider,
            reference,
            provider_transaction_id: receipt.transaction_id,
            escrow_id: escrow.id,
            created_at: now,
        };
        self.payments.write().insert(payment.id, payment.clone());
        self.settle_attempt(attempt_id, AttemptStatus::Completed, now);

        info!(
            payment_id = %payment.id,
            booking_id = %payment.booking_id,
            escrow_id = %escrow.id,
            provider = %payment.provider,
            amount = %payment.amount,
            "Payment completed"
        );
        self.record_audit(
            AuditEvent::system("payment.completed", "payment", payment.id, now)
                .by(ActorType::Customer, payer.user_id)
                .with_change(
                    None,
                    Some(json!({
                        "booking_id": payment.booking_id,
                        "amount": payment.amount,
                        "provider": payment.provider,
                        "reference": payment.reference,
                        "escrow_id": payment.escrow_id,
                    })),
                ),
        );

        Ok(PaymentOutcome {
            payment,
            escrow,
            decision,
        })
    }

    // =================================================================
    // Escrow pass-throughs
    // =================================================================

    pub fn customer_approve(&self, id: EscrowId, customer: UserId) -> Result<EscrowTransaction> {
        self.ledger.customer_approve(id, customer)
    }

    pub fn admin_approve(&self, id: EscrowId, admin: UserId) -> Result<EscrowTransaction> {
        self.ledger.admin_approve(id, admin)
    }

    pub fn refund(
        &self,
        id: EscrowId,
        reason: &str,
        admin: Option<UserId>,
    ) -> Result<EscrowTransaction> {
        self.ledger.refund(id, reason, admin)
    }

    pub fn instant_payout(&self, id: EscrowId) -> Result<EscrowTransaction> {
        self.ledger.instant_payout(id)
    }

    /// Scheduler entry point: move expired refund periods forward.
    pub fn sweep_refund_periods(&self, now: DateTime<Utc>) -> Vec<EscrowTransaction> {
        self.ledger.sweep_refund_periods(now)
    }

    // =================================================================
    // Withdrawals
    // =================================================================

    /// Move `amount` from `user`'s wallet to an external account.
    pub async fn withdraw(
        &self,
        user: UserId,
        amount: Amount,
        method: &ProviderId,
        destination: &str,
    ) -> Result<WithdrawalRecord> {
        self.withdraw_at(user, amount, method, destination, Utc::now()).await
    }

    pub async fn withdraw_at(
        &self,
        user: UserId,
        amount: Amount,
        method: &ProviderId,
        destination: &str,
        now: DateTime<Utc>,
    ) -> Result<WithdrawalRecord> {
        if amount.is_zero() {
            return Err(EscrowPayError::Validation {
                reason: "withdrawal amount must be positive".into(),
            });
        }
        if destination.trim().is_empty() {
            return Err(EscrowPayError::Validation {
                reason: "withdrawal destination is empty".into(),
            });
        }
        self.dispatcher.ensure_capable(method, DispatchKind::Disburse)?;

        let reference = PaymentReference::new_withdrawal();
        self.wallet.debit(
            user,
            amount,
            WalletReference::new(ReferenceType::Withdrawal, &reference),
            "withdrawal",
        )?;

        let record = WithdrawalRecord {
            reference: reference.clone(),
            user_id: user,
            amount,
            provider: method.clone(),
            destination: destination.to_string(),
            status: WithdrawalStatus::InFlight,
            provider_transaction_id: None,
            created_at: now,
            updated_at: now,
        };
        self.withdrawals.write().insert(reference.clone(), record.clone());
        info!(%reference, %user, %amount, provider = %method, "Withdrawal debited");

        self.disburse(record, now).await
    }

    /// Re-dispatch an `in_flight` withdrawal under its original reference.
    /// Settled withdrawals are returned unchanged.
    pub async fn retry_withdrawal(&self, reference: &PaymentReference) -> Result<WithdrawalRecord> {
        self.retry_withdrawal_at(reference, Utc::now()).await
    }

    pub async fn retry_withdrawal_at(
        &self,
        reference: &PaymentReference,
        now: DateTime<Utc>,
    ) -> Result<WithdrawalRecord> {
        let record = self
            .withdrawal(reference)
            .ok_or_else(|| escrowpay_types::not_found("withdrawal", reference))?;
        if record.status != WithdrawalStatus::InFlight {
            debug!(%reference, status = %record.status, "Withdrawal already settled");
            return Ok(record);
        }
        self.disburse(record, now).await
    }

    async fn disburse(&self, record: WithdrawalRecord, now: DateTime<Utc>) -> Result<WithdrawalRecord> {
        let request = DispatchRequest {
            kind: DispatchKind::Disburse,
            provider: record.provider.clone(),
            counterparty: record.destination.clone(),
            amount: record.amount,
            reference: record.reference.clone(),
        };
        match self.dispatcher.dispatch(&request).await {
            Ok(receipt) => {
                let updated = self.update_withdrawal(&record.reference, now, |w| {
                    w.status = WithdrawalStatus::Completed;
                    w.provider_transaction_id = Some(receipt.transaction_id.clone());
                })?;
                self.withdrawal_audit("withdrawal.completed", &updated, now);
                Ok(updated)
            }
            Err(err) if err.is_retryable() => {
                warn!(reference = %record.reference, error = %err, "Withdrawal left in flight");
                Err(err)
            }
            Err(err) => {
                self.reverse(&record)?;
                let updated = self.update_withdrawal(&record.reference, now, |w| {
                    w.status = WithdrawalStatus::Reversed;
                })?;
                self.withdrawal_audit("withdrawal.reversed", &updated, now);
                Err(err)
            }
        }
    }

    /// Credit a rejected withdrawal back to the wallet, once.
    fn reverse(&self, record: &WithdrawalRecord) -> Result<()> {
        let reference = WalletReference::new(ReferenceType::WithdrawalReversal, &record.reference);
        match self
            .wallet
            .credit(record.user_id, record.amount, reference, "withdrawal reversal")
        {
            Ok(_) => {
                info!(reference = %record.reference, amount = %record.amount, "Withdrawal reversed");
                Ok(())
            }
            Err(EscrowPayError::DuplicateReference { .. }) => {
                debug!(reference = %record.reference, "Withdrawal reversal already applied");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn update_withdrawal(
        &self,
        reference: &PaymentReference,
        now: DateTime<Utc>,
        change: impl FnOnce(&mut WithdrawalRecord),
    ) -> Result<WithdrawalRecord> {
        let mut withdrawals = self.withdrawals.write();
        let record = withdrawals
            .get_mut(reference)
            .ok_or_else(|| escrowpay_types::not_found("withdrawal", reference))?;
        change(record);
        record.updated_at = now;
        Ok(record.clone())
    }

    fn withdrawal_audit(&self, action: &str, record: &WithdrawalRecord, now: DateTime<Utc>) {
        self.record_audit(
            AuditEvent::system(action, "withdrawal", &record.reference, now)
                .by(ActorType::Customer, Some(record.user_id))
                .with_change(
                    Some(json!({ "status": WithdrawalStatus::InFlight })),
                    Some(json!({
                        "status": record.status,
                        "amount": record.amount,
                        "provider": record.provider,
                    })),
                ),
        );
    }

    // =================================================================
    // Queries
    // =================================================================

    #[must_use]
    pub fn payment(&self, id: PaymentId) -> Option<PaymentRecord> {
        self.payments.read().get(&id).cloned()
    }

    #[must_use]
    pub fn payment_by_reference(&self, reference: &PaymentReference) -> Option<PaymentRecord> {
        self.payments
            .read()
            .values()
            .find(|p| &p.reference == reference)
            .cloned()
    }

    #[must_use]
    pub fn withdrawal(&self, reference: &PaymentReference) -> Option<WithdrawalRecord> {
        self.withdrawals.read().get(reference).cloned()
    }

    /// Withdrawals for `user`, oldest first.
    #[must_use]
    pub fn withdrawals_for(&self, user: UserId) -> Vec<WithdrawalRecord> {
        let mut list: Vec<_> = self
            .withdrawals
            .read()
            .values()
            .filter(|w| w.user_id == user)
            .cloned()
            .collect();
        list.sort_by_key(|w| w.created_at);
        list
    }

    pub fn verify_conservation(&self) -> Result<()> {
        self.ledger.verify_conservation()
    }

    #[must_use]
    pub fn ledger(&self) -> &EscrowLedger {
        &self.ledger
    }

    #[must_use]
    pub fn throttle(&self) -> &AttemptThrottle {
        &self.throttle
    }

    #[must_use]
    pub fn dispatcher(&self) -> &PayoutDispatcher {
        &self.dispatcher
    }

    #[must_use]
    pub fn wallet(&self) -> &dyn WalletLedger {
        self.wallet.as_ref()
    }

    // =================================================================
    // Internals
    // =================================================================

    fn settle_attempt(&self, id: AttemptId, status: AttemptStatus, now: DateTime<Utc>) {
        if let Err(err) = self.throttle.resolve_attempt_at(id, status, now) {
            warn!(attempt_id = %id, %status, error = %err, "Could not resolve attempt");
        }
    }

    fn record_audit(&self, event: AuditEvent) {
        if let Err(err) = self.audit.record(&event) {
            warn!(action = %event.action, entity_id = %event.entity_id, error = %err, "Audit sink failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::time::Duration;

    use escrowpay_types::{BookingInfo, EscrowStatus};

    use super::*;
    use crate::collaborators::{InMemoryBookings, InMemoryCategories, MemoryAuditSink};
    use crate::dispatcher::ProviderError;
    use crate::dispatcher::mock::{MockProvider, Scripted};
    use crate::store::InMemoryEscrowStore;
    use crate::wallet::InMemoryWallet;

    struct Harness {
        orch: SettlementOrchestrator,
        momo: Arc<MockProvider>,
        bookings: Arc<InMemoryBookings>,
        wallet: Arc<InMemoryWallet>,
        audit: Arc<MemoryAuditSink>,
    }

    fn harness() -> Harness {
        let config = SettlementConfig::default();
        let momo = Arc::new(MockProvider::new("mtn_momo"));
        let mut dispatcher = PayoutDispatcher::new(config.providers.clone(), &config.dispatch);
        dispatcher.register_provider(momo.clone());
        dispatcher.register_provider(Arc::new(MockProvider::new("card")));

        let bookings = Arc::new(InMemoryBookings::new());
        let wallet = Arc::new(InMemoryWallet::new());
        let audit = Arc::new(MemoryAuditSink::new());
        let services = SettlementServices {
            store: Arc::new(InMemoryEscrowStore::new()),
            wallet: wallet.clone(),
            bookings: bookings.clone(),
            categories: Arc::new(InMemoryCategories::new()),
            audit: audit.clone(),
        };
        let orch = SettlementOrchestrator::new(&config, services, dispatcher).unwrap();
        Harness {
            orch,
            momo,
            bookings,
            wallet,
            audit,
        }
    }

    impl Harness {
        fn request(&self, amount: u64) -> (BookingInfo, PaymentRequest) {
            let booking = BookingInfo::dummy();
            self.bookings.insert(booking.clone());
            let request = PaymentRequest {
                booking_id: booking.booking_id,
                amount: Amount::new(amount),
                method: Some(ProviderId::new("mtn_momo")),
                priority: Priority::Cost,
                payer: PayerContext {
                    user_id: Some(booking.buyer_id),
                    ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)),
                    card: None,
                    device_fingerprint: "device-1".into(),
                    payer_handle: "+250788000001".into(),
                },
            };
            (booking, request)
        }
    }

    #[tokio::test]
    async fn payment_opens_held_escrow() {
        let h = harness();
        let (booking, request) = h.request(10_000);

        let outcome = h.orch.initiate_payment(request).await.unwrap();

        assert_eq!(outcome.escrow.status, EscrowStatus::Held);
        assert_eq!(outcome.escrow.net_amount, Amount::new(9_000));
        assert_eq!(outcome.escrow.payment_reference, outcome.payment.reference);
        assert!(outcome.payment.reference.as_str().starts_with("PAY-"));
        assert_eq!(outcome.payment.booking_id, booking.booking_id);
        assert_eq!(h.orch.payment(outcome.payment.id), Some(outcome.payment.clone()));
        assert_eq!(h.momo.calls(), 1);
        assert!(h.audit.actions().contains(&"payment.completed".to_string()));
    }

    #[tokio::test]
    async fn second_payment_for_booking_is_rejected_before_provider() {
        let h = harness();
        let (_, request) = h.request(10_000);
        h.orch.initiate_payment(request.clone()).await.unwrap();

        let err = h.orch.initiate_payment(request).await.unwrap_err();
        assert!(matches!(err, EscrowPayError::DuplicateEscrow { .. }));
        assert_eq!(h.momo.calls(), 1);
    }

    #[tokio::test]
    async fn overlapping_payments_for_booking_collect_once() {
        let h = harness();
        h.momo.push(Scripted::Hang(Duration::from_millis(50)));
        h.momo.push(Scripted::Hang(Duration::from_millis(50)));
        let (booking, request) = h.request(10_000);

        let (first, second) = tokio::join!(
            h.orch.initiate_payment(request.clone()),
            h.orch.initiate_payment(request.clone()),
        );

        assert!(first.is_ok());
        assert!(matches!(second, Err(EscrowPayError::PaymentInProgress { .. })));
        assert_eq!(h.momo.calls(), 1);
        assert_eq!(h.orch.ledger().by_booking(booking.booking_id).len(), 1);
        assert_eq!(h.orch.payments.read().len(), 1);

        // Claim released: later payments hit the active escrow instead.
        let err = h.orch.initiate_payment(request).await.unwrap_err();
        assert!(matches!(err, EscrowPayError::DuplicateEscrow { .. }));
        assert_eq!(h.momo.calls(), 1);
    }

    #[tokio::test]
    async fn failed_payment_releases_booking_claim() {
        let h = harness();
        h.momo.push(Scripted::Fail(ProviderError::Transient("timeout".into())));
        let (booking, request) = h.request(10_000);

        assert!(h.orch.initiate_payment(request.clone()).await.is_err());
        let outcome = h.orch.initiate_payment(request).await.unwrap();
        assert_eq!(outcome.escrow.booking_id, booking.booking_id);
        assert!(h.orch.paying.lock().is_empty());
    }

    #[tokio::test]
    async fn abandoned_payment_releases_booking_claim() {
        let h = harness();
        h.momo.push(Scripted::Hang(Duration::from_secs(5)));
        let (_, request) = h.request(10_000);

        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            h.orch.initiate_payment(request.clone()),
        )
        .await;
        assert!(abandoned.is_err());
        assert!(h.orch.paying.lock().is_empty());

        h.orch.initiate_payment(request).await.unwrap();
    }

    #[tokio::test]
    async fn zero_amount_and_unknown_booking_rejected() {
        let h = harness();
        let (_, mut request) = h.request(0);
        assert!(matches!(
            h.orch.initiate_payment(request.clone()).await,
            Err(EscrowPayError::Validation { .. })
        ));

        request.amount = Amount::new(100);
        request.booking_id = BookingId::new();
        assert!(matches!(
            h.orch.initiate_payment(request).await,
            Err(EscrowPayError::NotFound { .. })
        ));
        assert_eq!(h.orch.throttle().attempt_count(), 0);
    }

    #[tokio::test]
    async fn permanent_failure_marks_attempt_failed() {
        let h = harness();
        h.momo.push(Scripted::Decline("card declined".into()));
        let (booking, request) = h.request(10_000);

        let err = h.orch.initiate_payment(request).await.unwrap_err();
        assert!(matches!(err, EscrowPayError::ProviderPermanentFailure { .. }));
        assert!(h.orch.ledger().by_booking(booking.booking_id).is_empty());
        assert_eq!(h.orch.throttle().attempt_count(), 1);
    }

    #[tokio::test]
    async fn transient_failure_writes_nothing() {
        let h = harness();
        h.momo.push(Scripted::Fail(ProviderError::Transient("timeout".into())));
        let (booking, request) = h.request(10_000);

        let err = h.orch.initiate_payment(request).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(h.orch.ledger().by_booking(booking.booking_id).is_empty());
        assert!(h.orch.payments.read().is_empty());
    }

    #[tokio::test]
    async fn withdrawal_debits_and_completes() {
        let h = harness();
        let (booking, request) = h.request(10_000);
        let outcome = h.orch.initiate_payment(request).await.unwrap();
        h.orch.instant_payout(outcome.escrow.id).unwrap();
        let seller = booking.seller_id;

        let record = h
            .orch
            .withdraw(seller, Amount::new(4_000), &ProviderId::new("mtn_momo"), "+250788999000")
            .await
            .unwrap();

        assert_eq!(record.status, WithdrawalStatus::Completed);
        assert!(record.provider_transaction_id.is_some());
        assert_eq!(h.wallet.balance(seller), Amount::new(5_000));
        assert_eq!(h.orch.withdrawals_for(seller), vec![record]);
    }

    #[tokio::test]
    async fn withdrawal_beyond_balance_rejected() {
        let h = harness();
        let err = h
            .orch
            .withdraw(UserId::new(), Amount::new(1), &ProviderId::new("mtn_momo"), "+250788")
            .await
            .unwrap_err();
        assert!(matches!(err, EscrowPayError::InsufficientFunds { .. }));
        assert_eq!(h.momo.calls(), 0);
    }

    #[tokio::test]
    async fn rejected_withdrawal_is_reversed() {
        let h = harness();
        let user = UserId::new();
        h.wallet
            .credit(
                user,
                Amount::new(3_000),
                WalletReference::new(ReferenceType::EscrowRelease, "seed"),
                "seed",
            )
            .unwrap();
        h.momo.push(Scripted::Decline("invalid account".into()));

        let err = h
            .orch
            .withdraw(user, Amount::new(3_000), &ProviderId::new("mtn_momo"), "+250700")
            .await
            .unwrap_err();
        assert!(matches!(err, EscrowPayError::ProviderPermanentFailure { .. }));

        let record = h.orch.withdrawals_for(user).pop().unwrap();
        assert_eq!(record.status, WithdrawalStatus::Reversed);
        assert_eq!(h.wallet.balance(user), Amount::new(3_000));

        // Retrying a settled withdrawal does nothing.
        let again = h.orch.retry_withdrawal(&record.reference).await.unwrap();
        assert_eq!(again.status, WithdrawalStatus::Reversed);
        assert_eq!(h.momo.calls(), 1);
    }

    #[tokio::test]
    async fn transient_withdrawal_can_be_retried() {
        let h = harness();
        let user = UserId::new();
        h.wallet
            .credit(
                user,
                Amount::new(2_000),
                WalletReference::new(ReferenceType::EscrowRefund, "seed"),
                "seed",
            )
            .unwrap();
        h.momo.push(Scripted::Fail(ProviderError::Transient("gateway 502".into())));

        let err = h
            .orch
            .withdraw(user, Amount::new(2_000), &ProviderId::new("mtn_momo"), "+250700")
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        let pending = h.orch.withdrawals_for(user).pop().unwrap();
        assert_eq!(pending.status, WithdrawalStatus::InFlight);
        assert_eq!(h.wallet.balance(user), Amount::ZERO);

        let done = h.orch.retry_withdrawal(&pending.reference).await.unwrap();
        assert_eq!(done.status, WithdrawalStatus::Completed);
        assert_eq!(done.reference, pending.reference);
        assert_eq!(h.wallet.balance(user), Amount::ZERO);
    }

    #[tokio::test]
    async fn collect_only_rail_cannot_withdraw() {
        let h = harness();
        let err = h
            .orch
            .withdraw(UserId::new(), Amount::new(10), &ProviderId::new("card"), "4111")
            .await
            .unwrap_err();
        assert!(matches!(err, EscrowPayError::ProviderPermanentFailure { .. }));
    }
}
