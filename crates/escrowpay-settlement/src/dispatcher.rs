//! Payout dispatcher: routes collections and disbursements to payment
//! providers, at most one provider effect per reference.
//!
//! ```text
//! dispatch(req)
//!   ├─ provider registered?          no  ─▶ NotFound
//!   ├─ capable of req.kind?          no  ─▶ ProviderPermanentFailure
//!   ├─ reference claim
//!   │    Completed(receipt)              ─▶ cached receipt, no provider call
//!   │    InFlight                        ─▶ ProviderTransientFailure
//!   │    Acquired
//!   ├─ provider call under timeout
//!   │    timeout / Transient             ─▶ ProviderTransientFailure (released)
//!   │    Permanent / success = false     ─▶ ProviderPermanentFailure (released)
//!   └─ success                           ─▶ receipt cached under the reference
//! ```
//!
//! A caller that drops the `dispatch` future mid-call releases its claim,
//! so the reference can be retried.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use escrowpay_types::{
    Amount, DispatchConfig, EscrowPayError, PaymentReference, ProviderId, ProviderTable, Result,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::idempotency::{Claim, ReferenceGuard};

/// Failure reported by a provider adapter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Outage, rate limit or unknown outcome. Safe to retry with the same reference.
    #[error("transient: {0}")]
    Transient(String),
    /// Declined, invalid account or otherwise final.
    #[error("permanent: {0}")]
    Permanent(String),
}

/// What a provider returned for one call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderOutcome {
    pub success: bool,
    pub transaction_id: String,
    pub message: Option<String>,
}

impl ProviderOutcome {
    #[must_use]
    pub fn succeeded(transaction_id: impl Into<String>) -> Self {
        Self {
            success: true,
            transaction_id: transaction_id.into(),
            message: None,
        }
    }

    #[must_use]
    pub fn declined(message: impl Into<String>) -> Self {
        Self {
            success: false,
            transaction_id: String::new(),
            message: Some(message.into()),
        }
    }
}

/// Payment rail adapter (mobile money, bank transfer, card acquirer).
///
/// Implementations must treat `reference` as their idempotency key: a second
/// call with a reference they already processed returns the first outcome.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Identifier matching an entry of the provider table.
    fn provider_id(&self) -> &ProviderId;

    /// Pull `amount` from the payer.
    async fn collect(
        &self,
        payer_handle: &str,
        amount: Amount,
        reference: &PaymentReference,
    ) -> std::result::Result<ProviderOutcome, ProviderError>;

    /// Push `amount` to an external account.
    async fn disburse(
        &self,
        destination: &str,
        amount: Amount,
        reference: &PaymentReference,
    ) -> std::result::Result<ProviderOutcome, ProviderError>;
}

/// Direction of money movement through a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchKind {
    Collect,
    Disburse,
}

impl std::fmt::Display for DispatchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Collect => write!(f, "collect"),
            Self::Disburse => write!(f, "disburse"),
        }
    }
}

/// One provider call to make.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchRequest {
    pub kind: DispatchKind,
    pub provider: ProviderId,
    /// Payer handle for collections, destination account for disbursements.
    pub counterparty: String,
    pub amount: Amount,
    pub reference: PaymentReference,
}

/// Successful provider call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchReceipt {
    pub success: bool,
    pub transaction_id: String,
    pub provider: ProviderId,
    pub reference: PaymentReference,
    pub kind: DispatchKind,
}

/// Routes requests to registered providers.
pub struct PayoutDispatcher {
    table: ProviderTable,
    providers: HashMap<ProviderId, Arc<dyn PaymentProvider>>,
    guard: Mutex<ReferenceGuard<DispatchReceipt>>,
    timeout: Duration,
}

impl PayoutDispatcher {
    #[must_use]
    pub fn new(table: ProviderTable, config: &DispatchConfig) -> Self {
        Self {
            table,
            providers: HashMap::new(),
            guard: Mutex::new(ReferenceGuard::new(config.idempotency_cache_size.max(1))),
            timeout: config.provider_timeout(),
        }
    }

    /// Register an adapter under its `provider_id()`. Replaces any previous
    /// adapter with the same id.
    pub fn register_provider(&mut self, provider: Arc<dyn PaymentProvider>) {
        let id = provider.provider_id().clone();
        if !self.table.contains(&id) {
            warn!(provider = %id, "Registering provider missing from provider table");
        }
        info!(provider = %id, "Registering payment provider");
        self.providers.insert(id, provider);
    }

    /// Registered provider ids, sorted.
    #[must_use]
    pub fn provider_ids(&self) -> Vec<ProviderId> {
        let mut ids: Vec<_> = self.providers.keys().cloned().collect();
        ids.sort();
        ids
    }

    #[must_use]
    pub fn table(&self) -> &ProviderTable {
        &self.table
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Cached receipt for a reference that already completed.
    #[must_use]
    pub fn completed_receipt(&self, reference: &PaymentReference) -> Option<DispatchReceipt> {
        self.guard.lock().get(reference.as_str()).cloned()
    }

    /// Check that `provider` is registered and supports `kind`.
    pub fn ensure_capable(&self, provider: &ProviderId, kind: DispatchKind) -> Result<()> {
        if !self.providers.contains_key(provider) {
            return Err(escrowpay_types::not_found("provider", provider));
        }
        let profile = self
            .table
            .get(provider)
            .ok_or_else(|| escrowpay_types::not_found("provider", provider))?;
        let capable = match kind {
            DispatchKind::Collect => profile.supports_collect,
            DispatchKind::Disburse => profile.supports_disburse,
        };
        if capable {
            Ok(())
        } else {
            Err(EscrowPayError::ProviderPermanentFailure {
                provider: provider.clone(),
                reason: format!("provider does not support {kind}"),
            })
        }
    }

    /// Perform `request` at most once per reference (see module docs).
    pub async fn dispatch(&self, request: &DispatchRequest) -> Result<DispatchReceipt> {
        self.ensure_capable(&request.provider, request.kind)?;
        let provider = self
            .providers
            .get(&request.provider)
            .cloned()
            .ok_or_else(|| escrowpay_types::not_found("provider", &request.provider))?;

        let key = request.reference.as_str();
        let claim = self.guard.lock().claim(key);
        let held = match claim {
            Claim::Acquired => HeldClaim {
                guard: &self.guard,
                key,
                settled: false,
            },
            Claim::Completed(receipt) => {
                debug!(reference = %request.reference, "Replaying completed dispatch");
                return Ok(receipt);
            }
            Claim::InFlight => {
                return Err(EscrowPayError::ProviderTransientFailure {
                    provider: request.provider.clone(),
                    reason: format!("reference {} already in flight", request.reference),
                });
            }
        };

        let call = match request.kind {
            DispatchKind::Collect => {
                provider.collect(&request.counterparty, request.amount, &request.reference)
            }
            DispatchKind::Disburse => {
                provider.disburse(&request.counterparty, request.amount, &request.reference)
            }
        };
        let result = match tokio::time::timeout(self.timeout, call).await {
            Err(_) => Err(EscrowPayError::ProviderTransientFailure {
                provider: request.provider.clone(),
                reason: format!("timed out after {}ms", self.timeout.as_millis()),
            }),
            Ok(Err(ProviderError::Transient(reason))) => {
                Err(EscrowPayError::ProviderTransientFailure {
                    provider: request.provider.clone(),
                    reason,
                })
            }
            Ok(Err(ProviderError::Permanent(reason))) => {
                Err(EscrowPayError::ProviderPermanentFailure {
                    provider: request.provider.clone(),
                    reason,
                })
            }
            Ok(Ok(outcome)) if !outcome.success => Err(EscrowPayError::ProviderPermanentFailure {
                provider: request.provider.clone(),
                reason: outcome.message.unwrap_or_else(|| "declined".to_string()),
            }),
            Ok(Ok(outcome)) => Ok(DispatchReceipt {
                success: true,
                transaction_id: outcome.transaction_id,
                provider: request.provider.clone(),
                reference: request.reference.clone(),
                kind: request.kind,
            }),
        };

        match &result {
            Ok(receipt) => {
                held.complete(receipt.clone());
                info!(
                    provider = %request.provider,
                    kind = %request.kind,
                    reference = %request.reference,
                    amount = %request.amount,
                    transaction_id = %receipt.transaction_id,
                    "Dispatch succeeded"
                );
            }
            Err(err) => {
                drop(held);
                warn!(
                    provider = %request.provider,
                    kind = %request.kind,
                    reference = %request.reference,
                    retryable = err.is_retryable(),
                    error = %err,
                    "Dispatch failed"
                );
            }
        }
        result
    }
}

/// An acquired reference. Released on drop unless completed.
struct HeldClaim<'a> {
    guard: &'a Mutex<ReferenceGuard<DispatchReceipt>>,
    key: &'a str,
    settled: bool,
}

impl HeldClaim<'_> {
    fn complete(mut self, receipt: DispatchReceipt) {
        self.guard.lock().complete(self.key, receipt);
        self.settled = true;
    }
}

impl Drop for HeldClaim<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.guard.lock().release(self.key);
        }
    }
}

/// Scriptable in-process provider.
///
/// Succeeds by default; queued failures are consumed one per call. Repeated
/// references replay the first successful outcome, like a real rail would.
#[cfg(any(test, feature = "test-helpers"))]
pub mod mock {
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Debug, Clone)]
    pub enum Scripted {
        Fail(ProviderError),
        Decline(String),
        Hang(Duration),
    }

    pub struct MockProvider {
        id: ProviderId,
        script: Mutex<VecDeque<Scripted>>,
        seen: Mutex<HashMap<PaymentReference, ProviderOutcome>>,
        calls: AtomicUsize,
    }

    impl MockProvider {
        #[must_use]
        pub fn new(id: impl Into<String>) -> Self {
            Self {
                id: ProviderId::new(id),
                script: Mutex::new(VecDeque::new()),
                seen: Mutex::new(HashMap::new()),
                calls: AtomicUsize::new(0),
            }
        }

        /// Queue the behaviour of the next call.
        pub fn push(&self, step: Scripted) {
            self.script.lock().push_back(step);
        }

        /// Number of calls that reached the provider.
        #[must_use]
        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        async fn respond(
            &self,
            reference: &PaymentReference,
        ) -> std::result::Result<ProviderOutcome, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let step = self.script.lock().pop_front();
            match step {
                Some(Scripted::Fail(err)) => return Err(err),
                Some(Scripted::Decline(message)) => return Ok(ProviderOutcome::declined(message)),
                Some(Scripted::Hang(delay)) => tokio::time::sleep(delay).await,
                None => {}
            }
            let mut seen = self.seen.lock();
            let outcome = seen
                .entry(reference.clone())
                .or_insert_with(|| ProviderOutcome::succeeded(format!("{}-{}", self.id, reference)));
            Ok(outcome.clone())
        }
    }

    #[async_trait]
    impl PaymentProvider for MockProvider {
        fn provider_id(&self) -> &ProviderId {
            &self.id
        }

        async fn collect(
            &self,
            _payer_handle: &str,
            _amount: Amount,
            reference: &PaymentReference,
        ) -> std::result::Result<ProviderOutcome, ProviderError> {
            self.respond(reference).await
        }

        async fn disburse(
            &self,
            _destination: &str,
            _amount: Amount,
            reference: &PaymentReference,
        ) -> std::result::Result<ProviderOutcome, ProviderError> {
            self.respond(reference).await
        }
    }
}
