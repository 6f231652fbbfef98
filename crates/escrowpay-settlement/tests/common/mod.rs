//! Shared fixtures for the settlement integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use escrowpay_settlement::{
    InMemoryBookings, InMemoryCategories, InMemoryEscrowStore, InMemoryWallet, MemoryAuditSink,
    PayerContext, PaymentProvider, PaymentRequest, PayoutDispatcher, ProviderError,
    ProviderOutcome, SettlementOrchestrator, SettlementServices,
};
use escrowpay_types::{
    Amount, BookingInfo, PaymentReference, Priority, ProviderId, SettlementConfig,
};
use parking_lot::Mutex;

/// Install a test subscriber once; `RUST_LOG` controls verbosity.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Provider that succeeds unless a failure is queued.
pub struct StubRail {
    id: ProviderId,
    failures: Mutex<VecDeque<ProviderError>>,
    calls: AtomicUsize,
}

impl StubRail {
    pub fn new(id: &str) -> Self {
        Self {
            id: ProviderId::new(id),
            failures: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn fail_next(&self, err: ProviderError) {
        self.failures.lock().push_back(err);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn respond(&self, reference: &PaymentReference) -> Result<ProviderOutcome, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.failures.lock().pop_front() {
            Some(err) => Err(err),
            None => Ok(ProviderOutcome {
                success: true,
                transaction_id: format!("tx-{reference}"),
                message: None,
            }),
        }
    }
}

#[async_trait]
impl PaymentProvider for StubRail {
    fn provider_id(&self) -> &ProviderId {
        &self.id
    }

    async fn collect(
        &self,
        _payer_handle: &str,
        _amount: Amount,
        reference: &PaymentReference,
    ) -> Result<ProviderOutcome, ProviderError> {
        tokio::task::yield_now().await;
        self.respond(reference)
    }

    async fn disburse(
        &self,
        _destination: &str,
        _amount: Amount,
        reference: &PaymentReference,
    ) -> Result<ProviderOutcome, ProviderError> {
        tokio::task::yield_now().await;
        self.respond(reference)
    }
}

/// Orchestrator over in-memory collaborators with one `mtn_momo` rail.
pub struct Pipeline {
    pub orch: Arc<SettlementOrchestrator>,
    pub momo: Arc<StubRail>,
    pub bookings: Arc<InMemoryBookings>,
    pub categories: Arc<InMemoryCategories>,
    pub wallet: Arc<InMemoryWallet>,
    pub audit: Arc<MemoryAuditSink>,
}

impl Pipeline {
    pub fn new() -> Self {
        init_tracing();
        let config = SettlementConfig::default();
        let momo = Arc::new(StubRail::new("mtn_momo"));
        let mut dispatcher = PayoutDispatcher::new(config.providers.clone(), &config.dispatch);
        dispatcher.register_provider(momo.clone());

        let bookings = Arc::new(InMemoryBookings::new());
        let categories = Arc::new(InMemoryCategories::new());
        let wallet = Arc::new(InMemoryWallet::new());
        let audit = Arc::new(MemoryAuditSink::new());
        let services = SettlementServices {
            store: Arc::new(InMemoryEscrowStore::new()),
            wallet: wallet.clone(),
            bookings: bookings.clone(),
            categories: categories.clone(),
            audit: audit.clone(),
        };
        let orch = SettlementOrchestrator::new(&config, services, dispatcher)
            .expect("default config is valid");
        Self {
            orch: Arc::new(orch),
            momo,
            bookings,
            categories,
            wallet,
            audit,
        }
    }

    /// Register a fresh booking and build a request paying for it.
    pub fn booking_request(&self, amount: u64, ip: IpAddr) -> (BookingInfo, PaymentRequest) {
        let booking = BookingInfo::dummy();
        self.bookings.insert(booking.clone());
        let request = PaymentRequest {
            booking_id: booking.booking_id,
            amount: Amount::new(amount),
            method: Some(ProviderId::new("mtn_momo")),
            priority: Priority::Speed,
            payer: PayerContext {
                user_id: Some(booking.buyer_id),
                ip,
                card: None,
                device_fingerprint: "test-device".into(),
                payer_handle: "+250788123456".into(),
            },
        };
        (booking, request)
    }
}

pub fn ip(last: u8) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(192, 168, 1, last))
}
