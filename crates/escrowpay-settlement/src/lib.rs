//! # escrowpay-settlement
//!
//! **Finality plane**: escrow custody, wallet credits, provider dispatch and
//! the orchestrator tying them to the ingress gate.
//!
//! ## Architecture
//!
//! 1. **EscrowStore**: escrow rows with compare-and-swap transitions
//! 2. **EscrowLedger**: the escrow state machine and its single release
//!    primitive
//! 3. **WalletLedger**: reference-keyed credits and debits
//! 4. **PayoutDispatcher**: async provider calls, once per reference
//! 5. **MoneyConservation**: escrow exits checked against wallet credits
//! 6. **SettlementOrchestrator**: the payment and withdrawal pipelines
//!
//! ## Escrow exits
//!
//! Every escrow leaves custody exactly once: its net amount to the seller
//! (`RELEASED`) or its full amount to the buyer (`REFUNDED`). The wallet
//! credit and the status flip happen in one row critical section, keyed by
//! the escrow id.

pub mod collaborators;
pub mod conservation;
pub mod dispatcher;
pub mod escrow_ledger;
pub mod idempotency;
pub mod orchestrator;
pub mod store;
pub mod wallet;

pub use collaborators::{
    AuditSink, BookingDirectory, CategoryDirectory, InMemoryBookings, InMemoryCategories,
    MemoryAuditSink, SettlementServices, TracingAuditSink,
};
pub use conservation::MoneyConservation;
pub use dispatcher::{
    DispatchKind, DispatchReceipt, DispatchRequest, PaymentProvider, PayoutDispatcher,
    ProviderError, ProviderOutcome,
};
pub use escrow_ledger::EscrowLedger;
pub use idempotency::{Claim, ReferenceGuard};
pub use orchestrator::{PayerContext, PaymentOutcome, PaymentRequest, SettlementOrchestrator};
pub use store::{EscrowStore, InMemoryEscrowStore, TransitionFn, Transitioned};
pub use wallet::{InMemoryWallet, WalletLedger};
