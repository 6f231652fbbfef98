//! # escrowpay-types
//!
//! Shared types, errors, and configuration for the **EscrowPay** settlement core.
//!
//! This crate is the leaf dependency of the workspace: every other crate
//! depends on it. It defines:
//!
//! - **Identifiers**: [`UserId`], [`BookingId`], [`EscrowId`], [`AttemptId`], [`PaymentId`], [`PaymentReference`], [`ProviderId`]
//! - **Money**: [`Amount`] (integer minor units)
//! - **Admission model**: [`PaymentAttempt`], [`AttemptStatus`], [`BlockedEntity`], [`GateDecision`]
//! - **Escrow model**: [`EscrowTransaction`], [`EscrowStatus`] and its transition table
//! - **Wallet model**: [`WalletEntry`], [`ReferenceType`]
//! - **Payments**: [`PaymentRecord`], [`WithdrawalRecord`]
//! - **Providers**: [`ProviderProfile`], [`ProviderTable`], [`Priority`]
//! - **Audit**: [`AuditEvent`], [`ActorType`]
//! - **Configuration**: [`SettlementConfig`], [`GateConfig`], [`EscrowConfig`], [`DispatchConfig`]
//! - **Errors**: [`EscrowPayError`] with `EP_ERR_` prefix codes
//! - **Constants**: contract thresholds and defaults

pub mod attempt;
pub mod audit;
pub mod booking;
pub mod config;
pub mod constants;
pub mod error;
pub mod escrow;
pub mod ids;
pub mod money;
pub mod payment;
pub mod provider;
pub mod wallet;

pub use attempt::*;
pub use audit::*;
pub use booking::*;
pub use config::*;
pub use error::*;
pub use escrow::*;
pub use ids::*;
pub use money::*;
pub use payment::*;
pub use provider::*;
pub use wallet::*;

// Constants are accessed via `escrowpay_types::constants::FOO`
// (not re-exported to avoid name collisions).
