//! # EscrowTransaction: the settlement ledger row
//!
//! Funds collected from a buyer are held in an escrow row until they are
//! either released to the seller or refunded to the buyer.
//!
//! ## State Machine
//!
//! ```text
//!   HELD ──customer──▶ CUSTOMER_APPROVED ──sweep──▶ REFUND_PERIOD_PASSED
//!    │                                                     │ admin
//!    │ instant payout                                      ▼
//!    └──────────────────────▶ RELEASED ◀──release── ADMIN_APPROVED
//!
//!   any non-terminal state ──refund──▶ REFUNDED
//! ```
//!
//! `RELEASED` and `REFUNDED` are terminal. `HELD → RELEASED` is the instant
//! payout fast path; it shares the release primitive with the admin chain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Amount, BookingId, EscrowId, PaymentReference, UserId};

/// The lifecycle state of an escrow row.
///
/// Every mutation path consults [`EscrowStatus::can_transition_to`]; there
/// is no other place where transition legality is decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscrowStatus {
    /// Buyer funds collected and held by the platform.
    Held,
    /// The buyer confirmed the rental/sale went as agreed.
    CustomerApproved,
    /// The refund deadline passed after customer approval.
    RefundPeriodPassed,
    /// An admin approved the payout; release follows immediately.
    AdminApproved,
    /// Net amount credited to the seller. **Terminal.**
    Released,
    /// Full amount credited back to the buyer. **Terminal.**
    Refunded,
}

impl EscrowStatus {
    /// Can a row in this state move to `target`?
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        match (self, target) {
            (Self::Released | Self::Refunded, _) => false,
            (_, Self::Refunded) => true,
            (Self::Held, Self::CustomerApproved | Self::Released)
            | (Self::CustomerApproved, Self::RefundPeriodPassed)
            | (Self::RefundPeriodPassed, Self::AdminApproved)
            | (Self::AdminApproved, Self::Released) => true,
            _ => false,
        }
    }

    /// Terminal states are historical record only.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Released | Self::Refunded)
    }

    /// All states, in lifecycle order.
    pub const ALL: [Self; 6] = [
        Self::Held,
        Self::CustomerApproved,
        Self::RefundPeriodPassed,
        Self::AdminApproved,
        Self::Released,
        Self::Refunded,
    ];
}

impl std::fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Held => write!(f, "HELD"),
            Self::CustomerApproved => write!(f, "CUSTOMER_APPROVED"),
            Self::RefundPeriodPassed => write!(f, "REFUND_PERIOD_PASSED"),
            Self::AdminApproved => write!(f, "ADMIN_APPROVED"),
            Self::Released => write!(f, "RELEASED"),
            Self::Refunded => write!(f, "REFUNDED"),
        }
    }
}

/// One escrow ledger row. Never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowTransaction {
    pub id: EscrowId,
    pub booking_id: BookingId,
    pub buyer_id: UserId,
    pub seller_id: UserId,
    /// Full amount collected from the buyer.
    pub amount: Amount,
    /// Platform fee retained on release.
    pub commission: Amount,
    /// `amount - commission`; what the seller receives on release.
    pub net_amount: Amount,
    pub status: EscrowStatus,
    /// Provider idempotency key of the collection that funded this row.
    pub payment_reference: PaymentReference,
    /// The buyer may dispute until this instant.
    pub refund_deadline: DateTime<Utc>,
    /// Earliest instant the row becomes eligible for admin release.
    pub auto_release_date: Option<DateTime<Utc>>,
    pub customer_approved_at: Option<DateTime<Utc>>,
    pub admin_approved_by: Option<UserId>,
    pub admin_approved_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub refunded_by: Option<UserId>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl EscrowTransaction {
    /// Whether the refund period is over at `now`.
    #[must_use]
    pub fn refund_period_elapsed(&self, now: DateTime<Utc>) -> bool {
        now > self.refund_deadline
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Dummy escrow row for testing. **Never use in production.**
#[cfg(any(test, feature = "test-helpers"))]
impl EscrowTransaction {
    /// Create a HELD row with a 10% commission.
    #[must_use]
    pub fn dummy(amount: Amount) -> Self {
        let now = Utc::now();
        let commission = Amount::new(amount.minor_units() / 10);
        Self {
            id: EscrowId::new(),
            booking_id: BookingId::new(),
            buyer_id: UserId::new(),
            seller_id: UserId::new(),
            amount,
            commission,
            net_amount: Amount::new(amount.minor_units() - commission.minor_units()),
            status: EscrowStatus::Held,
            payment_reference: PaymentReference::new_payment(),
            refund_deadline: now + chrono::Duration::days(7),
            auto_release_date: Some(now + chrono::Duration::days(7)),
            customer_approved_at: None,
            admin_approved_by: None,
            admin_approved_at: None,
            released_at: None,
            refunded_at: None,
            refunded_by: None,
            notes: None,
            created_at: now,
        }
    }
}
