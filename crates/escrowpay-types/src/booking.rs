//! The slice of a booking the settlement core needs.
//!
//! Bookings and the catalog are owned elsewhere; escrow creation only reads
//! who pays, who gets paid, and which category sets the commission.

use serde::{Deserialize, Serialize};

use crate::{BookingId, CategoryId, ProductId, UserId};

/// Read-only view of a booking, as returned by the booking directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingInfo {
    pub booking_id: BookingId,
    /// Renter / purchaser; the party refunds go to.
    pub buyer_id: UserId,
    /// Product owner; the party releases go to.
    pub seller_id: UserId,
    pub product_id: ProductId,
    pub category_id: CategoryId,
}

#[cfg(any(test, feature = "test-helpers"))]
impl BookingInfo {
    /// A booking with fresh random parties. **Never use in production.**
    #[must_use]
    pub fn dummy() -> Self {
        Self {
            booking_id: BookingId::new(),
            buyer_id: UserId::new(),
            seller_id: UserId::new(),
            product_id: ProductId::new(),
            category_id: CategoryId::new(),
        }
    }
}
