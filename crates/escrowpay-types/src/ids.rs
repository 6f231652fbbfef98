//! Globally unique identifiers used throughout EscrowPay.
//!
//! All entity IDs use UUIDv7 for time-ordered lexicographic sorting.
//! References handed to payment providers embed a UUIDv7 as well, so two
//! requests can never share an idempotency key by accident.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::constants::{PAYMENT_REFERENCE_PREFIX, WITHDRAWAL_REFERENCE_PREFIX};

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            #[must_use]
            pub fn from_bytes(bytes: [u8; 16]) -> Self {
                Self(Uuid::from_bytes(bytes))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a marketplace user (buyer, seller or admin).
    UserId
);
uuid_id!(
    /// Booking (rental or sale) identifier, owned by the booking service.
    BookingId
);
uuid_id!(
    /// Product listing identifier.
    ProductId
);
uuid_id!(
    /// Catalog category identifier; carries the commission rate.
    CategoryId
);
uuid_id!(
    /// Escrow ledger row identifier.
    EscrowId
);
uuid_id!(
    /// Payment attempt log row identifier.
    AttemptId
);
uuid_id!(
    /// Completed payment record identifier.
    PaymentId
);
uuid_id!(
    /// Wallet transaction log entry identifier.
    WalletEntryId
);

impl EscrowId {
    /// Extract the embedded timestamp (milliseconds since UNIX epoch) from UUIDv7.
    #[must_use]
    pub fn timestamp_ms(&self) -> u64 {
        let bytes = self.0.as_bytes();
        u64::from_be_bytes([
            0, 0, bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5],
        ])
    }
}

// ---------------------------------------------------------------------------
// PaymentReference
// ---------------------------------------------------------------------------

/// Idempotency key attached to every provider call.
///
/// Format: `PAY-<uuidv7>` for collections, `WDR-<uuidv7>` for withdrawals.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct PaymentReference(String);

impl PaymentReference {
    /// Fresh reference for a buyer collection.
    #[must_use]
    pub fn new_payment() -> Self {
        Self(format!("{PAYMENT_REFERENCE_PREFIX}-{}", Uuid::now_v7()))
    }

    /// Fresh reference for a wallet withdrawal.
    #[must_use]
    pub fn new_withdrawal() -> Self {
        Self(format!("{WITHDRAWAL_REFERENCE_PREFIX}-{}", Uuid::now_v7()))
    }

    /// Wrap a reference received from elsewhere (e.g. a provider callback).
    #[must_use]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PaymentReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// ProviderId
// ---------------------------------------------------------------------------

/// Key of a configured payment/payout provider (e.g. `mtn_momo`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(String);

impl ProviderId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ProviderId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// CardFingerprint
// ---------------------------------------------------------------------------

/// Opaque card identity used by the admission gate. Never a raw PAN.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CardFingerprint(String);

impl CardFingerprint {
    /// Wrap a fingerprint already computed by the card processor.
    #[must_use]
    pub fn new(fingerprint: impl Into<String>) -> Self {
        Self(fingerprint.into())
    }

    /// Derive a fingerprint from a card number.
    ///
    /// Format: `hex(sha256("escrowpay:card:v1:" || digits))`. Spaces and
    /// dashes are ignored so `4111-1111 1111 1111` and `4111111111111111`
    /// map to the same card.
    #[must_use]
    pub fn from_card_number(number: &str) -> Self {
        let digits: String = number.chars().filter(char::is_ascii_digit).collect();
        let mut hasher = Sha256::new();
        hasher.update(b"escrowpay:card:v1:");
        hasher.update(digits.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CardFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
