//! System-wide constants for the EscrowPay settlement core.
//!
//! The admission thresholds below are contracts: tests assert the exact
//! boundaries, so changing one is a behavioural change, not tuning.

/// Risk score at or above which an attempt is blocked.
pub const BLOCK_THRESHOLD: u32 = 70;

/// Risk score at or above which an allowed attempt is flagged for review.
pub const REVIEW_THRESHOLD: u32 = 40;

/// Score forced onto any attempt touching an actively blocked entity.
pub const BLOCKED_ENTITY_SCORE: u32 = 100;

/// Default sliding window for attempt counting (seconds).
pub const DEFAULT_ATTEMPT_WINDOW_SECS: i64 = 3600;

/// Default burst-velocity window (seconds).
pub const DEFAULT_BURST_WINDOW_SECS: i64 = 600;

/// Prior attempts from one IP within the window that trigger `ip_velocity`.
pub const IP_ATTEMPT_LIMIT: usize = 5;
/// Score added by `ip_velocity`.
pub const IP_VELOCITY_SCORE: u32 = 40;

/// Prior attempts from one user within the window that trigger `user_velocity`.
pub const USER_ATTEMPT_LIMIT: usize = 5;
/// Score added by `user_velocity`.
pub const USER_VELOCITY_SCORE: u32 = 30;

/// Attempts below this amount (minor units) are card-testing candidates.
pub const CARD_TESTING_AMOUNT_CEILING: u64 = 1000;
/// Distinct card fingerprints within the window that trigger `card_testing`.
pub const CARD_TESTING_DISTINCT_CARDS: usize = 3;
/// Score added by `card_testing`.
pub const CARD_TESTING_SCORE: u32 = 50;

/// Failed attempts within the window that trigger `failed_attempts`
/// and the logging-side auto-block.
pub const FAILED_ATTEMPT_LIMIT: usize = 3;
/// Score added by `failed_attempts`.
pub const FAILED_ATTEMPTS_SCORE: u32 = 35;

/// Attempts (any outcome) within the burst window that trigger `burst_velocity`.
pub const BURST_ATTEMPT_LIMIT: usize = 5;
/// Score added by `burst_velocity`.
pub const BURST_VELOCITY_SCORE: u32 = 25;

/// Duration of automatic blocks (seconds).
pub const AUTO_BLOCK_SECS: i64 = 24 * 3600;

/// Commission rate applied when the category supplies none (percent).
pub const DEFAULT_COMMISSION_RATE_PERCENT: i64 = 10;

/// Days between escrow creation and the end of the buyer refund period.
pub const DEFAULT_REFUND_PERIOD_DAYS: i64 = 7;

/// Default bounded timeout for a single provider call (milliseconds).
pub const DEFAULT_PROVIDER_TIMEOUT_MS: u64 = 30_000;

/// Completed dispatch references remembered by the payout dispatcher.
pub const DISPATCH_IDEMPOTENCY_CACHE_SIZE: usize = 500_000;

/// Prefix for payment references.
pub const PAYMENT_REFERENCE_PREFIX: &str = "PAY";

/// Prefix for withdrawal references.
pub const WITHDRAWAL_REFERENCE_PREFIX: &str = "WDR";

/// Version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
