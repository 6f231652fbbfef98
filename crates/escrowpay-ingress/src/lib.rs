//! # escrowpay-ingress
//!
//! **Pre-payment plane**: everything that runs before money moves.
//!
//! ## Architecture
//!
//! 1. **AttemptThrottle**: fraud / velocity gate; logs every attempt and
//!    auto-blocks repeat offenders
//! 2. **EntityBlocklist**: expiring blocks on IPs, users and cards
//! 3. **ProviderSelector**: deterministic provider choice by cost, speed or
//!    reliability
//! 4. **SplitCalculator**: commission split in exact minor units
//!
//! ## Payment Flow
//!
//! ```text
//! request → AttemptThrottle.admit() → ProviderSelector.select()
//!         → (settlement) collect → SplitCalculator.split() → escrow HELD
//! ```

pub mod attempt_throttle;
pub mod blocklist;
pub mod provider_selector;
pub mod split;

pub use attempt_throttle::{AttemptSubject, AttemptThrottle};
pub use blocklist::EntityBlocklist;
pub use provider_selector::ProviderSelector;
pub use split::{Split, SplitCalculator};
