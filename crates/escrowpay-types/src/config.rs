//! Configuration types for the EscrowPay settlement core.
//!
//! Every struct has a `Default` that reproduces the production constants,
//! and every field may be omitted from a JSON document.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{Amount, EscrowPayError, ProviderTable, Result, constants};

/// Admission-gate windows and limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Sliding window for velocity, card-testing and failure counts.
    pub attempt_window_secs: i64,
    /// Shorter window for burst detection.
    pub burst_window_secs: i64,
    pub ip_attempt_limit: usize,
    pub user_attempt_limit: usize,
    /// Amounts strictly below this are card-testing candidates.
    pub card_testing_amount_ceiling: Amount,
    pub card_testing_distinct_cards: usize,
    pub failed_attempt_limit: usize,
    pub burst_attempt_limit: usize,
    /// Duration of automatic IP/user blocks.
    pub auto_block_secs: i64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            attempt_window_secs: constants::DEFAULT_ATTEMPT_WINDOW_SECS,
            burst_window_secs: constants::DEFAULT_BURST_WINDOW_SECS,
            ip_attempt_limit: constants::IP_ATTEMPT_LIMIT,
            user_attempt_limit: constants::USER_ATTEMPT_LIMIT,
            card_testing_amount_ceiling: Amount::new(constants::CARD_TESTING_AMOUNT_CEILING),
            card_testing_distinct_cards: constants::CARD_TESTING_DISTINCT_CARDS,
            failed_attempt_limit: constants::FAILED_ATTEMPT_LIMIT,
            burst_attempt_limit: constants::BURST_ATTEMPT_LIMIT,
            auto_block_secs: constants::AUTO_BLOCK_SECS,
        }
    }
}

impl GateConfig {
    #[must_use]
    pub fn attempt_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.attempt_window_secs)
    }

    #[must_use]
    pub fn burst_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.burst_window_secs)
    }

    #[must_use]
    pub fn auto_block_duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.auto_block_secs)
    }

    /// The longest window any signal looks back over.
    #[must_use]
    pub fn retention(&self) -> chrono::Duration {
        self.attempt_window().max(self.burst_window())
    }
}

/// Escrow ledger defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscrowConfig {
    /// Percentage used when the category carries no rate.
    pub default_commission_rate: Decimal,
    /// Days from creation until the buyer can no longer dispute.
    pub refund_period_days: i64,
}

impl Default for EscrowConfig {
    fn default() -> Self {
        Self {
            default_commission_rate: Decimal::from(constants::DEFAULT_COMMISSION_RATE_PERCENT),
            refund_period_days: constants::DEFAULT_REFUND_PERIOD_DAYS,
        }
    }
}

impl EscrowConfig {
    #[must_use]
    pub fn refund_period(&self) -> chrono::Duration {
        chrono::Duration::days(self.refund_period_days)
    }
}

/// Payout dispatcher settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Upper bound on a single provider call.
    pub provider_timeout_ms: u64,
    /// Completed references remembered for replay.
    pub idempotency_cache_size: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            provider_timeout_ms: constants::DEFAULT_PROVIDER_TIMEOUT_MS,
            idempotency_cache_size: constants::DISPATCH_IDEMPOTENCY_CACHE_SIZE,
        }
    }
}

impl DispatchConfig {
    #[must_use]
    pub fn provider_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.provider_timeout_ms)
    }
}

/// Everything the settlement core needs at construction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
    pub gate: GateConfig,
    pub escrow: EscrowConfig,
    pub dispatch: DispatchConfig,
    pub providers: ProviderTable,
}

impl SettlementConfig {
    /// Parse and validate a JSON configuration document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the core misbehave.
    pub fn validate(&self) -> Result<()> {
        let gate = &self.gate;
        if gate.attempt_window_secs <= 0 || gate.burst_window_secs <= 0 {
            return Err(EscrowPayError::Configuration(
                "gate windows must be positive".into(),
            ));
        }
        if gate.auto_block_secs <= 0 {
            return Err(EscrowPayError::Configuration(
                "auto_block_secs must be positive".into(),
            ));
        }
        if gate.ip_attempt_limit == 0
            || gate.user_attempt_limit == 0
            || gate.failed_attempt_limit == 0
            || gate.burst_attempt_limit == 0
            || gate.card_testing_distinct_cards == 0
        {
            return Err(EscrowPayError::Configuration(
                "gate limits must be at least 1".into(),
            ));
        }

        let rate = self.escrow.default_commission_rate;
        if rate < Decimal::ZERO || rate > Decimal::ONE_HUNDRED {
            return Err(EscrowPayError::Configuration(format!(
                "default_commission_rate {rate} outside [0, 100]"
            )));
        }
        if self.escrow.refund_period_days < 0 {
            return Err(EscrowPayError::Configuration(
                "refund_period_days must not be negative".into(),
            ));
        }

        if self.dispatch.provider_timeout_ms == 0 {
            return Err(EscrowPayError::Configuration(
                "provider_timeout_ms must be positive".into(),
            ));
        }
        if self.dispatch.idempotency_cache_size == 0 {
            return Err(EscrowPayError::Configuration(
                "idempotency_cache_size must be positive".into(),
            ));
        }

        self.providers.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_constants() {
        let config = SettlementConfig::default();
        assert_eq!(config.gate.attempt_window(), chrono::Duration::hours(1));
        assert_eq!(config.gate.burst_window(), chrono::Duration::minutes(10));
        assert_eq!(config.gate.auto_block_duration(), chrono::Duration::hours(24));
        assert_eq!(config.escrow.default_commission_rate, Decimal::from(10));
        assert_eq!(config.escrow.refund_period(), chrono::Duration::days(7));
        assert_eq!(
            config.dispatch.provider_timeout(),
            std::time::Duration::from_secs(30)
        );
        config.validate().unwrap();
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config =
            SettlementConfig::from_json(r#"{"escrow": {"refund_period_days": 3}}"#).unwrap();
        assert_eq!(config.escrow.refund_period_days, 3);
        assert_eq!(config.escrow.default_commission_rate, Decimal::from(10));
        assert_eq!(config.gate, GateConfig::default());
        assert_eq!(config.providers.len(), 4);
    }

    #[test]
    fn invalid_rate_is_rejected() {
        let err = SettlementConfig::from_json(r#"{"escrow": {"default_commission_rate": "120"}}"#)
            .unwrap_err();
        assert!(matches!(err, EscrowPayError::Configuration(_)), "{err}");
    }

    #[test]
    fn malformed_json_is_serialization_error() {
        let err = SettlementConfig::from_json("{not json").unwrap_err();
        assert!(matches!(err, EscrowPayError::Serialization(_)));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let mut config = SettlementConfig::default();
        config.dispatch.provider_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_serde_roundtrip() {
        let config = SettlementConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back = SettlementConfig::from_json(&json).unwrap();
        assert_eq!(config, back);
    }
}
