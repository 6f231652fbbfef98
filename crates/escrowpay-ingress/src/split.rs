//! Platform fee / seller amount split.
//!
//! `platform_fee = round_half_away_from_zero(amount × rate / 100)` in
//! decimal arithmetic, and `seller_amount = amount − platform_fee`, so the
//! two parts always add back to the input exactly.

use escrowpay_types::{Amount, EscrowPayError, Result};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Result of splitting a gross amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Split {
    pub platform_fee: Amount,
    pub seller_amount: Amount,
    /// Rate actually applied, in percent.
    pub commission_rate: Decimal,
}

/// Computes commission splits with a fallback rate.
#[derive(Debug, Clone)]
pub struct SplitCalculator {
    default_rate: Decimal,
}

impl SplitCalculator {
    /// Calculator that falls back to 10%.
    #[must_use]
    pub fn new() -> Self {
        Self {
            default_rate: Decimal::from(escrowpay_types::constants::DEFAULT_COMMISSION_RATE_PERCENT),
        }
    }

    /// Calculator with a custom fallback rate (percent, `0..=100`).
    pub fn with_default_rate(default_rate: Decimal) -> Result<Self> {
        validate_rate(default_rate)?;
        Ok(Self { default_rate })
    }

    #[must_use]
    pub fn default_rate(&self) -> Decimal {
        self.default_rate
    }

    /// Split `amount` at `rate_percent`, or at the default rate when `None`.
    pub fn split(&self, amount: Amount, rate_percent: Option<Decimal>) -> Result<Split> {
        let rate = rate_percent.unwrap_or(self.default_rate);
        validate_rate(rate)?;

        let fee = (amount.to_decimal() * rate / Decimal::ONE_HUNDRED)
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
        let platform_fee = Amount::from_decimal(fee)?;
        let seller_amount = amount.checked_sub(platform_fee)?;

        Ok(Split {
            platform_fee,
            seller_amount,
            commission_rate: rate,
        })
    }
}

impl Default for SplitCalculator {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_rate(rate: Decimal) -> Result<()> {
    if rate < Decimal::ZERO || rate > Decimal::ONE_HUNDRED {
        return Err(EscrowPayError::Validation {
            reason: format!("commission rate {rate}% outside [0, 100]"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use rand::Rng;

    use super::*;

    #[test]
    fn ten_percent_of_ten_thousand() {
        let split = SplitCalculator::new()
            .split(Amount::new(10_000), Some(Decimal::from(10)))
            .unwrap();
        assert_eq!(split.platform_fee, Amount::new(1_000));
        assert_eq!(split.seller_amount, Amount::new(9_000));
        assert_eq!(split.commission_rate, Decimal::from(10));
    }

    #[test]
    fn missing_rate_uses_default() {
        let split = SplitCalculator::new().split(Amount::new(10_000), None).unwrap();
        assert_eq!(split.platform_fee, Amount::new(1_000));
    }

    #[test]
    fn custom_default_rate() {
        let calc = SplitCalculator::with_default_rate(Decimal::new(125, 1)).unwrap();
        let split = calc.split(Amount::new(1_000), None).unwrap();
        assert_eq!(split.platform_fee, Amount::new(125));
        assert_eq!(split.seller_amount, Amount::new(875));
    }

    #[test]
    fn half_rounds_away_from_zero() {
        // 15 × 10% = 1.5 -> 2
        let split = SplitCalculator::new()
            .split(Amount::new(15), Some(Decimal::from(10)))
            .unwrap();
        assert_eq!(split.platform_fee, Amount::new(2));
        assert_eq!(split.seller_amount, Amount::new(13));

        // 14 × 10% = 1.4 -> 1
        let split = SplitCalculator::new()
            .split(Amount::new(14), Some(Decimal::from(10)))
            .unwrap();
        assert_eq!(split.platform_fee, Amount::new(1));
    }

    #[test]
    fn boundary_rates() {
        let calc = SplitCalculator::new();
        let zero = calc.split(Amount::new(777), Some(Decimal::ZERO)).unwrap();
        assert_eq!(zero.platform_fee, Amount::ZERO);
        assert_eq!(zero.seller_amount, Amount::new(777));

        let full = calc.split(Amount::new(777), Some(Decimal::ONE_HUNDRED)).unwrap();
        assert_eq!(full.platform_fee, Amount::new(777));
        assert_eq!(full.seller_amount, Amount::ZERO);
    }

    #[test]
    fn out_of_range_rate_rejected() {
        let calc = SplitCalculator::new();
        for rate in [Decimal::from(-1), Decimal::new(1001, 1)] {
            let err = calc.split(Amount::new(100), Some(rate)).unwrap_err();
            assert!(matches!(err, EscrowPayError::Validation { .. }));
        }
        assert!(SplitCalculator::with_default_rate(Decimal::from(101)).is_err());
    }

    #[test]
    fn parts_always_sum_to_amount() {
        let calc = SplitCalculator::new();
        let mut rng = rand::thread_rng();
        for _ in 0..2_000 {
            let amount = Amount::new(rng.gen_range(0..=50_000_000));
            // Rates with up to two decimal places in [0, 100].
            let rate = Decimal::new(rng.gen_range(0..=10_000), 2);
            let split = calc.split(amount, Some(rate)).unwrap();
            assert_eq!(
                split.platform_fee.checked_add(split.seller_amount).unwrap(),
                amount,
                "amount={amount} rate={rate}"
            );
            assert!(split.platform_fee <= amount);
        }
    }
}
