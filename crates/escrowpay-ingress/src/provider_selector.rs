//! Deterministic provider selection.
//!
//! | Priority      | Score                           |
//! |---------------|---------------------------------|
//! | `Cost`        | `(1 − fee) × 100`               |
//! | `Speed`       | `(100 if instant else 50) × uptime` |
//! | `Reliability` | `uptime × 100`                  |
//!
//! Highest score wins; ties go to the provider declared first.

use escrowpay_types::{Amount, Priority, ProviderId, ProviderProfile, ProviderTable, Result};
use rust_decimal::Decimal;
use tracing::debug;

/// Picks a provider from an immutable table.
#[derive(Debug, Clone)]
pub struct ProviderSelector {
    table: ProviderTable,
}

impl ProviderSelector {
    #[must_use]
    pub fn new(table: ProviderTable) -> Self {
        Self { table }
    }

    #[must_use]
    pub fn table(&self) -> &ProviderTable {
        &self.table
    }

    /// Choose a provider for a payment of `amount`.
    ///
    /// A `preferred` provider present in the table is returned as-is; an
    /// unknown preference falls back to scoring.
    pub fn select(
        &self,
        amount: Amount,
        preferred: Option<&ProviderId>,
        priority: Priority,
    ) -> Result<ProviderId> {
        if let Some(id) = preferred.filter(|id| self.table.contains(id)) {
            debug!(provider = %id, %amount, "Using preferred provider");
            return Ok(id.clone());
        }

        let mut best: Option<(&ProviderProfile, Decimal)> = None;
        for profile in self.table.iter() {
            let score = score(profile, priority);
            // Strict `>` keeps the earlier provider on ties.
            if best.is_none_or(|(_, top)| score > top) {
                best = Some((profile, score));
            }
        }

        let (profile, score) =
            best.ok_or_else(|| escrowpay_types::not_found("provider", "<empty table>"))?;
        debug!(provider = %profile.id, ?priority, %score, %amount, "Provider selected");
        Ok(profile.id.clone())
    }

    /// Score of every provider under `priority`, in declaration order.
    #[must_use]
    pub fn scores(&self, priority: Priority) -> Vec<(ProviderId, Decimal)> {
        self.table
            .iter()
            .map(|p| (p.id.clone(), score(p, priority)))
            .collect()
    }
}

impl Default for ProviderSelector {
    fn default() -> Self {
        Self::new(ProviderTable::default())
    }
}

fn score(profile: &ProviderProfile, priority: Priority) -> Decimal {
    match priority {
        Priority::Cost => (Decimal::ONE - profile.fee) * Decimal::ONE_HUNDRED,
        Priority::Speed => {
            let base = if profile.instant {
                Decimal::ONE_HUNDRED
            } else {
                Decimal::from(50)
            };
            base * profile.uptime
        }
        Priority::Reliability => profile.uptime * Decimal::ONE_HUNDRED,
    }
}

#[cfg(test)]
mod tests {
    use escrowpay_types::EscrowPayError;

    use super::*;

    fn selector() -> ProviderSelector {
        ProviderSelector::default()
    }

    #[test]
    fn cost_prefers_cheapest() {
        let id = selector()
            .select(Amount::new(10_000), None, Priority::Cost)
            .unwrap();
        assert_eq!(id.as_str(), "bank_transfer");
    }

    #[test]
    fn speed_prefers_instant_with_best_uptime() {
        let id = selector()
            .select(Amount::new(10_000), None, Priority::Speed)
            .unwrap();
        assert_eq!(id.as_str(), "card");
    }

    #[test]
    fn reliability_prefers_uptime() {
        let id = selector()
            .select(Amount::new(10_000), None, Priority::Reliability)
            .unwrap();
        assert_eq!(id.as_str(), "bank_transfer");
    }

    #[test]
    fn ties_go_to_first_declared() {
        // mtn_momo and airtel_money share a fee; mtn_momo is declared first.
        let table = ProviderTable::new(vec![
            ProviderProfile::new("mtn_momo", Decimal::new(15, 3), true, Decimal::new(98, 2)),
            ProviderProfile::new("airtel_money", Decimal::new(15, 3), true, Decimal::new(95, 2)),
        ]);
        let id = ProviderSelector::new(table)
            .select(Amount::new(1), None, Priority::Cost)
            .unwrap();
        assert_eq!(id.as_str(), "mtn_momo");
    }

    #[test]
    fn known_preference_wins_unconditionally() {
        let preferred = ProviderId::from("airtel_money");
        let id = selector()
            .select(Amount::new(10_000), Some(&preferred), Priority::Cost)
            .unwrap();
        assert_eq!(id, preferred);
    }

    #[test]
    fn unknown_preference_falls_back_to_scoring() {
        let preferred = ProviderId::from("paypal");
        let id = selector()
            .select(Amount::new(10_000), Some(&preferred), Priority::Cost)
            .unwrap();
        assert_eq!(id.as_str(), "bank_transfer");
    }

    #[test]
    fn empty_table_is_not_found() {
        let err = ProviderSelector::new(ProviderTable::new(Vec::new()))
            .select(Amount::new(1), None, Priority::Cost)
            .unwrap_err();
        assert!(matches!(err, EscrowPayError::NotFound { .. }));
    }

    #[test]
    fn selection_is_deterministic() {
        let s = selector();
        for priority in [Priority::Cost, Priority::Speed, Priority::Reliability] {
            let first = s.select(Amount::new(5_000), None, priority).unwrap();
            for _ in 0..50 {
                assert_eq!(s.select(Amount::new(5_000), None, priority).unwrap(), first);
            }
        }
    }

    #[test]
    fn scores_follow_formulas() {
        let scores = selector().scores(Priority::Speed);
        let bank = scores
            .iter()
            .find(|(id, _)| id.as_str() == "bank_transfer")
            .unwrap();
        // 50 × 0.995
        assert_eq!(bank.1, Decimal::new(4975, 2));
        assert_eq!(scores.len(), 4);
    }
}
