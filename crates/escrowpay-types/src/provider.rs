//! Payment/payout provider profiles.
//!
//! The table is an immutable value handed to the selector and dispatcher at
//! construction. Declaration order matters: selection ties go to the
//! provider declared first.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{EscrowPayError, ProviderId, Result};

/// What the caller wants the selector to optimise for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Lowest fee.
    #[default]
    Cost,
    /// Instant settlement, weighted by uptime.
    Speed,
    /// Highest uptime.
    Reliability,
}

/// Static description of one provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderProfile {
    pub id: ProviderId,
    /// Fee as a fraction of the amount (`0.015` == 1.5%).
    pub fee: Decimal,
    /// Settles in seconds rather than days.
    pub instant: bool,
    /// Observed availability as a fraction in `[0, 1]`.
    pub uptime: Decimal,
    /// Can pull money from a payer.
    #[serde(default = "default_true")]
    pub supports_collect: bool,
    /// Can push money to an external account.
    #[serde(default = "default_true")]
    pub supports_disburse: bool,
}

fn default_true() -> bool {
    true
}

impl ProviderProfile {
    #[must_use]
    pub fn new(id: impl Into<String>, fee: Decimal, instant: bool, uptime: Decimal) -> Self {
        Self {
            id: ProviderId::new(id),
            fee,
            instant,
            uptime,
            supports_collect: true,
            supports_disburse: true,
        }
    }

    /// Restrict the provider to collections only.
    #[must_use]
    pub fn collect_only(mut self) -> Self {
        self.supports_disburse = false;
        self
    }
}

/// Ordered, immutable set of provider profiles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderTable {
    providers: Vec<ProviderProfile>,
}

impl ProviderTable {
    #[must_use]
    pub fn new(providers: Vec<ProviderProfile>) -> Self {
        Self { providers }
    }

    #[must_use]
    pub fn get(&self, id: &ProviderId) -> Option<&ProviderProfile> {
        self.providers.iter().find(|p| &p.id == id)
    }

    #[must_use]
    pub fn contains(&self, id: &ProviderId) -> bool {
        self.get(id).is_some()
    }

    /// Profiles in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &ProviderProfile> {
        self.providers.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Fees and uptimes must be fractions; ids must be unique.
    pub fn validate(&self) -> Result<()> {
        for (i, profile) in self.providers.iter().enumerate() {
            if profile.fee < Decimal::ZERO || profile.fee > Decimal::ONE {
                return Err(EscrowPayError::Configuration(format!(
                    "provider {}: fee {} outside [0, 1]",
                    profile.id, profile.fee
                )));
            }
            if profile.uptime < Decimal::ZERO || profile.uptime > Decimal::ONE {
                return Err(EscrowPayError::Configuration(format!(
                    "provider {}: uptime {} outside [0, 1]",
                    profile.id, profile.uptime
                )));
            }
            if self.providers[..i].iter().any(|p| p.id == profile.id) {
                return Err(EscrowPayError::Configuration(format!(
                    "provider {} declared twice",
                    profile.id
                )));
            }
        }
        Ok(())
    }
}

impl Default for ProviderTable {
    /// Rwanda launch set: two mobile-money rails, bank transfer and cards.
    fn default() -> Self {
        Self::new(vec![
            ProviderProfile::new("mtn_momo", Decimal::new(15, 3), true, Decimal::new(98, 2)),
            ProviderProfile::new("airtel_money", Decimal::new(15, 3), true, Decimal::new(95, 2)),
            ProviderProfile::new("bank_transfer", Decimal::new(5, 3), false, Decimal::new(995, 3)),
            ProviderProfile::new("card", Decimal::new(29, 3), true, Decimal::new(99, 2))
                .collect_only(),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_is_valid_and_ordered() {
        let table = ProviderTable::default();
        table.validate().unwrap();
        let ids: Vec<_> = table.iter().map(|p| p.id.as_str().to_string()).collect();
        assert_eq!(ids, ["mtn_momo", "airtel_money", "bank_transfer", "card"]);
        assert!(!table.get(&ProviderId::from("card")).unwrap().supports_disburse);
    }

    #[test]
    fn duplicate_ids_rejected() {
        let table = ProviderTable::new(vec![
            ProviderProfile::new("a", Decimal::ZERO, true, Decimal::ONE),
            ProviderProfile::new("a", Decimal::ZERO, true, Decimal::ONE),
        ]);
        assert!(matches!(
            table.validate(),
            Err(EscrowPayError::Configuration(_))
        ));
    }

    #[test]
    fn fee_out_of_range_rejected() {
        let table =
            ProviderTable::new(vec![ProviderProfile::new("a", Decimal::TWO, true, Decimal::ONE)]);
        assert!(table.validate().is_err());
    }

    #[test]
    fn capability_flags_default_to_true_in_json() {
        let json = r#"[{"id":"x","fee":"0.01","instant":true,"uptime":"0.9"}]"#;
        let table: ProviderTable = serde_json::from_str(json).unwrap();
        let p = table.get(&ProviderId::from("x")).unwrap();
        assert!(p.supports_collect && p.supports_disburse);
    }
}
