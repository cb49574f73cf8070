//! Tiered authorization limits.
//!
//! The limit table maps `(role, currency) → amount`. A user's effective
//! limit for a currency is the maximum across their roles — unless a
//! user-specific override exists, which wins outright (it can lower as well
//! as raise the role-derived limit). The table is data: roles and currencies
//! are plain strings supplied by configuration.

use std::collections::BTreeMap;

use mpe_ledger::{Amount, CurrencyCode};
use serde::{Deserialize, Serialize};

/// One `(role, currency) → limit` row, as configured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitRule {
    pub role: String,
    pub currency: String,
    /// Decimal string, parsed with the fixed-point rules.
    pub limit: String,
}

/// Lookup table keyed by (role, currency).
#[derive(Debug, Clone, Default)]
pub struct LimitTable {
    limits: BTreeMap<(String, String), Amount>,
}

impl LimitTable {
    /// Build from configured rules. Rows with malformed currencies or
    /// amounts are dropped rather than taking the table down.
    pub fn from_rules(rules: impl IntoIterator<Item = LimitRule>) -> Self {
        let mut limits = BTreeMap::new();
        for rule in rules {
            let currency = match CurrencyCode::new(&rule.currency) {
                Ok(c) => c,
                Err(_) => continue,
            };
            let amount = match Amount::parse(&rule.limit) {
                Ok(a) => a,
                Err(_) => continue,
            };
            limits.insert((rule.role.clone(), currency.as_str().to_string()), amount);
        }
        Self { limits }
    }

    /// Insert a single entry (test/config convenience).
    pub fn insert(&mut self, role: &str, currency: &CurrencyCode, limit: Amount) {
        self.limits
            .insert((role.to_string(), currency.as_str().to_string()), limit);
    }

    pub fn get(&self, role: &str, currency: &CurrencyCode) -> Option<Amount> {
        self.limits
            .get(&(role.to_string(), currency.as_str().to_string()))
            .copied()
    }

    /// Resolve a user's effective limit: max over `roles`, overridden by
    /// `limit_override` when present. `None` means no role grants any limit
    /// in this currency and no override exists.
    pub fn resolve(
        &self,
        roles: &[String],
        currency: &CurrencyCode,
        limit_override: Option<Amount>,
    ) -> Option<Amount> {
        if let Some(o) = limit_override {
            return Some(o);
        }
        roles
            .iter()
            .filter_map(|r| self.get(r, currency))
            .max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usd() -> CurrencyCode {
        CurrencyCode::new("USD").unwrap()
    }

    fn units(n: i64) -> Amount {
        Amount::from_units(n).unwrap()
    }

    fn table() -> LimitTable {
        LimitTable::from_rules([
            LimitRule {
                role: "approver".to_string(),
                currency: "USD".to_string(),
                limit: "500.00".to_string(),
            },
            LimitRule {
                role: "senior_approver".to_string(),
                currency: "USD".to_string(),
                limit: "5000.00".to_string(),
            },
            LimitRule {
                role: "approver".to_string(),
                currency: "EUR".to_string(),
                limit: "400.00".to_string(),
            },
        ])
    }

    #[test]
    fn max_across_roles_wins() {
        let roles = vec!["approver".to_string(), "senior_approver".to_string()];
        assert_eq!(table().resolve(&roles, &usd(), None), Some(units(5_000)));
    }

    #[test]
    fn single_role_resolves_directly() {
        let roles = vec!["approver".to_string()];
        assert_eq!(table().resolve(&roles, &usd(), None), Some(units(500)));
    }

    #[test]
    fn override_wins_even_when_lower() {
        let roles = vec!["senior_approver".to_string()];
        assert_eq!(
            table().resolve(&roles, &usd(), Some(units(100))),
            Some(units(100))
        );
    }

    #[test]
    fn no_limit_for_unknown_currency() {
        let roles = vec!["approver".to_string()];
        let gbp = CurrencyCode::new("GBP").unwrap();
        assert_eq!(table().resolve(&roles, &gbp, None), None);
    }

    #[test]
    fn unknown_role_grants_nothing() {
        let roles = vec!["viewer".to_string()];
        assert_eq!(table().resolve(&roles, &usd(), None), None);
    }

    #[test]
    fn malformed_rules_are_dropped() {
        let t = LimitTable::from_rules([
            LimitRule {
                role: "approver".to_string(),
                currency: "DOLLARS".to_string(),
                limit: "500.00".to_string(),
            },
            LimitRule {
                role: "approver".to_string(),
                currency: "USD".to_string(),
                limit: "-1".to_string(),
            },
        ]);
        assert_eq!(t.get("approver", &usd()), None);
    }
}
