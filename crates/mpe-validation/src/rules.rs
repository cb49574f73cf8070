//! Per-currency validation rules.
//!
//! The rule table is data, not code: adding a currency means adding a table
//! entry (in config or via [`CurrencyRuleTable::from_rules`]), never a new
//! match arm. Each rule names the row fields that must be present for that
//! currency (settlement details plus any market-specific extras) and whether
//! a purpose code is mandatory.

use std::collections::BTreeMap;

use mpe_ledger::CurrencyCode;
use serde::{Deserialize, Serialize};

/// Required-field rules for one currency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrencyRule {
    pub currency: String,
    /// Row fields that must be present and non-empty.
    pub required_fields: Vec<String>,
    /// Whether `purpose_code` is mandatory for this currency.
    #[serde(default)]
    pub purpose_code_required: bool,
}

/// Lookup table keyed by (normalized) currency code.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CurrencyRuleTable {
    rules: BTreeMap<String, CurrencyRule>,
}

impl CurrencyRuleTable {
    /// Build a table from a rule list; later duplicates win.
    ///
    /// Rules whose currency code is malformed are dropped — a bad table row
    /// must not take the whole table down.
    pub fn from_rules(rules: impl IntoIterator<Item = CurrencyRule>) -> Self {
        let mut map = BTreeMap::new();
        for rule in rules {
            if let Ok(code) = CurrencyCode::new(&rule.currency) {
                map.insert(code.as_str().to_string(), rule);
            }
        }
        Self { rules: map }
    }

    pub fn get(&self, currency: &CurrencyCode) -> Option<&CurrencyRule> {
        self.rules.get(currency.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// The default production table. Deployments override this from config;
    /// the entries here mirror the settlement schemes the system ships with.
    pub fn builtin() -> Self {
        Self::from_rules([
            CurrencyRule {
                currency: "USD".to_string(),
                required_fields: vec!["swift_code".to_string(), "account_number".to_string()],
                purpose_code_required: false,
            },
            CurrencyRule {
                currency: "EUR".to_string(),
                required_fields: vec!["iban".to_string()],
                purpose_code_required: false,
            },
            CurrencyRule {
                currency: "GBP".to_string(),
                required_fields: vec!["sort_code".to_string(), "account_number".to_string()],
                purpose_code_required: false,
            },
            CurrencyRule {
                currency: "INR".to_string(),
                required_fields: vec![
                    "swift_code".to_string(),
                    "account_number".to_string(),
                    "invoice_number".to_string(),
                ],
                purpose_code_required: true,
            },
        ])
    }
}
