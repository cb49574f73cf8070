//! Engine state assembled from configuration.
//!
//! One immutable value wires the whole worker: rule tables, limit tables,
//! policies, and execution tuning, all derived from the layered config at
//! boot. Workers clone it freely; nothing here is mutable at runtime.

use std::collections::HashMap;

use anyhow::{Context, Result};
use mpe_approval::{ApprovalPolicy, LimitRule, LimitTable};
use mpe_config::{extract_engine_config, AuditSection, LoadedConfig};
use mpe_execution::RetryPolicy;
use mpe_ledger::Amount;
use mpe_validation::{CurrencyRule, CurrencyRuleTable, ValidationPolicy};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EngineState {
    pub config_hash: String,
    pub validation_policy: ValidationPolicy,
    pub rule_table: CurrencyRuleTable,
    pub limit_table: LimitTable,
    /// Tenant-wide default; per-tenant overrides win.
    default_dual_threshold: Option<Amount>,
    tenant_dual_thresholds: HashMap<Uuid, Amount>,
    pub chunk_size: usize,
    pub retry: RetryPolicy,
    pub processing_timeout_secs: u64,
    pub audit: AuditSection,
}

impl EngineState {
    pub fn from_loaded(loaded: &LoadedConfig) -> Result<Self> {
        let engine = extract_engine_config(&loaded.config_json)?;

        // Currency rules: `/currency_rules` array, else the builtin table.
        let rule_table = match loaded.config_json.get("currency_rules") {
            Some(v) => {
                let rules: Vec<CurrencyRule> = serde_json::from_value(v.clone())
                    .context("currency_rules section malformed")?;
                CurrencyRuleTable::from_rules(rules)
            }
            None => CurrencyRuleTable::builtin(),
        };

        // Approval limits: `/limits` array, else empty (deny-by-default).
        let limit_table = match loaded.config_json.get("limits") {
            Some(v) => {
                let rules: Vec<LimitRule> =
                    serde_json::from_value(v.clone()).context("limits section malformed")?;
                LimitTable::from_rules(rules)
            }
            None => LimitTable::default(),
        };

        let default_dual_threshold = engine
            .approval
            .dual_approval_threshold
            .as_deref()
            .map(|s| Amount::parse(s).context("dual_approval_threshold malformed"))
            .transpose()?;

        // Per-tenant thresholds: `/approval/tenant_thresholds/{uuid} = "amount"`.
        let mut tenant_dual_thresholds = HashMap::new();
        if let Some(map) = loaded
            .config_json
            .pointer("/approval/tenant_thresholds")
            .and_then(|v| v.as_object())
        {
            for (key, value) in map {
                let tenant: Uuid = key
                    .parse()
                    .with_context(|| format!("tenant_thresholds key {key:?} is not a uuid"))?;
                let raw = value
                    .as_str()
                    .with_context(|| format!("tenant_thresholds[{key}] must be a string"))?;
                let amount = Amount::parse(raw)
                    .with_context(|| format!("tenant_thresholds[{key}] malformed"))?;
                tenant_dual_thresholds.insert(tenant, amount);
            }
        }

        Ok(Self {
            config_hash: loaded.config_hash.clone(),
            validation_policy: ValidationPolicy {
                max_rows: engine.validation.max_rows,
            },
            rule_table,
            limit_table,
            default_dual_threshold,
            tenant_dual_thresholds,
            chunk_size: engine.execution.chunk_size,
            retry: RetryPolicy {
                max_attempts: engine.execution.retry_max_attempts,
                base_delay: Duration::from_millis(engine.execution.retry_base_delay_ms),
                max_delay: Duration::from_millis(engine.execution.retry_max_delay_ms),
            },
            processing_timeout_secs: engine.execution.processing_timeout_secs,
            audit: engine.audit,
        })
    }

    /// The approval policy for one tenant.
    pub fn approval_policy_for(&self, client_id: Uuid) -> ApprovalPolicy {
        ApprovalPolicy {
            dual_approval_threshold: self
                .tenant_dual_thresholds
                .get(&client_id)
                .copied()
                .or(self.default_dual_threshold),
        }
    }
}
