//! The approval service: gate check, then the matching transaction.
//!
//! Flow per request:
//! 1. Load the file and its prior approvals.
//! 2. Run the pure approval gate.
//! 3. Apply the matching transaction: denial → decision record only;
//!    partial → status + decision; full → status + reservation + decision +
//!    execution enqueue, atomically.
//! 4. Append the decision (and `file.approved` on completion) to the audit
//!    log.
//!
//! A reservation shortfall rolls the approval back: the file stays where it
//! was and the caller gets a structured `insufficient_funds` denial.

use anyhow::{anyhow, Context, Result};
use mpe_approval::{check_approval, ApprovalGate, Approver, FileView, PriorApproval};
use mpe_audit::{topics, DecisionLog};
use mpe_db::files::{self, NewApproval};
use mpe_ledger::{Amount, CurrencyCode};
use mpe_schemas::FileApproved;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::state::EngineState;

/// Wire response of the approval API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalResponse {
    /// approved | partially_approved | denied
    pub status: &'static str,
    pub reason: Option<String>,
}

pub async fn approve_file(
    pool: &PgPool,
    audit: &mut DecisionLog,
    state: &EngineState,
    user: &Approver,
    file_id: Uuid,
) -> Result<ApprovalResponse> {
    let file = files::fetch_file(pool, file_id).await?;

    let view = FileView {
        file_id: file.file_id,
        client_id: file.client_id,
        created_by: file.created_by,
        currency: CurrencyCode::new(&file.currency).map_err(|e| anyhow!("{e}"))?,
        total_amount: Amount::from_micros(file.total_micros)
            .ok_or_else(|| anyhow!("file {file_id} has negative total"))?,
        status: file.status,
        has_validation_errors: file.error_count > 0,
    };

    let prior: Vec<PriorApproval> = files::fetch_prior_approvers(pool, file_id)
        .await?
        .into_iter()
        .map(|decided_by| PriorApproval { decided_by })
        .collect();

    let policy = state.approval_policy_for(file.client_id);
    let gate = check_approval(user, &view, &prior, &state.limit_table, &policy);
    let decision = gate.to_decision(file_id, user.user_id);
    let record = NewApproval {
        approval_id: decision.approval_id,
        file_id,
        decided_by: decision.decided_by,
        decided_at_utc: decision.decided_at,
        outcome: decision.outcome.as_str().to_string(),
        tier_limit_micros: decision.tier_limit.map(|a| a.micros()),
        denial_code: decision.denial_code.map(str::to_string),
    };

    let response = match &gate {
        ApprovalGate::Denied { reason } => {
            files::insert_approval(pool, &record).await?;
            warn!(%file_id, approver = %user.user_id, code = reason.code(), "approval denied");
            ApprovalResponse {
                status: "denied",
                reason: Some(reason.code().to_string()),
            }
        }
        ApprovalGate::PartiallyApproved { .. } => {
            files::partially_approve_file_tx(pool, file_id, &record).await?;
            info!(%file_id, approver = %user.user_id, "first of two approvals recorded");
            ApprovalResponse {
                status: "partially_approved",
                reason: None,
            }
        }
        ApprovalGate::Approved { .. } => {
            match files::approve_file_tx(pool, file_id, file.status, &record).await {
                Ok(()) => {
                    info!(%file_id, approver = %user.user_id, "file approved, funds reserved");
                    let payload = FileApproved {
                        file_id,
                        client_id: file.client_id,
                        currency: file.currency.clone(),
                        total_amount: view.total_amount.to_string(),
                        approved_by: user.user_id,
                    };
                    audit
                        .append(
                            file.client_id,
                            topics::FILES,
                            "file.approved",
                            serde_json::to_value(&payload).context("serialize file.approved")?,
                        )
                        .context("audit file.approved")?;
                    ApprovalResponse {
                        status: "approved",
                        reason: None,
                    }
                }
                Err(e) if mpe_db::is_insufficient_funds(&e) => {
                    warn!(%file_id, "approval rolled back: insufficient funds");
                    ApprovalResponse {
                        status: "denied",
                        reason: Some("insufficient_funds".to_string()),
                    }
                }
                Err(e) => return Err(e),
            }
        }
    };

    // The audit entry reflects the landed outcome — a rolled-back
    // reservation logs as a denial, not as the gate's verdict.
    audit
        .append(
            file.client_id,
            topics::APPROVALS,
            "approval.decided",
            serde_json::json!({
                "file_id": file_id,
                "decided_by": user.user_id,
                "outcome": response.status,
                "reason": response.reason.clone(),
                "tier_limit_micros": record.tier_limit_micros,
            }),
        )
        .context("audit approval decision")?;

    Ok(response)
}
