//! Approval domain types.

use chrono::{DateTime, Utc};
use mpe_ledger::{Amount, CurrencyCode};
use mpe_lifecycle::FileStatus;
use uuid::Uuid;

/// The approving user, as the gate needs to see them. Tenant id is threaded
/// explicitly — never inferred from ambient context.
#[derive(Debug, Clone)]
pub struct Approver {
    pub user_id: Uuid,
    pub client_id: Uuid,
    pub roles: Vec<String>,
    /// User-specific limit; overrides any role-derived limit outright.
    pub limit_override: Option<Amount>,
}

/// Read-only projection of the file under approval.
#[derive(Debug, Clone)]
pub struct FileView {
    pub file_id: Uuid,
    pub client_id: Uuid,
    pub created_by: Uuid,
    pub currency: CurrencyCode,
    pub total_amount: Amount,
    pub status: FileStatus,
    pub has_validation_errors: bool,
}

/// A prior approval on the same file (dual-approval bookkeeping).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorApproval {
    pub decided_by: Uuid,
}

/// Why an approval was denied. Every variant is a structured, enumerable
/// reason; internal detail never leaks to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenialReason {
    WrongTenant,
    WrongState { status: FileStatus },
    ValidationErrors,
    SelfApproval,
    RepeatApprover,
    NoLimitForCurrency { currency: String },
    LimitExceeded { limit: Amount, total: Amount },
}

impl DenialReason {
    /// Stable machine-readable code, persisted and returned by the API.
    pub fn code(&self) -> &'static str {
        match self {
            DenialReason::WrongTenant => "wrong_tenant",
            DenialReason::WrongState { .. } => "wrong_state",
            DenialReason::ValidationErrors => "validation_errors",
            DenialReason::SelfApproval => "self_approval",
            DenialReason::RepeatApprover => "repeat_approver",
            DenialReason::NoLimitForCurrency { .. } => "no_limit_for_currency",
            DenialReason::LimitExceeded { .. } => "limit_exceeded",
        }
    }
}

impl std::fmt::Display for DenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DenialReason::WrongTenant => write!(f, "approver belongs to a different tenant"),
            DenialReason::WrongState { status } => {
                write!(f, "file is not awaiting approval (status: {status})")
            }
            DenialReason::ValidationErrors => write!(f, "file has validation errors"),
            DenialReason::SelfApproval => write!(f, "creator cannot approve their own file"),
            DenialReason::RepeatApprover => {
                write!(f, "second approval must come from a different user")
            }
            DenialReason::NoLimitForCurrency { currency } => {
                write!(f, "approver has no limit configured for {currency}")
            }
            DenialReason::LimitExceeded { limit, total } => {
                write!(f, "file total {total} exceeds approval limit {limit}")
            }
        }
    }
}

/// Recorded for every decision — approvals and denials alike — so the audit
/// trail survives independently of the file's resulting status.
#[derive(Debug, Clone)]
pub struct ApprovalDecision {
    pub approval_id: Uuid,
    pub file_id: Uuid,
    pub decided_by: Uuid,
    pub decided_at: DateTime<Utc>,
    pub outcome: DecisionOutcome,
    /// The resolved authorization tier (the approver's limit) when one was
    /// computed.
    pub tier_limit: Option<Amount>,
    pub denial_code: Option<&'static str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionOutcome {
    Approved,
    PartiallyApproved,
    Denied,
}

impl DecisionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionOutcome::Approved => "approved",
            DecisionOutcome::PartiallyApproved => "partially_approved",
            DecisionOutcome::Denied => "denied",
        }
    }
}
