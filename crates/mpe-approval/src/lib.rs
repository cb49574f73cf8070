//! Maker-checker approval with currency-tiered authorization limits.

pub mod gate;
pub mod limits;
pub mod types;

pub use gate::{check_approval, ApprovalGate, ApprovalPolicy};
pub use limits::{LimitRule, LimitTable};
pub use types::{
    ApprovalDecision, Approver, DecisionOutcome, DenialReason, FileView, PriorApproval,
};
