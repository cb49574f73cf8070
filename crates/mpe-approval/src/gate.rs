//! Approval gate.
//!
//! Every approval MUST pass through [`check_approval`]. The gate is a pure
//! decision function — it performs no IO and mutates nothing; the resulting
//! status change, fund reservation, and decision record are applied by the
//! caller in one transaction, driven by the file lifecycle's transition
//! commands.
//!
//! Checks run in a fixed order so denials are deterministic: tenant →
//! state → validation errors → maker-checker → limit tier → dual-approval
//! bookkeeping.

use chrono::Utc;
use mpe_ledger::Amount;
use mpe_lifecycle::FileStatus;
use uuid::Uuid;

use crate::limits::LimitTable;
use crate::types::{
    ApprovalDecision, Approver, DecisionOutcome, DenialReason, FileView, PriorApproval,
};

/// Per-tenant approval policy knobs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApprovalPolicy {
    /// Files at or above this total require two independent approvals.
    /// `None` disables dual approval for the tenant.
    pub dual_approval_threshold: Option<Amount>,
}

/// Outcome of the approval gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalGate {
    /// Fully approved at the given authorization tier; the caller must apply
    /// the `Full` lifecycle verdict (reserve + enqueue + event).
    Approved { tier: Amount },
    /// First of two required approvals; the caller applies the `Partial`
    /// lifecycle verdict. No funds move yet.
    PartiallyApproved { tier: Amount },
    Denied { reason: DenialReason },
}

impl ApprovalGate {
    pub fn is_denied(&self) -> bool {
        matches!(self, ApprovalGate::Denied { .. })
    }

    /// Build the audit record for this outcome.
    pub fn to_decision(&self, file_id: Uuid, decided_by: Uuid) -> ApprovalDecision {
        let (outcome, tier_limit, denial_code) = match self {
            ApprovalGate::Approved { tier } => (DecisionOutcome::Approved, Some(*tier), None),
            ApprovalGate::PartiallyApproved { tier } => {
                (DecisionOutcome::PartiallyApproved, Some(*tier), None)
            }
            ApprovalGate::Denied { reason } => {
                (DecisionOutcome::Denied, None, Some(reason.code()))
            }
        };
        ApprovalDecision {
            approval_id: Uuid::new_v4(),
            file_id,
            decided_by,
            decided_at: Utc::now(),
            outcome,
            tier_limit,
            denial_code,
        }
    }
}

/// Decide whether `user` may approve `file`.
///
/// `prior_approvals` are the file's recorded partial approvals (empty unless
/// the file is `partially_approved`). The decision depends only on its
/// inputs; the same inputs always produce the same outcome.
pub fn check_approval(
    user: &Approver,
    file: &FileView,
    prior_approvals: &[PriorApproval],
    limits: &LimitTable,
    policy: &ApprovalPolicy,
) -> ApprovalGate {
    // Tenant isolation comes first: a cross-tenant caller learns nothing
    // about the file's state from the denial.
    if user.client_id != file.client_id {
        return ApprovalGate::Denied {
            reason: DenialReason::WrongTenant,
        };
    }

    if !matches!(
        file.status,
        FileStatus::AwaitingApproval | FileStatus::PartiallyApproved
    ) {
        return ApprovalGate::Denied {
            reason: DenialReason::WrongState {
                status: file.status,
            },
        };
    }

    if file.has_validation_errors {
        return ApprovalGate::Denied {
            reason: DenialReason::ValidationErrors,
        };
    }

    // Maker-checker: the creator is never a valid approver.
    if user.user_id == file.created_by {
        return ApprovalGate::Denied {
            reason: DenialReason::SelfApproval,
        };
    }

    let tier = match limits.resolve(&user.roles, &file.currency, user.limit_override) {
        Some(t) => t,
        None => {
            return ApprovalGate::Denied {
                reason: DenialReason::NoLimitForCurrency {
                    currency: file.currency.to_string(),
                },
            }
        }
    };

    if file.total_amount > tier {
        return ApprovalGate::Denied {
            reason: DenialReason::LimitExceeded {
                limit: tier,
                total: file.total_amount,
            },
        };
    }

    let needs_dual = policy
        .dual_approval_threshold
        .map(|t| file.total_amount >= t)
        .unwrap_or(false);

    match file.status {
        FileStatus::AwaitingApproval if needs_dual => ApprovalGate::PartiallyApproved { tier },
        FileStatus::AwaitingApproval => ApprovalGate::Approved { tier },
        FileStatus::PartiallyApproved => {
            if prior_approvals.iter().any(|p| p.decided_by == user.user_id) {
                ApprovalGate::Denied {
                    reason: DenialReason::RepeatApprover,
                }
            } else {
                ApprovalGate::Approved { tier }
            }
        }
        // Unreachable: earlier state check narrows to the two arms above.
        other => ApprovalGate::Denied {
            reason: DenialReason::WrongState { status: other },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mpe_ledger::CurrencyCode;

    fn usd() -> CurrencyCode {
        CurrencyCode::new("USD").unwrap()
    }

    fn units(n: i64) -> Amount {
        Amount::from_units(n).unwrap()
    }

    fn tenant() -> Uuid {
        Uuid::from_u128(1)
    }

    fn approver(user_id: u128) -> Approver {
        Approver {
            user_id: Uuid::from_u128(user_id),
            client_id: tenant(),
            roles: vec!["approver".to_string()],
            limit_override: None,
        }
    }

    fn file(total_units: i64, status: FileStatus) -> FileView {
        FileView {
            file_id: Uuid::from_u128(99),
            client_id: tenant(),
            created_by: Uuid::from_u128(7),
            currency: usd(),
            total_amount: units(total_units),
            status,
            has_validation_errors: false,
        }
    }

    fn limits() -> LimitTable {
        let mut t = LimitTable::default();
        t.insert("approver", &usd(), units(2_000));
        t
    }

    fn no_dual() -> ApprovalPolicy {
        ApprovalPolicy::default()
    }

    #[test]
    fn happy_path_approves_with_tier() {
        let gate = check_approval(
            &approver(2),
            &file(1_000, FileStatus::AwaitingApproval),
            &[],
            &limits(),
            &no_dual(),
        );
        assert_eq!(gate, ApprovalGate::Approved { tier: units(2_000) });
    }

    #[test]
    fn cross_tenant_denied_before_anything_else() {
        let mut user = approver(2);
        user.client_id = Uuid::from_u128(42);
        // File is in a wrong state too; tenant must be reported, not state.
        let gate = check_approval(
            &user,
            &file(1_000, FileStatus::Draft),
            &[],
            &limits(),
            &no_dual(),
        );
        assert_eq!(
            gate,
            ApprovalGate::Denied {
                reason: DenialReason::WrongTenant
            }
        );
    }

    #[test]
    fn wrong_state_denied() {
        for status in [
            FileStatus::Draft,
            FileStatus::Validating,
            FileStatus::ValidationFailed,
            FileStatus::Approved,
            FileStatus::Processing,
            FileStatus::Completed,
            FileStatus::Failed,
            FileStatus::Cancelled,
        ] {
            let gate = check_approval(&approver(2), &file(100, status), &[], &limits(), &no_dual());
            assert_eq!(
                gate,
                ApprovalGate::Denied {
                    reason: DenialReason::WrongState { status }
                },
                "status {status} should deny"
            );
        }
    }

    #[test]
    fn validation_errors_deny() {
        let mut f = file(100, FileStatus::AwaitingApproval);
        f.has_validation_errors = true;
        let gate = check_approval(&approver(2), &f, &[], &limits(), &no_dual());
        assert_eq!(
            gate,
            ApprovalGate::Denied {
                reason: DenialReason::ValidationErrors
            }
        );
    }

    #[test]
    fn creator_cannot_approve_own_file() {
        // user 7 is the creator in the fixture.
        let gate = check_approval(
            &approver(7),
            &file(100, FileStatus::AwaitingApproval),
            &[],
            &limits(),
            &no_dual(),
        );
        assert_eq!(
            gate,
            ApprovalGate::Denied {
                reason: DenialReason::SelfApproval
            }
        );
    }

    #[test]
    fn limit_exceeded_reports_both_numbers() {
        let mut t = LimitTable::default();
        t.insert("approver", &usd(), units(500));
        let gate = check_approval(
            &approver(2),
            &file(1_000, FileStatus::AwaitingApproval),
            &[],
            &t,
            &no_dual(),
        );
        assert_eq!(
            gate,
            ApprovalGate::Denied {
                reason: DenialReason::LimitExceeded {
                    limit: units(500),
                    total: units(1_000),
                }
            }
        );
    }

    #[test]
    fn total_equal_to_limit_is_allowed() {
        let mut t = LimitTable::default();
        t.insert("approver", &usd(), units(1_000));
        let gate = check_approval(
            &approver(2),
            &file(1_000, FileStatus::AwaitingApproval),
            &[],
            &t,
            &no_dual(),
        );
        assert_eq!(gate, ApprovalGate::Approved { tier: units(1_000) });
    }

    #[test]
    fn missing_limit_row_denies_with_currency() {
        let gate = check_approval(
            &approver(2),
            &file(100, FileStatus::AwaitingApproval),
            &[],
            &LimitTable::default(),
            &no_dual(),
        );
        assert_eq!(
            gate,
            ApprovalGate::Denied {
                reason: DenialReason::NoLimitForCurrency {
                    currency: "USD".to_string()
                }
            }
        );
    }

    #[test]
    fn override_can_deny_a_senior_approver() {
        let mut user = approver(2);
        user.limit_override = Some(units(50));
        let gate = check_approval(
            &user,
            &file(100, FileStatus::AwaitingApproval),
            &[],
            &limits(),
            &no_dual(),
        );
        assert!(matches!(
            gate,
            ApprovalGate::Denied {
                reason: DenialReason::LimitExceeded { .. }
            }
        ));
    }

    // --- dual approval ---

    fn dual_at(units_threshold: i64) -> ApprovalPolicy {
        ApprovalPolicy {
            dual_approval_threshold: Some(units(units_threshold)),
        }
    }

    #[test]
    fn first_approval_above_threshold_is_partial() {
        let gate = check_approval(
            &approver(2),
            &file(1_500, FileStatus::AwaitingApproval),
            &[],
            &limits(),
            &dual_at(1_000),
        );
        assert_eq!(
            gate,
            ApprovalGate::PartiallyApproved { tier: units(2_000) }
        );
    }

    #[test]
    fn threshold_boundary_requires_dual() {
        let gate = check_approval(
            &approver(2),
            &file(1_000, FileStatus::AwaitingApproval),
            &[],
            &limits(),
            &dual_at(1_000),
        );
        assert!(matches!(gate, ApprovalGate::PartiallyApproved { .. }));
    }

    #[test]
    fn below_threshold_single_approval_suffices() {
        let gate = check_approval(
            &approver(2),
            &file(999, FileStatus::AwaitingApproval),
            &[],
            &limits(),
            &dual_at(1_000),
        );
        assert!(matches!(gate, ApprovalGate::Approved { .. }));
    }

    #[test]
    fn second_distinct_approver_completes() {
        let prior = [PriorApproval {
            decided_by: Uuid::from_u128(2),
        }];
        let gate = check_approval(
            &approver(3),
            &file(1_500, FileStatus::PartiallyApproved),
            &prior,
            &limits(),
            &dual_at(1_000),
        );
        assert_eq!(gate, ApprovalGate::Approved { tier: units(2_000) });
    }

    #[test]
    fn same_user_cannot_approve_twice() {
        let prior = [PriorApproval {
            decided_by: Uuid::from_u128(2),
        }];
        let gate = check_approval(
            &approver(2),
            &file(1_500, FileStatus::PartiallyApproved),
            &prior,
            &limits(),
            &dual_at(1_000),
        );
        assert_eq!(
            gate,
            ApprovalGate::Denied {
                reason: DenialReason::RepeatApprover
            }
        );
    }

    #[test]
    fn second_approver_must_also_clear_the_limit() {
        let mut weak = approver(3);
        weak.limit_override = Some(units(100));
        let prior = [PriorApproval {
            decided_by: Uuid::from_u128(2),
        }];
        let gate = check_approval(
            &weak,
            &file(1_500, FileStatus::PartiallyApproved),
            &prior,
            &limits(),
            &dual_at(1_000),
        );
        assert!(matches!(
            gate,
            ApprovalGate::Denied {
                reason: DenialReason::LimitExceeded { .. }
            }
        ));
    }

    #[test]
    fn decision_record_carries_denial_code() {
        let gate = ApprovalGate::Denied {
            reason: DenialReason::SelfApproval,
        };
        let d = gate.to_decision(Uuid::from_u128(99), Uuid::from_u128(7));
        assert_eq!(d.outcome, DecisionOutcome::Denied);
        assert_eq!(d.denial_code, Some("self_approval"));
        assert_eq!(d.tier_limit, None);
    }

    #[test]
    fn decision_record_carries_tier_on_approval() {
        let gate = ApprovalGate::Approved { tier: units(2_000) };
        let d = gate.to_decision(Uuid::from_u128(99), Uuid::from_u128(2));
        assert_eq!(d.outcome, DecisionOutcome::Approved);
        assert_eq!(d.tier_limit, Some(units(2_000)));
    }
}
