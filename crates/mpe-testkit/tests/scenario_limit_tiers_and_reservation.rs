//! The tiered-limit scenarios: a 1,000.00 USD file against a 500.00 limit
//! is refused with LimitExceeded; against a 2,000.00 limit it approves and
//! the reservation lands on the funding account.

use mpe_approval::{check_approval, ApprovalGate, ApprovalPolicy, DenialReason};
use mpe_ledger::{Amount, FundingAccount};
use mpe_lifecycle::{apply_approval, ApprovalVerdict, Effect, FileStatus};
use mpe_testkit::{approver_with_role, limits_single, FileFixture};

fn units(n: i64) -> Amount {
    Amount::from_units(n).unwrap()
}

#[test]
fn scenario_limit_500_refuses_1000_file() {
    let fixture = FileFixture::uniform("USD", 10, "100.00");
    let view = fixture.view(FileStatus::AwaitingApproval, fixture.declared_total());

    let approver = approver_with_role(77, fixture.client_id, "approver");
    let limits = limits_single("approver", &fixture.currency, units(500));

    let gate = check_approval(&approver, &view, &[], &limits, &ApprovalPolicy::default());
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
fn scenario_limit_2000_approves_and_reserves_1000() {
    let fixture = FileFixture::uniform("USD", 10, "100.00");
    let total = fixture.declared_total();
    let view = fixture.view(FileStatus::AwaitingApproval, total);

    let approver = approver_with_role(77, fixture.client_id, "approver");
    let limits = limits_single("approver", &fixture.currency, units(2_000));

    let gate = check_approval(&approver, &view, &[], &limits, &ApprovalPolicy::default());
    assert_eq!(gate, ApprovalGate::Approved { tier: units(2_000) });

    let mut account = FundingAccount::new(units(3_000));
    let before_reserved = account.reserved();

    let transition = apply_approval(view.status, ApprovalVerdict::Full, total).unwrap();
    for effect in &transition.effects {
        if let Effect::ReserveFunds { amount } = effect {
            account.reserve(*amount).unwrap();
        }
    }

    assert_eq!(transition.next, FileStatus::Approved);
    assert_eq!(
        account.reserved().checked_sub(before_reserved),
        Some(units(1_000))
    );
    assert_eq!(account.available(), units(2_000));
}

#[test]
fn scenario_insufficient_funds_aborts_the_approval_transition() {
    let fixture = FileFixture::uniform("USD", 10, "100.00");
    let total = fixture.declared_total();

    // Account cannot cover the file; the reserve effect fails and the
    // caller must abandon the transition — the file never leaves
    // awaiting_approval and nothing is held.
    let mut account = FundingAccount::new(units(400));
    let transition = apply_approval(FileStatus::AwaitingApproval, ApprovalVerdict::Full, total).unwrap();

    let reserve_result = transition.effects.iter().find_map(|e| match e {
        Effect::ReserveFunds { amount } => Some(account.reserve(*amount)),
        _ => None,
    });
    assert!(matches!(
        reserve_result,
        Some(Err(mpe_ledger::LedgerError::InsufficientFunds { .. }))
    ));
    assert_eq!(account.reserved(), Amount::ZERO);
    assert_eq!(account.available(), units(400));
}
