//! Funding account ledger — reserve / release / settle mechanics.
//!
//! # Purpose
//!
//! A [`FundingAccount`] tracks three balances for the account that funds a
//! payment file:
//!
//! - `balance` — money the account actually holds,
//! - `reserved` — money held against approved-but-unsettled files,
//! - `available` — derived, always `balance − reserved`.
//!
//! The write surface is exactly three operations (`reserve`, `release`,
//! `settle`); each enforces its guard and mutates nothing on error, so the
//! invariants
//!
//! - `available = balance − reserved`
//! - `available ≥ 0`
//! - `reserved ≥ 0`
//!
//! hold after every call. Reservation happens once per file, at approval
//! time, for the full declared total; execution later settles succeeded
//! instructions and releases failed ones.
//!
//! # Determinism
//!
//! `FundingAccount` is deterministic and pure — no IO, no time, no
//! randomness. The persisted counterpart (mpe-db) performs the same guards
//! as single SQL statements; this model is the unit-testable reference.

use crate::fixedpoint::Amount;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// All guard violations the funding ledger can surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// `reserve(amount)` with `amount > available`.
    InsufficientFunds { requested: Amount, available: Amount },
    /// `release(amount)` with `amount > reserved`.
    OverRelease { requested: Amount, reserved: Amount },
    /// `settle(amount)` with `amount > reserved`.
    OverSettle { requested: Amount, reserved: Amount },
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InsufficientFunds {
                requested,
                available,
            } => write!(
                f,
                "ledger guard: insufficient funds, requested {requested} but available {available}"
            ),
            Self::OverRelease { requested, reserved } => write!(
                f,
                "ledger guard: release {requested} exceeds reserved {reserved}"
            ),
            Self::OverSettle { requested, reserved } => write!(
                f,
                "ledger guard: settle {requested} exceeds reserved {reserved}"
            ),
        }
    }
}

impl std::error::Error for LedgerError {}

// ---------------------------------------------------------------------------
// Snapshot (read-only view)
// ---------------------------------------------------------------------------

/// Point-in-time read-only view of an account's balances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountSnapshot {
    pub balance: Amount,
    pub reserved: Amount,
    pub available: Amount,
}

// ---------------------------------------------------------------------------
// FundingAccount
// ---------------------------------------------------------------------------

/// The mutable balance state of one funding account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FundingAccount {
    balance: Amount,
    reserved: Amount,
}

impl FundingAccount {
    /// Open an account with an initial balance and nothing reserved.
    pub fn new(balance: Amount) -> Self {
        Self {
            balance,
            reserved: Amount::ZERO,
        }
    }

    pub fn balance(&self) -> Amount {
        self.balance
    }

    pub fn reserved(&self) -> Amount {
        self.reserved
    }

    /// `balance − reserved`. Never negative: `reserved` only grows through
    /// `reserve`, which checks this same quantity.
    pub fn available(&self) -> Amount {
        self.balance
            .checked_sub(self.reserved)
            .unwrap_or(Amount::ZERO)
    }

    pub fn snapshot(&self) -> AccountSnapshot {
        AccountSnapshot {
            balance: self.balance,
            reserved: self.reserved,
            available: self.available(),
        }
    }

    // -----------------------------------------------------------------------
    // Write surface
    // -----------------------------------------------------------------------

    /// Move `amount` from available to reserved.
    ///
    /// # Errors
    /// [`LedgerError::InsufficientFunds`] if `available < amount`; the
    /// account is not mutated on error.
    pub fn reserve(&mut self, amount: Amount) -> Result<(), LedgerError> {
        let available = self.available();
        if amount > available {
            return Err(LedgerError::InsufficientFunds {
                requested: amount,
                available,
            });
        }
        // available >= amount implies reserved + amount <= balance <= i64::MAX.
        self.reserved = self
            .reserved
            .checked_add(amount)
            .expect("reserved bounded by balance");
        Ok(())
    }

    /// Move `amount` from reserved back to available.
    ///
    /// # Errors
    /// [`LedgerError::OverRelease`] if `amount > reserved`.
    pub fn release(&mut self, amount: Amount) -> Result<(), LedgerError> {
        match self.reserved.checked_sub(amount) {
            Some(rest) => {
                self.reserved = rest;
                Ok(())
            }
            None => Err(LedgerError::OverRelease {
                requested: amount,
                reserved: self.reserved,
            }),
        }
    }

    /// Final debit: reduce both `balance` and `reserved` by `amount`.
    ///
    /// # Errors
    /// [`LedgerError::OverSettle`] if `amount > reserved`. `reserved ≤
    /// balance` is an invariant, so the balance debit cannot underflow once
    /// the reserved guard passes.
    pub fn settle(&mut self, amount: Amount) -> Result<(), LedgerError> {
        let rest_reserved = match self.reserved.checked_sub(amount) {
            Some(r) => r,
            None => {
                return Err(LedgerError::OverSettle {
                    requested: amount,
                    reserved: self.reserved,
                })
            }
        };
        self.balance = self
            .balance
            .checked_sub(amount)
            .expect("reserved never exceeds balance");
        self.reserved = rest_reserved;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn units(n: i64) -> Amount {
        Amount::from_units(n).unwrap()
    }

    fn account(balance_units: i64) -> FundingAccount {
        FundingAccount::new(units(balance_units))
    }

    // --- reserve ---

    #[test]
    fn reserve_moves_available_to_reserved() {
        let mut a = account(1_000);
        a.reserve(units(400)).unwrap();
        assert_eq!(a.balance(), units(1_000));
        assert_eq!(a.reserved(), units(400));
        assert_eq!(a.available(), units(600));
    }

    #[test]
    fn reserve_exact_available_succeeds() {
        let mut a = account(500);
        a.reserve(units(500)).unwrap();
        assert_eq!(a.available(), Amount::ZERO);
    }

    #[test]
    fn reserve_beyond_available_fails_without_mutation() {
        let mut a = account(100);
        let err = a.reserve(units(101)).unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientFunds {
                requested: units(101),
                available: units(100),
            }
        );
        assert_eq!(a.snapshot(), account(100).snapshot());
    }

    #[test]
    fn second_reserve_checks_remaining_available() {
        let mut a = account(100);
        a.reserve(units(80)).unwrap();
        let err = a.reserve(units(30)).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds { .. }));
    }

    // --- release ---

    #[test]
    fn release_returns_funds_to_available() {
        let mut a = account(1_000);
        a.reserve(units(400)).unwrap();
        a.release(units(150)).unwrap();
        assert_eq!(a.reserved(), units(250));
        assert_eq!(a.available(), units(750));
        assert_eq!(a.balance(), units(1_000));
    }

    #[test]
    fn over_release_fails() {
        let mut a = account(1_000);
        a.reserve(units(100)).unwrap();
        let err = a.release(units(101)).unwrap_err();
        assert_eq!(
            err,
            LedgerError::OverRelease {
                requested: units(101),
                reserved: units(100),
            }
        );
    }

    // --- settle ---

    #[test]
    fn settle_debits_balance_and_reserved() {
        let mut a = account(1_000);
        a.reserve(units(400)).unwrap();
        a.settle(units(400)).unwrap();
        assert_eq!(a.balance(), units(600));
        assert_eq!(a.reserved(), Amount::ZERO);
        assert_eq!(a.available(), units(600));
    }

    #[test]
    fn partial_settle_leaves_remainder_reserved() {
        let mut a = account(1_000);
        a.reserve(units(400)).unwrap();
        a.settle(units(100)).unwrap();
        assert_eq!(a.balance(), units(900));
        assert_eq!(a.reserved(), units(300));
    }

    #[test]
    fn over_settle_fails_without_mutation() {
        let mut a = account(1_000);
        a.reserve(units(100)).unwrap();
        let before = a.snapshot();
        let err = a.settle(units(200)).unwrap_err();
        assert_eq!(
            err,
            LedgerError::OverSettle {
                requested: units(200),
                reserved: units(100),
            }
        );
        assert_eq!(a.snapshot(), before);
    }

    // --- invariants across mixed sequences ---

    #[test]
    fn available_is_balance_minus_reserved_throughout() {
        let mut a = account(1_000);
        for step in 0..5 {
            a.reserve(units(100)).unwrap();
            if step % 2 == 0 {
                a.settle(units(60)).unwrap();
            } else {
                a.release(units(40)).unwrap();
            }
            let s = a.snapshot();
            assert_eq!(
                s.available,
                s.balance.checked_sub(s.reserved).unwrap(),
                "available must equal balance - reserved"
            );
        }
    }

    #[test]
    fn file_approval_then_partial_failure_flow() {
        // Approve a 1000.00 file against a 1500.00 account, then execute
        // 900.00 of settlements and 100.00 of releases.
        let mut a = account(1_500);
        a.reserve(units(1_000)).unwrap();

        for _ in 0..9 {
            a.settle(units(100)).unwrap();
        }
        a.release(units(100)).unwrap();

        assert_eq!(a.balance(), units(600));
        assert_eq!(a.reserved(), Amount::ZERO);
        assert_eq!(a.available(), units(600));
    }
}
