//! In-process account book.
//!
//! Serializes concurrent balance mutations for files that share a funding
//! account: every operation takes the per-account mutex for the duration of
//! the guard-and-mutate only, never across an executor call. The persisted
//! deployment gets the same property from single-statement guarded SQL
//! updates; this book backs the in-memory orchestrator path and tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::account::{AccountSnapshot, FundingAccount, LedgerError};
use crate::fixedpoint::Amount;

/// Unknown-account lookups are a caller bug surfaced as an error, not a
/// panic, because account ids arrive from external input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookError {
    UnknownAccount(String),
    Ledger(LedgerError),
}

impl std::fmt::Display for BookError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownAccount(id) => write!(f, "unknown funding account: {id}"),
            Self::Ledger(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for BookError {}

impl From<LedgerError> for BookError {
    fn from(e: LedgerError) -> Self {
        BookError::Ledger(e)
    }
}

/// Thread-safe map of funding accounts keyed by account id.
#[derive(Default, Clone)]
pub struct AccountBook {
    accounts: Arc<Mutex<HashMap<String, Arc<Mutex<FundingAccount>>>>>,
}

impl AccountBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert (or replace) an account with the given opening balance.
    pub fn open_account(&self, account_id: &str, balance: Amount) {
        let mut map = self.accounts.lock().expect("account map poisoned");
        map.insert(
            account_id.to_string(),
            Arc::new(Mutex::new(FundingAccount::new(balance))),
        );
    }

    fn account(&self, account_id: &str) -> Result<Arc<Mutex<FundingAccount>>, BookError> {
        let map = self.accounts.lock().expect("account map poisoned");
        map.get(account_id)
            .cloned()
            .ok_or_else(|| BookError::UnknownAccount(account_id.to_string()))
    }

    pub fn reserve(&self, account_id: &str, amount: Amount) -> Result<(), BookError> {
        let acct = self.account(account_id)?;
        let mut guard = acct.lock().expect("account poisoned");
        guard.reserve(amount)?;
        Ok(())
    }

    pub fn release(&self, account_id: &str, amount: Amount) -> Result<(), BookError> {
        let acct = self.account(account_id)?;
        let mut guard = acct.lock().expect("account poisoned");
        guard.release(amount)?;
        Ok(())
    }

    pub fn settle(&self, account_id: &str, amount: Amount) -> Result<(), BookError> {
        let acct = self.account(account_id)?;
        let mut guard = acct.lock().expect("account poisoned");
        guard.settle(amount)?;
        Ok(())
    }

    pub fn snapshot(&self, account_id: &str) -> Result<AccountSnapshot, BookError> {
        let acct = self.account(account_id)?;
        let guard = acct.lock().expect("account poisoned");
        Ok(guard.snapshot())
    }
}
