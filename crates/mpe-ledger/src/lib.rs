//! Fixed-point money, currency codes, and the funding-account ledger.
//!
//! Everything in this crate is pure and deterministic — no IO, no clock,
//! no randomness. The persisted ledger (mpe-db) mirrors the same guards as
//! single-statement SQL updates; this crate is the reference model and the
//! in-process implementation.

pub mod account;
pub mod book;
pub mod currency;
pub mod fixedpoint;

pub use account::{AccountSnapshot, FundingAccount, LedgerError};
pub use book::{AccountBook, BookError};
pub use currency::{CurrencyCode, InvalidCurrency};
pub use fixedpoint::{Amount, AmountParseError, AMOUNT_SCALE};
