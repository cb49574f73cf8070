//! Validation verdict types.

use mpe_ledger::{Amount, CurrencyCode};
use serde::{Deserialize, Serialize};

/// Machine-readable error codes, persisted as strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    MissingField,
    InvalidAmount,
    CurrencyMismatch,
    DuplicateRow,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::MissingField => "missing_field",
            ErrorCode::InvalidAmount => "invalid_amount",
            ErrorCode::CurrencyMismatch => "currency_mismatch",
            ErrorCode::DuplicateRow => "duplicate_row",
        }
    }
}

/// One structured row-level validation error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowError {
    pub row_number: u32,
    pub field: String,
    pub code: ErrorCode,
    pub message: String,
}

impl RowError {
    pub fn new(row_number: u32, field: &str, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            row_number,
            field: field.to_string(),
            code,
            message: message.into(),
        }
    }
}

/// A row that passed validation, ready to become a payment instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionCandidate {
    pub row_ordinal: u32,
    pub beneficiary_ref: String,
    pub amount: Amount,
    pub currency: CurrencyCode,
    pub purpose_code: Option<String>,
    pub invoice_number: Option<String>,
}

/// Per-file validation outcome: every row gets either a candidate or at
/// least one entry in `row_errors`; nothing aborts the batch.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub total_rows: usize,
    pub valid_rows: usize,
    pub error_rows: usize,
    pub row_errors: Vec<RowError>,
    pub candidates: Vec<InstructionCandidate>,
    /// Sum of candidate amounts; `None` when the sum overflows (treated by
    /// the lifecycle guard as a consistency violation, never corrected).
    pub computed_total: Option<Amount>,
}

impl ValidationReport {
    /// All rows valid (and at least one row).
    pub fn all_passed(&self) -> bool {
        self.error_rows == 0 && self.total_rows > 0
    }

    /// Not a single row survived.
    pub fn none_passed(&self) -> bool {
        self.valid_rows == 0
    }
}

/// Whole-batch rejections: the only cases where validation refuses to
/// produce per-row verdicts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchRejection {
    EmptyFile,
    TooManyRows { count: usize, cap: usize },
    /// File currency has no entry in the rule table.
    UnsupportedCurrency(String),
}

impl std::fmt::Display for BatchRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyFile => write!(f, "file contains no rows"),
            Self::TooManyRows { count, cap } => {
                write!(f, "file has {count} rows, cap is {cap}")
            }
            Self::UnsupportedCurrency(c) => write!(f, "unsupported file currency: {c}"),
        }
    }
}

impl std::error::Error for BatchRejection {}
