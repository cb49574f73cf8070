//! Table-driven validation of bulk payment rows.

pub mod engine;
pub mod rules;
pub mod types;

pub use engine::{validate_rows, ValidationPolicy};
pub use rules::{CurrencyRule, CurrencyRuleTable};
pub use types::{
    BatchRejection, ErrorCode, InstructionCandidate, RowError, ValidationReport,
};
