//! Payment rail seam.
//!
//! The settlement call is an external collaborator: this module only fixes
//! the contract. Implementations must be idempotent per instruction id —
//! the orchestrator retries transient failures with the same instruction,
//! and a rail that double-settles on retry is in breach of contract.

use mpe_ledger::{Amount, CurrencyCode};
use uuid::Uuid;

/// One instruction as the rail needs to see it.
#[derive(Debug, Clone)]
pub struct ExecInstruction {
    pub instruction_id: Uuid,
    pub row_ordinal: u32,
    pub beneficiary_ref: String,
    pub amount: Amount,
    pub currency: CurrencyCode,
    pub purpose_code: Option<String>,
}

/// Successful settlement: the rail's opaque reference for the transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RailReceipt {
    pub external_ref: String,
}

/// Rail failures, split by retryability. `Transient` is retried with
/// backoff; `Fatal` marks the instruction failed immediately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RailError {
    Transient(String),
    Fatal(String),
}

impl std::fmt::Display for RailError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RailError::Transient(m) => write!(f, "transient rail error: {m}"),
            RailError::Fatal(m) => write!(f, "fatal rail error: {m}"),
        }
    }
}

impl std::error::Error for RailError {}

/// Trait all settlement rails implement (live, sandbox, scripted test rail).
pub trait RailExecutor {
    fn execute(&self, instruction: &ExecInstruction) -> Result<RailReceipt, RailError>;
}
