//! Paper rail — a deterministic in-process settlement rail.
//!
//! Stands in for the live payment rail in paper deployments and end-to-end
//! tests: every instruction settles, and the external reference is derived
//! from the instruction id so reruns are reproducible.

use mpe_execution::{ExecInstruction, RailError, RailExecutor, RailReceipt};

#[derive(Debug, Default, Clone, Copy)]
pub struct PaperRail;

impl RailExecutor for PaperRail {
    fn execute(&self, instruction: &ExecInstruction) -> Result<RailReceipt, RailError> {
        Ok(RailReceipt {
            external_ref: format!("paper-{}", instruction.instruction_id.simple()),
        })
    }
}
