//! Worker runtime: outbox-driven validation and execution, the approval
//! service, and operational sweeps.

pub mod approve;
pub mod paper_rail;
pub mod stale;
pub mod state;
pub mod worker;

pub use approve::{approve_file, ApprovalResponse};
pub use paper_rail::PaperRail;
pub use stale::{recover_stale_claims, scan_stuck_files};
pub use state::EngineState;
pub use worker::Worker;
