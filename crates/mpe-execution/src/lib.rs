//! Chunked, claim-guarded execution of approved payment files.

pub mod claim;
pub mod orchestrator;
pub mod rail;
pub mod retry;

pub use claim::ExecutionClaim;
pub use orchestrator::{
    ChunkCommitter, CommitError, ExecutionOrchestrator, ExecutionSummary, FailedInstruction,
    InstructionOutcome, OutcomeKind,
};
pub use rail::{ExecInstruction, RailError, RailExecutor, RailReceipt};
pub use retry::{NoPause, Pause, RetryPolicy, ThreadPause};
