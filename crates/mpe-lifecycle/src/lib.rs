//! File and instruction lifecycle state machines.
//!
//! Pure transition functions returning the next status plus side-effect
//! commands; callers apply both in one transaction. No IO, no clock.

pub mod file;
pub mod instruction;

pub use file::{
    apply_approval, begin_processing, begin_validation, cancel, complete_processing,
    complete_validation, fail_validation, ApprovalVerdict, Effect, EventKind, FileStatus,
    Transition, TransitionError,
};
pub use instruction::{InstructionStatus, InvalidInstructionTransition};
