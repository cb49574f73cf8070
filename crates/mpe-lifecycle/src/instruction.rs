//! Instruction lifecycle — the per-row sub-state machine.
//!
//! Subordinate to the file lifecycle: instruction statuses only move while
//! the parent file is `processing` (the orchestrator owns them there), or to
//! `cancelled` when a pre-processing file is cancelled. Instruction failures
//! never roll back siblings.

use crate::file::TransitionError as FileTransitionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstructionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl InstructionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstructionStatus::Pending => "pending",
            InstructionStatus::Processing => "processing",
            InstructionStatus::Completed => "completed",
            InstructionStatus::Failed => "failed",
            InstructionStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Result<Self, FileTransitionError> {
        match s {
            "pending" => Ok(InstructionStatus::Pending),
            "processing" => Ok(InstructionStatus::Processing),
            "completed" => Ok(InstructionStatus::Completed),
            "failed" => Ok(InstructionStatus::Failed),
            "cancelled" => Ok(InstructionStatus::Cancelled),
            other => Err(FileTransitionError::UnknownStatus(other.to_string())),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InstructionStatus::Completed | InstructionStatus::Failed | InstructionStatus::Cancelled
        )
    }
}

impl std::fmt::Display for InstructionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidInstructionTransition {
    pub from: InstructionStatus,
    pub attempted: &'static str,
}

impl std::fmt::Display for InvalidInstructionTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid instruction transition: {} from {}",
            self.attempted, self.from
        )
    }
}

impl std::error::Error for InvalidInstructionTransition {}

/// `pending → processing`.
pub fn begin(
    current: InstructionStatus,
) -> Result<InstructionStatus, InvalidInstructionTransition> {
    match current {
        InstructionStatus::Pending => Ok(InstructionStatus::Processing),
        from => Err(InvalidInstructionTransition {
            from,
            attempted: "begin",
        }),
    }
}

/// `processing → completed`.
pub fn complete(
    current: InstructionStatus,
) -> Result<InstructionStatus, InvalidInstructionTransition> {
    match current {
        InstructionStatus::Processing => Ok(InstructionStatus::Completed),
        from => Err(InvalidInstructionTransition {
            from,
            attempted: "complete",
        }),
    }
}

/// `processing → failed`.
pub fn fail(
    current: InstructionStatus,
) -> Result<InstructionStatus, InvalidInstructionTransition> {
    match current {
        InstructionStatus::Processing => Ok(InstructionStatus::Failed),
        from => Err(InvalidInstructionTransition {
            from,
            attempted: "fail",
        }),
    }
}

/// `pending → cancelled` — only before execution touches the row.
pub fn cancel(
    current: InstructionStatus,
) -> Result<InstructionStatus, InvalidInstructionTransition> {
    match current {
        InstructionStatus::Pending => Ok(InstructionStatus::Cancelled),
        from => Err(InvalidInstructionTransition {
            from,
            attempted: "cancel",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_are_stable() {
        let expected = [
            (InstructionStatus::Pending, "pending"),
            (InstructionStatus::Processing, "processing"),
            (InstructionStatus::Completed, "completed"),
            (InstructionStatus::Failed, "failed"),
            (InstructionStatus::Cancelled, "cancelled"),
        ];
        for (status, s) in expected {
            assert_eq!(status.as_str(), s);
            assert_eq!(InstructionStatus::parse(s).unwrap(), status);
        }
    }

    #[test]
    fn happy_path() {
        let s = begin(InstructionStatus::Pending).unwrap();
        assert_eq!(complete(s).unwrap(), InstructionStatus::Completed);
    }

    #[test]
    fn failure_path() {
        let s = begin(InstructionStatus::Pending).unwrap();
        assert_eq!(fail(s).unwrap(), InstructionStatus::Failed);
    }

    #[test]
    fn cannot_complete_from_pending() {
        assert!(complete(InstructionStatus::Pending).is_err());
    }

    #[test]
    fn cannot_begin_twice() {
        assert!(begin(InstructionStatus::Processing).is_err());
    }

    #[test]
    fn cancel_only_pre_processing() {
        assert_eq!(
            cancel(InstructionStatus::Pending).unwrap(),
            InstructionStatus::Cancelled
        );
        assert!(cancel(InstructionStatus::Processing).is_err());
        assert!(cancel(InstructionStatus::Completed).is_err());
    }

    #[test]
    fn terminal_statuses() {
        assert!(InstructionStatus::Completed.is_terminal());
        assert!(InstructionStatus::Failed.is_terminal());
        assert!(InstructionStatus::Cancelled.is_terminal());
        assert!(!InstructionStatus::Pending.is_terminal());
        assert!(!InstructionStatus::Processing.is_terminal());
    }
}
