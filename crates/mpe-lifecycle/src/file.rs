//! File lifecycle state machine.
//!
//! # Shape
//!
//! Transitions are pure guard functions: they take the current status plus
//! whatever evidence the guard needs, and return a [`Transition`] — the next
//! status and the side-effect commands the caller must apply **in the same
//! transaction** as the status write. No transition function performs IO.
//!
//! ```text
//! draft → validating → {validation_failed | awaiting_approval}
//!       → {partially_approved →} approved → processing → {completed | failed}
//! cancelled reachable from any pre-processing state
//! ```
//!
//! Status strings are persisted verbatim and must not change.

use mpe_ledger::Amount;

// ---------------------------------------------------------------------------
// FileStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileStatus {
    Draft,
    Validating,
    ValidationFailed,
    AwaitingApproval,
    PartiallyApproved,
    Approved,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Draft => "draft",
            FileStatus::Validating => "validating",
            FileStatus::ValidationFailed => "validation_failed",
            FileStatus::AwaitingApproval => "awaiting_approval",
            FileStatus::PartiallyApproved => "partially_approved",
            FileStatus::Approved => "approved",
            FileStatus::Processing => "processing",
            FileStatus::Completed => "completed",
            FileStatus::Failed => "failed",
            FileStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Result<Self, TransitionError> {
        match s {
            "draft" => Ok(FileStatus::Draft),
            "validating" => Ok(FileStatus::Validating),
            "validation_failed" => Ok(FileStatus::ValidationFailed),
            "awaiting_approval" => Ok(FileStatus::AwaitingApproval),
            "partially_approved" => Ok(FileStatus::PartiallyApproved),
            "approved" => Ok(FileStatus::Approved),
            "processing" => Ok(FileStatus::Processing),
            "completed" => Ok(FileStatus::Completed),
            "failed" => Ok(FileStatus::Failed),
            "cancelled" => Ok(FileStatus::Cancelled),
            other => Err(TransitionError::UnknownStatus(other.to_string())),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FileStatus::Completed | FileStatus::Failed | FileStatus::Cancelled
        )
    }

    /// Cancellation window: anything before execution starts.
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            FileStatus::Draft
                | FileStatus::Validating
                | FileStatus::ValidationFailed
                | FileStatus::AwaitingApproval
                | FileStatus::PartiallyApproved
                | FileStatus::Approved
        )
    }

    /// Deletion is confined to states where no funds were ever touched.
    pub fn is_deletable(&self) -> bool {
        matches!(
            self,
            FileStatus::Draft | FileStatus::ValidationFailed | FileStatus::Cancelled
        )
    }
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Effects
// ---------------------------------------------------------------------------

/// Terminal-transition events consumed by the notification collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    FileApproved,
    FileCompleted,
    FileFailed,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::FileApproved => "file.approved",
            EventKind::FileCompleted => "file.completed",
            EventKind::FileFailed => "file.failed",
        }
    }
}

/// Side-effect commands a transition demands. The caller applies them in the
/// same transaction as the status write — a crash can never separate them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    ReserveFunds { amount: Amount },
    ReleaseFunds { amount: Amount },
    SettleFunds { amount: Amount },
    EnqueueExecution,
    EmitEvent(EventKind),
}

/// The result of a permitted transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: FileStatus,
    pub effects: Vec<Effect>,
}

impl Transition {
    fn to(next: FileStatus) -> Self {
        Self {
            next,
            effects: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    InvalidTransition {
        from: FileStatus,
        attempted: &'static str,
    },
    /// Declared file total does not equal the computed instruction sum.
    /// Never corrected silently; the file cannot reach `awaiting_approval`.
    ConsistencyViolation {
        declared: Amount,
        computed: Option<Amount>,
    },
    UnknownStatus(String),
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidTransition { from, attempted } => {
                write!(f, "invalid file transition: {attempted} from {from}")
            }
            Self::ConsistencyViolation { declared, computed } => match computed {
                Some(c) => write!(
                    f,
                    "file total mismatch: declared {declared}, instructions sum to {c}"
                ),
                None => write!(
                    f,
                    "file total mismatch: declared {declared}, instruction sum overflowed"
                ),
            },
            Self::UnknownStatus(s) => write!(f, "unknown file status: {s:?}"),
        }
    }
}

impl std::error::Error for TransitionError {}

// ---------------------------------------------------------------------------
// Approval verdict (as decided by the approval gate)
// ---------------------------------------------------------------------------

/// What the approval gate concluded. `Partial` is the first of two required
/// approvals above the dual-approval threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalVerdict {
    Partial,
    Full,
}

// ---------------------------------------------------------------------------
// Transitions
// ---------------------------------------------------------------------------

/// `draft → validating` — upload finished, rows handed to validation.
pub fn begin_validation(current: FileStatus) -> Result<Transition, TransitionError> {
    match current {
        FileStatus::Draft => Ok(Transition::to(FileStatus::Validating)),
        from => Err(TransitionError::InvalidTransition {
            from,
            attempted: "begin_validation",
        }),
    }
}

/// `validating → {awaiting_approval | validation_failed}`.
///
/// Reaching `awaiting_approval` requires zero row errors **and** the declared
/// total to equal the computed instruction sum; a mismatch is a
/// [`TransitionError::ConsistencyViolation`], not a silent correction.
pub fn complete_validation(
    current: FileStatus,
    all_rows_passed: bool,
    declared_total: Amount,
    computed_total: Option<Amount>,
) -> Result<Transition, TransitionError> {
    if current != FileStatus::Validating {
        return Err(TransitionError::InvalidTransition {
            from: current,
            attempted: "complete_validation",
        });
    }
    if !all_rows_passed {
        return Ok(Transition::to(FileStatus::ValidationFailed));
    }
    if computed_total != Some(declared_total) {
        return Err(TransitionError::ConsistencyViolation {
            declared: declared_total,
            computed: computed_total,
        });
    }
    Ok(Transition::to(FileStatus::AwaitingApproval))
}

/// `validating → validation_failed` for file-level failures (batch
/// rejection, total mismatch) once they have been recorded.
pub fn fail_validation(current: FileStatus) -> Result<Transition, TransitionError> {
    match current {
        FileStatus::Validating => Ok(Transition::to(FileStatus::ValidationFailed)),
        from => Err(TransitionError::InvalidTransition {
            from,
            attempted: "fail_validation",
        }),
    }
}

/// Apply an approval verdict.
///
/// A `Full` verdict commands the reservation of the file's declared total,
/// the execution-job enqueue, and the `file.approved` event — all bound to
/// the status write so approval atomically guarantees funds for the batch.
pub fn apply_approval(
    current: FileStatus,
    verdict: ApprovalVerdict,
    declared_total: Amount,
) -> Result<Transition, TransitionError> {
    match (current, verdict) {
        (FileStatus::AwaitingApproval, ApprovalVerdict::Partial) => {
            Ok(Transition::to(FileStatus::PartiallyApproved))
        }
        (FileStatus::AwaitingApproval | FileStatus::PartiallyApproved, ApprovalVerdict::Full) => {
            Ok(Transition {
                next: FileStatus::Approved,
                effects: vec![
                    Effect::ReserveFunds {
                        amount: declared_total,
                    },
                    Effect::EnqueueExecution,
                    Effect::EmitEvent(EventKind::FileApproved),
                ],
            })
        }
        (from, _) => Err(TransitionError::InvalidTransition {
            from,
            attempted: "apply_approval",
        }),
    }
}

/// `approved → processing` — applied by the orchestrator when it claims the
/// file's execution job.
pub fn begin_processing(current: FileStatus) -> Result<Transition, TransitionError> {
    match current {
        FileStatus::Approved => Ok(Transition::to(FileStatus::Processing)),
        from => Err(TransitionError::InvalidTransition {
            from,
            attempted: "begin_processing",
        }),
    }
}

/// `processing → {completed | failed}` from terminal instruction counts.
///
/// `completed` requires at least one success; `failed` means every
/// instruction failed. Callers must only invoke this once all instructions
/// are terminal.
pub fn complete_processing(
    current: FileStatus,
    succeeded: u32,
    failed: u32,
) -> Result<Transition, TransitionError> {
    if current != FileStatus::Processing {
        return Err(TransitionError::InvalidTransition {
            from: current,
            attempted: "complete_processing",
        });
    }
    if succeeded == 0 && failed == 0 {
        return Err(TransitionError::InvalidTransition {
            from: current,
            attempted: "complete_processing with no terminal instructions",
        });
    }
    if succeeded > 0 {
        Ok(Transition {
            next: FileStatus::Completed,
            effects: vec![Effect::EmitEvent(EventKind::FileCompleted)],
        })
    } else {
        Ok(Transition {
            next: FileStatus::Failed,
            effects: vec![Effect::EmitEvent(EventKind::FileFailed)],
        })
    }
}

/// Cancel a file. Permitted from any pre-`processing` state; a file already
/// executing must run to a terminal state. Cancelling an `approved` file
/// releases its reservation.
pub fn cancel(current: FileStatus, reserved_total: Amount) -> Result<Transition, TransitionError> {
    if !current.is_cancellable() {
        return Err(TransitionError::InvalidTransition {
            from: current,
            attempted: "cancel",
        });
    }
    let effects = if current == FileStatus::Approved && !reserved_total.is_zero() {
        vec![Effect::ReleaseFunds {
            amount: reserved_total,
        }]
    } else {
        Vec::new()
    };
    Ok(Transition {
        next: FileStatus::Cancelled,
        effects,
    })
}
