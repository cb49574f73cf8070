//! Execution claim token.
//!
//! Proof that an execution run originates from a claimed outbox job — the
//! per-file lease that makes "at most one active execution per file" an
//! explicit, named API requirement rather than an invisible convention.
//!
//! The `_priv` field is `pub(crate)`, so external code cannot construct
//! this type via struct literal:
//!
//! ```text
//! ✅  ExecutionClaim::from_claimed_job(id, file_id)  // public constructor
//! ❌  ExecutionClaim { outbox_id: 1, … }             // ERROR: private field
//! ```
//!
//! Callers must obtain the job through the database claim (skip-locked row
//! selection); passing fabricated values to `from_claimed_job` bypasses the
//! protocol and is a contract violation — the DB-level claim remains the
//! authoritative guard.

use uuid::Uuid;

#[allow(clippy::manual_non_exhaustive)]
#[derive(Debug, Clone)]
pub struct ExecutionClaim {
    /// The DB row id of the claimed outbox job.
    pub outbox_id: i64,
    /// The file this claim leases.
    pub file_id: Uuid,
    pub(crate) _priv: (),
}

impl ExecutionClaim {
    /// Construct a claim from a successfully claimed outbox job row.
    pub fn from_claimed_job(outbox_id: i64, file_id: Uuid) -> Self {
        Self {
            outbox_id,
            file_id,
            _priv: (),
        }
    }

    /// Test escape hatch: a claim with no backing outbox row.
    ///
    /// Only compiled for tests and under the `testkit` feature; production
    /// crates must never activate it.
    #[cfg(any(test, feature = "testkit"))]
    pub fn for_test(file_id: Uuid) -> Self {
        Self {
            outbox_id: -1,
            file_id,
            _priv: (),
        }
    }
}
