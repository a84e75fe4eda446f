use chrono::{DateTime, Utc};

use super::domain::{AssignmentId, AssignmentStatus, PaymentId, ShiftId, ShiftStatus, WorkerId};
use super::escrow::PaymentStatus;
use super::matching::MatchError;
use super::ports::{ProviderError, RepositoryError};

/// Error taxonomy shared by every staffing operation.
///
/// Each variant carries the identifiers needed to drive a user-visible message or an admin
/// remediation action.
#[derive(Debug, thiserror::Error)]
pub enum MarketplaceError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("not eligible: {0}")]
    NotEligible(Ineligibility),
    #[error("conflict: {0}")]
    Conflict(ConflictKind),
    #[error("shift {shift_id} is contended; gave up after {attempts} attempts")]
    TransientContention { shift_id: ShiftId, attempts: u32 },
    #[error("payment provider failed for payment {payment_id}: {source}")]
    PaymentProvider {
        payment_id: PaymentId,
        #[source]
        source: ProviderError,
    },
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error(transparent)]
    Repository(RepositoryError),
}

impl MarketplaceError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Self::NotFound(what.to_string())
    }

    /// Errors the caller may safely retry without changing the request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MarketplaceError::TransientContention { .. } | MarketplaceError::PaymentProvider { .. }
        )
    }
}

impl From<MatchError> for MarketplaceError {
    fn from(value: MatchError) -> Self {
        Self::Validation(value.to_string())
    }
}

impl From<RepositoryError> for MarketplaceError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::NotFound => Self::NotFound("record".to_string()),
            other => Self::Repository(other),
        }
    }
}

/// Informational reasons a request was refused without mutating state.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Ineligibility {
    #[error("worker {0} is suspended")]
    WorkerSuspended(WorkerId),
    #[error("worker {worker_id} is filtered out for shift {shift_id}: {reason}")]
    HardFiltered {
        shift_id: ShiftId,
        worker_id: WorkerId,
        reason: String,
    },
    #[error("invitation expired at {expired_at}")]
    InvitationExpired { expired_at: DateTime<Utc> },
    #[error("shift {shift_id} is {status} and does not accept claims")]
    ShiftNotOpen {
        shift_id: ShiftId,
        status: ShiftStatus,
    },
    #[error("shift {0} is flagged and excluded from targeting")]
    ShiftFlagged(ShiftId),
    #[error("claim is no longer pending ({0})")]
    ClaimNotPending(String),
    #[error("broadcast for shift {0} is closed")]
    BroadcastClosed(ShiftId),
    #[error("business does not own shift {0}")]
    NotShiftOwner(ShiftId),
    #[error("check-in opens at {opens_at}")]
    CheckInTooEarly { opens_at: DateTime<Utc> },
    #[error("check-in window closed at {closed_at}")]
    CheckInWindowClosed { closed_at: DateTime<Utc> },
    #[error("shift ends at {ends_at}; completion requires an explicit signal before then")]
    ShiftNotOver { ends_at: DateTime<Utc> },
    #[error("assignment is {0}")]
    AssignmentState(AssignmentStatus),
    #[error("payment {payment_id} is not due for release (release after {release_after:?})")]
    ReleaseNotDue {
        payment_id: PaymentId,
        release_after: Option<DateTime<Utc>>,
    },
}

/// Concurrency and state conflicts surfaced to the caller; never retried automatically.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConflictKind {
    #[error("shift {0} has already been filled")]
    ShiftAlreadyFilled(ShiftId),
    #[error("worker {worker_id} already applied to shift {shift_id}")]
    DuplicateApplication {
        shift_id: ShiftId,
        worker_id: WorkerId,
    },
    #[error("shift {0} already has a broadcast")]
    BroadcastExists(ShiftId),
    #[error("shift {0} still has an active assignment")]
    ActiveAssignment(ShiftId),
    #[error("illegal shift transition {from} -> {to}")]
    IllegalShiftTransition { from: ShiftStatus, to: ShiftStatus },
    #[error("escrow already held for this assignment (payment {0})")]
    PaymentAlreadyHeld(PaymentId),
    #[error("payment {0} is disputed and frozen")]
    PaymentFrozen(PaymentId),
    #[error("assignment {0} has already been rated")]
    AlreadyRated(AssignmentId),
    #[error("payment {payment_id} is {status:?}; operation not permitted")]
    PaymentState {
        payment_id: PaymentId,
        status: PaymentStatus,
    },
}
