use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::super::domain::{
    Actor, Assignment, AssignmentId, AssignmentStatus, ShiftId, ShiftStatus, WorkerId,
};
use super::super::error::{ConflictKind, Ineligibility, MarketplaceError};
use super::super::record::ShiftRecord;
use super::super::store::ShiftStore;
use super::shift::require_admin;

/// Attendance timing rules.
#[derive(Debug, Clone, PartialEq)]
pub struct AttendancePolicy {
    /// How long before the shift start check-in opens.
    pub check_in_window: Duration,
    /// How long after the shift start a missing check-in becomes a no-show.
    pub no_show_grace: Duration,
}

impl Default for AttendancePolicy {
    fn default() -> Self {
        Self {
            check_in_window: Duration::minutes(30),
            no_show_grace: Duration::minutes(15),
        }
    }
}

/// How completion was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionSignal {
    /// Regular completion; only allowed once the shift has ended.
    Scheduled,
    /// Business or admin confirmed the work early.
    Confirmed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NoShowOutcome {
    pub assignment: Assignment,
    pub shift_status: ShiftStatus,
}

/// Escrow compensation owed after an admin cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Compensation {
    /// No work performed.
    FullRefund,
    /// Worked part of the shift; refund the unworked share and release the rest.
    Prorated {
        worked_seconds: i64,
        scheduled_seconds: i64,
    },
}

impl Compensation {
    /// Portion of `remaining_cents` returned to the business.
    pub fn refund_cents(&self, remaining_cents: u64) -> u64 {
        match *self {
            Compensation::FullRefund => remaining_cents,
            Compensation::Prorated {
                worked_seconds,
                scheduled_seconds,
            } => {
                if scheduled_seconds <= 0 {
                    return remaining_cents;
                }
                let worked = worked_seconds.clamp(0, scheduled_seconds) as u128;
                let scheduled = scheduled_seconds as u128;
                let unworked = (scheduled - worked) * u128::from(remaining_cents) / scheduled;
                unworked as u64
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdminCancellation {
    pub assignment: Assignment,
    pub shift_status: ShiftStatus,
    pub compensation: Compensation,
}

pub struct AssignmentLifecycle {
    store: Arc<ShiftStore>,
    policy: AttendancePolicy,
}

impl AssignmentLifecycle {
    pub fn new(store: Arc<ShiftStore>, policy: AttendancePolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &AttendancePolicy {
        &self.policy
    }

    pub fn check_in(
        &self,
        assignment_id: &AssignmentId,
        worker_id: &WorkerId,
        at: DateTime<Utc>,
    ) -> Result<Assignment, MarketplaceError> {
        let shift_id = self.store.shift_for_assignment(assignment_id)?;
        let window = self.policy.check_in_window;
        let grace = self.policy.no_show_grace;

        let assignment = self.store.transact(&shift_id, |record| {
            let starts_at = record.shift.starts_at;
            let assignment = assignment_in(record, assignment_id, AssignmentStatus::Assigned)?;
            if &assignment.worker_id != worker_id {
                return Err(MarketplaceError::validation(
                    "assignment belongs to another worker",
                ));
            }

            let opens_at = starts_at - window;
            if at < opens_at {
                return Err(MarketplaceError::NotEligible(Ineligibility::CheckInTooEarly {
                    opens_at,
                }));
            }
            let closed_at = starts_at + grace;
            if at > closed_at {
                return Err(MarketplaceError::NotEligible(
                    Ineligibility::CheckInWindowClosed { closed_at },
                ));
            }

            assignment.status = AssignmentStatus::CheckedIn;
            assignment.checked_in_at = Some(at);
            let snapshot = assignment.clone();

            let actor = Actor::Worker(worker_id.clone());
            record.transition_shift(ShiftStatus::InProgress, false, at, &actor)?;
            record.record(at, &actor, "checked_in", assignment_id.to_string());
            Ok(snapshot)
        })?;

        info!(%shift_id, %assignment_id, %worker_id, "worker checked in");
        Ok(assignment)
    }

    pub fn complete(
        &self,
        assignment_id: &AssignmentId,
        signal: CompletionSignal,
        actor: &Actor,
        at: DateTime<Utc>,
    ) -> Result<Assignment, MarketplaceError> {
        let shift_id = self.store.shift_for_assignment(assignment_id)?;

        let assignment = self.store.transact(&shift_id, |record| {
            let ends_at = record.shift.ends_at;
            if signal == CompletionSignal::Scheduled && at < ends_at {
                return Err(MarketplaceError::NotEligible(Ineligibility::ShiftNotOver {
                    ends_at,
                }));
            }
            let assignment = assignment_in(record, assignment_id, AssignmentStatus::CheckedIn)?;
            assignment.status = AssignmentStatus::Completed;
            assignment.completed_at = Some(at);
            assignment.closed_at = Some(at);
            assignment.feedback_pending = true;
            let snapshot = assignment.clone();

            record.transition_shift(ShiftStatus::Completed, false, at, actor)?;
            record.record(
                at,
                actor,
                "assignment_completed",
                format!("{assignment_id} ({signal:?})"),
            );
            Ok(snapshot)
        })?;

        info!(%shift_id, %assignment_id, worker_id = %assignment.worker_id, "assignment completed");
        Ok(assignment)
    }

    /// Whether the assignment has passed its grace deadline without a check-in.
    pub fn is_overdue(&self, record: &ShiftRecord, at: DateTime<Utc>) -> Option<AssignmentId> {
        record
            .active_assignment()
            .filter(|assignment| assignment.status == AssignmentStatus::Assigned)
            .filter(|_| at > record.shift.starts_at + self.policy.no_show_grace)
            .map(|assignment| assignment.id.clone())
    }

    /// Records a missed check-in. The shift reopens if it has not ended yet, otherwise it is
    /// cancelled.
    pub fn mark_no_show(
        &self,
        assignment_id: &AssignmentId,
        at: DateTime<Utc>,
    ) -> Result<NoShowOutcome, MarketplaceError> {
        let shift_id = self.store.shift_for_assignment(assignment_id)?;
        let grace = self.policy.no_show_grace;

        let outcome = self.store.transact(&shift_id, |record| {
            let deadline = record.shift.starts_at + grace;
            let ends_at = record.shift.ends_at;
            if at <= deadline {
                return Err(MarketplaceError::validation(format!(
                    "no-show grace period runs until {deadline}"
                )));
            }
            let assignment = assignment_in(record, assignment_id, AssignmentStatus::Assigned)?;
            assignment.status = AssignmentStatus::NoShow;
            assignment.closed_at = Some(at);
            assignment.feedback_pending = true;
            let snapshot = assignment.clone();

            let next = if at < ends_at {
                ShiftStatus::Open
            } else {
                ShiftStatus::Cancelled
            };
            record.transition_shift(next, true, at, &Actor::System)?;
            record.record(at, &Actor::System, "no_show", assignment_id.to_string());

            Ok(NoShowOutcome {
                assignment: snapshot,
                shift_status: next,
            })
        })?;

        warn!(
            %shift_id,
            %assignment_id,
            worker_id = %outcome.assignment.worker_id,
            shift_status = %outcome.shift_status,
            "no-show recorded"
        );
        Ok(outcome)
    }

    /// Admin cancellation from `assigned` or `checked_in`.
    pub fn admin_cancel(
        &self,
        assignment_id: &AssignmentId,
        reason: &str,
        actor: &Actor,
        at: DateTime<Utc>,
    ) -> Result<AdminCancellation, MarketplaceError> {
        require_admin(actor)?;
        let shift_id = self.store.shift_for_assignment(assignment_id)?;

        let cancellation = self.store.transact(&shift_id, |record| {
            let starts_at = record.shift.starts_at;
            let ends_at = record.shift.ends_at;
            let scheduled_seconds = record.shift.duration_seconds();

            let assignment = record
                .assignment_mut(assignment_id)
                .ok_or_else(|| MarketplaceError::not_found(format!("assignment {assignment_id}")))?;

            let (compensation, next) = match assignment.status {
                AssignmentStatus::Assigned => {
                    let next = if at < ends_at {
                        ShiftStatus::Open
                    } else {
                        ShiftStatus::Cancelled
                    };
                    (Compensation::FullRefund, next)
                }
                AssignmentStatus::CheckedIn => {
                    let worked_from = assignment.checked_in_at.unwrap_or(starts_at).max(starts_at);
                    let worked_seconds = (at.min(ends_at) - worked_from).num_seconds().max(0);
                    (
                        Compensation::Prorated {
                            worked_seconds,
                            scheduled_seconds,
                        },
                        ShiftStatus::Cancelled,
                    )
                }
                other => {
                    return Err(MarketplaceError::NotEligible(
                        Ineligibility::AssignmentState(other),
                    ))
                }
            };

            assignment.status = AssignmentStatus::CancelledByAdmin;
            assignment.closed_at = Some(at);
            let snapshot = assignment.clone();

            record.transition_shift(next, true, at, actor)?;
            record.record(
                at,
                actor,
                "assignment_cancelled",
                format!("{assignment_id}: {reason}"),
            );

            Ok(AdminCancellation {
                assignment: snapshot,
                shift_status: next,
                compensation,
            })
        })?;

        warn!(
            %shift_id,
            %assignment_id,
            %actor,
            shift_status = %cancellation.shift_status,
            "assignment cancelled by admin"
        );
        Ok(cancellation)
    }

    /// Clears the pending-feedback marker once the worker standing has absorbed the outcome.
    pub fn feedback_applied(&self, assignment_id: &AssignmentId) -> Result<(), MarketplaceError> {
        let shift_id = self.store.shift_for_assignment(assignment_id)?;
        self.store.transact(&shift_id, |record| {
            if let Some(assignment) = record.assignment_mut(assignment_id) {
                assignment.feedback_pending = false;
            }
            Ok(())
        })
    }

    /// Terminal assignments whose reliability feedback has not been applied yet.
    pub fn awaiting_feedback(&self, record: &ShiftRecord) -> Vec<Assignment> {
        record
            .assignments
            .iter()
            .filter(|assignment| assignment.feedback_pending)
            .cloned()
            .collect()
    }

    /// Marks a completed assignment as rated. Each assignment accepts one rating.
    pub fn mark_rated(
        &self,
        assignment_id: &AssignmentId,
        actor: &Actor,
        at: DateTime<Utc>,
    ) -> Result<Assignment, MarketplaceError> {
        let shift_id = self.store.shift_for_assignment(assignment_id)?;
        self.store.transact(&shift_id, |record| {
            match actor {
                Actor::Business(business_id) if business_id == &record.shift.business_id => {}
                Actor::Admin(_) => {}
                _ => {
                    return Err(MarketplaceError::NotEligible(Ineligibility::NotShiftOwner(
                        shift_id.clone(),
                    )))
                }
            }
            let assignment = assignment_in(record, assignment_id, AssignmentStatus::Completed)?;
            if assignment.rated {
                return Err(MarketplaceError::Conflict(ConflictKind::AlreadyRated(
                    assignment_id.clone(),
                )));
            }
            assignment.rated = true;
            let snapshot = assignment.clone();
            record.record(at, actor, "assignment_rated", assignment_id.to_string());
            Ok(snapshot)
        })
    }

    pub fn shift_for(&self, assignment_id: &AssignmentId) -> Result<ShiftId, MarketplaceError> {
        self.store.shift_for_assignment(assignment_id)
    }
}

fn assignment_in<'a>(
    record: &'a mut ShiftRecord,
    assignment_id: &AssignmentId,
    expected: AssignmentStatus,
) -> Result<&'a mut Assignment, MarketplaceError> {
    let assignment = record
        .assignment_mut(assignment_id)
        .ok_or_else(|| MarketplaceError::not_found(format!("assignment {assignment_id}")))?;
    if assignment.status != expected {
        return Err(MarketplaceError::NotEligible(Ineligibility::AssignmentState(
            assignment.status,
        )));
    }
    Ok(assignment)
}
