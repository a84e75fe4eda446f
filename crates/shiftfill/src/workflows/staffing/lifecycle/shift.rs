use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::super::domain::{
    Actor, Assignment, AssignmentId, AssignmentStatus, RemovalRecord, Shift, ShiftFlag, ShiftId,
    ShiftPosting, ShiftStatus,
};
use super::super::error::{ConflictKind, Ineligibility, MarketplaceError};
use super::super::matching::MatchScorer;
use super::super::record::{CloseOutSummary, ShiftRecord};
use super::super::store::ShiftStore;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BulkApproval {
    pub approved: Vec<ShiftId>,
    pub failed: Vec<(ShiftId, String)>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShiftCancellation {
    pub shift: Shift,
    pub close_out: CloseOutSummary,
    /// Assignment cancelled together with a filled shift; its escrow must be refunded.
    pub cancelled_assignment: Option<Assignment>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShiftRemoval {
    pub shift: Shift,
    pub close_out: CloseOutSummary,
    /// Every assignment the shift ever held. Payments still in escrow for these are refunded.
    pub assignments: Vec<AssignmentId>,
}

/// Posting, approval, flagging, cancellation and removal of shifts.
pub struct ShiftLifecycle {
    store: Arc<ShiftStore>,
}

impl ShiftLifecycle {
    pub fn new(store: Arc<ShiftStore>) -> Self {
        Self { store }
    }

    pub fn post(&self, posting: ShiftPosting, at: DateTime<Utc>) -> Result<Shift, MarketplaceError> {
        if posting.title.trim().is_empty() {
            return Err(MarketplaceError::validation("shift title is required"));
        }
        if posting.gross_amount_cents == 0 {
            return Err(MarketplaceError::validation("shift amount must be positive"));
        }

        let shift = Shift::from_posting(posting, at);
        MatchScorer::validate_shift(&shift)?;

        let mut record = ShiftRecord::new(shift.clone());
        let actor = Actor::Business(shift.business_id.clone());
        record.record(at, &actor, "shift_posted", shift.title.clone());
        self.store.insert(record)?;

        info!(shift_id = %shift.id, business_id = %shift.business_id, urgency = shift.urgency.label(), "shift posted");
        Ok(shift)
    }

    pub fn view(&self, shift_id: &ShiftId) -> Result<ShiftRecord, MarketplaceError> {
        self.store.load(shift_id)
    }

    pub fn approve(
        &self,
        shift_id: &ShiftId,
        actor: &Actor,
        at: DateTime<Utc>,
    ) -> Result<Shift, MarketplaceError> {
        if !matches!(actor, Actor::Admin(_) | Actor::System) {
            return Err(MarketplaceError::validation(format!(
                "{actor} is not allowed to approve shifts"
            )));
        }
        let shift = self.store.transact(shift_id, |record| {
            record.transition_shift(ShiftStatus::Open, false, at, actor)?;
            Ok(record.shift.clone())
        })?;
        info!(%shift_id, %actor, "shift approved");
        Ok(shift)
    }

    /// Approves each shift independently; one failure does not stop the rest.
    pub fn bulk_approve(&self, shift_ids: &[ShiftId], actor: &Actor, at: DateTime<Utc>) -> BulkApproval {
        let mut report = BulkApproval::default();
        for shift_id in shift_ids {
            match self.approve(shift_id, actor, at) {
                Ok(_) => report.approved.push(shift_id.clone()),
                Err(error) => {
                    warn!(%shift_id, %error, "bulk approval skipped shift");
                    report.failed.push((shift_id.clone(), error.to_string()));
                }
            }
        }
        report
    }

    pub fn flag(
        &self,
        shift_id: &ShiftId,
        reason: &str,
        actor: &Actor,
        at: DateTime<Utc>,
    ) -> Result<Shift, MarketplaceError> {
        require_admin(actor)?;
        self.store.transact(shift_id, |record| {
            if record.shift.status.is_terminal() {
                return Err(MarketplaceError::NotEligible(Ineligibility::ShiftNotOpen {
                    shift_id: shift_id.clone(),
                    status: record.shift.status,
                }));
            }
            if record.shift.flag.is_none() {
                record.shift.flag = Some(ShiftFlag {
                    reason: reason.to_string(),
                    flagged_at: at,
                });
                record.record(at, actor, "shift_flagged", reason);
            }
            Ok(record.shift.clone())
        })
    }

    pub fn unflag(
        &self,
        shift_id: &ShiftId,
        actor: &Actor,
        at: DateTime<Utc>,
    ) -> Result<Shift, MarketplaceError> {
        require_admin(actor)?;
        self.store.transact(shift_id, |record| {
            if record.shift.flag.take().is_some() {
                record.record(at, actor, "shift_unflagged", "");
            }
            Ok(record.shift.clone())
        })
    }

    /// Cancels an open or filled shift on behalf of its business or an admin. Outstanding
    /// competitors are closed out and a not-yet-started assignment is cancelled in the same
    /// write.
    pub fn cancel(
        &self,
        shift_id: &ShiftId,
        actor: &Actor,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<ShiftCancellation, MarketplaceError> {
        let cancellation = self.store.transact(shift_id, |record| {
            let assignment_status = match actor {
                Actor::Business(business_id) if business_id == &record.shift.business_id => {
                    AssignmentStatus::CancelledByBusiness
                }
                Actor::Admin(_) => AssignmentStatus::CancelledByAdmin,
                _ => {
                    return Err(MarketplaceError::NotEligible(Ineligibility::NotShiftOwner(
                        shift_id.clone(),
                    )))
                }
            };

            let from = record.shift.status;
            if !from.permits(ShiftStatus::Cancelled, false) {
                return Err(MarketplaceError::Conflict(
                    ConflictKind::IllegalShiftTransition {
                        from,
                        to: ShiftStatus::Cancelled,
                    },
                ));
            }

            let cancelled_assignment = match record.active_assignment().map(|a| a.id.clone()) {
                Some(assignment_id) => {
                    let assignment = record.assignment_mut(&assignment_id).ok_or_else(|| {
                        MarketplaceError::not_found(format!("assignment {assignment_id}"))
                    })?;
                    assignment.status = assignment_status;
                    assignment.closed_at = Some(at);
                    let snapshot = assignment.clone();
                    record.record(
                        at,
                        actor,
                        "assignment_cancelled",
                        format!("{assignment_id} cancelled with shift"),
                    );
                    Some(snapshot)
                }
                None => None,
            };

            record.transition_shift(ShiftStatus::Cancelled, false, at, actor)?;
            let close_out = record.close_out_competitors(at);
            record.record(at, actor, "shift_cancelled", reason);

            Ok(ShiftCancellation {
                shift: record.shift.clone(),
                close_out,
                cancelled_assignment,
            })
        })?;

        info!(
            %shift_id,
            %actor,
            rejected = cancellation.close_out.rejected_applications.len(),
            assignment_cancelled = cancellation.cancelled_assignment.is_some(),
            "shift cancelled"
        );
        Ok(cancellation)
    }

    /// Admin force-remove. Requires that no assignment is still in flight.
    pub fn remove(
        &self,
        shift_id: &ShiftId,
        reason: &str,
        actor: &Actor,
        at: DateTime<Utc>,
    ) -> Result<ShiftRemoval, MarketplaceError> {
        require_admin(actor)?;
        let removal = self.store.transact(shift_id, |record| {
            if record.active_assignment().is_some() {
                return Err(MarketplaceError::Conflict(ConflictKind::ActiveAssignment(
                    shift_id.clone(),
                )));
            }
            record.transition_shift(ShiftStatus::Removed, true, at, actor)?;
            record.shift.removal = Some(RemovalRecord {
                reason: reason.to_string(),
                removed_at: at,
                removed_by: actor.clone(),
            });
            let close_out = record.close_out_competitors(at);
            record.record(at, actor, "shift_removed", reason);

            Ok(ShiftRemoval {
                shift: record.shift.clone(),
                close_out,
                assignments: record
                    .assignments
                    .iter()
                    .map(|assignment| assignment.id.clone())
                    .collect(),
            })
        })?;

        warn!(%shift_id, %actor, reason, "shift removed by admin");
        Ok(removal)
    }
}

pub(crate) fn require_admin(actor: &Actor) -> Result<(), MarketplaceError> {
    if actor.is_privileged() {
        Ok(())
    } else {
        Err(MarketplaceError::validation(format!(
            "{actor} is not allowed to perform admin actions"
        )))
    }
}
