use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{
    Actor, ApplicationId, ApplicationStatus, Assignment, AssignmentId, AssignmentStatus,
    AuditEntry, AvailabilityBroadcast, InvitationId, InvitationStatus, Shift, ShiftApplication,
    ShiftInvitation, ShiftStatus, WorkerId,
};
use super::error::{ConflictKind, MarketplaceError};

/// Everything that must change together when a shift is claimed, cancelled, or removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShiftRecord {
    pub shift: Shift,
    pub applications: Vec<ShiftApplication>,
    pub invitations: Vec<ShiftInvitation>,
    pub broadcast: Option<AvailabilityBroadcast>,
    pub assignments: Vec<Assignment>,
    pub audit: Vec<AuditEntry>,
}

/// Competitors moved to a terminal state by a close-out pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CloseOutSummary {
    pub rejected_applications: Vec<(ApplicationId, WorkerId)>,
    pub declined_invitations: Vec<(InvitationId, WorkerId)>,
    pub expired_invitations: Vec<(InvitationId, WorkerId)>,
    pub broadcast_closed: bool,
}

impl CloseOutSummary {
    pub fn is_empty(&self) -> bool {
        self.rejected_applications.is_empty()
            && self.declined_invitations.is_empty()
            && self.expired_invitations.is_empty()
            && !self.broadcast_closed
    }

    /// Workers whose claims lost, for outcome notifications.
    pub fn losing_workers(&self) -> Vec<WorkerId> {
        self.rejected_applications
            .iter()
            .map(|(_, worker)| worker.clone())
            .chain(
                self.declined_invitations
                    .iter()
                    .map(|(_, worker)| worker.clone()),
            )
            .collect()
    }
}

impl ShiftRecord {
    pub fn new(shift: Shift) -> Self {
        Self {
            shift,
            applications: Vec::new(),
            invitations: Vec::new(),
            broadcast: None,
            assignments: Vec::new(),
            audit: Vec::new(),
        }
    }

    pub fn record(
        &mut self,
        at: DateTime<Utc>,
        actor: &Actor,
        action: &str,
        detail: impl Into<String>,
    ) {
        self.audit.push(AuditEntry {
            at,
            actor: actor.clone(),
            action: action.to_string(),
            detail: detail.into(),
        });
    }

    pub fn active_assignment(&self) -> Option<&Assignment> {
        self.assignments
            .iter()
            .find(|assignment| !assignment.status.is_terminal())
    }

    pub fn assignment(&self, id: &AssignmentId) -> Option<&Assignment> {
        self.assignments.iter().find(|assignment| &assignment.id == id)
    }

    pub fn assignment_mut(&mut self, id: &AssignmentId) -> Option<&mut Assignment> {
        self.assignments
            .iter_mut()
            .find(|assignment| &assignment.id == id)
    }

    pub fn application_mut(&mut self, id: &ApplicationId) -> Option<&mut ShiftApplication> {
        self.applications
            .iter_mut()
            .find(|application| &application.id == id)
    }

    pub fn invitation_mut(&mut self, id: &InvitationId) -> Option<&mut ShiftInvitation> {
        self.invitations
            .iter_mut()
            .find(|invitation| &invitation.id == id)
    }

    pub fn has_live_application(&self, worker_id: &WorkerId) -> bool {
        self.applications.iter().any(|application| {
            &application.worker_id == worker_id
                && matches!(
                    application.status,
                    ApplicationStatus::Pending | ApplicationStatus::Approved
                )
        })
    }

    pub fn has_pending_feedback(&self) -> bool {
        self.assignments
            .iter()
            .any(|assignment| assignment.feedback_pending)
    }

    /// Whether any competitor is still in a non-terminal state.
    pub fn has_open_competitors(&self) -> bool {
        self.applications
            .iter()
            .any(|application| application.status == ApplicationStatus::Pending)
            || self
                .invitations
                .iter()
                .any(|invitation| invitation.status == InvitationStatus::Sent)
            || self
                .broadcast
                .as_ref()
                .map(|broadcast| !broadcast.closed)
                .unwrap_or(false)
    }

    /// Moves every outstanding competitor to a terminal, non-winning state. Re-running on a
    /// record that is already closed out changes nothing.
    pub fn close_out_competitors(&mut self, at: DateTime<Utc>) -> CloseOutSummary {
        let mut summary = CloseOutSummary::default();

        for application in &mut self.applications {
            if application.status == ApplicationStatus::Pending {
                application.status = ApplicationStatus::Rejected;
                application.decided_at = Some(at);
                summary
                    .rejected_applications
                    .push((application.id.clone(), application.worker_id.clone()));
            }
        }

        for invitation in &mut self.invitations {
            if invitation.status != InvitationStatus::Sent {
                continue;
            }
            invitation.responded_at = Some(at);
            if invitation.is_expired_at(at) {
                invitation.status = InvitationStatus::Expired;
                summary
                    .expired_invitations
                    .push((invitation.id.clone(), invitation.worker_id.clone()));
            } else {
                invitation.status = InvitationStatus::Declined;
                summary
                    .declined_invitations
                    .push((invitation.id.clone(), invitation.worker_id.clone()));
            }
        }

        if let Some(broadcast) = self.broadcast.as_mut() {
            if !broadcast.closed {
                broadcast.closed = true;
                broadcast.closed_at = Some(at);
                summary.broadcast_closed = true;
            }
        }

        summary
    }

    /// Expires invitations whose deadline has passed. Used by the periodic sweep.
    pub fn expire_invitations(&mut self, at: DateTime<Utc>) -> Vec<(InvitationId, WorkerId)> {
        let mut expired = Vec::new();
        for invitation in &mut self.invitations {
            if invitation.status == InvitationStatus::Sent && invitation.is_expired_at(at) {
                invitation.status = InvitationStatus::Expired;
                invitation.responded_at = Some(at);
                expired.push((invitation.id.clone(), invitation.worker_id.clone()));
            }
        }
        expired
    }

    /// Applies a lifecycle transition after checking the transition table.
    pub(crate) fn transition_shift(
        &mut self,
        to: ShiftStatus,
        privileged: bool,
        at: DateTime<Utc>,
        actor: &Actor,
    ) -> Result<(), MarketplaceError> {
        let from = self.shift.status;
        if !from.permits(to, privileged) {
            return Err(MarketplaceError::Conflict(
                ConflictKind::IllegalShiftTransition { from, to },
            ));
        }
        self.shift.status = to;
        if to == ShiftStatus::Open {
            self.shift.filled_at = None;
        }
        self.record(at, actor, "shift_status", format!("{from} -> {to}"));
        Ok(())
    }

    /// Sets `filled`. Only the fulfillment coordinator calls this.
    pub(crate) fn mark_filled(&mut self, at: DateTime<Utc>, actor: &Actor) {
        self.shift.status = ShiftStatus::Filled;
        self.shift.filled_at = Some(at);
        self.record(at, actor, "shift_status", "open -> filled");
    }

    /// Structural invariants checked before any write. A failure is fatal for the operation.
    pub fn check_invariants(&self) -> Result<(), MarketplaceError> {
        let shift_id = &self.shift.id;
        let active: Vec<&Assignment> = self
            .assignments
            .iter()
            .filter(|assignment| !assignment.status.is_terminal())
            .collect();

        if active.len() > 1 {
            return Err(MarketplaceError::InvariantViolation(format!(
                "shift {shift_id} holds {} non-terminal assignments",
                active.len()
            )));
        }

        let status = self.shift.status;
        match (status.is_past_open(), self.shift.filled_at.is_some()) {
            (true, false) => {
                return Err(MarketplaceError::InvariantViolation(format!(
                    "shift {shift_id} is {status} without filled_at"
                )))
            }
            (false, true) if matches!(status, ShiftStatus::PendingApproval | ShiftStatus::Open) => {
                return Err(MarketplaceError::InvariantViolation(format!(
                    "shift {shift_id} is {status} but carries filled_at"
                )))
            }
            _ => {}
        }

        let expected = match status {
            ShiftStatus::Filled => Some(AssignmentStatus::Assigned),
            ShiftStatus::InProgress => Some(AssignmentStatus::CheckedIn),
            _ => None,
        };
        match (expected, active.first()) {
            (Some(want), Some(found)) if found.status == want => {}
            (Some(want), found) => {
                return Err(MarketplaceError::InvariantViolation(format!(
                    "shift {shift_id} is {status} but active assignment is {:?} (expected {want})",
                    found.map(|assignment| assignment.status)
                )))
            }
            (None, Some(found)) => {
                return Err(MarketplaceError::InvariantViolation(format!(
                    "shift {shift_id} is {status} with non-terminal assignment {}",
                    found.id
                )))
            }
            (None, None) => {}
        }

        if status == ShiftStatus::Completed
            && !self
                .assignments
                .iter()
                .any(|assignment| assignment.status == AssignmentStatus::Completed)
        {
            return Err(MarketplaceError::InvariantViolation(format!(
                "shift {shift_id} completed without a completed assignment"
            )));
        }

        Ok(())
    }
}
