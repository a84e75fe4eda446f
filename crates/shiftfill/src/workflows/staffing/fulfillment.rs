//! Claim intake and the at-most-one-winner fill protocol.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::domain::{
    next_id, Actor, ApplicationId, ApplicationSource, ApplicationStatus, Assignment,
    AssignmentId, AssignmentStatus, AvailabilityBroadcast, BroadcastId, ClaimOrigin,
    InvitationId, InvitationStatus, Shift, ShiftApplication, ShiftId, ShiftInvitation,
    ShiftStatus, WorkerId,
};
use super::error::{ConflictKind, Ineligibility, MarketplaceError};
use super::matching::RankedCandidate;
use super::ports::EligibilityCheck;
use super::record::{CloseOutSummary, ShiftRecord};
use super::store::ShiftStore;

/// A single attempt to become the winning worker for a shift.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimRequest {
    pub shift_id: ShiftId,
    pub worker_id: WorkerId,
    pub origin: ClaimOrigin,
    pub actor: Actor,
    /// Admin override: bypasses eligibility, flags and invitation expiry, never the atomic
    /// close-out.
    pub privileged: bool,
    pub match_score: Option<f64>,
}

impl ClaimRequest {
    pub fn new(shift_id: ShiftId, worker_id: WorkerId, origin: ClaimOrigin) -> Self {
        let actor = Actor::Worker(worker_id.clone());
        Self {
            shift_id,
            worker_id,
            origin,
            actor,
            privileged: false,
            match_score: None,
        }
    }

    pub fn acting_as(mut self, actor: Actor) -> Self {
        self.actor = actor;
        self
    }

    pub fn privileged(mut self, admin: &str) -> Self {
        self.actor = Actor::Admin(admin.to_string());
        self.privileged = true;
        self
    }

    pub fn with_match_score(mut self, score: Option<f64>) -> Self {
        self.match_score = score;
        self
    }
}

/// Result of the winning claim: the new assignment plus the competitors it closed out.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClaimWin {
    pub assignment: Assignment,
    pub shift: Shift,
    pub close_out: CloseOutSummary,
}

enum Resolution {
    Won(ClaimWin),
    Lost(MarketplaceError),
}

pub struct FulfillmentCoordinator {
    store: Arc<ShiftStore>,
    eligibility: Arc<dyn EligibilityCheck>,
}

impl FulfillmentCoordinator {
    pub fn new(store: Arc<ShiftStore>, eligibility: Arc<dyn EligibilityCheck>) -> Self {
        Self { store, eligibility }
    }

    fn ensure_eligible(&self, worker_id: &WorkerId, at: DateTime<Utc>) -> Result<(), MarketplaceError> {
        if self.eligibility.is_eligible(worker_id, at) {
            Ok(())
        } else {
            Err(MarketplaceError::NotEligible(Ineligibility::WorkerSuspended(
                worker_id.clone(),
            )))
        }
    }

    pub fn submit_application(
        &self,
        shift_id: &ShiftId,
        worker_id: &WorkerId,
        at: DateTime<Utc>,
    ) -> Result<ShiftApplication, MarketplaceError> {
        self.ensure_eligible(worker_id, at)?;

        let application = self.store.transact(shift_id, |record| {
            ensure_targetable(record)?;
            if record.has_live_application(worker_id) {
                return Err(MarketplaceError::Conflict(
                    ConflictKind::DuplicateApplication {
                        shift_id: shift_id.clone(),
                        worker_id: worker_id.clone(),
                    },
                ));
            }

            let application = ShiftApplication {
                id: ApplicationId(next_id("app")),
                shift_id: shift_id.clone(),
                worker_id: worker_id.clone(),
                source: ApplicationSource::Direct,
                submitted_at: at,
                status: ApplicationStatus::Pending,
                decided_at: None,
            };
            record.applications.push(application.clone());
            record.record(
                at,
                &Actor::Worker(worker_id.clone()),
                "application_submitted",
                application.id.to_string(),
            );
            Ok(application)
        })?;

        info!(%shift_id, %worker_id, application_id = %application.id, "application submitted");
        Ok(application)
    }

    /// Records an application on behalf of an admin, bypassing targeting rules.
    pub(crate) fn record_override_application(
        &self,
        shift_id: &ShiftId,
        worker_id: &WorkerId,
        actor: &Actor,
        at: DateTime<Utc>,
    ) -> Result<ApplicationId, MarketplaceError> {
        self.store.transact(shift_id, |record| {
            if record.shift.status != ShiftStatus::Open {
                return Err(MarketplaceError::NotEligible(Ineligibility::ShiftNotOpen {
                    shift_id: shift_id.clone(),
                    status: record.shift.status,
                }));
            }
            let id = ApplicationId(next_id("app"));
            record.applications.push(ShiftApplication {
                id: id.clone(),
                shift_id: shift_id.clone(),
                worker_id: worker_id.clone(),
                source: ApplicationSource::AdminOverride,
                submitted_at: at,
                status: ApplicationStatus::Pending,
                decided_at: None,
            });
            record.record(at, actor, "override_application", format!("{id} for {worker_id}"));
            Ok(id)
        })
    }

    pub fn withdraw_application(
        &self,
        shift_id: &ShiftId,
        application_id: &ApplicationId,
        worker_id: &WorkerId,
        at: DateTime<Utc>,
    ) -> Result<ShiftApplication, MarketplaceError> {
        self.store.transact(shift_id, |record| {
            let application = record
                .application_mut(application_id)
                .ok_or_else(|| MarketplaceError::not_found(format!("application {application_id}")))?;
            if &application.worker_id != worker_id {
                return Err(MarketplaceError::validation(
                    "application belongs to another worker",
                ));
            }
            if application.status != ApplicationStatus::Pending {
                return Err(MarketplaceError::NotEligible(Ineligibility::ClaimNotPending(
                    format!("application {application_id} is {}", application.status.label()),
                )));
            }
            application.status = ApplicationStatus::Withdrawn;
            application.decided_at = Some(at);
            let snapshot = application.clone();
            record.record(
                at,
                &Actor::Worker(worker_id.clone()),
                "application_withdrawn",
                application_id.to_string(),
            );
            Ok(snapshot)
        })
    }

    /// Creates invitations for ranked candidates, skipping workers who already hold a live
    /// invitation or application for the shift.
    pub fn send_invitations(
        &self,
        shift_id: &ShiftId,
        ranked: &[RankedCandidate],
        ttl: Duration,
        actor: &Actor,
        at: DateTime<Utc>,
    ) -> Result<Vec<ShiftInvitation>, MarketplaceError> {
        self.store.transact(shift_id, |record| {
            ensure_targetable(record)?;
            let mut sent = Vec::new();
            for candidate in ranked {
                let already_invited = record.invitations.iter().any(|invitation| {
                    invitation.worker_id == candidate.worker_id
                        && invitation.status == InvitationStatus::Sent
                });
                if already_invited || record.has_live_application(&candidate.worker_id) {
                    continue;
                }
                let invitation = ShiftInvitation {
                    id: InvitationId(next_id("inv")),
                    shift_id: shift_id.clone(),
                    worker_id: candidate.worker_id.clone(),
                    rank: candidate.rank,
                    score: candidate.score.total,
                    sent_at: at,
                    expires_at: at + ttl,
                    status: InvitationStatus::Sent,
                    responded_at: None,
                };
                record.invitations.push(invitation.clone());
                sent.push(invitation);
            }
            if !sent.is_empty() {
                record.record(at, actor, "invitations_sent", format!("{} invitations", sent.len()));
            }
            Ok(sent)
        })
    }

    pub fn decline_invitation(
        &self,
        shift_id: &ShiftId,
        invitation_id: &InvitationId,
        worker_id: &WorkerId,
        at: DateTime<Utc>,
    ) -> Result<ShiftInvitation, MarketplaceError> {
        self.store.transact(shift_id, |record| {
            let invitation = record
                .invitation_mut(invitation_id)
                .ok_or_else(|| MarketplaceError::not_found(format!("invitation {invitation_id}")))?;
            if &invitation.worker_id != worker_id {
                return Err(MarketplaceError::validation(
                    "invitation belongs to another worker",
                ));
            }
            if invitation.status != InvitationStatus::Sent {
                return Err(MarketplaceError::NotEligible(Ineligibility::ClaimNotPending(
                    format!("invitation {invitation_id} is {}", invitation.status.label()),
                )));
            }
            invitation.status = InvitationStatus::Declined;
            invitation.responded_at = Some(at);
            let snapshot = invitation.clone();
            record.record(
                at,
                &Actor::Worker(worker_id.clone()),
                "invitation_declined",
                invitation_id.to_string(),
            );
            Ok(snapshot)
        })
    }

    pub fn open_broadcast(
        &self,
        shift_id: &ShiftId,
        recipients: u32,
        actor: &Actor,
        at: DateTime<Utc>,
    ) -> Result<AvailabilityBroadcast, MarketplaceError> {
        self.store.transact(shift_id, |record| {
            ensure_targetable(record)?;
            if record.broadcast.is_some() {
                return Err(MarketplaceError::Conflict(ConflictKind::BroadcastExists(
                    shift_id.clone(),
                )));
            }
            let broadcast = AvailabilityBroadcast {
                id: BroadcastId(next_id("bcast")),
                shift_id: shift_id.clone(),
                sent_at: at,
                recipients,
                response_count: 0,
                closed: false,
                closed_at: None,
            };
            record.broadcast = Some(broadcast.clone());
            record.record(at, actor, "broadcast_opened", format!("{recipients} recipients"));
            Ok(broadcast)
        })
    }

    /// Resolves one claim. Exactly one concurrent claim on an open shift wins; every other
    /// claim fails with `ShiftAlreadyFilled` and its own application/invitation is left in a
    /// terminal state.
    pub fn attempt_claim(
        &self,
        request: &ClaimRequest,
        at: DateTime<Utc>,
    ) -> Result<ClaimWin, MarketplaceError> {
        if request.privileged && !request.actor.is_privileged() {
            return Err(MarketplaceError::validation(
                "privileged claims require an admin actor",
            ));
        }
        if !request.privileged {
            self.ensure_eligible(&request.worker_id, at)?;
        }

        let resolution = self
            .store
            .transact(&request.shift_id, |record| resolve_claim(record, request, at))?;

        match resolution {
            Resolution::Won(win) => {
                info!(
                    shift_id = %request.shift_id,
                    worker_id = %request.worker_id,
                    assignment_id = %win.assignment.id,
                    origin = request.origin.label(),
                    privileged = request.privileged,
                    rejected = win.close_out.rejected_applications.len(),
                    declined = win.close_out.declined_invitations.len(),
                    "claim won; shift filled"
                );
                Ok(win)
            }
            Resolution::Lost(error) => {
                info!(
                    shift_id = %request.shift_id,
                    worker_id = %request.worker_id,
                    origin = request.origin.label(),
                    %error,
                    "claim rejected"
                );
                Err(error)
            }
        }
    }

    /// Idempotent close-out for a shift that is no longer open. Recovers records written by a
    /// store that could not apply the fill and the close-out as one unit.
    pub fn repair_close_out(
        &self,
        shift_id: &ShiftId,
        at: DateTime<Utc>,
    ) -> Result<CloseOutSummary, MarketplaceError> {
        let summary = self.store.transact(shift_id, |record| {
            if matches!(
                record.shift.status,
                ShiftStatus::Open | ShiftStatus::PendingApproval
            ) || !record.has_open_competitors()
            {
                return Ok(CloseOutSummary::default());
            }
            let summary = record.close_out_competitors(at);
            record.record(at, &Actor::System, "close_out_repaired", describe(&summary));
            Ok(summary)
        })?;

        if !summary.is_empty() {
            warn!(%shift_id, "repaired partial close-out");
        }
        Ok(summary)
    }

    pub fn expire_invitations(
        &self,
        shift_id: &ShiftId,
        at: DateTime<Utc>,
    ) -> Result<Vec<(InvitationId, WorkerId)>, MarketplaceError> {
        self.store.transact(shift_id, |record| {
            let expired = record.expire_invitations(at);
            if !expired.is_empty() {
                record.record(
                    at,
                    &Actor::System,
                    "invitations_expired",
                    format!("{} invitations", expired.len()),
                );
            }
            Ok(expired)
        })
    }
}

fn ensure_targetable(record: &ShiftRecord) -> Result<(), MarketplaceError> {
    let shift = &record.shift;
    if shift.status != ShiftStatus::Open {
        return Err(MarketplaceError::NotEligible(Ineligibility::ShiftNotOpen {
            shift_id: shift.id.clone(),
            status: shift.status,
        }));
    }
    if shift.is_flagged() {
        return Err(MarketplaceError::NotEligible(Ineligibility::ShiftFlagged(
            shift.id.clone(),
        )));
    }
    Ok(())
}

fn describe(summary: &CloseOutSummary) -> String {
    format!(
        "{} applications rejected, {} invitations declined, {} invitations expired, broadcast closed: {}",
        summary.rejected_applications.len(),
        summary.declined_invitations.len(),
        summary.expired_invitations.len(),
        summary.broadcast_closed
    )
}

fn resolve_claim(
    record: &mut ShiftRecord,
    request: &ClaimRequest,
    at: DateTime<Utc>,
) -> Result<Resolution, MarketplaceError> {
    let shift_id = record.shift.id.clone();
    let status = record.shift.status;

    if status != ShiftStatus::Open {
        if status.is_past_open() {
            retire_losing_claim(record, request, at);
            return Ok(Resolution::Lost(MarketplaceError::Conflict(
                ConflictKind::ShiftAlreadyFilled(shift_id),
            )));
        }
        return Err(MarketplaceError::NotEligible(Ineligibility::ShiftNotOpen {
            shift_id,
            status,
        }));
    }

    if let Some(active) = record.active_assignment() {
        return Err(MarketplaceError::InvariantViolation(format!(
            "open shift {shift_id} already holds active assignment {}",
            active.id
        )));
    }

    if record.shift.is_flagged() && !request.privileged {
        return Err(MarketplaceError::NotEligible(Ineligibility::ShiftFlagged(
            shift_id,
        )));
    }

    match &request.origin {
        ClaimOrigin::Application(id) => {
            let application = record
                .application_mut(id)
                .ok_or_else(|| MarketplaceError::not_found(format!("application {id}")))?;
            if application.worker_id != request.worker_id {
                return Err(MarketplaceError::validation(
                    "application belongs to another worker",
                ));
            }
            if application.status != ApplicationStatus::Pending {
                return Err(MarketplaceError::NotEligible(Ineligibility::ClaimNotPending(
                    format!("application {id} is {}", application.status.label()),
                )));
            }
            application.status = ApplicationStatus::Approved;
            application.decided_at = Some(at);
        }
        ClaimOrigin::Invitation(id) => {
            let invitation = record
                .invitation_mut(id)
                .ok_or_else(|| MarketplaceError::not_found(format!("invitation {id}")))?;
            if invitation.worker_id != request.worker_id {
                return Err(MarketplaceError::validation(
                    "invitation belongs to another worker",
                ));
            }
            if invitation.status != InvitationStatus::Sent {
                return Err(MarketplaceError::NotEligible(Ineligibility::ClaimNotPending(
                    format!("invitation {id} is {}", invitation.status.label()),
                )));
            }
            if invitation.is_expired_at(at) && !request.privileged {
                invitation.status = InvitationStatus::Expired;
                invitation.responded_at = Some(at);
                let expired_at = invitation.expires_at;
                return Ok(Resolution::Lost(MarketplaceError::NotEligible(
                    Ineligibility::InvitationExpired { expired_at },
                )));
            }
            invitation.status = InvitationStatus::Accepted;
            invitation.responded_at = Some(at);
        }
        ClaimOrigin::BroadcastResponse(id) => {
            let broadcast = record
                .broadcast
                .as_mut()
                .filter(|broadcast| &broadcast.id == id)
                .ok_or_else(|| MarketplaceError::not_found(format!("broadcast {id}")))?;
            if broadcast.closed {
                return Err(MarketplaceError::NotEligible(Ineligibility::BroadcastClosed(
                    shift_id,
                )));
            }
            broadcast.response_count += 1;

            let pending = record.applications.iter_mut().find(|application| {
                application.worker_id == request.worker_id
                    && application.status == ApplicationStatus::Pending
            });
            match pending {
                Some(application) => {
                    application.status = ApplicationStatus::Approved;
                    application.decided_at = Some(at);
                }
                None => record.applications.push(ShiftApplication {
                    id: ApplicationId(next_id("app")),
                    shift_id: shift_id.clone(),
                    worker_id: request.worker_id.clone(),
                    source: ApplicationSource::BroadcastResponse,
                    submitted_at: at,
                    status: ApplicationStatus::Approved,
                    decided_at: Some(at),
                }),
            }
        }
    }

    let assignment = Assignment {
        id: AssignmentId(next_id("asg")),
        shift_id: shift_id.clone(),
        worker_id: request.worker_id.clone(),
        origin: request.origin.clone(),
        privileged: request.privileged,
        match_score: request.match_score,
        assigned_at: at,
        checked_in_at: None,
        completed_at: None,
        closed_at: None,
        status: AssignmentStatus::Assigned,
        feedback_pending: false,
        rated: false,
    };

    record.mark_filled(at, &request.actor);
    record.assignments.push(assignment.clone());
    record.record(
        at,
        &request.actor,
        "assignment_created",
        format!(
            "{} for {} via {}",
            assignment.id,
            request.worker_id,
            request.origin.label()
        ),
    );

    let close_out = record.close_out_competitors(at);
    if !close_out.is_empty() {
        record.record(at, &request.actor, "competitors_closed", describe(&close_out));
    }

    Ok(Resolution::Won(ClaimWin {
        assignment,
        shift: record.shift.clone(),
        close_out,
    }))
}

/// Marks the loser's own claim terminal once the shift is filled. Usually the winner's
/// close-out already did this, in which case nothing changes and nothing is written.
fn retire_losing_claim(record: &mut ShiftRecord, request: &ClaimRequest, at: DateTime<Utc>) {
    let retired = match &request.origin {
        ClaimOrigin::Application(id) => match record.application_mut(id) {
            Some(application) if application.status == ApplicationStatus::Pending => {
                application.status = ApplicationStatus::Rejected;
                application.decided_at = Some(at);
                true
            }
            _ => false,
        },
        ClaimOrigin::Invitation(id) => match record.invitation_mut(id) {
            Some(invitation) if invitation.status == InvitationStatus::Sent => {
                invitation.status = InvitationStatus::Declined;
                invitation.responded_at = Some(at);
                true
            }
            _ => false,
        },
        ClaimOrigin::BroadcastResponse(id) => {
            if let Some(broadcast) = record
                .broadcast
                .as_mut()
                .filter(|broadcast| &broadcast.id == id)
            {
                broadcast.response_count += 1;
            }
            let pending = record.applications.iter_mut().find(|application| {
                application.worker_id == request.worker_id
                    && application.status == ApplicationStatus::Pending
            });
            match pending {
                Some(application) => {
                    application.status = ApplicationStatus::Rejected;
                    application.decided_at = Some(at);
                }
                None => record.applications.push(ShiftApplication {
                    id: ApplicationId(next_id("app")),
                    shift_id: record.shift.id.clone(),
                    worker_id: request.worker_id.clone(),
                    source: ApplicationSource::BroadcastResponse,
                    submitted_at: at,
                    status: ApplicationStatus::Rejected,
                    decided_at: Some(at),
                }),
            }
            true
        }
    };

    if retired {
        record.record(
            at,
            &request.actor,
            "claim_lost",
            format!("{} via {}", request.worker_id, request.origin.label()),
        );
    }
}
