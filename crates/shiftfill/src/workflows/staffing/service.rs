use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use super::domain::{
    Actor, ApplicationId, Assignment, AssignmentId, AssignmentStatus, AvailabilityBroadcast,
    ClaimOrigin, InvitationId, PaymentId, Shift, ShiftApplication, ShiftId, ShiftInvitation,
    ShiftPosting, WorkerId,
};
use super::error::{Ineligibility, MarketplaceError};
use super::escrow::{
    DisputeOutcome, EscrowLedger, HoldRequest, PaymentStatus, PendingOperation, ShiftPayment,
};
use super::fulfillment::{ClaimRequest, ClaimWin, FulfillmentCoordinator};
use super::lifecycle::{
    require_admin, AdminCancellation, AssignmentLifecycle, AttendancePolicy, BulkApproval,
    Compensation, CompletionSignal, NoShowOutcome, ShiftCancellation, ShiftLifecycle,
    ShiftRemoval,
};
use super::matching::{
    Candidate, CandidateRanker, MatchOutcome, MatchScorer, MatchWeights, RankedCandidate,
    ScoringPolicy,
};
use super::memory::{
    InMemoryPaymentRepository, InMemoryShiftRepository, InMemoryStandingRepository,
};
use super::ports::{
    Notification, NotificationEvent, Notifier, PaymentProvider, PaymentRepository, Recipient,
    ShiftRepository, StandingRepository, SuspensionSink, WorkerDirectory,
};
use super::record::{CloseOutSummary, ShiftRecord};
use super::reliability::{ReliabilityFeedback, ReliabilityPolicy, StandingUpdate, WorkerStanding};
use super::store::ShiftStore;

/// Tunables for the whole engine, usually built from `MarketplaceConfig`.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketplaceSettings {
    pub weights: MatchWeights,
    pub scoring: ScoringPolicy,
    pub urgent_acceptance_threshold: f64,
    pub attendance: AttendancePolicy,
    pub invitation_ttl: Duration,
    pub claim_retry_limit: u32,
    pub reliability: ReliabilityPolicy,
    pub platform_fee_bps: u32,
    /// Time after completion before escrow is released automatically. Zero releases at once.
    pub dispute_window: Duration,
}

impl Default for MarketplaceSettings {
    fn default() -> Self {
        Self {
            weights: MatchWeights::default(),
            scoring: ScoringPolicy::default(),
            urgent_acceptance_threshold: 0.5,
            attendance: AttendancePolicy::default(),
            invitation_ttl: Duration::minutes(60),
            claim_retry_limit: 8,
            reliability: ReliabilityPolicy::default(),
            platform_fee_bps: 1_500,
            dispute_window: Duration::hours(24),
        }
    }
}

/// External collaborators and storage the service is wired against.
#[derive(Clone)]
pub struct Collaborators {
    pub shifts: Arc<dyn ShiftRepository>,
    pub payments: Arc<dyn PaymentRepository>,
    pub standings: Arc<dyn StandingRepository>,
    pub directory: Arc<dyn WorkerDirectory>,
    pub notifier: Arc<dyn Notifier>,
    pub provider: Arc<dyn PaymentProvider>,
    pub suspensions: Arc<dyn SuspensionSink>,
}

impl Collaborators {
    /// In-process storage with the given external adapters.
    pub fn in_memory(
        directory: Arc<dyn WorkerDirectory>,
        notifier: Arc<dyn Notifier>,
        provider: Arc<dyn PaymentProvider>,
        suspensions: Arc<dyn SuspensionSink>,
    ) -> Self {
        Self {
            shifts: Arc::new(InMemoryShiftRepository::new()),
            payments: Arc::new(InMemoryPaymentRepository::new()),
            standings: Arc::new(InMemoryStandingRepository::new()),
            directory,
            notifier,
            provider,
            suspensions,
        }
    }
}

/// A winning claim together with the escrow opened for it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClaimReport {
    #[serde(flatten)]
    pub win: ClaimWin,
    /// `None` only when the hold could not be recorded at all; a provider failure shows up as
    /// a payment in `failed`.
    pub payment: Option<ShiftPayment>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionReport {
    pub assignment: Assignment,
    /// `None` while the standing update is still pending.
    pub standing: Option<StandingUpdate>,
    pub payment: Option<ShiftPayment>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NoShowReport {
    #[serde(flatten)]
    pub outcome: NoShowOutcome,
    /// `None` while the strike is still pending.
    pub standing: Option<StandingUpdate>,
    pub payment: Option<ShiftPayment>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CancellationReport {
    #[serde(flatten)]
    pub cancellation: ShiftCancellation,
    pub payment: Option<ShiftPayment>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdminCancellationReport {
    #[serde(flatten)]
    pub cancellation: AdminCancellation,
    pub payment: Option<ShiftPayment>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemovalReport {
    #[serde(flatten)]
    pub removal: ShiftRemoval,
    pub refunded_payments: Vec<ShiftPayment>,
}

/// Counts produced by one pass of [`MarketplaceService::sweep`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub shifts_scanned: usize,
    pub invitations_expired: usize,
    pub no_shows: usize,
    pub close_outs_repaired: usize,
    pub feedback_applied: usize,
    pub payments_released: usize,
    pub payment_failures: usize,
    pub errors: usize,
}

/// Facade composing matching, fulfillment, lifecycles, escrow and reliability feedback.
pub struct MarketplaceService {
    store: Arc<ShiftStore>,
    shifts: ShiftLifecycle,
    fulfillment: FulfillmentCoordinator,
    assignments: AssignmentLifecycle,
    escrow: EscrowLedger,
    reliability: Arc<ReliabilityFeedback>,
    ranker: CandidateRanker,
    directory: Arc<dyn WorkerDirectory>,
    notifier: Arc<dyn Notifier>,
    invitation_ttl: Duration,
    dispute_window: Duration,
}

impl MarketplaceService {
    pub fn new(
        collaborators: Collaborators,
        settings: MarketplaceSettings,
    ) -> Result<Self, MarketplaceError> {
        let scorer = MatchScorer::new(settings.weights, settings.scoring)?;
        let ranker = CandidateRanker::new(scorer, settings.urgent_acceptance_threshold)?;
        if settings.invitation_ttl <= Duration::zero() {
            return Err(MarketplaceError::validation("invitation ttl must be positive"));
        }
        if settings.dispute_window < Duration::zero() {
            return Err(MarketplaceError::validation("dispute window must not be negative"));
        }

        let store = Arc::new(ShiftStore::new(
            collaborators.shifts,
            settings.claim_retry_limit,
        ));
        let reliability = Arc::new(ReliabilityFeedback::new(
            collaborators.standings,
            collaborators.suspensions,
            settings.reliability,
        ));

        Ok(Self {
            shifts: ShiftLifecycle::new(Arc::clone(&store)),
            fulfillment: FulfillmentCoordinator::new(Arc::clone(&store), reliability.clone()),
            assignments: AssignmentLifecycle::new(Arc::clone(&store), settings.attendance),
            escrow: EscrowLedger::new(
                collaborators.payments,
                collaborators.provider,
                settings.platform_fee_bps,
            ),
            store,
            reliability,
            ranker,
            directory: collaborators.directory,
            notifier: collaborators.notifier,
            invitation_ttl: settings.invitation_ttl,
            dispute_window: settings.dispute_window,
        })
    }

    pub fn post_shift(&self, posting: ShiftPosting, at: DateTime<Utc>) -> Result<Shift, MarketplaceError> {
        self.shifts.post(posting, at)
    }

    pub fn approve_shift(
        &self,
        shift_id: &ShiftId,
        actor: &Actor,
        at: DateTime<Utc>,
    ) -> Result<Shift, MarketplaceError> {
        self.shifts.approve(shift_id, actor, at)
    }

    pub fn bulk_approve(&self, shift_ids: &[ShiftId], actor: &Actor, at: DateTime<Utc>) -> BulkApproval {
        self.shifts.bulk_approve(shift_ids, actor, at)
    }

    pub fn shift(&self, shift_id: &ShiftId) -> Result<ShiftRecord, MarketplaceError> {
        self.shifts.view(shift_id)
    }

    pub fn cancel_shift(
        &self,
        shift_id: &ShiftId,
        actor: &Actor,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<CancellationReport, MarketplaceError> {
        let cancellation = self.shifts.cancel(shift_id, actor, reason, at)?;

        let payment = match &cancellation.cancelled_assignment {
            Some(assignment) => {
                self.notify(
                    Notification::new(
                        Recipient::Worker(assignment.worker_id.clone()),
                        NotificationEvent::ShiftCancelled,
                    )
                    .with("shift_id", shift_id)
                    .with("assignment_id", &assignment.id),
                );
                self.settle_compensation(&assignment.id, Compensation::FullRefund, reason, actor, at)
            }
            None => None,
        };
        self.notify_losers(shift_id, &cancellation.close_out);
        self.notify(
            Notification::new(
                Recipient::Business(cancellation.shift.business_id.clone()),
                NotificationEvent::ShiftCancelled,
            )
            .with("shift_id", shift_id)
            .with("reason", reason),
        );

        Ok(CancellationReport {
            cancellation,
            payment,
        })
    }

    /// Ranks the worker directory against the shift as it is stored now.
    pub fn rank_candidates(
        &self,
        shift_id: &ShiftId,
        at: DateTime<Utc>,
    ) -> Result<Vec<RankedCandidate>, MarketplaceError> {
        let record = self.store.load(shift_id)?;
        self.rank_for(&record.shift, at)
    }

    fn rank_for(&self, shift: &Shift, at: DateTime<Utc>) -> Result<Vec<RankedCandidate>, MarketplaceError> {
        let mut pool = Vec::new();
        for profile in self.directory.pool()? {
            let standing = self.reliability.standing(&profile.worker_id)?;
            pool.push(Candidate::new(profile, standing));
        }
        Ok(self.ranker.rank(shift, &pool, self.reliability.as_ref(), at)?)
    }

    /// Score used for the claim. Hard-filtered workers are rejected unless `enforce` is off.
    fn claim_score(
        &self,
        shift: &Shift,
        worker_id: &WorkerId,
        enforce: bool,
    ) -> Result<Option<f64>, MarketplaceError> {
        let Some(profile) = self.directory.profile(worker_id)? else {
            return Ok(None);
        };
        let standing = self.reliability.standing(worker_id)?;
        match self.ranker.scorer().score(&Candidate::new(profile, standing), shift)? {
            MatchOutcome::Scored(score) => Ok(Some(score.total)),
            MatchOutcome::Excluded(reason) if enforce => Err(MarketplaceError::NotEligible(
                Ineligibility::HardFiltered {
                    shift_id: shift.id.clone(),
                    worker_id: worker_id.clone(),
                    reason: reason.to_string(),
                },
            )),
            MatchOutcome::Excluded(_) => Ok(None),
        }
    }

    pub fn apply(
        &self,
        shift_id: &ShiftId,
        worker_id: &WorkerId,
        at: DateTime<Utc>,
    ) -> Result<ShiftApplication, MarketplaceError> {
        self.fulfillment.submit_application(shift_id, worker_id, at)
    }

    pub fn withdraw_application(
        &self,
        shift_id: &ShiftId,
        application_id: &ApplicationId,
        worker_id: &WorkerId,
        at: DateTime<Utc>,
    ) -> Result<ShiftApplication, MarketplaceError> {
        self.fulfillment
            .withdraw_application(shift_id, application_id, worker_id, at)
    }

    /// The owning business (or an admin) picks an applicant; this is a claim like any other.
    pub fn approve_application(
        &self,
        shift_id: &ShiftId,
        application_id: &ApplicationId,
        actor: &Actor,
        at: DateTime<Utc>,
    ) -> Result<ClaimReport, MarketplaceError> {
        let record = self.store.load(shift_id)?;
        match actor {
            Actor::Business(business_id) if business_id == &record.shift.business_id => {}
            Actor::Admin(_) => {}
            _ => {
                return Err(MarketplaceError::NotEligible(Ineligibility::NotShiftOwner(
                    shift_id.clone(),
                )))
            }
        }
        let worker_id = record
            .applications
            .iter()
            .find(|application| &application.id == application_id)
            .map(|application| application.worker_id.clone())
            .ok_or_else(|| MarketplaceError::not_found(format!("application {application_id}")))?;

        let score = self.claim_score(&record.shift, &worker_id, true)?;
        let request = ClaimRequest::new(
            shift_id.clone(),
            worker_id,
            ClaimOrigin::Application(application_id.clone()),
        )
        .acting_as(actor.clone())
        .with_match_score(score);
        self.claim(request, at)
    }

    pub fn invite_top_candidates(
        &self,
        shift_id: &ShiftId,
        limit: usize,
        actor: &Actor,
        at: DateTime<Utc>,
    ) -> Result<Vec<ShiftInvitation>, MarketplaceError> {
        if limit == 0 {
            return Err(MarketplaceError::validation("invitation limit must be positive"));
        }
        let record = self.store.load(shift_id)?;
        let ranked = self.rank_for(&record.shift, at)?;
        let top: Vec<RankedCandidate> = ranked.into_iter().take(limit).collect();

        let invitations =
            self.fulfillment
                .send_invitations(shift_id, &top, self.invitation_ttl, actor, at)?;
        for invitation in &invitations {
            self.notify(
                Notification::new(
                    Recipient::Worker(invitation.worker_id.clone()),
                    NotificationEvent::InvitationSent,
                )
                .with("shift_id", shift_id)
                .with("invitation_id", &invitation.id)
                .with("rank", invitation.rank)
                .with("expires_at", invitation.expires_at.to_rfc3339()),
            );
        }
        info!(%shift_id, sent = invitations.len(), "invitations sent");
        Ok(invitations)
    }

    pub fn accept_invitation(
        &self,
        shift_id: &ShiftId,
        invitation_id: &InvitationId,
        worker_id: &WorkerId,
        at: DateTime<Utc>,
    ) -> Result<ClaimReport, MarketplaceError> {
        let record = self.store.load(shift_id)?;
        let score = record
            .invitations
            .iter()
            .find(|invitation| &invitation.id == invitation_id)
            .map(|invitation| invitation.score);
        let request = ClaimRequest::new(
            shift_id.clone(),
            worker_id.clone(),
            ClaimOrigin::Invitation(invitation_id.clone()),
        )
        .with_match_score(score);
        self.claim(request, at)
    }

    pub fn decline_invitation(
        &self,
        shift_id: &ShiftId,
        invitation_id: &InvitationId,
        worker_id: &WorkerId,
        at: DateTime<Utc>,
    ) -> Result<ShiftInvitation, MarketplaceError> {
        self.fulfillment
            .decline_invitation(shift_id, invitation_id, worker_id, at)
    }

    pub fn broadcast(
        &self,
        shift_id: &ShiftId,
        actor: &Actor,
        at: DateTime<Utc>,
    ) -> Result<AvailabilityBroadcast, MarketplaceError> {
        let record = self.store.load(shift_id)?;
        let ranked = self.rank_for(&record.shift, at)?;
        let recipients = u32::try_from(ranked.len()).unwrap_or(u32::MAX);
        let broadcast = self.fulfillment.open_broadcast(shift_id, recipients, actor, at)?;
        for candidate in &ranked {
            self.notify(
                Notification::new(
                    Recipient::Worker(candidate.worker_id.clone()),
                    NotificationEvent::BroadcastSent,
                )
                .with("shift_id", shift_id)
                .with("broadcast_id", &broadcast.id),
            );
        }
        info!(%shift_id, recipients, "availability broadcast sent");
        Ok(broadcast)
    }

    pub fn respond_to_broadcast(
        &self,
        shift_id: &ShiftId,
        worker_id: &WorkerId,
        at: DateTime<Utc>,
    ) -> Result<ClaimReport, MarketplaceError> {
        let record = self.store.load(shift_id)?;
        let broadcast_id = record
            .broadcast
            .as_ref()
            .map(|broadcast| broadcast.id.clone())
            .ok_or_else(|| MarketplaceError::not_found(format!("broadcast for shift {shift_id}")))?;
        let score = self.claim_score(&record.shift, worker_id, true)?;
        let request = ClaimRequest::new(
            shift_id.clone(),
            worker_id.clone(),
            ClaimOrigin::BroadcastResponse(broadcast_id),
        )
        .with_match_score(score);
        self.claim(request, at)
    }

    fn claim(&self, request: ClaimRequest, at: DateTime<Utc>) -> Result<ClaimReport, MarketplaceError> {
        match self.fulfillment.attempt_claim(&request, at) {
            Ok(win) => Ok(self.after_win(win, &request.actor, at)),
            Err(error) => {
                if let MarketplaceError::Conflict(_) = &error {
                    self.notify(
                        Notification::new(
                            Recipient::Worker(request.worker_id.clone()),
                            NotificationEvent::ClaimRejected,
                        )
                        .with("shift_id", &request.shift_id)
                        .with("reason", &error),
                    );
                }
                Err(error)
            }
        }
    }

    /// Opens escrow and fans out outcome notifications. The claim already stands, so failures
    /// here are logged and left for the sweep or admin tooling.
    fn after_win(&self, win: ClaimWin, actor: &Actor, at: DateTime<Utc>) -> ClaimReport {
        let assignment = &win.assignment;
        let hold = HoldRequest {
            assignment_id: assignment.id.clone(),
            shift_id: win.shift.id.clone(),
            worker_id: assignment.worker_id.clone(),
            business_id: win.shift.business_id.clone(),
            amount_cents: win.shift.gross_amount_cents,
        };
        let payment = match self.escrow.hold(hold, actor, at) {
            Ok(payment) => Some(payment),
            Err(error) => {
                error!(assignment_id = %assignment.id, %error, "escrow hold failed");
                self.notify(
                    Notification::new(Recipient::Admin, NotificationEvent::PaymentFailed)
                        .with("assignment_id", &assignment.id)
                        .with("error", &error),
                );
                self.escrow.for_assignment(&assignment.id).ok().flatten()
            }
        };

        self.notify(
            Notification::new(
                Recipient::Worker(assignment.worker_id.clone()),
                NotificationEvent::ClaimAccepted,
            )
            .with("shift_id", &win.shift.id)
            .with("assignment_id", &assignment.id),
        );
        self.notify(
            Notification::new(
                Recipient::Business(win.shift.business_id.clone()),
                NotificationEvent::ShiftFilled,
            )
            .with("shift_id", &win.shift.id)
            .with("worker_id", &assignment.worker_id),
        );
        self.notify_losers(&win.shift.id, &win.close_out);

        ClaimReport { win, payment }
    }

    pub fn check_in(
        &self,
        assignment_id: &AssignmentId,
        worker_id: &WorkerId,
        at: DateTime<Utc>,
    ) -> Result<Assignment, MarketplaceError> {
        self.assignments.check_in(assignment_id, worker_id, at)
    }

    /// Completes the assignment, schedules the escrow release and credits the worker. Escrow
    /// is settled first; a standing update that fails is left pending for the sweep.
    pub fn complete(
        &self,
        assignment_id: &AssignmentId,
        signal: CompletionSignal,
        actor: &Actor,
        at: DateTime<Utc>,
    ) -> Result<CompletionReport, MarketplaceError> {
        let assignment = self.assignments.complete(assignment_id, signal, actor, at)?;

        let payment = match self.escrow.for_assignment(assignment_id)? {
            Some(payment) if payment.status == PaymentStatus::InEscrow => {
                if self.dispute_window <= Duration::zero() {
                    self.release_quietly(&payment.id, at)
                } else {
                    Some(self.escrow.schedule_release(
                        &payment.id,
                        at + self.dispute_window,
                        &Actor::System,
                        at,
                    )?)
                }
            }
            other => other,
        };
        let standing = self.apply_feedback(&assignment, at);

        Ok(CompletionReport {
            assignment,
            standing,
            payment,
        })
    }

    /// Rates the worker of a completed assignment. Each assignment can be rated once.
    pub fn record_rating(
        &self,
        assignment_id: &AssignmentId,
        stars: u8,
        actor: &Actor,
        at: DateTime<Utc>,
    ) -> Result<WorkerStanding, MarketplaceError> {
        if !(1..=5).contains(&stars) {
            return Err(MarketplaceError::validation(format!(
                "rating must be between 1 and 5, found {stars}"
            )));
        }
        let assignment = self.assignments.mark_rated(assignment_id, actor, at)?;
        self.reliability.record_rating(&assignment.worker_id, stars)
    }

    pub fn mark_no_show(
        &self,
        assignment_id: &AssignmentId,
        at: DateTime<Utc>,
    ) -> Result<NoShowReport, MarketplaceError> {
        let outcome = self.assignments.mark_no_show(assignment_id, at)?;
        let worker_id = outcome.assignment.worker_id.clone();
        let payment = self.settle_compensation(
            assignment_id,
            Compensation::FullRefund,
            "worker did not check in",
            &Actor::System,
            at,
        );
        let standing = self.apply_feedback(&outcome.assignment, at);

        let shift_id = &outcome.assignment.shift_id;
        if let Ok(record) = self.store.load(shift_id) {
            self.notify(
                Notification::new(
                    Recipient::Business(record.shift.business_id.clone()),
                    NotificationEvent::NoShowRecorded,
                )
                .with("shift_id", shift_id)
                .with("worker_id", &worker_id)
                .with("shift_status", outcome.shift_status),
            );
        }

        Ok(NoShowReport {
            outcome,
            standing,
            payment,
        })
    }

    /// Folds a terminal assignment into the worker standing and clears its pending marker.
    /// Failures are logged and left for the next sweep.
    fn apply_feedback(
        &self,
        assignment: &Assignment,
        at: DateTime<Utc>,
    ) -> Option<StandingUpdate> {
        let assignment_id = &assignment.id;
        let worker_id = &assignment.worker_id;
        let update = match assignment.status {
            AssignmentStatus::Completed => {
                self.reliability.record_completion(worker_id, assignment_id)
            }
            AssignmentStatus::NoShow => {
                self.reliability.record_no_show(worker_id, assignment_id, at)
            }
            status => {
                warn!(%assignment_id, status = status.label(), "no reliability feedback for status");
                return None;
            }
        };
        match update {
            Ok(update) => {
                if let Err(error) = self.assignments.feedback_applied(assignment_id) {
                    warn!(%assignment_id, %error, "pending feedback marker not cleared");
                }
                Some(update)
            }
            Err(error) => {
                warn!(%assignment_id, %worker_id, %error, "standing update deferred");
                None
            }
        }
    }

    pub fn worker_standing(&self, worker_id: &WorkerId) -> Result<WorkerStanding, MarketplaceError> {
        self.reliability.standing(worker_id)
    }

    pub fn payment(&self, payment_id: &PaymentId) -> Result<ShiftPayment, MarketplaceError> {
        self.escrow.get(payment_id)
    }

    pub fn payment_for_assignment(
        &self,
        assignment_id: &AssignmentId,
    ) -> Result<ShiftPayment, MarketplaceError> {
        self.escrow
            .for_assignment(assignment_id)?
            .ok_or_else(|| MarketplaceError::not_found(format!("payment for {assignment_id}")))
    }

    pub fn release_payment(
        &self,
        payment_id: &PaymentId,
        actor: &Actor,
        at: DateTime<Utc>,
    ) -> Result<ShiftPayment, MarketplaceError> {
        let payment = self.escrow.release_on_request(payment_id, actor, at)?;
        self.notify_payment(&payment, NotificationEvent::PaymentReleased);
        Ok(payment)
    }

    pub fn dispute_payment(
        &self,
        payment_id: &PaymentId,
        reason: &str,
        actor: &Actor,
        at: DateTime<Utc>,
    ) -> Result<ShiftPayment, MarketplaceError> {
        self.escrow.dispute(payment_id, reason, actor, at)
    }

    pub fn resolve_dispute(
        &self,
        payment_id: &PaymentId,
        outcome: DisputeOutcome,
        actor: &Actor,
        at: DateTime<Utc>,
    ) -> Result<ShiftPayment, MarketplaceError> {
        self.escrow.resolve_dispute(payment_id, outcome, actor, at)
    }

    pub fn retry_payment(
        &self,
        payment_id: &PaymentId,
        actor: &Actor,
        at: DateTime<Utc>,
    ) -> Result<ShiftPayment, MarketplaceError> {
        let payment = self.escrow.retry(payment_id, actor, at)?;
        match payment.status {
            PaymentStatus::Released | PaymentStatus::PartiallyReleased => {
                self.notify_payment(&payment, NotificationEvent::PaymentReleased)
            }
            PaymentStatus::Refunded => self.notify_payment(&payment, NotificationEvent::PaymentRefunded),
            _ => {}
        }
        Ok(payment)
    }

    pub fn flag_shift(
        &self,
        shift_id: &ShiftId,
        reason: &str,
        actor: &Actor,
        at: DateTime<Utc>,
    ) -> Result<Shift, MarketplaceError> {
        self.shifts.flag(shift_id, reason, actor, at)
    }

    pub fn unflag_shift(
        &self,
        shift_id: &ShiftId,
        actor: &Actor,
        at: DateTime<Utc>,
    ) -> Result<Shift, MarketplaceError> {
        self.shifts.unflag(shift_id, actor, at)
    }

    /// Force-removes a shift and refunds any payment still held for its past assignments.
    pub fn remove_shift(
        &self,
        shift_id: &ShiftId,
        reason: &str,
        actor: &Actor,
        at: DateTime<Utc>,
    ) -> Result<RemovalReport, MarketplaceError> {
        let removal = self.shifts.remove(shift_id, reason, actor, at)?;
        let mut refunded_payments = Vec::new();
        for assignment_id in &removal.assignments {
            let held = match self.escrow.for_assignment(assignment_id) {
                Ok(Some(payment)) => matches!(
                    payment.status,
                    PaymentStatus::InEscrow | PaymentStatus::Resolved
                ),
                _ => false,
            };
            if held {
                if let Some(payment) =
                    self.settle_compensation(assignment_id, Compensation::FullRefund, reason, actor, at)
                {
                    refunded_payments.push(payment);
                }
            }
        }
        self.notify_losers(shift_id, &removal.close_out);
        Ok(RemovalReport {
            removal,
            refunded_payments,
        })
    }

    /// Manual override assignment. Skips ranking and eligibility but still goes through the
    /// atomic claim and close-out.
    pub fn override_assign(
        &self,
        shift_id: &ShiftId,
        worker_id: &WorkerId,
        actor: &Actor,
        at: DateTime<Utc>,
    ) -> Result<ClaimReport, MarketplaceError> {
        require_admin(actor)?;
        let record = self.store.load(shift_id)?;
        let score = self.claim_score(&record.shift, worker_id, false)?;
        let application_id =
            self.fulfillment
                .record_override_application(shift_id, worker_id, actor, at)?;
        let admin = match actor {
            Actor::Admin(name) => name.as_str(),
            _ => "admin",
        };
        let request = ClaimRequest::new(
            shift_id.clone(),
            worker_id.clone(),
            ClaimOrigin::Application(application_id),
        )
        .privileged(admin)
        .with_match_score(score);
        warn!(%shift_id, %worker_id, %actor, "manual override assignment");
        self.claim(request, at)
    }

    pub fn admin_cancel_assignment(
        &self,
        assignment_id: &AssignmentId,
        reason: &str,
        actor: &Actor,
        at: DateTime<Utc>,
    ) -> Result<AdminCancellationReport, MarketplaceError> {
        let cancellation = self.assignments.admin_cancel(assignment_id, reason, actor, at)?;
        let payment = self.settle_compensation(
            assignment_id,
            cancellation.compensation,
            reason,
            actor,
            at,
        );
        self.notify(
            Notification::new(
                Recipient::Worker(cancellation.assignment.worker_id.clone()),
                NotificationEvent::ShiftCancelled,
            )
            .with("assignment_id", assignment_id)
            .with("reason", reason),
        );
        Ok(AdminCancellationReport {
            cancellation,
            payment,
        })
    }

    pub fn manual_refund(
        &self,
        payment_id: &PaymentId,
        amount_cents: u64,
        reason: &str,
        actor: &Actor,
        at: DateTime<Utc>,
    ) -> Result<ShiftPayment, MarketplaceError> {
        require_admin(actor)?;
        let payment = self.escrow.refund(payment_id, amount_cents, reason, actor, at)?;
        self.notify_payment(&payment, NotificationEvent::PaymentRefunded);
        Ok(payment)
    }

    pub fn lift_suspension(
        &self,
        worker_id: &WorkerId,
        actor: &Actor,
    ) -> Result<WorkerStanding, MarketplaceError> {
        require_admin(actor)?;
        self.reliability.lift_suspension(worker_id)
    }

    /// Enforces time-based transitions: invitation expiry, no-shows, scheduled releases and
    /// close-out repair. Staleness is bounded by how often this runs.
    pub fn sweep(&self, at: DateTime<Utc>) -> Result<SweepReport, MarketplaceError> {
        let mut report = SweepReport::default();

        for shift_id in self.store.active_shift_ids()? {
            report.shifts_scanned += 1;

            match self.fulfillment.expire_invitations(&shift_id, at) {
                Ok(expired) => report.invitations_expired += expired.len(),
                Err(error) => {
                    warn!(%shift_id, %error, "invitation expiry failed");
                    report.errors += 1;
                }
            }

            match self.fulfillment.repair_close_out(&shift_id, at) {
                Ok(summary) if !summary.is_empty() => report.close_outs_repaired += 1,
                Ok(_) => {}
                Err(error) => {
                    warn!(%shift_id, %error, "close-out repair failed");
                    report.errors += 1;
                }
            }

            let record = match self.store.load(&shift_id) {
                Ok(record) => record,
                Err(error) => {
                    warn!(%shift_id, %error, "shift lookup failed during sweep");
                    report.errors += 1;
                    continue;
                }
            };
            self.redrive_feedback(&record, at, &mut report);
            if let Some(assignment_id) = self.assignments.is_overdue(&record, at) {
                match self.mark_no_show(&assignment_id, at) {
                    Ok(_) => report.no_shows += 1,
                    Err(error) => {
                        warn!(%shift_id, %assignment_id, %error, "no-show transition failed");
                        report.errors += 1;
                    }
                }
            }
        }

        let releases = self.escrow.release_due(at)?;
        for payment_id in &releases.released {
            if let Ok(payment) = self.escrow.get(payment_id) {
                self.notify_payment(&payment, NotificationEvent::PaymentReleased);
            }
        }
        report.payments_released = releases.released.len();
        report.payment_failures = releases.failed.len();

        info!(
            shifts = report.shifts_scanned,
            invitations_expired = report.invitations_expired,
            no_shows = report.no_shows,
            feedback_applied = report.feedback_applied,
            released = report.payments_released,
            errors = report.errors,
            "sweep finished"
        );
        Ok(report)
    }

    fn redrive_feedback(&self, record: &ShiftRecord, at: DateTime<Utc>, report: &mut SweepReport) {
        for assignment in self.assignments.awaiting_feedback(record) {
            match self.apply_feedback(&assignment, at) {
                Some(_) => report.feedback_applied += 1,
                None => report.errors += 1,
            }
        }
    }

    /// Applies escrow compensation after a cancellation or no-show. The state change has
    /// already been committed, so provider failures are logged and surfaced to admins.
    fn settle_compensation(
        &self,
        assignment_id: &AssignmentId,
        compensation: Compensation,
        reason: &str,
        actor: &Actor,
        at: DateTime<Utc>,
    ) -> Option<ShiftPayment> {
        let payment = match self.escrow.for_assignment(assignment_id) {
            Ok(Some(payment)) => payment,
            Ok(None) => return None,
            Err(error) => {
                error!(%assignment_id, %error, "payment lookup failed");
                return None;
            }
        };

        let unsettled_hold = matches!(
            payment.failure.as_ref().map(|failure| &failure.operation),
            Some(PendingOperation::Hold)
        );
        let result = match payment.status {
            PaymentStatus::InEscrow | PaymentStatus::Resolved => {
                let refund = compensation.refund_cents(payment.remaining_cents());
                if refund == 0 {
                    self.escrow.release(&payment.id, actor, at)
                } else {
                    self.escrow.refund(&payment.id, refund, reason, actor, at)
                }
            }
            PaymentStatus::Created => self.escrow.void(&payment.id, reason, actor, at),
            PaymentStatus::Failed if unsettled_hold => {
                self.escrow.void(&payment.id, reason, actor, at)
            }
            status => {
                warn!(
                    %assignment_id,
                    payment_id = %payment.id,
                    status = status.label(),
                    "payment left for manual settlement"
                );
                return Some(payment);
            }
        };

        match result {
            Ok(settled) => {
                let event = if settled.status == PaymentStatus::Released {
                    NotificationEvent::PaymentReleased
                } else {
                    NotificationEvent::PaymentRefunded
                };
                self.notify_payment(&settled, event);
                Some(settled)
            }
            Err(error) => {
                error!(%assignment_id, payment_id = %payment.id, %error, "compensation failed");
                self.notify(
                    Notification::new(Recipient::Admin, NotificationEvent::PaymentFailed)
                        .with("payment_id", &payment.id)
                        .with("error", &error),
                );
                self.escrow.get(&payment.id).ok()
            }
        }
    }

    fn release_quietly(&self, payment_id: &PaymentId, at: DateTime<Utc>) -> Option<ShiftPayment> {
        match self.escrow.release(payment_id, &Actor::System, at) {
            Ok(payment) => {
                self.notify_payment(&payment, NotificationEvent::PaymentReleased);
                Some(payment)
            }
            Err(error) => {
                error!(%payment_id, %error, "immediate release failed");
                self.notify(
                    Notification::new(Recipient::Admin, NotificationEvent::PaymentFailed)
                        .with("payment_id", payment_id)
                        .with("error", &error),
                );
                self.escrow.get(payment_id).ok()
            }
        }
    }

    fn notify_payment(&self, payment: &ShiftPayment, event: NotificationEvent) {
        let recipient = match event {
            NotificationEvent::PaymentRefunded => Recipient::Business(payment.business_id.clone()),
            _ => Recipient::Worker(payment.worker_id.clone()),
        };
        self.notify(
            Notification::new(recipient, event)
                .with("payment_id", &payment.id)
                .with("status", payment.status.label()),
        );
    }

    fn notify_losers(&self, shift_id: &ShiftId, close_out: &CloseOutSummary) {
        for worker_id in close_out.losing_workers() {
            self.notify(
                Notification::new(Recipient::Worker(worker_id), NotificationEvent::ClaimRejected)
                    .with("shift_id", shift_id),
            );
        }
    }

    fn notify(&self, notification: Notification) {
        let event = notification.event;
        if let Err(error) = self.notifier.notify(notification) {
            warn!(?event, %error, "notification not delivered");
        }
    }
}
