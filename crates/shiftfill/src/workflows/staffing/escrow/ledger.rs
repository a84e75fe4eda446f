use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use super::super::domain::{next_id, Actor, AssignmentId, PaymentId};
use super::super::error::{ConflictKind, Ineligibility, MarketplaceError};
use super::super::locks::KeyedLocks;
use super::super::ports::{PaymentProvider, PaymentRepository, ProviderError, ProviderRequest};
use super::domain::{
    DisputeOutcome, DisputeRecord, HoldRequest, PaymentFailure, PaymentStatus, PendingOperation,
    ShiftPayment,
};

/// Holds, releases and refunds shift payments.
///
/// Operations on one payment are serialized; different payments proceed in parallel. Provider
/// failures leave the payment in `failed` with the operation to resume, and every provider call
/// carries an idempotency key derived from the payment id and operation.
pub struct EscrowLedger {
    payments: Arc<dyn PaymentRepository>,
    provider: Arc<dyn PaymentProvider>,
    platform_fee_bps: u32,
    locks: KeyedLocks,
}

impl EscrowLedger {
    pub fn new(
        payments: Arc<dyn PaymentRepository>,
        provider: Arc<dyn PaymentProvider>,
        platform_fee_bps: u32,
    ) -> Self {
        Self {
            payments,
            provider,
            platform_fee_bps: platform_fee_bps.min(10_000),
            locks: KeyedLocks::default(),
        }
    }

    pub fn get(&self, payment_id: &PaymentId) -> Result<ShiftPayment, MarketplaceError> {
        self.payments
            .fetch(payment_id)?
            .ok_or_else(|| MarketplaceError::not_found(format!("payment {payment_id}")))
    }

    pub fn for_assignment(
        &self,
        assignment_id: &AssignmentId,
    ) -> Result<Option<ShiftPayment>, MarketplaceError> {
        Ok(self.payments.for_assignment(assignment_id)?)
    }

    /// Opens escrow for an assignment. Only one payment may ever exist per assignment.
    pub fn hold(
        &self,
        request: HoldRequest,
        actor: &Actor,
        at: DateTime<Utc>,
    ) -> Result<ShiftPayment, MarketplaceError> {
        if request.amount_cents == 0 {
            return Err(MarketplaceError::validation("escrow amount must be positive"));
        }

        let assignment_key = format!("assignment:{}", request.assignment_id);
        self.locks.with(&assignment_key, || {
            if let Some(existing) = self.payments.for_assignment(&request.assignment_id)? {
                return Err(MarketplaceError::Conflict(ConflictKind::PaymentAlreadyHeld(
                    existing.id,
                )));
            }

            let platform_fee_cents =
                request.amount_cents * u64::from(self.platform_fee_bps) / 10_000;
            let mut payment = ShiftPayment {
                id: PaymentId(next_id("pay")),
                assignment_id: request.assignment_id,
                shift_id: request.shift_id,
                worker_id: request.worker_id,
                business_id: request.business_id,
                held_cents: request.amount_cents,
                platform_fee_cents,
                released_cents: 0,
                refunded_cents: 0,
                status: PaymentStatus::Created,
                release_after: None,
                dispute: None,
                failure: None,
                provider_references: Vec::new(),
                created_at: at,
                events: Vec::new(),
            };
            payment.transition(PaymentStatus::Created, actor, at, "payment created");
            self.payments.insert(payment.clone())?;

            let payment_key = payment.id.0.clone();
            self.locks.with(&payment_key, || {
                self.execute(&mut payment, PendingOperation::Hold, actor, at)
            })?;

            info!(
                payment_id = %payment.id,
                assignment_id = %payment.assignment_id,
                amount_cents = payment.held_cents,
                "escrow held"
            );
            Ok(payment)
        })
    }

    /// Releases the held amount to the worker. Releasing a released payment is a no-op.
    pub fn release(
        &self,
        payment_id: &PaymentId,
        actor: &Actor,
        at: DateTime<Utc>,
    ) -> Result<ShiftPayment, MarketplaceError> {
        self.locked(payment_id, |payment| self.release_held(payment, actor, at))
    }

    /// Release requested from outside the engine. Admins may release at any time; the system
    /// only once the dispute window has passed. Nobody else may release escrow.
    pub fn release_on_request(
        &self,
        payment_id: &PaymentId,
        actor: &Actor,
        at: DateTime<Utc>,
    ) -> Result<ShiftPayment, MarketplaceError> {
        self.locked(payment_id, |payment| {
            match actor {
                Actor::Admin(_) => {}
                Actor::System => match payment.release_after {
                    Some(due) if due <= at => {}
                    release_after => {
                        return Err(MarketplaceError::NotEligible(Ineligibility::ReleaseNotDue {
                            payment_id: payment.id.clone(),
                            release_after,
                        }))
                    }
                },
                other => {
                    return Err(MarketplaceError::validation(format!(
                        "{other} is not allowed to release escrow"
                    )))
                }
            }
            self.release_held(payment, actor, at)
        })
    }

    fn release_held(
        &self,
        payment: &mut ShiftPayment,
        actor: &Actor,
        at: DateTime<Utc>,
    ) -> Result<(), MarketplaceError> {
        let payment_id = payment.id.clone();
        let operation = match payment.status {
            PaymentStatus::Released | PaymentStatus::PartiallyReleased => {
                debug!(%payment_id, "payment already released");
                return Ok(());
            }
            PaymentStatus::InEscrow => PendingOperation::Release,
            PaymentStatus::Resolved
                if payment.resolution() == Some(DisputeOutcome::Release) =>
            {
                PendingOperation::Release
            }
            PaymentStatus::Failed => match payment.failure.as_ref().map(|f| &f.operation) {
                Some(operation @ (PendingOperation::Release | PendingOperation::ReleaseRemainder)) => {
                    operation.clone()
                }
                _ => return Err(state_conflict(payment)),
            },
            PaymentStatus::Disputed => {
                return Err(MarketplaceError::Conflict(ConflictKind::PaymentFrozen(
                    payment.id.clone(),
                )))
            }
            _ => return Err(state_conflict(payment)),
        };
        self.execute(payment, operation, actor, at)
    }

    /// Refunds `amount_cents` to the business. A partial refund releases the remainder to the
    /// worker in the same operation.
    pub fn refund(
        &self,
        payment_id: &PaymentId,
        amount_cents: u64,
        reason: &str,
        actor: &Actor,
        at: DateTime<Utc>,
    ) -> Result<ShiftPayment, MarketplaceError> {
        self.locked(payment_id, |payment| {
            match payment.status {
                PaymentStatus::Refunded => {
                    debug!(%payment_id, "payment already refunded");
                    return Ok(());
                }
                PaymentStatus::InEscrow => {}
                PaymentStatus::Resolved if payment.resolution() == Some(DisputeOutcome::Refund) => {}
                PaymentStatus::Failed => {
                    return match payment.failure.as_ref().map(|f| f.operation.clone()) {
                        Some(operation @ PendingOperation::Refund { .. }) => {
                            self.execute(payment, operation, actor, at)
                        }
                        _ => Err(state_conflict(payment)),
                    };
                }
                PaymentStatus::Disputed => {
                    return Err(MarketplaceError::Conflict(ConflictKind::PaymentFrozen(
                        payment.id.clone(),
                    )))
                }
                _ => return Err(state_conflict(payment)),
            }

            let remaining = payment.remaining_cents();
            if amount_cents == 0 || amount_cents > remaining {
                return Err(MarketplaceError::validation(format!(
                    "refund of {amount_cents} cents must be positive and at most the {remaining} cents held"
                )));
            }
            self.execute(
                payment,
                PendingOperation::Refund {
                    amount_cents,
                    reason: reason.to_string(),
                },
                actor,
                at,
            )
        })
    }

    /// Closes a payment whose hold never reached the provider. No funds move.
    pub fn void(
        &self,
        payment_id: &PaymentId,
        reason: &str,
        actor: &Actor,
        at: DateTime<Utc>,
    ) -> Result<ShiftPayment, MarketplaceError> {
        self.locked(payment_id, |payment| {
            let unsettled_hold = matches!(
                payment.failure.as_ref().map(|f| &f.operation),
                Some(PendingOperation::Hold)
            );
            match payment.status {
                PaymentStatus::Created => {}
                PaymentStatus::Failed if unsettled_hold => {}
                PaymentStatus::Refunded => return Ok(()),
                _ => return Err(state_conflict(payment)),
            }
            payment.failure = None;
            payment.transition(PaymentStatus::Refunded, actor, at, format!("voided: {reason}"));
            self.payments.update(payment.clone())?;
            Ok(())
        })
    }

    /// Freezes the payment until an admin resolves the dispute.
    pub fn dispute(
        &self,
        payment_id: &PaymentId,
        reason: &str,
        actor: &Actor,
        at: DateTime<Utc>,
    ) -> Result<ShiftPayment, MarketplaceError> {
        self.locked(payment_id, |payment| {
            match payment.status {
                PaymentStatus::Disputed => return Ok(()),
                PaymentStatus::InEscrow => {}
                _ => return Err(state_conflict(payment)),
            }
            payment.dispute = Some(DisputeRecord {
                reason: reason.to_string(),
                opened_at: at,
                opened_by: actor.clone(),
                outcome: None,
                resolved_at: None,
            });
            payment.transition(PaymentStatus::Disputed, actor, at, reason);
            self.payments.update(payment.clone())?;
            warn!(%payment_id, %actor, reason, "payment disputed");
            Ok(())
        })
    }

    /// Records the admin decision. The matching `release` or `refund` call executes it.
    pub fn resolve_dispute(
        &self,
        payment_id: &PaymentId,
        outcome: DisputeOutcome,
        actor: &Actor,
        at: DateTime<Utc>,
    ) -> Result<ShiftPayment, MarketplaceError> {
        if !actor.is_privileged() {
            return Err(MarketplaceError::validation(
                "only admins may resolve disputes",
            ));
        }
        self.locked(payment_id, |payment| {
            if payment.status != PaymentStatus::Disputed {
                return Err(state_conflict(payment));
            }
            if let Some(dispute) = payment.dispute.as_mut() {
                dispute.outcome = Some(outcome);
                dispute.resolved_at = Some(at);
            }
            payment.transition(
                PaymentStatus::Resolved,
                actor,
                at,
                format!("dispute resolved: {outcome:?}"),
            );
            self.payments.update(payment.clone())?;
            info!(%payment_id, ?outcome, "dispute resolved");
            Ok(())
        })
    }

    /// Re-runs the provider operation recorded on a failed payment.
    pub fn retry(
        &self,
        payment_id: &PaymentId,
        actor: &Actor,
        at: DateTime<Utc>,
    ) -> Result<ShiftPayment, MarketplaceError> {
        self.locked(payment_id, |payment| {
            let operation = match (&payment.status, &payment.failure) {
                (PaymentStatus::Failed, Some(failure)) => failure.operation.clone(),
                _ => return Err(state_conflict(payment)),
            };
            info!(%payment_id, operation = operation.key(), "retrying payment operation");
            self.execute(payment, operation, actor, at)
        })
    }

    /// Schedules the automatic release at the end of the dispute window.
    pub fn schedule_release(
        &self,
        payment_id: &PaymentId,
        release_after: DateTime<Utc>,
        actor: &Actor,
        at: DateTime<Utc>,
    ) -> Result<ShiftPayment, MarketplaceError> {
        self.locked(payment_id, |payment| {
            if payment.status != PaymentStatus::InEscrow {
                return Err(state_conflict(payment));
            }
            payment.release_after = Some(release_after);
            payment.transition(
                PaymentStatus::InEscrow,
                actor,
                at,
                format!("release scheduled for {release_after}"),
            );
            self.payments.update(payment.clone())?;
            Ok(())
        })
    }

    /// Releases every payment whose dispute window has elapsed. Payments disputed in the
    /// meantime are skipped.
    pub fn release_due(&self, at: DateTime<Utc>) -> Result<ReleaseSweep, MarketplaceError> {
        let mut sweep = ReleaseSweep::default();
        for payment_id in self.payments.releasable(at)? {
            let outcome = self.locked(&payment_id, |payment| {
                let due = payment.status == PaymentStatus::InEscrow
                    && payment.release_after.map(|due| due <= at).unwrap_or(false);
                if !due {
                    return Ok(());
                }
                self.execute(payment, PendingOperation::Release, &Actor::System, at)
            });
            match outcome {
                Ok(payment) if payment.status == PaymentStatus::Released => {
                    sweep.released.push(payment_id)
                }
                Ok(_) => {}
                Err(error) => {
                    warn!(%payment_id, %error, "scheduled release failed");
                    sweep.failed.push(payment_id);
                }
            }
        }
        Ok(sweep)
    }

    fn locked(
        &self,
        payment_id: &PaymentId,
        apply: impl FnOnce(&mut ShiftPayment) -> Result<(), MarketplaceError>,
    ) -> Result<ShiftPayment, MarketplaceError> {
        self.locks.with(&payment_id.0, || {
            let mut payment = self.get(payment_id)?;
            apply(&mut payment)?;
            Ok(payment)
        })
    }

    /// Performs one provider operation and persists the outcome. Must run under the payment
    /// lock.
    fn execute(
        &self,
        payment: &mut ShiftPayment,
        mut operation: PendingOperation,
        actor: &Actor,
        at: DateTime<Utc>,
    ) -> Result<(), MarketplaceError> {
        loop {
            let amount_cents = match &operation {
                PendingOperation::Hold => payment.held_cents,
                PendingOperation::Release | PendingOperation::ReleaseRemainder => {
                    payment.remaining_cents()
                }
                PendingOperation::Refund { amount_cents, .. } => *amount_cents,
            };
            let request = ProviderRequest {
                idempotency_key: format!("{}:{}", payment.id, operation.key()),
                payment_id: payment.id.clone(),
                amount_cents,
            };
            let outcome = match &operation {
                PendingOperation::Hold => self.provider.charge_or_hold(&request),
                PendingOperation::Release | PendingOperation::ReleaseRemainder => {
                    self.provider.release_funds(&request)
                }
                PendingOperation::Refund { .. } => self.provider.refund_funds(&request),
            };

            let receipt = match outcome {
                Ok(receipt) => receipt,
                Err(source) => {
                    self.record_failure(payment, operation, &source, actor, at)?;
                    return Err(MarketplaceError::PaymentProvider {
                        payment_id: payment.id.clone(),
                        source,
                    });
                }
            };

            payment.provider_references.push(receipt.reference);
            payment.failure = None;

            match operation {
                PendingOperation::Hold => {
                    payment.transition(PaymentStatus::InEscrow, actor, at, "funds held");
                }
                PendingOperation::Release => {
                    payment.released_cents += amount_cents;
                    payment.transition(
                        PaymentStatus::Released,
                        actor,
                        at,
                        format!("released {amount_cents} cents"),
                    );
                    info!(payment_id = %payment.id, amount_cents, "payment released");
                }
                PendingOperation::ReleaseRemainder => {
                    payment.released_cents += amount_cents;
                    payment.transition(
                        PaymentStatus::PartiallyReleased,
                        actor,
                        at,
                        format!(
                            "refunded {} cents, released {amount_cents} cents",
                            payment.refunded_cents
                        ),
                    );
                    info!(payment_id = %payment.id, amount_cents, "remainder released");
                }
                PendingOperation::Refund { reason, .. } => {
                    payment.refunded_cents += amount_cents;
                    info!(payment_id = %payment.id, amount_cents, reason = %reason, "payment refunded");
                    if payment.remaining_cents() > 0 {
                        operation = PendingOperation::ReleaseRemainder;
                        continue;
                    }
                    payment.transition(
                        PaymentStatus::Refunded,
                        actor,
                        at,
                        format!("refunded {amount_cents} cents: {reason}"),
                    );
                }
            }

            self.payments.update(payment.clone())?;
            return Ok(());
        }
    }

    fn record_failure(
        &self,
        payment: &mut ShiftPayment,
        operation: PendingOperation,
        source: &ProviderError,
        actor: &Actor,
        at: DateTime<Utc>,
    ) -> Result<(), MarketplaceError> {
        let (resume_status, attempts) = match (&payment.status, &payment.failure) {
            (PaymentStatus::Failed, Some(failure)) => (failure.resume_status, failure.attempts + 1),
            (status, _) => (*status, 1),
        };
        error!(
            payment_id = %payment.id,
            assignment_id = %payment.assignment_id,
            operation = operation.key(),
            attempts,
            %source,
            "payment provider call failed"
        );
        payment.failure = Some(PaymentFailure {
            operation,
            resume_status,
            reason: source.to_string(),
            failed_at: at,
            attempts,
        });
        payment.transition(PaymentStatus::Failed, actor, at, source.to_string());
        self.payments.update(payment.clone())?;
        Ok(())
    }
}

/// Outcome of [`EscrowLedger::release_due`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseSweep {
    pub released: Vec<PaymentId>,
    pub failed: Vec<PaymentId>,
}

fn state_conflict(payment: &ShiftPayment) -> MarketplaceError {
    MarketplaceError::Conflict(ConflictKind::PaymentState {
        payment_id: payment.id.clone(),
        status: payment.status,
    })
}
