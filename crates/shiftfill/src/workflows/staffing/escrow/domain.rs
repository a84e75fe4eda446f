use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::super::domain::{Actor, AssignmentId, BusinessId, PaymentId, ShiftId, WorkerId};

/// Payment lifecycle in escrow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Created,
    InEscrow,
    Disputed,
    Resolved,
    Released,
    Refunded,
    PartiallyReleased,
    Failed,
}

impl PaymentStatus {
    pub const fn label(self) -> &'static str {
        match self {
            PaymentStatus::Created => "created",
            PaymentStatus::InEscrow => "in_escrow",
            PaymentStatus::Disputed => "disputed",
            PaymentStatus::Resolved => "resolved",
            PaymentStatus::Released => "released",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::PartiallyReleased => "partially_released",
            PaymentStatus::Failed => "failed",
        }
    }

    pub const fn is_settled(self) -> bool {
        matches!(
            self,
            PaymentStatus::Released | PaymentStatus::Refunded | PaymentStatus::PartiallyReleased
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeOutcome {
    Release,
    Refund,
}

impl DisputeOutcome {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "release" => Some(DisputeOutcome::Release),
            "refund" => Some(DisputeOutcome::Refund),
            _ => None,
        }
    }
}

/// Provider operation that was in flight when a payment failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum PendingOperation {
    Hold,
    Release,
    Refund { amount_cents: u64, reason: String },
    /// Second leg of a partial settlement: the refund succeeded, the remainder is still held.
    ReleaseRemainder,
}

impl PendingOperation {
    /// Stable suffix of the provider idempotency key.
    pub fn key(&self) -> &'static str {
        match self {
            PendingOperation::Hold => "hold",
            PendingOperation::Release => "release",
            PendingOperation::Refund { .. } => "refund",
            PendingOperation::ReleaseRemainder => "release-remainder",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentFailure {
    pub operation: PendingOperation,
    /// Status the payment was in before the failed call.
    pub resume_status: PaymentStatus,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisputeRecord {
    pub reason: String,
    pub opened_at: DateTime<Utc>,
    pub opened_by: Actor,
    pub outcome: Option<DisputeOutcome>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub at: DateTime<Utc>,
    pub actor: Actor,
    pub from: PaymentStatus,
    pub to: PaymentStatus,
    pub note: String,
}

/// Funds held for one assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShiftPayment {
    pub id: PaymentId,
    pub assignment_id: AssignmentId,
    pub shift_id: ShiftId,
    pub worker_id: WorkerId,
    pub business_id: BusinessId,
    pub held_cents: u64,
    pub platform_fee_cents: u64,
    pub released_cents: u64,
    pub refunded_cents: u64,
    pub status: PaymentStatus,
    pub release_after: Option<DateTime<Utc>>,
    pub dispute: Option<DisputeRecord>,
    pub failure: Option<PaymentFailure>,
    pub provider_references: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub events: Vec<PaymentEvent>,
}

impl ShiftPayment {
    /// Amount still held in escrow.
    pub fn remaining_cents(&self) -> u64 {
        self.held_cents
            .saturating_sub(self.released_cents)
            .saturating_sub(self.refunded_cents)
    }

    pub fn worker_payout_cents(&self) -> u64 {
        self.held_cents.saturating_sub(self.platform_fee_cents)
    }

    pub fn resolution(&self) -> Option<DisputeOutcome> {
        self.dispute.as_ref().and_then(|dispute| dispute.outcome)
    }

    pub(crate) fn transition(
        &mut self,
        to: PaymentStatus,
        actor: &Actor,
        at: DateTime<Utc>,
        note: impl Into<String>,
    ) {
        let from = self.status;
        self.status = to;
        self.events.push(PaymentEvent {
            at,
            actor: actor.clone(),
            from,
            to,
            note: note.into(),
        });
    }
}

/// Details needed to open escrow for a new assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HoldRequest {
    pub assignment_id: AssignmentId,
    pub shift_id: ShiftId,
    pub worker_id: WorkerId,
    pub business_id: BusinessId,
    pub amount_cents: u64,
}
