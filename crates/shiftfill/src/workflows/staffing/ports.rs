//! Storage abstractions and the narrow interfaces consumed from external collaborators.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{AssignmentId, BusinessId, PaymentId, ShiftId, WorkerId};
use super::escrow::ShiftPayment;
use super::matching::WorkerProfile;
use super::record::ShiftRecord;
use super::reliability::WorkerStanding;

/// Error enumeration for repository failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("stale write: expected version {expected}, found {found}")]
    VersionMismatch { expected: u64, found: u64 },
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// A stored value together with the version used for conditional writes.
#[derive(Debug, Clone)]
pub struct Versioned<T> {
    pub version: u64,
    pub value: T,
}

/// Shift aggregate storage. A shift record (shift, applications, invitations, broadcast,
/// assignments) is written as one unit, conditioned on the version that was read.
pub trait ShiftRepository: Send + Sync {
    fn insert(&self, record: ShiftRecord) -> Result<(), RepositoryError>;
    fn fetch(&self, id: &ShiftId) -> Result<Option<Versioned<ShiftRecord>>, RepositoryError>;
    /// Persists `record` only if the stored version still equals `expected_version`,
    /// returning the new version.
    fn compare_and_swap(
        &self,
        record: ShiftRecord,
        expected_version: u64,
    ) -> Result<u64, RepositoryError>;
    fn shift_for_assignment(&self, id: &AssignmentId) -> Result<Option<ShiftId>, RepositoryError>;
    /// Shifts that may still need sweep work: not yet terminal, or terminal with open
    /// competitors or assignment feedback still pending.
    fn active_shift_ids(&self) -> Result<Vec<ShiftId>, RepositoryError>;
}

pub trait PaymentRepository: Send + Sync {
    /// Fails with `Conflict` if a payment already exists for the assignment.
    fn insert(&self, payment: ShiftPayment) -> Result<(), RepositoryError>;
    fn update(&self, payment: ShiftPayment) -> Result<(), RepositoryError>;
    fn fetch(&self, id: &PaymentId) -> Result<Option<ShiftPayment>, RepositoryError>;
    fn for_assignment(&self, id: &AssignmentId) -> Result<Option<ShiftPayment>, RepositoryError>;
    /// Payments in escrow whose release time has passed.
    fn releasable(&self, at: DateTime<Utc>) -> Result<Vec<PaymentId>, RepositoryError>;
}

pub trait StandingRepository: Send + Sync {
    fn fetch(&self, worker_id: &WorkerId) -> Result<Option<WorkerStanding>, RepositoryError>;
    fn upsert(&self, standing: WorkerStanding) -> Result<(), RepositoryError>;
}

/// Identity/profile provider.
pub trait WorkerDirectory: Send + Sync {
    fn profile(&self, worker_id: &WorkerId) -> Result<Option<WorkerProfile>, RepositoryError>;
    fn pool(&self) -> Result<Vec<WorkerProfile>, RepositoryError>;
}

/// Read-only eligibility query; suspension data is owned elsewhere.
pub trait EligibilityCheck: Send + Sync {
    fn is_eligible(&self, worker_id: &WorkerId, at: DateTime<Utc>) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Recipient {
    Worker(WorkerId),
    Business(BusinessId),
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationEvent {
    InvitationSent,
    BroadcastSent,
    ClaimAccepted,
    ClaimRejected,
    ShiftFilled,
    ShiftCancelled,
    NoShowRecorded,
    PaymentReleased,
    PaymentRefunded,
    PaymentFailed,
}

/// Payload handed to the notification dispatcher; content formatting happens downstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub recipient: Recipient,
    pub event: NotificationEvent,
    pub details: BTreeMap<String, String>,
}

impl Notification {
    pub fn new(recipient: Recipient, event: NotificationEvent) -> Self {
        Self {
            recipient,
            event,
            details: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.details.insert(key.to_string(), value.to_string());
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification transport unavailable: {0}")]
    Transport(String),
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification) -> Result<(), NotifyError>;
}

/// Request passed to the payment provider. The idempotency key lets the provider collapse
/// retries of an operation that succeeded remotely but failed locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderRequest {
    pub idempotency_key: String,
    pub payment_id: PaymentId,
    pub amount_cents: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderReceipt {
    pub reference: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("declined by provider ({code})")]
    Declined { code: String },
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("provider rejected request ({code}): {message}")]
    Rejected { code: String, message: String },
}

pub trait PaymentProvider: Send + Sync {
    fn charge_or_hold(&self, request: &ProviderRequest) -> Result<ProviderReceipt, ProviderError>;
    fn release_funds(&self, request: &ProviderRequest) -> Result<ProviderReceipt, ProviderError>;
    fn refund_funds(&self, request: &ProviderRequest) -> Result<ProviderReceipt, ProviderError>;
}

/// Emitted when a worker's strikes reach the configured threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuspensionSignal {
    pub worker_id: WorkerId,
    pub strikes: u32,
    pub threshold: u32,
    pub suspended_until: DateTime<Utc>,
    pub triggered_by: AssignmentId,
}

#[derive(Debug, thiserror::Error)]
pub enum SuspensionError {
    #[error("suspension subsystem unavailable: {0}")]
    Unavailable(String),
}

/// Suspension/appeal subsystem. It owns the suspension record and appeal workflow.
pub trait SuspensionSink: Send + Sync {
    fn strike_threshold_exceeded(&self, signal: SuspensionSignal) -> Result<(), SuspensionError>;
}
