//! Labor-marketplace staffing engine: candidate matching, the fill race for a shift, shift and
//! assignment lifecycles, escrow of shift payments and worker reliability feedback.
//!
//! Every change to a shift and its competing claims is committed through one optimistic,
//! versioned write so that at most one claim per shift ever wins.

pub mod domain;
pub mod error;
pub mod escrow;
pub mod fulfillment;
pub mod lifecycle;
mod locks;
pub mod matching;
pub mod memory;
pub mod ports;
pub mod record;
pub mod reliability;
pub mod router;
pub mod service;
pub mod store;

#[cfg(test)]
mod tests;

pub use domain::{
    Actor, ApplicationId, ApplicationSource, ApplicationStatus, Assignment, AssignmentId,
    AssignmentStatus, AuditEntry, AvailabilityBroadcast, BroadcastId, BusinessId, ClaimOrigin,
    GeoPoint, InvitationId, InvitationStatus, PaymentId, Shift, ShiftApplication, ShiftFlag,
    ShiftId, ShiftInvitation, ShiftPosting, ShiftStatus, Urgency, WorkerId,
};
pub use error::{ConflictKind, Ineligibility, MarketplaceError};
pub use escrow::{
    DisputeOutcome, EscrowLedger, HoldRequest, PaymentStatus, PendingOperation, ShiftPayment,
};
pub use fulfillment::{ClaimRequest, ClaimWin, FulfillmentCoordinator};
pub use lifecycle::{
    AdminCancellation, AssignmentLifecycle, AttendancePolicy, BulkApproval, Compensation,
    CompletionSignal, NoShowOutcome, ShiftCancellation, ShiftLifecycle, ShiftRemoval,
};
pub use matching::{
    AgencyTier, AvailabilityWindow, Candidate, CandidateRanker, Exclusion, MatchError,
    MatchOutcome, MatchScore, MatchScorer, MatchWeights, RankedCandidate, ScoringPolicy,
    WorkerProfile,
};
pub use memory::{
    InMemoryPaymentRepository, InMemoryShiftRepository, InMemoryStandingRepository,
    InMemoryWorkerDirectory,
};
pub use ports::{
    EligibilityCheck, Notification, NotificationEvent, Notifier, NotifyError, PaymentProvider,
    PaymentRepository, ProviderError, ProviderReceipt, ProviderRequest, Recipient,
    RepositoryError, ShiftRepository, StandingRepository, SuspensionError, SuspensionSignal,
    SuspensionSink, WorkerDirectory,
};
pub use record::{CloseOutSummary, ShiftRecord};
pub use reliability::{ReliabilityFeedback, ReliabilityPolicy, StandingUpdate, WorkerStanding};
pub use router::staffing_router;
pub use service::{
    AdminCancellationReport, CancellationReport, ClaimReport, Collaborators, CompletionReport,
    MarketplaceService, MarketplaceSettings, NoShowReport, RemovalReport, SweepReport,
};
pub use store::ShiftStore;
