use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

identifier!(
    /// Identifier wrapper for posted shifts.
    ShiftId
);
identifier!(
    /// Business account that owns a shift.
    BusinessId
);
identifier!(WorkerId);
identifier!(ApplicationId);
identifier!(InvitationId);
identifier!(BroadcastId);
identifier!(
    /// The single authoritative claim on a shift.
    AssignmentId
);
identifier!(PaymentId);

static SEQUENCE: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_id(prefix: &str) -> String {
    let id = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{id:06}")
}

/// WGS84 coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

const EARTH_RADIUS_KM: f64 = 6371.0;

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Great-circle distance using the haversine formula.
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let d_lat = (other.latitude - self.latitude).to_radians();
        let d_lon = (other.longitude - self.longitude).to_radians();

        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
        EARTH_RADIUS_KM * c
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Normal,
    Urgent,
    Critical,
}

impl Urgency {
    pub const fn is_elevated(self) -> bool {
        matches!(self, Urgency::Urgent | Urgency::Critical)
    }

    pub const fn label(self) -> &'static str {
        match self {
            Urgency::Normal => "normal",
            Urgency::Urgent => "urgent",
            Urgency::Critical => "critical",
        }
    }
}

/// Status tracked for a shift from posting to closeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShiftStatus {
    PendingApproval,
    Open,
    Filled,
    InProgress,
    Completed,
    Cancelled,
    Removed,
}

impl ShiftStatus {
    pub const fn label(self) -> &'static str {
        match self {
            ShiftStatus::PendingApproval => "pending_approval",
            ShiftStatus::Open => "open",
            ShiftStatus::Filled => "filled",
            ShiftStatus::InProgress => "in_progress",
            ShiftStatus::Completed => "completed",
            ShiftStatus::Cancelled => "cancelled",
            ShiftStatus::Removed => "removed",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            ShiftStatus::Completed | ShiftStatus::Cancelled | ShiftStatus::Removed
        )
    }

    /// Whether a winning claim has been recorded against the shift.
    pub const fn is_past_open(self) -> bool {
        matches!(
            self,
            ShiftStatus::Filled | ShiftStatus::InProgress | ShiftStatus::Completed
        )
    }

    /// Transition table for the shift lifecycle. `Filled` is absent: only the
    /// fulfillment coordinator may set it.
    pub(crate) fn permits(self, to: ShiftStatus, privileged: bool) -> bool {
        use ShiftStatus::*;
        match (self, to) {
            (PendingApproval, Open) => true,
            (Filled, InProgress) => true,
            (InProgress, Completed) => true,
            (Open | Filled, Cancelled) => true,
            (from, Removed) => privileged && !from.is_terminal(),
            // assignment lost before work started (no-show or admin cancellation)
            (Filled, Open) => privileged,
            (InProgress, Cancelled) => privileged,
            _ => false,
        }
    }
}

impl fmt::Display for ShiftStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Business-supplied description of a new shift.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShiftPosting {
    pub business_id: BusinessId,
    pub title: String,
    pub industry: String,
    #[serde(default)]
    pub required_skills: BTreeSet<String>,
    #[serde(default)]
    pub required_certifications: BTreeSet<String>,
    pub location: GeoPoint,
    pub radius_km: f64,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub urgency: Urgency,
    pub gross_amount_cents: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShiftFlag {
    pub reason: String,
    pub flagged_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemovalRecord {
    pub reason: String,
    pub removed_at: DateTime<Utc>,
    pub removed_by: Actor,
}

/// A posted, time-bounded work opportunity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shift {
    pub id: ShiftId,
    pub business_id: BusinessId,
    pub title: String,
    pub industry: String,
    pub required_skills: BTreeSet<String>,
    pub required_certifications: BTreeSet<String>,
    pub location: GeoPoint,
    pub radius_km: f64,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub urgency: Urgency,
    pub gross_amount_cents: u64,
    pub posted_at: DateTime<Utc>,
    pub status: ShiftStatus,
    pub filled_at: Option<DateTime<Utc>>,
    pub flag: Option<ShiftFlag>,
    pub removal: Option<RemovalRecord>,
}

impl Shift {
    pub fn from_posting(posting: ShiftPosting, posted_at: DateTime<Utc>) -> Self {
        Self {
            id: ShiftId(next_id("shift")),
            business_id: posting.business_id,
            title: posting.title,
            industry: posting.industry,
            required_skills: posting.required_skills,
            required_certifications: posting.required_certifications,
            location: posting.location,
            radius_km: posting.radius_km,
            starts_at: posting.starts_at,
            ends_at: posting.ends_at,
            urgency: posting.urgency,
            gross_amount_cents: posting.gross_amount_cents,
            posted_at,
            status: ShiftStatus::PendingApproval,
            filled_at: None,
            flag: None,
            removal: None,
        }
    }

    pub fn is_flagged(&self) -> bool {
        self.flag.is_some()
    }

    pub fn duration_seconds(&self) -> i64 {
        (self.ends_at - self.starts_at).num_seconds()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Pending,
    Approved,
    Rejected,
    Withdrawn,
}

impl ApplicationStatus {
    pub const fn label(self) -> &'static str {
        match self {
            ApplicationStatus::Pending => "pending",
            ApplicationStatus::Approved => "approved",
            ApplicationStatus::Rejected => "rejected",
            ApplicationStatus::Withdrawn => "withdrawn",
        }
    }
}

/// How an application entered the shift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationSource {
    Direct,
    BroadcastResponse,
    AdminOverride,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShiftApplication {
    pub id: ApplicationId,
    pub shift_id: ShiftId,
    pub worker_id: WorkerId,
    pub source: ApplicationSource,
    pub submitted_at: DateTime<Utc>,
    pub status: ApplicationStatus,
    pub decided_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvitationStatus {
    Sent,
    Accepted,
    Declined,
    Expired,
}

impl InvitationStatus {
    pub const fn label(self) -> &'static str {
        match self {
            InvitationStatus::Sent => "sent",
            InvitationStatus::Accepted => "accepted",
            InvitationStatus::Declined => "declined",
            InvitationStatus::Expired => "expired",
        }
    }
}

/// Targeted offer sent to a ranked worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShiftInvitation {
    pub id: InvitationId,
    pub shift_id: ShiftId,
    pub worker_id: WorkerId,
    pub rank: u32,
    pub score: f64,
    pub sent_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: InvitationStatus,
    pub responded_at: Option<DateTime<Utc>>,
}

impl ShiftInvitation {
    pub fn is_expired_at(&self, at: DateTime<Utc>) -> bool {
        at > self.expires_at
    }
}

/// Fan-out notification to many candidate workers at once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailabilityBroadcast {
    pub id: BroadcastId,
    pub shift_id: ShiftId,
    pub sent_at: DateTime<Utc>,
    pub recipients: u32,
    pub response_count: u32,
    pub closed: bool,
    pub closed_at: Option<DateTime<Utc>>,
}

/// The competing claim types that race for a single shift slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ClaimOrigin {
    Application(ApplicationId),
    Invitation(InvitationId),
    BroadcastResponse(BroadcastId),
}

impl ClaimOrigin {
    pub const fn label(&self) -> &'static str {
        match self {
            ClaimOrigin::Application(_) => "application",
            ClaimOrigin::Invitation(_) => "invitation",
            ClaimOrigin::BroadcastResponse(_) => "broadcast_response",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Assigned,
    CheckedIn,
    Completed,
    NoShow,
    CancelledByAdmin,
    /// The owning business cancelled the shift before work started.
    CancelledByBusiness,
}

impl AssignmentStatus {
    pub const fn label(self) -> &'static str {
        match self {
            AssignmentStatus::Assigned => "assigned",
            AssignmentStatus::CheckedIn => "checked_in",
            AssignmentStatus::Completed => "completed",
            AssignmentStatus::NoShow => "no_show",
            AssignmentStatus::CancelledByAdmin => "cancelled_by_admin",
            AssignmentStatus::CancelledByBusiness => "cancelled_by_business",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            AssignmentStatus::Completed
                | AssignmentStatus::NoShow
                | AssignmentStatus::CancelledByAdmin
                | AssignmentStatus::CancelledByBusiness
        )
    }
}

impl fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: AssignmentId,
    pub shift_id: ShiftId,
    pub worker_id: WorkerId,
    pub origin: ClaimOrigin,
    pub privileged: bool,
    /// Score computed at claim time, persisted so analytics never recompute from live data.
    pub match_score: Option<f64>,
    pub assigned_at: DateTime<Utc>,
    pub checked_in_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub status: AssignmentStatus,
    /// Set with a completion or no-show; cleared once the worker standing reflects it.
    #[serde(default)]
    pub feedback_pending: bool,
    #[serde(default)]
    pub rated: bool,
}

/// Who performed a state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Actor {
    System,
    Business(BusinessId),
    Worker(WorkerId),
    Admin(String),
}

impl Actor {
    pub fn is_privileged(&self) -> bool {
        matches!(self, Actor::Admin(_))
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::System => f.write_str("system"),
            Actor::Business(id) => write!(f, "business:{id}"),
            Actor::Worker(id) => write!(f, "worker:{id}"),
            Actor::Admin(name) => write!(f, "admin:{name}"),
        }
    }
}

/// Immutable audit line appended on every status transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub at: DateTime<Utc>,
    pub actor: Actor,
    pub action: String,
    pub detail: String,
}
