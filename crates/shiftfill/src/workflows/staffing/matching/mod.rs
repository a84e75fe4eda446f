//! Worker/shift compatibility scoring and deterministic candidate ranking.

mod ranker;
mod scorer;
mod weights;

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{GeoPoint, WorkerId};
use super::reliability::WorkerStanding;

pub use ranker::{CandidateRanker, RankedCandidate};
pub use scorer::{Exclusion, MatchFactor, MatchOutcome, MatchScore, MatchScorer, ScoreComponent};
pub use weights::{MatchWeights, ScoringPolicy};

/// Agency tier; higher tiers earn a bounded booking-priority bonus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgencyTier {
    Standard,
    Preferred,
    Gold,
    Platinum,
}

impl AgencyTier {
    pub const fn booking_priority(self) -> u8 {
        match self {
            AgencyTier::Standard => 0,
            AgencyTier::Preferred => 1,
            AgencyTier::Gold => 2,
            AgencyTier::Platinum => 3,
        }
    }
}

/// Time window a worker has declared themselves available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityWindow {
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

/// Worker attributes supplied by the profile provider. Callers may pass historical snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerProfile {
    pub worker_id: WorkerId,
    pub display_name: String,
    #[serde(default)]
    pub skills: BTreeSet<String>,
    #[serde(default)]
    pub certifications: BTreeSet<String>,
    pub location: GeoPoint,
    #[serde(default)]
    pub availability: Vec<AvailabilityWindow>,
    pub tier: AgencyTier,
    /// Share of urgent-shift offers historically accepted, 0.0..=1.0.
    #[serde(default)]
    pub urgent_acceptance_rate: Option<f64>,
    pub joined_at: DateTime<Utc>,
}

/// Scoring input: a profile paired with the reliability standing at the same point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub profile: WorkerProfile,
    pub standing: WorkerStanding,
}

impl Candidate {
    pub fn new(profile: WorkerProfile, standing: WorkerStanding) -> Self {
        Self { profile, standing }
    }

    pub fn worker_id(&self) -> &WorkerId {
        &self.profile.worker_id
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MatchError {
    #[error("shift is missing required attribute: {0}")]
    MissingShiftAttribute(&'static str),
    #[error("shift attribute is malformed: {0}")]
    MalformedShift(String),
    #[error("worker profile is malformed: {0}")]
    MalformedWorker(String),
    #[error("invalid scoring weights: {0}")]
    InvalidWeights(String),
}
