//! Worker standing updates driven by assignment outcomes.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::domain::{AssignmentId, WorkerId};
use super::error::MarketplaceError;
use super::locks::KeyedLocks;
use super::ports::{EligibilityCheck, StandingRepository, SuspensionSignal, SuspensionSink};

/// Aggregated reliability view per worker. Mutated only by [`ReliabilityFeedback`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerStanding {
    pub worker_id: WorkerId,
    pub strikes: u32,
    pub completed_shifts: u32,
    pub no_shows: u32,
    pub average_rating: Option<f64>,
    pub rating_count: u32,
    pub completions_since_strike: u32,
    pub suspended_until: Option<DateTime<Utc>>,
    pub last_strike_at: Option<DateTime<Utc>>,
    /// Assignments whose completion or no-show has been folded in.
    #[serde(default)]
    pub applied_outcomes: Vec<AssignmentId>,
}

impl WorkerStanding {
    pub fn new(worker_id: WorkerId) -> Self {
        Self {
            worker_id,
            strikes: 0,
            completed_shifts: 0,
            no_shows: 0,
            average_rating: None,
            rating_count: 0,
            completions_since_strike: 0,
            suspended_until: None,
            last_strike_at: None,
            applied_outcomes: Vec::new(),
        }
    }

    pub fn is_suspended_at(&self, at: DateTime<Utc>) -> bool {
        self.suspended_until.map(|until| at < until).unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReliabilityPolicy {
    pub strike_threshold: u32,
    pub suspension: Duration,
    /// Completions since the last strike that remove one strike. Zero disables decay.
    pub strike_decay_completions: u32,
}

impl Default for ReliabilityPolicy {
    fn default() -> Self {
        Self {
            strike_threshold: 3,
            suspension: Duration::days(14),
            strike_decay_completions: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StandingUpdate {
    pub standing: WorkerStanding,
    pub suspension_triggered: bool,
    pub strike_decayed: bool,
}

pub struct ReliabilityFeedback {
    standings: Arc<dyn StandingRepository>,
    suspensions: Arc<dyn SuspensionSink>,
    policy: ReliabilityPolicy,
    locks: KeyedLocks,
}

impl ReliabilityFeedback {
    pub fn new(
        standings: Arc<dyn StandingRepository>,
        suspensions: Arc<dyn SuspensionSink>,
        policy: ReliabilityPolicy,
    ) -> Self {
        Self {
            standings,
            suspensions,
            policy,
            locks: KeyedLocks::default(),
        }
    }

    pub fn standing(&self, worker_id: &WorkerId) -> Result<WorkerStanding, MarketplaceError> {
        Ok(self
            .standings
            .fetch(worker_id)?
            .unwrap_or_else(|| WorkerStanding::new(worker_id.clone())))
    }

    fn update<T>(
        &self,
        worker_id: &WorkerId,
        apply: impl FnOnce(&mut WorkerStanding) -> T,
    ) -> Result<(WorkerStanding, T), MarketplaceError> {
        self.locks.with(&worker_id.0, || {
            let mut standing = self.standing(worker_id)?;
            let outcome = apply(&mut standing);
            self.standings.upsert(standing.clone())?;
            Ok((standing, outcome))
        })
    }

    /// Like `update`, but applies `apply` at most once per assignment. Replays return `None`.
    fn apply_outcome<T>(
        &self,
        worker_id: &WorkerId,
        assignment_id: &AssignmentId,
        apply: impl FnOnce(&mut WorkerStanding) -> T,
    ) -> Result<(WorkerStanding, Option<T>), MarketplaceError> {
        self.locks.with(&worker_id.0, || {
            let mut standing = self.standing(worker_id)?;
            if standing.applied_outcomes.contains(assignment_id) {
                debug!(%worker_id, %assignment_id, "assignment outcome already applied");
                return Ok((standing, None));
            }
            let outcome = apply(&mut standing);
            standing.applied_outcomes.push(assignment_id.clone());
            self.standings.upsert(standing.clone())?;
            Ok((standing, Some(outcome)))
        })
    }

    pub fn record_completion(
        &self,
        worker_id: &WorkerId,
        assignment_id: &AssignmentId,
    ) -> Result<StandingUpdate, MarketplaceError> {
        let decay_after = self.policy.strike_decay_completions;
        let (standing, outcome) = self.apply_outcome(worker_id, assignment_id, |standing| {
            standing.completed_shifts += 1;
            standing.completions_since_strike += 1;
            if decay_after > 0
                && standing.strikes > 0
                && standing.completions_since_strike >= decay_after
            {
                standing.strikes -= 1;
                standing.completions_since_strike = 0;
                true
            } else {
                false
            }
        })?;

        let strike_decayed = outcome.unwrap_or(false);
        if strike_decayed {
            info!(%worker_id, strikes = standing.strikes, "strike decayed after clean completions");
        }

        Ok(StandingUpdate {
            standing,
            suspension_triggered: false,
            strike_decayed,
        })
    }

    /// Adds exactly one strike per assignment and, at the threshold, suspends the worker and
    /// emits the signal.
    pub fn record_no_show(
        &self,
        worker_id: &WorkerId,
        assignment_id: &AssignmentId,
        at: DateTime<Utc>,
    ) -> Result<StandingUpdate, MarketplaceError> {
        let threshold = self.policy.strike_threshold;
        let suspension = self.policy.suspension;
        let (standing, outcome) = self.apply_outcome(worker_id, assignment_id, |standing| {
            standing.strikes += 1;
            standing.no_shows += 1;
            standing.completions_since_strike = 0;
            standing.last_strike_at = Some(at);
            if standing.strikes >= threshold && !standing.is_suspended_at(at) {
                standing.suspended_until = Some(at + suspension);
                true
            } else {
                false
            }
        })?;

        let Some(triggered) = outcome else {
            return Ok(StandingUpdate {
                standing,
                suspension_triggered: false,
                strike_decayed: false,
            });
        };
        info!(%worker_id, %assignment_id, strikes = standing.strikes, "strike recorded for no-show");

        if triggered {
            let suspended_until = standing.suspended_until.unwrap_or(at + suspension);
            warn!(%worker_id, strikes = standing.strikes, %suspended_until, "strike threshold exceeded");
            let signal = SuspensionSignal {
                worker_id: worker_id.clone(),
                strikes: standing.strikes,
                threshold,
                suspended_until,
                triggered_by: assignment_id.clone(),
            };
            if let Err(error) = self.suspensions.strike_threshold_exceeded(signal) {
                warn!(%worker_id, %error, "suspension signal not delivered");
            }
        }

        Ok(StandingUpdate {
            standing,
            suspension_triggered: triggered,
            strike_decayed: false,
        })
    }

    /// Folds a 1-5 star rating into the running average.
    pub fn record_rating(
        &self,
        worker_id: &WorkerId,
        stars: u8,
    ) -> Result<WorkerStanding, MarketplaceError> {
        if !(1..=5).contains(&stars) {
            return Err(MarketplaceError::validation(format!(
                "rating must be between 1 and 5, found {stars}"
            )));
        }
        let (standing, _) = self.update(worker_id, |standing| {
            let previous = standing.average_rating.unwrap_or(0.0) * f64::from(standing.rating_count);
            standing.rating_count += 1;
            standing.average_rating =
                Some((previous + f64::from(stars)) / f64::from(standing.rating_count));
        })?;
        Ok(standing)
    }

    /// Entry point for the appeal workflow once a suspension is lifted.
    pub fn lift_suspension(&self, worker_id: &WorkerId) -> Result<WorkerStanding, MarketplaceError> {
        let (standing, _) = self.update(worker_id, |standing| {
            standing.suspended_until = None;
        })?;
        info!(%worker_id, "suspension lifted");
        Ok(standing)
    }
}

impl EligibilityCheck for ReliabilityFeedback {
    fn is_eligible(&self, worker_id: &WorkerId, at: DateTime<Utc>) -> bool {
        match self.standings.fetch(worker_id) {
            Ok(Some(standing)) => !standing.is_suspended_at(at),
            Ok(None) => true,
            Err(error) => {
                warn!(%worker_id, %error, "standing lookup failed; treating worker as ineligible");
                false
            }
        }
    }
}
