use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::super::domain::{Shift, WorkerId};
use super::super::ports::EligibilityCheck;
use super::scorer::{MatchOutcome, MatchScore, MatchScorer};
use super::{Candidate, MatchError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedCandidate {
    pub rank: u32,
    pub worker_id: WorkerId,
    pub score: MatchScore,
    pub average_rating: Option<f64>,
    pub strikes: u32,
    pub joined_at: DateTime<Utc>,
}

/// Orders a candidate pool for invitation and broadcast targeting.
#[derive(Debug, Clone)]
pub struct CandidateRanker {
    scorer: MatchScorer,
    urgent_acceptance_threshold: f64,
}

impl CandidateRanker {
    pub fn new(scorer: MatchScorer, urgent_acceptance_threshold: f64) -> Result<Self, MatchError> {
        if !(0.0..=1.0).contains(&urgent_acceptance_threshold) {
            return Err(MatchError::InvalidWeights(format!(
                "urgent acceptance threshold {urgent_acceptance_threshold} outside 0..=1"
            )));
        }
        Ok(Self {
            scorer,
            urgent_acceptance_threshold,
        })
    }

    pub fn scorer(&self) -> &MatchScorer {
        &self.scorer
    }

    /// Ranks the pool by descending score. Ties fall back to higher rating, fewer strikes,
    /// earlier account creation and finally worker id, so the same snapshot always yields the
    /// same order. Candidates whose profile cannot be scored are left out.
    pub fn rank(
        &self,
        shift: &Shift,
        pool: &[Candidate],
        eligibility: &dyn EligibilityCheck,
        at: DateTime<Utc>,
    ) -> Result<Vec<RankedCandidate>, MatchError> {
        MatchScorer::validate_shift(shift)?;

        let mut ranked = Vec::with_capacity(pool.len());
        for candidate in pool {
            let worker_id = candidate.worker_id();
            if !eligibility.is_eligible(worker_id, at) {
                debug!(shift_id = %shift.id, %worker_id, "skipping ineligible worker");
                continue;
            }

            if shift.urgency.is_elevated() {
                let rate = candidate.profile.urgent_acceptance_rate.unwrap_or(0.0);
                if rate <= self.urgent_acceptance_threshold {
                    debug!(
                        shift_id = %shift.id,
                        %worker_id,
                        rate,
                        "below urgent acceptance threshold"
                    );
                    continue;
                }
            }

            let outcome = match self.scorer.score(candidate, shift) {
                Ok(outcome) => outcome,
                Err(error) => {
                    warn!(shift_id = %shift.id, %worker_id, %error, "skipping malformed candidate");
                    continue;
                }
            };
            match outcome {
                MatchOutcome::Scored(score) => ranked.push(RankedCandidate {
                    rank: 0,
                    worker_id: worker_id.clone(),
                    score,
                    average_rating: candidate.standing.average_rating,
                    strikes: candidate.standing.strikes,
                    joined_at: candidate.profile.joined_at,
                }),
                MatchOutcome::Excluded(reason) => {
                    debug!(shift_id = %shift.id, %worker_id, %reason, "hard filtered");
                }
            }
        }

        ranked.sort_by(compare_candidates);
        for (index, candidate) in ranked.iter_mut().enumerate() {
            candidate.rank = index as u32 + 1;
        }

        Ok(ranked)
    }
}

fn compare_candidates(a: &RankedCandidate, b: &RankedCandidate) -> Ordering {
    b.score
        .total
        .total_cmp(&a.score.total)
        .then_with(|| {
            let a_rating = a.average_rating.unwrap_or(-1.0);
            let b_rating = b.average_rating.unwrap_or(-1.0);
            b_rating.total_cmp(&a_rating)
        })
        .then_with(|| a.strikes.cmp(&b.strikes))
        .then_with(|| a.joined_at.cmp(&b.joined_at))
        .then_with(|| a.worker_id.cmp(&b.worker_id))
}
