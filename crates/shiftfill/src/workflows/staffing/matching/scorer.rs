use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::super::domain::Shift;
use super::weights::{MatchWeights, ScoringPolicy};
use super::{AvailabilityWindow, Candidate, MatchError};

const MAX_RATING: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchFactor {
    Skills,
    Rating,
    Distance,
    Availability,
    UrgencyResponsiveness,
}

/// Normalized sub-score with its weight, kept so a score can be audited later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreComponent {
    pub factor: MatchFactor,
    pub score: f64,
    pub weight: f64,
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchScore {
    /// Final score in `0.0..=100.0`, rounded to two decimals.
    pub total: f64,
    pub weighted: f64,
    pub tier_bonus: f64,
    pub strike_penalty: f64,
    pub distance_km: f64,
    pub components: Vec<ScoreComponent>,
}

/// Hard filters. An excluded worker never appears in a ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Exclusion {
    OutsideRadius { distance_km: f64, radius_km: f64 },
    MissingCertification { certification: String },
    NoSkillOverlap,
}

impl fmt::Display for Exclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exclusion::OutsideRadius {
                distance_km,
                radius_km,
            } => write!(
                f,
                "{distance_km:.1}km away, beyond the {radius_km:.1}km radius"
            ),
            Exclusion::MissingCertification { certification } => {
                write!(f, "missing mandatory certification '{certification}'")
            }
            Exclusion::NoSkillOverlap => f.write_str("none of the required skills"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MatchOutcome {
    Scored(MatchScore),
    Excluded(Exclusion),
}

impl MatchOutcome {
    pub fn score(&self) -> Option<&MatchScore> {
        match self {
            MatchOutcome::Scored(score) => Some(score),
            MatchOutcome::Excluded(_) => None,
        }
    }

    pub fn total(&self) -> Option<f64> {
        self.score().map(|score| score.total)
    }
}

/// Pure scoring function over a candidate snapshot and a shift snapshot.
#[derive(Debug, Clone)]
pub struct MatchScorer {
    weights: MatchWeights,
    policy: ScoringPolicy,
}

impl MatchScorer {
    pub fn new(weights: MatchWeights, policy: ScoringPolicy) -> Result<Self, MatchError> {
        weights.validate()?;
        policy.validate()?;
        Ok(Self { weights, policy })
    }

    pub fn weights(&self) -> &MatchWeights {
        &self.weights
    }

    /// Rejects shifts whose attributes cannot produce a meaningful score.
    pub fn validate_shift(shift: &Shift) -> Result<(), MatchError> {
        if shift.industry.trim().is_empty() {
            return Err(MatchError::MissingShiftAttribute("industry"));
        }
        if !shift.location.is_valid() {
            return Err(MatchError::MalformedShift(format!(
                "location ({}, {}) is not a valid coordinate",
                shift.location.latitude, shift.location.longitude
            )));
        }
        if !shift.radius_km.is_finite() || shift.radius_km <= 0.0 {
            return Err(MatchError::MalformedShift(format!(
                "radius must be positive, found {}",
                shift.radius_km
            )));
        }
        if shift.ends_at <= shift.starts_at {
            return Err(MatchError::MalformedShift(
                "shift must end after it starts".to_string(),
            ));
        }
        Ok(())
    }

    fn validate_candidate(candidate: &Candidate) -> Result<(), MatchError> {
        let profile = &candidate.profile;
        if !profile.location.is_valid() {
            return Err(MatchError::MalformedWorker(format!(
                "worker {} has an invalid location",
                profile.worker_id
            )));
        }
        if let Some(rate) = profile.urgent_acceptance_rate {
            if !(0.0..=1.0).contains(&rate) {
                return Err(MatchError::MalformedWorker(format!(
                    "worker {} urgent acceptance rate {rate} outside 0..=1",
                    profile.worker_id
                )));
            }
        }
        if let Some(rating) = candidate.standing.average_rating {
            if !(0.0..=MAX_RATING).contains(&rating) {
                return Err(MatchError::MalformedWorker(format!(
                    "worker {} rating {rating} outside 0..=5",
                    profile.worker_id
                )));
            }
        }
        Ok(())
    }

    pub fn score(&self, candidate: &Candidate, shift: &Shift) -> Result<MatchOutcome, MatchError> {
        Self::validate_shift(shift)?;
        Self::validate_candidate(candidate)?;

        let profile = &candidate.profile;

        if let Some(missing) = shift
            .required_certifications
            .iter()
            .find(|certification| !profile.certifications.contains(*certification))
        {
            return Ok(MatchOutcome::Excluded(Exclusion::MissingCertification {
                certification: missing.clone(),
            }));
        }

        let distance_km = profile.location.distance_km(&shift.location);
        if distance_km > shift.radius_km {
            return Ok(MatchOutcome::Excluded(Exclusion::OutsideRadius {
                distance_km: round2(distance_km),
                radius_km: shift.radius_km,
            }));
        }

        let mut components = Vec::new();

        let skills_score = if shift.required_skills.is_empty() {
            components.push(ScoreComponent {
                factor: MatchFactor::Skills,
                score: 100.0,
                weight: self.weights.skills,
                notes: "no skills required".to_string(),
            });
            100.0
        } else {
            let matched = shift
                .required_skills
                .intersection(&profile.skills)
                .count();
            if matched == 0 {
                return Ok(MatchOutcome::Excluded(Exclusion::NoSkillOverlap));
            }
            let score = matched as f64 / shift.required_skills.len() as f64 * 100.0;
            components.push(ScoreComponent {
                factor: MatchFactor::Skills,
                score,
                weight: self.weights.skills,
                notes: format!(
                    "{matched} of {} required skills",
                    shift.required_skills.len()
                ),
            });
            score
        };

        let rating_score = match candidate.standing.average_rating {
            Some(rating) => {
                let score = rating / MAX_RATING * 100.0;
                components.push(ScoreComponent {
                    factor: MatchFactor::Rating,
                    score,
                    weight: self.weights.rating,
                    notes: format!("average rating {rating:.2}"),
                });
                score
            }
            None => {
                components.push(ScoreComponent {
                    factor: MatchFactor::Rating,
                    score: self.policy.unrated_score,
                    weight: self.weights.rating,
                    notes: "no rating history".to_string(),
                });
                self.policy.unrated_score
            }
        };

        let distance_score = (1.0 - distance_km / shift.radius_km) * 100.0;
        components.push(ScoreComponent {
            factor: MatchFactor::Distance,
            score: distance_score,
            weight: self.weights.distance,
            notes: format!("{distance_km:.1}km of {:.1}km radius", shift.radius_km),
        });

        let overlap = availability_overlap_seconds(
            &profile.availability,
            shift.starts_at,
            shift.ends_at,
        );
        let availability_score = overlap as f64 / shift.duration_seconds() as f64 * 100.0;
        components.push(ScoreComponent {
            factor: MatchFactor::Availability,
            score: availability_score,
            weight: self.weights.availability,
            notes: format!(
                "available {} of {} minutes",
                overlap / 60,
                shift.duration_seconds() / 60
            ),
        });

        let mut weighted_sum = self.weights.skills * skills_score
            + self.weights.rating * rating_score
            + self.weights.distance * distance_score
            + self.weights.availability * availability_score;
        let mut weight_total =
            self.weights.skills + self.weights.rating + self.weights.distance + self.weights.availability;

        if shift.urgency.is_elevated() {
            let rate = profile.urgent_acceptance_rate.unwrap_or(0.0);
            let score = rate * 100.0;
            components.push(ScoreComponent {
                factor: MatchFactor::UrgencyResponsiveness,
                score,
                weight: self.weights.urgency,
                notes: format!(
                    "accepts {:.0}% of {} offers",
                    rate * 100.0,
                    shift.urgency.label()
                ),
            });
            weighted_sum += self.weights.urgency * score;
            weight_total += self.weights.urgency;
        }

        let weighted = weighted_sum / weight_total;
        let tier_bonus = (f64::from(profile.tier.booking_priority())
            * self.policy.tier_bonus_per_level)
            .min(self.policy.tier_bonus_cap);
        let strike_penalty = f64::from(candidate.standing.strikes) * self.policy.strike_penalty;
        let total = (weighted + tier_bonus - strike_penalty).clamp(0.0, 100.0);

        Ok(MatchOutcome::Scored(MatchScore {
            total: round2(total),
            weighted: round2(weighted),
            tier_bonus: round2(tier_bonus),
            strike_penalty: round2(strike_penalty),
            distance_km: round2(distance_km),
            components,
        }))
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Seconds of `[start, end)` covered by the union of the windows.
fn availability_overlap_seconds(
    windows: &[AvailabilityWindow],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> i64 {
    let mut clipped: Vec<(DateTime<Utc>, DateTime<Utc>)> = windows
        .iter()
        .filter_map(|window| {
            let from = window.starts_at.max(start);
            let to = window.ends_at.min(end);
            (from < to).then_some((from, to))
        })
        .collect();
    clipped.sort();

    let mut total = 0;
    let mut current: Option<(DateTime<Utc>, DateTime<Utc>)> = None;
    for (from, to) in clipped {
        current = match current {
            Some((open_from, open_to)) if from <= open_to => Some((open_from, open_to.max(to))),
            Some((open_from, open_to)) => {
                total += (open_to - open_from).num_seconds();
                Some((from, to))
            }
            None => Some((from, to)),
        };
    }
    if let Some((open_from, open_to)) = current {
        total += (open_to - open_from).num_seconds();
    }
    total
}
