use serde::{Deserialize, Serialize};

use super::MatchError;

/// Relative weight of each normalized sub-score. Operators tune these; the scorer treats them
/// as input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchWeights {
    pub skills: f64,
    pub rating: f64,
    pub distance: f64,
    pub availability: f64,
    /// Applied only when the shift is urgent or critical.
    pub urgency: f64,
}

impl Default for MatchWeights {
    fn default() -> Self {
        Self {
            skills: 30.0,
            rating: 20.0,
            distance: 20.0,
            availability: 20.0,
            urgency: 10.0,
        }
    }
}

impl MatchWeights {
    pub fn validate(&self) -> Result<(), MatchError> {
        let all = [
            ("skills", self.skills),
            ("rating", self.rating),
            ("distance", self.distance),
            ("availability", self.availability),
            ("urgency", self.urgency),
        ];
        for (name, value) in all {
            if !value.is_finite() || value < 0.0 {
                return Err(MatchError::InvalidWeights(format!(
                    "{name} weight must be a finite non-negative number, found {value}"
                )));
            }
        }

        // urgency is optional per shift, so the remaining weights must carry the sum alone
        if self.skills + self.rating + self.distance + self.availability <= 0.0 {
            return Err(MatchError::InvalidWeights(
                "weights other than urgency must sum to a positive value".to_string(),
            ));
        }
        Ok(())
    }
}

/// Adjustments applied after the weighted sum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringPolicy {
    pub tier_bonus_per_level: f64,
    pub tier_bonus_cap: f64,
    pub strike_penalty: f64,
    /// Rating sub-score used for workers with no rating history.
    pub unrated_score: f64,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            tier_bonus_per_level: 3.0,
            tier_bonus_cap: 10.0,
            strike_penalty: 8.0,
            unrated_score: 50.0,
        }
    }
}

impl ScoringPolicy {
    pub fn validate(&self) -> Result<(), MatchError> {
        let all = [
            ("tier_bonus_per_level", self.tier_bonus_per_level),
            ("tier_bonus_cap", self.tier_bonus_cap),
            ("strike_penalty", self.strike_penalty),
        ];
        for (name, value) in all {
            if !value.is_finite() || value < 0.0 {
                return Err(MatchError::InvalidWeights(format!(
                    "{name} must be a finite non-negative number, found {value}"
                )));
            }
        }
        if !(0.0..=100.0).contains(&self.unrated_score) {
            return Err(MatchError::InvalidWeights(format!(
                "unrated_score must be within 0..=100, found {}",
                self.unrated_score
            )));
        }
        Ok(())
    }
}
