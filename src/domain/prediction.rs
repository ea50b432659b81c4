use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, SwarmError};
use crate::scoring;

/// Synthetic category under which meta-predictions are stored.
pub const META_PREDICTION_CATEGORY: &str = "meta_prediction";

/// Default minimum trust threshold for coordination requests.
pub const DEFAULT_MIN_TRUST_SCORE: f64 = 0.6;

/// A probability estimate for a real-world event. Created by the submission
/// path; resolution sets the outcome, timestamp, Brier score, and
/// correctness flag together and exactly once. Never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub id: Uuid,
    pub agent_id: String,
    pub event_id: String,
    pub event_title: String,
    pub event_category: String,
    pub predicted_probability: f64,
    pub rationale: Option<String>,
    pub confidence_score: f64,
    pub stake_amount: Decimal,
    pub submitted_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub actual_outcome: Option<bool>,
    pub brier_score: Option<f64>,
    pub was_correct: Option<bool>,
}

impl Prediction {
    pub fn is_resolved(&self) -> bool {
        self.actual_outcome.is_some()
    }

    /// Transition `Submitted -> Resolved`. Sets all four derived fields
    /// atomically from the caller's point of view; a second resolution is
    /// rejected so outcomes are write-once.
    pub fn resolve(&mut self, outcome: bool) -> Result<()> {
        if self.is_resolved() {
            return Err(SwarmError::AlreadyResolved(self.id));
        }

        self.actual_outcome = Some(outcome);
        self.resolved_at = Some(Utc::now());
        self.brier_score = Some(scoring::brier_score(self.predicted_probability, outcome));
        self.was_correct = Some(scoring::was_correct(self.predicted_probability, outcome));
        Ok(())
    }
}

/// Event id a meta-prediction is stored under, derived from the prediction
/// it targets so it flows through storage and scoring unchanged.
pub fn meta_event_id(target_prediction_id: &str) -> String {
    format!("meta_{target_prediction_id}")
}

/// Validate that a probability-like field lies in [0, 1].
pub fn validate_unit_interval(value: f64, field: &str) -> Result<()> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(SwarmError::Validation(format!(
            "{field} must be between 0 and 1, got {value}"
        )))
    }
}

/// An ephemeral solicitation for collaboration; never persisted.
#[derive(Debug, Clone)]
pub struct CoordinationRequest {
    pub requester_id: String,
    pub event_id: String,
    pub collaboration_type: String,
    pub message: String,
    pub min_trust_score: f64,
    pub required_specializations: Vec<String>,
}
