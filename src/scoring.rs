//! Pure trust-score computation over resolved prediction outcomes.
//!
//! The engine holds no state: everything here is a function of the
//! prediction history the storage layer aggregates. Callers that need the
//! score cheaply (agent ranking, leaderboards) read the cached
//! `agents.trust_score` column that storage refreshes on resolution.

/// Trust score assigned to an agent with no resolved predictions.
pub const NEUTRAL_TRUST: f64 = 0.5;

/// Weight of the inverse-Brier calibration component.
pub const BRIER_WEIGHT: f64 = 0.7;

/// Weight of the raw accuracy component.
pub const ACCURACY_WEIGHT: f64 = 0.3;

/// Brier score for a single resolved prediction: squared error between the
/// predicted probability and the binary outcome. 0 is best, 1 is worst.
pub fn brier_score(probability: f64, outcome: bool) -> f64 {
    if outcome {
        (1.0 - probability).powi(2)
    } else {
        probability.powi(2)
    }
}

/// A prediction counts as correct when it put more than even odds on the
/// side that happened. Exactly 0.5 is scored as a "no" call.
pub fn was_correct(probability: f64, outcome: bool) -> bool {
    (probability > 0.5 && outcome) || (probability <= 0.5 && !outcome)
}

/// Aggregate over an agent's resolved predictions, as computed by storage.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResolutionStats {
    pub resolved_count: i64,
    pub correct_count: i64,
    pub avg_brier_score: f64,
}

/// Blend inverse Brier score and raw accuracy into a bounded [0, 1]
/// reputation value. Zero history yields the neutral prior.
pub fn trust_score(stats: &ResolutionStats) -> f64 {
    if stats.resolved_count == 0 {
        return NEUTRAL_TRUST;
    }

    let brier_component = (1.0 - stats.avg_brier_score).max(0.0);
    let accuracy_component = stats.correct_count as f64 / stats.resolved_count as f64;

    (brier_component * BRIER_WEIGHT + accuracy_component * ACCURACY_WEIGHT).clamp(0.0, 1.0)
}
