//! Storage Port: the persistence operations the engine consumes. The
//! concrete relational implementation lives in [`postgres`]; tests supply
//! in-memory and mock implementations.

pub mod postgres;

use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::{Agent, AgentStatus, Prediction};
use crate::error::Result;
use crate::scoring::{self, ResolutionStats};

pub use postgres::PostgresStore;

/// Fields for a prediction insert. Ids and timestamps are assigned by the
/// store; the insert is all-or-nothing.
#[derive(Debug, Clone)]
pub struct NewPrediction {
    pub agent_id: String,
    pub event_id: String,
    pub event_title: String,
    pub event_category: String,
    pub predicted_probability: f64,
    pub rationale: Option<String>,
    pub confidence_score: f64,
    pub stake_amount: Decimal,
}

/// Filter for agent queries. Empty `specializations` bypasses the
/// intersection filter; results come back ordered by trust score descending.
#[derive(Debug, Clone, Default)]
pub struct AgentFilter {
    pub exclude_id: Option<String>,
    pub status: Option<AgentStatus>,
    pub min_trust_score: Option<f64>,
    pub specializations: Vec<String>,
    pub limit: Option<i64>,
}

#[async_trait]
pub trait Storage: Send + Sync {
    /// Persist a new prediction and return the stored record.
    async fn create_prediction(&self, new: NewPrediction) -> Result<Prediction>;

    /// Transition a prediction to resolved, computing outcome, Brier score,
    /// and correctness in one atomic write. Fails with `AlreadyResolved`
    /// when the prediction has an outcome.
    async fn resolve_prediction(&self, id: Uuid, outcome: bool) -> Result<Prediction>;

    async fn get_agent_by_id(&self, id: &str) -> Result<Option<Agent>>;

    /// Aggregate resolved-prediction statistics for one agent.
    async fn prediction_stats(&self, agent_id: &str) -> Result<ResolutionStats>;

    /// Agents matching the filter, ordered by trust score descending.
    async fn query_agents(&self, filter: &AgentFilter) -> Result<Vec<Agent>>;

    /// Unresolved predictions, most recent first, bounded to `limit`.
    async fn list_unresolved_predictions(&self, limit: i64) -> Result<Vec<Prediction>>;

    /// Recompute an agent's trust score from stored history. Pure function
    /// of `prediction_stats`; implementations may cache the result but the
    /// value returned here is always freshly derived.
    async fn compute_trust_score(&self, agent_id: &str) -> Result<f64> {
        let stats = self.prediction_stats(agent_id).await?;
        Ok(scoring::trust_score(&stats))
    }

    /// Backend liveness probe for health reporting.
    async fn ping(&self) -> bool {
        true
    }
}
