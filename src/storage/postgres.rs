use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{QueryBuilder, Row};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::domain::{Agent, AgentStatus, Prediction};
use crate::error::{Result, SwarmError};
use crate::scoring::{self, ResolutionStats};
use crate::storage::{AgentFilter, NewPrediction, Storage};

/// PostgreSQL implementation of the Storage Port
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create a store from an existing connection pool (zero-cost reuse)
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn map_prediction(row: &PgRow) -> Prediction {
        Prediction {
            id: row.get("id"),
            agent_id: row.get("agent_id"),
            event_id: row.get("event_id"),
            event_title: row.get("event_title"),
            event_category: row.get("event_category"),
            predicted_probability: row.get("predicted_probability"),
            rationale: row.get("rationale"),
            confidence_score: row.get("confidence_score"),
            stake_amount: row.get("stake_amount"),
            submitted_at: row.get("submitted_at"),
            resolved_at: row.get("resolved_at"),
            actual_outcome: row.get("actual_outcome"),
            brier_score: row.get("brier_score"),
            was_correct: row.get("was_correct"),
        }
    }

    fn map_agent(row: &PgRow) -> Agent {
        let status_raw: String = row.get("status");
        Agent {
            id: row.get("id"),
            name: row.get("name"),
            agent_type: row.get("agent_type"),
            specializations: row.get("specializations"),
            trust_score: row.get("trust_score"),
            status: AgentStatus::try_from(status_raw.as_str()).unwrap_or(AgentStatus::Inactive),
            created_at: row.get("created_at"),
        }
    }
}

const PREDICTION_COLUMNS: &str = "id, agent_id, event_id, event_title, event_category, \
     predicted_probability, rationale, confidence_score, stake_amount, \
     submitted_at, resolved_at, actual_outcome, brier_score, was_correct";

const AGENT_COLUMNS: &str =
    "id, name, agent_type, specializations, trust_score, status, created_at";

#[async_trait]
impl Storage for PostgresStore {
    #[instrument(skip(self, new), fields(agent_id = %new.agent_id, event_id = %new.event_id))]
    async fn create_prediction(&self, new: NewPrediction) -> Result<Prediction> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO predictions
                (agent_id, event_id, event_title, event_category,
                 predicted_probability, rationale, confidence_score, stake_amount)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {PREDICTION_COLUMNS}
            "#
        ))
        .bind(&new.agent_id)
        .bind(&new.event_id)
        .bind(&new.event_title)
        .bind(&new.event_category)
        .bind(new.predicted_probability)
        .bind(&new.rationale)
        .bind(new.confidence_score)
        .bind(new.stake_amount)
        .fetch_one(&self.pool)
        .await?;

        let prediction = Self::map_prediction(&row);
        debug!(prediction_id = %prediction.id, "prediction persisted");
        Ok(prediction)
    }

    #[instrument(skip(self))]
    async fn resolve_prediction(&self, id: Uuid, outcome: bool) -> Result<Prediction> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {PREDICTION_COLUMNS} FROM predictions WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| SwarmError::PredictionNotFound(id.to_string()))?;

        let mut prediction = Self::map_prediction(&row);
        // Sets outcome, timestamp, brier, correctness together or not at all.
        prediction.resolve(outcome)?;

        sqlx::query(
            r#"
            UPDATE predictions
            SET actual_outcome = $2,
                resolved_at = $3,
                brier_score = $4,
                was_correct = $5
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(prediction.actual_outcome)
        .bind(prediction.resolved_at)
        .bind(prediction.brier_score)
        .bind(prediction.was_correct)
        .execute(&mut *tx)
        .await?;

        // Refresh the cached trust score in the same transaction so agent
        // ranking never observes a half-applied resolution.
        let stats = sqlx::query(
            r#"
            SELECT
                COUNT(*)::BIGINT AS resolved_count,
                COUNT(*) FILTER (WHERE was_correct)::BIGINT AS correct_count,
                COALESCE(AVG(brier_score), 0)::double precision AS avg_brier_score
            FROM predictions
            WHERE agent_id = $1 AND resolved_at IS NOT NULL
            "#,
        )
        .bind(&prediction.agent_id)
        .fetch_one(&mut *tx)
        .await?;

        let trust = scoring::trust_score(&ResolutionStats {
            resolved_count: stats.get("resolved_count"),
            correct_count: stats.get("correct_count"),
            avg_brier_score: stats.get("avg_brier_score"),
        });

        sqlx::query("UPDATE agents SET trust_score = $2 WHERE id = $1")
            .bind(&prediction.agent_id)
            .bind(trust)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        info!(prediction_id = %id, outcome, trust, "prediction resolved");
        Ok(prediction)
    }

    async fn get_agent_by_id(&self, id: &str) -> Result<Option<Agent>> {
        let row = sqlx::query(&format!("SELECT {AGENT_COLUMNS} FROM agents WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| Self::map_agent(&r)))
    }

    async fn prediction_stats(&self, agent_id: &str) -> Result<ResolutionStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*)::BIGINT AS resolved_count,
                COUNT(*) FILTER (WHERE was_correct)::BIGINT AS correct_count,
                COALESCE(AVG(brier_score), 0)::double precision AS avg_brier_score
            FROM predictions
            WHERE agent_id = $1 AND resolved_at IS NOT NULL
            "#,
        )
        .bind(agent_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(ResolutionStats {
            resolved_count: row.get("resolved_count"),
            correct_count: row.get("correct_count"),
            avg_brier_score: row.get("avg_brier_score"),
        })
    }

    async fn query_agents(&self, filter: &AgentFilter) -> Result<Vec<Agent>> {
        let mut builder: QueryBuilder<sqlx::Postgres> =
            QueryBuilder::new(format!("SELECT {AGENT_COLUMNS} FROM agents WHERE 1=1"));

        if let Some(exclude_id) = &filter.exclude_id {
            builder.push(" AND id <> ").push_bind(exclude_id);
        }
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(min_trust) = filter.min_trust_score {
            builder.push(" AND trust_score >= ").push_bind(min_trust);
        }
        if !filter.specializations.is_empty() {
            // Array overlap: agent declares at least one required domain.
            builder
                .push(" AND specializations && ")
                .push_bind(&filter.specializations);
        }

        builder.push(" ORDER BY trust_score DESC");
        if let Some(limit) = filter.limit {
            builder.push(" LIMIT ").push_bind(limit);
        }

        let rows = builder.build().fetch_all(&self.pool).await?;
        Ok(rows.iter().map(Self::map_agent).collect())
    }

    async fn ping(&self) -> bool {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .is_ok()
    }

    async fn list_unresolved_predictions(&self, limit: i64) -> Result<Vec<Prediction>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {PREDICTION_COLUMNS}
            FROM predictions
            WHERE resolved_at IS NULL
            ORDER BY submitted_at DESC
            LIMIT $1
            "#
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::map_prediction).collect())
    }
}
