use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use tower_http::cors::{Any, CorsLayer};

use crate::api::session::ws_handler;
use crate::api::state::AppState;
use crate::api::types::HealthResponse;

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/health", get(get_health))
        .with_state(state)
        .layer(cors)
}

async fn get_health(State(state): State<AppState>) -> impl IntoResponse {
    let db_up = state.store.ping().await;

    let response = HealthResponse {
        status: if db_up { "ok" } else { "degraded" }.to_string(),
        db: if db_up { "up" } else { "down" }.to_string(),
        uptime_secs: state.uptime_secs() as i64,
        connected_agents: state.registry.len(),
    };

    let code = if db_up {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::domain::{Agent, Prediction};
    use crate::error::Result;
    use crate::scoring::ResolutionStats;
    use crate::storage::{AgentFilter, NewPrediction, Storage};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::Arc;
    use tower::ServiceExt;
    use uuid::Uuid;

    /// Store that is never reached by the routes under test; ping uses the
    /// default always-up probe.
    struct IdleStore;

    #[async_trait]
    impl Storage for IdleStore {
        async fn create_prediction(&self, _new: NewPrediction) -> Result<Prediction> {
            unimplemented!()
        }
        async fn resolve_prediction(&self, _id: Uuid, _outcome: bool) -> Result<Prediction> {
            unimplemented!()
        }
        async fn get_agent_by_id(&self, _id: &str) -> Result<Option<Agent>> {
            unimplemented!()
        }
        async fn prediction_stats(&self, _agent_id: &str) -> Result<ResolutionStats> {
            unimplemented!()
        }
        async fn query_agents(&self, _filter: &AgentFilter) -> Result<Vec<Agent>> {
            unimplemented!()
        }
        async fn list_unresolved_predictions(&self, _limit: i64) -> Result<Vec<Prediction>> {
            unimplemented!()
        }
    }

    fn test_state() -> AppState {
        let config = AppConfig::default_config("postgres://unused/unused");
        AppState::new(Arc::new(IdleStore), &config)
    }

    #[tokio::test]
    async fn health_reports_backend_and_connection_count() {
        let state = test_state();
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        state.registry.register("a1", tx);

        let app = create_router(state);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["status"], "ok");
        assert_eq!(value["db"], "up");
        assert_eq!(value["connected_agents"], 1);
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let app = create_router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/missing")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
