use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::api::auth::TokenAuth;
use crate::broadcast::CategoryBroadcaster;
use crate::config::AppConfig;
use crate::matcher::CoordinationMatcher;
use crate::registry::ConnectionRegistry;
use crate::storage::Storage;

/// Shared application state for the WebSocket and health endpoints.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Storage>,
    pub registry: Arc<ConnectionRegistry>,
    pub broadcaster: Arc<CategoryBroadcaster>,
    pub matcher: Arc<CoordinationMatcher>,
    pub auth: TokenAuth,
    pub snapshot_limit: i64,
    pub idle_ping: Duration,
    started_at: Instant,
}

impl AppState {
    pub fn new(store: Arc<dyn Storage>, config: &AppConfig) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Arc::new(CategoryBroadcaster::with_lookup_limit(
            Arc::clone(&store),
            Arc::clone(&registry),
            config.broadcast.max_concurrent_lookups,
        ));
        let matcher = Arc::new(CoordinationMatcher::new(
            Arc::clone(&store),
            Arc::clone(&registry),
        ));

        Self {
            store,
            registry,
            broadcaster,
            matcher,
            auth: TokenAuth::from_config(&config.auth),
            snapshot_limit: config.server.snapshot_limit,
            idle_ping: Duration::from_secs(config.server.idle_ping_secs),
            started_at: Instant::now(),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
