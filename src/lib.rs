pub mod api;
pub mod broadcast;
pub mod config;
pub mod domain;
pub mod error;
pub mod matcher;
pub mod registry;
pub mod scoring;
pub mod storage;

pub use api::{create_router, start_server, AppState, TokenAuth};
pub use broadcast::CategoryBroadcaster;
pub use config::AppConfig;
pub use domain::{Agent, AgentStatus, CoordinationRequest, Prediction};
pub use error::{Result, SwarmError};
pub use matcher::CoordinationMatcher;
pub use registry::{ConnectionHandle, ConnectionRegistry};
pub use storage::{AgentFilter, NewPrediction, PostgresStore, Storage};
