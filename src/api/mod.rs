//! HTTP surface: WebSocket sessions plus the health endpoint.

pub mod auth;
pub mod routes;
pub mod server;
pub mod session;
pub mod state;
pub mod types;

pub use auth::TokenAuth;
pub use routes::create_router;
pub use server::start_server;
pub use state::AppState;
