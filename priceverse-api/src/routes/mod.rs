//! HTTP routes

mod health;
mod rpc;
mod stream;

use axum::Router;

use crate::AppState;

/// Request/response routes
pub fn api_routes() -> Router<AppState> {
    Router::new().merge(rpc::routes()).merge(health::routes())
}

/// Streaming routes
pub fn ws_routes() -> Router<AppState> {
    stream::routes()
}
