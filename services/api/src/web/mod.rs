pub mod middleware;
pub mod protocol;
pub mod rest;
pub mod state;
pub mod ws_handler;

use std::sync::Arc;

use axum::{
    middleware as axum_middleware,
    routing::{delete, get, post},
    Router,
};

// Re-export the main WebSocket handler to make it easily accessible
// to the binary that will build the web server router.
pub use middleware::require_identity;
pub use state::AppState;
pub use ws_handler::ws_handler;

/// Every route of the service. All of them require the identity header.
pub fn router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/profile", get(rest::get_profile_handler))
        .route("/achievements", get(rest::list_achievements_handler))
        .route("/achievements/{id}/seen", post(rest::mark_achievement_seen_handler))
        .route("/sessions", get(rest::list_sessions_handler))
        .route("/sessions/{id}", delete(rest::delete_session_handler))
        .route("/activity", get(rest::list_activity_handler))
        .route("/events/unlocks", get(rest::unlock_events_handler))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_identity,
        ))
        .with_state(app_state)
}
