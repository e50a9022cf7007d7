/// Abode API
///
/// Thin axum layer over the engine: JWT auth, request parsing, error mapping
/// and realtime fan-out through the gateway's session table.

pub mod auth;
pub mod error;
pub mod housings;
pub mod messages;
pub mod middleware;
pub mod push;
pub mod reminders;
pub mod visits;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};

pub use auth::{AppState, AppStateInner};
pub use error::{ApiError, ApiResult};

/// Every HTTP route except the WebSocket upgrade.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/housings", post(housings::create_housing))
        .route("/visits", post(visits::create_visit))
        .route("/visits/{visit_id}", get(visits::get_visit))
        .route("/visits/{visit_id}/status", post(visits::transition_visit))
        .route("/visits/{visit_id}/validate", post(visits::validate_visit))
        .route("/visits/{visit_id}/review", post(visits::link_review))
        .route(
            "/visits/{visit_id}/messages",
            get(messages::list_messages).post(messages::send_message),
        )
        .route("/visits/{visit_id}/messages/read", post(messages::mark_read))
        .route("/push/tokens", post(push::register_token))
        .route("/reminders/dispatch", post(reminders::dispatch_now))
        .layer(axum_middleware::from_fn_with_state(state.clone(), middleware::require_auth))
        .with_state(state);

    Router::new().merge(public_routes).merge(protected_routes)
}
