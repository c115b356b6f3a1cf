use axum::routing::{get, patch, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::health::metrics))
        // Accounts
        .route(
            "/accounts",
            post(handlers::accounts::create).get(handlers::accounts::list),
        )
        .route(
            "/accounts/test-connection",
            post(handlers::accounts::test_connection),
        )
        .route(
            "/accounts/platforms/connect",
            post(handlers::accounts::connect_platform),
        )
        .route(
            "/accounts/platforms/create-accounts",
            post(handlers::accounts::create_from_platform),
        )
        .route(
            "/accounts/{id}",
            get(handlers::accounts::get)
                .patch(handlers::accounts::update)
                .delete(handlers::accounts::delete),
        )
        .route("/accounts/{id}/connect", post(handlers::accounts::connect))
        .route(
            "/accounts/{id}/disconnect",
            post(handlers::accounts::disconnect),
        )
        // Copiers
        .route(
            "/copiers",
            post(handlers::copiers::create).get(handlers::copiers::list),
        )
        .route(
            "/copiers/{id}",
            get(handlers::copiers::get)
                .patch(handlers::copiers::update)
                .delete(handlers::copiers::delete),
        )
        .route("/copiers/{id}/start", post(handlers::copiers::start))
        .route("/copiers/{id}/stop", post(handlers::copiers::stop))
        .route("/copiers/{id}/pause", post(handlers::copiers::pause))
        .route("/copiers/{id}/logs", get(handlers::copiers::logs))
        .route("/copiers/{id}/slaves", post(handlers::copiers::add_slave))
        .route(
            "/copiers/{id}/slaves/{slave_account_id}",
            patch(handlers::copiers::update_slave).delete(handlers::copiers::remove_slave),
        )
        // Trades
        .route("/trades", get(handlers::trades::list))
        .route("/trades/history", get(handlers::trades::history))
        .route(
            "/trades/mappings/{copier_id}",
            get(handlers::trades::mappings),
        )
        .route("/trades/{id}", get(handlers::trades::get))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
