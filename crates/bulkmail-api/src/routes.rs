//! API routes

use axum::{
    http::HeaderValue,
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

use crate::auth::{auth_middleware, AppState};
use crate::handlers::{
    admin, auth, campaigns, health, history, send, smtp, stats, templates, tracking, unsubscribe,
    upgrade,
};

/// CORS layer; an empty origin list allows any origin
fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();
    layer.allow_origin(origins)
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    // Health check routes (no auth required)
    let health_routes = Router::new()
        .route("/", get(health::health))
        .route("/live", get(health::liveness))
        .route("/ready", get(health::readiness))
        .route("/detailed", get(health::health_detailed));

    // Public API routes
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/track/open/:id", get(tracking::track_open));

    // Campaign routes
    let campaign_routes = Router::new()
        .route(
            "/",
            get(campaigns::list_campaigns).post(campaigns::create_campaign),
        )
        .route(
            "/:campaign_id",
            get(campaigns::get_campaign).delete(campaigns::delete_campaign),
        )
        .route("/:campaign_id/recipients", get(campaigns::list_recipients))
        .route("/:campaign_id/start", post(campaigns::start_campaign))
        .route("/:campaign_id/pause", post(campaigns::pause_campaign));

    // Admin routes
    let admin_routes = Router::new()
        .route("/premium-requests", get(admin::list_premium_requests))
        .route(
            "/premium-requests/:id/approve",
            post(admin::approve_premium_request),
        )
        .route(
            "/premium-requests/:id/reject",
            post(admin::reject_premium_request),
        );

    // Authenticated API routes
    let protected_routes = Router::new()
        .route("/auth/logout", post(auth::logout))
        .route("/stats", get(stats::get_stats))
        .route("/send", post(send::send_email))
        .route("/send/bulk", post(send::send_bulk))
        .route(
            "/smtp",
            get(smtp::list_accounts).post(smtp::create_account),
        )
        .route("/smtp/test/:id", post(smtp::test_account))
        .route(
            "/templates",
            get(templates::list_templates).post(templates::create_template),
        )
        .route("/history", get(history::get_history))
        .route("/upgrade", post(upgrade::request_upgrade))
        .nest("/campaigns", campaign_routes)
        .nest("/admin", admin_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let cors = cors_layer(&state.config.server.cors_origins);

    // Combine all routes
    Router::new()
        .nest("/health", health_routes)
        .route(
            "/unsubscribe/:token",
            get(unsubscribe::unsubscribe).post(unsubscribe::unsubscribe),
        )
        .nest("/api", public_routes.merge(protected_routes))
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
