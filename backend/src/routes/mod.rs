//! Route definitions for the Speech2Text service

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};

use crate::{
    handlers::{self, transcriptions},
    middleware::{auth_middleware, upload_limit_middleware},
    AppState,
};

/// Create API routes
pub fn api_routes(state: AppState) -> Router<AppState> {
    Router::new()
        // Auth routes (public)
        .nest("/auth", auth_routes())
        // Plan catalog (public)
        .route("/plans", get(handlers::list_plans))
        .route("/plans/:slug", get(handlers::get_plan))
        // Protected routes
        .nest("/users", user_routes(state.clone()))
        .merge(account_routes(state.clone()))
        .nest("/transcriptions", transcription_routes(state.clone()))
        .route(
            "/models/availability",
            get(transcriptions::model_availability)
                .route_layer(middleware::from_fn_with_state(state, auth_middleware)),
        )
}

/// Authentication routes (public)
fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(handlers::register))
        .route("/login", post(handlers::login))
        .route("/refresh", post(handlers::refresh))
}

/// Profile routes (protected)
fn user_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/me", get(handlers::get_me).put(handlers::update_me))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

/// Subscription and usage routes (protected)
fn account_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/subscription", get(handlers::get_subscription))
        .route("/usage", get(handlers::get_usage))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}

/// Transcription routes (protected)
fn transcription_routes(state: AppState) -> Router<AppState> {
    let upload_ceiling = state.config.storage.superuser_max_upload_bytes;
    let upload_ceiling = usize::try_from(upload_ceiling).unwrap_or(usize::MAX);

    Router::new()
        .route(
            "/",
            get(transcriptions::list).post(transcriptions::upload).layer(
                tower::ServiceBuilder::new()
                    .layer(DefaultBodyLimit::max(upload_ceiling))
                    .layer(middleware::from_fn_with_state(
                        state.clone(),
                        upload_limit_middleware,
                    )),
            ),
        )
        .route(
            "/:id",
            get(transcriptions::get).delete(transcriptions::delete),
        )
        .route("/:id/status", get(transcriptions::status))
        .route("/:id/retry", post(transcriptions::retry))
        .route("/:id/diarize", post(transcriptions::diarize))
        .route_layer(middleware::from_fn_with_state(state, auth_middleware))
}
