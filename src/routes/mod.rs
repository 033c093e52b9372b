use std::any::Any;
use std::time::Duration;

use axum::http::HeaderValue;
use axum::{
    error_handling::HandleErrorLayer,
    extract::DefaultBodyLimit,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    BoxError, Router,
};
use serde::Serialize;
use tower::{buffer::BufferLayer, limit::RateLimitLayer, load_shed::LoadShedLayer, ServiceBuilder};
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::{auth::AuthenticatedUser, config::AppConfig, error::AppError, state::AppState};

pub mod auth;
pub mod free_times;
pub mod friends;
pub mod health;
pub mod users;

const MAX_BODY_BYTES: usize = 1024 * 1024;
const LIMITER_QUEUE: usize = 1024;

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

pub fn create_router(state: AppState) -> Router<()> {
    let cors = build_cors(&state.config);

    let auth_routes = Router::new()
        .route("/signup", post(auth::signup))
        .route("/login", post(auth::login))
        .route("/refresh", post(auth::refresh))
        .route("/callback", get(auth::oauth_callback));

    let protected_user_routes = Router::new()
        .route(
            "/me",
            get(users::me)
                .patch(users::update_me)
                .delete(users::delete_me),
        )
        .route("/search", get(users::search))
        .layer(middleware::from_extractor_with_state::<AuthenticatedUser, _>(state.clone()));

    let user_routes = Router::new()
        .route("/:id", get(users::get_user))
        .merge(protected_user_routes);

    let friends_routes = Router::new()
        .route("/", get(friends::list_friends))
        .route("/search", get(friends::search_friends))
        .route("/free", get(free_times::list_for_friends))
        .route("/requests", post(friends::send_request))
        .route("/requests/sent", get(friends::list_sent))
        .route("/requests/received", get(friends::list_received))
        .route(
            "/requests/:id",
            put(friends::accept_request).delete(friends::remove_request),
        )
        .route("/:id", axum::routing::delete(friends::unfriend))
        .route("/:id/free", get(free_times::list_for_friend));

    let free_routes = Router::new()
        .route("/", get(free_times::list_own).post(free_times::create))
        .route(
            "/:id",
            get(free_times::get)
                .patch(free_times::update)
                .delete(free_times::delete),
        );

    let protected_routes = Router::new()
        .nest("/friends", friends_routes)
        .nest("/free", free_routes)
        .layer(middleware::from_extractor_with_state::<AuthenticatedUser, _>(state.clone()));

    let api = Router::new()
        .nest("/auth", auth_routes)
        .nest("/users", user_routes)
        .merge(protected_routes)
        .route("/health", get(health::health_check));

    Router::new()
        .nest("/api/v1", api)
        .fallback(|| async { AppError::not_found() })
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(CatchPanicLayer::custom(handle_panic))
                .layer(cors)
                .layer(DefaultBodyLimit::max(MAX_BODY_BYTES)),
        )
}

/// Wraps the router in a single process-wide rate limiter when enabled.
///
/// Requests beyond `LIMITER_RPS` per `LIMITER_WINDOW_SECONDS` are shed with
/// 429 instead of queueing.
pub fn create_app(state: AppState) -> Router<()> {
    let config = state.config.clone();
    let router = create_router(state);
    if !config.limiter_enabled {
        return router;
    }

    let limited = ServiceBuilder::new()
        .layer(HandleErrorLayer::new(handle_limiter_error))
        .layer(BufferLayer::new(LIMITER_QUEUE))
        .layer(LoadShedLayer::new())
        .layer(RateLimitLayer::new(
            config.limiter_rps.max(1),
            Duration::from_secs(config.limiter_window_seconds.max(1)),
        ))
        .service(router);

    Router::new().fallback_service(limited)
}

async fn handle_limiter_error(err: BoxError) -> AppError {
    if err.is::<tower::load_shed::error::Overloaded>() {
        AppError::rate_limited()
    } else {
        AppError::internal(err)
    }
}

fn handle_panic(_: Box<dyn Any + Send + 'static>) -> Response {
    AppError::internal("request handler panicked").into_response()
}

fn build_cors(config: &AppConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_allowed_origin
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .filter_map(|value| {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                return None;
            }
            match trimmed.parse::<HeaderValue>() {
                Ok(origin) => Some(origin),
                Err(_) => {
                    tracing::warn!(origin = trimmed, "ignoring invalid CORS origin");
                    None
                }
            }
        })
        .collect();

    let allow_origin = if origins.is_empty() {
        AllowOrigin::mirror_request()
    } else {
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
        .max_age(Duration::from_secs(60 * 60))
}
