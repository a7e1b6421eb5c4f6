use axum::{
    Router,
    extract::FromRef,
    middleware,
};
use std::sync::Arc;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

// The request gate and its stages.
pub mod auth;
pub mod context;
pub mod error;
pub mod gate;
pub mod policy;
pub mod rate_limit;
pub mod skipper;
pub mod store;
pub mod trace;

// Menu queries behind the gate.
pub mod handlers;
pub mod menu_tree;
pub mod models;
pub mod repository;

pub mod config;
pub mod routes;
use routes::{api, public};

// --- Public Re-exports ---

pub use auth::{AuthUser, DebugFallback, JwtAuth, TokenAuthenticator};
pub use config::AppConfig;
pub use error::GateError;
pub use gate::{Gate, gate_middleware};
pub use menu_tree::{MenuTreeAssembler, assemble};
pub use policy::{CasbinEnforcer, PolicyAuthorizer};
pub use rate_limit::RateLimiter;
pub use repository::{InMemoryMenuRepository, MenuRepositoryState};

/// AppState
///
/// Everything a request needs, shared by all requests. Cheap to clone: every field is
/// immutable or behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub menus: MenuRepositoryState,
    /// Token issuer/revoker used by the session endpoints.
    pub jwt: Arc<JwtAuth>,
    pub gate: Arc<Gate>,
}

// --- Axum FromRef Extractor Implementations ---

impl FromRef<AppState> for Arc<Gate> {
    fn from_ref(app_state: &AppState) -> Arc<Gate> {
        app_state.gate.clone()
    }
}

impl FromRef<AppState> for MenuRepositoryState {
    fn from_ref(app_state: &AppState) -> MenuRepositoryState {
        app_state.menus.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// build_gate
///
/// Wires the configured stages in their fixed order. `authorizer` is `None` when
/// casbin is switched off; a disabled limiter drops out of the pipeline on its own.
pub fn build_gate(
    config: &AppConfig,
    authenticator: TokenAuthenticator,
    authorizer: Option<PolicyAuthorizer>,
    limiter: RateLimiter,
) -> Gate {
    let mut builder = Gate::builder(authenticator)
        .identity_skippers(config::default_identity_skippers())
        .debug_fallback(config.debug_fallback());

    if let Some(authorizer) = authorizer.filter(|_| config.enable_casbin) {
        builder = builder.authorize(authorizer, config::default_authorize_skippers());
    }

    builder.rate_limit(limiter, Vec::new()).build()
}

/// create_router
///
/// Assembles the routing table: probes outside the gate, `/api` behind it, and the
/// observability layers around everything.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    // Everything under /api passes the gate, including unmatched paths and methods, so
    // the route table is never visible to unauthenticated callers.
    let api_router = api::api_routes()
        .fallback(handlers::not_found)
        .method_not_allowed_fallback(handlers::method_not_allowed)
        .layer(middleware::from_fn_with_state(state.clone(), gate_middleware));

    let base_router = Router::new()
        .merge(public::public_routes())
        .nest("/api", api_router)
        .fallback(handlers::not_found)
        .method_not_allowed_fallback(handlers::method_not_allowed)
        .with_state(state);

    base_router
        .layer(
            ServiceBuilder::new()
                // Keeps a client-supplied x-request-id, otherwise generates a UUID.
                .layer(SetRequestIdLayer::new(
                    trace::REQUEST_ID_HEADER,
                    MakeRequestUuid,
                ))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(trace::REQUEST_ID_HEADER)),
        )
        .layer(cors)
}

/// trace_span_logger
///
/// Request span carrying the correlation id. `subject` is filled in by the gate once
/// the caller is known.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get(&trace::REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
        subject = tracing::field::Empty,
    )
}
