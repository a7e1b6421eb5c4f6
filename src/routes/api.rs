use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// API Router Module
///
/// Everything under `/api`. `create_router` nests this table at `/api` and wraps the
/// whole nested router (fallbacks included) in the gate, which matches on the full
/// original path.
///
/// Exemptions (see `config::default_*_skippers`):
/// - `GET|POST /api/v1/pub/login*` may be called anonymously.
/// - `GET|POST /api/v1/pub/*` skip the policy check but still need an identity.
pub fn api_routes() -> Router<AppState> {
    Router::<AppState>::new()
        // --- Session ---
        // POST /api/v1/pub/login/exit
        // Revokes the presented token. Reachable anonymously so stale clients can always log out.
        .route("/v1/pub/login/exit", post(handlers::logout))
        // POST /api/v1/pub/refresh_token
        // Re-issues a token for the current subject.
        .route("/v1/pub/refresh_token", post(handlers::refresh_token))
        // GET /api/v1/pub/current/menutree
        // Navigation tree of non-hidden menus for the current user.
        .route("/v1/pub/current/menutree", get(handlers::current_menu_tree))
        // --- Menus ---
        // GET /api/v1/menus?q=page|tree
        .route("/v1/menus", get(handlers::query_menus))
        // GET /api/v1/menus/{id}
        .route("/v1/menus/{id}", get(handlers::get_menu))
}
