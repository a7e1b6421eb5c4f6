use crate::{
    AppState,
    auth::{AuthUser, bearer_token},
    context::RequestContext,
    error::GateError,
    menu_tree::MenuTreeAssembler,
    models::{
        HttpList, HttpPagination, HttpStatus, MenuNode, MenuQueryParam, MenuRecord,
        PaginationParam, TokenInfo,
    },
    repository::RepositoryError,
};
use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::HeaderMap,
};
use std::collections::HashMap;

/// Logs a handler-side 500 with the request's trace id before it becomes the response.
fn server_failure(trace_id: &str, err: GateError) -> GateError {
    tracing::error!(trace_id = %trace_id, error = %err, "request failed");
    err
}

fn repository_failure(trace_id: &str) -> impl FnOnce(RepositoryError) -> GateError + '_ {
    move |e| server_failure(trace_id, GateError::Internal(format!("menu repository: {e}")))
}

/// health
///
/// Liveness probe. Sits outside the gate.
pub async fn health() -> Json<HttpStatus> {
    Json(HttpStatus::ok())
}

/// MenuListResponse
///
/// `GET /api/v1/menus` answers either with flat records (page) or nested nodes (tree).
#[derive(serde::Serialize)]
#[serde(untagged)]
pub enum MenuListResponse {
    Page(HttpList<MenuRecord>),
    Tree(HttpList<MenuNode>),
}

/// query_menus
///
/// `GET /api/v1/menus?q=page|tree`. Any other discriminator is `UnknownQuery`.
pub async fn query_menus(
    AuthUser { trace_id, .. }: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<MenuListResponse>, GateError> {
    match query.get("q").map(String::as_str) {
        Some("page") => query_menu_page(&state, &query, &trace_id).await.map(Json),
        Some("tree") => query_menu_tree(&state, &trace_id).await.map(Json),
        _ => Err(GateError::UnknownQuery),
    }
}

async fn query_menu_page(
    state: &AppState,
    query: &HashMap<String, String>,
    trace_id: &str,
) -> Result<MenuListResponse, GateError> {
    let hidden = match query.get("hidden").map(String::as_str) {
        None | Some("") => None,
        Some("0") => Some(false),
        Some("1") => Some(true),
        Some(_) => return Err(GateError::InvalidRequestParameter),
    };
    let params = MenuQueryParam {
        name: query.get("name").filter(|v| !v.is_empty()).cloned(),
        hidden,
        parent_id: query.get("parent_id").filter(|v| !v.is_empty()).cloned(),
    };
    let page = PaginationParam::from_raw(
        query.get("current").map(String::as_str),
        query.get("pageSize").map(String::as_str),
    );

    let mut records = state
        .menus
        .query(&params)
        .await
        .map_err(repository_failure(trace_id))?;
    records.sort_by_key(|r| r.sequence);
    let total = records.len();
    let list = records
        .into_iter()
        .skip(page.offset())
        .take(page.page_size as usize)
        .collect();

    Ok(MenuListResponse::Page(HttpList {
        list,
        pagination: Some(HttpPagination {
            current: page.current,
            page_size: page.page_size,
            total,
        }),
    }))
}

async fn query_menu_tree(state: &AppState, trace_id: &str) -> Result<MenuListResponse, GateError> {
    let records = state
        .menus
        .query(&MenuQueryParam::default())
        .await
        .map_err(repository_failure(trace_id))?;

    let forest = MenuTreeAssembler::new()
        .strict(state.config.menu_strict_validation)
        .assemble(&records);

    Ok(MenuListResponse::Tree(HttpList {
        list: forest,
        pagination: None,
    }))
}

/// get_menu
///
/// `GET /api/v1/menus/{id}`
pub async fn get_menu(
    AuthUser { trace_id, .. }: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MenuRecord>, GateError> {
    state
        .menus
        .get(&id)
        .await
        .map_err(repository_failure(&trace_id))?
        .map(Json)
        .ok_or(GateError::NotFound)
}

/// current_menu_tree
///
/// `GET /api/v1/pub/current/menutree`: the navigation tree for the signed-in user.
/// Hidden menus are filtered out before assembly, so their visible children surface as
/// roots.
pub async fn current_menu_tree(
    AuthUser { id, trace_id }: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<HttpList<MenuNode>>, GateError> {
    let params = MenuQueryParam {
        hidden: Some(false),
        ..Default::default()
    };
    let records = state
        .menus
        .query(&params)
        .await
        .map_err(repository_failure(&trace_id))?;
    tracing::debug!(subject = %id, records = records.len(), "assembling navigation tree");

    let forest = MenuTreeAssembler::new()
        .strict(state.config.menu_strict_validation)
        .assemble(&records);

    Ok(Json(HttpList {
        list: forest,
        pagination: None,
    }))
}

/// refresh_token
///
/// `POST /api/v1/pub/refresh_token`: issues a new token for the current subject.
pub async fn refresh_token(
    AuthUser { id, trace_id }: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<TokenInfo>, GateError> {
    state
        .jwt
        .generate_token(&id)
        .map(Json)
        .map_err(|e| server_failure(&trace_id, e))
}

/// logout
///
/// `POST /api/v1/pub/login/exit`: revokes the presented token if it resolved to a user.
/// Always answers OK; a failed revocation is logged, not surfaced.
pub async fn logout(
    State(state): State<AppState>,
    Extension(cx): Extension<RequestContext>,
    headers: HeaderMap,
) -> Json<HttpStatus> {
    if !cx.subject.is_anonymous() {
        if let Some(token) = bearer_token(&headers) {
            if let Err(e) = state.jwt.destroy_token(token).await {
                tracing::error!(trace_id = %cx.trace_id, error = %e, "token revocation failed");
            }
        }
        tracing::info!(subject = %cx.subject, "user logged out");
    }
    Json(HttpStatus::ok())
}

pub async fn not_found() -> GateError {
    GateError::NotFound
}

pub async fn method_not_allowed() -> GateError {
    GateError::MethodNotAllowed
}
