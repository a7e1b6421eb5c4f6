use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode, header},
    response::Response,
};
use rbac_gate::{
    AppConfig, AppState, CasbinEnforcer, InMemoryMenuRepository, JwtAuth, MenuRepositoryState,
    PolicyAuthorizer, RateLimiter, TokenAuthenticator, build_gate, create_router,
    models::{MenuQueryParam, MenuRecord, TokenInfo},
    policy::{GroupingRule, PolicyRule},
    repository::{MenuRepository, RepositoryError},
    store::MemoryStore,
};
use serde_json::Value;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceExt;

// --- Test Application ---

/// Menu backend that is always down.
struct FailingMenus;

#[async_trait]
impl MenuRepository for FailingMenus {
    async fn query(&self, _params: &MenuQueryParam) -> Result<Vec<MenuRecord>, RepositoryError> {
        Err(RepositoryError::Unavailable("connection reset by peer".to_string()))
    }

    async fn get(&self, _record_id: &str) -> Result<Option<MenuRecord>, RepositoryError> {
        Err(RepositoryError::Unavailable("connection reset by peer".to_string()))
    }
}

struct TestApp {
    router: Router,
    jwt: Arc<JwtAuth>,
}

fn menu(id: &str, parent: Option<&str>, sequence: i64, hidden: bool) -> MenuRecord {
    MenuRecord {
        record_id: id.to_string(),
        name: format!("menu {id}"),
        sequence,
        hidden,
        parent_id: parent.map(str::to_string),
        ..Default::default()
    }
}

fn seed_menus() -> Vec<MenuRecord> {
    vec![
        menu("users", Some("sys"), 2, false),
        menu("sys", None, 1, false),
        menu("menus", Some("sys"), 1, false),
        menu("dash", None, 3, true),
        menu("widgets", Some("dash"), 1, false),
    ]
}

async fn spawn_router(rate_limit: Option<u64>) -> TestApp {
    let menus = Arc::new(InMemoryMenuRepository::new(seed_menus())) as MenuRepositoryState;
    spawn_router_with(rate_limit, menus).await
}

async fn spawn_router_with(rate_limit: Option<u64>, menus: MenuRepositoryState) -> TestApp {
    let config = AppConfig::default();
    let store = Arc::new(MemoryStore::new());

    let jwt = Arc::new(JwtAuth::new(
        config.jwt_secret.clone(),
        config.jwt_expired,
        store.clone(),
    ));

    let enforcer = CasbinEnforcer::with_rules(
        &config.root_user,
        &[
            PolicyRule {
                subject: "menu-admin".to_string(),
                object: "/api/v1/menus".to_string(),
                action: "GET".to_string(),
            },
            PolicyRule {
                subject: "menu-admin".to_string(),
                object: "/api/v1/menus/:id".to_string(),
                action: "GET".to_string(),
            },
        ],
        &[GroupingRule {
            user: "u1".to_string(),
            role: "menu-admin".to_string(),
        }],
    )
    .await
    .expect("enforcer builds");

    let limiter = match rate_limit {
        Some(limit) => RateLimiter::new(store, limit),
        None => RateLimiter::disabled(),
    };

    let gate = build_gate(
        &config,
        TokenAuthenticator::new(jwt.clone()),
        Some(PolicyAuthorizer::new(Arc::new(enforcer))),
        limiter,
    );

    let state = AppState {
        config,
        menus,
        jwt: jwt.clone(),
        gate: Arc::new(gate),
    };

    TestApp {
        router: create_router(state),
        jwt,
    }
}

impl TestApp {
    fn token(&self, subject: &str) -> String {
        self.jwt.generate_token(subject).unwrap().access_token
    }

    async fn send(&self, method: Method, uri: &str, token: Option<&str>) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        self.router
            .clone()
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap()
    }
}

async fn json_of(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// --- Probe and Routing Tests ---

#[tokio::test]
async fn test_health_check_over_tcp() {
    let app = spawn_router(None).await;

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind port");
    let address = format!("http://{}", listener.local_addr().unwrap());
    let router = app.router.clone();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let response = reqwest::Client::new()
        .get(format!("{address}/health"))
        .send()
        .await
        .expect("Failed to execute request.");

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "OK");
}

#[tokio::test]
async fn test_client_request_id_is_echoed() {
    let app = spawn_router(None).await;
    let request = Request::builder()
        .uri("/health")
        .header("x-request-id", "client-trace-1")
        .body(Body::empty())
        .unwrap();

    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.headers()["x-request-id"], "client-trace-1");
}

#[tokio::test]
async fn test_unknown_route_and_wrong_method() {
    let app = spawn_router(None).await;

    let response = app.send(Method::GET, "/nope", None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_of(response).await["error"]["code"], 9994);

    let response = app.send(Method::DELETE, "/health", None).await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(json_of(response).await["error"]["code"], 9993);
}

// --- Gate Tests ---

#[tokio::test]
async fn test_protected_route_without_token_is_401() {
    let app = spawn_router(None).await;

    let response = app.send(Method::GET, "/api/v1/menus?q=tree", None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(json_of(response).await["error"]["code"], 9999);
}

#[tokio::test]
async fn test_unmatched_api_requests_still_pass_the_gate() {
    let app = spawn_router(None).await;

    // A bad token is rejected before routing can leak 404 or 405.
    let response = app
        .send(Method::DELETE, "/api/v1/users", Some("garbage"))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(json_of(response).await["error"]["code"], 9999);

    let response = app.send(Method::POST, "/api/v1/menus", Some("garbage")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app.send(Method::GET, "/api/v1/unknown", None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Once admitted, unmatched requests get the ordinary fallbacks.
    let root = app.token("root");
    let response = app.send(Method::GET, "/api/v1/unknown", Some(&root)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_of(response).await["error"]["code"], 9994);

    let response = app.send(Method::POST, "/api/v1/menus", Some(&root)).await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(json_of(response).await["error"]["code"], 9993);
}

#[tokio::test]
async fn test_user_without_policy_is_403() {
    let app = spawn_router(None).await;
    let token = app.token("u2");

    let response = app
        .send(Method::GET, "/api/v1/menus?q=tree", Some(&token))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(json_of(response).await["error"]["code"], 9998);
}

#[tokio::test]
async fn test_root_user_passes_without_rules() {
    let app = spawn_router(None).await;
    let token = app.token("root");

    let response = app.send(Method::GET, "/api/v1/menus/sys", Some(&token)).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_rate_limit_applies_per_subject() {
    let app = spawn_router(Some(2)).await;
    let token = app.token("u1");

    for _ in 0..2 {
        let response = app.send(Method::GET, "/api/v1/menus/sys", Some(&token)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app.send(Method::GET, "/api/v1/menus/sys", Some(&token)).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()["x-ratelimit-limit"], "2");
    assert_eq!(json_of(response).await["error"]["code"], 9997);

    // Another subject has its own window.
    let other = app.token("root");
    let response = app.send(Method::GET, "/api/v1/menus/sys", Some(&other)).await;
    assert_eq!(response.status(), StatusCode::OK);
}

// --- Menu Handler Tests ---

#[tokio::test]
async fn test_menu_tree_is_nested_and_ordered() {
    let app = spawn_router(None).await;
    let token = app.token("u1");

    let response = app
        .send(Method::GET, "/api/v1/menus?q=tree", Some(&token))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_of(response).await;
    let roots = body["list"].as_array().unwrap();
    assert_eq!(roots.len(), 2);
    assert_eq!(roots[0]["record_id"], "sys");
    assert_eq!(roots[0]["children"][0]["record_id"], "menus");
    assert_eq!(roots[0]["children"][1]["record_id"], "users");
    assert_eq!(roots[1]["record_id"], "dash");
    assert_eq!(roots[1]["children"][0]["record_id"], "widgets");
    assert!(body.get("pagination").is_none());
}

#[tokio::test]
async fn test_menu_page_is_paginated() {
    let app = spawn_router(None).await;
    let token = app.token("u1");

    let response = app
        .send(
            Method::GET,
            "/api/v1/menus?q=page&current=2&pageSize=2",
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_of(response).await;
    assert_eq!(body["list"].as_array().unwrap().len(), 2);
    assert_eq!(body["pagination"]["current"], 2);
    assert_eq!(body["pagination"]["pageSize"], 2);
    assert_eq!(body["pagination"]["total"], 5);
}

#[tokio::test]
async fn test_unknown_query_and_bad_parameter_are_400() {
    let app = spawn_router(None).await;
    let token = app.token("u1");

    let response = app
        .send(Method::GET, "/api/v1/menus?q=bogus", Some(&token))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_of(response).await["error"]["code"], 9996);

    let response = app
        .send(Method::GET, "/api/v1/menus?q=page&hidden=maybe", Some(&token))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_of(response).await["error"]["code"], 9995);
}

#[tokio::test]
async fn test_get_menu_by_id() {
    let app = spawn_router(None).await;
    let token = app.token("u1");

    let response = app
        .send(Method::GET, "/api/v1/menus/users", Some(&token))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_of(response).await["parent_id"], "sys");

    let response = app
        .send(Method::GET, "/api/v1/menus/missing", Some(&token))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_current_menu_tree_drops_hidden_menus() {
    let app = spawn_router(None).await;
    // u2 has no policy rules; /api/v1/pub is exempt from authorization.
    let token = app.token("u2");

    let response = app
        .send(Method::GET, "/api/v1/pub/current/menutree", Some(&token))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_of(response).await;
    let roots: Vec<&str> = body["list"]
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n["record_id"].as_str().unwrap())
        .collect();
    // "widgets" lost its hidden parent and surfaces as a root; equal sequences keep
    // repository order.
    assert_eq!(roots, vec!["sys", "widgets"]);
}

// --- Session Tests ---

#[tokio::test]
async fn test_refresh_token_requires_identity() {
    let app = spawn_router(None).await;

    let response = app
        .send(Method::POST, "/api/v1/pub/refresh_token", None)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let token = app.token("u2");
    let response = app
        .send(Method::POST, "/api/v1/pub/refresh_token", Some(&token))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let info: TokenInfo = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(info.token_type, "Bearer");
    assert!(!info.access_token.is_empty());
}

#[tokio::test]
async fn test_logout_revokes_token() {
    let app = spawn_router(None).await;
    let token = app.token("u1");

    let response = app
        .send(Method::GET, "/api/v1/menus/sys", Some(&token))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .send(Method::POST, "/api/v1/pub/login/exit", Some(&token))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .send(Method::GET, "/api/v1/menus/sys", Some(&token))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_anonymous_logout_is_ok() {
    let app = spawn_router(None).await;

    let response = app.send(Method::POST, "/api/v1/pub/login/exit", None).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_menu_backend_failure_is_500_without_cause() {
    let app = spawn_router_with(None, Arc::new(FailingMenus)).await;
    let token = app.token("u1");

    for uri in ["/api/v1/menus?q=tree", "/api/v1/menus/sys", "/api/v1/pub/current/menutree"] {
        let response = app.send(Method::GET, uri, Some(&token)).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR, "{uri}");

        let body = json_of(response).await;
        assert_eq!(body["error"]["code"], 9000);
        assert_eq!(body["error"]["message"], "internal server error");
    }
}
