use rbac_gate::{
    AppState, CasbinEnforcer, InMemoryMenuRepository, JwtAuth, MenuRepositoryState,
    PolicyAuthorizer, RateLimiter, TokenAuthenticator, build_gate,
    config::{AppConfig, Env},
    create_router,
    store::{CounterState, RedisStore, RevocationState},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// main
///
/// Loads configuration, initialises logging, connects the shared store and the policy
/// engine, then serves the gated router.
#[tokio::main]
async fn main() {
    // 1. Configuration (fail-fast)
    dotenv::dotenv().ok();
    let config = AppConfig::load();

    // 2. Logging: pretty locally, JSON in production.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "rbac_gate=debug,tower_http=info".into());

    match config.env {
        Env::Local => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        Env::Production => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
    }

    tracing::info!("Application starting in {:?} mode", config.env);

    // 3. Shared store (Redis). Connected lazily: while it is unreachable the limiter
    // admits requests and token resolution fails closed, call by call.
    let redis = RedisStore::open(
        &config.redis_url,
        &config.redis_key_prefix,
        config.store_timeout,
    )
    .expect("FATAL: REDIS_URL is not a valid redis url");

    if let Err(e) = redis.connection().await {
        tracing::warn!(error = %e, "shared store unreachable at startup, will retry per request");
    }

    let revocations: RevocationState = Arc::new(redis.clone());
    let limiter = if config.rate_limit_enable {
        let counters: CounterState = Arc::new(redis.clone());
        RateLimiter::new(counters, config.rate_limit_count)
    } else {
        RateLimiter::disabled()
    };

    // 4. Identity and policy
    let jwt = Arc::new(JwtAuth::new(
        config.jwt_secret.clone(),
        config.jwt_expired,
        revocations,
    ));
    let authenticator = TokenAuthenticator::new(jwt.clone());

    let enforcer = match &config.casbin_policy_file {
        Some(path) => CasbinEnforcer::from_file(&config.root_user, path).await,
        None => CasbinEnforcer::with_rules(&config.root_user, &[], &[]).await,
    }
    .expect("FATAL: failed to initialise the casbin enforcer");
    let authorizer = PolicyAuthorizer::new(Arc::new(enforcer));

    let gate = build_gate(&config, authenticator, Some(authorizer), limiter);
    if config.env == Env::Production {
        gate.assert_production_safe();
    }
    tracing::info!(stages = ?gate.stage_names(), "request gate ready");

    // 5. Business layer (menus live in memory; persistence is not this service's concern)
    let menus = Arc::new(InMemoryMenuRepository::default()) as MenuRepositoryState;

    let app_state = AppState {
        config: config.clone(),
        menus,
        jwt,
        gate: Arc::new(gate),
    };

    // 6. Router and Server Startup
    let app = create_router(app_state);
    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .expect("FATAL: failed to bind the listen address");

    tracing::info!("Listening on {}", config.listen_addr);

    axum::serve(listener, app)
        .await
        .expect("FATAL: server terminated unexpectedly");
}
