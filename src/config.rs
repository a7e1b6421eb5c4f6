use std::{env, time::Duration};

use crate::{
    auth::DebugFallback,
    context::Subject,
    skipper::{Skipper, allow_method_and_path_prefix, join_router},
};

/// AppConfig
///
/// Immutable runtime configuration, read once from the environment at startup and
/// shared through the application state.
#[derive(Clone, Debug)]
pub struct AppConfig {
    // Runtime environment marker. Controls logging format and the debug fallback.
    pub env: Env,
    pub listen_addr: String,
    // HS256 secret for issuing and validating bearer tokens.
    pub jwt_secret: String,
    pub jwt_expired: Duration,
    // Superuser name: passes every policy check and is the debug fallback identity.
    pub root_user: String,
    // Only honoured in Env::Local; load() refuses it in production.
    pub debug_fallback: bool,
    pub enable_casbin: bool,
    // casbin CSV policy file. Without it the enforcer starts with no rules.
    pub casbin_policy_file: Option<String>,
    pub rate_limit_enable: bool,
    // Requests per subject per calendar minute.
    pub rate_limit_count: u64,
    pub redis_url: String,
    pub redis_key_prefix: String,
    // Upper bound for a single shared-store call.
    pub store_timeout: Duration,
    // Emit a diagnostic when menu records with unknown parents are promoted to roots.
    pub menu_strict_validation: bool,
}

/// Env
///
/// `Local` is the development posture, `Production` the hardened one.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Env {
    Local,
    Production,
}

impl Default for AppConfig {
    /// Safe, non-panicking values for tests.
    fn default() -> Self {
        Self {
            env: Env::Local,
            listen_addr: "127.0.0.1:3000".to_string(),
            jwt_secret: "super-secure-test-secret-value-local".to_string(),
            jwt_expired: Duration::from_secs(7200),
            root_user: "root".to_string(),
            debug_fallback: false,
            enable_casbin: true,
            casbin_policy_file: None,
            rate_limit_enable: false,
            rate_limit_count: 300,
            redis_url: "redis://127.0.0.1:6379/0".to_string(),
            redis_key_prefix: "rbac-gate".to_string(),
            store_timeout: Duration::from_millis(200),
            menu_strict_validation: false,
        }
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

fn env_number(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl AppConfig {
    /// load
    ///
    /// Reads the configuration from environment variables and fails fast.
    ///
    /// # Panics
    /// In production: when `JWT_SECRET` is missing, or when `AUTH_DEBUG_FALLBACK` is
    /// switched on. A production process must never start with the identity fallback.
    /// In any environment: when rate limiting is enabled with `RATE_LIMIT_COUNT=0`.
    pub fn load() -> Self {
        let defaults = Self::default();
        let env = match env::var("APP_ENV").as_deref() {
            Ok("production") => Env::Production,
            _ => Env::Local,
        };

        let jwt_secret = match env {
            Env::Production => {
                env::var("JWT_SECRET").expect("FATAL: JWT_SECRET must be set in production.")
            }
            Env::Local => env::var("JWT_SECRET").unwrap_or(defaults.jwt_secret),
        };

        let debug_fallback = env_flag("AUTH_DEBUG_FALLBACK", false);
        if env == Env::Production && debug_fallback {
            panic!("FATAL: AUTH_DEBUG_FALLBACK cannot be enabled in production.");
        }

        let rate_limit_enable = env_flag("RATE_LIMIT_ENABLE", defaults.rate_limit_enable);
        let rate_limit_count = env_number("RATE_LIMIT_COUNT", defaults.rate_limit_count);
        if rate_limit_enable && rate_limit_count == 0 {
            panic!("FATAL: RATE_LIMIT_COUNT must be positive when RATE_LIMIT_ENABLE is set.");
        }

        Self {
            env,
            listen_addr: env::var("LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            jwt_secret,
            jwt_expired: Duration::from_secs(env_number(
                "JWT_EXPIRED_SECS",
                defaults.jwt_expired.as_secs(),
            )),
            root_user: env::var("ROOT_USER").unwrap_or(defaults.root_user),
            debug_fallback,
            enable_casbin: env_flag("ENABLE_CASBIN", defaults.enable_casbin),
            casbin_policy_file: env::var("CASBIN_POLICY_FILE").ok().filter(|v| !v.is_empty()),
            rate_limit_enable,
            rate_limit_count,
            redis_url: env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            redis_key_prefix: env::var("REDIS_KEY_PREFIX").unwrap_or(defaults.redis_key_prefix),
            store_timeout: Duration::from_millis(env_number(
                "COUNTER_STORE_TIMEOUT_MS",
                defaults.store_timeout.as_millis() as u64,
            )),
            menu_strict_validation: env_flag(
                "MENU_STRICT_VALIDATION",
                defaults.menu_strict_validation,
            ),
        }
    }

    /// The debug fallback identity, if this configuration permits one.
    pub fn debug_fallback(&self) -> Option<DebugFallback> {
        (self.env == Env::Local && self.debug_fallback).then(|| DebugFallback {
            superuser: Subject::new(self.root_user.clone()),
        })
    }
}

/// Login endpoints are reachable without an identity.
pub fn default_identity_skippers() -> Vec<Skipper> {
    vec![allow_method_and_path_prefix([
        join_router("GET", "/api/v1/pub/login"),
        join_router("POST", "/api/v1/pub/login"),
    ])]
}

/// Everything under `/api/v1/pub` is open to any signed-in user.
pub fn default_authorize_skippers() -> Vec<Skipper> {
    vec![allow_method_and_path_prefix([
        join_router("GET", "/api/v1/pub"),
        join_router("POST", "/api/v1/pub"),
    ])]
}
