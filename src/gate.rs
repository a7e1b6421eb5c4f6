use async_trait::async_trait;
use axum::{
    extract::{OriginalUri, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use crate::{
    auth::{AuthenticateStage, DebugFallback, RequireIdentityStage, TokenAuthenticator},
    context::RequestContext,
    error::GateError,
    policy::{AuthorizeStage, PolicyAuthorizer},
    rate_limit::{RateLimitStage, RateLimiter},
    skipper::{Skipper, any_skips},
    trace::TraceStage,
};

/// Stage
///
/// One step of the gate. `Ok(())` hands the request to the next stage; an error ends
/// the pipeline and becomes the response.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, cx: &mut RequestContext) -> Result<(), GateError>;
}

struct GateStage {
    stage: Box<dyn Stage>,
    skippers: Vec<Skipper>,
}

/// Gate
///
/// The ordered request pipeline:
///
/// `trace -> authenticate -> require_identity -> authorize -> rate_limit -> handler`
///
/// The order is fixed by [`GateBuilder::build`]. `trace` and `authenticate` always run.
/// Every later stage is bypassed entirely when one of its skippers matches the request.
pub struct Gate {
    stages: Vec<GateStage>,
    debug_fallback: Option<DebugFallback>,
}

impl Gate {
    pub fn builder(authenticator: TokenAuthenticator) -> GateBuilder {
        GateBuilder {
            authenticator,
            identity_skippers: Vec::new(),
            debug_fallback: None,
            authorizer: None,
            limiter: None,
        }
    }

    /// Runs every stage against `cx`, stopping at the first rejection.
    pub async fn run(&self, cx: &mut RequestContext) -> Result<(), GateError> {
        for entry in &self.stages {
            if any_skips(&entry.skippers, &cx.method, &cx.path) {
                tracing::trace!(stage = entry.stage.name(), path = %cx.path, "stage skipped");
                continue;
            }
            entry.stage.run(cx).await?;
        }
        Ok(())
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|entry| entry.stage.name()).collect()
    }

    pub fn debug_fallback(&self) -> Option<&DebugFallback> {
        self.debug_fallback.as_ref()
    }

    /// Panics when a debug fallback is wired into a gate meant for production.
    pub fn assert_production_safe(&self) {
        assert!(
            self.debug_fallback.is_none(),
            "FATAL: debug identity fallback must not be enabled in production"
        );
    }

    /// reject
    ///
    /// Converts a rejection into the response. Server-side failures are logged with the
    /// trace id and their cause; client errors are ordinary control flow.
    pub fn reject(&self, cx: &RequestContext, err: GateError) -> Response {
        if err.is_server_error() {
            tracing::error!(
                trace_id = %cx.trace_id,
                subject = %cx.subject,
                method = %cx.method,
                path = %cx.path,
                error = %err,
                "request failed"
            );
        } else if let GateError::TooManyRequests { .. } = err {
            tracing::info!(trace_id = %cx.trace_id, subject = %cx.subject, "rate limit exceeded");
        }
        err.into_response()
    }
}

/// GateBuilder
///
/// Collects the optional enforcement stages. A stage that is not configured is not part
/// of the pipeline at all, which is how `ENABLE_CASBIN=false` and a disabled limiter are
/// expressed.
pub struct GateBuilder {
    authenticator: TokenAuthenticator,
    identity_skippers: Vec<Skipper>,
    debug_fallback: Option<DebugFallback>,
    authorizer: Option<(PolicyAuthorizer, Vec<Skipper>)>,
    limiter: Option<(RateLimiter, Vec<Skipper>)>,
}

impl GateBuilder {
    /// Routes that may be reached anonymously.
    pub fn identity_skippers(mut self, skippers: Vec<Skipper>) -> Self {
        self.identity_skippers = skippers;
        self
    }

    pub fn debug_fallback(mut self, fallback: Option<DebugFallback>) -> Self {
        if let Some(fallback) = &fallback {
            tracing::warn!(
                superuser = %fallback.superuser,
                "DEBUG FALLBACK ENABLED: anonymous requests will run as the superuser"
            );
        }
        self.debug_fallback = fallback;
        self
    }

    pub fn authorize(mut self, authorizer: PolicyAuthorizer, skippers: Vec<Skipper>) -> Self {
        self.authorizer = Some((authorizer, skippers));
        self
    }

    pub fn rate_limit(mut self, limiter: RateLimiter, skippers: Vec<Skipper>) -> Self {
        if limiter.is_enabled() {
            self.limiter = Some((limiter, skippers));
        }
        self
    }

    pub fn build(self) -> Gate {
        let mut stages = vec![
            GateStage {
                stage: Box::new(TraceStage),
                skippers: Vec::new(),
            },
            GateStage {
                stage: Box::new(AuthenticateStage {
                    authenticator: self.authenticator,
                }),
                skippers: Vec::new(),
            },
            GateStage {
                stage: Box::new(RequireIdentityStage {
                    fallback: self.debug_fallback.clone(),
                }),
                skippers: self.identity_skippers,
            },
        ];

        if let Some((authorizer, skippers)) = self.authorizer {
            stages.push(GateStage {
                stage: Box::new(AuthorizeStage { authorizer }),
                skippers,
            });
        }
        if let Some((limiter, skippers)) = self.limiter {
            stages.push(GateStage {
                stage: Box::new(RateLimitStage { limiter }),
                skippers,
            });
        }

        Gate {
            stages,
            debug_fallback: self.debug_fallback,
        }
    }
}

/// gate_middleware
///
/// Axum adapter: builds the request context, runs the gate and either forwards the
/// request (with the context in its extensions) or answers with the rejection.
pub async fn gate_middleware(
    State(gate): State<Arc<Gate>>,
    mut request: Request,
    next: Next,
) -> Response {
    // Nested routers see a stripped uri; skippers and policies match the full path.
    let path = request
        .extensions()
        .get::<OriginalUri>()
        .map(|OriginalUri(uri)| uri.path().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let mut cx = RequestContext::new(request.method().clone(), path, request.headers().clone());

    match gate.run(&mut cx).await {
        Ok(()) => {
            request.extensions_mut().insert(cx);
            next.run(request).await
        }
        Err(err) => gate.reject(&cx, err),
    }
}
