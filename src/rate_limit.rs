use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::{
    context::RequestContext,
    error::GateError,
    gate::Stage,
    store::CounterState,
};

const WINDOW_SECS: i64 = 60;

/// Outcome of one `allow` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Requests left in the current window, never negative.
    pub remaining: u64,
    /// Time until the window rolls over. Zero when allowed.
    pub retry_after: Duration,
}

impl RateDecision {
    fn unlimited(limit: u64) -> Self {
        Self {
            allowed: true,
            remaining: limit,
            retry_after: Duration::ZERO,
        }
    }
}

/// RateLimiter
///
/// Fixed calendar-minute window per subject. The counter lives in the shared store so
/// every instance sees the same count. A missing or failing store admits the request:
/// losing the limiter must never take the API down with it.
#[derive(Clone)]
pub struct RateLimiter {
    store: Option<CounterState>,
    limit: u64,
}

impl RateLimiter {
    pub fn new(store: CounterState, limit: u64) -> Self {
        Self {
            store: Some(store),
            limit,
        }
    }

    /// A limiter that admits everything. It is not part of the gate at all.
    pub fn disabled() -> Self {
        Self {
            store: None,
            limit: 0,
        }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// A zero limit would deny everyone; it counts as disabled.
    pub fn is_enabled(&self) -> bool {
        self.store.is_some() && self.limit > 0
    }

    pub async fn allow(&self, subject: &str) -> RateDecision {
        self.allow_at(subject, Utc::now()).await
    }

    /// allow_at
    ///
    /// `allow` with an explicit clock. The window key is `subject:<unix minute>`, and the
    /// key expires exactly at the next minute boundary.
    pub async fn allow_at(&self, subject: &str, now: DateTime<Utc>) -> RateDecision {
        let limit = self.limit;
        let Some(store) = self.store.as_ref().filter(|_| limit > 0) else {
            return RateDecision::unlimited(limit);
        };

        let secs = now.timestamp();
        let bucket = secs.div_euclid(WINDOW_SECS);
        let until_rollover = Duration::from_secs((WINDOW_SECS - secs.rem_euclid(WINDOW_SECS)) as u64);
        let key = format!("{subject}:{bucket}");

        let window = match store.increment(&key, until_rollover).await {
            Ok(window) => window,
            Err(e) => {
                tracing::warn!(error = %e, subject, "rate limit store unavailable, allowing request");
                return RateDecision::unlimited(limit);
            }
        };

        if window.count <= limit {
            RateDecision {
                allowed: true,
                remaining: limit - window.count,
                retry_after: Duration::ZERO,
            }
        } else {
            RateDecision {
                allowed: false,
                remaining: 0,
                retry_after: window.ttl.min(Duration::from_secs(WINDOW_SECS as u64)),
            }
        }
    }
}

pub struct RateLimitStage {
    pub limiter: RateLimiter,
}

#[async_trait]
impl Stage for RateLimitStage {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    async fn run(&self, cx: &mut RequestContext) -> Result<(), GateError> {
        // Quotas key on identity only.
        if cx.subject.is_anonymous() {
            return Ok(());
        }

        let limit = self.limiter.limit();
        let decision = self.limiter.allow(cx.subject.as_str()).await;
        if decision.allowed {
            return Ok(());
        }

        // Round up so clients never retry inside the closed window.
        let retry_after_secs = decision.retry_after.as_millis().div_ceil(1000) as u64;
        Err(GateError::TooManyRequests {
            limit,
            remaining: decision.remaining,
            retry_after_secs,
        })
    }
}
