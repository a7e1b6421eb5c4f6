use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderName};
use uuid::Uuid;

use crate::{
    context::RequestContext,
    error::GateError,
    gate::Stage,
};

/// Header carrying the correlation id, shared with tower-http's request-id layers.
pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// ensure_trace_id
///
/// Adopts a client-supplied `x-request-id` verbatim so ids survive service hops,
/// and mints a fresh UUID v4 otherwise. Never fails.
pub fn ensure_trace_id(headers: &HeaderMap) -> String {
    headers
        .get(&REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

pub struct TraceStage;

#[async_trait]
impl Stage for TraceStage {
    fn name(&self) -> &'static str {
        "trace"
    }

    async fn run(&self, cx: &mut RequestContext) -> Result<(), GateError> {
        cx.trace_id = ensure_trace_id(&cx.headers);
        tracing::Span::current().record("req_id", cx.trace_id.as_str());
        Ok(())
    }
}
