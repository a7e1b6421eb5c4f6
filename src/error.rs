use axum::{
    Json,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// GateError
///
/// The complete failure taxonomy of the request pipeline and the handlers behind it.
/// Every variant maps to one HTTP status and one stable numeric code. Only the 500-class
/// variants carry an internal cause; that cause is logged by the gate and never written
/// to the response body.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("invalid or missing credential")]
    InvalidCredential,

    #[error("identity resolution failed: {0}")]
    ResolutionFailure(String),

    #[error("no permission for this resource")]
    NoResourcePermission,

    #[error("policy evaluation failed: {0}")]
    PolicyEvaluationFailure(String),

    #[error("too many requests")]
    TooManyRequests {
        limit: u64,
        remaining: u64,
        retry_after_secs: u64,
    },

    #[error("unknown query type")]
    UnknownQuery,

    #[error("invalid request parameter")]
    InvalidRequestParameter,

    #[error("resource not found")]
    NotFound,

    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("internal error: {0}")]
    Internal(String),
}

impl GateError {
    pub fn status(&self) -> StatusCode {
        match self {
            GateError::InvalidCredential => StatusCode::UNAUTHORIZED,
            GateError::NoResourcePermission => StatusCode::FORBIDDEN,
            GateError::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            GateError::UnknownQuery | GateError::InvalidRequestParameter => {
                StatusCode::BAD_REQUEST
            }
            GateError::NotFound => StatusCode::NOT_FOUND,
            GateError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            GateError::ResolutionFailure(_)
            | GateError::PolicyEvaluationFailure(_)
            | GateError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable application code written into the error body.
    pub fn code(&self) -> u32 {
        match self {
            GateError::InvalidCredential => 9999,
            GateError::NoResourcePermission => 9998,
            GateError::TooManyRequests { .. } => 9997,
            GateError::UnknownQuery => 9996,
            GateError::InvalidRequestParameter => 9995,
            GateError::NotFound => 9994,
            GateError::MethodNotAllowed => 9993,
            GateError::ResolutionFailure(_) => 9001,
            GateError::PolicyEvaluationFailure(_) => 9002,
            GateError::Internal(_) => 9000,
        }
    }

    /// Caller-facing message. Internal causes are replaced by a generic message.
    pub fn public_message(&self) -> String {
        if self.is_server_error() {
            "internal server error".to_string()
        } else {
            self.to_string()
        }
    }

    pub fn is_server_error(&self) -> bool {
        self.status().is_server_error()
    }
}

/// Wire shape of a denial: `{"error":{"code":..,"message":..}}`.
#[derive(Debug, Serialize, serde::Deserialize, PartialEq)]
pub struct ErrorBody {
    pub error: ErrorItem,
}

#[derive(Debug, Serialize, serde::Deserialize, PartialEq)]
pub struct ErrorItem {
    pub code: u32,
    pub message: String,
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        if let GateError::TooManyRequests {
            limit,
            remaining,
            retry_after_secs,
        } = &self
        {
            headers.insert("x-ratelimit-limit", HeaderValue::from(*limit));
            headers.insert("x-ratelimit-remaining", HeaderValue::from(*remaining));
            headers.insert("x-ratelimit-delay", HeaderValue::from(*retry_after_secs));
        }

        let body = ErrorBody {
            error: ErrorItem {
                code: self.code(),
                message: self.public_message(),
            },
        };

        (self.status(), headers, Json(body)).into_response()
    }
}
