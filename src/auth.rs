use async_trait::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, header, request::Parts},
};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use thiserror::Error;

use crate::{
    context::{RequestContext, Subject},
    error::GateError,
    gate::Stage,
    models::TokenInfo,
    store::RevocationState,
};

/// Claims
///
/// Payload carried inside every HS256 token this service issues.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (sub): the user identifier the token was issued for.
    pub sub: String,
    /// Expiration Time (exp), seconds since the epoch.
    pub exp: usize,
    /// Issued At (iat), seconds since the epoch.
    pub iat: usize,
}

/// Why a token could not be turned into a subject.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Malformed, badly signed, expired or revoked.
    #[error("invalid token")]
    Invalid,
    /// The resolver's own dependencies failed (signing key, revocation store).
    #[error("identity resolver unavailable: {0}")]
    Unavailable(String),
}

/// IdentityResolver
///
/// Maps a raw bearer token to a subject id. Signature verification lives behind this
/// seam; the gate only cares about the two failure classes.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn parse_subject(&self, token: &str) -> Result<String, ResolveError>;
}

/// bearer_token
///
/// Extracts the credential from `Authorization: Bearer <token>`. Any other scheme, or an
/// empty token, counts as no credential at all.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .filter(|token| !token.is_empty())
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// JwtAuth
///
/// HS256 token issuer and resolver. Logged-out tokens are kept in the revocation store
/// until they would have expired anyway.
pub struct JwtAuth {
    secret: String,
    expired: Duration,
    revocations: RevocationState,
}

impl JwtAuth {
    pub fn new(secret: impl Into<String>, expired: Duration, revocations: RevocationState) -> Self {
        Self {
            secret: secret.into(),
            expired,
            revocations,
        }
    }

    /// generate_token
    ///
    /// Issues a fresh token for `subject`. Used by the refresh endpoint.
    pub fn generate_token(&self, subject: &str) -> Result<TokenInfo, GateError> {
        if self.secret.is_empty() {
            return Err(GateError::Internal("signing key not configured".to_string()));
        }

        let iat = unix_now();
        let exp = iat + self.expired.as_secs();
        let claims = Claims {
            sub: subject.to_string(),
            exp: exp as usize,
            iat: iat as usize,
        };

        let access_token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| GateError::Internal(format!("token signing failed: {e}")))?;

        Ok(TokenInfo {
            access_token,
            token_type: "Bearer".to_string(),
            expires_at: exp as i64,
        })
    }

    /// destroy_token
    ///
    /// Revokes a token for the rest of its lifetime. Tokens that no longer decode are
    /// already unusable and are ignored.
    pub async fn destroy_token(&self, token: &str) -> Result<(), GateError> {
        let Ok(claims) = self.decode_claims(token) else {
            return Ok(());
        };

        let remaining = (claims.exp as u64).saturating_sub(unix_now());
        if remaining == 0 {
            return Ok(());
        }

        self.revocations
            .revoke(token, Duration::from_secs(remaining))
            .await
            .map_err(|e| GateError::Internal(e.to_string()))
    }

    fn decode_claims(&self, token: &str) -> Result<Claims, ResolveError> {
        if self.secret.is_empty() {
            return Err(ResolveError::Unavailable("signing key not configured".to_string()));
        }

        let decoding_key = DecodingKey::from_secret(self.secret.as_bytes());
        let mut validation = Validation::default();
        validation.validate_exp = true;

        match decode::<Claims>(token, &decoding_key, &validation) {
            Ok(data) => Ok(data.claims),
            Err(e) => match e.kind() {
                // Key material problems are ours, not the caller's.
                ErrorKind::InvalidKeyFormat
                | ErrorKind::InvalidEcdsaKey
                | ErrorKind::InvalidRsaKey(_) => Err(ResolveError::Unavailable(e.to_string())),
                _ => Err(ResolveError::Invalid),
            },
        }
    }
}

#[async_trait]
impl IdentityResolver for JwtAuth {
    async fn parse_subject(&self, token: &str) -> Result<String, ResolveError> {
        let claims = self.decode_claims(token)?;

        let revoked = self
            .revocations
            .is_revoked(token)
            .await
            .map_err(|e| ResolveError::Unavailable(e.to_string()))?;
        if revoked || claims.sub.is_empty() {
            return Err(ResolveError::Invalid);
        }

        Ok(claims.sub)
    }
}

/// TokenAuthenticator
///
/// Resolves the request's subject. A missing credential is not an error here: it
/// resolves to the anonymous subject and later stages decide whether that is enough.
#[derive(Clone)]
pub struct TokenAuthenticator {
    resolver: Arc<dyn IdentityResolver>,
}

impl TokenAuthenticator {
    pub fn new(resolver: Arc<dyn IdentityResolver>) -> Self {
        Self { resolver }
    }

    pub async fn resolve(&self, headers: &HeaderMap) -> Result<Subject, GateError> {
        let Some(token) = bearer_token(headers) else {
            return Ok(Subject::anonymous());
        };

        match self.resolver.parse_subject(token).await {
            Ok(id) => Ok(Subject::new(id)),
            Err(ResolveError::Invalid) => Err(GateError::InvalidCredential),
            Err(ResolveError::Unavailable(cause)) => Err(GateError::ResolutionFailure(cause)),
        }
    }
}

pub struct AuthenticateStage {
    pub authenticator: TokenAuthenticator,
}

#[async_trait]
impl Stage for AuthenticateStage {
    fn name(&self) -> &'static str {
        "authenticate"
    }

    async fn run(&self, cx: &mut RequestContext) -> Result<(), GateError> {
        let subject = self.authenticator.resolve(&cx.headers).await?;
        if !subject.is_anonymous() {
            tracing::Span::current().record("subject", subject.as_str());
        }
        cx.subject = subject;
        Ok(())
    }
}

/// DebugFallback
///
/// Development-only identity substitution: anonymous requests on protected routes run as
/// the configured superuser instead of being rejected. Never constructed by the
/// configuration loader in production.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugFallback {
    pub superuser: Subject,
}

/// RequireIdentityStage
///
/// Rejects anonymous requests with `InvalidCredential`, or substitutes the debug
/// superuser when a fallback was injected.
pub struct RequireIdentityStage {
    pub fallback: Option<DebugFallback>,
}

#[async_trait]
impl Stage for RequireIdentityStage {
    fn name(&self) -> &'static str {
        "require_identity"
    }

    async fn run(&self, cx: &mut RequestContext) -> Result<(), GateError> {
        if !cx.subject.is_anonymous() {
            return Ok(());
        }

        match &self.fallback {
            Some(fallback) => {
                tracing::warn!(
                    trace_id = %cx.trace_id,
                    superuser = %fallback.superuser,
                    "DEBUG FALLBACK: anonymous request promoted to superuser"
                );
                cx.subject = fallback.superuser.clone();
                tracing::Span::current().record("subject", cx.subject.as_str());
                Ok(())
            }
            None => Err(GateError::InvalidCredential),
        }
    }
}

/// AuthUser Extractor Result
///
/// The identity the gate let through, available to handlers behind the gate.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: String,
    pub trace_id: String,
}

/// AuthUser Extractor Implementation
///
/// Reads the `RequestContext` the gate placed in the request extensions. Rejects with
/// `InvalidCredential` when the route was not gated or the subject is anonymous.
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = GateError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let cx = parts
            .extensions
            .get::<RequestContext>()
            .ok_or(GateError::InvalidCredential)?;

        if cx.subject.is_anonymous() {
            return Err(GateError::InvalidCredential);
        }

        Ok(AuthUser {
            id: cx.subject.as_str().to_string(),
            trace_id: cx.trace_id.clone(),
        })
    }
}
