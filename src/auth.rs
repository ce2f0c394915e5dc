// ABOUTME: Identity resolution for generation requests from HS256 bearer tokens
// ABOUTME: Maps missing tokens to AuthRequired and bad or expired tokens to AuthInvalid
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Parley contributors

//! # Authentication
//!
//! Session management lives outside this service. Callers present a bearer `JWT`
//! whose `sub` claim is their identity and whose optional `plan` claim names the
//! plan the issuer sold them. This module only verifies the token and extracts
//! both.

use crate::constants::service_names::PARLEY_SERVER;
use crate::errors::{AppError, AppResult};
use crate::models::{IdentityId, PlanId};
use async_trait::async_trait;
use chrono::Utc;
use http::{header::AUTHORIZATION, HeaderMap};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// `JWT` claims for identity tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Identity
    pub sub: String,
    /// Issued at timestamp
    pub iat: i64,
    /// Expiration timestamp
    pub exp: i64,
    /// Audience (who the token is intended for)
    pub aud: String,
    /// Plan the caller is subscribed to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,
}

/// Authenticated caller of a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    /// Who is calling
    pub identity: IdentityId,
    /// Plan asserted by the token issuer, if any
    pub plan: Option<PlanId>,
}

/// Resolves the caller of a request
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Caller for the request headers
    async fn resolve(&self, headers: &HeaderMap) -> AppResult<Caller>;
}

/// Verifies HS256 bearer tokens
#[derive(Clone)]
pub struct JwtIdentityResolver {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl fmt::Debug for JwtIdentityResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtIdentityResolver")
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl JwtIdentityResolver {
    /// Resolver for the given shared secret
    #[must_use]
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Issue a token for `identity` valid for `ttl`
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails
    pub fn issue_token(&self, identity: &IdentityId, ttl: Duration) -> AppResult<String> {
        self.issue_plan_token(identity, None, ttl)
    }

    /// Issue a token for `identity` carrying a `plan` claim
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails
    pub fn issue_plan_token(
        &self,
        identity: &IdentityId,
        plan: Option<&PlanId>,
        ttl: Duration,
    ) -> AppResult<String> {
        let now = Utc::now().timestamp();
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let claims = Claims {
            sub: identity.as_str().to_owned(),
            iat: now,
            exp: now.saturating_add(ttl_secs),
            aud: PARLEY_SERVER.to_owned(),
            plan: plan.map(|p| p.as_str().to_owned()),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AppError::internal(format!("Failed to issue token: {e}")))
    }

    /// Validate a token and return its claims
    ///
    /// # Errors
    ///
    /// Returns `AuthInvalid` for bad signatures, malformed or expired tokens
    pub fn validate_token(&self, token: &str) -> AppResult<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.set_audience(&[PARLEY_SERVER]);

        let data = decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|e| convert_jwt_error(&e))?;
        if data.claims.sub.trim().is_empty() {
            return Err(AppError::auth_invalid("Token has no subject"));
        }
        Ok(data.claims)
    }
}

fn convert_jwt_error(e: &jsonwebtoken::errors::Error) -> AppError {
    use jsonwebtoken::errors::ErrorKind;
    debug!(error = ?e, "JWT validation failed");

    match e.kind() {
        ErrorKind::ExpiredSignature => AppError::auth_invalid("Token expired"),
        ErrorKind::InvalidSignature => {
            AppError::auth_invalid("Token signature verification failed")
        }
        ErrorKind::InvalidAudience => AppError::auth_invalid("Token audience mismatch"),
        _ => AppError::auth_invalid("Token is invalid"),
    }
}

/// Bearer token from the `Authorization` header
fn bearer_token(headers: &HeaderMap) -> AppResult<&str> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or_else(AppError::auth_required)?
        .to_str()
        .map_err(|_| AppError::auth_invalid("Authorization header is not valid text"))?;

    let token = value
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::auth_invalid("Authorization header must use Bearer"))?
        .trim();
    if token.is_empty() {
        return Err(AppError::auth_required());
    }
    Ok(token)
}

#[async_trait]
impl IdentityResolver for JwtIdentityResolver {
    async fn resolve(&self, headers: &HeaderMap) -> AppResult<Caller> {
        let token = bearer_token(headers)?;
        let claims = self.validate_token(token)?;
        Ok(Caller {
            identity: IdentityId::new(claims.sub),
            plan: claims
                .plan
                .filter(|plan| !plan.trim().is_empty())
                .map(PlanId::new),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[tokio::test]
    async fn test_round_trip_identity() {
        let resolver = JwtIdentityResolver::new("secret");
        let token = resolver
            .issue_token(&IdentityId::new("u1"), Duration::from_secs(60))
            .unwrap();
        let caller = resolver
            .resolve(&headers_with(&format!("Bearer {token}")))
            .await
            .unwrap();
        assert_eq!(caller.identity.as_str(), "u1");
        assert_eq!(caller.plan, None);
    }

    #[tokio::test]
    async fn test_plan_claim_is_resolved() {
        let resolver = JwtIdentityResolver::new("secret");
        let token = resolver
            .issue_plan_token(
                &IdentityId::new("u2"),
                Some(&PlanId::new("pro")),
                Duration::from_secs(60),
            )
            .unwrap();
        let caller = resolver
            .resolve(&headers_with(&format!("Bearer {token}")))
            .await
            .unwrap();
        assert_eq!(caller.identity.as_str(), "u2");
        assert_eq!(caller.plan, Some(PlanId::new("pro")));
    }

    #[tokio::test]
    async fn test_missing_header_requires_auth() {
        let resolver = JwtIdentityResolver::new("secret");
        let err = resolver.resolve(&HeaderMap::new()).await.unwrap_err();
        assert_eq!(err.code, crate::errors::ErrorCode::AuthRequired);
    }

    #[tokio::test]
    async fn test_wrong_secret_is_invalid() {
        let issuer = JwtIdentityResolver::new("one");
        let verifier = JwtIdentityResolver::new("two");
        let token = issuer
            .issue_token(&IdentityId::new("u1"), Duration::from_secs(60))
            .unwrap();
        let err = verifier
            .resolve(&headers_with(&format!("Bearer {token}")))
            .await
            .unwrap_err();
        assert_eq!(err.code, crate::errors::ErrorCode::AuthInvalid);
    }

    #[tokio::test]
    async fn test_non_bearer_scheme_is_invalid() {
        let resolver = JwtIdentityResolver::new("secret");
        let err = resolver
            .resolve(&headers_with("Basic dXNlcjpwYXNz"))
            .await
            .unwrap_err();
        assert_eq!(err.code, crate::errors::ErrorCode::AuthInvalid);
    }
}
