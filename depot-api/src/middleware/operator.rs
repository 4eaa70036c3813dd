//! Operator-only routes.
//!
//! Routes that act on the whole deployment, like triggering compliance jobs,
//! take an [`OperatorAuth`] argument. The request must carry
//! `Authorization: Bearer <DEPOT_OPERATOR_TOKEN>`. With no token configured
//! these routes answer 403 for everyone.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};

use crate::error::{ApiError, ApiResult};
use crate::onboarding::constant_time_eq;

/// The configured operator token, if any.
#[derive(Clone, Default)]
pub struct OperatorCredential {
    token: Option<Arc<SecretString>>,
}

impl OperatorCredential {
    pub fn new(token: Option<SecretString>) -> Self {
        Self {
            token: token.map(Arc::new),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.token.is_some()
    }

    /// Check the raw `Authorization` header value.
    pub fn verify(&self, authorization: Option<&str>) -> ApiResult<()> {
        let Some(expected) = &self.token else {
            return Err(ApiError::forbidden("Operator routes are disabled"));
        };
        let presented = authorization
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ApiError::unauthorized("Operator bearer token required"))?;

        // Digests first, so the comparison length says nothing about the token.
        let expected = Sha256::digest(expected.expose_secret().as_bytes());
        let presented = Sha256::digest(presented.as_bytes());
        if constant_time_eq(&expected, &presented) {
            Ok(())
        } else {
            tracing::warn!("Rejected operator request with a wrong token");
            Err(ApiError::unauthorized("Invalid operator token"))
        }
    }
}

impl std::fmt::Debug for OperatorCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperatorCredential")
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Extractor proving the caller presented the operator token.
#[derive(Debug, Clone, Copy)]
pub struct OperatorAuth;

#[async_trait]
impl<S> FromRequestParts<S> for OperatorAuth
where
    OperatorCredential: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let authorization = parts
            .headers
            .get(header::AUTHORIZATION)
            .map(|value| {
                value
                    .to_str()
                    .map_err(|_| ApiError::invalid_format("authorization", "a Bearer token"))
            })
            .transpose()?;
        OperatorCredential::from_ref(state).verify(authorization)?;
        Ok(OperatorAuth)
    }
}
