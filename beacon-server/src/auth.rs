//! Bearer token verification and issuance.
//!
//! Tokens are HS256 JWTs carrying the principal identity. The verifier pins
//! the algorithm, so unsigned and alg-none tokens never validate.

use beacon_core::Identity;
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TokenClaims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sub: Option<String>,
    #[serde(default, rename = "userId", skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    uid: Option<String>,
    #[serde(default, rename = "roomId", skip_serializing_if = "Option::is_none")]
    room_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    exp: i64,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TokenError {
    #[error("no signing secret configured")]
    NoSecretConfigured,
    #[error("no token provided")]
    NoTokenProvided,
    #[error("token expired")]
    TokenExpired,
    #[error("invalid token")]
    InvalidToken,
    #[error("token carries no user identifier")]
    MissingUserIdentifier,
}

impl TokenError {
    /// Wire reason used when the failure is reported over the socket.
    pub fn reason(&self) -> &'static str {
        match self {
            TokenError::NoTokenProvided => beacon_core::reason::AUTH_REQUIRED,
            TokenError::TokenExpired => beacon_core::reason::TOKEN_EXPIRED,
            TokenError::NoSecretConfigured
            | TokenError::InvalidToken
            | TokenError::MissingUserIdentifier => beacon_core::reason::AUTH_FAILED,
        }
    }
}

/// Verifies inbound bearer tokens and mints short-lived ones for clients.
pub struct TokenVerifier {
    secret: Option<String>,
    ttl: Duration,
}

impl TokenVerifier {
    pub fn new(secret: Option<String>, ttl: Duration) -> Self {
        Self { secret, ttl }
    }

    pub fn can_issue(&self) -> bool {
        self.secret.is_some()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Validate a token and extract the normalized identity. The user id is
    /// drawn from the first present of `sub`, `userId`, `uid`; a token with
    /// none of them is a hard failure.
    pub fn verify(&self, token: Option<&str>) -> Result<Identity, TokenError> {
        let secret = self.secret.as_deref().ok_or(TokenError::NoSecretConfigured)?;
        let token = match token {
            Some(t) if !t.trim().is_empty() => t,
            _ => return Err(TokenError::NoTokenProvided),
        };

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        let data = decode::<TokenClaims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &validation,
        )
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenError::TokenExpired,
            _ => TokenError::InvalidToken,
        })?;

        let claims = data.claims;
        let user_id = claims
            .sub
            .or(claims.user_id)
            .or(claims.uid)
            .filter(|id| !id.trim().is_empty())
            .ok_or(TokenError::MissingUserIdentifier)?;

        Ok(Identity {
            user_id,
            room_id: claims.room_id,
            name: claims.name,
            role: claims.role,
        })
    }

    /// Issue a token for the given principal, expiring after the configured
    /// TTL.
    pub fn issue(&self, user_id: &str, room_id: Option<&str>) -> Result<String, TokenError> {
        let secret = self.secret.as_deref().ok_or(TokenError::NoSecretConfigured)?;
        let claims = TokenClaims {
            sub: Some(user_id.to_string()),
            user_id: None,
            uid: None,
            room_id: room_id.map(str::to_string),
            name: None,
            role: None,
            exp: Utc::now().timestamp() + self.ttl.as_secs() as i64,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .map_err(|_| TokenError::InvalidToken)
    }
}
