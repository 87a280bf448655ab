use chrono::Utc;
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AppConfig;

/// Lifetime of an access token: 15 minutes.
pub const ACCESS_TOKEN_TTL_SECS: i64 = 15 * 60;
/// Lifetime of a refresh token: 7 days.
pub const REFRESH_TOKEN_TTL_SECS: i64 = 7 * 24 * 60 * 60;

/// TokenError
///
/// `Expired`, `NotActive` and `Invalid` are the verification outcomes a client can
/// recover from (by refreshing or logging in again). The remaining variants are
/// configuration faults and surface as 500s.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("signing secret {0} is not configured")]
    MissingSecret(&'static str),
    #[error("access and refresh tokens must use distinct secrets")]
    IdenticalSecrets,
    #[error("token expired")]
    Expired,
    #[error("token is not yet active")]
    NotActive,
    #[error("token is malformed or its signature is invalid")]
    Invalid,
    #[error("failed to sign token: {0}")]
    Signing(String),
}

/// Claims
///
/// The payload of both token kinds. Only the identity is encoded; role and activation
/// status are always re-read from the credential store when the token is used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user id.
    pub sub: Uuid,
    /// Issued at (unix seconds).
    pub iat: i64,
    /// Not before (unix seconds).
    pub nbf: i64,
    /// Expiration (unix seconds). A token is expired from this instant on.
    pub exp: i64,
}

/// A freshly issued access/refresh pair.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Clone)]
struct SigningKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl SigningKeys {
    fn from_secret(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }
}

/// TokenIssuer
///
/// Creates and verifies the two HS256 token kinds. Secrets are handed over once at
/// construction, so a missing secret stops the process at startup instead of failing
/// individual requests.
#[derive(Clone)]
pub struct TokenIssuer {
    access: SigningKeys,
    refresh: SigningKeys,
    access_ttl: i64,
    refresh_ttl: i64,
}

impl TokenIssuer {
    pub fn new(access_secret: &str, refresh_secret: &str) -> Result<Self, TokenError> {
        if access_secret.is_empty() {
            return Err(TokenError::MissingSecret("ACCESS_TOKEN_SECRET"));
        }
        if refresh_secret.is_empty() {
            return Err(TokenError::MissingSecret("REFRESH_TOKEN_SECRET"));
        }
        if access_secret == refresh_secret {
            return Err(TokenError::IdenticalSecrets);
        }

        Ok(Self {
            access: SigningKeys::from_secret(access_secret),
            refresh: SigningKeys::from_secret(refresh_secret),
            access_ttl: ACCESS_TOKEN_TTL_SECS,
            refresh_ttl: REFRESH_TOKEN_TTL_SECS,
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, TokenError> {
        Self::new(&config.access_token_secret, &config.refresh_token_secret)
    }

    /// Overrides the token lifetimes (seconds).
    pub fn with_ttls(mut self, access_ttl: i64, refresh_ttl: i64) -> Self {
        self.access_ttl = access_ttl;
        self.refresh_ttl = refresh_ttl;
        self
    }

    pub fn access_ttl_secs(&self) -> i64 {
        self.access_ttl
    }

    pub fn refresh_ttl_secs(&self) -> i64 {
        self.refresh_ttl
    }

    pub fn issue_tokens(&self, user_id: Uuid) -> Result<TokenPair, TokenError> {
        self.issue_tokens_at(user_id, now())
    }

    pub fn issue_tokens_at(&self, user_id: Uuid, now: i64) -> Result<TokenPair, TokenError> {
        Ok(TokenPair {
            access_token: sign(&self.access, user_id, now, self.access_ttl)?,
            refresh_token: sign(&self.refresh, user_id, now, self.refresh_ttl)?,
        })
    }

    pub fn issue_access_token(&self, user_id: Uuid) -> Result<String, TokenError> {
        sign(&self.access, user_id, now(), self.access_ttl)
    }

    pub fn verify_access(&self, token: &str) -> Result<Uuid, TokenError> {
        self.verify_access_at(token, now())
    }

    pub fn verify_access_at(&self, token: &str, now: i64) -> Result<Uuid, TokenError> {
        verify(&self.access, token, now)
    }

    pub fn verify_refresh(&self, token: &str) -> Result<Uuid, TokenError> {
        self.verify_refresh_at(token, now())
    }

    pub fn verify_refresh_at(&self, token: &str, now: i64) -> Result<Uuid, TokenError> {
        verify(&self.refresh, token, now)
    }
}

fn now() -> i64 {
    Utc::now().timestamp()
}

fn sign(keys: &SigningKeys, user_id: Uuid, now: i64, ttl: i64) -> Result<String, TokenError> {
    let claims = Claims {
        sub: user_id,
        iat: now,
        nbf: now,
        exp: now + ttl,
    };

    encode(&Header::new(Algorithm::HS256), &claims, &keys.encoding)
        .map_err(|e| TokenError::Signing(e.to_string()))
}

fn verify(keys: &SigningKeys, token: &str, now: i64) -> Result<Uuid, TokenError> {
    // Time-based claims are checked below against `now` so the expiry boundary is
    // inclusive and independent of the library's leeway handling.
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.leeway = 0;

    let claims = decode::<Claims>(token, &keys.decoding, &validation)
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::ImmatureSignature => TokenError::NotActive,
            _ => TokenError::Invalid,
        })?
        .claims;

    if now >= claims.exp {
        return Err(TokenError::Expired);
    }
    if claims.nbf > now {
        return Err(TokenError::NotActive);
    }

    Ok(claims.sub)
}
