//! JWT Authentication
//!
//! Validates JWTs from external auth providers (Firebase, Auth0, Supabase, etc.).
//! The server does NOT issue tokens - only validates them. The `sub` claim
//! becomes the connection's [`Identity`].

use jsonwebtoken::{decode, Algorithm, DecodingKey, TokenData, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::game::state::Identity;

/// Authentication configuration.
#[derive(Clone, Debug, Default)]
pub struct AuthConfig {
    /// Expected issuer claim ("iss"). If None, any issuer accepted.
    pub issuer: Option<String>,
    /// Expected audience claim ("aud"). If None, any audience accepted.
    pub audience: Option<String>,
    /// RS256 public key in PEM format (preferred for external providers).
    pub public_key_pem: Option<String>,
    /// HS256 secret (fallback for simple setups).
    pub secret: Option<String>,
    /// Whether to skip expiry validation (for testing only).
    pub skip_expiry: bool,
    /// Accept unauthenticated `uid` parameters (development only).
    pub dev_mode: bool,
    /// Identity used in dev mode when the client supplies nothing.
    pub test_user_id: Option<String>,
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false)
}

impl AuthConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            issuer: std::env::var("AUTH_ISSUER").ok(),
            audience: std::env::var("AUTH_AUDIENCE").ok(),
            public_key_pem: std::env::var("AUTH_PUBLIC_KEY_PEM").ok(),
            secret: std::env::var("AUTH_SECRET").ok(),
            skip_expiry: env_flag("AUTH_SKIP_EXPIRY"),
            dev_mode: env_flag("AUTH_DEV_MODE"),
            test_user_id: std::env::var("AUTH_TEST_USER_ID").ok(),
        }
    }

    /// Check if token verification is configured.
    pub fn is_configured(&self) -> bool {
        self.public_key_pem.is_some() || self.secret.is_some()
    }
}

/// Standard JWT claims we expect from auth providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject - the user ID from the auth provider.
    pub sub: String,
    /// Expiry timestamp (Unix seconds).
    #[serde(default)]
    pub exp: u64,
    /// Issued at timestamp.
    #[serde(default)]
    pub iat: u64,
    /// Issuer (auth provider).
    #[serde(default)]
    pub iss: Option<String>,
    /// Audience.
    #[serde(default)]
    pub aud: Option<serde_json::Value>,
}

impl TokenClaims {
    /// The caller identity carried by this token.
    pub fn identity(&self) -> Identity {
        Identity::new(self.sub.clone())
    }
}

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No authentication configured on server.
    #[error("authentication not configured")]
    NotConfigured,
    /// Neither a token nor (in dev mode) a user id was supplied.
    #[error("missing credentials")]
    MissingCredentials,
    /// Token format is invalid.
    #[error("invalid token format")]
    InvalidFormat,
    /// Token signature verification failed.
    #[error("invalid signature")]
    InvalidSignature,
    /// Token has expired.
    #[error("token expired")]
    Expired,
    /// Issuer claim doesn't match expected value.
    #[error("invalid issuer")]
    InvalidIssuer,
    /// Audience claim doesn't match expected value.
    #[error("invalid audience")]
    InvalidAudience,
    /// Required claim is missing.
    #[error("missing required claim: {0}")]
    MissingClaim(String),
    /// JWT decoding error.
    #[error("decode error: {0}")]
    DecodeError(String),
}

/// Validate a JWT token and extract claims.
pub fn validate_token(token: &str, config: &AuthConfig) -> Result<TokenClaims, AuthError> {
    if !config.is_configured() {
        return Err(AuthError::NotConfigured);
    }

    let algorithm = if config.public_key_pem.is_some() {
        Algorithm::RS256
    } else {
        Algorithm::HS256
    };

    let mut validation = Validation::new(algorithm);

    // Claims are checked below, not required up front
    validation.required_spec_claims = std::collections::HashSet::new();

    if let Some(ref issuer) = config.issuer {
        validation.set_issuer(&[issuer]);
    }

    if let Some(ref audience) = config.audience {
        validation.set_audience(&[audience]);
    } else {
        validation.validate_aud = false;
    }

    if config.skip_expiry {
        validation.validate_exp = false;
    }

    let token_data: TokenData<TokenClaims> = if let Some(ref pem) = config.public_key_pem {
        let key = DecodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|e| AuthError::DecodeError(format!("invalid public key: {}", e)))?;
        decode(token, &key, &validation).map_err(map_jwt_error)?
    } else if let Some(ref secret) = config.secret {
        let key = DecodingKey::from_secret(secret.as_bytes());
        decode(token, &key, &validation).map_err(map_jwt_error)?
    } else {
        return Err(AuthError::NotConfigured);
    };

    let claims = token_data.claims;

    if claims.sub.is_empty() {
        return Err(AuthError::MissingClaim("sub".into()));
    }

    // Manual expiry check (in case validation was skipped)
    if !config.skip_expiry && claims.exp > 0 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        if now > claims.exp {
            return Err(AuthError::Expired);
        }
    }

    Ok(claims)
}

/// Map JWT library errors to our error type.
fn map_jwt_error(err: jsonwebtoken::errors::Error) -> AuthError {
    use jsonwebtoken::errors::ErrorKind;
    match err.kind() {
        ErrorKind::ExpiredSignature => AuthError::Expired,
        ErrorKind::InvalidSignature => AuthError::InvalidSignature,
        ErrorKind::InvalidIssuer => AuthError::InvalidIssuer,
        ErrorKind::InvalidAudience => AuthError::InvalidAudience,
        ErrorKind::InvalidToken | ErrorKind::Base64(_) => AuthError::InvalidFormat,
        _ => AuthError::DecodeError(err.to_string()),
    }
}

// =============================================================================
// IDENTITY RESOLUTION
// =============================================================================

/// Maps a caller-supplied token to an identity.
pub trait IdentityResolver: Send + Sync {
    /// Resolve `token` or fail.
    fn resolve(&self, token: &str) -> Result<Identity, AuthError>;
}

/// Resolver backed by [`validate_token`].
#[derive(Clone, Debug)]
pub struct JwtResolver {
    config: AuthConfig,
}

impl JwtResolver {
    /// Resolver using `config`.
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }
}

impl IdentityResolver for JwtResolver {
    fn resolve(&self, token: &str) -> Result<Identity, AuthError> {
        validate_token(token, &self.config).map(|claims| claims.identity())
    }
}

/// Connect-time policy: which credentials are accepted.
pub struct Authenticator {
    resolver: Box<dyn IdentityResolver>,
    dev_mode: bool,
    test_user_id: Option<String>,
}

impl Authenticator {
    /// JWT-backed authenticator built from `config`.
    pub fn new(config: AuthConfig) -> Self {
        let dev_mode = config.dev_mode;
        let test_user_id = config.test_user_id.clone();
        Self {
            resolver: Box::new(JwtResolver::new(config)),
            dev_mode,
            test_user_id,
        }
    }

    /// Authenticator with a custom resolver.
    pub fn with_resolver(resolver: Box<dyn IdentityResolver>, dev_mode: bool) -> Self {
        Self {
            resolver,
            dev_mode,
            test_user_id: None,
        }
    }

    /// Resolve the connecting identity from the `token` and `uid` parameters.
    ///
    /// A token is always verified. Outside dev mode a token is required.
    pub fn authenticate(&self, token: Option<&str>, uid: Option<&str>) -> Result<Identity, AuthError> {
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            return self.resolver.resolve(token).map_err(|e| {
                warn!("Token rejected: {}", e);
                e
            });
        }

        if !self.dev_mode {
            return Err(AuthError::MissingCredentials);
        }

        let identity = match uid.filter(|u| !u.is_empty()) {
            Some(uid) => Identity::new(uid),
            None => match &self.test_user_id {
                Some(id) => Identity::new(id.clone()),
                None => Identity::new(format!("anonymous-{}", Uuid::new_v4())),
            },
        };
        debug!("Dev mode identity {}", identity);
        Ok(identity)
    }
}

// =============================================================================
// TESTS
// =============================================================================
