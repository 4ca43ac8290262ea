//! Identity Tokens
//!
//! Optional JWT check on seekers. Tokens are issued elsewhere; this module
//! only validates them and binds the seeker's identity to the `sub` claim.

use std::collections::HashSet;

use chrono::Utc;
use jsonwebtoken::{decode, Algorithm, DecodingKey, TokenData, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::game::state::PlayerProfile;

/// Authentication configuration.
#[derive(Clone, Debug, Default)]
pub struct AuthConfig {
    /// Expected issuer claim ("iss"). If None, any issuer accepted.
    pub issuer: Option<String>,
    /// Expected audience claim ("aud"). If None, any audience accepted.
    pub audience: Option<String>,
    /// RS256 public key in PEM format.
    pub public_key_pem: Option<String>,
    /// HS256 secret.
    pub secret: Option<String>,
    /// Skip expiry validation (testing only).
    pub skip_expiry: bool,
}

impl AuthConfig {
    /// Read `AUTH_*` environment variables.
    pub fn from_env() -> Self {
        Self {
            issuer: std::env::var("AUTH_ISSUER").ok(),
            audience: std::env::var("AUTH_AUDIENCE").ok(),
            public_key_pem: std::env::var("AUTH_PUBLIC_KEY_PEM").ok(),
            secret: std::env::var("AUTH_SECRET").ok(),
            skip_expiry: std::env::var("AUTH_SKIP_EXPIRY")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        }
    }

    /// Whether a verification key is present.
    pub fn is_configured(&self) -> bool {
        self.public_key_pem.is_some() || self.secret.is_some()
    }
}

/// Claims read from a token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject, the account id at the issuer.
    pub sub: String,
    /// Expiry (Unix seconds).
    #[serde(default)]
    pub exp: i64,
    /// Issued at (Unix seconds).
    #[serde(default)]
    pub iat: i64,
    /// Issuer.
    #[serde(default)]
    pub iss: Option<String>,
    /// Audience.
    #[serde(default)]
    pub aud: Option<serde_json::Value>,
    /// Display name chosen at the issuer.
    #[serde(default)]
    pub preferred_username: Option<String>,
}

impl TokenClaims {
    /// Stable player id derived from the subject (32 hex digits).
    pub fn player_id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(b"gambit-player:");
        hasher.update(self.sub.as_bytes());
        hex::encode(&hasher.finalize()[..16])
    }
}

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No verification key configured.
    #[error("authentication not configured")]
    NotConfigured,
    /// A key is configured but the request carried no token.
    #[error("token required")]
    MissingToken,
    /// Token format is invalid.
    #[error("invalid token format")]
    InvalidFormat,
    /// Signature verification failed.
    #[error("invalid signature")]
    InvalidSignature,
    /// Token has expired.
    #[error("token expired")]
    Expired,
    /// Issuer mismatch.
    #[error("invalid issuer")]
    InvalidIssuer,
    /// Audience mismatch.
    #[error("invalid audience")]
    InvalidAudience,
    /// Required claim missing.
    #[error("missing required claim: {0}")]
    MissingClaim(String),
    /// Other decoding failure.
    #[error("decode error: {0}")]
    DecodeError(String),
}

/// Validate a JWT and extract its claims.
pub fn validate_token(token: &str, config: &AuthConfig) -> Result<TokenClaims, AuthError> {
    let (key, algorithm) = match (&config.public_key_pem, &config.secret) {
        (Some(pem), _) => (
            DecodingKey::from_rsa_pem(pem.as_bytes())
                .map_err(|e| AuthError::DecodeError(format!("invalid public key: {}", e)))?,
            Algorithm::RS256,
        ),
        (None, Some(secret)) => (DecodingKey::from_secret(secret.as_bytes()), Algorithm::HS256),
        (None, None) => return Err(AuthError::NotConfigured),
    };

    let mut validation = Validation::new(algorithm);
    validation.required_spec_claims = HashSet::new();
    if let Some(issuer) = &config.issuer {
        validation.set_issuer(&[issuer]);
    }
    match &config.audience {
        Some(audience) => validation.set_audience(&[audience]),
        None => validation.validate_aud = false,
    }
    if config.skip_expiry {
        validation.validate_exp = false;
    }

    let token_data: TokenData<TokenClaims> =
        decode(token, &key, &validation).map_err(map_jwt_error)?;
    let claims = token_data.claims;

    if claims.sub.trim().is_empty() {
        return Err(AuthError::MissingClaim("sub".into()));
    }
    if !config.skip_expiry && claims.exp > 0 && Utc::now().timestamp() > claims.exp {
        return Err(AuthError::Expired);
    }

    Ok(claims)
}

/// Bind a self-declared profile to a verified identity.
///
/// Without a configured key the profile is returned unchanged and any
/// token is ignored.
pub fn authenticate(
    mut profile: PlayerProfile,
    token: Option<&str>,
    config: &AuthConfig,
) -> Result<PlayerProfile, AuthError> {
    if !config.is_configured() {
        return Ok(profile);
    }
    let token = token
        .filter(|t| !t.trim().is_empty())
        .ok_or(AuthError::MissingToken)?;

    let claims = validate_token(token, config)?;
    profile.player_id = Some(claims.player_id());
    if let Some(name) = claims.preferred_username.filter(|n| !n.trim().is_empty()) {
        profile.username = name;
    }
    Ok(profile)
}

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

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "gambit-test-secret-0123456789abcdef";

    fn sign(claims: &TokenClaims, secret: &str) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn claims(sub: &str) -> TokenClaims {
        let now = Utc::now().timestamp();
        TokenClaims {
            sub: sub.into(),
            exp: now + 3600,
            iat: now,
            iss: Some("accounts".into()),
            aud: None,
            preferred_username: Some("verified-alice".into()),
        }
    }

    fn configured() -> AuthConfig {
        AuthConfig {
            secret: Some(SECRET.into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_token() {
        let token = sign(&claims("user-1"), SECRET);
        let parsed = validate_token(&token, &configured()).unwrap();
        assert_eq!(parsed.sub, "user-1");
    }

    #[test]
    fn test_expired_token_rejected() {
        let mut c = claims("user-1");
        c.exp = 1;
        let token = sign(&c, SECRET);
        assert!(matches!(validate_token(&token, &configured()), Err(AuthError::Expired)));

        let lenient = AuthConfig {
            skip_expiry: true,
            ..configured()
        };
        assert!(validate_token(&token, &lenient).is_ok());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = sign(&claims("user-1"), "some-other-secret-entirely-000000");
        assert!(matches!(
            validate_token(&token, &configured()),
            Err(AuthError::InvalidSignature)
        ));
    }

    #[test]
    fn test_issuer_mismatch_rejected() {
        let token = sign(&claims("user-1"), SECRET);
        let strict = AuthConfig {
            issuer: Some("elsewhere".into()),
            ..configured()
        };
        assert!(matches!(validate_token(&token, &strict), Err(AuthError::InvalidIssuer)));
    }

    #[test]
    fn test_player_id_is_stable_hex() {
        let a = claims("user-1").player_id();
        assert_eq!(a, claims("user-1").player_id());
        assert_ne!(a, claims("user-2").player_id());
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_authenticate_rebinds_identity() {
        let token = sign(&claims("user-1"), SECRET);
        let declared = PlayerProfile::new("spoofed", "alice", Some(1500));
        let bound = authenticate(declared, Some(&token), &configured()).unwrap();

        assert_eq!(bound.player_id, Some(claims("user-1").player_id()));
        assert_eq!(bound.username, "verified-alice");
        assert_eq!(bound.rating, Some(1500));
    }

    #[test]
    fn test_authenticate_without_key_keeps_profile() {
        let declared = PlayerProfile::new("42", "alice", None);
        let kept = authenticate(declared.clone(), Some("garbage"), &AuthConfig::default()).unwrap();
        assert_eq!(kept, declared);
    }

    #[test]
    fn test_authenticate_requires_token_when_configured() {
        let declared = PlayerProfile::new("42", "alice", None);
        assert!(matches!(
            authenticate(declared, None, &configured()),
            Err(AuthError::MissingToken)
        ));
    }
}
