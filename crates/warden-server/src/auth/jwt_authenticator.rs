//! JWT (JSON Web Token) based authentication.
//!
//! # Configuration
//!
//! Set `WARDEN_JWT_SECRET` with the HMAC secret key, or
//! `WARDEN_JWT_RSA_PUBLIC_KEY` / `WARDEN_JWT_EC_PUBLIC_KEY` for public key
//! verification.
//!
//! # JWT Claims
//!
//! - `sub`: principal name
//! - `roles`: backend roles
//! - `exp`: expiration timestamp (Unix seconds)
//!
//! Optional: `iat`, `iss`, `aud`, and `attributes`, which become principal
//! attributes under `attr.jwt.<name>`.
//!
//! # Example JWT Payload
//!
//! ```json
//! {
//!   "sub": "alice",
//!   "roles": ["readers"],
//!   "exp": 1735689600,
//!   "iss": "corp-sso",
//!   "attributes": {"dept": "sales"}
//! }
//! ```

use std::collections::BTreeMap;

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use warden_core::IdentityError;
use warden_proto::Principal;

use super::{authorization_value, Authenticator};
use crate::channel::RequestChannel;

/// JWT claims structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject (principal name).
    pub sub: String,

    /// Backend roles.
    #[serde(default)]
    pub roles: Vec<String>,

    /// Expiration time (Unix timestamp).
    pub exp: u64,

    /// Issued at time (Unix timestamp).
    #[serde(default)]
    pub iat: Option<u64>,

    /// Issuer.
    #[serde(default)]
    pub iss: Option<String>,

    /// Audience.
    #[serde(default)]
    pub aud: Option<String>,

    /// Custom attributes, copied onto the principal as `attr.jwt.<name>`.
    #[serde(default)]
    pub attributes: Option<BTreeMap<String, serde_json::Value>>,
}

impl JwtClaims {
    /// Principal described by these claims.
    pub fn to_principal(&self) -> Principal {
        let mut principal = Principal::new(self.sub.clone()).with_backend_roles(self.roles.iter().cloned());
        for (key, value) in self.attributes.iter().flatten() {
            let value = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            principal = principal.with_attribute(format!("attr.jwt.{}", key), value);
        }
        principal
    }
}

/// JWT authenticator configuration.
#[derive(Clone)]
pub struct JwtConfig {
    /// Algorithm to use for verification.
    pub algorithm: Algorithm,

    /// Whether to validate expiration.
    pub validate_exp: bool,

    /// Required issuer (if any).
    pub required_issuer: Option<String>,

    /// Required audience (if any).
    pub required_audience: Option<String>,

    /// Leeway in seconds for expiration check.
    pub leeway_secs: u64,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::HS256,
            validate_exp: true,
            required_issuer: None,
            required_audience: None,
            leeway_secs: 60,
        }
    }
}

/// Validates JWTs and builds principals from their claims.
pub struct JwtAuthenticator {
    decoding_key: DecodingKey,
    config: JwtConfig,
}

impl JwtAuthenticator {
    /// HMAC secret.
    pub fn with_secret(secret: &[u8]) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret),
            config: JwtConfig::default(),
        }
    }

    /// HMAC secret string.
    pub fn with_secret_str(secret: &str) -> Self {
        Self::with_secret(secret.as_bytes())
    }

    /// RSA public key (PEM format).
    pub fn with_rsa_pem(public_key_pem: &[u8]) -> Result<Self, String> {
        let key = DecodingKey::from_rsa_pem(public_key_pem)
            .map_err(|e| format!("invalid RSA public key: {}", e))?;

        Ok(Self {
            decoding_key: key,
            config: JwtConfig {
                algorithm: Algorithm::RS256,
                ..Default::default()
            },
        })
    }

    /// EC public key (PEM format).
    pub fn with_ec_pem(public_key_pem: &[u8]) -> Result<Self, String> {
        let key = DecodingKey::from_ec_pem(public_key_pem)
            .map_err(|e| format!("invalid EC public key: {}", e))?;

        Ok(Self {
            decoding_key: key,
            config: JwtConfig {
                algorithm: Algorithm::ES256,
                ..Default::default()
            },
        })
    }

    /// Load from environment variables.
    ///
    /// Checks in order:
    /// 1. `WARDEN_JWT_SECRET` - HMAC secret
    /// 2. `WARDEN_JWT_RSA_PUBLIC_KEY` - RSA public key (PEM)
    /// 3. `WARDEN_JWT_EC_PUBLIC_KEY` - EC public key (PEM)
    pub fn from_env() -> Result<Self, String> {
        if let Ok(secret) = std::env::var("WARDEN_JWT_SECRET") {
            return Ok(Self::with_secret_str(&secret));
        }

        if let Ok(rsa_key) = std::env::var("WARDEN_JWT_RSA_PUBLIC_KEY") {
            return Self::with_rsa_pem(rsa_key.as_bytes());
        }

        if let Ok(ec_key) = std::env::var("WARDEN_JWT_EC_PUBLIC_KEY") {
            return Self::with_ec_pem(ec_key.as_bytes());
        }

        Err("no JWT secret or public key configured (set WARDEN_JWT_SECRET)".to_string())
    }

    /// Set the required issuer.
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.config.required_issuer = Some(issuer.into());
        self
    }

    /// Set the required audience.
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.config.required_audience = Some(audience.into());
        self
    }

    /// Set the leeway for the expiration check.
    pub fn with_leeway(mut self, secs: u64) -> Self {
        self.config.leeway_secs = secs;
        self
    }

    /// Disable expiration validation.
    pub fn without_exp_validation(mut self) -> Self {
        self.config.validate_exp = false;
        self
    }

    /// Verify a token and extract its claims.
    pub fn verify_token(&self, token: &str) -> Result<JwtClaims, IdentityError> {
        let mut validation = Validation::new(self.config.algorithm);
        validation.leeway = self.config.leeway_secs;
        validation.validate_exp = self.config.validate_exp;

        if let Some(ref iss) = self.config.required_issuer {
            validation.set_issuer(&[iss]);
        }

        if let Some(ref aud) = self.config.required_audience {
            validation.set_audience(&[aud]);
        }

        let token_data = decode::<JwtClaims>(token, &self.decoding_key, &validation).map_err(|e| {
            tracing::debug!(error = %e, "JWT verification failed");
            IdentityError::BadCredentials
        })?;

        Ok(token_data.claims)
    }
}

impl Authenticator for JwtAuthenticator {
    fn name(&self) -> &'static str {
        "jwt"
    }

    fn authenticate(&self, request: &dyn RequestChannel) -> Result<Principal, IdentityError> {
        let token = authorization_value(request, "Bearer").ok_or(IdentityError::NoCredentials)?;
        let claims = self.verify_token(token)?;
        Ok(claims.to_principal())
    }
}
