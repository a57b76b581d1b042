//! HTTP basic authentication against internal users.
//!
//! Users come from the `internalusers` config category of the current
//! snapshot. Password checking is delegated to a [`PasswordVerifier`] so the
//! hashing scheme stays outside the gateway.

use std::sync::Arc;

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier as _, SaltString};
use argon2::{Argon2, Params};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;

use warden_core::{IdentityError, RoleRegistry};
use warden_proto::Principal;

use super::{authorization_value, Authenticator};
use crate::channel::RequestChannel;

/// Checks a password against a stored hash.
pub trait PasswordVerifier: Send + Sync {
    /// Whether `password` matches `hash`.
    ///
    /// Fails with [`IdentityError::BackendUnavailable`] if the verifier cannot
    /// reach its backend.
    fn verify(&self, password: &str, hash: &str) -> Result<bool, IdentityError>;
}

/// Verifier for argon2 PHC strings (`$argon2id$v=19$...`).
#[derive(Debug, Clone, Default)]
pub struct Argon2PasswordVerifier;

impl Argon2PasswordVerifier {
    /// Hash a password into the stored form with default cost parameters.
    pub fn hash(password: &str) -> Result<String, argon2::password_hash::Error> {
        Self::hash_with_params(password, Params::default())
    }

    /// Hash with explicit cost parameters. Verification reads them back from
    /// the PHC string.
    pub fn hash_with_params(password: &str, params: Params) -> Result<String, argon2::password_hash::Error> {
        let mut salt_bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut salt_bytes);
        let salt = SaltString::encode_b64(&salt_bytes)?;
        let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);
        Ok(argon2.hash_password(password.as_bytes(), &salt)?.to_string())
    }
}

impl PasswordVerifier for Argon2PasswordVerifier {
    fn verify(&self, password: &str, hash: &str) -> Result<bool, IdentityError> {
        let parsed = match PasswordHash::new(hash) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(error = %e, "unsupported password hash format");
                return Ok(false);
            }
        };
        Ok(Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok())
    }
}

/// Basic authenticator over the registry's internal users.
pub struct BasicAuthenticator {
    registry: Arc<RoleRegistry>,
    verifier: Arc<dyn PasswordVerifier>,
}

impl BasicAuthenticator {
    /// Create an authenticator.
    pub fn new(registry: Arc<RoleRegistry>, verifier: Arc<dyn PasswordVerifier>) -> Self {
        Self { registry, verifier }
    }

    fn credentials(request: &dyn RequestChannel) -> Result<(String, String), IdentityError> {
        let encoded = authorization_value(request, "Basic").ok_or(IdentityError::NoCredentials)?;
        let decoded = BASE64
            .decode(encoded)
            .map_err(|_| IdentityError::BadCredentials)?;
        let text = String::from_utf8(decoded).map_err(|_| IdentityError::BadCredentials)?;
        let (user, password) = text.split_once(':').ok_or(IdentityError::BadCredentials)?;
        if user.is_empty() {
            return Err(IdentityError::BadCredentials);
        }
        Ok((user.to_string(), password.to_string()))
    }
}

impl Authenticator for BasicAuthenticator {
    fn name(&self) -> &'static str {
        "basic"
    }

    fn authenticate(&self, request: &dyn RequestChannel) -> Result<Principal, IdentityError> {
        let (user, password) = Self::credentials(request)?;
        let snapshot = self.registry.snapshot();
        let Some(internal) = snapshot.user(&user) else {
            return Err(IdentityError::BadCredentials);
        };

        if !self.verifier.verify(&password, &internal.hash)? {
            return Err(IdentityError::BadCredentials);
        }
        Ok(internal.to_principal(&user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{RequestFactory, RequestParts};
    use warden_proto::ConfigType;

    fn cheap_hash(password: &str) -> String {
        let params = Params::new(Params::MIN_M_COST, 1, 1, None).unwrap();
        Argon2PasswordVerifier::hash_with_params(password, params).unwrap()
    }

    fn registry() -> Arc<RoleRegistry> {
        let registry = Arc::new(RoleRegistry::new());
        let users = serde_json::json!({
            "alice": {
                "hash": cheap_hash("secret"),
                "backend_roles": ["readers"],
                "attributes": {"dept": "sales"}
            }
        });
        registry
            .install(ConfigType::InternalUsers, &users.to_string(), 1)
            .unwrap();
        registry
    }

    fn basic(user: &str, password: &str) -> crate::channel::RawRequestChannel {
        let value = format!("Basic {}", BASE64.encode(format!("{}:{}", user, password)));
        RequestFactory::raw(RequestParts::new("GET", "/").with_header("Authorization", value))
    }

    fn authenticator() -> BasicAuthenticator {
        BasicAuthenticator::new(registry(), Arc::new(Argon2PasswordVerifier))
    }

    #[test]
    fn test_valid_credentials() {
        let principal = authenticator().authenticate(&basic("alice", "secret")).unwrap();
        assert_eq!(principal.name(), "alice");
        assert!(principal.has_backend_role("readers"));
        assert_eq!(principal.attribute("attr.internal.dept"), Some("sales"));
    }

    #[test]
    fn test_wrong_password_and_unknown_user_look_the_same() {
        let auth = authenticator();
        assert_eq!(
            auth.authenticate(&basic("alice", "wrong")),
            Err(IdentityError::BadCredentials)
        );
        assert_eq!(
            auth.authenticate(&basic("mallory", "secret")),
            Err(IdentityError::BadCredentials)
        );
    }

    #[test]
    fn test_no_basic_header() {
        let request = RequestFactory::raw(
            RequestParts::new("GET", "/").with_header("Authorization", "Bearer abc"),
        );
        assert_eq!(authenticator().authenticate(&request), Err(IdentityError::NoCredentials));
    }

    #[test]
    fn test_garbage_header() {
        let request = RequestFactory::raw(
            RequestParts::new("GET", "/").with_header("Authorization", "Basic %%%"),
        );
        assert_eq!(authenticator().authenticate(&request), Err(IdentityError::BadCredentials));
    }

    #[test]
    fn test_argon2_hashes_are_salted() {
        let a = cheap_hash("secret");
        let b = cheap_hash("secret");
        assert!(a.starts_with("$argon2id$"));
        assert_ne!(a, b);

        let verifier = Argon2PasswordVerifier;
        assert_eq!(verifier.verify("secret", &a), Ok(true));
        assert_eq!(verifier.verify("secret", &b), Ok(true));
        assert_eq!(verifier.verify("wrong", &a), Ok(false));
    }

    #[test]
    fn test_unparseable_hash_never_matches() {
        let verifier = Argon2PasswordVerifier;
        let digest = "sha256:2bb80d537b1da3e38bd30361aa855686bde0eacd7162fef6a25fe97bf527a25b";
        assert_eq!(verifier.verify("secret", digest), Ok(false));
        assert_eq!(verifier.verify("secret", ""), Ok(false));
    }

    #[test]
    fn test_verifier_backend_unavailable() {
        struct Down;
        impl PasswordVerifier for Down {
            fn verify(&self, _: &str, _: &str) -> Result<bool, IdentityError> {
                Err(IdentityError::BackendUnavailable("hash service".into()))
            }
        }
        let auth = BasicAuthenticator::new(registry(), Arc::new(Down));
        assert!(matches!(
            auth.authenticate(&basic("alice", "secret")),
            Err(IdentityError::BackendUnavailable(_))
        ));
    }
}
