//! Bearer token based authentication.
//!
//! Opaque tokens map to a principal name and backend roles. Tokens are usually
//! short-lived service credentials.
//!
//! # Configuration
//!
//! Set `WARDEN_TOKENS` with format:
//! ```text
//! token1:user1:role1,role2;token2:user2:role3
//! ```
//!
//! # Example
//!
//! ```text
//! WARDEN_TOKENS="session-abc123:alice:readers;svc-token:svc-backup:backup,readers"
//! ```

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use warden_core::IdentityError;
use warden_proto::Principal;

use super::{authorization_value, Authenticator};
use crate::channel::RequestChannel;

/// Default environment variable for tokens.
pub const DEFAULT_TOKENS_ENV: &str = "WARDEN_TOKENS";

/// Token entry with optional expiration.
#[derive(Clone)]
struct TokenEntry {
    principal: String,
    backend_roles: Vec<String>,
    expires_at: Option<Instant>,
}

impl TokenEntry {
    fn is_expired(&self) -> bool {
        self.expires_at.map(|exp| Instant::now() > exp).unwrap_or(false)
    }
}

/// Token authenticator over an in-process token table.
pub struct TokenAuthenticator {
    tokens: RwLock<HashMap<String, TokenEntry>>,
}

impl TokenAuthenticator {
    /// Create an empty authenticator.
    pub fn new() -> Self {
        Self {
            tokens: RwLock::new(HashMap::new()),
        }
    }

    /// Register a token without expiry.
    pub fn register_token(&self, token: impl Into<String>, principal: impl Into<String>, backend_roles: Vec<String>) {
        self.insert(token.into(), principal.into(), backend_roles, None);
    }

    /// Register a token that expires after `ttl`.
    pub fn register_token_with_ttl(
        &self,
        token: impl Into<String>,
        principal: impl Into<String>,
        backend_roles: Vec<String>,
        ttl: Duration,
    ) {
        self.insert(token.into(), principal.into(), backend_roles, Some(Instant::now() + ttl));
    }

    fn insert(&self, token: String, principal: String, backend_roles: Vec<String>, expires_at: Option<Instant>) {
        self.tokens.write().insert(
            token,
            TokenEntry {
                principal,
                backend_roles,
                expires_at,
            },
        );
    }

    /// Revoke a token.
    pub fn revoke_token(&self, token: &str) -> bool {
        self.tokens.write().remove(token).is_some()
    }

    /// Load tokens from an environment variable.
    ///
    /// Malformed entries are skipped with a warning. Tokens loaded this way
    /// never expire.
    pub fn from_env(env_var: &str) -> Self {
        match std::env::var(env_var) {
            Ok(list) => Self::from_list(&list),
            Err(_) => Self::new(),
        }
    }

    /// Load from [`DEFAULT_TOKENS_ENV`].
    pub fn from_default_env() -> Self {
        Self::from_env(DEFAULT_TOKENS_ENV)
    }

    /// Parse `token:user:role,role;...`.
    pub fn from_list(list: &str) -> Self {
        let auth = Self::new();

        for entry in list.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            let mut fields = entry.splitn(3, ':');
            let token = fields.next().unwrap_or_default().trim();
            let user = fields.next().unwrap_or_default().trim();
            let roles: Vec<String> = fields
                .next()
                .unwrap_or_default()
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();

            if token.is_empty() || user.is_empty() {
                tracing::warn!("skipping malformed token entry");
                continue;
            }
            auth.register_token(token, user, roles);
        }

        auth
    }

    /// Check if a token exists and has not expired.
    pub fn is_valid(&self, token: &str) -> bool {
        self.tokens
            .read()
            .get(token)
            .map(|e| !e.is_expired())
            .unwrap_or(false)
    }

    /// Number of registered tokens.
    pub fn token_count(&self) -> usize {
        self.tokens.read().len()
    }

    /// Remove expired tokens.
    pub fn cleanup_expired(&self) -> usize {
        let mut tokens = self.tokens.write();
        let before = tokens.len();
        tokens.retain(|_, entry| !entry.is_expired());
        before - tokens.len()
    }
}

impl Default for TokenAuthenticator {
    fn default() -> Self {
        Self::new()
    }
}

impl Authenticator for TokenAuthenticator {
    fn name(&self) -> &'static str {
        "token"
    }

    fn authenticate(&self, request: &dyn RequestChannel) -> Result<Principal, IdentityError> {
        let token = authorization_value(request, "Bearer").ok_or(IdentityError::NoCredentials)?;

        let tokens = self.tokens.read();
        let entry = tokens.get(token).ok_or(IdentityError::BadCredentials)?;
        if entry.is_expired() {
            tracing::debug!(principal = %entry.principal, "token expired");
            return Err(IdentityError::BadCredentials);
        }

        Ok(Principal::new(entry.principal.clone()).with_backend_roles(entry.backend_roles.iter().cloned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{RawRequestChannel, RequestFactory, RequestParts};

    fn bearer(token: &str) -> RawRequestChannel {
        RequestFactory::raw(
            RequestParts::new("GET", "/_search").with_header("Authorization", format!("Bearer {}", token)),
        )
    }

    #[test]
    fn test_register_and_authenticate() {
        let auth = TokenAuthenticator::new();
        auth.register_token("test-token", "alice", vec!["readers".to_string()]);

        let principal = auth.authenticate(&bearer("test-token")).unwrap();
        assert_eq!(principal.name(), "alice");
        assert!(principal.has_backend_role("readers"));
    }

    #[test]
    fn test_unknown_token() {
        let auth = TokenAuthenticator::new();
        assert_eq!(auth.authenticate(&bearer("nope")), Err(IdentityError::BadCredentials));
    }

    #[test]
    fn test_no_bearer_header() {
        let auth = TokenAuthenticator::new();
        let request = RequestFactory::raw(RequestParts::new("GET", "/"));
        assert_eq!(auth.authenticate(&request), Err(IdentityError::NoCredentials));
    }

    #[test]
    fn test_token_expiry() {
        let auth = TokenAuthenticator::new();
        auth.register_token_with_ttl("short-lived", "alice", vec![], Duration::from_millis(1));

        std::thread::sleep(Duration::from_millis(10));

        assert_eq!(
            auth.authenticate(&bearer("short-lived")),
            Err(IdentityError::BadCredentials)
        );
    }

    #[test]
    fn test_revoke_token() {
        let auth = TokenAuthenticator::new();
        auth.register_token("revocable", "alice", vec![]);
        assert!(auth.is_valid("revocable"));

        assert!(auth.revoke_token("revocable"));

        assert!(!auth.is_valid("revocable"));
        assert!(auth.authenticate(&bearer("revocable")).is_err());
    }

    #[test]
    fn test_cleanup_expired() {
        let auth = TokenAuthenticator::new();
        auth.register_token_with_ttl("expired1", "a", vec![], Duration::from_millis(1));
        auth.register_token_with_ttl("expired2", "b", vec![], Duration::from_millis(1));
        auth.register_token("persistent", "c", vec![]);

        std::thread::sleep(Duration::from_millis(10));

        assert_eq!(auth.cleanup_expired(), 2);
        assert_eq!(auth.token_count(), 1);
        assert!(auth.is_valid("persistent"));
    }

    #[test]
    fn test_from_list() {
        let auth = TokenAuthenticator::from_list("t1:alice:readers,writers; t2:svc: ;bad;:x:y");
        assert_eq!(auth.token_count(), 2);

        let principal = auth.authenticate(&bearer("t1")).unwrap();
        assert_eq!(principal.backend_roles(), ["readers".to_string(), "writers".to_string()]);
        assert!(auth.authenticate(&bearer("t2")).unwrap().backend_roles().is_empty());
    }
}
