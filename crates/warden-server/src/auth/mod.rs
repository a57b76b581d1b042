//! Authentication for the Warden gateway.
//!
//! Every authenticator turns request credentials into a [`Principal`] or fails
//! with an [`IdentityError`]. The [`AuthenticatorChain`] tries them in order.
//!
//! # Supported Authentication Methods
//!
//! - **Basic**: HTTP basic auth against the `internalusers` config category
//! - **Token**: Bearer tokens via the `WARDEN_TOKENS` env var
//! - **JWT**: JSON Web Tokens with signature verification (`WARDEN_JWT_SECRET`)
//! - **Client certificate**: Subject of a certificate verified by the transport
//! - **Propagated principal**: Principal forwarded by a preceding node in the
//!   `x-warden-principal` header
//!
//! # Environment Variable Formats
//!
//! ```text
//! WARDEN_TOKENS="token1:alice:readers,writers;token2:svc-backup:backup"
//! WARDEN_JWT_SECRET="your-secret-key"
//! ```

mod basic_authenticator;
mod client_cert_authenticator;
mod jwt_authenticator;
mod propagated_authenticator;
mod token_authenticator;

pub use basic_authenticator::{Argon2PasswordVerifier, BasicAuthenticator, PasswordVerifier};
pub use client_cert_authenticator::ClientCertAuthenticator;
pub use jwt_authenticator::{JwtAuthenticator, JwtClaims};
pub use propagated_authenticator::PropagatedPrincipalAuthenticator;
pub use token_authenticator::TokenAuthenticator;

use warden_core::IdentityError;
use warden_proto::Principal;

use crate::channel::RequestChannel;

/// Name given to unauthenticated callers when anonymous access is enabled.
pub const ANONYMOUS_USER: &str = "anonymous";

/// Backend role of anonymous callers.
pub const ANONYMOUS_BACKEND_ROLE: &str = "anonymous_backendrole";

/// Produce a principal from a request, or fail.
pub trait Authenticator: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Authenticate the request.
    ///
    /// Returns [`IdentityError::NoCredentials`] when the request carries
    /// nothing this authenticator understands, so the chain moves on.
    fn authenticate(&self, request: &dyn RequestChannel) -> Result<Principal, IdentityError>;
}

/// Authenticators tried in order.
pub struct AuthenticatorChain {
    authenticators: Vec<Box<dyn Authenticator>>,
    anonymous: bool,
}

impl Default for AuthenticatorChain {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthenticatorChain {
    /// Empty chain without anonymous access.
    pub fn new() -> Self {
        Self {
            authenticators: Vec::new(),
            anonymous: false,
        }
    }

    /// Append an authenticator.
    pub fn with(mut self, authenticator: impl Authenticator + 'static) -> Self {
        self.authenticators.push(Box::new(authenticator));
        self
    }

    /// Allow requests without credentials as the anonymous principal.
    pub fn with_anonymous(mut self, enabled: bool) -> Self {
        self.anonymous = enabled;
        self
    }

    /// Number of authenticators.
    pub fn len(&self) -> usize {
        self.authenticators.len()
    }

    /// Whether the chain has no authenticators.
    pub fn is_empty(&self) -> bool {
        self.authenticators.is_empty()
    }

    /// Run the chain.
    ///
    /// The first success wins. Otherwise an unavailable backend is reported
    /// over bad credentials, and bad credentials over none.
    pub fn authenticate(&self, request: &dyn RequestChannel) -> Result<Principal, IdentityError> {
        let mut failure = IdentityError::NoCredentials;

        for authenticator in &self.authenticators {
            match authenticator.authenticate(request) {
                Ok(principal) => {
                    tracing::debug!(
                        authenticator = authenticator.name(),
                        principal = %principal.name(),
                        "authenticated"
                    );
                    return Ok(principal);
                }
                Err(IdentityError::NoCredentials) => {}
                Err(err) => {
                    tracing::debug!(
                        authenticator = authenticator.name(),
                        error = %err,
                        "authentication failed"
                    );
                    if !matches!(failure, IdentityError::BackendUnavailable(_)) {
                        failure = err;
                    }
                }
            }
        }

        if self.anonymous && failure == IdentityError::NoCredentials {
            return Ok(Principal::new(ANONYMOUS_USER).with_backend_role(ANONYMOUS_BACKEND_ROLE));
        }
        Err(failure)
    }
}

/// Value of the `Authorization` header after `scheme`, matched case-insensitively.
pub(crate) fn authorization_value<'a>(request: &'a dyn RequestChannel, scheme: &str) -> Option<&'a str> {
    let header = request.header("authorization")?.trim();
    let (given, rest) = header.split_once(' ')?;
    if given.eq_ignore_ascii_case(scheme) {
        Some(rest.trim())
    } else {
        None
    }
}
