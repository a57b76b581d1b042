//! Client certificate authentication.
//!
//! The transport verifies the certificate chain and hands over the subject
//! distinguished name (`CN=alice,OU=readers,O=Corp`). The principal name comes
//! from one attribute and backend roles from another.

use warden_core::IdentityError;
use warden_proto::Principal;

use super::Authenticator;
use crate::channel::RequestChannel;

/// Builds principals from verified certificate subjects.
#[derive(Debug, Clone)]
pub struct ClientCertAuthenticator {
    username_attribute: String,
    roles_attribute: Option<String>,
}

impl Default for ClientCertAuthenticator {
    fn default() -> Self {
        Self {
            username_attribute: "cn".to_string(),
            roles_attribute: Some("ou".to_string()),
        }
    }
}

impl ClientCertAuthenticator {
    /// Name from `CN`, roles from `OU`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subject attribute holding the principal name.
    pub fn with_username_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.username_attribute = attribute.into().to_ascii_lowercase();
        self
    }

    /// Subject attribute holding backend roles, or `None` for no roles.
    pub fn with_roles_attribute(mut self, attribute: Option<String>) -> Self {
        self.roles_attribute = attribute.map(|a| a.to_ascii_lowercase());
        self
    }
}

/// Split a distinguished name into lower-cased keys and values.
fn parse_subject(subject: &str) -> Vec<(String, String)> {
    subject
        .split(',')
        .filter_map(|rdn| {
            let (key, value) = rdn.split_once('=')?;
            let value = value.trim();
            (!value.is_empty()).then(|| (key.trim().to_ascii_lowercase(), value.to_string()))
        })
        .collect()
}

impl Authenticator for ClientCertAuthenticator {
    fn name(&self) -> &'static str {
        "clientcert"
    }

    fn authenticate(&self, request: &dyn RequestChannel) -> Result<Principal, IdentityError> {
        let subject = request
            .parts()
            .peer_subject
            .as_deref()
            .ok_or(IdentityError::NoCredentials)?;
        let rdns = parse_subject(subject);

        let name = rdns
            .iter()
            .find(|(k, _)| *k == self.username_attribute)
            .map(|(_, v)| v.clone())
            .ok_or_else(|| {
                tracing::debug!(subject, "certificate subject has no username attribute");
                IdentityError::BadCredentials
            })?;

        let roles = match &self.roles_attribute {
            Some(attribute) => rdns
                .iter()
                .filter(|(k, _)| k == attribute)
                .map(|(_, v)| v.clone())
                .collect(),
            None => Vec::new(),
        };

        Ok(Principal::new(name).with_backend_roles(roles))
    }
}
