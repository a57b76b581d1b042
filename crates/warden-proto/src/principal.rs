//! Authenticated caller identity.
//!
//! A [`Principal`] is built once per request by an authenticator and is then
//! read-only. It is also the main object carried between nodes through the
//! trusted object codec, so it derives the rkyv traits.

use rkyv::{Archive, Deserialize, Serialize};

/// A custom attribute attached to a principal (e.g. `attr.jwt.department`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Archive, Serialize, Deserialize)]
pub struct Attribute {
    /// Attribute key (unique within a principal).
    pub key: String,
    /// Attribute value.
    pub value: String,
}

/// The authenticated caller.
///
/// Backend roles are kept sorted and de-duplicated; attributes are kept sorted
/// by key with unique keys. Both invariants are re-established by
/// [`Principal::normalized`] after decoding a value received from a peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Archive, Serialize, Deserialize)]
pub struct Principal {
    name: String,
    backend_roles: Vec<String>,
    attributes: Vec<Attribute>,
    requested_tenant: Option<String>,
}

impl Principal {
    /// Create a principal with no backend roles or attributes.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            backend_roles: Vec::new(),
            attributes: Vec::new(),
            requested_tenant: None,
        }
    }

    /// Add a backend role.
    pub fn with_backend_role(mut self, role: impl Into<String>) -> Self {
        self.backend_roles.push(role.into());
        self.normalized()
    }

    /// Add several backend roles.
    pub fn with_backend_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.backend_roles.extend(roles.into_iter().map(Into::into));
        self.normalized()
    }

    /// Set a custom attribute. A later value for the same key replaces the earlier one.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        self.attributes.retain(|a| a.key != key);
        self.attributes.push(Attribute {
            key,
            value: value.into(),
        });
        self.normalized()
    }

    /// Set the tenant the caller asked for.
    pub fn with_requested_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.requested_tenant = Some(tenant.into());
        self
    }

    /// Re-establish the ordering and uniqueness invariants.
    ///
    /// For duplicate attribute keys the first occurrence after sorting wins.
    pub fn normalized(mut self) -> Self {
        self.backend_roles.sort();
        self.backend_roles.dedup();
        self.attributes.sort();
        self.attributes.dedup_by(|later, earlier| later.key == earlier.key);
        self
    }

    /// The identity name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backend roles, sorted.
    pub fn backend_roles(&self) -> &[String] {
        &self.backend_roles
    }

    /// Check for a backend role.
    pub fn has_backend_role(&self, role: &str) -> bool {
        self.backend_roles
            .binary_search_by(|r| r.as_str().cmp(role))
            .is_ok()
    }

    /// All attributes, sorted by key.
    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// Look up an attribute value.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .binary_search_by(|a| a.key.as_str().cmp(key))
            .ok()
            .map(|idx| self.attributes[idx].value.as_str())
    }

    /// Tenant the caller asked for, if any.
    pub fn requested_tenant(&self) -> Option<&str> {
        self.requested_tenant.as_deref()
    }
}

impl std::fmt::Display for Principal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Principal[name={}, backend_roles={:?}, requested_tenant={:?}]",
            self.name, self.backend_roles, self.requested_tenant
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_roles_are_unique_and_sorted() {
        let principal = Principal::new("reader")
            .with_backend_roles(["writers", "readers", "writers"])
            .with_backend_role("admins");

        assert_eq!(principal.backend_roles(), &["admins", "readers", "writers"]);
        assert!(principal.has_backend_role("readers"));
        assert!(!principal.has_backend_role("ops"));
    }

    #[test]
    fn test_attribute_keys_are_unique() {
        let principal = Principal::new("reader")
            .with_attribute("dept", "sales")
            .with_attribute("region", "eu")
            .with_attribute("dept", "finance");

        assert_eq!(principal.attributes().len(), 2);
        assert_eq!(principal.attribute("dept"), Some("finance"));
        assert_eq!(principal.attribute("region"), Some("eu"));
        assert_eq!(principal.attribute("missing"), None);
    }

    #[test]
    fn test_normalized_repairs_peer_input() {
        let principal = Principal {
            name: "peer".to_string(),
            backend_roles: vec!["b".into(), "a".into(), "b".into()],
            attributes: vec![
                Attribute { key: "k".into(), value: "2".into() },
                Attribute { key: "k".into(), value: "1".into() },
            ],
            requested_tenant: None,
        }
        .normalized();

        assert_eq!(principal.backend_roles(), &["a", "b"]);
        assert_eq!(principal.attributes().len(), 1);
        assert_eq!(principal.attribute("k"), Some("1"));
    }

    #[test]
    fn test_display_omits_attributes() {
        let principal = Principal::new("reader").with_attribute("secret", "value");
        let shown = principal.to_string();
        assert!(shown.contains("reader"));
        assert!(!shown.contains("value"));
    }
}
