//! Role registry.
//!
//! The registry holds an immutable [`SecuritySnapshot`] behind an
//! [`ArcSwap`]. Evaluations load the current `Arc` and keep using it even if a
//! reload installs a newer snapshot in the meantime. Installs are serialized
//! by a writer lock so two categories reloading at once cannot lose each
//! other's update.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use warden_proto::{ConfigType, Principal};

use super::error::{SecurityError, SecurityResult};
use super::role::{parse_internal_users, parse_role_mappings, parse_roles, InternalUser, Role, RoleMapping};

/// One immutable generation of security configuration.
#[derive(Debug, Clone, Default)]
pub struct SecuritySnapshot {
    roles: BTreeMap<String, Arc<Role>>,
    mappings: Vec<RoleMapping>,
    users: BTreeMap<String, InternalUser>,
    dynamic: Map<String, Value>,
    sequence_ids: BTreeMap<ConfigType, u64>,
}

impl SecuritySnapshot {
    /// Copy of this snapshot with one category replaced.
    ///
    /// Fails without side effects if `content` does not parse.
    pub fn with_category(&self, config_type: ConfigType, content: &str, sequence_id: u64) -> SecurityResult<Self> {
        let mut next = self.clone();
        match config_type {
            ConfigType::Roles => {
                next.roles = parse_roles(content)?
                    .into_iter()
                    .map(|(name, role)| (name, Arc::new(role)))
                    .collect();
            }
            ConfigType::RolesMapping => next.mappings = parse_role_mappings(content)?,
            ConfigType::InternalUsers => next.users = parse_internal_users(content)?,
            ConfigType::Config => next.dynamic = parse_dynamic(content)?,
        }
        next.sequence_ids.insert(config_type, sequence_id);
        Ok(next)
    }

    /// Installed sequence id of a category (0 when never loaded).
    pub fn sequence_id(&self, config_type: ConfigType) -> u64 {
        self.sequence_ids.get(&config_type).copied().unwrap_or(0)
    }

    /// Look up a role by name.
    pub fn role(&self, name: &str) -> Option<&Arc<Role>> {
        self.roles.get(name)
    }

    /// Number of roles.
    pub fn role_count(&self) -> usize {
        self.roles.len()
    }

    /// Look up an internal user.
    pub fn user(&self, name: &str) -> Option<&InternalUser> {
        self.users.get(name)
    }

    /// A dynamic config value by dotted path (`dynamic.multitenancy_enabled`).
    pub fn dynamic_value(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let first = parts.next()?;
        let mut current = self.dynamic.get(first)?;
        for part in parts {
            current = current.get(part)?;
        }
        Some(current)
    }

    /// The whole dynamic config object.
    pub fn dynamic(&self) -> &Map<String, Value> {
        &self.dynamic
    }

    /// Roles mapped to the principal, de-duplicated and sorted by name.
    ///
    /// Mappings naming roles that do not exist are ignored.
    pub fn resolve_roles(&self, principal: &Principal) -> Vec<Arc<Role>> {
        let names: BTreeSet<&str> = self
            .mappings
            .iter()
            .filter(|m| m.applies_to(principal))
            .map(|m| m.role())
            .collect();

        names
            .into_iter()
            .filter_map(|name| {
                let role = self.roles.get(name);
                if role.is_none() {
                    tracing::debug!(role = %name, "mapping references unknown role");
                }
                role.cloned()
            })
            .collect()
    }
}

fn parse_dynamic(content: &str) -> SecurityResult<Map<String, Value>> {
    if content.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(content) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(SecurityError::Storage(crate::error::Error::InvalidData(
            "config category must be a JSON object".to_string(),
        ))),
        Err(e) => Err(SecurityError::Storage(crate::error::Error::Deserialization(e.to_string()))),
    }
}

/// Lock-free read handle over the current snapshot.
#[derive(Debug)]
pub struct RoleRegistry {
    current: ArcSwap<SecuritySnapshot>,
    install_lock: Mutex<()>,
}

impl Default for RoleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RoleRegistry {
    /// Registry holding an empty snapshot.
    pub fn new() -> Self {
        Self::with_snapshot(SecuritySnapshot::default())
    }

    /// Registry starting from a given snapshot.
    pub fn with_snapshot(snapshot: SecuritySnapshot) -> Self {
        Self {
            current: ArcSwap::from_pointee(snapshot),
            install_lock: Mutex::new(()),
        }
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<SecuritySnapshot> {
        self.current.load_full()
    }

    /// Installed sequence id of a category.
    pub fn sequence_id(&self, config_type: ConfigType) -> u64 {
        self.current.load().sequence_id(config_type)
    }

    /// Replace one category, built from the snapshot current at install time.
    ///
    /// `accept` sees the installed sequence id under the writer lock and can
    /// veto the install.
    pub fn install_category<F, E>(
        &self,
        config_type: ConfigType,
        content: &str,
        sequence_id: u64,
        accept: F,
    ) -> Result<Arc<SecuritySnapshot>, E>
    where
        F: FnOnce(u64) -> Result<(), E>,
        E: From<SecurityError>,
    {
        let _guard = self.install_lock.lock();
        let base = self.current.load_full();
        accept(base.sequence_id(config_type))?;

        let next = Arc::new(base.with_category(config_type, content, sequence_id)?);
        self.current.store(Arc::clone(&next));
        tracing::info!(
            config_type = %config_type,
            previous = base.sequence_id(config_type),
            installed = sequence_id,
            roles = next.role_count(),
            "installed config snapshot"
        );
        Ok(next)
    }

    /// Replace one category unconditionally.
    pub fn install(&self, config_type: ConfigType, content: &str, sequence_id: u64) -> SecurityResult<Arc<SecuritySnapshot>> {
        self.install_category(config_type, content, sequence_id, |_| Ok::<(), SecurityError>(()))
    }
}
