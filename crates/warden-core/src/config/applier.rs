//! Node-side config reload.
//!
//! A reload of one category installs the freshly loaded content only if its
//! sequence id is at least the requested minimum and greater than the one the
//! node already holds. A node therefore never regresses to older rules, and a
//! retried broadcast is a no-op on nodes that already converged.

use std::sync::Arc;

use warden_proto::{ConfigType, ConfigUpdateRequest, ConfigUpdateResponse, ReloadStatus};

use super::store::ConfigStore;
use crate::security::{ConfigError, RoleRegistry, SecurityError};

/// Applies reload requests to one node's registry.
pub struct NodeConfigApplier {
    node_id: String,
    store: Arc<dyn ConfigStore>,
    registry: Arc<RoleRegistry>,
}

impl NodeConfigApplier {
    /// Create an applier for `node_id`.
    pub fn new(node_id: impl Into<String>, store: Arc<dyn ConfigStore>, registry: Arc<RoleRegistry>) -> Self {
        Self {
            node_id: node_id.into(),
            store,
            registry,
        }
    }

    /// Node identifier.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// The registry this applier installs into.
    pub fn registry(&self) -> &Arc<RoleRegistry> {
        &self.registry
    }

    /// Load every category without a minimum; used at startup.
    pub fn load_all(&self) -> ConfigUpdateResponse {
        self.reload(&ConfigUpdateRequest::new(ConfigType::ALL))
    }

    /// Handle a reload broadcast.
    pub fn reload(&self, request: &ConfigUpdateRequest) -> ConfigUpdateResponse {
        let statuses = request
            .entries()
            .map(|(config_type, minimum)| (config_type, self.reload_category(config_type, minimum)))
            .collect();
        ConfigUpdateResponse {
            node_id: self.node_id.clone(),
            statuses,
        }
    }

    /// Reload one category and report the outcome.
    pub fn reload_category(&self, config_type: ConfigType, minimum: Option<u64>) -> ReloadStatus {
        match self.try_install(config_type, minimum) {
            Ok((previous, installed)) => ReloadStatus::Installed { previous, installed },
            Err(ConfigError::StaleSequence {
                installed,
                loaded,
                minimum,
                ..
            }) => {
                if loaded == installed && minimum.map_or(true, |m| loaded >= m) {
                    ReloadStatus::AlreadyCurrent { installed }
                } else {
                    tracing::warn!(
                        node = %self.node_id,
                        config_type = %config_type,
                        installed,
                        loaded,
                        minimum = ?minimum,
                        "config still stale"
                    );
                    ReloadStatus::StillStale {
                        installed,
                        loaded,
                        minimum,
                    }
                }
            }
            Err(ConfigError::LoadError { reason, .. }) => {
                tracing::error!(
                    node = %self.node_id,
                    config_type = %config_type,
                    error = %reason,
                    "config reload failed"
                );
                ReloadStatus::Failed { reason }
            }
        }
    }

    /// Load and install one category.
    ///
    /// Returns the previous and new sequence ids, or `StaleSequence` when the
    /// loaded content does not qualify.
    pub fn try_install(&self, config_type: ConfigType, minimum: Option<u64>) -> Result<(u64, u64), ConfigError> {
        let entry = self.store.load(config_type).map_err(|e| ConfigError::LoadError {
            config_type,
            reason: e.to_string(),
        })?;
        let loaded = entry.sequence_id;

        let stale = |installed: u64| ConfigError::StaleSequence {
            config_type,
            installed,
            loaded,
            minimum,
        };

        if minimum.is_some_and(|m| loaded < m) {
            return Err(stale(self.registry.sequence_id(config_type)));
        }

        let mut previous = 0;
        let result = self.registry.install_category(config_type, &entry.content, loaded, |installed| {
            previous = installed;
            if loaded > installed {
                Ok(())
            } else {
                Err(InstallError::Config(stale(installed)))
            }
        });

        match result {
            Ok(_) => Ok((previous, loaded)),
            Err(InstallError::Config(e)) => Err(e),
            Err(InstallError::Security(e)) => Err(ConfigError::LoadError {
                config_type,
                reason: e.to_string(),
            }),
        }
    }
}

/// Install failures before they are folded into [`ConfigError`].
enum InstallError {
    Config(ConfigError),
    Security(SecurityError),
}

impl From<SecurityError> for InstallError {
    fn from(err: SecurityError) -> Self {
        InstallError::Security(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::store::MemoryConfigStore;

    const ROLES_V3: &str = r#"{"v3": {}}"#;
    const ROLES_V5: &str = r#"{"v5": {}}"#;
    const ROLES_V7: &str = r#"{"v7": {}}"#;

    fn node_at_5() -> (Arc<MemoryConfigStore>, NodeConfigApplier) {
        let store = Arc::new(MemoryConfigStore::new());
        let registry = Arc::new(RoleRegistry::new());
        store.put(ConfigType::Roles, ROLES_V5, 5);
        let applier = NodeConfigApplier::new("node-1", store.clone(), registry);
        assert!(applier.reload_category(ConfigType::Roles, None).is_converged());
        (store, applier)
    }

    #[test]
    fn test_older_content_never_installed() {
        let (store, applier) = node_at_5();
        store.put(ConfigType::Roles, ROLES_V3, 3);

        let status = applier.reload_category(ConfigType::Roles, Some(3));
        assert_eq!(
            status,
            ReloadStatus::StillStale {
                installed: 5,
                loaded: 3,
                minimum: Some(3)
            }
        );
        assert_eq!(applier.registry().sequence_id(ConfigType::Roles), 5);
        assert!(applier.registry().snapshot().role("v5").is_some());
    }

    #[test]
    fn test_newer_content_installed() {
        let (store, applier) = node_at_5();
        store.put(ConfigType::Roles, ROLES_V7, 7);

        let status = applier.reload_category(ConfigType::Roles, Some(7));
        assert_eq!(status, ReloadStatus::Installed { previous: 5, installed: 7 });

        let snapshot = applier.registry().snapshot();
        assert_eq!(snapshot.sequence_id(ConfigType::Roles), 7);
        assert!(snapshot.role("v7").is_some());
        assert!(snapshot.role("v5").is_none());
    }

    #[test]
    fn test_store_behind_minimum_is_still_stale() {
        let (_store, applier) = node_at_5();
        let status = applier.reload_category(ConfigType::Roles, Some(7));
        assert_eq!(
            status,
            ReloadStatus::StillStale {
                installed: 5,
                loaded: 5,
                minimum: Some(7)
            }
        );
    }

    #[test]
    fn test_retry_is_already_current() {
        let (store, applier) = node_at_5();
        store.put(ConfigType::Roles, ROLES_V7, 7);
        assert!(applier.reload_category(ConfigType::Roles, Some(7)).is_converged());
        assert_eq!(
            applier.reload_category(ConfigType::Roles, Some(7)),
            ReloadStatus::AlreadyCurrent { installed: 7 }
        );
        assert_eq!(
            applier.reload_category(ConfigType::Roles, None),
            ReloadStatus::AlreadyCurrent { installed: 7 }
        );
    }

    #[test]
    fn test_unparseable_content_fails_without_install() {
        let (store, applier) = node_at_5();
        store.put(ConfigType::Roles, "{broken", 9);
        assert!(matches!(
            applier.reload_category(ConfigType::Roles, Some(9)),
            ReloadStatus::Failed { .. }
        ));
        assert_eq!(applier.registry().sequence_id(ConfigType::Roles), 5);
    }

    #[test]
    fn test_reload_request_reports_each_category() {
        let (store, applier) = node_at_5();
        store.store(ConfigType::RolesMapping, r#"{"v5": {"users": ["u"]}}"#).unwrap();

        let response = applier.reload(&ConfigUpdateRequest::with_minimums([
            (ConfigType::Roles, 5),
            (ConfigType::RolesMapping, 1),
        ]));
        assert_eq!(response.node_id, "node-1");
        assert!(response.is_converged());
        assert_eq!(
            response.statuses[1].1,
            ReloadStatus::Installed { previous: 0, installed: 1 }
        );
    }

    #[test]
    fn test_load_all_on_empty_store() {
        let store = Arc::new(MemoryConfigStore::new());
        let applier = NodeConfigApplier::new("n", store, Arc::new(RoleRegistry::new()));
        let response = applier.load_all();
        assert_eq!(response.statuses.len(), 4);
        assert!(response.is_converged());
    }
}
