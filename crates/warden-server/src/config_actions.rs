//! Protected dynamic config actions.
//!
//! Individual settings inside the `config` category are exposed under their
//! own routes. Each route requires a cluster permission, evaluated like any
//! other cluster action. Deleting a setting resets it to the registered
//! default.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::Mutex;
use warden_core::SecuritySnapshot;
use warden_proto::ConfigType;

use crate::convergence::{BroadcastOutcome, ConfigCoordinator};
use crate::error::Error;

/// One protected setting.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigAction {
    path: String,
    permission: String,
    route: String,
    default: Value,
}

impl ConfigAction {
    /// Describe a setting at dotted `path`, served under `route`.
    pub fn new(path: impl Into<String>, permission: impl Into<String>, route: impl Into<String>, default: Value) -> Self {
        Self {
            path: path.into(),
            permission: permission.into(),
            route: normalize_route(&route.into()),
            default,
        }
    }

    /// Dotted path inside the `config` category.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Cluster permission required to read or change the setting.
    pub fn permission(&self) -> &str {
        &self.permission
    }

    /// Route without leading or trailing slashes.
    pub fn route(&self) -> &str {
        &self.route
    }

    /// Value restored on delete, and reported while unset.
    pub fn default_value(&self) -> &Value {
        &self.default
    }
}

fn normalize_route(route: &str) -> String {
    route.trim_matches('/').to_string()
}

/// Routes to protected settings.
#[derive(Debug, Clone, Default)]
pub struct ConfigActionRegistry {
    by_route: BTreeMap<String, ConfigAction>,
}

impl ConfigActionRegistry {
    /// Registry without any actions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in settings.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(ConfigAction::new(
            "dynamic.multitenancy_enabled",
            "cluster:admin/warden/config/tenancy/multitenancy_enabled",
            "_warden/api/config/tenancy/multitenancy_enabled",
            Value::Bool(false),
        ));
        registry
    }

    /// Add an action; an action already on the same route is replaced.
    pub fn register(&mut self, action: ConfigAction) -> &mut Self {
        if let Some(previous) = self.by_route.insert(action.route.clone(), action) {
            tracing::warn!(route = %previous.route, path = %previous.path, "replaced config action");
        }
        self
    }

    /// Action served under `route`.
    pub fn lookup(&self, route: &str) -> Option<&ConfigAction> {
        self.by_route.get(normalize_route(route).as_str())
    }

    /// All registered actions.
    pub fn actions(&self) -> impl Iterator<Item = &ConfigAction> {
        self.by_route.values()
    }

    /// Number of actions.
    pub fn len(&self) -> usize {
        self.by_route.len()
    }

    /// Whether no actions are registered.
    pub fn is_empty(&self) -> bool {
        self.by_route.is_empty()
    }
}

/// Reads and writes protected settings through the coordinator.
///
/// Authorization happens before these calls, in the request handler.
pub struct ConfigActions {
    registry: ConfigActionRegistry,
    coordinator: Arc<ConfigCoordinator>,
    write_lock: Mutex<()>,
}

impl ConfigActions {
    /// Create over `registry`, writing through `coordinator`.
    pub fn new(registry: ConfigActionRegistry, coordinator: Arc<ConfigCoordinator>) -> Self {
        Self {
            registry,
            coordinator,
            write_lock: Mutex::new(()),
        }
    }

    /// The route registry.
    pub fn registry(&self) -> &ConfigActionRegistry {
        &self.registry
    }

    /// Current value as seen by `snapshot`, or the default when unset.
    pub fn read(&self, snapshot: &SecuritySnapshot, action: &ConfigAction) -> Value {
        snapshot
            .dynamic_value(&action.path)
            .cloned()
            .unwrap_or_else(|| action.default.clone())
    }

    /// Set the value and broadcast the new `config` category.
    pub async fn write(&self, action: &ConfigAction, value: Value) -> Result<BroadcastOutcome, Error> {
        let _guard = self.write_lock.lock().await;

        let entry = self.coordinator.store().load(ConfigType::Config)?;
        let mut root = if entry.content.trim().is_empty() {
            Map::new()
        } else {
            match serde_json::from_str::<Value>(&entry.content) {
                Ok(Value::Object(map)) => map,
                Ok(_) => return Err(Error::Config("config category is not a JSON object".to_string())),
                Err(e) => return Err(Error::Config(format!("config category does not parse: {}", e))),
            }
        };
        set_path(&mut root, &action.path, value);

        let content = Value::Object(root).to_string();
        tracing::info!(path = %action.path, "updating protected setting");
        self.coordinator.update(ConfigType::Config, &content).await
    }

    /// Reset to the registered default.
    pub async fn reset(&self, action: &ConfigAction) -> Result<BroadcastOutcome, Error> {
        self.write(action, action.default.clone()).await
    }
}

/// Set a dotted path, creating objects along the way.
fn set_path(root: &mut Map<String, Value>, path: &str, value: Value) {
    let mut parts: Vec<&str> = path.split('.').collect();
    let Some(last) = parts.pop() else {
        return;
    };

    let mut current = root;
    for part in parts {
        let slot = current
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        let Value::Object(map) = slot else {
            return;
        };
        current = map;
    }
    current.insert(last.to_string(), value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convergence::LocalNodeClient;
    use serde_json::json;
    use warden_core::{MemoryConfigStore, NodeConfigApplier, RoleRegistry};

    fn setup() -> (Arc<NodeConfigApplier>, ConfigActions) {
        let store = Arc::new(MemoryConfigStore::new());
        let applier = Arc::new(NodeConfigApplier::new("n1", store.clone(), Arc::new(RoleRegistry::new())));
        let coordinator = Arc::new(ConfigCoordinator::new(
            store,
            vec![Arc::new(LocalNodeClient::new(applier.clone()))],
        ));
        (applier, ConfigActions::new(ConfigActionRegistry::with_builtin(), coordinator))
    }

    #[test]
    fn test_lookup_ignores_slashes() {
        let registry = ConfigActionRegistry::with_builtin();
        let action = registry
            .lookup("/_warden/api/config/tenancy/multitenancy_enabled/")
            .unwrap();
        assert_eq!(action.path(), "dynamic.multitenancy_enabled");
        assert!(registry.lookup("_warden/api/config/other").is_none());
    }

    #[test]
    fn test_set_path_creates_objects() {
        let mut root = Map::new();
        root.insert("dynamic".into(), json!("scalar"));
        set_path(&mut root, "dynamic.a.b", json!(1));
        assert_eq!(Value::Object(root), json!({"dynamic": {"a": {"b": 1}}}));
    }

    #[tokio::test]
    async fn test_write_read_and_reset() {
        let (applier, actions) = setup();
        let action = actions
            .registry()
            .lookup("_warden/api/config/tenancy/multitenancy_enabled")
            .unwrap()
            .clone();

        let snapshot = applier.registry().snapshot();
        assert_eq!(actions.read(&snapshot, &action), json!(false));

        assert!(actions.write(&action, json!(true)).await.unwrap().is_converged());
        let snapshot = applier.registry().snapshot();
        assert_eq!(actions.read(&snapshot, &action), json!(true));

        assert!(actions.reset(&action).await.unwrap().is_converged());
        let snapshot = applier.registry().snapshot();
        assert_eq!(snapshot.dynamic_value("dynamic.multitenancy_enabled"), Some(&json!(false)));
        assert_eq!(snapshot.sequence_id(ConfigType::Config), 2);
    }

    #[tokio::test]
    async fn test_write_keeps_other_settings() {
        let (applier, actions) = setup();
        actions
            .coordinator
            .update(ConfigType::Config, r#"{"dynamic": {"kibana": {"index": ".kibana"}}}"#)
            .await
            .unwrap();

        let action = ConfigAction::new("dynamic.do_not_fail_on_forbidden", "cluster:x", "x", json!(false));
        actions.write(&action, json!(true)).await.unwrap();

        let snapshot = applier.registry().snapshot();
        assert_eq!(snapshot.dynamic_value("dynamic.kibana.index"), Some(&json!(".kibana")));
        assert_eq!(snapshot.dynamic_value("dynamic.do_not_fail_on_forbidden"), Some(&json!(true)));
    }
}
