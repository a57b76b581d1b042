//! Node wiring.
//!
//! A [`Gateway`] owns one node's registry, config applier, and security
//! filter, and routes requests through either front end:
//!
//! - with early authentication, the connection handler authenticates on a raw
//!   channel first; failures are flushed and the connection closed
//! - everything else goes through a dispatch channel and the request handler
//!
//! Only connections whose certificate subject matches a configured node
//! pattern count as node-to-node. Forwarded principals on any other
//! connection are dropped before authentication.

use std::sync::Arc;

use warden_core::security::Pattern;
use warden_core::{ConfigStore, NodeConfigApplier, PrivilegeEvaluator, RoleRegistry, SledConfigStore};
use warden_proto::{Codec, ConfigUpdateResponse, PRINCIPAL_HEADER};

use crate::auth::{
    Argon2PasswordVerifier, AuthenticatorChain, BasicAuthenticator, ClientCertAuthenticator, JwtAuthenticator,
    PasswordVerifier, PropagatedPrincipalAuthenticator, TokenAuthenticator,
};
use crate::channel::{ConnectionPolicy, PendingResponse, RequestChannel, RequestFactory, RequestParts};
use crate::config::ServerConfig;
use crate::convergence::{ConfigCoordinator, LocalNodeClient, NodeClient};
use crate::error::Error;
use crate::filter::{AuthenticationVerifier, SecurityFilter};
use crate::handler::RequestHandler;

/// One Warden node.
pub struct Gateway {
    config: ServerConfig,
    store: Arc<dyn ConfigStore>,
    applier: Arc<NodeConfigApplier>,
    filter: Arc<SecurityFilter>,
    verifier: Option<AuthenticationVerifier>,
    codec: Codec,
    node_subjects: Vec<Pattern>,
}

impl Gateway {
    /// Open the sled config store under the configured data path.
    pub fn open(config: ServerConfig) -> Result<Self, Error> {
        let store = SledConfigStore::open_path(config.data_path.join("config"))?;
        Self::with_store(config, Arc::new(store), Arc::new(Argon2PasswordVerifier))
    }

    /// Build a node over `store` and load every config category.
    pub fn with_store(
        config: ServerConfig,
        store: Arc<dyn ConfigStore>,
        passwords: Arc<dyn PasswordVerifier>,
    ) -> Result<Self, Error> {
        config.validate()?;
        let node_subjects = config
            .node_subjects
            .iter()
            .map(|subject| Pattern::parse(subject))
            .collect::<Result<Vec<_>, _>>()?;

        let registry = Arc::new(RoleRegistry::new());
        let applier = Arc::new(NodeConfigApplier::new(
            config.node_id.clone(),
            Arc::clone(&store),
            Arc::clone(&registry),
        ));
        report_initial_load(&applier.load_all());

        let codec = Codec::new(config.codec_mode);
        let authenticators = Self::authenticators(&config, &registry, passwords, codec);
        tracing::info!(authenticators = authenticators.len(), "authentication chain ready");

        let evaluator = PrivilegeEvaluator::new().with_admin_principals(config.admin_principals.iter().cloned());
        let filter = Arc::new(SecurityFilter::new(authenticators, registry, evaluator));
        let verifier = config
            .early_authentication
            .then(|| AuthenticationVerifier::new(Arc::clone(&filter)));

        Ok(Self {
            config,
            store,
            applier,
            filter,
            verifier,
            codec,
            node_subjects,
        })
    }

    /// The authenticator chain for `config`.
    ///
    /// Propagated principals come first, then certificates, internal users,
    /// tokens from `WARDEN_TOKENS`, and JWTs when a key is configured.
    pub fn authenticators(
        config: &ServerConfig,
        registry: &Arc<RoleRegistry>,
        passwords: Arc<dyn PasswordVerifier>,
        codec: Codec,
    ) -> AuthenticatorChain {
        let mut chain = AuthenticatorChain::new()
            .with(PropagatedPrincipalAuthenticator::new(codec))
            .with(ClientCertAuthenticator::new())
            .with(BasicAuthenticator::new(Arc::clone(registry), passwords))
            .with(TokenAuthenticator::from_default_env());

        match JwtAuthenticator::from_env() {
            Ok(jwt) => chain = chain.with(jwt),
            Err(reason) => tracing::debug!(reason = %reason, "JWT authentication disabled"),
        }
        chain.with_anonymous(config.anonymous_access)
    }

    /// Node configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The role registry.
    pub fn registry(&self) -> &Arc<RoleRegistry> {
        self.filter.registry()
    }

    /// The config applier.
    pub fn applier(&self) -> &Arc<NodeConfigApplier> {
        &self.applier
    }

    /// The config store.
    pub fn store(&self) -> &Arc<dyn ConfigStore> {
        &self.store
    }

    /// The security filter.
    pub fn filter(&self) -> &Arc<SecurityFilter> {
        &self.filter
    }

    /// Codec for principals sent to other nodes.
    pub fn codec(&self) -> Codec {
        self.codec
    }

    /// Client delivering reloads to this node.
    pub fn local_client(&self) -> LocalNodeClient {
        LocalNodeClient::new(Arc::clone(&self.applier))
    }

    /// Coordinator over this node and `peers`.
    pub fn coordinator(&self, peers: Vec<Arc<dyn NodeClient>>) -> ConfigCoordinator {
        let mut nodes: Vec<Arc<dyn NodeClient>> = vec![Arc::new(self.local_client())];
        nodes.extend(peers);
        ConfigCoordinator::new(Arc::clone(&self.store), nodes)
            .with_timeout(self.config.broadcast_timeout)
            .with_retries(self.config.broadcast_retries)
    }

    /// Request handler keyed with this node's masking salt.
    pub fn handler(&self, engine: Arc<dyn crate::handler::SearchEngine>) -> RequestHandler {
        RequestHandler::new(Arc::clone(&self.filter), engine, self.config.masking_salt.clone())
    }

    /// Serve one request and return the response with what to do with the
    /// connection afterwards.
    pub async fn serve(
        &self,
        handler: &RequestHandler,
        parts: RequestParts,
    ) -> Result<(PendingResponse, ConnectionPolicy), Error> {
        let parts = self.classify(parts);
        if let Some(verifier) = &self.verifier {
            if let Some(response) = verifier.verify(parts.clone())? {
                return Ok((response, ConnectionPolicy::Close));
            }
        }

        let (channel, response) = RequestFactory::dispatch(parts);
        handler.handle(&channel).await?;
        let policy = channel.connection_policy();
        let response = response
            .await
            .map_err(|_| Error::Node("request finished without a response".to_string()))?;
        Ok((response, policy))
    }

    /// Mark node-to-node requests by certificate subject and strip forwarded
    /// principals from everything else.
    fn classify(&self, mut parts: RequestParts) -> RequestParts {
        parts.peer_node = parts
            .peer_subject
            .as_deref()
            .filter(|subject| self.node_subjects.iter().any(|p| p.matches(subject)))
            .map(str::to_string);

        if parts.peer_node.is_none() && parts.headers.remove(PRINCIPAL_HEADER).is_some() {
            tracing::warn!(
                remote = ?parts.remote_addr,
                subject = ?parts.peer_subject,
                "dropped forwarded principal from client connection"
            );
        }
        parts
    }
}

fn report_initial_load(response: &ConfigUpdateResponse) {
    for (config_type, status) in &response.statuses {
        if status.is_converged() {
            tracing::info!(config_type = %config_type, status = ?status, "config loaded");
        } else {
            tracing::error!(config_type = %config_type, status = ?status, "config not loaded");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_proto::ConfigType;

    const SALT: &[u8] = b"gateway-test-salt";

    #[test]
    fn test_open_persists_config() {
        let dir = tempfile::tempdir().unwrap();
        let roles = r#"{"reader": {"index_permissions": [{"index_patterns": ["logs-*"],
            "allowed_actions": ["indices:data/read/*"]}]}}"#;

        {
            let gateway = Gateway::open(ServerConfig::new(dir.path(), SALT)).unwrap();
            assert_eq!(gateway.registry().snapshot().role_count(), 0);
            assert_eq!(gateway.store().store(ConfigType::Roles, roles).unwrap(), 1);
        }

        let gateway = Gateway::open(ServerConfig::new(dir.path(), SALT)).unwrap();
        assert_eq!(gateway.registry().sequence_id(ConfigType::Roles), 1);
        assert!(gateway.registry().snapshot().role("reader").is_some());
    }

    fn memory_gateway(config: ServerConfig) -> Result<Gateway, Error> {
        let store: Arc<dyn ConfigStore> = Arc::new(warden_core::MemoryConfigStore::new());
        Gateway::with_store(config, store, Arc::new(Argon2PasswordVerifier))
    }

    #[test]
    fn test_early_verifier_follows_config() {
        let gateway = memory_gateway(ServerConfig::new("./unused", SALT)).unwrap();
        assert!(gateway.verifier.is_none());

        let config = ServerConfig::new("./unused", SALT).with_early_authentication(true);
        assert!(memory_gateway(config).unwrap().verifier.is_some());
    }

    #[test]
    fn test_missing_salt_refuses_to_start() {
        let result = memory_gateway(ServerConfig::new("./unused", Vec::<u8>::new()));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_classify_by_node_subject() {
        let config = ServerConfig::new("./unused", SALT).with_node_subject("CN=warden-*,OU=nodes");
        let gateway = memory_gateway(config).unwrap();

        let node = gateway.classify(
            RequestParts::new("GET", "/")
                .with_peer_subject("CN=warden-2,OU=nodes")
                .with_header(PRINCIPAL_HEADER, "forwarded"),
        );
        assert_eq!(node.peer_node.as_deref(), Some("CN=warden-2,OU=nodes"));
        assert_eq!(node.headers.get(PRINCIPAL_HEADER), Some("forwarded"));

        // a client claiming to be a node is reclassified
        let client = gateway.classify(
            RequestParts::new("GET", "/")
                .with_peer_subject("CN=mallory,OU=users")
                .with_peer_node("CN=warden-2,OU=nodes")
                .with_header(PRINCIPAL_HEADER, "forged"),
        );
        assert!(client.peer_node.is_none());
        assert!(client.headers.get(PRINCIPAL_HEADER).is_none());
    }
}
