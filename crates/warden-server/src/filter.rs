//! Security filter.
//!
//! Sits in front of every request handler. It authenticates the caller,
//! evaluates privileges against one snapshot per request, and answers the
//! channel itself on failure:
//!
//! - 401 with a generic body and `WWW-Authenticate: Basic realm="Warden"`
//! - 403 with a generic body; callers allowed to explain permissions also
//!   get the missing permissions and their resolved roles

use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::json;
use warden_core::{AuthorizationDecision, IdentityError, PrivilegeEvaluator, RoleRegistry, SecuritySnapshot};
use warden_proto::Principal;

use crate::auth::AuthenticatorChain;
use crate::channel::{PendingResponse, RequestChannel, RequestFactory, RequestParts};
use crate::error::Error;

/// Cluster permission that lets a caller see why a request was denied.
pub const EXPLAIN_PERMISSION: &str = "cluster:admin/warden/permissions/explain";

/// Authentication challenge sent with every 401.
pub const AUTHENTICATE_CHALLENGE: &str = "Basic realm=\"Warden\"";

/// State of one authenticated request.
///
/// The principal and the snapshot are fixed for the lifetime of the request;
/// a reload that lands mid-request does not affect it.
#[derive(Debug, Clone)]
pub struct RequestContext {
    principal: Principal,
    snapshot: Arc<SecuritySnapshot>,
    remote_addr: Option<SocketAddr>,
}

impl RequestContext {
    /// The authenticated caller.
    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    /// The snapshot this request is evaluated against.
    pub fn snapshot(&self) -> &Arc<SecuritySnapshot> {
        &self.snapshot
    }

    /// Remote address of the caller.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }
}

/// Authentication and authorization in front of the handlers.
pub struct SecurityFilter {
    authenticators: AuthenticatorChain,
    registry: Arc<RoleRegistry>,
    evaluator: PrivilegeEvaluator,
}

impl SecurityFilter {
    /// Create a filter.
    pub fn new(authenticators: AuthenticatorChain, registry: Arc<RoleRegistry>, evaluator: PrivilegeEvaluator) -> Self {
        Self {
            authenticators,
            registry,
            evaluator,
        }
    }

    /// The registry snapshots are loaded from.
    pub fn registry(&self) -> &Arc<RoleRegistry> {
        &self.registry
    }

    /// The privilege evaluator.
    pub fn evaluator(&self) -> &PrivilegeEvaluator {
        &self.evaluator
    }

    /// Authenticate the request.
    ///
    /// Returns `None` after answering the channel with 401.
    pub fn check_and_authenticate(&self, channel: &dyn RequestChannel) -> Result<Option<RequestContext>, Error> {
        match self.authenticators.authenticate(channel) {
            Ok(principal) => Ok(Some(RequestContext {
                principal,
                snapshot: self.registry.snapshot(),
                remote_addr: channel.remote_addr(),
            })),
            Err(err) => {
                match &err {
                    IdentityError::BackendUnavailable(backend) => {
                        tracing::error!(backend = %backend, path = %channel.path(), "authentication backend unavailable")
                    }
                    _ => tracing::info!(
                        error = %err,
                        path = %channel.path(),
                        remote = ?channel.remote_addr(),
                        "authentication failed"
                    ),
                }
                complete(channel, unauthorized())?;
                Ok(None)
            }
        }
    }

    /// Authorize `action` on `targets`; no targets means a cluster action.
    ///
    /// Returns `None` after answering the channel with 403.
    pub fn authorize(
        &self,
        channel: &dyn RequestChannel,
        context: &RequestContext,
        action: &str,
        targets: &[String],
    ) -> Result<Option<AuthorizationDecision>, Error> {
        let decision = self
            .evaluator
            .evaluate(&context.snapshot, &context.principal, action, targets);
        if decision.is_allowed() {
            return Ok(Some(decision));
        }

        tracing::info!(
            principal = %context.principal.name(),
            action,
            targets = ?targets,
            denial = ?decision.denial(),
            "request denied"
        );
        let explain = self
            .evaluator
            .evaluate(&context.snapshot, &context.principal, EXPLAIN_PERMISSION, &[])
            .is_allowed();
        complete(channel, forbidden(&decision, explain))?;
        Ok(None)
    }
}

/// Record a response, logging loudly if the channel was already answered.
pub(crate) fn complete(channel: &dyn RequestChannel, response: PendingResponse) -> Result<bool, Error> {
    channel.complete_with_response(response).map_err(|err| {
        tracing::error!(error = %err, path = %channel.path(), method = %channel.method(), "response sent twice");
        Error::Channel(err)
    })
}

fn unauthorized() -> PendingResponse {
    PendingResponse::json(
        401,
        &json!({"error": {"type": "security_exception", "reason": "authentication required"}, "status": 401}),
    )
    .with_header("www-authenticate", AUTHENTICATE_CHALLENGE)
}

fn forbidden(decision: &AuthorizationDecision, explain: bool) -> PendingResponse {
    let mut error = json!({"type": "security_exception", "reason": "no permissions for this request"});
    if explain {
        error["missing_permissions"] = json!(decision.missing_permissions());
        error["roles"] = json!(decision.roles());
    }
    PendingResponse::json(403, &json!({"error": error, "status": 403}))
}

/// Authentication run by the low-level connection handler, before the request
/// reaches the dispatcher.
pub struct AuthenticationVerifier {
    filter: Arc<SecurityFilter>,
}

impl AuthenticationVerifier {
    /// Create a verifier over `filter`.
    pub fn new(filter: Arc<SecurityFilter>) -> Self {
        Self { filter }
    }

    /// Returns the response to flush before closing the connection, or `None`
    /// to let the request through.
    pub fn verify(&self, parts: RequestParts) -> Result<Option<PendingResponse>, Error> {
        let channel = RequestFactory::raw(parts);
        self.filter.check_and_authenticate(&channel)?;
        Ok(channel.into_completed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenAuthenticator;
    use crate::error::ChannelError;
    use warden_proto::ConfigType;

    const ROLES: &str = r#"{
        "reader": {
            "index_permissions": [{"index_patterns": ["songs"], "allowed_actions": ["indices:data/read/*"]}]
        },
        "auditor": {"cluster_permissions": ["cluster:admin/warden/permissions/*"]}
    }"#;

    const MAPPINGS: &str = r#"{
        "reader": {"backend_roles": ["readers"]},
        "auditor": {"users": ["carol"]}
    }"#;

    fn filter() -> SecurityFilter {
        let registry = Arc::new(RoleRegistry::new());
        registry.install(ConfigType::Roles, ROLES, 1).unwrap();
        registry.install(ConfigType::RolesMapping, MAPPINGS, 1).unwrap();

        let tokens = TokenAuthenticator::new();
        tokens.register_token("t-alice", "alice", vec!["readers".to_string()]);
        tokens.register_token("t-bob", "bob", vec![]);
        tokens.register_token("t-carol", "carol", vec![]);

        SecurityFilter::new(AuthenticatorChain::new().with(tokens), registry, PrivilegeEvaluator::new())
    }

    fn parts(token: Option<&str>) -> RequestParts {
        let parts = RequestParts::new("GET", "/songs/_search");
        match token {
            Some(t) => parts.with_header("Authorization", format!("Bearer {}", t)),
            None => parts,
        }
    }

    fn body(response: &PendingResponse) -> serde_json::Value {
        serde_json::from_slice(&response.body).unwrap()
    }

    #[test]
    fn test_unauthenticated_gets_401_challenge() {
        let filter = filter();
        let channel = RequestFactory::raw(parts(Some("nope")));
        assert!(filter.check_and_authenticate(&channel).unwrap().is_none());

        let response = channel.into_completed().unwrap();
        assert_eq!(response.status, 401);
        assert_eq!(response.headers.get("WWW-Authenticate"), Some(AUTHENTICATE_CHALLENGE));
        assert!(!response.body_text().contains("nope"));
    }

    #[test]
    fn test_authenticated_context() {
        let filter = filter();
        let channel = RequestFactory::raw(parts(Some("t-alice")));
        let context = filter.check_and_authenticate(&channel).unwrap().unwrap();
        assert_eq!(context.principal().name(), "alice");
        assert!(!channel.has_completed());
    }

    #[test]
    fn test_denial_is_generic_for_ordinary_callers() {
        let filter = filter();
        let channel = RequestFactory::raw(parts(Some("t-bob")));
        let context = filter.check_and_authenticate(&channel).unwrap().unwrap();

        let decision = filter
            .authorize(&channel, &context, "indices:data/read/search", &["songs".to_string()])
            .unwrap();
        assert!(decision.is_none());

        let response = channel.into_completed().unwrap();
        assert_eq!(response.status, 403);
        let body = body(&response);
        assert!(body["error"].get("missing_permissions").is_none());
    }

    #[test]
    fn test_denial_detail_for_explaining_callers() {
        let filter = filter();
        let channel = RequestFactory::raw(parts(Some("t-carol")));
        let context = filter.check_and_authenticate(&channel).unwrap().unwrap();

        filter
            .authorize(&channel, &context, "indices:data/read/search", &["songs".to_string()])
            .unwrap();
        let body = body(&channel.into_completed().unwrap());
        assert_eq!(body["error"]["missing_permissions"], json!(["indices:data/read/search"]));
        assert_eq!(body["error"]["roles"], json!(["auditor"]));
    }

    #[test]
    fn test_second_completion_is_an_error() {
        let filter = filter();
        let channel = RequestFactory::raw(parts(None));
        channel.complete_with_response(PendingResponse::new(200)).unwrap();
        assert!(matches!(
            filter.check_and_authenticate(&channel),
            Err(Error::Channel(ChannelError::AlreadyCompleted))
        ));
    }

    #[test]
    fn test_verifier() {
        let verifier = AuthenticationVerifier::new(Arc::new(filter()));
        assert!(verifier.verify(parts(Some("t-alice"))).unwrap().is_none());
        assert_eq!(verifier.verify(parts(None)).unwrap().unwrap().status, 401);
    }
}
