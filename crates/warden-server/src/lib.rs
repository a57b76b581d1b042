//! Warden Server library.
//!
//! Request interception for a multi-tenant search cluster: request channels,
//! authenticators, the security filter, the search pipeline with DLS and FLS
//! enforcement, and config convergence across nodes.

pub mod auth;
pub mod channel;
pub mod config;
pub mod config_actions;
pub mod convergence;
pub mod error;
pub mod filter;
pub mod gateway;
pub mod handler;

pub use auth::{Authenticator, AuthenticatorChain};
pub use channel::{
    ConnectionPolicy, DispatchRequestChannel, PendingResponse, RawRequestChannel, RequestChannel, RequestFactory,
    RequestParts,
};
pub use config::{Args, ServerConfig};
pub use config_actions::{ConfigAction, ConfigActionRegistry, ConfigActions};
pub use convergence::{BroadcastOutcome, ConfigCoordinator, LocalNodeClient, NodeClient};
pub use error::{ChannelError, Error};
pub use filter::{AuthenticationVerifier, RequestContext, SecurityFilter};
pub use gateway::Gateway;
pub use handler::{Document, RequestHandler, SearchEngine};
