//! Request handler.
//!
//! Runs one request through the full pipeline:
//!
//! 1. authenticate (401 on failure)
//! 2. evaluate privileges against the request's snapshot (403 on denial)
//! 3. wrap the query with the DLS restriction of every target index
//! 4. run the search
//! 5. hide and mask fields in every returned document
//!
//! Protected config settings are served on their own routes and authorized as
//! cluster actions.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use warden_core::security::rewrite_for_decision;
use warden_core::FieldFilter;

use crate::channel::{PendingResponse, RequestChannel};
use crate::config_actions::ConfigActions;
use crate::error::Error;
use crate::filter::{complete, RequestContext, SecurityFilter};

/// Action checked for searches.
pub const SEARCH_ACTION: &str = "indices:data/read/search";

/// One search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Index the document lives in.
    pub index: String,
    /// Document id.
    pub id: String,
    /// Document source.
    pub source: Value,
}

impl Document {
    /// Create a document.
    pub fn new(index: impl Into<String>, id: impl Into<String>, source: Value) -> Self {
        Self {
            index: index.into(),
            id: id.into(),
            source,
        }
    }
}

/// The search backend.
///
/// Runs the query it is given as is; all visibility rules are already part of
/// the query or are applied to the results afterwards.
#[async_trait]
pub trait SearchEngine: Send + Sync {
    /// Search `indices` with `query`.
    async fn search(&self, indices: &[String], query: &Value) -> Result<Vec<Document>, Error>;
}

/// A parsed route.
#[derive(Debug, PartialEq)]
enum Route {
    Search(Vec<String>),
    ConfigAction(String),
    NotFound,
}

fn route(path: &str) -> Route {
    let path = path.split('?').next().unwrap_or_default().trim_matches('/');
    if path.starts_with("_warden/") {
        return Route::ConfigAction(path.to_string());
    }

    match path.split('/').collect::<Vec<_>>().as_slice() {
        [indices, "_search"] => {
            let indices: Vec<String> = indices
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
            if indices.is_empty() {
                Route::NotFound
            } else {
                Route::Search(indices)
            }
        }
        _ => Route::NotFound,
    }
}

fn error_response(status: u16, reason: &str) -> PendingResponse {
    PendingResponse::json(status, &json!({"error": {"reason": reason}, "status": status}))
}

/// Handles requests behind the security filter.
pub struct RequestHandler {
    filter: Arc<SecurityFilter>,
    engine: Arc<dyn SearchEngine>,
    config_actions: Option<Arc<ConfigActions>>,
    salt: Vec<u8>,
}

impl RequestHandler {
    /// Create a handler. `salt` keys the masking functions.
    pub fn new(filter: Arc<SecurityFilter>, engine: Arc<dyn SearchEngine>, salt: Vec<u8>) -> Self {
        Self {
            filter,
            engine,
            config_actions: None,
            salt,
        }
    }

    /// Serve protected config settings.
    pub fn with_config_actions(mut self, actions: Arc<ConfigActions>) -> Self {
        self.config_actions = Some(actions);
        self
    }

    /// The security filter.
    pub fn filter(&self) -> &Arc<SecurityFilter> {
        &self.filter
    }

    /// Handle one request. The channel is always answered exactly once on
    /// success; an error means the channel was already answered elsewhere.
    pub async fn handle(&self, channel: &dyn RequestChannel) -> Result<(), Error> {
        let Some(context) = self.filter.check_and_authenticate(channel)? else {
            return Ok(());
        };

        match route(channel.path()) {
            Route::Search(indices) => self.handle_search(channel, &context, indices).await,
            Route::ConfigAction(path) => self.handle_config_action(channel, &context, &path).await,
            Route::NotFound => {
                complete(channel, error_response(404, "no handler found"))?;
                Ok(())
            }
        }
    }

    async fn handle_search(
        &self,
        channel: &dyn RequestChannel,
        context: &RequestContext,
        indices: Vec<String>,
    ) -> Result<(), Error> {
        let query = match parse_query(channel.body()) {
            Ok(query) => query,
            Err(reason) => {
                complete(channel, error_response(400, &reason))?;
                return Ok(());
            }
        };

        let Some(decision) = self.filter.authorize(channel, context, SEARCH_ACTION, &indices)? else {
            return Ok(());
        };

        let rewritten = rewrite_for_decision(query.as_ref(), &decision);
        tracing::debug!(
            principal = %context.principal().name(),
            indices = ?indices,
            restricted = decision.is_restricted(),
            "executing search"
        );

        let documents = match self.engine.search(&indices, &rewritten).await {
            Ok(documents) => documents,
            Err(err) => {
                tracing::error!(error = %err, indices = ?indices, "search failed");
                complete(channel, error_response(502, "search failed"))?;
                return Ok(());
            }
        };

        let mut hits = Vec::with_capacity(documents.len());
        for mut document in documents {
            let Some(directives) = decision.directives(&document.index) else {
                tracing::warn!(index = %document.index, "dropping hit from an index outside the request");
                continue;
            };
            FieldFilter::new(&directives.fls, &self.salt).apply(&mut document.source);
            hits.push(json!({"_index": document.index, "_id": document.id, "_source": document.source}));
        }

        let body = json!({"hits": {"total": hits.len(), "hits": hits}});
        complete(channel, PendingResponse::json(200, &body))?;
        Ok(())
    }

    async fn handle_config_action(
        &self,
        channel: &dyn RequestChannel,
        context: &RequestContext,
        path: &str,
    ) -> Result<(), Error> {
        let Some((actions, action)) = self
            .config_actions
            .as_ref()
            .and_then(|actions| Some((actions, actions.registry().lookup(path)?)))
        else {
            complete(channel, error_response(404, "no handler found"))?;
            return Ok(());
        };

        if self
            .filter
            .authorize(channel, context, action.permission(), &[])?
            .is_none()
        {
            return Ok(());
        }

        let outcome = match channel.method().to_ascii_uppercase().as_str() {
            "GET" => {
                let value = actions.read(context.snapshot(), action);
                complete(channel, PendingResponse::json(200, &json!({"value": value})))?;
                return Ok(());
            }
            "PUT" => match serde_json::from_slice::<Value>(channel.body()) {
                Ok(body) => match body.get("value") {
                    Some(value) => actions.write(action, value.clone()).await,
                    None => {
                        complete(channel, error_response(400, "missing value"))?;
                        return Ok(());
                    }
                },
                Err(_) => {
                    complete(channel, error_response(400, "request body is not JSON"))?;
                    return Ok(());
                }
            },
            "DELETE" => actions.reset(action).await,
            _ => {
                complete(channel, error_response(405, "method not allowed"))?;
                return Ok(());
            }
        };

        let response = match outcome {
            Ok(outcome) if outcome.is_converged() => PendingResponse::json(200, &json!({"status": "OK"})),
            Ok(outcome) => PendingResponse::json(
                202,
                &json!({
                    "status": "PENDING",
                    "stale_nodes": outcome.stale_nodes(),
                    "unreachable_nodes": outcome.unreachable,
                }),
            ),
            Err(err) => {
                tracing::error!(error = %err, path = %action.path(), "config update failed");
                error_response(500, "config update failed")
            }
        };
        complete(channel, response)?;
        Ok(())
    }
}

/// The `query` member of a search body; `None` when the body or member is absent.
fn parse_query(body: &[u8]) -> Result<Option<Value>, String> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(mut map)) => Ok(map.remove("query")),
        Ok(_) => Err("search body must be a JSON object".to_string()),
        Err(e) => Err(format!("search body does not parse: {}", e)),
    }
}
