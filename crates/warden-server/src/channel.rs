//! Request channels.
//!
//! A [`RequestChannel`] is one inbound request that can be answered exactly
//! once. The same authentication and authorization code runs against two
//! front ends:
//!
//! - [`RawRequestChannel`]: the low-level connection handler, used for early
//!   checks before a request is parsed. The response is flushed and the
//!   connection closed.
//! - [`DispatchRequestChannel`]: the request dispatcher. The response is handed
//!   to the dispatcher through a oneshot channel and the connection is kept.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::ChannelError;

/// Request headers with case-insensitive names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: BTreeMap<String, String>,
}

impl Headers {
    /// Create an empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a header, replacing any value under the same name.
    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.entries
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
    }

    /// Builder form of [`Headers::insert`].
    pub fn with(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    /// Look up a header.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Remove a header.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.entries.remove(&name.to_ascii_lowercase())
    }

    /// Iterate over lower-cased names and values.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of headers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no headers.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// What the transport does with the connection after completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPolicy {
    /// Flush the response and close the connection.
    Close,
    /// Flush the response and keep the connection for further requests.
    KeepAlive,
}

/// A response recorded on a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: Headers,
    /// Response body.
    pub body: Vec<u8>,
}

impl PendingResponse {
    /// Response with an empty body.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    /// JSON response.
    pub fn json(status: u16, body: &serde_json::Value) -> Self {
        Self {
            status,
            headers: Headers::new().with("content-type", "application/json"),
            body: body.to_string().into_bytes(),
        }
    }

    /// Add a header.
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Body as UTF-8 text, lossy.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Transport-independent view of the request itself.
#[derive(Debug, Clone, Default)]
pub struct RequestParts {
    /// HTTP method.
    pub method: String,
    /// Request path including query string.
    pub path: String,
    /// Request headers.
    pub headers: Headers,
    /// Request body.
    pub body: Vec<u8>,
    /// Remote address of the connection.
    pub remote_addr: Option<SocketAddr>,
    /// Subject of the verified client certificate, if the transport has one.
    pub peer_subject: Option<String>,
    /// Certificate subject of a verified peer node. `None` for client traffic.
    pub peer_node: Option<String>,
}

impl RequestParts {
    /// Create request parts for `method` and `path`.
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Default::default()
        }
    }

    /// Add a header.
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set the body.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Set the remote address.
    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// Set the client certificate subject.
    pub fn with_peer_subject(mut self, subject: impl Into<String>) -> Self {
        self.peer_subject = Some(subject.into());
        self
    }

    /// Mark the request as coming from a verified peer node.
    pub fn with_peer_node(mut self, subject: impl Into<String>) -> Self {
        self.peer_node = Some(subject.into());
        self
    }
}

/// An inbound request that can be answered once.
pub trait RequestChannel: Send + Sync {
    /// The underlying request.
    fn parts(&self) -> &RequestParts;

    /// Whether a response was already recorded.
    fn has_completed(&self) -> bool;

    /// Record the response.
    ///
    /// Returns whether the response reached the transport. A second call fails
    /// with [`ChannelError::AlreadyCompleted`]; callers must not ignore that.
    fn complete_with_response(&self, response: PendingResponse) -> Result<bool, ChannelError>;

    /// What happens to the connection once the response is flushed.
    fn connection_policy(&self) -> ConnectionPolicy;

    /// HTTP method.
    fn method(&self) -> &str {
        &self.parts().method
    }

    /// Request path.
    fn path(&self) -> &str {
        &self.parts().path
    }

    /// Case-insensitive header lookup.
    fn header(&self, name: &str) -> Option<&str> {
        self.parts().headers.get(name)
    }

    /// All headers.
    fn headers(&self) -> &Headers {
        &self.parts().headers
    }

    /// Request body.
    fn body(&self) -> &[u8] {
        &self.parts().body
    }

    /// Remote address.
    fn remote_addr(&self) -> Option<SocketAddr> {
        self.parts().remote_addr
    }
}

/// Channel over the low-level connection handler.
#[derive(Debug)]
pub struct RawRequestChannel {
    parts: RequestParts,
    completed: OnceLock<PendingResponse>,
}

impl RawRequestChannel {
    /// Wrap a request.
    pub fn new(parts: RequestParts) -> Self {
        Self {
            parts,
            completed: OnceLock::new(),
        }
    }

    /// The recorded response, if any.
    pub fn completed_response(&self) -> Option<&PendingResponse> {
        self.completed.get()
    }

    /// Consume the channel, yielding the recorded response for flushing.
    ///
    /// A channel whose response was handed out cannot be completed again.
    pub fn into_completed(self) -> Option<PendingResponse> {
        self.completed.into_inner()
    }
}

impl RequestChannel for RawRequestChannel {
    fn parts(&self) -> &RequestParts {
        &self.parts
    }

    fn has_completed(&self) -> bool {
        self.completed.get().is_some()
    }

    fn complete_with_response(&self, response: PendingResponse) -> Result<bool, ChannelError> {
        let status = response.status;
        self.completed
            .set(response)
            .map_err(|_| ChannelError::AlreadyCompleted)?;
        tracing::debug!(status, path = %self.parts.path, "raw channel completed");
        Ok(true)
    }

    fn connection_policy(&self) -> ConnectionPolicy {
        ConnectionPolicy::Close
    }
}

/// Channel over the request dispatcher.
#[derive(Debug)]
pub struct DispatchRequestChannel {
    parts: RequestParts,
    sender: Mutex<Option<oneshot::Sender<PendingResponse>>>,
    completed: AtomicBool,
}

impl DispatchRequestChannel {
    /// Wrap a request; the receiver yields the response.
    pub fn new(parts: RequestParts) -> (Self, oneshot::Receiver<PendingResponse>) {
        let (tx, rx) = oneshot::channel();
        let channel = Self {
            parts,
            sender: Mutex::new(Some(tx)),
            completed: AtomicBool::new(false),
        };
        (channel, rx)
    }
}

impl RequestChannel for DispatchRequestChannel {
    fn parts(&self) -> &RequestParts {
        &self.parts
    }

    fn has_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    fn complete_with_response(&self, response: PendingResponse) -> Result<bool, ChannelError> {
        let sender = self
            .sender
            .lock()
            .take()
            .ok_or(ChannelError::AlreadyCompleted)?;
        self.completed.store(true, Ordering::Release);

        let status = response.status;
        let delivered = sender.send(response).is_ok();
        if !delivered {
            tracing::warn!(status, path = %self.parts.path, "dispatcher dropped before response");
        }
        Ok(delivered)
    }

    fn connection_policy(&self) -> ConnectionPolicy {
        ConnectionPolicy::KeepAlive
    }
}

/// Builds channels for the two front ends.
pub struct RequestFactory;

impl RequestFactory {
    /// Channel for the low-level connection handler.
    pub fn raw(parts: RequestParts) -> RawRequestChannel {
        RawRequestChannel::new(parts)
    }

    /// Channel for the dispatcher, with the receiving end of its response.
    pub fn dispatch(parts: RequestParts) -> (DispatchRequestChannel, oneshot::Receiver<PendingResponse>) {
        DispatchRequestChannel::new(parts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn parts() -> RequestParts {
        RequestParts::new("GET", "/songs/_search")
            .with_header("Authorization", "Basic abc")
            .with_body(b"{}".to_vec())
    }

    #[test]
    fn test_headers_case_insensitive() {
        let channel = RequestFactory::raw(parts());
        assert_eq!(channel.header("authorization"), Some("Basic abc"));
        assert_eq!(channel.header("AUTHORIZATION"), Some("Basic abc"));
        assert_eq!(channel.method(), "GET");
        assert_eq!(channel.path(), "/songs/_search");
        assert_eq!(channel.body(), b"{}");
    }

    #[test]
    fn test_raw_channel_single_completion() {
        let channel = RequestFactory::raw(parts());
        assert!(!channel.has_completed());
        assert_eq!(channel.connection_policy(), ConnectionPolicy::Close);

        assert_eq!(channel.complete_with_response(PendingResponse::new(401)), Ok(true));
        assert_eq!(
            channel.complete_with_response(PendingResponse::new(200)),
            Err(ChannelError::AlreadyCompleted)
        );
        assert!(channel.has_completed());

        let response = channel.into_completed().unwrap();
        assert_eq!(response.status, 401);
    }

    #[test]
    fn test_raw_channel_handed_out_response_is_first() {
        let channel = RequestFactory::raw(parts());
        assert_eq!(channel.complete_with_response(PendingResponse::new(401)), Ok(true));
        assert_eq!(channel.completed_response().map(|r| r.status), Some(401));

        // every later attempt fails and leaves the recorded response alone
        for status in [200, 500] {
            assert_eq!(
                channel.complete_with_response(PendingResponse::new(status)),
                Err(ChannelError::AlreadyCompleted)
            );
        }
        assert_eq!(channel.into_completed().map(|r| r.status), Some(401));
    }

    #[test]
    fn test_raw_channel_without_response() {
        let channel = RequestFactory::raw(parts());
        assert!(channel.into_completed().is_none());
    }

    #[tokio::test]
    async fn test_dispatch_channel_single_completion() {
        let (channel, rx) = RequestFactory::dispatch(parts());
        assert_eq!(channel.connection_policy(), ConnectionPolicy::KeepAlive);

        assert_eq!(channel.complete_with_response(PendingResponse::new(403)), Ok(true));
        assert_eq!(
            channel.complete_with_response(PendingResponse::new(200)),
            Err(ChannelError::AlreadyCompleted)
        );

        let response = rx.await.unwrap();
        assert_eq!(response.status, 403);
    }

    #[tokio::test]
    async fn test_dispatch_receiver_dropped() {
        let (channel, rx) = RequestFactory::dispatch(parts());
        drop(rx);
        assert_eq!(channel.complete_with_response(PendingResponse::new(200)), Ok(false));
        assert!(channel.has_completed());
    }

    #[test]
    fn test_concurrent_completion_exactly_one_wins() {
        let channel = Arc::new(RequestFactory::raw(parts()));
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let channel = Arc::clone(&channel);
                std::thread::spawn(move || {
                    channel
                        .complete_with_response(PendingResponse::new(200 + i))
                        .is_ok()
                })
            })
            .collect();

        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(successes, 1);
    }

    #[test]
    fn test_json_response() {
        let response = PendingResponse::json(403, &serde_json::json!({"error": "forbidden"}));
        assert_eq!(response.headers.get("Content-Type"), Some("application/json"));
        assert!(response.body_text().contains("forbidden"));
    }
}
