use {async_trait::async_trait, serde::Deserialize};

use crate::Result;

// ── Hub side ────────────────────────────────────────────────────────────────

/// Opens streaming connections to a hub for one org identity.
#[async_trait]
pub trait HubTransport: Send + Sync {
    /// Perform the handshake and return a live connection.
    async fn connect(&self) -> Result<Box<dyn HubConnection>>;
}

/// One live streaming connection.
#[async_trait]
pub trait HubConnection: Send {
    /// Next raw text frame. `None` once the hub closed the connection.
    ///
    /// Must be cancel safe: the session polls it inside `select!`.
    async fn next_frame(&mut self) -> Option<Result<String>>;

    /// Send an application-level keepalive.
    async fn ping(&mut self) -> Result<()>;

    /// Close the connection. Errors are swallowed.
    async fn close(&mut self);
}

/// Thread metadata returned by the hub.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ThreadInfo {
    pub id: String,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Request/response calls against the hub REST API.
#[async_trait]
pub trait HubClient: Send + Sync {
    async fn send_direct(&self, to: &str, content: &str) -> Result<()>;

    async fn send_thread(&self, thread_id: &str, content: &str) -> Result<()>;

    /// Look up a thread. Fails with [`crate::Error::NotFound`] when the hub
    /// has no thread with this id.
    async fn get_thread(&self, thread_id: &str) -> Result<ThreadInfo>;

    /// `GET` a read-only API resource below the hub root, returning its
    /// JSON body. `path` segments are escaped by the client. Fails with
    /// [`crate::Error::NotFound`] on a 404.
    async fn get_json(&self, path: &[&str], params: &[(&str, String)]) -> Result<serde_json::Value>;
}

// ── Consumer side ───────────────────────────────────────────────────────────

/// One formatted event addressed to the downstream consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Routing label of the org the event arrived on.
    pub label: String,
    pub endpoint: String,
    pub content: String,
}

/// Why the consumer did not accept a delivery.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The consumer deliberately refused the message. Never retried.
    #[error("consumer rejected message: {message}")]
    Rejected { message: String },

    /// Anything else: spawn failure, timeout, unstructured non-zero exit.
    #[error("delivery failed: {message}")]
    Failed { message: String },
}

impl DeliveryError {
    #[must_use]
    pub fn failed(message: impl std::fmt::Display) -> Self {
        Self::Failed {
            message: message.to_string(),
        }
    }
}

/// Hands formatted events to the downstream consumer.
#[async_trait]
pub trait Deliverer: Send + Sync {
    async fn deliver(&self, delivery: &Delivery) -> std::result::Result<(), DeliveryError>;
}
