//! Per-connection session state.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use dockwatch_tty::Tty;
use serde_json::Value;
use thiserror::Error;
use tokio::{sync::mpsc, task::AbortHandle};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Key holding the id of the end client an agent is currently acting for.
pub const INITIATOR_KEY: &str = "initiator";

/// Key of the client's interactive shell.
pub const TTY_KEY: &str = "tty";

/// Key of the client's streamed read.
pub const STREAM_KEY: &str = "stream";

/// Key of the token cancelling the client's metrics pollers.
pub const METRICS_KEY: &str = "metrics-context";

/// Transport error raised by [`Session::write`].
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection closed")]
    Closed,
    #[error("Send failed: {0}")]
    Send(String),
}

/// Handle to a background task streaming data to the client (e.g. a log tail).
///
/// Closing aborts the task; clones share the same task.
#[derive(Debug, Clone)]
pub struct StreamHandle {
    abort: AbortHandle,
}

impl StreamHandle {
    /// Wrap a spawned forwarder task.
    #[must_use]
    pub fn new<T>(task: &tokio::task::JoinHandle<T>) -> Self {
        Self {
            abort: task.abort_handle(),
        }
    }

    /// Stop the stream.
    pub fn close(&self) {
        self.abort.abort();
    }

    /// Whether the forwarder has already stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.abort.is_finished()
    }
}

/// A value stored on a session.
#[derive(Clone)]
pub enum SessionValue {
    Text(String),
    Bool(bool),
    Json(Value),
    /// Interactive shell attached to this client.
    Tty(Arc<Tty>),
    /// Streamed read (log tail) attached to this client.
    Stream(StreamHandle),
    /// Name of the agent that owns this connection.
    Agent(String),
    /// Cancels every metrics poller started by this client.
    Metrics(CancellationToken),
}

impl SessionValue {
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) | Self::Agent(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Release whatever resource the value holds.
    pub async fn close(self) {
        match self {
            Self::Tty(tty) => tty.clear_and_quit().await,
            Self::Stream(stream) => stream.close(),
            Self::Metrics(token) => token.cancel(),
            Self::Text(_) | Self::Bool(_) | Self::Json(_) | Self::Agent(_) => {}
        }
    }
}

impl std::fmt::Debug for SessionValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(s) => f.debug_tuple("Text").field(s).finish(),
            Self::Bool(b) => f.debug_tuple("Bool").field(b).finish(),
            Self::Json(v) => f.debug_tuple("Json").field(v).finish(),
            Self::Tty(_) => f.write_str("Tty"),
            Self::Stream(s) => f.debug_tuple("Stream").field(s).finish(),
            Self::Agent(name) => f.debug_tuple("Agent").field(name).finish(),
            Self::Metrics(_) => f.write_str("Metrics"),
        }
    }
}

impl From<&str> for SessionValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for SessionValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<bool> for SessionValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<Value> for SessionValue {
    fn from(v: Value) -> Self {
        Self::Json(v)
    }
}

/// Key/value map shared by every session implementation.
///
/// While an `"initiator"` value is present, every other key `K` is stored
/// as `"<initiator>_K"`, so one uplink connection can hold isolated state
/// for many end clients.
#[derive(Default)]
pub struct KeyStore {
    keys: RwLock<HashMap<String, SessionValue>>,
}

impl KeyStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn scoped(keys: &HashMap<String, SessionValue>, key: &str) -> String {
        if key == INITIATOR_KEY {
            return key.to_string();
        }
        match keys.get(INITIATOR_KEY).and_then(SessionValue::as_str) {
            Some(initiator) => format!("{initiator}_{key}"),
            None => key.to_string(),
        }
    }

    pub fn set(&self, key: &str, value: SessionValue) {
        let mut keys = self.keys.write().unwrap();
        let scoped = Self::scoped(&keys, key);
        keys.insert(scoped, value);
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<SessionValue> {
        let keys = self.keys.read().unwrap();
        keys.get(&Self::scoped(&keys, key)).cloned()
    }

    pub fn unset(&self, key: &str) {
        let mut keys = self.keys.write().unwrap();
        let scoped = Self::scoped(&keys, key);
        keys.remove(&scoped);
    }

    /// Remove and return the value under `key` in one step.
    pub fn take(&self, key: &str) -> Option<SessionValue> {
        let mut keys = self.keys.write().unwrap();
        let scoped = Self::scoped(&keys, key);
        keys.remove(&scoped)
    }

    /// Remove every raw key ending in `suffix`, across all initiators.
    pub fn drain_suffix(&self, suffix: &str) -> Vec<SessionValue> {
        let mut keys = self.keys.write().unwrap();
        let matching: Vec<String> = keys
            .keys()
            .filter(|k| k.ends_with(suffix))
            .cloned()
            .collect();
        matching
            .into_iter()
            .filter_map(|k| keys.remove(&k))
            .collect()
    }
}

/// A client connection as seen by the dispatcher.
///
/// Master-side browser connections and an agent's uplink to its master
/// both implement this; handlers never care which one they hold.
#[async_trait]
pub trait Session: Send + Sync {
    /// Unique connection id.
    fn id(&self) -> &str;

    /// Key/value state of this connection.
    fn keys(&self) -> &KeyStore;

    /// Write one text frame to the peer.
    ///
    /// # Errors
    /// Returns error if the connection is gone.
    async fn write(&self, frame: String) -> Result<(), TransportError>;

    fn set(&self, key: &str, value: SessionValue) {
        self.keys().set(key, value);
    }

    fn get(&self, key: &str) -> Option<SessionValue> {
        self.keys().get(key)
    }

    fn unset(&self, key: &str) {
        self.keys().unset(key);
    }

    /// Close every TTY, stream and metrics context held for any initiator.
    async fn release_all(&self) {
        self.unset(INITIATOR_KEY);
        for suffix in [TTY_KEY, STREAM_KEY, METRICS_KEY] {
            for value in self.keys().drain_suffix(suffix) {
                value.close().await;
            }
        }
    }
}

/// Session owned by this node, writing through a channel to the socket task.
pub struct LocalSession {
    id: String,
    keys: KeyStore,
    tx: mpsc::UnboundedSender<String>,
}

impl LocalSession {
    /// Create a session with a fresh id.
    ///
    /// Returns the session and the receiving end the socket writer drains.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        Self::with_id(Uuid::new_v4().to_string())
    }

    /// Create a session with a known id.
    #[must_use]
    pub fn with_id(id: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Self {
            id: id.into(),
            keys: KeyStore::new(),
            tx,
        };
        (session, rx)
    }
}

#[async_trait]
impl Session for LocalSession {
    fn id(&self) -> &str {
        &self.id
    }

    fn keys(&self) -> &KeyStore {
        &self.keys
    }

    async fn write(&self, frame: String) -> Result<(), TransportError> {
        self.tx.send(frame).map_err(|_| TransportError::Closed)
    }
}
