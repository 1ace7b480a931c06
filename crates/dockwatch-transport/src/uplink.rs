//! Agent uplink: an outbound WebSocket to the master.
//!
//! The agent logs in (when it has a secret), registers under its name, and
//! then serves the commands the master forwards over the same socket.
//! Dropped connections are retried with exponential backoff; a refused login
//! or registration ends the uplink.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use dockwatch_core::{
    Category, Command, KeyStore, Notification, NotificationType, Session, TransportError,
};
use dockwatch_server::Server;
use futures::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use serde_json::json;
use thiserror::Error;
use tokio::{net::TcpStream, sync::Mutex};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{self, Message},
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

#[derive(Debug, Error)]
pub enum UplinkError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("Master closed the connection")]
    Closed,
    #[error("Master refused the login: {0}")]
    Rejected(String),
    #[error("Master refused the registration: {0}")]
    Registration(String),
}

impl UplinkError {
    /// Errors that retrying cannot fix.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected(_) | Self::Registration(_))
    }
}

/// Where and how to reach the master.
#[derive(Debug, Clone)]
pub struct UplinkConfig {
    /// WebSocket URL, e.g. `ws://master:3000/ws`.
    pub url: String,
    /// Name to register under. Must be unique on the master.
    pub name: String,
    pub secret: Option<String>,
    pub reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
}

impl UplinkConfig {
    #[must_use]
    pub fn new(url: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            name: name.into(),
            secret: None,
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(60),
        }
    }
}

/// The agent's end of the uplink, seen by the dispatcher as a session.
pub struct UplinkSession {
    id: String,
    keys: KeyStore,
    sink: Mutex<WsSink>,
}

impl UplinkSession {
    fn new(sink: WsSink) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            keys: KeyStore::new(),
            sink: Mutex::new(sink),
        }
    }

    async fn close(&self) {
        if let Err(e) = self.sink.lock().await.close().await {
            tracing::debug!("Uplink close failed: {e}");
        }
    }
}

#[async_trait]
impl Session for UplinkSession {
    fn id(&self) -> &str {
        &self.id
    }

    fn keys(&self) -> &KeyStore {
        &self.keys
    }

    async fn write(&self, frame: String) -> Result<(), TransportError> {
        self.sink
            .lock()
            .await
            .send(Message::Text(frame.into()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }
}

/// Keep an uplink to the master until `shutdown` fires or the master
/// refuses this agent.
///
/// # Errors
/// Returns error if the master rejects the login or the registration.
pub async fn run(
    server: Arc<Server>,
    config: UplinkConfig,
    shutdown: CancellationToken,
) -> Result<(), UplinkError> {
    let mut delay = config.reconnect_delay;

    loop {
        tracing::info!(url = %config.url, agent = %config.name, "Connecting to master");
        match connect_and_serve(&server, &config, &shutdown).await {
            _ if shutdown.is_cancelled() => return Ok(()),
            Ok(()) => {
                tracing::info!("Master closed the uplink, reconnecting");
                delay = config.reconnect_delay;
            }
            Err(e) if e.is_terminal() => {
                tracing::error!("{e}");
                return Err(e);
            }
            Err(e) => {
                tracing::warn!("Uplink failed: {e}, reconnecting in {}ms", delay.as_millis());
            }
        }

        tokio::select! {
            () = shutdown.cancelled() => return Ok(()),
            () = tokio::time::sleep(delay) => {}
        }
        delay = (delay * 2).min(config.max_reconnect_delay);
    }
}

async fn connect_and_serve(
    server: &Arc<Server>,
    config: &UplinkConfig,
    shutdown: &CancellationToken,
) -> Result<(), UplinkError> {
    let (socket, _response) = tokio::select! {
        () = shutdown.cancelled() => return Ok(()),
        connected = connect_async(config.url.as_str()) => connected?,
    };
    let (sink, mut source) = socket.split();
    let uplink = Arc::new(UplinkSession::new(sink));
    let session: Arc<dyn Session> = uplink.clone();

    let result = tokio::select! {
        () = shutdown.cancelled() => Ok(()),
        result = async {
            handshake(&session, &mut source, config).await?;
            tracing::info!(agent = %config.name, "Registered with master");
            serve(server, &session, &mut source).await
        } => result,
    };

    session.release_all().await;
    uplink.close().await;
    result
}

/// Log in and register, skipping frames that are not the answer.
async fn handshake(
    session: &Arc<dyn Session>,
    source: &mut WsSource,
    config: &UplinkConfig,
) -> Result<(), UplinkError> {
    if let Some(secret) = &config.secret {
        let login = Command::new("auth.login", json!({ "Password": secret }));
        session.write(login.to_frame()).await?;

        let reply = next_notification(source, |n| {
            n.category == Category::Auth
                && n.content
                    .get("Authentication")
                    .and_then(|a| a.get("Spontaneous"))
                    .is_none()
        })
        .await?;
        if reply.kind == NotificationType::Error {
            return Err(UplinkError::Rejected(message(&reply)));
        }
    }

    let register = Command::new(
        "agent.register",
        json!({ "Resource": { "Name": config.name } }),
    );
    session.write(register.to_frame()).await?;

    let reply = next_notification(source, |n| {
        n.category == Category::Report
            || (n.category == Category::Auth && n.kind == NotificationType::Error)
    })
    .await?;
    match (reply.category, reply.kind) {
        (_, NotificationType::Success) => Ok(()),
        (Category::Auth, _) => Err(UplinkError::Rejected(message(&reply))),
        _ => Err(UplinkError::Registration(message(&reply))),
    }
}

fn message(notification: &Notification) -> String {
    let content = &notification.content;
    content
        .get("Message")
        .or_else(|| content.get("Authentication").and_then(|a| a.get("Message")))
        .and_then(|m| m.as_str())
        .unwrap_or_default()
        .to_string()
}

async fn next_notification(
    source: &mut WsSource,
    wanted: impl Fn(&Notification) -> bool,
) -> Result<Notification, UplinkError> {
    while let Some(msg) = source.next().await {
        let text = match msg? {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        match serde_json::from_str::<Notification>(text.as_str()) {
            Ok(notification) if wanted(&notification) => return Ok(notification),
            Ok(notification) => {
                tracing::trace!(category = ?notification.category, "Skipping frame during handshake");
            }
            Err(e) => tracing::debug!("Ignoring undecodable frame during handshake: {e}"),
        }
    }
    Err(UplinkError::Closed)
}

/// Handle forwarded commands one at a time until the master hangs up.
async fn serve(
    server: &Arc<Server>,
    session: &Arc<dyn Session>,
    source: &mut WsSource,
) -> Result<(), UplinkError> {
    while let Some(msg) = source.next().await {
        match msg? {
            Message::Text(text) => server.handle(session, Some(text.as_str().as_bytes())).await,
            Message::Binary(data) => server.handle(session, Some(&data[..])).await,
            Message::Close(_) => break,
            _ => {}
        }
    }
    Ok(())
}
