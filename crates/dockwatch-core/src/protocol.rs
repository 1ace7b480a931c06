//! Wire protocol for client-server communication.
//!
//! Inbound frames are [`Command`]s, outbound frames are [`Notification`]s.
//! Between an agent and its master, notifications travel wrapped in an
//! `agent.reply` command.

use serde::{Deserialize, Deserializer, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value, json};
use thiserror::Error;

/// Flat field map rendered for one resource.
pub type Row = Map<String, Value>;

/// Action used by agents to route a notification back to its end client.
pub const AGENT_REPLY: &str = "agent.reply";

fn null_as_empty<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Map<String, Value>>::deserialize(deserializer)?.unwrap_or_default())
}

fn into_object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("Value".to_string(), other);
            map
        }
    }
}

/// Typed argument decode error.
#[derive(Debug, Error)]
#[error("Invalid arguments for {action}: {source}")]
pub struct ArgsError {
    pub action: String,
    #[source]
    pub source: serde_json::Error,
}

/// Command sent by a client (or forwarded by the master to an agent).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Command {
    /// Dot-namespaced verb, e.g. `container.stop`.
    #[serde(default)]
    pub action: String,
    #[serde(default, deserialize_with = "null_as_empty", skip_serializing_if = "Map::is_empty")]
    pub args: Map<String, Value>,
    /// Remote agent the command must be forwarded to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    /// Originating client id while in transit between master and agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initiator: Option<String>,
    /// Named engine host (multi-host deployments).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<i32>,
}

impl Command {
    /// Create a command with arguments.
    #[must_use]
    pub fn new(action: impl Into<String>, args: Value) -> Self {
        Self {
            action: action.into(),
            args: into_object(args),
            ..Self::default()
        }
    }

    /// Decode a command from one text frame.
    ///
    /// # Errors
    /// Returns error if the frame is not a JSON object of the expected shape.
    pub fn decode(frame: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(frame)
    }

    /// Decode the arguments into a typed struct.
    ///
    /// # Errors
    /// Returns error naming the action if fields are missing or mistyped.
    pub fn args<T: DeserializeOwned>(&self) -> Result<T, ArgsError> {
        serde_json::from_value(Value::Object(self.args.clone())).map_err(|source| ArgsError {
            action: self.action.clone(),
            source,
        })
    }

    /// Agent this command targets, if any.
    #[must_use]
    pub fn target_agent(&self) -> Option<&str> {
        self.agent.as_deref().filter(|a| !a.is_empty())
    }

    /// Initiator carried by this command, if any.
    #[must_use]
    pub fn initiator(&self) -> Option<&str> {
        self.initiator.as_deref().filter(|i| !i.is_empty())
    }

    /// Encode to a text frame.
    ///
    /// # Panics
    /// Never in practice: arguments are plain JSON values.
    #[must_use]
    pub fn to_frame(&self) -> String {
        serde_json::to_string(self).expect("command arguments are plain JSON")
    }
}

/// Top-level category of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    /// First payload after connecting.
    Init,
    InitChunk,
    /// Fresh data for a resource view.
    Refresh,
    RefreshChunk,
    /// The server is busy with the client's input.
    Loading,
    /// Message or error to surface to the user.
    Report,
    /// Confirmation request.
    Prompt,
    /// Shell status or output.
    Tty,
    /// Authentication outcome.
    Auth,
}

/// Severity of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    Success,
    Error,
    Warning,
    Info,
}

/// Notification sent to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Notification {
    pub category: Category,
    #[serde(rename = "Type")]
    pub kind: NotificationType,
    #[serde(default)]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub content: Map<String, Value>,
    /// Command the client should run next.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow: Option<String>,
    #[serde(default)]
    pub display: bool,
}

impl Notification {
    fn build(category: Category, kind: NotificationType, title: &str, content: Value) -> Self {
        Self {
            category,
            kind,
            title: title.to_string(),
            content: into_object(content),
            follow: None,
            display: false,
        }
    }

    #[must_use]
    pub fn init(content: Value) -> Self {
        Self::build(Category::Init, NotificationType::Success, "", content)
    }

    #[must_use]
    pub fn init_chunk(content: Value) -> Self {
        Self::build(Category::InitChunk, NotificationType::Success, "", content)
    }

    /// `report`/error carrying `Content.Message`.
    #[must_use]
    pub fn error(message: impl std::fmt::Display) -> Self {
        Self::build(
            Category::Report,
            NotificationType::Error,
            "Error",
            json!({ "Message": message.to_string() }),
        )
    }

    #[must_use]
    pub fn data(content: Value) -> Self {
        Self::build(Category::Refresh, NotificationType::Info, "", content)
    }

    #[must_use]
    pub fn data_chunk(content: Value) -> Self {
        Self::build(Category::RefreshChunk, NotificationType::Info, "", content)
    }

    #[must_use]
    pub fn info(message: impl std::fmt::Display) -> Self {
        Self::build(
            Category::Report,
            NotificationType::Info,
            "Information",
            json!({ "Message": message.to_string() }),
        )
    }

    #[must_use]
    pub fn success(message: impl std::fmt::Display) -> Self {
        Self::build(
            Category::Report,
            NotificationType::Success,
            "Success",
            json!({ "Message": message.to_string() }),
        )
    }

    #[must_use]
    pub fn prompt(content: Value) -> Self {
        Self::build(Category::Prompt, NotificationType::Info, "Confirm", content)
    }

    #[must_use]
    pub fn auth(kind: NotificationType, content: Value) -> Self {
        Self::build(Category::Auth, kind, "Authentication", content)
    }

    #[must_use]
    pub fn tty(content: Value) -> Self {
        Self::build(Category::Tty, NotificationType::Info, "", content)
    }

    #[must_use]
    pub fn loading() -> Self {
        Self::build(Category::Loading, NotificationType::Info, "", Value::Null)
    }

    /// Ask the client to run `action` once this notification is handled.
    #[must_use]
    pub fn with_follow(mut self, action: impl Into<String>) -> Self {
        self.follow = Some(action.into());
        self
    }

    /// Errors and warnings are always shown; the rest only when confirmations are on.
    pub fn apply_display(&mut self, show_confirmations: bool) {
        self.display = match self.kind {
            NotificationType::Error | NotificationType::Warning => true,
            NotificationType::Success | NotificationType::Info => show_confirmations,
        };
    }

    /// Wrap into the `agent.reply` command an agent sends to its master.
    #[must_use]
    pub fn into_reply(self, to: &str) -> Command {
        Command::new(
            AGENT_REPLY,
            json!({ "To": to, "Notification": self }),
        )
    }

    /// Encode to a text frame.
    ///
    /// # Panics
    /// Never in practice: content is plain JSON.
    #[must_use]
    pub fn to_frame(&self) -> String {
        serde_json::to_string(self).expect("notification content is plain JSON")
    }
}

/// One listing tab (resource kind) as rendered for the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Tab {
    pub key: String,
    pub title: String,
    pub rows: Vec<Row>,
    #[serde(default)]
    pub sort_by: String,
}
