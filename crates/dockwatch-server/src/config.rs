//! Server configuration.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    str::FromStr,
    time::Duration,
};

use dockwatch_engine::{LogOptions, ResourceKind, StateStyle, parse_columns};
use dockwatch_tty::ShellCommand;

/// Role of this node in a deployment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Role {
    /// Owns the client-facing transport.
    #[default]
    Master,
    /// Serves a master over an uplink.
    Agent,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Master => "Master",
            Self::Agent => "Agent",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "master" => Ok(Self::Master),
            "agent" => Ok(Self::Agent),
            other => Err(format!("unknown server role: {other}")),
        }
    }
}

/// Shared-secret authentication.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    pub enabled: bool,
    /// Plaintext secret.
    pub secret: Option<String>,
    /// Hex-encoded SHA-256 of the secret. Takes precedence over `secret`.
    pub hash: Option<String>,
}

/// Metrics poller tuning.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    pub tick: Duration,
    pub idle_timeout: Duration,
    pub retries: u32,
    pub capacity: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(3),
            idle_timeout: Duration::from_secs(30 * 60),
            retries: 5,
            capacity: 3000,
        }
    }
}

/// How listings are rendered.
#[derive(Debug, Clone, Default)]
pub struct ListingConfig {
    pub columns: HashMap<ResourceKind, Vec<String>>,
    pub sort_by: HashMap<ResourceKind, String>,
    pub state_style: StateStyle,
    /// Split listings into chunks of this many rows.
    pub chunk_size: Option<usize>,
}

impl ListingConfig {
    #[must_use]
    pub fn columns(&self, kind: ResourceKind) -> Vec<String> {
        self.columns
            .get(&kind)
            .filter(|c| !c.is_empty())
            .cloned()
            .unwrap_or_else(|| parse_columns(kind.default_columns()))
    }

    #[must_use]
    pub fn sort_by(&self, kind: ResourceKind) -> String {
        self.sort_by.get(&kind).cloned().unwrap_or_default()
    }
}

/// Everything the dispatcher needs to know about its deployment.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    pub role: Role,
    /// Name shown in overviews; agents register under it.
    pub name: Option<String>,
    pub auth: AuthConfig,
    /// Show success and info notifications.
    pub display_confirmations: bool,
    pub listing: ListingConfig,
    /// Tail and since limits for log streams.
    pub logs: LogOptions,
    /// Shell opened on this host.
    pub server_shell: Option<String>,
    /// Shell opened inside containers.
    pub container_shell: Option<String>,
    pub metrics: MetricsConfig,
    /// Client-side preferences handed out on authentication.
    pub preferences: BTreeMap<String, String>,
}

impl ServerConfig {
    #[must_use]
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.role.as_str().to_string())
    }

    #[must_use]
    pub fn server_shell(&self) -> ShellCommand {
        ShellCommand::configured_or_default(self.server_shell.as_deref())
    }

    #[must_use]
    pub fn container_shell(&self) -> ShellCommand {
        self.container_shell
            .as_deref()
            .and_then(ShellCommand::parse)
            .unwrap_or_else(|| ShellCommand::configured_or_default(Some("/bin/sh")))
    }
}
