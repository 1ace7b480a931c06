//! Command-line and environment settings.

use std::{
    collections::{BTreeMap, HashMap},
    net::IpAddr,
    path::PathBuf,
};

use anyhow::{Context, ensure};
use clap::{ArgAction, Parser};
use dockwatch_engine::{LogOptions, ResourceKind, StateStyle, parse_columns};
use dockwatch_server::{AuthConfig, ListingConfig, MetricsConfig, Role, ServerConfig};
use dockwatch_transport::UplinkConfig;

/// Parse the boolean spellings accepted in the environment.
fn parse_flag(value: &str) -> Result<bool, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "" | "0" | "false" | "off" | "no" => Ok(false),
        other => Err(format!("expected a boolean, got `{other}`")),
    }
}

/// Environment prefix of the preferences handed to clients.
const PREFERENCE_PREFIX: &str = "CLIENT_PREFERENCE_";

/// Collect `CLIENT_PREFERENCE_<NAME>` variables under `<NAME>`.
fn client_preferences(
    vars: impl IntoIterator<Item = (String, String)>,
) -> BTreeMap<String, String> {
    vars.into_iter()
        .filter_map(|(key, value)| {
            let name = key.strip_prefix(PREFERENCE_PREFIX)?;
            (!name.is_empty()).then(|| (name.to_string(), value))
        })
        .collect()
}

/// Real-time container console.
#[derive(Parser, Debug, Clone)]
#[command(name = "dockwatch", version, about)]
pub struct Settings {
    /// Master serves clients, Agent serves a master
    #[arg(long, env = "SERVER_ROLE", default_value = "Master")]
    pub role: Role,

    #[arg(long, env = "SERVER_BIND", default_value = "0.0.0.0")]
    pub bind: IpAddr,

    #[arg(long, env = "SERVER_PORT", default_value_t = 3000)]
    pub port: u16,

    /// Largest inbound frame in bytes
    #[arg(long, env = "SERVER_MAX_READ_SIZE")]
    pub max_read_size: Option<usize>,

    #[arg(long, env = "AUTHENTICATION_ENABLED", default_value = "false", value_parser = parse_flag, action = ArgAction::Set)]
    pub auth_enabled: bool,

    #[arg(long, env = "AUTHENTICATION_SECRET", hide_env_values = true)]
    pub auth_secret: Option<String>,

    /// Hex SHA-256 of the secret
    #[arg(long, env = "AUTHENTICATION_HASH", hide_env_values = true)]
    pub auth_hash: Option<String>,

    #[arg(long, env = "DISPLAY_CONFIRMATIONS", default_value = "true", value_parser = parse_flag, action = ArgAction::Set)]
    pub display_confirmations: bool,

    /// Master address as `host:port` or a full websocket URL
    #[arg(long, env = "MASTER_HOST")]
    pub master_host: Option<String>,

    #[arg(long, env = "MASTER_SECRET", hide_env_values = true)]
    pub master_secret: Option<String>,

    /// Name this agent registers under
    #[arg(long, env = "AGENT_NAME")]
    pub agent_name: Option<String>,

    #[arg(long, env = "MULTI_HOST_ENABLED", default_value = "false", value_parser = parse_flag, action = ArgAction::Set)]
    pub multi_host: bool,

    /// `<name> <address>` lines, defaults to `docker_hosts` next to the executable
    #[arg(long, env = "DOCKER_HOSTS_FILE")]
    pub hosts_file: Option<PathBuf>,

    #[arg(long, env = "TTY_SERVER_COMMAND")]
    pub tty_server_command: Option<String>,

    #[arg(long, env = "TTY_CONTAINER_COMMAND")]
    pub tty_container_command: Option<String>,

    #[arg(long, env = "SERVER_CHUNKED_COMMUNICATION_ENABLED", default_value = "false", value_parser = parse_flag, action = ArgAction::Set)]
    pub chunked: bool,

    #[arg(long, env = "SERVER_CHUNKED_COMMUNICATION_SIZE", default_value_t = 10)]
    pub chunk_size: usize,

    #[arg(long, env = "CONTAINER_LOGS_TAIL")]
    pub logs_tail: Option<String>,

    #[arg(long, env = "CONTAINER_LOGS_SINCE")]
    pub logs_since: Option<String>,

    /// long, short or icon
    #[arg(long, env = "CONTAINER_HEALTH_STYLE", default_value = "long")]
    pub state_style: StateStyle,

    #[arg(long, env = "COLUMNS_CONTAINERS")]
    pub columns_containers: Option<String>,
    #[arg(long, env = "COLUMNS_IMAGES")]
    pub columns_images: Option<String>,
    #[arg(long, env = "COLUMNS_VOLUMES")]
    pub columns_volumes: Option<String>,
    #[arg(long, env = "COLUMNS_NETWORKS")]
    pub columns_networks: Option<String>,
    #[arg(long, env = "COLUMNS_STACKS")]
    pub columns_stacks: Option<String>,

    #[arg(long, env = "SORTBY_CONTAINERS")]
    pub sort_containers: Option<String>,
    #[arg(long, env = "SORTBY_IMAGES")]
    pub sort_images: Option<String>,
    #[arg(long, env = "SORTBY_VOLUMES")]
    pub sort_volumes: Option<String>,
    #[arg(long, env = "SORTBY_NETWORKS")]
    pub sort_networks: Option<String>,
    #[arg(long, env = "SORTBY_STACKS")]
    pub sort_stacks: Option<String>,
}

impl Settings {
    /// Reject combinations the server cannot run with.
    ///
    /// # Errors
    /// Returns error if an agent lacks a name or a master address.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.role == Role::Agent {
            ensure!(
                self.agent_name.as_deref().is_some_and(|n| !n.trim().is_empty()),
                "AGENT_NAME is required when running as an agent"
            );
            ensure!(
                self.master_host.is_some(),
                "MASTER_HOST is required when running as an agent"
            );
        }
        ensure!(
            !self.chunked || self.chunk_size > 0,
            "SERVER_CHUNKED_COMMUNICATION_SIZE must be positive"
        );
        Ok(())
    }

    /// Hosts file location.
    ///
    /// # Errors
    /// Returns error if the executable path cannot be resolved.
    pub fn hosts_file(&self) -> anyhow::Result<PathBuf> {
        if let Some(path) = &self.hosts_file {
            return Ok(path.clone());
        }
        let exe = std::env::current_exe().context("Cannot locate the executable")?;
        Ok(exe.with_file_name("docker_hosts"))
    }

    /// Websocket URL of the master.
    #[must_use]
    pub fn master_url(&self) -> Option<String> {
        let host = self.master_host.as_deref()?.trim();
        if host.contains("://") {
            Some(host.to_string())
        } else {
            Some(format!("ws://{host}/ws"))
        }
    }

    #[must_use]
    pub fn uplink_config(&self) -> Option<UplinkConfig> {
        let mut config = UplinkConfig::new(self.master_url()?, self.agent_name.clone()?);
        config.secret = self.master_secret.clone().filter(|s| !s.is_empty());
        Some(config)
    }

    fn listing(&self) -> ListingConfig {
        let per_kind = [
            (ResourceKind::Container, &self.columns_containers, &self.sort_containers),
            (ResourceKind::Image, &self.columns_images, &self.sort_images),
            (ResourceKind::Volume, &self.columns_volumes, &self.sort_volumes),
            (ResourceKind::Network, &self.columns_networks, &self.sort_networks),
            (ResourceKind::Stack, &self.columns_stacks, &self.sort_stacks),
        ];
        let mut columns = HashMap::new();
        let mut sort_by = HashMap::new();
        for (kind, listed, sort) in per_kind {
            if let Some(listed) = listed {
                columns.insert(kind, parse_columns(listed));
            }
            if let Some(sort) = sort.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
                sort_by.insert(kind, sort.to_string());
            }
        }
        ListingConfig {
            columns,
            sort_by,
            state_style: self.state_style,
            chunk_size: self.chunked.then_some(self.chunk_size),
        }
    }

    #[must_use]
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            role: self.role,
            name: self.agent_name.clone(),
            auth: AuthConfig {
                enabled: self.auth_enabled,
                secret: self.auth_secret.clone().filter(|s| !s.is_empty()),
                hash: self.auth_hash.clone().filter(|h| !h.is_empty()),
            },
            display_confirmations: self.display_confirmations,
            listing: self.listing(),
            logs: LogOptions {
                timestamps: false,
                tail: self.logs_tail.clone().filter(|t| !t.is_empty()),
                since: self.logs_since.clone().filter(|s| !s.is_empty()),
            },
            server_shell: self.tty_server_command.clone(),
            container_shell: self.tty_container_command.clone(),
            metrics: MetricsConfig::default(),
            preferences: client_preferences(std::env::vars()),
        }
    }
}
