//! Engine handles per named host.

use std::sync::Arc;

use dockwatch_engine::Engine;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostsError {
    #[error("Invalid hosts entry on line {line}: expected `<name> <address>`")]
    InvalidLine { line: usize },
    #[error("Duplicate host name: {0}")]
    Duplicate(String),
    #[error("No hosts configured")]
    Empty,
    #[error("Unknown host: {0}")]
    Unknown(String),
}

/// One named daemon.
#[derive(Clone)]
pub struct HostEngine {
    pub name: String,
    pub address: String,
    pub engine: Arc<dyn Engine>,
}

/// The engines a server can talk to. In multi-host mode the first host is
/// the default.
#[derive(Clone)]
pub struct Engines {
    default: Arc<dyn Engine>,
    hosts: Vec<HostEngine>,
}

impl Engines {
    /// One local engine.
    #[must_use]
    pub fn single(engine: Arc<dyn Engine>) -> Self {
        Self {
            default: engine,
            hosts: Vec::new(),
        }
    }

    /// Several named engines.
    ///
    /// # Errors
    /// Returns error if `hosts` is empty.
    pub fn multi(hosts: Vec<HostEngine>) -> Result<Self, HostsError> {
        let default = hosts.first().ok_or(HostsError::Empty)?.engine.clone();
        Ok(Self { default, hosts })
    }

    #[must_use]
    pub fn is_multi_host(&self) -> bool {
        !self.hosts.is_empty()
    }

    #[must_use]
    pub fn hosts(&self) -> &[HostEngine] {
        &self.hosts
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.hosts.iter().map(|h| h.name.clone()).collect()
    }

    #[must_use]
    pub fn default_engine(&self) -> Arc<dyn Engine> {
        self.default.clone()
    }

    /// Engine for a command's `Host`, or the default one.
    ///
    /// # Errors
    /// Returns error if a host is named but not configured.
    pub fn resolve(&self, name: Option<&str>) -> Result<Arc<dyn Engine>, HostsError> {
        match name.filter(|n| !n.is_empty()) {
            None => Ok(self.default.clone()),
            Some(name) if !self.is_multi_host() => {
                tracing::debug!(host = name, "Ignoring host outside multi-host mode");
                Ok(self.default.clone())
            }
            Some(name) => self
                .hosts
                .iter()
                .find(|h| h.name == name)
                .map(|h| h.engine.clone())
                .ok_or_else(|| HostsError::Unknown(name.to_string())),
        }
    }
}

/// Parse a hosts file: one `<name> <address>` per line, `#` comments.
///
/// # Errors
/// Returns error on malformed lines, duplicate names, or an empty file.
pub fn parse_hosts(text: &str) -> Result<Vec<(String, String)>, HostsError> {
    let mut hosts: Vec<(String, String)> = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.split_whitespace();
        let (Some(name), Some(address), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(HostsError::InvalidLine { line: index + 1 });
        };
        if hosts.iter().any(|(n, _)| n == name) {
            return Err(HostsError::Duplicate(name.to_string()));
        }
        hosts.push((name.to_string(), address.to_string()));
    }
    if hosts.is_empty() {
        return Err(HostsError::Empty);
    }
    Ok(hosts)
}
