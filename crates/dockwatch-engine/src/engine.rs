//! Engine trait and the types it exchanges.

use std::fmt;

use async_trait::async_trait;
use dockwatch_tty::{Attached, ShellCommand, Tty, TtyError};
use futures::stream::BoxStream;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::{
    command::CommandBuildError,
    resource::{Resource, ResourceKind},
};

/// Lines produced by a long-running engine call (logs, pulls).
pub type LineStream = BoxStream<'static, Result<String, EngineError>>;

/// Engine error. `Command` carries the engine's own message verbatim.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0}")]
    Command(String),
    #[error("Action {action} is not supported on {kind} resources")]
    Unsupported { kind: ResourceKind, action: String },
    #[error("Unexpected engine output: {0}")]
    Parse(String),
    #[error(transparent)]
    Build(#[from] CommandBuildError),
    #[error(transparent)]
    Tty(#[from] TtyError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Lifecycle action on a single resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Start,
    Stop,
    Restart,
    Pause,
    Unpause,
    Remove { force: bool, volumes: bool },
    /// Remove an image but keep its untagged parents.
    RemoveNoPrune { force: bool },
    Up,
    Down,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
            Self::Pause => "pause",
            Self::Unpause => "unpause",
            Self::Remove { .. } | Self::RemoveNoPrune { .. } => "remove",
            Self::Up => "up",
            Self::Down => "down",
        };
        f.write_str(name)
    }
}

/// Cumulative CPU counters at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuCounters {
    pub total: u64,
    pub system: u64,
}

/// Usage counters for one container: the current and previous CPU reading,
/// memory usage and limit in bytes, network traffic and process count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageSample {
    pub cpu: CpuCounters,
    pub pre_cpu: CpuCounters,
    pub memory_usage: u64,
    pub memory_limit: u64,
    pub network_rx: u64,
    pub network_tx: u64,
    pub pids: u64,
}

impl UsageSample {
    /// CPU usage in percent of the whole machine between the two readings.
    #[must_use]
    pub fn cpu_percent(&self) -> f64 {
        let used = self.cpu.total.saturating_sub(self.pre_cpu.total);
        let system = self.cpu.system.saturating_sub(self.pre_cpu.system);
        if system == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let percent = used as f64 * 100.0 / system as f64;
        percent
    }

    #[must_use]
    pub fn memory_percent(&self) -> f64 {
        if self.memory_limit == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let percent = self.memory_usage as f64 * 100.0 / self.memory_limit as f64;
        percent
    }
}

/// Processes running in a container, as `ps` columns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProcessTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Log streaming options.
#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    pub timestamps: bool,
    pub tail: Option<String>,
    pub since: Option<String>,
}

/// Engine identity for overviews.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineInfo {
    pub version: String,
    pub host: String,
    /// Processors available to the daemon, 0 when unknown.
    pub cpus: u64,
    /// Memory of the daemon's machine in bytes, 0 when unknown.
    pub memory: u64,
}

/// A container engine the console operates on.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Enumerate resources of a kind.
    async fn list(&self, kind: ResourceKind) -> Result<Vec<Resource>, EngineError>;

    /// Run a lifecycle action on one resource.
    async fn act(&self, kind: ResourceKind, id: &str, action: Action) -> Result<(), EngineError>;

    /// Remove every unused resource of a kind.
    async fn prune(&self, kind: ResourceKind) -> Result<(), EngineError>;

    /// Full engine description of one resource.
    async fn inspect(&self, kind: ResourceKind, id: &str) -> Result<Value, EngineError>;

    /// Container lifecycle state (`running`, `exited`, ...).
    async fn state(&self, id: &str) -> Result<String, EngineError>;

    /// Sample a container's usage counters.
    async fn stats(&self, id: &str) -> Result<UsageSample, EngineError>;

    /// Follow the log output of a container or of every service of a stack.
    async fn logs(
        &self,
        kind: ResourceKind,
        id: &str,
        options: &LogOptions,
    ) -> Result<LineStream, EngineError>;

    async fn rename(&self, id: &str, name: &str) -> Result<(), EngineError>;

    /// Processes running inside a container.
    async fn top(&self, id: &str) -> Result<ProcessTable, EngineError>;

    /// Pull an image, yielding progress lines.
    async fn pull(&self, image: &str) -> Result<LineStream, EngineError>;

    /// Start a shell inside a container, attached to `tty`.
    async fn shell(
        &self,
        id: &str,
        shell: &ShellCommand,
        tty: &Tty,
    ) -> Result<Attached, EngineError>;

    async fn info(&self) -> Result<EngineInfo, EngineError>;
}
