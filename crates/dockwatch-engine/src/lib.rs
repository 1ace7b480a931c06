//! Container engine abstraction.
//!
//! Provides:
//! - `Engine` - Enumerate and act on resources, sample usage, stream logs
//! - `Resource` - Engine resources flattened to presentation rows
//! - `DockerCli` - Engine driving the `docker` command-line client
//! - Command building utilities

pub mod command;
pub mod docker;
pub mod engine;
pub mod resource;

pub use command::{CommandBuildError, CommandBuilder, CommandParts};
pub use docker::DockerCli;
pub use engine::{
    Action, CpuCounters, Engine, EngineError, EngineInfo, LineStream, LogOptions, ProcessTable,
    UsageSample,
};
pub use resource::{Resource, ResourceKind, StateStyle, parse_columns, to_rows};
