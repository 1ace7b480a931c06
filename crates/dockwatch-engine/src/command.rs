//! Command building utilities.

use std::path::PathBuf;

use dockwatch_tty::resolve_executable_path;
use thiserror::Error;

/// Command build error.
#[derive(Debug, Error)]
pub enum CommandBuildError {
    #[error("Base command cannot be parsed: {0}")]
    InvalidBase(String),
    #[error("Base command is empty after parsing")]
    EmptyCommand,
    #[error("Executable not found: {0}")]
    NotFound(String),
}

/// Parsed command parts (program + args).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandParts {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandParts {
    /// Resolve the program to an absolute path.
    ///
    /// # Errors
    /// Returns error if executable not found.
    pub async fn into_resolved(self) -> Result<(PathBuf, Vec<String>), CommandBuildError> {
        let Self { program, args } = self;
        let executable = resolve_executable_path(&program)
            .await
            .ok_or(CommandBuildError::NotFound(program))?;
        Ok((executable, args))
    }

    /// Resolve and turn into a ready-to-spawn process.
    ///
    /// # Errors
    /// Returns error if executable not found.
    pub async fn into_command(self) -> Result<tokio::process::Command, CommandBuildError> {
        let (program, args) = self.into_resolved().await?;
        let mut command = tokio::process::Command::new(program);
        command.args(args).kill_on_drop(true);
        Ok(command)
    }
}

/// Builder for engine client invocations.
///
/// `base` is the client command line (e.g. `docker` or `podman --remote`),
/// `host` an optional daemon address passed with `-H`.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    pub base: String,
    pub host: Option<String>,
}

impl CommandBuilder {
    #[must_use]
    pub fn new<S: Into<String>>(base: S) -> Self {
        Self {
            base: base.into(),
            host: None,
        }
    }

    /// Target a specific daemon.
    #[must_use]
    pub fn host<S: Into<String>>(mut self, host: S) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Build an invocation with `args` appended after the host option.
    ///
    /// # Errors
    /// Returns error if the base command is invalid.
    pub fn build<I>(&self, args: I) -> Result<CommandParts, CommandBuildError>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let mut parts =
            shlex::split(&self.base).ok_or_else(|| CommandBuildError::InvalidBase(self.base.clone()))?;
        if parts.is_empty() {
            return Err(CommandBuildError::EmptyCommand);
        }
        if let Some(host) = &self.host {
            parts.push("-H".to_string());
            parts.push(host.clone());
        }
        parts.extend(args.into_iter().map(Into::into));

        let program = parts.remove(0);
        Ok(CommandParts {
            program,
            args: parts,
        })
    }
}
