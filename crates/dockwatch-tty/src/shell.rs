//! Shell command resolution for host and container shells.

use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
};

use tokio::process::Command;

const FALLBACK_SHELL: &str = "/bin/sh";

/// A shell program and its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    program: String,
    args: Vec<String>,
}

impl ShellCommand {
    /// Split a configured command line with shell quoting rules.
    ///
    /// Returns `None` for blank or unbalanced input.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = shlex::split(line)?.into_iter();
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
        })
    }

    /// The configured command, or the user's interactive shell.
    #[must_use]
    pub fn configured_or_default(configured: Option<&str>) -> Self {
        configured
            .and_then(Self::parse)
            .unwrap_or_else(Self::interactive)
    }

    /// The user's shell from `$SHELL`, falling back to `/bin/sh`.
    #[must_use]
    pub fn interactive() -> Self {
        let program = std::env::var("SHELL")
            .ok()
            .filter(|shell| is_executable_file(Path::new(shell)))
            .unwrap_or_else(|| FALLBACK_SHELL.to_string());
        Self {
            program,
            args: Vec::new(),
        }
    }

    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Program followed by its arguments, for `docker exec`.
    #[must_use]
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }

    /// Whether this is a shell that reads a startup file in login mode.
    #[must_use]
    pub fn is_login_capable(&self) -> bool {
        let name = Path::new(&self.program).file_name();
        name == Some(OsStr::new("bash")) || name == Some(OsStr::new("zsh"))
    }

    /// Build a process for a shell on this host, started in the home
    /// directory. A bare bash or zsh runs as a login shell.
    pub async fn host_command(&self) -> Command {
        let program = resolve_executable_path(&self.program)
            .await
            .unwrap_or_else(|| PathBuf::from(&self.program));

        let mut command = Command::new(program);
        if self.args.is_empty() && self.is_login_capable() {
            command.arg("-l");
        }
        command.args(&self.args).env("TERM", "dumb");
        if let Some(home) = dirs::home_dir() {
            command.current_dir(home);
        }
        command
    }
}

/// Resolve an executable by name.
///
/// Explicit absolute paths are taken as-is when they exist; everything else
/// is looked up on `PATH`.
pub async fn resolve_executable_path(executable: &str) -> Option<PathBuf> {
    if executable.trim().is_empty() {
        return None;
    }

    let path = Path::new(executable);
    if path.is_absolute() && path.is_file() {
        return Some(path.to_path_buf());
    }

    let executable = executable.to_string();
    tokio::task::spawn_blocking(move || which::which(executable))
        .await
        .ok()
        .and_then(Result::ok)
}

fn is_executable_file(path: &Path) -> bool {
    path.is_absolute() && path.is_file()
}
