//! Pseudo-terminal pipe for interactive shells.
//!
//! Provides:
//! - `Tty` - Command input pipe plus output sink
//! - `attach` - Wire a child process to a `Tty`
//! - Shell resolution for the host shell command

pub mod process;
pub mod shell;
pub mod tty;

pub use process::{Attached, attach};
pub use shell::{ShellCommand, resolve_executable_path};
pub use tty::{COMMAND_SENTINEL, OutputSink, Tty, TtyError};
