//! Command input pipe with caller-supplied output sinks.

use std::sync::Mutex as StdMutex;

use bytes::Bytes;
use thiserror::Error;
use tokio::{
    io::{AsyncWriteExt, DuplexStream},
    sync::{Mutex, mpsc},
};

/// Suffix appended to injected commands so their echo can be told apart
/// from genuine output. It is a shell comment, so the shell ignores it.
pub const COMMAND_SENTINEL: &str = "#DOCKWATCH";

/// Where shell output is delivered.
pub type OutputSink = mpsc::UnboundedSender<Bytes>;

const PIPE_CAPACITY: usize = 64 * 1024;

/// TTY error.
#[derive(Debug, Error)]
pub enum TtyError {
    #[error("TTY is closed")]
    Closed,
    #[error("Spawn failed: {0}")]
    Spawn(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Pseudo-terminal pipe.
///
/// Writes to the input end become readable on the stdin end, which the
/// attached process consumes. Output goes to the sinks given at creation.
pub struct Tty {
    input: Mutex<Option<DuplexStream>>,
    stdin: StdMutex<Option<DuplexStream>>,
    stdout: OutputSink,
    stderr: OutputSink,
}

impl Tty {
    /// Create a TTY whose stdout and stderr share one sink.
    #[must_use]
    pub fn new(stdout: OutputSink) -> Self {
        let stderr = stdout.clone();
        Self::with_stderr(stdout, stderr)
    }

    /// Create a TTY with distinct stdout and stderr sinks.
    #[must_use]
    pub fn with_stderr(stdout: OutputSink, stderr: OutputSink) -> Self {
        let (input, stdin) = tokio::io::duplex(PIPE_CAPACITY);
        Self {
            input: Mutex::new(Some(input)),
            stdin: StdMutex::new(Some(stdin)),
            stdout,
            stderr,
        }
    }

    /// Hand the readable end to the consumer. Only the first call gets it.
    pub fn take_stdin(&self) -> Option<DuplexStream> {
        self.stdin.lock().unwrap().take()
    }

    #[must_use]
    pub fn stdout(&self) -> OutputSink {
        self.stdout.clone()
    }

    #[must_use]
    pub fn stderr(&self) -> OutputSink {
        self.stderr.clone()
    }

    /// Write raw bytes to the input end.
    ///
    /// # Errors
    /// Returns error if the TTY was closed or the consumer went away.
    pub async fn write_input(&self, data: &[u8]) -> Result<(), TtyError> {
        let mut guard = self.input.lock().await;
        let input = guard.as_mut().ok_or(TtyError::Closed)?;
        input.write_all(data).await?;
        input.flush().await?;
        Ok(())
    }

    /// Inject one command line.
    ///
    /// # Errors
    /// Returns error if the TTY was closed or the consumer went away.
    pub async fn run_command(&self, command: &str) -> Result<(), TtyError> {
        let line = format!("{command} {COMMAND_SENTINEL}\n");
        self.write_input(line.as_bytes()).await
    }

    /// Send `exit` and close both ends. Safe to call repeatedly.
    pub async fn clear_and_quit(&self) {
        let Some(mut input) = self.input.lock().await.take() else {
            return;
        };
        // Nobody will ever read an unclaimed stdin.
        drop(self.take_stdin());

        if let Err(e) = input.write_all(b"exit\n").await {
            tracing::debug!("TTY consumer already gone: {e}");
        }
        let _ = input.shutdown().await;
    }

    /// Whether `clear_and_quit` has run.
    pub async fn is_closed(&self) -> bool {
        self.input.lock().await.is_none()
    }
}
