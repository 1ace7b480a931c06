//! Attach a child process to a TTY.

use std::process::{ExitStatus, Stdio};

use bytes::Bytes;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::{Child, Command},
    task::JoinHandle,
};

use crate::tty::{OutputSink, Tty, TtyError};

/// A running process wired to a TTY.
pub struct Attached {
    child: Child,
    input_pump: Option<JoinHandle<()>>,
    output_pumps: Vec<JoinHandle<()>>,
}

/// Spawn `command` with its stdin fed from the TTY and its output sent to
/// the TTY's sinks.
///
/// # Errors
/// Returns error if the TTY's stdin was already claimed or spawning fails.
pub fn attach(tty: &Tty, mut command: Command) -> Result<Attached, TtyError> {
    let mut stdin = tty.take_stdin().ok_or(TtyError::Closed)?;

    command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .map_err(|e| TtyError::Spawn(e.to_string()))?;

    let input_pump = child.stdin.take().map(|mut child_stdin| {
        tokio::spawn(async move {
            if let Err(e) = tokio::io::copy(&mut stdin, &mut child_stdin).await {
                tracing::debug!("TTY input pump stopped: {e}");
            }
        })
    });

    let mut output_pumps = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        output_pumps.push(tokio::spawn(pump(stdout, tty.stdout())));
    }
    if let Some(stderr) = child.stderr.take() {
        output_pumps.push(tokio::spawn(pump(stderr, tty.stderr())));
    }

    Ok(Attached {
        child,
        input_pump,
        output_pumps,
    })
}

async fn pump<R: AsyncRead + Unpin>(mut reader: R, sink: OutputSink) {
    let mut buf = vec![0; 4096];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if sink.send(Bytes::copy_from_slice(&buf[..n])).is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::debug!("TTY output pump stopped: {e}");
                break;
            }
        }
    }
}

impl Attached {
    /// OS process id, if still running.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Wait for the process to exit and its output to drain.
    ///
    /// # Errors
    /// Returns error if waiting on the child fails.
    pub async fn wait(mut self) -> Result<ExitStatus, TtyError> {
        let status = self.child.wait().await?;
        for pump in self.output_pumps.drain(..) {
            let _ = pump.await;
        }
        if let Some(input) = self.input_pump.take() {
            input.abort();
        }
        Ok(status)
    }
}
