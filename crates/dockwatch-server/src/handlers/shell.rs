//! Interactive shells bridged to the client as `tty` notifications.

use std::sync::Arc;

use bytes::Bytes;
use dockwatch_core::{Notification, SessionValue, TTY_KEY};
use dockwatch_engine::EngineError;
use dockwatch_tty::{Attached, Tty};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;

use super::Request;
use crate::server::{Recipient, Server};

/// What the shell runs in.
pub(super) enum Target {
    Host,
    Container(String),
}

impl Target {
    const fn label(&self) -> &'static str {
        match self {
            Self::Host => "system",
            Self::Container(_) => "container",
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ShellArgs {
    command: String,
}

fn status(status: &str, target: &Target) -> Notification {
    Notification::tty(json!({ "Status": status, "Type": target.label() }))
}

fn output(chunk: &[u8]) -> Notification {
    Notification::tty(json!({ "Output": String::from_utf8_lossy(chunk) }))
}

/// Open a shell for the requesting client, replacing any previous one.
pub(super) async fn open(request: &Request, target: Target) {
    if let Some(previous) = request.session.keys().take(TTY_KEY) {
        previous.close().await;
    }

    let (tx, rx) = mpsc::unbounded_channel::<Bytes>();
    let tty = Arc::new(Tty::new(tx));

    let attached = match &target {
        Target::Host => {
            let command = request.server.config().server_shell().host_command().await;
            dockwatch_tty::attach(&tty, command).map_err(EngineError::from)
        }
        Target::Container(id) => {
            let shell = request.server.config().container_shell();
            request.engine.shell(id, &shell, &tty).await
        }
    };
    let process = match attached {
        Ok(process) => process,
        Err(e) => {
            tracing::warn!(session = request.session.id(), "Failed to open shell: {e}");
            return request.fail(e).await;
        }
    };

    tracing::info!(
        session = request.session.id(),
        pid = process.id(),
        kind = target.label(),
        "Shell started"
    );
    request.session.set(TTY_KEY, SessionValue::Tty(tty));
    request.reply(status("started", &target)).await;

    let server = Arc::clone(&request.server);
    let to = request.recipient.clone();
    tokio::spawn(bridge(server, to, process, rx, target));
}

/// Forward output until the process exits, then report the exit.
async fn bridge(
    server: Arc<Server>,
    to: Recipient,
    process: Attached,
    mut rx: mpsc::UnboundedReceiver<Bytes>,
    target: Target,
) {
    let exited = process.wait();
    tokio::pin!(exited);

    loop {
        tokio::select! {
            Some(chunk) = rx.recv() => server.notify(&to, output(&chunk)).await,
            result = &mut exited => {
                if let Err(e) = result {
                    tracing::debug!("Shell wait failed: {e}");
                }
                break;
            }
        }
    }
    while let Ok(chunk) = rx.try_recv() {
        server.notify(&to, output(&chunk)).await;
    }

    tracing::info!(kind = target.label(), "Shell exited");
    server.notify(&to, status("exited", &target)).await;
}

/// Feed one line to the client's shell; `exit` closes it.
pub(super) async fn command(request: &Request) {
    let Some(ShellArgs { command }) = request.args().await else {
        return;
    };
    let Some(SessionValue::Tty(tty)) = request.session.get(TTY_KEY) else {
        return request.fail("No tty opened").await;
    };

    if command.trim() == "exit" {
        tty.clear_and_quit().await;
        request.session.unset(TTY_KEY);
        return;
    }
    if let Err(e) = tty.run_command(&command).await {
        request.fail(e).await;
    }
}

/// Close the client's shell, if any.
pub(super) async fn close(request: &Request) {
    if let Some(tty) = request.session.keys().take(TTY_KEY) {
        tty.close().await;
    }
}
