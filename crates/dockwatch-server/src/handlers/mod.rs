//! Command handlers, routed by action prefix.

mod agents;
mod node;
mod resources;
mod shell;
mod tasks;

use std::{fmt, sync::Arc};

use dockwatch_core::{Command, Notification, Session};
use dockwatch_engine::{Engine, ResourceKind};
use serde::de::DeserializeOwned;

use crate::server::{Recipient, Server};

/// One accepted command and everything a handler needs to serve it.
pub(crate) struct Request {
    pub server: Arc<Server>,
    pub session: Arc<dyn Session>,
    pub recipient: Recipient,
    pub engine: Arc<dyn Engine>,
    pub command: Command,
}

impl Request {
    pub async fn reply(&self, notification: Notification) {
        self.server.notify(&self.recipient, notification).await;
    }

    pub async fn fail(&self, message: impl fmt::Display) {
        self.reply(Notification::error(message)).await;
    }

    /// Decode the arguments, reporting a mismatch to the client.
    pub async fn args<T: DeserializeOwned>(&self) -> Option<T> {
        match self.command.args() {
            Ok(args) => Some(args),
            Err(e) => {
                self.fail(e).await;
                None
            }
        }
    }

    pub async fn unknown(&self) {
        self.fail(format!(
            "This command is unknown, unsupported, or not implemented yet : {}",
            self.command.action
        ))
        .await;
    }
}

pub(crate) async fn dispatch(request: &Request) {
    let action = request.command.action.as_str();
    if let Some(kind) = ResourceKind::from_action(action) {
        resources::handle(request, kind).await;
    } else if action.starts_with("agent") {
        agents::handle(request).await;
    } else {
        node::handle(request).await;
    }
}
