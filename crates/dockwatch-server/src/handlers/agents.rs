//! Master side of the agent protocol.

use dockwatch_core::{AGENT_REPLY, Notification, SessionValue};
use serde::Deserialize;

use super::Request;
use crate::{config::Role, server::AGENT_KEY};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AgentResource {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RegisterArgs {
    resource: AgentResource,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ReplyArgs {
    #[serde(default)]
    to: String,
    notification: Notification,
}

pub(super) async fn handle(request: &Request) {
    if request.server.config().role != Role::Master {
        return request.unknown().await;
    }
    match request.command.action.as_str() {
        "agent.register" => register(request).await,
        AGENT_REPLY => reply(request).await,
        _ => request.unknown().await,
    }
}

async fn register(request: &Request) {
    let Some(RegisterArgs { resource }) = request.args().await else {
        return;
    };
    if let Some(current) = request.session.get(AGENT_KEY) {
        let current = current.as_str().unwrap_or_default().to_string();
        tracing::warn!(agent = %resource.name, %current, "Connection is already an agent");
        return request
            .fail(format!(
                "This connection is already registered as agent {current}"
            ))
            .await;
    }

    let server = &request.server;
    if let Err(e) = server
        .agents()
        .register(&resource.name, request.session.clone())
        .await
    {
        tracing::warn!(agent = %resource.name, "Agent registration refused: {e}");
        return request.fail(e).await;
    }

    tracing::info!(agent = %resource.name, session = request.session.id(), "Agent registered");
    request
        .session
        .set(AGENT_KEY, SessionValue::Agent(resource.name));
    request
        .reply(Notification::success("The agent was successfully registered"))
        .await;
    server.broadcast_agents().await;
}

/// Deliver a notification an agent produced to the client that asked for it.
async fn reply(request: &Request) {
    let Some(ReplyArgs { to, notification }) = request.args().await else {
        return;
    };
    if to.is_empty() {
        return;
    }
    match request.server.sessions().get(&to).await {
        Some(client) => {
            if let Err(e) = client.write(notification.to_frame()).await {
                tracing::debug!(session = %to, "Dropped agent reply: {e}");
            }
        }
        None => tracing::debug!(session = %to, "Agent replied to a departed client"),
    }
}
