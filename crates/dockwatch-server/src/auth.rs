//! Shared-secret authentication gate.

use std::sync::Arc;

use dockwatch_core::{Command, Notification, NotificationType, Session};
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::{
    config::{AuthConfig, ServerConfig},
    server::{Recipient, Server},
};

/// Session key recording a successful login.
pub const AUTHENTICATED_KEY: &str = "authenticated";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LoginArgs {
    #[serde(default)]
    password: String,
}

/// Check a password against the configured hash, or the plain secret when
/// no hash is set.
#[must_use]
pub fn verify(config: &AuthConfig, password: &str) -> bool {
    if let Some(hash) = config.hash.as_deref().filter(|h| !h.is_empty()) {
        let digest = hex::encode(Sha256::digest(password.as_bytes()));
        return digest.eq_ignore_ascii_case(hash.trim());
    }
    config.secret.as_deref().is_some_and(|secret| secret == password)
}

/// Greeting sent on connect when authentication is off.
pub(crate) fn spontaneous(config: &ServerConfig) -> Notification {
    Notification::auth(
        NotificationType::Success,
        json!({
            "Authentication": {
                "Spontaneous": true,
                "Message": "You are now authenticated",
            },
            "Preferences": config.preferences,
        }),
    )
}

pub(crate) fn rejected() -> Notification {
    failure("You are not authenticated yet")
}

fn success(config: &ServerConfig) -> Notification {
    Notification::auth(
        NotificationType::Success,
        json!({
            "Authentication": { "Message": "You are now authenticated" },
            "Preferences": config.preferences,
        }),
    )
}

fn failure(message: &str) -> Notification {
    Notification::auth(
        NotificationType::Error,
        json!({ "Authentication": { "Message": message } }),
    )
}

/// Handle an `auth.*` command, or any command of an unauthenticated session.
pub(crate) async fn handle(
    server: &Server,
    session: &Arc<dyn Session>,
    to: &Recipient,
    command: &Command,
) {
    match command.action.as_str() {
        "auth.login" => {
            let config = &server.config().auth;
            let accepted = !config.enabled
                || command
                    .args::<LoginArgs>()
                    .is_ok_and(|args| verify(config, &args.password));
            session.set(AUTHENTICATED_KEY, accepted.into());
            if accepted {
                tracing::info!(session = session.id(), "Client authenticated");
                server.notify(to, success(server.config())).await;
            } else {
                tracing::warn!(session = session.id(), "Rejected login attempt");
                server.notify(to, failure("Invalid password")).await;
            }
        }
        "auth.logout" => {
            tracing::info!(session = session.id(), "Client logged out");
            session.set(AUTHENTICATED_KEY, false.into());
        }
        _ => server.notify(to, rejected()).await,
    }
}
