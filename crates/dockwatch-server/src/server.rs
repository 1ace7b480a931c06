//! Command dispatcher.
//!
//! Every inbound frame of a session goes through [`Server::handle`], one at a
//! time per session. Handlers that outlive a frame (long tasks, shells, log
//! streams, metrics pollers) run in background tasks and reply through a
//! [`Recipient`] captured when the command arrived.

use std::sync::Arc;

use dockwatch_core::{
    AGENT_REPLY, Command, INITIATOR_KEY, Notification, STREAM_KEY, Session,
};
use serde_json::json;

use crate::{
    auth::{self, AUTHENTICATED_KEY},
    config::{Role, ServerConfig},
    handlers::{self, Request},
    hosts::Engines,
    metrics::MetricsRegistry,
    registry::{AgentRegistry, SessionRegistry},
};

/// Key naming the agent that owns a master-side session.
pub const AGENT_KEY: &str = "agent";

/// Where the notifications of one command go.
///
/// On an agent the session is the uplink and the initiator names the end
/// client; notifications then travel wrapped in `agent.reply`.
#[derive(Clone)]
pub struct Recipient {
    session: Arc<dyn Session>,
    initiator: Option<String>,
}

impl Recipient {
    /// Capture the session and its current initiator.
    #[must_use]
    pub fn of(session: &Arc<dyn Session>) -> Self {
        let initiator = session
            .get(INITIATOR_KEY)
            .and_then(|v| v.as_str().map(String::from));
        Self {
            session: Arc::clone(session),
            initiator,
        }
    }

    #[must_use]
    pub fn session(&self) -> &Arc<dyn Session> {
        &self.session
    }

    #[must_use]
    pub fn initiator(&self) -> Option<&str> {
        self.initiator.as_deref()
    }
}

/// One console node: a master serving browsers or an agent serving a master.
pub struct Server {
    config: ServerConfig,
    engines: Engines,
    sessions: SessionRegistry,
    agents: AgentRegistry,
    metrics: Arc<MetricsRegistry>,
}

impl Server {
    #[must_use]
    pub fn new(config: ServerConfig, engines: Engines) -> Arc<Self> {
        let metrics = Arc::new(MetricsRegistry::new(config.metrics.clone()));
        Arc::new(Self {
            config,
            engines,
            sessions: SessionRegistry::default(),
            agents: AgentRegistry::default(),
            metrics,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    #[must_use]
    pub const fn engines(&self) -> &Engines {
        &self.engines
    }

    #[must_use]
    pub const fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    #[must_use]
    pub const fn agents(&self) -> &AgentRegistry {
        &self.agents
    }

    #[must_use]
    pub const fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// Send a notification to a recipient.
    pub async fn notify(&self, to: &Recipient, mut notification: Notification) {
        notification.apply_display(self.config.display_confirmations);
        let frame = match (self.config.role, to.initiator()) {
            (Role::Agent, Some(initiator)) => notification.into_reply(initiator).to_frame(),
            _ => notification.to_frame(),
        };
        if let Err(e) = to.session.write(frame).await {
            tracing::debug!(session = to.session.id(), "Dropped notification: {e}");
        }
    }

    /// Send a notification to every connected session.
    pub async fn broadcast(&self, mut notification: Notification) {
        notification.apply_display(self.config.display_confirmations);
        let frame = notification.to_frame();
        for session in self.sessions.all().await {
            if let Err(e) = session.write(frame.clone()).await {
                tracing::debug!(session = session.id(), "Dropped broadcast: {e}");
            }
        }
    }

    /// Tell every client which agents are connected.
    pub async fn broadcast_agents(&self) {
        let names = self.agents.names().await;
        self.broadcast(Notification::data(json!({ "Agents": names })))
            .await;
    }

    /// Register a new client connection and greet it.
    pub async fn connect(self: &Arc<Self>, session: Arc<dyn Session>) {
        tracing::info!(session = session.id(), "Client connected");
        self.sessions.insert(Arc::clone(&session)).await;
        self.handle(&session, None).await;
    }

    /// Forget a client connection and release what it held.
    pub async fn disconnect(&self, session: &Arc<dyn Session>) {
        tracing::info!(session = session.id(), "Client disconnected");
        self.sessions.remove(session.id()).await;
        session.release_all().await;

        let agent = session
            .get(AGENT_KEY)
            .and_then(|v| v.as_str().map(String::from));
        if let Some(name) = agent {
            session.unset(AGENT_KEY);
            if self.agents.remove(&name).await {
                tracing::info!(agent = %name, "Agent unregistered");
                self.broadcast_agents().await;
            }
        }
    }

    /// Handle one inbound frame. `None` marks a fresh connection.
    pub async fn handle(self: &Arc<Self>, session: &Arc<dyn Session>, frame: Option<&[u8]>) {
        if !self.config.auth.enabled {
            session.set(AUTHENTICATED_KEY, true.into());
        }

        let Some(frame) = frame else {
            if !self.config.auth.enabled {
                self.notify(&Recipient::of(session), auth::spontaneous(&self.config))
                    .await;
            }
            return;
        };

        let mut command = match Command::decode(frame) {
            Ok(command) => command,
            Err(e) => {
                tracing::warn!(session = session.id(), "Invalid command: {e}");
                self.notify(&Recipient::of(session), Notification::error(e))
                    .await;
                return;
            }
        };
        // Notifications echoed back at us decode to an empty action.
        if command.action.is_empty() {
            return;
        }

        if self.config.role == Role::Agent {
            if let Some(initiator) = command.initiator.take().filter(|i| !i.is_empty()) {
                session.set(INITIATOR_KEY, initiator.into());
                if !self.config.auth.enabled {
                    session.set(AUTHENTICATED_KEY, true.into());
                }
            }
        }

        let recipient = Recipient::of(session);
        let is_auth = command.action.starts_with("auth");
        let authenticated = session
            .get(AUTHENTICATED_KEY)
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        tracing::debug!(
            session = session.id(),
            action = %command.action,
            authenticated,
            "Dispatching command"
        );

        if !authenticated && !is_auth {
            self.notify(&recipient, auth::rejected()).await;
            return;
        }

        if let Some(stream) = session.keys().take(STREAM_KEY) {
            stream.close().await;
        }

        if self.config.role == Role::Master {
            if let Some(agent) = command.target_agent().map(String::from) {
                self.forward(session, &recipient, &agent, command).await;
                return;
            }
        }

        if is_auth {
            auth::handle(self, session, &recipient, &command).await;
            return;
        }

        if self.config.role == Role::Master && command.action != AGENT_REPLY {
            self.notify(&recipient, Notification::loading()).await;
        }

        let engine = match self.engines.resolve(command.host.as_deref()) {
            Ok(engine) => engine,
            Err(e) => {
                self.notify(&recipient, Notification::error(e)).await;
                return;
            }
        };

        let request = Request {
            server: Arc::clone(self),
            session: Arc::clone(session),
            recipient,
            engine,
            command,
        };
        handlers::dispatch(&request).await;
    }

    /// Hand a command to a registered agent on behalf of `session`.
    async fn forward(
        &self,
        session: &Arc<dyn Session>,
        recipient: &Recipient,
        agent: &str,
        mut command: Command,
    ) {
        let Some(target) = self.agents.find(agent).await else {
            self.notify(
                recipient,
                Notification::error(format!("Agent {agent} is not connected")),
            )
            .await;
            return;
        };

        let is_auth = command.action.starts_with("auth");
        command.agent = None;
        command.initiator = Some(session.id().to_string());
        tracing::debug!(agent, action = %command.action, "Forwarding command");

        if let Err(e) = target.write(command.to_frame()).await {
            self.notify(recipient, Notification::error(e)).await;
            return;
        }
        if !is_auth {
            self.notify(recipient, Notification::loading()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeMap, time::Duration};

    use dockwatch_core::{METRICS_KEY, SessionValue, StreamHandle, TTY_KEY};
    use dockwatch_engine::{Action, ResourceKind};
    use serde_json::{Value, json};

    use super::*;
    use crate::{
        config::AuthConfig,
        hosts::HostEngine,
        test_support::{Client, FakeEngine, resource},
    };

    fn server_with(config: ServerConfig, engine: FakeEngine) -> (Arc<Server>, Arc<FakeEngine>) {
        let engine = Arc::new(engine);
        let server = Server::new(config, Engines::single(engine.clone()));
        (server, engine)
    }

    fn open_server() -> (Arc<Server>, Arc<FakeEngine>) {
        server_with(
            ServerConfig::default(),
            FakeEngine::with_containers(&[
                ("c1", "web", "exited"),
                ("c2", "api", "running"),
                ("c3", "db", "running"),
            ]),
        )
    }

    fn guarded_config(role: Role) -> ServerConfig {
        ServerConfig {
            role,
            auth: AuthConfig {
                enabled: true,
                secret: Some("s3cret".into()),
                hash: None,
            },
            ..ServerConfig::default()
        }
    }

    fn message(frame: &Value) -> &str {
        frame["Content"]["Message"]
            .as_str()
            .or_else(|| frame["Content"]["Authentication"]["Message"].as_str())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_spontaneous_authentication_when_auth_is_off() {
        let (server, _) = open_server();
        let mut client = Client::connect(&server).await;

        let greeting = client.next().await;
        assert_eq!(greeting["Category"], "auth");
        assert_eq!(greeting["Type"], "success");
        assert_eq!(greeting["Content"]["Authentication"]["Spontaneous"], true);
    }

    #[tokio::test]
    async fn test_auth_gate() {
        let (server, _) = server_with(guarded_config(Role::Master), FakeEngine::default());
        let mut client = Client::connect(&server).await;
        assert!(client.drain().is_empty());

        client.send(&server, json!({ "Action": "containers.list" })).await;
        let rejected = client.next().await;
        assert_eq!(rejected["Category"], "auth");
        assert_eq!(rejected["Type"], "error");
        assert_eq!(message(&rejected), "You are not authenticated yet");

        client
            .send(&server, json!({ "Action": "auth.login", "Args": { "Password": "nope" } }))
            .await;
        assert_eq!(message(&client.next().await), "Invalid password");

        client
            .send(&server, json!({ "Action": "auth.login", "Args": { "Password": "s3cret" } }))
            .await;
        let accepted = client.next().await;
        assert_eq!(accepted["Category"], "auth");
        assert_eq!(accepted["Type"], "success");

        client.send(&server, json!({ "Action": "containers.list" })).await;
        assert_eq!(client.next().await["Category"], "loading");
        assert_eq!(client.next().await["Category"], "refresh");

        client.send(&server, json!({ "Action": "auth.logout" })).await;
        client.send(&server, json!({ "Action": "containers.list" })).await;
        assert_eq!(message(&client.next().await), "You are not authenticated yet");
    }

    #[tokio::test]
    async fn test_login_against_hash_hands_out_preferences() {
        let config = ServerConfig {
            auth: AuthConfig {
                enabled: true,
                secret: None,
                // sha256("admin")
                hash: Some(
                    "8c6976e5b5410415bde908bd4dee15dfb167a9c873fc4bb8a81f6f2ab448a918".into(),
                ),
            },
            preferences: BTreeMap::from([("THEME".to_string(), "dawn".to_string())]),
            ..ServerConfig::default()
        };
        let (server, _) = server_with(config, FakeEngine::default());
        let mut client = Client::connect(&server).await;

        client
            .send(&server, json!({ "Action": "auth.login", "Args": { "Password": "admin2" } }))
            .await;
        let refused = client.next().await;
        assert_eq!(refused["Type"], "error");
        assert_eq!(message(&refused), "Invalid password");

        client
            .send(&server, json!({ "Action": "auth.login", "Args": { "Password": "admin" } }))
            .await;
        let accepted = client.next().await;
        assert_eq!(accepted["Type"], "success");
        assert_eq!(accepted["Content"]["Preferences"], json!({ "THEME": "dawn" }));

        client.send(&server, json!({ "Action": "containers.list" })).await;
        assert_eq!(client.next().await["Category"], "loading");
    }

    #[tokio::test]
    async fn test_rejected_command_keeps_log_stream() {
        let (server, _) = server_with(guarded_config(Role::Master), FakeEngine::default());
        let mut client = Client::connect(&server).await;
        let task = tokio::spawn(std::future::pending::<()>());
        client
            .session
            .set(STREAM_KEY, SessionValue::Stream(StreamHandle::new(&task)));

        client.send(&server, json!({ "Action": "containers.list" })).await;
        assert_eq!(message(&client.next().await), "You are not authenticated yet");
        assert!(matches!(
            client.session.get(STREAM_KEY),
            Some(SessionValue::Stream(_))
        ));
        assert!(!task.is_finished());

        client
            .send(&server, json!({ "Action": "auth.login", "Args": { "Password": "s3cret" } }))
            .await;
        assert_eq!(client.next().await["Type"], "success");
        assert!(client.session.get(STREAM_KEY).is_none());
        assert!(task.await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_containers_list_puts_running_first() {
        let (server, _) = open_server();
        let mut client = Client::connect(&server).await;
        client.next_of("auth").await;

        client.send(&server, json!({ "Action": "containers.list" })).await;
        assert_eq!(client.next().await["Category"], "loading");
        let refresh = client.next().await;
        assert_eq!(refresh["Category"], "refresh");

        let tab = &refresh["Content"]["Tab"];
        assert_eq!(tab["Key"], "containers");
        let names: Vec<&str> = tab["Rows"]
            .as_array()
            .unwrap()
            .iter()
            .map(|row| row["Name"].as_str().unwrap())
            .collect();
        assert_eq!(names, ["api", "db", "web"]);
    }

    #[tokio::test]
    async fn test_chunked_listing() {
        let mut config = ServerConfig::default();
        config.listing.chunk_size = Some(2);
        let (server, _) = server_with(
            config,
            FakeEngine::with_containers(&[
                ("c1", "a", "running"),
                ("c2", "b", "running"),
                ("c3", "c", "exited"),
            ]),
        );
        let mut client = Client::connect(&server).await;
        client.next_of("auth").await;

        client.send(&server, json!({ "Action": "containers.list" })).await;
        let first = client.next_of("refresh-chunk").await;
        let second = client.next_of("refresh-chunk").await;
        assert_eq!(first["Content"]["ChunkIndex"], 1);
        assert_eq!(first["Content"]["Tab"]["Rows"].as_array().unwrap().len(), 2);
        assert_eq!(second["Content"]["ChunkIndex"], 2);
        assert_eq!(second["Content"]["Tab"]["Rows"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_undecodable_and_unknown_commands() {
        let (server, _) = open_server();
        let mut client = Client::connect(&server).await;
        client.next_of("auth").await;

        server.handle(&client.session, Some(b"{not json")).await;
        let error = client.next().await;
        assert_eq!(error["Category"], "report");
        assert_eq!(error["Type"], "error");

        client.send(&server, json!({ "Category": "loading" })).await;
        assert!(client.drain().is_empty());

        client.send(&server, json!({ "Action": "teleport" })).await;
        let error = client.next_of("report").await;
        assert_eq!(
            message(&error),
            "This command is unknown, unsupported, or not implemented yet : teleport"
        );
    }

    #[tokio::test]
    async fn test_init_lists_non_empty_tabs() {
        let (server, _) = open_server();
        let mut client = Client::connect(&server).await;
        client.next_of("auth").await;

        client.send(&server, json!({ "Action": "init" })).await;
        let init = client.next_of("init").await;
        let tabs = init["Content"]["Tabs"].as_array().unwrap();
        assert_eq!(tabs.len(), 1);
        assert_eq!(tabs[0]["Key"], "containers");
        assert_eq!(init["Content"]["Agents"], json!([]));
    }

    #[tokio::test]
    async fn test_running_container_removal_asks_for_force() {
        let (server, engine) = open_server();
        let mut client = Client::connect(&server).await;
        client.next_of("auth").await;

        client
            .send(
                &server,
                json!({ "Action": "container.remove.default", "Args": { "Resource": { "ID": "c2" } } }),
            )
            .await;
        let prompt = client.next_of("prompt").await;
        assert_eq!(prompt["Content"]["Command"], "container.remove.force");
        assert!(engine.actions().is_empty());

        client
            .send(
                &server,
                json!({ "Action": "container.remove.force", "Args": { "Resource": { "ID": "c2", "Name": "api" } } }),
            )
            .await;
        let done = client.next_of("report").await;
        assert_eq!(done["Type"], "success");
        assert_eq!(done["Follow"], "containers.list");
        assert_eq!(
            engine.actions(),
            [(
                ResourceKind::Container,
                "c2".to_string(),
                Action::Remove {
                    force: true,
                    volumes: false
                }
            )]
        );
    }

    #[tokio::test]
    async fn test_pause_toggles_on_current_state() {
        let (server, engine) = open_server();
        let mut client = Client::connect(&server).await;
        client.next_of("auth").await;

        let pause = json!({ "Action": "container.pause", "Args": { "Resource": { "ID": "c2" } } });
        client.send(&server, pause.clone()).await;
        engine.set_state("c2", "paused");
        client.send(&server, pause).await;

        let actions: Vec<Action> = engine.actions().into_iter().map(|(_, _, a)| a).collect();
        assert_eq!(actions, [Action::Pause, Action::Unpause]);
    }

    #[tokio::test]
    async fn test_stopping_all_containers_reports_each_step() {
        let (server, engine) = open_server();
        let mut client = Client::connect(&server).await;
        client.next_of("auth").await;

        client.send(&server, json!({ "Action": "containers.stop" })).await;
        let mut steps = Vec::new();
        let summary = loop {
            let frame = client.next_of("report").await;
            if frame["Type"] == "success" {
                break frame;
            }
            steps.push(message(&frame).to_string());
        };

        assert_eq!(steps, ["Container api was stopped", "Container db was stopped"]);
        assert_eq!(message(&summary), "All the containers were stopped");
        assert_eq!(summary["Follow"], "containers.list");
        assert_eq!(engine.actions().len(), 2);
    }

    #[tokio::test]
    async fn test_image_pull_progress() {
        let (server, _) = open_server();
        let mut client = Client::connect(&server).await;
        client.next_of("auth").await;

        client
            .send(&server, json!({ "Action": "image.pull", "Args": { "Image": "nginx:1.27" } }))
            .await;
        let first = client.next_of("report").await;
        assert_eq!(message(&first), "Pulling nginx:1.27: nginx:1.27: Pulling from library");
        let summary = loop {
            let frame = client.next_of("report").await;
            if frame["Type"] == "success" {
                break frame;
            }
        };
        assert_eq!(message(&summary), "The image nginx:1.27 was successfully pulled");
        assert_eq!(summary["Follow"], "images.list");
    }

    #[tokio::test]
    async fn test_next_command_closes_log_stream() {
        let engine = FakeEngine {
            log_lines: vec!["booting".into(), "ready".into()],
            ..FakeEngine::with_containers(&[("c1", "web", "running")])
        };
        let (server, _) = server_with(ServerConfig::default(), engine);
        let mut client = Client::connect(&server).await;
        client.next_of("auth").await;

        client
            .send(
                &server,
                json!({ "Action": "container.inspect.logs", "Args": { "Resource": { "ID": "c1" }, "showTimestamps": true } }),
            )
            .await;
        assert_eq!(client.next_of("refresh").await["Content"], json!({}));
        let line = client.next_of("refresh").await;
        assert_eq!(
            line["Content"]["Inspector"]["Content"][0],
            json!({ "Type": "lines", "Content": ["booting"] })
        );

        let Some(SessionValue::Stream(stream)) = client.session.get(STREAM_KEY) else {
            panic!("log stream not recorded");
        };
        client.send(&server, json!({ "Action": "containers.list" })).await;
        assert!(client.session.get(STREAM_KEY).is_none());
        for _ in 0..50 {
            if stream.is_closed() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("log stream still running");
    }

    #[tokio::test]
    async fn test_metrics_report_for_stopped_container() {
        let (server, _) = open_server();
        let mut client = Client::connect(&server).await;
        client.next_of("auth").await;

        client
            .send(
                &server,
                json!({ "Action": "container.metrics", "Args": { "Resource": { "ID": "c1" }, "From": 0 } }),
            )
            .await;
        let report = client.next_of("report").await;
        assert_eq!(report["Type"], "info");
        assert_eq!(
            message(&report),
            "Container state is not running, paused or restarting"
        );

        client
            .send(
                &server,
                json!({ "Action": "container.metrics", "Args": { "Resource": { "ID": "c2" }, "From": 0 } }),
            )
            .await;
        let data = client.next_of("refresh").await;
        assert_eq!(data["Content"]["Metrics"]["Count"], 0);
        assert!(matches!(
            client.session.get(METRICS_KEY),
            Some(SessionValue::Metrics(_))
        ));

        server.disconnect(&client.session).await;
        assert!(client.session.get(METRICS_KEY).is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_container_shell_round_trip() {
        let (server, _) = open_server();
        let mut client = Client::connect(&server).await;
        client.next_of("auth").await;

        client
            .send(&server, json!({ "Action": "container.shell", "Args": { "Resource": { "ID": "c2" } } }))
            .await;
        let started = client.next_of("tty").await;
        assert_eq!(started["Content"], json!({ "Status": "started", "Type": "container" }));

        client
            .send(&server, json!({ "Action": "shell.command", "Args": { "Command": "echo hi" } }))
            .await;
        let output = client.next_of("tty").await;
        assert_eq!(output["Content"]["Output"], "hi\n");

        client
            .send(&server, json!({ "Action": "shell.command", "Args": { "Command": "exit" } }))
            .await;
        let exited = client.next_of("tty").await;
        assert_eq!(exited["Content"], json!({ "Status": "exited", "Type": "container" }));
        assert!(client.session.get(TTY_KEY).is_none());
    }

    #[tokio::test]
    async fn test_shell_command_without_tty() {
        let (server, _) = open_server();
        let mut client = Client::connect(&server).await;
        client.next_of("auth").await;

        client
            .send(&server, json!({ "Action": "shell.command", "Args": { "Command": "ls" } }))
            .await;
        assert_eq!(message(&client.next_of("report").await), "No tty opened");
    }

    async fn reply_of(client: &mut Client, server: &Arc<Server>, command: Value) -> Value {
        client.send(server, command).await;
        loop {
            let frame = client.next().await;
            if frame["Category"] == "refresh" || frame["Category"] == "report" {
                return frame;
            }
        }
    }

    #[tokio::test]
    async fn test_remove_all_containers() {
        let (server, engine) = open_server();
        let mut client = Client::connect(&server).await;
        client.next_of("auth").await;

        client.send(&server, json!({ "Action": "containers.remove" })).await;
        let summary = loop {
            let frame = client.next_of("report").await;
            if frame["Type"] == "success" {
                break frame;
            }
        };
        assert_eq!(message(&summary), "All the containers were removed");
        assert_eq!(summary["Follow"], "containers.list");

        let removed = engine.actions();
        assert_eq!(removed.len(), 3);
        assert!(removed.iter().all(|(_, _, action)| *action
            == Action::Remove {
                force: true,
                volumes: false
            }));
    }

    #[tokio::test]
    async fn test_container_rename() {
        let (server, engine) = open_server();
        let mut client = Client::connect(&server).await;
        client.next_of("auth").await;

        let done = reply_of(
            &mut client,
            &server,
            json!({ "Action": "container.rename", "Args": { "Resource": { "ID": "c1" }, "Name": "frontend" } }),
        )
        .await;
        assert_eq!(done["Type"], "success");
        assert_eq!(message(&done), "Your container was successfully renamed");
        assert_eq!(done["Follow"], "containers.list");
        assert_eq!(
            *engine.renames.lock().unwrap(),
            [("c1".to_string(), "frontend".to_string())]
        );

        let missing = reply_of(
            &mut client,
            &server,
            json!({ "Action": "container.rename", "Args": { "Resource": { "ID": "c1" } } }),
        )
        .await;
        assert_eq!(missing["Type"], "error");
        assert_eq!(engine.renames.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_container_inspector() {
        let (server, _) = open_server();
        let mut client = Client::connect(&server).await;
        client.next_of("auth").await;
        let inspect = |action: &str, id: &str| {
            json!({ "Action": action, "Args": { "Resource": { "ID": id } } })
        };

        let tabs = reply_of(&mut client, &server, inspect("container.inspect.tabs", "c2")).await;
        assert_eq!(
            tabs["Content"]["Inspector"]["Tabs"],
            json!(["Logs", "Stats", "Env", "Config", "Top"])
        );

        let env = reply_of(&mut client, &server, inspect("container.inspect.env", "c2")).await;
        assert_eq!(
            env["Content"]["Inspector"]["Content"],
            json!([{ "Type": "rows", "Content": [
                { "PATH": "/usr/bin", "_representation": ["PATH:", "/usr/bin"] },
                { "GREETING": "a=b", "_representation": ["GREETING:", "a=b"] },
                { "EMPTY": "", "_representation": ["EMPTY:", ""] },
            ] }])
        );

        let top = reply_of(&mut client, &server, inspect("container.inspect.top", "c2")).await;
        assert_eq!(
            top["Content"]["Inspector"]["Content"][0],
            json!({ "Type": "table", "Content": {
                "Headers": ["PID", "CMD"],
                "Rows": [["1", "nginx: master process"]],
            } })
        );

        let stopped = reply_of(&mut client, &server, inspect("container.inspect.top", "c1")).await;
        assert_eq!(
            stopped["Content"]["Inspector"]["Content"][0]["Content"]["Rows"],
            json!([["The container isn't running"]])
        );

        let stats = reply_of(&mut client, &server, inspect("container.inspect.stats", "c2")).await;
        let rows = &stats["Content"]["Inspector"]["Content"][0]["Content"];
        assert_eq!(rows[0]["_representation"], json!(["CPU:", "50.00%"]));
        assert_eq!(rows[1]["_representation"], json!(["Memory:", "50.00%"]));
        assert_eq!(rows[2]["Network"], "1.0 kB / 2.0 kB (RX/TX)");
        assert_eq!(rows[3]["PIDs"], 3);

        let idle = reply_of(&mut client, &server, inspect("container.inspect.stats", "c1")).await;
        assert_eq!(
            idle["Content"]["Inspector"]["Content"][0]["Content"]["Headers"],
            json!(["Notice"])
        );
    }

    #[tokio::test]
    async fn test_image_removal_can_keep_parents() {
        let (server, engine) = open_server();
        let mut client = Client::connect(&server).await;
        client.next_of("auth").await;

        let done = reply_of(
            &mut client,
            &server,
            json!({ "Action": "image.remove.force.unprune", "Args": { "Resource": { "ID": "i1", "Name": "redis" } } }),
        )
        .await;
        assert_eq!(done["Type"], "success");
        assert_eq!(message(&done), "The image redis was successfully removed");
        assert_eq!(done["Follow"], "images.list");
        assert_eq!(
            engine.actions(),
            [(
                ResourceKind::Image,
                "i1".to_string(),
                Action::RemoveNoPrune { force: true }
            )]
        );
    }

    #[tokio::test]
    async fn test_stack_logs_and_services() {
        let engine = FakeEngine {
            log_lines: vec!["web-1  | ready".into()],
            ..FakeEngine::default()
        };
        engine.resources.lock().unwrap().insert(
            ResourceKind::Container,
            vec![
                resource(
                    ResourceKind::Container,
                    json!({ "ID": "c1", "Name": "blog-web-1", "State": "running",
                            "Labels": "com.docker.compose.project=blog,com.docker.compose.service=web" }),
                ),
                resource(
                    ResourceKind::Container,
                    json!({ "ID": "c2", "Name": "shop-db-1", "State": "running",
                            "Labels": "com.docker.compose.project=shop" }),
                ),
            ],
        );
        let (server, engine) = server_with(ServerConfig::default(), engine);
        let mut client = Client::connect(&server).await;
        client.next_of("auth").await;

        let services = reply_of(
            &mut client,
            &server,
            json!({ "Action": "stack.inspect.services", "Args": { "Resource": { "Name": "blog" } } }),
        )
        .await;
        let rows = services["Content"]["Inspector"]["Content"][0]["Content"]
            .as_array()
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["Name"], "blog-web-1");

        client
            .send(
                &server,
                json!({ "Action": "stack.inspect.logs", "Args": { "Resource": { "Name": "blog" }, "showTimestamps": false } }),
            )
            .await;
        assert_eq!(client.next_of("refresh").await["Content"], json!({}));
        let line = client.next_of("refresh").await;
        assert_eq!(
            line["Content"]["Inspector"]["Content"][0]["Content"],
            json!(["web-1  | ready"])
        );
        assert_eq!(*engine.log_kinds.lock().unwrap(), [ResourceKind::Stack]);
        assert!(client.session.get(STREAM_KEY).is_some());
    }

    #[tokio::test]
    async fn test_overview_describes_machine() {
        let (server, _) = open_server();
        let mut client = Client::connect(&server).await;
        client.next_of("auth").await;

        let overview = reply_of(&mut client, &server, json!({ "Action": "overview" })).await;
        let instance = &overview["Content"]["Overview"]["Instances"][0];
        assert_eq!(instance["Server"]["Name"], "Master");
        assert_eq!(instance["Server"]["AmountRAM"], 8_u64 * 1024 * 1024 * 1024);
        assert!(instance["Server"]["CountCPU"].as_u64().is_some_and(|n| n > 0));
        assert_eq!(instance["Docker"]["Version"], "27.0.1");
        assert_eq!(instance["Resources"]["Containers"]["Count"], 3);
    }

    #[tokio::test]
    async fn test_multi_host_overview_describes_local_socket_only() {
        let host = |name: &str, address: &str| HostEngine {
            name: name.into(),
            address: address.into(),
            engine: Arc::new(FakeEngine::default()),
        };
        let engines = Engines::multi(vec![
            host("local", "unix:///var/run/docker.sock"),
            host("remote", "tcp://10.0.0.2:2375"),
        ])
        .unwrap();
        let server = Server::new(ServerConfig::default(), engines);
        let mut client = Client::connect(&server).await;
        client.next_of("auth").await;

        let overview = reply_of(&mut client, &server, json!({ "Action": "overview" })).await;
        let instances = &overview["Content"]["Overview"]["Instances"];
        assert_eq!(instances[0]["Server"]["Name"], "local");
        assert_eq!(instances[0]["Server"]["AmountRAM"], 8_u64 * 1024 * 1024 * 1024);
        assert_eq!(instances[1]["Server"]["Host"], "tcp://10.0.0.2:2375");
        assert!(instances[1]["Server"].get("AmountRAM").is_none());
        assert!(instances[1]["Server"].get("CountCPU").is_none());
    }

    async fn register(server: &Arc<Server>, name: &str) -> Client {
        let mut agent = Client::connect(server).await;
        agent.next_of("auth").await;
        agent
            .send(
                server,
                json!({ "Action": "agent.register", "Args": { "Resource": { "Name": name } } }),
            )
            .await;
        agent
    }

    #[tokio::test]
    async fn test_agent_registration_and_forwarding() {
        let (server, _) = open_server();
        let mut agent = register(&server, "edge1").await;
        let registered = agent.next_of("report").await;
        assert_eq!(registered["Type"], "success");
        assert_eq!(message(&registered), "The agent was successfully registered");

        let mut browser = Client::connect(&server).await;
        browser.next_of("auth").await;
        browser
            .send(&server, json!({ "Action": "containers.list", "Agent": "edge1" }))
            .await;
        assert_eq!(browser.next().await["Category"], "loading");

        let forwarded = agent.next_command().await;
        assert_eq!(forwarded["Action"], "containers.list");
        assert_eq!(forwarded["Initiator"], browser.session.id());
        assert!(forwarded.get("Agent").is_none());

        browser
            .send(&server, json!({ "Action": "containers.list", "Agent": "ghost" }))
            .await;
        assert_eq!(message(&browser.next_of("report").await), "Agent ghost is not connected");
    }

    #[tokio::test]
    async fn test_agent_names_are_unique() {
        let (server, _) = open_server();
        let mut first = register(&server, "edge1").await;
        assert_eq!(first.next_of("report").await["Type"], "success");

        let mut second = register(&server, "edge1").await;
        let refused = second.next_of("report").await;
        assert_eq!(refused["Type"], "error");
        assert_eq!(
            message(&refused),
            "This name is already taken. Please use another unique name for your agent"
        );
        assert_eq!(server.agents().names().await, ["edge1"]);
    }

    #[tokio::test]
    async fn test_connection_cannot_register_twice() {
        let (server, _) = open_server();
        let mut agent = register(&server, "edge1").await;
        assert_eq!(agent.next_of("report").await["Type"], "success");

        agent
            .send(
                &server,
                json!({ "Action": "agent.register", "Args": { "Resource": { "Name": "edge2" } } }),
            )
            .await;
        let refused = agent.next_of("report").await;
        assert_eq!(refused["Type"], "error");
        assert_eq!(
            message(&refused),
            "This connection is already registered as agent edge1"
        );
        assert_eq!(server.agents().names().await, ["edge1"]);

        server.disconnect(&agent.session).await;
        assert!(server.agents().names().await.is_empty());
    }

    #[tokio::test]
    async fn test_agent_reply_reaches_initiator_only() {
        let (server, _) = open_server();
        let agent = register(&server, "edge1").await;
        let mut browser = Client::connect(&server).await;
        let mut bystander = Client::connect(&server).await;
        browser.next_of("auth").await;
        bystander.next_of("auth").await;
        browser.drain();
        bystander.drain();

        let notification = Notification::success("Container stopped");
        agent
            .send(
                &server,
                json!({
                    "Action": "agent.reply",
                    "Args": { "To": browser.session.id(), "Notification": notification },
                }),
            )
            .await;

        let delivered = browser.next().await;
        assert_eq!(message(&delivered), "Container stopped");
        assert!(bystander.drain().is_empty());
    }

    #[tokio::test]
    async fn test_agent_disconnect_broadcasts_agent_list() {
        let (server, _) = open_server();
        let agent = register(&server, "edge1").await;
        let mut browser = Client::connect(&server).await;
        browser.next_of("auth").await;
        browser.drain();

        server.disconnect(&agent.session).await;
        let update = browser.next_of("refresh").await;
        assert_eq!(update["Content"]["Agents"], json!([]));
        assert!(server.agents().find("edge1").await.is_none());
    }

    #[tokio::test]
    async fn test_agent_wraps_replies_for_initiator() {
        let config = ServerConfig {
            role: Role::Agent,
            ..ServerConfig::default()
        };
        let (server, _) = server_with(
            config,
            FakeEngine::with_containers(&[("c1", "web", "running")]),
        );
        let mut uplink = Client::detached("uplink");

        uplink
            .send(&server, json!({ "Action": "containers.list", "Initiator": "browser-1" }))
            .await;
        let reply = uplink.next().await;
        assert_eq!(reply["Action"], "agent.reply");
        assert_eq!(reply["Args"]["To"], "browser-1");
        assert_eq!(reply["Args"]["Notification"]["Category"], "refresh");
        assert!(uplink.drain().is_empty());
    }

    #[tokio::test]
    async fn test_agent_authenticates_each_initiator_separately() {
        let (server, _) = server_with(
            guarded_config(Role::Agent),
            FakeEngine::with_containers(&[("c1", "web", "running")]),
        );
        let mut uplink = Client::detached("uplink");

        uplink
            .send(
                &server,
                json!({ "Action": "auth.login", "Args": { "Password": "s3cret" }, "Initiator": "A" }),
            )
            .await;
        let login = uplink.next().await;
        assert_eq!(login["Args"]["To"], "A");
        assert_eq!(login["Args"]["Notification"]["Type"], "success");

        uplink
            .send(&server, json!({ "Action": "containers.list", "Initiator": "B" }))
            .await;
        let rejected = uplink.next().await;
        assert_eq!(rejected["Args"]["To"], "B");
        assert_eq!(rejected["Args"]["Notification"]["Category"], "auth");

        uplink
            .send(&server, json!({ "Action": "containers.list", "Initiator": "A" }))
            .await;
        let listed = uplink.next().await;
        assert_eq!(listed["Args"]["To"], "A");
        assert_eq!(listed["Args"]["Notification"]["Category"], "refresh");
    }
}
