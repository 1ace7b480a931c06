//! In-memory engine and client for handler tests.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use dockwatch_core::{LocalSession, Session};
use dockwatch_engine::{
    Action, CpuCounters, Engine, EngineError, EngineInfo, LineStream, LogOptions, ProcessTable,
    Resource, ResourceKind, UsageSample,
};
use dockwatch_tty::{Attached, ShellCommand, Tty};
use futures::StreamExt;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::server::Server;

pub fn resource(kind: ResourceKind, fields: Value) -> Resource {
    let Value::Object(fields) = fields else {
        panic!("resource fields must be an object");
    };
    Resource::from_fields(kind, fields).unwrap()
}

/// Engine whose state lives in memory.
#[derive(Default)]
pub struct FakeEngine {
    pub resources: Mutex<HashMap<ResourceKind, Vec<Resource>>>,
    pub states: Mutex<HashMap<String, String>>,
    pub actions: Mutex<Vec<(ResourceKind, String, Action)>>,
    pub renames: Mutex<Vec<(String, String)>>,
    pub log_kinds: Mutex<Vec<ResourceKind>>,
    pub log_lines: Vec<String>,
    pub fail_stats: AtomicBool,
    pub stats_calls: AtomicU64,
}

impl FakeEngine {
    pub fn with_containers(containers: &[(&str, &str, &str)]) -> Self {
        let engine = Self::default();
        let mut listed = Vec::new();
        for (id, name, state) in containers {
            listed.push(resource(
                ResourceKind::Container,
                json!({ "ID": id, "Name": name, "State": state, "Image": "nginx" }),
            ));
            engine
                .states
                .lock()
                .unwrap()
                .insert((*id).to_string(), (*state).to_string());
        }
        engine
            .resources
            .lock()
            .unwrap()
            .insert(ResourceKind::Container, listed);
        engine
    }

    pub fn actions(&self) -> Vec<(ResourceKind, String, Action)> {
        self.actions.lock().unwrap().clone()
    }

    pub fn set_state(&self, id: &str, state: &str) {
        self.states
            .lock()
            .unwrap()
            .insert(id.to_string(), state.to_string());
    }
}

#[async_trait]
impl Engine for FakeEngine {
    async fn list(&self, kind: ResourceKind) -> Result<Vec<Resource>, EngineError> {
        Ok(self
            .resources
            .lock()
            .unwrap()
            .get(&kind)
            .cloned()
            .unwrap_or_default())
    }

    async fn act(&self, kind: ResourceKind, id: &str, action: Action) -> Result<(), EngineError> {
        if id == "broken" {
            return Err(EngineError::Command(format!("cannot {action} {id}")));
        }
        self.actions
            .lock()
            .unwrap()
            .push((kind, id.to_string(), action));
        Ok(())
    }

    async fn prune(&self, _kind: ResourceKind) -> Result<(), EngineError> {
        Ok(())
    }

    async fn inspect(&self, _kind: ResourceKind, id: &str) -> Result<Value, EngineError> {
        Ok(json!({
            "Id": id,
            "Config": { "Env": ["PATH=/usr/bin", "GREETING=a=b", "EMPTY"] },
        }))
    }

    async fn state(&self, id: &str) -> Result<String, EngineError> {
        self.states
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::Command(format!("No such container: {id}")))
    }

    async fn stats(&self, _id: &str) -> Result<UsageSample, EngineError> {
        let calls = self.stats_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_stats.load(Ordering::SeqCst) {
            return Err(EngineError::Command("stats unavailable".into()));
        }
        Ok(UsageSample {
            cpu: CpuCounters {
                total: calls * 50,
                system: calls * 100,
            },
            pre_cpu: CpuCounters {
                total: (calls - 1) * 50,
                system: (calls - 1) * 100,
            },
            memory_usage: 512,
            memory_limit: 1024,
            network_rx: 1024,
            network_tx: 2048,
            pids: 3,
        })
    }

    async fn logs(
        &self,
        kind: ResourceKind,
        _id: &str,
        _options: &LogOptions,
    ) -> Result<LineStream, EngineError> {
        self.log_kinds.lock().unwrap().push(kind);
        let lines: Vec<Result<String, EngineError>> =
            self.log_lines.iter().cloned().map(Ok).collect();
        Ok(futures::stream::iter(lines)
            .chain(futures::stream::pending())
            .boxed())
    }

    async fn rename(&self, id: &str, name: &str) -> Result<(), EngineError> {
        if id == "broken" {
            return Err(EngineError::Command(format!("cannot rename {id}")));
        }
        self.renames
            .lock()
            .unwrap()
            .push((id.to_string(), name.to_string()));
        Ok(())
    }

    async fn top(&self, _id: &str) -> Result<ProcessTable, EngineError> {
        Ok(ProcessTable {
            headers: vec!["PID".into(), "CMD".into()],
            rows: vec![vec!["1".into(), "nginx: master process".into()]],
        })
    }

    async fn pull(&self, image: &str) -> Result<LineStream, EngineError> {
        let lines = vec![
            Ok(format!("{image}: Pulling from library")),
            Ok("Status: Downloaded newer image".to_string()),
        ];
        Ok(futures::stream::iter(lines).boxed())
    }

    async fn shell(
        &self,
        _id: &str,
        shell: &ShellCommand,
        tty: &Tty,
    ) -> Result<Attached, EngineError> {
        let mut command = tokio::process::Command::new(shell.program());
        command.args(shell.args());
        Ok(dockwatch_tty::attach(tty, command)?)
    }

    async fn info(&self) -> Result<EngineInfo, EngineError> {
        Ok(EngineInfo {
            version: "27.0.1".into(),
            host: "local".into(),
            cpus: 4,
            memory: 8 * 1024 * 1024 * 1024,
        })
    }
}

/// One connected client and the frames it received.
pub struct Client {
    pub session: Arc<dyn Session>,
    rx: mpsc::UnboundedReceiver<String>,
}

impl Client {
    /// Connect through the server's connect path.
    pub async fn connect(server: &Arc<Server>) -> Self {
        let (session, rx) = LocalSession::new();
        let session: Arc<dyn Session> = Arc::new(session);
        server.connect(Arc::clone(&session)).await;
        Self { session, rx }
    }

    /// A session that never went through connect (an agent's uplink).
    pub fn detached(id: &str) -> Self {
        let (session, rx) = LocalSession::with_id(id);
        Self {
            session: Arc::new(session),
            rx,
        }
    }

    pub async fn send(&self, server: &Arc<Server>, command: Value) {
        server
            .handle(&self.session, Some(command.to_string().as_bytes()))
            .await;
    }

    pub async fn next(&mut self) -> Value {
        let frame = tokio::time::timeout(Duration::from_secs(5), self.rx.recv())
            .await
            .expect("timed out waiting for a frame")
            .expect("session closed");
        serde_json::from_str(&frame).unwrap()
    }

    /// Next frame of a category, skipping others.
    pub async fn next_of(&mut self, category: &str) -> Value {
        loop {
            let frame = self.next().await;
            if frame["Category"] == category {
                return frame;
            }
        }
    }

    /// Next forwarded command, skipping notifications.
    pub async fn next_command(&mut self) -> Value {
        loop {
            let frame = self.next().await;
            if frame.get("Action").is_some() {
                return frame;
            }
        }
    }

    /// Frames already delivered.
    pub fn drain(&mut self) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.rx.try_recv() {
            frames.push(serde_json::from_str(&frame).unwrap());
        }
        frames
    }
}
