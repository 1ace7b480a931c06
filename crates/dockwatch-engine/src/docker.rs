//! Engine backed by the `docker` command-line client.

use std::process::Stdio;

use async_trait::async_trait;
use dockwatch_core::Row;
use dockwatch_tty::{Attached, ShellCommand, Tty, attach};
use futures::StreamExt;
use serde_json::Value;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::{Child, ChildStderr, ChildStdout},
    sync::{OnceCell, mpsc},
};
use tokio_stream::wrappers::{LinesStream, ReceiverStream};

use crate::{
    command::CommandBuilder,
    engine::{
        Action, CpuCounters, Engine, EngineError, EngineInfo, LineStream, LogOptions,
        ProcessTable, UsageSample,
    },
    resource::{Resource, ResourceKind},
};

const LINE_BUFFER: usize = 256;
const LOCAL_HOST: &str = "local";

/// CPU percentages are expressed as counters over this many ticks.
const CPU_WINDOW: u64 = 1_000_000_000;

/// Docker CLI engine, optionally bound to a remote daemon.
#[derive(Debug, Clone)]
pub struct DockerCli {
    builder: CommandBuilder,
    /// Processors of the daemon, read once.
    cpus: OnceCell<u64>,
}

impl DockerCli {
    #[must_use]
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            builder: CommandBuilder::new(base),
            cpus: OnceCell::new(),
        }
    }

    /// Target the daemon at `host` (any value `docker -H` accepts).
    #[must_use]
    pub fn with_host(base: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            builder: CommandBuilder::new(base).host(host),
            cpus: OnceCell::new(),
        }
    }

    /// Processor count used to scale `docker stats` percentages.
    async fn cpu_count(&self) -> u64 {
        let cpus = self
            .cpus
            .get_or_try_init(|| async { self.info().await.map(|info| info.cpus.max(1)) })
            .await;
        match cpus {
            Ok(cpus) => *cpus,
            Err(e) => {
                tracing::warn!("Cannot read the processor count: {e}");
                1
            }
        }
    }

    async fn command(&self, args: Vec<String>) -> Result<tokio::process::Command, EngineError> {
        Ok(self.builder.build(args)?.into_command().await?)
    }

    async fn output(&self, args: Vec<String>) -> Result<String, EngineError> {
        let mut command = self.command(args).await?;
        let output = command.stdin(Stdio::null()).output().await?;
        if !output.status.success() {
            let message = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(EngineError::Command(if message.is_empty() {
                format!("engine client exited with {}", output.status)
            } else {
                message
            }));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn stream(&self, args: Vec<String>) -> Result<LineStream, EngineError> {
        let mut command = self.command(args).await?;
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = command.spawn()?;
        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(EngineError::Io(std::io::Error::other(
                "engine client output was not captured",
            )));
        };

        let (tx, rx) = mpsc::channel(LINE_BUFFER);
        tokio::spawn(forward_lines(child, stdout, stderr, tx));
        Ok(ReceiverStream::new(rx).boxed())
    }
}

async fn forward_lines(
    mut child: Child,
    stdout: ChildStdout,
    stderr: ChildStderr,
    tx: mpsc::Sender<Result<String, EngineError>>,
) {
    let mut lines = futures::stream::select(
        LinesStream::new(BufReader::new(stdout).lines()),
        LinesStream::new(BufReader::new(stderr).lines()),
    );

    loop {
        tokio::select! {
            // Dropping the child kills it.
            () = tx.closed() => return,
            next = lines.next() => match next {
                Some(Ok(line)) => {
                    if tx.send(Ok(line)).await.is_err() {
                        return;
                    }
                }
                Some(Err(e)) => {
                    let _ = tx.send(Err(e.into())).await;
                    return;
                }
                None => break,
            }
        }
    }

    match child.wait().await {
        Ok(status) if !status.success() => {
            let _ = tx
                .send(Err(EngineError::Command(format!(
                    "engine client exited with {status}"
                ))))
                .await;
        }
        Ok(_) => {}
        Err(e) => {
            let _ = tx.send(Err(e.into())).await;
        }
    }
}

fn args<const N: usize>(parts: [&str; N]) -> Vec<String> {
    parts.iter().map(ToString::to_string).collect()
}

fn list_args(kind: ResourceKind) -> Vec<String> {
    match kind {
        ResourceKind::Container => args(["ps", "-a", "--no-trunc", "--format", "{{json .}}"]),
        ResourceKind::Image => args(["image", "ls", "--format", "{{json .}}"]),
        ResourceKind::Volume => args(["volume", "ls", "--format", "{{json .}}"]),
        ResourceKind::Network => args(["network", "ls", "--no-trunc", "--format", "{{json .}}"]),
        ResourceKind::Stack => args(["compose", "ls", "-a", "--format", "json"]),
    }
}

fn action_args(kind: ResourceKind, id: &str, action: Action) -> Result<Vec<String>, EngineError> {
    use ResourceKind::{Container, Image, Network, Stack, Volume};

    let mut out = match (kind, action) {
        (Container, Action::Start) => args(["start"]),
        (Container, Action::Stop) => args(["stop"]),
        (Container, Action::Restart) => args(["restart"]),
        (Container, Action::Pause) => args(["pause"]),
        (Container, Action::Unpause) => args(["unpause"]),
        (Container, Action::Remove { force, volumes }) => {
            let mut rm = args(["rm"]);
            if force {
                rm.push("--force".into());
            }
            if volumes {
                rm.push("--volumes".into());
            }
            rm
        }
        (Image, Action::Remove { force, .. }) => {
            let mut rm = args(["image", "rm"]);
            if force {
                rm.push("--force".into());
            }
            rm
        }
        (Image, Action::RemoveNoPrune { force }) => {
            let mut rm = args(["image", "rm"]);
            if force {
                rm.push("--force".into());
            }
            rm.push("--no-prune".into());
            rm
        }
        (Volume, Action::Remove { force, .. }) => {
            let mut rm = args(["volume", "rm"]);
            if force {
                rm.push("--force".into());
            }
            rm
        }
        (Network, Action::Remove { .. }) => args(["network", "rm"]),
        (Stack, action) => {
            let verb = match action {
                Action::Up | Action::Start => "start",
                Action::Down | Action::Remove { .. } | Action::RemoveNoPrune { .. } => "down",
                Action::Stop => "stop",
                Action::Restart => "restart",
                Action::Pause => "pause",
                Action::Unpause => "unpause",
            };
            return Ok(vec![
                "compose".into(),
                "-p".into(),
                id.into(),
                verb.into(),
            ]);
        }
        (kind, action) => {
            return Err(EngineError::Unsupported {
                kind,
                action: action.to_string(),
            });
        }
    };
    out.push(id.to_string());
    Ok(out)
}

/// Parse listing output: one JSON object per line, or a single JSON array.
fn parse_listing(kind: ResourceKind, output: &str) -> Result<Vec<Resource>, EngineError> {
    let trimmed = output.trim();
    let objects: Vec<Value> = if trimmed.starts_with('[') {
        serde_json::from_str(trimmed).map_err(|e| EngineError::Parse(e.to_string()))?
    } else {
        trimmed
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(|e| EngineError::Parse(e.to_string())))
            .collect::<Result<_, _>>()?
    };

    objects
        .into_iter()
        .filter_map(|value| match value {
            Value::Object(fields) => Some(fields),
            _ => None,
        })
        .map(|fields| {
            Resource::from_fields(kind, normalize(kind, fields))
                .ok_or_else(|| EngineError::Parse(format!("{kind} without identifier")))
        })
        .collect()
}

fn normalize(kind: ResourceKind, mut fields: Row) -> Row {
    let get = |fields: &Row, key: &str| {
        fields
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    match kind {
        ResourceKind::Container => {
            if let Some(names) = get(&fields, "Names") {
                let first = names.split(',').next().unwrap_or_default().to_string();
                fields.insert("Name".into(), Value::String(first));
            }
            let exit_code = get(&fields, "Status")
                .and_then(|status| exit_code(&status))
                .map_or_else(String::new, |code| format!("({code})"));
            fields.insert("ExitCode".into(), Value::String(exit_code));
        }
        ResourceKind::Image => {
            if let Some(repository) = get(&fields, "Repository") {
                fields.insert("Name".into(), Value::String(repository));
            }
            if let Some(tag) = get(&fields, "Tag") {
                fields.insert("Version".into(), Value::String(tag));
            }
        }
        ResourceKind::Stack => {
            if let Some(status) = get(&fields, "Status") {
                let state = status.split('(').next().unwrap_or_default().to_string();
                fields.insert("State".into(), Value::String(state));
            }
        }
        ResourceKind::Volume | ResourceKind::Network => {}
    }
    fields
}

/// Non-zero exit code from a status such as `Exited (137) 2 hours ago`.
fn exit_code(status: &str) -> Option<i64> {
    let rest = status.strip_prefix("Exited (")?;
    let code: i64 = rest.split(')').next()?.parse().ok()?;
    (code != 0).then_some(code)
}

/// Parse one `docker stats --format '{{json .}}'` line.
///
/// The client reports CPU as a percentage of one processor, so a busy
/// 8-core container reads `800%`. It is divided by `cpus` and mapped onto
/// counters over a fixed window so callers can use the usual delta formula.
fn parse_stats(line: &str, cpus: u64) -> Result<UsageSample, EngineError> {
    let value: Value =
        serde_json::from_str(line.trim()).map_err(|e| EngineError::Parse(e.to_string()))?;
    let field = |key: &str| {
        value
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::Parse(format!("stats without {key}")))
    };

    let percent: f64 = field("CPUPerc")?
        .trim_end_matches('%')
        .trim()
        .parse()
        .map_err(|_| EngineError::Parse("invalid CPUPerc".into()))?;

    let (usage, limit) = field("MemUsage")?
        .split_once('/')
        .ok_or_else(|| EngineError::Parse("invalid MemUsage".into()))?;

    let (network_rx, network_tx) = field("NetIO")
        .ok()
        .and_then(|io| io.split_once('/'))
        .map_or((0, 0), |(rx, tx)| {
            (parse_size(rx).unwrap_or(0), parse_size(tx).unwrap_or(0))
        });

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    let total = (percent.max(0.0) * CPU_WINDOW as f64 / (100.0 * cpus.max(1) as f64))
        .round() as u64;

    Ok(UsageSample {
        cpu: CpuCounters {
            total,
            system: CPU_WINDOW,
        },
        pre_cpu: CpuCounters::default(),
        memory_usage: parse_size(usage).unwrap_or(0),
        memory_limit: parse_size(limit).unwrap_or(0),
        network_rx,
        network_tx,
        pids: field("PIDs")
            .ok()
            .and_then(|pids| pids.trim().parse().ok())
            .unwrap_or(0),
    })
}

/// Parse `docker top` output: a header line, then one line per process
/// whose last column (the command) may hold spaces.
fn parse_top(output: &str) -> ProcessTable {
    let mut lines = output.lines().filter(|line| !line.trim().is_empty());
    let headers: Vec<String> = lines
        .next()
        .map(|line| line.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default();
    if headers.is_empty() {
        return ProcessTable::default();
    }

    let rows = lines
        .map(|line| {
            let mut rest = line.trim();
            let mut row = Vec::with_capacity(headers.len());
            for _ in 1..headers.len() {
                let (cell, tail) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
                row.push(cell.to_string());
                rest = tail.trim_start();
            }
            row.push(rest.to_string());
            row
        })
        .collect();
    ProcessTable { headers, rows }
}

/// Parse `docker info --format '{{json .}}'`.
fn parse_info(output: &str, host: String) -> Result<EngineInfo, EngineError> {
    let value: Value =
        serde_json::from_str(output.trim()).map_err(|e| EngineError::Parse(e.to_string()))?;
    Ok(EngineInfo {
        version: value
            .get("ServerVersion")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        host,
        cpus: value.get("NCPU").and_then(Value::as_u64).unwrap_or(0),
        memory: value.get("MemTotal").and_then(Value::as_u64).unwrap_or(0),
    })
}

/// Parse a human-readable size such as `10.5MiB` or `2GB` into bytes.
fn parse_size(text: &str) -> Option<u64> {
    let text = text.trim();
    let split = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    let (number, unit) = text.split_at(split);
    let number: f64 = number.parse().ok()?;
    let multiplier: f64 = match unit.trim() {
        "" | "B" => 1.0,
        "kB" | "KB" => 1e3,
        "KiB" => 1024.0,
        "MB" => 1e6,
        "MiB" => 1024.0 * 1024.0,
        "GB" => 1e9,
        "GiB" => 1024.0 * 1024.0 * 1024.0,
        "TB" => 1e12,
        "TiB" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        _ => return None,
    };
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Some((number * multiplier).round() as u64)
}

fn parse_inspect(output: &str) -> Result<Value, EngineError> {
    let trimmed = output.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(match value {
            Value::Array(mut items) if items.len() == 1 => items.remove(0),
            other => other,
        });
    }
    trimmed
        .lines()
        .map(|line| serde_json::from_str(line).map_err(|e| EngineError::Parse(e.to_string())))
        .collect::<Result<Vec<Value>, _>>()
        .map(Value::Array)
}

#[async_trait]
impl Engine for DockerCli {
    async fn list(&self, kind: ResourceKind) -> Result<Vec<Resource>, EngineError> {
        let output = self.output(list_args(kind)).await?;
        parse_listing(kind, &output)
    }

    async fn act(&self, kind: ResourceKind, id: &str, action: Action) -> Result<(), EngineError> {
        tracing::debug!(%kind, id, %action, "Engine action");
        self.output(action_args(kind, id, action)?).await?;
        Ok(())
    }

    async fn prune(&self, kind: ResourceKind) -> Result<(), EngineError> {
        let prune = match kind {
            ResourceKind::Container => args(["container", "prune", "--force"]),
            ResourceKind::Image => args(["image", "prune", "--all", "--force"]),
            ResourceKind::Volume => args(["volume", "prune", "--force"]),
            ResourceKind::Network => args(["network", "prune", "--force"]),
            ResourceKind::Stack => {
                return Err(EngineError::Unsupported {
                    kind,
                    action: "prune".into(),
                });
            }
        };
        self.output(prune).await?;
        Ok(())
    }

    async fn inspect(&self, kind: ResourceKind, id: &str) -> Result<Value, EngineError> {
        let inspect = match kind {
            ResourceKind::Stack => {
                vec![
                    "compose".into(),
                    "-p".into(),
                    id.into(),
                    "ps".into(),
                    "-a".into(),
                    "--format".into(),
                    "json".into(),
                ]
            }
            kind => vec![kind.singular().into(), "inspect".into(), id.into()],
        };
        parse_inspect(&self.output(inspect).await?)
    }

    async fn state(&self, id: &str) -> Result<String, EngineError> {
        let output = self
            .output(vec![
                "inspect".into(),
                "--format".into(),
                "{{.State.Status}}".into(),
                id.into(),
            ])
            .await?;
        Ok(output.trim().to_string())
    }

    async fn stats(&self, id: &str) -> Result<UsageSample, EngineError> {
        let output = self
            .output(vec![
                "stats".into(),
                "--no-stream".into(),
                "--format".into(),
                "{{json .}}".into(),
                id.into(),
            ])
            .await?;
        parse_stats(&output, self.cpu_count().await)
    }

    async fn logs(
        &self,
        kind: ResourceKind,
        id: &str,
        options: &LogOptions,
    ) -> Result<LineStream, EngineError> {
        let mut logs = match kind {
            ResourceKind::Container => args(["logs", "--follow"]),
            ResourceKind::Stack => vec![
                "compose".into(),
                "-p".into(),
                id.into(),
                "logs".into(),
                "--follow".into(),
                "--no-color".into(),
            ],
            kind => {
                return Err(EngineError::Unsupported {
                    kind,
                    action: "logs".into(),
                });
            }
        };
        if options.timestamps {
            logs.push("--timestamps".into());
        }
        if let Some(tail) = options.tail.as_deref().filter(|t| !t.is_empty()) {
            logs.extend(["--tail".into(), tail.into()]);
        }
        if let Some(since) = options.since.as_deref().filter(|s| !s.is_empty()) {
            logs.extend(["--since".into(), since.into()]);
        }
        if kind == ResourceKind::Container {
            logs.push(id.into());
        }
        self.stream(logs).await
    }

    async fn rename(&self, id: &str, name: &str) -> Result<(), EngineError> {
        self.output(vec!["rename".into(), id.into(), name.into()])
            .await?;
        Ok(())
    }

    async fn top(&self, id: &str) -> Result<ProcessTable, EngineError> {
        let output = self.output(vec!["top".into(), id.into()]).await?;
        Ok(parse_top(&output))
    }

    async fn pull(&self, image: &str) -> Result<LineStream, EngineError> {
        self.stream(vec!["pull".into(), image.into()]).await
    }

    async fn shell(
        &self,
        id: &str,
        shell: &ShellCommand,
        tty: &Tty,
    ) -> Result<Attached, EngineError> {
        let mut exec = args(["exec", "--interactive"]);
        exec.push(id.into());
        exec.extend(shell.argv());
        let command = self.command(exec).await?;
        Ok(attach(tty, command)?)
    }

    async fn info(&self) -> Result<EngineInfo, EngineError> {
        let output = self.output(args(["info", "--format", "{{json .}}"])).await?;
        let host = self
            .builder
            .host
            .clone()
            .unwrap_or_else(|| LOCAL_HOST.to_string());
        parse_info(&output, host)
    }
}
