//! Resource actions: plural verbs (`containers.list`) act on a whole kind,
//! singular ones (`container.stop`) on one resource.

use std::sync::Arc;

use dockwatch_core::{METRICS_KEY, Notification, STREAM_KEY, SessionValue, StreamHandle, Tab};
use dockwatch_engine::{Action, ProcessTable, ResourceKind, UsageSample, to_rows};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{
    Request,
    shell::{self, Target},
    tasks,
};

/// The resource a command points at, as echoed back from a listing row.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ResourceRef {
    #[serde(rename = "ID", default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    state: String,
}

impl ResourceRef {
    fn key(&self) -> &str {
        if self.id.is_empty() { &self.name } else { &self.id }
    }

    fn label(&self) -> &str {
        if self.name.is_empty() { &self.id } else { &self.name }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ResourceArgs {
    resource: ResourceRef,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RenameArgs {
    resource: ResourceRef,
    name: String,
}

#[derive(Debug, Deserialize)]
struct LogArgs {
    #[serde(rename = "Resource")]
    resource: ResourceRef,
    #[serde(rename = "showTimestamps", default)]
    show_timestamps: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MetricsArgs {
    resource: ResourceRef,
    from: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PullArgs {
    image: String,
}

pub(super) async fn handle(request: &Request, kind: ResourceKind) {
    let action = request.command.action.as_str();
    match action.split_once('.') {
        Some((prefix, verb)) if prefix == kind.key() => all(request, kind, verb).await,
        Some((prefix, verb)) if prefix == kind.singular() => one(request, kind, verb).await,
        _ => request.unknown().await,
    }
}

/// Whole-kind actions: `containers.list`, `images.prune`, ...
async fn all(request: &Request, kind: ResourceKind, verb: &str) {
    match (kind, verb) {
        (_, "list") => list(request, kind).await,
        (ResourceKind::Stack, "prune") => request.unknown().await,
        (_, "prune") => match request.engine.prune(kind).await {
            Ok(()) => {
                request
                    .reply(
                        Notification::success(format!(
                            "All the unused {} were successfully removed",
                            kind.key()
                        ))
                        .with_follow(format!("{}.list", kind.key())),
                    )
                    .await;
            }
            Err(e) => request.fail(e).await,
        },
        (ResourceKind::Container, "stop") => tasks::containers(request, Action::Stop),
        (ResourceKind::Container, "restart") => tasks::containers(request, Action::Restart),
        (ResourceKind::Container, "remove") => tasks::containers(
            request,
            Action::Remove {
                force: true,
                volumes: false,
            },
        ),
        (ResourceKind::Image, "pull") => pull_latest(request).await,
        _ => request.unknown().await,
    }
}

async fn list(request: &Request, kind: ResourceKind) {
    let resources = match request.engine.list(kind).await {
        Ok(resources) => resources,
        Err(e) => return request.fail(e).await,
    };
    let listing = &request.server.config().listing;
    let rows = to_rows(resources, &listing.columns(kind), listing.state_style);
    let tab = |rows| Tab {
        key: kind.key().to_string(),
        title: kind.title().to_string(),
        rows,
        sort_by: listing.sort_by(kind),
    };

    match listing.chunk_size.filter(|&size| size > 0) {
        None => {
            request
                .reply(Notification::data(json!({ "Tab": tab(rows) })))
                .await;
        }
        Some(_) if rows.is_empty() => {
            request
                .reply(Notification::data_chunk(
                    json!({ "Tab": tab(Vec::new()), "ChunkIndex": 1 }),
                ))
                .await;
        }
        Some(size) => {
            for (index, chunk) in rows.chunks(size).enumerate() {
                request
                    .reply(Notification::data_chunk(
                        json!({ "Tab": tab(chunk.to_vec()), "ChunkIndex": index + 1 }),
                    ))
                    .await;
            }
        }
    }
}

/// Re-pull every image tagged `latest`.
async fn pull_latest(request: &Request) {
    let images = match request.engine.list(ResourceKind::Image).await {
        Ok(images) => images,
        Err(e) => return request.fail(e).await,
    };
    let latest: Vec<String> = images
        .iter()
        .filter(|image| image.fields.get("Version").and_then(Value::as_str) == Some("latest"))
        .map(|image| format!("{}:latest", image.name))
        .collect();
    if latest.is_empty() {
        return request
            .reply(Notification::info("No image tagged latest to pull"))
            .await;
    }
    tasks::pull(request, latest);
}

/// Single-resource actions: `container.stop`, `image.remove.force`, ...
async fn one(request: &Request, kind: ResourceKind, verb: &str) {
    match (kind, verb) {
        (ResourceKind::Image, "pull") => {
            if let Some(PullArgs { image }) = request.args().await {
                tasks::pull(request, vec![image]);
            }
        }
        (ResourceKind::Container | ResourceKind::Stack, "inspect.logs") => {
            if let Some(args) = request.args::<LogArgs>().await {
                logs(request, kind, args).await;
            }
        }
        (ResourceKind::Container, "rename") => {
            if let Some(args) = request.args::<RenameArgs>().await {
                rename(request, args).await;
            }
        }
        (ResourceKind::Container, "metrics") => {
            if let Some(args) = request.args::<MetricsArgs>().await {
                metrics(request, args).await;
            }
        }
        _ => {
            let Some(ResourceArgs { resource }) = request.args().await else {
                return;
            };
            if resource.key().is_empty() {
                return request
                    .fail(format!("Missing {} identifier", kind.singular()))
                    .await;
            }
            act(request, kind, verb, &resource).await;
        }
    }
}

async fn act(request: &Request, kind: ResourceKind, verb: &str, resource: &ResourceRef) {
    use ResourceKind::{Container, Image, Network, Stack, Volume};

    let action = match (kind, verb) {
        (Container, "start") => Action::Start,
        (Container, "stop") => Action::Stop,
        (Container | Stack, "restart") => Action::Restart,
        (Container, "pause") => match request.engine.state(resource.key()).await {
            Ok(state) if state == "paused" => Action::Unpause,
            Ok(_) => Action::Pause,
            Err(e) => return request.fail(e).await,
        },
        (Container, "remove.default" | "remove.default.volumes") => {
            let volumes = verb.ends_with("volumes");
            match request.engine.state(resource.key()).await {
                Ok(state) if state == "running" => {
                    let force = if volumes {
                        "container.remove.force.volumes"
                    } else {
                        "container.remove.force"
                    };
                    return request
                        .reply(Notification::prompt(json!({
                            "Message": "You cannot remove a container unless you force it. Do you want to force it?",
                            "Command": force,
                        })))
                        .await;
                }
                Ok(_) => Action::Remove {
                    force: false,
                    volumes,
                },
                Err(e) => return request.fail(e).await,
            }
        }
        (Container, "remove.force" | "remove.force.volumes") => Action::Remove {
            force: true,
            volumes: verb.ends_with("volumes"),
        },
        (Image | Volume, "remove.default") | (Network, "remove.default" | "remove") => {
            Action::Remove {
                force: false,
                volumes: false,
            }
        }
        (Image | Volume, "remove.force") => Action::Remove {
            force: true,
            volumes: false,
        },
        (Image, "remove.default.unprune") => Action::RemoveNoPrune { force: false },
        (Image, "remove.force.unprune") => Action::RemoveNoPrune { force: true },
        (Stack, "up") if resource.state.starts_with("running") => {
            return request.fail("Your stack is already up and running").await;
        }
        (Stack, "up") => Action::Up,
        (Stack, "down") if !resource.state.starts_with("running") => {
            return request.fail("Your stack isn't running").await;
        }
        (Stack, "down") => Action::Down,
        (Stack, "pause") if resource.state.starts_with("paused") => Action::Unpause,
        (Stack, "pause") => Action::Pause,
        (Container, "shell") => {
            return shell::open(request, Target::Container(resource.key().to_string())).await;
        }
        (_, "inspect.tabs") => {
            return request
                .reply(Notification::data(json!({
                    "Inspector": { "Tabs": kind.inspector_tabs() }
                })))
                .await;
        }
        (_, "inspect.config") => return inspect(request, kind, resource).await,
        (Container, "inspect.env") => return env(request, resource).await,
        (Container, "inspect.top") => return top(request, resource).await,
        (Container, "inspect.stats") => return stats(request, resource).await,
        (Stack, "inspect.services") => return services(request, resource).await,
        _ => return request.unknown().await,
    };

    tracing::info!(
        kind = %kind,
        id = resource.key(),
        action = %action,
        "Running resource action"
    );
    if let Err(e) = request.engine.act(kind, resource.key(), action).await {
        return request.fail(e).await;
    }
    request
        .reply(
            Notification::success(format!(
                "The {kind} {} was successfully {}",
                resource.label(),
                past_tense(action)
            ))
            .with_follow(format!("{}.list", kind.key())),
        )
        .await;
}

const fn past_tense(action: Action) -> &'static str {
    match action {
        Action::Start => "started",
        Action::Stop => "stopped",
        Action::Restart => "restarted",
        Action::Pause => "paused",
        Action::Unpause => "unpaused",
        Action::Remove { .. } | Action::RemoveNoPrune { .. } => "removed",
        Action::Up => "started",
        Action::Down => "stopped",
    }
}

async fn inspect(request: &Request, kind: ResourceKind, resource: &ResourceRef) {
    match request.engine.inspect(kind, resource.key()).await {
        Ok(config) => {
            request
                .reply(inspector(json!([{ "Type": "json", "Content": config }])))
                .await;
        }
        Err(e) => request.fail(e).await,
    }
}

fn inspector(parts: Value) -> Notification {
    Notification::data(json!({ "Inspector": { "Content": parts } }))
}

/// Table shown in place of live data for a container that is not running.
fn not_running() -> Value {
    json!([{
        "Type": "table",
        "Content": ProcessTable {
            headers: vec!["Notice".into()],
            rows: vec![vec!["The container isn't running".into()]],
        },
    }])
}

/// Whether the container has no processes to look at. `None` once a
/// failure was reported.
async fn is_idle(request: &Request, id: &str) -> Option<bool> {
    match request.engine.state(id).await {
        Ok(state) => Some(matches!(state.as_str(), "created" | "exited" | "dead")),
        Err(e) => {
            request.fail(e).await;
            None
        }
    }
}

async fn rename(request: &Request, args: RenameArgs) {
    let name = args.name.trim();
    if args.resource.key().is_empty() || name.is_empty() {
        return request.fail("Missing container identifier or new name").await;
    }
    tracing::info!(id = args.resource.key(), name, "Renaming container");
    if let Err(e) = request.engine.rename(args.resource.key(), name).await {
        return request.fail(e).await;
    }
    request
        .reply(
            Notification::success("Your container was successfully renamed")
                .with_follow("containers.list"),
        )
        .await;
}

/// Environment variables the container was started with, one row each.
async fn env(request: &Request, resource: &ResourceRef) {
    let config = match request.engine.inspect(ResourceKind::Container, resource.key()).await {
        Ok(config) => config,
        Err(e) => return request.fail(e).await,
    };
    let rows: Vec<Value> = config
        .pointer("/Config/Env")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            json!({ key: value, "_representation": [format!("{key}:"), value] })
        })
        .collect();
    request
        .reply(inspector(json!([{ "Type": "rows", "Content": rows }])))
        .await;
}

async fn top(request: &Request, resource: &ResourceRef) {
    let Some(idle) = is_idle(request, resource.key()).await else {
        return;
    };
    if idle {
        return request.reply(inspector(not_running())).await;
    }
    match request.engine.top(resource.key()).await {
        Ok(table) => {
            request
                .reply(inspector(json!([{ "Type": "table", "Content": table }])))
                .await;
        }
        Err(e) => request.fail(e).await,
    }
}

async fn stats(request: &Request, resource: &ResourceRef) {
    let Some(idle) = is_idle(request, resource.key()).await else {
        return;
    };
    if idle {
        return request.reply(inspector(not_running())).await;
    }
    match request.engine.stats(resource.key()).await {
        Ok(sample) => {
            request
                .reply(inspector(json!([{ "Type": "rows", "Content": usage_rows(&sample) }])))
                .await;
        }
        Err(e) => request.fail(e).await,
    }
}

fn usage_rows(sample: &UsageSample) -> Value {
    let cpu = sample.cpu_percent();
    let memory = sample.memory_percent();
    let network = format!(
        "{} / {} (RX/TX)",
        byte_count(sample.network_rx),
        byte_count(sample.network_tx)
    );
    json!([
        { "CPU": cpu, "_representation": ["CPU:", format!("{cpu:.2}%")] },
        { "Memory": memory, "_representation": ["Memory:", format!("{memory:.2}%")] },
        { "Network": network, "_representation": ["Network:", network] },
        { "PIDs": sample.pids, "_representation": ["PIDs:", sample.pids.to_string()] },
    ])
}

/// Render a byte count with decimal units, as `docker stats` does.
fn byte_count(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["kB", "MB", "GB", "TB", "PB", "EB"];
    if bytes < 1000 {
        return format!("{bytes} B");
    }
    #[allow(clippy::cast_precision_loss)]
    let mut value = bytes as f64 / 1000.0;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

/// Containers of a stack, rendered like the container listing.
async fn services(request: &Request, resource: &ResourceRef) {
    let containers = match request.engine.list(ResourceKind::Container).await {
        Ok(containers) => containers,
        Err(e) => return request.fail(e).await,
    };
    let project = format!("com.docker.compose.project={}", resource.key());
    let members = containers
        .into_iter()
        .filter(|container| {
            container
                .fields
                .get("Labels")
                .and_then(Value::as_str)
                .is_some_and(|labels| labels.split(',').any(|label| label == project))
        })
        .collect();
    let listing = &request.server.config().listing;
    let rows = to_rows(
        members,
        &listing.columns(ResourceKind::Container),
        listing.state_style,
    );
    request
        .reply(inspector(json!([{ "Type": "rows", "Content": rows }])))
        .await;
}

/// Follow a container's or a stack's logs until the client's next command.
async fn logs(request: &Request, kind: ResourceKind, args: LogArgs) {
    let mut options = request.server.config().logs.clone();
    options.timestamps = args.show_timestamps;

    let mut lines = match request.engine.logs(kind, args.resource.key(), &options).await {
        Ok(lines) => lines,
        Err(e) => return request.fail(e).await,
    };
    request.reply(Notification::data(json!({}))).await;

    let server = Arc::clone(&request.server);
    let to = request.recipient.clone();
    let id = args.resource.key().to_string();
    let task = tokio::spawn(async move {
        while let Some(line) = lines.next().await {
            match line {
                Ok(line) => {
                    server
                        .notify(
                            &to,
                            Notification::data(json!({
                                "Inspector": { "Content": [{ "Type": "lines", "Content": [line] }] }
                            })),
                        )
                        .await;
                }
                Err(e) => {
                    server.notify(&to, Notification::error(e)).await;
                    break;
                }
            }
        }
        tracing::debug!(%kind, %id, "Log stream ended");
    });
    request
        .session
        .set(STREAM_KEY, SessionValue::Stream(StreamHandle::new(&task)));
}

/// Return recorded usage and keep a poller running for the container.
async fn metrics(request: &Request, args: MetricsArgs) {
    let cancel = match request.session.get(METRICS_KEY) {
        Some(SessionValue::Metrics(token)) => token,
        _ => {
            let token = CancellationToken::new();
            request
                .session
                .set(METRICS_KEY, SessionValue::Metrics(token.clone()));
            token
        }
    };

    let (reports, mut rx) = mpsc::unbounded_channel::<String>();
    let result = request
        .server
        .metrics()
        .request(
            Arc::clone(&request.engine),
            args.resource.key(),
            args.from,
            cancel,
            reports,
        )
        .await;

    match result {
        Ok((points, count)) => {
            request
                .reply(Notification::data(json!({
                    "Metrics": { "Points": points, "Count": count }
                })))
                .await;
        }
        Err(e) => request.reply(Notification::info(e)).await,
    }

    let server = Arc::clone(&request.server);
    let to = request.recipient.clone();
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            server.notify(&to, Notification::info(message)).await;
        }
    });
}
