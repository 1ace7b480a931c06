//! Node-level commands: initial load, enumeration, overview and the host
//! shell.

use dockwatch_core::{Notification, Tab};
use dockwatch_engine::{Engine, Resource, ResourceKind, to_rows};
use serde_json::{Map, Value, json};

use super::{
    Request,
    shell::{self, Target},
};
use crate::config::{ListingConfig, Role};

/// Kinds shown on the initial load and in overviews.
const TAB_KINDS: [ResourceKind; 4] = [
    ResourceKind::Container,
    ResourceKind::Image,
    ResourceKind::Volume,
    ResourceKind::Network,
];

pub(super) async fn handle(request: &Request) {
    match request.command.action.as_str() {
        "init" => init(request).await,
        "enumerate" => {
            let tabs = tabs(request, &*request.engine).await;
            request
                .reply(Notification::data(json!({
                    "Enumeration": tabs,
                    "Host": request.command.host.clone().unwrap_or_default(),
                })))
                .await;
        }
        "clear" => shell::close(request).await,
        "shell" => shell::open(request, Target::Host).await,
        "shell.command" => shell::command(request).await,
        "overview" => overview(request).await,
        _ => request.unknown().await,
    }
}

/// Non-empty listings of every tab kind. A failing kind is reported and
/// left out.
async fn tabs(request: &Request, engine: &dyn Engine) -> Vec<Tab> {
    let listing = &request.server.config().listing;
    let mut tabs = Vec::with_capacity(TAB_KINDS.len());
    for kind in TAB_KINDS {
        match engine.list(kind).await {
            Ok(resources) if resources.is_empty() => {}
            Ok(resources) => tabs.push(tab(listing, kind, resources)),
            Err(e) => {
                tracing::warn!(kind = %kind, "Listing failed: {e}");
                request.fail(e).await;
            }
        }
    }
    tabs
}

fn tab(listing: &ListingConfig, kind: ResourceKind, resources: Vec<Resource>) -> Tab {
    Tab {
        key: kind.key().to_string(),
        title: kind.title().to_string(),
        rows: to_rows(resources, &listing.columns(kind), listing.state_style),
        sort_by: listing.sort_by(kind),
    }
}

async fn init(request: &Request) {
    let server = &request.server;
    let agents = server.agents().names().await;
    let hosts = server.engines().names();
    let tabs = tabs(request, &*request.engine).await;

    let Some(size) = server.config().listing.chunk_size.filter(|&s| s > 0) else {
        return request
            .reply(Notification::init(json!({
                "Tabs": tabs,
                "Agents": agents,
                "Hosts": hosts,
            })))
            .await;
    };

    request
        .reply(Notification::init(json!({
            "Tabs": [],
            "Agents": agents,
            "Hosts": hosts,
        })))
        .await;
    for tab in tabs {
        for (index, rows) in tab.rows.chunks(size).enumerate() {
            let chunk = Tab {
                rows: rows.to_vec(),
                ..tab.clone()
            };
            request
                .reply(Notification::init_chunk(
                    json!({ "Tab": chunk, "ChunkIndex": index + 1 }),
                ))
                .await;
        }
    }
}

/// Resource counts per tab kind, zero when a listing fails.
async fn counts(engine: &dyn Engine) -> Value {
    let mut resources = Map::new();
    for kind in TAB_KINDS {
        let count = match engine.list(kind).await {
            Ok(list) => list.len(),
            Err(e) => {
                tracing::warn!(kind = %kind, "Overview listing failed: {e}");
                0
            }
        };
        resources.insert(kind.title().to_string(), json!({ "Count": count }));
    }
    Value::Object(resources)
}

/// The `Docker` section of an instance, plus the daemon machine's memory
/// in bytes when known.
async fn docker(engine: &dyn Engine) -> (Value, Option<u64>) {
    match engine.info().await {
        Ok(info) => (
            json!({ "Version": info.version, "Host": info.host }),
            Some(info.memory).filter(|&m| m > 0),
        ),
        Err(e) => {
            tracing::warn!("Engine info failed: {e}");
            (json!({ "Version": "", "Host": "" }), None)
        }
    }
}

/// Describe the machine the node runs on.
fn machine(node: &mut Value, cpus: usize, memory: Option<u64>) {
    node["CountCPU"] = json!(cpus);
    if let Some(memory) = memory {
        node["AmountRAM"] = json!(memory);
    }
}

async fn overview(request: &Request) {
    let server = &request.server;
    let config = server.config();
    let cpus = std::thread::available_parallelism().map_or(0, std::num::NonZeroUsize::get);
    let mut instances = Vec::new();

    if server.engines().is_multi_host() {
        for host in server.engines().hosts() {
            let mut node = json!({
                "Name": host.name,
                "Role": Role::Master.as_str(),
                "Host": host.address,
            });
            let (docker, memory) = docker(&*host.engine).await;
            // Only a local socket shares this machine.
            if host.address.starts_with("unix://") {
                machine(&mut node, cpus, memory);
            }
            instances.push(json!({
                "Server": node,
                "Docker": docker,
                "Resources": counts(&*host.engine).await,
            }));
        }
    } else {
        let mut node = json!({
            "Name": config.display_name(),
            "Role": config.role.as_str(),
        });
        let (docker, memory) = docker(&*request.engine).await;
        machine(&mut node, cpus, memory);
        let agents = server.agents().names().await;
        if !agents.is_empty() {
            node["Agents"] = json!(agents);
        }
        instances.push(json!({
            "Server": node,
            "Docker": docker,
            "Resources": counts(&*request.engine).await,
        }));
    }

    request
        .reply(Notification::data(json!({ "Overview": { "Instances": instances } })))
        .await;
}
