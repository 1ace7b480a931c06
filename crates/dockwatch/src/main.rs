//! dockwatch server.
//!
//! Run as a master to serve browser clients on `/ws`, or as an agent that
//! registers with a master and serves its forwarded commands.

mod settings;

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use clap::Parser;
use dockwatch_engine::DockerCli;
use dockwatch_server::{Engines, HostEngine, Role, Server, parse_hosts};
use dockwatch_transport::{create_ws_router, uplink};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::settings::Settings;

const DOCKER_BINARY: &str = "docker";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let settings = Settings::parse();
    settings.validate()?;

    let engines = engines(&settings).await?;
    let server = Server::new(settings.server_config(), engines);

    match settings.role {
        Role::Master => serve(server, &settings).await,
        Role::Agent => run_agent(server, &settings).await,
    }
}

async fn engines(settings: &Settings) -> anyhow::Result<Engines> {
    if !settings.multi_host {
        return Ok(Engines::single(Arc::new(DockerCli::new(DOCKER_BINARY))));
    }

    let path = settings.hosts_file()?;
    let text = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("Cannot read hosts file {}", path.display()))?;
    let hosts = parse_hosts(&text)
        .with_context(|| format!("Invalid hosts file {}", path.display()))?
        .into_iter()
        .map(|(name, address)| HostEngine {
            engine: Arc::new(DockerCli::with_host(DOCKER_BINARY, address.clone())),
            name,
            address,
        })
        .collect::<Vec<_>>();
    tracing::info!(count = hosts.len(), "Multi-host mode enabled");
    Ok(Engines::multi(hosts)?)
}

async fn serve(server: Arc<Server>, settings: &Settings) -> anyhow::Result<()> {
    let app = create_ws_router(server, settings.max_read_size);
    let addr = SocketAddr::new(settings.bind, settings.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Cannot listen on {addr}"))?;
    tracing::info!("Server listening on ws://{addr}/ws");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await?;
    Ok(())
}

async fn run_agent(server: Arc<Server>, settings: &Settings) -> anyhow::Result<()> {
    let config = settings
        .uplink_config()
        .context("Agent needs MASTER_HOST and AGENT_NAME")?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Shutting down");
        signal.cancel();
    });

    uplink::run(server, config, shutdown).await?;
    Ok(())
}
