//! Bulk operations run as monitored long tasks.

use std::sync::Arc;

use async_trait::async_trait;
use dockwatch_core::{LongTask, Monitor, Notification, TaskObserver};
use dockwatch_engine::{Action, Engine, EngineError, ResourceKind};
use futures::StreamExt;

use super::Request;
use crate::server::{Recipient, Server};

/// Relays task progress to the client: each step as an info report, each
/// error as an error report, and the summary once everything succeeded.
struct Progress {
    server: Arc<Server>,
    to: Recipient,
    summary: Notification,
    failed: bool,
}

impl Progress {
    fn new(request: &Request, summary: Notification) -> Self {
        Self {
            server: Arc::clone(&request.server),
            to: request.recipient.clone(),
            summary,
            failed: false,
        }
    }
}

#[async_trait]
impl TaskObserver<String, EngineError> for Progress {
    async fn on_step(&mut self, step: String) {
        self.server.notify(&self.to, Notification::info(step)).await;
        self.server.notify(&self.to, Notification::loading()).await;
    }

    async fn on_error(&mut self, error: EngineError) {
        self.failed = true;
        self.server.notify(&self.to, Notification::error(error)).await;
    }

    async fn on_done(&mut self) {
        if !self.failed {
            self.server.notify(&self.to, self.summary.clone()).await;
        }
    }
}

/// Apply `action` to every container it makes sense for.
pub(super) fn containers(request: &Request, action: Action) {
    let past = match action {
        Action::Restart => "restarted",
        Action::Remove { .. } => "removed",
        _ => "stopped",
    };
    let mut observer = Progress::new(
        request,
        Notification::success(format!("All the containers were {past}"))
            .with_follow("containers.list"),
    );
    let engine = Arc::clone(&request.engine);

    tokio::spawn(async move {
        LongTask::run(
            move |monitor: Monitor<String, EngineError>, engine: Arc<dyn Engine>| async move {
                match engine.list(ResourceKind::Container).await {
                    Ok(containers) => {
                        for container in containers {
                            // Only running containers need stopping.
                            if action == Action::Stop && container.state() != Some("running") {
                                continue;
                            }
                            match engine
                                .act(ResourceKind::Container, &container.id, action)
                                .await
                            {
                                Ok(()) => monitor
                                    .step(format!("Container {} was {past}", container.name)),
                                Err(e) => monitor.error(e),
                            }
                        }
                    }
                    Err(e) => monitor.error(e),
                }
                monitor.done();
            },
            engine,
            &mut observer,
        )
        .await;
    });
}

/// Pull each image in turn, reporting progress lines as steps.
pub(super) fn pull(request: &Request, images: Vec<String>) {
    let summary = match images.as_slice() {
        [image] => format!("The image {image} was successfully pulled"),
        _ => "All the images were successfully pulled".to_string(),
    };
    let mut observer = Progress::new(
        request,
        Notification::success(summary).with_follow("images.list"),
    );
    let engine = Arc::clone(&request.engine);

    tokio::spawn(async move {
        LongTask::run(
            |monitor: Monitor<String, EngineError>, (engine, images): (Arc<dyn Engine>, Vec<String>)| async move {
                for image in images {
                    match engine.pull(&image).await {
                        Ok(mut lines) => {
                            while let Some(line) = lines.next().await {
                                match line {
                                    Ok(line) => monitor.step(format!("Pulling {image}: {line}")),
                                    Err(e) => monitor.error(e),
                                }
                            }
                        }
                        Err(e) => monitor.error(e),
                    }
                }
                monitor.done();
            },
            (engine, images),
            &mut observer,
        )
        .await;
    });
}
