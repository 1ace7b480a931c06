//! Per-container usage history and the pollers that feed it.

use std::{collections::HashMap, sync::Arc};

use dockwatch_core::RingBuffer;
use dockwatch_engine::{Engine, EngineError, UsageSample};
use serde::Serialize;
use thiserror::Error;
use tokio::{
    sync::{RwLock, mpsc},
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::config::MetricsConfig;

/// States in which a container has no usage to sample.
const NON_MEASURABLE: [&str; 4] = ["created", "removing", "exited", "dead"];

/// One usage sample, as percentages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MetricPoint {
    pub cpu: f64,
    pub mem: f64,
}

impl MetricPoint {
    #[must_use]
    pub fn from_sample(sample: &UsageSample) -> Self {
        Self {
            cpu: sample.cpu_percent(),
            mem: sample.memory_percent(),
        }
    }
}

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("Container state is not running, paused or restarting")]
    NotMeasurable(String),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

struct Entry {
    samples: Arc<RingBuffer<MetricPoint>>,
    polling: bool,
    last_accessed: Instant,
}

/// Registry of per-container sample buffers.
pub struct MetricsRegistry {
    config: MetricsConfig,
    entries: RwLock<HashMap<String, Entry>>,
}

impl MetricsRegistry {
    #[must_use]
    pub fn new(config: MetricsConfig) -> Self {
        Self {
            config,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Return the samples recorded since `from`, starting a poller when
    /// none runs for `id`.
    ///
    /// The poller stops when `cancel` fires, after the idle timeout, or when
    /// its retry budget runs out. Its messages go to `reports`.
    ///
    /// # Errors
    /// Returns error if the container is not in a measurable state.
    pub async fn request(
        self: &Arc<Self>,
        engine: Arc<dyn Engine>,
        id: &str,
        from: u64,
        cancel: CancellationToken,
        reports: mpsc::UnboundedSender<String>,
    ) -> Result<(Vec<MetricPoint>, u64), MetricsError> {
        let state = engine.state(id).await?;
        if NON_MEASURABLE.contains(&state.as_str()) {
            return Err(MetricsError::NotMeasurable(state));
        }

        let (samples, start) = {
            let mut entries = self.entries.write().await;
            let entry = entries.entry(id.to_string()).or_insert_with(|| Entry {
                samples: Arc::new(RingBuffer::new(self.config.capacity)),
                polling: false,
                last_accessed: Instant::now(),
            });
            entry.last_accessed = Instant::now();
            let start = !entry.polling;
            entry.polling = true;
            (entry.samples.clone(), start)
        };

        if start {
            tracing::debug!(container = id, "Starting metrics poller");
            let registry = Arc::clone(self);
            let id = id.to_string();
            tokio::spawn(async move {
                registry
                    .poll(engine, &id, samples, cancel, reports)
                    .await;
                registry.stop_polling(&id).await;
            });
        }

        let entries = self.entries.read().await;
        Ok(entries
            .get(id)
            .map_or_else(|| (Vec::new(), 0), |e| e.samples.get_from_count(from)))
    }

    /// Whether a poller is running for `id`.
    pub async fn is_polling(&self, id: &str) -> bool {
        self.entries
            .read()
            .await
            .get(id)
            .is_some_and(|e| e.polling)
    }

    async fn stop_polling(&self, id: &str) {
        if let Some(entry) = self.entries.write().await.get_mut(id) {
            entry.polling = false;
        }
    }

    async fn idle_for(&self, id: &str) -> std::time::Duration {
        self.entries
            .read()
            .await
            .get(id)
            .map(|e| e.last_accessed.elapsed())
            .unwrap_or_default()
    }

    async fn poll(
        &self,
        engine: Arc<dyn Engine>,
        id: &str,
        samples: Arc<RingBuffer<MetricPoint>>,
        cancel: CancellationToken,
        reports: mpsc::UnboundedSender<String>,
    ) {
        let mut ticker =
            tokio::time::interval_at(Instant::now() + self.config.tick, self.config.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut retries = self.config.retries;

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!(container = id, "Metrics poller cancelled");
                    return;
                }
                _ = ticker.tick() => {}
            }

            if self.idle_for(id).await > self.config.idle_timeout {
                let _ = reports.send("Idle metrics polling time period exceeded".to_string());
                return;
            }

            match engine.stats(id).await {
                Ok(sample) => {
                    retries = self.config.retries;
                    samples.add(MetricPoint::from_sample(&sample));
                }
                Err(e) => {
                    tracing::warn!(container = id, "Metrics sample failed: {e}");
                    let _ = reports.send(e.to_string());
                    retries = retries.saturating_sub(1);
                    if retries == 0 {
                        let _ = reports.send(format!("Stopping polling metrics for container {id}"));
                        return;
                    }
                }
            }
        }
    }
}
