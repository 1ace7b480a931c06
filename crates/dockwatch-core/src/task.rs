//! Long-running task monitor.
//!
//! A background operation reports any number of progress steps and errors,
//! then exactly one completion, through a [`Monitor`]. The caller blocks in
//! [`LongTask::run`] and receives each signal, in order, on a
//! [`TaskObserver`].

use std::future::Future;

use async_trait::async_trait;
use tokio::sync::mpsc;

enum Signal<T, E> {
    Step(T),
    Error(E),
    Done,
}

/// Sending side handed to the background operation.
///
/// Clones may be moved into sub-tasks. The operation must call
/// [`Monitor::done`] once every clone has finished reporting; a monitor
/// whose clones are all dropped without it also ends the run.
pub struct Monitor<T, E> {
    tx: mpsc::UnboundedSender<Signal<T, E>>,
}

impl<T, E> Clone for Monitor<T, E> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T, E> Monitor<T, E> {
    /// Report progress.
    pub fn step(&self, step: T) {
        let _ = self.tx.send(Signal::Step(step));
    }

    /// Report a non-fatal error; the task keeps running.
    pub fn error(&self, error: E) {
        let _ = self.tx.send(Signal::Error(error));
    }

    /// Signal completion.
    pub fn done(self) {
        let _ = self.tx.send(Signal::Done);
    }
}

/// Receives the signals of one run.
#[async_trait]
pub trait TaskObserver<T: Send + 'static, E: Send + 'static>: Send {
    async fn on_step(&mut self, step: T);

    async fn on_error(&mut self, error: E);

    /// Called exactly once, after every step and error of the run.
    async fn on_done(&mut self);
}

/// Runner for monitored background operations.
pub struct LongTask;

impl LongTask {
    /// Spawn `function(monitor, args)` and drive `observer` until it completes.
    pub async fn run<T, E, A, F, Fut, O>(function: F, args: A, observer: &mut O)
    where
        T: Send + 'static,
        E: Send + 'static,
        F: FnOnce(Monitor<T, E>, A) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
        O: TaskObserver<T, E> + ?Sized,
    {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(function(Monitor { tx }, args));

        loop {
            match rx.recv().await {
                Some(Signal::Step(step)) => observer.on_step(step).await,
                Some(Signal::Error(error)) => observer.on_error(error).await,
                Some(Signal::Done) => break,
                None => {
                    tracing::warn!("Long task ended without signalling completion");
                    break;
                }
            }
        }

        observer.on_done().await;
    }
}
