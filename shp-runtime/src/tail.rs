//! Concurrent log tails, at most one per container
use std::collections::HashSet;

use futures::StreamExt;
use parking_lot::Mutex;
use shp_client::LogApi;
use shp_core::ObjectRef;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::sink::LogSink;

/// Followed log streams of the containers of one workload
///
/// Each tail runs as its own task and writes `[container] line` records into the shared sink.
pub struct Tail<L> {
    logs: L,
    sink: LogSink,
    token: CancellationToken,
    started: Mutex<HashSet<(String, String)>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<L: LogApi> Tail<L> {
    /// Tails writing into `sink`
    pub fn new(logs: L, sink: LogSink) -> Self {
        Self {
            logs,
            sink,
            token: CancellationToken::new(),
            started: Mutex::new(HashSet::new()),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Starts following `container` unless it is already followed or tails were stopped
    ///
    /// Returns whether a new tail was started.
    pub fn start(&self, pod: &ObjectRef, container: &str) -> bool {
        if self.token.is_cancelled() {
            return false;
        }
        if !self.started.lock().insert((pod.name.clone(), container.to_string())) {
            return false;
        }
        tracing::debug!(%pod, container, "starting log tail");
        let (logs, sink, token) = (self.logs.clone(), self.sink.clone(), self.token.clone());
        let (pod, container) = (pod.clone(), container.to_string());
        let task = tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = follow(logs, sink, &pod, &container) => {}
            }
            tracing::trace!(%pod, %container, "log tail ended");
        });
        self.tasks.lock().push(task);
        true
    }

    /// Whether `container` of `pod` has been tailed
    pub fn is_started(&self, pod: &str, container: &str) -> bool {
        self.started.lock().contains(&(pod.to_string(), container.to_string()))
    }

    /// Signals every tail to stop
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Waits for all tails to end
    pub async fn join(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(err) = task.await {
                tracing::warn!(error = %err, "log tail task failed");
            }
        }
    }
}

async fn follow<L: LogApi>(logs: L, sink: LogSink, pod: &ObjectRef, container: &str) {
    let mut lines = match logs.logs(pod, container, true).await {
        Ok(lines) => lines,
        Err(err) => {
            tracing::warn!(%pod, container, error = %err, "could not open log stream");
            return;
        }
    };
    while let Some(line) = lines.next().await {
        match line {
            Ok(line) => sink.write_str(&format!("[{container}] {line}\n")),
            Err(err) => {
                tracing::warn!(%pod, container, error = %err, "log stream failed");
                return;
            }
        }
    }
}
