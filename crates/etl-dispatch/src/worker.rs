//! Consumer tasks draining an in-process queue.

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Message travelling through an in-process queue. `job_id` and
/// `destination` play the role of broker headers; `body` is the serialized
/// envelope and the only thing the consumer decodes.
#[derive(Debug, Clone)]
pub(crate) struct QueuedMessage {
    pub job_id: String,
    pub destination: String,
    pub body: String,
}

/// Shared receiver plus the consumer tasks pulling from it.
pub(crate) struct WorkerPool {
    name: String,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<QueuedMessage>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(name: impl Into<String>, receiver: mpsc::Receiver<QueuedMessage>) -> Self {
        Self {
            name: name.into(),
            receiver: Arc::new(tokio::sync::Mutex::new(receiver)),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn is_running(&self) -> bool {
        !self.handles.lock().is_empty()
    }

    /// Spawn `count` consumers, each calling `process` for every message.
    /// Does nothing if consumers are already running.
    pub fn start<F, Fut>(&self, count: usize, process: F)
    where
        F: Fn(QueuedMessage) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut handles = self.handles.lock();
        if !handles.is_empty() {
            return;
        }
        for worker in 0..count.max(1) {
            let receiver = Arc::clone(&self.receiver);
            let process = process.clone();
            let name = self.name.clone();
            handles.push(tokio::spawn(async move {
                debug!(queue = %name, worker, "Worker started");
                loop {
                    let next = receiver.lock().await.recv().await;
                    let Some(message) = next else { break };
                    process(message).await;
                }
                debug!(queue = %name, worker, "Worker stopped");
            }));
        }
    }

    pub fn shutdown(&self) {
        for handle in self.handles.lock().drain(..) {
            handle.abort();
        }
    }
}
