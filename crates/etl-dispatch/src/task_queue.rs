//! Fire-and-forget task queue with a result store.
//!
//! Producers call [`TaskQueue::delay`] and get back an [`Ack`] immediately.
//! Workers pick the message up, run the handler registered under the task
//! name and record a [`PipelineResult`] that can be polled by job id. The
//! store keeps the most recent `result_capacity` jobs.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use etl_protocol::{Envelope, HandlerError, PipelineResult, PipelineStatus};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::adapter::{Ack, Backend, DispatchAdapter, deliver};
use crate::config::BackendConfig;
use crate::error::DispatchError;
use crate::handler::{TaskHandler, TaskHandlerDyn};
use crate::worker::{QueuedMessage, WorkerPool};

const BACKEND: Backend = Backend::TaskQueue;

#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<Inner>,
}

struct Inner {
    config: BackendConfig,
    sender: mpsc::Sender<QueuedMessage>,
    handlers: RwLock<HashMap<String, Arc<dyn TaskHandlerDyn>>>,
    results: DashMap<String, PipelineResult>,
    /// Job ids in acceptance order, for eviction.
    retained: Mutex<VecDeque<String>>,
    workers: WorkerPool,
    closed: AtomicBool,
}

impl TaskQueue {
    pub fn new(config: BackendConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.capacity.max(1));
        let workers = WorkerPool::new(config.queue.clone(), receiver);
        Self {
            inner: Arc::new(Inner {
                config,
                sender,
                handlers: RwLock::new(HashMap::new()),
                results: DashMap::new(),
                retained: Mutex::new(VecDeque::new()),
                workers,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.inner.config.queue
    }

    /// Register `handler` under its name, replacing any previous one.
    pub fn register<H: TaskHandler + 'static>(&self, handler: H) {
        let name = handler.name().to_string();
        info!(queue = %self.queue_name(), task = %name, "Registering task");
        self.inner.handlers.write().insert(name, Arc::new(handler));
    }

    pub fn has_task(&self, name: &str) -> bool {
        self.inner.handlers.read().contains_key(name)
    }

    /// Spawn the configured number of workers.
    pub fn start(&self) {
        let queue = self.clone();
        self.inner
            .workers
            .start(self.inner.config.workers, move |message| {
                let queue = queue.clone();
                async move { queue.process(message).await }
            });
        info!(
            queue = %self.queue_name(),
            workers = self.inner.config.workers,
            "Task queue started"
        );
    }

    pub fn is_running(&self) -> bool {
        self.inner.workers.is_running()
    }

    /// Stop the workers and refuse further sends. Queued messages are dropped.
    pub fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.workers.shutdown();
        info!(queue = %self.queue_name(), "Task queue stopped");
    }

    /// Enqueue `payload` for the task `task`.
    pub async fn delay<T: Serialize>(&self, task: &str, payload: T) -> Result<Ack, DispatchError> {
        self.send_payload(task, payload).await
    }

    /// Current state of a job: `PENDING` until a worker finishes it.
    pub fn result(&self, job_id: &str) -> Option<PipelineResult> {
        self.inner.results.get(job_id).map(|entry| entry.value().clone())
    }

    /// Number of job results currently held.
    pub fn result_count(&self) -> usize {
        self.inner.results.len()
    }

    fn retain(&self, job_id: String) {
        let capacity = self.inner.config.result_capacity.max(1);
        let mut retained = self.inner.retained.lock();
        retained.push_back(job_id);
        while retained.len() > capacity {
            if let Some(evicted) = retained.pop_front() {
                self.inner.results.remove(&evicted);
                debug!(queue = %self.queue_name(), job_id = %evicted, "Task result evicted");
            }
        }
    }

    async fn process(&self, message: QueuedMessage) {
        let (correlation_id, outcome) = self.run(&message.destination, &message.body).await;
        let result = match outcome {
            Ok(data) => PipelineResult {
                status: PipelineStatus::Success,
                correlation_id,
                data: Some(data),
                error: None,
            },
            Err(err) => PipelineResult {
                status: PipelineStatus::Error,
                correlation_id,
                data: None,
                error: Some(err.to_string()),
            },
        };
        // An evicted job keeps no result.
        match self.inner.results.get_mut(&message.job_id) {
            Some(mut entry) => *entry = result,
            None => debug!(job_id = %message.job_id, "Result of evicted job discarded"),
        }
    }

    async fn run(
        &self,
        task: &str,
        body: &str,
    ) -> (etl_protocol::CorrelationId, Result<Value, HandlerError>) {
        let handler = self.inner.handlers.read().get(task).cloned();
        let config = &self.inner.config;
        deliver(
            BACKEND,
            task,
            body,
            config.failure_policy,
            config.retry_delay,
            |envelope| {
                let handler = handler.clone();
                let task = task.to_string();
                async move {
                    let handler = handler.ok_or(HandlerError::NotFound(task))?;
                    handler
                        .handle_dyn(envelope.data.unwrap_or(Value::Null))
                        .await
                }
            },
        )
        .await
    }
}

impl DispatchAdapter for TaskQueue {
    fn backend(&self) -> Backend {
        BACKEND
    }

    async fn send(&self, destination: &str, envelope: Envelope<Value>) -> Result<Ack, DispatchError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(DispatchError::closed(BACKEND));
        }

        let job_id = uuid::Uuid::new_v4().to_string();
        let body = serde_json::to_string(&envelope)?;
        let correlation_id = envelope.correlation_id;

        self.inner
            .results
            .insert(job_id.clone(), PipelineResult::pending(correlation_id.clone()));

        let message = QueuedMessage {
            job_id: job_id.clone(),
            destination: destination.to_string(),
            body,
        };
        if let Err(err) = self.inner.sender.send(message).await {
            self.inner.results.remove(&job_id);
            warn!(queue = %self.queue_name(), task = destination, "Enqueue failed: {err}");
            return Err(DispatchError::Unavailable {
                backend: BACKEND,
                reason: err.to_string(),
            });
        }

        self.retain(job_id.clone());
        info!(queue = %self.queue_name(), task = destination, %job_id, "Task enqueued");
        Ok(Ack {
            backend: BACKEND,
            destination: destination.to_string(),
            message_id: job_id,
            correlation_id,
        })
    }

    async fn on_receive(&self, destination: &str, raw: &str) -> Result<Value, HandlerError> {
        self.run(destination, raw).await.1
    }
}
