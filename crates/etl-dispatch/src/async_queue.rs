//! Async job queue whose results can be awaited by the producer.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use etl_protocol::{CorrelationId, Envelope, HandlerError};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::adapter::{Ack, Backend, DispatchAdapter, deliver};
use crate::config::BackendConfig;
use crate::error::DispatchError;
use crate::handler::{TaskHandler, TaskHandlerDyn};
use crate::worker::{QueuedMessage, WorkerPool};

const BACKEND: Backend = Backend::AsyncQueue;

type JobOutcome = Result<Value, HandlerError>;

/// Pending job returned by [`AsyncQueue::enqueue`].
pub struct JobHandle {
    ack: Ack,
    rx: oneshot::Receiver<JobOutcome>,
}

impl JobHandle {
    pub fn job_id(&self) -> &str {
        &self.ack.message_id
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.ack.correlation_id
    }

    pub fn ack(&self) -> &Ack {
        &self.ack
    }

    /// Wait for the worker to finish the job.
    pub async fn wait(self) -> Result<Value, DispatchError> {
        let job_id = self.ack.message_id;
        match self.rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => Err(DispatchError::JobFailed { job_id, source }),
            Err(_) => Err(DispatchError::ResultDropped { job_id }),
        }
    }
}

/// Removes a registered waiter unless the job reached the queue.
struct WaiterGuard<'a> {
    pending: &'a DashMap<String, oneshot::Sender<JobOutcome>>,
    job_id: &'a str,
    armed: bool,
}

impl WaiterGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.pending.remove(self.job_id);
        }
    }
}

#[derive(Clone)]
pub struct AsyncQueue {
    inner: Arc<Inner>,
}

struct Inner {
    config: BackendConfig,
    sender: mpsc::Sender<QueuedMessage>,
    functions: RwLock<HashMap<String, Arc<dyn TaskHandlerDyn>>>,
    pending: DashMap<String, oneshot::Sender<JobOutcome>>,
    workers: WorkerPool,
    closed: AtomicBool,
}

impl AsyncQueue {
    pub fn new(config: BackendConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.capacity.max(1));
        let workers = WorkerPool::new(config.queue.clone(), receiver);
        Self {
            inner: Arc::new(Inner {
                config,
                sender,
                functions: RwLock::new(HashMap::new()),
                pending: DashMap::new(),
                workers,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.inner.config.queue
    }

    pub fn register<H: TaskHandler + 'static>(&self, function: H) {
        let name = function.name().to_string();
        info!(queue = %self.queue_name(), function = %name, "Registering job function");
        self.inner.functions.write().insert(name, Arc::new(function));
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.inner.functions.read().contains_key(name)
    }

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
            "Async queue started"
        );
    }

    pub fn is_running(&self) -> bool {
        self.inner.workers.is_running()
    }

    /// Stop the workers. Waiters on unfinished jobs get
    /// [`DispatchError::ResultDropped`].
    pub fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.workers.shutdown();
        self.inner.pending.clear();
        info!(queue = %self.queue_name(), "Async queue stopped");
    }

    /// Number of enqueued jobs somebody is still waiting on.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// Enqueue a job and keep a handle to await its result.
    pub async fn enqueue<T: Serialize>(
        &self,
        function: &str,
        payload: T,
    ) -> Result<JobHandle, DispatchError> {
        let envelope = Envelope::new(serde_json::to_value(payload)?);
        let (tx, rx) = oneshot::channel();
        let ack = self.push(function, envelope, Some(tx)).await?;
        Ok(JobHandle { ack, rx })
    }

    /// Enqueue a job and wait for its result.
    pub async fn apply<T: Serialize>(&self, function: &str, payload: T) -> Result<Value, DispatchError> {
        self.enqueue(function, payload).await?.wait().await
    }

    async fn push(
        &self,
        function: &str,
        envelope: Envelope<Value>,
        waiter: Option<oneshot::Sender<JobOutcome>>,
    ) -> Result<Ack, DispatchError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(DispatchError::closed(BACKEND));
        }

        let job_id = uuid::Uuid::new_v4().to_string();
        let body = serde_json::to_string(&envelope)?;

        // Registered before the send so a fast worker cannot miss the waiter.
        // The guard withdraws it if the send fails or this future is dropped.
        let guard = waiter.map(|tx| {
            self.inner.pending.insert(job_id.clone(), tx);
            WaiterGuard {
                pending: &self.inner.pending,
                job_id: &job_id,
                armed: true,
            }
        });

        let message = QueuedMessage {
            job_id: job_id.clone(),
            destination: function.to_string(),
            body,
        };
        if let Err(err) = self.inner.sender.send(message).await {
            warn!(queue = %self.queue_name(), function, "Enqueue failed: {err}");
            return Err(DispatchError::Unavailable {
                backend: BACKEND,
                reason: err.to_string(),
            });
        }

        if let Some(guard) = guard {
            guard.disarm();
        }

        info!(queue = %self.queue_name(), function, %job_id, "Job enqueued");
        Ok(Ack {
            backend: BACKEND,
            destination: function.to_string(),
            message_id: job_id.clone(),
            correlation_id: envelope.correlation_id,
        })
    }

    async fn process(&self, message: QueuedMessage) {
        let (_, outcome) = self.run(&message.destination, &message.body).await;
        match self.inner.pending.remove(&message.job_id) {
            Some((_, tx)) => {
                if tx.send(outcome).is_err() {
                    debug!(job_id = %message.job_id, "Job waiter went away");
                }
            }
            None => debug!(job_id = %message.job_id, "Job finished with no waiter"),
        }
    }

    async fn run(&self, function: &str, body: &str) -> (CorrelationId, JobOutcome) {
        let handler = self.inner.functions.read().get(function).cloned();
        let config = &self.inner.config;
        deliver(
            BACKEND,
            function,
            body,
            config.failure_policy,
            config.retry_delay,
            |envelope| {
                let handler = handler.clone();
                let function = function.to_string();
                async move {
                    let handler = handler.ok_or(HandlerError::NotFound(function))?;
                    handler
                        .handle_dyn(envelope.data.unwrap_or(Value::Null))
                        .await
                }
            },
        )
        .await
    }
}

impl DispatchAdapter for AsyncQueue {
    fn backend(&self) -> Backend {
        BACKEND
    }

    /// Fire-and-forget enqueue; use [`AsyncQueue::enqueue`] to await the result.
    async fn send(&self, destination: &str, envelope: Envelope<Value>) -> Result<Ack, DispatchError> {
        self.push(destination, envelope, None).await
    }

    async fn on_receive(&self, destination: &str, raw: &str) -> Result<Value, HandlerError> {
        self.run(destination, raw).await.1
    }
}
