//! Model-style tasks: one-time setup, then a prediction per job.

use std::future::Future;

use etl_dispatch::TaskHandler;
use etl_protocol::{Destinations, HandlerError};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{error, info};

pub trait PipelineTask: Send + Sync {
    fn name(&self) -> &str;

    /// Load whatever the task needs. Runs once, before the first prediction.
    fn setup(&self) -> impl Future<Output = Result<(), HandlerError>> + Send {
        async { Ok(()) }
    }

    fn predict(&self, kwargs: Value) -> impl Future<Output = Result<Value, HandlerError>> + Send;
}

/// Adapts a [`PipelineTask`] to the task queue.
pub struct PipelineRunner<T> {
    task: T,
    ready: OnceCell<()>,
}

impl<T: PipelineTask> PipelineRunner<T> {
    pub fn new(task: T) -> Self {
        Self {
            task,
            ready: OnceCell::new(),
        }
    }
}

impl<T: PipelineTask> TaskHandler for PipelineRunner<T> {
    fn name(&self) -> &str {
        self.task.name()
    }

    async fn handle(&self, payload: Value) -> Result<Value, HandlerError> {
        let name = self.task.name();
        let outcome = async {
            self.ready.get_or_try_init(|| self.task.setup()).await?;
            self.task.predict(payload).await
        }
        .await;
        if let Err(err) = &outcome {
            error!(pipeline = name, "Prediction failed: {err}");
        }
        outcome
    }
}

#[derive(Debug, Deserialize)]
struct HelloInput {
    name: String,
}

/// Greets `{"name": ..}`.
pub struct HelloWorld;

impl PipelineTask for HelloWorld {
    fn name(&self) -> &str {
        Destinations::HELLO_WORLD_TASK
    }

    async fn setup(&self) -> Result<(), HandlerError> {
        info!("Hello World AI initiated");
        Ok(())
    }

    async fn predict(&self, kwargs: Value) -> Result<Value, HandlerError> {
        let input: HelloInput = serde_json::from_value(kwargs)?;
        info!("received input name: {}", input.name);
        Ok(Value::String(format!("Hello {}", input.name)))
    }
}
