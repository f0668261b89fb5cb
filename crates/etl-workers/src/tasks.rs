use etl_dispatch::TaskHandler;
use etl_protocol::{Destinations, HandlerError};
use serde_json::Value;
use tracing::info;

/// Task-queue smoke test: logs under the producer's id and returns nothing.
pub struct PingTask;

impl TaskHandler for PingTask {
    fn name(&self) -> &str {
        Destinations::PING_TASK
    }

    async fn handle(&self, _payload: Value) -> Result<Value, HandlerError> {
        info!("Sample logging from ping task");
        Ok(Value::Null)
    }
}
