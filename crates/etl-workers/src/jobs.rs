use etl_dispatch::TaskHandler;
use etl_protocol::{Destinations, HandlerError, context};
use serde_json::{Value, json};
use tracing::info;

/// Async-queue smoke test. Reports the correlation id it ran under.
pub struct PingJob;

impl TaskHandler for PingJob {
    fn name(&self) -> &str {
        Destinations::PING_JOB
    }

    async fn handle(&self, _payload: Value) -> Result<Value, HandlerError> {
        let correlation_id = context::current();
        info!("Starting async ping job");
        let result = json!({ "status": "success", "correlation_id": correlation_id });
        info!("Completed async ping job: {result}");
        Ok(result)
    }
}
