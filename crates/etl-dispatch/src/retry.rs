//! Handler re-execution with exponential backoff.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use etl_protocol::{HandlerError, MessageStatus};
use futures_util::FutureExt;
use tracing::{error, info, warn};

use crate::config::FailurePolicy;

const MAX_DELAY: Duration = Duration::from_secs(5);

/// Run `operation` until it succeeds, fails permanently or exhausts the
/// attempts allowed by `policy`. A panicking attempt counts as a
/// [`HandlerError::Failed`].
pub(crate) async fn run_with_policy<F, Fut, T>(
    policy: FailurePolicy,
    initial_delay: Duration,
    operation_name: &str,
    mut operation: F,
) -> Result<T, HandlerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, HandlerError>>,
{
    let max_attempts = policy.max_attempts();
    let mut delay = initial_delay;
    let mut attempt = 1;

    loop {
        let outcome = AssertUnwindSafe(async { operation().await })
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                let message = panic_message(payload.as_ref());
                error!(operation = operation_name, attempt, "Handler panicked: {message}");
                Err(HandlerError::failed(format!("handler panicked: {message}")))
            });

        match outcome {
            Ok(value) => {
                if attempt > 1 {
                    info!(operation = operation_name, attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => {
                if attempt >= max_attempts || !err.is_retryable() {
                    if max_attempts > 1 {
                        warn!(
                            operation = operation_name,
                            attempt,
                            max_attempts,
                            error = %err,
                            "Handler failed permanently"
                        );
                    }
                    return Err(err);
                }

                warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts,
                    error = %err,
                    status = %MessageStatus::Retrying,
                    retry_in_ms = delay.as_millis() as u64,
                    "Handler failed, retrying"
                );

                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
                attempt += 1;
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else {
        "unknown panic"
    }
}
