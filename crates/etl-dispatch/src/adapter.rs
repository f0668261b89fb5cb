//! The dispatch adapter contract shared by every backend.
//!
//! Outbound, an adapter serializes an [`Envelope`] whose correlation id was
//! taken from the caller's context. Inbound, it decodes the envelope, opens a
//! correlation scope with the carried id (minting one when the message has
//! none) and runs the registered handler inside it, so every line the
//! handler logs is tagged with the producer's id.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use etl_protocol::{CorrelationId, Envelope, HandlerError};
use etl_tracing::with_correlation;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error};

use crate::config::FailurePolicy;
use crate::error::DispatchError;
use crate::handler::BoxFuture;
use crate::retry::run_with_policy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Fire-and-forget tasks with a result store.
    TaskQueue,
    /// Jobs whose result can be awaited by the producer.
    AsyncQueue,
    /// Publish/subscribe topics.
    Broker,
}

impl Backend {
    pub const ALL: [Backend; 3] = [Backend::TaskQueue, Backend::AsyncQueue, Backend::Broker];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskQueue => "task queue",
            Self::AsyncQueue => "async queue",
            Self::Broker => "broker",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receipt for an accepted message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ack {
    pub backend: Backend,
    pub destination: String,
    /// Job id for queues, topic offset for the broker.
    pub message_id: String,
    pub correlation_id: CorrelationId,
}

pub trait DispatchAdapter: Send + Sync {
    fn backend(&self) -> Backend;

    /// Serialize and hand `envelope` to the transport.
    fn send(
        &self,
        destination: &str,
        envelope: Envelope<Value>,
    ) -> impl Future<Output = Result<Ack, DispatchError>> + Send;

    /// Decode a raw envelope and run the handler registered for
    /// `destination` inside the envelope's correlation scope.
    fn on_receive(
        &self,
        destination: &str,
        raw: &str,
    ) -> impl Future<Output = Result<Value, HandlerError>> + Send;

    /// Wrap `payload` in an envelope stamped with the ambient correlation id
    /// and send it.
    fn send_payload<T: Serialize>(
        &self,
        destination: &str,
        payload: T,
    ) -> impl Future<Output = Result<Ack, DispatchError>> + Send
    where
        Self: Sized,
    {
        let envelope = serde_json::to_value(payload).map(Envelope::new);
        async move { self.send(destination, envelope?).await }
    }
}

/// Object-safe wrapper for [`DispatchAdapter`].
pub trait DispatchAdapterDyn: Send + Sync {
    fn backend_dyn(&self) -> Backend;
    fn send_dyn<'a>(
        &'a self,
        destination: &'a str,
        envelope: Envelope<Value>,
    ) -> BoxFuture<'a, Result<Ack, DispatchError>>;
    fn on_receive_dyn<'a>(
        &'a self,
        destination: &'a str,
        raw: &'a str,
    ) -> BoxFuture<'a, Result<Value, HandlerError>>;
}

impl<T: DispatchAdapter> DispatchAdapterDyn for T {
    fn backend_dyn(&self) -> Backend {
        self.backend()
    }
    fn send_dyn<'a>(
        &'a self,
        destination: &'a str,
        envelope: Envelope<Value>,
    ) -> BoxFuture<'a, Result<Ack, DispatchError>> {
        Box::pin(self.send(destination, envelope))
    }
    fn on_receive_dyn<'a>(
        &'a self,
        destination: &'a str,
        raw: &'a str,
    ) -> BoxFuture<'a, Result<Value, HandlerError>> {
        Box::pin(self.on_receive(destination, raw))
    }
}

/// Inbound half shared by all backends: decode, scope, run with policy.
///
/// Returns the id the work ran under alongside the outcome so callers can
/// record results against it.
pub(crate) async fn deliver<T, F, Fut>(
    backend: Backend,
    destination: &str,
    raw: &str,
    policy: FailurePolicy,
    retry_delay: Duration,
    mut run: F,
) -> (CorrelationId, Result<T, HandlerError>)
where
    F: FnMut(Envelope<Value>) -> Fut,
    Fut: Future<Output = Result<T, HandlerError>>,
{
    let envelope: Envelope<Value> = match serde_json::from_str(raw) {
        Ok(envelope) => envelope,
        Err(err) => {
            let id = CorrelationId::mint();
            let err = HandlerError::from(err);
            with_correlation(id.clone(), async {
                error!(%backend, destination, "Discarding undecodable message: {err}");
            })
            .await;
            return (id, Err(err));
        }
    };

    let id = envelope.correlation_id.clone();
    let outcome = with_correlation(id.clone(), async move {
        debug!(%backend, destination, "Message received");
        let result =
            run_with_policy(policy, retry_delay, destination, || run(envelope.clone())).await;
        match &result {
            Ok(_) => debug!(%backend, destination, "Message processed"),
            Err(err) => error!(%backend, destination, "Handler failed: {err}"),
        }
        result
    })
    .await;
    (id, outcome)
}

