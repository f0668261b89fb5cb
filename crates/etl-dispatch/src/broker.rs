//! In-process publish/subscribe broker.
//!
//! Each topic is a `broadcast` channel of serialized envelopes. A
//! subscription spawns one consumer task per handler; replies are published
//! to the subscription's reply topic with the request's correlation id.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use etl_protocol::{Envelope, HandlerError, MessageStatus};
use etl_tracing::with_correlation;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::adapter::{Ack, Backend, DispatchAdapter, deliver};
use crate::config::BackendConfig;
use crate::error::DispatchError;
use crate::handler::{TopicHandler, TopicHandlerDyn};

const BACKEND: Backend = Backend::Broker;

/// Where a topic handler listens and where its replies go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub topic: String,
    pub reply_to: Option<String>,
}

impl Subscription {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            reply_to: None,
        }
    }

    pub fn reply_to(mut self, topic: impl Into<String>) -> Self {
        self.reply_to = Some(topic.into());
        self
    }
}

struct Subscriber {
    subscription: Subscription,
    handler: Arc<dyn TopicHandlerDyn>,
}

#[derive(Clone)]
pub struct Broker {
    inner: Arc<Inner>,
}

struct Inner {
    config: BackendConfig,
    topics: RwLock<HashMap<String, broadcast::Sender<Arc<str>>>>,
    subscribers: RwLock<Vec<Arc<Subscriber>>>,
    consumers: Mutex<Vec<JoinHandle<()>>>,
    offset: AtomicU64,
    closed: AtomicBool,
}

impl Broker {
    pub fn new(config: BackendConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                topics: RwLock::new(HashMap::new()),
                subscribers: RwLock::new(Vec::new()),
                consumers: Mutex::new(Vec::new()),
                offset: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    fn topic(&self, name: &str) -> broadcast::Sender<Arc<str>> {
        if let Some(sender) = self.inner.topics.read().get(name) {
            return sender.clone();
        }
        self.inner
            .topics
            .write()
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(self.inner.config.capacity.max(1)).0)
            .clone()
    }

    /// Attach `handler` to a topic and spawn its consumer. Must be called
    /// from within a Tokio runtime.
    pub fn subscribe<H: TopicHandler + 'static>(&self, subscription: Subscription, handler: H) {
        let mut rx = self.topic(&subscription.topic).subscribe();
        info!(
            topic = %subscription.topic,
            reply_to = ?subscription.reply_to,
            "Subscribing to topic"
        );

        let subscriber = Arc::new(Subscriber {
            subscription,
            handler: Arc::new(handler),
        });
        self.inner.subscribers.write().push(Arc::clone(&subscriber));

        let broker = self.clone();
        let handle = tokio::spawn(async move {
            let topic = subscriber.subscription.topic.clone();
            loop {
                match rx.recv().await {
                    Ok(raw) => {
                        // Errors are logged and answered inside `consume`.
                        let _ = broker.consume(&subscriber, &raw).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(%topic, skipped, "Consumer lagged, messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!(%topic, "Consumer stopped");
        });
        self.inner.consumers.lock().push(handle);
    }

    /// Publish `payload` to `topic` under the ambient correlation id.
    pub async fn publish<T: Serialize>(&self, topic: &str, payload: T) -> Result<Ack, DispatchError> {
        self.send_payload(topic, payload).await
    }

    /// Raw feed of a topic, mostly useful to observe replies.
    pub fn listen(&self, topic: &str) -> broadcast::Receiver<Arc<str>> {
        self.topic(topic).subscribe()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .subscribers
            .read()
            .iter()
            .filter(|s| s.subscription.topic == topic)
            .count()
    }

    pub fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        for handle in self.inner.consumers.lock().drain(..) {
            handle.abort();
        }
        info!("Broker stopped");
    }

    async fn consume(
        &self,
        subscriber: &Subscriber,
        raw: &str,
    ) -> Result<Option<Envelope<Value>>, HandlerError> {
        let topic = subscriber.subscription.topic.as_str();
        let handler: &dyn TopicHandlerDyn = subscriber.handler.as_ref();
        let config = &self.inner.config;
        let (correlation_id, outcome) = deliver(
            BACKEND,
            topic,
            raw,
            config.failure_policy,
            config.retry_delay,
            move |envelope| handler.handle_dyn(envelope),
        )
        .await;

        let Some(reply_to) = subscriber.subscription.reply_to.as_deref() else {
            return outcome;
        };
        let reply = match &outcome {
            Ok(reply) => reply.clone(),
            Err(err) => Some(
                Envelope::with_correlation_id(
                    correlation_id.clone(),
                    json!({ "error": err.to_string() }),
                )
                .with_status(MessageStatus::Failed),
            ),
        };

        if let Some(reply) = reply {
            let published = with_correlation(correlation_id, self.send(reply_to, reply)).await;
            if let Err(err) = published {
                error!(topic = reply_to, "Failed to publish reply: {err}");
            }
        }
        outcome
    }
}

impl DispatchAdapter for Broker {
    fn backend(&self) -> Backend {
        BACKEND
    }

    /// Publish to every current subscriber of `destination`. A topic nobody
    /// listens on accepts the message and drops it.
    async fn send(&self, destination: &str, envelope: Envelope<Value>) -> Result<Ack, DispatchError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(DispatchError::closed(BACKEND));
        }

        let body: Arc<str> = serde_json::to_string(&envelope)?.into();
        let delivered = self.topic(destination).send(body).unwrap_or(0);
        let offset = self.inner.offset.fetch_add(1, Ordering::SeqCst);

        info!(topic = destination, offset, delivered, "Message published");
        Ok(Ack {
            backend: BACKEND,
            destination: destination.to_string(),
            message_id: offset.to_string(),
            correlation_id: envelope.correlation_id,
        })
    }

    /// Run every handler subscribed to `destination` on `raw`, publishing
    /// their replies. Returns the reply payloads in subscription order.
    async fn on_receive(&self, destination: &str, raw: &str) -> Result<Value, HandlerError> {
        let subscribers: Vec<_> = self
            .inner
            .subscribers
            .read()
            .iter()
            .filter(|s| s.subscription.topic == destination)
            .cloned()
            .collect();
        if subscribers.is_empty() {
            return Err(HandlerError::NotFound(destination.to_string()));
        }

        let mut replies = Vec::with_capacity(subscribers.len());
        for subscriber in subscribers {
            if let Some(reply) = self.consume(&subscriber, raw).await? {
                replies.push(reply.data.unwrap_or(Value::Null));
            }
        }
        Ok(Value::Array(replies))
    }
}
