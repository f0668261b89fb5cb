//! Builds the enabled backends from configuration.

use std::collections::HashMap;

use etl_protocol::Envelope;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info};

use crate::adapter::{Ack, Backend, DispatchAdapterDyn};
use crate::async_queue::AsyncQueue;
use crate::broker::Broker;
use crate::config::{BackendConfig, DispatchConfig};
use crate::error::DispatchError;
use crate::task_queue::TaskQueue;

/// The set of backends this process can dispatch to.
///
/// A backend whose configuration is incomplete or points at a transport
/// this build cannot reach is left out; sends to it fail with
/// [`DispatchError::Disabled`] instead of aborting startup.
#[derive(Default)]
pub struct Dispatchers {
    task_queue: Option<TaskQueue>,
    async_queue: Option<AsyncQueue>,
    broker: Option<Broker>,
    disabled: HashMap<Backend, String>,
}

impl Dispatchers {
    pub fn from_config(config: &DispatchConfig) -> Self {
        let mut dispatchers = Self::default();
        dispatchers.task_queue =
            dispatchers.build(Backend::TaskQueue, &config.task_queue, TaskQueue::new);
        dispatchers.async_queue =
            dispatchers.build(Backend::AsyncQueue, &config.async_queue, AsyncQueue::new);
        dispatchers.broker = dispatchers.build(Backend::Broker, &config.broker, Broker::new);
        dispatchers
    }

    /// No backend enabled.
    pub fn none() -> Self {
        Self::from_config(&DispatchConfig::disabled())
    }

    fn build<T>(
        &mut self,
        backend: Backend,
        config: &BackendConfig,
        make: impl FnOnce(BackendConfig) -> T,
    ) -> Option<T> {
        match config.validate() {
            Ok(()) => {
                info!(%backend, queue = %config.queue, "Backend enabled");
                Some(make(config.clone()))
            }
            Err(reason) => {
                if config.enabled {
                    error!(%backend, "Backend disabled: {reason}");
                } else {
                    info!(%backend, "Backend disabled: {reason}");
                }
                self.disabled.insert(backend, reason);
                None
            }
        }
    }

    pub fn task_queue(&self) -> Result<&TaskQueue, DispatchError> {
        self.task_queue.as_ref().ok_or_else(|| self.disabled_error(Backend::TaskQueue))
    }

    pub fn async_queue(&self) -> Result<&AsyncQueue, DispatchError> {
        self.async_queue.as_ref().ok_or_else(|| self.disabled_error(Backend::AsyncQueue))
    }

    pub fn broker(&self) -> Result<&Broker, DispatchError> {
        self.broker.as_ref().ok_or_else(|| self.disabled_error(Backend::Broker))
    }

    pub fn adapter(&self, backend: Backend) -> Result<&dyn DispatchAdapterDyn, DispatchError> {
        let adapter: &dyn DispatchAdapterDyn = match backend {
            Backend::TaskQueue => self.task_queue()?,
            Backend::AsyncQueue => self.async_queue()?,
            Backend::Broker => self.broker()?,
        };
        Ok(adapter)
    }

    pub fn is_enabled(&self, backend: Backend) -> bool {
        match backend {
            Backend::TaskQueue => self.task_queue.is_some(),
            Backend::AsyncQueue => self.async_queue.is_some(),
            Backend::Broker => self.broker.is_some(),
        }
    }

    pub fn enabled(&self) -> Vec<Backend> {
        Backend::ALL
            .into_iter()
            .filter(|b| self.is_enabled(*b))
            .collect()
    }

    /// Why `backend` is off, if it is.
    pub fn disabled_reason(&self, backend: Backend) -> Option<&str> {
        self.disabled.get(&backend).map(String::as_str)
    }

    pub async fn send(
        &self,
        backend: Backend,
        destination: &str,
        envelope: Envelope<Value>,
    ) -> Result<Ack, DispatchError> {
        self.adapter(backend)?.send_dyn(destination, envelope).await
    }

    /// Wrap `payload` under the ambient correlation id and send it.
    pub async fn send_payload<T: Serialize>(
        &self,
        backend: Backend,
        destination: &str,
        payload: T,
    ) -> Result<Ack, DispatchError> {
        let envelope = Envelope::new(serde_json::to_value(payload)?);
        self.send(backend, destination, envelope).await
    }

    /// Start queue workers. Broker consumers start when they subscribe.
    pub fn start(&self) {
        if let Some(queue) = &self.task_queue {
            queue.start();
        }
        if let Some(queue) = &self.async_queue {
            queue.start();
        }
    }

    pub fn shutdown(&self) {
        if let Some(queue) = &self.task_queue {
            queue.shutdown();
        }
        if let Some(queue) = &self.async_queue {
            queue.shutdown();
        }
        if let Some(broker) = &self.broker {
            broker.shutdown();
        }
    }

    fn disabled_error(&self, backend: Backend) -> DispatchError {
        DispatchError::Disabled {
            backend,
            reason: self
                .disabled
                .get(&backend)
                .cloned()
                .unwrap_or_else(|| "not configured".into()),
        }
    }
}
