use async_trait::async_trait;
use jobq_core::{JobError, Payload, QueueName, StatusCode, STATUS_OK};
use std::collections::HashMap;
use std::sync::Arc;

/// A job handler invoked once per message popped from its queue.
///
/// The returned status code is 0 for success and anything else for a
/// logical failure; early exits use the [`JobError`] variants.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, payload: Payload) -> jobq_core::Result<StatusCode>;
}

/// Immutable mapping from queue name to the handlers registered for it.
///
/// Built once through [`HandlerRegistryBuilder`] and never mutated after;
/// queue order and per-queue handler order both follow registration order.
/// The queue order is also the tie-break order the poll loop hands to the
/// broker.
pub struct HandlerRegistry {
    queues: Vec<QueueName>,
    handlers: HashMap<QueueName, Vec<Arc<dyn JobHandler>>>,
}

impl HandlerRegistry {
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::new()
    }

    /// Queue names in registration order.
    pub fn queue_names(&self) -> &[QueueName] {
        &self.queues
    }

    /// Handlers registered for `queue`, in registration order.
    pub fn handlers(&self, queue: &str) -> &[Arc<dyn JobHandler>] {
        self.handlers.get(queue).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }
}

pub struct HandlerRegistryBuilder {
    queues: Vec<QueueName>,
    handlers: HashMap<QueueName, Vec<Arc<dyn JobHandler>>>,
}

impl HandlerRegistryBuilder {
    pub fn new() -> Self {
        HandlerRegistryBuilder {
            queues: Vec::new(),
            handlers: HashMap::new(),
        }
    }

    pub fn register<H: JobHandler + 'static>(
        self,
        queue: impl Into<QueueName>,
        handler: H,
    ) -> Self {
        self.register_arc(queue, Arc::new(handler))
    }

    pub fn register_arc(
        mut self,
        queue: impl Into<QueueName>,
        handler: Arc<dyn JobHandler>,
    ) -> Self {
        let queue = queue.into();
        if !self.handlers.contains_key(&queue) {
            self.queues.push(queue.clone());
        }
        self.handlers.entry(queue).or_default().push(handler);
        self
    }

    pub fn build(self) -> HandlerRegistry {
        HandlerRegistry {
            queues: self.queues,
            handlers: self.handlers,
        }
    }
}

impl Default for HandlerRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Acknowledges every message without looking at it.
pub struct AckHandler;

#[async_trait]
impl JobHandler for AckHandler {
    async fn run(&self, _payload: Payload) -> jobq_core::Result<StatusCode> {
        Ok(STATUS_OK)
    }
}

/// Simulates work by sleeping before acknowledging.
pub struct SleepHandler {
    duration_ms: u64,
}

impl SleepHandler {
    pub fn new(duration_ms: u64) -> Self {
        SleepHandler { duration_ms }
    }
}

#[async_trait]
impl JobHandler for SleepHandler {
    async fn run(&self, _payload: Payload) -> jobq_core::Result<StatusCode> {
        tokio::time::sleep(tokio::time::Duration::from_millis(self.duration_ms)).await;
        Ok(STATUS_OK)
    }
}

/// Validates that the payload is well-formed JSON; a parse error is a
/// regular handler failure.
pub struct JsonValidateHandler;

#[async_trait]
impl JobHandler for JsonValidateHandler {
    async fn run(&self, payload: Payload) -> jobq_core::Result<StatusCode> {
        serde_json::from_slice::<serde_json::Value>(&payload)
            .map_err(|e| JobError::Other(anyhow::anyhow!("invalid JSON payload: {}", e)))?;
        Ok(STATUS_OK)
    }
}
