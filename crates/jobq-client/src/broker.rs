use async_trait::async_trait;
use jobq_core::{Delivery, QueueName};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Broker connection is closed")]
    Closed,

    #[error("No queues to pop from")]
    NoQueues,

    #[error("Broker error: {0}")]
    Other(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A pooled connection to the message broker.
///
/// Implementations own reconnection and transport retry; the worker only
/// sees the pop/close contract below.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Blocking multi-queue pop.
    ///
    /// Blocks until a message is available on any of `queues`, then returns
    /// it. `Ok(None)` means the implementation-defined wait elapsed with no
    /// data; callers loop. Messages are FIFO within a single queue; when
    /// several queues are ready at once the first in `queues` wins.
    async fn pop(&self, queues: &[QueueName]) -> crate::Result<Option<Delivery>>;

    /// Release the connection pool. The worker calls this exactly once,
    /// after all in-flight jobs have drained.
    async fn close(&self) -> crate::Result<()>;
}

/// Factory for the worker's lazily created broker pool.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn connect(&self) -> crate::Result<Arc<dyn Broker>>;
}
