use crate::{Broker, BrokerConnector, BrokerError};
use async_trait::async_trait;
use jobq_core::{Delivery, Payload, QueueName};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

/// In-memory broker used by tests and the demo binary.
///
/// Messages are FIFO within a queue; a pop over several queues drains them
/// in the order they are listed, which is the tie-break contract real
/// brokers expose for multi-key blocking pops.
pub struct MemoryBroker {
    queues: Mutex<HashMap<QueueName, VecDeque<Payload>>>,
    notify: Notify,
    closed: AtomicBool,
    pop_wait: Duration,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::with_pop_wait(Duration::from_millis(500))
    }

    /// `pop_wait` is how long a pop blocks before returning empty-handed.
    pub fn with_pop_wait(pop_wait: Duration) -> Self {
        MemoryBroker {
            queues: Mutex::new(HashMap::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            pop_wait,
        }
    }

    /// Enqueue a message, waking one blocked pop.
    pub fn push(&self, queue: impl Into<QueueName>, payload: Payload) {
        let queue = queue.into();
        {
            let mut queues = self.queues.lock();
            queues.entry(queue).or_default().push_back(payload);
        }
        self.notify.notify_one();
    }

    /// Number of messages currently queued on `queue`.
    pub fn pending(&self, queue: &str) -> usize {
        let queues = self.queues.lock();
        queues.get(queue).map(|q| q.len()).unwrap_or(0)
    }

    fn try_pop(&self, wanted: &[QueueName]) -> Option<Delivery> {
        let mut queues = self.queues.lock();
        for name in wanted {
            if let Some(queue) = queues.get_mut(name) {
                if let Some(payload) = queue.pop_front() {
                    return Some(Delivery::new(name.clone(), payload));
                }
            }
        }
        None
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn pop(&self, queues: &[QueueName]) -> crate::Result<Option<Delivery>> {
        if queues.is_empty() {
            return Err(BrokerError::NoQueues);
        }

        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(BrokerError::Closed);
            }

            if let Some(delivery) = self.try_pop(queues) {
                debug!(queue = %delivery.queue, bytes = delivery.payload.len(), "popped message");
                return Ok(Some(delivery));
            }

            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(self.pop_wait) => return Ok(None),
            }
        }
    }

    async fn close(&self) -> crate::Result<()> {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
        Ok(())
    }
}

/// Connector handing out a shared [`MemoryBroker`].
pub struct MemoryConnector {
    broker: Arc<MemoryBroker>,
}

impl MemoryConnector {
    pub fn new(broker: Arc<MemoryBroker>) -> Self {
        MemoryConnector { broker }
    }
}

#[async_trait]
impl BrokerConnector for MemoryConnector {
    async fn connect(&self) -> crate::Result<Arc<dyn Broker>> {
        Ok(self.broker.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(names: &[&str]) -> Vec<QueueName> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[tokio::test]
    async fn test_fifo_within_queue() {
        let broker = MemoryBroker::new();
        broker.push("q1", b"first".to_vec());
        broker.push("q1", b"second".to_vec());

        let queues = names(&["q1"]);
        let first = broker.pop(&queues).await.unwrap().unwrap();
        let second = broker.pop(&queues).await.unwrap().unwrap();

        assert_eq!(first.payload, b"first");
        assert_eq!(second.payload, b"second");
    }

    #[tokio::test]
    async fn test_tie_break_follows_listed_order() {
        let broker = MemoryBroker::new();
        broker.push("q2", b"b".to_vec());
        broker.push("q1", b"a".to_vec());

        // Both queues are ready; the listed order decides.
        let delivery = broker.pop(&names(&["q1", "q2"])).await.unwrap().unwrap();
        assert_eq!(delivery.queue, "q1");

        let delivery = broker.pop(&names(&["q1", "q2"])).await.unwrap().unwrap();
        assert_eq!(delivery.queue, "q2");
    }

    #[tokio::test]
    async fn test_empty_pop_times_out() {
        let broker = MemoryBroker::with_pop_wait(Duration::from_millis(10));
        let result = broker.pop(&names(&["q1"])).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_push_wakes_blocked_pop() {
        let broker = Arc::new(MemoryBroker::with_pop_wait(Duration::from_secs(5)));

        let popper = broker.clone();
        let handle = tokio::spawn(async move { popper.pop(&names(&["q1"])).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        broker.push("q1", b"late".to_vec());

        let delivery = handle.await.unwrap().unwrap().unwrap();
        assert_eq!(delivery.payload, b"late");
    }

    #[tokio::test]
    async fn test_close_unblocks_pop() {
        let broker = Arc::new(MemoryBroker::with_pop_wait(Duration::from_secs(5)));

        let popper = broker.clone();
        let handle = tokio::spawn(async move { popper.pop(&names(&["q1"])).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        broker.close().await.unwrap();

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(BrokerError::Closed)));
    }

    #[tokio::test]
    async fn test_pop_without_queues_is_rejected() {
        let broker = MemoryBroker::new();
        let result = broker.pop(&[]).await;
        assert!(matches!(result, Err(BrokerError::NoQueues)));
    }
}
