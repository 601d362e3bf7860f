use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a scheduled job execution
pub type JobId = Uuid;

/// Queue name a message was popped from
pub type QueueName = String;

/// Job payload (arbitrary bytes)
pub type Payload = Vec<u8>;

/// Handler status code: 0 = success, anything else = logical failure
pub type StatusCode = i32;

/// A single message handed out by the broker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    /// Queue the message was popped from
    pub queue: QueueName,

    /// Raw message payload
    pub payload: Payload,

    /// When the broker handed the message to this process
    pub received_at: DateTime<Utc>,
}

impl Delivery {
    pub fn new(queue: impl Into<QueueName>, payload: Payload) -> Self {
        Delivery {
            queue: queue.into(),
            payload,
            received_at: Utc::now(),
        }
    }
}
