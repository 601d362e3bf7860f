mod error;
mod job;

pub use error::{JobError, Result};
pub use job::{Delivery, JobId, Payload, QueueName, StatusCode};

/// Status code a handler reports for a job that ran to completion.
pub const STATUS_OK: StatusCode = 0;
