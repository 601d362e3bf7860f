pub mod barrier;
pub mod config;
pub mod dispatch;
pub mod handler;
pub mod shutdown;
pub mod tracker;
pub mod worker;

pub use barrier::{BarrierError, QuiescenceBarrier};
pub use config::WorkerConfig;
pub use dispatch::Dispatcher;
pub use handler::{HandlerRegistry, HandlerRegistryBuilder, JobHandler};
pub use shutdown::RunState;
pub use tracker::TaskTracker;
pub use worker::{Worker, WorkerError};
