mod broker;
mod config;
mod memory;

pub use broker::{Broker, BrokerConnector, BrokerError};
pub use config::BrokerConfig;
pub use memory::{MemoryBroker, MemoryConnector};

pub type Result<T> = std::result::Result<T, BrokerError>;
