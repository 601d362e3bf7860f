use jobq_worker::handler::{AckHandler, JsonValidateHandler, SleepHandler};
use jobq_worker::{HandlerRegistry, Worker, WorkerConfig};

use jobq_client::{MemoryBroker, MemoryConnector};

use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "jobq-worker")]
#[command(about = "Asynchronous job queue worker", long_about = None)]
struct Args {
    /// Broker host
    #[arg(long)]
    host: Option<String>,

    /// Broker port
    #[arg(long)]
    port: Option<u16>,

    /// Broker database index
    #[arg(long)]
    db: Option<u32>,

    /// Worker ID (auto-generated if not provided)
    #[arg(long)]
    worker_id: Option<String>,

    /// Path to configuration file
    #[arg(long)]
    config: Option<String>,

    /// Messages seeded onto each demo queue of the in-memory broker
    #[arg(long, default_value = "3")]
    seed: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        WorkerConfig::from_file(config_path)?
    } else {
        WorkerConfig::default()
    };

    // Override with CLI args
    if let Some(host) = args.host {
        config.broker.host = host;
    }
    if let Some(port) = args.port {
        config.broker.port = port;
    }
    if let Some(db) = args.db {
        config.broker.db = db;
    }
    if let Some(worker_id) = args.worker_id {
        config.worker_id = Some(worker_id);
    }

    // Register the stock handlers
    let registry = HandlerRegistry::builder()
        .register("default", AckHandler)
        .register("slow", SleepHandler::new(1000))
        .register("json", JsonValidateHandler)
        .build();

    tracing::info!("Registered queues: {:?}", registry.queue_names());

    // This binary ships with the in-memory broker; real deployments plug a
    // connector for their broker into Worker::new the same way.
    let broker = Arc::new(MemoryBroker::new());
    for n in 0..args.seed {
        broker.push("default", format!("job-{n}").into_bytes());
        broker.push("json", format!("{{\"job\":{n}}}").into_bytes());
    }

    let worker = Worker::new(config, registry, Arc::new(MemoryConnector::new(broker)));
    worker.start().await?;

    Ok(())
}
