//! Fanout CLI: broker daemon plus producer and consumer tools.
//!
//! See the `fanout` library for the broker runtime itself.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use fanout::{storage, Broker, ClientConfig, Config, Consumer, Producer, Server, ServerConfig};

#[derive(Parser)]
#[command(name = "fanout", version, about = "In-memory pub/sub message broker over framed TCP")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the broker daemon
    Broker {
        /// Path to the YAML configuration file
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Publish messages to a topic
    Produce {
        /// Broker address
        #[arg(long, default_value = "127.0.0.1:9092")]
        addr: String,
        /// Topic name
        #[arg(long, default_value = "test")]
        topic: String,
        /// Message payload
        #[arg(long, default_value = "hello")]
        message: String,
        /// Number of messages to publish
        #[arg(long, default_value_t = 1)]
        count: u32,
    },
    /// Subscribe to a topic and print received messages
    Consume {
        /// Broker address
        #[arg(long, default_value = "127.0.0.1:9092")]
        addr: String,
        /// Topic name
        #[arg(long, default_value = "test")]
        topic: String,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    match Cli::parse().command {
        Commands::Broker { config } => run_broker(config.as_deref()),
        Commands::Produce {
            addr,
            topic,
            message,
            count,
        } => run_produce(&addr, &topic, &message, count),
        Commands::Consume { addr, topic } => run_consume(&addr, &topic),
    }
}

/// Install a SIGINT/SIGTERM handler and return the flag it flips.
fn shutdown_flag() -> Result<Arc<AtomicBool>> {
    let flag = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&flag);
    ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::SeqCst);
    })
    .context("install signal handler")?;
    Ok(flag)
}

fn run_broker(config_path: Option<&std::path::Path>) -> Result<()> {
    let config = Config::load(config_path).context("load configuration")?;
    config.validate().context("invalid configuration")?;

    log::info!("===================================");
    log::info!(" Fanout Broker");
    log::info!(" Version: {}", env!("CARGO_PKG_VERSION"));
    log::info!(" Listening on: {}", config.listen_addr());
    log::info!(" Storage: {}", config.storage.kind);
    log::info!("===================================");

    let store = storage::open(&config.storage).context("open storage backend")?;
    let broker = Arc::new(Broker::with_store(config.broker_config(), store));
    broker.start();

    let server = Server::bind(
        &config.listen_addr(),
        Arc::clone(&broker),
        ServerConfig {
            max_connections: config.server.max_connections,
            read_timeout: config.read_timeout(),
            write_timeout: config.write_timeout(),
        },
    )
    .context("listen failed")?;
    server.start().context("start accept loop")?;

    let shutdown = shutdown_flag()?;
    while !shutdown.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(200));
    }

    log::info!("shutting down...");
    server.stop();
    broker.stop();
    log::info!("shutdown complete");
    Ok(())
}

fn run_produce(addr: &str, topic: &str, message: &str, count: u32) -> Result<()> {
    let producer = Producer::new(ClientConfig::default());
    producer.connect(addr)?;

    for i in 1..=count {
        producer.publish(topic, message.as_bytes().to_vec())?;
        log::info!("published to {topic:?} ({i}/{count})");
    }

    producer.disconnect();
    Ok(())
}

fn run_consume(addr: &str, topic: &str) -> Result<()> {
    let consumer = Consumer::new(ClientConfig::default());
    consumer.connect(addr)?;

    consumer.subscribe(topic, |cmd| {
        log::info!(
            "received on {:?}: {}",
            cmd.topic,
            String::from_utf8_lossy(&cmd.payload)
        );
    })?;
    log::info!("subscribed to {topic:?}; waiting for messages");

    let shutdown = shutdown_flag()?;
    while !shutdown.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(200));
    }

    log::info!("shutting down consumer...");
    let _ = consumer.unsubscribe(topic);
    consumer.disconnect();
    Ok(())
}
