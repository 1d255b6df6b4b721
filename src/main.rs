//! Command-line entry point.
//!
//! Subscribes to one channel, prints every message it receives, publishes a
//! greeting after a short warm-up and runs until Ctrl+C.
//!
//! Run with: cargo run -- --host 127.0.0.1 --port 6379

use std::time::Duration;

use clap::Parser;
use pubsub_manager::{PubSubConfig, PubSubManager, PublishOutcome};
use tracing_subscriber::{fmt as tracing_format, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "pubsub-manager")]
#[command(about = "Subscribe to a Redis pub/sub channel and print what arrives")]
struct Cli {
    /// Seed node host
    #[arg(long, env = "PUBSUB_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Seed node port
    #[arg(long, env = "PUBSUB_PORT", default_value_t = 6379)]
    port: u16,

    /// Talk to a single Redis server instead of a cluster
    #[arg(long, conflicts_with = "memory")]
    standalone: bool,

    /// Use the in-process backend (no Redis needed)
    #[arg(long)]
    memory: bool,

    /// Channel to subscribe and publish on
    #[arg(long, default_value = "my_startup_channel")]
    channel: String,

    /// Greeting published after the warm-up
    #[arg(long, default_value = "Hello from main!")]
    message: String,
}

impl Cli {
    fn config(&self) -> PubSubConfig {
        // ---
        if self.memory {
            PubSubConfig::memory("pubsub-cli")
        } else if self.standalone {
            PubSubConfig::standalone(&self.host, self.port).with_manager_id("pubsub-cli")
        } else {
            PubSubConfig::cluster(&self.host, self.port).with_manager_id("pubsub-cli")
        }
    }
}

#[tokio::main]
async fn main() {
    // ---
    tracing_format()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .with_line_number(true)
        .init();

    let cli = Cli::parse();
    let manager = PubSubManager::new(cli.config()).await;

    manager
        .register_message_handler(|channel, payload| {
            println!("[MESSAGE] Channel: {channel} | Data: {payload}");
        })
        .await;

    manager.subscribe(&cli.channel).await;
    manager.start_consuming();

    // Let the subscriber settle before the greeting goes out
    tokio::time::sleep(Duration::from_secs(1)).await;

    if manager.publish(&cli.channel, &cli.message).await != PublishOutcome::Published {
        tracing::warn!("greeting on {} was not published", cli.channel);
    }

    println!(
        "Subscribed to '{}'. Press Ctrl+C to exit.",
        cli.channel
    );

    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for Ctrl+C: {err}");
    }

    println!("\nShutting down...");
    manager.shutdown().await;
}
