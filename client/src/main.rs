use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::{ArgGroup, Parser};
use shared::types::sse::{EventEnvelope, EventType};
use tokio::sync::Notify;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use client::{ConsumerConfig, ReconnectConfig, StreamConsumer};

#[derive(Debug, Parser)]
#[command(name = "client", about = "Follow an order-event channel and log what arrives")]
#[command(group(ArgGroup::new("channel").required(true).args(["user", "admin"])))]
struct Cli {
    /// Subscription route of the hub
    #[arg(long, default_value = "http://127.0.0.1:1337/api/events")]
    endpoint: String,

    /// Follow this buyer's private channel
    #[arg(long)]
    user: Option<String>,

    /// Follow the admin channel
    #[arg(long)]
    admin: bool,

    #[arg(long, default_value_t = 5)]
    max_attempts: u32,

    #[arg(long, default_value_t = 3000)]
    base_delay_ms: u64,

    #[arg(long, default_value_t = 30000)]
    max_delay_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = ConsumerConfig {
        reconnect: ReconnectConfig {
            base_delay: Duration::from_millis(cli.base_delay_ms),
            max_delay: Duration::from_millis(cli.max_delay_ms),
            max_attempts: cli.max_attempts,
        },
        ..ConsumerConfig::new(cli.endpoint)
    };

    let consumer = match cli.user {
        Some(user_id) => StreamConsumer::for_user(config, &user_id),
        None => StreamConsumer::for_admin(config),
    };

    for event_type in order_events() {
        consumer.on(event_type, |env| {
            let data = serde_json::Value::Object(env.data().clone());
            info!("{} @{} {}", env.event_type(), env.timestamp(), data);
        });
    }

    let gave_up = Arc::new(Notify::new());
    consumer.on(EventType::ConnectionOpen, |_| info!("Stream open"));
    {
        let gave_up = Arc::clone(&gave_up);
        consumer.on(EventType::ConnectionError, move |env| {
            warn!("Stream error: {:?}", env.data().get("error"));
            if is_terminal(env) {
                gave_up.notify_one();
            }
        });
    }
    consumer.on(EventType::ConnectionClosed, |_| info!("Stream closed"));

    // A failed first attempt still schedules retries
    if let Err(e) = consumer.connect().await {
        warn!("Initial connect to {} failed: {}", consumer.url(), e);
    }

    tokio::select! {
        res = tokio::signal::ctrl_c() => res?,
        _ = gave_up.notified() => {
            let status = consumer.status();
            bail!(
                "Gave up on {} after {} reconnect attempts",
                consumer.channel(),
                status.reconnect_attempts
            );
        }
    }
    consumer.disconnect();

    Ok(())
}

/// Every event type the hub itself publishes.
fn order_events() -> Vec<EventType> {
    EventType::ALL
        .into_iter()
        .filter(|t| !t.is_lifecycle() && *t != EventType::Heartbeat)
        .collect()
}

fn is_terminal(env: &EventEnvelope) -> bool {
    env.data()
        .get("terminal")
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false)
}
