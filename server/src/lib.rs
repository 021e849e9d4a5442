//! Order-event broadcast hub.
//!
//! Buyers and admin dashboards hold one long-lived SSE stream per channel;
//! order-mutation handlers call the [`OrderEventProducer`], which fans each
//! event out through the [`ChannelRegistry`] to every stream on the target
//! channels.

pub mod handlers;
pub mod server;

pub use handlers::orders::OrderEventProducer;
pub use handlers::sse::{ChannelRegistry, Registration, Sink};
pub use server::serve;

use shared::config::LiveConfig;
use shared::types::server_config::AppConfig;
use tokio_util::sync::CancellationToken;

/// Everything a request handler can reach. Cheap to clone.
#[derive(Clone, Debug)]
pub struct AppState {
    pub registry: ChannelRegistry,
    pub producer: OrderEventProducer,
    pub config: LiveConfig,
    /// Cancelled once on shutdown; every open stream watches it.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Fresh state with its own empty registry.
    pub fn new(config: AppConfig) -> Self {
        let registry = ChannelRegistry::new();
        Self {
            producer: OrderEventProducer::new(registry.clone()),
            registry,
            config: LiveConfig::new(config),
            shutdown: CancellationToken::new(),
        }
    }
}
