pub mod config;

pub use self::config::{load_config, parse_config};

use std::sync::Arc;
use tokio::sync::RwLock;

use crate::types::server_config::{AppConfig, StreamConfig};

/// Shared handle to the running configuration.
///
/// Clones point at the same value. Readers copy what they need out of it
/// when a connection opens, so a SIGHUP [`LiveConfig::reload`] reaches new
/// streams only.
#[derive(Clone, Debug)]
pub struct LiveConfig(Arc<RwLock<AppConfig>>);

impl LiveConfig {
    pub fn new(config: AppConfig) -> Self {
        Self(Arc::new(RwLock::new(config)))
    }

    /// Short-lived read guard; copy values out before awaiting anything.
    pub async fn read(&self) -> tokio::sync::RwLockReadGuard<'_, AppConfig> {
        self.0.read().await
    }

    /// Copy of the `[stream]` section as it is right now.
    pub async fn stream(&self) -> StreamConfig {
        self.0.read().await.stream.clone()
    }

    pub async fn reload(&self, new: AppConfig) {
        *self.0.write().await = new;
    }
}
