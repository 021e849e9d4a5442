use std::fs;
use tracing::{debug, info, warn};

use crate::types::server_config::{AppConfig, ConfigError};

/// Read, parse and validate the TOML file at `path`.
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let contents = fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Err(ConfigError::InvalidConfig(format!("{} is empty", path)));
    }

    let config = parse_config(&contents)?;
    info!(
        "Loaded {}: listen {}, stream route {}, heartbeat {}s",
        path,
        config.server.addr(),
        config.stream.path,
        config.stream.heartbeat_secs
    );
    debug!("{:?}", config);

    Ok(config)
}

/// Parse and validate a TOML document.
pub fn parse_config(contents: &str) -> Result<AppConfig, ConfigError> {
    let config: AppConfig = toml::from_str(contents)?;
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    if config.server.max_connections == 0 {
        return Err(ConfigError::InvalidConfig(
            "max_connections must be greater than 0".into(),
        ));
    }

    if !config.stream.path.starts_with('/') {
        return Err(ConfigError::InvalidConfig(
            "stream.path must be an absolute route, e.g. /api/events".into(),
        ));
    }

    if config.stream.heartbeat_secs == 0 {
        return Err(ConfigError::InvalidConfig(
            "heartbeat_secs must be greater than 0".into(),
        ));
    }

    if config.stream.sink_buffer == 0 {
        return Err(ConfigError::InvalidConfig(
            "sink_buffer must be greater than 0".into(),
        ));
    }

    if !config.stream.heartbeat_in_recommended_range() {
        warn!(
            "heartbeat_secs = {} is outside the recommended 15-30s; idle streams may be cut by proxies",
            config.stream.heartbeat_secs
        );
    }

    Ok(())
}
