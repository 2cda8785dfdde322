//! # Configuration
//!
//! Process-wide settings loaded from environment variables.
//!
//! - `controller`: reconciliation timing, root CA persistence and logging
//! - `server`: metrics and probe server settings
//!
//! Environment variables are populated from a ConfigMap using `envFrom` in the
//! deployment. Settings are read once at startup.

mod controller;
mod server;

pub use controller::ControllerConfig;
pub use server::ServerConfig;

use std::sync::Arc;

/// Controller configuration shared between the watch loop and the reconciler
pub type SharedControllerConfig = Arc<ControllerConfig>;

/// Server configuration shared with the initialization code
pub type SharedServerConfig = Arc<ServerConfig>;

/// Load both configurations from the environment
#[must_use]
pub fn load_shared_config() -> (SharedControllerConfig, SharedServerConfig) {
    (
        Arc::new(ControllerConfig::from_env()),
        Arc::new(ServerConfig::from_env()),
    )
}

/// Read environment variable or return default value
pub(crate) fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Read environment variable as boolean or return default
pub(crate) fn env_var_or_default_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map_or(default, |v| parse_bool(&v))
}

/// Read environment variable as string or return default
pub(crate) fn env_var_or_default_str(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}
