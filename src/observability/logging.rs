//! # Logging
//!
//! Installs the global `tracing` subscriber.
//!
//! `RUST_LOG` wins when set; otherwise `LOG_LEVEL` is applied to this crate
//! only so dependency chatter stays at the default level.

use crate::config::ControllerConfig;
use tracing_subscriber::EnvFilter;

/// Filter directive derived from `LOG_LEVEL`
#[must_use]
pub fn default_directive(log_level: &str) -> String {
    let level = match log_level.trim().to_lowercase().as_str() {
        level @ ("error" | "warn" | "info" | "debug" | "trace") => level.to_string(),
        _ => "info".to_string(),
    };
    format!("certificate_manager={level}")
}

/// Initialize the global subscriber
///
/// Safe to call more than once; later calls are ignored.
pub fn init_tracing(config: &ControllerConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(&config.log_level)));

    let result = if config.json_logs() {
        tracing_subscriber::fmt()
            .json()
            .with_current_span(true)
            .with_env_filter(filter)
            .try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };

    if let Err(e) = result {
        tracing::debug!("Tracing subscriber already initialized: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive_normalizes_level() {
        assert_eq!(default_directive("DEBUG"), "certificate_manager=debug");
        assert_eq!(default_directive(" warn "), "certificate_manager=warn");
        assert_eq!(default_directive("verbose"), "certificate_manager=info");
    }
}
