//! Logging setup
//!
//! The library only emits `tracing` events. Hosts that have no subscriber of
//! their own can install the stock formatter with `init`.

use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{BridgeError, Result};

pub const DEFAULT_FILTER: &str = "info";

/// Install a global fmt subscriber. `None` reads `RUST_LOG`, falling back to
/// `info`. Fails if a global subscriber is already set.
pub fn init(filter: Option<&str>) -> Result<()> {
    let filter = match filter {
        Some(directives) => EnvFilter::try_new(directives)
            .map_err(|e| BridgeError::Config(format!("invalid log filter '{directives}': {e}")))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
    };

    fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .try_init()
        .map_err(|e| BridgeError::Config(format!("logging already initialized: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_filter_rejected() {
        assert!(matches!(init(Some("feed_bridge=loudest")), Err(BridgeError::Config(_))));
    }
}
