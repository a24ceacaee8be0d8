//! Server runtime configuration.

use blocklink_core::SessionConfig;

/// Port used when none is given.
pub const DEFAULT_PORT: u16 = 5321;

/// Events buffered per subscriber before slow receivers start lagging.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Server configuration for the production runtime.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to (e.g., "0.0.0.0:5321")
    pub bind: String,
    /// Capacity of the [`crate::ServerEvent`] channel
    pub event_capacity: usize,
    /// Tuning applied to every accepted connection
    pub session: SessionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: format!("0.0.0.0:{DEFAULT_PORT}"),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            session: SessionConfig::default(),
        }
    }
}
