//! Tunables for both ends of the bridge.

use std::time::Duration;

/// Default bound on how long `Client::invoke` waits for a reply.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Default cap on suspended query/notify handlers.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 256;

/// Renderer-side configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// How long `invoke` waits before rejecting with `TipcError::Timeout`.
    /// `None` waits until the reply arrives or the transport closes.
    pub query_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            query_timeout: Some(DEFAULT_QUERY_TIMEOUT),
        }
    }
}

/// Privileged-side configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Suspended query/notify handlers allowed at once. At the cap the
    /// dispatcher stops reading envelopes until one finishes.
    pub max_in_flight: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }
}
