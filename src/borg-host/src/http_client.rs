//! Shared HTTP client factory.
//!
//! One connection-pooled client is built at startup and handed to the
//! manager, every plugin proxy and the package downloader.

use std::time::Duration;

use reqwest::Client;

/// User-Agent string for host requests.
pub const USER_AGENT: &str = concat!("borgd/", env!("CARGO_PKG_VERSION"));

/// Connection pool idle timeout.
pub const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Connect timeout. Plugins listen on loopback so this stays short.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Creates the shared client.
///
/// No overall request timeout is set here; callers apply the timeout that
/// fits the call (ping, dispatch, download).
pub fn create_client() -> Result<Client, String> {
    Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(CONNECT_TIMEOUT)
        .tcp_nodelay(true)
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .pool_max_idle_per_host(4)
        .build()
        .map_err(|e| format!("Failed to build HTTP client: {e}"))
}
