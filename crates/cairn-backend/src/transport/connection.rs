//! TCP connection establishment: bounded retry, reconnect backoff and
//! socket options.

use crate::{Error, Result};
#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
use cairn_config::DEFAULT_TCP_KEEPALIVE_RETRIES;
use cairn_config::{
    ConnectionConfig, DEFAULT_TCP_KEEPALIVE_INTERVAL_SECS, DEFAULT_TCP_KEEPALIVE_TIME_SECS,
    LOCALHOST_IPV4,
};
use socket2::{SockRef, TcpKeepalive};
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, info, trace, warn};

/// Resolve a configured host to IPv4. "localhost" is pinned to 127.0.0.1
/// so it never resolves to `::1`.
pub fn resolve_host(host: &str) -> Ipv4Addr {
    if host == "localhost" {
        return LOCALHOST_IPV4;
    }
    match host.parse() {
        Ok(addr) => addr,
        Err(e) => {
            warn!("Invalid host '{}': {}. Falling back to 127.0.0.1", host, e);
            LOCALHOST_IPV4
        }
    }
}

/// Connect with exponential backoff and jitter.
///
/// - Starts at `retry_interval_ms`, doubling up to `reconnect.max_delay_ms`
/// - Adds 0-100ms of random jitter per wait
/// - Gives up after `max_connect_attempts` or `connection_timeout_ms`
/// - Fails fast after `max_connection_refused_attempts` consecutive
///   refusals (nothing is listening)
pub async fn connect_with_retry(
    host: &str,
    port: u16,
    config: &ConnectionConfig,
) -> Result<TcpStream> {
    use rand::Rng;

    let address = format!("{}:{}", resolve_host(host), port);
    let start = std::time::Instant::now();
    let timeout = Duration::from_millis(config.connection_timeout_ms);

    let mut retry_interval_ms = config.retry_interval_ms;
    let max_retry_interval_ms = config.reconnect.max_delay_ms;
    let mut attempt = 0u32;
    let mut refused = 0u32;

    loop {
        match TcpStream::connect(&address).await {
            Ok(stream) => {
                configure_tcp_keepalive(&stream);
                info!(%address, attempt, "Connected to backend");
                return Ok(stream);
            }
            Err(e) => {
                attempt += 1;

                if e.kind() == std::io::ErrorKind::ConnectionRefused {
                    refused += 1;
                    if refused >= config.max_connection_refused_attempts {
                        return Err(Error::Communication(format!(
                            "No backend listening on {} (connection refused {} times)",
                            address, refused
                        )));
                    }
                } else {
                    refused = 0;
                }

                if attempt >= config.max_connect_attempts || start.elapsed() > timeout {
                    return Err(Error::Communication(format!(
                        "Could not connect to backend at {} after {} attempts: {}",
                        address, attempt, e
                    )));
                }

                let jitter_ms = rand::rng().random_range(0..100);
                let wait_ms = retry_interval_ms.saturating_add(jitter_ms);
                trace!(
                    "Connection attempt {} failed, retrying in {}ms (backoff: {}ms + jitter: {}ms)",
                    attempt,
                    wait_ms,
                    retry_interval_ms,
                    jitter_ms
                );
                tokio::time::sleep(Duration::from_millis(wait_ms)).await;

                retry_interval_ms = (retry_interval_ms * 2).min(max_retry_interval_ms);
            }
        }
    }
}

/// Re-establish a socket to the same backend after the host returns.
///
/// Each attempt is a single connect bounded by `connection_timeout_ms`;
/// waits between attempts follow the `reconnect` backoff policy.
pub async fn reconnect_with_backoff(
    host: &str,
    port: u16,
    config: &ConnectionConfig,
) -> Result<TcpStream> {
    use rand::Rng;

    let policy = &config.reconnect;
    let address = format!("{}:{}", resolve_host(host), port);
    let per_attempt = Duration::from_millis(config.connection_timeout_ms);
    let mut failures = 0u32;

    loop {
        if !policy.allows_attempt(failures) {
            return Err(Error::Communication(format!(
                "Reconnect to {} abandoned after {} attempts",
                address, failures
            )));
        }

        let outcome = tokio::time::timeout(per_attempt, TcpStream::connect(&address)).await;
        match outcome {
            Ok(Ok(stream)) => {
                configure_tcp_keepalive(&stream);
                info!(%address, failures, "Reconnected to backend");
                return Ok(stream);
            }
            Ok(Err(e)) => debug!(%address, "Reconnect attempt failed: {}", e),
            Err(_) => debug!(%address, "Reconnect attempt timed out"),
        }

        let delay_ms = policy.delay_for_attempt(failures);
        let spread = (delay_ms as f64 * policy.jitter) as u64;
        let jitter_ms = if spread > 0 {
            rand::rng().random_range(0..=spread)
        } else {
            0
        };
        failures += 1;
        tokio::time::sleep(Duration::from_millis(delay_ms + jitter_ms)).await;
    }
}

/// Enable TCP_NODELAY and keep-alive so idle debugger sockets
/// aren't reaped while the debuggee runs.
pub fn configure_tcp_keepalive(stream: &TcpStream) {
    let socket = SockRef::from(stream);

    if let Err(e) = socket.set_nodelay(true) {
        warn!("Failed to set TCP_NODELAY: {}", e);
    }

    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(DEFAULT_TCP_KEEPALIVE_TIME_SECS))
        .with_interval(Duration::from_secs(DEFAULT_TCP_KEEPALIVE_INTERVAL_SECS));

    // Retries are not configurable on Windows/macOS
    #[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
    let keepalive = keepalive.with_retries(DEFAULT_TCP_KEEPALIVE_RETRIES);

    if let Err(e) = socket.set_tcp_keepalive(&keepalive) {
        warn!("Failed to set TCP keep-alive: {}", e);
    } else {
        debug!("TCP keep-alive configured");
    }
}
