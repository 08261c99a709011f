//! Shared CLI-surface parsing: both binaries accept the same flag shapes
//! (comma-separated endpoint lists) with different per-binary defaults,
//! baked into each binary's own `clap::Parser` struct.

use std::net::SocketAddr;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid socket address {0:?}: {1}")]
    BadAddr(String, std::net::AddrParseError),
}

/// Parse a comma-separated list of `host:port` endpoints, as accepted by
/// `--proxy` and `--listen`. A bare port number (e.g. the server binary's
/// `8000` default) is taken as a wildcard bind on `0.0.0.0`.
pub fn parse_addr_list(spec: &str) -> Result<Vec<SocketAddr>, ConfigError> {
    spec.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            if let Ok(port) = s.parse::<u16>() {
                return Ok(SocketAddr::from(([0, 0, 0, 0], port)));
            }
            s.parse().map_err(|e| ConfigError::BadAddr(s.to_string(), e))
        })
        .collect()
}
