//! Access control: an allow-list of client source CIDRs. Requests from
//! addresses outside the configured ranges are dropped before they ever
//! reach the fragmenter/reassembler. An empty allow-list means "accept
//! everyone" — the default when `--access` is not given.

use std::net::IpAddr;

use ipnetwork::IpNetwork;

/// CIDR allow-list, built once at startup from `--access`.
#[derive(Debug, Clone, Default)]
pub struct AccessList {
    networks: Vec<IpNetwork>,
}

impl AccessList {
    /// Parse a comma-separated list of CIDRs. An empty or all-whitespace
    /// input yields an allow-list that permits every address.
    pub fn parse(spec: &str) -> Result<Self, ipnetwork::IpNetworkError> {
        let mut networks = Vec::new();
        for token in spec.split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            networks.push(token.parse()?);
        }
        Ok(Self { networks })
    }

    /// Whether `addr` is allowed to use this proxy. Permits everything when
    /// no CIDRs were configured.
    pub fn allows(&self, addr: IpAddr) -> bool {
        self.networks.is_empty() || self.networks.iter().any(|net| net.contains(addr))
    }
}
