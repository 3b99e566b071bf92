// Network adapter and Wi-Fi configuration entries
use serde::Deserialize;
use std::net::IpAddr;

/// Maximum number of network adapters kept in the registry
pub const MAX_NICS: usize = 6;

/// Maximum number of Wi-Fi networks kept in the network state
pub const MAX_WIFI_NETWORKS: usize = 2;

/// One configured network adapter. Immutable once placed in the registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NetworkInterface {
    pub ip: String,
    pub subnet: String,
    pub gateway: String,
    pub dns: String,
    pub dns2: String,
    pub mac: String,
    pub no_dhcp: bool,
    pub send_udp_multicasts: bool,
    pub receive_udp_multicasts: bool,
}

impl NetworkInterface {
    /// Adapter address as a binary IP, None if empty or not numeric
    pub fn ip_addr(&self) -> Option<IpAddr> {
        self.ip.trim().trim_matches(|c| c == '[' || c == ']').parse().ok()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WifiNetwork {
    pub name: String,
    pub password: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ip_addr_accepts_bracketed_ipv6() {
        let nic = NetworkInterface { ip: "[fe80::2]".into(), ..Default::default() };
        assert_eq!(nic.ip_addr(), Some("fe80::2".parse().unwrap()));
        let nic = NetworkInterface::default();
        assert_eq!(nic.ip_addr(), None);
    }
}
