// Address string grammar: "host:port", ":port", "port", "[ipv6]:port"
use crate::error::{Error, Result};
use crate::flags::StreamFlags;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};

/// Decoded parameter string. `host` is None when omitted or given as '*'.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: Option<String>,
    pub port: u16,
    pub is_ipv6: bool,
}

impl Endpoint {
    /// Parse a parameter string, using `default_port` when the port is omitted or '*'.
    pub fn parse(parameters: &str, default_port: u16) -> Result<Self> {
        let s = parameters.trim();
        let bad = || Error::AddressParse(parameters.to_string());

        let (host, port, is_ipv6) = if let Some(rest) = s.strip_prefix('[') {
            let close = rest.find(']').ok_or_else(bad)?;
            let after = &rest[close + 1..];
            let port = match after.strip_prefix(':') {
                Some(p) => p,
                None if after.is_empty() => "",
                None => return Err(bad()),
            };
            (&rest[..close], port, true)
        } else if let Some(colon) = s.find(':') {
            // Unbracketed IPv6 literals are ambiguous with the port separator
            if s[colon + 1..].contains(':') {
                return Err(Error::AddressParse(format!(
                    "{}: IPv6 address must be in brackets",
                    parameters
                )));
            }
            (&s[..colon], &s[colon + 1..], false)
        } else if !s.contains('.') && s.starts_with(|c: char| c.is_ascii_digit()) {
            ("", s, false)
        } else {
            (s, "", false)
        };

        let port = if port.is_empty() || port.contains('*') {
            default_port
        } else {
            port.parse::<u16>().map_err(|_| bad())?
        };

        let host = if host.is_empty() || host.contains('*') {
            None
        } else {
            Some(host.to_string())
        };

        Ok(Endpoint { host, port, is_ipv6 })
    }

    /// Binary address for this endpoint. An omitted host is the wildcard address for
    /// listening and multicast sockets and loopback for connecting sockets.
    pub fn resolve(&self, flags: StreamFlags) -> Result<SocketAddr> {
        let host = match &self.host {
            None => {
                let ip = match (self.is_ipv6, flags.is_listen() || flags.is_multicast()) {
                    (true, true) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
                    (true, false) => IpAddr::V6(Ipv6Addr::LOCALHOST),
                    (false, true) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                    (false, false) => IpAddr::V4(Ipv4Addr::LOCALHOST),
                };
                return Ok(SocketAddr::new(ip, self.port));
            }
            Some(h) => h,
        };

        if let Ok(ip) = host.parse::<IpAddr>() {
            if ip.is_ipv6() != self.is_ipv6 {
                return Err(Error::AddressParse(format!(
                    "{}: address family does not match bracket syntax",
                    host
                )));
            }
            return Ok(SocketAddr::new(ip, self.port));
        }

        let is_ipv6 = self.is_ipv6;
        (host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|_| Error::AddressParse(host.clone()))?
            .find(|a| a.is_ipv6() == is_ipv6)
            .ok_or_else(|| Error::AddressParse(format!("{}: no address of requested family", host)))
    }
}

/// Append the default port to a parameter string that has none.
/// A digits-only string is a bare port and becomes ":digits".
pub fn embed_default_port(parameters: &str, default_port: u16) -> String {
    let search_from = parameters.find(']').unwrap_or(0);
    if parameters[search_from..].contains(':') {
        return parameters.to_string();
    }
    if !parameters.is_empty() && parameters.bytes().all(|b| b.is_ascii_digit()) {
        return format!(":{}", parameters);
    }
    format!("{}:{}", parameters, default_port)
}

/// Remote address text as reported by accept and receive_packet: IPv6 within brackets.
pub fn ip_to_string(ip: &IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => format!("[{}]", v6),
    }
}
