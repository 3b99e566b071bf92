// Startup configuration: TOML file plus environment overrides
use osal_core::{
    NetworkInterface, WifiNetwork, DEFAULT_LISTEN_BACKLOG, DEFAULT_RING_BUFFER_SIZE,
    DEFAULT_SOCKET_PORT, MAX_NICS,
};
use osal_transport::{SocketDefaults, DEFAULT_CLOSE_DRAIN_LIMIT};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

// Environment variables
// OSAL_CONFIG: TOML file loaded before the overrides below
// OSAL_DEFAULT_PORT: port used when a parameter string has none (default: 6368)
// OSAL_LISTEN_BACKLOG: listen queue length (default: 32)
// OSAL_RING_BUFFER_SIZE: TCP_NODELAY coalescing buffer in bytes (default: 1420)
// OSAL_NIC_<n>_IP, OSAL_NIC_<n>_SEND_MCAST, OSAL_NIC_<n>_RECV_MCAST: adapter n overrides

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SocketConfig {
    pub default_port: u16,
    pub listen_backlog: i32,
    pub ring_buffer_size: usize,
    pub close_drain_limit: usize,
}

impl Default for SocketConfig {
    fn default() -> Self {
        SocketConfig {
            default_port: DEFAULT_SOCKET_PORT,
            listen_backlog: DEFAULT_LISTEN_BACKLOG,
            ring_buffer_size: DEFAULT_RING_BUFFER_SIZE,
            close_drain_limit: DEFAULT_CLOSE_DRAIN_LIMIT,
        }
    }
}

impl From<&SocketConfig> for SocketDefaults {
    fn from(c: &SocketConfig) -> Self {
        SocketDefaults {
            port: c.default_port,
            listen_backlog: c.listen_backlog,
            ring_buffer_size: c.ring_buffer_size,
            close_drain_limit: c.close_drain_limit,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct OsalConfig {
    #[serde(rename = "nic")]
    pub nics: Vec<NetworkInterface>,
    #[serde(rename = "wifi")]
    pub wifi: Vec<WifiNetwork>,
    pub socket: SocketConfig,
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    let raw = env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            log::warn!("ignoring {}={:?}: not a valid value", name, raw);
            None
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    let raw = env::var(name).ok()?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            log::warn!("ignoring {}={:?}: expected a boolean", name, raw);
            None
        }
    }
}

impl OsalConfig {
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        Self::parse(&text)
    }

    /// Defaults, or the file named by OSAL_CONFIG, with environment overrides applied
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match env::var_os("OSAL_CONFIG") {
            Some(path) => Self::load(path)?,
            None => OsalConfig::default(),
        };
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Some(port) = env_parse("OSAL_DEFAULT_PORT") {
            self.socket.default_port = port;
        }
        if let Some(backlog) = env_parse("OSAL_LISTEN_BACKLOG") {
            self.socket.listen_backlog = backlog;
        }
        if let Some(size) = env_parse("OSAL_RING_BUFFER_SIZE") {
            self.socket.ring_buffer_size = size;
        }

        for n in 0..MAX_NICS {
            let ip: Option<String> = env::var(format!("OSAL_NIC_{}_IP", n)).ok();
            let send = env_flag(&format!("OSAL_NIC_{}_SEND_MCAST", n));
            let recv = env_flag(&format!("OSAL_NIC_{}_RECV_MCAST", n));
            if ip.is_none() && send.is_none() && recv.is_none() {
                continue;
            }
            if self.nics.len() <= n {
                self.nics.resize_with(n + 1, NetworkInterface::default);
            }
            let nic = &mut self.nics[n];
            if let Some(ip) = ip {
                nic.ip = ip;
            }
            if let Some(send) = send {
                nic.send_udp_multicasts = send;
            }
            if let Some(recv) = recv {
                nic.receive_udp_multicasts = recv;
            }
        }
    }
}
