// Network state snapshot types
use osal_core::{SocketCount, WifiNetwork, MAX_NICS, MAX_WIFI_NETWORKS};

/// Number of lighthouse connect-to strings kept
pub const MAX_LIGHTHOUSE_CONNECTIONS: usize = 3;

/// Adapter readiness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NicStatus {
    Ready,
    Pending,
    NoNetwork,
    #[default]
    NotInitialized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LighthouseState {
    #[default]
    NotUsed,
    Ok,
    NotVisible,
    NoLighthouseForThisIoNetwork,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GazerbeamState {
    #[default]
    NotConnected,
    Configuring,
    ConfigurationMatch,
}

/// Everything diagnostics and UI layers can read. Handlers receive a copy of this.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkState {
    pub nic_status: [NicStatus; MAX_NICS],
    pub nic_ip: [String; MAX_NICS],
    pub wifi: [WifiNetwork; MAX_WIFI_NETWORKS],
    pub network_used: bool,
    pub network_connected: bool,
    pub io_network_name: String,
    pub no_cert_chain: bool,
    pub security_conf_error: i32,
    pub lighthouse_state: LighthouseState,
    pub lighthouse_connect_to: [String; MAX_LIGHTHOUSE_CONNECTIONS],
    pub gazerbeam: GazerbeamState,
    pub device_init_incomplete: bool,
    pub(crate) counts: [i32; 3],
}

impl NetworkState {
    pub fn count(&self, kind: SocketCount) -> i32 {
        self.counts[kind.index()]
    }
}

/// Assign `value` to `slot` and report whether it changed.
pub(crate) fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    true
}

/// Same as `replace`, for string slots; avoids allocating when unchanged.
pub(crate) fn replace_str(slot: &mut String, value: &str) -> bool {
    if slot == value {
        return false;
    }
    slot.clear();
    slot.push_str(value);
    true
}
