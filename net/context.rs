// Network context: registry + state behind one coarse lock
use crate::state::*;
use once_cell::sync::Lazy;
use osal_core::{Error, NetworkInterface, Result, SocketCount, WifiNetwork, MAX_NICS, MAX_WIFI_NETWORKS};
use std::sync::{Arc, Mutex, MutexGuard};

/// Maximum number of change-notification handlers
pub const MAX_NOTIFICATION_HANDLERS: usize = 3;

/// Called after every network state change with a copy of the new state
pub type NotificationHandler = Arc<dyn Fn(&NetworkState) + Send + Sync>;

/// Shared handle injected into stream implementations
pub type NetHandle = Arc<NetContext>;

/// Which multicast direction a registry query is for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McastDirection {
    Send,
    Receive,
}

#[derive(Default)]
struct Inner {
    registry: Vec<NetworkInterface>,
    state: NetworkState,
    handlers: Vec<NotificationHandler>,
}

#[derive(Default)]
pub struct NetContext {
    inner: Mutex<Inner>,
}

// Process-wide default context - initialized lazily and never dropped
static NET: Lazy<NetHandle> = Lazy::new(|| Arc::new(NetContext::new()));

/// Process-wide network context used by streams opened without an explicit handle
pub fn net() -> NetHandle {
    Arc::clone(&NET)
}

impl NetContext {
    pub fn new() -> Self {
        NetContext::default()
    }

    /// Fresh context not shared with the process-wide one
    pub fn new_handle() -> NetHandle {
        Arc::new(NetContext::new())
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Apply `f` under the lock; if it reports a change, call handlers after unlocking.
    fn update<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut NetworkState) -> bool,
    {
        let (snapshot, handlers) = {
            let mut inner = self.lock();
            if !f(&mut inner.state) {
                return false;
            }
            (inner.state.clone(), inner.handlers.clone())
        };
        for handler in &handlers {
            handler(&snapshot);
        }
        true
    }

    // ---- Network-Interface Registry ----

    /// Replace the configured adapters. Entries beyond MAX_NICS are dropped.
    pub fn set_interfaces(&self, mut nics: Vec<NetworkInterface>) {
        if nics.len() > MAX_NICS {
            log::warn!("{} network interfaces configured, keeping first {}", nics.len(), MAX_NICS);
            nics.truncate(MAX_NICS);
        }
        self.lock().registry = nics;
    }

    pub fn interfaces(&self) -> Vec<NetworkInterface> {
        self.lock().registry.clone()
    }

    /// Adapters flagged to take part in multicast traffic in the given direction
    pub fn multicast_interfaces(&self, direction: McastDirection) -> Vec<NetworkInterface> {
        self.lock()
            .registry
            .iter()
            .filter(|nic| match direction {
                McastDirection::Send => nic.send_udp_multicasts,
                McastDirection::Receive => nic.receive_udp_multicasts,
            })
            .cloned()
            .collect()
    }

    // ---- Network-State Tracker ----

    /// Register a change-notification handler. Fails once MAX_NOTIFICATION_HANDLERS are set.
    pub fn add_notification_handler<F>(&self, handler: F) -> Result<()>
    where
        F: Fn(&NetworkState) + Send + Sync + 'static,
    {
        let mut inner = self.lock();
        if inner.handlers.len() >= MAX_NOTIFICATION_HANDLERS {
            log::error!("limit of {} network state notification handlers exceeded", MAX_NOTIFICATION_HANDLERS);
            return Err(Error::HandlerLimit(MAX_NOTIFICATION_HANDLERS));
        }
        inner.handlers.push(Arc::new(handler));
        Ok(())
    }

    /// Copy of the current state
    pub fn state(&self) -> NetworkState {
        self.lock().state.clone()
    }

    pub fn count(&self, kind: SocketCount) -> i32 {
        self.lock().state.count(kind)
    }

    /// Account a successfully opened socket
    pub fn socket_opened(&self, kind: SocketCount) {
        self.update(|s| {
            s.counts[kind.index()] += 1;
            true
        });
    }

    /// Account a closed socket
    pub fn socket_closed(&self, kind: SocketCount) {
        self.update(|s| {
            s.counts[kind.index()] -= 1;
            true
        });
    }

    /// Reset a counter to zero, notifying only if it was not zero already
    pub fn clear_count(&self, kind: SocketCount) {
        self.update(|s| replace(&mut s.counts[kind.index()], 0));
    }

    pub fn set_nic_status(&self, index: usize, status: NicStatus) -> bool {
        if index >= MAX_NICS {
            return false;
        }
        self.update(|s| replace(&mut s.nic_status[index], status))
    }

    pub fn nic_status(&self, index: usize) -> NicStatus {
        self.lock().state.nic_status.get(index).copied().unwrap_or_default()
    }

    pub fn set_nic_ip(&self, index: usize, ip: &str) -> bool {
        if index >= MAX_NICS {
            return false;
        }
        self.update(|s| replace_str(&mut s.nic_ip[index], ip))
    }

    pub fn nic_ip(&self, index: usize) -> String {
        self.lock().state.nic_ip.get(index).cloned().unwrap_or_default()
    }

    pub fn set_wifi_network_name(&self, index: usize, name: &str) -> bool {
        if index >= MAX_WIFI_NETWORKS {
            return false;
        }
        self.update(|s| replace_str(&mut s.wifi[index].name, name))
    }

    pub fn set_wifi_password(&self, index: usize, password: &str) -> bool {
        if index >= MAX_WIFI_NETWORKS {
            return false;
        }
        self.update(|s| replace_str(&mut s.wifi[index].password, password))
    }

    pub fn wifi_network(&self, index: usize) -> WifiNetwork {
        self.lock().state.wifi.get(index).cloned().unwrap_or_default()
    }

    pub fn set_network_used(&self, used: bool) -> bool {
        self.update(|s| replace(&mut s.network_used, used))
    }

    pub fn set_network_connected(&self, connected: bool) -> bool {
        self.update(|s| replace(&mut s.network_connected, connected))
    }

    pub fn set_io_network_name(&self, name: &str) -> bool {
        self.update(|s| replace_str(&mut s.io_network_name, name))
    }

    pub fn set_no_cert_chain(&self, missing: bool) -> bool {
        self.update(|s| replace(&mut s.no_cert_chain, missing))
    }

    pub fn set_security_conf_error(&self, code: i32) -> bool {
        self.update(|s| replace(&mut s.security_conf_error, code))
    }

    pub fn set_lighthouse_state(&self, state: LighthouseState) -> bool {
        self.update(|s| replace(&mut s.lighthouse_state, state))
    }

    pub fn set_lighthouse_connect_to(&self, index: usize, connect_to: &str) -> bool {
        if index >= MAX_LIGHTHOUSE_CONNECTIONS {
            return false;
        }
        self.update(|s| replace_str(&mut s.lighthouse_connect_to[index], connect_to))
    }

    pub fn set_gazerbeam(&self, state: GazerbeamState) -> bool {
        self.update(|s| replace(&mut s.gazerbeam, state))
    }

    pub fn set_device_init_incomplete(&self, incomplete: bool) -> bool {
        self.update(|s| replace(&mut s.device_init_incomplete, incomplete))
    }

    /// Forget the registry and return the state to its defaults. Handlers stay registered.
    /// Socket counters survive: they only move when a stream opens or closes.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.registry.clear();
        let counts = inner.state.counts;
        if counts.iter().any(|&c| c != 0) {
            log::warn!("network context reset with sockets still open: {:?}", counts);
        }
        inner.state = NetworkState { counts, ..NetworkState::default() };
    }
}
