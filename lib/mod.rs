// osal-ng: portable stream/socket layer for applications and tests.
// Re-exports every layer and owns process startup and shutdown.

pub mod config;

pub use osal_core::*;
pub use osal_buffer::*;
pub use osal_net::*;
pub use osal_transport::*;

pub use config::{ConfigError, OsalConfig, SocketConfig};

/// Apply `config` to the process-wide network context and socket defaults
pub fn initialize(config: &OsalConfig) {
    initialize_in(&net(), config);
}

/// Same as `initialize` but against a given network context. Socket defaults are
/// still process-wide.
pub fn initialize_in(ctx: &NetContext, config: &OsalConfig) {
    ctx.set_interfaces(config.nics.clone());

    for (i, nic) in config.nics.iter().take(MAX_NICS).enumerate() {
        ctx.set_nic_ip(i, &nic.ip);
        let status = if nic.ip.trim().is_empty() { NicStatus::NotInitialized } else { NicStatus::Pending };
        ctx.set_nic_status(i, status);
    }

    if config.wifi.len() > MAX_WIFI_NETWORKS {
        log::warn!("{} Wi-Fi networks configured, keeping first {}", config.wifi.len(), MAX_WIFI_NETWORKS);
    }
    for (i, wifi) in config.wifi.iter().take(MAX_WIFI_NETWORKS).enumerate() {
        ctx.set_wifi_network_name(i, &wifi.name);
        ctx.set_wifi_password(i, &wifi.password);
    }

    ctx.set_network_used(!config.nics.is_empty() || !config.wifi.is_empty());
    set_socket_defaults(SocketDefaults::from(&config.socket));

    log::info!(
        "osal initialized: {} nics, {} wifi networks, default port {}",
        config.nics.len().min(MAX_NICS),
        config.wifi.len().min(MAX_WIFI_NETWORKS),
        config.socket.default_port
    );
}

/// Clear the process-wide registry and network state
pub fn shutdown() {
    shutdown_in(&net());
}

pub fn shutdown_in(ctx: &NetContext) {
    ctx.reset();
    log::info!("osal shut down");
}
