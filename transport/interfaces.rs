// System network interface discovery (getifaddrs)
use nix::ifaddrs::getifaddrs;
use nix::net::if_::{if_nametoindex, InterfaceFlags};
use std::net::{IpAddr, Ipv6Addr, SocketAddrV4, SocketAddrV6};

/// An operational, multicast capable interface address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemInterface {
    pub name: String,
    pub index: u32,
    pub addr: IpAddr,
}

/// Up and multicast capable interfaces of one address family
pub fn list_network_interfaces(ipv6: bool) -> Vec<SystemInterface> {
    let addrs = match getifaddrs() {
        Ok(addrs) => addrs,
        Err(e) => {
            log::warn!("getifaddrs failed: {}", e);
            return Vec::new();
        }
    };

    let mut found = Vec::new();
    for ifa in addrs {
        if !is_operational(ifa.flags) {
            continue;
        }
        let Some(storage) = ifa.address.as_ref() else {
            continue;
        };
        let addr = if ipv6 {
            match storage.as_sockaddr_in6() {
                Some(sin6) => IpAddr::V6(*SocketAddrV6::from(*sin6).ip()),
                None => continue,
            }
        } else {
            match storage.as_sockaddr_in() {
                Some(sin) => IpAddr::V4(*SocketAddrV4::from(*sin).ip()),
                None => continue,
            }
        };
        let index = match if_nametoindex(ifa.interface_name.as_str()) {
            Ok(index) => index,
            Err(e) => {
                log::debug!("no index for interface {}: {}", ifa.interface_name, e);
                continue;
            }
        };
        found.push(SystemInterface { name: ifa.interface_name.clone(), index, addr });
    }
    found
}

/// Interface index owning an IPv6 address, as needed for IPv6 multicast joins
pub fn interface_index_by_ipv6(addr: &Ipv6Addr) -> Option<u32> {
    index_in(&list_network_interfaces(true), addr)
}

pub(crate) fn index_in(interfaces: &[SystemInterface], addr: &Ipv6Addr) -> Option<u32> {
    interfaces
        .iter()
        .find(|i| i.addr == IpAddr::V6(*addr))
        .map(|i| i.index)
}

/// Diagnostic listing "idx=addr,idx=addr"
pub fn format_interface_list(interfaces: &[SystemInterface]) -> String {
    interfaces
        .iter()
        .map(|i| format!("{}={}", i.index, i.addr))
        .collect::<Vec<_>>()
        .join(",")
}

/// Up, running and able to carry multicast
fn is_operational(flags: InterfaceFlags) -> bool {
    flags.contains(InterfaceFlags::IFF_UP | InterfaceFlags::IFF_RUNNING | InterfaceFlags::IFF_MULTICAST)
}
