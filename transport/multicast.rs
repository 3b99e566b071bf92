//! Multicast interface selection.
//!
//! Precedence for both joining (receive) and sending:
//! 1. an explicit interface address given to open,
//! 2. registry adapters flagged for the direction,
//! 3. every up, multicast capable interface of the group's family.
//!
//! IPv4 uses interface addresses, IPv6 uses interface indices.

use crate::interfaces::{index_in, SystemInterface};
use osal_core::{Error, NetworkInterface, Progress, Result};
use std::net::IpAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum McastInterface {
    V4(std::net::Ipv4Addr),
    /// Interface index, 0 lets the OS choose
    V6(u32),
}

/// Pick the interfaces a multicast socket joins on or sends through.
///
/// `registry` holds the adapters flagged for this direction; `discover` lists system
/// interfaces of the requested family (true = IPv6).
pub fn select_interfaces<D>(
    group: IpAddr,
    hint: Option<IpAddr>,
    registry: &[NetworkInterface],
    discover: D,
) -> Vec<McastInterface>
where
    D: Fn(bool) -> Vec<SystemInterface>,
{
    let ipv6 = group.is_ipv6();
    let discovered = |discover: &D| -> Vec<McastInterface> {
        let list: Vec<McastInterface> = discover(ipv6)
            .iter()
            .map(|i| match i.addr {
                IpAddr::V4(v4) => McastInterface::V4(v4),
                IpAddr::V6(_) => McastInterface::V6(i.index),
            })
            .collect();
        dedup(list)
    };

    match hint {
        Some(IpAddr::V4(v4)) if !ipv6 => return vec![McastInterface::V4(v4)],
        Some(addr @ IpAddr::V6(_)) if ipv6 => return vec![to_mcast(addr, &discover(true))],
        Some(addr) => {
            log::warn!(
                "multicast interface {} does not match group {} address family, using all interfaces",
                addr,
                group
            );
            return discovered(&discover);
        }
        None => {}
    }

    let mut flagged = Vec::new();
    for nic in registry {
        match nic.ip_addr() {
            Some(addr) if addr.is_ipv6() == ipv6 => flagged.push(addr),
            Some(addr) => log::debug!("skipping adapter {}: family differs from group {}", addr, group),
            None => log::debug!("skipping adapter with unusable address '{}'", nic.ip),
        }
    }
    if !flagged.is_empty() {
        let system = if ipv6 { discover(true) } else { Vec::new() };
        return dedup(flagged.into_iter().map(|a| to_mcast(a, &system)).collect());
    }

    discovered(&discover)
}

fn to_mcast(addr: IpAddr, system: &[SystemInterface]) -> McastInterface {
    match addr {
        IpAddr::V4(v4) => McastInterface::V4(v4),
        IpAddr::V6(v6) => McastInterface::V6(index_in(system, &v6).unwrap_or_else(|| {
            log::warn!("no interface owns {}, letting the OS choose", v6);
            0
        })),
    }
}

/// Send one datagram through each interface in turn. An interface that would block or
/// fails is skipped so a retry never duplicates on the ones already served; the send
/// is `Done` once any interface took it.
pub(crate) fn send_on_each<F>(interfaces: &[McastInterface], mut send: F) -> Result<Progress>
where
    F: FnMut(McastInterface) -> Result<Progress>,
{
    let mut sent = 0;
    let mut last_err: Option<Error> = None;
    for iface in interfaces {
        match send(*iface) {
            Ok(Progress::Done) => sent += 1,
            Ok(Progress::Pending) => log::debug!("multicast send through {:?} would block, skipped", iface),
            Err(e) => {
                log::warn!("multicast send through {:?} failed: {}", iface, e);
                last_err = Some(e);
            }
        }
    }
    match (sent, last_err) {
        (0, Some(e)) => Err(e),
        (0, None) => Ok(Progress::Pending),
        _ => Ok(Progress::Done),
    }
}

fn dedup(list: Vec<McastInterface>) -> Vec<McastInterface> {
    let mut out: Vec<McastInterface> = Vec::with_capacity(list.len());
    for item in list {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn system(ipv6: bool) -> Vec<SystemInterface> {
        if ipv6 {
            vec![
                SystemInterface { name: "eth0".into(), index: 2, addr: "fe80::2".parse().unwrap() },
                SystemInterface { name: "wlan0".into(), index: 3, addr: "fe80::3".parse().unwrap() },
            ]
        } else {
            vec![
                SystemInterface { name: "eth0".into(), index: 2, addr: "192.168.1.2".parse().unwrap() },
                SystemInterface { name: "wlan0".into(), index: 3, addr: "10.0.0.3".parse().unwrap() },
            ]
        }
    }

    fn nic(ip: &str) -> NetworkInterface {
        NetworkInterface { ip: ip.into(), send_udp_multicasts: true, receive_udp_multicasts: true, ..Default::default() }
    }

    #[test]
    fn explicit_interface_wins() {
        let got = select_interfaces(
            "239.1.1.1".parse().unwrap(),
            Some("10.0.0.3".parse().unwrap()),
            &[nic("192.168.1.2")],
            system,
        );
        assert_eq!(got, vec![McastInterface::V4("10.0.0.3".parse().unwrap())]);
    }

    #[test]
    fn mismatched_hint_falls_back_to_discovery() {
        let group: IpAddr = "ff02::1".parse().unwrap();
        let hinted = select_interfaces(group, Some("192.168.1.2".parse().unwrap()), &[nic("fe80::3")], system);
        let discovered = select_interfaces(group, None, &[], system);
        assert_eq!(hinted, discovered);
        assert_eq!(hinted, vec![McastInterface::V6(2), McastInterface::V6(3)]);
    }

    #[test]
    fn mismatched_ipv6_hint_on_ipv4_group() {
        let got = select_interfaces("239.1.1.1".parse().unwrap(), Some("fe80::2".parse().unwrap()), &[], system);
        assert_eq!(got.len(), 2);
        assert!(got.iter().all(|i| matches!(i, McastInterface::V4(_))));
    }

    #[test]
    fn registry_before_discovery() {
        let got = select_interfaces("239.1.1.1".parse().unwrap(), None, &[nic("10.0.0.3"), nic("fe80::2")], system);
        assert_eq!(got, vec![McastInterface::V4("10.0.0.3".parse().unwrap())]);
    }

    #[test]
    fn ipv6_registry_entries_map_to_indices() {
        let got = select_interfaces("ff02::1".parse().unwrap(), None, &[nic("fe80::3"), nic("fe80::3")], system);
        assert_eq!(got, vec![McastInterface::V6(3)]);
    }

    #[test]
    fn blocked_interface_does_not_hold_back_the_rest() {
        let ifaces = [McastInterface::V6(1), McastInterface::V6(2), McastInterface::V6(3)];
        let mut tried = Vec::new();
        let r = send_on_each(&ifaces, |iface| {
            tried.push(iface);
            Ok(if iface == McastInterface::V6(2) { Progress::Pending } else { Progress::Done })
        });
        assert_eq!(r.unwrap(), Progress::Done);
        assert_eq!(tried, ifaces);
    }

    #[test]
    fn send_is_pending_or_failed_only_when_nothing_went_out() {
        let ifaces = [McastInterface::V6(1), McastInterface::V6(2)];
        assert_eq!(send_on_each(&ifaces, |_| Ok(Progress::Pending)).unwrap(), Progress::Pending);
        let r = send_on_each(&ifaces, |iface| match iface {
            McastInterface::V6(1) => Ok(Progress::Pending),
            _ => Err(Error::StreamClosed),
        });
        assert!(matches!(r, Err(Error::StreamClosed)));
        let r = send_on_each(&ifaces, |iface| match iface {
            McastInterface::V6(1) => Err(Error::StreamClosed),
            _ => Ok(Progress::Done),
        });
        assert_eq!(r.unwrap(), Progress::Done);
    }

    #[test]
    fn registry_of_other_family_only_uses_discovery() {
        let got = select_interfaces("239.1.1.1".parse().unwrap(), None, &[nic("fe80::2")], system);
        assert_eq!(got.len(), 2);
    }
}
