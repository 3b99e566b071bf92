// Socket stream: TCP connect/listen and UDP multicast over the OS socket API
use crate::config::socket_defaults;
use crate::event::WakeEvent;
use crate::interfaces::list_network_interfaces;
use crate::multicast::{select_interfaces, send_on_each, McastInterface};
use crate::select::select_sockets;
use crate::traits::{contract_violation, Accepted, Packet, Readiness, Stream};
use nix::errno::Errno;
use nix::sys::socket::{self, sockopt, AddressFamily, Backlog, MsgFlags, SockFlag, SockType, SockaddrStorage};
use osal_buffer::RingBuffer;
use osal_core::{
    ip_to_string, is_would_block, Endpoint, Error, Progress, Result, SocketCount, StreamFlags,
    StreamParameter, StreamTimeouts,
};
use osal_net::{net, McastDirection, NetHandle};
use socket2::SockRef;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::time::Duration;

/// Bytes read per recv call while draining a closing connection
const CLOSE_DRAIN_CHUNK: usize = 64;

pub(crate) enum Handle {
    Listener(TcpListener),
    Tcp(TcpStream),
    Udp(UdpSocket),
}

impl AsFd for Handle {
    fn as_fd(&self) -> BorrowedFd<'_> {
        match self {
            Handle::Listener(l) => l.as_fd(),
            Handle::Tcp(s) => s.as_fd(),
            Handle::Udp(u) => u.as_fd(),
        }
    }
}

enum Multicast {
    /// Joined to the group on the selected interfaces
    Receiver,
    /// Sends one copy of every datagram through each interface
    Sender { group: SocketAddr, interfaces: Vec<McastInterface> },
}

pub struct SocketStream {
    handle: Option<Handle>,
    flags: StreamFlags,
    is_ipv6: bool,
    count: SocketCount,
    connected: bool,
    write_blocked: bool,
    ring: Option<RingBuffer>,
    multicast: Option<Multicast>,
    timeouts: StreamTimeouts,
    net: NetHandle,
}

pub(crate) fn os_error(e: Errno) -> Error {
    Error::from_io(io::Error::from(e))
}

pub(crate) fn errno_would_block(e: Errno) -> bool {
    matches!(e, Errno::EAGAIN | Errno::EINTR | Errno::EINPROGRESS | Errno::EALREADY)
}

fn new_socket(ipv6: bool, ty: SockType, flags: StreamFlags) -> Result<OwnedFd> {
    let family = if ipv6 { AddressFamily::Inet6 } else { AddressFamily::Inet };
    let fd = socket::socket(family, ty, SockFlag::SOCK_NONBLOCK | SockFlag::SOCK_CLOEXEC, None)
        .map_err(os_error)?;
    if flags.reuse_addr() {
        socket::setsockopt(&fd, sockopt::ReuseAddr, &true).map_err(os_error)?;
    }
    Ok(fd)
}

impl SocketStream {
    /// Open with an explicit network context instead of the process-wide one
    pub fn open_in(
        net: NetHandle,
        parameters: &str,
        option: Option<&str>,
        flags: StreamFlags,
    ) -> Result<Self> {
        let defaults = socket_defaults();
        let endpoint = Endpoint::parse(parameters, defaults.port)?;
        if flags.is_multicast() {
            return Self::open_multicast(net, &endpoint, option, flags);
        }

        let addr = endpoint.resolve(flags)?;
        let fd = new_socket(addr.is_ipv6(), SockType::Stream, flags)?;
        let storage = SockaddrStorage::from(addr);

        let (handle, count, connected) = if flags.is_listen() {
            socket::bind(fd.as_raw_fd(), &storage).map_err(os_error)?;
            let backlog = Backlog::new(defaults.listen_backlog).map_err(os_error)?;
            socket::listen(&fd, backlog).map_err(os_error)?;
            (Handle::Listener(TcpListener::from(fd)), SocketCount::Listening, true)
        } else {
            // Completion of a pending connect shows up in select or the next read/write
            let connected = match socket::connect(fd.as_raw_fd(), &storage) {
                Ok(()) => true,
                Err(e) if errno_would_block(e) => false,
                Err(e) => return Err(os_error(e)),
            };
            (Handle::Tcp(TcpStream::from(fd)), SocketCount::Connected, connected)
        };

        let mut stream = Self::assemble(net, handle, flags, addr.is_ipv6(), count, connected);
        if flags.nodelay() && !flags.is_listen() {
            stream.enable_nodelay(defaults.ring_buffer_size)?;
        }
        log::debug!("socket {} {}", if flags.is_listen() { "listening on" } else { "connecting to" }, addr);
        Ok(stream)
    }

    fn open_multicast(
        net: NetHandle,
        endpoint: &Endpoint,
        option: Option<&str>,
        flags: StreamFlags,
    ) -> Result<Self> {
        let group_text = option.ok_or_else(|| Error::AddressParse("multicast group address missing".into()))?;
        let group: IpAddr = group_text
            .trim()
            .trim_matches(|c| c == '[' || c == ']')
            .parse()
            .map_err(|_| Error::AddressParse(group_text.to_string()))?;
        if !group.is_multicast() {
            return Err(Error::AddressParse(format!("{} is not a multicast group", group)));
        }
        let ipv6 = group.is_ipv6();

        let hint = match &endpoint.host {
            Some(host) => Some(host.parse::<IpAddr>().map_err(|_| Error::AddressParse(host.clone()))?),
            None => None,
        };
        let direction = if flags.is_listen() { McastDirection::Receive } else { McastDirection::Send };
        let registry = net.multicast_interfaces(direction);
        let interfaces = select_interfaces(group, hint, &registry, list_network_interfaces);
        log::debug!("multicast group {} {:?} interfaces {:?}", group, direction, interfaces);

        let fd = new_socket(ipv6, SockType::Datagram, flags)?;
        let any = if ipv6 { IpAddr::V6(Ipv6Addr::UNSPECIFIED) } else { IpAddr::V4(Ipv4Addr::UNSPECIFIED) };
        let bind_port = if flags.is_listen() { endpoint.port } else { 0 };
        socket::bind(fd.as_raw_fd(), &SockaddrStorage::from(SocketAddr::new(any, bind_port)))
            .map_err(os_error)?;
        let udp = UdpSocket::from(fd);

        let multicast = if flags.is_listen() {
            join_group(&udp, group, &interfaces)?;
            Multicast::Receiver
        } else {
            Multicast::Sender { group: SocketAddr::new(group, endpoint.port), interfaces }
        };

        let mut stream = Self::assemble(net, Handle::Udp(udp), flags, ipv6, SocketCount::Udp, true);
        stream.multicast = Some(multicast);
        Ok(stream)
    }

    /// Wrap an open handle. From here on Drop releases it and undoes the counter.
    fn assemble(
        net: NetHandle,
        handle: Handle,
        flags: StreamFlags,
        is_ipv6: bool,
        count: SocketCount,
        connected: bool,
    ) -> Self {
        net.socket_opened(count);
        SocketStream {
            handle: Some(handle),
            flags,
            is_ipv6,
            count,
            connected,
            write_blocked: false,
            ring: None,
            multicast: None,
            timeouts: StreamTimeouts::default(),
            net,
        }
    }

    fn enable_nodelay(&mut self, ring_size: usize) -> Result<()> {
        if let Some(Handle::Tcp(tcp)) = &self.handle {
            socket::setsockopt(tcp, sockopt::TcpNoDelay, &true).map_err(os_error)?;
        }
        self.ring = Some(RingBuffer::new(ring_size));
        Ok(())
    }

    fn tcp_fd(&self, op: &str) -> Result<RawFd> {
        match &self.handle {
            Some(Handle::Tcp(tcp)) => Ok(tcp.as_raw_fd()),
            Some(_) => Err(Error::InvalidArgument(format!("{} needs a connected TCP socket", op))),
            None => contract_violation(&format!("{} after close", op), Error::Closed),
        }
    }

    /// Local address, useful after binding to port 0
    pub fn local_addr(&self) -> Result<SocketAddr> {
        let addr = match &self.handle {
            Some(Handle::Listener(l)) => l.local_addr(),
            Some(Handle::Tcp(s)) => s.local_addr(),
            Some(Handle::Udp(u)) => u.local_addr(),
            None => return Err(Error::Closed),
        };
        addr.map_err(Error::from)
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    // ---- select support ----

    pub(crate) fn poll_fd(&self) -> Option<BorrowedFd<'_>> {
        self.handle.as_ref().map(|h| h.as_fd())
    }

    /// Write readiness matters while connecting, after a blocked send, or with bytes buffered
    pub(crate) fn watch_write(&self) -> bool {
        matches!(self.handle, Some(Handle::Tcp(_)))
            && (!self.connected || self.write_blocked || self.ring.as_ref().map_or(false, |r| !r.is_empty()))
    }

    pub(crate) fn is_listener(&self) -> bool {
        matches!(self.handle, Some(Handle::Listener(_)))
    }

    pub(crate) fn mark_connected(&mut self) {
        self.connected = true;
    }

    pub(crate) fn mark_writable(&mut self) {
        self.write_blocked = false;
    }

    fn release(&mut self, handle: Handle) {
        if let Handle::Tcp(tcp) = &handle {
            let _ = tcp.shutdown(Shutdown::Write);
            drain_inbound(tcp.as_raw_fd(), socket_defaults().close_drain_limit);
        }
        drop(handle);
        self.ring = None;
        self.multicast = None;
        self.net.socket_closed(self.count);
        log::debug!("socket closed ({:?})", self.count);
    }
}

impl Drop for SocketStream {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.release(handle);
        }
    }
}

/// Best effort: discard what the peer already sent, without blocking
fn drain_inbound(fd: RawFd, limit: usize) {
    let mut buf = [0u8; CLOSE_DRAIN_CHUNK];
    let mut total = 0;
    while total < limit {
        match socket::recv(fd, &mut buf, MsgFlags::empty()) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) => {
                if !errno_would_block(e) && e != Errno::ENOTCONN {
                    log::debug!("drain on close: {}", e);
                }
                break;
            }
        }
    }
}

fn join_group(udp: &UdpSocket, group: IpAddr, interfaces: &[McastInterface]) -> Result<()> {
    let fallback = if group.is_ipv6() {
        McastInterface::V6(0)
    } else {
        McastInterface::V4(Ipv4Addr::UNSPECIFIED)
    };
    let targets = if interfaces.is_empty() { vec![fallback] } else { interfaces.to_vec() };

    let mut joined = 0;
    let mut last_err = None;
    for iface in targets {
        let r = match (group, iface) {
            (IpAddr::V4(g), McastInterface::V4(addr)) => udp.join_multicast_v4(&g, &addr),
            (IpAddr::V6(g), McastInterface::V6(index)) => udp.join_multicast_v6(&g, index),
            _ => continue,
        };
        match r {
            Ok(()) => joined += 1,
            // Already a member through another socket or interface alias
            Err(e) if e.raw_os_error() == Some(libc::EADDRINUSE) => joined += 1,
            Err(e) => {
                log::warn!("joining {} on {:?} failed: {}", group, iface, e);
                last_err = Some(e);
            }
        }
    }
    match (joined, last_err) {
        (0, Some(e)) => Err(Error::from_io(e)),
        _ => Ok(()),
    }
}

fn set_multicast_interface(udp: &UdpSocket, iface: McastInterface) -> Result<()> {
    let sock = SockRef::from(udp);
    match iface {
        McastInterface::V4(addr) => sock.set_multicast_if_v4(&addr)?,
        McastInterface::V6(index) => sock.set_multicast_if_v6(index)?,
    }
    Ok(())
}

fn send_datagram(udp: &UdpSocket, buf: &[u8], to: SocketAddr) -> Result<Progress> {
    match udp.send_to(buf, to) {
        Ok(_) => Ok(Progress::Done),
        Err(e) if is_would_block(&e) => Ok(Progress::Pending),
        Err(e) => Err(e.into()),
    }
}

impl Stream for SocketStream {
    fn open(parameters: &str, option: Option<&str>, flags: StreamFlags) -> Result<Self> {
        Self::open_in(net(), parameters, option, flags)
    }

    fn close(&mut self, _flags: StreamFlags) {
        match self.handle.take() {
            Some(handle) => self.release(handle),
            None => {
                let _: Result<()> = contract_violation("socket closed twice", Error::Closed);
            }
        }
    }

    fn accept(&mut self, flags: StreamFlags) -> Result<Option<Accepted<Self>>> {
        let listener = match &self.handle {
            Some(Handle::Listener(l)) => l,
            Some(_) => return Err(Error::InvalidArgument("accept on a socket that is not listening".into())),
            None => return contract_violation("accept after close", Error::Closed),
        };
        let (tcp, remote) = match listener.accept() {
            Ok(pair) => pair,
            Err(e) if is_would_block(&e) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let flags = if flags.is_empty() { self.flags } else { flags };
        let flags = flags.difference(StreamFlags::LISTEN);
        tcp.set_nonblocking(true)?;
        if flags.reuse_addr() {
            socket::setsockopt(&tcp, sockopt::ReuseAddr, &true).map_err(os_error)?;
        }

        let mut stream = Self::assemble(
            self.net.clone(),
            Handle::Tcp(tcp),
            flags,
            self.is_ipv6,
            SocketCount::Connected,
            true,
        );
        if flags.nodelay() {
            stream.enable_nodelay(socket_defaults().ring_buffer_size)?;
        }
        log::debug!("socket accepted from {}", remote);
        Ok(Some(Accepted { stream, remote: ip_to_string(&remote.ip()) }))
    }

    fn read(&mut self, buf: &mut [u8], _flags: StreamFlags) -> Result<usize> {
        let fd = self.tcp_fd("read")?;
        if buf.is_empty() {
            return Ok(0);
        }
        match socket::recv(fd, buf, MsgFlags::empty()) {
            Ok(0) => Err(Error::StreamClosed),
            Ok(n) => {
                self.connected = true;
                Ok(n)
            }
            Err(e) if errno_would_block(e) => Ok(0),
            Err(Errno::ENOTCONN) if !self.connected => Ok(0),
            Err(e) => Err(os_error(e)),
        }
    }

    fn write(&mut self, buf: &[u8], _flags: StreamFlags) -> Result<usize> {
        let fd = self.tcp_fd("write")?;
        if buf.is_empty() {
            return Ok(0);
        }
        if let Some(ring) = self.ring.as_mut() {
            return Ok(ring.write(buf));
        }
        match socket::send(fd, buf, MsgFlags::MSG_NOSIGNAL) {
            Ok(n) => {
                self.connected = true;
                self.write_blocked = n < buf.len();
                Ok(n)
            }
            Err(e) if errno_would_block(e) || (e == Errno::ENOTCONN && !self.connected) => {
                self.write_blocked = true;
                Ok(0)
            }
            Err(e) => Err(os_error(e)),
        }
    }

    fn flush(&mut self, _flags: StreamFlags) -> Result<()> {
        let SocketStream { handle, ring, connected, write_blocked, .. } = self;
        let tcp = match handle {
            Some(Handle::Tcp(tcp)) => &*tcp,
            Some(_) => return Ok(()),
            None => return contract_violation("flush after close", Error::Closed),
        };
        let Some(ring) = ring.as_mut() else {
            return Ok(());
        };
        if ring.is_empty() {
            return Ok(());
        }

        let fd = tcp.as_raw_fd();
        let was_connected = *connected;
        let mut blocked = false;
        let sent = ring
            .drain_with(|run| {
                // Push each run out as its own segment
                socket::setsockopt(tcp, sockopt::TcpNoDelay, &true)?;
                match socket::send(fd, run, MsgFlags::MSG_NOSIGNAL) {
                    Ok(n) => Ok(n),
                    Err(e) if errno_would_block(e) || (e == Errno::ENOTCONN && !was_connected) => {
                        blocked = true;
                        Ok(0)
                    }
                    Err(e) => Err(io::Error::from(e)),
                }
            })
            .map_err(Error::from_io)?;

        if sent > 0 {
            *connected = true;
        }
        *write_blocked = blocked || !ring.is_empty();
        Ok(())
    }

    fn select(
        streams: &mut [&mut Self],
        event: Option<&WakeEvent>,
        timeout: Option<Duration>,
        _flags: StreamFlags,
    ) -> Result<Readiness> {
        select_sockets(streams, event, timeout)
    }

    fn get_parameter(&self, parameter: StreamParameter) -> i64 {
        match parameter {
            StreamParameter::TxBuffered => self.ring.as_ref().map_or(0, |r| r.len() as i64),
            StreamParameter::RxAvailable => -1,
            _ => self.timeouts.get(parameter),
        }
    }

    fn set_parameter(&mut self, parameter: StreamParameter, value: i64) {
        if !self.timeouts.set(parameter, value) {
            log::debug!("stream parameter {:?} cannot be set", parameter);
        }
    }

    fn send_packet(&mut self, buf: &[u8], _flags: StreamFlags) -> Result<Progress> {
        let udp = match &self.handle {
            Some(Handle::Udp(udp)) => udp,
            Some(_) => return Err(Error::InvalidArgument("send_packet needs a UDP socket".into())),
            None => return contract_violation("send_packet after close", Error::Closed),
        };
        let Some(Multicast::Sender { group, interfaces }) = &self.multicast else {
            return Err(Error::InvalidArgument("socket was opened for receiving multicasts".into()));
        };

        if interfaces.is_empty() {
            return send_datagram(udp, buf, *group);
        }
        let group = *group;
        send_on_each(interfaces, |iface| {
            set_multicast_interface(udp, iface)?;
            send_datagram(udp, buf, group)
        })
    }

    fn receive_packet(&mut self, buf: &mut [u8], _flags: StreamFlags) -> Result<Option<Packet>> {
        let udp = match &self.handle {
            Some(Handle::Udp(udp)) => udp,
            Some(_) => return Err(Error::InvalidArgument("receive_packet needs a UDP socket".into())),
            None => return contract_violation("receive_packet after close", Error::Closed),
        };
        match udp.recv_from(buf) {
            Ok((len, from)) => Ok(Some(Packet { len, remote: ip_to_string(&from.ip()) })),
            Err(e) if is_would_block(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn open_flags(&self) -> StreamFlags {
        self.flags
    }

    fn is_ipv6(&self) -> bool {
        self.is_ipv6
    }
}
