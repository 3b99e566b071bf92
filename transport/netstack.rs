// Loopback TCP stack driven from a single thread through callbacks.
//
// Models the raw API of a small embedded stack: protocol control blocks,
// a fixed receive window per connection, and callbacks for connect,
// error, receive, sent and accept. Nothing here is thread safe; the
// embedded backend owns one instance on its own thread.
use std::collections::{HashMap, VecDeque};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

pub type PcbId = u32;

/// First port handed out for port 0 binds and outgoing connections
pub const EPHEMERAL_PORT_START: u16 = 49152;
/// Bytes a receiver accepts before the reader acknowledges with `recved`
pub const DEFAULT_WINDOW: usize = 4096;
/// Bytes a sender may queue beyond what the peer window takes
pub const DEFAULT_SEND_BUFFER: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackError {
    /// Nobody listens on the port
    Refused,
    /// Connection is gone
    Reset,
    AddrInUse,
}

/// Receives everything the stack reports. `received(id, None)` means the peer closed.
pub trait StackCallbacks {
    fn connected(&mut self, id: PcbId);
    fn error(&mut self, id: PcbId, err: StackError);
    fn received(&mut self, id: PcbId, data: Option<Vec<u8>>);
    fn sent(&mut self, id: PcbId, len: usize);
    fn accepted(&mut self, listener: PcbId, id: PcbId, remote: SocketAddr);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PcbState {
    Fresh,
    Listen,
    Established { peer: PcbId },
    PeerGone,
}

struct Pcb {
    state: PcbState,
    port: u16,
    unsent: VecDeque<u8>,
    window: usize,
}

pub struct LoopbackStack {
    pcbs: HashMap<PcbId, Pcb>,
    listeners: HashMap<u16, PcbId>,
    next_id: PcbId,
    next_port: u16,
    window: usize,
    send_buffer: usize,
}

impl Default for LoopbackStack {
    fn default() -> Self {
        Self::with_limits(DEFAULT_WINDOW, DEFAULT_SEND_BUFFER)
    }
}

impl LoopbackStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(window: usize, send_buffer: usize) -> Self {
        LoopbackStack {
            pcbs: HashMap::new(),
            listeners: HashMap::new(),
            next_id: 1,
            next_port: EPHEMERAL_PORT_START,
            window: window.max(1),
            send_buffer: send_buffer.max(1),
        }
    }

    pub fn new_pcb(&mut self) -> PcbId {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        self.pcbs.insert(
            id,
            Pcb { state: PcbState::Fresh, port: 0, unsent: VecDeque::new(), window: self.window },
        );
        id
    }

    pub fn pcb_count(&self) -> usize {
        self.pcbs.len()
    }

    fn ephemeral_port(&mut self) -> u16 {
        loop {
            let port = self.next_port;
            self.next_port = if port == u16::MAX { EPHEMERAL_PORT_START } else { port + 1 };
            if !self.listeners.contains_key(&port) {
                return port;
            }
        }
    }

    /// Bind and listen. Port 0 picks an ephemeral port. Returns the bound port.
    pub fn listen(&mut self, id: PcbId, port: u16) -> Result<u16, StackError> {
        if !self.pcbs.contains_key(&id) {
            return Err(StackError::Reset);
        }
        let port = if port == 0 { self.ephemeral_port() } else { port };
        if self.listeners.contains_key(&port) {
            return Err(StackError::AddrInUse);
        }
        if let Some(pcb) = self.pcbs.get_mut(&id) {
            pcb.state = PcbState::Listen;
            pcb.port = port;
        }
        self.listeners.insert(port, id);
        Ok(port)
    }

    /// Connect to a local listener. A missing listener reports Refused and frees the pcb.
    pub fn connect<C: StackCallbacks>(&mut self, id: PcbId, port: u16, cb: &mut C) {
        let Some(&listener) = self.listeners.get(&port) else {
            self.pcbs.remove(&id);
            cb.error(id, StackError::Refused);
            return;
        };
        let local_port = self.ephemeral_port();
        let server = self.new_pcb();
        if let Some(pcb) = self.pcbs.get_mut(&server) {
            pcb.state = PcbState::Established { peer: id };
            pcb.port = port;
        }
        match self.pcbs.get_mut(&id) {
            Some(pcb) => {
                pcb.state = PcbState::Established { peer: server };
                pcb.port = local_port;
            }
            None => {
                self.pcbs.remove(&server);
                cb.error(id, StackError::Reset);
                return;
            }
        }
        let remote = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), local_port);
        cb.accepted(listener, server, remote);
        cb.connected(id);
    }

    /// Queue data for sending. Returns the bytes taken, limited by the send buffer.
    pub fn write<C: StackCallbacks>(&mut self, id: PcbId, data: &[u8], cb: &mut C) -> usize {
        let send_buffer = self.send_buffer;
        let Some(pcb) = self.pcbs.get_mut(&id) else {
            return 0;
        };
        match pcb.state {
            PcbState::Established { .. } => {}
            PcbState::PeerGone => {
                cb.error(id, StackError::Reset);
                return 0;
            }
            _ => return 0,
        }
        let taken = data.len().min(send_buffer.saturating_sub(pcb.unsent.len()));
        pcb.unsent.extend(&data[..taken]);
        self.output(id, cb);
        taken
    }

    /// Reader consumed `len` bytes; reopen the window and let the peer send more.
    pub fn recved<C: StackCallbacks>(&mut self, id: PcbId, len: usize, cb: &mut C) {
        let window = self.window;
        let peer = match self.pcbs.get_mut(&id) {
            Some(pcb) => {
                pcb.window = (pcb.window + len).min(window);
                match pcb.state {
                    PcbState::Established { peer } => peer,
                    _ => return,
                }
            }
            None => return,
        };
        self.output(peer, cb);
    }

    /// Move as much unsent data of `id` as the peer window takes
    fn output<C: StackCallbacks>(&mut self, id: PcbId, cb: &mut C) {
        let peer = match self.pcbs.get(&id).map(|p| p.state) {
            Some(PcbState::Established { peer }) => peer,
            _ => return,
        };
        let room = self.pcbs.get(&peer).map_or(0, |p| p.window);
        let chunk: Vec<u8> = match self.pcbs.get_mut(&id) {
            Some(pcb) => {
                let n = pcb.unsent.len().min(room);
                pcb.unsent.drain(..n).collect()
            }
            None => return,
        };
        if chunk.is_empty() {
            return;
        }
        if let Some(p) = self.pcbs.get_mut(&peer) {
            p.window -= chunk.len();
        }
        let len = chunk.len();
        cb.received(peer, Some(chunk));
        cb.sent(id, len);
    }

    /// Free the pcb. An established peer sees end of stream.
    pub fn close<C: StackCallbacks>(&mut self, id: PcbId, cb: &mut C) {
        self.output(id, cb);
        let Some(pcb) = self.pcbs.remove(&id) else {
            return;
        };
        match pcb.state {
            PcbState::Listen => {
                self.listeners.remove(&pcb.port);
            }
            PcbState::Established { peer } => {
                if !pcb.unsent.is_empty() {
                    log::debug!("pcb {} closed with {} bytes unsent", id, pcb.unsent.len());
                }
                if let Some(p) = self.pcbs.get_mut(&peer) {
                    p.state = PcbState::PeerGone;
                    cb.received(peer, None);
                }
            }
            PcbState::Fresh | PcbState::PeerGone => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    enum Seen {
        Connected(PcbId),
        Error(PcbId, StackError),
        Received(PcbId, Option<Vec<u8>>),
        Sent(PcbId, usize),
        Accepted(PcbId, PcbId),
    }

    #[derive(Default)]
    struct Recorder(Vec<Seen>);

    impl StackCallbacks for Recorder {
        fn connected(&mut self, id: PcbId) {
            self.0.push(Seen::Connected(id));
        }
        fn error(&mut self, id: PcbId, err: StackError) {
            self.0.push(Seen::Error(id, err));
        }
        fn received(&mut self, id: PcbId, data: Option<Vec<u8>>) {
            self.0.push(Seen::Received(id, data));
        }
        fn sent(&mut self, id: PcbId, len: usize) {
            self.0.push(Seen::Sent(id, len));
        }
        fn accepted(&mut self, listener: PcbId, id: PcbId, _remote: SocketAddr) {
            self.0.push(Seen::Accepted(listener, id));
        }
    }

    fn connected_pair(stack: &mut LoopbackStack, cb: &mut Recorder) -> (PcbId, PcbId) {
        let listener = stack.new_pcb();
        let port = stack.listen(listener, 0).unwrap();
        let client = stack.new_pcb();
        stack.connect(client, port, cb);
        let server = cb
            .0
            .iter()
            .find_map(|s| match s {
                Seen::Accepted(_, id) => Some(*id),
                _ => None,
            })
            .unwrap();
        cb.0.clear();
        (client, server)
    }

    #[test]
    fn ephemeral_ports_start_high() {
        let mut stack = LoopbackStack::new();
        let a = stack.new_pcb();
        assert_eq!(stack.listen(a, 0), Ok(EPHEMERAL_PORT_START));
        let b = stack.new_pcb();
        assert_eq!(stack.listen(b, EPHEMERAL_PORT_START), Err(StackError::AddrInUse));
    }

    #[test]
    fn connect_without_listener_is_refused() {
        let mut stack = LoopbackStack::new();
        let mut cb = Recorder::default();
        let id = stack.new_pcb();
        stack.connect(id, 7000, &mut cb);
        assert_eq!(cb.0, vec![Seen::Error(id, StackError::Refused)]);
        assert_eq!(stack.pcb_count(), 0);
    }

    #[test]
    fn connect_reports_accept_and_connected() {
        let mut stack = LoopbackStack::new();
        let mut cb = Recorder::default();
        let listener = stack.new_pcb();
        let port = stack.listen(listener, 6368).unwrap();
        let client = stack.new_pcb();
        stack.connect(client, port, &mut cb);
        assert_eq!(cb.0.len(), 2);
        assert!(matches!(cb.0[0], Seen::Accepted(l, _) if l == listener));
        assert_eq!(cb.0[1], Seen::Connected(client));
    }

    #[test]
    fn window_holds_back_data_until_recved() {
        let mut stack = LoopbackStack::with_limits(4, 16);
        let mut cb = Recorder::default();
        let (client, server) = connected_pair(&mut stack, &mut cb);

        assert_eq!(stack.write(client, b"abcdef", &mut cb), 6);
        assert_eq!(cb.0, vec![Seen::Received(server, Some(b"abcd".to_vec())), Seen::Sent(client, 4)]);
        cb.0.clear();

        stack.recved(server, 4, &mut cb);
        assert_eq!(cb.0, vec![Seen::Received(server, Some(b"ef".to_vec())), Seen::Sent(client, 2)]);
    }

    #[test]
    fn send_buffer_limits_write() {
        let mut stack = LoopbackStack::with_limits(2, 4);
        let mut cb = Recorder::default();
        let (client, _server) = connected_pair(&mut stack, &mut cb);
        // 2 go out to the peer window, 4 more fit the send buffer
        assert_eq!(stack.write(client, b"0123456789", &mut cb), 4);
        assert_eq!(stack.write(client, b"xyz", &mut cb), 2);
        assert_eq!(stack.write(client, b"xyz", &mut cb), 0);
    }

    #[test]
    fn close_signals_peer_end_of_stream() {
        let mut stack = LoopbackStack::new();
        let mut cb = Recorder::default();
        let (client, server) = connected_pair(&mut stack, &mut cb);
        stack.close(client, &mut cb);
        assert_eq!(cb.0, vec![Seen::Received(server, None)]);
        cb.0.clear();

        assert_eq!(stack.write(server, b"late", &mut cb), 0);
        assert_eq!(cb.0, vec![Seen::Error(server, StackError::Reset)]);
    }

    #[test]
    fn closing_listener_frees_port() {
        let mut stack = LoopbackStack::new();
        let mut cb = Recorder::default();
        let l = stack.new_pcb();
        stack.listen(l, 7001).unwrap();
        stack.close(l, &mut cb);
        let again = stack.new_pcb();
        assert_eq!(stack.listen(again, 7001), Ok(7001));
    }
}
