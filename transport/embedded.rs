// Embedded backend: a callback driven stack on its own thread, reached
// through messages. Streams never touch the stack directly.
use crate::config::socket_defaults;
use crate::event::WakeEvent;
use crate::netstack::{LoopbackStack, PcbId, StackCallbacks, StackError};
use crate::traits::{contract_violation, Accepted, Packet, Readiness, SelectEvent, Stream};
use crossbeam::channel::{bounded, unbounded, Receiver, RecvTimeoutError, Select, Sender, TryRecvError};
use once_cell::sync::OnceCell;
use osal_buffer::RingBuffer;
use osal_core::{
    ip_to_string, Endpoint, Error, Progress, Result, SocketCount, StreamFlags, StreamParameter,
    StreamTimeouts, SELECT_MAX,
};
use osal_net::{net, NetHandle};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const RELEASE_WAIT: Duration = Duration::from_secs(2);

/// Requests from application threads to the stack thread
pub enum Command {
    Listen { port: u16, events: Sender<StackEvent>, reply: Sender<std::result::Result<(PcbId, u16), StackError>> },
    Connect { port: u16, events: Sender<StackEvent>, reply: Sender<PcbId> },
    Write { id: PcbId, data: Vec<u8>, reply: Sender<usize> },
    Recved { id: PcbId, len: usize },
    Close { id: PcbId },
    Shutdown,
}

/// Stack callbacks as delivered to the owning stream
#[derive(Debug)]
pub enum StackEvent {
    Connected,
    Error(StackError),
    Received(Vec<u8>),
    PeerClosed,
    Sent(usize),
    Accepted { id: PcbId, remote: SocketAddr, events: Receiver<StackEvent> },
}

impl StackError {
    fn into_error(self) -> Error {
        match self {
            StackError::Refused => Error::ConnectionRefused,
            StackError::Reset => Error::StreamClosed,
            StackError::AddrInUse => Error::Transport(io::Error::from(io::ErrorKind::AddrInUse)),
        }
    }
}

/// Forwards each callback to the channel of the stream that owns the pcb
#[derive(Default)]
struct Router {
    routes: HashMap<PcbId, Sender<StackEvent>>,
}

impl Router {
    fn post(&mut self, id: PcbId, event: StackEvent) {
        if let Some(tx) = self.routes.get(&id) {
            if tx.send(event).is_err() {
                log::trace!("pcb {} has no reader", id);
            }
        }
    }
}

impl StackCallbacks for Router {
    fn connected(&mut self, id: PcbId) {
        self.post(id, StackEvent::Connected);
    }

    fn error(&mut self, id: PcbId, err: StackError) {
        self.post(id, StackEvent::Error(err));
        if err == StackError::Refused {
            self.routes.remove(&id);
        }
    }

    fn received(&mut self, id: PcbId, data: Option<Vec<u8>>) {
        let event = match data {
            Some(data) => StackEvent::Received(data),
            None => StackEvent::PeerClosed,
        };
        self.post(id, event);
    }

    fn sent(&mut self, id: PcbId, len: usize) {
        self.post(id, StackEvent::Sent(len));
    }

    fn accepted(&mut self, listener: PcbId, id: PcbId, remote: SocketAddr) {
        let (tx, rx) = unbounded();
        self.routes.insert(id, tx);
        self.post(listener, StackEvent::Accepted { id, remote, events: rx });
    }
}

fn run_stack(commands: Receiver<Command>) {
    let mut stack = LoopbackStack::new();
    let mut router = Router::default();
    log::debug!("embedded stack task started");

    for command in commands.iter() {
        match command {
            Command::Listen { port, events, reply } => {
                let id = stack.new_pcb();
                let result = stack.listen(id, port).map(|bound| (id, bound));
                match result {
                    Ok(_) => {
                        router.routes.insert(id, events);
                    }
                    Err(_) => stack.close(id, &mut router),
                }
                let _ = reply.send(result);
            }
            Command::Connect { port, events, reply } => {
                let id = stack.new_pcb();
                router.routes.insert(id, events);
                let _ = reply.send(id);
                stack.connect(id, port, &mut router);
            }
            Command::Write { id, data, reply } => {
                let taken = stack.write(id, &data, &mut router);
                let _ = reply.send(taken);
            }
            Command::Recved { id, len } => stack.recved(id, len, &mut router),
            Command::Close { id } => {
                stack.close(id, &mut router);
                router.routes.remove(&id);
            }
            Command::Shutdown => break,
        }
    }
    log::debug!("embedded stack task stopped with {} pcbs", stack.pcb_count());
}

/// Owner of the stack thread. Dropping it stops the thread.
pub struct EmbeddedStack {
    commands: Sender<Command>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

pub type StackHandle = Arc<EmbeddedStack>;

static STACK: OnceCell<StackHandle> = OnceCell::new();

/// Process-wide stack, started on first use
pub fn embedded_stack() -> Result<StackHandle> {
    STACK.get_or_try_init(EmbeddedStack::new).map(Arc::clone)
}

impl EmbeddedStack {
    /// Start a private stack thread
    pub fn new() -> Result<StackHandle> {
        let (commands, rx) = unbounded();
        let thread = thread::Builder::new()
            .name("osal-netstack".to_string())
            .spawn(move || run_stack(rx))?;
        Ok(Arc::new(EmbeddedStack { commands, thread: Mutex::new(Some(thread)) }))
    }

    fn post(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| Error::Closed)
    }

    fn call<T>(&self, build: impl FnOnce(Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = bounded(1);
        self.post(build(tx))?;
        rx.recv().map_err(|_| Error::Closed)
    }

    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
        let handle = self.thread.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::error!("embedded stack thread panicked");
            }
        }
    }
}

impl Drop for EmbeddedStack {
    fn drop(&mut self) {
        self.shutdown();
    }
}

pub struct EmbeddedStream {
    stack: StackHandle,
    id: Option<PcbId>,
    events: Receiver<StackEvent>,
    flags: StreamFlags,
    is_listener: bool,
    port: u16,
    count: SocketCount,
    rx: VecDeque<u8>,
    backlog: VecDeque<(PcbId, SocketAddr, Receiver<StackEvent>)>,
    connected: bool,
    connect_reported: bool,
    peer_closed: bool,
    error: Option<StackError>,
    write_blocked: bool,
    write_event: bool,
    ring: Option<RingBuffer>,
    timeouts: StreamTimeouts,
    net: NetHandle,
}

impl EmbeddedStream {
    /// Open on a given stack and network context
    pub fn open_on(stack: StackHandle, net: NetHandle, parameters: &str, flags: StreamFlags) -> Result<Self> {
        if flags.is_multicast() {
            return Err(Error::InvalidArgument("embedded stack has no UDP multicast".into()));
        }
        let endpoint = Endpoint::parse(parameters, socket_defaults().port)?;
        if let Some(host) = &endpoint.host {
            log::debug!("embedded stack routes by port only, host {} ignored", host);
        }

        let (tx, events) = unbounded();
        let (id, port, count) = if flags.is_listen() {
            let (id, port) = stack
                .call(|reply| Command::Listen { port: endpoint.port, events: tx, reply })?
                .map_err(StackError::into_error)?;
            (id, port, SocketCount::Listening)
        } else {
            let id = stack.call(|reply| Command::Connect { port: endpoint.port, events: tx, reply })?;
            (id, endpoint.port, SocketCount::Connected)
        };

        let stream = Self::assemble(stack, net, id, events, flags, port, count);
        Ok(stream)
    }

    fn assemble(
        stack: StackHandle,
        net: NetHandle,
        id: PcbId,
        events: Receiver<StackEvent>,
        flags: StreamFlags,
        port: u16,
        count: SocketCount,
    ) -> Self {
        net.socket_opened(count);
        let ring = if flags.nodelay() && !flags.is_listen() {
            Some(RingBuffer::new(socket_defaults().ring_buffer_size))
        } else {
            None
        };
        EmbeddedStream {
            stack,
            id: Some(id),
            events,
            flags,
            is_listener: flags.is_listen(),
            port,
            count,
            rx: VecDeque::new(),
            backlog: VecDeque::new(),
            connected: false,
            connect_reported: false,
            peer_closed: false,
            error: None,
            write_blocked: false,
            write_event: false,
            ring,
            timeouts: StreamTimeouts::default(),
            net,
        }
    }

    /// Bound port for a listener, target port for a connection
    pub fn port(&self) -> u16 {
        self.port
    }

    fn live_id(&self, op: &str) -> Result<PcbId> {
        match self.id {
            Some(id) => Ok(id),
            None => contract_violation(&format!("{} after close", op), Error::Closed),
        }
    }

    /// Apply every event the stack has posted so far
    fn pump(&mut self) {
        loop {
            match self.events.try_recv() {
                Ok(event) => self.apply(event),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if self.error.is_none() && !self.peer_closed {
                        self.error = Some(StackError::Reset);
                    }
                    break;
                }
            }
        }
    }

    fn apply(&mut self, event: StackEvent) {
        match event {
            StackEvent::Connected => self.connected = true,
            StackEvent::Error(err) => self.error = Some(err),
            StackEvent::Received(data) => self.rx.extend(data),
            StackEvent::PeerClosed => self.peer_closed = true,
            StackEvent::Sent(_) => {
                if self.write_blocked || self.ring.as_ref().map_or(false, |r| !r.is_empty()) {
                    self.write_event = true;
                }
            }
            StackEvent::Accepted { id, remote, events } => self.backlog.push_back((id, remote, events)),
        }
    }

    /// Highest priority pending reason to wake select, consuming one-shot ones
    fn take_ready(&mut self) -> Option<SelectEvent> {
        if self.error.is_some() {
            Some(SelectEvent::Close)
        } else if !self.rx.is_empty() {
            Some(SelectEvent::Read)
        } else if !self.backlog.is_empty() {
            Some(SelectEvent::Accept)
        } else if self.peer_closed {
            Some(SelectEvent::Close)
        } else if self.connected && !self.connect_reported && !self.is_listener {
            self.connect_reported = true;
            Some(SelectEvent::Connect)
        } else if self.write_event {
            self.write_event = false;
            self.write_blocked = false;
            Some(SelectEvent::Write)
        } else {
            None
        }
    }

    fn stack_write(&self, id: PcbId, data: &[u8]) -> Result<usize> {
        self.stack.call(|reply| Command::Write { id, data: data.to_vec(), reply })
    }

    fn release(&mut self, id: PcbId) {
        if self.stack.post(Command::Close { id }).is_err() {
            log::debug!("embedded stack gone before pcb {} closed", id);
        }
        // The stack drops our route once the close is handled, so the channel
        // disconnects only after every event posted before it has arrived
        loop {
            match self.events.recv_timeout(RELEASE_WAIT) {
                Ok(event) => self.apply(event),
                Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    log::warn!("embedded stack did not confirm close of pcb {}", id);
                    break;
                }
            }
        }
        self.ring = None;
        self.rx.clear();
        // Connections nobody accepted are closed with the listener
        for (pending, _, _) in self.backlog.drain(..) {
            let _ = self.stack.post(Command::Close { id: pending });
        }
        self.net.socket_closed(self.count);
    }
}

impl Drop for EmbeddedStream {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.release(id);
        }
    }
}

impl Stream for EmbeddedStream {
    fn open(parameters: &str, _option: Option<&str>, flags: StreamFlags) -> Result<Self> {
        Self::open_on(embedded_stack()?, net(), parameters, flags)
    }

    fn close(&mut self, _flags: StreamFlags) {
        match self.id.take() {
            Some(id) => self.release(id),
            None => {
                let _: Result<()> = contract_violation("embedded stream closed twice", Error::Closed);
            }
        }
    }

    fn accept(&mut self, flags: StreamFlags) -> Result<Option<Accepted<Self>>> {
        self.live_id("accept")?;
        if !self.is_listener {
            return Err(Error::InvalidArgument("accept on a stream that is not listening".into()));
        }
        self.pump();
        let Some((id, remote, events)) = self.backlog.pop_front() else {
            return Ok(None);
        };
        let flags = if flags.is_empty() { self.flags } else { flags };
        let flags = flags.difference(StreamFlags::LISTEN);
        let mut stream = Self::assemble(
            Arc::clone(&self.stack),
            self.net.clone(),
            id,
            events,
            flags,
            self.port,
            SocketCount::Connected,
        );
        stream.connected = true;
        stream.connect_reported = true;
        Ok(Some(Accepted { stream, remote: ip_to_string(&remote.ip()) }))
    }

    fn read(&mut self, buf: &mut [u8], _flags: StreamFlags) -> Result<usize> {
        let id = self.live_id("read")?;
        self.pump();
        if let Some(err) = self.error {
            return Err(err.into_error());
        }
        let n = buf.len().min(self.rx.len());
        for (slot, byte) in buf.iter_mut().zip(self.rx.drain(..n)) {
            *slot = byte;
        }
        if n > 0 {
            self.stack.post(Command::Recved { id, len: n })?;
            return Ok(n);
        }
        if self.peer_closed && !buf.is_empty() {
            return Err(Error::StreamClosed);
        }
        Ok(0)
    }

    fn write(&mut self, buf: &[u8], _flags: StreamFlags) -> Result<usize> {
        let id = self.live_id("write")?;
        self.pump();
        if let Some(err) = self.error {
            return Err(err.into_error());
        }
        if self.peer_closed {
            return Err(Error::StreamClosed);
        }
        if buf.is_empty() {
            return Ok(0);
        }
        if let Some(ring) = self.ring.as_mut() {
            return Ok(ring.write(buf));
        }
        let taken = self.stack_write(id, buf)?;
        self.write_blocked = taken < buf.len();
        Ok(taken)
    }

    fn flush(&mut self, _flags: StreamFlags) -> Result<()> {
        let id = self.live_id("flush")?;
        let Some(mut ring) = self.ring.take() else {
            return Ok(());
        };
        let result = ring.drain_with(|run| {
            self.stack_write(id, run)
                .map_err(|e| io::Error::new(io::ErrorKind::BrokenPipe, e.to_string()))
        });
        self.write_blocked = !ring.is_empty();
        self.ring = Some(ring);
        result.map(|_| ()).map_err(Error::from_io)
    }

    fn select(
        streams: &mut [&mut Self],
        event: Option<&WakeEvent>,
        timeout: Option<Duration>,
        _flags: StreamFlags,
    ) -> Result<Readiness> {
        if streams.len() > SELECT_MAX {
            return contract_violation(
                &format!("select on {} streams, at most {}", streams.len(), SELECT_MAX),
                Error::InvalidArgument("too many streams".into()),
            );
        }
        if streams.iter().any(|s| !s.flags.select_enabled() || s.id.is_none()) {
            return contract_violation("select on a closed or unselectable stream", Error::InvalidArgument("stream not selectable".into()));
        }
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            if let Some(ev) = event {
                if ev.take() {
                    return Ok(Readiness::CustomEvent);
                }
            }
            for (index, stream) in streams.iter_mut().enumerate() {
                stream.pump();
                if let Some(kind) = stream.take_ready() {
                    return Ok(Readiness::Stream { index, event: kind });
                }
            }

            let mut sel = Select::new();
            for stream in streams.iter() {
                sel.recv(&stream.events);
            }
            if let Some(ev) = event {
                sel.recv(ev.channel());
            }
            let woke = match deadline {
                None => Ok(sel.ready()),
                Some(deadline) => sel.ready_deadline(deadline),
            };
            if woke.is_err() {
                return Ok(Readiness::Timeout);
            }
        }
    }

    fn get_parameter(&self, parameter: StreamParameter) -> i64 {
        match parameter {
            StreamParameter::TxBuffered => self.ring.as_ref().map_or(0, |r| r.len() as i64),
            StreamParameter::RxAvailable => self.rx.len() as i64,
            _ => self.timeouts.get(parameter),
        }
    }

    fn set_parameter(&mut self, parameter: StreamParameter, value: i64) {
        if !self.timeouts.set(parameter, value) {
            log::debug!("stream parameter {:?} cannot be set", parameter);
        }
    }

    fn send_packet(&mut self, _buf: &[u8], _flags: StreamFlags) -> Result<Progress> {
        Err(Error::InvalidArgument("embedded stack has no UDP".into()))
    }

    fn receive_packet(&mut self, _buf: &mut [u8], _flags: StreamFlags) -> Result<Option<Packet>> {
        Err(Error::InvalidArgument("embedded stack has no UDP".into()))
    }

    fn open_flags(&self) -> StreamFlags {
        self.flags
    }

    fn is_ipv6(&self) -> bool {
        false
    }
}
