// Process-wide socket tunables. Set once by initialization, read on every open.
use osal_core::{DEFAULT_LISTEN_BACKLOG, DEFAULT_RING_BUFFER_SIZE, DEFAULT_SOCKET_PORT};
use std::sync::atomic::{AtomicI32, AtomicU16, AtomicUsize, Ordering};

/// Inbound bytes discarded at most while closing a connection
pub const DEFAULT_CLOSE_DRAIN_LIMIT: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketDefaults {
    pub port: u16,
    pub listen_backlog: i32,
    pub ring_buffer_size: usize,
    pub close_drain_limit: usize,
}

impl Default for SocketDefaults {
    fn default() -> Self {
        SocketDefaults {
            port: DEFAULT_SOCKET_PORT,
            listen_backlog: DEFAULT_LISTEN_BACKLOG,
            ring_buffer_size: DEFAULT_RING_BUFFER_SIZE,
            close_drain_limit: DEFAULT_CLOSE_DRAIN_LIMIT,
        }
    }
}

static PORT: AtomicU16 = AtomicU16::new(DEFAULT_SOCKET_PORT);
static BACKLOG: AtomicI32 = AtomicI32::new(DEFAULT_LISTEN_BACKLOG);
static RING_SIZE: AtomicUsize = AtomicUsize::new(DEFAULT_RING_BUFFER_SIZE);
static DRAIN_LIMIT: AtomicUsize = AtomicUsize::new(DEFAULT_CLOSE_DRAIN_LIMIT);

pub fn socket_defaults() -> SocketDefaults {
    SocketDefaults {
        port: PORT.load(Ordering::Relaxed),
        listen_backlog: BACKLOG.load(Ordering::Relaxed),
        ring_buffer_size: RING_SIZE.load(Ordering::Relaxed),
        close_drain_limit: DRAIN_LIMIT.load(Ordering::Relaxed),
    }
}

pub fn set_socket_defaults(defaults: SocketDefaults) {
    PORT.store(defaults.port, Ordering::Relaxed);
    BACKLOG.store(defaults.listen_backlog.max(1), Ordering::Relaxed);
    RING_SIZE.store(defaults.ring_buffer_size.max(2), Ordering::Relaxed);
    DRAIN_LIMIT.store(defaults.close_drain_limit, Ordering::Relaxed);
}
