// Stream abstraction - one non-blocking contract over every backend
use crate::event::WakeEvent;
use osal_core::{Progress, Result, StreamFlags, StreamParameter};
use std::time::Duration;

/// Why a stream woke a select call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectEvent {
    /// Listening stream has a pending connection
    Accept,
    Read,
    /// Send side has room again after a blocked or buffered write
    Write,
    /// Outgoing connection completed (reported once)
    Connect,
    /// Peer closed or the socket failed; read to get the status
    Close,
}

/// Result of a select call. Exactly one reason is reported per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Stream { index: usize, event: SelectEvent },
    CustomEvent,
    Timeout,
}

/// Connection returned by accept, with the remote address ("[ipv6]" in brackets)
#[derive(Debug)]
pub struct Accepted<S> {
    pub stream: S,
    pub remote: String,
}

/// One datagram read by receive_packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub len: usize,
    pub remote: String,
}

/// Convert a millisecond timeout where 0 means "wait forever".
pub fn timeout_from_ms(timeout_ms: u32) -> Option<Duration> {
    if timeout_ms == 0 {
        None
    } else {
        Some(Duration::from_millis(timeout_ms as u64))
    }
}

/// Generic stream. read/write/accept/receive_packet never block; select is the only wait.
///
/// A stream has a single owner and no internal lock. After `close` every operation
/// fails with `Error::Closed`.
pub trait Stream: Send {
    fn open(parameters: &str, option: Option<&str>, flags: StreamFlags) -> Result<Self>
    where
        Self: Sized;

    fn close(&mut self, flags: StreamFlags);

    /// Ok(None) when no connection is pending
    fn accept(&mut self, flags: StreamFlags) -> Result<Option<Accepted<Self>>>
    where
        Self: Sized;

    /// Ok(0) means no data right now, not end of stream
    fn read(&mut self, buf: &mut [u8], flags: StreamFlags) -> Result<usize>;

    /// Returns how many bytes were taken; the caller retries the rest
    fn write(&mut self, buf: &[u8], flags: StreamFlags) -> Result<usize>;

    /// Call after every write burst and once per select wake
    fn flush(&mut self, flags: StreamFlags) -> Result<()>;

    /// Block until one stream is ready, `event` is set, or `timeout` elapses (None waits forever)
    fn select(
        streams: &mut [&mut Self],
        event: Option<&WakeEvent>,
        timeout: Option<Duration>,
        flags: StreamFlags,
    ) -> Result<Readiness>
    where
        Self: Sized;

    /// -1 for parameters the stream does not support
    fn get_parameter(&self, parameter: StreamParameter) -> i64;

    fn set_parameter(&mut self, parameter: StreamParameter, value: i64);

    fn send_packet(&mut self, buf: &[u8], flags: StreamFlags) -> Result<Progress>;

    /// Ok(None) when no datagram is queued
    fn receive_packet(&mut self, buf: &mut [u8], flags: StreamFlags) -> Result<Option<Packet>>;

    fn open_flags(&self) -> StreamFlags;

    fn is_ipv6(&self) -> bool;
}

/// Log and assert on misuse by the caller. Release builds return `err` to the caller.
pub(crate) fn contract_violation<T>(what: &str, err: osal_core::Error) -> Result<T> {
    log::error!("stream contract violation: {}", what);
    debug_assert!(false, "stream contract violation: {}", what);
    Err(err)
}
