// Core types shared by every stream implementation
use std::fmt;

/// Port used when the parameter string does not name one.
pub const DEFAULT_SOCKET_PORT: u16 = 6368;

/// Maximum number of streams a single select call can wait on.
pub const SELECT_MAX: usize = 8;

/// Listen backlog for TCP listening sockets.
pub const DEFAULT_LISTEN_BACKLOG: i32 = 32;

/// Ring buffer size for TCP_NODELAY sockets, one network segment.
pub const DEFAULT_RING_BUFFER_SIZE: usize = 1420;

/// Status codes visible across the stream boundary. Upper layers branch only on these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Success,
    Pending,
    NoNewConnection,
    StreamClosed,
    ConnectionRefused,
    TransportFailed,
    ResourceExhausted,
    AddressParseError,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Success => "SUCCESS",
            Status::Pending => "PENDING",
            Status::NoNewConnection => "NO_NEW_CONNECTION",
            Status::StreamClosed => "STREAM_CLOSED",
            Status::ConnectionRefused => "CONNECTION_REFUSED",
            Status::TransportFailed => "TRANSPORT_FAILED",
            Status::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Status::AddressParseError => "ADDRESS_PARSE_ERROR",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a datagram send: handed to the OS, or the OS had no room right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Done,
    Pending,
}

impl Progress {
    pub fn status(&self) -> Status {
        match self {
            Progress::Done => Status::Success,
            Progress::Pending => Status::Pending,
        }
    }
}

/// Per-stream tunables reachable through get_parameter / set_parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamParameter {
    ReadTimeoutMs,
    WriteTimeoutMs,
    /// Bytes waiting in the write ring buffer (read only)
    TxBuffered,
    /// Bytes received but not yet read (read only)
    RxAvailable,
}

/// Storage for the parameters every stream supports, used by the default get/set behavior.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamTimeouts {
    pub read_timeout_ms: i64,
    pub write_timeout_ms: i64,
}

impl StreamTimeouts {
    /// Returns -1 for parameters this storage does not hold.
    pub fn get(&self, parameter: StreamParameter) -> i64 {
        match parameter {
            StreamParameter::ReadTimeoutMs => self.read_timeout_ms,
            StreamParameter::WriteTimeoutMs => self.write_timeout_ms,
            _ => -1,
        }
    }

    /// Returns false if the parameter is read only or unknown.
    pub fn set(&mut self, parameter: StreamParameter, value: i64) -> bool {
        match parameter {
            StreamParameter::ReadTimeoutMs => self.read_timeout_ms = value,
            StreamParameter::WriteTimeoutMs => self.write_timeout_ms = value,
            _ => return false,
        }
        true
    }
}

/// Which counter in the network state a socket is accounted in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketCount {
    Connected = 0,
    Listening = 1,
    Udp = 2,
}

impl SocketCount {
    pub const ALL: [SocketCount; 3] = [SocketCount::Connected, SocketCount::Listening, SocketCount::Udp];

    pub fn index(self) -> usize {
        self as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_default_to_zero_and_reject_read_only() {
        let mut t = StreamTimeouts::default();
        assert_eq!(t.get(StreamParameter::ReadTimeoutMs), 0);
        assert!(t.set(StreamParameter::WriteTimeoutMs, 250));
        assert_eq!(t.get(StreamParameter::WriteTimeoutMs), 250);
        assert!(!t.set(StreamParameter::TxBuffered, 5));
        assert_eq!(t.get(StreamParameter::TxBuffered), -1);
    }

    #[test]
    fn status_names() {
        assert_eq!(Status::NoNewConnection.to_string(), "NO_NEW_CONNECTION");
        assert_eq!(Progress::Pending.status(), Status::Pending);
    }
}
