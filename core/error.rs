//! Error types for stream operations

use crate::types::Status;
use std::io;
use thiserror::Error;

/// Result alias used by every stream operation
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("stream closed by peer")]
    StreamClosed,

    #[error("connection refused")]
    ConnectionRefused,

    #[error("transport failure: {0}")]
    Transport(#[source] io::Error),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(&'static str),

    #[error("cannot parse address: {0}")]
    AddressParse(String),

    #[error("stream used after close")]
    Closed,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("notification handler limit of {0} reached")]
    HandlerLimit(usize),
}

impl Error {
    /// Classify an OS error. Refused and peer-closed conditions get their own variants.
    pub fn from_io(e: io::Error) -> Self {
        match e.raw_os_error() {
            Some(libc::ECONNREFUSED) => return Error::ConnectionRefused,
            Some(libc::EPIPE) | Some(libc::ECONNRESET) | Some(libc::ENOTCONN) => {
                return Error::StreamClosed
            }
            Some(libc::ENOMEM) | Some(libc::ENOBUFS) | Some(libc::EMFILE) | Some(libc::ENFILE) => {
                return Error::ResourceExhausted("operating system resources")
            }
            _ => {}
        }
        match e.kind() {
            io::ErrorKind::ConnectionRefused => Error::ConnectionRefused,
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected => Error::StreamClosed,
            _ => Error::Transport(e),
        }
    }

    /// Boundary status code for this error
    pub fn status(&self) -> Status {
        match self {
            Error::StreamClosed => Status::StreamClosed,
            Error::ConnectionRefused => Status::ConnectionRefused,
            Error::ResourceExhausted(_) => Status::ResourceExhausted,
            Error::AddressParse(_) => Status::AddressParseError,
            Error::Transport(_)
            | Error::Closed
            | Error::InvalidArgument(_)
            | Error::HandlerLimit(_) => Status::TransportFailed,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::from_io(e)
    }
}

/// True for OS errors that mean "no progress now, try again later".
pub fn is_would_block(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted)
        || matches!(e.raw_os_error(), Some(libc::EINPROGRESS) | Some(libc::EALREADY))
}
