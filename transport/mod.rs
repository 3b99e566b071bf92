// Transport layer - stream backends, select and multicast plumbing
pub mod traits;
pub mod event;
pub mod config;
pub mod interfaces;
pub mod multicast;
pub mod socket;
pub mod select;
pub mod netstack;
pub mod embedded;

pub use traits::*;
pub use event::*;
pub use config::*;
pub use interfaces::*;
pub use multicast::*;
pub use socket::SocketStream;
pub use netstack::{LoopbackStack, PcbId, StackCallbacks, StackError};
pub use embedded::{embedded_stack, EmbeddedStack, EmbeddedStream, StackHandle};
