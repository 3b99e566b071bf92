// net: process-wide network interface registry and network state with change notification
pub mod state;
pub mod context;

pub use state::*;
pub use context::*;
