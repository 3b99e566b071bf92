// Core module: stream status codes, flags, address grammar and network configuration types (NO I/O dependencies)
pub mod types;
pub mod error;
pub mod flags;
pub mod addr;
pub mod netcfg;

pub use types::*;
pub use error::*;
pub use flags::*;
pub use addr::*;
pub use netcfg::*;
