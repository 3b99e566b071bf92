// Stream open/close flags
use bitflags::bitflags;

bitflags! {
    /// Flags given to open, accept and close.
    ///
    /// CONNECT and SELECT are the zero defaults of the mutually exclusive pairs
    /// CONNECT/LISTEN and SELECT/NO_SELECT.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct StreamFlags: u32 {
        const CONNECT = 0;
        const SELECT = 0;
        const LISTEN = 0x0100;
        const UDP_MULTICAST = 0x0400;
        const NO_SELECT = 0x0800;
        const TCP_NODELAY = 0x1000;
        const NO_REUSEADDR = 0x2000;
    }
}

impl StreamFlags {
    pub fn is_listen(&self) -> bool {
        self.contains(StreamFlags::LISTEN)
    }

    pub fn is_multicast(&self) -> bool {
        self.contains(StreamFlags::UDP_MULTICAST)
    }

    pub fn select_enabled(&self) -> bool {
        !self.contains(StreamFlags::NO_SELECT)
    }

    pub fn nodelay(&self) -> bool {
        self.contains(StreamFlags::TCP_NODELAY)
    }

    pub fn reuse_addr(&self) -> bool {
        !self.contains(StreamFlags::NO_REUSEADDR)
    }
}
