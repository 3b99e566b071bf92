// Cross-thread wake event for interrupting a blocked select.
// A self-pipe wakes poll() based select, a channel wakes the channel based one.
use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::unistd;
use osal_core::{Error, Result};
use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};

pub struct WakeEvent {
    pipe_rd: OwnedFd,
    pipe_wr: OwnedFd,
    tx: Sender<()>,
    rx: Receiver<()>,
}

impl WakeEvent {
    pub fn new() -> Result<Self> {
        let (pipe_rd, pipe_wr) = unistd::pipe2(OFlag::O_NONBLOCK | OFlag::O_CLOEXEC)
            .map_err(|e| Error::from_io(io::Error::from(e)))?;
        let (tx, rx) = bounded(1);
        Ok(WakeEvent { pipe_rd, pipe_wr, tx, rx })
    }

    /// Signal the event. Safe to call from any thread; repeated sets before a wait coalesce.
    pub fn set(&self) {
        match unistd::write(&self.pipe_wr, &[1u8]) {
            Ok(_) | Err(Errno::EAGAIN) => {}
            Err(e) => log::warn!("wake event pipe write failed: {}", e),
        }
        if let Err(TrySendError::Disconnected(_)) = self.tx.try_send(()) {
            log::warn!("wake event channel disconnected");
        }
    }

    /// Consume a pending signal. Returns true if the event was set.
    pub fn take(&self) -> bool {
        let mut was_set = false;
        while self.rx.try_recv().is_ok() {
            was_set = true;
        }
        let mut buf = [0u8; 16];
        loop {
            match unistd::read(self.pipe_rd.as_raw_fd(), &mut buf) {
                Ok(0) => break,
                Ok(_) => was_set = true,
                Err(Errno::EINTR) => continue,
                Err(_) => break,
            }
        }
        was_set
    }

    pub(crate) fn pipe_fd(&self) -> BorrowedFd<'_> {
        self.pipe_rd.as_fd()
    }

    pub(crate) fn channel(&self) -> &Receiver<()> {
        &self.rx
    }
}
