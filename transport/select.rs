// poll(2) based select for socket streams
use crate::event::WakeEvent;
use crate::socket::{os_error, SocketStream};
use crate::traits::{contract_violation, Readiness, SelectEvent, Stream};
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use osal_core::{Error, Result, SELECT_MAX};
use std::time::Duration;

/// Milliseconds for poll(2): -1 waits forever, partial milliseconds round up
fn timeout_ms(timeout: Option<Duration>) -> i32 {
    match timeout {
        None => -1,
        Some(d) => {
            let mut ms = d.as_millis();
            if d.subsec_nanos() % 1_000_000 != 0 {
                ms += 1;
            }
            ms.min(i32::MAX as u128) as i32
        }
    }
}

pub(crate) fn select_sockets(
    streams: &mut [&mut SocketStream],
    event: Option<&WakeEvent>,
    timeout: Option<Duration>,
) -> Result<Readiness> {
    if streams.len() > SELECT_MAX {
        return contract_violation(
            &format!("select on {} streams, at most {}", streams.len(), SELECT_MAX),
            Error::InvalidArgument("too many streams".into()),
        );
    }
    if let Some(i) = streams.iter().position(|s| !s.open_flags().select_enabled()) {
        return contract_violation(
            &format!("stream {} was opened without select support", i),
            Error::InvalidArgument("stream not selectable".into()),
        );
    }
    let poll_timeout = PollTimeout::try_from(timeout_ms(timeout)).unwrap_or(PollTimeout::MAX);

    let revents: Vec<PollFlags> = loop {
        let mut fds = Vec::with_capacity(streams.len() + 1);
        for s in streams.iter() {
            let Some(fd) = s.poll_fd() else {
                return contract_violation("select on a closed stream", Error::Closed);
            };
            let mut events = PollFlags::POLLIN | PollFlags::POLLPRI;
            if s.watch_write() {
                events |= PollFlags::POLLOUT;
            }
            fds.push(PollFd::new(fd, events));
        }
        if let Some(ev) = event {
            fds.push(PollFd::new(ev.pipe_fd(), PollFlags::POLLIN));
        }

        match poll(&mut fds, poll_timeout) {
            Ok(0) => return Ok(Readiness::Timeout),
            Ok(_) => break fds.iter().map(|fd| fd.revents().unwrap_or(PollFlags::empty())).collect(),
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(os_error(e)),
        }
    };

    if let Some(ev) = event {
        if !revents[streams.len()].is_empty() && ev.take() {
            return Ok(Readiness::CustomEvent);
        }
    }

    for (index, flags) in revents.iter().take(streams.len()).enumerate() {
        let stream = &mut *streams[index];
        let kind = if flags.contains(PollFlags::POLLERR) || flags.contains(PollFlags::POLLNVAL) {
            SelectEvent::Close
        } else if flags.intersects(PollFlags::POLLIN | PollFlags::POLLPRI) {
            if stream.is_listener() {
                SelectEvent::Accept
            } else {
                SelectEvent::Read
            }
        } else if flags.contains(PollFlags::POLLHUP) {
            SelectEvent::Close
        } else if flags.contains(PollFlags::POLLOUT) {
            if stream.is_connected() {
                stream.mark_writable();
                SelectEvent::Write
            } else {
                stream.mark_connected();
                SelectEvent::Connect
            }
        } else {
            continue;
        };
        log::trace!("select: stream {} {:?}", index, kind);
        return Ok(Readiness::Stream { index, event: kind });
    }

    // Only the wake pipe fired but another thread consumed it first
    Ok(Readiness::Timeout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_rounds_up_to_whole_milliseconds() {
        assert_eq!(timeout_ms(None), -1);
        assert_eq!(timeout_ms(Some(Duration::ZERO)), 0);
        assert_eq!(timeout_ms(Some(Duration::from_micros(1))), 1);
        assert_eq!(timeout_ms(Some(Duration::from_millis(250))), 250);
        assert_eq!(timeout_ms(Some(Duration::from_secs(u64::MAX / 1000))), i32::MAX);
    }
}
