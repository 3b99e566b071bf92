// client: helpers for ping and multicast tools built on the stream layer
use osal_ng::{Error, Packet, Progress, Readiness, Result, SelectEvent, Stream, StreamFlags};
use std::thread;
use std::time::{Duration, Instant};

/// Send `payload` and wait until the same number of bytes comes back.
/// Returns the round trip time.
pub fn ping<S: Stream>(stream: &mut S, payload: &[u8], timeout: Duration) -> Result<Duration> {
    let started = Instant::now();
    let deadline = started + timeout;
    let mut unsent = payload;
    let mut received = Vec::with_capacity(payload.len());
    let mut buf = [0u8; 1024];

    while received.len() < payload.len() {
        if !unsent.is_empty() {
            let n = stream.write(unsent, StreamFlags::empty())?;
            unsent = &unsent[n..];
        }
        stream.flush(StreamFlags::empty())?;

        let n = stream.read(&mut buf, StreamFlags::empty())?;
        if n > 0 {
            received.extend_from_slice(&buf[..n]);
            continue;
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(Error::Transport(std::io::Error::from(std::io::ErrorKind::TimedOut)));
        }
        let woke = S::select(&mut [&mut *stream], None, Some(deadline - now), StreamFlags::empty())?;
        if let Readiness::Stream { event: SelectEvent::Close, .. } = woke {
            // Surface the real status through read
            stream.read(&mut buf, StreamFlags::empty())?;
            return Err(Error::StreamClosed);
        }
    }

    if received != payload {
        log::warn!("echo differs from what was sent ({} bytes)", received.len());
    }
    Ok(started.elapsed())
}

/// Send `count` datagrams, `interval` apart. Returns how many went out.
pub fn send_datagrams<S: Stream>(stream: &mut S, payload: &[u8], count: usize, interval: Duration) -> Result<usize> {
    let mut sent = 0;
    for i in 0..count {
        match stream.send_packet(payload, StreamFlags::empty())? {
            Progress::Done => sent += 1,
            Progress::Pending => log::debug!("datagram {} not sent, socket busy", i),
        }
        if i + 1 < count && !interval.is_zero() {
            thread::sleep(interval);
        }
    }
    Ok(sent)
}

/// Receive up to `count` datagrams, giving up after `timeout` without traffic
pub fn receive_datagrams<S: Stream>(stream: &mut S, count: usize, timeout: Duration) -> Result<Vec<(Packet, Vec<u8>)>> {
    let mut out = Vec::new();
    let mut buf = vec![0u8; 65536];
    while out.len() < count {
        match stream.receive_packet(&mut buf, StreamFlags::empty())? {
            Some(packet) => {
                let data = buf[..packet.len].to_vec();
                out.push((packet, data));
            }
            None => {
                if S::select(&mut [&mut *stream], None, Some(timeout), StreamFlags::empty())? == Readiness::Timeout {
                    break;
                }
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use osal_ng::{EmbeddedStack, EmbeddedStream, NetContext};

    #[test]
    fn ping_times_out_without_echo() {
        let stack = EmbeddedStack::new().unwrap();
        let net = NetContext::new_handle();
        let mut l = EmbeddedStream::open_on(stack.clone(), net.clone(), ":0", StreamFlags::LISTEN).unwrap();
        let mut client = EmbeddedStream::open_on(stack, net, &format!(":{}", l.port()), StreamFlags::empty()).unwrap();
        // Accepted but never echoed
        let _server = loop {
            if let Some(a) = l.accept(StreamFlags::empty()).unwrap() {
                break a.stream;
            }
            thread::sleep(Duration::from_millis(1));
        };
        let r = ping(&mut client, b"PING", Duration::from_millis(50));
        assert!(matches!(r, Err(Error::Transport(_))));
    }

    #[test]
    fn ping_reports_refused_connection() {
        let stack = EmbeddedStack::new().unwrap();
        let mut client =
            EmbeddedStream::open_on(stack, NetContext::new_handle(), ":7777", StreamFlags::empty()).unwrap();
        let r = ping(&mut client, b"PING", Duration::from_secs(5));
        assert!(matches!(r, Err(Error::ConnectionRefused)));
    }
}
