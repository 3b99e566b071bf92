// Echo server: one thread, one select over the listener and up to 7 clients
use osal_ng::{Error, Readiness, Result, SelectEvent, Stream, StreamFlags, WakeEvent, SELECT_MAX};
use std::sync::Arc;

const READ_CHUNK: usize = 1024;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EchoStats {
    pub accepted: u64,
    pub rejected: u64,
    pub bytes_echoed: u64,
}

struct Client<S> {
    stream: S,
    remote: String,
    pending: Vec<u8>,
}

pub struct EchoServer<S: Stream> {
    listener: S,
    clients: Vec<Client<S>>,
    stop: Arc<WakeEvent>,
    stats: EchoStats,
}

impl<S: Stream> EchoServer<S> {
    pub fn new(listener: S) -> Result<Self> {
        Ok(EchoServer { listener, clients: Vec::new(), stop: Arc::new(WakeEvent::new()?), stats: EchoStats::default() })
    }

    /// Set the returned event from any thread to make `run` return
    pub fn stop_handle(&self) -> Arc<WakeEvent> {
        Arc::clone(&self.stop)
    }

    pub fn stats(&self) -> EchoStats {
        self.stats
    }

    /// Serve until the stop event is set
    pub fn run(&mut self) -> Result<EchoStats> {
        loop {
            let readiness = {
                let mut streams: Vec<&mut S> = std::iter::once(&mut self.listener)
                    .chain(self.clients.iter_mut().map(|c| &mut c.stream))
                    .collect();
                S::select(&mut streams, Some(&self.stop), None, StreamFlags::empty())?
            };
            match readiness {
                Readiness::CustomEvent => break,
                Readiness::Timeout => continue,
                Readiness::Stream { index: 0, event: SelectEvent::Close } => {
                    log::error!("listening stream failed");
                    return Err(Error::StreamClosed);
                }
                Readiness::Stream { index: 0, .. } => self.accept_pending()?,
                Readiness::Stream { index, event } => self.service(index - 1, event),
            }
        }

        for mut client in self.clients.drain(..) {
            client.stream.close(StreamFlags::empty());
        }
        log::info!("echo server stopped: {:?}", self.stats);
        Ok(self.stats)
    }

    fn accept_pending(&mut self) -> Result<()> {
        while let Some(accepted) = self.listener.accept(StreamFlags::empty())? {
            if self.clients.len() + 1 >= SELECT_MAX {
                log::warn!("rejecting {}: {} clients connected", accepted.remote, self.clients.len());
                let mut stream = accepted.stream;
                stream.close(StreamFlags::empty());
                self.stats.rejected += 1;
                continue;
            }
            log::info!("client {} connected", accepted.remote);
            self.stats.accepted += 1;
            self.clients.push(Client { stream: accepted.stream, remote: accepted.remote, pending: Vec::new() });
        }
        Ok(())
    }

    fn service(&mut self, index: usize, event: SelectEvent) {
        let Some(client) = self.clients.get_mut(index) else {
            return;
        };
        let result = match event {
            SelectEvent::Read | SelectEvent::Close => echo(client, &mut self.stats),
            SelectEvent::Write | SelectEvent::Connect => push_pending(client, &mut self.stats),
            SelectEvent::Accept => Ok(()),
        };
        if let Err(e) = result {
            match e {
                Error::StreamClosed => log::info!("client {} disconnected", client.remote),
                e => log::warn!("client {} failed: {}", client.remote, e),
            }
            let mut client = self.clients.remove(index);
            client.stream.close(StreamFlags::empty());
        }
    }
}

fn echo<S: Stream>(client: &mut Client<S>, stats: &mut EchoStats) -> Result<()> {
    let mut buf = [0u8; READ_CHUNK];
    loop {
        let n = client.stream.read(&mut buf, StreamFlags::empty())?;
        if n == 0 {
            break;
        }
        client.pending.extend_from_slice(&buf[..n]);
    }
    push_pending(client, stats)
}

fn push_pending<S: Stream>(client: &mut Client<S>, stats: &mut EchoStats) -> Result<()> {
    if !client.pending.is_empty() {
        let n = client.stream.write(&client.pending, StreamFlags::empty())?;
        client.pending.drain(..n);
        stats.bytes_echoed += n as u64;
    }
    client.stream.flush(StreamFlags::empty())
}
