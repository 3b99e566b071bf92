// throughput.rs - One way bulk transfer through each backend
use osal_ng::{
    EmbeddedStack, EmbeddedStream, NetContext, Readiness, Result, SelectEvent, SocketStream, Stream, StreamFlags,
};
use std::time::{Duration, Instant};

const CHUNK: usize = 16 * 1024;

pub struct ThroughputResult {
    pub test_name: String,
    pub bytes: usize,
    pub duration: Duration,
    pub throughput_mb: f64,
}

/// Push `total` bytes from `client` to `server`, servicing whichever side select reports
fn transfer<S: Stream>(client: &mut S, server: &mut S, total: usize) -> Result<Duration> {
    let chunk = vec![0x77u8; CHUNK];
    let mut buf = vec![0u8; CHUNK];
    let mut sent = 0;
    let mut received = 0;

    let start = Instant::now();
    while received < total {
        if sent < total {
            let want = (total - sent).min(CHUNK);
            sent += client.write(&chunk[..want], StreamFlags::empty())?;
            client.flush(StreamFlags::empty())?;
        }
        let n = server.read(&mut buf, StreamFlags::empty())?;
        received += n;
        if n == 0 {
            let woke = S::select(&mut [&mut *client, &mut *server], None, Some(Duration::from_millis(100)), StreamFlags::empty())?;
            if let Readiness::Stream { event: SelectEvent::Close, index } = woke {
                log::warn!("stream {} closed during transfer", index);
                break;
            }
        }
    }
    Ok(start.elapsed())
}

fn connect_pair<S: Stream>(listener: &mut S, client: S) -> Result<(S, S)> {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(a) = listener.accept(StreamFlags::empty())? {
            return Ok((client, a.stream));
        }
        if Instant::now() >= deadline {
            return Err(osal_ng::Error::ConnectionRefused);
        }
        S::select(&mut [&mut *listener], None, Some(Duration::from_millis(100)), StreamFlags::empty())?;
    }
}

pub fn bench_socket(total: usize, nodelay: bool) -> Result<ThroughputResult> {
    let name = if nodelay { "Socket TCP_NODELAY" } else { "Socket" };
    println!("\n=== Throughput: {} ({} MB) ===", name, total / (1024 * 1024));
    let net = NetContext::new_handle();
    let mut listener = SocketStream::open_in(net.clone(), "127.0.0.1:0", None, StreamFlags::LISTEN)?;
    let port = listener.local_addr()?.port();
    let flags = if nodelay { StreamFlags::TCP_NODELAY } else { StreamFlags::empty() };
    let client = SocketStream::open_in(net, &format!("127.0.0.1:{}", port), None, flags)?;
    let (mut client, mut server) = connect_pair(&mut listener, client)?;
    let duration = transfer(&mut client, &mut server, total)?;
    Ok(result(name, total, duration))
}

pub fn bench_embedded(total: usize) -> Result<ThroughputResult> {
    println!("\n=== Throughput: embedded stack ({} MB) ===", total / (1024 * 1024));
    let stack = EmbeddedStack::new()?;
    let net = NetContext::new_handle();
    let mut listener = EmbeddedStream::open_on(stack.clone(), net.clone(), ":0", StreamFlags::LISTEN)?;
    let client = EmbeddedStream::open_on(stack, net, &format!(":{}", listener.port()), StreamFlags::empty())?;
    let (mut client, mut server) = connect_pair(&mut listener, client)?;
    let duration = transfer(&mut client, &mut server, total)?;
    Ok(result("Embedded stack", total, duration))
}

fn result(name: &str, bytes: usize, duration: Duration) -> ThroughputResult {
    ThroughputResult {
        test_name: name.to_string(),
        bytes,
        duration,
        throughput_mb: bytes as f64 / duration.as_secs_f64() / (1024.0 * 1024.0),
    }
}

pub fn print_throughput_results(results: &[ThroughputResult]) {
    println!("\n{:<24} {:>12} {:>12} {:>10}", "Test", "Bytes", "Time (ms)", "MB/s");
    println!("{}", "-".repeat(62));
    for r in results {
        println!(
            "{:<24} {:>12} {:>12.2} {:>10.1}",
            r.test_name,
            r.bytes,
            r.duration.as_secs_f64() * 1000.0,
            r.throughput_mb
        );
    }
}
