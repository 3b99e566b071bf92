// coalescing.rs - Ring buffer write coalescing vs direct small sends
use osal_buffer::RingBuffer;
use osal_ng::{NetContext, Result, SocketStream, Stream, StreamFlags, DEFAULT_RING_BUFFER_SIZE};
use std::time::{Duration, Instant};

pub struct CoalescingResult {
    pub test_name: String,
    pub writes: usize,
    pub bytes: usize,
    pub duration: Duration,
    pub throughput_mb: f64,
}

/// In-memory ring: fill with small writes, drain in runs
pub fn bench_ring_only(writes: usize, write_size: usize) -> CoalescingResult {
    println!("\n=== Ring buffer only ({} x {} bytes) ===", writes, write_size);
    let mut ring = RingBuffer::new(DEFAULT_RING_BUFFER_SIZE);
    let payload = vec![0xa5u8; write_size];
    let mut sink = 0usize;

    let start = Instant::now();
    for _ in 0..writes {
        let mut rest = &payload[..];
        while !rest.is_empty() {
            let n = ring.write(rest);
            rest = &rest[n..];
            if n == 0 || ring.is_full() {
                sink += ring
                    .drain_with(|run| Ok(run.len()))
                    .unwrap_or_default();
            }
        }
    }
    sink += ring.drain_with(|run| Ok(run.len())).unwrap_or_default();
    let duration = start.elapsed();

    result("Ring only", writes, sink, duration)
}

/// Loopback TCP: many small writes with and without the coalescing ring
pub fn bench_loopback(writes: usize, write_size: usize, nodelay: bool) -> Result<CoalescingResult> {
    let name = if nodelay { "Loopback TCP_NODELAY + ring" } else { "Loopback plain send" };
    println!("\n=== {} ({} x {} bytes) ===", name, writes, write_size);

    let net = NetContext::new_handle();
    let mut listener = SocketStream::open_in(net.clone(), "127.0.0.1:0", None, StreamFlags::LISTEN)?;
    let port = listener.local_addr()?.port();
    let flags = if nodelay { StreamFlags::TCP_NODELAY } else { StreamFlags::empty() };
    let mut client = SocketStream::open_in(net, &format!("127.0.0.1:{}", port), None, flags)?;
    let mut server = loop {
        if let Some(a) = listener.accept(StreamFlags::empty())? {
            break a.stream;
        }
        SocketStream::select(&mut [&mut listener], None, Some(Duration::from_secs(5)), StreamFlags::empty())?;
    };

    let payload = vec![0x3cu8; write_size];
    let total = writes * write_size;
    let mut received = 0;
    let mut buf = vec![0u8; 64 * 1024];

    let start = Instant::now();
    for _ in 0..writes {
        let mut rest = &payload[..];
        while !rest.is_empty() {
            let n = client.write(rest, StreamFlags::empty())?;
            rest = &rest[n..];
            if n == 0 {
                client.flush(StreamFlags::empty())?;
                received += server.read(&mut buf, StreamFlags::empty())?;
            }
        }
    }
    while received < total {
        client.flush(StreamFlags::empty())?;
        let n = server.read(&mut buf, StreamFlags::empty())?;
        if n == 0 {
            SocketStream::select(&mut [&mut server], None, Some(Duration::from_millis(10)), StreamFlags::empty())?;
        }
        received += n;
    }
    let duration = start.elapsed();

    Ok(result(name, writes, received, duration))
}

fn result(name: &str, writes: usize, bytes: usize, duration: Duration) -> CoalescingResult {
    CoalescingResult {
        test_name: name.to_string(),
        writes,
        bytes,
        duration,
        throughput_mb: bytes as f64 / duration.as_secs_f64() / (1024.0 * 1024.0),
    }
}

pub fn print_coalescing_results(results: &[CoalescingResult]) {
    println!("\n{:<32} {:>10} {:>12} {:>12} {:>10}", "Test", "Writes", "Bytes", "Time (ms)", "MB/s");
    println!("{}", "-".repeat(80));
    for r in results {
        println!(
            "{:<32} {:>10} {:>12} {:>12.2} {:>10.1}",
            r.test_name,
            r.writes,
            r.bytes,
            r.duration.as_secs_f64() * 1000.0,
            r.throughput_mb
        );
    }
}
