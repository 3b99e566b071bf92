// select_latency.rs - How fast a wake event gets a blocked select back
use osal_ng::{
    EmbeddedStack, EmbeddedStream, NetContext, Readiness, Result, SocketStream, Stream, StreamFlags, WakeEvent,
};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub struct LatencyResult {
    pub test_name: String,
    pub samples: usize,
    pub avg: Duration,
    pub min: Duration,
    pub max: Duration,
}

/// Another thread sets the event while `select` blocks without timeout
fn measure<S: Stream>(name: &str, stream: &mut S, samples: usize) -> Result<LatencyResult> {
    println!("\n=== Wake latency: {} ({} samples) ===", name, samples);
    let event = Arc::new(WakeEvent::new()?);
    let mut latencies = Vec::with_capacity(samples);

    for _ in 0..samples {
        let setter = Arc::clone(&event);
        let waker = thread::spawn(move || {
            thread::sleep(Duration::from_micros(500));
            let at = Instant::now();
            setter.set();
            at
        });
        let readiness = S::select(&mut [&mut *stream], Some(&event), None, StreamFlags::empty())?;
        let woke = Instant::now();
        let set_at = waker.join().unwrap_or(woke);
        if readiness == Readiness::CustomEvent {
            latencies.push(woke.saturating_duration_since(set_at));
        }
    }

    let count = latencies.len().max(1) as u32;
    Ok(LatencyResult {
        test_name: name.to_string(),
        samples: latencies.len(),
        avg: latencies.iter().sum::<Duration>() / count,
        min: latencies.iter().copied().min().unwrap_or_default(),
        max: latencies.iter().copied().max().unwrap_or_default(),
    })
}

pub fn bench_socket_select(samples: usize) -> Result<LatencyResult> {
    let mut listener = SocketStream::open_in(NetContext::new_handle(), "127.0.0.1:0", None, StreamFlags::LISTEN)?;
    measure("poll() select", &mut listener, samples)
}

pub fn bench_embedded_select(samples: usize) -> Result<LatencyResult> {
    let stack = EmbeddedStack::new()?;
    let mut listener = EmbeddedStream::open_on(stack, NetContext::new_handle(), ":0", StreamFlags::LISTEN)?;
    measure("channel select", &mut listener, samples)
}

pub fn print_latency_results(results: &[LatencyResult]) {
    println!("\n{:<24} {:>8} {:>12} {:>12} {:>12}", "Test", "Samples", "Avg (us)", "Min (us)", "Max (us)");
    println!("{}", "-".repeat(72));
    for r in results {
        println!(
            "{:<24} {:>8} {:>12.1} {:>12.1} {:>12.1}",
            r.test_name,
            r.samples,
            r.avg.as_secs_f64() * 1e6,
            r.min.as_secs_f64() * 1e6,
            r.max.as_secs_f64() * 1e6
        );
    }
}
