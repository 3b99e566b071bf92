// cpu_monitor.rs - CPU usage of this process while a benchmark runs
use sysinfo::{CpuRefreshKind, ProcessRefreshKind, RefreshKind, System};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread;
use std::time::Duration;

pub struct CpuStats {
    pub avg_cpu_percent: f32,
    pub peak_cpu_percent: f32,
    pub samples: usize,
}

fn sample_until(stop: Arc<AtomicBool>) -> CpuStats {
    let mut sys = System::new_with_specifics(
        RefreshKind::new()
            .with_cpu(CpuRefreshKind::everything())
            .with_processes(ProcessRefreshKind::everything()),
    );
    let pid = sysinfo::get_current_pid().ok();
    let mut samples = vec![];

    sys.refresh_cpu();
    thread::sleep(Duration::from_millis(50));

    while !stop.load(Ordering::Relaxed) {
        sys.refresh_cpu();
        sys.refresh_processes();
        if let Some(process) = pid.and_then(|pid| sys.process(pid)) {
            samples.push(process.cpu_usage());
        }
        thread::sleep(Duration::from_millis(50));
    }

    let avg = if samples.is_empty() { 0.0 } else { samples.iter().sum::<f32>() / samples.len() as f32 };
    CpuStats {
        avg_cpu_percent: avg,
        peak_cpu_percent: samples.iter().copied().fold(0.0f32, f32::max),
        samples: samples.len(),
    }
}

/// Run `benchmark_fn` on the calling thread while a monitor thread samples CPU usage
pub fn run_with_cpu_monitor<F, R>(name: &str, benchmark_fn: F) -> (R, Option<CpuStats>)
where
    F: FnOnce() -> R,
{
    println!("\n=== Running {} with CPU monitoring ===", name);
    let stop = Arc::new(AtomicBool::new(false));
    let stop_monitor = Arc::clone(&stop);
    let monitor = thread::Builder::new()
        .name("cpu-monitor".to_string())
        .spawn(move || sample_until(stop_monitor));

    let result = benchmark_fn();

    stop.store(true, Ordering::Relaxed);
    let stats = match monitor {
        Ok(handle) => handle.join().ok(),
        Err(e) => {
            log::warn!("cpu monitor not started: {}", e);
            None
        }
    };
    if let Some(s) = &stats {
        println!(
            "CPU Stats: avg={:.1}%, peak={:.1}%, samples={}",
            s.avg_cpu_percent, s.peak_cpu_percent, s.samples
        );
    }
    (result, stats)
}
