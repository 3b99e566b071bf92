// osal-bench: stream layer benchmark suite
// Ring buffer coalescing, select wake latency, backend throughput
mod coalescing;
mod cpu_monitor;
mod select_latency;
mod throughput;

use clap::{Parser, Subcommand};
use osal_ng::Result;
use std::process;

const MB: usize = 1024 * 1024;

#[derive(Parser)]
#[command(name = "osal-bench")]
#[command(about = "OSAL stream layer benchmark suite", long_about = None)]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Run all benchmark cases
    #[arg(short, long)]
    all: bool,

    /// Run specific case (shorthand for 'case' subcommand)
    #[arg(short = 'c', long = "case", value_name = "NAME")]
    case: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run specific benchmark case
    Case {
        /// Case name to run
        #[arg(value_name = "NAME")]
        name: String,
    },

    /// List all available benchmark cases
    List,
}

fn list_cases() {
    println!("\n=== Available Benchmark Cases ===\n");

    println!("COALESCING:");
    println!("  coalesce-ring       - Ring buffer fill/drain in memory");
    println!("  coalesce-loopback   - Small writes over loopback, plain vs ring + TCP_NODELAY");
    println!("  coalesce-all        - Run all coalescing tests");
    println!();

    println!("SELECT:");
    println!("  select-socket       - Wake event latency, poll() based select");
    println!("  select-embedded     - Wake event latency, channel based select");
    println!("  select-all          - Compare both");
    println!();

    println!("THROUGHPUT:");
    println!("  throughput-socket   - Bulk transfer over loopback TCP");
    println!("  throughput-embedded - Bulk transfer through the embedded stack");
    println!("  throughput-all      - Compare backends with CPU monitoring");
    println!();

    println!("Usage:");
    println!("  osal-bench -a                        # Run all benchmarks");
    println!("  osal-bench -c select-all             # Run one case");
    println!("  osal-bench case throughput-socket    # Same, as subcommand");
    println!("  osal-bench list                      # Show this list");
}

fn run_coalesce_all() -> Result<()> {
    let results = vec![
        coalescing::bench_ring_only(100_000, 40),
        coalescing::bench_loopback(100_000, 40, false)?,
        coalescing::bench_loopback(100_000, 40, true)?,
    ];
    coalescing::print_coalescing_results(&results);
    Ok(())
}

fn run_select_all() -> Result<()> {
    let results = vec![
        select_latency::bench_socket_select(200)?,
        select_latency::bench_embedded_select(200)?,
    ];
    select_latency::print_latency_results(&results);
    Ok(())
}

fn run_throughput_all() -> Result<()> {
    let mut results = vec![];
    for nodelay in [false, true] {
        let (r, _) = cpu_monitor::run_with_cpu_monitor("socket transfer", || throughput::bench_socket(256 * MB, nodelay));
        results.push(r?);
    }
    let (r, _) = cpu_monitor::run_with_cpu_monitor("embedded transfer", || throughput::bench_embedded(64 * MB));
    results.push(r?);
    throughput::print_throughput_results(&results);
    Ok(())
}

fn run_all() -> Result<()> {
    run_coalesce_all()?;
    println!("\n{}", "-".repeat(79));
    run_select_all()?;
    println!("\n{}", "-".repeat(79));
    run_throughput_all()
}

fn run_case(name: &str) -> Result<()> {
    match name {
        "coalesce-ring" => {
            coalescing::print_coalescing_results(&[coalescing::bench_ring_only(100_000, 40)]);
        }
        "coalesce-loopback" => {
            let results = vec![
                coalescing::bench_loopback(100_000, 40, false)?,
                coalescing::bench_loopback(100_000, 40, true)?,
            ];
            coalescing::print_coalescing_results(&results);
        }
        "coalesce-all" => run_coalesce_all()?,

        "select-socket" => select_latency::print_latency_results(&[select_latency::bench_socket_select(200)?]),
        "select-embedded" => select_latency::print_latency_results(&[select_latency::bench_embedded_select(200)?]),
        "select-all" => run_select_all()?,

        "throughput-socket" => throughput::print_throughput_results(&[throughput::bench_socket(256 * MB, false)?]),
        "throughput-embedded" => throughput::print_throughput_results(&[throughput::bench_embedded(64 * MB)?]),
        "throughput-all" => run_throughput_all()?,

        _ => {
            eprintln!("Error: Unknown benchmark case '{}'", name);
            eprintln!("Run 'osal-bench list' to see available cases");
            process::exit(1);
        }
    }
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let result = if cli.all {
        run_all()
    } else if let Some(case_name) = cli.case {
        run_case(&case_name)
    } else {
        match cli.command {
            Some(Commands::Case { name }) => run_case(&name),
            Some(Commands::List) => {
                list_cases();
                Ok(())
            }
            None => {
                println!("\nNo benchmark specified. Use one of:");
                println!("  osal-bench -a              # Run all benchmarks");
                println!("  osal-bench -c <case>       # Run specific case");
                println!("  osal-bench list            # List available cases");
                Ok(())
            }
        }
    };

    if let Err(e) = result {
        eprintln!("benchmark failed: {} ({})", e, e.status());
        process::exit(1);
    }
}
