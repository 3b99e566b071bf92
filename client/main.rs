// osal-ping: connect to an echo server and time round trips
use clap::Parser;
use osal_client::ping;
use osal_ng::{Error, SocketStream, Stream, StreamFlags};
use std::process;
use std::thread;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "osal-ping")]
#[command(about = "Send PING to an echo server and wait for the reply", long_about = None)]
#[command(version = "0.1.0")]
struct Args {
    /// Server address: "host:port", ":port" or "[ipv6]:port"
    #[arg(short, long, default_value = "127.0.0.1:6368")]
    address: String,

    /// Number of pings
    #[arg(short, long, default_value_t = 4)]
    count: usize,

    /// Payload to send
    #[arg(short, long, default_value = "PING")]
    payload: String,

    /// Milliseconds between pings
    #[arg(short, long, default_value_t = 1000)]
    interval: u64,

    /// Milliseconds to wait for each echo
    #[arg(short, long, default_value_t = 2000)]
    timeout: u64,

    /// Use the coalescing ring buffer with TCP_NODELAY
    #[arg(long)]
    nodelay: bool,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let flags = if args.nodelay { StreamFlags::TCP_NODELAY } else { StreamFlags::empty() };
    let mut stream = match SocketStream::open(&args.address, None, flags) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("cannot connect to {}: {}", args.address, e);
            process::exit(1);
        }
    };

    println!("PING {} ({} bytes)", args.address, args.payload.len());
    let mut replies = 0;
    for seq in 0..args.count {
        match ping(&mut stream, args.payload.as_bytes(), Duration::from_millis(args.timeout)) {
            Ok(rtt) => {
                replies += 1;
                println!("{} bytes from {}: seq={} time={:.3} ms", args.payload.len(), args.address, seq, rtt.as_secs_f64() * 1000.0);
            }
            Err(Error::Transport(e)) if e.kind() == std::io::ErrorKind::TimedOut => {
                println!("seq={} timed out", seq);
            }
            Err(e) => {
                eprintln!("ping failed: {} ({})", e, e.status());
                break;
            }
        }
        if seq + 1 < args.count {
            thread::sleep(Duration::from_millis(args.interval));
        }
    }
    stream.close(StreamFlags::empty());

    println!("{} sent, {} received", args.count, replies);
    if replies == 0 {
        process::exit(1);
    }
}
