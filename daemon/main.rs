// osal-echod: TCP echo server on the osal socket stream layer
use clap::Parser;
use osal_echod::EchoServer;
use osal_ng::{initialize, OsalConfig, SocketStream, Stream, StreamFlags};
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(name = "osal-echod")]
#[command(about = "Select driven TCP echo server", long_about = None)]
#[command(version = "0.1.0")]
struct Args {
    /// Listen address: ":port", "host:port" or "[ipv6]:port"
    #[arg(short, long, default_value = ":6368")]
    listen: String,

    /// Coalesce replies in the ring buffer and send with TCP_NODELAY
    #[arg(long)]
    nodelay: bool,

    /// TOML configuration file (overrides OSAL_CONFIG)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => OsalConfig::load(path),
        None => OsalConfig::from_env(),
    };
    let config = match config {
        Ok(c) => c,
        Err(e) => {
            log::error!("{}", e);
            process::exit(1);
        }
    };
    initialize(&config);

    let mut flags = StreamFlags::LISTEN;
    if args.nodelay {
        flags |= StreamFlags::TCP_NODELAY;
    }
    let listener = match SocketStream::open(&args.listen, None, flags) {
        Ok(l) => l,
        Err(e) => {
            log::error!("cannot listen on {}: {}", args.listen, e);
            process::exit(1);
        }
    };
    if let Ok(addr) = listener.local_addr() {
        log::info!("echo server listening on {}", addr);
    }

    let result = EchoServer::new(listener).and_then(|mut server| server.run());
    osal_ng::shutdown();
    if let Err(e) = result {
        log::error!("echo server failed: {} ({})", e, e.status());
        process::exit(1);
    }
}
