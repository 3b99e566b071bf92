// osal-mcast: send or receive UDP multicast datagrams
use clap::{Parser, Subcommand};
use osal_client::{receive_datagrams, send_datagrams};
use osal_ng::{format_interface_list, initialize, list_network_interfaces, OsalConfig, SocketStream, Stream, StreamFlags};
use std::process;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "osal-mcast")]
#[command(about = "UDP multicast sender and receiver", long_about = None)]
#[command(version = "0.1.0")]
struct Cli {
    /// Multicast group, e.g. 239.255.0.1 or [ff02::1]
    #[arg(short, long, default_value = "239.255.0.1")]
    group: String,

    /// Group port
    #[arg(short, long, default_value_t = 6369)]
    port: u16,

    /// Local interface address to use instead of the configured ones
    #[arg(short, long)]
    interface: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send datagrams to the group
    Send {
        #[arg(short, long, default_value = "hello")]
        message: String,
        #[arg(short, long, default_value_t = 5)]
        count: usize,
        /// Milliseconds between datagrams
        #[arg(long, default_value_t = 500)]
        interval: u64,
    },

    /// Join the group and print what arrives
    Recv {
        #[arg(short, long, default_value_t = 10)]
        count: usize,
        /// Seconds to wait for traffic before giving up
        #[arg(short, long, default_value_t = 10)]
        timeout: u64,
    },

    /// Show multicast capable interfaces
    Interfaces,
}

fn parameters(cli: &Cli) -> String {
    match &cli.interface {
        Some(ip) if ip.contains(':') && !ip.starts_with('[') => format!("[{}]:{}", ip, cli.port),
        Some(ip) => format!("{}:{}", ip, cli.port),
        None => format!(":{}", cli.port),
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match OsalConfig::from_env() {
        Ok(config) => initialize(&config),
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    }

    let params = parameters(&cli);
    let result = match &cli.command {
        Commands::Interfaces => {
            println!("ipv4: {}", format_interface_list(&list_network_interfaces(false)));
            println!("ipv6: {}", format_interface_list(&list_network_interfaces(true)));
            Ok(())
        }
        Commands::Send { message, count, interval } => {
            SocketStream::open(&params, Some(&cli.group), StreamFlags::UDP_MULTICAST).and_then(|mut s| {
                let sent = send_datagrams(&mut s, message.as_bytes(), *count, Duration::from_millis(*interval))?;
                println!("{} of {} datagrams sent to {}", sent, count, cli.group);
                Ok(())
            })
        }
        Commands::Recv { count, timeout } => {
            SocketStream::open(&params, Some(&cli.group), StreamFlags::UDP_MULTICAST | StreamFlags::LISTEN).and_then(
                |mut s| {
                    for (packet, data) in receive_datagrams(&mut s, *count, Duration::from_secs(*timeout))? {
                        println!("{} bytes from {}: {}", packet.len, packet.remote, String::from_utf8_lossy(&data));
                    }
                    Ok(())
                },
            )
        }
    };

    osal_ng::shutdown();
    if let Err(e) = result {
        eprintln!("osal-mcast: {} ({})", e, e.status());
        process::exit(1);
    }
}
