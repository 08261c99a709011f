//! `fragproxy-server`: sits in front of a backend resolver, strips the
//! fragmentation capability signal from incoming queries, and splits
//! oversize replies into a sequence of small DNS messages when the querier
//! asked for it.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use dnsfrag::access::AccessList;
use dnsfrag::config::parse_addr_list;
use dnsfrag::listener::{run_tcp, run_udp};
use dnsfrag::upstream::RandomSelector;
use dnsfrag::ServerHandler;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const BUILD_DATE: &str = env!("BUILD_DATE");
const GIT_HASH: &str = env!("GIT_HASH");

#[derive(Parser)]
#[command(name = "fragproxy-server")]
#[command(author = "Sina Rabbani")]
#[command(version = VERSION)]
#[command(about = "DNS message fragmentation server proxy", long_about = None)]
struct Cli {
    /// Backend resolver endpoint
    #[arg(long, default_value = "127.0.0.1:53")]
    proxy: String,

    /// Bind address(es) for the upstream-facing listener
    #[arg(long, default_value = "8000")]
    listen: String,

    /// Allowed source CIDRs, comma-separated
    #[arg(long, default_value = "0.0.0.0/0")]
    access: String,

    /// Backend I/O deadline, in seconds
    #[arg(long, default_value_t = 5)]
    timeout: u64,

    /// Emit per-query diagnostics
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    info!(
        "fragproxy-server {} (build {}, {})",
        VERSION, GIT_HASH, BUILD_DATE
    );

    let upstreams = parse_addr_list(&cli.proxy).context("parsing --proxy")?;
    let listen_addrs = parse_addr_list(&cli.listen).context("parsing --listen")?;
    let access = Arc::new(AccessList::parse(&cli.access).context("parsing --access")?);

    let handler = Arc::new(ServerHandler {
        upstreams,
        selector: Box::new(RandomSelector),
        timeout: Duration::from_secs(cli.timeout),
    });

    let mut tasks = Vec::new();
    for addr in listen_addrs {
        let (udp_access, tcp_access) = (access.clone(), access.clone());
        let (udp_handler, tcp_handler) = (handler.clone(), handler.clone());
        tasks.push(tokio::spawn(async move { run_udp(addr, udp_access, udp_handler).await }));
        tasks.push(tokio::spawn(async move { run_tcp(addr, tcp_access, tcp_handler).await }));
    }

    for task in tasks {
        if let Err(e) = task.await.context("listener task panicked")?.context("listener failed") {
            log::error!("fatal listener error: {}", e);
            std::process::exit(1);
        }
    }

    Ok(())
}
