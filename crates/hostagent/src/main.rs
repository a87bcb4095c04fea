//! Classboard Host Agent
//!
//! Hosts a whiteboard session over QUIC and takes operator commands on stdin.

use anyhow::{Context, Result};
use clap::Parser;
use hostagent::{console, HostConfig, QuicServer};
use quinn::VarInt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use tokio::signal;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Classboard Host Agent - authoritative whiteboard host
#[derive(Parser, Debug)]
#[command(name = "hostagent")]
#[command(author = "Classboard Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Host agent for Classboard collaborative whiteboard", long_about = None)]
struct Args {
    /// Bind address for QUIC server
    #[arg(short, long, default_value = "0.0.0.0:8443")]
    bind: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Inbound queue capacity before move batches are shed
    #[arg(long, default_value_t = 1024)]
    inbound_capacity: usize,

    /// Broadcast backlog a connection may fall behind before it is dropped
    #[arg(long, default_value_t = 1024)]
    broadcast_capacity: usize,

    /// Start with the session stopped (use `start` on the console)
    #[arg(long, default_value = "false")]
    stopped: bool,

    /// Do not read commands from stdin
    #[arg(long, default_value = "false")]
    no_console: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize rustls CryptoProvider with ring backend (required for rustls 0.23+)
    let _ = rustls::crypto::ring::default_provider().install_default();

    let args = Args::parse();

    setup_logging(&args.log_level)?;

    info!("Starting Classboard Host Agent v{}", env!("CARGO_PKG_VERSION"));

    let bind_addr: SocketAddr = args
        .bind
        .parse()
        .with_context(|| format!("Invalid bind address: {}", args.bind))?;

    let config = HostConfig {
        bind: bind_addr,
        inbound_capacity: args.inbound_capacity,
        broadcast_capacity: args.broadcast_capacity,
        autostart: !args.stopped,
        ..HostConfig::default()
    };

    let (server, cert) = QuicServer::new(config)?;
    let local_addr = server.local_addr()?;
    let fingerprint = cert.fingerprint();
    info!("Certificate fingerprint: {}", fingerprint);

    let lan_ip = get_local_ip().unwrap_or_else(|e| {
        warn!("Could not determine LAN address: {}", e);
        local_addr.ip()
    });

    println!("============================================");
    println!("Address: {}:{}", lan_ip, local_addr.port());
    println!("Fingerprint: {}", fingerprint);
    println!("Join with: cli_client --connect {}:{} --fingerprint {}", lan_ip, local_addr.port(), fingerprint);
    println!("============================================");

    let handle = server.handle();
    let endpoint = server.endpoint();

    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!("Server error: {:#}", e);
        }
    });

    if !args.no_console {
        println!("{}", console::HELP);
        tokio::spawn(async move {
            if let Err(e) = console::run(handle).await {
                error!("Console error: {:#}", e);
            }
        });
    }

    // Wait for shutdown signal
    let mut sigterm = tokio::signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("Failed to setup SIGTERM handler");

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down...");
        }
        result = server_handle => {
            result.context("Server task failed")?;
        }
    }

    endpoint.close(VarInt::from_u32(0), b"host shutting down");
    endpoint.wait_idle().await;

    info!("Shutdown complete");
    Ok(())
}

/// Setup logging with tracing
fn setup_logging(level: &str) -> Result<()> {
    let log_level = level.parse::<Level>().unwrap_or(Level::INFO);

    let filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(())
}

/// LAN address peers should dial.
///
/// Connects a UDP socket to a public address (nothing is sent) to learn the
/// outbound interface. Docker bridge and loopback addresses are rejected.
fn get_local_ip() -> Result<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").context("Failed to bind probe socket")?;
    socket.connect("8.8.8.8:80").context("No route to probe address")?;
    let local_ip = socket.local_addr()?.ip();

    match local_ip {
        IpAddr::V4(ipv4) if is_docker_or_loopback(ipv4) => {
            anyhow::bail!("only found Docker/loopback address {}", ipv4)
        }
        _ => Ok(local_ip),
    }
}

fn is_docker_or_loopback(ip: Ipv4Addr) -> bool {
    let octets = ip.octets();
    octets[0] == 172 && octets[1] == 17 || octets[0] == 127
}
