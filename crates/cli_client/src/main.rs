//! QUIC client for Classboard whiteboard sessions

use anyhow::{bail, Result};
use clap::Parser;
use cli_client::{console, Client, ClientConfig};
use classboard_core::{ReconnectConfig, TransportTuning};
use std::net::SocketAddr;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "cli_client")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Command-line client for Classboard", long_about = None)]
struct Args {
    /// Host address
    #[arg(short, long, default_value = "127.0.0.1:8443")]
    connect: SocketAddr,

    /// User id announced to the host (random if omitted)
    #[arg(short, long)]
    user: Option<String>,

    /// Host certificate fingerprint (SHA-256, colon-separated hex)
    #[arg(short, long)]
    fingerprint: Option<String>,

    /// Skip certificate verification
    #[arg(long, default_value_t = false)]
    insecure: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(&args.log_level);

    if args.fingerprint.is_none() && !args.insecure {
        bail!("Pass --fingerprint from the host banner, or --insecure to skip verification");
    }

    let user_id = args.user.unwrap_or_else(|| {
        let id = uuid::Uuid::new_v4().simple().to_string();
        format!("user-{}", &id[..8])
    });

    info!("Classboard CLI Client v{}", env!("CARGO_PKG_VERSION"));
    info!(user = %user_id, server = %args.connect, "Joining");

    let config = ClientConfig {
        server: args.connect,
        user_id,
        fingerprint: args.fingerprint,
        reconnect: ReconnectConfig::default(),
        transport: TransportTuning::default(),
    };
    let (client, handle) = Client::new(config)?;
    let driver = tokio::spawn(client.run());

    println!("{}", console::HELP);
    tokio::select! {
        result = console::run(handle.clone()) => {
            if let Err(e) = result {
                error!("Console error: {:#}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
    }

    handle.shutdown();
    driver.await??;
    Ok(())
}

fn setup_logging(level: &str) {
    let log_level = level.parse::<Level>().unwrap_or(Level::INFO);

    let filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}
