use clap::Parser;
use env_logger::Env;
use log::{error, info};
use server::{Server, ServerConfig};
use std::path::PathBuf;

/// Command line arguments. Every value given here overrides the config file.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Path to the JSON server configuration
    #[clap(short, long)]
    config: Option<PathBuf>,
    /// Server IP address to bind to
    #[clap(short = 'H', long)]
    host: Option<String>,
    /// TCP port for handshakes and reliable messages
    #[clap(long)]
    tcp_port: Option<u16>,
    /// UDP port for car state and pings
    #[clap(long)]
    udp_port: Option<u16>,
    /// RCON port, disabled when neither this nor the config sets one
    #[clap(long)]
    rcon_port: Option<u16>,
    /// Tick rate (updates per second)
    #[clap(short, long)]
    tick_rate: Option<u32>,
}

impl Args {
    fn apply(self, config: &mut ServerConfig) {
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.tcp_port {
            config.tcp_port = port;
        }
        if let Some(port) = self.udp_port {
            config.udp_port = port;
        }
        if let Some(port) = self.rcon_port {
            config.rcon.port = Some(port);
        }
        if let Some(rate) = self.tick_rate {
            config.tick_rate_hz = rate;
        }
    }
}

/// Parses arguments, loads the configuration and runs the server until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = ServerConfig::load(args.config.as_deref())?;
    args.apply(&mut config);

    let server = Server::bind(config).await?;

    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, shutting down gracefully...");
                shutdown.cancel();
            }
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
    });

    if let Err(e) = server.run().await {
        error!("Server stopped with error: {}", e);
        return Err(e.into());
    }
    info!("Server stopped");
    Ok(())
}
