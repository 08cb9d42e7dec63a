mod server;

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::info;

use huddle_core::{load_config, logging, SignalingServer};
use huddle_sfu::{SessionFactory, WebRtcSessionFactory};

use server::HuddleServer;

/// Group call signaling and media forwarding server
#[derive(Debug, Parser)]
#[command(name = "huddle", version, about)]
struct Cli {
    /// Path to a YAML config file
    #[arg(short, long, env = "HUDDLE_CONFIG_PATH")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Load and validate configuration
    let config = load_config(cli.config.as_deref())?;

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("Huddle server starting...");
    info!("HTTP address: {}", config.http_address());

    // 3. Media engine
    let factory: Arc<dyn SessionFactory> =
        Arc::new(WebRtcSessionFactory::new(config.webrtc.clone())?);
    info!(
        stun_servers = ?config.webrtc.effective_stun_servers(),
        "WebRTC engine initialized"
    );

    // 4. Signaling
    let signaling = SignalingServer::new(config.signaling.clone(), factory);

    // 5. Serve until shutdown
    HuddleServer::new(config, signaling).start().await
}
