use clap::Parser;
use client::app::AppContext;
use client::battle::BattleOutcome;
use client::config::PeerConfig;
use client::network::HandshakeState;
use log::{info, warn};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file; defaults are used when omitted
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// This machine's IPv4 address as the opponent will see it
    #[arg(short = 'a', long, default_value = "127.0.0.1")]
    addr: String,

    /// Override the matchmaking endpoint
    #[arg(short = 'r', long)]
    rendezvous_url: Option<String>,

    /// Override the simulation rate in steps per second
    #[arg(short = 't', long)]
    tick_rate: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => PeerConfig::load(path)?,
        None => PeerConfig::default(),
    };
    if let Some(url) = args.rendezvous_url {
        config.rendezvous.url = url;
    }
    if let Some(tick_rate) = args.tick_rate {
        config.battle.tick_rate = tick_rate;
    }

    let mut app = AppContext::init(config)?;

    let mut states = app.handshake_state();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow();
            match state {
                HandshakeState::Listening => info!("Waiting for an opponent..."),
                HandshakeState::Connecting => info!("Opponent found, connecting..."),
                HandshakeState::Connected => info!("Connected"),
                _ => {}
            }
        }
    });

    info!("Requesting a match for {}", args.addr);

    let result = tokio::select! {
        result = app.run_match(&args.addr) => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };

    app.shutdown();

    match result {
        Some(Ok(BattleOutcome::Finished(score))) => {
            info!("Final score {} - {}", score.own, score.opponent);
        }
        Some(Ok(BattleOutcome::Disconnected)) => warn!("The opponent disconnected"),
        Some(Err(e)) => return Err(e.into()),
        None => info!("Interrupted"),
    }

    Ok(())
}
