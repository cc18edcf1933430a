mod game;
mod network;
mod timers;

use clap::Parser;
use log::info;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Relay address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:1337")]
    server: String,

    /// Display name to register with the session
    #[arg(short, long, default_value = "player")]
    name: String,

    /// The lead client starts the game once this many players are ready
    #[arg(short = 'm', long, default_value = "1")]
    min_players: usize,

    /// Delay before clicking a spawned fraudster, in milliseconds
    #[arg(short = 'r', long, default_value = "800")]
    reaction_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Starting session client...");
    info!("Connecting to: {}", args.server);

    let mut client = network::SessionClient::new(
        &args.server,
        &args.name,
        args.min_players,
        Duration::from_millis(args.reaction_ms),
    );

    client.run().await?;

    Ok(())
}
