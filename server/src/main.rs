use clap::Parser;
use log::info;
use server::relay::Relay;

/// Main-method of the relay server.
/// Parses command-line arguments, binds the listener and runs the session
/// loop until interrupted.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    #[derive(Parser, Debug)]
    #[command(author, version, about, long_about = None)]
    struct Args {
        /// Address to bind to
        #[arg(short = 'H', long, default_value = "127.0.0.1")]
        host: String,
        /// Port to listen on
        #[arg(short, long, env = "FRAUDMOLE_PORT", default_value = "1337")]
        port: u16,
    }

    let args = Args::parse();
    let address = format!("{}:{}", args.host, args.port);

    let mut relay = Relay::bind(&address).await?;
    info!("Session relay starting on {}", address);

    tokio::select! {
        result = relay.run() => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
