//! Diagnostic client for poking at a running relay.
//!
//! Connects, registers a name, signals ready and prints every broadcast it
//! receives until the observation window ends.

use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use shared::{ClientMessage, CursorDelta, ServerMessage};
use std::time::Duration;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Relay address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:1337")]
    server: String,

    /// Display name to register
    #[arg(short, long, default_value = "probe")]
    name: String,

    /// How long to observe broadcasts, in seconds
    #[arg(short = 'o', long, default_value = "10")]
    observe_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let url = format!("ws://{}", args.server);
    println!("Connecting to {}", url);
    let (ws, _) = connect_async(&url).await?;
    let (mut sink, mut source) = ws.split();

    send(&mut sink, &ClientMessage::RegisterName(args.name.clone())).await?;
    send(&mut sink, &ClientMessage::Fingerprint(serde_json::json!("1280x800"))).await?;
    send(&mut sink, &ClientMessage::PlayerReady).await?;
    send(
        &mut sink,
        &ClientMessage::CursorMove(CursorDelta { dx: 12.0, dy: -3.0 }),
    )
    .await?;

    let window = Duration::from_secs(args.observe_secs);
    let observe = async {
        while let Some(frame) = source.next().await {
            match frame {
                Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                    Ok(message) => println!("<- {:?}", message),
                    Err(_) => println!("<- unrecognized frame: {}", text),
                },
                Ok(Message::Close(_)) => {
                    println!("Server closed the connection");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    eprintln!("Transport error: {}", e);
                    break;
                }
            }
        }
    };

    if timeout(window, observe).await.is_err() {
        println!("Observation window over, disconnecting");
    }

    sink.close().await?;
    Ok(())
}

async fn send<S>(sink: &mut S, message: &ClientMessage) -> Result<(), Box<dyn std::error::Error>>
where
    S: SinkExt<Message> + Unpin,
    S::Error: std::error::Error + 'static,
{
    let json = serde_json::to_string(message)?;
    println!("-> {}", json);
    sink.send(Message::text(json)).await?;
    Ok(())
}
