use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use shared::{ClientMessage, CreateRoomPayload, ServerMessage, SetReadyPayload};
use std::time::Duration;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

/// Scripted smoke client: lists rooms, creates one, readies up and starts it.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Lobby endpoint
    #[clap(short, long, default_value = "ws://127.0.0.1:8080/ws")]
    url: String,
    /// Name of the room to create
    #[clap(short, long, default_value = "Smoke Test")]
    room: String,
}

const REPLY_WAIT: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let (ws, _) = connect_async(args.url.as_str()).await?;
    println!("Connected to {}", args.url);
    let (mut write, mut read) = ws.split();

    let script = [
        ClientMessage::RequestRooms,
        ClientMessage::CreateRoom(CreateRoomPayload { name: args.room }),
        ClientMessage::SetReady(SetReadyPayload { ready: true }),
        ClientMessage::StartGame,
    ];

    for message in script {
        println!("-> {}", message.kind());
        write.send(Message::Text(message.encode()?.into())).await?;

        // Print whatever the server sends until it goes quiet
        while let Ok(Some(frame)) = timeout(REPLY_WAIT, read.next()).await {
            match frame? {
                Message::Text(text) => match ServerMessage::decode(text.as_bytes()) {
                    Ok(reply) => println!("<- {:?}", reply),
                    Err(e) => println!("<- undecodable message ({}): {}", e, text.as_str()),
                },
                Message::Close(frame) => {
                    println!("Server closed the connection: {:?}", frame);
                    return Ok(());
                }
                _ => {}
            }
        }
    }

    write.send(Message::Close(None)).await?;
    println!("Done");
    Ok(())
}
