use clap::Parser;
use log::info;
use server::config::{ServerConfig, PONG_WAIT, SEND_BUFFER, WRITE_WAIT};
use server::network::Server;
use std::time::Duration;

/// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port to listen on
    #[clap(short, long, default_value = "8080")]
    port: u16,
    /// WebSocket endpoint path
    #[clap(long, default_value = "/ws")]
    path: String,
    /// Outbound messages buffered per client before new ones are dropped
    #[clap(long, default_value_t = SEND_BUFFER)]
    send_buffer: usize,
    /// Seconds without a pong before a client is dropped
    #[clap(long, default_value_t = PONG_WAIT.as_secs())]
    pong_wait_secs: u64,
    /// Seconds between pings (defaults to 9/10 of the pong wait)
    #[clap(long)]
    ping_period_secs: Option<u64>,
    /// Seconds allowed for writing a single message
    #[clap(long, default_value_t = WRITE_WAIT.as_secs())]
    write_wait_secs: u64,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        let mut config = ServerConfig::default()
            .with_addr(format!("{}:{}", self.host, self.port))
            .with_pong_wait(Duration::from_secs(self.pong_wait_secs));

        if let Some(secs) = self.ping_period_secs {
            config.ping_period = Duration::from_secs(secs);
        }
        config.path = self.path;
        config.send_buffer = self.send_buffer;
        config.write_wait = Duration::from_secs(self.write_wait_secs);
        config
    }
}

/// Parses command-line arguments, binds the lobby server and runs it until
/// Ctrl-C, then closes every connected session.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = Args::parse().into_config();
    let server = Server::bind(config).await?;
    let registry = server.registry();

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl-C, shutting down");
        }
    }

    registry.shutdown().await;
    Ok(())
}
