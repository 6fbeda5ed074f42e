//! WebSocket transport: accept loop and the per-connection pumps
//!
//! Every accepted connection runs two tasks. The inbound pump reads frames,
//! hands them to the [`Session`] for dispatch and enforces the pong deadline.
//! The outbound pump drains the session's queue, writing each message under
//! a deadline and pinging the client periodically. Whichever pump stops
//! first brings the other one down, and teardown always ends with the
//! session being unregistered.

use crate::config::ServerConfig;
use crate::error::{ServerError, TransportError};
use crate::registry::Registry;
use crate::session::Session;
use crate::utils::generate_id;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, sleep, timeout, timeout_at, Instant};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async_with_config, WebSocketStream};

/// Pause after a failed accept before trying again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(10);

/// Lobby server bound to a TCP address
pub struct Server {
    listener: TcpListener,
    registry: Arc<Registry>,
    config: Arc<ServerConfig>,
}

impl Server {
    /// Validates the configuration and binds the listener.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;

        let listener = TcpListener::bind(&config.addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: config.addr.clone(),
                source,
            })?;
        info!(
            "Server listening on {}{}",
            listener.local_addr()?,
            config.path
        );

        Ok(Self {
            listener,
            registry: Arc::new(Registry::new()),
            config: Arc::new(config),
        })
    }

    /// Address actually bound, useful when binding to port 0
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Accepts connections until the task is dropped.
    pub async fn run(&self) -> Result<(), ServerError> {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let registry = Arc::clone(&self.registry);
                    let config = Arc::clone(&self.config);
                    tokio::spawn(async move {
                        handle_connection(stream, peer, registry, config).await;
                    });
                }
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    registry: Arc<Registry>,
    config: Arc<ServerConfig>,
) {
    let path = config.path.clone();
    let check_path = move |request: &Request, response: Response| {
        if request.uri().path() == path {
            Ok(response)
        } else {
            debug!("Rejecting upgrade for {} from {}", request.uri(), peer);
            let mut not_found = ErrorResponse::new(Some("not found".to_string()));
            *not_found.status_mut() = StatusCode::NOT_FOUND;
            Err(not_found)
        }
    };

    let ws_config = WebSocketConfig::default()
        .max_message_size(Some(config.max_message_size))
        .max_frame_size(Some(config.max_message_size));

    match accept_hdr_async_with_config(stream, check_path, Some(ws_config)).await {
        Ok(ws) => {
            debug!("WebSocket connection established with {}", peer);
            serve_session(ws, registry, config).await;
        }
        Err(e) => debug!("Handshake with {} failed: {}", peer, e),
    }
}

/// Runs one session over an established WebSocket until it disconnects.
///
/// The session is registered before the first frame is read and
/// unregistered once the inbound pump stops; this then waits for the
/// outbound pump to flush its close frame.
pub async fn serve_session<S>(
    ws: WebSocketStream<S>,
    registry: Arc<Registry>,
    config: Arc<ServerConfig>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.send_buffer);
    let session = Session::new(generate_id(), tx);
    registry.register(Arc::clone(&session)).await;

    let (sink, stream) = ws.split();
    let (done_tx, done_rx) = oneshot::channel();
    let writer = tokio::spawn(write_pump(sink, rx, Arc::clone(&config), done_tx));

    match read_pump(stream, &session, &registry, &config, done_rx).await {
        Ok(()) => debug!("Session {} closed", session.id()),
        Err(e) => warn!("Session {} disconnected: {}", session.id(), e),
    }

    registry.unregister(session.id()).await;

    match writer.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("Session {} writer stopped: {}", session.id(), e),
        Err(e) => error!("Session {} writer task failed: {}", session.id(), e),
    }
}

/// Reads frames until the peer leaves, the transport fails, the pong
/// deadline passes or the outbound pump stops.
async fn read_pump<S>(
    mut stream: SplitStream<WebSocketStream<S>>,
    session: &Arc<Session>,
    registry: &Arc<Registry>,
    config: &ServerConfig,
    mut writer_done: oneshot::Receiver<()>,
) -> Result<(), TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut deadline = Instant::now() + config.pong_wait;

    loop {
        let next = tokio::select! {
            _ = &mut writer_done => return Ok(()),
            next = timeout_at(deadline, stream.next()) => next,
        };

        let message = match next {
            Err(_) => return Err(TransportError::HeartbeatTimeout(config.pong_wait)),
            Ok(None) => return Ok(()),
            Ok(Some(result)) => result?,
        };

        match message {
            Message::Text(text) => session.handle_frame(registry, text.as_bytes()).await,
            Message::Binary(data) => session.handle_frame(registry, &data).await,
            Message::Pong(_) => {
                deadline = Instant::now() + config.pong_wait;
            }
            Message::Close(_) => return Ok(()),
            Message::Ping(_) | Message::Frame(_) => {}
        }
    }
}

/// Writes queued messages and periodic pings. Sends a close frame once the
/// session's queue has been closed.
///
/// `_done` is dropped on return, which tells the inbound pump to stop.
async fn write_pump<S>(
    mut sink: SplitSink<WebSocketStream<S>, Message>,
    mut outbound: mpsc::Receiver<String>,
    config: Arc<ServerConfig>,
    _done: oneshot::Sender<()>,
) -> Result<(), TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut ping = interval_at(Instant::now() + config.ping_period, config.ping_period);

    loop {
        tokio::select! {
            queued = outbound.recv() => match queued {
                Some(text) => {
                    write_frame(&mut sink, Message::Text(text.into()), config.write_wait).await?;
                }
                None => {
                    // Peer may already be gone
                    let _ = write_frame(&mut sink, Message::Close(None), config.write_wait).await;
                    return Ok(());
                }
            },
            _ = ping.tick() => {
                write_frame(&mut sink, Message::Ping(Vec::new().into()), config.write_wait).await?;
            }
        }
    }
}

async fn write_frame<S>(
    sink: &mut SplitSink<WebSocketStream<S>, Message>,
    message: Message,
    write_wait: Duration,
) -> Result<(), TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match timeout(write_wait, sink.send(message)).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(TransportError::WriteTimeout(write_wait)),
    }
}
