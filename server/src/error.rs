use std::time::Duration;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Failures of a room operation.
///
/// These are reported to the requesting session only and never affect any
/// other member. The display text is what the client sees in `error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LobbyError {
    #[error("room is full")]
    RoomFull,
    #[error("game already in progress")]
    GameInProgress,
    #[error("already in this room")]
    AlreadyMember,
    #[error("room not found")]
    RoomNotFound,
    #[error("only the host can start the game")]
    NotHost,
    #[error("not all players are ready")]
    NotAllReady,
    #[error("game is not starting")]
    GameNotStarting,
    #[error("game has already ended")]
    GameEnded,
}

/// Failures that end one connection.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error("write deadline of {0:?} exceeded")]
    WriteTimeout(Duration),
    #[error("no pong received within {0:?}")]
    HeartbeatTimeout(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("send buffer must hold at least one message")]
    EmptySendBuffer,
    #[error("ping period {ping_period:?} must be non-zero and shorter than pong wait {pong_wait:?}")]
    PingPeriod {
        ping_period: Duration,
        pong_wait: Duration,
    },
    #[error("write wait must be non-zero")]
    ZeroWriteWait,
    #[error("endpoint path must start with '/': {0}")]
    Path(String),
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
