//! Runtime configuration for the lobby server
//!
//! Defaults mirror the timings the game client expects: a write deadline of
//! 10 seconds, a 60 second pong window and pings sent at 9/10 of that window
//! so a healthy client always answers before its read deadline expires.

use crate::error::ConfigError;
use std::time::Duration;

pub const DEFAULT_ADDR: &str = "127.0.0.1:8080";
pub const DEFAULT_PATH: &str = "/ws";
pub const WRITE_WAIT: Duration = Duration::from_secs(10);
pub const PONG_WAIT: Duration = Duration::from_secs(60);
pub const MAX_MESSAGE_SIZE: usize = 4096;
pub const SEND_BUFFER: usize = 64;

/// Settings shared by the accept loop and every connection's pumps
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address the listener binds to
    pub addr: String,
    /// Only upgrade requests for this path are accepted
    pub path: String,
    /// Deadline for writing a single frame
    pub write_wait: Duration,
    /// Time allowed between pongs before the connection is considered dead
    pub pong_wait: Duration,
    /// Interval between outbound pings
    pub ping_period: Duration,
    /// Largest inbound message accepted, in bytes
    pub max_message_size: usize,
    /// Capacity of each session's outbound queue
    pub send_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            path: DEFAULT_PATH.to_string(),
            write_wait: WRITE_WAIT,
            pong_wait: PONG_WAIT,
            ping_period: ping_period_for(PONG_WAIT),
            max_message_size: MAX_MESSAGE_SIZE,
            send_buffer: SEND_BUFFER,
        }
    }
}

impl ServerConfig {
    pub fn with_addr(mut self, addr: impl Into<String>) -> Self {
        self.addr = addr.into();
        self
    }

    /// Sets the pong window and derives the ping period from it.
    pub fn with_pong_wait(mut self, pong_wait: Duration) -> Self {
        self.pong_wait = pong_wait;
        self.ping_period = ping_period_for(pong_wait);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.send_buffer == 0 {
            return Err(ConfigError::EmptySendBuffer);
        }
        if self.ping_period.is_zero() || self.ping_period >= self.pong_wait {
            return Err(ConfigError::PingPeriod {
                ping_period: self.ping_period,
                pong_wait: self.pong_wait,
            });
        }
        if self.write_wait.is_zero() {
            return Err(ConfigError::ZeroWriteWait);
        }
        if !self.path.starts_with('/') {
            return Err(ConfigError::Path(self.path.clone()));
        }
        Ok(())
    }
}

fn ping_period_for(pong_wait: Duration) -> Duration {
    pong_wait * 9 / 10
}
