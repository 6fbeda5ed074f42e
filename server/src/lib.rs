//! # Lobby Server Library
//!
//! This library provides the matchmaking lobby for the multiplayer tank game.
//! Players connect over WebSocket, browse open rooms, create or join one,
//! mark themselves ready, and the room's host starts the match.
//!
//! ## Core Responsibilities
//!
//! ### Session Handling
//! Each connection becomes a [`session::Session`] with a generated id and a
//! display name derived from it. Inbound frames are decoded into typed
//! [`shared::ClientMessage`]s and dispatched; replies and room broadcasts are
//! queued on the session's bounded outbound queue.
//!
//! ### Room Management
//! A [`room::Room`] holds up to four members, their ready flags and the host.
//! Every change is applied under the room's own lock and broadcast to the
//! members before the lock is released, so everyone sees a room's changes in
//! the same order. Rooms disappear as soon as their last member leaves.
//!
//! ### Directory
//! The [`registry::Registry`] tracks live sessions and rooms. It is passed
//! explicitly to whatever needs it; there is no global instance.
//!
//! ## Module Organization
//!
//! - `config`: listener address, endpoint path, heartbeat and buffer settings
//! - `error`: lobby, transport and startup error types
//! - `network`: accept loop and the inbound/outbound pumps per connection
//! - `registry`: session and room directory
//! - `room`: membership, readiness, host tracking and match state
//! - `session`: outbound queueing and message dispatch
//! - `utils`: id generation and display names
//!
//! ## Failure Model
//!
//! Lobby errors (full room, not host, ...) go back to the requesting client
//! as an `error` message and never affect anyone else. Transport failures and
//! missed heartbeats end only the affected connection, which leaves its room
//! the same way an explicit `leave_room` would. A client that cannot keep up
//! loses messages instead of stalling the room.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::bind(ServerConfig::default().with_addr("0.0.0.0:8080")).await?;
//!     println!("Lobby listening on {}", server.local_addr()?);
//!
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod network;
pub mod registry;
pub mod room;
pub mod session;
pub mod utils;
