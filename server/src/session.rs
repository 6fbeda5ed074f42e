//! Server-side state for one connected client
//!
//! A session owns the sending half of its connection's outbound queue and a
//! reference to the room it currently occupies. Other sessions never touch it
//! directly: every cross-session effect goes through a [`Room`], which calls
//! [`Session::send`] on each affected member.
//!
//! The transport pumps live in the network module; this module only deals
//! with queueing outbound messages and dispatching decoded inbound ones.

use crate::error::LobbyError;
use crate::registry::Registry;
use crate::room::Room;
use crate::utils::display_name;
use log::{debug, error, info, warn};
use shared::{ClientMessage, ServerMessage, SessionId};
use std::fmt::Display;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;

pub struct Session {
    id: SessionId,
    name: String,
    /// Taken on close so the outbound pump sees the queue end.
    outbound: Mutex<Option<mpsc::Sender<String>>>,
    room: RwLock<Option<Arc<Room>>>,
    closing: AtomicBool,
    dropped: AtomicU64,
}

impl Session {
    /// Creates a session that queues its outbound messages on `outbound`.
    ///
    /// The display name is derived from the id and never changes.
    pub fn new(id: SessionId, outbound: mpsc::Sender<String>) -> Arc<Self> {
        let name = display_name(&id);
        Arc::new(Self {
            id,
            name,
            outbound: Mutex::new(Some(outbound)),
            room: RwLock::new(None),
            closing: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of outbound messages dropped because the queue was full
    pub fn dropped_messages(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Serializes and queues a message without ever waiting.
    ///
    /// A full queue drops the message and bumps the dropped counter; a closed
    /// queue drops it silently since the connection is already going away.
    pub fn send(&self, message: &ServerMessage) {
        let data = match message.encode() {
            Ok(data) => data,
            Err(e) => {
                error!(
                    "Failed to encode {} for session {}: {}",
                    message.kind(),
                    self.id,
                    e
                );
                return;
            }
        };

        let outbound = self.outbound.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = outbound.as_ref() else {
            debug!("Session {} is closed, dropping {}", self.id, message.kind());
            return;
        };

        match sender.try_send(data) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    "Session {} send buffer full, dropping {} ({} dropped so far)",
                    self.id,
                    message.kind(),
                    total
                );
            }
            Err(TrySendError::Closed(_)) => {
                debug!(
                    "Session {} outbound pump is gone, dropping {}",
                    self.id,
                    message.kind()
                );
            }
        }
    }

    pub fn send_error(&self, error: impl Display) {
        self.send(&ServerMessage::error(error.to_string()));
    }

    pub async fn current_room(&self) -> Option<Arc<Room>> {
        self.room.read().await.clone()
    }

    /// Records `room` as the current room.
    ///
    /// Returns false, leaving the reference untouched, once the session has
    /// started closing; the caller must then undo its membership.
    pub async fn set_room(&self, room: Arc<Room>) -> bool {
        let mut current = self.room.write().await;
        if self.is_closing() {
            return false;
        }
        *current = Some(room);
        true
    }

    /// Leaves the current room, if any.
    ///
    /// The reference is cleared before the room is told, so the room lock is
    /// never taken while this session's lock is held.
    pub async fn leave_room(&self) {
        let room = self.room.write().await.take();
        if let Some(room) = room {
            room.remove_member(&self.id).await;
        }
    }

    /// Leaves the current room and closes the outbound queue.
    ///
    /// Only the first call does anything; it returns whether this call was it.
    pub async fn close(&self) -> bool {
        if self.closing.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.leave_room().await;
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        true
    }

    /// Decodes one inbound frame and dispatches it.
    ///
    /// Undecodable frames are answered with an `error` message; the
    /// connection stays open.
    pub async fn handle_frame(self: &Arc<Self>, registry: &Arc<Registry>, data: &[u8]) {
        match ClientMessage::decode(data) {
            Ok(message) => self.handle_message(registry, message).await,
            Err(e) => {
                warn!("Session {} sent an invalid message: {:?}", self.id, e);
                self.send_error(e);
            }
        }
    }

    pub async fn handle_message(self: &Arc<Self>, registry: &Arc<Registry>, message: ClientMessage) {
        debug!("Session {} sent {}", self.id, message.kind());

        match message {
            ClientMessage::RequestRooms => {
                let rooms = registry.list_room_summaries().await;
                self.send(&ServerMessage::RoomList { rooms });
            }
            ClientMessage::CreateRoom(payload) => {
                self.handle_create_room(registry, payload.name).await;
            }
            ClientMessage::JoinRoom(payload) => {
                self.handle_join_room(registry, &payload.room_id).await;
            }
            ClientMessage::LeaveRoom => {
                self.leave_room().await;
            }
            ClientMessage::SetReady(payload) => {
                if let Some(room) = self.current_room().await {
                    if let Err(e) = room.set_ready(&self.id, payload.ready).await {
                        self.send_error(e);
                    }
                }
            }
            ClientMessage::StartGame => {
                if let Some(room) = self.current_room().await {
                    if let Err(e) = room.try_start(&self.id).await {
                        debug!("Session {} could not start room {}: {}", self.id, room.id(), e);
                        self.send_error(e);
                    }
                }
            }
        }
    }

    async fn handle_create_room(self: &Arc<Self>, registry: &Arc<Registry>, name: String) {
        self.leave_room().await;

        let room = registry.create_room(name, Arc::clone(self)).await;
        if !self.set_room(Arc::clone(&room)).await {
            room.remove_member(&self.id).await;
            return;
        }

        info!("Session {} is hosting room {}", self.id, room.id());
        room.send_state_to_all().await;
    }

    async fn handle_join_room(self: &Arc<Self>, registry: &Arc<Registry>, room_id: &str) {
        self.leave_room().await;

        let Some(room) = registry.lookup_room(room_id).await else {
            self.send_error(LobbyError::RoomNotFound);
            return;
        };

        if let Err(e) = room.add_member(Arc::clone(self)).await {
            debug!("Session {} could not join room {}: {}", self.id, room_id, e);
            self.send_error(e);
            return;
        }

        if !self.set_room(Arc::clone(&room)).await {
            room.remove_member(&self.id).await;
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("closing", &self.is_closing())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use shared::{CreateRoomPayload, JoinRoomPayload, SetReadyPayload};

    /// Session plus the receiving end of its outbound queue
    pub(crate) fn test_session(id: &str) -> (Arc<Session>, mpsc::Receiver<String>) {
        test_session_with_capacity(id, 64)
    }

    pub(crate) fn test_session_with_capacity(
        id: &str,
        capacity: usize,
    ) -> (Arc<Session>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Session::new(id.to_string(), tx), rx)
    }

    /// Drains every message queued so far
    pub(crate) fn drain(rx: &mut mpsc::Receiver<String>) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(data) = rx.try_recv() {
            messages.push(ServerMessage::decode(data.as_bytes()).unwrap());
        }
        messages
    }

    async fn create(session: &Arc<Session>, registry: &Arc<Registry>, name: &str) -> Arc<Room> {
        session
            .handle_message(
                registry,
                ClientMessage::CreateRoom(CreateRoomPayload {
                    name: name.to_string(),
                }),
            )
            .await;
        session.current_room().await.unwrap()
    }

    async fn join(session: &Arc<Session>, registry: &Arc<Registry>, room_id: &str) {
        session
            .handle_message(
                registry,
                ClientMessage::JoinRoom(JoinRoomPayload {
                    room_id: room_id.to_string(),
                }),
            )
            .await;
    }

    async fn ready(session: &Arc<Session>, registry: &Arc<Registry>, ready: bool) {
        session
            .handle_message(registry, ClientMessage::SetReady(SetReadyPayload { ready }))
            .await;
    }

    #[test]
    fn test_session_creation() {
        let (session, _rx) = test_session("abcdef123456");
        assert_eq!(session.id(), "abcdef123456");
        assert_eq!(session.name(), "Player-abcdef");
        assert_eq!(session.dropped_messages(), 0);
        assert!(!session.is_closing());
    }

    #[test]
    fn test_send_queues_serialized_message() {
        let (session, mut rx) = test_session("a");
        session.send_error("boom");

        let raw = rx.try_recv().unwrap();
        assert!(raw.contains("\"type\":\"error\""));
        assert_eq!(
            ServerMessage::decode(raw.as_bytes()).unwrap(),
            ServerMessage::error("boom")
        );
    }

    #[test]
    fn test_send_drops_newest_when_full() {
        let (session, mut rx) = test_session_with_capacity("a", 2);
        session.send_error("first");
        session.send_error("second");
        session.send_error("third");

        assert_eq!(session.dropped_messages(), 1);
        assert_eq!(
            drain(&mut rx),
            vec![ServerMessage::error("first"), ServerMessage::error("second")]
        );
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_ends_queue() {
        let (session, mut rx) = test_session("a");
        assert!(session.close().await);
        assert!(!session.close().await);
        assert!(session.is_closing());

        session.send_error("late");
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_set_room_refused_after_close() {
        let registry = Arc::new(Registry::new());
        let (host, _host_rx) = test_session("host");
        let room = registry.create_room("Alpha".to_string(), Arc::clone(&host)).await;

        let (late, _late_rx) = test_session("late");
        late.close().await;
        assert!(!late.set_room(room).await);
        assert!(late.current_room().await.is_none());
    }

    #[tokio::test]
    async fn test_request_rooms_lists_rooms() {
        let registry = Arc::new(Registry::new());
        let (a, mut a_rx) = test_session("a");
        let (b, mut b_rx) = test_session("b");

        create(&a, &registry, "Alpha").await;
        drain(&mut a_rx);

        b.handle_message(&registry, ClientMessage::RequestRooms).await;
        match drain(&mut b_rx).as_slice() {
            [ServerMessage::RoomList { rooms }] => {
                assert_eq!(rooms.len(), 1);
                assert_eq!(rooms[0].name, "Alpha");
                assert_eq!(rooms[0].member_count, 1);
                assert!(!rooms[0].in_progress);
            }
            other => panic!("Unexpected messages: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_create_room_sends_state_to_host() {
        let registry = Arc::new(Registry::new());
        let (a, mut a_rx) = test_session("a");

        let room = create(&a, &registry, "Alpha").await;

        match drain(&mut a_rx).as_slice() {
            [ServerMessage::RoomState(state)] => {
                assert_eq!(state.room_id, room.id());
                assert_eq!(state.room_name, "Alpha");
                assert!(state.you_are_host);
                assert_eq!(state.members.len(), 1);
            }
            other => panic!("Unexpected messages: {:?}", other),
        }
        assert_eq!(room.host_id().await, "a");
    }

    #[tokio::test]
    async fn test_create_room_leaves_previous_room() {
        let registry = Arc::new(Registry::new());
        let (a, _a_rx) = test_session("a");

        let first = create(&a, &registry, "First").await;
        let second = create(&a, &registry, "Second").await;

        assert!(registry.lookup_room(first.id()).await.is_none());
        assert!(registry.lookup_room(second.id()).await.is_some());
        assert_eq!(registry.room_count().await, 1);
    }

    #[tokio::test]
    async fn test_join_missing_room_reports_error() {
        let registry = Arc::new(Registry::new());
        let (a, mut a_rx) = test_session("a");

        join(&a, &registry, "nope").await;

        assert_eq!(drain(&mut a_rx), vec![ServerMessage::error("room not found")]);
        assert!(a.current_room().await.is_none());
    }

    #[tokio::test]
    async fn test_set_ready_outside_room_is_noop() {
        let registry = Arc::new(Registry::new());
        let (a, mut a_rx) = test_session("a");

        ready(&a, &registry, true).await;
        a.handle_message(&registry, ClientMessage::StartGame).await;
        a.handle_message(&registry, ClientMessage::LeaveRoom).await;

        assert!(drain(&mut a_rx).is_empty());
    }

    #[tokio::test]
    async fn test_invalid_frames_answered_with_errors() {
        let registry = Arc::new(Registry::new());
        let (a, mut a_rx) = test_session("a");

        a.handle_frame(&registry, b"not json").await;
        a.handle_frame(&registry, br#"{"type":"fire_shell"}"#).await;
        a.handle_frame(&registry, br#"{"type":"create_room","payload":{"name":""}}"#)
            .await;

        let messages = drain(&mut a_rx);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0], ServerMessage::error("invalid message format"));
        assert_eq!(
            messages[1],
            ServerMessage::error("unknown message type: fire_shell")
        );
        assert!(matches!(&messages[2], ServerMessage::Error { .. }));
        assert_eq!(registry.room_count().await, 0);
    }

    #[tokio::test]
    async fn test_lobby_flow_through_dispatch() {
        let registry = Arc::new(Registry::new());
        let (a, mut a_rx) = test_session("a");
        let (b, mut b_rx) = test_session("b");

        let room = create(&a, &registry, "Alpha").await;
        drain(&mut a_rx);

        join(&b, &registry, room.id()).await;
        match drain(&mut b_rx).as_slice() {
            [ServerMessage::RoomState(state)] => {
                assert_eq!(state.members.len(), 2);
                assert!(!state.you_are_host);
            }
            other => panic!("Unexpected messages: {:?}", other),
        }
        match drain(&mut a_rx).as_slice() {
            [ServerMessage::MemberJoined { member }] => assert_eq!(member.id, "b"),
            other => panic!("Unexpected messages: {:?}", other),
        }

        // Guest cannot start
        b.handle_message(&registry, ClientMessage::StartGame).await;
        assert_eq!(
            drain(&mut b_rx),
            vec![ServerMessage::error("only the host can start the game")]
        );

        ready(&a, &registry, true).await;
        ready(&b, &registry, true).await;
        let last_a = drain(&mut a_rx).pop().unwrap();
        drain(&mut b_rx);
        match last_a {
            ServerMessage::RoomState(state) => assert!(state.members.iter().all(|m| m.ready)),
            other => panic!("Unexpected message: {:?}", other),
        }

        a.handle_message(&registry, ClientMessage::StartGame).await;
        assert_eq!(
            drain(&mut a_rx),
            vec![ServerMessage::GameStarting { your_entity_id: 1 }]
        );
        assert_eq!(
            drain(&mut b_rx),
            vec![ServerMessage::GameStarting { your_entity_id: 2 }]
        );
        assert!(registry.list_room_summaries().await[0].in_progress);
    }
}
