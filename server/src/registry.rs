//! Process-wide directory of live sessions and rooms
//!
//! The registry owns every [`Session`] and [`Room`]. Each directory sits
//! behind its own lock, and neither lock is ever held while calling into a
//! room or a session: the room map is only touched for insert, lookup and
//! removal, and rooms report themselves empty through [`Registry::remove_room`]
//! after releasing their own lock.
//!
//! A registry is an ordinary value. The server creates one and hands an
//! `Arc` to every connection, and tests build isolated instances the same
//! way.

use crate::room::Room;
use crate::session::Session;
use crate::utils::generate_id;
use log::{debug, info};
use shared::{RoomId, RoomInfo, SessionId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct Registry {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
    rooms: RwLock<HashMap<RoomId, Arc<Room>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, session: Arc<Session>) {
        let id = session.id().to_string();
        let mut sessions = self.sessions.write().await;
        sessions.insert(id.clone(), session);
        info!("Session {} registered, {} connected", id, sessions.len());
    }

    /// Closes a session and removes it from the directory.
    ///
    /// The session leaves its room before it disappears from the directory,
    /// so no room ever holds a member the registry no longer knows about.
    /// Returns false if the session was not registered, which makes repeated
    /// and concurrent calls harmless.
    pub async fn unregister(&self, session_id: &str) -> bool {
        let Some(session) = self.session(session_id).await else {
            return false;
        };

        session.close().await;

        let mut sessions = self.sessions.write().await;
        if sessions.remove(session_id).is_none() {
            return false;
        }
        info!(
            "Session {} unregistered, {} connected",
            session_id,
            sessions.len()
        );
        true
    }

    pub async fn session(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Creates a room with `host` as its only member and publishes it.
    ///
    /// The host's own room reference is left to the caller.
    pub async fn create_room(self: &Arc<Self>, name: String, host: Arc<Session>) -> Arc<Room> {
        let host_id = host.id().to_string();
        let mut rooms = self.rooms.write().await;

        let mut id = generate_id();
        while rooms.contains_key(&id) {
            id = generate_id();
        }

        let room = Arc::new(Room::new(id.clone(), name, host, Arc::downgrade(self)));
        rooms.insert(id, Arc::clone(&room));

        info!(
            "Room {} ({:?}) created by {}, {} open",
            room.id(),
            room.name(),
            host_id,
            rooms.len()
        );
        room
    }

    pub async fn lookup_room(&self, room_id: &str) -> Option<Arc<Room>> {
        self.rooms.read().await.get(room_id).cloned()
    }

    /// Drops a room from the directory. Called by a room that just emptied.
    pub async fn remove_room(&self, room_id: &str) -> bool {
        let mut rooms = self.rooms.write().await;
        let removed = rooms.remove(room_id).is_some();
        if removed {
            info!("Room {} removed, {} open", room_id, rooms.len());
        }
        removed
    }

    /// Summaries of every live room, ordered by name and then id.
    pub async fn list_room_summaries(&self) -> Vec<RoomInfo> {
        let rooms: Vec<Arc<Room>> = self.rooms.read().await.values().cloned().collect();

        let mut summaries = Vec::with_capacity(rooms.len());
        for room in rooms {
            summaries.push(room.info().await);
        }
        summaries.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        summaries
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Closes every session. Each connection then winds down and unregisters
    /// itself.
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<Session>> = self.sessions.read().await.values().cloned().collect();
        info!("Shutting down {} sessions", sessions.len());

        for session in sessions {
            if session.close().await {
                debug!("Closed session {}", session.id());
            }
        }
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::RoomState;
    use crate::session::tests::{drain, test_session};
    use shared::{ClientMessage, JoinRoomPayload, ServerMessage};
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_register_and_unregister() {
        let registry = Registry::new();
        let (a, _a_rx) = test_session("a");
        let (b, _b_rx) = test_session("b");

        registry.register(Arc::clone(&a)).await;
        registry.register(Arc::clone(&b)).await;
        assert_eq!(registry.session_count().await, 2);
        assert!(registry.session("a").await.is_some());

        assert!(registry.unregister("a").await);
        assert!(a.is_closing());
        assert_eq!(registry.session_count().await, 1);
        assert!(registry.session("a").await.is_none());
    }

    #[tokio::test]
    async fn test_double_unregister_is_harmless() {
        let registry = Arc::new(Registry::new());
        let (a, _a_rx) = test_session("a");
        registry.register(a).await;

        let first = tokio::spawn({
            let registry = Arc::clone(&registry);
            async move { registry.unregister("a").await }
        });
        let second = tokio::spawn({
            let registry = Arc::clone(&registry);
            async move { registry.unregister("a").await }
        });

        let results = [first.await.unwrap(), second.await.unwrap()];
        assert_eq!(results.iter().filter(|removed| **removed).count(), 1);
        assert_eq!(registry.session_count().await, 0);
        assert!(!registry.unregister("a").await);
        assert!(!registry.unregister("never-registered").await);
    }

    #[tokio::test]
    async fn test_create_room_allocates_unique_ids() {
        let registry = Arc::new(Registry::new());
        let mut receivers = Vec::new();
        let mut ids = std::collections::HashSet::new();

        for i in 0..20 {
            let (host, rx) = test_session(&format!("host{}", i));
            receivers.push(rx);
            let room = registry.create_room(format!("Room {}", i), host).await;
            assert_eq!(room.id().len(), 32);
            ids.insert(room.id().to_string());
        }

        assert_eq!(ids.len(), 20);
        assert_eq!(registry.room_count().await, 20);
    }

    #[tokio::test]
    async fn test_lookup_and_remove_room() {
        let registry = Arc::new(Registry::new());
        let (host, _rx) = test_session("a");
        let room = registry.create_room("Alpha".to_string(), host).await;

        let found = registry.lookup_room(room.id()).await;
        assert!(found.is_some_and(|found| Arc::ptr_eq(&found, &room)));
        assert!(registry.lookup_room("missing").await.is_none());

        assert!(registry.remove_room(room.id()).await);
        assert!(!registry.remove_room(room.id()).await);
        assert!(registry.lookup_room(room.id()).await.is_none());
    }

    #[tokio::test]
    async fn test_list_room_summaries_is_sorted() {
        let registry = Arc::new(Registry::new());
        let mut receivers = Vec::new();
        for (id, name) in [("h1", "Charlie"), ("h2", "Alpha"), ("h3", "Bravo")] {
            let (host, rx) = test_session(id);
            receivers.push(rx);
            registry.create_room(name.to_string(), host).await;
        }

        let names: Vec<String> = registry
            .list_room_summaries()
            .await
            .into_iter()
            .map(|info| info.name)
            .collect();
        assert_eq!(names, vec!["Alpha", "Bravo", "Charlie"]);
    }

    #[tokio::test]
    async fn test_disconnect_scenario() {
        let registry = Arc::new(Registry::new());
        let (a, mut a_rx) = test_session("a");
        let (b, mut b_rx) = test_session("b");
        registry.register(Arc::clone(&a)).await;
        registry.register(Arc::clone(&b)).await;

        let room = registry.create_room("Alpha".to_string(), Arc::clone(&a)).await;
        assert!(a.set_room(Arc::clone(&room)).await);
        b.handle_message(
            &registry,
            ClientMessage::JoinRoom(JoinRoomPayload {
                room_id: room.id().to_string(),
            }),
        )
        .await;
        drain(&mut a_rx);
        drain(&mut b_rx);

        // B's connection drops
        assert!(registry.unregister("b").await);
        let a_messages = drain(&mut a_rx);
        assert_eq!(
            a_messages[0],
            ServerMessage::MemberLeft {
                member_id: "b".to_string()
            }
        );
        match &a_messages[1] {
            ServerMessage::RoomState(state) => {
                assert_eq!(state.members.len(), 1);
                assert!(state.you_are_host);
            }
            other => panic!("Expected room_state, got {:?}", other),
        }
        assert!(registry.session("b").await.is_none());
        assert_eq!(room.member_ids().await, vec!["a".to_string()]);

        // Then A goes too
        assert!(registry.unregister("a").await);
        assert!(registry.lookup_room(room.id()).await.is_none());
        assert_eq!(registry.room_count().await, 0);
        assert_eq!(registry.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_room_operations_report_errors() {
        let registry = Arc::new(Registry::new());
        let (a, _a_rx) = test_session("a");
        let room = registry.create_room("Alpha".to_string(), Arc::clone(&a)).await;

        assert_err!(room.try_start("b").await);
        assert_ok!(room.set_ready("a", true).await);
        assert_ok!(room.try_start("a").await);
        assert_eq!(room.state().await, RoomState::Starting);
        assert!(registry.list_room_summaries().await[0].in_progress);
    }

    #[tokio::test]
    async fn test_shutdown_closes_every_session() {
        let registry = Arc::new(Registry::new());
        let (a, mut a_rx) = test_session("a");
        let (b, mut b_rx) = test_session("b");
        registry.register(Arc::clone(&a)).await;
        registry.register(Arc::clone(&b)).await;
        let room = registry.create_room("Alpha".to_string(), Arc::clone(&a)).await;
        assert!(a.set_room(room).await);

        registry.shutdown().await;

        assert!(a.is_closing() && b.is_closing());
        assert_eq!(registry.room_count().await, 0);
        assert_eq!(a_rx.recv().await, None);
        assert_eq!(b_rx.recv().await, None);

        // Connections unregister themselves once their pumps stop
        assert!(registry.unregister("a").await);
        assert!(registry.unregister("b").await);
        assert_eq!(registry.session_count().await, 0);
    }
}
