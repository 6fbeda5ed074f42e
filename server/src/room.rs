//! Room membership, readiness and host tracking
//!
//! Every mutating operation runs under the room's own lock and performs all
//! of its broadcasts before releasing it, so each member's outbound queue
//! sees a room's changes in the order they happened. Sends never wait (see
//! [`Session::send`]), which keeps the critical sections short and free of
//! I/O. Unrelated rooms never contend with each other.
//!
//! Members are kept ordered by session id. That order decides host
//! reassignment (the smallest remaining id wins), the member order in
//! snapshots and the entity slot each member gets when the game starts.
//!
//! A room that loses its last member asks the [`Registry`] to drop it, after
//! its own lock has been released.

use crate::error::LobbyError;
use crate::registry::Registry;
use crate::session::Session;
use log::{debug, info};
use shared::{
    MemberInfo, RoomId, RoomInfo, RoomStatePayload, ServerMessage, SessionId, MAX_ROOM_MEMBERS,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;

/// Lifecycle of a room's match
///
/// `Waiting -> Starting -> InGame -> Ended`. Only `Waiting` admits new
/// members and ready changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomState {
    Waiting,
    Starting,
    InGame,
    Ended,
}

impl RoomState {
    pub fn is_in_progress(&self) -> bool {
        *self != RoomState::Waiting
    }
}

/// Outcome of [`Room::remove_member`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Departure {
    NotMember,
    /// Others remain; `new_host` is set when the host was the one leaving.
    Remaining { new_host: Option<SessionId> },
    /// The room is now empty and has been dropped from the registry.
    Emptied,
}

struct Member {
    session: Arc<Session>,
    ready: bool,
}

struct RoomInner {
    host_id: SessionId,
    state: RoomState,
    members: BTreeMap<SessionId, Member>,
}

impl RoomInner {
    fn broadcast(&self, message: &ServerMessage) {
        for member in self.members.values() {
            member.session.send(message);
        }
    }

    fn member_info(&self, id: &str, member: &Member) -> MemberInfo {
        MemberInfo {
            id: id.to_string(),
            name: member.session.name().to_string(),
            ready: member.ready,
            is_host: id == self.host_id,
        }
    }
}

pub struct Room {
    id: RoomId,
    name: String,
    registry: Weak<Registry>,
    inner: Mutex<RoomInner>,
}

impl Room {
    /// Creates a waiting room with `host` as its only member.
    pub fn new(id: RoomId, name: String, host: Arc<Session>, registry: Weak<Registry>) -> Self {
        let host_id = host.id().to_string();
        let mut members = BTreeMap::new();
        members.insert(
            host_id.clone(),
            Member {
                session: host,
                ready: false,
            },
        );

        Self {
            id,
            name,
            registry,
            inner: Mutex::new(RoomInner {
                host_id,
                state: RoomState::Waiting,
                members,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn state(&self) -> RoomState {
        self.inner.lock().await.state
    }

    pub async fn host_id(&self) -> SessionId {
        self.inner.lock().await.host_id.clone()
    }

    pub async fn member_ids(&self) -> Vec<SessionId> {
        self.inner.lock().await.members.keys().cloned().collect()
    }

    pub async fn is_ready(&self, session_id: &str) -> Option<bool> {
        self.inner
            .lock()
            .await
            .members
            .get(session_id)
            .map(|member| member.ready)
    }

    /// Listing summary, consistent with some ordering of this room's
    /// mutations.
    pub async fn info(&self) -> RoomInfo {
        let inner = self.inner.lock().await;
        RoomInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            member_count: inner.members.len(),
            max_members: MAX_ROOM_MEMBERS,
            in_progress: inner.state.is_in_progress(),
        }
    }

    /// Adds a member, notifying the others and sending the newcomer a full
    /// snapshot.
    ///
    /// Fails with `RoomNotFound` if the room has already emptied, then in
    /// order with `GameInProgress`, `RoomFull` and `AlreadyMember`. A failed
    /// call changes nothing.
    pub async fn add_member(&self, session: Arc<Session>) -> Result<(), LobbyError> {
        let mut inner = self.inner.lock().await;

        if inner.members.is_empty() {
            return Err(LobbyError::RoomNotFound);
        }
        if inner.state != RoomState::Waiting {
            return Err(LobbyError::GameInProgress);
        }
        if inner.members.len() >= MAX_ROOM_MEMBERS {
            return Err(LobbyError::RoomFull);
        }
        if inner.members.contains_key(session.id()) {
            return Err(LobbyError::AlreadyMember);
        }

        // Others get the incremental notice, the newcomer gets the snapshot
        let joined = ServerMessage::MemberJoined {
            member: MemberInfo {
                id: session.id().to_string(),
                name: session.name().to_string(),
                ready: false,
                is_host: false,
            },
        };
        inner.broadcast(&joined);

        inner.members.insert(
            session.id().to_string(),
            Member {
                session: Arc::clone(&session),
                ready: false,
            },
        );
        session.send(&self.snapshot_for(&inner, session.id()));

        info!(
            "Session {} joined room {} ({}/{})",
            session.id(),
            self.id,
            inner.members.len(),
            MAX_ROOM_MEMBERS
        );
        Ok(())
    }

    /// Removes a member, reassigning the host if needed.
    ///
    /// Remaining members get `member_left` followed by a fresh snapshot. When
    /// the last member leaves nothing is broadcast and the room is dropped
    /// from the registry.
    pub async fn remove_member(&self, session_id: &str) -> Departure {
        let departure = {
            let mut inner = self.inner.lock().await;

            if inner.members.remove(session_id).is_none() {
                return Departure::NotMember;
            }

            if inner.members.is_empty() {
                Departure::Emptied
            } else {
                let mut new_host = None;
                if inner.host_id == session_id {
                    if let Some(next) = inner.members.keys().next().cloned() {
                        info!("Room {} host moved from {} to {}", self.id, session_id, next);
                        inner.host_id = next.clone();
                        new_host = Some(next);
                    }
                }

                inner.broadcast(&ServerMessage::MemberLeft {
                    member_id: session_id.to_string(),
                });
                self.broadcast_state(&inner);

                Departure::Remaining { new_host }
            }
        };

        if departure == Departure::Emptied {
            debug!("Room {} is empty", self.id);
            if let Some(registry) = self.registry.upgrade() {
                registry.remove_room(&self.id).await;
            }
        } else {
            debug!("Session {} left room {}", session_id, self.id);
        }

        departure
    }

    /// Sets a member's ready flag and rebroadcasts the snapshot, even when
    /// the flag did not change.
    ///
    /// Unknown members are ignored.
    pub async fn set_ready(&self, session_id: &str, ready: bool) -> Result<(), LobbyError> {
        let mut inner = self.inner.lock().await;

        if !inner.members.contains_key(session_id) {
            return Ok(());
        }
        if inner.state != RoomState::Waiting {
            return Err(LobbyError::GameInProgress);
        }

        if let Some(member) = inner.members.get_mut(session_id) {
            member.ready = ready;
        }
        self.broadcast_state(&inner);
        Ok(())
    }

    /// Moves the room from `Waiting` to `Starting`.
    ///
    /// Only the host may start, and only once every member is ready. Each
    /// member is sent its own entity slot, numbered from 1 in member order.
    pub async fn try_start(&self, session_id: &str) -> Result<(), LobbyError> {
        let mut inner = self.inner.lock().await;

        if inner.host_id != session_id {
            return Err(LobbyError::NotHost);
        }
        if inner.state != RoomState::Waiting {
            return Err(LobbyError::GameInProgress);
        }
        if !inner.members.values().all(|member| member.ready) {
            return Err(LobbyError::NotAllReady);
        }

        inner.state = RoomState::Starting;
        for (slot, member) in (1u32..).zip(inner.members.values()) {
            member.session.send(&ServerMessage::GameStarting {
                your_entity_id: slot,
            });
        }

        info!(
            "Room {} starting with {} players",
            self.id,
            inner.members.len()
        );
        Ok(())
    }

    /// Advances a started match: `Starting -> InGame -> Ended`.
    pub async fn advance(&self) -> Result<RoomState, LobbyError> {
        let mut inner = self.inner.lock().await;

        let next = match inner.state {
            RoomState::Waiting => return Err(LobbyError::GameNotStarting),
            RoomState::Starting => RoomState::InGame,
            RoomState::InGame => RoomState::Ended,
            RoomState::Ended => return Err(LobbyError::GameEnded),
        };

        debug!("Room {} moved from {:?} to {:?}", self.id, inner.state, next);
        inner.state = next;
        Ok(next)
    }

    pub async fn send_state_to_all(&self) {
        let inner = self.inner.lock().await;
        self.broadcast_state(&inner);
    }

    fn broadcast_state(&self, inner: &RoomInner) {
        for (id, member) in &inner.members {
            member.session.send(&self.snapshot_for(inner, id));
        }
    }

    fn snapshot_for(&self, inner: &RoomInner, recipient: &str) -> ServerMessage {
        let members = inner
            .members
            .iter()
            .map(|(id, member)| inner.member_info(id, member))
            .collect();

        ServerMessage::RoomState(RoomStatePayload {
            room_id: self.id.clone(),
            room_name: self.name.clone(),
            members,
            you_are_host: recipient == inner.host_id,
        })
    }
}

impl std::fmt::Debug for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Room")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}
