use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

pub const MAX_ROOM_MEMBERS: usize = 4;
pub const MAX_ROOM_NAME_LEN: usize = 32;

pub type SessionId = String;
pub type RoomId = String;

/// Every message kind that can appear in the `type` field of an envelope.
///
/// The first six travel client -> server, the rest server -> client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    RequestRooms,
    CreateRoom,
    JoinRoom,
    LeaveRoom,
    SetReady,
    StartGame,

    RoomList,
    RoomState,
    MemberJoined,
    MemberLeft,
    Error,
    GameStarting,
}

impl MessageKind {
    pub const ALL: [MessageKind; 12] = [
        MessageKind::RequestRooms,
        MessageKind::CreateRoom,
        MessageKind::JoinRoom,
        MessageKind::LeaveRoom,
        MessageKind::SetReady,
        MessageKind::StartGame,
        MessageKind::RoomList,
        MessageKind::RoomState,
        MessageKind::MemberJoined,
        MessageKind::MemberLeft,
        MessageKind::Error,
        MessageKind::GameStarting,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::RequestRooms => "request_rooms",
            MessageKind::CreateRoom => "create_room",
            MessageKind::JoinRoom => "join_room",
            MessageKind::LeaveRoom => "leave_room",
            MessageKind::SetReady => "set_ready",
            MessageKind::StartGame => "start_game",
            MessageKind::RoomList => "room_list",
            MessageKind::RoomState => "room_state",
            MessageKind::MemberJoined => "member_joined",
            MessageKind::MemberLeft => "member_left",
            MessageKind::Error => "error",
            MessageKind::GameStarting => "game_starting",
        }
    }

    pub fn parse(kind: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == kind)
    }

    pub fn is_client_kind(&self) -> bool {
        matches!(
            self,
            MessageKind::RequestRooms
                | MessageKind::CreateRoom
                | MessageKind::JoinRoom
                | MessageKind::LeaveRoom
                | MessageKind::SetReady
                | MessageKind::StartGame
        )
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Not JSON, or JSON without a string `type` field.
    #[error("invalid message format")]
    Malformed { reason: String },
    #[error("unknown message type: {0}")]
    UnknownKind(String),
    /// A known kind arriving in the wrong direction.
    #[error("unexpected message type: {0}")]
    UnexpectedKind(MessageKind),
    #[error("invalid {kind} payload: {reason}")]
    MalformedPayload { kind: MessageKind, reason: String },
}

impl ProtocolError {
    fn payload(kind: MessageKind, reason: impl fmt::Display) -> Self {
        ProtocolError::MalformedPayload {
            kind,
            reason: reason.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRoomPayload {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRoomPayload {
    pub room_id: RoomId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetReadyPayload {
    pub ready: bool,
}

/// Messages a client sends to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientMessage {
    RequestRooms,
    CreateRoom(CreateRoomPayload),
    JoinRoom(JoinRoomPayload),
    LeaveRoom,
    SetReady(SetReadyPayload),
    StartGame,
}

impl ClientMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            ClientMessage::RequestRooms => MessageKind::RequestRooms,
            ClientMessage::CreateRoom(_) => MessageKind::CreateRoom,
            ClientMessage::JoinRoom(_) => MessageKind::JoinRoom,
            ClientMessage::LeaveRoom => MessageKind::LeaveRoom,
            ClientMessage::SetReady(_) => MessageKind::SetReady,
            ClientMessage::StartGame => MessageKind::StartGame,
        }
    }

    /// Decodes one inbound frame into a typed message.
    ///
    /// The envelope is parsed first, then the payload is decoded against the
    /// shape required by its kind. Kinds without a payload accept a missing,
    /// `null` or object payload.
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        let raw: RawEnvelope =
            serde_json::from_slice(data).map_err(|e| ProtocolError::Malformed {
                reason: e.to_string(),
            })?;

        let kind =
            MessageKind::parse(&raw.kind).ok_or_else(|| ProtocolError::UnknownKind(raw.kind))?;

        match kind {
            MessageKind::RequestRooms => expect_empty(kind, raw.payload).map(|_| Self::RequestRooms),
            MessageKind::LeaveRoom => expect_empty(kind, raw.payload).map(|_| Self::LeaveRoom),
            MessageKind::StartGame => expect_empty(kind, raw.payload).map(|_| Self::StartGame),
            MessageKind::CreateRoom => {
                let payload: CreateRoomPayload = decode_payload(kind, raw.payload)?;
                let name = payload.name.trim();
                if name.is_empty() {
                    return Err(ProtocolError::payload(kind, "room name must not be empty"));
                }
                if name.chars().count() > MAX_ROOM_NAME_LEN {
                    return Err(ProtocolError::payload(
                        kind,
                        format!("room name longer than {} characters", MAX_ROOM_NAME_LEN),
                    ));
                }
                Ok(Self::CreateRoom(CreateRoomPayload {
                    name: name.to_string(),
                }))
            }
            MessageKind::JoinRoom => {
                let payload: JoinRoomPayload = decode_payload(kind, raw.payload)?;
                if payload.room_id.is_empty() {
                    return Err(ProtocolError::payload(kind, "room id must not be empty"));
                }
                Ok(Self::JoinRoom(payload))
            }
            MessageKind::SetReady => decode_payload(kind, raw.payload).map(Self::SetReady),
            other => Err(ProtocolError::UnexpectedKind(other)),
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

fn expect_empty(kind: MessageKind, payload: Value) -> Result<(), ProtocolError> {
    match payload {
        Value::Null | Value::Object(_) => Ok(()),
        other => Err(ProtocolError::payload(
            kind,
            format!("expected an empty payload, got {}", other),
        )),
    }
}

fn decode_payload<T>(kind: MessageKind, payload: Value) -> Result<T, ProtocolError>
where
    T: for<'de> Deserialize<'de>,
{
    serde_json::from_value(payload).map_err(|e| ProtocolError::payload(kind, e))
}

/// Summary of one room, as shown in the room list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomInfo {
    pub id: RoomId,
    pub name: String,
    pub member_count: usize,
    pub max_members: usize,
    pub in_progress: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberInfo {
    pub id: SessionId,
    pub name: String,
    pub ready: bool,
    pub is_host: bool,
}

/// Full room snapshot, personalised for the receiving member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomStatePayload {
    pub room_id: RoomId,
    pub room_name: String,
    pub members: Vec<MemberInfo>,
    pub you_are_host: bool,
}

/// Messages the server sends to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerMessage {
    RoomList { rooms: Vec<RoomInfo> },
    RoomState(RoomStatePayload),
    MemberJoined { member: MemberInfo },
    MemberLeft { member_id: SessionId },
    Error { message: String },
    GameStarting { your_entity_id: u32 },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            ServerMessage::RoomList { .. } => MessageKind::RoomList,
            ServerMessage::RoomState(_) => MessageKind::RoomState,
            ServerMessage::MemberJoined { .. } => MessageKind::MemberJoined,
            ServerMessage::MemberLeft { .. } => MessageKind::MemberLeft,
            ServerMessage::Error { .. } => MessageKind::Error,
            ServerMessage::GameStarting { .. } => MessageKind::GameStarting,
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(data).map_err(|e| ProtocolError::Malformed {
            reason: e.to_string(),
        })
    }
}
