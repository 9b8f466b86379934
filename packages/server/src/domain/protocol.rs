//! Wire protocol shared by clients and relay peers.
//!
//! Clients send [`Input`] envelopes and receive [`Output`] envelopes. Relay
//! peers exchange [`Output`] envelopes tagged with `from_server`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::value_object::{InstanceId, RoomId, UserId};

/// Message method carried by every envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Method {
    CreateRoom = 1,
    JoinRoom = 2,
    RoomList = 3,
    RoomUserList = 4,
    Group = 5,
    Normal = 6,
    Online = 7,
    Offline = 8,
    CreateRoomNotice = 9,
    /// Server-originated notice (errors, auth failures, ...)
    ServiceNotice = 100,
    ServiceAck = 101,
    NewRoomNotice = 102,
    ForceOfflineBroadcast = 103,
}

impl Method {
    pub const ALL: [Method; 13] = [
        Method::CreateRoom,
        Method::JoinRoom,
        Method::RoomList,
        Method::RoomUserList,
        Method::Group,
        Method::Normal,
        Method::Online,
        Method::Offline,
        Method::CreateRoomNotice,
        Method::ServiceNotice,
        Method::ServiceAck,
        Method::NewRoomNotice,
        Method::ForceOfflineBroadcast,
    ];

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl From<Method> for u8 {
    fn from(method: Method) -> Self {
        method as u8
    }
}

impl TryFrom<u8> for Method {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, String> {
        Method::ALL
            .into_iter()
            .find(|m| m.as_u8() == value)
            .ok_or_else(|| format!("unknown method {}", value))
    }
}

/// Status code of an outbound envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum Code {
    #[default]
    Success = 0,
    Error = 501,
    AuthError = 40001,
    ValidateError = 40002,
}

impl Code {
    /// Display text used when an envelope carries no explicit message.
    pub fn name(self) -> &'static str {
        match self {
            Code::Success => "ok",
            Code::Error => "server busy, please try again later",
            Code::AuthError => "authorization failed, please sign in again",
            Code::ValidateError => "validation error",
        }
    }
}

impl From<Code> for i32 {
    fn from(code: Code) -> Self {
        code as i32
    }
}

impl TryFrom<i32> for Code {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, String> {
        match value {
            0 => Ok(Code::Success),
            501 => Ok(Code::Error),
            40001 => Ok(Code::AuthError),
            40002 => Ok(Code::ValidateError),
            other => Err(format!("unknown code {}", other)),
        }
    }
}

/// Inbound client envelope.
///
/// `method` stays a raw byte so that an unknown method can be answered with a
/// validation error instead of failing the decode.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Input {
    #[serde(default)]
    pub request_id: String,
    pub method: u8,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub room_id: RoomId,
    #[serde(default)]
    pub to_uid: UserId,
}

impl Input {
    pub fn decode(frame: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(frame)
    }

    pub fn new(method: Method, room_id: RoomId, data: Value) -> Self {
        Self {
            request_id: String::new(),
            method: method.as_u8(),
            data,
            room_id,
            to_uid: UserId::default(),
        }
    }
}

/// Outbound envelope, written to clients and exchanged between relay peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Output {
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub code: Code,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub msg: String,
    pub method: Method,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "user_is_none")]
    pub from_uid: UserId,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub from_username: String,
    #[serde(default, skip_serializing_if = "room_is_none")]
    pub room_id: RoomId,
    #[serde(default, skip_serializing_if = "user_is_none")]
    pub to_uid: UserId,
    #[serde(default, skip_serializing_if = "instance_is_empty")]
    pub from_server: InstanceId,
}

fn user_is_none(id: &UserId) -> bool {
    id.is_none()
}

fn room_is_none(id: &RoomId) -> bool {
    id.is_none()
}

fn instance_is_empty(id: &InstanceId) -> bool {
    id.as_str().is_empty()
}

impl Output {
    fn bare(method: Method, code: Code) -> Self {
        Self {
            request_id: String::new(),
            code,
            msg: String::new(),
            method,
            data: Value::Null,
            from_uid: UserId::default(),
            from_username: String::new(),
            room_id: RoomId::NONE,
            to_uid: UserId::default(),
            from_server: InstanceId::default(),
        }
    }

    pub fn success(request_id: impl Into<String>, method: Method, data: Value) -> Self {
        Self {
            request_id: request_id.into(),
            data,
            ..Self::bare(method, Code::Success)
        }
    }

    pub fn error(
        request_id: impl Into<String>,
        method: Method,
        code: Code,
        msg: impl Into<String>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            msg: msg.into(),
            ..Self::bare(method, code)
        }
    }

    /// A service notice with a plain-text payload.
    pub fn notice(msg: impl Into<String>) -> Self {
        Self::error("", Method::ServiceNotice, Code::ValidateError, msg)
    }

    pub fn decode(frame: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(frame)
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Frame written to a client: the room id is the recipient's current room
    /// and an empty `msg` carries the code's display text.
    pub fn to_client_frame(&self, recipient_room: RoomId) -> Result<String, serde_json::Error> {
        let mut out = self.clone();
        out.room_id = recipient_room;
        if out.msg.is_empty() {
            out.msg = out.code.name().to_string();
        }
        out.encode()
    }
}

/// Member entry of a room roster and payload of online/offline events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserItem {
    pub id: UserId,
    pub name: String,
}

/// Room summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomInfo {
    pub id: RoomId,
    pub name: String,
}
