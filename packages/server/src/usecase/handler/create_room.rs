//! UseCase: ルーム作成
//!
//! ルーム ID は作成者のユーザー ID に固定されます（1 ユーザー 1 ルーム）。
//! 作成に成功すると作成者はそのルームに参加し、ルーム作成通知が
//! このインスタンスの全ノードと他インスタンスへ送られます。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::{
    domain::{Code, Input, Method, Output, RoomError, RoomId, RoomInfo},
    usecase::{dispatcher::MessageHandler, hub::Hub, node::Node},
};

use super::{ROOM_ALREADY_CREATED, ROOM_NAME_REQUIRED};

pub struct CreateRoomHandler;

/// `"Lobby"` or `{"name": "Lobby"}`
fn requested_name(data: &Value) -> &str {
    match data {
        Value::String(name) => name.trim(),
        Value::Object(map) => map.get("name").and_then(Value::as_str).unwrap_or("").trim(),
        _ => "",
    }
}

#[async_trait]
impl MessageHandler for CreateRoomHandler {
    async fn handle(&self, hub: &Hub, node: &Arc<Node>, input: Input) {
        let request_id = input.request_id;
        let name = requested_name(&input.data);
        if name.is_empty() {
            let out = Output::error(request_id, Method::CreateRoom, Code::ValidateError, ROOM_NAME_REQUIRED);
            hub.reply(node, out).await;
            return;
        }

        let display_name = match hub.names().display_name(node.user_id()).await {
            Ok(display_name) => display_name,
            Err(e) => {
                tracing::warn!("Name lookup for user {} failed: {}", node.user_id(), e);
                hub.reply(node, Output::error(request_id, Method::CreateRoom, Code::Error, ""))
                    .await;
                return;
            }
        };

        let room = match hub.rooms().create(RoomId::from(node.user_id()), name).await {
            Ok(room) => room,
            Err(RoomError::AlreadyCreated) => {
                let out = Output::error(
                    request_id,
                    Method::CreateRoom,
                    Code::ValidateError,
                    ROOM_ALREADY_CREATED,
                );
                hub.reply(node, out).await;
                return;
            }
            Err(e) => {
                tracing::error!("Room creation for user {} failed: {}", node.user_id(), e);
                hub.reply(node, Output::error(request_id, Method::CreateRoom, Code::Error, ""))
                    .await;
                return;
            }
        };

        if let Err(e) = hub.enter_room(node, &room, &display_name).await {
            tracing::warn!("Creator {} could not join room {}: {}", node.user_id(), room.id(), e);
        }

        let info = RoomInfo {
            id: room.id(),
            name: room.name().to_string(),
        };
        hub.reply(node, Output::success(request_id, Method::CreateRoom, json!(info)))
            .await;

        let notice = hub.room_event(
            Method::CreateRoomNotice,
            json!(info),
            node.user_id(),
            display_name,
            room.id(),
        );
        hub.push_all(notice.clone()).await;
        hub.broadcast_from(node, notice).await;
    }
}
