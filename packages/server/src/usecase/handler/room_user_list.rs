//! UseCase: ルームメンバー一覧取得
//!
//! メンバー一覧はストアから取得するので、他インスタンスに接続している
//! メンバーも含まれます。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::{
    domain::{Code, Input, Method, Output, RoomError},
    usecase::{dispatcher::MessageHandler, hub::Hub, node::Node},
};

use super::{CHOOSE_ROOM, ROOM_NOT_FOUND};

pub struct RoomUserListHandler;

#[async_trait]
impl MessageHandler for RoomUserListHandler {
    async fn handle(&self, hub: &Hub, node: &Arc<Node>, input: Input) {
        let request_id = input.request_id;
        if input.room_id.is_none() {
            let out =
                Output::error(request_id, Method::RoomUserList, Code::ValidateError, CHOOSE_ROOM);
            hub.reply(node, out).await;
            return;
        }

        let out = match hub.rooms().get_room(input.room_id).await {
            Ok(room) => match hub.rooms().repository().members(room.id()).await {
                Ok(members) => Output::success(request_id, Method::RoomUserList, json!(members)),
                Err(e) => {
                    tracing::error!("Listing members of room {} failed: {}", room.id(), e);
                    Output::error(request_id, Method::RoomUserList, Code::Error, "")
                }
            },
            Err(RoomError::NotFound) => {
                Output::error(request_id, Method::RoomUserList, Code::ValidateError, ROOM_NOT_FOUND)
            }
            Err(e) => {
                tracing::error!("Room {} lookup failed: {}", input.room_id, e);
                Output::error(request_id, Method::RoomUserList, Code::Error, "")
            }
        };
        hub.reply(node, out).await;
    }
}
