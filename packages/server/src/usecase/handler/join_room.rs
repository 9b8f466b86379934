//! UseCase: ルーム参加
//!
//! ## 処理の流れ
//!
//! 1. ルーム ID とルームの存在を確認
//! 2. 表示名を解決（失敗はリトライ可能なエラーとして返す）
//! 3. 参加（別のルームにいれば先に静かに退出）
//! 4. ルーム全体（ローカル + クラスタ）へオンライン通知
//! 5. 参加者にルーム情報で ACK

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::{
    domain::{Code, Input, Method, Output, RoomError, RoomInfo, UserItem},
    usecase::{dispatcher::MessageHandler, hub::Hub, node::Node},
};

use super::{CHOOSE_ROOM, ROOM_NOT_FOUND};

pub struct JoinRoomHandler;

#[async_trait]
impl MessageHandler for JoinRoomHandler {
    async fn handle(&self, hub: &Hub, node: &Arc<Node>, input: Input) {
        let request_id = input.request_id;
        if input.room_id.is_none() {
            let out = Output::error(request_id, Method::JoinRoom, Code::ValidateError, CHOOSE_ROOM);
            hub.reply(node, out).await;
            return;
        }

        let room = match hub.rooms().get_room(input.room_id).await {
            Ok(room) => room,
            Err(RoomError::NotFound) => {
                let out =
                    Output::error(request_id, Method::JoinRoom, Code::ValidateError, ROOM_NOT_FOUND);
                hub.reply(node, out).await;
                return;
            }
            Err(e) => {
                tracing::error!("Room {} lookup failed: {}", input.room_id, e);
                hub.reply(node, Output::error(request_id, Method::JoinRoom, Code::Error, ""))
                    .await;
                return;
            }
        };

        let display_name = match hub.names().display_name(node.user_id()).await {
            Ok(display_name) => display_name,
            Err(e) => {
                tracing::warn!("Name lookup for user {} failed: {}", node.user_id(), e);
                hub.reply(node, Output::error(request_id, Method::JoinRoom, Code::Error, ""))
                    .await;
                return;
            }
        };

        if let Err(e) = hub.enter_room(node, &room, &display_name).await {
            tracing::error!("User {} failed to join room {}: {}", node.user_id(), room.id(), e);
            hub.reply(node, Output::error(request_id, Method::JoinRoom, Code::Error, ""))
                .await;
            return;
        }

        let item = UserItem {
            id: node.user_id(),
            name: display_name.clone(),
        };
        let online = hub.room_event(
            Method::Online,
            json!(item),
            node.user_id(),
            display_name,
            room.id(),
        );
        hub.broadcast_from(node, online.clone()).await;
        hub.rooms().push(&room, &online, node.user_id()).await;

        let info = RoomInfo {
            id: room.id(),
            name: room.name().to_string(),
        };
        hub.reply(node, Output::success(request_id, Method::JoinRoom, json!(info)))
            .await;
    }
}
