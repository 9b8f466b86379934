//! UseCase: ルーム一覧取得

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::{
    domain::{Code, Input, Method, Output},
    usecase::{dispatcher::MessageHandler, hub::Hub, node::Node},
};

pub struct RoomListHandler;

#[async_trait]
impl MessageHandler for RoomListHandler {
    async fn handle(&self, hub: &Hub, node: &Arc<Node>, input: Input) {
        let out = match hub.rooms().repository().list_rooms().await {
            Ok(rooms) => Output::success(input.request_id, Method::RoomList, json!(rooms)),
            Err(e) => {
                tracing::error!("Listing rooms failed: {}", e);
                Output::error(input.request_id, Method::RoomList, Code::Error, "")
            }
        };
        hub.reply(node, out).await;
    }
}
