//! UseCase: ルーム作成通知の自己配信

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    domain::{Input, Method},
    usecase::{dispatcher::MessageHandler, hub::Hub, node::Node},
};

/// Echoes a create-room announcement back to its sender.
pub struct CreateRoomNoticeHandler;

#[async_trait]
impl MessageHandler for CreateRoomNoticeHandler {
    async fn handle(&self, hub: &Hub, node: &Arc<Node>, input: Input) {
        let from_username = hub.display_name_or_default(node.user_id()).await;
        let mut notice = hub.room_event(
            Method::CreateRoomNotice,
            input.data,
            node.user_id(),
            from_username,
            input.room_id,
        );
        notice.request_id = input.request_id;
        hub.reply(node, notice).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{domain::UserId, usecase::testing::TestHub};
    use serde_json::json;

    #[tokio::test]
    async fn test_notice_is_delivered_to_sender_only() {
        // テスト項目: ルーム作成通知は送信者自身にだけ届く
        // given (前提条件):
        let TestHub { hub, .. } = TestHub::new();
        let (node, mut rx) = hub.attach(UserId(7)).await;
        let (_other, mut other_rx) = hub.attach(UserId(8)).await;

        // when (操作):
        hub.dispatch(&node, r#"{"request_id":"n","method":9,"data":{"id":7,"name":"Mine"}}"#)
            .await;

        // then (期待する結果):
        let out = rx.recv().await.unwrap();
        assert_eq!(out.method, Method::CreateRoomNotice);
        assert_eq!(out.data, json!({"id": 7, "name": "Mine"}));
        assert!(other_rx.try_recv().is_err());
    }
}
