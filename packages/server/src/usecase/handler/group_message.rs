//! UseCase: グループメッセージ送信
//!
//! 送信者がルームのメンバーである場合だけ、クラスタ（broadcast キュー経由）と
//! ローカルのルームメンバーに配信し、送信者に ACK を返します。

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::{
    domain::{Code, Input, Method, Output},
    usecase::{dispatcher::MessageHandler, hub::Hub, node::Node},
};

use super::{CHOOSE_ROOM, NOT_IN_ROOM};

pub struct GroupMessageHandler;

#[async_trait]
impl MessageHandler for GroupMessageHandler {
    async fn handle(&self, hub: &Hub, node: &Arc<Node>, input: Input) {
        let request_id = input.request_id;
        let room_id = input.room_id;
        if room_id.is_none() {
            let out = Output::error(request_id, Method::Group, Code::ValidateError, CHOOSE_ROOM);
            hub.reply(node, out).await;
            return;
        }

        match hub.rooms().is_in_room(node, room_id).await {
            Ok(true) => {}
            Ok(false) => {
                let out = Output::error(request_id, Method::Group, Code::ValidateError, NOT_IN_ROOM);
                hub.reply(node, out).await;
                return;
            }
            Err(e) => {
                tracing::error!("Membership check for user {} failed: {}", node.user_id(), e);
                hub.reply(node, Output::error(request_id, Method::Group, Code::Error, ""))
                    .await;
                return;
            }
        }

        let room = match hub.rooms().get_room(room_id).await {
            Ok(room) => room,
            Err(e) => {
                tracing::error!("Room {} lookup failed: {}", room_id, e);
                hub.reply(node, Output::error(request_id, Method::Group, Code::Error, ""))
                    .await;
                return;
            }
        };

        let from_username = hub.display_name_or_default(node.user_id()).await;
        let message = hub.room_event(
            Method::Group,
            input.data,
            node.user_id(),
            from_username,
            room_id,
        );
        hub.broadcast_from(node, message.clone()).await;
        hub.rooms().push(&room, &message, node.user_id()).await;

        hub.reply(node, Output::success(request_id, Method::ServiceAck, Value::Null))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::{RoomId, UserId},
        usecase::testing::{TestHub, next_relayed},
    };
    use serde_json::json;

    #[tokio::test]
    async fn test_group_message_fans_out_and_acks() {
        // テスト項目: グループメッセージは送信者以外のメンバーとクラスタに届き、送信者には ACK
        // given (前提条件):
        let TestHub { hub, mut relayed, .. } = TestHub::new();
        let room = hub.rooms().create(RoomId(42), "Lobby").await.unwrap();
        let (alice, mut alice_rx) = hub.attach(UserId(42)).await;
        let (bob, mut bob_rx) = hub.attach(UserId(7)).await;
        hub.enter_room(&alice, &room, "alice").await.unwrap();
        hub.enter_room(&bob, &room, "bob").await.unwrap();

        // when (操作):
        hub.dispatch(&alice, r#"{"request_id":"g1","method":5,"data":"hello"}"#)
            .await;

        // then (期待する結果):
        let ack = alice_rx.recv().await.unwrap();
        assert_eq!(ack.method, Method::ServiceAck);
        assert_eq!(ack.request_id, "g1");
        assert!(alice_rx.try_recv().is_err());

        let message = bob_rx.recv().await.unwrap();
        assert_eq!(message.method, Method::Group);
        assert_eq!(message.data, json!("hello"));
        assert_eq!(message.from_uid, UserId(42));
        assert_eq!(message.room_id, RoomId(42));

        let relayed_message = next_relayed(&mut relayed, Method::Group).await;
        assert_eq!(relayed_message.from_server, hub.instance().id);
    }

    #[tokio::test]
    async fn test_group_message_from_non_member_is_rejected() {
        // テスト項目: メンバーでないユーザーのグループメッセージは拒否される
        // given (前提条件):
        let TestHub { hub, .. } = TestHub::new();
        hub.rooms().create(RoomId(42), "Lobby").await.unwrap();
        let (node, mut rx) = hub.attach(UserId(7)).await;

        // when (操作):
        hub.dispatch(&node, r#"{"method":5,"room_id":42,"data":"hi"}"#).await;

        // then (期待する結果):
        let out = rx.recv().await.unwrap();
        assert_eq!(out.code, Code::ValidateError);
        assert_eq!(out.msg, NOT_IN_ROOM);
    }

    #[tokio::test]
    async fn test_group_message_adopts_room_from_store() {
        // テスト項目: 再接続したメンバーはストアのメンバーシップでそのまま送信できる
        // given (前提条件):
        let TestHub { hub, .. } = TestHub::new();
        hub.rooms().create(RoomId(42), "Lobby").await.unwrap();
        hub.rooms()
            .repository()
            .add_member(RoomId(42), UserId(7), "bob", "10.0.0.2:8080")
            .await
            .unwrap();
        let (node, mut rx) = hub.attach(UserId(7)).await;

        // when (操作):
        hub.dispatch(&node, r#"{"method":5,"room_id":42,"data":"back"}"#).await;

        // then (期待する結果):
        assert_eq!(rx.recv().await.unwrap().method, Method::ServiceAck);
        assert_eq!(node.room_id(), RoomId(42));
    }
}
