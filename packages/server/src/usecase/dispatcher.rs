//! Message Dispatcher
//!
//! method → handler のテーブルです。テーブルは起動時に一度だけ組み立て、
//! 同じ method の二重登録は `RegisterError` になります（テストで検証）。

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;

use crate::domain::{Code, Input, Method, Output};

use super::{
    error::RegisterError,
    handler::{
        CreateRoomHandler, CreateRoomNoticeHandler, GroupMessageHandler, JoinRoomHandler,
        NormalMessageHandler, OfflineHandler, RoomListHandler, RoomUserListHandler,
    },
    hub::Hub,
    node::Node,
};

pub const MALFORMED_MESSAGE: &str = "malformed message";
pub const UNKNOWN_METHOD: &str = "unknown method";

/// One client-facing message method.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// `input.room_id` is already defaulted to the node's current room.
    async fn handle(&self, hub: &Hub, node: &Arc<Node>, input: Input);
}

pub struct Dispatcher {
    handlers: HashMap<Method, Box<dyn MessageHandler>>,
}

impl Dispatcher {
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// The table every instance serves.
    pub fn standard() -> Result<Self, RegisterError> {
        let mut dispatcher = Self::empty();
        dispatcher.register(Method::CreateRoom, CreateRoomHandler)?;
        dispatcher.register(Method::JoinRoom, JoinRoomHandler)?;
        dispatcher.register(Method::RoomList, RoomListHandler)?;
        dispatcher.register(Method::RoomUserList, RoomUserListHandler)?;
        dispatcher.register(Method::Group, GroupMessageHandler)?;
        dispatcher.register(Method::Normal, NormalMessageHandler)?;
        dispatcher.register(Method::CreateRoomNotice, CreateRoomNoticeHandler)?;
        dispatcher.register(Method::Offline, OfflineHandler)?;
        Ok(dispatcher)
    }

    pub fn register(
        &mut self,
        method: Method,
        handler: impl MessageHandler + 'static,
    ) -> Result<(), RegisterError> {
        if self.handlers.contains_key(&method) {
            return Err(RegisterError::Duplicate(method));
        }
        self.handlers.insert(method, Box::new(handler));
        Ok(())
    }

    pub fn methods(&self) -> Vec<Method> {
        let mut methods: Vec<Method> = self.handlers.keys().copied().collect();
        methods.sort();
        methods
    }

    pub async fn dispatch(&self, hub: &Hub, node: &Arc<Node>, frame: &str) {
        let mut input = match Input::decode(frame) {
            Ok(input) => input,
            Err(e) => {
                tracing::warn!("Malformed frame from user {}: {}", node.user_id(), e);
                hub.reply(node, Output::notice(MALFORMED_MESSAGE)).await;
                return;
            }
        };
        if input.room_id.is_none() {
            input.room_id = node.room_id();
        }

        let handler = Method::try_from(input.method)
            .ok()
            .and_then(|method| self.handlers.get(&method));
        let Some(handler) = handler else {
            tracing::warn!("Unknown method {} from user {}", input.method, node.user_id());
            let out = Output::error(
                input.request_id,
                Method::ServiceNotice,
                Code::ValidateError,
                UNKNOWN_METHOD,
            );
            hub.reply(node, out).await;
            return;
        };

        tracing::debug!("User {} -> method {}", node.user_id(), input.method);
        handler.handle(hub, node, input).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{domain::UserId, usecase::testing::TestHub};

    #[test]
    fn test_standard_table_has_no_duplicates() {
        // テスト項目: 標準テーブルが重複なく組み立てられる
        // when (操作):
        let dispatcher = Dispatcher::standard().unwrap();

        // then (期待する結果):
        assert_eq!(
            dispatcher.methods(),
            vec![
                Method::CreateRoom,
                Method::JoinRoom,
                Method::RoomList,
                Method::RoomUserList,
                Method::Group,
                Method::Normal,
                Method::Offline,
                Method::CreateRoomNotice,
            ]
        );
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        // テスト項目: 同じ method の二重登録はエラー
        // given (前提条件):
        let mut dispatcher = Dispatcher::empty();
        dispatcher
            .register(Method::RoomList, RoomListHandler)
            .unwrap();

        // when (操作):
        let result = dispatcher.register(Method::RoomList, RoomListHandler);

        // then (期待する結果):
        assert_eq!(result, Err(RegisterError::Duplicate(Method::RoomList)));
    }

    #[tokio::test]
    async fn test_malformed_frame_gets_validation_error() {
        // テスト項目: 不正なフレームにはバリデーションエラーを返し、接続は閉じない
        // given (前提条件):
        let TestHub { hub, .. } = TestHub::new();
        let (node, mut rx) = hub.attach(UserId(1)).await;

        // when (操作):
        hub.dispatch(&node, "{not json").await;

        // then (期待する結果):
        let out = rx.recv().await.unwrap();
        assert_eq!(out.code, Code::ValidateError);
        assert_eq!(out.method, Method::ServiceNotice);
        assert_eq!(out.msg, MALFORMED_MESSAGE);
        assert!(!node.is_closed());
    }

    #[tokio::test]
    async fn test_unknown_and_server_only_methods_are_rejected() {
        // テスト項目: 未知の method やサーバー内部用の method は処理されない
        // given (前提条件):
        let TestHub { hub, .. } = TestHub::new();
        let (node, mut rx) = hub.attach(UserId(1)).await;

        // when (操作):
        hub.dispatch(&node, r#"{"request_id":"r1","method":77}"#).await;
        hub.dispatch(&node, r#"{"request_id":"r2","method":103}"#).await;

        // then (期待する結果):
        for expected in ["r1", "r2"] {
            let out = rx.recv().await.unwrap();
            assert_eq!(out.request_id, expected);
            assert_eq!(out.code, Code::ValidateError);
            assert_eq!(out.msg, UNKNOWN_METHOD);
        }
        assert!(!node.is_closed());
    }
}
