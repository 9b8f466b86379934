//! UseCase: 個別メッセージ（未対応）

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    domain::{Code, Input, Method, Output},
    usecase::{dispatcher::MessageHandler, hub::Hub, node::Node},
};

use super::{CHOOSE_RECIPIENT, ONLY_GROUP_CHAT};

/// Private messaging is not implemented; every request is answered with an error.
pub struct NormalMessageHandler;

#[async_trait]
impl MessageHandler for NormalMessageHandler {
    async fn handle(&self, hub: &Hub, node: &Arc<Node>, input: Input) {
        let out = if input.to_uid.is_none() {
            Output::error(input.request_id, Method::Normal, Code::ValidateError, CHOOSE_RECIPIENT)
        } else {
            Output::error(input.request_id, Method::Normal, Code::Error, ONLY_GROUP_CHAT)
        };
        hub.reply(node, out).await;
    }
}
