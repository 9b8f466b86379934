//! UseCase: 明示的なオフライン（退出）
//!
//! Node を閉じます。close の中でオフライン通知がルームとクラスタへ送られてから
//! メンバーシップが削除されます。

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    domain::Input,
    usecase::{dispatcher::MessageHandler, hub::Hub, node::Node},
};

pub struct OfflineHandler;

#[async_trait]
impl MessageHandler for OfflineHandler {
    async fn handle(&self, hub: &Hub, node: &Arc<Node>, _input: Input) {
        tracing::info!("User {} went offline", node.user_id());
        hub.close_node(node).await;
    }
}
