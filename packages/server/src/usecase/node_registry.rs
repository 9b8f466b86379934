//! Global node table: at most one Node per user id on this instance.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::RwLock;

use crate::domain::UserId;

use super::node::Node;

#[derive(Default)]
pub struct NodeRegistry {
    nodes: RwLock<HashMap<UserId, Arc<Node>>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `node`, returning the node it displaced for the same user.
    pub async fn register(&self, node: Arc<Node>) -> Option<Arc<Node>> {
        let mut nodes = self.nodes.write().await;
        nodes.insert(node.user_id(), node)
    }

    pub async fn get(&self, user_id: UserId) -> Option<Arc<Node>> {
        self.nodes.read().await.get(&user_id).cloned()
    }

    /// Remove the entry for `node`'s user only if it still points at `node`.
    pub async fn remove_if_same(&self, node: &Arc<Node>) -> bool {
        let mut nodes = self.nodes.write().await;
        match nodes.get(&node.user_id()) {
            Some(current) if Arc::ptr_eq(current, node) => {
                nodes.remove(&node.user_id());
                true
            }
            _ => false,
        }
    }

    pub async fn all(&self) -> Vec<Arc<Node>> {
        self.nodes.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.nodes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.nodes.read().await.is_empty()
    }
}
