//! InMemory Directory 実装
//!
//! `tokio::sync::watch` でインスタンス一覧を保持します。複数インスタンスを
//! 1 プロセス内で動かすテストや、Consul なしの単体起動で使用します。

use async_trait::async_trait;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};

use crate::domain::{Directory, DirectoryError, InstanceId, ServiceInstance};

/// インメモリ Directory 実装
pub struct InMemoryDirectory {
    instances: watch::Sender<Vec<ServiceInstance>>,
}

impl Default for InMemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        let (instances, _) = watch::channel(Vec::new());
        Self { instances }
    }
}

#[async_trait]
impl Directory for InMemoryDirectory {
    async fn register(&self, instance: &ServiceInstance) -> Result<(), DirectoryError> {
        self.instances.send_modify(|list| {
            list.retain(|i| i.id != instance.id);
            list.push(instance.clone());
            list.sort_by(|a, b| a.id.cmp(&b.id));
        });
        tracing::debug!("Instance {} registered (in-memory)", instance.id);
        Ok(())
    }

    async fn deregister(&self, instance_id: &InstanceId) -> Result<(), DirectoryError> {
        self.instances
            .send_modify(|list| list.retain(|i| &i.id != instance_id));
        tracing::debug!("Instance {} deregistered (in-memory)", instance_id);
        Ok(())
    }

    async fn healthy_instances(&self) -> Result<Vec<ServiceInstance>, DirectoryError> {
        Ok(self.instances.borrow().clone())
    }

    fn watch(&self, on_change: mpsc::Sender<Vec<ServiceInstance>>) -> JoinHandle<()> {
        let mut rx = self.instances.subscribe();
        tokio::spawn(async move {
            loop {
                let current = rx.borrow_and_update().clone();
                if on_change.send(current).await.is_err() {
                    break;
                }
                if rx.changed().await.is_err() {
                    break;
                }
            }
        })
    }
}
