//! Test fixtures for the usecase layer.

use std::{sync::Arc, time::Duration};

use tokio::sync::mpsc;

use crate::{
    domain::{Method, NameResolver, Output, ServiceInstance},
    infrastructure::{
        names::StoreNameResolver, repository::MembershipRepository,
        store::InMemoryMembershipStore,
    },
};

use super::{
    hub::{Hub, HubSettings},
    proxy::ProxyHandle,
};

/// A Hub over an in-memory store whose relay traffic lands in `relayed`.
pub(crate) struct TestHub {
    pub hub: Arc<Hub>,
    pub relayed: mpsc::Receiver<Output>,
}

impl TestHub {
    /// Unknown users resolve to `user-<id>`.
    pub fn new() -> Self {
        let store = Arc::new(InMemoryMembershipStore::new());
        let names = Arc::new(StoreNameResolver::new(
            MembershipRepository::new(store.clone()),
            true,
        ));
        Self::build(store, names)
    }

    pub fn with_names(names: Arc<dyn NameResolver>) -> Self {
        Self::build(Arc::new(InMemoryMembershipStore::new()), names)
    }

    fn build(store: Arc<InMemoryMembershipStore>, names: Arc<dyn NameResolver>) -> Self {
        let instance = ServiceInstance::new("hiroba_test", "127.0.0.1", 8080);
        let (relay, relayed) = ProxyHandle::channel(instance.id.clone(), 1024);
        let hub = Hub::new(
            instance,
            MembershipRepository::new(store),
            names,
            relay,
            HubSettings {
                queue_capacity: 64,
                push_timeout: Duration::from_millis(100),
            },
        )
        .unwrap();
        Self {
            hub: Arc::new(hub),
            relayed,
        }
    }
}

/// Next relayed message with `method`, skipping everything else.
pub(crate) async fn next_relayed(rx: &mut mpsc::Receiver<Output>, method: Method) -> Output {
    loop {
        let out = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for relayed message")
            .expect("relay channel closed");
        if out.method == method {
            return out;
        }
    }
}
