//! Hiroba IM server.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin hiroba-server
//! cargo run --bin hiroba-server -- --addr 0.0.0.0:9000 --config hiroba.toml
//! ```

use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use tokio::{net::TcpListener, sync::mpsc};

use hiroba_server::{
    config::{Config, DirectoryKind, StoreKind},
    domain::{Directory, InstanceId, MembershipStore, ServiceInstance},
    infrastructure::{
        auth::JwtAuthenticator,
        directory::{ConsulDirectory, InMemoryDirectory},
        names::StoreNameResolver,
        relay::WebSocketPeerConnector,
        repository::MembershipRepository,
        store::{InMemoryMembershipStore, RedisMembershipStore},
    },
    ui::{AppState, ConnectionSettings, RelayAuth, Server},
    usecase::{BroadcastProxy, Hub, ProxyHandle},
};
use hiroba_shared::logger::setup_logger;

#[derive(Parser, Debug)]
#[command(name = "hiroba-server")]
#[command(about = "Multi-instance IM server", long_about = None)]
struct Args {
    /// Address to bind the server to
    #[arg(short = 'a', long, default_value = "0.0.0.0:8080")]
    addr: String,

    /// Path to a TOML config file
    #[arg(short = 'f', long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize tracing
    setup_logger(env!("CARGO_BIN_NAME"), &config.log.level);

    if let Err(e) = run(args, config).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args, config: Config) -> Result<(), Box<dyn std::error::Error>> {
    // Initialize dependencies in order:
    // 1. Listener and instance identity
    // 2. Membership store and directory
    // 3. Hub and broadcast proxy
    // 4. Directory registration and topology watch
    // 5. Server

    // 1. Bind first so the advertised port is the real one
    let listener = TcpListener::bind(&args.addr).await?;
    let port = listener.local_addr()?.port();
    let instance = ServiceInstance {
        id: InstanceId::generate(&config.app.name),
        address: config.app.advertise_host.clone(),
        port,
    };
    tracing::info!("Starting instance {} at {}", instance.id, instance.authority());

    // 2. Store and directory
    let store: Arc<dyn MembershipStore> = match config.store.kind {
        StoreKind::Redis => Arc::new(RedisMembershipStore::connect(&config.store.redis_url).await?),
        StoreKind::Memory => {
            tracing::warn!("Using the in-memory membership store; rooms are not shared");
            Arc::new(InMemoryMembershipStore::new())
        }
    };
    let directory: Arc<dyn Directory> = match config.directory.kind {
        DirectoryKind::Consul => Arc::new(ConsulDirectory::new(config.directory.consul_settings())),
        DirectoryKind::Memory => Arc::new(InMemoryDirectory::new()),
    };

    // 3. Hub and proxy
    let repository = MembershipRepository::new(store);
    let names = Arc::new(
        StoreNameResolver::new(repository.clone(), config.app.anonymous_names)
            .with_cache(config.app.name_cache_capacity, config.app.name_cache_ttl()),
    );
    let (relay, outbound) = ProxyHandle::channel(instance.id.clone(), config.relay.queue_capacity.max(1));
    let hub = Arc::new(Hub::new(
        instance.clone(),
        repository,
        names,
        relay,
        config.node.hub_settings(),
    )?);
    let connector = Arc::new(
        WebSocketPeerConnector::new(
            config.relay.auth_key.clone(),
            config.relay.auth_secret.clone(),
        )
        .with_timeouts(config.relay.connect_timeout(), config.relay.write_wait()),
    );
    let proxy = BroadcastProxy::new(instance.id.clone(), connector, config.relay.proxy_settings());

    // 4. Register, then follow the healthy instance set
    directory.register(&instance).await?;
    let (topology_tx, topology_rx) = mpsc::channel(16);
    directory.watch(topology_tx);
    tokio::spawn(proxy.run(outbound, topology_rx));

    // 5. Server
    if config.jwt.secret.is_empty() {
        tracing::warn!("jwt.secret is empty; client tokens are signed with an empty key");
    }
    let authenticator = Arc::new(JwtAuthenticator::new(config.jwt.secret.as_str()));
    let state = Arc::new(AppState::new(
        hub,
        authenticator,
        ConnectionSettings {
            ping_interval: config.node.ping_interval(),
            write_wait: config.node.write_wait(),
            max_heartbeat_failures: config.node.max_heartbeat_failures,
            debug_user_id_auth: config.app.debug_user_id_auth,
        },
        RelayAuth {
            key: config.relay.auth_key,
            secret: config.relay.auth_secret,
        },
    ));

    Server::new(state, directory).run(listener).await
}
