//! LSNP node -- peer-to-peer social client over LAN UDP.
//!
//! Usage:
//!   lsnp-node alice@192.168.1.10 Alice            # join with defaults
//!   lsnp-node alice@192.168.1.10 --port 51000     # non-default port
//!   lsnp-node --config path.toml --verbose        # identity from config

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use lsnp_node::announce_task;
use lsnp_node::config::NodeConfig;
use lsnp_node::console;
use lsnp_node::retry_task;
use lsnp_node::socket_task::{self, forward_all, Route};
use lsnp_node::{expand_tilde, load_avatar, NodeState, Now};
use lsnp_protocol::{Profile, UserId};
use tokio::net::UdpSocket;

#[derive(Parser)]
#[command(name = "lsnp-node", about = "LSNP peer-to-peer social node")]
struct Cli {
    /// Identity as name@ipv4 (overrides [node] user_id)
    user_id: Option<String>,

    /// Name shown to peers (overrides [node] display_name)
    display_name: Option<String>,

    /// Path to config file
    #[arg(short, long, default_value = "~/.lsnp/config.toml")]
    config: String,

    /// UDP port (overrides [network] port)
    #[arg(short, long)]
    port: Option<u16>,

    /// Status line announced in PROFILE
    #[arg(short, long)]
    status: Option<String>,

    /// Log every frame sent and received
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "lsnp_node=debug,lsnp_protocol=debug,lsnp_reliability=debug,lsnp_transfer=debug,lsnp_game=debug"
    } else {
        "lsnp_node=info,lsnp_protocol=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config_path = expand_tilde(&cli.config);
    let mut cfg = NodeConfig::load_or_default(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    if let Some(port) = cli.port {
        cfg.network.port = port;
    }
    if let Some(status) = cli.status {
        cfg.node.status = status;
    }

    let raw_id = cli
        .user_id
        .or_else(|| cfg.node.user_id.clone())
        .context("no identity: pass name@ipv4 or set [node] user_id")?;
    let user_id = UserId::parse(&raw_id)?;
    let display_name = cli
        .display_name
        .or_else(|| cfg.node.display_name.clone())
        .unwrap_or_else(|| user_id.name().to_string());

    run_node(cfg, user_id, display_name).await
}

async fn run_node(cfg: NodeConfig, user_id: UserId, display_name: String) -> anyhow::Result<()> {
    let avatar = match cfg.node.avatar.as_deref() {
        Some(path) => match load_avatar(&expand_tilde(path)) {
            Ok(avatar) => Some(avatar),
            Err(e) => {
                tracing::warn!("avatar not loaded: {e:#}");
                None
            }
        },
        None => None,
    };

    tracing::info!(
        user_id = %user_id,
        display_name = %display_name,
        version = env!("CARGO_PKG_VERSION"),
        "starting lsnp-node"
    );

    let bind: SocketAddr = format!("{}:{}", cfg.network.bind_addr, cfg.network.port)
        .parse()
        .with_context(|| format!("bad bind address {}", cfg.network.bind_addr))?;
    let broadcast: Ipv4Addr = cfg
        .network
        .broadcast_addr
        .parse()
        .with_context(|| format!("bad broadcast address {}", cfg.network.broadcast_addr))?;
    let socket = UdpSocket::bind(bind)
        .await
        .with_context(|| format!("binding UDP {bind}"))?;
    socket.set_broadcast(true).context("enabling broadcast")?;
    let socket = Arc::new(socket);
    tracing::info!(%bind, %broadcast, "socket bound");

    let state = Arc::new(tokio::sync::Mutex::new(NodeState::new(
        Profile {
            user_id,
            display_name,
            status: cfg.node.status.clone(),
            avatar,
        },
        cfg.timing.token_ttl_secs,
        cfg.transfer.chunk_size,
    )));

    // Shutdown broadcast channel
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);
    let (effect_tx, effect_rx) = tokio::sync::mpsc::channel(1024);
    let (notice_tx, notice_rx) = tokio::sync::mpsc::channel(256);

    let effect_handle = {
        let route = Route {
            port: cfg.network.port,
            broadcast,
        };
        let download_dir = expand_tilde(&cfg.transfer.download_dir);
        tokio::spawn(socket_task::run_effect_loop(
            socket.clone(),
            route,
            download_dir,
            effect_rx,
            notice_tx,
            shutdown_tx.subscribe(),
        ))
    };

    let receive_handle = tokio::spawn(socket_task::run_receive_loop(
        socket.clone(),
        state.clone(),
        effect_tx.clone(),
        cfg.network.recv_buffer_bytes,
        Duration::from_millis(cfg.network.recv_timeout_ms),
        shutdown_tx.subscribe(),
    ));

    let announce_handle = tokio::spawn(announce_task::run_announce_loop(
        state.clone(),
        effect_tx.clone(),
        Duration::from_secs(cfg.timing.profile_interval_secs),
        Duration::from_secs(cfg.timing.ping_interval_secs),
        shutdown_tx.subscribe(),
    ));

    let retry_handle = tokio::spawn(retry_task::run_retry_loop(
        state.clone(),
        effect_tx.clone(),
        shutdown_tx.subscribe(),
    ));

    let mut console_handle = tokio::spawn(console::run_console(
        state.clone(),
        effect_tx.clone(),
        notice_rx,
        shutdown_tx.subscribe(),
    ));

    tracing::info!("all tasks spawned");

    let console_done = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("waiting for Ctrl-C")?;
            tracing::info!("interrupted");
            false
        }
        _ = &mut console_handle => true,
    };

    tracing::info!("shutting down...");
    let revokes = state.lock().await.shutdown(Now::current());
    forward_all(&effect_tx, revokes).await;
    let _ = shutdown_tx.send(());

    // Wait for all tasks
    let _ = tokio::join!(receive_handle, effect_handle, announce_handle, retry_handle);
    if !console_done {
        let _ = console_handle.await;
    }
    tracing::info!("lsnp-node stopped");
    Ok(())
}
