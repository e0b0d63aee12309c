//! UDP socket tasks.
//!
//! The receive loop hands every datagram to `NodeState::dispatch` and queues
//! the resulting effects. The effect loop is the only writer: it encodes and
//! sends messages, saves completed downloads and forwards notices to the
//! console.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use lsnp_protocol::{Destination, LsnpCodec, Message};
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc};
use tokio_util::codec::Encoder;

use crate::downloads::persist_file;
use crate::effect::{Effect, Notice};
use crate::state::Now;
use crate::SharedState;

/// Where destinations live on the wire.
#[derive(Debug, Clone, Copy)]
pub struct Route {
    pub port: u16,
    pub broadcast: Ipv4Addr,
}

impl Route {
    /// Broadcast goes to the configured broadcast address; a peer is reached
    /// at the address segment of its id. None if the id carries no IPv4.
    pub fn resolve(&self, to: &Destination) -> Option<SocketAddr> {
        let ip = match to {
            Destination::Broadcast => self.broadcast,
            Destination::Peer(user) => user.ip()?,
        };
        Some(SocketAddr::V4(SocketAddrV4::new(ip, self.port)))
    }
}

/// Queue effects for the effect loop. False once the loop is gone.
pub async fn forward_all(effect_tx: &mpsc::Sender<Effect>, effects: Vec<Effect>) -> bool {
    for effect in effects {
        if effect_tx.send(effect).await.is_err() {
            return false;
        }
    }
    true
}

/// Run the receive loop until shutdown.
pub async fn run_receive_loop(
    socket: Arc<UdpSocket>,
    state: SharedState,
    effect_tx: mpsc::Sender<Effect>,
    buffer_bytes: usize,
    recv_timeout: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut buf = vec![0u8; buffer_bytes];
    loop {
        tokio::select! {
            received = tokio::time::timeout(recv_timeout, socket.recv_from(&mut buf)) => {
                let (len, from) = match received {
                    // Idle; go round so shutdown is seen.
                    Err(_) => continue,
                    Ok(Err(e)) => {
                        tracing::warn!("net: recv failed: {e}");
                        continue;
                    }
                    Ok(Ok(read)) => read,
                };
                tracing::trace!(%from, len, "net: datagram");
                let effects = state.lock().await.dispatch(&buf[..len], Now::current());
                if !forward_all(&effect_tx, effects).await {
                    tracing::debug!("net: effect queue closed, receive loop stopping");
                    break;
                }
            }

            _ = shutdown.recv() => {
                tracing::info!("net: receive loop shutting down");
                break;
            }
        }
    }
}

/// Run the effect loop until shutdown. Effects already queued when shutdown
/// arrives are still carried out, so the REVOKE broadcast goes out.
pub async fn run_effect_loop(
    socket: Arc<UdpSocket>,
    route: Route,
    download_dir: PathBuf,
    mut effect_rx: mpsc::Receiver<Effect>,
    notice_tx: mpsc::Sender<Notice>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let executor = Executor {
        socket,
        route,
        download_dir,
        notice_tx,
    };
    loop {
        tokio::select! {
            effect = effect_rx.recv() => {
                let Some(effect) = effect else { break };
                executor.execute(effect).await;
            }

            _ = shutdown.recv() => {
                let mut drained = 0usize;
                while let Ok(effect) = effect_rx.try_recv() {
                    executor.execute(effect).await;
                    drained += 1;
                }
                tracing::info!(drained, "net: effect loop shutting down");
                break;
            }
        }
    }
}

struct Executor {
    socket: Arc<UdpSocket>,
    route: Route,
    download_dir: PathBuf,
    notice_tx: mpsc::Sender<Notice>,
}

impl Executor {
    async fn execute(&self, effect: Effect) {
        match effect {
            Effect::Send { message, to } => self.send(message, &to).await,
            Effect::Persist(file) => match persist_file(&self.download_dir, &file) {
                Ok(path) => {
                    self.notify(Notice::FileSaved {
                        file_id: file.file_id,
                        path,
                    })
                    .await
                }
                Err(e) => tracing::error!(file_id = %file.file_id, "saving download failed: {e:#}"),
            },
            Effect::Notify(notice) => self.notify(notice).await,
        }
    }

    async fn send(&self, message: Message, to: &Destination) {
        let Some(addr) = self.route.resolve(to) else {
            tracing::warn!(%to, "net: no IPv4 address for destination");
            return;
        };
        let frame = message.to_frame();
        tracing::debug!(
            %addr,
            msg_type = %message.message_type(),
            fields = ?frame.fields().collect::<Vec<_>>(),
            "sent"
        );
        let mut buf = BytesMut::new();
        if let Err(e) = LsnpCodec.encode(frame, &mut buf) {
            tracing::warn!(msg_type = %message.message_type(), "net: encode failed: {e}");
            return;
        }
        if let Err(e) = self.socket.send_to(&buf, addr).await {
            tracing::warn!(%addr, "net: send failed: {e}");
        }
    }

    async fn notify(&self, notice: Notice) {
        if self.notice_tx.send(notice).await.is_err() {
            tracing::debug!("console gone, notice dropped");
        }
    }
}
