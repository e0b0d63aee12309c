//! Two nodes on loopback sockets with the real receive, effect and retry
//! tasks.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use lsnp_node::retry_task::run_retry_loop;
use lsnp_node::socket_task::{forward_all, run_effect_loop, run_receive_loop, Route};
use lsnp_node::{NodeState, Notice, Now, SharedState};
use lsnp_protocol::{Profile, UserId};
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;

struct LiveNode {
    state: SharedState,
    effect_tx: mpsc::Sender<lsnp_node::Effect>,
    notice_rx: mpsc::Receiver<Notice>,
    handles: Vec<JoinHandle<()>>,
}

fn spawn_node(
    socket: UdpSocket,
    user_id: UserId,
    port: u16,
    shutdown: &broadcast::Sender<()>,
) -> LiveNode {
    let socket = Arc::new(socket);
    let state: SharedState = Arc::new(Mutex::new(NodeState::new(
        Profile {
            display_name: user_id.name().to_string(),
            user_id,
            status: "live".into(),
            avatar: None,
        },
        3600,
        1024,
    )));
    let (effect_tx, effect_rx) = mpsc::channel(64);
    let (notice_tx, notice_rx) = mpsc::channel(64);
    let downloads = std::env::temp_dir().join("lsnp-live-test");
    let route = Route {
        port,
        broadcast: Ipv4Addr::LOCALHOST,
    };

    let handles = vec![
        tokio::spawn(run_effect_loop(
            socket.clone(),
            route,
            downloads,
            effect_rx,
            notice_tx,
            shutdown.subscribe(),
        )),
        tokio::spawn(run_receive_loop(
            socket,
            state.clone(),
            effect_tx.clone(),
            4096,
            Duration::from_millis(50),
            shutdown.subscribe(),
        )),
        tokio::spawn(run_retry_loop(
            state.clone(),
            effect_tx.clone(),
            shutdown.subscribe(),
        )),
    ];
    LiveNode {
        state,
        effect_tx,
        notice_rx,
        handles,
    }
}

#[tokio::test]
async fn test_dm_over_loopback() {
    // Both peers need the same port on different addresses.
    let Ok(alice_socket) = UdpSocket::bind("127.0.0.1:0").await else {
        return;
    };
    let port = alice_socket.local_addr().unwrap().port();
    let Ok(bob_socket) = UdpSocket::bind(("127.0.0.2", port)).await else {
        eprintln!("127.0.0.2:{port} unavailable, skipping");
        return;
    };

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let alice_id = UserId::parse("alice@127.0.0.1").unwrap();
    let bob_id = UserId::parse("bob@127.0.0.2").unwrap();
    let alice = spawn_node(alice_socket, alice_id.clone(), port, &shutdown_tx);
    let mut bob = spawn_node(bob_socket, bob_id.clone(), port, &shutdown_tx);

    let effects = alice
        .state
        .lock()
        .await
        .direct_message(bob_id, "over the wire", Now::current())
        .unwrap();
    assert!(forward_all(&alice.effect_tx, effects).await);

    let notice = tokio::time::timeout(Duration::from_secs(3), bob.notice_rx.recv())
        .await
        .expect("no notice within 3s")
        .unwrap();
    match notice {
        Notice::DirectMessage { from, content, .. } => {
            assert_eq!(from, alice_id);
            assert_eq!(content, "over the wire");
        }
        other => panic!("unexpected notice {other:?}"),
    }

    // The ACK comes back and clears the retry table.
    let acked = tokio::time::timeout(Duration::from_secs(3), async {
        while alice.state.lock().await.reliability().pending_count() > 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(acked.is_ok(), "DM never acknowledged");

    shutdown_tx.send(()).unwrap();
    for handle in alice.handles.into_iter().chain(bob.handles) {
        handle.await.unwrap();
    }
}
