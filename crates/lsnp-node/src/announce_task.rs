//! Presence task -- periodic PROFILE and PING broadcasts.
//!
//! Both timers fire once immediately, so a starting node announces itself
//! and looks for peers before the first interval elapses.

use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;

use crate::effect::Effect;
use crate::socket_task::forward_all;
use crate::SharedState;

const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Run the announce loop until shutdown.
pub async fn run_announce_loop(
    state: SharedState,
    effect_tx: mpsc::Sender<Effect>,
    profile_every: Duration,
    ping_every: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut profile_timer = tokio::time::interval(profile_every.max(MIN_INTERVAL));
    let mut ping_timer = tokio::time::interval(ping_every.max(MIN_INTERVAL));
    profile_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ping_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let effects = tokio::select! {
            _ = profile_timer.tick() => {
                tracing::debug!("announce: profile");
                state.lock().await.announce_profile()
            }
            _ = ping_timer.tick() => {
                tracing::debug!("announce: ping");
                state.lock().await.announce_ping()
            }
            _ = shutdown.recv() => {
                tracing::info!("announce loop shutting down");
                break;
            }
        };
        if !forward_all(&effect_tx, effects).await {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use lsnp_protocol::{MessageType, Profile, UserId};
    use tokio::sync::Mutex;

    use crate::state::NodeState;

    #[tokio::test]
    async fn test_startup_announces_profile_and_ping() {
        let state = Arc::new(Mutex::new(NodeState::new(
            Profile {
                user_id: UserId::from_wire("alice@10.0.0.1"),
                display_name: "Alice".into(),
                status: "hi".into(),
                avatar: None,
            },
            3600,
            1024,
        )));
        let (effect_tx, mut effect_rx) = mpsc::channel(16);
        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let handle = tokio::spawn(run_announce_loop(
            state,
            effect_tx,
            Duration::from_secs(300),
            Duration::from_secs(60),
            shutdown_tx.subscribe(),
        ));

        let mut types = Vec::new();
        for _ in 0..2 {
            match effect_rx.recv().await {
                Some(Effect::Send { message, .. }) => types.push(message.message_type()),
                other => panic!("unexpected {other:?}"),
            }
        }
        assert!(types.contains(&MessageType::Ping));
        assert!(types.contains(&MessageType::Profile));

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
