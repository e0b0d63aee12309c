//! Retry task -- drives the pending-exchange table.
//!
//! Sleeps until the earliest retry deadline, but never longer than
//! `MAX_IDLE`, so exchanges added while asleep are picked up promptly.
//! Resends may therefore fire up to `MAX_IDLE` late; never early.

use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc};

use crate::effect::Effect;
use crate::socket_task::forward_all;
use crate::state::Now;
use crate::SharedState;

pub const MAX_IDLE: Duration = Duration::from_millis(250);

/// Run the retry loop until shutdown.
pub async fn run_retry_loop(
    state: SharedState,
    effect_tx: mpsc::Sender<Effect>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        let wake = {
            let idle_limit = Instant::now() + MAX_IDLE;
            let next = state.lock().await.next_deadline();
            next.map_or(idle_limit, |deadline| deadline.min(idle_limit))
        };

        tokio::select! {
            _ = tokio::time::sleep_until(tokio::time::Instant::from_std(wake)) => {
                let effects = state.lock().await.on_tick(Now::current());
                if !effects.is_empty() {
                    tracing::debug!(count = effects.len(), "retry: tick produced effects");
                }
                if !forward_all(&effect_tx, effects).await {
                    break;
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("retry loop shutting down");
                break;
            }
        }
    }
}
