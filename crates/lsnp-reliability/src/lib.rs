//! LSNP Reliability -- at-least-once delivery over UDP.
//!
//! Each acknowledged message is an exchange:
//!   Sent -> (ACK) -> Confirmed (removed)
//!   Sent -> (timeout, retries left) -> Sent (resend, retry_count + 1)
//!   Sent -> (timeout, budget spent) -> Abandoned (removed, surfaced)
//!
//! The engine never touches a socket. `tick()` returns what to resend and
//! what was abandoned; the node's retry task executes it.

use std::collections::HashMap;
use std::time::Instant;

use lsnp_protocol::{Destination, GameId, Message, RetryPolicy};

/// Which engine owns the continuation of an exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeKind {
    DirectMessage,
    FileOffer { file_id: String },
    FileChunk { file_id: String, chunk_index: u32 },
    GameInvite { game_id: GameId },
    GameMove { game_id: GameId, turn: u32 },
}

/// A message to put on the wire, optionally tracked for acknowledgment.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Fire and forget.
    Unreliable { message: Message, to: Destination },
    /// Tracked by MESSAGE_ID until ACKed or abandoned.
    Reliable {
        message: Message,
        to: Destination,
        policy: RetryPolicy,
        kind: ExchangeKind,
    },
}

impl Outbound {
    pub fn unreliable(message: Message, to: Destination) -> Self {
        Outbound::Unreliable { message, to }
    }

    pub fn reliable(
        message: Message,
        to: Destination,
        policy: RetryPolicy,
        kind: ExchangeKind,
    ) -> Self {
        Outbound::Reliable {
            message,
            to,
            policy,
            kind,
        }
    }

    pub fn message(&self) -> &Message {
        match self {
            Outbound::Unreliable { message, .. } | Outbound::Reliable { message, .. } => message,
        }
    }

    pub fn message_mut(&mut self) -> &mut Message {
        match self {
            Outbound::Unreliable { message, .. } | Outbound::Reliable { message, .. } => message,
        }
    }

    pub fn destination(&self) -> &Destination {
        match self {
            Outbound::Unreliable { to, .. } | Outbound::Reliable { to, .. } => to,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PendingExchange {
    pub message: Message,
    pub destination: Destination,
    pub sent_at: Instant,
    pub retry_count: u32,
    pub policy: RetryPolicy,
    pub kind: ExchangeKind,
}

impl PendingExchange {
    pub fn deadline(&self) -> Instant {
        self.sent_at + self.policy.timeout
    }
}

/// An exchange whose retry budget ran out.
#[derive(Debug, Clone, PartialEq)]
pub struct Abandoned {
    pub message_id: String,
    pub destination: Destination,
    pub kind: ExchangeKind,
}

/// Work for the node after a tick.
#[derive(Debug, Default)]
pub struct RetryActions {
    /// Messages whose timeout elapsed with retries left.
    pub resend: Vec<(Message, Destination)>,
    /// Exchanges given up on.
    pub abandoned: Vec<Abandoned>,
}

impl RetryActions {
    pub fn is_empty(&self) -> bool {
        self.resend.is_empty() && self.abandoned.is_empty()
    }
}

/// Table of exchanges awaiting acknowledgment, keyed by MESSAGE_ID.
#[derive(Debug, Default)]
pub struct ReliabilityEngine {
    pending: HashMap<String, PendingExchange>,
}

impl ReliabilityEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a message that was just sent. Returns false (and
    /// tracks nothing) if the message carries no MESSAGE_ID.
    pub fn track(
        &mut self,
        message: Message,
        destination: Destination,
        policy: RetryPolicy,
        kind: ExchangeKind,
        now: Instant,
    ) -> bool {
        let Some(message_id) = message.message_id().map(str::to_string) else {
            tracing::warn!(msg_type = %message.message_type(), "cannot track message without MESSAGE_ID");
            return false;
        };
        tracing::debug!(
            message_id = %message_id,
            to = %destination,
            timeout_ms = policy.timeout.as_millis() as u64,
            max_retries = policy.max_retries,
            "tracking exchange"
        );
        self.pending.insert(
            message_id,
            PendingExchange {
                message,
                destination,
                sent_at: now,
                retry_count: 0,
                policy,
                kind,
            },
        );
        true
    }

    /// Match an ACK to its exchange. Unknown ids are logged and ignored.
    pub fn resolve(&mut self, message_id: &str) -> Option<PendingExchange> {
        let resolved = self.pending.remove(message_id);
        match &resolved {
            Some(exchange) => tracing::debug!(
                message_id,
                retries = exchange.retry_count,
                "exchange confirmed"
            ),
            None => tracing::debug!(message_id, "ACK for unknown exchange"),
        }
        resolved
    }

    /// Resend or abandon every exchange whose timeout has elapsed by `now`.
    pub fn tick(&mut self, now: Instant) -> RetryActions {
        let mut actions = RetryActions::default();
        let mut expired = Vec::new();

        for (message_id, exchange) in self.pending.iter_mut() {
            if now < exchange.deadline() {
                continue;
            }
            if exchange.retry_count < exchange.policy.max_retries {
                exchange.retry_count += 1;
                exchange.sent_at = now;
                tracing::debug!(
                    message_id = message_id.as_str(),
                    attempt = exchange.retry_count,
                    "resending"
                );
                actions
                    .resend
                    .push((exchange.message.clone(), exchange.destination.clone()));
            } else {
                expired.push(message_id.clone());
            }
        }

        for message_id in expired {
            if let Some(exchange) = self.pending.remove(&message_id) {
                tracing::info!(
                    message_id = message_id.as_str(),
                    to = %exchange.destination,
                    msg_type = %exchange.message.message_type(),
                    "exchange abandoned after {} retries",
                    exchange.retry_count
                );
                actions.abandoned.push(Abandoned {
                    message_id,
                    destination: exchange.destination,
                    kind: exchange.kind,
                });
            }
        }

        actions
    }

    /// Earliest instant at which `tick` has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(PendingExchange::deadline).min()
    }

    /// Drop exchanges matching `pred` without surfacing them.
    pub fn cancel_where(&mut self, mut pred: impl FnMut(&ExchangeKind) -> bool) -> usize {
        let before = self.pending.len();
        self.pending.retain(|_, exchange| !pred(&exchange.kind));
        before - self.pending.len()
    }

    /// Rewrite pending messages in place; later resends carry the change.
    /// `f` returns true for each message it modified.
    pub fn restamp(&mut self, mut f: impl FnMut(&mut Message) -> bool) -> usize {
        self.pending
            .values_mut()
            .map(|exchange| f(&mut exchange.message))
            .filter(|changed| *changed)
            .count()
    }

    /// Remove everything (shutdown). Nothing is surfaced.
    pub fn drain(&mut self) -> Vec<PendingExchange> {
        self.pending.drain().map(|(_, exchange)| exchange).collect()
    }

    /// What a pending exchange is, without resolving it.
    pub fn kind_of(&self, message_id: &str) -> Option<&ExchangeKind> {
        self.pending.get(message_id).map(|exchange| &exchange.kind)
    }

    pub fn is_pending(&self, message_id: &str) -> bool {
        self.pending.contains_key(message_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
