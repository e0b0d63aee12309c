//! Protocol timing -- the parameter set all LSNP peers assume.
//!
//! Retry budgets and broadcast cadences are part of the protocol, not node
//! configuration: a peer that retries faster than its counterpart expects
//! only produces duplicates. Node-local knobs (port, download directory)
//! live in the node's config file.

use std::time::Duration;

/// Timeout and retry budget for one kind of acknowledged exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Time to wait for an ACK before resending.
    pub timeout: Duration,
    /// Resends attempted before the exchange is abandoned.
    pub max_retries: u32,
}

impl RetryPolicy {
    pub const fn new(timeout_secs: u64, max_retries: u32) -> Self {
        Self {
            timeout: Duration::from_secs(timeout_secs),
            max_retries,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolTiming {
    // -- Presence --
    /// Seconds between PROFILE broadcasts.
    pub profile_interval_secs: u64,
    /// Seconds between discovery PINGs.
    pub ping_interval_secs: u64,

    // -- Tokens --
    /// Default token lifetime.
    pub token_ttl_secs: u64,
    /// A cached token this close to expiry is replaced before use.
    pub token_refresh_margin_secs: u64,

    // -- Transport --
    /// Receive timeout so loops observe shutdown promptly.
    pub recv_timeout_ms: u64,
    /// Maximum datagram size in bytes.
    pub max_datagram_bytes: usize,
    /// Raw bytes per FILE_CHUNK.
    pub file_chunk_bytes: usize,

    // -- Posts --
    /// TTL attached to outgoing POSTs.
    pub post_ttl_secs: u64,

    // -- Sessions --
    /// An inbound invite or offer left unanswered this long is dropped, as
    /// is an accepted transfer that has seen no chunk for this long.
    pub stale_session_secs: u64,

    // -- Reliability --
    pub file_chunk_retry: RetryPolicy,
    pub file_offer_retry: RetryPolicy,
    pub game_invite_retry: RetryPolicy,
    pub game_move_retry: RetryPolicy,
    pub direct_message_retry: RetryPolicy,
}

pub const LSNP_TIMING: ProtocolTiming = ProtocolTiming {
    // Presence
    profile_interval_secs: 300,
    ping_interval_secs: 60,

    // Tokens
    token_ttl_secs: 3600,
    token_refresh_margin_secs: 60,

    // Transport
    recv_timeout_ms: 500,
    max_datagram_bytes: 32 * 1024,
    file_chunk_bytes: 1024,

    // Posts
    post_ttl_secs: 3600,

    // Sessions
    stale_session_secs: 120,

    // Reliability
    file_chunk_retry: RetryPolicy::new(1, 3),
    file_offer_retry: RetryPolicy::new(10, 3),
    game_invite_retry: RetryPolicy::new(10, 3),
    game_move_retry: RetryPolicy::new(2, 3),
    direct_message_retry: RetryPolicy::new(2, 3),
};
