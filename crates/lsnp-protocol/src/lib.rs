//! LSNP Protocol -- wire frames, typed messages, scoped tokens.
//!
//! UDP between peers. One message per datagram.
//! UTF-8 `KEY:VALUE` lines terminated by a blank line.

pub mod codec;
pub mod identity;
pub mod message;
pub mod timing;
pub mod token;

pub use codec::{decode, encode, LsnpCodec};
pub use identity::UserId;
pub use message::*;
pub use timing::{ProtocolTiming, RetryPolicy, LSNP_TIMING};
pub use token::{Scope, Token, TokenAuthority, TokenRejection};

/// Well-known UDP port every peer listens on.
pub const DEFAULT_PORT: u16 = 50999;

/// Largest datagram we send or accept (sourced from timing parameters).
pub const MAX_DATAGRAM_BYTES: usize = LSNP_TIMING.max_datagram_bytes;

/// Raw bytes carried by a single FILE_CHUNK before base64.
pub const FILE_CHUNK_BYTES: usize = LSNP_TIMING.file_chunk_bytes;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },
    #[error("payload is not valid UTF-8")]
    NotUtf8,
    #[error("message has no TYPE field")]
    MissingType,
    #[error("unknown message type: {0}")]
    UnknownType(String),
    #[error("{msg_type} is missing required field {field}")]
    MissingField {
        msg_type: &'static str,
        field: &'static str,
    },
    #[error("invalid value for {field}: {value:?}")]
    InvalidField { field: &'static str, value: String },
    #[error("invalid user id {0:?}: expected name@ipv4")]
    InvalidUserId(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
