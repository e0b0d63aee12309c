//! LSNP Transfer -- chunked file transfer over acknowledged exchanges.
//!
//! Sender: FILE_OFFER -> ACK ACCEPTED -> FILE_CHUNK 0..n, one in flight at a
//! time, each through the reliability engine.
//! Receiver: offer surfaced to the operator -> accept -> chunks stored by
//! index and ACKed in any order -> assemble, persist, FILE_RECEIVED.

pub mod chunk;
pub mod engine;

pub use chunk::{chunk_at, chunk_count, Reassembly};
pub use engine::{ReceivedFile, TransferAction, TransferEngine, TransferEvent};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransferError {
    #[error("no pending offer with file id {0}")]
    UnknownOffer(String),
    #[error("file name is empty")]
    EmptyFilename,
    #[error("file of {size} bytes needs more chunks than the protocol can number")]
    TooLarge { size: usize },
    #[error("chunk {index} out of range (total {total})")]
    ChunkOutOfRange { index: u32, total: u32 },
}
