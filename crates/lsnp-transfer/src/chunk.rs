//! Splitting a file into fixed-size chunks and putting it back together.

use std::collections::BTreeMap;

use crate::TransferError;

/// Number of chunks for `len` bytes. An empty file still travels as one
/// (empty) chunk so the receiver has something to complete on.
pub fn chunk_count(len: usize, chunk_size: usize) -> u32 {
    let size = chunk_size.max(1);
    let count = len.div_ceil(size).max(1);
    u32::try_from(count).unwrap_or(u32::MAX)
}

/// The bytes of chunk `index`. Out-of-range indices yield an empty slice.
pub fn chunk_at(data: &[u8], index: u32, chunk_size: usize) -> &[u8] {
    let size = chunk_size.max(1);
    let start = (index as usize).saturating_mul(size).min(data.len());
    let end = start.saturating_add(size).min(data.len());
    &data[start..end]
}

/// Out-of-order chunk store for one incoming file.
#[derive(Debug, Clone)]
pub struct Reassembly {
    total: u32,
    chunks: BTreeMap<u32, Vec<u8>>,
}

impl Reassembly {
    pub fn new(total: u32) -> Self {
        Self {
            total,
            chunks: BTreeMap::new(),
        }
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    /// Store a chunk. Returns true if the index was new.
    pub fn insert(&mut self, index: u32, bytes: Vec<u8>) -> Result<bool, TransferError> {
        if index >= self.total {
            return Err(TransferError::ChunkOutOfRange {
                index,
                total: self.total,
            });
        }
        Ok(self.chunks.insert(index, bytes).is_none())
    }

    pub fn received(&self) -> u32 {
        self.chunks.len() as u32
    }

    pub fn is_complete(&self) -> bool {
        self.received() == self.total
    }

    /// Concatenate by ascending index.
    pub fn assemble(self) -> Vec<u8> {
        let len = self.chunks.values().map(Vec::len).sum();
        let mut out = Vec::with_capacity(len);
        for bytes in self.chunks.into_values() {
            out.extend_from_slice(&bytes);
        }
        out
    }
}
