//! Game id allocation over the 0-255 namespace.

use std::collections::BTreeSet;

use lsnp_protocol::GameId;

#[derive(Debug, Default)]
pub struct GameIdPool {
    in_use: BTreeSet<u8>,
}

impl GameIdPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lowest unused id.
    pub fn allocate(&mut self) -> Option<GameId> {
        let free = (0..=u8::MAX).find(|id| !self.in_use.contains(id))?;
        self.in_use.insert(free);
        Some(GameId(free))
    }

    /// Claim a specific id chosen by a peer. False if already taken.
    pub fn reserve(&mut self, id: GameId) -> bool {
        self.in_use.insert(id.0)
    }

    /// Return an id to the pool. False if it was not in use.
    pub fn release(&mut self, id: GameId) -> bool {
        self.in_use.remove(&id.0)
    }

    pub fn is_active(&self, id: GameId) -> bool {
        self.in_use.contains(&id.0)
    }

    pub fn active_count(&self) -> usize {
        self.in_use.len()
    }
}
