//! Online peer cache, keyed by user id.
//!
//! A record appears the first time a peer's PROFILE or PING is seen and is
//! refreshed in place by later PROFILEs. Records are never removed; the
//! node does not persist them across restarts.

use std::collections::BTreeMap;

use lsnp_protocol::{Avatar, Profile, UserId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub user_id: UserId,
    pub display_name: String,
    pub status: String,
    pub avatar: Option<Avatar>,
    pub first_seen: u64,
    pub last_seen: u64,
    /// False for a PING placeholder that has not yet sent a PROFILE.
    pub profiled: bool,
}

#[derive(Debug, Default)]
pub struct PeerDirectory {
    peers: BTreeMap<UserId, PeerRecord>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a PROFILE. Returns true the first time a peer's profile is
    /// seen, including when it upgrades a PING placeholder.
    pub fn on_profile(&mut self, profile: &Profile, now: u64) -> bool {
        match self.peers.get_mut(&profile.user_id) {
            Some(record) => {
                record.display_name = profile.display_name.clone();
                record.status = profile.status.clone();
                if profile.avatar.is_some() {
                    record.avatar = profile.avatar.clone();
                }
                record.last_seen = now;
                let discovered = !record.profiled;
                record.profiled = true;
                if discovered {
                    tracing::info!(peer = %profile.user_id, name = %profile.display_name, "peer discovered");
                }
                discovered
            }
            None => {
                tracing::info!(peer = %profile.user_id, name = %profile.display_name, "peer discovered");
                self.peers.insert(
                    profile.user_id.clone(),
                    PeerRecord {
                        user_id: profile.user_id.clone(),
                        display_name: profile.display_name.clone(),
                        status: profile.status.clone(),
                        avatar: profile.avatar.clone(),
                        first_seen: now,
                        last_seen: now,
                        profiled: true,
                    },
                );
                true
            }
        }
    }

    /// Note a PING. Unknown peers get a placeholder record named after the
    /// user part of their id until their PROFILE arrives.
    pub fn on_ping(&mut self, user_id: &UserId, now: u64) -> bool {
        if let Some(record) = self.peers.get_mut(user_id) {
            record.last_seen = now;
            return false;
        }
        tracing::debug!(peer = %user_id, "peer seen via PING");
        self.peers.insert(
            user_id.clone(),
            PeerRecord {
                user_id: user_id.clone(),
                display_name: user_id.name().to_string(),
                status: String::new(),
                avatar: None,
                first_seen: now,
                last_seen: now,
                profiled: false,
            },
        );
        true
    }

    pub fn get(&self, user_id: &UserId) -> Option<&PeerRecord> {
        self.peers.get(user_id)
    }

    pub fn contains(&self, user_id: &UserId) -> bool {
        self.peers.contains_key(user_id)
    }

    /// Name to show for `user_id`, falling back to the id's user part.
    pub fn display_name(&self, user_id: &UserId) -> String {
        self.peers
            .get(user_id)
            .map(|r| r.display_name.clone())
            .unwrap_or_else(|| user_id.name().to_string())
    }

    pub fn list(&self) -> Vec<&PeerRecord> {
        self.peers.values().collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(name: &str, status: &str) -> Profile {
        Profile {
            user_id: UserId::from_wire("bob@10.0.0.2"),
            display_name: name.into(),
            status: status.into(),
            avatar: None,
        }
    }

    #[test]
    fn test_profile_creates_then_updates() {
        let mut dir = PeerDirectory::new();
        assert!(dir.on_profile(&profile("Bob", "hi"), 100));
        assert!(!dir.on_profile(&profile("Robert", "busy"), 200));

        let record = dir.get(&UserId::from_wire("bob@10.0.0.2")).unwrap();
        assert_eq!(record.display_name, "Robert");
        assert_eq!(record.status, "busy");
        assert_eq!(record.first_seen, 100);
        assert_eq!(record.last_seen, 200);
        assert_eq!(dir.len(), 1);
    }

    #[test]
    fn test_ping_placeholder() {
        let mut dir = PeerDirectory::new();
        let bob = UserId::from_wire("bob@10.0.0.2");
        assert!(dir.on_ping(&bob, 10));
        assert_eq!(dir.display_name(&bob), "bob");
        assert!(!dir.on_ping(&bob, 20));

        assert!(dir.on_profile(&profile("Bob", "hi"), 30));
        assert_eq!(dir.display_name(&bob), "Bob");
        assert_eq!(dir.get(&bob).unwrap().first_seen, 10);
        assert!(!dir.on_profile(&profile("Bob", "hi"), 40));
    }

    #[test]
    fn test_avatar_kept_when_profile_omits_it() {
        let mut dir = PeerDirectory::new();
        let mut with_avatar = profile("Bob", "hi");
        with_avatar.avatar = Some(Avatar {
            mime_type: "image/png".into(),
            data: vec![1, 2, 3],
        });
        dir.on_profile(&with_avatar, 1);
        dir.on_profile(&profile("Bob", "later"), 2);
        let record = dir.get(&UserId::from_wire("bob@10.0.0.2")).unwrap();
        assert!(record.avatar.is_some());
    }

    #[test]
    fn test_unknown_display_name() {
        let dir = PeerDirectory::new();
        assert_eq!(dir.display_name(&UserId::from_wire("carol@10.0.0.3")), "carol");
        assert!(dir.is_empty());
    }
}
