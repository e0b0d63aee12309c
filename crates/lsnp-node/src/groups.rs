//! Groups this node belongs to.

use std::collections::{BTreeMap, BTreeSet};

use lsnp_protocol::{GroupCreate, GroupMessage, GroupUpdate, UserId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub group_id: String,
    pub name: String,
    pub creator: UserId,
    pub members: BTreeSet<UserId>,
    pub messages: Vec<(UserId, String)>,
}

/// What an inbound group message did to local state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupChange {
    Joined {
        group_id: String,
        name: String,
        by: UserId,
    },
    Updated {
        group_id: String,
        added: Vec<UserId>,
        removed: Vec<UserId>,
    },
    /// We were removed; the local record is gone.
    Left { group_id: String, by: UserId },
}

#[derive(Debug)]
pub struct GroupStore {
    local: UserId,
    groups: BTreeMap<String, Group>,
}

impl GroupStore {
    pub fn new(local: UserId) -> Self {
        Self {
            local,
            groups: BTreeMap::new(),
        }
    }

    /// Create a group locally. The creator is always a member. False if the
    /// id is taken.
    pub fn create(&mut self, group_id: &str, name: &str, members: &[UserId]) -> bool {
        if self.groups.contains_key(group_id) {
            return false;
        }
        let mut set: BTreeSet<UserId> = members.iter().cloned().collect();
        set.insert(self.local.clone());
        self.groups.insert(
            group_id.to_string(),
            Group {
                group_id: group_id.to_string(),
                name: name.to_string(),
                creator: self.local.clone(),
                members: set,
                messages: Vec::new(),
            },
        );
        true
    }

    /// Apply a membership change made locally. Returns the members before
    /// the change, or None for an unknown group.
    pub fn apply_update(
        &mut self,
        group_id: &str,
        add: &[UserId],
        remove: &[UserId],
    ) -> Option<BTreeSet<UserId>> {
        let group = self.groups.get_mut(group_id)?;
        let before = group.members.clone();
        group.members.extend(add.iter().cloned());
        for user in remove {
            group.members.remove(user);
        }
        Some(before)
    }

    pub fn on_create(&mut self, msg: &GroupCreate) -> Option<GroupChange> {
        if !msg.members.contains(&self.local) {
            tracing::debug!(group = %msg.group_id, "group create without us");
            return None;
        }
        let mut members: BTreeSet<UserId> = msg.members.iter().cloned().collect();
        members.insert(msg.from.clone());

        // A repeat from the creator refreshes the record; anyone else is
        // ignored. Message history is kept either way.
        if let Some(group) = self.groups.get_mut(&msg.group_id) {
            if group.creator != msg.from {
                tracing::warn!(
                    group = %msg.group_id,
                    from = %msg.from,
                    creator = %group.creator,
                    "create for existing group from non-creator"
                );
                return None;
            }
            group.name = msg.group_name.clone();
            group.members = members;
            return None;
        }

        self.groups.insert(
            msg.group_id.clone(),
            Group {
                group_id: msg.group_id.clone(),
                name: msg.group_name.clone(),
                creator: msg.from.clone(),
                members,
                messages: Vec::new(),
            },
        );
        tracing::info!(group = %msg.group_id, by = %msg.from, "added to group");
        Some(GroupChange::Joined {
            group_id: msg.group_id.clone(),
            name: msg.group_name.clone(),
            by: msg.from.clone(),
        })
    }

    pub fn on_update(&mut self, msg: &GroupUpdate) -> Option<GroupChange> {
        if msg.remove.contains(&self.local) {
            return self.groups.remove(&msg.group_id).map(|_| {
                tracing::info!(group = %msg.group_id, by = %msg.from, "removed from group");
                GroupChange::Left {
                    group_id: msg.group_id.clone(),
                    by: msg.from.clone(),
                }
            });
        }

        match self.groups.get_mut(&msg.group_id) {
            Some(group) => {
                if !group.members.contains(&msg.from) {
                    tracing::warn!(group = %msg.group_id, from = %msg.from, "update from non-member");
                    return None;
                }
                let added: Vec<UserId> = msg
                    .add
                    .iter()
                    .filter(|u| group.members.insert((*u).clone()))
                    .cloned()
                    .collect();
                let removed: Vec<UserId> = msg
                    .remove
                    .iter()
                    .filter(|u| group.members.remove(*u))
                    .cloned()
                    .collect();
                if added.is_empty() && removed.is_empty() {
                    return None;
                }
                Some(GroupChange::Updated {
                    group_id: msg.group_id.clone(),
                    added,
                    removed,
                })
            }
            // Added to a group whose CREATE we never saw: the id stands in
            // for the name.
            None if msg.add.contains(&self.local) => {
                let mut members: BTreeSet<UserId> = msg.add.iter().cloned().collect();
                members.insert(msg.from.clone());
                self.groups.insert(
                    msg.group_id.clone(),
                    Group {
                        group_id: msg.group_id.clone(),
                        name: msg.group_id.clone(),
                        creator: msg.from.clone(),
                        members,
                        messages: Vec::new(),
                    },
                );
                Some(GroupChange::Joined {
                    group_id: msg.group_id.clone(),
                    name: msg.group_id.clone(),
                    by: msg.from.clone(),
                })
            }
            None => None,
        }
    }

    /// Store a group message. False if the group is unknown or the sender
    /// is not a member.
    pub fn on_message(&mut self, msg: &GroupMessage) -> bool {
        let Some(group) = self.groups.get_mut(&msg.group_id) else {
            tracing::debug!(group = %msg.group_id, "message for unknown group");
            return false;
        };
        if !group.members.contains(&msg.from) {
            tracing::warn!(group = %msg.group_id, from = %msg.from, "message from non-member");
            return false;
        }
        group.messages.push((msg.from.clone(), msg.content.clone()));
        true
    }

    pub fn record_sent(&mut self, group_id: &str, content: &str) {
        if let Some(group) = self.groups.get_mut(group_id) {
            group.messages.push((self.local.clone(), content.to_string()));
        }
    }

    pub fn get(&self, group_id: &str) -> Option<&Group> {
        self.groups.get(group_id)
    }

    pub fn list(&self) -> Vec<&Group> {
        self.groups.values().collect()
    }

    /// Everyone in the group except us.
    pub fn recipients(&self, group_id: &str) -> Vec<UserId> {
        self.groups
            .get(group_id)
            .map(|g| {
                g.members
                    .iter()
                    .filter(|m| **m != self.local)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}
