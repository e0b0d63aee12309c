//! Posts, direct messages, follows and likes.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use lsnp_protocol::{DirectMessage, Like, LikeAction, Post, UserId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectEntry {
    pub peer: UserId,
    pub outgoing: bool,
    pub content: String,
    pub timestamp: u64,
}

/// A like landed on one of our posts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LikeRecord {
    pub by: UserId,
    pub post_timestamp: u64,
    pub action: LikeAction,
    /// Content of the liked post, when we still have it.
    pub post: Option<String>,
}

#[derive(Debug, Default)]
pub struct SocialStore {
    following: BTreeSet<UserId>,
    followers: BTreeSet<UserId>,
    timeline: Vec<Post>,
    own_posts: Vec<Post>,
    seen_posts: HashSet<String>,
    conversations: BTreeMap<UserId, Vec<DirectEntry>>,
    seen_dms: HashSet<String>,
    /// Our post timestamp -> users currently liking it.
    likes: BTreeMap<u64, BTreeSet<UserId>>,
}

impl SocialStore {
    pub fn new() -> Self {
        Self::default()
    }

    // -- Follow graph --

    /// Start following `user`. False if already following.
    pub fn follow(&mut self, user: &UserId) -> bool {
        self.following.insert(user.clone())
    }

    pub fn unfollow(&mut self, user: &UserId) -> bool {
        self.following.remove(user)
    }

    pub fn is_following(&self, user: &UserId) -> bool {
        self.following.contains(user)
    }

    pub fn following(&self) -> impl Iterator<Item = &UserId> {
        self.following.iter()
    }

    pub fn add_follower(&mut self, user: &UserId) -> bool {
        self.followers.insert(user.clone())
    }

    pub fn remove_follower(&mut self, user: &UserId) -> bool {
        self.followers.remove(user)
    }

    pub fn followers(&self) -> impl Iterator<Item = &UserId> {
        self.followers.iter()
    }

    // -- Posts --

    /// Record an inbound POST. Only posts from followed users are kept;
    /// returns true if the post was new and kept.
    pub fn on_post(&mut self, post: Post) -> bool {
        if !self.following.contains(&post.user_id) {
            tracing::debug!(from = %post.user_id, "post from unfollowed user ignored");
            return false;
        }
        if !self.seen_posts.insert(post.message_id.clone()) {
            return false;
        }
        self.timeline.push(post);
        true
    }

    pub fn record_own_post(&mut self, post: Post) {
        self.own_posts.push(post);
    }

    /// Posts still within their TTL, optionally from one author.
    pub fn visible_posts(&self, from: Option<&UserId>, now: u64) -> Vec<&Post> {
        self.timeline
            .iter()
            .filter(|p| from.map_or(true, |f| p.user_id == *f))
            .filter(|p| p.timestamp.saturating_add(p.ttl) >= now)
            .collect()
    }

    pub fn own_posts(&self) -> &[Post] {
        &self.own_posts
    }

    // -- Direct messages --

    /// Record an inbound DM. False for a retransmission already seen.
    pub fn on_direct_message(&mut self, dm: &DirectMessage) -> bool {
        if !self.seen_dms.insert(dm.message_id.clone()) {
            return false;
        }
        self.conversations
            .entry(dm.from.clone())
            .or_default()
            .push(DirectEntry {
                peer: dm.from.clone(),
                outgoing: false,
                content: dm.content.clone(),
                timestamp: dm.timestamp,
            });
        true
    }

    pub fn record_sent_dm(&mut self, dm: &DirectMessage) {
        self.conversations
            .entry(dm.to.clone())
            .or_default()
            .push(DirectEntry {
                peer: dm.to.clone(),
                outgoing: true,
                content: dm.content.clone(),
                timestamp: dm.timestamp,
            });
    }

    pub fn conversation(&self, peer: &UserId) -> &[DirectEntry] {
        self.conversations
            .get(peer)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    // -- Likes --

    /// Apply a LIKE/UNLIKE aimed at one of our posts. None if it changes
    /// nothing (repeat like, unlike without a like).
    pub fn on_like(&mut self, like: &Like) -> Option<LikeRecord> {
        let changed = match like.action {
            LikeAction::Like => self
                .likes
                .entry(like.post_timestamp)
                .or_default()
                .insert(like.from.clone()),
            LikeAction::Unlike => self
                .likes
                .get_mut(&like.post_timestamp)
                .is_some_and(|users| users.remove(&like.from)),
        };
        if !changed {
            return None;
        }
        let post = self
            .own_posts
            .iter()
            .find(|p| p.timestamp == like.post_timestamp)
            .map(|p| p.content.clone());
        Some(LikeRecord {
            by: like.from.clone(),
            post_timestamp: like.post_timestamp,
            action: like.action,
            post,
        })
    }

    pub fn like_count(&self, post_timestamp: u64) -> usize {
        self.likes.get(&post_timestamp).map_or(0, BTreeSet::len)
    }
}
