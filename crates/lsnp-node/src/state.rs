//! Node state -- every table the protocol needs, owned in one place.
//!
//! `NodeState` is a pure state machine: local operations and inbound
//! datagrams (see `dispatcher`) return `Effect`s, which the node's tasks
//! execute. Tokens are stamped and reliable sends are tracked here, so the
//! engines never see either concern.

use std::time::Instant;

use lsnp_game::{GameAction, GameEngine, GameError};
use lsnp_protocol::{
    fresh_message_id, now_secs, Destination, DirectMessage, Follow, GameId, GroupCreate,
    GroupMessage, GroupUpdate, Like, LikeAction, Message, Ping, Post, Profile, Revoke, Scope,
    Symbol, TokenAuthority, UserId, LSNP_TIMING,
};
use lsnp_reliability::{ExchangeKind, Outbound, ReliabilityEngine};
use lsnp_transfer::{TransferAction, TransferEngine, TransferError};

use crate::effect::{Effect, Notice};
use crate::groups::GroupStore;
use crate::peer_directory::PeerDirectory;
use crate::social::SocialStore;

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("message content is empty")]
    EmptyContent,
    #[error("cannot address yourself")]
    SelfAddressed,
    #[error("unknown group {0}")]
    UnknownGroup(String),
    #[error("group {0} already exists")]
    GroupExists(String),
    #[error("no live {0} token to revoke")]
    NoLiveToken(Scope),
    #[error(transparent)]
    Transfer(#[from] TransferError),
    #[error(transparent)]
    Game(#[from] GameError),
}

/// A point in time on both clocks: wall seconds for tokens and message
/// timestamps, monotonic for retry deadlines.
#[derive(Debug, Clone, Copy)]
pub struct Now {
    pub wall: u64,
    pub mono: Instant,
}

impl Now {
    pub fn current() -> Self {
        Self {
            wall: now_secs(),
            mono: Instant::now(),
        }
    }
}

pub struct NodeState {
    pub(crate) local: UserId,
    pub(crate) profile: Profile,
    pub(crate) tokens: TokenAuthority,
    pub(crate) peers: PeerDirectory,
    pub(crate) social: SocialStore,
    pub(crate) groups: GroupStore,
    pub(crate) reliability: ReliabilityEngine,
    pub(crate) transfers: TransferEngine,
    pub(crate) games: GameEngine,
}

impl NodeState {
    pub fn new(profile: Profile, token_ttl_secs: u64, chunk_size: usize) -> Self {
        let local = profile.user_id.clone();
        Self {
            tokens: TokenAuthority::new(local.clone(), token_ttl_secs),
            peers: PeerDirectory::new(),
            social: SocialStore::new(),
            groups: GroupStore::new(local.clone()),
            reliability: ReliabilityEngine::new(),
            transfers: TransferEngine::with_chunk_size(local.clone(), chunk_size),
            games: GameEngine::new(local.clone()),
            local,
            profile,
        }
    }

    pub fn local(&self) -> &UserId {
        &self.local
    }

    pub fn peers(&self) -> &PeerDirectory {
        &self.peers
    }

    pub fn social(&self) -> &SocialStore {
        &self.social
    }

    pub fn groups(&self) -> &GroupStore {
        &self.groups
    }

    pub fn transfers(&self) -> &TransferEngine {
        &self.transfers
    }

    pub fn games(&self) -> &GameEngine {
        &self.games
    }

    pub fn tokens(&self) -> &TokenAuthority {
        &self.tokens
    }

    pub fn reliability(&self) -> &ReliabilityEngine {
        &self.reliability
    }

    // ========================================================================
    // Announcements
    // ========================================================================

    pub fn profile_message(&self) -> Message {
        Message::Profile(self.profile.clone())
    }

    pub fn announce_profile(&self) -> Vec<Effect> {
        vec![Effect::send(self.profile_message(), Destination::Broadcast)]
    }

    pub fn announce_ping(&self) -> Vec<Effect> {
        let ping = Message::Ping(Ping {
            user_id: self.local.clone(),
        });
        vec![Effect::send(ping, Destination::Broadcast)]
    }

    // ========================================================================
    // Outbound plumbing
    // ========================================================================

    /// Stamp the token, start tracking if reliable, and turn into an effect.
    pub(crate) fn emit(&mut self, outbound: Outbound, now: Now) -> Effect {
        let (mut message, to, tracking) = match outbound {
            Outbound::Unreliable { message, to } => (message, to, None),
            Outbound::Reliable {
                message,
                to,
                policy,
                kind,
            } => (message, to, Some((policy, kind))),
        };
        self.stamp(&mut message, now.wall);
        if let Some((policy, kind)) = tracking {
            self.reliability
                .track(message.clone(), to.clone(), policy, kind, now.mono);
        }
        Effect::send(message, to)
    }

    fn stamp(&mut self, message: &mut Message, now: u64) {
        let Some(scope) = message.message_type().required_scope() else {
            return;
        };
        if let Some(token) = message.auth_token_mut() {
            if token.is_empty() {
                *token = self.tokens.token_for(scope, now);
            }
        }
    }

    pub(crate) fn transfer_effects(
        &mut self,
        actions: Vec<TransferAction>,
        now: Now,
    ) -> Vec<Effect> {
        actions
            .into_iter()
            .map(|action| match action {
                TransferAction::Send(out) => self.emit(out, now),
                TransferAction::Persist(file) => Effect::Persist(file),
                TransferAction::Notify(event) => Effect::Notify(Notice::Transfer(event)),
            })
            .collect()
    }

    pub(crate) fn game_effects(&mut self, actions: Vec<GameAction>, now: Now) -> Vec<Effect> {
        actions
            .into_iter()
            .map(|action| match action {
                GameAction::Send(out) => self.emit(out, now),
                GameAction::Notify(event) => Effect::Notify(Notice::Game(event)),
            })
            .collect()
    }

    /// Stop retransmitting moves for a game that is over.
    pub(crate) fn cancel_moves(&mut self, game: GameId) {
        let cancelled = self.reliability.cancel_where(
            |kind| matches!(kind, ExchangeKind::GameMove { game_id, .. } if *game_id == game),
        );
        if cancelled > 0 {
            tracing::debug!(game = %game, cancelled, "cancelled pending moves");
        }
    }

    fn not_self(&self, user: &UserId) -> Result<(), NodeError> {
        if *user == self.local {
            return Err(NodeError::SelfAddressed);
        }
        Ok(())
    }

    // ========================================================================
    // Social
    // ========================================================================

    pub fn post(&mut self, content: &str, now: Now) -> Result<Vec<Effect>, NodeError> {
        if content.trim().is_empty() {
            return Err(NodeError::EmptyContent);
        }
        let post = Post {
            user_id: self.local.clone(),
            content: content.to_string(),
            ttl: LSNP_TIMING.post_ttl_secs,
            message_id: fresh_message_id(),
            token: String::new(),
            timestamp: now.wall,
        };
        self.social.record_own_post(post.clone());
        let effect = self.emit(
            Outbound::unreliable(Message::Post(post), Destination::Broadcast),
            now,
        );
        Ok(vec![effect])
    }

    pub fn direct_message(
        &mut self,
        to: UserId,
        content: &str,
        now: Now,
    ) -> Result<Vec<Effect>, NodeError> {
        self.not_self(&to)?;
        if content.trim().is_empty() {
            return Err(NodeError::EmptyContent);
        }
        let dm = DirectMessage {
            from: self.local.clone(),
            to: to.clone(),
            content: content.to_string(),
            timestamp: now.wall,
            message_id: fresh_message_id(),
            token: String::new(),
        };
        self.social.record_sent_dm(&dm);
        let effect = self.emit(
            Outbound::reliable(
                Message::Dm(dm),
                Destination::Peer(to),
                LSNP_TIMING.direct_message_retry,
                ExchangeKind::DirectMessage,
            ),
            now,
        );
        Ok(vec![effect])
    }

    pub fn follow(&mut self, to: UserId, now: Now) -> Result<Vec<Effect>, NodeError> {
        self.not_self(&to)?;
        self.social.follow(&to);
        let msg = Message::Follow(self.follow_body(&to, now));
        Ok(vec![self.emit(
            Outbound::unreliable(msg, Destination::Peer(to)),
            now,
        )])
    }

    pub fn unfollow(&mut self, to: UserId, now: Now) -> Result<Vec<Effect>, NodeError> {
        self.not_self(&to)?;
        self.social.unfollow(&to);
        let msg = Message::Unfollow(self.follow_body(&to, now));
        Ok(vec![self.emit(
            Outbound::unreliable(msg, Destination::Peer(to)),
            now,
        )])
    }

    fn follow_body(&self, to: &UserId, now: Now) -> Follow {
        Follow {
            from: self.local.clone(),
            to: to.clone(),
            timestamp: now.wall,
            message_id: fresh_message_id(),
            token: String::new(),
        }
    }

    pub fn like(
        &mut self,
        to: UserId,
        post_timestamp: u64,
        action: LikeAction,
        now: Now,
    ) -> Result<Vec<Effect>, NodeError> {
        self.not_self(&to)?;
        let like = Like {
            from: self.local.clone(),
            to: to.clone(),
            post_timestamp,
            action,
            timestamp: now.wall,
            token: String::new(),
        };
        Ok(vec![self.emit(
            Outbound::unreliable(Message::Like(like), Destination::Peer(to)),
            now,
        )])
    }

    // ========================================================================
    // Files
    // ========================================================================

    pub fn send_file(
        &mut self,
        to: UserId,
        filename: &str,
        filetype: &str,
        description: &str,
        data: Vec<u8>,
        now: Now,
    ) -> Result<(String, Vec<Effect>), NodeError> {
        self.not_self(&to)?;
        let (file_id, actions) = self
            .transfers
            .offer(to, filename, filetype, description, data)?;
        Ok((file_id, self.transfer_effects(actions, now)))
    }

    pub fn accept_file(&mut self, file_id: &str, now: Now) -> Result<Vec<Effect>, NodeError> {
        let actions = self.transfers.accept(file_id, now.wall)?;
        Ok(self.transfer_effects(actions, now))
    }

    pub fn reject_file(&mut self, file_id: &str, now: Now) -> Result<Vec<Effect>, NodeError> {
        let actions = self.transfers.reject(file_id)?;
        Ok(self.transfer_effects(actions, now))
    }

    // ========================================================================
    // Games
    // ========================================================================

    pub fn invite(
        &mut self,
        to: UserId,
        symbol: Symbol,
        now: Now,
    ) -> Result<(GameId, Vec<Effect>), NodeError> {
        let (game_id, actions) = self.games.invite(to, symbol, now.wall)?;
        Ok((game_id, self.game_effects(actions, now)))
    }

    pub fn accept_game(&mut self, game_id: GameId, now: Now) -> Result<Vec<Effect>, NodeError> {
        let actions = self.games.accept(game_id)?;
        Ok(self.game_effects(actions, now))
    }

    pub fn decline_game(&mut self, game_id: GameId, now: Now) -> Result<Vec<Effect>, NodeError> {
        let actions = self.games.decline(game_id)?;
        Ok(self.game_effects(actions, now))
    }

    pub fn play(
        &mut self,
        game_id: GameId,
        position: u8,
        now: Now,
    ) -> Result<Vec<Effect>, NodeError> {
        let actions = self.games.play(game_id, position, now.wall)?;
        Ok(self.game_effects(actions, now))
    }

    pub fn forfeit(&mut self, game_id: GameId, now: Now) -> Result<Vec<Effect>, NodeError> {
        let actions = self.games.forfeit(game_id, now.wall)?;
        self.cancel_moves(game_id);
        Ok(self.game_effects(actions, now))
    }

    // ========================================================================
    // Groups
    // ========================================================================

    pub fn create_group(
        &mut self,
        group_id: &str,
        name: &str,
        members: Vec<UserId>,
        now: Now,
    ) -> Result<Vec<Effect>, NodeError> {
        if !self.groups.create(group_id, name, &members) {
            return Err(NodeError::GroupExists(group_id.to_string()));
        }
        let all: Vec<UserId> = self
            .groups
            .get(group_id)
            .map(|g| g.members.iter().cloned().collect())
            .unwrap_or_default();
        let msg = Message::GroupCreate(GroupCreate {
            from: self.local.clone(),
            group_id: group_id.to_string(),
            group_name: name.to_string(),
            members: all,
            token: String::new(),
        });
        let recipients = self.groups.recipients(group_id);
        Ok(self.fan_out(msg, recipients, now))
    }

    pub fn update_group(
        &mut self,
        group_id: &str,
        add: Vec<UserId>,
        remove: Vec<UserId>,
        now: Now,
    ) -> Result<Vec<Effect>, NodeError> {
        let before = self
            .groups
            .apply_update(group_id, &add, &remove)
            .ok_or_else(|| NodeError::UnknownGroup(group_id.to_string()))?;
        // Removed members are told too.
        let mut recipients: Vec<UserId> = before.into_iter().chain(add.iter().cloned()).collect();
        recipients.sort();
        recipients.dedup();
        recipients.retain(|u| *u != self.local);

        let msg = Message::GroupUpdate(GroupUpdate {
            from: self.local.clone(),
            group_id: group_id.to_string(),
            add,
            remove,
            token: String::new(),
        });
        Ok(self.fan_out(msg, recipients, now))
    }

    pub fn group_message(
        &mut self,
        group_id: &str,
        content: &str,
        now: Now,
    ) -> Result<Vec<Effect>, NodeError> {
        if self.groups.get(group_id).is_none() {
            return Err(NodeError::UnknownGroup(group_id.to_string()));
        }
        if content.trim().is_empty() {
            return Err(NodeError::EmptyContent);
        }
        self.groups.record_sent(group_id, content);
        let msg = Message::GroupMessage(GroupMessage {
            from: self.local.clone(),
            group_id: group_id.to_string(),
            content: content.to_string(),
            token: String::new(),
        });
        let recipients = self.groups.recipients(group_id);
        Ok(self.fan_out(msg, recipients, now))
    }

    /// Group traffic has no single TO; unicast one copy per member.
    fn fan_out(&mut self, msg: Message, recipients: Vec<UserId>, now: Now) -> Vec<Effect> {
        recipients
            .into_iter()
            .map(|user| {
                self.emit(
                    Outbound::unreliable(msg.clone(), Destination::Peer(user)),
                    now,
                )
            })
            .collect()
    }

    // ========================================================================
    // Tokens
    // ========================================================================

    /// Revoke our current token for `scope` and announce it. Messages
    /// still awaiting an ACK are resent with a fresh token.
    pub fn revoke_scope(&mut self, scope: Scope, now: Now) -> Result<Vec<Effect>, NodeError> {
        let token = self
            .tokens
            .live_token(scope, now.wall)
            .ok_or(NodeError::NoLiveToken(scope))?;
        self.tokens.revoke(&token);

        let tokens = &mut self.tokens;
        let mut fresh: Option<String> = None;
        let restamped = self.reliability.restamp(|message| match message.auth_token_mut() {
            Some(stamped) if *stamped == token => {
                *stamped = fresh
                    .get_or_insert_with(|| tokens.token_for(scope, now.wall))
                    .clone();
                true
            }
            _ => false,
        });
        tracing::info!(scope = %scope, restamped, "token revoked");
        Ok(vec![Effect::send(
            Message::Revoke(Revoke { token }),
            Destination::Broadcast,
        )])
    }

    // ========================================================================
    // Retries and shutdown
    // ========================================================================

    pub fn next_deadline(&self) -> Option<Instant> {
        self.reliability.next_deadline()
    }

    /// Resend due exchanges, hand abandoned ones to their owners, and drop
    /// invites and transfers that went stale.
    pub fn on_tick(&mut self, now: Now) -> Vec<Effect> {
        let actions = self.reliability.tick(now.mono);
        let mut effects: Vec<Effect> = actions
            .resend
            .into_iter()
            .map(|(message, to)| Effect::send(message, to))
            .collect();

        for abandoned in actions.abandoned {
            match abandoned.kind {
                ExchangeKind::DirectMessage => {
                    effects.push(Effect::Notify(Notice::DeliveryFailed {
                        to: abandoned.destination,
                        message_id: abandoned.message_id,
                    }));
                }
                ExchangeKind::FileOffer { file_id } => {
                    let actions = self.transfers.on_offer_abandoned(&file_id);
                    effects.extend(self.transfer_effects(actions, now));
                }
                ExchangeKind::FileChunk {
                    file_id,
                    chunk_index,
                } => {
                    let actions = self.transfers.on_chunk_settled(&file_id, chunk_index, false);
                    effects.extend(self.transfer_effects(actions, now));
                }
                ExchangeKind::GameInvite { game_id } => {
                    let actions = self.games.on_invite_abandoned(game_id);
                    effects.extend(self.game_effects(actions, now));
                }
                ExchangeKind::GameMove { game_id, turn } => {
                    let actions = self
                        .games
                        .on_move_abandoned(game_id, turn, &abandoned.message_id);
                    effects.extend(self.game_effects(actions, now));
                }
            }
        }

        let actions = self.transfers.expire(now.wall);
        effects.extend(self.transfer_effects(actions, now));
        let actions = self.games.expire(now.wall);
        effects.extend(self.game_effects(actions, now));
        effects
    }

    /// Abandon everything in flight and announce revocation of every token
    /// we issued.
    pub fn shutdown(&mut self, now: Now) -> Vec<Effect> {
        let dropped = self.reliability.drain().len();
        self.transfers.clear();
        self.games.clear();
        let revoked = self.tokens.revoke_all_issued(now.wall);
        tracing::info!(dropped, revoked = revoked.len(), "node state shut down");
        revoked
            .into_iter()
            .map(|token| Effect::send(Message::Revoke(Revoke { token }), Destination::Broadcast))
            .collect()
    }
}
