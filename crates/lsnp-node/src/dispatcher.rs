//! Inbound routing.
//!
//! Every datagram goes through the same steps:
//!   1. decode (malformed -> dropped, debug log)
//!   2. REVOKE -> revocation set, stop
//!   3. our own broadcast looped back -> dropped
//!   4. token check for scoped types (failure -> dropped silently)
//!   5. exhaustive match on the message type

use lsnp_protocol::{
    decode, Ack, AckStatus, Destination, Frame, Message, ProtocolError, UserId,
};
use lsnp_reliability::{ExchangeKind, Outbound};

use crate::effect::{Effect, Notice};
use crate::state::{NodeState, Now};

impl NodeState {
    /// Handle one inbound datagram.
    pub fn dispatch(&mut self, payload: &[u8], now: Now) -> Vec<Effect> {
        match decode(payload) {
            Ok(frame) => self.dispatch_frame(&frame, now),
            Err(e) => {
                tracing::debug!(len = payload.len(), "dropping undecodable datagram: {e}");
                Vec::new()
            }
        }
    }

    pub fn dispatch_frame(&mut self, frame: &Frame, now: Now) -> Vec<Effect> {
        let message = match Message::from_frame(frame) {
            Ok(message) => message,
            Err(e) => {
                log_malformed(frame, &e);
                return Vec::new();
            }
        };
        tracing::debug!(
            msg_type = %message.message_type(),
            fields = ?frame.fields().collect::<Vec<_>>(),
            "received"
        );

        if let Message::Revoke(revoke) = &message {
            if self.tokens.revoke(&revoke.token) {
                tracing::info!(token = %revoke.token, "token revoked by peer");
            }
            return Vec::new();
        }

        if message.sender() == Some(&self.local) {
            return Vec::new();
        }

        if !self.authorized(&message, now.wall) {
            return Vec::new();
        }

        self.route(message, now)
    }

    fn authorized(&self, message: &Message, now: u64) -> bool {
        let msg_type = message.message_type();
        let Some(scope) = msg_type.required_scope() else {
            return true;
        };
        let (Some(token), Some(sender)) = (message.auth_token(), message.sender()) else {
            return false;
        };
        match self.tokens.check(token, scope, sender.as_str(), now) {
            Ok(()) => true,
            Err(reason) => {
                tracing::debug!(
                    msg_type = %msg_type,
                    sender = %sender,
                    "dropping unauthorized message: {reason}"
                );
                false
            }
        }
    }

    fn route(&mut self, message: Message, now: Now) -> Vec<Effect> {
        match message {
            Message::Profile(profile) => {
                if !self.peers.on_profile(&profile, now.wall) {
                    return Vec::new();
                }
                vec![Effect::Notify(Notice::PeerDiscovered {
                    user_id: profile.user_id,
                    display_name: profile.display_name,
                    status: profile.status,
                })]
            }
            Message::Ping(ping) => {
                self.peers.on_ping(&ping.user_id, now.wall);
                self.announce_profile()
            }
            Message::Post(post) => {
                let from = post.user_id.clone();
                let content = post.content.clone();
                if !self.social.on_post(post) {
                    return Vec::new();
                }
                vec![Effect::Notify(Notice::Post {
                    display_name: self.peers.display_name(&from),
                    from,
                    content,
                })]
            }
            Message::Dm(dm) => {
                if !self.addressed_to_us(&dm.to) {
                    return Vec::new();
                }
                let mut effects = vec![self.ack(&dm.message_id, AckStatus::Received, &dm.from, now)];
                if self.social.on_direct_message(&dm) {
                    effects.push(Effect::Notify(Notice::DirectMessage {
                        display_name: self.peers.display_name(&dm.from),
                        from: dm.from,
                        content: dm.content,
                    }));
                }
                effects
            }
            Message::Follow(follow) => {
                if !self.addressed_to_us(&follow.to) || !self.social.add_follower(&follow.from) {
                    return Vec::new();
                }
                tracing::info!(by = %follow.from, "new follower");
                vec![Effect::Notify(Notice::Followed { by: follow.from })]
            }
            Message::Unfollow(follow) => {
                if !self.addressed_to_us(&follow.to) || !self.social.remove_follower(&follow.from)
                {
                    return Vec::new();
                }
                vec![Effect::Notify(Notice::Unfollowed { by: follow.from })]
            }
            Message::Ack(ack) => self.on_ack(ack, now),
            Message::Revoke(_) => Vec::new(),
            Message::Like(like) => {
                if !self.addressed_to_us(&like.to) {
                    return Vec::new();
                }
                match self.social.on_like(&like) {
                    Some(record) => vec![Effect::Notify(Notice::Liked {
                        by: record.by,
                        post_timestamp: record.post_timestamp,
                        action: record.action,
                        post: record.post,
                    })],
                    None => Vec::new(),
                }
            }
            Message::FileOffer(offer) => {
                if !self.addressed_to_us(&offer.to) {
                    return Vec::new();
                }
                let actions = self.transfers.on_offer(offer, now.wall);
                self.transfer_effects(actions, now)
            }
            Message::FileChunk(chunk) => {
                if !self.addressed_to_us(&chunk.to) {
                    return Vec::new();
                }
                let actions = self.transfers.on_chunk(chunk, now.wall);
                self.transfer_effects(actions, now)
            }
            Message::FileReceived(received) => {
                if !self.addressed_to_us(&received.to) {
                    return Vec::new();
                }
                let actions = self.transfers.on_received(received);
                self.transfer_effects(actions, now)
            }
            Message::GameInvite(invite) => {
                if !self.addressed_to_us(&invite.to) {
                    return Vec::new();
                }
                let actions = self.games.on_invite(invite, now.wall);
                self.game_effects(actions, now)
            }
            Message::GameMove(mv) => {
                if !self.addressed_to_us(&mv.to) {
                    return Vec::new();
                }
                let actions = self.games.on_move(mv);
                self.game_effects(actions, now)
            }
            Message::GameResult(result) => {
                if !self.addressed_to_us(&result.to) {
                    return Vec::new();
                }
                let game_id = result.game_id;
                let actions = self.games.on_result(result);
                if !actions.is_empty() {
                    self.cancel_moves(game_id);
                }
                self.game_effects(actions, now)
            }
            Message::GroupCreate(create) => self
                .groups
                .on_create(&create)
                .map(|change| vec![Effect::Notify(Notice::Group(change))])
                .unwrap_or_default(),
            Message::GroupUpdate(update) => self
                .groups
                .on_update(&update)
                .map(|change| vec![Effect::Notify(Notice::Group(change))])
                .unwrap_or_default(),
            Message::GroupMessage(msg) => {
                if !self.groups.on_message(&msg) {
                    return Vec::new();
                }
                vec![Effect::Notify(Notice::GroupMessage {
                    group_id: msg.group_id,
                    from: msg.from,
                    content: msg.content,
                })]
            }
        }
    }

    /// Resolve the exchange an ACK answers and continue its owner.
    fn on_ack(&mut self, ack: Ack, now: Now) -> Vec<Effect> {
        let Some(kind) = self.reliability.kind_of(&ack.message_id).cloned() else {
            tracing::debug!(message_id = %ack.message_id, "ACK for nothing pending");
            return Vec::new();
        };
        // A bare receipt does not answer an offer or invite; keep waiting
        // for ACCEPTED/REJECTED.
        if ack.status == AckStatus::Received
            && matches!(
                kind,
                ExchangeKind::FileOffer { .. } | ExchangeKind::GameInvite { .. }
            )
        {
            return Vec::new();
        }
        self.reliability.resolve(&ack.message_id);

        match kind {
            ExchangeKind::DirectMessage | ExchangeKind::GameMove { .. } => Vec::new(),
            ExchangeKind::FileOffer { file_id } => {
                let actions = self.transfers.on_offer_answered(&file_id, ack.status);
                self.transfer_effects(actions, now)
            }
            ExchangeKind::FileChunk {
                file_id,
                chunk_index,
            } => {
                let actions = self.transfers.on_chunk_settled(&file_id, chunk_index, true);
                self.transfer_effects(actions, now)
            }
            ExchangeKind::GameInvite { game_id } => {
                let actions = self.games.on_invite_answered(game_id, ack.status);
                self.game_effects(actions, now)
            }
        }
    }

    fn addressed_to_us(&self, to: &UserId) -> bool {
        if *to == self.local {
            return true;
        }
        tracing::debug!(to = %to, "message addressed to someone else");
        false
    }

    fn ack(&mut self, message_id: &str, status: AckStatus, to: &UserId, now: Now) -> Effect {
        self.emit(
            Outbound::unreliable(
                Message::Ack(Ack {
                    message_id: message_id.to_string(),
                    status,
                }),
                Destination::Peer(to.clone()),
            ),
            now,
        )
    }
}

fn log_malformed(frame: &Frame, error: &ProtocolError) {
    tracing::debug!(
        msg_type = frame.get("TYPE").unwrap_or("-"),
        "dropping malformed message: {error}"
    );
}
