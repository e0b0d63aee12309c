//! Game engine -- invitations and sessions keyed by game id.
//!
//! One id namespace per node: ids we allocate for our invites and ids
//! peers chose for theirs live in the same pool, so a session is always
//! found by id alone.

use std::collections::HashMap;

use lsnp_protocol::{
    fresh_message_id, Ack, AckStatus, Destination, GameId, GameInvite, GameMove, GameOutcome,
    GameResult, Message, Symbol, UserId, LSNP_TIMING,
};
use lsnp_reliability::{ExchangeKind, Outbound};

use crate::board::{Board, BoardOutcome};
use crate::pool::GameIdPool;
use crate::{GameError, MoveError};

#[derive(Debug, Clone, PartialEq)]
pub enum GameAction {
    Send(Outbound),
    Notify(GameEvent),
}

/// How a finished game ended, from our side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalOutcome {
    Won { line: Option<[u8; 3]> },
    Lost { line: Option<[u8; 3]> },
    Draw,
    Forfeited,
    OpponentForfeited,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameEvent {
    InviteReceived {
        from: UserId,
        game_id: GameId,
        their_symbol: Symbol,
    },
    InviteRefused { from: UserId, game_id: GameId },
    InviteDeclined { to: UserId, game_id: GameId },
    InviteExpired { to: UserId, game_id: GameId },
    /// We never answered their invite.
    InviteLapsed { from: UserId, game_id: GameId },
    GameStarted {
        game_id: GameId,
        opponent: UserId,
        symbol: Symbol,
    },
    YourTurn {
        game_id: GameId,
        opponent: UserId,
        turn: u32,
        board: Board,
    },
    MovePlayed {
        game_id: GameId,
        by: UserId,
        position: u8,
        board: Board,
    },
    GameOver {
        game_id: GameId,
        opponent: UserId,
        outcome: LocalOutcome,
        board: Board,
    },
    GameAbandoned { game_id: GameId, opponent: UserId },
}

#[derive(Debug, Clone)]
pub struct GameSession {
    pub game_id: GameId,
    pub opponent: UserId,
    pub symbol: Symbol,
    pub board: Board,
    /// Applied moves as (turn, position, symbol).
    history: Vec<(u32, u8, Symbol)>,
    /// MESSAGE_ID of the invite, for re-ACKing retransmissions.
    invite_message_id: String,
    /// MESSAGE_ID of our last move, until the opponent answers it.
    unanswered_move: Option<String>,
}

impl GameSession {
    fn new(game_id: GameId, opponent: UserId, symbol: Symbol, invite_message_id: String) -> Self {
        Self {
            game_id,
            opponent,
            symbol,
            board: Board::new(),
            history: Vec::new(),
            invite_message_id,
            unanswered_move: None,
        }
    }

    /// Turn number the next move must carry.
    pub fn expected_turn(&self) -> u32 {
        self.history.len() as u32 + 1
    }

    /// X on odd turns, O on even.
    pub fn expected_symbol(&self) -> Symbol {
        if self.expected_turn() % 2 == 1 {
            Symbol::X
        } else {
            Symbol::O
        }
    }

    pub fn is_my_turn(&self) -> bool {
        self.expected_symbol() == self.symbol
    }

    fn is_duplicate(&self, mv: &GameMove) -> bool {
        self.history.contains(&(mv.turn, mv.position, mv.symbol))
    }

    fn apply(&mut self, turn: u32, position: u8, symbol: Symbol) -> Result<(), MoveError> {
        let expected = self.expected_turn();
        if turn != expected {
            return Err(MoveError::WrongTurn {
                expected,
                got: turn,
            });
        }
        let expected = self.expected_symbol();
        if symbol != expected {
            return Err(MoveError::WrongSymbol {
                expected,
                got: symbol,
            });
        }
        self.board.place(position, symbol)?;
        self.history.push((turn, position, symbol));
        Ok(())
    }
}

#[derive(Debug)]
struct PendingInvite {
    invite: GameInvite,
    received_at: u64,
}

#[derive(Debug)]
struct OutgoingInvite {
    to: UserId,
    symbol: Symbol,
    message_id: String,
}

pub struct GameEngine {
    local: UserId,
    pool: GameIdPool,
    outgoing: HashMap<GameId, OutgoingInvite>,
    incoming: HashMap<GameId, PendingInvite>,
    sessions: HashMap<GameId, GameSession>,
}

impl GameEngine {
    pub fn new(local: UserId) -> Self {
        Self {
            local,
            pool: GameIdPool::new(),
            outgoing: HashMap::new(),
            incoming: HashMap::new(),
            sessions: HashMap::new(),
        }
    }

    // -- Invitations --

    /// Invite `to`, playing `symbol` ourselves.
    pub fn invite(
        &mut self,
        to: UserId,
        symbol: Symbol,
        now: u64,
    ) -> Result<(GameId, Vec<GameAction>), GameError> {
        if to == self.local {
            return Err(GameError::SelfInvite);
        }
        let game_id = self.pool.allocate().ok_or(GameError::NoFreeGameId)?;
        let message_id = fresh_message_id();
        let invite = GameInvite {
            from: self.local.clone(),
            to: to.clone(),
            game_id,
            symbol,
            message_id: message_id.clone(),
            timestamp: now,
            token: String::new(),
        };
        tracing::info!(game = %game_id, to = %to, symbol = %symbol, "sending game invite");
        self.outgoing.insert(
            game_id,
            OutgoingInvite {
                to: to.clone(),
                symbol,
                message_id,
            },
        );
        let send = Outbound::reliable(
            Message::GameInvite(invite),
            Destination::Peer(to),
            LSNP_TIMING.game_invite_retry,
            ExchangeKind::GameInvite { game_id },
        );
        Ok((game_id, vec![GameAction::Send(send)]))
    }

    pub fn on_invite(&mut self, invite: GameInvite, now: u64) -> Vec<GameAction> {
        let game_id = invite.game_id;
        if let Some(session) = self.sessions.get(&game_id) {
            if session.opponent == invite.from && session.invite_message_id == invite.message_id {
                return vec![ack(&invite.message_id, AckStatus::Accepted, &invite.from)];
            }
        }
        if let Some(pending) = self.incoming.get(&game_id) {
            if pending.invite.from == invite.from {
                return Vec::new();
            }
        }
        if !self.pool.reserve(game_id) {
            tracing::warn!(game = %game_id, from = %invite.from, "game id already in use, refusing invite");
            return vec![
                ack(&invite.message_id, AckStatus::Rejected, &invite.from),
                GameAction::Notify(GameEvent::InviteRefused {
                    from: invite.from,
                    game_id,
                }),
            ];
        }

        tracing::info!(game = %game_id, from = %invite.from, "game invite received");
        let event = GameEvent::InviteReceived {
            from: invite.from.clone(),
            game_id,
            their_symbol: invite.symbol,
        };
        self.incoming.insert(
            game_id,
            PendingInvite {
                invite,
                received_at: now,
            },
        );
        vec![GameAction::Notify(event)]
    }

    pub fn accept(&mut self, game_id: GameId) -> Result<Vec<GameAction>, GameError> {
        let invite = self
            .incoming
            .remove(&game_id)
            .ok_or(GameError::UnknownInvite(game_id))?
            .invite;
        let session = GameSession::new(
            game_id,
            invite.from.clone(),
            invite.symbol.other(),
            invite.message_id.clone(),
        );
        let mut actions = vec![ack(&invite.message_id, AckStatus::Accepted, &invite.from)];
        actions.extend(started(&session));
        self.sessions.insert(game_id, session);
        Ok(actions)
    }

    pub fn decline(&mut self, game_id: GameId) -> Result<Vec<GameAction>, GameError> {
        let invite = self
            .incoming
            .remove(&game_id)
            .ok_or(GameError::UnknownInvite(game_id))?
            .invite;
        self.pool.release(game_id);
        Ok(vec![ack(&invite.message_id, AckStatus::Rejected, &invite.from)])
    }

    /// The invitee answered our invite.
    pub fn on_invite_answered(&mut self, game_id: GameId, status: AckStatus) -> Vec<GameAction> {
        if status == AckStatus::Received {
            return Vec::new();
        }
        let Some(invite) = self.outgoing.remove(&game_id) else {
            return Vec::new();
        };
        match status {
            AckStatus::Accepted => {
                let session = GameSession::new(game_id, invite.to, invite.symbol, invite.message_id);
                let actions = started(&session);
                self.sessions.insert(game_id, session);
                actions
            }
            _ => {
                self.pool.release(game_id);
                tracing::info!(game = %game_id, to = %invite.to, "invite declined");
                vec![GameAction::Notify(GameEvent::InviteDeclined {
                    to: invite.to,
                    game_id,
                })]
            }
        }
    }

    pub fn on_invite_abandoned(&mut self, game_id: GameId) -> Vec<GameAction> {
        let Some(invite) = self.outgoing.remove(&game_id) else {
            return Vec::new();
        };
        self.pool.release(game_id);
        vec![GameAction::Notify(GameEvent::InviteExpired {
            to: invite.to,
            game_id,
        })]
    }

    /// Drop invites we left unanswered past the stale limit and free
    /// their ids.
    pub fn expire(&mut self, now: u64) -> Vec<GameAction> {
        let limit = LSNP_TIMING.stale_session_secs;
        let mut stale: Vec<GameId> = self
            .incoming
            .iter()
            .filter(|(_, p)| now.saturating_sub(p.received_at) >= limit)
            .map(|(id, _)| *id)
            .collect();
        stale.sort();
        stale
            .into_iter()
            .filter_map(|game_id| {
                let pending = self.incoming.remove(&game_id)?;
                self.pool.release(game_id);
                tracing::info!(game = %game_id, from = %pending.invite.from, "unanswered invite lapsed");
                Some(GameAction::Notify(GameEvent::InviteLapsed {
                    from: pending.invite.from,
                    game_id,
                }))
            })
            .collect()
    }

    // -- Moves --

    /// Play a local move.
    pub fn play(
        &mut self,
        game_id: GameId,
        position: u8,
        now: u64,
    ) -> Result<Vec<GameAction>, GameError> {
        let session = self
            .sessions
            .get_mut(&game_id)
            .ok_or(GameError::UnknownGame(game_id))?;
        if !session.is_my_turn() {
            return Err(GameError::NotYourTurn(game_id));
        }
        let turn = session.expected_turn();
        let symbol = session.symbol;
        session.apply(turn, position, symbol)?;

        let mv = GameMove {
            from: self.local.clone(),
            to: session.opponent.clone(),
            game_id,
            position,
            symbol,
            turn,
            message_id: fresh_message_id(),
            token: String::new(),
        };
        session.unanswered_move = Some(mv.message_id.clone());
        let mut actions = vec![
            GameAction::Send(Outbound::reliable(
                Message::GameMove(mv),
                Destination::Peer(session.opponent.clone()),
                LSNP_TIMING.game_move_retry,
                ExchangeKind::GameMove { game_id, turn },
            )),
            GameAction::Notify(GameEvent::MovePlayed {
                game_id,
                by: self.local.clone(),
                position,
                board: session.board.clone(),
            }),
        ];

        if let Some(outcome) = session.board.outcome() {
            let (wire, local, line) = match outcome {
                BoardOutcome::Win { line, .. } => {
                    (GameOutcome::Win, LocalOutcome::Won { line: Some(line) }, Some(line))
                }
                BoardOutcome::Draw => (GameOutcome::Draw, LocalOutcome::Draw, None),
            };
            actions.extend(self.finish(game_id, wire, line, local, now));
        }
        Ok(actions)
    }

    pub fn on_move(&mut self, mv: GameMove) -> Vec<GameAction> {
        let Some(session) = self.sessions.get_mut(&mv.game_id) else {
            tracing::debug!(game = %mv.game_id, "move for no active game");
            return Vec::new();
        };
        if session.opponent != mv.from {
            tracing::warn!(game = %mv.game_id, from = %mv.from, "move from non-participant");
            return Vec::new();
        }
        if session.is_duplicate(&mv) {
            return vec![ack(&mv.message_id, AckStatus::Received, &mv.from)];
        }
        if mv.symbol == session.symbol {
            tracing::warn!(game = %mv.game_id, symbol = %mv.symbol, "opponent played our symbol");
            return Vec::new();
        }
        if let Err(e) = session.apply(mv.turn, mv.position, mv.symbol) {
            tracing::warn!(game = %mv.game_id, from = %mv.from, "rejecting move: {e}");
            return Vec::new();
        }
        // Their reply proves our previous move arrived.
        session.unanswered_move = None;

        let mut actions = vec![
            ack(&mv.message_id, AckStatus::Received, &mv.from),
            GameAction::Notify(GameEvent::MovePlayed {
                game_id: mv.game_id,
                by: mv.from.clone(),
                position: mv.position,
                board: session.board.clone(),
            }),
        ];

        match session.board.outcome() {
            Some(outcome) => {
                // The mover announces the result; we only close our side.
                let local = match outcome {
                    BoardOutcome::Win { line, .. } => LocalOutcome::Lost { line: Some(line) },
                    BoardOutcome::Draw => LocalOutcome::Draw,
                };
                actions.extend(self.close(mv.game_id, local));
            }
            None => actions.push(GameAction::Notify(GameEvent::YourTurn {
                game_id: mv.game_id,
                opponent: session.opponent.clone(),
                turn: session.expected_turn(),
                board: session.board.clone(),
            })),
        }
        actions
    }

    /// A move's retry budget ran out: the opponent is unreachable.
    ///
    /// Only the session that sent `message_id` and is still waiting on it
    /// is torn down. The id may since have been released and reused by a
    /// new game, which must survive.
    pub fn on_move_abandoned(
        &mut self,
        game_id: GameId,
        turn: u32,
        message_id: &str,
    ) -> Vec<GameAction> {
        match self.sessions.get(&game_id) {
            Some(session) if session.unanswered_move.as_deref() == Some(message_id) => {}
            _ => {
                tracing::debug!(game = %game_id, turn, "stale move abandoned, ignoring");
                return Vec::new();
            }
        }
        let Some(session) = self.sessions.remove(&game_id) else {
            return Vec::new();
        };
        self.pool.release(game_id);
        tracing::warn!(game = %game_id, turn, opponent = %session.opponent, "move never acknowledged, abandoning game");
        vec![GameAction::Notify(GameEvent::GameAbandoned {
            game_id,
            opponent: session.opponent,
        })]
    }

    /// RESULT always discards the local session; a repeat is a no-op.
    pub fn on_result(&mut self, result: GameResult) -> Vec<GameAction> {
        match self.sessions.get(&result.game_id) {
            Some(session) if session.opponent == result.from => {}
            _ => return Vec::new(),
        }
        let local = match result.outcome {
            GameOutcome::Win => LocalOutcome::Lost {
                line: result.winning_line,
            },
            GameOutcome::Loss => LocalOutcome::Won {
                line: result.winning_line,
            },
            GameOutcome::Draw => LocalOutcome::Draw,
            GameOutcome::Forfeit => LocalOutcome::OpponentForfeited,
        };
        self.close(result.game_id, local)
    }

    pub fn forfeit(&mut self, game_id: GameId, now: u64) -> Result<Vec<GameAction>, GameError> {
        if !self.sessions.contains_key(&game_id) {
            return Err(GameError::UnknownGame(game_id));
        }
        Ok(self.finish(game_id, GameOutcome::Forfeit, None, LocalOutcome::Forfeited, now))
    }

    /// Send RESULT to the opponent and close the session.
    fn finish(
        &mut self,
        game_id: GameId,
        wire: GameOutcome,
        line: Option<[u8; 3]>,
        local: LocalOutcome,
        now: u64,
    ) -> Vec<GameAction> {
        let Some(session) = self.sessions.get(&game_id) else {
            return Vec::new();
        };
        let result = GameResult {
            from: self.local.clone(),
            to: session.opponent.clone(),
            game_id,
            outcome: wire,
            symbol: session.symbol,
            winning_line: line,
            message_id: fresh_message_id(),
            timestamp: now,
        };
        let mut actions = vec![GameAction::Send(Outbound::unreliable(
            Message::GameResult(result),
            Destination::Peer(session.opponent.clone()),
        ))];
        actions.extend(self.close(game_id, local));
        actions
    }

    fn close(&mut self, game_id: GameId, outcome: LocalOutcome) -> Vec<GameAction> {
        let Some(session) = self.sessions.remove(&game_id) else {
            return Vec::new();
        };
        self.pool.release(game_id);
        tracing::info!(game = %game_id, opponent = %session.opponent, outcome = ?outcome, "game over");
        vec![GameAction::Notify(GameEvent::GameOver {
            game_id,
            opponent: session.opponent,
            outcome,
            board: session.board,
        })]
    }

    // -- Inspection --

    pub fn session(&self, game_id: GameId) -> Option<&GameSession> {
        self.sessions.get(&game_id)
    }

    pub fn sessions(&self) -> Vec<&GameSession> {
        let mut sessions: Vec<&GameSession> = self.sessions.values().collect();
        sessions.sort_by_key(|s| s.game_id);
        sessions
    }

    pub fn pending_invites(&self) -> Vec<&GameInvite> {
        let mut invites: Vec<&GameInvite> = self.incoming.values().map(|p| &p.invite).collect();
        invites.sort_by_key(|i| i.game_id);
        invites
    }

    pub fn is_id_active(&self, game_id: GameId) -> bool {
        self.pool.is_active(game_id)
    }

    /// Drop everything (shutdown).
    pub fn clear(&mut self) {
        self.outgoing.clear();
        self.incoming.clear();
        self.sessions.clear();
        self.pool = GameIdPool::new();
    }
}

fn started(session: &GameSession) -> Vec<GameAction> {
    let mut actions = vec![GameAction::Notify(GameEvent::GameStarted {
        game_id: session.game_id,
        opponent: session.opponent.clone(),
        symbol: session.symbol,
    })];
    if session.is_my_turn() {
        actions.push(GameAction::Notify(GameEvent::YourTurn {
            game_id: session.game_id,
            opponent: session.opponent.clone(),
            turn: session.expected_turn(),
            board: session.board.clone(),
        }));
    }
    actions
}

fn ack(message_id: &str, status: AckStatus, to: &UserId) -> GameAction {
    GameAction::Send(Outbound::unreliable(
        Message::Ack(Ack {
            message_id: message_id.to_string(),
            status,
        }),
        Destination::Peer(to.clone()),
    ))
}
