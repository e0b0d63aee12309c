//! LSNP Game -- two-player 3x3 grid game over invite/move/result messages.
//!
//! Idle -> Invited -> Active -> Terminal. X moves first; turns are counted
//! from 1 and both peers advance the same counter on every applied move.

pub mod board;
pub mod engine;
pub mod pool;

pub use board::{Board, BoardOutcome, WIN_LINES};
pub use engine::{GameAction, GameEngine, GameEvent, GameSession, LocalOutcome};
pub use pool::GameIdPool;

use lsnp_protocol::{GameId, Symbol};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MoveError {
    #[error("position {0} is off the board (0-8)")]
    OutOfRange(u8),
    #[error("cell {0} is already taken")]
    Occupied(u8),
    #[error("expected turn {expected}, got {got}")]
    WrongTurn { expected: u32, got: u32 },
    #[error("turn belongs to {expected}, not {got}")]
    WrongSymbol { expected: Symbol, got: Symbol },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GameError {
    #[error("all game ids are in use")]
    NoFreeGameId,
    #[error("no active game {0}")]
    UnknownGame(GameId),
    #[error("no pending invite for game {0}")]
    UnknownInvite(GameId),
    #[error("not your turn in game {0}")]
    NotYourTurn(GameId),
    #[error("cannot invite yourself")]
    SelfInvite,
    #[error("invalid move: {0}")]
    InvalidMove(#[from] MoveError),
}
