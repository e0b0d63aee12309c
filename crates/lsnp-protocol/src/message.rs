//! Message model.
//!
//! `Frame` is the wire-level view: an ordered list of `KEY:VALUE` fields.
//! `Message` is the typed view, one variant per TYPE, each with its own
//! payload struct. Conversion between the two is explicit (`to_frame` /
//! `from_frame`) so the dispatcher can `match` exhaustively on type.

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose::STANDARD, Engine};
use rand::RngCore;

use crate::identity::UserId;
use crate::token::Scope;
use crate::ProtocolError;

// ============================================================================
// Frame
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    fields: Vec<(String, String)>,
}

impl Frame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn of_type(msg_type: MessageType) -> Self {
        let mut frame = Self::new();
        frame.set("TYPE", msg_type.as_str());
        frame
    }

    /// Set a field, replacing an existing value in place.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => *v = value,
            None => self.fields.push((key, value)),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn message_type(&self) -> Result<MessageType, ProtocolError> {
        self.get("TYPE")
            .ok_or(ProtocolError::MissingType)?
            .parse()
    }
}

// ============================================================================
// Message types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Profile,
    Ping,
    Post,
    Dm,
    Follow,
    Unfollow,
    Ack,
    Revoke,
    Like,
    FileOffer,
    FileChunk,
    FileReceived,
    TictactoeInvite,
    TictactoeMove,
    TictactoeResult,
    GroupCreate,
    GroupUpdate,
    GroupMessage,
}

impl MessageType {
    pub const ALL: [MessageType; 18] = [
        MessageType::Profile,
        MessageType::Ping,
        MessageType::Post,
        MessageType::Dm,
        MessageType::Follow,
        MessageType::Unfollow,
        MessageType::Ack,
        MessageType::Revoke,
        MessageType::Like,
        MessageType::FileOffer,
        MessageType::FileChunk,
        MessageType::FileReceived,
        MessageType::TictactoeInvite,
        MessageType::TictactoeMove,
        MessageType::TictactoeResult,
        MessageType::GroupCreate,
        MessageType::GroupUpdate,
        MessageType::GroupMessage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Profile => "PROFILE",
            MessageType::Ping => "PING",
            MessageType::Post => "POST",
            MessageType::Dm => "DM",
            MessageType::Follow => "FOLLOW",
            MessageType::Unfollow => "UNFOLLOW",
            MessageType::Ack => "ACK",
            MessageType::Revoke => "REVOKE",
            MessageType::Like => "LIKE",
            MessageType::FileOffer => "FILE_OFFER",
            MessageType::FileChunk => "FILE_CHUNK",
            MessageType::FileReceived => "FILE_RECEIVED",
            MessageType::TictactoeInvite => "TICTACTOE_INVITE",
            MessageType::TictactoeMove => "TICTACTOE_MOVE",
            MessageType::TictactoeResult => "TICTACTOE_RESULT",
            MessageType::GroupCreate => "GROUP_CREATE",
            MessageType::GroupUpdate => "GROUP_UPDATE",
            MessageType::GroupMessage => "GROUP_MESSAGE",
        }
    }

    /// Scope a token must carry for this type, or None if unauthenticated.
    ///
    /// REVOKE maps to chat but is applied before validation: the token it
    /// names is the one being withdrawn.
    pub fn required_scope(&self) -> Option<Scope> {
        match self {
            MessageType::Post | MessageType::Like => Some(Scope::Broadcast),
            MessageType::Dm | MessageType::Revoke => Some(Scope::Chat),
            MessageType::Follow | MessageType::Unfollow => Some(Scope::Follow),
            MessageType::FileOffer | MessageType::FileChunk => Some(Scope::File),
            MessageType::TictactoeInvite | MessageType::TictactoeMove => Some(Scope::Game),
            MessageType::GroupCreate | MessageType::GroupUpdate | MessageType::GroupMessage => {
                Some(Scope::Group)
            }
            // RESULT carries no TOKEN field.
            MessageType::Profile
            | MessageType::Ping
            | MessageType::Ack
            | MessageType::FileReceived
            | MessageType::TictactoeResult => None,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MessageType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownType(s.to_string()))
    }
}

// ============================================================================
// Field vocabularies
// ============================================================================

macro_rules! wire_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ();

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    _ => Err(()),
                }
            }
        }
    };
}

wire_enum!(
    /// ACK STATUS.
    AckStatus {
        Received => "RECEIVED",
        Accepted => "ACCEPTED",
        Rejected => "REJECTED",
    }
);

wire_enum!(
    LikeAction {
        Like => "LIKE",
        Unlike => "UNLIKE",
    }
);

wire_enum!(
    /// Grid game marker. X always moves first.
    Symbol {
        X => "X",
        O => "O",
    }
);

wire_enum!(
    /// RESULT, stated from the sender's point of view.
    GameOutcome {
        Win => "WIN",
        Loss => "LOSS",
        Draw => "DRAW",
        Forfeit => "FORFEIT",
    }
);

impl Symbol {
    pub fn other(&self) -> Symbol {
        match self {
            Symbol::X => Symbol::O,
            Symbol::O => Symbol::X,
        }
    }
}

impl GameOutcome {
    /// The same result seen from the opponent's side. A forfeit stays a
    /// forfeit: it names who gave up, not who won.
    pub fn mirrored(&self) -> GameOutcome {
        match self {
            GameOutcome::Win => GameOutcome::Loss,
            GameOutcome::Loss => GameOutcome::Win,
            other => *other,
        }
    }
}

/// Game identifier drawn from a 0-255 namespace; `g<n>` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GameId(pub u8);

impl fmt::Display for GameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

impl FromStr for GameId {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix('g').unwrap_or(s);
        digits.parse().map(GameId).map_err(|_| ())
    }
}

/// FILE_RECEIVED status announcing a completed transfer.
pub const FILE_STATUS_COMPLETE: &str = "COMPLETE";

// ============================================================================
// Payloads
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Avatar {
    /// MIME type, e.g. `image/png`.
    pub mime_type: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub user_id: UserId,
    pub display_name: String,
    pub status: String,
    pub avatar: Option<Avatar>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ping {
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub user_id: UserId,
    pub content: String,
    pub ttl: u64,
    pub message_id: String,
    pub token: String,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectMessage {
    pub from: UserId,
    pub to: UserId,
    pub content: String,
    pub timestamp: u64,
    pub message_id: String,
    pub token: String,
}

/// Body shared by FOLLOW and UNFOLLOW.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Follow {
    pub from: UserId,
    pub to: UserId,
    pub timestamp: u64,
    pub message_id: String,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub message_id: String,
    pub status: AckStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revoke {
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Like {
    pub from: UserId,
    pub to: UserId,
    pub post_timestamp: u64,
    pub action: LikeAction,
    pub timestamp: u64,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOffer {
    pub from: UserId,
    pub to: UserId,
    pub filename: String,
    pub filesize: u64,
    pub filetype: String,
    pub file_id: String,
    pub description: String,
    pub message_id: String,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChunk {
    pub from: UserId,
    pub to: UserId,
    pub file_id: String,
    pub chunk_index: u32,
    pub total_chunks: u32,
    pub chunk_size: u32,
    /// Raw chunk bytes; base64 on the wire.
    pub data: Vec<u8>,
    pub message_id: String,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReceived {
    pub from: UserId,
    pub to: UserId,
    pub file_id: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameInvite {
    pub from: UserId,
    pub to: UserId,
    pub game_id: GameId,
    /// Symbol the inviter will play.
    pub symbol: Symbol,
    pub message_id: String,
    pub timestamp: u64,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameMove {
    pub from: UserId,
    pub to: UserId,
    pub game_id: GameId,
    pub position: u8,
    pub symbol: Symbol,
    pub turn: u32,
    pub message_id: String,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameResult {
    pub from: UserId,
    pub to: UserId,
    pub game_id: GameId,
    pub outcome: GameOutcome,
    pub symbol: Symbol,
    pub winning_line: Option<[u8; 3]>,
    pub message_id: String,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupCreate {
    pub from: UserId,
    pub group_id: String,
    pub group_name: String,
    pub members: Vec<UserId>,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupUpdate {
    pub from: UserId,
    pub group_id: String,
    pub add: Vec<UserId>,
    pub remove: Vec<UserId>,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMessage {
    pub from: UserId,
    pub group_id: String,
    pub content: String,
    pub token: String,
}

// ============================================================================
// Typed message
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Profile(Profile),
    Ping(Ping),
    Post(Post),
    Dm(DirectMessage),
    Follow(Follow),
    Unfollow(Follow),
    Ack(Ack),
    Revoke(Revoke),
    Like(Like),
    FileOffer(FileOffer),
    FileChunk(FileChunk),
    FileReceived(FileReceived),
    GameInvite(GameInvite),
    GameMove(GameMove),
    GameResult(GameResult),
    GroupCreate(GroupCreate),
    GroupUpdate(GroupUpdate),
    GroupMessage(GroupMessage),
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Profile(_) => MessageType::Profile,
            Message::Ping(_) => MessageType::Ping,
            Message::Post(_) => MessageType::Post,
            Message::Dm(_) => MessageType::Dm,
            Message::Follow(_) => MessageType::Follow,
            Message::Unfollow(_) => MessageType::Unfollow,
            Message::Ack(_) => MessageType::Ack,
            Message::Revoke(_) => MessageType::Revoke,
            Message::Like(_) => MessageType::Like,
            Message::FileOffer(_) => MessageType::FileOffer,
            Message::FileChunk(_) => MessageType::FileChunk,
            Message::FileReceived(_) => MessageType::FileReceived,
            Message::GameInvite(_) => MessageType::TictactoeInvite,
            Message::GameMove(_) => MessageType::TictactoeMove,
            Message::GameResult(_) => MessageType::TictactoeResult,
            Message::GroupCreate(_) => MessageType::GroupCreate,
            Message::GroupUpdate(_) => MessageType::GroupUpdate,
            Message::GroupMessage(_) => MessageType::GroupMessage,
        }
    }

    /// Claimed originator (USER_ID or FROM). ACK and REVOKE carry none.
    pub fn sender(&self) -> Option<&UserId> {
        match self {
            Message::Profile(m) => Some(&m.user_id),
            Message::Ping(m) => Some(&m.user_id),
            Message::Post(m) => Some(&m.user_id),
            Message::Dm(m) => Some(&m.from),
            Message::Follow(m) | Message::Unfollow(m) => Some(&m.from),
            Message::Ack(_) | Message::Revoke(_) => None,
            Message::Like(m) => Some(&m.from),
            Message::FileOffer(m) => Some(&m.from),
            Message::FileChunk(m) => Some(&m.from),
            Message::FileReceived(m) => Some(&m.from),
            Message::GameInvite(m) => Some(&m.from),
            Message::GameMove(m) => Some(&m.from),
            Message::GameResult(m) => Some(&m.from),
            Message::GroupCreate(m) => Some(&m.from),
            Message::GroupUpdate(m) => Some(&m.from),
            Message::GroupMessage(m) => Some(&m.from),
        }
    }

    pub fn message_id(&self) -> Option<&str> {
        match self {
            Message::Post(m) => Some(&m.message_id),
            Message::Dm(m) => Some(&m.message_id),
            Message::Follow(m) | Message::Unfollow(m) => Some(&m.message_id),
            Message::Ack(m) => Some(&m.message_id),
            Message::FileOffer(m) => Some(&m.message_id),
            Message::FileChunk(m) => Some(&m.message_id),
            Message::GameInvite(m) => Some(&m.message_id),
            Message::GameMove(m) => Some(&m.message_id),
            Message::GameResult(m) => Some(&m.message_id),
            _ => None,
        }
    }

    /// The authorization token this message presents, if its type has one.
    /// REVOKE's TOKEN is the revoked token, not a credential.
    pub fn auth_token(&self) -> Option<&str> {
        match self {
            Message::Post(m) => Some(&m.token),
            Message::Dm(m) => Some(&m.token),
            Message::Follow(m) | Message::Unfollow(m) => Some(&m.token),
            Message::Like(m) => Some(&m.token),
            Message::FileOffer(m) => Some(&m.token),
            Message::FileChunk(m) => Some(&m.token),
            Message::GameInvite(m) => Some(&m.token),
            Message::GameMove(m) => Some(&m.token),
            Message::GroupCreate(m) => Some(&m.token),
            Message::GroupUpdate(m) => Some(&m.token),
            Message::GroupMessage(m) => Some(&m.token),
            _ => None,
        }
    }

    pub fn auth_token_mut(&mut self) -> Option<&mut String> {
        match self {
            Message::Post(m) => Some(&mut m.token),
            Message::Dm(m) => Some(&mut m.token),
            Message::Follow(m) | Message::Unfollow(m) => Some(&mut m.token),
            Message::Like(m) => Some(&mut m.token),
            Message::FileOffer(m) => Some(&mut m.token),
            Message::FileChunk(m) => Some(&mut m.token),
            Message::GameInvite(m) => Some(&mut m.token),
            Message::GameMove(m) => Some(&mut m.token),
            Message::GroupCreate(m) => Some(&mut m.token),
            Message::GroupUpdate(m) => Some(&mut m.token),
            Message::GroupMessage(m) => Some(&mut m.token),
            _ => None,
        }
    }

    pub fn to_frame(&self) -> Frame {
        let frame = Frame::of_type(self.message_type());
        match self {
            Message::Profile(m) => {
                let frame = frame
                    .with("USER_ID", m.user_id.as_str())
                    .with("DISPLAY_NAME", &m.display_name)
                    .with("STATUS", &m.status);
                match &m.avatar {
                    Some(avatar) => frame
                        .with("AVATAR_TYPE", &avatar.mime_type)
                        .with("AVATAR_ENCODING", "base64")
                        .with("AVATAR_DATA", STANDARD.encode(&avatar.data)),
                    None => frame,
                }
            }
            Message::Ping(m) => frame.with("USER_ID", m.user_id.as_str()),
            Message::Post(m) => frame
                .with("USER_ID", m.user_id.as_str())
                .with("CONTENT", &m.content)
                .with("TTL", m.ttl.to_string())
                .with("MESSAGE_ID", &m.message_id)
                .with("TOKEN", &m.token)
                .with("TIMESTAMP", m.timestamp.to_string()),
            Message::Dm(m) => frame
                .with("FROM", m.from.as_str())
                .with("TO", m.to.as_str())
                .with("CONTENT", &m.content)
                .with("TIMESTAMP", m.timestamp.to_string())
                .with("MESSAGE_ID", &m.message_id)
                .with("TOKEN", &m.token),
            Message::Follow(m) | Message::Unfollow(m) => frame
                .with("FROM", m.from.as_str())
                .with("TO", m.to.as_str())
                .with("TIMESTAMP", m.timestamp.to_string())
                .with("MESSAGE_ID", &m.message_id)
                .with("TOKEN", &m.token),
            Message::Ack(m) => frame
                .with("MESSAGE_ID", &m.message_id)
                .with("STATUS", m.status.as_str()),
            Message::Revoke(m) => frame.with("TOKEN", &m.token),
            Message::Like(m) => frame
                .with("FROM", m.from.as_str())
                .with("TO", m.to.as_str())
                .with("POST_TIMESTAMP", m.post_timestamp.to_string())
                .with("ACTION", m.action.as_str())
                .with("TIMESTAMP", m.timestamp.to_string())
                .with("TOKEN", &m.token),
            Message::FileOffer(m) => frame
                .with("FROM", m.from.as_str())
                .with("TO", m.to.as_str())
                .with("FILENAME", &m.filename)
                .with("FILESIZE", m.filesize.to_string())
                .with("FILETYPE", &m.filetype)
                .with("FILEID", &m.file_id)
                .with("DESCRIPTION", &m.description)
                .with("MESSAGE_ID", &m.message_id)
                .with("TOKEN", &m.token),
            Message::FileChunk(m) => frame
                .with("FROM", m.from.as_str())
                .with("TO", m.to.as_str())
                .with("FILEID", &m.file_id)
                .with("CHUNK_INDEX", m.chunk_index.to_string())
                .with("TOTAL_CHUNKS", m.total_chunks.to_string())
                .with("CHUNK_SIZE", m.chunk_size.to_string())
                .with("DATA", STANDARD.encode(&m.data))
                .with("MESSAGE_ID", &m.message_id)
                .with("TOKEN", &m.token),
            Message::FileReceived(m) => frame
                .with("FROM", m.from.as_str())
                .with("TO", m.to.as_str())
                .with("FILEID", &m.file_id)
                .with("STATUS", &m.status),
            Message::GameInvite(m) => frame
                .with("FROM", m.from.as_str())
                .with("TO", m.to.as_str())
                .with("GAMEID", m.game_id.to_string())
                .with("MESSAGE_ID", &m.message_id)
                .with("SYMBOL", m.symbol.as_str())
                .with("TIMESTAMP", m.timestamp.to_string())
                .with("TOKEN", &m.token),
            Message::GameMove(m) => frame
                .with("FROM", m.from.as_str())
                .with("TO", m.to.as_str())
                .with("GAMEID", m.game_id.to_string())
                .with("MESSAGE_ID", &m.message_id)
                .with("POSITION", m.position.to_string())
                .with("SYMBOL", m.symbol.as_str())
                .with("TURN", m.turn.to_string())
                .with("TOKEN", &m.token),
            Message::GameResult(m) => {
                let frame = frame
                    .with("FROM", m.from.as_str())
                    .with("TO", m.to.as_str())
                    .with("GAMEID", m.game_id.to_string())
                    .with("MESSAGE_ID", &m.message_id)
                    .with("RESULT", m.outcome.as_str())
                    .with("SYMBOL", m.symbol.as_str())
                    .with("TIMESTAMP", m.timestamp.to_string());
                match m.winning_line {
                    Some([a, b, c]) => frame.with("WINNING_LINE", format!("{a},{b},{c}")),
                    None => frame,
                }
            }
            Message::GroupCreate(m) => frame
                .with("FROM", m.from.as_str())
                .with("GROUP_ID", &m.group_id)
                .with("GROUP_NAME", &m.group_name)
                .with("MEMBERS", join_users(&m.members))
                .with("TOKEN", &m.token),
            Message::GroupUpdate(m) => {
                let mut frame = frame
                    .with("FROM", m.from.as_str())
                    .with("GROUP_ID", &m.group_id);
                if !m.add.is_empty() {
                    frame.set("ADD", join_users(&m.add));
                }
                if !m.remove.is_empty() {
                    frame.set("REMOVE", join_users(&m.remove));
                }
                frame.with("TOKEN", &m.token)
            }
            Message::GroupMessage(m) => frame
                .with("FROM", m.from.as_str())
                .with("GROUP_ID", &m.group_id)
                .with("CONTENT", &m.content)
                .with("TOKEN", &m.token),
        }
    }

    pub fn from_frame(frame: &Frame) -> Result<Self, ProtocolError> {
        let msg_type = frame.message_type()?;
        let f = Fields { frame, msg_type };
        let message = match msg_type {
            MessageType::Profile => Message::Profile(Profile {
                user_id: f.user("USER_ID")?,
                display_name: f.opt("DISPLAY_NAME").unwrap_or_default(),
                status: f.opt("STATUS").unwrap_or_default(),
                avatar: read_avatar(frame),
            }),
            MessageType::Ping => Message::Ping(Ping {
                user_id: f.user("USER_ID")?,
            }),
            MessageType::Post => Message::Post(Post {
                user_id: f.user("USER_ID")?,
                content: f.string("CONTENT")?,
                ttl: f.parse("TTL")?,
                message_id: f.string("MESSAGE_ID")?,
                token: f.string("TOKEN")?,
                timestamp: f.parse("TIMESTAMP")?,
            }),
            MessageType::Dm => Message::Dm(DirectMessage {
                from: f.user("FROM")?,
                to: f.user("TO")?,
                content: f.string("CONTENT")?,
                timestamp: f.parse("TIMESTAMP")?,
                message_id: f.string("MESSAGE_ID")?,
                token: f.string("TOKEN")?,
            }),
            MessageType::Follow | MessageType::Unfollow => {
                let body = Follow {
                    from: f.user("FROM")?,
                    to: f.user("TO")?,
                    timestamp: f.parse("TIMESTAMP")?,
                    message_id: f.string("MESSAGE_ID")?,
                    token: f.string("TOKEN")?,
                };
                if msg_type == MessageType::Follow {
                    Message::Follow(body)
                } else {
                    Message::Unfollow(body)
                }
            }
            MessageType::Ack => Message::Ack(Ack {
                message_id: f.string("MESSAGE_ID")?,
                status: f.parse("STATUS")?,
            }),
            MessageType::Revoke => Message::Revoke(Revoke {
                token: f.string("TOKEN")?,
            }),
            MessageType::Like => Message::Like(Like {
                from: f.user("FROM")?,
                to: f.user("TO")?,
                post_timestamp: f.parse("POST_TIMESTAMP")?,
                action: f.parse("ACTION")?,
                timestamp: f.parse("TIMESTAMP")?,
                token: f.string("TOKEN")?,
            }),
            MessageType::FileOffer => Message::FileOffer(FileOffer {
                from: f.user("FROM")?,
                to: f.user("TO")?,
                filename: f.string("FILENAME")?,
                filesize: f.parse("FILESIZE")?,
                filetype: f.opt("FILETYPE").unwrap_or_default(),
                file_id: f.string("FILEID")?,
                description: f.opt("DESCRIPTION").unwrap_or_default(),
                message_id: f.string("MESSAGE_ID")?,
                token: f.string("TOKEN")?,
            }),
            MessageType::FileChunk => Message::FileChunk(FileChunk {
                from: f.user("FROM")?,
                to: f.user("TO")?,
                file_id: f.string("FILEID")?,
                chunk_index: f.parse("CHUNK_INDEX")?,
                total_chunks: f.parse("TOTAL_CHUNKS")?,
                chunk_size: f.parse("CHUNK_SIZE")?,
                data: f.base64("DATA")?,
                message_id: f.string("MESSAGE_ID")?,
                token: f.string("TOKEN")?,
            }),
            MessageType::FileReceived => Message::FileReceived(FileReceived {
                from: f.user("FROM")?,
                to: f.user("TO")?,
                file_id: f.string("FILEID")?,
                status: f.string("STATUS")?,
            }),
            MessageType::TictactoeInvite => Message::GameInvite(GameInvite {
                from: f.user("FROM")?,
                to: f.user("TO")?,
                game_id: f.parse("GAMEID")?,
                symbol: f.parse("SYMBOL")?,
                message_id: f.string("MESSAGE_ID")?,
                timestamp: f.parse_or("TIMESTAMP", 0)?,
                token: f.string("TOKEN")?,
            }),
            MessageType::TictactoeMove => Message::GameMove(GameMove {
                from: f.user("FROM")?,
                to: f.user("TO")?,
                game_id: f.parse("GAMEID")?,
                position: f.parse("POSITION")?,
                symbol: f.parse("SYMBOL")?,
                turn: f.parse("TURN")?,
                message_id: f.string("MESSAGE_ID")?,
                token: f.string("TOKEN")?,
            }),
            MessageType::TictactoeResult => Message::GameResult(GameResult {
                from: f.user("FROM")?,
                to: f.user("TO")?,
                game_id: f.parse("GAMEID")?,
                outcome: f.parse("RESULT")?,
                symbol: f.parse("SYMBOL")?,
                winning_line: f.winning_line()?,
                message_id: f.opt("MESSAGE_ID").unwrap_or_default(),
                timestamp: f.parse_or("TIMESTAMP", 0)?,
            }),
            MessageType::GroupCreate => Message::GroupCreate(GroupCreate {
                from: f.user("FROM")?,
                group_id: f.string("GROUP_ID")?,
                group_name: f.opt("GROUP_NAME").unwrap_or_default(),
                members: split_users(frame.get("MEMBERS")),
                token: f.string("TOKEN")?,
            }),
            MessageType::GroupUpdate => Message::GroupUpdate(GroupUpdate {
                from: f.user("FROM")?,
                group_id: f.string("GROUP_ID")?,
                add: split_users(frame.get("ADD")),
                remove: split_users(frame.get("REMOVE")),
                token: f.string("TOKEN")?,
            }),
            MessageType::GroupMessage => Message::GroupMessage(GroupMessage {
                from: f.user("FROM")?,
                group_id: f.string("GROUP_ID")?,
                content: f.string("CONTENT")?,
                token: f.string("TOKEN")?,
            }),
        };
        Ok(message)
    }
}

/// Typed field access for one frame; errors name the message type.
struct Fields<'a> {
    frame: &'a Frame,
    msg_type: MessageType,
}

impl<'a> Fields<'a> {
    fn raw(&self, key: &'static str) -> Result<&'a str, ProtocolError> {
        self.frame.get(key).ok_or(ProtocolError::MissingField {
            msg_type: self.msg_type.as_str(),
            field: key,
        })
    }

    fn string(&self, key: &'static str) -> Result<String, ProtocolError> {
        self.raw(key).map(str::to_string)
    }

    fn opt(&self, key: &str) -> Option<String> {
        self.frame.get(key).map(str::to_string)
    }

    fn user(&self, key: &'static str) -> Result<UserId, ProtocolError> {
        let raw = self.raw(key)?;
        if raw.is_empty() {
            return Err(invalid(key, raw));
        }
        Ok(UserId::from_wire(raw))
    }

    fn parse<T: FromStr>(&self, key: &'static str) -> Result<T, ProtocolError> {
        let raw = self.raw(key)?;
        raw.trim().parse().map_err(|_| invalid(key, raw))
    }

    fn parse_or<T: FromStr>(&self, key: &'static str, default: T) -> Result<T, ProtocolError> {
        match self.frame.get(key) {
            Some(_) => self.parse(key),
            None => Ok(default),
        }
    }

    fn base64(&self, key: &'static str) -> Result<Vec<u8>, ProtocolError> {
        let raw = self.raw(key)?;
        STANDARD.decode(raw.trim()).map_err(|_| invalid(key, raw))
    }

    fn winning_line(&self) -> Result<Option<[u8; 3]>, ProtocolError> {
        let Some(raw) = self.frame.get("WINNING_LINE") else {
            return Ok(None);
        };
        let cells: Vec<u8> = raw
            .split(',')
            .map(|c| c.trim().parse::<u8>())
            .collect::<Result<_, _>>()
            .map_err(|_| invalid("WINNING_LINE", raw))?;
        match cells.as_slice() {
            [a, b, c] if cells.iter().all(|&i| i <= 8) => Ok(Some([*a, *b, *c])),
            _ => Err(invalid("WINNING_LINE", raw)),
        }
    }
}

fn invalid(field: &'static str, value: &str) -> ProtocolError {
    ProtocolError::InvalidField {
        field,
        value: value.to_string(),
    }
}

fn read_avatar(frame: &Frame) -> Option<Avatar> {
    let mime_type = frame.get("AVATAR_TYPE")?;
    let data = frame.get("AVATAR_DATA")?;
    if frame.get("AVATAR_ENCODING").is_some_and(|e| e != "base64") {
        return None;
    }
    let data = STANDARD.decode(data.trim()).ok()?;
    Some(Avatar {
        mime_type: mime_type.to_string(),
        data,
    })
}

fn join_users(users: &[UserId]) -> String {
    users
        .iter()
        .map(UserId::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

fn split_users(raw: Option<&str>) -> Vec<UserId> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(UserId::from_wire)
        .collect()
}

// ============================================================================
// Helpers
// ============================================================================

/// Fresh MESSAGE_ID: 8 random bytes, hex encoded.
pub fn fresh_message_id() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Current time as Unix seconds.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Where an outbound message goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// The subnet broadcast address.
    Broadcast,
    /// Unicast to the address segment of this identity.
    Peer(UserId),
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Broadcast => f.write_str("broadcast"),
            Destination::Peer(user) => write!(f, "{user}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> UserId {
        UserId::from_wire("alice@10.0.0.1")
    }

    fn bob() -> UserId {
        UserId::from_wire("bob@10.0.0.2")
    }

    #[test]
    fn test_scope_table() {
        assert_eq!(MessageType::Post.required_scope(), Some(Scope::Broadcast));
        assert_eq!(MessageType::Like.required_scope(), Some(Scope::Broadcast));
        assert_eq!(MessageType::Dm.required_scope(), Some(Scope::Chat));
        assert_eq!(MessageType::Unfollow.required_scope(), Some(Scope::Follow));
        assert_eq!(MessageType::FileChunk.required_scope(), Some(Scope::File));
        assert_eq!(MessageType::TictactoeMove.required_scope(), Some(Scope::Game));
        assert_eq!(MessageType::GroupUpdate.required_scope(), Some(Scope::Group));
        for t in [
            MessageType::Profile,
            MessageType::Ping,
            MessageType::Ack,
            MessageType::FileReceived,
            MessageType::TictactoeResult,
        ] {
            assert_eq!(t.required_scope(), None, "{t} needs no token");
        }
    }

    #[test]
    fn test_type_names_roundtrip() {
        for t in MessageType::ALL {
            assert_eq!(t.as_str().parse::<MessageType>().unwrap(), t);
        }
        assert!("SHOUT".parse::<MessageType>().is_err());
    }

    #[test]
    fn test_frame_set_replaces_in_place() {
        let mut frame = Frame::of_type(MessageType::Ping).with("USER_ID", "a@1.2.3.4");
        frame.set("TYPE", "PROFILE");
        assert_eq!(frame.len(), 2);
        assert_eq!(frame.fields().next(), Some(("TYPE", "PROFILE")));
    }

    #[test]
    fn test_missing_type() {
        let frame = Frame::new().with("USER_ID", "alice@10.0.0.1");
        assert!(matches!(
            Message::from_frame(&frame),
            Err(ProtocolError::MissingType)
        ));
    }

    #[test]
    fn test_missing_required_field() {
        let frame = Frame::of_type(MessageType::Dm).with("FROM", "alice@10.0.0.1");
        match Message::from_frame(&frame) {
            Err(ProtocolError::MissingField { msg_type, field }) => {
                assert_eq!(msg_type, "DM");
                assert_eq!(field, "TO");
            }
            other => panic!("expected MissingField, got {other:?}"),
        }
    }

    #[test]
    fn test_chunk_data_is_base64_on_wire() {
        let msg = Message::FileChunk(FileChunk {
            from: alice(),
            to: bob(),
            file_id: "f1".into(),
            chunk_index: 0,
            total_chunks: 1,
            chunk_size: 4,
            data: vec![1, 2, 3, 4],
            message_id: "m1".into(),
            token: "t".into(),
        });
        let frame = msg.to_frame();
        assert_eq!(frame.get("DATA"), Some("AQIDBA=="));
        assert_eq!(Message::from_frame(&frame).unwrap(), msg);
    }

    #[test]
    fn test_bad_base64_rejected() {
        let frame = Message::FileChunk(FileChunk {
            from: alice(),
            to: bob(),
            file_id: "f1".into(),
            chunk_index: 0,
            total_chunks: 1,
            chunk_size: 1,
            data: vec![0],
            message_id: "m1".into(),
            token: "t".into(),
        })
        .to_frame()
        .with("DATA", "!!not base64!!");
        assert!(matches!(
            Message::from_frame(&frame),
            Err(ProtocolError::InvalidField { field: "DATA", .. })
        ));
    }

    #[test]
    fn test_result_winning_line() {
        let msg = Message::GameResult(GameResult {
            from: alice(),
            to: bob(),
            game_id: GameId(3),
            outcome: GameOutcome::Win,
            symbol: Symbol::X,
            winning_line: Some([2, 4, 6]),
            message_id: "m".into(),
            timestamp: 10,
        });
        let frame = msg.to_frame();
        assert_eq!(frame.get("WINNING_LINE"), Some("2,4,6"));
        assert_eq!(frame.get("GAMEID"), Some("g3"));
        assert_eq!(Message::from_frame(&frame).unwrap(), msg);

        let bad = frame.with("WINNING_LINE", "2,4,9");
        assert!(Message::from_frame(&bad).is_err());
    }

    #[test]
    fn test_result_optional_fields() {
        let frame = crate::codec::decode(
            b"TYPE:TICTACTOE_RESULT\nFROM:bob@10.0.0.2\nTO:alice@10.0.0.1\nGAMEID:g0\nRESULT:FORFEIT\nSYMBOL:O\n\n",
        )
        .unwrap();
        let Message::GameResult(result) = Message::from_frame(&frame).unwrap() else {
            panic!("not a result");
        };
        assert_eq!(result.game_id, GameId(0));
        assert_eq!(result.outcome, GameOutcome::Forfeit);
        assert_eq!(result.winning_line, None);
        assert_eq!(result.message_id, "");
        assert_eq!(result.timestamp, 0);
    }

    #[test]
    fn test_game_id_accepts_bare_number() {
        assert_eq!("g17".parse::<GameId>(), Ok(GameId(17)));
        assert_eq!("17".parse::<GameId>(), Ok(GameId(17)));
        assert!("g256".parse::<GameId>().is_err());
    }

    #[test]
    fn test_profile_avatar() {
        let msg = Message::Profile(Profile {
            user_id: alice(),
            display_name: "Alice".into(),
            status: "around".into(),
            avatar: Some(Avatar {
                mime_type: "image/png".into(),
                data: vec![0x89, b'P', b'N', b'G'],
            }),
        });
        let frame = msg.to_frame();
        assert_eq!(frame.get("AVATAR_ENCODING"), Some("base64"));
        assert_eq!(Message::from_frame(&frame).unwrap(), msg);
    }

    #[test]
    fn test_profile_with_broken_avatar_still_parses() {
        let frame = Frame::of_type(MessageType::Profile)
            .with("USER_ID", "alice@10.0.0.1")
            .with("DISPLAY_NAME", "Alice")
            .with("STATUS", "")
            .with("AVATAR_TYPE", "image/png")
            .with("AVATAR_ENCODING", "base64")
            .with("AVATAR_DATA", "%%%");
        match Message::from_frame(&frame).unwrap() {
            Message::Profile(p) => assert!(p.avatar.is_none()),
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn test_group_update_lists() {
        let msg = Message::GroupUpdate(GroupUpdate {
            from: alice(),
            group_id: "club".into(),
            add: vec![bob()],
            remove: vec![],
            token: "t".into(),
        });
        let frame = msg.to_frame();
        assert_eq!(frame.get("ADD"), Some("bob@10.0.0.2"));
        assert_eq!(frame.get("REMOVE"), None);
        assert_eq!(Message::from_frame(&frame).unwrap(), msg);
    }

    #[test]
    fn test_revoke_has_no_auth_token() {
        let mut msg = Message::Revoke(Revoke {
            token: "alice@10.0.0.1|1|chat".into(),
        });
        assert!(msg.auth_token().is_none());
        assert!(msg.auth_token_mut().is_none());
        assert!(msg.sender().is_none());
    }

    #[test]
    fn test_outcome_mirrored() {
        assert_eq!(GameOutcome::Win.mirrored(), GameOutcome::Loss);
        assert_eq!(GameOutcome::Draw.mirrored(), GameOutcome::Draw);
        assert_eq!(GameOutcome::Forfeit.mirrored(), GameOutcome::Forfeit);
    }

    #[test]
    fn test_fresh_message_id() {
        let a = fresh_message_id();
        assert_eq!(a.len(), 16);
        assert_ne!(a, fresh_message_id());
    }
}
