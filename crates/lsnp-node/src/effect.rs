//! I/O instructions produced by `NodeState` and carried out by the tasks.

use std::path::PathBuf;

use lsnp_game::GameEvent;
use lsnp_protocol::{Destination, LikeAction, Message, UserId};
use lsnp_transfer::{ReceivedFile, TransferEvent};

use crate::groups::GroupChange;

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Encode and put on the wire.
    Send { message: Message, to: Destination },
    /// Write a completed incoming file to the download directory.
    Persist(ReceivedFile),
    /// Tell the operator.
    Notify(Notice),
}

impl Effect {
    pub fn send(message: Message, to: Destination) -> Self {
        Effect::Send { message, to }
    }
}

/// Something the console should show.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    PeerDiscovered {
        user_id: UserId,
        display_name: String,
        status: String,
    },
    Post {
        from: UserId,
        display_name: String,
        content: String,
    },
    DirectMessage {
        from: UserId,
        display_name: String,
        content: String,
    },
    /// A DM ran out of retries.
    DeliveryFailed { to: Destination, message_id: String },
    Followed { by: UserId },
    Unfollowed { by: UserId },
    Liked {
        by: UserId,
        post_timestamp: u64,
        action: LikeAction,
        post: Option<String>,
    },
    Group(GroupChange),
    GroupMessage {
        group_id: String,
        from: UserId,
        content: String,
    },
    Transfer(TransferEvent),
    Game(GameEvent),
    FileSaved { file_id: String, path: PathBuf },
}
