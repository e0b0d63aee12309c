//! Interactive console -- operator commands in, notices out.
//!
//! Parsing (`parse_command`), execution against the state (`apply`) and
//! notice rendering (`render_notice`) are plain functions; `run_console`
//! wires them to stdin, the effect queue and the notice channel.

use std::fmt::Write as _;
use std::path::Path;

use anyhow::Context;
use lsnp_game::{GameEvent, LocalOutcome};
use lsnp_protocol::{GameId, LikeAction, Scope, Symbol, UserId};
use lsnp_transfer::TransferEvent;
use tokio::sync::{broadcast, mpsc};

use crate::effect::{Effect, Notice};
use crate::groups::GroupChange;
use crate::socket_task::forward_all;
use crate::state::{NodeState, Now};
use crate::{mime_type_for, SharedState};

pub const HELP: &str = "\
peers                              list known peers
view [user]                        posts (and DMs with user)
post <text>                        broadcast a post
dm <user> <text>                   direct message
follow <user> / unfollow <user>    follow graph
like <user> <ts> / unlike <user> <ts>
followers                          who follows you, whom you follow
send <user> <path> [description]   offer a file
offers                             pending file offers
accept <file_id> / reject <file_id>
invite <user> [X|O]                invite to tic-tac-toe
invites                            pending game invites
join <game> / decline <game>       answer an invite
move <game> <0-8>                  play a move
forfeit <game>                     give up a game
games                              active games
group-create <id> <a,b,..> <name>  create a group
group-add <id> <a,b,..>            add members
group-remove <id> <a,b,..>         remove members
group-msg <id> <text>              message a group
groups                             groups you belong to
revoke <scope>                     revoke your token (chat, file, broadcast, follow, game, group)
help                               this text
exit                               leave the network";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Peers,
    View { user: Option<UserId> },
    Post { content: String },
    Dm { to: UserId, content: String },
    Follow { user: UserId },
    Unfollow { user: UserId },
    Like { user: UserId, post_timestamp: u64, action: LikeAction },
    Followers,
    Send { to: UserId, path: String, description: String },
    Offers,
    Accept { file_id: String },
    Reject { file_id: String },
    Invite { to: UserId, symbol: Symbol },
    Invites,
    Join { game_id: GameId },
    Decline { game_id: GameId },
    Move { game_id: GameId, position: u8 },
    Forfeit { game_id: GameId },
    Games,
    GroupCreate { group_id: String, name: String, members: Vec<UserId> },
    GroupAdd { group_id: String, members: Vec<UserId> },
    GroupRemove { group_id: String, members: Vec<UserId> },
    GroupMsg { group_id: String, content: String },
    Groups,
    Revoke { scope: Scope },
    Help,
    Exit,
}

/// Parse one input line.
pub fn parse_command(line: &str) -> Result<Command, String> {
    let (verb, rest) = split_word(line.trim());
    let mut args = rest.split_whitespace();
    let command = match verb {
        "peers" => Command::Peers,
        "view" => Command::View {
            user: args.next().map(user).transpose()?,
        },
        "post" => Command::Post {
            content: text(rest, "post <text>")?,
        },
        "dm" => {
            let (to, content) = split_word(rest);
            Command::Dm {
                to: user(required(Some(to), "dm <user> <text>")?)?,
                content: text(content, "dm <user> <text>")?,
            }
        }
        "follow" => Command::Follow {
            user: user(required(args.next(), "follow <user>")?)?,
        },
        "unfollow" => Command::Unfollow {
            user: user(required(args.next(), "unfollow <user>")?)?,
        },
        "like" | "unlike" => {
            let usage = "like|unlike <user> <post_timestamp>";
            Command::Like {
                user: user(required(args.next(), usage)?)?,
                post_timestamp: number(required(args.next(), usage)?)?,
                action: if verb == "like" {
                    LikeAction::Like
                } else {
                    LikeAction::Unlike
                },
            }
        }
        "followers" => Command::Followers,
        "send" => {
            let usage = "send <user> <path> [description]";
            let (to, rest) = split_word(rest);
            let (path, description) = split_word(rest);
            Command::Send {
                to: user(required(Some(to), usage)?)?,
                path: required(Some(path), usage)?.to_string(),
                description: description.to_string(),
            }
        }
        "offers" => Command::Offers,
        "accept" => Command::Accept {
            file_id: required(args.next(), "accept <file_id>")?.to_string(),
        },
        "reject" => Command::Reject {
            file_id: required(args.next(), "reject <file_id>")?.to_string(),
        },
        "invite" => Command::Invite {
            to: user(required(args.next(), "invite <user> [X|O]")?)?,
            symbol: match args.next() {
                None => Symbol::X,
                Some(s) => s
                    .to_ascii_uppercase()
                    .parse()
                    .map_err(|()| format!("symbol must be X or O, not {s}"))?,
            },
        },
        "invites" => Command::Invites,
        "join" => Command::Join {
            game_id: game(required(args.next(), "join <game>")?)?,
        },
        "decline" => Command::Decline {
            game_id: game(required(args.next(), "decline <game>")?)?,
        },
        "move" => {
            let usage = "move <game> <0-8>";
            let game_id = game(required(args.next(), usage)?)?;
            let position: u8 = number(required(args.next(), usage)?)?;
            if position > 8 {
                return Err(format!("position {position} is off the board (0-8)"));
            }
            Command::Move { game_id, position }
        }
        "forfeit" => Command::Forfeit {
            game_id: game(required(args.next(), "forfeit <game>")?)?,
        },
        "games" => Command::Games,
        "group-create" => {
            let usage = "group-create <id> <a,b,..> <name>";
            let (group_id, rest) = split_word(rest);
            let (members, name) = split_word(rest);
            let group_id = required(Some(group_id), usage)?.to_string();
            Command::GroupCreate {
                name: if name.is_empty() {
                    group_id.clone()
                } else {
                    name.to_string()
                },
                group_id,
                members: user_list(required(Some(members), usage)?)?,
            }
        }
        "group-add" | "group-remove" => {
            let usage = "group-add|group-remove <id> <a,b,..>";
            let group_id = required(args.next(), usage)?.to_string();
            let members = user_list(required(args.next(), usage)?)?;
            if verb == "group-add" {
                Command::GroupAdd { group_id, members }
            } else {
                Command::GroupRemove { group_id, members }
            }
        }
        "group-msg" => {
            let usage = "group-msg <id> <text>";
            let (group_id, content) = split_word(rest);
            Command::GroupMsg {
                group_id: required(Some(group_id), usage)?.to_string(),
                content: text(content, usage)?,
            }
        }
        "groups" => Command::Groups,
        "revoke" => {
            let scope = required(args.next(), "revoke <scope>")?;
            Command::Revoke {
                scope: scope.parse().map_err(|e| format!("{e}"))?,
            }
        }
        "help" | "?" => Command::Help,
        "exit" | "quit" => Command::Exit,
        "" => return Err(String::new()),
        other => return Err(format!("unknown command '{other}', try help")),
    };
    Ok(command)
}

fn split_word(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim_start()),
        None => (s, ""),
    }
}

fn required<'a>(arg: Option<&'a str>, usage: &str) -> Result<&'a str, String> {
    arg.filter(|a| !a.is_empty())
        .ok_or_else(|| format!("usage: {usage}"))
}

fn text(s: &str, usage: &str) -> Result<String, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err(format!("usage: {usage}"));
    }
    Ok(s.to_string())
}

fn user(s: &str) -> Result<UserId, String> {
    UserId::parse(s).map_err(|e| e.to_string())
}

fn user_list(s: &str) -> Result<Vec<UserId>, String> {
    s.split(',')
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .map(user)
        .collect()
}

fn game(s: &str) -> Result<GameId, String> {
    s.parse().map_err(|()| format!("bad game id '{s}'"))
}

fn number<T: std::str::FromStr>(s: &str) -> Result<T, String> {
    s.parse().map_err(|_| format!("'{s}' is not a number"))
}

/// What executing a command produced.
#[derive(Debug, Default)]
pub struct Applied {
    pub effects: Vec<Effect>,
    pub output: String,
    pub exit: bool,
}

impl Applied {
    fn effects(effects: Vec<Effect>, output: impl Into<String>) -> Self {
        Self {
            effects,
            output: output.into(),
            exit: false,
        }
    }

    fn output(output: String) -> Self {
        Self::effects(Vec::new(), output)
    }
}

/// Run one command against the node.
pub fn apply(state: &mut NodeState, command: Command, now: Now) -> anyhow::Result<Applied> {
    let applied = match command {
        Command::Peers => Applied::output(render_peers(state)),
        Command::View { user } => Applied::output(render_view(state, user.as_ref(), now.wall)),
        Command::Post { content } => Applied::effects(state.post(&content, now)?, "posted"),
        Command::Dm { to, content } => {
            let effects = state.direct_message(to.clone(), &content, now)?;
            Applied::effects(effects, format!("sent to {to}"))
        }
        Command::Follow { user } => {
            let effects = state.follow(user.clone(), now)?;
            Applied::effects(effects, format!("following {user}"))
        }
        Command::Unfollow { user } => {
            let effects = state.unfollow(user.clone(), now)?;
            Applied::effects(effects, format!("unfollowed {user}"))
        }
        Command::Like {
            user,
            post_timestamp,
            action,
        } => {
            let effects = state.like(user.clone(), post_timestamp, action, now)?;
            Applied::effects(effects, format!("{} sent to {user}", action.as_str()))
        }
        Command::Followers => Applied::output(render_followers(state)),
        Command::Send {
            to,
            path,
            description,
        } => {
            let path = Path::new(&path);
            let data =
                std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
            let filename = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("file")
                .to_string();
            let (file_id, effects) = state.send_file(
                to.clone(),
                &filename,
                mime_type_for(path),
                &description,
                data,
                now,
            )?;
            Applied::effects(effects, format!("offered {filename} to {to} (file {file_id})"))
        }
        Command::Offers => Applied::output(render_offers(state)),
        Command::Accept { file_id } => {
            Applied::effects(state.accept_file(&file_id, now)?, format!("accepted {file_id}"))
        }
        Command::Reject { file_id } => {
            Applied::effects(state.reject_file(&file_id, now)?, format!("rejected {file_id}"))
        }
        Command::Invite { to, symbol } => {
            let (game_id, effects) = state.invite(to.clone(), symbol, now)?;
            Applied::effects(
                effects,
                format!("invited {to} to game {game_id}, you play {symbol}"),
            )
        }
        Command::Invites => Applied::output(render_invites(state)),
        Command::Join { game_id } => Applied::effects(state.accept_game(game_id, now)?, ""),
        Command::Decline { game_id } => Applied::effects(
            state.decline_game(game_id, now)?,
            format!("declined game {game_id}"),
        ),
        Command::Move { game_id, position } => {
            Applied::effects(state.play(game_id, position, now)?, "")
        }
        Command::Forfeit { game_id } => Applied::effects(state.forfeit(game_id, now)?, ""),
        Command::Games => Applied::output(render_games(state)),
        Command::GroupCreate {
            group_id,
            name,
            members,
        } => {
            let effects = state.create_group(&group_id, &name, members, now)?;
            Applied::effects(effects, format!("created group {group_id}"))
        }
        Command::GroupAdd { group_id, members } => {
            let effects = state.update_group(&group_id, members, Vec::new(), now)?;
            Applied::effects(effects, format!("updated group {group_id}"))
        }
        Command::GroupRemove { group_id, members } => {
            let effects = state.update_group(&group_id, Vec::new(), members, now)?;
            Applied::effects(effects, format!("updated group {group_id}"))
        }
        Command::GroupMsg { group_id, content } => {
            Applied::effects(state.group_message(&group_id, &content, now)?, "")
        }
        Command::Groups => Applied::output(render_groups(state)),
        Command::Revoke { scope } => Applied::effects(
            state.revoke_scope(scope, now)?,
            format!("{scope} token revoked"),
        ),
        Command::Help => Applied::output(HELP.to_string()),
        Command::Exit => Applied {
            exit: true,
            ..Applied::default()
        },
    };
    Ok(applied)
}

// ============================================================================
// Rendering
// ============================================================================

fn clock(ts: u64) -> String {
    i64::try_from(ts)
        .ok()
        .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
        .map(|t| {
            t.with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
        })
        .unwrap_or_else(|| ts.to_string())
}

fn render_peers(state: &NodeState) -> String {
    let peers = state.peers().list();
    if peers.is_empty() {
        return "no peers seen yet".into();
    }
    let mut out = String::new();
    for peer in peers {
        let avatar = if peer.avatar.is_some() { " [avatar]" } else { "" };
        let _ = writeln!(
            out,
            "{} ({}) - {}{avatar}, last seen {}",
            peer.display_name,
            peer.user_id,
            peer.status,
            clock(peer.last_seen)
        );
    }
    out.trim_end().to_string()
}

fn render_view(state: &NodeState, user: Option<&UserId>, now: u64) -> String {
    let mut out = String::new();
    let posts = state.social().visible_posts(user, now);
    if posts.is_empty() {
        out.push_str("no posts");
    }
    for post in posts {
        let _ = writeln!(
            out,
            "[{}] {} (ts {}): {}",
            clock(post.timestamp),
            state.peers().display_name(&post.user_id),
            post.timestamp,
            post.content
        );
    }
    if let Some(user) = user {
        let convo = state.social().conversation(user);
        if !convo.is_empty() {
            let _ = writeln!(out, "\n-- messages with {user} --");
        }
        for entry in convo {
            let who = if entry.outgoing { "you" } else { user.name() };
            let _ = writeln!(out, "[{}] {who}: {}", clock(entry.timestamp), entry.content);
        }
    }
    out.trim_end().to_string()
}

fn render_followers(state: &NodeState) -> String {
    let list = |users: Vec<&UserId>| {
        if users.is_empty() {
            "(none)".to_string()
        } else {
            users
                .iter()
                .map(|u| u.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        }
    };
    format!(
        "followers: {}\nfollowing: {}",
        list(state.social().followers().collect()),
        list(state.social().following().collect())
    )
}

fn render_offers(state: &NodeState) -> String {
    let offers = state.transfers().pending_offers();
    if offers.is_empty() {
        return "no pending offers".into();
    }
    offers
        .iter()
        .map(|o| {
            format!(
                "{}: {} ({} bytes, {}) from {} - {}",
                o.file_id, o.filename, o.filesize, o.filetype, o.from, o.description
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_invites(state: &NodeState) -> String {
    let invites = state.games().pending_invites();
    if invites.is_empty() {
        return "no pending invites".into();
    }
    invites
        .iter()
        .map(|i| {
            format!(
                "game {} from {} (they play {}, you play {})",
                i.game_id,
                i.from,
                i.symbol,
                i.symbol.other()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_games(state: &NodeState) -> String {
    let sessions = state.games().sessions();
    if sessions.is_empty() {
        return "no active games".into();
    }
    let mut out = String::new();
    for s in sessions {
        let whose = if s.is_my_turn() { "your turn" } else { "their turn" };
        let _ = writeln!(
            out,
            "game {} vs {} - you are {}, turn {} ({whose})\n{}",
            s.game_id,
            s.opponent,
            s.symbol,
            s.expected_turn(),
            s.board
        );
    }
    out.trim_end().to_string()
}

fn render_groups(state: &NodeState) -> String {
    let groups = state.groups().list();
    if groups.is_empty() {
        return "no groups".into();
    }
    let mut out = String::new();
    for g in groups {
        let members: Vec<String> = g.members.iter().map(|m| m.to_string()).collect();
        let _ = writeln!(
            out,
            "{} \"{}\" (by {}): {}",
            g.group_id,
            g.name,
            g.creator,
            members.join(", ")
        );
        for (from, content) in g.messages.iter().rev().take(5).rev() {
            let _ = writeln!(out, "  {}: {content}", from.name());
        }
    }
    out.trim_end().to_string()
}

fn render_outcome(outcome: &LocalOutcome) -> String {
    let line = |l: &Option<[u8; 3]>| match l {
        Some([a, b, c]) => format!(" on {a},{b},{c}"),
        None => String::new(),
    };
    match outcome {
        LocalOutcome::Won { line: l } => format!("you won{}", line(l)),
        LocalOutcome::Lost { line: l } => format!("you lost{}", line(l)),
        LocalOutcome::Draw => "draw".into(),
        LocalOutcome::Forfeited => "you forfeited".into(),
        LocalOutcome::OpponentForfeited => "opponent forfeited, you win".into(),
    }
}

/// One notice as console text.
pub fn render_notice(notice: &Notice) -> String {
    match notice {
        Notice::PeerDiscovered {
            user_id,
            display_name,
            status,
        } => format!("* {display_name} ({user_id}) is online: {status}"),
        Notice::Post {
            display_name,
            content,
            ..
        } => format!("[post] {display_name}: {content}"),
        Notice::DirectMessage {
            display_name,
            content,
            ..
        } => format!("[dm] {display_name}: {content}"),
        Notice::DeliveryFailed { to, .. } => format!("! message to {to} was not delivered"),
        Notice::Followed { by } => format!("* {by} followed you"),
        Notice::Unfollowed { by } => format!("* {by} unfollowed you"),
        Notice::Liked {
            by, action, post, ..
        } => {
            let verb = match action {
                LikeAction::Like => "likes",
                LikeAction::Unlike => "no longer likes",
            };
            match post {
                Some(content) => format!("* {by} {verb} your post: {content}"),
                None => format!("* {by} {verb} your post"),
            }
        }
        Notice::Group(change) => match change {
            GroupChange::Joined { group_id, name, by } => {
                format!("* {by} added you to group {group_id} \"{name}\"")
            }
            GroupChange::Updated {
                group_id,
                added,
                removed,
            } => format!(
                "* group {group_id}: {} joined, {} left",
                added.len(),
                removed.len()
            ),
            GroupChange::Left { group_id, by } => {
                format!("* {by} removed you from group {group_id}")
            }
        },
        Notice::GroupMessage {
            group_id,
            from,
            content,
        } => format!("[{group_id}] {}: {content}", from.name()),
        Notice::Transfer(event) => render_transfer(event),
        Notice::Game(event) => render_game(event),
        Notice::FileSaved { file_id, path } => {
            format!("* file {file_id} saved to {}", path.display())
        }
    }
}

fn render_transfer(event: &TransferEvent) -> String {
    match event {
        TransferEvent::OfferReceived {
            from,
            file_id,
            filename,
            filesize,
            description,
        } => format!(
            "* {from} offers {filename} ({filesize} bytes): {description}\n  accept {file_id} / reject {file_id}"
        ),
        TransferEvent::OfferAccepted { to, file_id } => {
            format!("* {to} accepted file {file_id}, sending")
        }
        TransferEvent::OfferRejected { to, file_id } => format!("* {to} rejected file {file_id}"),
        TransferEvent::OfferExpired { to, file_id } => {
            format!("! {to} never answered the offer of {file_id}")
        }
        TransferEvent::SendFinished {
            to,
            filename,
            chunks,
            failed_chunks,
            ..
        } => {
            if *failed_chunks == 0 {
                format!("* sent {filename} to {to} ({chunks} chunks)")
            } else {
                format!("! sent {filename} to {to}, {failed_chunks} of {chunks} chunks unconfirmed")
            }
        }
        TransferEvent::FileReceived {
            from,
            filename,
            size,
            ..
        } => format!("* received {filename} ({size} bytes) from {from}"),
        TransferEvent::PeerConfirmed { from, file_id } => {
            format!("* {from} confirmed receipt of {file_id}")
        }
        TransferEvent::OfferLapsed { from, file_id } => {
            format!("* offer {file_id} from {from} dropped, never answered")
        }
        TransferEvent::TransferStalled {
            from, filename, ..
        } => format!("! {filename} from {from} stalled, giving up"),
    }
}

fn render_game(event: &GameEvent) -> String {
    match event {
        GameEvent::InviteReceived {
            from,
            game_id,
            their_symbol,
        } => format!(
            "* {from} invites you to game {game_id} (they play {their_symbol})\n  join {game_id} / decline {game_id}"
        ),
        GameEvent::InviteRefused { from, game_id } => {
            format!("! refused invite from {from}: game id {game_id} busy")
        }
        GameEvent::InviteDeclined { to, game_id } => {
            format!("* {to} declined game {game_id}")
        }
        GameEvent::InviteExpired { to, game_id } => {
            format!("! {to} never answered invite {game_id}")
        }
        GameEvent::InviteLapsed { from, game_id } => {
            format!("* invite {game_id} from {from} dropped, never answered")
        }
        GameEvent::GameStarted {
            game_id,
            opponent,
            symbol,
        } => format!("* game {game_id} vs {opponent} started, you are {symbol}"),
        GameEvent::YourTurn {
            game_id,
            turn,
            board,
            ..
        } => format!("{board}* game {game_id} turn {turn}: your move (move {game_id} <0-8>)"),
        GameEvent::MovePlayed {
            game_id,
            by,
            position,
            board,
        } => format!("* game {game_id}: {} took {position}\n{board}", by.name()),
        GameEvent::GameOver {
            game_id,
            opponent,
            outcome,
            board,
        } => format!(
            "{board}* game {game_id} vs {opponent} over: {}",
            render_outcome(outcome)
        ),
        GameEvent::GameAbandoned { game_id, opponent } => {
            format!("! game {game_id} vs {opponent} abandoned, opponent unreachable")
        }
    }
}

// ============================================================================
// Task
// ============================================================================

/// Read stdin on a plain thread; a blocked read must not hold up runtime
/// shutdown.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (line_tx, line_rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else { break };
            if line_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    line_rx
}

/// Run the console until `exit`, end of input or shutdown.
pub async fn run_console(
    state: SharedState,
    effect_tx: mpsc::Sender<Effect>,
    mut notice_rx: mpsc::Receiver<Notice>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut line_rx = spawn_stdin_reader();
    println!("type 'help' for commands");

    loop {
        tokio::select! {
            line = line_rx.recv() => {
                let Some(line) = line else {
                    tracing::debug!("stdin closed");
                    break;
                };
                let command = match parse_command(&line) {
                    Ok(command) => command,
                    Err(e) if e.is_empty() => continue,
                    Err(e) => {
                        println!("{e}");
                        continue;
                    }
                };
                let applied = {
                    let mut state = state.lock().await;
                    apply(&mut state, command, Now::current())
                };
                match applied {
                    Ok(applied) => {
                        if !applied.output.is_empty() {
                            println!("{}", applied.output);
                        }
                        if applied.exit {
                            break;
                        }
                        if !forward_all(&effect_tx, applied.effects).await {
                            break;
                        }
                    }
                    Err(e) => println!("error: {e:#}"),
                }
            }

            notice = notice_rx.recv() => {
                let Some(notice) = notice else { break };
                println!("{}", render_notice(&notice));
            }

            _ = shutdown.recv() => break,
        }
    }
}
