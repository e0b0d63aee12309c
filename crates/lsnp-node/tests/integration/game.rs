//! Tic-tac-toe between two nodes: invites, moves, results.

use lsnp_game::{GameError, GameEvent, LocalOutcome};
use lsnp_node::{NodeError, Notice};
use lsnp_protocol::{GameId, Message, Symbol};

use crate::harness::TestNet;

/// alice (X) invites bob, bob accepts.
fn start(net: &mut TestNet) -> GameId {
    let bob = net.id("bob");
    let game = net
        .act("alice", |s, now| s.invite(bob.clone(), Symbol::X, now))
        .unwrap();
    assert!(net.notices("bob").iter().any(|n| matches!(
        n,
        Notice::Game(GameEvent::InviteReceived { game_id, their_symbol: Symbol::X, .. }) if *game_id == game
    )));
    net.act("bob", |s, now| s.accept_game(game, now)).unwrap();
    for name in ["alice", "bob"] {
        assert!(net.node(name).games().session(game).is_some(), "{name} has no session");
    }
    game
}

fn play(net: &mut TestNet, moves: &[(&str, u8)], game: GameId) {
    for (name, position) in moves {
        net.act(name, |s, now| s.play(game, *position, now))
            .unwrap_or_else(|e| panic!("{name} playing {position}: {e}"));
    }
}

fn outcome(net: &TestNet, name: &str) -> Option<LocalOutcome> {
    net.notices(name).iter().find_map(|n| match n {
        Notice::Game(GameEvent::GameOver { outcome, .. }) => Some(outcome.clone()),
        _ => None,
    })
}

#[test]
fn test_x_wins_on_diagonal() {
    let mut net = TestNet::new(&["alice", "bob"]);
    let game = start(&mut net);
    play(
        &mut net,
        &[("alice", 2), ("bob", 0), ("alice", 4), ("bob", 1), ("alice", 6)],
        game,
    );

    assert_eq!(
        outcome(&net, "alice"),
        Some(LocalOutcome::Won { line: Some([2, 4, 6]) })
    );
    assert_eq!(
        outcome(&net, "bob"),
        Some(LocalOutcome::Lost { line: Some([2, 4, 6]) })
    );
    for name in ["alice", "bob"] {
        assert!(net.node(name).games().session(game).is_none());
        assert!(!net.node(name).games().is_id_active(game));
    }
    assert_eq!(net.count_sent("TICTACTOE_RESULT"), 1);
    assert_eq!(net.node("alice").reliability().pending_count(), 0);
}

#[test]
fn test_full_board_is_a_draw() {
    let mut net = TestNet::new(&["alice", "bob"]);
    let game = start(&mut net);
    play(
        &mut net,
        &[
            ("alice", 0),
            ("bob", 1),
            ("alice", 2),
            ("bob", 4),
            ("alice", 3),
            ("bob", 5),
            ("alice", 7),
            ("bob", 6),
            ("alice", 8),
        ],
        game,
    );
    assert_eq!(outcome(&net, "alice"), Some(LocalOutcome::Draw));
    assert_eq!(outcome(&net, "bob"), Some(LocalOutcome::Draw));
}

#[test]
fn test_out_of_turn_and_occupied_moves_rejected() {
    let mut net = TestNet::new(&["alice", "bob"]);
    let game = start(&mut net);

    let err = net.act("bob", |s, now| s.play(game, 0, now)).unwrap_err();
    assert!(matches!(err, NodeError::Game(GameError::NotYourTurn(g)) if g == game));

    play(&mut net, &[("alice", 4)], game);
    let err = net.act("bob", |s, now| s.play(game, 4, now)).unwrap_err();
    assert!(matches!(err, NodeError::Game(GameError::InvalidMove(_))));

    // Neither rejection touched either board.
    let board = &net.node("bob").games().session(game).unwrap().board;
    assert_eq!(board.moves(), 1);
    assert_eq!(board.get(4), Some(Symbol::X));
}

#[test]
fn test_lost_move_is_retransmitted() {
    let mut net = TestNet::new(&["alice", "bob"]);
    let game = start(&mut net);
    let mut dropped = false;
    net.set_loss(move |_, _, m| {
        if matches!(m, Message::GameMove(_)) && !dropped {
            dropped = true;
            return true;
        }
        false
    });

    play(&mut net, &[("alice", 4)], game);
    assert_eq!(net.node("bob").games().session(game).unwrap().board.moves(), 0);

    net.advance(2);
    assert_eq!(net.count_sent("TICTACTOE_MOVE"), 2);
    let session = net.node("bob").games().session(game).unwrap();
    assert_eq!(session.board.get(4), Some(Symbol::X));
    assert!(session.is_my_turn());
    assert_eq!(net.node("alice").reliability().pending_count(), 0);
}

#[test]
fn test_forfeit_ends_game_for_both() {
    let mut net = TestNet::new(&["alice", "bob"]);
    let game = start(&mut net);
    play(&mut net, &[("alice", 0)], game);

    net.act("bob", |s, now| s.forfeit(game, now)).unwrap();

    assert_eq!(outcome(&net, "bob"), Some(LocalOutcome::Forfeited));
    assert_eq!(outcome(&net, "alice"), Some(LocalOutcome::OpponentForfeited));
    assert!(net.node("alice").games().sessions().is_empty());
    assert!(!net.node("bob").games().is_id_active(game));
}

#[test]
fn test_declined_invite_releases_id() {
    let mut net = TestNet::new(&["alice", "bob"]);
    let bob = net.id("bob");
    let game = net
        .act("alice", |s, now| s.invite(bob.clone(), Symbol::O, now))
        .unwrap();
    net.act("bob", |s, now| s.decline_game(game, now)).unwrap();

    assert!(net.notices("alice").iter().any(|n| matches!(
        n,
        Notice::Game(GameEvent::InviteDeclined { game_id, .. }) if *game_id == game
    )));
    assert!(!net.node("alice").games().is_id_active(game));
    assert!(!net.node("bob").games().is_id_active(game));
    assert_eq!(net.node("alice").reliability().pending_count(), 0);
}

#[test]
fn test_unanswered_invite_expires() {
    let mut net = TestNet::new(&["alice", "bob"]);
    let bob = net.id("bob");
    let game = net
        .act("alice", |s, now| s.invite(bob.clone(), Symbol::X, now))
        .unwrap();
    net.advance(40);

    assert_eq!(net.count_sent("TICTACTOE_INVITE"), 4);
    assert!(net.notices("alice").iter().any(|n| matches!(
        n,
        Notice::Game(GameEvent::InviteExpired { game_id, .. }) if *game_id == game
    )));
    assert!(!net.node("alice").games().is_id_active(game));
}

#[test]
fn test_lost_final_ack_spares_next_game() {
    let mut net = TestNet::new(&["alice", "bob"]);
    let first = start(&mut net);

    // bob's ACK of alice's winning move never arrives.
    let mut final_move_id: Option<String> = None;
    net.set_loss(move |_, _, m| match m {
        Message::GameMove(mv) if mv.turn == 5 => {
            final_move_id.get_or_insert_with(|| mv.message_id.clone());
            false
        }
        Message::Ack(a) => final_move_id.as_deref() == Some(a.message_id.as_str()),
        _ => false,
    });
    play(
        &mut net,
        &[("alice", 2), ("bob", 0), ("alice", 4), ("bob", 1), ("alice", 6)],
        first,
    );
    assert_eq!(net.node("alice").reliability().pending_count(), 1);

    // The released id is handed out again.
    let second = start(&mut net);
    assert_eq!(second, first);

    net.advance(12);
    assert!(net.node("alice").games().session(second).is_some());
    assert!(net.node("bob").games().session(second).is_some());
    assert!(!net.notices("alice").iter().any(|n| matches!(
        n,
        Notice::Game(GameEvent::GameAbandoned { .. })
    )));
    assert_eq!(net.node("alice").reliability().pending_count(), 0);
}
