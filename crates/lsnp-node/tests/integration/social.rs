//! Discovery, posts, direct messages, likes and token revocation.

use lsnp_node::Notice;
use lsnp_protocol::{Destination, LikeAction, Message, MessageType, Scope};

use crate::harness::{TestNet, T0};

#[test]
fn test_discovery_via_announce() {
    let mut net = TestNet::new(&["alice", "bob", "carol"]);
    net.announce("alice");

    // Everyone learns alice from her PROFILE, and alice learns the others
    // from their PROFILE replies to her PING.
    for name in ["bob", "carol"] {
        assert!(net.node(name).peers().contains(&net.id("alice")));
        assert!(net.node("alice").peers().contains(&net.id(name)));
    }
    assert_eq!(
        net.node("bob").peers().display_name(&net.id("alice")),
        "Alice"
    );
    // Our own broadcasts come back to us and are ignored.
    assert!(!net.node("alice").peers().contains(&net.id("alice")));
    assert!(net
        .notices("bob")
        .iter()
        .any(|n| matches!(n, Notice::PeerDiscovered { display_name, .. } if display_name == "Alice")));
}

#[test]
fn test_posts_reach_followers_only() {
    let mut net = TestNet::new(&["alice", "bob", "carol"]);
    let alice = net.id("alice");
    net.act("bob", |s, now| s.follow(alice.clone(), now)).unwrap();
    assert!(net
        .notices("alice")
        .iter()
        .any(|n| matches!(n, Notice::Followed { by } if *by == net.id("bob"))));

    net.act("alice", |s, now| s.post("first light", now)).unwrap();

    let bob_posts: Vec<&Notice> = net
        .notices("bob")
        .iter()
        .filter(|n| matches!(n, Notice::Post { .. }))
        .collect();
    assert_eq!(bob_posts.len(), 1);
    assert!(net.notices("carol").is_empty());
    assert_eq!(net.node("bob").social().visible_posts(Some(&alice), T0).len(), 1);
    assert!(net.node("carol").social().visible_posts(None, T0).is_empty());

    // Unfollowed: later posts are not stored.
    net.act("bob", |s, now| s.unfollow(alice.clone(), now)).unwrap();
    net.act("alice", |s, now| s.post("second", now)).unwrap();
    assert_eq!(net.node("bob").social().visible_posts(None, T0).len(), 1);
    assert_eq!(net.node("alice").social().followers().count(), 0);
}

#[test]
fn test_dm_delivered_despite_loss() {
    let mut net = TestNet::new(&["alice", "bob"]);
    let bob = net.id("bob");
    let mut dropped = false;
    net.set_loss(move |_, _, m| {
        if matches!(m, Message::Dm(_)) && !dropped {
            dropped = true;
            return true;
        }
        false
    });

    net.act("alice", |s, now| s.direct_message(bob.clone(), "are you there?", now))
        .unwrap();
    assert!(net.notices("bob").is_empty());

    net.advance(2);
    assert!(matches!(
        net.notices("bob"),
        [Notice::DirectMessage { content, .. }] if content == "are you there?"
    ));
    assert_eq!(net.node("alice").reliability().pending_count(), 0);

    net.advance(10);
    assert_eq!(net.count_sent("DM"), 2);
    assert_eq!(net.node("bob").social().conversation(&net.id("alice")).len(), 1);
}

#[test]
fn test_dm_to_silent_peer_fails_after_retries() {
    let mut net = TestNet::new(&["alice", "bob"]);
    let bob = net.id("bob");
    net.set_loss(|_, to, _| to.name() == "bob");

    net.act("alice", |s, now| s.direct_message(bob.clone(), "hello?", now))
        .unwrap();
    net.advance(7);
    assert!(net.notices("alice").is_empty());
    net.advance(1);

    assert_eq!(net.count_sent("DM"), 4, "one send plus three retries");
    assert!(matches!(
        net.notices("alice"),
        [Notice::DeliveryFailed { to: Destination::Peer(to), .. }] if *to == net.id("bob")
    ));
    net.advance(10);
    assert_eq!(net.count_sent("DM"), 4);
}

#[test]
fn test_likes_on_own_post() {
    let mut net = TestNet::new(&["alice", "bob"]);
    let alice = net.id("alice");
    net.act("bob", |s, now| s.follow(alice.clone(), now)).unwrap();
    net.act("alice", |s, now| s.post("sunny day", now)).unwrap();

    net.act("bob", |s, now| s.like(alice.clone(), T0, LikeAction::Like, now))
        .unwrap();
    assert!(net.notices("alice").iter().any(|n| matches!(
        n,
        Notice::Liked { action: LikeAction::Like, post: Some(p), .. } if p == "sunny day"
    )));
    assert_eq!(net.node("alice").social().like_count(T0), 1);

    net.act("bob", |s, now| s.like(alice.clone(), T0, LikeAction::Unlike, now))
        .unwrap();
    assert_eq!(net.node("alice").social().like_count(T0), 0);
}

#[test]
fn test_revoked_token_rejected_by_peer() {
    let mut net = TestNet::new(&["alice", "bob"]);
    let (alice, bob) = (net.id("alice"), net.id("bob"));

    net.act("alice", |s, now| s.direct_message(bob.clone(), "one", now))
        .unwrap();
    let first = net
        .sent
        .iter()
        .find_map(|(_, m)| match m {
            Message::Dm(dm) => Some(dm.clone()),
            _ => None,
        })
        .unwrap();

    net.act("alice", |s, now| s.revoke_scope(Scope::Chat, now))
        .unwrap();
    assert!(net.node("bob").tokens().is_revoked(&first.token));

    // A replay under the withdrawn token is dropped without an ACK.
    let acks_before = net.count_sent("ACK");
    let mut replay = first.clone();
    replay.message_id = "replayed".into();
    replay.content = "forged".into();
    net.inject(&alice, Message::Dm(replay), Destination::Peer(bob.clone()));
    assert_eq!(net.count_sent("ACK"), acks_before);

    // Fresh messages carry a fresh token and still get through.
    net.act("alice", |s, now| s.direct_message(bob.clone(), "two", now))
        .unwrap();
    let contents: Vec<&str> = net
        .node("bob")
        .social()
        .conversation(&alice)
        .iter()
        .map(|e| e.content.as_str())
        .collect();
    assert_eq!(contents, ["one", "two"]);
}

#[test]
fn test_shutdown_revokes_every_issued_token() {
    let mut net = TestNet::new(&["alice", "bob"]);
    let (alice, bob) = (net.id("alice"), net.id("bob"));
    net.act("bob", |s, now| s.follow(alice.clone(), now)).unwrap();
    net.act("alice", |s, now| s.post("bye soon", now)).unwrap();
    net.act("alice", |s, now| s.direct_message(bob.clone(), "bye", now))
        .unwrap();

    net.shutdown("alice");

    let revokes = net
        .sent
        .iter()
        .filter(|(from, m)| *from == alice && m.message_type() == MessageType::Revoke)
        .count();
    assert_eq!(revokes, 2, "broadcast and chat tokens");
    assert_eq!(net.node("bob").tokens().revoked_count(), 2);
}
