//! Group membership and messaging across three nodes.

use lsnp_node::groups::GroupChange;
use lsnp_node::Notice;
use lsnp_protocol::{Destination, GroupMessage, Message, Scope, TokenAuthority, UserId};

use crate::harness::{TestNet, T0};

fn group_messages(net: &TestNet, name: &str) -> Vec<String> {
    net.notices(name)
        .iter()
        .filter_map(|n| match n {
            Notice::GroupMessage { content, .. } => Some(content.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn test_group_lifecycle() {
    let mut net = TestNet::new(&["alice", "bob", "carol"]);
    let (bob, carol) = (net.id("bob"), net.id("carol"));

    net.act("alice", |s, now| {
        s.create_group("g1", "Friends", vec![bob.clone(), carol.clone()], now)
    })
    .unwrap();
    for name in ["bob", "carol"] {
        assert!(net.notices(name).iter().any(|n| matches!(
            n,
            Notice::Group(GroupChange::Joined { group_id, name: group_name, .. })
                if group_id == "g1" && group_name == "Friends"
        )));
        assert_eq!(net.node(name).groups().get("g1").unwrap().members.len(), 3);
    }

    net.act("alice", |s, now| s.group_message("g1", "hello all", now))
        .unwrap();
    assert_eq!(group_messages(&net, "bob"), ["hello all"]);
    assert_eq!(group_messages(&net, "carol"), ["hello all"]);

    net.act("alice", |s, now| s.update_group("g1", vec![], vec![carol.clone()], now))
        .unwrap();
    assert!(net.notices("carol").iter().any(|n| matches!(
        n,
        Notice::Group(GroupChange::Left { group_id, .. }) if group_id == "g1"
    )));
    assert!(net.node("carol").groups().get("g1").is_none());
    assert!(net.notices("bob").iter().any(|n| matches!(
        n,
        Notice::Group(GroupChange::Updated { removed, .. }) if *removed == [carol.clone()]
    )));

    net.act("bob", |s, now| s.group_message("g1", "just us now", now))
        .unwrap();
    assert_eq!(group_messages(&net, "alice"), ["just us now"]);
    assert_eq!(group_messages(&net, "carol"), ["hello all"]);
    assert_eq!(net.count_sent("GROUP_MESSAGE"), 3);
}

#[test]
fn test_added_member_learns_group_from_update() {
    let mut net = TestNet::new(&["alice", "bob", "carol"]);
    let (bob, carol) = (net.id("bob"), net.id("carol"));
    net.act("alice", |s, now| s.create_group("g2", "Chess", vec![bob.clone()], now))
        .unwrap();
    net.act("alice", |s, now| s.update_group("g2", vec![carol.clone()], vec![], now))
        .unwrap();

    // carol missed the CREATE; the id stands in for the name.
    let group = net.node("carol").groups().get("g2").unwrap();
    assert_eq!(group.name, "g2");
    assert!(net.notices("bob").iter().any(|n| matches!(
        n,
        Notice::Group(GroupChange::Updated { added, .. }) if *added == [carol.clone()]
    )));
}

#[test]
fn test_message_from_non_member_ignored() {
    let mut net = TestNet::new(&["alice", "bob"]);
    let bob = net.id("bob");
    net.act("alice", |s, now| s.create_group("g1", "Friends", vec![bob.clone()], now))
        .unwrap();

    let dave = UserId::parse("dave@10.0.0.9").unwrap();
    let token = TokenAuthority::new(dave.clone(), 3600).token_for(Scope::Group, T0);
    net.inject(
        &dave,
        Message::GroupMessage(GroupMessage {
            from: dave.clone(),
            group_id: "g1".into(),
            content: "let me in".into(),
            token,
        }),
        Destination::Peer(bob.clone()),
    );

    assert!(group_messages(&net, "bob").is_empty());
    assert_eq!(net.node("bob").groups().get("g1").unwrap().messages.len(), 0);
}

#[test]
fn test_group_operations_on_unknown_group_fail() {
    let mut net = TestNet::new(&["alice"]);
    assert!(net
        .act("alice", |s, now| s.group_message("nope", "hi", now))
        .is_err());
    net.act("alice", |s, now| s.create_group("g1", "Solo", vec![], now))
        .unwrap();
    assert!(net
        .act("alice", |s, now| s.create_group("g1", "Again", vec![], now))
        .is_err());
}
