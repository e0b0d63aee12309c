//! File offers and chunked transfer over a lossy network.

use lsnp_node::Notice;
use lsnp_protocol::{Message, LSNP_TIMING};
use lsnp_transfer::TransferEvent;

use crate::harness::TestNet;

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 251) as u8).collect()
}

fn offered_file_id(net: &TestNet, name: &str) -> String {
    net.notices(name)
        .iter()
        .find_map(|n| match n {
            Notice::Transfer(TransferEvent::OfferReceived { file_id, .. }) => Some(file_id.clone()),
            _ => None,
        })
        .expect("no offer surfaced")
}

#[test]
fn test_transfer_survives_lost_chunk_and_ack() {
    let mut net = TestNet::new(&["alice", "bob"]);
    let bob = net.id("bob");
    let data = payload(100);

    // Lose chunk 2 once, and the ACK for chunk 4 once.
    let mut chunk_lost = false;
    let mut chunk4_id: Option<String> = None;
    let mut ack_lost = false;
    net.set_loss(move |_, _, m| match m {
        Message::FileChunk(c) if c.chunk_index == 2 && !chunk_lost => {
            chunk_lost = true;
            true
        }
        Message::FileChunk(c) if c.chunk_index == 4 => {
            chunk4_id.get_or_insert_with(|| c.message_id.clone());
            false
        }
        Message::Ack(a) if !ack_lost && chunk4_id.as_deref() == Some(a.message_id.as_str()) => {
            ack_lost = true;
            true
        }
        _ => false,
    });

    let file_id = net
        .act("alice", |s, now| {
            s.send_file(bob.clone(), "notes.bin", "application/octet-stream", "notes", data.clone(), now)
        })
        .unwrap();
    assert_eq!(offered_file_id(&net, "bob"), file_id);

    net.act("bob", |s, now| s.accept_file(&file_id, now)).unwrap();
    net.advance(5);

    let files = net.files("bob");
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].filename, "notes.bin");
    assert_eq!(files[0].data, data);

    // 7 chunks, plus one resend each for chunk 2 and chunk 4.
    assert_eq!(net.count_sent("FILE_CHUNK"), 9);
    assert!(net.notices("alice").iter().any(|n| matches!(
        n,
        Notice::Transfer(TransferEvent::SendFinished { chunks: 7, failed_chunks: 0, .. })
    )));
    assert!(net.notices("alice").iter().any(|n| matches!(
        n,
        Notice::Transfer(TransferEvent::PeerConfirmed { file_id: f, .. }) if *f == file_id
    )));
    assert_eq!(net.node("alice").transfers().outgoing_count(), 0);
    assert_eq!(net.node("bob").transfers().incoming_count(), 0);
    assert_eq!(net.node("alice").reliability().pending_count(), 0);
}

#[test]
fn test_rejected_offer_sends_nothing() {
    let mut net = TestNet::new(&["alice", "bob"]);
    let bob = net.id("bob");
    net.act("alice", |s, now| {
        s.send_file(bob.clone(), "big.iso", "application/octet-stream", "", payload(64), now)
    })
    .unwrap();
    let file_id = offered_file_id(&net, "bob");

    net.act("bob", |s, now| s.reject_file(&file_id, now)).unwrap();
    assert!(net.notices("alice").iter().any(|n| matches!(
        n,
        Notice::Transfer(TransferEvent::OfferRejected { .. })
    )));
    assert_eq!(net.count_sent("FILE_CHUNK"), 0);
    assert_eq!(net.node("alice").transfers().outgoing_count(), 0);

    net.advance(40);
    assert_eq!(net.count_sent("FILE_OFFER"), 1);
    assert!(net.node("bob").transfers().pending_offers().is_empty());
}

#[test]
fn test_unanswered_offer_expires() {
    let mut net = TestNet::new(&["alice", "bob"]);
    let bob = net.id("bob");
    net.act("alice", |s, now| {
        s.send_file(bob.clone(), "a.txt", "text/plain", "", payload(10), now)
    })
    .unwrap();

    net.advance(39);
    assert!(net.notices("alice").is_empty());
    net.advance(1);

    assert_eq!(net.count_sent("FILE_OFFER"), 4);
    assert!(matches!(
        net.notices("alice"),
        [Notice::Transfer(TransferEvent::OfferExpired { .. })]
    ));
    // Retransmitted offers surface once.
    let surfaced = net
        .notices("bob")
        .iter()
        .filter(|n| matches!(n, Notice::Transfer(TransferEvent::OfferReceived { .. })))
        .count();
    assert_eq!(surfaced, 1);
}

#[test]
fn test_empty_file_completes() {
    let mut net = TestNet::new(&["alice", "bob"]);
    let bob = net.id("bob");
    net.act("alice", |s, now| {
        s.send_file(bob.clone(), "empty.txt", "text/plain", "", Vec::new(), now)
    })
    .unwrap();
    let file_id = offered_file_id(&net, "bob");
    net.act("bob", |s, now| s.accept_file(&file_id, now)).unwrap();

    assert_eq!(net.count_sent("FILE_CHUNK"), 1);
    let files = net.files("bob");
    assert_eq!(files.len(), 1);
    assert!(files[0].data.is_empty());
    assert!(net.notices("bob").iter().any(|n| matches!(
        n,
        Notice::Transfer(TransferEvent::FileReceived { size: 0, .. })
    )));
}

#[test]
fn test_accept_unknown_offer_is_an_error() {
    let mut net = TestNet::new(&["alice"]);
    let err = net
        .act("alice", |s, now| s.accept_file("nope", now))
        .unwrap_err();
    assert!(err.to_string().contains("nope"), "{err}");
}

#[test]
fn test_ignored_offer_lapses_for_receiver() {
    let mut net = TestNet::new(&["alice", "bob"]);
    let bob = net.id("bob");
    net.act("alice", |s, now| {
        s.send_file(bob.clone(), "a.txt", "text/plain", "", payload(10), now)
    })
    .unwrap();

    net.advance(LSNP_TIMING.stale_session_secs);
    assert!(net.node("bob").transfers().pending_offers().is_empty());
    assert!(net.notices("bob").iter().any(|n| matches!(
        n,
        Notice::Transfer(TransferEvent::OfferLapsed { .. })
    )));
}
