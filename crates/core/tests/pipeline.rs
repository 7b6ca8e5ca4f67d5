//! End-to-end tests: message -> frames -> shuffled delivery -> message.
//!
//! Frames are pushed through the engine exactly as a radio transport would
//! hand them over, in orders that differ from the send order.

use std::sync::Arc;
use std::time::{Duration, Instant};

use nearchat_core::{
    compression::{compress_link, decompress_link, simplify_links},
    ChatKind, ChatScope, InboundOutcome, Keyring, LogicalMessage, MessageBody, MessageKind, MessageStatus,
    NodeId, OutboundMessage, PayloadBudget, Reassembler, ReplyRef,
};

const HEADER_SIZE: usize = 13;

fn node(value: u64) -> NodeId {
    NodeId::new(value)
}

/// Odd positions first, then even, then reversed within each half.
fn scramble<T: Clone>(items: &[T]) -> Vec<T> {
    let mut odd: Vec<T> = items.iter().skip(1).step_by(2).cloned().collect();
    let mut even: Vec<T> = items.iter().step_by(2).cloned().collect();
    odd.reverse();
    even.reverse();
    odd.into_iter().chain(even).collect()
}

fn deliver(receiver: &Reassembler, frames: &[Vec<u8>]) -> Option<LogicalMessage> {
    let mut complete = None;
    for frame in frames {
        if let InboundOutcome::Complete(message) = receiver.receive(frame) {
            assert!(complete.is_none(), "message completed twice");
            complete = Some(message);
        }
    }
    complete
}

#[test]
fn test_rich_message_survives_scrambled_delivery() {
    let keyring = Arc::new(Keyring::new());
    let alice = Reassembler::new(node(0xA), keyring.clone());
    let bob = Reassembler::new(node(0xB), keyring);

    let body = MessageBody::text("Pictures from the trip, enjoy! #2024")
        .with_images(vec![
            "https://cdn.example.com/trip/day1/a.jpg".to_string(),
            "https://cdn.example.com/trip/day1/b.jpg".to_string(),
            "http://mirror.example.org/x.png".to_string(),
        ])
        .with_videos(vec!["https://video.example.net/v/clip_01.mp4".to_string()]);

    let batch = alice.prepare_outbound(&OutboundMessage::broadcast(body.clone())).unwrap();
    assert!(batch.frames.len() > 3);
    assert_eq!(batch.message.kind, MessageKind::PlainCompressed);

    let message = deliver(&bob, &scramble(&batch.frames)).expect("message never completed");
    assert_eq!(message.body, body);
    assert_eq!(message.chunk_count as usize, batch.frames.len());
    assert_eq!(bob.pending_count(), 0);
}

#[test]
fn test_chunk_count_matches_stream_length() {
    let keyring = Arc::new(Keyring::new());
    for budget in [20usize, 27, 31] {
        let sender = Reassembler::new(node(1), keyring.clone()).with_budget(PayloadBudget::new(budget));
        let capacity = budget - HEADER_SIZE;

        let cases = [
            OutboundMessage::broadcast(MessageBody::text("")),
            OutboundMessage::broadcast(MessageBody::text("short")),
            OutboundMessage::broadcast(MessageBody::text("a much longer line of text that needs several frames")),
            OutboundMessage::to_scope(ChatScope::group("crew"), MessageBody::text("grouped words here")),
            OutboundMessage::to_scope(ChatScope::direct(node(2)), MessageBody::text("ünïcode"))
                .replying_to(ReplyRef { sender: node(2), message_id: node(3) }),
        ];

        for outbound in &cases {
            let batch = sender.prepare_outbound(outbound).unwrap();
            let stream_len: usize = batch.frames.iter().map(|f| f.len() - HEADER_SIZE).sum();
            assert_eq!(batch.frames.len(), stream_len.div_ceil(capacity).max(1));
            assert!(batch.frames.iter().all(|f| f.len() <= budget));
        }
    }
}

#[test]
fn test_interleaved_messages_from_two_senders() {
    let keyring = Arc::new(Keyring::new());
    let alice = Reassembler::new(node(0xA), keyring.clone());
    let carol = Reassembler::new(node(0xC), keyring.clone());
    let bob = Reassembler::new(node(0xB), keyring);

    let from_alice = alice
        .prepare_outbound(&OutboundMessage::broadcast(MessageBody::text("alice says the meeting moved to noon")))
        .unwrap();
    let from_carol = carol
        .prepare_outbound(&OutboundMessage::broadcast(MessageBody::text("carol is bringing snacks for everyone")))
        .unwrap();

    let mut interleaved = Vec::new();
    let longest = from_alice.frames.len().max(from_carol.frames.len());
    for i in (0..longest).rev() {
        interleaved.extend(from_alice.frames.get(i).cloned());
        interleaved.extend(from_carol.frames.get(i).cloned());
    }

    let mut texts: Vec<String> = interleaved
        .iter()
        .filter_map(|frame| bob.receive(frame).into_complete())
        .map(|m| m.body.text)
        .collect();
    texts.sort();
    assert_eq!(
        texts,
        vec!["alice says the meeting moved to noon", "carol is bringing snacks for everyone"]
    );
}

#[test]
fn test_group_secret_must_match() {
    let sender_keys = Arc::new(Keyring::new());
    sender_keys.set_group_key("crew", "correct horse");
    let alice = Reassembler::new(node(0xA), sender_keys);

    let shared = Arc::new(Keyring::new());
    shared.set_group_key("crew", "correct horse");
    let member = Reassembler::new(node(0xB), shared);
    let outsider = Reassembler::new(node(0xD), Arc::new(Keyring::new()));

    let text = "only the crew should read this";
    let batch = alice
        .prepare_outbound(&OutboundMessage::to_scope(ChatScope::group("crew"), MessageBody::text(text)))
        .unwrap();

    let read = deliver(&member, &batch.frames).unwrap();
    assert_eq!(read.body.text, text);
    assert_eq!(read.scope.kind, ChatKind::Group);

    let garbled = deliver(&outsider, &batch.frames).unwrap();
    assert_ne!(garbled.body.text, text);
}

#[test]
fn test_sender_identity_survives_the_wire() {
    let keyring = Arc::new(Keyring::new());
    let alice_id = NodeId::from_display_id("HELLO123");
    let alice = Reassembler::new(alice_id, keyring.clone());
    let bob = Reassembler::new(node(0xB), keyring);

    let batch = alice.prepare_outbound(&OutboundMessage::broadcast(MessageBody::text("hey"))).unwrap();
    let message = deliver(&bob, &batch.frames).unwrap();
    assert_eq!(message.sender.to_display_id(), "HELLO123");
    assert_eq!(&batch.frames[0][1..6], alice_id.to_wire().as_bytes());
}

#[test]
fn test_partial_message_expires_and_later_frames_restart_it() {
    let keyring = Arc::new(Keyring::new());
    let alice = Reassembler::new(node(0xA), keyring.clone());
    let bob = Reassembler::new(node(0xB), keyring);

    let batch = alice
        .prepare_outbound(&OutboundMessage::broadcast(MessageBody::text(format!("ß{}", "y".repeat(50)))))
        .unwrap();
    let total = batch.frames.len() as u8;
    assert!(total >= 3);

    bob.receive(&batch.frames[0]);
    let timeout = Duration::from_secs(60);
    let failed = bob.sweep_expired_at(Instant::now() + timeout * 2, timeout);
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].status, MessageStatus::Failed { received: 1, total });

    // A retransmission after the sweep starts a fresh buffer and completes
    let message = deliver(&bob, &batch.frames).unwrap();
    assert!(message.is_complete());
}

#[test]
fn test_concurrent_receivers_deliver_once() {
    let keyring = Arc::new(Keyring::new());
    let alice = Reassembler::new(node(0xA), keyring.clone());
    let bob = Arc::new(Reassembler::new(node(0xB), keyring));

    let batch = alice
        .prepare_outbound(&OutboundMessage::broadcast(MessageBody::text(
            "every chunk arrives on two radios at once and still only one copy is delivered",
        )))
        .unwrap();

    let completions: usize = std::thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let bob = bob.clone();
                let frames = batch.frames.clone();
                s.spawn(move || {
                    frames
                        .iter()
                        .filter(|f| matches!(bob.receive(f), InboundOutcome::Complete(_)))
                        .count()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).sum()
    });

    assert_eq!(completions, 1);
    assert_eq!(bob.stats().delivered, 1);
    assert_eq!(bob.pending_count(), 0);
}

#[test]
fn test_link_codec_matches_simplified_form() {
    let urls = ["cdn.example.com/a/x.jpg", "cdn.example.com/a/y.jpg"];
    let simplified = simplify_links(&urls);
    assert_eq!(simplified, "cdn.example.com/a/<x.jpg|y.jpg>");
    assert_eq!(decompress_link(&compress_link(&simplified).unwrap()), simplified);
}
