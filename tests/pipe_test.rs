/*!
 * Pipe Tests
 * Endpoint semantics: round-trips, back-pressure, broken pipes, events
 */

use pipechain::{DirectionSettings, EventKind, Pipe, PipeRole, PipeState, WeldingCap};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const NO_WAIT: Option<Duration> = Some(Duration::ZERO);

#[test]
fn test_simple_round_trip() {
    let pipe = Pipe::new(16, 1);

    assert_eq!(pipe.alice.send(b"hello", NO_WAIT), 5);

    let mut buf = [0u8; 16];
    let n = pipe.bob.receive(&mut buf, Some(Duration::from_millis(100)));
    assert_eq!(&buf[..n], b"hello");
}

#[test]
fn test_back_pressure() {
    let pipe = Pipe::new(4, 1);

    // Only the first four bytes fit.
    assert_eq!(pipe.alice.send(b"abcdefgh", NO_WAIT), 4);
    assert_eq!(pipe.alice.spaces_available(), 0);

    let mut buf = [0u8; 2];
    assert_eq!(pipe.bob.receive(&mut buf, NO_WAIT), 2);
    assert_eq!(&buf, b"ab");

    // Draining two bytes made room for exactly two more.
    assert_eq!(pipe.alice.send(b"efgh", NO_WAIT), 2);

    let mut rest = [0u8; 8];
    let n = pipe.bob.receive(&mut rest, NO_WAIT);
    assert_eq!(&rest[..n], b"cdef");
}

#[test]
fn test_both_directions() {
    let pipe = Pipe::new(16, 1);

    pipe.alice.send(b"ping", NO_WAIT);
    pipe.bob.send(b"pong", NO_WAIT);

    let mut buf = [0u8; 16];
    let n = pipe.bob.receive(&mut buf, NO_WAIT);
    assert_eq!(&buf[..n], b"ping");
    let n = pipe.alice.receive(&mut buf, NO_WAIT);
    assert_eq!(&buf[..n], b"pong");
}

#[test]
fn test_broken_pipe() {
    let pipe = Pipe::new(8, 1);

    pipe.bob.send(b"xyz", NO_WAIT);
    pipe.alice.free();

    assert_eq!(pipe.bob.state(), PipeState::Broken);

    // The buffer still accepts writes, but nobody will ever read them.
    assert_eq!(pipe.bob.send(b"more", NO_WAIT), 4);

    pipe.bob.free();
}

#[test]
fn test_leftovers_survive_peer_free() {
    let pipe = Pipe::new(8, 1);

    pipe.alice.send(b"bye", NO_WAIT);
    pipe.alice.free();

    // Leftovers first, then 0 forever.
    let mut buf = [0u8; 8];
    let n = pipe.bob.receive(&mut buf, NO_WAIT);
    assert_eq!(&buf[..n], b"bye");
    assert_eq!(pipe.bob.receive(&mut buf, NO_WAIT), 0);
}

#[test]
fn test_peer_free_wakes_blocked_receive() {
    let Pipe { alice, bob } = Pipe::new(8, 4);

    let handle = thread::spawn(move || {
        let mut buf = [0u8; 8];
        alice.receive(&mut buf, Some(Duration::from_secs(5)))
    });

    thread::sleep(Duration::from_millis(50));
    bob.free();

    // The receive returns early instead of riding out its timeout.
    assert_eq!(handle.join().unwrap(), 0);
}

#[test]
fn test_state_never_recovers() {
    let pipe = Pipe::new(8, 1);

    assert_eq!(pipe.bob.state(), PipeState::Open);
    pipe.alice.free();
    assert_eq!(pipe.bob.state(), PipeState::Broken);

    // No amount of traffic brings it back.
    pipe.bob.send(b"?", NO_WAIT);
    assert_eq!(pipe.bob.state(), PipeState::Broken);
}

#[test]
fn test_drop_frees_like_free() {
    let pipe = Pipe::new(8, 1);

    drop(pipe.alice);
    assert_eq!(pipe.bob.state(), PipeState::Broken);
}

#[test]
fn test_receive_waits_for_trigger_level() {
    let Pipe { alice, bob } = Pipe::new(16, 4);

    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        alice.send(b"ab", None);
        thread::sleep(Duration::from_millis(30));
        alice.send(b"cd", None);
        alice
    });

    let mut buf = [0u8; 16];
    let n = bob.receive(&mut buf, Some(Duration::from_secs(2)));
    assert_eq!(&buf[..n], b"abcd");

    handle.join().unwrap();
}

#[test]
fn test_fifo_across_threads() {
    let Pipe { alice, bob } = Pipe::new(8, 1);
    let total = 4096usize;

    let producer = thread::spawn(move || {
        let data: Vec<u8> = (0..total).map(|i| (i % 251) as u8).collect();
        let mut sent = 0;
        while sent < total {
            sent += alice.send(&data[sent..], Some(Duration::from_millis(100)));
        }
        alice
    });

    let mut received = Vec::with_capacity(total);
    let mut buf = [0u8; 64];
    while received.len() < total {
        let n = bob.receive(&mut buf, Some(Duration::from_millis(100)));
        received.extend_from_slice(&buf[..n]);
    }

    let expected: Vec<u8> = (0..total).map(|i| (i % 251) as u8).collect();
    assert_eq!(received, expected);

    producer.join().unwrap();
}

#[test]
fn test_asymmetric_settings() {
    let pipe = Pipe::with_settings(
        WeldingCap::Enabled,
        DirectionSettings::new(4, 1),
        DirectionSettings::new(64, 1),
    );

    // Alice sends into the 64-byte direction, Bob into the 4-byte one.
    assert_eq!(pipe.alice.spaces_available(), 64);
    assert_eq!(pipe.bob.spaces_available(), 4);
    assert_eq!(pipe.bob.send(b"abcdefgh", NO_WAIT), 4);
}

#[test]
fn test_readable_notified_at_trigger_crossing() {
    let pipe = Pipe::new(16, 4);
    let wakes = Arc::new(AtomicUsize::new(0));

    let link = pipe.bob.readable_link();
    let counter = wakes.clone();
    link.subscribe(Box::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    }))
    .unwrap();

    // Below the trigger level: no notification.
    pipe.alice.send(b"ab", NO_WAIT);
    assert_eq!(wakes.load(Ordering::SeqCst), 0);
    assert!(!link.take_pending());

    // Crossing it: exactly one.
    pipe.alice.send(b"cd", NO_WAIT);
    assert_eq!(wakes.load(Ordering::SeqCst), 1);
    assert!(link.take_pending());

    // Already above it: still one.
    pipe.alice.send(b"efg", NO_WAIT);
    assert_eq!(wakes.load(Ordering::SeqCst), 1);

    link.unsubscribe();
}

#[test]
fn test_writable_notified_on_drain() {
    let pipe = Pipe::new(8, 1);
    let wakes = Arc::new(AtomicUsize::new(0));

    let link = pipe.alice.writable_link();
    let counter = wakes.clone();
    link.subscribe(Box::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    }))
    .unwrap();

    pipe.alice.send(b"abcd", NO_WAIT);
    assert_eq!(wakes.load(Ordering::SeqCst), 0);

    let mut buf = [0u8; 8];
    pipe.bob.receive(&mut buf, NO_WAIT);
    assert_eq!(wakes.load(Ordering::SeqCst), 1);
    assert!(link.take_pending());

    link.unsubscribe();
}

#[test]
fn test_readiness_levels() {
    let pipe = Pipe::new(4, 1);

    assert!(!pipe.bob.level(EventKind::Readable));
    assert!(pipe.alice.level(EventKind::Writable));

    pipe.alice.send(b"abcd", NO_WAIT);
    assert!(pipe.bob.level(EventKind::Readable));
    assert!(!pipe.alice.level(EventKind::Writable));
}

#[test]
fn test_non_weldable_pipe_traffic() {
    let settings = DirectionSettings::new(16, 1);
    let pipe = Pipe::with_settings(WeldingCap::Disabled, settings, settings);

    assert_eq!(pipe.alice.send(b"fast path", NO_WAIT), 9);
    assert_eq!(pipe.bob.bytes_available(), 9);

    let mut buf = [0u8; 16];
    let n = pipe.bob.receive(&mut buf, NO_WAIT);
    assert_eq!(&buf[..n], b"fast path");

    pipe.alice.free();
    assert_eq!(pipe.bob.state(), PipeState::Broken);
}

#[test]
fn test_roles() {
    let pipe = Pipe::new(8, 1);
    assert_eq!(pipe.alice.role(), PipeRole::Alice);
    assert_eq!(pipe.bob.role(), PipeRole::Bob);
}

#[test]
fn test_zero_length_transfers() {
    let pipe = Pipe::new(8, 1);

    assert_eq!(pipe.alice.send(b"", None), 0);
    let mut empty = [0u8; 0];
    assert_eq!(pipe.bob.receive(&mut empty, None), 0);
}
