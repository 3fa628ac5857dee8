/*!
 * Pipe Sides
 * User-visible endpoint handles and the pipe allocation entry points
 */

use super::chain::{Chain, ChainState};
use super::types::{next_chain_id, ChainStats, DirectionSettings, PipeRole, PipeState, WeldingCap};
use crate::core::types::Size;
use crate::event::{EventKind, EventLink};
use crate::sync::StreamBuffer;
use log::{debug, info};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Mutable fields of one side, guarded by the side mutex.
///
/// Everything here may be rewritten by a weld or unweld; the weld engine
/// holds every side lock of the affected chains while it does so, which is
/// what makes a weld atomic with respect to in-flight traffic.
pub(crate) struct SideState {
    pub role: PipeRole,
    pub chain: Arc<Chain>,
    pub sending: Option<Arc<StreamBuffer>>,
    pub receiving: Option<Arc<StreamBuffer>>,
    /// Peer's readable link, raised when our send crosses the trigger level.
    pub peer_readable: EventLink,
    /// Peer's writable link, raised when our receive frees space.
    pub peer_writable: EventLink,
    /// The joint this side was fused with, while welded.
    pub weld_partner: Option<Weak<SideInner>>,
}

/// Immutable wiring of a non-weldable side.
///
/// A side that can never be welded keeps its buffers and peer links for
/// life, so its data path skips the side mutex entirely; the stream
/// buffers synchronize internally.
pub(crate) struct FixedWiring {
    pub sending: Arc<StreamBuffer>,
    pub receiving: Arc<StreamBuffer>,
    pub peer_readable: EventLink,
    pub peer_writable: EventLink,
}

pub(crate) struct SideInner {
    pub weldable: bool,
    /// Settings of the direction this side sends into, captured at
    /// allocation so an unweld can restore independent buffers.
    pub send_settings: DirectionSettings,
    /// This side's own readiness links (readable, writable).
    pub readable: EventLink,
    pub writable: EventLink,
    /// Lock-free fast path, present iff `weldable` is false.
    pub fixed: Option<FixedWiring>,
    pub state: Mutex<SideState>,
}

impl SideInner {
    pub(crate) fn send(&self, data: &[u8], timeout: Option<Duration>) -> Size {
        if let Some(wiring) = &self.fixed {
            return send_on(&wiring.sending, &wiring.peer_readable, data, timeout);
        }

        let state = self.state.lock();
        let Some(buffer) = state.sending.clone() else {
            return 0; // joints are no-ops
        };
        let sent = send_on(&buffer, &state.peer_readable, data, timeout);
        if sent > 0 {
            debug!("chain {}: sent {} bytes", state.chain.id, sent);
        }
        sent
    }

    pub(crate) fn receive(&self, buf: &mut [u8], timeout: Option<Duration>) -> Size {
        if let Some(wiring) = &self.fixed {
            return receive_on(&wiring.receiving, &wiring.peer_writable, buf, timeout);
        }

        let state = self.state.lock();
        let Some(buffer) = state.receiving.clone() else {
            return 0; // joints are no-ops
        };
        let received = receive_on(&buffer, &state.peer_writable, buf, timeout);
        if received > 0 {
            debug!("chain {}: received {} bytes", state.chain.id, received);
        }
        received
    }
}

fn send_on(
    buffer: &StreamBuffer,
    peer_readable: &EventLink,
    data: &[u8],
    timeout: Option<Duration>,
) -> Size {
    let before = buffer.bytes_available();
    let sent = buffer.send(data, timeout);
    let after = buffer.bytes_available();

    // Raise the peer's readable link exactly when the buffered amount
    // crosses the trigger level upward.
    let trigger = buffer.trigger_level();
    if before < trigger && after >= trigger {
        peer_readable.notify();
    }
    sent
}

fn receive_on(
    buffer: &StreamBuffer,
    peer_writable: &EventLink,
    buf: &mut [u8],
    timeout: Option<Duration>,
) -> Size {
    let received = buffer.receive(buf, timeout);

    // Waking a possibly-blocked sender is always safe.
    if received > 0 {
        peer_writable.notify();
    }
    received
}

/// One side of a pipe or pipe chain.
///
/// Handles are freely movable between threads and usable through shared
/// references; every operation synchronizes internally. Dropping an outer
/// handle frees the side exactly like [`PipeSide::free`]; dropping a
/// handle that has become a joint merely releases the handle (the joint
/// itself stays owned by its chain until the chain is torn down).
pub struct PipeSide {
    inner: Option<Arc<SideInner>>,
}

/// The two connected sides of a freshly allocated pipe
pub struct Pipe {
    pub alice: PipeSide,
    pub bob: PipeSide,
}

impl Pipe {
    /// Allocate a symmetric pipe with welding enabled.
    ///
    /// Creating a pair of sides this way is the only way to connect two
    /// sides together; two orphaned sides can never be joined after the
    /// fact.
    pub fn new(capacity: Size, trigger_level: Size) -> Self {
        let settings = DirectionSettings::new(capacity, trigger_level);
        Self::with_settings(WeldingCap::Enabled, settings, settings)
    }

    /// Allocate a pipe with per-direction settings and an explicit welding
    /// capability.
    pub fn with_settings(
        welding_cap: WeldingCap,
        to_alice: DirectionSettings,
        to_bob: DirectionSettings,
    ) -> Self {
        to_alice.validate();
        to_bob.validate();

        let alice_to_bob = Arc::new(StreamBuffer::new(to_bob.capacity, to_bob.trigger_level));
        let bob_to_alice = Arc::new(StreamBuffer::new(to_alice.capacity, to_alice.trigger_level));

        let chain = Arc::new(Chain {
            id: next_chain_id(),
            state: Mutex::new(ChainState {
                alice_to_bob: alice_to_bob.clone(),
                bob_to_alice: bob_to_alice.clone(),
                sides: Vec::new(),
                live_outer: 2,
            }),
        });

        let weldable = welding_cap == WeldingCap::Enabled;
        let alice_links = (EventLink::new(), EventLink::new());
        let bob_links = (EventLink::new(), EventLink::new());

        let alice = Arc::new(SideInner {
            weldable,
            send_settings: to_bob,
            readable: alice_links.0.clone(),
            writable: alice_links.1.clone(),
            fixed: (!weldable).then(|| FixedWiring {
                sending: alice_to_bob.clone(),
                receiving: bob_to_alice.clone(),
                peer_readable: bob_links.0.clone(),
                peer_writable: bob_links.1.clone(),
            }),
            state: Mutex::new(SideState {
                role: PipeRole::Alice,
                chain: chain.clone(),
                sending: Some(alice_to_bob.clone()),
                receiving: Some(bob_to_alice.clone()),
                peer_readable: bob_links.0.clone(),
                peer_writable: bob_links.1.clone(),
                weld_partner: None,
            }),
        });
        let bob = Arc::new(SideInner {
            weldable,
            send_settings: to_alice,
            readable: bob_links.0,
            writable: bob_links.1,
            fixed: (!weldable).then(|| FixedWiring {
                sending: bob_to_alice.clone(),
                receiving: alice_to_bob.clone(),
                peer_readable: alice_links.0.clone(),
                peer_writable: alice_links.1.clone(),
            }),
            state: Mutex::new(SideState {
                role: PipeRole::Bob,
                chain: chain.clone(),
                sending: Some(bob_to_alice),
                receiving: Some(alice_to_bob),
                peer_readable: alice_links.0,
                peer_writable: alice_links.1,
                weld_partner: None,
            }),
        });

        chain.state.lock().sides = vec![alice.clone(), bob.clone()];

        info!(
            "created pipe chain {} (to_bob: {}/{}, to_alice: {}/{}, welding: {:?})",
            chain.id,
            to_bob.capacity,
            to_bob.trigger_level,
            to_alice.capacity,
            to_alice.trigger_level,
            welding_cap
        );

        Self {
            alice: PipeSide { inner: Some(alice) },
            bob: PipeSide { inner: Some(bob) },
        }
    }
}

impl PipeSide {
    pub(crate) fn inner(&self) -> &Arc<SideInner> {
        self.inner
            .as_ref()
            .expect("pipe side handle used after free")
    }

    /// The role of this side. Constant-time.
    pub fn role(&self) -> PipeRole {
        self.inner().state.lock().role
    }

    /// Whether the peer outer side is still alive.
    ///
    /// Joints are interior to a chain and always report `Open`.
    pub fn state(&self) -> PipeState {
        let inner = self.inner();
        loop {
            let (role, chain) = {
                let state = inner.state.lock();
                (state.role, state.chain.clone())
            };
            if role == PipeRole::Joint {
                return PipeState::Open;
            }
            let chain_state = chain.state.lock();
            // A concurrent weld may have moved this side to another chain
            // between the snapshot and the lock.
            if !Arc::ptr_eq(&inner.state.lock().chain, &chain) {
                continue;
            }
            return chain_state.state();
        }
    }

    /// Send bytes toward the peer, blocking up to `timeout` for buffer
    /// space. Returns the number of bytes accepted; 0 for joints.
    pub fn send(&self, data: &[u8], timeout: Option<Duration>) -> Size {
        self.inner().send(data, timeout)
    }

    /// Receive bytes from the peer, blocking up to `timeout` for the
    /// receiving buffer's trigger level. Returns the number of bytes
    /// drained; 0 for joints.
    pub fn receive(&self, buf: &mut [u8], timeout: Option<Duration>) -> Size {
        self.inner().receive(buf, timeout)
    }

    /// Bytes buffered and ready to be received on this side. 0 for joints.
    pub fn bytes_available(&self) -> Size {
        let inner = self.inner();
        if let Some(wiring) = &inner.fixed {
            return wiring.receiving.bytes_available();
        }
        let state = inner.state.lock();
        state
            .receiving
            .as_ref()
            .map_or(0, |buffer| buffer.bytes_available())
    }

    /// Space left for this side to send into. 0 for joints.
    pub fn spaces_available(&self) -> Size {
        let inner = self.inner();
        if let Some(wiring) = &inner.fixed {
            return wiring.sending.spaces_available();
        }
        let state = inner.state.lock();
        state
            .sending
            .as_ref()
            .map_or(0, |buffer| buffer.spaces_available())
    }

    /// This side's readable link, for event-loop subscription.
    pub fn readable_link(&self) -> EventLink {
        self.inner().readable.clone()
    }

    /// This side's writable link, for event-loop subscription.
    pub fn writable_link(&self) -> EventLink {
        self.inner().writable.clone()
    }

    /// Current readiness level: readable iff at least one byte is
    /// buffered, writable iff at least one byte of space is free. Joints
    /// are never ready.
    pub fn level(&self, event: EventKind) -> bool {
        match event {
            EventKind::Readable => self.bytes_available() > 0,
            EventKind::Writable => self.spaces_available() > 0,
        }
    }

    /// Diagnostics snapshot of the chain this side belongs to.
    pub fn chain_stats(&self) -> ChainStats {
        let inner = self.inner();
        loop {
            let chain = inner.state.lock().chain.clone();
            let chain_state = chain.state.lock();
            if !Arc::ptr_eq(&inner.state.lock().chain, &chain) {
                continue;
            }
            return chain_state.stats(chain.id);
        }
    }

    /// Free this side.
    ///
    /// The peer, if still alive, observes `Broken` afterwards and its
    /// pending blocking operations are woken. Freeing the last outer side
    /// tears down the whole chain. Fatal if this side is a joint (unweld
    /// first) or if either of its links still has a subscriber.
    pub fn free(mut self) {
        let inner = self.inner.take().expect("pipe side handle used after free");
        free_side(&inner);
    }
}

impl Drop for PipeSide {
    fn drop(&mut self) {
        let Some(inner) = self.inner.take() else {
            return;
        };
        // A handle that became a joint is just forgotten; the chain owns
        // the joint record until teardown.
        if inner.state.lock().role == PipeRole::Joint {
            return;
        }
        free_side(&inner);
    }
}

impl std::fmt::Debug for PipeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            Some(inner) => {
                let state = inner.state.lock();
                f.debug_struct("PipeSide")
                    .field("role", &state.role)
                    .field("chain", &state.chain.id)
                    .field("weldable", &inner.weldable)
                    .finish()
            }
            None => f.debug_struct("PipeSide").field("freed", &true).finish(),
        }
    }
}

/// Shared teardown path for [`PipeSide::free`] and [`Drop`].
pub(crate) fn free_side(inner: &Arc<SideInner>) {
    assert!(
        !inner.readable.is_subscribed() && !inner.writable.is_subscribed(),
        "cannot free a pipe side that is still subscribed to an event loop"
    );

    loop {
        let chain = inner.state.lock().chain.clone();
        let mut chain_state = chain.state.lock();
        {
            let state = inner.state.lock();
            if !Arc::ptr_eq(&state.chain, &chain) {
                continue; // welded between the snapshot and the lock, retry
            }
            assert!(
                state.role != PipeRole::Joint,
                "cannot free a welded pipe side; unweld it first"
            );
        }

        let position = chain_state
            .position_of(inner)
            .expect("pipe side missing from its own chain");
        chain_state.sides.remove(position);
        chain_state.live_outer -= 1;

        if chain_state.live_outer == 0 {
            // Last outer side: release joints, buffers, and the chain
            // record in one cascade.
            chain_state.sides.clear();
            info!("freed pipe side, chain {} deallocated", chain.id);
        } else {
            chain_state.alice_to_bob.mark_broken();
            chain_state.bob_to_alice.mark_broken();
            info!(
                "freed pipe side, chain {} is now broken ({} sides remain)",
                chain.id,
                chain_state.sides.len()
            );
        }
        return;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roles_after_alloc() {
        let pipe = Pipe::new(16, 1);
        assert_eq!(pipe.alice.role(), PipeRole::Alice);
        assert_eq!(pipe.bob.role(), PipeRole::Bob);
        assert_eq!(pipe.alice.state(), PipeState::Open);
        assert_eq!(pipe.bob.state(), PipeState::Open);
    }

    #[test]
    fn test_send_lands_on_peer() {
        let pipe = Pipe::new(16, 1);

        assert_eq!(pipe.alice.send(b"ping", Some(Duration::ZERO)), 4);
        assert_eq!(pipe.bob.bytes_available(), 4);
        assert_eq!(pipe.alice.bytes_available(), 0);

        let mut buf = [0u8; 16];
        let n = pipe.bob.receive(&mut buf, Some(Duration::ZERO));
        assert_eq!(&buf[..n], b"ping");
    }

    #[test]
    fn test_directions_are_independent() {
        let pipe = Pipe::with_settings(
            WeldingCap::Enabled,
            DirectionSettings::new(8, 1),
            DirectionSettings::new(32, 1),
        );

        assert_eq!(pipe.alice.spaces_available(), 32);
        assert_eq!(pipe.bob.spaces_available(), 8);
    }

    #[test]
    fn test_free_breaks_peer() {
        let pipe = Pipe::new(8, 1);

        pipe.alice.free();
        assert_eq!(pipe.bob.state(), PipeState::Broken);
    }

    #[test]
    fn test_chain_stats_snapshot() {
        let pipe = Pipe::new(8, 1);
        pipe.alice.send(b"abc", Some(Duration::ZERO));

        let stats = pipe.bob.chain_stats();
        assert_eq!(stats.sides, 2);
        assert_eq!(stats.joints, 0);
        assert_eq!(stats.state, PipeState::Open);
        assert_eq!(stats.alice_to_bob_buffered, 3);
        assert_eq!(stats.alice_to_bob_capacity, 8);
    }

    #[test]
    #[should_panic(expected = "subscribed")]
    fn test_free_while_subscribed_is_fatal() {
        let pipe = Pipe::new(8, 1);
        pipe.alice.readable_link().subscribe(Box::new(|| {})).unwrap();
        pipe.alice.free();
    }
}
