/*!
 * Weld Engine
 * Splices two pipes into one chain and takes chains apart again
 */

// A pipe:
//
//     |         |
//   s |=========| r
// ----|---->----|----
// ----|----<----|----
//   r |=========| s
//     |         |
//     A         B
//
// Two sides (Alice and Bob), two stream buffers (A to B and B to A). From
// Alice's perspective A>B is the sending stream and B>A the receiving one;
// mirrored for Bob.
//
// Welding fuses the Bob of one pipe to the Alice of another, forming a
// chain with outer ends cA and cB and interior joints iB and iA:
//
//     |         |     |         |
//   s |=========|=====|=========| r
// ----|------------>------------|----
// ----|------------<------------|----
//   r |=========|=====|=========| s
//     |         |     |         |
//    cA        iB    iA        cB
//
// One stream buffer per direction serves the whole chain, so traffic
// crosses the joint without an intermediate copy. The cost is that the
// joints can no longer inspect or inject data.

use super::chain::{Chain, ChainState};
use super::side::{PipeSide, SideInner, SideState};
use super::types::{next_chain_id, PipeRole};
use crate::sync::StreamBuffer;
use log::info;
use parking_lot::{Mutex, MutexGuard};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Weld two sides of different pipes together.
///
/// Data that appears at one welded side is carried straight through to
/// the far end of the combined chain. Both sides become joints: their
/// `send`/`receive` turn into no-ops returning 0 and their availability
/// accessors return 0. The connection can be undone with [`unweld`].
///
/// Fatal unless both sides are weldable, neither is already a joint, one
/// is an Alice and the other a Bob, and they belong to distinct chains.
/// The weld is atomic with respect to concurrent traffic on the outer
/// ends, and no in-flight byte is lost or reordered.
pub fn weld(side_1: &PipeSide, side_2: &PipeSide) {
    let i1 = side_1.inner().clone();
    let i2 = side_2.inner().clone();

    assert!(
        i1.weldable && i2.weldable,
        "both sides of a weld must be weldable"
    );

    loop {
        let c1 = i1.state.lock().chain.clone();
        let c2 = i2.state.lock().chain.clone();
        assert!(
            !Arc::ptr_eq(&c1, &c2),
            "cannot weld two ends of the same chain"
        );

        // Chain records by address, then sides by (chain, index): the one
        // lock order every multi-lock path in the crate follows.
        let c1_first = chain_addr(&c1) < chain_addr(&c2);
        let (first, second) = if c1_first { (&c1, &c2) } else { (&c2, &c1) };
        let mut g_first = first.state.lock();
        let mut g_second = second.state.lock();

        // The side->chain pointers may have moved while unlocked.
        if !Arc::ptr_eq(&i1.state.lock().chain, &c1) || !Arc::ptr_eq(&i2.state.lock().chain, &c2)
        {
            continue;
        }

        // Roles are stable while both chain locks are held.
        let r1 = i1.state.lock().role;
        let r2 = i2.state.lock().role;
        assert!(
            r1 != PipeRole::Joint && r2 != PipeRole::Joint,
            "cannot weld an already welded side"
        );
        assert!(r1 != r2, "can only weld an Alice to a Bob");

        // The Bob argument's chain is the left (upstream) half, the Alice
        // argument's chain the right half.
        let (int_alice, right) = if r1 == PipeRole::Alice {
            (i1.clone(), c1.clone())
        } else {
            (i2.clone(), c2.clone())
        };
        let (int_bob, left) = if r1 == PipeRole::Bob {
            (i1.clone(), c1.clone())
        } else {
            (i2.clone(), c2.clone())
        };
        let (g_left, g_right) = if Arc::ptr_eq(first, &left) {
            (&mut g_first, &mut g_second)
        } else {
            (&mut g_second, &mut g_first)
        };

        // Lock every side of both chains.
        let ordered: Vec<Arc<SideInner>> = if chain_addr(&left) < chain_addr(&right) {
            let mut sides = g_left.sides.clone();
            sides.extend(g_right.sides.iter().cloned());
            sides
        } else {
            let mut sides = g_right.sides.clone();
            sides.extend(g_left.sides.iter().cloned());
            sides
        };
        let mut side_guards: Vec<MutexGuard<'_, SideState>> =
            ordered.iter().map(|side| side.state.lock()).collect();
        let idx_of = |target: &Arc<SideInner>| {
            ordered
                .iter()
                .position(|side| Arc::ptr_eq(side, target))
                .expect("side not covered by the weld lock set")
        };

        // Residual migration: bytes stuck before a fused side must leave
        // through the outer ends, ahead of any future traffic.
        migrate_residual(&g_left.alice_to_bob, &g_right.alice_to_bob);
        migrate_residual(&g_right.bob_to_alice, &g_left.bob_to_alice);

        // Concatenate the right chain onto the left one.
        let moved: Vec<Arc<SideInner>> = g_right.sides.drain(..).collect();
        for side in &moved {
            side_guards[idx_of(side)].chain = left.clone();
        }
        g_left.sides.extend(moved.iter().cloned());
        g_left.live_outer = g_left.live_outer + g_right.live_outer - 2;
        g_right.live_outer = 0;

        // Collapse to one buffer per direction: the right A>B carries the
        // combined forward traffic, the left B>A the backward traffic.
        g_left.alice_to_bob = g_right.alice_to_bob.clone();

        // The fused sides become joints.
        for (side, partner) in [(&int_bob, &int_alice), (&int_alice, &int_bob)] {
            let guard = &mut side_guards[idx_of(side)];
            guard.role = PipeRole::Joint;
            guard.sending = None;
            guard.receiving = None;
            guard.weld_partner = Some(Arc::downgrade(partner));
        }

        // Re-point the outer ends at the surviving buffers and each other.
        let front = g_left.sides.first().cloned().expect("welded chain is empty");
        let back = g_left.sides.last().cloned().expect("welded chain is empty");
        {
            let guard = &mut side_guards[idx_of(&front)];
            if guard.role != PipeRole::Joint {
                guard.sending = Some(g_left.alice_to_bob.clone());
                guard.receiving = Some(g_left.bob_to_alice.clone());
                guard.peer_readable = back.readable.clone();
                guard.peer_writable = back.writable.clone();
            }
        }
        {
            let guard = &mut side_guards[idx_of(&back)];
            if guard.role != PipeRole::Joint {
                guard.sending = Some(g_left.bob_to_alice.clone());
                guard.receiving = Some(g_left.alice_to_bob.clone());
                guard.peer_readable = front.readable.clone();
                guard.peer_writable = front.writable.clone();
            }
        }

        // A chain that had already lost an outer end stays broken.
        if g_left.live_outer < 2 {
            g_left.alice_to_bob.mark_broken();
            g_left.bob_to_alice.mark_broken();
        }

        info!(
            "welded chain {} into chain {} ({} sides, {} outer ends)",
            right.id,
            left.id,
            g_left.sides.len(),
            g_left.live_outer
        );
        return;
    }
}

/// Undo a [`weld`].
///
/// The chain is split at the given joint (and its partner joint); both
/// halves get fresh buffers restored from the settings captured at
/// allocation, and the two joints get their original roles back.
///
/// Unwelding is only legal while the chain's buffers are empty: residual
/// bytes cannot be attributed to one of the two halves, so in-flight data
/// is a fatal precondition failure. Drain the chain first.
pub fn unweld(side: &PipeSide) {
    let target = side.inner().clone();

    loop {
        let chain = target.state.lock().chain.clone();
        let mut chain_state = chain.state.lock();
        if !Arc::ptr_eq(&target.state.lock().chain, &chain) {
            continue;
        }

        let ordered: Vec<Arc<SideInner>> = chain_state.sides.clone();
        let mut side_guards: Vec<MutexGuard<'_, SideState>> =
            ordered.iter().map(|side| side.state.lock()).collect();
        let idx_of = |target: &Arc<SideInner>| {
            ordered
                .iter()
                .position(|side| Arc::ptr_eq(side, target))
                .expect("side not covered by the unweld lock set")
        };

        let t_idx = idx_of(&target);
        assert!(
            side_guards[t_idx].role == PipeRole::Joint,
            "only a joint can be unwelded"
        );
        let partner = side_guards[t_idx]
            .weld_partner
            .as_ref()
            .and_then(Weak::upgrade)
            .expect("joint lost its weld partner");
        let p_idx = idx_of(&partner);

        // Welds append whole chains, and only outer sides can be freed, so
        // a weld pair stays adjacent with the Bob-origin joint first.
        let bob_idx = t_idx.min(p_idx);
        let alice_idx = t_idx.max(p_idx);
        assert!(alice_idx == bob_idx + 1, "weld pair is not adjacent");

        assert!(
            chain_state.alice_to_bob.bytes_available() == 0
                && chain_state.bob_to_alice.bytes_available() == 0,
            "cannot unweld while data is in flight"
        );

        // Split the side list between the two joints; the left half keeps
        // the existing chain record.
        let right_sides = chain_state.sides.split_off(alice_idx);

        // Left half: fresh buffers from the captured settings.
        let left_front = chain_state.sides.first().cloned().expect("empty chain");
        let left_back = ordered[bob_idx].clone();
        let left_a2b = Arc::new(buffer_from(&left_front));
        let left_b2a = Arc::new(buffer_from(&left_back));
        chain_state.alice_to_bob = left_a2b.clone();
        chain_state.bob_to_alice = left_b2a.clone();

        {
            let guard = &mut side_guards[bob_idx];
            guard.role = PipeRole::Bob;
            guard.sending = Some(left_b2a.clone());
            guard.receiving = Some(left_a2b.clone());
            guard.weld_partner = None;
            guard.peer_readable = left_front.readable.clone();
            guard.peer_writable = left_front.writable.clone();
        }
        if !Arc::ptr_eq(&left_front, &left_back) {
            let guard = &mut side_guards[idx_of(&left_front)];
            if guard.role != PipeRole::Joint {
                guard.sending = Some(left_a2b.clone());
                guard.receiving = Some(left_b2a.clone());
                guard.peer_readable = left_back.readable.clone();
                guard.peer_writable = left_back.writable.clone();
            }
        }

        let left_live = chain_state
            .sides
            .iter()
            .filter(|side| side_guards[idx_of(*side)].role != PipeRole::Joint)
            .count();
        chain_state.live_outer = left_live;
        if left_live < 2 {
            left_a2b.mark_broken();
            left_b2a.mark_broken();
        }

        // Right half: a fresh chain record.
        let right_front = ordered[alice_idx].clone();
        let right_back = right_sides.last().cloned().expect("empty chain");
        let right_a2b = Arc::new(buffer_from(&right_front));
        let right_b2a = Arc::new(buffer_from(&right_back));

        {
            let guard = &mut side_guards[alice_idx];
            guard.role = PipeRole::Alice;
            guard.sending = Some(right_a2b.clone());
            guard.receiving = Some(right_b2a.clone());
            guard.weld_partner = None;
            guard.peer_readable = right_back.readable.clone();
            guard.peer_writable = right_back.writable.clone();
        }
        if !Arc::ptr_eq(&right_back, &right_front) {
            let guard = &mut side_guards[idx_of(&right_back)];
            if guard.role != PipeRole::Joint {
                guard.sending = Some(right_b2a.clone());
                guard.receiving = Some(right_a2b.clone());
                guard.peer_readable = right_front.readable.clone();
                guard.peer_writable = right_front.writable.clone();
            }
        }

        let right_live = right_sides
            .iter()
            .filter(|side| side_guards[idx_of(*side)].role != PipeRole::Joint)
            .count();
        if right_live < 2 {
            right_a2b.mark_broken();
            right_b2a.mark_broken();
        }

        let right_chain = Arc::new(Chain {
            id: next_chain_id(),
            state: Mutex::new(ChainState {
                alice_to_bob: right_a2b,
                bob_to_alice: right_b2a,
                sides: right_sides.clone(),
                live_outer: right_live,
            }),
        });
        for side in &right_sides {
            side_guards[idx_of(side)].chain = right_chain.clone();
        }

        info!(
            "unwelded chain {} at joint pair ({}, {}), new chain {}",
            chain.id, bob_idx, alice_idx, right_chain.id
        );
        return;
    }
}

fn chain_addr(chain: &Arc<Chain>) -> usize {
    Arc::as_ptr(chain) as usize
}

fn buffer_from(side: &Arc<SideInner>) -> StreamBuffer {
    StreamBuffer::new(side.send_settings.capacity, side.send_settings.trigger_level)
}

/// Move every byte of `src` to the tail of `dst`. Fatal if anything does
/// not fit: losing in-flight data during a weld is never acceptable.
fn migrate_residual(src: &StreamBuffer, dst: &StreamBuffer) {
    let pending = src.bytes_available();
    if pending == 0 {
        return;
    }
    let mut buf = vec![0u8; pending];
    let drained = src.receive(&mut buf, Some(Duration::ZERO));
    let copied = dst.send(&buf[..drained], Some(Duration::ZERO));
    assert!(
        drained == pending && copied == drained && src.bytes_available() == 0,
        "residual bytes lost during weld"
    );
}
