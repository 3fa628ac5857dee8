/*!
 * Pipe Chain
 * Shared record owned by every side of one pipe (or welded pipe chain)
 */

use super::side::SideInner;
use super::types::{ChainStats, PipeState};
use crate::core::types::ChainId;
use crate::sync::StreamBuffer;
use parking_lot::Mutex;
use std::sync::Arc;

/// A chain of pipes that have been welded together. An unwelded pipe is a
/// chain of length one (two sides).
pub(crate) struct Chain {
    pub id: ChainId,
    /// State-transition mutex: serializes free, weld, and unweld.
    pub state: Mutex<ChainState>,
}

pub(crate) struct ChainState {
    pub alice_to_bob: Arc<StreamBuffer>,
    pub bob_to_alice: Arc<StreamBuffer>,
    /// Sides in order of travel from Alice to Bob.
    pub sides: Vec<Arc<SideInner>>,
    /// Count of non-joint sides still alive. 2 = open, 1 = broken,
    /// 0 = tear the chain down.
    pub live_outer: usize,
}

impl ChainState {
    pub fn state(&self) -> PipeState {
        if self.live_outer >= 2 {
            PipeState::Open
        } else {
            PipeState::Broken
        }
    }

    pub fn position_of(&self, side: &Arc<SideInner>) -> Option<usize> {
        self.sides.iter().position(|s| Arc::ptr_eq(s, side))
    }

    pub fn stats(&self, id: ChainId) -> ChainStats {
        ChainStats {
            id,
            sides: self.sides.len(),
            joints: self.sides.len().saturating_sub(self.live_outer),
            state: self.state(),
            alice_to_bob_buffered: self.alice_to_bob.bytes_available(),
            alice_to_bob_capacity: self.alice_to_bob.capacity(),
            bob_to_alice_buffered: self.bob_to_alice.bytes_available(),
            bob_to_alice_capacity: self.bob_to_alice.capacity(),
        }
    }
}
