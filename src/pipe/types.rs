/*!
 * Pipe Types
 * Roles, states, direction settings, and diagnostics for pipes
 */

use crate::core::types::{ChainId, Size};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Default per-direction capacity in bytes
pub const DEFAULT_CAPACITY: Size = 1024;
/// Default receive trigger level
pub const DEFAULT_TRIGGER_LEVEL: Size = 1;
/// Upper bound on a single direction's capacity
pub const MAX_CAPACITY: Size = 1024 * 1024; // 1MB

/// The role of a pipe side.
///
/// Alice and Bob are equal; both can send and receive. The distinction
/// only helps an application tell the two threads sharing a pipe apart.
/// A Joint is a side that has been welded into a chain and no longer
/// performs I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipeRole {
    Alice,
    Bob,
    Joint,
}

/// The state of a pipe as observed from one side.
///
/// `Open` means the peer side is still in place. `Broken` means the peer
/// has been freed: written data will never be read, and the only bytes
/// left to receive are leftovers in the buffer. A broken pipe can never
/// become open again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipeState {
    Open,
    Broken,
}

/// Whether a pipe supports welding.
///
/// Non-weldable pipes skip all weld-related locking and are faster; use
/// them when the pipe will never be spliced into a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeldingCap {
    Enabled,
    Disabled,
}

/// Capacity and trigger level for one direction of a pipe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectionSettings {
    pub capacity: Size,
    pub trigger_level: Size,
}

impl DirectionSettings {
    /// Fatal if `trigger_level` is outside `1..=capacity` or `capacity`
    /// exceeds [`MAX_CAPACITY`].
    pub fn new(capacity: Size, trigger_level: Size) -> Self {
        let settings = Self {
            capacity,
            trigger_level,
        };
        settings.validate();
        settings
    }

    pub(crate) fn validate(&self) {
        assert!(
            self.capacity > 0 && self.capacity <= MAX_CAPACITY,
            "direction capacity must be within 1..={}",
            MAX_CAPACITY
        );
        assert!(
            self.trigger_level > 0 && self.trigger_level <= self.capacity,
            "trigger level must be within 1..=capacity"
        );
    }
}

impl Default for DirectionSettings {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            trigger_level: DEFAULT_TRIGGER_LEVEL,
        }
    }
}

/// Diagnostics snapshot of a pipe chain
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ChainStats {
    pub id: ChainId,
    pub sides: usize,
    pub joints: usize,
    pub state: PipeState,
    pub alice_to_bob_buffered: Size,
    pub alice_to_bob_capacity: Size,
    pub bob_to_alice_buffered: Size,
    pub bob_to_alice_capacity: Size,
}

pub(crate) fn next_chain_id() -> ChainId {
    static NEXT_ID: AtomicU64 = AtomicU64::new(1);
    NEXT_ID.fetch_add(1, Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_validation() {
        let settings = DirectionSettings::new(64, 8);
        assert_eq!(settings.capacity, 64);
        assert_eq!(settings.trigger_level, 8);
    }

    #[test]
    #[should_panic(expected = "trigger level")]
    fn test_zero_trigger_level_rejected() {
        let _ = DirectionSettings::new(64, 0);
    }

    #[test]
    #[should_panic(expected = "capacity")]
    fn test_oversized_capacity_rejected() {
        let _ = DirectionSettings::new(MAX_CAPACITY + 1, 1);
    }

    #[test]
    fn test_chain_ids_monotonic() {
        let a = next_chain_id();
        let b = next_chain_id();
        assert!(b > a);
    }
}
