/*!
 * Pipechain
 * Bidirectional bounded byte pipes for in-process IPC
 *
 * A pipe connects two threads through a pair of flow-controlled byte
 * streams. The two sides are called Alice and Bob; their abilities are
 * equal. Pipes can be welded together into chains that carry traffic
 * end-to-end without intermediate copies, and every side can plug into a
 * cooperative event loop through its readiness links.
 */

pub mod core;
pub mod event;
pub mod pipe;
pub mod stdio;
pub mod sync;

pub use crate::core::types::{ChainId, Size};
pub use event::{EventKind, EventLink, LinkError, WakeHook};
pub use pipe::{
    unweld, weld, ChainStats, DirectionSettings, Pipe, PipeRole, PipeSide, PipeState, WeldingCap,
    DEFAULT_CAPACITY, DEFAULT_TRIGGER_LEVEL, MAX_CAPACITY,
};
pub use sync::StreamBuffer;
