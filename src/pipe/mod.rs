/*!
 * Pipe Module
 * Bidirectional bounded pipes, pipe chains, and the weld engine
 */

pub(crate) mod chain;
pub mod side;
pub mod types;
pub mod weld;

pub use side::{Pipe, PipeSide};
pub use types::{
    ChainStats, DirectionSettings, PipeRole, PipeState, WeldingCap, DEFAULT_CAPACITY,
    DEFAULT_TRIGGER_LEVEL, MAX_CAPACITY,
};
pub use weld::{unweld, weld};
