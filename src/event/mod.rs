/*!
 * Event-Loop Integration
 * Per-endpoint readiness links a cooperative event loop can subscribe to
 */

pub mod link;

pub use link::{EventKind, EventLink, LinkError, WakeHook};
