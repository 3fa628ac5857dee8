/*!
 * Event Links
 * Readiness notification objects connecting pipe sides to an event loop
 */

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Readiness event kinds observable on a pipe side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Data arrived on the receiving direction
    Readable,
    /// Space freed up on the sending direction
    Writable,
}

/// Link subscription errors
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("link already has a subscriber")]
    AlreadySubscribed,
}

/// Wake hook installed by an event loop.
///
/// Runs on the thread that triggered the notification, so it must be cheap
/// and must not block; the event loop dispatches its real callbacks on its
/// own thread after being woken.
pub type WakeHook = Box<dyn Fn() + Send + Sync>;

struct LinkInner {
    pending: AtomicBool,
    subscriber: Mutex<Option<WakeHook>>,
}

/// One readiness signal of one pipe side.
///
/// The pipe core raises the link when the corresponding condition becomes
/// true (see the send/receive notification rules); a subscribed event loop
/// is woken through its hook and consumes the edge with [`take_pending`].
///
/// [`take_pending`]: EventLink::take_pending
#[derive(Clone)]
pub struct EventLink {
    inner: Arc<LinkInner>,
}

impl EventLink {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(LinkInner {
                pending: AtomicBool::new(false),
                subscriber: Mutex::new(None),
            }),
        }
    }

    /// Install a wake hook. Fails if another subscriber is present.
    pub fn subscribe(&self, hook: WakeHook) -> Result<(), LinkError> {
        let mut subscriber = self.inner.subscriber.lock();
        if subscriber.is_some() {
            return Err(LinkError::AlreadySubscribed);
        }
        *subscriber = Some(hook);
        Ok(())
    }

    /// Remove the current subscriber, if any.
    pub fn unsubscribe(&self) {
        *self.inner.subscriber.lock() = None;
    }

    pub fn is_subscribed(&self) -> bool {
        self.inner.subscriber.lock().is_some()
    }

    /// Consume the pending edge. Returns whether one was raised since the
    /// last call.
    pub fn take_pending(&self) -> bool {
        self.inner.pending.swap(false, Ordering::AcqRel)
    }

    /// Latch the pending flag and wake the subscriber.
    pub(crate) fn notify(&self) {
        self.inner.pending.store(true, Ordering::Release);
        if let Some(hook) = self.inner.subscriber.lock().as_ref() {
            hook();
        }
    }

}

impl fmt::Debug for EventLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLink")
            .field("pending", &self.inner.pending.load(Ordering::Relaxed))
            .field("subscribed", &self.is_subscribed())
            .finish()
    }
}
