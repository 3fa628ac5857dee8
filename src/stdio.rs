/*!
 * Thread Stdio Hook
 * Per-thread stdin/stdout callbacks and the pipe installer
 */

use crate::core::types::Size;
use crate::pipe::side::PipeSide;
use log::debug;
use std::cell::RefCell;
use std::sync::Arc;
use std::time::Duration;

/// Receives everything the current thread writes to its stdout.
pub type StdoutCallback = Box<dyn FnMut(&[u8])>;

/// Serves the current thread's stdin reads. Returns the number of bytes
/// produced, 0 on timeout.
pub type StdinCallback = Box<dyn FnMut(&mut [u8], Option<Duration>) -> Size>;

thread_local! {
    static STDOUT_CALLBACK: RefCell<Option<StdoutCallback>> = const { RefCell::new(None) };
    static STDIN_CALLBACK: RefCell<Option<StdinCallback>> = const { RefCell::new(None) };
}

/// Replace the current thread's stdout callback. `None` disconnects.
pub fn set_stdout_callback(callback: Option<StdoutCallback>) {
    STDOUT_CALLBACK.with(|slot| *slot.borrow_mut() = callback);
}

/// Replace the current thread's stdin callback. `None` disconnects.
pub fn set_stdin_callback(callback: Option<StdinCallback>) {
    STDIN_CALLBACK.with(|slot| *slot.borrow_mut() = callback);
}

/// Dispatch entry point for the hosting runtime: forward `data` to the
/// current thread's stdout callback. Silently dropped when none is set.
pub fn write_stdout(data: &[u8]) {
    STDOUT_CALLBACK.with(|slot| {
        if let Some(callback) = slot.borrow_mut().as_mut() {
            callback(data);
        }
    });
}

/// Dispatch entry point for the hosting runtime: fill `buf` from the
/// current thread's stdin callback. Returns 0 when none is set.
pub fn read_stdin(buf: &mut [u8], timeout: Option<Duration>) -> Size {
    STDIN_CALLBACK.with(|slot| match slot.borrow_mut().as_mut() {
        Some(callback) => callback(buf, timeout),
        None => 0,
    })
}

impl PipeSide {
    /// Connect this side to the stdin and stdout of the current thread.
    ///
    /// Afterwards the thread's stdout bytes are pushed into the pipe
    /// (waiting forever for space) and its stdin reads drain the pipe.
    /// Once the pipe breaks, stdout bytes beyond the remaining space are
    /// dropped and stdin reads return what is left, then 0. Disconnect by
    /// re-registering `None` through [`set_stdout_callback`] and
    /// [`set_stdin_callback`].
    pub fn install_as_stdio(&self) {
        let writer = Arc::clone(self.inner());
        let reader = Arc::clone(self.inner());

        set_stdout_callback(Some(Box::new(move |data: &[u8]| {
            let sent = writer.send(data, None);
            if sent < data.len() {
                debug!("stdout dropped {} bytes on a broken pipe", data.len() - sent);
            }
        })));
        set_stdin_callback(Some(Box::new(move |buf: &mut [u8], timeout| {
            reader.receive(buf, timeout)
        })));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipe::Pipe;

    #[test]
    fn test_stdio_round_trip() {
        let pipe = Pipe::new(64, 1);
        pipe.bob.install_as_stdio();

        // The thread's stdout lands on the peer side.
        write_stdout(b"out of bob");
        let mut buf = [0u8; 64];
        let n = pipe.alice.receive(&mut buf, Some(Duration::ZERO));
        assert_eq!(&buf[..n], b"out of bob");

        // The peer's data serves the thread's stdin.
        pipe.alice.send(b"into bob", Some(Duration::ZERO));
        let n = read_stdin(&mut buf, Some(Duration::ZERO));
        assert_eq!(&buf[..n], b"into bob");

        set_stdout_callback(None);
        set_stdin_callback(None);
    }

    #[test]
    fn test_disconnected_thread_is_inert() {
        set_stdout_callback(None);
        set_stdin_callback(None);

        write_stdout(b"nowhere");
        let mut buf = [0u8; 8];
        assert_eq!(read_stdin(&mut buf, Some(Duration::ZERO)), 0);
    }
}
