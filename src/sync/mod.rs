/*!
 * Synchronization Primitives
 * Blocking bounded byte buffers backing the pipe directions
 */

pub mod stream_buffer;

pub use stream_buffer::StreamBuffer;
