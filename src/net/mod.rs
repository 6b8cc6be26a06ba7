//! The network connection abstraction the state machine is built against (§6).
//!
//! `NetConnection` is deliberately narrow: the state machine never touches `mio` or a raw
//! `TcpStream` directly, only this trait. That mirrors how this corpus's own HTTP listener keeps
//! its `Connection` behind a trait generic over the stream type, and it is what lets the per
//! -connection state machine's hard cases (§8 scenarios) be tested without a real socket.

mod mio_connection;

#[cfg(test)]
pub mod fake;

pub use mio_connection::MioConnection;

use std::io;

use crate::io_buffer::IoBuffer;

/// Owns a connection's input/output buffers, socket state, inactivity timer, and read-ahead
/// setting, and performs the actual reads/writes against the underlying transport.
pub trait NetConnection {
    /// The peer's IP address, colon-stripped, derived once at construction (§3).
    fn peer_ip(&self) -> &str;

    /// The input buffer, for the framer/parser to inspect.
    fn input(&self) -> &IoBuffer;

    /// The input buffer, mutably, for the framer/parser to inspect and for direct reads.
    fn input_mut(&mut self) -> &mut IoBuffer;

    /// The output buffer, for response serialization to write into.
    fn output_mut(&mut self) -> &mut IoBuffer;

    /// Discards all buffered input bytes (§4.3 NET_READ step 2, NET_ERROR, INACTIVITY_TIMEOUT).
    fn clear_input(&mut self);

    /// Whether the underlying socket is still usable.
    fn is_good(&self) -> bool;

    /// Closes the underlying socket. Idempotent.
    fn close(&mut self);

    /// Whether the reactor currently reports this socket as readable.
    fn is_read_ready(&self) -> bool;

    /// Whether the reactor currently reports this socket as writable.
    fn is_write_ready(&self) -> bool;

    /// Sets (or disables, for a non-positive value) the inactivity timer.
    fn set_inactivity_timeout(&mut self, secs: i64);

    /// Caps how many bytes `read_into_input` will accept in one call; 0 disables further reads
    /// until raised again (§4.3 post-dispatch step 4, NET_READ step 5).
    fn set_max_read_ahead(&mut self, n: usize);

    /// The current read-ahead cap.
    fn max_read_ahead(&self) -> usize;

    /// Reads up to `max_read_ahead` bytes from the socket into the input buffer, returning the
    /// number of bytes read (0 meaning the peer has closed its write side).
    fn read_into_input(&mut self) -> io::Result<usize>;

    /// Whether a flush can be started right now (socket is write-ready and there is something
    /// queued).
    fn can_start_flush(&self) -> bool;

    /// Writes as much of the output buffer to the socket as will fit without blocking, returning
    /// the number of bytes written.
    fn start_flush(&mut self) -> io::Result<usize>;

    /// Bytes currently queued in the output buffer, not yet written to the socket.
    fn queued_write_bytes(&self) -> usize;
}
