//! An in-memory, fully controllable stand-in for [`NetConnection`], used to drive the per
//! -connection state machine's scenarios (§8) deterministically in tests, without a real socket.

use std::io;

use crate::io_buffer::IoBuffer;

use super::NetConnection;

/// A test double for [`NetConnection`] backed by plain `Vec<u8>`s.
#[derive(Debug)]
pub struct FakeNetConnection {
    peer_ip: String,
    input: IoBuffer,
    output: IoBuffer,
    pub good: bool,
    pub read_ready: bool,
    pub write_ready: bool,
    max_read_ahead: usize,
    pub inactivity_timeout_secs: i64,
    /// Bytes waiting to be "delivered" by the next call to `read_into_input`, simulating bytes
    /// arriving on the wire.
    pub inbound: Vec<u8>,
    /// History of every value passed to `set_max_read_ahead`, for asserting on invariant 7.
    pub read_ahead_history: Vec<usize>,
    /// Bytes actually written to the "wire" by `start_flush`.
    pub written: Vec<u8>,
    pub closed: bool,
}

impl FakeNetConnection {
    /// Creates a connection for `peer_ip` with read-ahead initially fully open.
    pub fn new(peer_ip: impl Into<String>) -> Self {
        Self {
            peer_ip: peer_ip.into(),
            input: IoBuffer::new(256),
            output: IoBuffer::new(256),
            good: true,
            read_ready: true,
            write_ready: true,
            max_read_ahead: usize::MAX,
            inactivity_timeout_secs: 0,
            inbound: Vec::new(),
            read_ahead_history: Vec::new(),
            written: Vec::new(),
            closed: false,
        }
    }

    /// Queues bytes to be handed out by subsequent `read_into_input` calls.
    pub fn push_inbound(&mut self, bytes: &[u8]) {
        self.inbound.extend_from_slice(bytes);
    }
}

impl NetConnection for FakeNetConnection {
    fn peer_ip(&self) -> &str {
        &self.peer_ip
    }

    fn input(&self) -> &IoBuffer {
        &self.input
    }

    fn input_mut(&mut self) -> &mut IoBuffer {
        &mut self.input
    }

    fn output_mut(&mut self) -> &mut IoBuffer {
        &mut self.output
    }

    fn clear_input(&mut self) {
        self.input.clear();
        self.inbound.clear();
    }

    fn is_good(&self) -> bool {
        self.good
    }

    fn close(&mut self) {
        self.good = false;
        self.closed = true;
    }

    fn is_read_ready(&self) -> bool {
        self.read_ready
    }

    fn is_write_ready(&self) -> bool {
        self.write_ready
    }

    fn set_inactivity_timeout(&mut self, secs: i64) {
        self.inactivity_timeout_secs = secs;
    }

    fn set_max_read_ahead(&mut self, n: usize) {
        self.max_read_ahead = n;
        self.read_ahead_history.push(n);
    }

    fn max_read_ahead(&self) -> usize {
        self.max_read_ahead
    }

    fn read_into_input(&mut self) -> io::Result<usize> {
        if self.max_read_ahead == 0 || self.inbound.is_empty() {
            return Ok(0);
        }
        let take = self.inbound.len().min(self.max_read_ahead);
        let bytes: Vec<u8> = self.inbound.drain(..take).collect();
        self.input.reserve(bytes.len());
        io::Write::write_all(&mut self.input, &bytes)?;
        Ok(bytes.len())
    }

    fn can_start_flush(&self) -> bool {
        self.write_ready && self.output.remaining() > 0
    }

    fn start_flush(&mut self) -> io::Result<usize> {
        let n = self.output.remaining();
        self.written.extend_from_slice(&self.output);
        self.output.consume(n);
        Ok(n)
    }

    fn queued_write_bytes(&self) -> usize {
        self.output.remaining()
    }
}
