//! The real, `mio`-backed implementation of [`NetConnection`].

use std::io::{self, ErrorKind, Read, Write};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use mio::net::TcpStream;

use crate::io_buffer::IoBuffer;

use super::NetConnection;

const DEFAULT_BUFFER_CAPACITY: usize = 16 * 1024;

/// A live TCP connection paired with its input/output buffers, read-ahead cap, and inactivity
/// deadline.
#[derive(Debug)]
pub struct MioConnection {
    stream: TcpStream,
    peer_ip: String,
    input: IoBuffer,
    output: IoBuffer,
    good: bool,
    read_ready: bool,
    write_ready: bool,
    max_read_ahead: usize,
    inactivity_timeout: Option<Duration>,
    deadline: Option<Instant>,
}

impl MioConnection {
    /// Wraps an accepted stream, deriving the peer IP once (colon-stripped per §3).
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        let peer_ip = peer_ip_string(stream.peer_addr()?);
        Ok(Self {
            stream,
            peer_ip,
            input: IoBuffer::new(DEFAULT_BUFFER_CAPACITY),
            output: IoBuffer::new(DEFAULT_BUFFER_CAPACITY),
            good: true,
            read_ready: true,
            write_ready: false,
            max_read_ahead: DEFAULT_BUFFER_CAPACITY,
            inactivity_timeout: None,
            deadline: None,
        })
    }

    /// The raw stream, for registering/reregistering with the reactor's `Poll`.
    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    /// Called by the listener when the reactor reports readability/writability for this token.
    pub fn note_readiness(&mut self, readable: bool, writable: bool) {
        self.read_ready = readable;
        self.write_ready = writable;
    }

    /// Whether the inactivity deadline (if any) has passed.
    pub fn is_inactive(&self, now: Instant) -> bool {
        self.deadline.map(|d| now >= d).unwrap_or(false)
    }

    /// Bumps the inactivity deadline forward from `now`, if a timeout is configured. Called after
    /// any activity on the connection.
    pub fn refresh_deadline(&mut self, now: Instant) {
        self.deadline = self.inactivity_timeout.map(|d| now + d);
    }
}

fn peer_ip_string(addr: SocketAddr) -> String {
    // `SocketAddr::ip()` already strips the `:port` suffix; an IPv6 address's own colons (`::1`,
    // `fe80::...`) must be left alone.
    addr.ip().to_string()
}

impl NetConnection for MioConnection {
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
    }

    fn is_good(&self) -> bool {
        self.good
    }

    fn close(&mut self) {
        if self.good {
            let _ = self.stream.shutdown(std::net::Shutdown::Both);
            self.good = false;
        }
    }

    fn is_read_ready(&self) -> bool {
        self.read_ready
    }

    fn is_write_ready(&self) -> bool {
        self.write_ready
    }

    fn set_inactivity_timeout(&mut self, secs: i64) {
        self.inactivity_timeout = if secs > 0 {
            Some(Duration::from_secs(secs as u64))
        } else {
            None
        };
        self.deadline = None;
    }

    fn set_max_read_ahead(&mut self, n: usize) {
        self.max_read_ahead = n;
    }

    fn max_read_ahead(&self) -> usize {
        self.max_read_ahead
    }

    fn read_into_input(&mut self) -> io::Result<usize> {
        if self.max_read_ahead == 0 {
            return Ok(0);
        }

        let mut total = 0;
        loop {
            let want = self.max_read_ahead.saturating_sub(total);
            if want == 0 {
                break;
            }
            self.input.reserve(want.min(DEFAULT_BUFFER_CAPACITY));
            let chunk = self.input.spare_capacity_mut();
            let chunk_len = chunk.len().min(want);
            match self.stream.read(&mut chunk[..chunk_len]) {
                Ok(0) => {
                    if total == 0 {
                        return Ok(0);
                    }
                    break;
                }
                Ok(n) => {
                    self.input.mark_written(n);
                    total += n;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(total)
    }

    fn can_start_flush(&self) -> bool {
        self.write_ready && self.output.remaining() > 0
    }

    fn start_flush(&mut self) -> io::Result<usize> {
        let mut total = 0;
        while self.output.remaining() > 0 {
            match self.stream.write(&self.output) {
                Ok(0) => break,
                Ok(n) => {
                    self.output.consume(n);
                    total += n;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(total)
    }

    fn queued_write_bytes(&self) -> usize {
        self.output.remaining()
    }
}
