//! The per-connection client protocol state machine (§4.3) — the heart of this crate.
//!
//! One [`Connection`] exists per accepted socket, pinned to a single reactor shard. It is driven
//! entirely by [`Event`]s delivered from outside: four from the I/O layer (`NetRead`, `NetWrote`,
//! `NetError`, `InactivityTimeout`) and one synthesized by the executor when a submitted request
//! completes (`CmdDone`). There is exactly one entry point, [`Connection::dispatch`].
//!
//! The teacher's own `Connection` trait drives everything through `read`/`write`/`parse_request`
//! calls made directly by the listener's event loop; this state machine generalizes that shape to
//! the richer event set and back-pressure bookkeeping this protocol requires, but keeps the same
//! idea of a narrow, generic-over-the-stream-type connection object owned by one worker.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::audit::AuditSink;
use crate::executor::{Completion, Executor};
use crate::net::NetConnection;
use crate::roster::{ConnectionId, Roster};
use crate::rpc::{Framer, Parser, RequestOp, MAX_RPC_HEADER_LEN};
use crate::tunables::Tunables;

/// One of the five event codes the reactor (or the executor, for `CmdDone`) delivers to a
/// connection (§4.3).
pub enum Event {
    /// The socket became readable and the reactor has already pulled whatever bytes fit into the
    /// input buffer; the payload is the buffer itself.
    NetRead,
    /// A previously-blocked write has drained further, or otherwise there is room to write again.
    NetWrote,
    /// The I/O layer observed an error or a peer half-close on this socket.
    NetError,
    /// The inactivity timer configured for this connection has fired.
    InactivityTimeout,
    /// A request submitted earlier has completed.
    CmdDone(Completion),
}

/// A self-synthesized event, queued by the handler for itself instead of recursing (§4.3
/// "re-entrance discipline").
enum SelfEvent {
    NetRead,
    NetError,
}

/// One accepted connection's protocol state (§3 "Connection").
pub struct Connection<N: NetConnection> {
    id: ConnectionId,
    affinity: usize,
    net: N,
    in_flight: i64,
    depth: u32,
    min_client_version: Option<u32>,
    disconnect_pending: bool,
    bytes_left_mark: usize,
    sequence_counter: u64,
    pending: VecDeque<SelfEvent>,
    tunables: Arc<Tunables>,
    roster: Arc<Roster>,
    audit: Arc<dyn AuditSink>,
    framer: Arc<dyn Framer>,
    parser: Arc<dyn Parser>,
}

impl<N: NetConnection> Connection<N> {
    /// Constructs a connection for a freshly accepted socket, registers it with the roster, and
    /// applies the current tunables to it (§3 "Lifecycles").
    pub fn new(
        id: ConnectionId,
        affinity: usize,
        mut net: N,
        tunables: Arc<Tunables>,
        roster: Arc<Roster>,
        audit: Arc<dyn AuditSink>,
        framer: Arc<dyn Framer>,
        parser: Arc<dyn Parser>,
    ) -> Self {
        roster.register(id);
        net.set_inactivity_timeout(tunables.inactivity_timeout_secs());
        net.set_max_read_ahead(tunables.max_read_ahead());

        Self {
            id,
            affinity,
            net,
            in_flight: 0,
            depth: 0,
            min_client_version: None,
            disconnect_pending: false,
            bytes_left_mark: 0,
            sequence_counter: 0,
            pending: VecDeque::new(),
            tunables,
            roster,
            audit,
            framer,
            parser,
        }
    }

    /// This connection's stable identity.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// The reactor shard this connection is pinned to.
    pub fn affinity(&self) -> usize {
        self.affinity
    }

    /// Number of requests submitted but not yet completed.
    pub fn in_flight(&self) -> i64 {
        self.in_flight
    }

    /// Whether disconnect has been requested, sticky once set (§3 invariants).
    pub fn disconnect_pending(&self) -> bool {
        self.disconnect_pending
    }

    /// Access to the underlying network handle, for the reactor to re-register interest or for
    /// tests to inspect the fake's recorded state.
    pub fn net(&self) -> &N {
        &self.net
    }

    /// Mutable access to the underlying network handle, for the reactor to drive reads before
    /// delivering `NetRead`.
    pub fn net_mut(&mut self) -> &mut N {
        &mut self.net
    }

    /// The single entry point (§4.3). Returns `true` if the caller must now remove this
    /// connection from its slab (dropping it, which unregisters it from the roster).
    pub fn dispatch(&mut self, event: Event, executor: &dyn Executor) -> bool {
        // Pre-dispatch (§4.3): CMD_DONE may be offered to the executor for delivery on a
        // different worker before this connection ever sees it.
        if let Event::CmdDone(completion) = event {
            if completion.request.home_affinity != self.affinity {
                executor.enqueue(completion.request.home_affinity, completion);
                return false;
            }
            return self.dispatch_owned(Event::CmdDone(completion), executor);
        }

        self.dispatch_owned(event, executor)
    }

    fn dispatch_owned(&mut self, event: Event, executor: &dyn Executor) -> bool {
        debug_assert_eq!(0, self.depth, "re-entrance depth must be 0 on entry");
        self.depth = 1;

        self.handle(event, executor);
        while let Some(self_event) = self.pending.pop_front() {
            match self_event {
                SelfEvent::NetRead => self.handle_net_read(executor),
                SelfEvent::NetError => self.handle_net_error(),
            }
        }

        let destroy = self.post_dispatch(executor);
        self.depth = 0;
        destroy
    }

    fn handle(&mut self, event: Event, executor: &dyn Executor) {
        match event {
            Event::NetRead => self.handle_net_read(executor),
            Event::NetWrote => self.net_wrote_logic(false),
            Event::NetError => self.handle_net_error(),
            Event::InactivityTimeout => self.handle_inactivity_timeout(),
            Event::CmdDone(completion) => self.handle_cmd_done(completion, executor),
        }
    }

    // ---- NET_READ (§4.3) ----

    fn handle_net_read(&mut self, executor: &dyn Executor) {
        self.bytes_left_mark = 0;

        if self.disconnect_pending {
            self.net.clear_input();
        }

        let mut stopped_over_write_behind = false;
        loop {
            if self.over_write_behind() && self.net.can_start_flush() {
                self.force_flush();
            }

            if self.over_write_behind() {
                stopped_over_write_behind = true;
                break;
            }
            if self.over_pending() {
                break;
            }

            let frame_len = self.framer.is_message_available(self.net.input());
            match frame_len {
                Some(frame_len) => self.ingest(executor, frame_len),
                None => break,
            }
        }

        if stopped_over_write_behind {
            return;
        }

        if !self.over_pending() && !self.disconnect_pending {
            let remaining = self.net.input().remaining();
            self.bytes_left_mark = remaining;
            if remaining > MAX_RPC_HEADER_LEN {
                log::error!(
                    "oversized or malformed header from {}: {} bytes buffered with no frame boundary",
                    self.net.peer_ip(),
                    remaining
                );
                self.pending.push_back(SelfEvent::NetError);
            } else {
                self.net.set_max_read_ahead(self.tunables.max_read_ahead());
            }
        }
    }

    // ---- §4.4 Command ingest ----

    fn ingest(&mut self, executor: &dyn Executor, frame_len: usize) {
        let frame: Vec<u8> = self.net.input()[..frame_len].to_vec();

        let mut request = match self.parser.parse(&frame, frame_len) {
            Ok(request) => request,
            Err(err) => {
                self.reject_malformed_frame(&frame, &err);
                return;
            }
        };

        match self.min_client_version {
            None => self.min_client_version = Some(request.client_version),
            Some(min) if request.client_version < min => {
                self.min_client_version = Some(request.client_version);
                log::warn!(
                    "client protocol version downgraded to {} on connection from {}",
                    request.client_version,
                    self.net.peer_ip()
                );
            }
            Some(_) => {}
        }

        if self.tunables.audit_logging() {
            request.raw_header = Some(frame);
        }
        self.net.input_mut().consume(frame_len);

        request.sequence = self.next_sequence();
        request.client_ip = self.net.peer_ip().to_string();
        request.connection_id = self.id;
        request.from_client = true;
        request.home_affinity = self.affinity;

        log::debug!(
            "ingest seq={} len={} ip={} {}",
            request.sequence,
            frame_len,
            request.client_ip,
            request.self_description()
        );

        self.in_flight += 1;
        executor.submit(self.affinity, request);
    }

    fn reject_malformed_frame(&mut self, frame: &[u8], err: &dyn std::fmt::Display) {
        for line in frame.split(|&b| b == b'\n').take(16) {
            if !line.is_empty() {
                log::error!(
                    "invalid request from {}: {} ({})",
                    self.net.peer_ip(),
                    String::from_utf8_lossy(line),
                    err
                );
            }
        }
        self.net.clear_input();
        self.net.close();
        self.pending.push_back(SelfEvent::NetError);
    }

    fn next_sequence(&mut self) -> u64 {
        self.sequence_counter += 1;
        self.sequence_counter
    }

    // ---- CMD_DONE (§4.3) ----

    fn handle_cmd_done(&mut self, completion: Completion, executor: &dyn Executor) {
        let Completion {
            request, response, ..
        } = completion;

        if self.tunables.audit_logging() && request.raw_header.is_some() {
            self.audit.record(&request, &response);
        }

        self.egress(&request, response);

        self.in_flight -= 1;

        if self.net.is_good() && (self.in_flight == 0 || !executor.flush_after(self.affinity)) {
            self.force_flush();
        }

        self.net_wrote_logic(true);
    }

    // ---- §4.5 Response egress ----

    fn egress(&mut self, request: &crate::rpc::Request, response: crate::rpc::Response) {
        if request.op.always_logged()
            || response.status == crate::rpc::Status::Failure
            || log::log_enabled!(log::Level::Debug)
        {
            log::info!(
                "seq={} status={:?} msg={} {}",
                response.sequence,
                response.status,
                response.message,
                request.self_description()
            );
        }

        if !self.net.is_good() {
            return;
        }

        if request.op == RequestOp::Disconnect {
            self.disconnect_pending = true;
        }

        let _ = response.serialize(self.net.output_mut());

        self.force_flush();
    }

    // ---- NET_WROTE, and fall-through from CMD_DONE (§4.3) ----

    fn net_wrote_logic(&mut self, came_from_cmd_done: bool) {
        if self.over_pending() {
            return;
        }
        if self.over_write_behind() {
            return;
        }
        if !came_from_cmd_done && self.net.is_read_ready() {
            return;
        }

        if self.net.input().remaining() > self.bytes_left_mark || self.disconnect_pending {
            self.pending.push_back(SelfEvent::NetRead);
        } else if !self.net.is_read_ready() {
            self.net.set_max_read_ahead(self.tunables.max_read_ahead());
        }
    }

    // ---- NET_ERROR (§4.3) ----

    fn handle_net_error(&mut self) {
        if self.net.is_good() && (self.in_flight > 0 || self.net.queued_write_bytes() > 0) {
            // Half-close: keep the socket open until outstanding work has flushed. Post-dispatch
            // step 2 performs the actual close once in-flight and output both reach zero; closing
            // here immediately would contradict that drain (§8 scenario S5).
            self.disconnect_pending = true;
        } else {
            self.net.close();
            self.net.clear_input();
        }
    }

    // ---- INACTIVITY_TIMEOUT (§4.3) ----

    fn handle_inactivity_timeout(&mut self) {
        self.net.close();
        self.net.clear_input();
    }

    // ---- Post-dispatch (§4.3) ----

    fn post_dispatch(&mut self, executor: &dyn Executor) -> bool {
        if self.net.is_good() && (self.in_flight == 0 || !executor.flush_after(self.affinity)) {
            self.force_flush();
        }

        if self.net.is_good() && self.disconnect_pending {
            if self.in_flight == 0 && self.net.queued_write_bytes() == 0 {
                self.net.close();
            } else {
                self.net.set_max_read_ahead(0);
            }
        }

        if self.net.is_good() {
            if self.net.input().remaining() > 0 {
                self.net
                    .input_mut()
                    .compact(self.tunables.input_compaction_threshold());
            }
            if self.net.queued_write_bytes() > 0 {
                let threshold = self.tunables.output_compaction_threshold();
                self.net.output_mut().compact(threshold);
            }
        }

        if self.net.is_good() && self.back_pressure_asserted() {
            self.net.set_max_read_ahead(0);
        }

        !self.net.is_good() && self.in_flight == 0
    }

    fn force_flush(&mut self) {
        if self.net.is_good() {
            let _ = self.net.start_flush();
        }
    }

    fn over_pending(&self) -> bool {
        self.in_flight >= self.tunables.max_pending_ops()
    }

    fn over_write_behind(&self) -> bool {
        self.net.queued_write_bytes() as i64 >= self.tunables.max_write_behind()
    }

    fn back_pressure_asserted(&self) -> bool {
        self.over_pending()
            || self.over_write_behind()
            || self.net.input().remaining() as i64 >= self.tunables.max_pending_bytes()
    }
}

impl<N: NetConnection> Drop for Connection<N> {
    fn drop(&mut self) {
        self.roster.unregister(self.id);
    }
}
