//! The reactor binary's moving parts: a listener thread that accepts connections and a fixed
//! set of shard threads, each an independent `mio::Poll` loop owning a disjoint subset of
//! connections (§5 "Across connections, the server is multi-threaded").
//!
//! This generalizes the corpus's own `Listener`/worker split — a `crossbeam_channel` handing
//! work off, a `mio::Waker` to notify the receiving loop — from carrying raw readiness events to
//! carrying whole accepted sockets (listener → shard) and completions (executor → shard).

use std::io;
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use mio::net::TcpStream as MioTcpStream;
use mio::{Events, Interest, Poll, Token};
use slab::Slab;

use crate::audit::AuditSink;
use crate::connection::{Connection, Event};
use crate::executor::{Completion, Executor, ShardHandle};
use crate::net::{MioConnection, NetConnection};
use crate::roster::{ConnectionId, Roster};
use crate::rpc::{Framer, Parser};
use crate::tunables::Tunables;

const WAKE_TOKEN: Token = Token(usize::MAX);
const POLL_TIMEOUT: Duration = Duration::from_millis(500);

/// Shared, read-only collaborators every shard needs a handle to.
#[derive(Clone)]
pub struct ShardContext {
    pub tunables: Arc<Tunables>,
    pub roster: Arc<Roster>,
    pub audit: Arc<dyn AuditSink>,
    pub framer: Arc<dyn Framer>,
    pub parser: Arc<dyn Parser>,
}

/// One reactor shard: an event loop pinned to one OS thread, owning a disjoint slab of
/// connections (§5 scheduling model).
struct Shard {
    affinity: usize,
    poll: Poll,
    connections: Slab<Connection<MioConnection>>,
    accepted_rx: Receiver<MioTcpStream>,
    completions_rx: Receiver<Completion>,
    context: ShardContext,
}

impl Shard {
    /// Builds a shard, returning it alongside the sender the listener uses to hand it freshly
    /// accepted sockets and the [`ShardHandle`] the executor uses to deliver completions.
    fn new(
        affinity: usize,
        context: ShardContext,
    ) -> io::Result<(Self, Sender<MioTcpStream>, Arc<mio::Waker>, ShardHandle)> {
        let poll = Poll::new()?;
        let waker = Arc::new(mio::Waker::new(poll.registry(), WAKE_TOKEN)?);
        let (accepted_tx, accepted_rx) = unbounded();
        let (completions_tx, completions_rx) = unbounded();
        let shard_handle = ShardHandle::new(completions_tx, Arc::clone(&waker));

        Ok((
            Self {
                affinity,
                poll,
                connections: Slab::new(),
                accepted_rx,
                completions_rx,
                context,
            },
            accepted_tx,
            waker,
            shard_handle,
        ))
    }

    fn register_accepted(&mut self, stream: MioTcpStream) {
        let entry = self.connections.vacant_entry();
        // The slab key *is* the connection's identity: `drain_completions` routes a `CmdDone` by
        // treating `ConnectionId` as a slab token, so the two must never diverge (a separate
        // monotonic counter here would drift from the slab key under slot reuse).
        let id = ConnectionId(entry.key());
        let token = Token(entry.key());

        let mut net = match MioConnection::new(stream) {
            Ok(net) => net,
            Err(err) => {
                log::error!("failed to wrap accepted socket: {err}");
                return;
            }
        };

        if let Err(err) =
            self.poll
                .registry()
                .register(net.stream_mut(), token, Interest::READABLE)
        {
            log::error!("failed to register accepted socket: {err}");
            return;
        }

        let connection = Connection::new(
            id,
            self.affinity,
            net,
            Arc::clone(&self.context.tunables),
            Arc::clone(&self.context.roster),
            Arc::clone(&self.context.audit),
            Arc::clone(&self.context.framer),
            Arc::clone(&self.context.parser),
        );
        entry.insert(connection);
    }

    fn drain_accepted(&mut self) {
        loop {
            match self.accepted_rx.try_recv() {
                Ok(stream) => self.register_accepted(stream),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    fn drain_completions(&mut self, executor: &dyn Executor) {
        loop {
            match self.completions_rx.try_recv() {
                Ok(completion) => {
                    let token = completion.connection_id.0;
                    if self.connections.contains(token) {
                        self.deliver(token, Event::CmdDone(completion), executor);
                    }
                    // Connection already gone: the completion is silently dropped, matching
                    // §4.5 step 2 (response dropped when the connection handle is absent).
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break,
            }
        }
    }

    fn deliver(&mut self, token: usize, event: Event, executor: &dyn Executor) {
        let destroy = match self.connections.get_mut(token) {
            Some(connection) => connection.dispatch(event, executor),
            None => return,
        };

        if destroy {
            if let Some(connection) = self.connections.get_mut(token) {
                let _ = self
                    .poll
                    .registry()
                    .deregister(connection.net_mut().stream_mut());
            }
            self.connections.try_remove(token);
        } else if let Some(connection) = self.connections.get_mut(token) {
            let interest = if connection.net().queued_write_bytes() > 0 {
                Interest::READABLE | Interest::WRITABLE
            } else {
                Interest::READABLE
            };
            let _ = self
                .poll
                .registry()
                .reregister(connection.net_mut().stream_mut(), Token(token), interest);
        }
    }

    fn sweep_inactive(&mut self, executor: &dyn Executor) {
        let now = Instant::now();
        let expired: Vec<usize> = self
            .connections
            .iter()
            .filter(|(_, c)| c.net().is_inactive(now))
            .map(|(token, _)| token)
            .collect();
        for token in expired {
            self.deliver(token, Event::InactivityTimeout, executor);
        }
    }

    fn run(mut self, executor: Arc<dyn Executor + Send + Sync>) {
        let mut events = Events::with_capacity(1024);
        loop {
            if let Err(err) = self.poll.poll(&mut events, Some(POLL_TIMEOUT)) {
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                log::error!("shard {} poll failed: {err}", self.affinity);
                return;
            }

            for event in events.iter() {
                match event.token() {
                    WAKE_TOKEN => {
                        self.drain_accepted();
                        self.drain_completions(executor.as_ref());
                    }
                    token => {
                        let now = Instant::now();
                        if let Some(connection) = self.connections.get_mut(token.0) {
                            connection
                                .net_mut()
                                .note_readiness(event.is_readable(), event.is_writable());
                            connection.net_mut().refresh_deadline(now);
                        }
                        if event.is_readable() {
                            if let Some(connection) = self.connections.get_mut(token.0) {
                                let _ = connection.net_mut().read_into_input();
                            }
                            self.deliver(token.0, Event::NetRead, executor.as_ref());
                        }
                        if event.is_writable() {
                            self.deliver(token.0, Event::NetWrote, executor.as_ref());
                        }
                        if event.is_error() || event.is_read_closed() || event.is_write_closed() {
                            self.deliver(token.0, Event::NetError, executor.as_ref());
                        }
                    }
                }
            }

            self.sweep_inactive(executor.as_ref());
            self.drain_accepted();
        }
    }
}

/// A bound listener and built-but-not-yet-running shards (§5: the executor needs each shard's
/// [`ShardHandle`] before it exists, and every shard needs a reference to the executor for its
/// entire run loop — so construction happens in two phases: [`PreparedServer::bind`] builds the
/// shards and returns their handles, then [`PreparedServer::run`] starts everything once the
/// caller has built an executor from those handles).
pub struct PreparedServer {
    bind_addr: SocketAddr,
    listener: StdTcpListener,
    shards: Vec<Shard>,
    accepted_senders: Vec<(Sender<MioTcpStream>, Arc<mio::Waker>)>,
}

impl PreparedServer {
    /// Binds `bind_addr` and builds `worker_threads` shards (each with its own `Poll` and
    /// completions channel), without starting any threads yet.
    pub fn bind(
        bind_addr: SocketAddr,
        worker_threads: usize,
        context: ShardContext,
    ) -> io::Result<(Self, Vec<ShardHandle>)> {
        let listener = StdTcpListener::bind(bind_addr)?;

        let mut shards = Vec::with_capacity(worker_threads);
        let mut accepted_senders = Vec::with_capacity(worker_threads);
        let mut shard_handles = Vec::with_capacity(worker_threads);

        for affinity in 0..worker_threads {
            let (shard, accepted_tx, waker, shard_handle) = Shard::new(affinity, context.clone())?;
            shards.push(shard);
            accepted_senders.push((accepted_tx, waker));
            shard_handles.push(shard_handle);
        }

        Ok((
            Self {
                bind_addr,
                listener,
                shards,
                accepted_senders,
            },
            shard_handles,
        ))
    }

    /// Starts the listener thread and every shard thread, now that `executor` (built from the
    /// handles [`PreparedServer::bind`] returned) is ready to receive submissions.
    pub fn run(self, executor: Arc<dyn Executor + Send + Sync>) -> Server {
        let mut shard_threads = Vec::with_capacity(self.shards.len());
        for shard in self.shards {
            let executor = Arc::clone(&executor);
            shard_threads.push(std::thread::spawn(move || shard.run(executor)));
        }

        let listener = self.listener;
        let accepted_senders = self.accepted_senders;
        log::info!(
            "meta-session listening on {} with {} shard(s)",
            self.bind_addr,
            accepted_senders.len()
        );

        let listener_thread = std::thread::spawn(move || {
            let mut next_shard = 0usize;
            loop {
                match listener.accept() {
                    Ok((stream, _addr)) => {
                        if let Err(err) = stream.set_nonblocking(true) {
                            log::error!("failed to set accepted socket nonblocking: {err}");
                            continue;
                        }
                        let mio_stream = MioTcpStream::from_std(stream);
                        let target = next_shard % accepted_senders.len().max(1);
                        next_shard = next_shard.wrapping_add(1);
                        let (tx, waker) = &accepted_senders[target];
                        if tx.send(mio_stream).is_err() {
                            return;
                        }
                        let _ = waker.wake();
                    }
                    Err(err) => {
                        log::error!("accept failed: {err}");
                        return;
                    }
                }
            }
        });

        Server {
            listener_thread,
            shard_threads,
        }
    }
}

/// Handle to the running listener and shard threads, returned by [`PreparedServer::run`].
pub struct Server {
    listener_thread: JoinHandle<()>,
    shard_threads: Vec<JoinHandle<()>>,
}

impl Server {
    /// Blocks until the listener thread and every shard thread have exited (normally only on
    /// process shutdown or an unrecoverable I/O error).
    pub fn join(self) {
        let _ = self.listener_thread.join();
        for shard in self.shard_threads {
            let _ = shard.join();
        }
    }
}
