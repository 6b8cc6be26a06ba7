//! The executor/thread-dispatch layer (§6), an external collaborator: the state machine submits
//! requests and receives completions through this trait only, never touching worker threads
//! directly.
//!
//! The concrete [`ThreadPoolExecutor`] generalizes this corpus's own listener/worker split (a
//! `crossbeam_channel` handing work to threads, a `mio::Waker` notifying the listener a result is
//! ready) from carrying raw I/O readiness events to carrying parsed [`Request`]s and their
//! computed [`Response`]s.

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use mio::Waker;

use crate::roster::ConnectionId;
use crate::rpc::{Request, Response};

/// A completed request, carrying its original request object and the response computed for it,
/// destined for the reactor shard that owns `connection_id`.
#[derive(Debug)]
pub struct Completion {
    /// The connection this completion belongs to.
    pub connection_id: ConnectionId,
    /// The request that was submitted (still carrying its raw header, if retained for audit).
    pub request: Request,
    /// The response computed for it.
    pub response: Response,
}

/// The narrow interface the state machine uses to hand off requests and receive their
/// completions (§6).
pub trait Executor {
    /// Accepts ownership of `request`, runs it eventually (possibly on a different worker than
    /// `affinity`), and emits a [`Completion`] back onto the shard identified by `affinity`.
    fn submit(&self, affinity: usize, request: Request);

    /// Re-routes a completion that was about to be processed on the wrong shard onto the shard
    /// identified by `affinity`. Returns `true` if accepted, in which case the caller must not
    /// process the completion itself (§4.3 pre-dispatch).
    fn enqueue(&self, affinity: usize, completion: Completion) -> bool;

    /// Whether the executor will arrange the post-completion flush itself. `false` means the
    /// caller (the state machine) must flush locally (§4.3 CMD_DONE step 4, post-dispatch step 1).
    fn flush_after(&self, affinity: usize) -> bool;
}

/// Business logic invoked by executor worker threads to turn a [`Request`] into a [`Response`].
/// Deliberately trivial: the semantics of the metadata operations themselves are out of scope
/// for this crate (§1 "Out of scope ... the executor/thread-dispatch layer"); this is the seam
/// a real deployment plugs its handlers into.
pub trait RequestHandler: Send + Sync {
    /// Computes a response for `request`.
    fn handle(&self, request: &Request) -> Response;
}

/// A handler that always succeeds, used by the server binary and by tests that only care about
/// the state machine's bookkeeping rather than real metadata semantics.
#[derive(Debug, Default)]
pub struct AckHandler;

impl RequestHandler for AckHandler {
    fn handle(&self, request: &Request) -> Response {
        Response::ok(request.sequence)
    }
}

struct Job {
    affinity: usize,
    request: Request,
}

/// One reactor shard's inbound channel for completions, plus the waker that tells its `Poll`
/// loop to drain that channel.
#[derive(Clone)]
pub struct ShardHandle {
    completions_tx: Sender<Completion>,
    waker: Arc<Waker>,
}

impl ShardHandle {
    /// Pairs a completions sender with the `Waker` that should fire whenever a completion is
    /// pushed onto it.
    pub fn new(completions_tx: Sender<Completion>, waker: Arc<Waker>) -> Self {
        Self {
            completions_tx,
            waker,
        }
    }
}

/// A fixed-size thread pool executor. Worker threads pull [`Request`]s off a shared job queue,
/// run them through a [`RequestHandler`], and deliver the resulting [`Completion`] to the
/// originating shard.
pub struct ThreadPoolExecutor {
    jobs_tx: Sender<Job>,
    shards: Vec<ShardHandle>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPoolExecutor {
    /// Spawns `worker_count` threads sharing one job queue, delivering completions to `shards`
    /// (indexed by affinity).
    pub fn start(
        worker_count: usize,
        shards: Vec<ShardHandle>,
        handler: Arc<dyn RequestHandler>,
    ) -> Self {
        let (jobs_tx, jobs_rx): (Sender<Job>, Receiver<Job>) = crossbeam_channel::unbounded();
        let mut workers = Vec::with_capacity(worker_count);

        for _ in 0..worker_count {
            let jobs_rx = jobs_rx.clone();
            let shards = shards.clone();
            let handler = Arc::clone(&handler);
            workers.push(std::thread::spawn(move || {
                while let Ok(job) = jobs_rx.recv() {
                    let connection_id = job.request.connection_id;
                    let response = handler.handle(&job.request);
                    let completion = Completion {
                        connection_id,
                        request: job.request,
                        response,
                    };
                    if let Some(shard) = shards.get(job.affinity) {
                        if shard.completions_tx.send(completion).is_ok() {
                            let _ = shard.waker.wake();
                        }
                    }
                }
            }));
        }

        Self {
            jobs_tx,
            shards,
            workers,
        }
    }

    /// Joins every worker thread. Blocks until all have exited (i.e. every job sender has been
    /// dropped).
    pub fn join(self) {
        drop(self.jobs_tx);
        for worker in self.workers {
            let _ = worker.join();
        }
    }
}

impl Executor for ThreadPoolExecutor {
    fn submit(&self, affinity: usize, request: Request) {
        let _ = self.jobs_tx.send(Job { affinity, request });
    }

    fn enqueue(&self, affinity: usize, completion: Completion) -> bool {
        match self.shards.get(affinity) {
            Some(shard) => {
                let sent = shard.completions_tx.send(completion).is_ok();
                if sent {
                    let _ = shard.waker.wake();
                }
                sent
            }
            None => false,
        }
    }

    fn flush_after(&self, _affinity: usize) -> bool {
        false
    }
}

#[cfg(test)]
pub mod fake {
    //! A synchronous, hand-driven executor for testing the state machine (§4.9): `submit` just
    //! records the request rather than running it on a thread, and the test decides when (and
    //! with what response) to produce the completion.

    use std::cell::RefCell;

    use super::*;

    /// Records every submitted request; the test drains `submitted` and calls back into the
    /// connection's `dispatch` with a hand-built `Completion` to simulate `CMD_DONE`.
    #[derive(Debug, Default)]
    pub struct FakeExecutor {
        pub submitted: RefCell<Vec<(usize, Request)>>,
        pub enqueued: RefCell<Vec<(usize, Completion)>>,
        pub flush_after_response: RefCell<bool>,
    }

    impl FakeExecutor {
        pub fn take_submitted(&self) -> Vec<(usize, Request)> {
            self.submitted.borrow_mut().drain(..).collect()
        }
    }

    impl Executor for FakeExecutor {
        fn submit(&self, affinity: usize, request: Request) {
            self.submitted.borrow_mut().push((affinity, request));
        }

        fn enqueue(&self, affinity: usize, completion: Completion) -> bool {
            self.enqueued.borrow_mut().push((affinity, completion));
            true
        }

        fn flush_after(&self, _affinity: usize) -> bool {
            *self.flush_after_response.borrow()
        }
    }
}
