//! Process-wide registry of live connections.
//!
//! The original design is an intrusive doubly-linked list guarded by one mutex; idiomatic Rust
//! has no need for manual prev/next pointers to get the same shape, so this is a
//! `Mutex<HashSet<ConnectionId>>` instead. The roster is introspection-only (live count), never
//! walked by the state machine (§4.2).

use std::collections::HashSet;
use std::sync::Mutex;

/// Stable identity of a connection, independent of its reactor token so the roster does not need
/// to know anything about `mio`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub usize);

/// The shared, mutex-guarded set of live connection identities.
#[derive(Debug, Default)]
pub struct Roster {
    live: Mutex<HashSet<ConnectionId>>,
}

impl Roster {
    /// Creates an empty roster.
    pub fn new() -> Self {
        Self {
            live: Mutex::new(HashSet::new()),
        }
    }

    /// Registers a newly constructed connection. Called exactly once, at construction.
    pub fn register(&self, id: ConnectionId) {
        let mut live = self.live.lock().expect("roster mutex poisoned");
        let inserted = live.insert(id);
        debug_assert!(inserted, "connection id registered twice");
    }

    /// Removes a connection. Called exactly once, from the connection's `Drop` impl.
    pub fn unregister(&self, id: ConnectionId) {
        let mut live = self.live.lock().expect("roster mutex poisoned");
        live.remove(&id);
    }

    /// The number of currently live connections.
    pub fn count(&self) -> usize {
        self.live.lock().expect("roster mutex poisoned").len()
    }
}
