//! Process-wide mutable configuration, read without locking by every connection.
//!
//! Each scalar lives in its own word-sized atomic. Readers use `Ordering::Relaxed`: the spec
//! tolerates benign tearing on these soft thresholds, and introducing a lock here would put a
//! mutex on the hottest path in the crate (checked on every event).

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use crate::config::ServerConfig;

const DEFAULT_MAX_PENDING_OPS: i64 = 16;

/// Process-wide tunables, read lock-free after startup.
#[derive(Debug)]
pub struct Tunables {
    max_pending_ops: AtomicI64,
    max_pending_bytes: AtomicI64,
    max_read_ahead: AtomicI64,
    inactivity_timeout_secs: AtomicI64,
    max_write_behind: AtomicI64,
    input_compaction_threshold: AtomicI64,
    output_compaction_threshold: AtomicI64,
    audit_logging: AtomicBool,
}

impl Tunables {
    /// Builds a registry from a freshly loaded config, applying the clamping/defaulting rules
    /// of the tunables registry. Takes the same `multi_threaded` flag as [`Tunables::apply`] for
    /// a uniform call site, though at construction there is no previous value to keep, so it has
    /// no effect here.
    pub fn from_config(config: &ServerConfig, _multi_threaded: bool) -> Self {
        // At construction there is no previous value to fall back to regardless of
        // `multi_threaded`, so both branches of §4.1's rule collapse to the same default here;
        // the distinction only matters in `apply`, where a single-threaded reload keeps whatever
        // was already running.
        let max_pending_ops = if config.max_pending_ops <= 0 {
            DEFAULT_MAX_PENDING_OPS
        } else {
            config.max_pending_ops
        };

        Self {
            max_pending_ops: AtomicI64::new(max_pending_ops),
            max_pending_bytes: AtomicI64::new(config.max_pending_bytes.max(1)),
            max_read_ahead: AtomicI64::new(config.max_read_ahead.max(256)),
            inactivity_timeout_secs: AtomicI64::new(config.inactivity_timeout_secs),
            max_write_behind: AtomicI64::new(config.max_write_behind.max(1)),
            input_compaction_threshold: AtomicI64::new(config.input_compaction_threshold.max(0)),
            output_compaction_threshold: AtomicI64::new(config.output_compaction_threshold.max(0)),
            audit_logging: AtomicBool::new(config.audit_logging),
        }
    }

    /// Re-applies a reloaded config to an already-running registry. Has no retroactive effect on
    /// connections already accepted beyond the next time each reads a tunable.
    pub fn apply(&self, config: &ServerConfig, multi_threaded: bool) {
        if config.max_pending_ops <= 0 {
            if multi_threaded {
                self.max_pending_ops
                    .store(DEFAULT_MAX_PENDING_OPS, Ordering::Relaxed);
            }
            // else: keep previous value.
        } else {
            self.max_pending_ops
                .store(config.max_pending_ops, Ordering::Relaxed);
        }

        self.max_pending_bytes
            .store(config.max_pending_bytes.max(1), Ordering::Relaxed);
        self.max_read_ahead
            .store(config.max_read_ahead.max(256), Ordering::Relaxed);
        self.inactivity_timeout_secs
            .store(config.inactivity_timeout_secs, Ordering::Relaxed);
        self.max_write_behind
            .store(config.max_write_behind.max(1), Ordering::Relaxed);
        self.input_compaction_threshold
            .store(config.input_compaction_threshold.max(0), Ordering::Relaxed);
        self.output_compaction_threshold
            .store(config.output_compaction_threshold.max(0), Ordering::Relaxed);
        self.audit_logging
            .store(config.audit_logging, Ordering::Relaxed);
    }

    #[inline]
    pub fn max_pending_ops(&self) -> i64 {
        self.max_pending_ops.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn max_pending_bytes(&self) -> i64 {
        self.max_pending_bytes.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn max_read_ahead(&self) -> usize {
        self.max_read_ahead.load(Ordering::Relaxed) as usize
    }

    /// A non-positive value disables the inactivity timer.
    #[inline]
    pub fn inactivity_timeout_secs(&self) -> i64 {
        self.inactivity_timeout_secs.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn max_write_behind(&self) -> i64 {
        self.max_write_behind.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn input_compaction_threshold(&self) -> usize {
        self.input_compaction_threshold.load(Ordering::Relaxed) as usize
    }

    #[inline]
    pub fn output_compaction_threshold(&self) -> usize {
        self.output_compaction_threshold.load(Ordering::Relaxed) as usize
    }

    #[inline]
    pub fn audit_logging(&self) -> bool {
        self.audit_logging.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> ServerConfig {
        ServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            worker_threads: 1,
            max_pending_ops: 4,
            max_pending_bytes: 1 << 20,
            max_read_ahead: 4096,
            inactivity_timeout_secs: 30,
            max_write_behind: 1 << 16,
            input_compaction_threshold: 4096,
            output_compaction_threshold: 4096,
            audit_logging: false,
        }
    }

    #[test]
    fn non_positive_max_pending_ops_defaults_under_multi_threaded() {
        let mut config = base_config();
        config.max_pending_ops = 0;
        let tunables = Tunables::from_config(&config, true);
        assert_eq!(16, tunables.max_pending_ops());
    }

    #[test]
    fn clamps_read_ahead_and_write_behind_to_floors() {
        let mut config = base_config();
        config.max_read_ahead = 4;
        config.max_write_behind = 0;
        config.max_pending_bytes = 0;
        let tunables = Tunables::from_config(&config, true);
        assert_eq!(256, tunables.max_read_ahead());
        assert_eq!(1, tunables.max_write_behind());
        assert_eq!(1, tunables.max_pending_bytes());
    }

    #[test]
    fn apply_keeps_previous_max_pending_ops_when_single_threaded() {
        let config = base_config();
        let tunables = Tunables::from_config(&config, true);
        let mut reload = base_config();
        reload.max_pending_ops = 0;
        tunables.apply(&reload, false);
        assert_eq!(4, tunables.max_pending_ops());
    }

    #[test]
    fn non_positive_inactivity_timeout_is_preserved_as_disable_sentinel() {
        let mut config = base_config();
        config.inactivity_timeout_secs = -1;
        let tunables = Tunables::from_config(&config, true);
        assert_eq!(-1, tunables.inactivity_timeout_secs());
    }
}
