//! [`Debouncer`] – quiet-window filter for repeated signals.
//!
//! A single state change on the bus often arrives as several near-identical
//! signals.  The debouncer remembers when it last accepted a signal for each
//! [`DebounceKey`] and rejects anything for the same key inside the quiet
//! window.  It is a rate limiter, not a correctness mechanism: letting a
//! duplicate through is harmless.
//!
//! Records are dropped with [`Debouncer::forget_sender`] when the reconciler
//! withdraws an entity, so the key space tracks live entities times signal
//! kinds.  Senders only ever matched by a wildcard static entry are not
//! pruned; [`Debouncer::len`] exposes the current size.

use std::collections::HashMap;
use std::time::Duration;

use busbridge_types::RawSignal;
use parking_lot::Mutex;
use tokio::time::Instant;

/// Default quiet window.
pub const DEFAULT_QUIET_WINDOW: Duration = Duration::from_millis(500);

/// What two signals must share to be considered duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DebounceKey {
    pub sender: String,
    pub path: String,
    pub interface: String,
}

impl DebounceKey {
    pub fn for_signal(signal: &RawSignal) -> Self {
        Self {
            sender: signal.sender.clone(),
            path: signal.path.clone(),
            interface: signal.interface.clone(),
        }
    }
}

/// Per-key quiet-window filter.  Safe to share between workers.
#[derive(Debug)]
pub struct Debouncer {
    quiet_window: Duration,
    last_accepted: Mutex<HashMap<DebounceKey, Instant>>,
}

impl Debouncer {
    pub fn new(quiet_window: Duration) -> Self {
        Self {
            quiet_window,
            last_accepted: Mutex::new(HashMap::new()),
        }
    }

    pub fn quiet_window(&self) -> Duration {
        self.quiet_window
    }

    /// Accept when `key` has no record or its last acceptance is at least
    /// one quiet window before `now`; an accepted key's record moves to `now`.
    pub fn should_accept(&self, key: &DebounceKey, now: Instant) -> bool {
        let mut last_accepted = self.last_accepted.lock();
        match last_accepted.get_mut(key) {
            Some(last) if now.saturating_duration_since(*last) < self.quiet_window => false,
            Some(last) => {
                *last = now;
                true
            }
            None => {
                last_accepted.insert(key.clone(), now);
                true
            }
        }
    }

    /// Drop every record for `sender`.  Returns how many were removed.
    pub fn forget_sender(&self, sender: &str) -> usize {
        let mut last_accepted = self.last_accepted.lock();
        let before = last_accepted.len();
        last_accepted.retain(|key, _| key.sender != sender);
        before - last_accepted.len()
    }

    /// Number of keys with a record.
    pub fn len(&self) -> usize {
        self.last_accepted.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(DEFAULT_QUIET_WINDOW)
    }
}
