//! # Debounced Scheduling
//!
//! Coalesces rapid-fire calls so that only the most recent one runs, once its
//! delay has passed. Each new call for a key cancels the previous timer for
//! that key; timers never accumulate.
//!
//! Timers are spawned Tokio tasks, so scheduling must happen inside a Tokio
//! runtime. The deadline is fixed when `schedule` is called, not when the
//! task first gets polled.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

struct Scheduled {
    generation: u64,
    token: CancellationToken,
}

type PendingMap<K> = Arc<Mutex<HashMap<K, Scheduled>>>;

/// Debounces calls independently per key.
pub struct KeyedDebouncer<K> {
    pending: PendingMap<K>,
    generation: AtomicU64,
}

impl<K> KeyedDebouncer<K>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
{
    /// Creates a debouncer with nothing scheduled.
    pub fn new() -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }

    /// Runs `action` after `delay` unless another call for the same `key`
    /// arrives first, in which case this one is dropped.
    pub fn schedule<F>(&self, key: K, delay: Duration, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let deadline = Instant::now() + delay;
        let token = CancellationToken::new();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);

        {
            let mut pending = self.pending.lock().expect("Debouncer lock poisoned");
            let previous = pending.insert(
                key.clone(),
                Scheduled {
                    generation,
                    token: token.clone(),
                },
            );
            if let Some(previous) = previous {
                previous.token.cancel();
            }
        }

        let pending = Arc::clone(&self.pending);
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    log::trace!("Debounced call for {:?} superseded", key);
                }
                _ = sleep_until(deadline) => {
                    let current = {
                        let mut lock = pending.lock().expect("Debouncer lock poisoned");
                        match lock.get(&key) {
                            Some(s) if s.generation == generation => {
                                lock.remove(&key);
                                true
                            }
                            _ => false,
                        }
                    };
                    if current {
                        action();
                    }
                }
            }
        });
    }

    /// Cancels the pending call for `key`. Returns `true` if one was pending.
    pub fn cancel(&self, key: &K) -> bool {
        let mut pending = self.pending.lock().expect("Debouncer lock poisoned");
        match pending.remove(key) {
            Some(scheduled) => {
                scheduled.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Whether a call for `key` is waiting to run.
    pub fn is_pending(&self, key: &K) -> bool {
        self.pending
            .lock()
            .expect("Debouncer lock poisoned")
            .contains_key(key)
    }
}

impl<K> Default for KeyedDebouncer<K>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> KeyedDebouncer<K> {
    /// Cancels every pending call.
    pub fn cancel_all(&self) {
        if let Ok(mut pending) = self.pending.lock() {
            for (_, scheduled) in pending.drain() {
                scheduled.token.cancel();
            }
        }
    }
}

impl<K> Drop for KeyedDebouncer<K> {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

/// A debouncer with a single implicit key.
#[derive(Default)]
pub struct Debouncer {
    inner: KeyedDebouncer<()>,
}

impl Debouncer {
    /// Creates a debouncer with nothing scheduled.
    pub fn new() -> Self {
        Self {
            inner: KeyedDebouncer::new(),
        }
    }

    /// Runs `action` after `delay`, replacing any call still waiting.
    pub fn schedule<F>(&self, delay: Duration, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.schedule((), delay, action);
    }

    /// Cancels the waiting call, if any.
    pub fn cancel(&self) -> bool {
        self.inner.cancel(&())
    }

    /// Whether a call is waiting to run.
    pub fn is_pending(&self) -> bool {
        self.inner.is_pending(&())
    }
}
