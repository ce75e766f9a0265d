use crate::types::IdentExhausted;
use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
    time::{Duration, Instant},
};
use tracing::trace;

/// Maximum number of generator retries before giving up on a fresh identity.
pub(crate) const MAX_ID_GEN_RETRY: usize = 100;

/// Issues opaque client identities and keeps them alive while in use.
///
/// Identities expire `kept_window` after their last touch. Expiry is lazy:
/// the pool records insertion order and sweeps stale entries from the head
/// whenever it is consulted, so no background task is needed.
pub(crate) struct IdentityPool {
    inner: Mutex<PoolInner>,
    generate: Box<dyn Fn() -> String + Send + Sync>,
    kept_window: Duration,
}

struct PoolInner {
    /// Live identities with their current expiry.
    live: HashMap<String, Instant>,
    /// Insertion-ordered (id, expiry-as-recorded) pairs. A touch appends a
    /// fresh pair; the old pair becomes a tombstone detected by comparing
    /// its recorded expiry against `live`.
    order: VecDeque<(String, Instant)>,
}

impl IdentityPool {
    pub(crate) fn new(
        generate: impl Fn() -> String + Send + Sync + 'static,
        kept_window: Duration,
    ) -> Self {
        Self {
            inner: Mutex::new(PoolInner {
                live: HashMap::new(),
                order: VecDeque::new(),
            }),
            generate: Box::new(generate),
            kept_window,
        }
    }

    /// Issue a fresh identity, retrying on collision with live identities.
    pub(crate) fn get(&self) -> Result<String, IdentExhausted> {
        let now = Instant::now();
        let mut inner = self.inner.lock().expect("identity pool poisoned");
        inner.sweep(now);

        let mut remaining = MAX_ID_GEN_RETRY;
        let id = loop {
            let candidate = (self.generate)();
            if !inner.live.contains_key(&candidate) {
                break candidate;
            }
            remaining -= 1;
            if remaining == 0 {
                return Err(IdentExhausted);
            }
        };

        let expiry = now + self.kept_window;
        inner.live.insert(id.clone(), expiry);
        inner.order.push_back((id.clone(), expiry));
        trace!(client = %id, "issued identity");
        Ok(id)
    }

    /// Refresh an identity's expiry. Returns false when the identity is not
    /// live (never issued, expired, or evicted).
    pub(crate) fn touch(&self, id: &str) -> bool {
        let now = Instant::now();
        let mut inner = self.inner.lock().expect("identity pool poisoned");
        inner.sweep(now);

        let Some(expiry) = inner.live.get_mut(id) else {
            return false;
        };
        let fresh = now + self.kept_window;
        *expiry = fresh;
        inner.order.push_back((id.to_owned(), fresh));
        true
    }
}

impl std::fmt::Debug for IdentityPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityPool")
            .field("kept_window", &self.kept_window)
            .finish_non_exhaustive()
    }
}

impl PoolInner {
    /// Drop expired entries from the head of the insertion order. Entries
    /// whose recorded expiry disagrees with `live` are tombstones left by a
    /// touch and are skipped without evicting anything.
    fn sweep(&mut self, now: Instant) {
        while let Some((id, recorded)) = self.order.front() {
            let evict = match self.live.get(id) {
                // stale pair, a newer one exists further back
                Some(current) if current != recorded => false,
                Some(current) if *current <= now => true,
                Some(_) => break,
                None => false,
            };
            if evict {
                let id = id.clone();
                self.live.remove(&id);
                trace!(client = %id, "identity expired");
            }
            self.order.pop_front();
        }
    }
}
