//! Cooperative cancellation tokens.
//!
//! A [`CancelToken`] is the signal a blocked semaphore operation races
//! against. Cancellation is cooperative: it unblocks waiters, but an
//! operation that is already about to succeed synchronously completes, and
//! cancellation never retroactively undoes a completed acquire or release.
//!
//! Two observation mechanisms are provided, one per backend:
//!
//! - [`done`](CancelToken::done) exposes a channel receiver that disconnects
//!   at cancellation, so channel-based code can `select!` over it alongside
//!   its own channels.
//! - `watch` (crate-internal) registers a callback run at cancellation, so
//!   condition-variable code can broadcast its own condvar.
//!
//! # Example
//!
//! ```
//! use semakit::CancelToken;
//!
//! let token = CancelToken::new();
//! assert!(!token.is_cancelled());
//! token.cancel();
//! assert!(token.is_cancelled());
//! token.cancel(); // idempotent
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender, bounded};
use parking_lot::Mutex;

type WatchFn = Box<dyn Fn() + Send + Sync>;

/// A cloneable cancellation signal shared between a canceller and any number
/// of blocked operations.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

struct Inner {
    cancelled: AtomicBool,
    /// Dropping this sender disconnects `done_rx`, which is how channel
    /// selects observe cancellation.
    done_tx: Mutex<Option<Sender<()>>>,
    done_rx: Receiver<()>,
    watchers: Mutex<Vec<(u64, WatchFn)>>,
    next_watch_id: AtomicU64,
}

impl CancelToken {
    /// Creates a token in the not-cancelled state.
    #[must_use]
    pub fn new() -> Self {
        let (done_tx, done_rx) = bounded(0);
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                done_tx: Mutex::new(Some(done_tx)),
                done_rx,
                watchers: Mutex::new(Vec::new()),
                next_watch_id: AtomicU64::new(0),
            }),
        }
    }

    /// Returns true once [`cancel`](Self::cancel) has been called on any
    /// clone of this token.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Cancels the token, unblocking every operation racing against it.
    ///
    /// Idempotent: only the first call has any effect. Watch callbacks run
    /// synchronously on the cancelling thread.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::trace!("cancel token fired");
        // Disconnect the done channel first so select-based waiters and
        // callback-based waiters observe cancellation in the same instant a
        // racing is_cancelled() starts returning true.
        drop(self.inner.done_tx.lock().take());
        let watchers = std::mem::take(&mut *self.inner.watchers.lock());
        for (_, callback) in &watchers {
            callback();
        }
    }

    /// A receiver that never yields a message and disconnects when the token
    /// is cancelled.
    ///
    /// Selecting `recv` on this channel becomes ready (with a disconnect
    /// error) at cancellation, mirroring a done-channel race.
    #[must_use]
    pub fn done(&self) -> &Receiver<()> {
        &self.inner.done_rx
    }

    /// Registers `callback` to run at cancellation.
    ///
    /// If the token is already cancelled the callback runs immediately. The
    /// returned guard deregisters the callback when dropped.
    pub(crate) fn watch(&self, callback: impl Fn() + Send + Sync + 'static) -> WatchGuard<'_> {
        let id = self.inner.next_watch_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut watchers = self.inner.watchers.lock();
            if self.is_cancelled() {
                drop(watchers);
                callback();
                return WatchGuard { token: self, id };
            }
            watchers.push((id, Box::new(callback)));
        }
        WatchGuard { token: self, id }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Deregisters a watch callback on drop.
pub(crate) struct WatchGuard<'a> {
    token: &'a CancelToken,
    id: u64,
}

impl Drop for WatchGuard<'_> {
    fn drop(&mut self) {
        let mut watchers = self.token.inner.watchers.lock();
        if let Some(pos) = watchers.iter().position(|(id, _)| *id == self.id) {
            watchers.swap_remove(pos);
        }
    }
}
