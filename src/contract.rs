//! Semaphore capability contracts.
//!
//! Three traits layer the capability surface: [`Semaphore`] is the minimal
//! binary acquire/release, [`CountingSema`] adds atomic multi-unit
//! operations, and [`TimeoutCountingSema`] adds bounded-wait and cancellable
//! variants of everything.
//!
//! All traits require `Send + Sync` so a handle can be shared across threads
//! as `Arc<dyn TimeoutCountingSema>`.
//!
//! # Pairing
//!
//! A successful acquire is paired, for program correctness, with exactly one
//! later release. The contract itself does not enforce this: double release
//! and unmatched acquire are caller-discipline responsibilities and are not
//! detected.

use std::time::Duration;

use crate::cancel::CancelToken;

/// A binary semaphore protecting one or more critical sections.
///
/// `P`/`V` are Dijkstra's original operation names; `acquire`/`release` are
/// provided as aliases.
pub trait Semaphore: Send + Sync {
    /// Takes one unit, blocking until it is available.
    ///
    /// On a timeout-aware implementation this is bounded by the default
    /// timeout configured at construction; otherwise it never fails.
    fn p(&self) -> bool;

    /// Returns one unit, waking a blocked acquirer if any exist.
    fn v(&self) -> bool;

    /// Alias for [`p`](Self::p).
    fn acquire(&self) -> bool {
        self.p()
    }

    /// Alias for [`v`](Self::v).
    fn release(&self) -> bool {
        self.v()
    }
}

/// A semaphore over an arbitrary resource count.
///
/// `wait`/`signal` transfer `units` as a single atomic unit-set: either the
/// whole grant happens or (for the non-timeout operations) none of it does.
pub trait CountingSema: Semaphore {
    /// Acquires `units` units as one atomic grant.
    ///
    /// Returns whether the grant succeeded. `wait(0)` trivially succeeds.
    fn wait(&self, units: usize) -> bool;

    /// Releases `units` units atomically.
    ///
    /// Returns whether the release succeeded.
    fn signal(&self, units: usize) -> bool;

    /// Returns the capacity fixed at construction.
    ///
    /// Constant for the semaphore's lifetime; no side effects.
    fn capacity(&self) -> usize;
}

/// A counting semaphore whose every operation has bounded-wait and
/// cancellable forms.
///
/// A timeout of [`Duration::ZERO`] means "try once, non-blocking". The
/// multi-unit forms return the count of units actually transferred alongside
/// the success flag: a multi-unit grant may time out after acquiring only
/// some of the requested units, and the caller keeps (and is responsible
/// for) that partial grant.
pub trait TimeoutCountingSema: CountingSema {
    /// [`p`](Semaphore::p) bounded by `timeout`.
    fn p_timeout(&self, timeout: Duration) -> bool;

    /// [`v`](Semaphore::v) bounded by `timeout`.
    fn v_timeout(&self, timeout: Duration) -> bool;

    /// Alias for [`p_timeout`](Self::p_timeout).
    fn acquire_timeout(&self, timeout: Duration) -> bool {
        self.p_timeout(timeout)
    }

    /// Alias for [`v_timeout`](Self::v_timeout).
    fn release_timeout(&self, timeout: Duration) -> bool {
        self.v_timeout(timeout)
    }

    /// [`p`](Semaphore::p) racing `token`; unbounded wait otherwise.
    fn acquire_cancel(&self, token: &CancelToken) -> bool;

    /// [`v`](Semaphore::v) racing `token`; unbounded wait otherwise.
    fn release_cancel(&self, token: &CancelToken) -> bool;

    /// [`wait`](CountingSema::wait) bounded by a single shared `timeout`
    /// deadline established once at the start of the call.
    ///
    /// On timeout, returns `(false, taken)` where `taken` is the number of
    /// units already acquired. Those units are *not* rolled back: the caller
    /// retains the partial grant and must `signal` it back if unwanted.
    fn wait_timeout(&self, units: usize, timeout: Duration) -> (bool, usize);

    /// [`signal`](CountingSema::signal) bounded by a shared `timeout`
    /// deadline, with the same partial-progress reporting as
    /// [`wait_timeout`](Self::wait_timeout).
    fn signal_timeout(&self, units: usize, timeout: Duration) -> (bool, usize);

    /// [`wait`](CountingSema::wait) racing `token` instead of a deadline.
    fn wait_cancel(&self, units: usize, token: &CancelToken) -> (bool, usize);

    /// [`signal`](CountingSema::signal) racing `token` instead of a deadline.
    fn signal_cancel(&self, units: usize, token: &CancelToken) -> (bool, usize);
}
