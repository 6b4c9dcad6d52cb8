//! Condition-variable semaphore backend.
//!
//! The semaphore is a signed deficit counter seeded to capacity and guarded
//! by a mutex with an associated condition. Acquiring subtracts from the
//! counter and blocks while it is negative; the magnitude of a negative
//! value is the total unmet demand from blocked waiters. Releasing adds to
//! the counter and wakes one waiter when there was a deficit. Standard
//! monitor discipline applies throughout: the lock is held only across the
//! bookkeeping, never across a timed sleep, and every waiter re-checks its
//! condition on wake.
//!
//! # Shared wake timer
//!
//! The timeout-aware variant coalesces timeouts across all waiters instead
//! of allocating one timer per blocked caller. A single background thread
//! owns one timer holding the earliest outstanding deadline: a bounded wait
//! arms it whenever the timer is disarmed or set to fire later than the
//! waiter's own deadline, and on expiry the thread broadcasts to every
//! waiter, each of which checks *its own* deadline rather than whether the
//! timer fired for it specifically. Waiters whose deadline lies further out
//! re-arm the timer for their remaining time and block again. This bounds
//! every wait at O(1) timer cost regardless of waiter count, at the expense
//! of a thundering-herd wake on each expiry.
//!
//! The timer thread lives as long as the semaphore handle; dropping the
//! handle sets a shutdown flag and nudges the thread so it exits.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::cancel::CancelToken;
use crate::contract::{CountingSema, Semaphore, TimeoutCountingSema};

/// Signed view of a unit count.
///
/// Capacities anywhere near `isize::MAX` are unrepresentable as real
/// resources, so saturation never changes observable behavior.
fn unit_count(units: usize) -> isize {
    isize::try_from(units).unwrap_or(isize::MAX)
}

/// Counting semaphore backed by a deficit counter and a condition variable.
pub struct CondSema {
    count: Mutex<isize>,
    wakeup: Condvar,
    capacity: usize,
}

impl CondSema {
    /// Creates a binary semaphore (capacity 1).
    #[must_use]
    pub fn binary() -> Self {
        Self::counting(1)
    }

    /// Creates a counting semaphore with `capacity` units available.
    #[must_use]
    pub fn counting(capacity: usize) -> Self {
        Self {
            count: Mutex::new(unit_count(capacity)),
            wakeup: Condvar::new(),
            capacity,
        }
    }
}

impl Semaphore for CondSema {
    fn p(&self) -> bool {
        self.wait(1)
    }

    fn v(&self) -> bool {
        self.signal(1)
    }
}

impl CountingSema for CondSema {
    fn wait(&self, units: usize) -> bool {
        if units == 0 {
            return true;
        }
        let demand = unit_count(units);
        let mut count = self.count.lock();
        *count -= demand;
        while *count < 0 {
            self.wakeup.wait(&mut count);
        }
        // One signal may satisfy several waiters; pass the wake along.
        self.wakeup.notify_one();
        true
    }

    fn signal(&self, units: usize) -> bool {
        let mut count = self.count.lock();
        let wake_others = *count < 0;
        *count += unit_count(units);
        if wake_others {
            self.wakeup.notify_one();
        }
        true
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}

struct TimedState {
    count: isize,
    /// Fire time of the armed shared timer; `None` when disarmed.
    deadline: Option<Instant>,
    shutdown: bool,
}

struct TimedInner {
    state: Mutex<TimedState>,
    /// Blocked acquirers wait here; signals, the shared timer, and
    /// cancellation watches all wake through it.
    wakeup: Condvar,
    /// The timer thread parks here between arms.
    timer: Condvar,
    capacity: usize,
}

impl TimedInner {
    /// Arming rule for the shared timer: a disarmed timer takes the caller's
    /// deadline, and an earlier deadline steals the timer, so it always fires
    /// at the earliest outstanding deadline. Waiters bound by a later
    /// deadline re-arm after the fire.
    fn arm_timer(&self, state: &mut TimedState, end_of_life: Instant) {
        if state.deadline.is_some_and(|at| at <= end_of_life) {
            return;
        }
        state.deadline = Some(end_of_life);
        self.timer.notify_one();
        tracing::trace!(deadline = ?end_of_life, "shared wake timer armed");
    }

    /// Stops the shared timer once no deficit is outstanding, so the next
    /// bounded wait arms a fresh one from zero.
    fn disarm_if_idle(&self, state: &mut TimedState) {
        if state.count == unit_count(self.capacity) {
            state.deadline = None;
        }
    }

    /// Abandons a timed-out or cancelled demand: the waiter keeps the units
    /// that are genuinely free and returns the rest to the counter.
    fn reclaim_partial(&self, state: &mut TimedState, demand: isize) -> usize {
        let freed = state.count + demand; // counter value if fully rolled back
        let kept = freed.clamp(0, demand);
        let returned = demand - kept;
        if returned > 0 && state.count < 0 {
            self.wakeup.notify_one();
        }
        state.count += returned;
        self.disarm_if_idle(state);
        usize::try_from(kept).unwrap_or(0)
    }
}

fn timer_loop(inner: &TimedInner) {
    let mut state = inner.state.lock();
    loop {
        if state.shutdown {
            tracing::trace!("semaphore timer thread exiting");
            return;
        }
        match state.deadline {
            None => inner.timer.wait(&mut state),
            Some(at) => {
                let result = inner.timer.wait_until(&mut state, at);
                // A re-arm while we slept supersedes this expiry.
                if result.timed_out() && state.deadline == Some(at) && !state.shutdown {
                    state.deadline = None;
                    tracing::trace!("shared wake timer fired; all waiters re-check deadlines");
                    inner.wakeup.notify_all();
                }
            }
        }
    }
}

/// Condition-variable semaphore with bounded-wait and cancellable
/// operations, sharing one wake timer across all waiters.
///
/// Releases never block in this backend because the deficit counter is not
/// bounded against capacity, so the timeout and cancellation release
/// variants always succeed in full.
pub struct CondSemaTimeout {
    inner: Arc<TimedInner>,
    default_timeout: Duration,
}

impl CondSemaTimeout {
    /// Creates a timeout-aware counting semaphore and spawns its timer
    /// thread.
    ///
    /// Every default-timeout operation is bounded by `default_timeout`; a
    /// zero default makes them all non-blocking "try once" calls.
    #[must_use]
    pub fn new(capacity: usize, default_timeout: Duration) -> Self {
        let inner = Arc::new(TimedInner {
            state: Mutex::new(TimedState {
                count: unit_count(capacity),
                deadline: None,
                shutdown: false,
            }),
            wakeup: Condvar::new(),
            timer: Condvar::new(),
            capacity,
        });
        let timer_inner = Arc::clone(&inner);
        thread::Builder::new()
            .name("semakit-timer".into())
            .spawn(move || timer_loop(&timer_inner))
            .expect("spawn semaphore timer thread");
        Self {
            inner,
            default_timeout,
        }
    }

    /// Creates a semaphore whose default-timeout operations never block.
    #[must_use]
    pub fn non_blocking(capacity: usize) -> Self {
        Self::new(capacity, Duration::ZERO)
    }

    /// Returns the default timeout fixed at construction.
    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    fn signal_units(&self, units: usize) -> usize {
        let mut state = self.inner.state.lock();
        let wake_others = state.count < 0;
        state.count += unit_count(units);
        if wake_others {
            self.inner.wakeup.notify_one();
        }
        units
    }
}

impl Drop for CondSemaTimeout {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        state.shutdown = true;
        self.inner.timer.notify_one();
    }
}

impl Semaphore for CondSemaTimeout {
    fn p(&self) -> bool {
        self.p_timeout(self.default_timeout)
    }

    fn v(&self) -> bool {
        self.v_timeout(self.default_timeout)
    }
}

impl CountingSema for CondSemaTimeout {
    fn wait(&self, units: usize) -> bool {
        self.wait_timeout(units, self.default_timeout).0
    }

    fn signal(&self, units: usize) -> bool {
        self.signal_units(units);
        true
    }

    fn capacity(&self) -> usize {
        self.inner.capacity
    }
}

impl TimeoutCountingSema for CondSemaTimeout {
    fn p_timeout(&self, timeout: Duration) -> bool {
        self.wait_timeout(1, timeout).0
    }

    fn v_timeout(&self, _timeout: Duration) -> bool {
        self.signal_units(1);
        true
    }

    fn acquire_cancel(&self, token: &CancelToken) -> bool {
        self.wait_cancel(1, token).0
    }

    fn release_cancel(&self, _token: &CancelToken) -> bool {
        self.signal_units(1);
        true
    }

    fn wait_timeout(&self, units: usize, timeout: Duration) -> (bool, usize) {
        if units == 0 {
            return (true, 0);
        }
        let demand = unit_count(units);
        if timeout.is_zero() {
            // Try once: take whatever is immediately free.
            let mut state = self.inner.state.lock();
            let kept = state.count.clamp(0, demand);
            state.count -= kept;
            return (kept == demand, usize::try_from(kept).unwrap_or(0));
        }

        // A deadline past the end of representable time degrades to an
        // unbounded wait.
        let end_of_life = Instant::now().checked_add(timeout);
        let mut state = self.inner.state.lock();
        state.count -= demand;
        while state.count < 0 {
            if let Some(at) = end_of_life {
                if Instant::now() >= at {
                    let kept = self.inner.reclaim_partial(&mut state, demand);
                    drop(state);
                    tracing::debug!(requested = units, kept, "wait timed out with partial grant");
                    return (false, kept);
                }
                // Covers the initial arm and the re-arm after the shared
                // timer fired for an earlier deadline, so this waiter's
                // bound holds no matter who armed the timer last.
                self.inner.arm_timer(&mut state, at);
            }
            self.inner.wakeup.wait(&mut state);
        }
        self.inner.disarm_if_idle(&mut state);
        // One signal may satisfy several waiters; pass the wake along.
        self.inner.wakeup.notify_one();
        (true, units)
    }

    fn signal_timeout(&self, units: usize, _timeout: Duration) -> (bool, usize) {
        (true, self.signal_units(units))
    }

    fn wait_cancel(&self, units: usize, token: &CancelToken) -> (bool, usize) {
        if units == 0 {
            return (true, 0);
        }
        let demand = unit_count(units);
        let watch_inner = Arc::clone(&self.inner);
        // Lock-then-broadcast so the notification cannot slip between a
        // waiter's cancellation check and its block.
        let _watch = token.watch(move || {
            let _state = watch_inner.state.lock();
            watch_inner.wakeup.notify_all();
        });

        let mut state = self.inner.state.lock();
        state.count -= demand;
        while state.count < 0 {
            if token.is_cancelled() {
                let kept = self.inner.reclaim_partial(&mut state, demand);
                drop(state);
                tracing::debug!(requested = units, kept, "wait cancelled with partial grant");
                return (false, kept);
            }
            self.inner.wakeup.wait(&mut state);
        }
        self.inner.disarm_if_idle(&mut state);
        self.inner.wakeup.notify_one();
        (true, units)
    }

    fn signal_cancel(&self, units: usize, _token: &CancelToken) -> (bool, usize) {
        (true, self.signal_units(units))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_logging::init_test_logging;

    const SLACK: Duration = Duration::from_millis(500);

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn wait_and_signal_track_the_counter() {
        init_test("wait_and_signal_track_the_counter");
        let sem = CondSema::counting(4);
        assert!(sem.wait(3));
        let count = *sem.count.lock();
        crate::assert_with_log!(count == 1, "counter after wait", 1isize, count);
        assert!(sem.signal(3));
        let count = *sem.count.lock();
        crate::assert_with_log!(count == 4, "counter after signal", 4isize, count);
        crate::test_complete!("wait_and_signal_track_the_counter");
    }

    #[test]
    fn signal_beyond_capacity_is_accepted() {
        init_test_logging();
        // The counter is not bounded: the semaphore trusts its caller.
        let sem = CondSema::counting(2);
        assert!(sem.signal(5));
        assert_eq!(*sem.count.lock(), 7);
        assert!(sem.wait(7));
    }

    #[test]
    fn blocked_wait_resumes_on_signal() {
        init_test_logging();
        let sem = Arc::new(CondSema::counting(1));
        assert!(sem.p());
        let waiter = Arc::clone(&sem);
        let handle = thread::spawn(move || waiter.p());
        thread::sleep(Duration::from_millis(20));
        assert!(sem.v());
        assert!(handle.join().expect("waiter thread"));
    }

    #[test]
    fn one_signal_satisfying_two_waiters_strands_neither() {
        init_test_logging();
        let sem = Arc::new(CondSema::counting(0));
        let mut handles = Vec::new();
        for _ in 0..2 {
            let waiter = Arc::clone(&sem);
            handles.push(thread::spawn(move || waiter.wait(1)));
        }
        thread::sleep(Duration::from_millis(20));
        assert!(sem.signal(2));
        for handle in handles {
            assert!(handle.join().expect("waiter thread"));
        }
    }

    #[test]
    fn zero_timeout_takes_what_is_free() {
        init_test_logging();
        let sem = CondSemaTimeout::non_blocking(3);
        let (ok, taken) = sem.wait_timeout(5, Duration::ZERO);
        assert!(!ok);
        assert_eq!(taken, 3);
        let (ok, taken) = sem.wait_timeout(0, Duration::ZERO);
        assert!(ok);
        assert_eq!(taken, 0);
        assert!(sem.signal(3));
    }

    #[test]
    fn wait_timeout_observes_the_deadline() {
        init_test_logging();
        let sem = CondSemaTimeout::new(1, Duration::from_millis(10));
        assert!(sem.p());
        let start = Instant::now();
        assert!(!sem.p_timeout(Duration::from_millis(10)));
        let elapsed = Instant::now() - start;
        assert!(
            elapsed >= Duration::from_millis(10),
            "returned before the deadline: {elapsed:?}"
        );
        assert!(elapsed < SLACK, "missed the deadline by too much: {elapsed:?}");
    }

    #[test]
    fn timed_out_wait_reclaims_partially() {
        init_test("timed_out_wait_reclaims_partially");
        let sem = CondSemaTimeout::new(2, Duration::from_millis(20));
        let (ok, kept) = sem.wait_timeout(5, Duration::from_millis(20));
        assert!(!ok);
        crate::assert_with_log!(kept == 2, "units kept on timeout", 2usize, kept);
        // Conservation: handing them back restores full capacity.
        let (ok, put) = sem.signal_timeout(kept, Duration::ZERO);
        assert!(ok);
        assert_eq!(put, 2);
        let (ok, taken) = sem.wait_timeout(2, Duration::ZERO);
        assert!(ok);
        assert_eq!(taken, 2);
        crate::test_complete!("timed_out_wait_reclaims_partially");
    }

    #[test]
    fn deep_deficit_timeout_rolls_back_fully() {
        init_test_logging();
        let sem = CondSemaTimeout::new(1, Duration::from_millis(20));
        assert!(sem.p());
        let (ok, kept) = sem.wait_timeout(3, Duration::from_millis(20));
        assert!(!ok);
        assert_eq!(kept, 0, "nothing was free, nothing is kept");
        assert!(sem.v());
        assert!(sem.p_timeout(Duration::from_millis(100)));
    }

    #[test]
    fn blocked_wait_succeeds_when_signalled_before_deadline() {
        init_test_logging();
        let sem = Arc::new(CondSemaTimeout::new(2, Duration::from_secs(5)));
        assert!(sem.wait(2));
        let waiter = Arc::clone(&sem);
        let handle = thread::spawn(move || waiter.wait_timeout(2, Duration::from_secs(5)));
        thread::sleep(Duration::from_millis(20));
        assert!(sem.signal(2));
        let (ok, taken) = handle.join().expect("waiter thread");
        assert!(ok);
        assert_eq!(taken, 2);
    }

    #[test]
    fn earlier_deadline_steals_the_shared_timer() {
        init_test_logging();
        let sem = Arc::new(CondSemaTimeout::new(1, Duration::from_secs(5)));
        assert!(sem.p());

        // First waiter arms the timer with a far-out deadline.
        let long_waiter = Arc::clone(&sem);
        let long = thread::spawn(move || {
            let start = Instant::now();
            let ok = long_waiter.p_timeout(Duration::from_millis(200));
            (ok, start.elapsed())
        });
        thread::sleep(Duration::from_millis(30));

        // Second waiter steals the timer with an earlier deadline and must
        // still observe its own bound.
        let start = Instant::now();
        assert!(!sem.p_timeout(Duration::from_millis(20)));
        let short_elapsed = start.elapsed();
        assert!(short_elapsed >= Duration::from_millis(20));
        assert!(short_elapsed < SLACK);

        // The long waiter's bound must survive the earlier fire: the timer
        // is re-armed for its remaining time.
        let (ok, long_elapsed) = long.join().expect("long waiter");
        assert!(!ok);
        assert!(long_elapsed >= Duration::from_millis(200));
        assert!(long_elapsed < Duration::from_secs(2));
    }

    #[test]
    fn later_deadline_does_not_extend_an_earlier_bound() {
        init_test_logging();
        let sem = Arc::new(CondSemaTimeout::new(1, Duration::from_secs(5)));
        assert!(sem.p());

        // First waiter holds the earliest outstanding deadline.
        let first = Arc::clone(&sem);
        let early = thread::spawn(move || {
            let start = Instant::now();
            let ok = first.p_timeout(Duration::from_millis(300));
            (ok, start.elapsed())
        });
        thread::sleep(Duration::from_millis(250));

        // A late arrival with a shorter timeout but a later deadline must
        // not push the shared timer past the first waiter's bound.
        let start = Instant::now();
        assert!(!sem.p_timeout(Duration::from_millis(200)));
        let late_elapsed = start.elapsed();
        assert!(late_elapsed >= Duration::from_millis(200));
        assert!(late_elapsed < Duration::from_millis(200) + SLACK);

        let (ok, early_elapsed) = early.join().expect("early waiter");
        assert!(!ok);
        assert!(early_elapsed >= Duration::from_millis(300));
        assert!(
            early_elapsed < Duration::from_millis(440),
            "first waiter overshot its own deadline: {early_elapsed:?}"
        );
    }

    #[test]
    fn zero_unit_wait_ignores_other_waiters_deficit() {
        init_test_logging();
        let plain = Arc::new(CondSema::counting(1));
        let blocked = Arc::clone(&plain);
        let handle = thread::spawn(move || blocked.wait(2));
        thread::sleep(Duration::from_millis(20));
        let start = Instant::now();
        assert!(plain.wait(0), "wait(0) must succeed trivially");
        assert!(start.elapsed() < Duration::from_millis(50));
        assert!(plain.signal(1));
        assert!(handle.join().expect("blocked waiter"));

        let timed = Arc::new(CondSemaTimeout::new(1, Duration::from_millis(300)));
        assert!(timed.p());
        let parked = Arc::clone(&timed);
        let waiter = thread::spawn(move || parked.wait_timeout(1, Duration::from_millis(300)));
        thread::sleep(Duration::from_millis(20));
        let start = Instant::now();
        assert_eq!(timed.wait_timeout(0, Duration::from_secs(1)), (true, 0));
        let token = CancelToken::new();
        assert_eq!(timed.wait_cancel(0, &token), (true, 0));
        assert!(start.elapsed() < Duration::from_millis(50));
        assert!(timed.v());
        let (ok, taken) = waiter.join().expect("parked waiter");
        assert!(ok);
        assert_eq!(taken, 1);
    }

    #[test]
    fn maximal_timeout_degrades_to_an_unbounded_wait() {
        init_test_logging();
        let sem = Arc::new(CondSemaTimeout::new(1, Duration::from_millis(10)));
        assert!(sem.wait_timeout(1, Duration::MAX).0);
        let waiter = Arc::clone(&sem);
        let handle = thread::spawn(move || waiter.wait_timeout(1, Duration::MAX));
        thread::sleep(Duration::from_millis(20));
        assert!(sem.v());
        let (ok, taken) = handle.join().expect("waiter thread");
        assert!(ok);
        assert_eq!(taken, 1);
    }

    #[test]
    fn wait_cancel_unblocks_on_cancel() {
        init_test_logging();
        let sem = Arc::new(CondSemaTimeout::new(1, Duration::from_secs(5)));
        assert!(sem.p());
        let token = CancelToken::new();
        let canceller = token.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            canceller.cancel();
        });
        let start = Instant::now();
        let (ok, kept) = sem.wait_cancel(1, &token);
        assert!(!ok);
        assert_eq!(kept, 0);
        assert!(start.elapsed() < SLACK);
        handle.join().expect("canceller thread");
    }

    #[test]
    fn cancelled_token_still_grants_when_units_are_free() {
        init_test_logging();
        let sem = CondSemaTimeout::new(2, Duration::from_millis(10));
        let token = CancelToken::new();
        token.cancel();
        // No blocking needed: cancellation has no effect.
        let (ok, taken) = sem.wait_cancel(2, &token);
        assert!(ok);
        assert_eq!(taken, 2);
    }

    #[test]
    fn releases_never_block_in_this_backend() {
        init_test_logging();
        let sem = CondSemaTimeout::new(1, Duration::from_millis(10));
        let token = CancelToken::new();
        token.cancel();
        assert!(sem.v_timeout(Duration::ZERO));
        assert!(sem.release_cancel(&token));
        let (ok, put) = sem.signal_cancel(3, &token);
        assert!(ok);
        assert_eq!(put, 3);
    }

    #[test]
    fn drop_shuts_the_timer_thread_down() {
        init_test_logging();
        let sem = CondSemaTimeout::new(1, Duration::from_millis(10));
        assert!(sem.p());
        drop(sem);
        // Nothing to assert beyond "drop returns": the shutdown flag plus
        // the timer-condvar nudge lets the thread exit its park.
    }
}
