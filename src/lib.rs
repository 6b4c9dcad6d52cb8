//! Blocking mutual-exclusion and resource-counting primitives.
//!
//! This crate provides a binary semaphore, a counting semaphore with
//! multi-unit [`wait`](CountingSema::wait) / [`signal`](CountingSema::signal),
//! and timeout/cancellation-aware variants of both, with two interchangeable
//! backends:
//!
//! - [`TokenSema`] / [`TokenSemaTimeout`]: a fixed-capacity token container;
//!   acquiring removes a token, releasing inserts one. Timeouts and
//!   cancellation race the blocking channel operation directly.
//! - [`CondSema`] / [`CondSemaTimeout`]: a signed deficit counter under a
//!   mutex with a condition variable. A single background timer thread
//!   coalesces timeouts across all waiters, so bounded waits cost O(1)
//!   timers regardless of waiter count.
//!
//! Callers pick one backend at construction, directly or through
//! [`SemaConfig`], and hold the handle for the semaphore's lifetime.
//!
//! # Contract
//!
//! The capability surface is split across three traits:
//!
//! - [`Semaphore`]: binary `p`/`v` (Dijkstra's terminology) with
//!   `acquire`/`release` aliases.
//! - [`CountingSema`]: multi-unit `wait(n)`/`signal(n)` as atomic unit-sets,
//!   plus `capacity()`.
//! - [`TimeoutCountingSema`]: bounded-wait and cancellable variants of every
//!   operation. Multi-unit variants report the count of units actually
//!   transferred, because a multi-unit grant may time out after acquiring
//!   only some of the requested units.
//!
//! A timeout of zero means "try once, non-blocking". Failure is always a
//! return value, never a panic. The contract does not police misuse: a
//! release that was never matched by an acquire is accepted and accounted
//! like any other (the token backend bounds it physically at capacity; the
//! condition-variable backend does not bound it at all).
//!
//! # Ordering
//!
//! Neither backend guarantees first-in-first-out wake order. A waiter that
//! has been blocked the longest may be served after a newer one.
//!
//! # Example
//!
//! ```
//! use semakit::{CountingSema, TokenSema};
//!
//! let sem = TokenSema::counting(4);
//! assert!(sem.wait(3));
//! assert!(!sem.wait(2)); // only 1 unit left; all-or-nothing, rolled back
//! assert!(sem.signal(3));
//! assert_eq!(sem.capacity(), 4);
//! ```

pub mod cancel;
pub mod condvar;
pub mod config;
pub mod contract;
pub mod token_queue;

#[cfg(test)]
pub(crate) mod test_logging;

pub use cancel::CancelToken;
pub use condvar::{CondSema, CondSemaTimeout};
pub use config::{Backend, SemaConfig};
pub use contract::{CountingSema, Semaphore, TimeoutCountingSema};
pub use token_queue::{TokenSema, TokenSemaTimeout};
