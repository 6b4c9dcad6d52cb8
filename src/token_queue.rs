//! Token-queue semaphore backend.
//!
//! The semaphore is a bounded container of opaque tokens, pre-filled to
//! capacity at construction. Acquiring a unit removes a token and releasing
//! inserts one; token ownership transfers from semaphore to caller on
//! acquire and back on release, and no other entity ever holds a token. No
//! separate lock is held across blocking sections; the container is the
//! sole synchronization mechanism.
//!
//! Timeout and cancellation variants race the blocking channel operation
//! against a deadline or a [`CancelToken`]. Multi-unit operations race each
//! unit against one *shared* deadline established lazily at the start of the
//! call, so no per-unit timer is ever allocated.
//!
//! # Partial grants
//!
//! The non-timeout [`wait`](CountingSema::wait) is all-or-nothing: a grant
//! that cannot complete is rolled back. The timeout/cancel variants instead
//! keep whatever was acquired before the deadline and report the count: the
//! caller retains the partial grant and releases it if unwanted.

use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, bounded, select_biased};

use crate::cancel::CancelToken;
use crate::contract::{CountingSema, Semaphore, TimeoutCountingSema};

/// One opaque unit of the protected resource.
struct Token;

/// Counting semaphore backed by a bounded token container.
pub struct TokenSema {
    slots: Sender<Token>,
    tokens: Receiver<Token>,
    capacity: usize,
}

impl TokenSema {
    /// Creates a binary semaphore: capacity 1, pre-filled with 1 token.
    #[must_use]
    pub fn binary() -> Self {
        Self::counting(1)
    }

    /// Creates a counting semaphore pre-filled with `capacity` tokens.
    #[must_use]
    pub fn counting(capacity: usize) -> Self {
        let (slots, tokens) = bounded(capacity);
        for _ in 0..capacity {
            // The channel was just created with exactly this much room.
            let _ = slots.send(Token);
        }
        Self {
            slots,
            tokens,
            capacity,
        }
    }

    fn try_take(&self) -> bool {
        self.tokens.try_recv().is_ok()
    }

    fn try_put(&self) -> bool {
        self.slots.try_send(Token).is_ok()
    }
}

impl Semaphore for TokenSema {
    fn p(&self) -> bool {
        // `self` keeps the sender side alive, so recv cannot disconnect.
        self.tokens.recv().is_ok()
    }

    fn v(&self) -> bool {
        // Blocks while the container is transiently full.
        self.slots.send(Token).is_ok()
    }
}

impl CountingSema for TokenSema {
    fn wait(&self, units: usize) -> bool {
        for taken in 0..units {
            if !self.try_take() {
                if taken > 0 {
                    // All-or-nothing: hand back what we already took.
                    let _ = self.signal(taken);
                }
                return false;
            }
        }
        true
    }

    fn signal(&self, units: usize) -> bool {
        for put in 0..units {
            if !self.try_put() {
                if put > 0 {
                    // Take back the tokens we inserted before failing.
                    let _ = self.wait(put);
                }
                return false;
            }
        }
        true
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Token-queue semaphore with bounded-wait and cancellable operations.
///
/// The non-timeout contract methods on this type delegate to the timeout
/// variants with the default timeout fixed at construction, which means
/// `wait(n)` on this type *keeps* partial grants (discarding the count)
/// rather than rolling them back like [`TokenSema::wait`] does.
pub struct TokenSemaTimeout {
    sema: TokenSema,
    default_timeout: Duration,
}

impl TokenSemaTimeout {
    /// Creates a timeout-aware counting semaphore.
    ///
    /// Every default-timeout operation (`p`, `v`, `wait`, `signal`) is
    /// bounded by `default_timeout`; a zero default makes them all
    /// non-blocking "try once" calls.
    #[must_use]
    pub fn new(capacity: usize, default_timeout: Duration) -> Self {
        Self {
            sema: TokenSema::counting(capacity),
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
}

impl Semaphore for TokenSemaTimeout {
    fn p(&self) -> bool {
        self.p_timeout(self.default_timeout)
    }

    fn v(&self) -> bool {
        self.v_timeout(self.default_timeout)
    }
}

impl CountingSema for TokenSemaTimeout {
    fn wait(&self, units: usize) -> bool {
        self.wait_timeout(units, self.default_timeout).0
    }

    fn signal(&self, units: usize) -> bool {
        self.signal_timeout(units, self.default_timeout).0
    }

    fn capacity(&self) -> usize {
        self.sema.capacity()
    }
}

impl TimeoutCountingSema for TokenSemaTimeout {
    fn p_timeout(&self, timeout: Duration) -> bool {
        if self.sema.try_take() {
            return true;
        }
        if timeout.is_zero() {
            return false;
        }
        self.sema.tokens.recv_timeout(timeout).is_ok()
    }

    fn v_timeout(&self, timeout: Duration) -> bool {
        if self.sema.try_put() {
            return true;
        }
        if timeout.is_zero() {
            return false;
        }
        self.sema.slots.send_timeout(Token, timeout).is_ok()
    }

    fn acquire_cancel(&self, token: &CancelToken) -> bool {
        if self.sema.try_take() {
            return true;
        }
        // Prefer the token channel when both are ready: an acquire that is
        // about to succeed synchronously wins the race against cancellation.
        select_biased! {
            recv(self.sema.tokens) -> msg => msg.is_ok(),
            recv(token.done()) -> _ => false,
        }
    }

    fn release_cancel(&self, token: &CancelToken) -> bool {
        if self.sema.try_put() {
            return true;
        }
        select_biased! {
            send(self.sema.slots, Token) -> res => res.is_ok(),
            recv(token.done()) -> _ => false,
        }
    }

    fn wait_timeout(&self, units: usize, timeout: Duration) -> (bool, usize) {
        // One deadline for the whole call, armed lazily on the first unit
        // that cannot be taken without blocking. A deadline past the end of
        // representable time degrades to an unbounded wait.
        let mut deadline = None;
        for taken in 0..units {
            if self.sema.try_take() {
                continue;
            }
            if timeout.is_zero() {
                return (false, taken);
            }
            let at = *deadline.get_or_insert_with(|| Instant::now().checked_add(timeout));
            let got = match at {
                Some(at) => self.sema.tokens.recv_deadline(at).is_ok(),
                None => self.sema.tokens.recv().is_ok(),
            };
            if !got {
                tracing::debug!(requested = units, taken, "wait timed out with partial grant");
                return (false, taken);
            }
        }
        (true, units)
    }

    fn signal_timeout(&self, units: usize, timeout: Duration) -> (bool, usize) {
        let mut deadline = None;
        for put in 0..units {
            if self.sema.try_put() {
                continue;
            }
            if timeout.is_zero() {
                return (false, put);
            }
            let at = *deadline.get_or_insert_with(|| Instant::now().checked_add(timeout));
            let sent = match at {
                Some(at) => self.sema.slots.send_deadline(Token, at).is_ok(),
                None => self.sema.slots.send(Token).is_ok(),
            };
            if !sent {
                tracing::debug!(requested = units, put, "signal timed out with partial release");
                return (false, put);
            }
        }
        (true, units)
    }

    fn wait_cancel(&self, units: usize, token: &CancelToken) -> (bool, usize) {
        for taken in 0..units {
            if self.sema.try_take() {
                continue;
            }
            let got = select_biased! {
                recv(self.sema.tokens) -> msg => msg.is_ok(),
                recv(token.done()) -> _ => false,
            };
            if !got {
                tracing::debug!(requested = units, taken, "wait cancelled with partial grant");
                return (false, taken);
            }
        }
        (true, units)
    }

    fn signal_cancel(&self, units: usize, token: &CancelToken) -> (bool, usize) {
        for put in 0..units {
            if self.sema.try_put() {
                continue;
            }
            let sent = select_biased! {
                send(self.sema.slots, Token) -> res => res.is_ok(),
                recv(token.done()) -> _ => false,
            };
            if !sent {
                tracing::debug!(requested = units, put, "signal cancelled with partial release");
                return (false, put);
            }
        }
        (true, units)
    }
}
