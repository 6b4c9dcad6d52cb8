//! Explicit backend selection for semaphore construction.
//!
//! Instead of process-wide mutable default bindings, backend choice is an
//! explicit value passed to whatever constructs semaphores. The contract
//! implementations never depend on which backend a [`SemaConfig`] selects.
//!
//! # Example
//!
//! ```
//! use semakit::{Backend, CountingSema, SemaConfig};
//! use std::time::Duration;
//!
//! let config = SemaConfig::new(Backend::TokenQueue);
//! let sem = config.timeout(4, Duration::from_millis(10));
//! assert_eq!(sem.capacity(), 4);
//! ```

use std::sync::Arc;
use std::time::Duration;

use crate::condvar::{CondSema, CondSemaTimeout};
use crate::contract::{CountingSema, Semaphore, TimeoutCountingSema};
use crate::token_queue::{TokenSema, TokenSemaTimeout};

/// Concrete strategy backing the semaphores a [`SemaConfig`] constructs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// Fixed-capacity token container; acquire removes a token, release
    /// inserts one.
    #[default]
    TokenQueue,
    /// Signed deficit counter under a mutex and condition variable, with a
    /// shared wake timer for bounded waits.
    Condvar,
}

/// Factory configuration binding constructors to one backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct SemaConfig {
    backend: Backend,
}

impl SemaConfig {
    /// Creates a configuration for the given backend.
    #[must_use]
    pub const fn new(backend: Backend) -> Self {
        Self { backend }
    }

    /// Returns the configured backend.
    #[must_use]
    pub const fn backend(&self) -> Backend {
        self.backend
    }

    /// Constructs a binary semaphore.
    #[must_use]
    pub fn semaphore(&self) -> Arc<dyn Semaphore> {
        match self.backend {
            Backend::TokenQueue => Arc::new(TokenSema::binary()),
            Backend::Condvar => Arc::new(CondSema::binary()),
        }
    }

    /// Constructs a counting semaphore with the given capacity.
    #[must_use]
    pub fn counting(&self, capacity: usize) -> Arc<dyn CountingSema> {
        match self.backend {
            Backend::TokenQueue => Arc::new(TokenSema::counting(capacity)),
            Backend::Condvar => Arc::new(CondSema::counting(capacity)),
        }
    }

    /// Constructs a timeout-aware counting semaphore.
    #[must_use]
    pub fn timeout(
        &self,
        capacity: usize,
        default_timeout: Duration,
    ) -> Arc<dyn TimeoutCountingSema> {
        match self.backend {
            Backend::TokenQueue => Arc::new(TokenSemaTimeout::new(capacity, default_timeout)),
            Backend::Condvar => Arc::new(CondSemaTimeout::new(capacity, default_timeout)),
        }
    }

    /// Constructs a timeout-aware semaphore whose default-timeout operations
    /// never block (zero default timeout).
    #[must_use]
    pub fn non_blocking(&self, capacity: usize) -> Arc<dyn TimeoutCountingSema> {
        self.timeout(capacity, Duration::ZERO)
    }
}
