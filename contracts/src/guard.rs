//! Call-scoped re-entrancy guard.
//!
//! Entry points that move value hold an [`EntryToken`] for their whole
//! duration. A second acquisition while a token is alive fails with
//! [`LedgerError::Reentrant`]; the flag clears when the token drops, on the
//! error path as well.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{LedgerError, LedgerResult};

#[derive(Debug, Default)]
pub struct ReentrancyGuard {
    entered: AtomicBool,
}

impl ReentrancyGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(&self) -> LedgerResult<EntryToken<'_>> {
        if self
            .entered
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Err(LedgerError::Reentrant);
        }
        Ok(EntryToken { guard: self })
    }
}

#[must_use]
pub struct EntryToken<'a> {
    guard: &'a ReentrancyGuard,
}

impl Drop for EntryToken<'_> {
    fn drop(&mut self) {
        self.guard.entered.store(false, Ordering::Release);
    }
}
