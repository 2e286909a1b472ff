//! Binary execution gate used to pass the baton between native threads.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// A binary semaphore. Granting an already granted gate is a no-op, so the
/// permit count never exceeds one.
#[derive(Debug, Default)]
pub struct Gate {
    granted: Mutex<bool>,
    signal: Condvar,
}

impl Gate {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.granted.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hand the permit to whoever waits on this gate
    pub fn grant(&self) {
        let mut granted = self.lock();
        *granted = true;
        self.signal.notify_one();
    }

    /// Block until the gate is granted, then consume the permit
    pub fn acquire(&self) {
        let mut granted = self.lock();
        while !*granted {
            granted = self
                .signal
                .wait(granted)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *granted = false;
    }

    #[cfg(test)]
    pub fn is_granted(&self) -> bool {
        *self.lock()
    }
}
