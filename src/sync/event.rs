use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use crate::gpu::d3d12::native::WaitEvent;

/// Auto-reset event: `set` wakes one waiter, which clears the signal.
///
/// Clones share the same event.
#[derive(Clone, Default)]
pub struct Event {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Event {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.inner.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set(&self) {
        *self.lock() = true;
        self.inner.1.notify_one();
    }

    pub fn is_set(&self) -> bool {
        *self.lock()
    }

    /// Blocks until signaled; there is no timeout.
    pub fn wait(&self) {
        let mut signaled = self.lock();
        while !*signaled {
            signaled = self
                .inner
                .1
                .wait(signaled)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        *signaled = false;
    }

    /// Returns `false` if `timeout` elapsed first.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = self.lock();
        let (mut signaled, _) = self
            .inner
            .1
            .wait_timeout_while(guard, timeout, |s| !*s)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let was_set = *signaled;
        *signaled = false;
        was_set
    }
}

impl WaitEvent for Event {
    fn wait(&self) {
        Event::wait(self)
    }
}
