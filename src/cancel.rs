//! Generation-based cancellation
//!
//! Every start of a long-running loop captures a [`SessionToken`] from a
//! shared [`Generation`]. Stopping advances the generation, which makes every
//! outstanding token invalid at once and wakes any thread sleeping on one.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Inner {
    counter: AtomicU64,
    lock: Mutex<()>,
    wakeup: Condvar,
}

/// Shared generation counter
#[derive(Clone)]
pub struct Generation {
    inner: Arc<Inner>,
}

impl Generation {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                counter: AtomicU64::new(0),
                lock: Mutex::new(()),
                wakeup: Condvar::new(),
            }),
        }
    }

    /// Token bound to the current generation
    pub fn token(&self) -> SessionToken {
        SessionToken {
            inner: self.inner.clone(),
            generation: self.inner.counter.load(Ordering::SeqCst),
        }
    }

    /// Invalidate all outstanding tokens and return one for the new generation
    pub fn advance(&self) -> SessionToken {
        let generation = self.inner.counter.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let _guard = self.inner.lock.lock();
            self.inner.wakeup.notify_all();
        }
        SessionToken {
            inner: self.inner.clone(),
            generation,
        }
    }
}

impl Default for Generation {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle held by a loop; valid until its generation is advanced past
#[derive(Clone)]
pub struct SessionToken {
    inner: Arc<Inner>,
    generation: u64,
}

impl SessionToken {
    pub fn is_valid(&self) -> bool {
        self.inner.counter.load(Ordering::SeqCst) == self.generation
    }

    /// Sleep for up to `duration`, waking early if the token is invalidated.
    ///
    /// Returns whether the token is still valid afterwards.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut guard = self.inner.lock.lock();
        while self.is_valid() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            self.inner.wakeup.wait_for(&mut guard, deadline - now);
        }
        self.is_valid()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_token_invalidated_by_advance() {
        let generation = Generation::new();
        let old = generation.token();
        assert!(old.is_valid());

        let new = generation.advance();
        assert!(!old.is_valid());
        assert!(new.is_valid());
        assert!(generation.token().is_valid());
    }

    #[test]
    fn test_sleep_runs_full_duration_when_valid() {
        let token = Generation::new().token();
        let start = Instant::now();
        assert!(token.sleep(Duration::from_millis(50)));
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_sleep_wakes_on_advance() {
        let generation = Generation::new();
        let token = generation.token();

        let waker = {
            let generation = generation.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                generation.advance();
            })
        };

        let start = Instant::now();
        assert!(!token.sleep(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_secs(5));
        waker.join().unwrap();
    }
}
