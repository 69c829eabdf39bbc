//! Blocking primitives shared by every service bridge.
//!
//! - [`Semaphore`]: counting semaphore with a saturation cap. A cap of one
//!   gives the binary semaphore that parks each worker thread.
//! - [`Completion`]: one-shot signal used by the send-style rendezvous. A
//!   second release is reported instead of silently absorbed.
//! - [`Worker`]: a named thread that runs one iteration per semaphore
//!   signal and stops when asked.
//!
//! Mutex poisoning is not treated as fatal: [`lock`] recovers the guard so
//! a panicking user callback cannot wedge the engine thread.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, warn};

use crate::error::LockError;

/// Lock a mutex, recovering the data if a previous holder panicked.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Timeout ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    Infinite,
    After(Duration),
}

impl Timeout {
    /// Wire convention: zero seconds means wait forever.
    pub fn from_secs(secs: u32) -> Self {
        if secs == 0 {
            Self::Infinite
        } else {
            Self::After(Duration::from_secs(u64::from(secs)))
        }
    }

    /// Seconds as carried in engine requests (0 = forever).
    pub fn as_secs(self) -> u32 {
        match self {
            Self::Infinite => 0,
            Self::After(d) => d.as_secs().max(1) as u32,
        }
    }
}

// ── Semaphore ─────────────────────────────────────────────────

#[derive(Debug)]
pub struct Semaphore {
    count: Mutex<usize>,
    available: Condvar,
    max: usize,
}

impl Semaphore {
    pub const fn new(initial: usize, max: usize) -> Self {
        Self {
            count: Mutex::new(initial),
            available: Condvar::new(),
            max,
        }
    }

    /// Binary semaphore, initially unsignalled.
    pub const fn binary() -> Self {
        Self::new(0, 1)
    }

    /// Add one permit and wake one waiter. Returns `false` when the count
    /// was already at its cap (the pending wake-up still covers the caller).
    pub fn signal(&self) -> bool {
        let mut count = lock(&self.count);
        if *count >= self.max {
            return false;
        }
        *count += 1;
        self.available.notify_one();
        true
    }

    /// Take one permit, blocking up to `timeout`.
    pub fn acquire(&self, timeout: Timeout) -> Result<(), LockError> {
        let count = lock(&self.count);
        let mut count = match timeout {
            Timeout::Infinite => self
                .available
                .wait_while(count, |c| *c == 0)
                .unwrap_or_else(PoisonError::into_inner),
            Timeout::After(dur) => {
                let (guard, result) = self
                    .available
                    .wait_timeout_while(count, dur, |c| *c == 0)
                    .unwrap_or_else(PoisonError::into_inner);
                if result.timed_out() && *guard == 0 {
                    return Err(LockError::Timeout);
                }
                guard
            }
        };
        *count -= 1;
        Ok(())
    }

    pub fn try_acquire(&self) -> bool {
        let mut count = lock(&self.count);
        if *count == 0 {
            return false;
        }
        *count -= 1;
        true
    }

    pub fn permits(&self) -> usize {
        *lock(&self.count)
    }
}

// ── One-shot completion ───────────────────────────────────────

#[derive(Debug)]
pub struct Completion {
    done: Semaphore,
    released: AtomicBool,
}

impl Completion {
    pub const fn new() -> Self {
        Self {
            done: Semaphore::binary(),
            released: AtomicBool::new(false),
        }
    }

    /// Release the waiter. Only the first call succeeds.
    pub fn complete(&self) -> Result<(), LockError> {
        if self.released.swap(true, Ordering::AcqRel) {
            return Err(LockError::AlreadyReleased);
        }
        self.done.signal();
        Ok(())
    }

    pub fn wait(&self, timeout: Timeout) -> Result<(), LockError> {
        self.done.acquire(timeout)
    }

    pub fn is_complete(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

impl Default for Completion {
    fn default() -> Self {
        Self::new()
    }
}

// ── Worker thread ─────────────────────────────────────────────

/// A service worker parked on its own semaphore.
pub struct Worker {
    name: &'static str,
    wake: Arc<Semaphore>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawn a thread that runs `body` once per signal on `wake`.
    pub fn spawn<F>(name: &'static str, wake: Arc<Semaphore>, mut body: F) -> io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let thread_wake = Arc::clone(&wake);

        let handle = thread::Builder::new()
            .name(name.into())
            .spawn(move || {
                debug!("{}: running", name);
                loop {
                    if thread_wake.acquire(Timeout::Infinite).is_err() {
                        continue;
                    }
                    if thread_stop.load(Ordering::Acquire) {
                        break;
                    }
                    body();
                }
                debug!("{}: stopped", name);
            })?;

        Ok(Self {
            name,
            wake,
            stop,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Ask the thread to exit and join it. A worker stopping itself (from
    /// inside a user callback) is detached instead of joined.
    pub fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.stop.store(true, Ordering::Release);
        self.wake.signal();

        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            warn!("{}: worker panicked", self.name);
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
