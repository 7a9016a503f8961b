//! Mutex adapters
//!
//! Thin trait seams over the RTOS locking primitives, with timed
//! acquisition on every flavor. The board crate adapts the kernel's
//! mutex and reader-writer lock to these traits; the `Std*` types back
//! them on the host for tests and simulation.
//!
//! Lock discipline: no reader upgrade. A thread holding a shared lock
//! must release it before asking for the exclusive lock.

use kinesis_hal::types::TimeoutMs;

/// Raw mutual-exclusion primitive with timed acquisition.
pub trait RawMutex: Send + Sync {
    /// Initial (unlocked) state.
    const INIT: Self;

    /// Block until the lock is held.
    fn lock(&self);
    /// Take the lock only if free right now.
    fn try_lock(&self) -> bool;
    /// Take the lock, giving up after `timeout`.
    fn try_lock_for(&self, timeout: TimeoutMs) -> bool;
    /// Release. Only valid on the holding thread.
    fn unlock(&self);
}

/// Reader-writer extension: many shared holders xor one exclusive.
///
/// The exclusive side is the [`RawMutex`] supertrait. A recursive mutex
/// may implement this with shared == exclusive, which degrades readers
/// to writers but keeps the wrapper code uniform.
pub trait RawSharedMutex: RawMutex {
    fn lock_shared(&self);
    fn try_lock_shared(&self) -> bool;
    fn try_lock_shared_for(&self, timeout: TimeoutMs) -> bool;
    fn unlock_shared(&self);
}

#[cfg(any(test, feature = "std"))]
mod host {
    use super::*;

    use kinesis_hal::types::{TIMEOUT_FOREVER, TIMEOUT_NONE};

    use std::sync::{Condvar, Mutex};
    use std::thread::{self, ThreadId};
    use std::time::Duration;

    fn wait_bounded<T, F: FnMut(&mut T) -> bool>(
        mutex: &Mutex<T>,
        cvar: &Condvar,
        timeout: TimeoutMs,
        mut ready: F,
    ) -> bool {
        let mut state = mutex.lock().unwrap();
        if ready(&mut state) {
            return true;
        }
        if timeout == TIMEOUT_NONE {
            return false;
        }
        if timeout == TIMEOUT_FOREVER {
            loop {
                state = cvar.wait(state).unwrap();
                if ready(&mut state) {
                    return true;
                }
            }
        }
        let deadline = Duration::from_millis(timeout as u64);
        let start = std::time::Instant::now();
        loop {
            let elapsed = start.elapsed();
            if elapsed >= deadline {
                return false;
            }
            let (next, _) = cvar.wait_timeout(state, deadline - elapsed).unwrap();
            state = next;
            if ready(&mut state) {
                return true;
            }
        }
    }

    /// Plain host mutex with timed acquisition.
    pub struct StdRawMutex {
        locked: Mutex<bool>,
        cvar: Condvar,
    }

    impl RawMutex for StdRawMutex {
        const INIT: Self = Self {
            locked: Mutex::new(false),
            cvar: Condvar::new(),
        };

        fn lock(&self) {
            let _ = self.try_lock_for(TIMEOUT_FOREVER);
        }

        fn try_lock(&self) -> bool {
            self.try_lock_for(TIMEOUT_NONE)
        }

        fn try_lock_for(&self, timeout: TimeoutMs) -> bool {
            wait_bounded(&self.locked, &self.cvar, timeout, |locked| {
                if *locked {
                    false
                } else {
                    *locked = true;
                    true
                }
            })
        }

        fn unlock(&self) {
            let mut locked = self.locked.lock().unwrap();
            *locked = false;
            drop(locked);
            self.cvar.notify_one();
        }
    }

    struct RecursiveState {
        owner: Option<ThreadId>,
        depth: usize,
    }

    /// Host recursive mutex: nested acquisition on the owning thread.
    pub struct StdRecursiveMutex {
        state: Mutex<RecursiveState>,
        cvar: Condvar,
    }

    impl RawMutex for StdRecursiveMutex {
        const INIT: Self = Self {
            state: Mutex::new(RecursiveState {
                owner: None,
                depth: 0,
            }),
            cvar: Condvar::new(),
        };

        fn lock(&self) {
            let _ = self.try_lock_for(TIMEOUT_FOREVER);
        }

        fn try_lock(&self) -> bool {
            self.try_lock_for(TIMEOUT_NONE)
        }

        fn try_lock_for(&self, timeout: TimeoutMs) -> bool {
            let me = thread::current().id();
            wait_bounded(&self.state, &self.cvar, timeout, |state| {
                match state.owner {
                    None => {
                        state.owner = Some(me);
                        state.depth = 1;
                        true
                    }
                    Some(owner) if owner == me => {
                        state.depth += 1;
                        true
                    }
                    Some(_) => false,
                }
            })
        }

        fn unlock(&self) {
            let mut state = self.state.lock().unwrap();
            if state.owner == Some(thread::current().id()) {
                state.depth -= 1;
                if state.depth == 0 {
                    state.owner = None;
                    drop(state);
                    self.cvar.notify_one();
                }
            }
        }
    }

    // Recursive mutexes serve the simple peripherals, where "shared"
    // access is just another exclusive section.
    impl RawSharedMutex for StdRecursiveMutex {
        fn lock_shared(&self) {
            self.lock();
        }

        fn try_lock_shared(&self) -> bool {
            self.try_lock()
        }

        fn try_lock_shared_for(&self, timeout: TimeoutMs) -> bool {
            self.try_lock_for(timeout)
        }

        fn unlock_shared(&self) {
            self.unlock();
        }
    }

    struct RwState {
        readers: usize,
        writer: bool,
    }

    /// Host reader-writer mutex with timed acquisition on both sides.
    pub struct StdSharedMutex {
        state: Mutex<RwState>,
        cvar: Condvar,
    }

    impl RawMutex for StdSharedMutex {
        const INIT: Self = Self {
            state: Mutex::new(RwState {
                readers: 0,
                writer: false,
            }),
            cvar: Condvar::new(),
        };

        fn lock(&self) {
            let _ = self.try_lock_for(TIMEOUT_FOREVER);
        }

        fn try_lock(&self) -> bool {
            self.try_lock_for(TIMEOUT_NONE)
        }

        fn try_lock_for(&self, timeout: TimeoutMs) -> bool {
            wait_bounded(&self.state, &self.cvar, timeout, |state| {
                if state.writer || state.readers > 0 {
                    false
                } else {
                    state.writer = true;
                    true
                }
            })
        }

        fn unlock(&self) {
            let mut state = self.state.lock().unwrap();
            state.writer = false;
            drop(state);
            self.cvar.notify_all();
        }
    }

    impl RawSharedMutex for StdSharedMutex {
        fn lock_shared(&self) {
            let _ = self.try_lock_shared_for(TIMEOUT_FOREVER);
        }

        fn try_lock_shared(&self) -> bool {
            self.try_lock_shared_for(TIMEOUT_NONE)
        }

        fn try_lock_shared_for(&self, timeout: TimeoutMs) -> bool {
            wait_bounded(&self.state, &self.cvar, timeout, |state| {
                if state.writer {
                    false
                } else {
                    state.readers += 1;
                    true
                }
            })
        }

        fn unlock_shared(&self) {
            let mut state = self.state.lock().unwrap();
            state.readers = state.readers.saturating_sub(1);
            if state.readers == 0 {
                drop(state);
                self.cvar.notify_all();
            }
        }
    }
}

#[cfg(any(test, feature = "std"))]
pub use host::{StdRawMutex, StdRecursiveMutex, StdSharedMutex};

#[cfg(test)]
mod tests {
    use super::*;

    use kinesis_hal::types::TIMEOUT_FOREVER;

    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_plain_mutex_excludes() {
        let mutex = StdRawMutex::INIT;
        assert!(mutex.try_lock());
        assert!(!mutex.try_lock());
        mutex.unlock();
        assert!(mutex.try_lock());
        mutex.unlock();
    }

    #[test]
    fn test_timed_acquisition_times_out() {
        let mutex = Arc::new(StdRawMutex::INIT);
        mutex.lock();
        let contender = Arc::clone(&mutex);
        let handle = thread::spawn(move || contender.try_lock_for(20));
        assert!(!handle.join().unwrap());
        mutex.unlock();
    }

    #[test]
    fn test_recursive_reentry_same_thread() {
        let mutex = StdRecursiveMutex::INIT;
        assert!(mutex.try_lock());
        assert!(mutex.try_lock());
        mutex.unlock();
        // Still held after one unlock
        let m = &mutex;
        std::thread::scope(|s| {
            let other = s.spawn(move || m.try_lock());
            assert!(!other.join().unwrap());
        });
        mutex.unlock();
    }

    #[test]
    fn test_rwlock_readers_coexist() {
        let mutex = StdSharedMutex::INIT;
        assert!(mutex.try_lock_shared());
        assert!(mutex.try_lock_shared());
        // Writer blocked while readers hold
        assert!(!mutex.try_lock());
        mutex.unlock_shared();
        mutex.unlock_shared();
        assert!(mutex.try_lock());
        // Reader blocked by the writer
        assert!(!mutex.try_lock_shared());
        mutex.unlock();
    }

    #[test]
    fn test_rwlock_writer_handoff() {
        let mutex = Arc::new(StdSharedMutex::INIT);
        mutex.lock_shared();
        let writer = Arc::clone(&mutex);
        let handle = thread::spawn(move || {
            let ok = writer.try_lock_for(TIMEOUT_FOREVER);
            if ok {
                writer.unlock();
            }
            ok
        });
        // Give the writer a moment to park, then release
        thread::sleep(std::time::Duration::from_millis(10));
        mutex.unlock_shared();
        assert!(handle.join().unwrap());
    }
}
