//! Shared wrapper core
//!
//! Owns the wrapped driver in an [`UnsafeCell`] guarded by a
//! [`RawSharedMutex`]: exclusive acquisition hands out `&mut`, shared
//! acquisition hands out `&`. Acquisition is bounded by a configurable
//! timeout and every path feeds the threading statistics.

use core::cell::UnsafeCell;

use portable_atomic::{AtomicU32, AtomicU64, Ordering};

use kinesis_hal::types::{TimeoutMs, TimestampUs, TIMEOUT_FOREVER, TIMEOUT_NONE};

use crate::mutex::RawSharedMutex;

/// Threading counters kept by every wrapper.
#[derive(Default)]
pub struct LockStatistics {
    total_operations: AtomicU64,
    lock_contentions: AtomicU32,
    lock_timeouts: AtomicU32,
    total_acquire_us: AtomicU64,
    max_acquire_us: AtomicU64,
    current_readers: AtomicU32,
}

/// Point-in-time copy of [`LockStatistics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LockStatsSnapshot {
    pub total_operations: u64,
    pub lock_contentions: u32,
    pub lock_timeouts: u32,
    pub average_acquire_us: u64,
    pub max_acquire_us: u64,
    pub current_readers: u32,
}

/// Microsecond source used for acquisition timing. Without one, the
/// timing columns stay at zero and only the counters move.
pub type TimeSource = fn() -> TimestampUs;

/// Driver-plus-lock composition shared by all wrappers.
pub struct SharedCore<T, M: RawSharedMutex> {
    cell: UnsafeCell<T>,
    mutex: M,
    acquire_timeout_ms: AtomicU32,
    stats: LockStatistics,
    time: Option<TimeSource>,
}

// The mutex serializes all access to the cell; T only needs to be Send.
unsafe impl<T: Send, M: RawSharedMutex> Sync for SharedCore<T, M> {}
unsafe impl<T: Send, M: RawSharedMutex> Send for SharedCore<T, M> {}

impl<T, M: RawSharedMutex> SharedCore<T, M> {
    pub fn new(inner: T) -> Self {
        Self {
            cell: UnsafeCell::new(inner),
            mutex: M::INIT,
            acquire_timeout_ms: AtomicU32::new(TIMEOUT_FOREVER),
            stats: LockStatistics::default(),
            time: None,
        }
    }

    /// Attach a microsecond source for acquisition timing.
    pub fn with_time_source(mut self, time: TimeSource) -> Self {
        self.time = Some(time);
        self
    }

    /// Consume the wrapper, returning the driver.
    pub fn into_inner(self) -> T {
        self.cell.into_inner()
    }

    pub fn set_mutex_timeout(&self, timeout: TimeoutMs) {
        self.acquire_timeout_ms.store(timeout, Ordering::Relaxed);
    }

    pub fn mutex_timeout(&self) -> TimeoutMs {
        self.acquire_timeout_ms.load(Ordering::Relaxed)
    }

    fn now(&self) -> TimestampUs {
        self.time.map(|f| f()).unwrap_or(0)
    }

    fn record_acquire(&self, started: TimestampUs) {
        let elapsed = self.now().saturating_sub(started);
        self.stats
            .total_acquire_us
            .fetch_add(elapsed, Ordering::Relaxed);
        self.stats
            .max_acquire_us
            .fetch_max(elapsed, Ordering::Relaxed);
    }

    fn acquire_exclusive(&self) -> bool {
        let started = self.now();
        if self.mutex.try_lock() {
            self.record_acquire(started);
            return true;
        }
        self.stats.lock_contentions.fetch_add(1, Ordering::Relaxed);
        let timeout = self.mutex_timeout();
        if timeout == TIMEOUT_NONE || !self.mutex.try_lock_for(timeout) {
            self.stats.lock_timeouts.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        self.record_acquire(started);
        true
    }

    fn acquire_shared(&self) -> bool {
        let started = self.now();
        if self.mutex.try_lock_shared() {
            self.record_acquire(started);
            return true;
        }
        self.stats.lock_contentions.fetch_add(1, Ordering::Relaxed);
        let timeout = self.mutex_timeout();
        if timeout == TIMEOUT_NONE || !self.mutex.try_lock_shared_for(timeout) {
            self.stats.lock_timeouts.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        self.record_acquire(started);
        true
    }

    /// Run `f` with exclusive access. `None` when the acquisition
    /// timeout elapsed.
    pub fn with_write<R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        if !self.acquire_exclusive() {
            return None;
        }
        self.stats.total_operations.fetch_add(1, Ordering::Relaxed);
        // Exclusive lock held: sole reference to the cell.
        let result = f(unsafe { &mut *self.cell.get() });
        self.mutex.unlock();
        Some(result)
    }

    /// Run `f` with shared access. `None` when the acquisition timeout
    /// elapsed.
    pub fn with_read<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        if !self.acquire_shared() {
            return None;
        }
        self.stats.total_operations.fetch_add(1, Ordering::Relaxed);
        self.stats.current_readers.fetch_add(1, Ordering::Relaxed);
        // Shared lock held: writers are excluded.
        let result = f(unsafe { &*self.cell.get() });
        self.stats.current_readers.fetch_sub(1, Ordering::Relaxed);
        self.mutex.unlock_shared();
        Some(result)
    }

    // Explicit lock surface, for composite sections coordinated by the
    // caller. The usual discipline applies: every lock paired with its
    // unlock, no reader upgrade.

    pub fn lock(&self) {
        self.mutex.lock();
    }

    pub fn try_lock(&self) -> bool {
        self.mutex.try_lock()
    }

    pub fn unlock(&self) {
        self.mutex.unlock();
    }

    pub fn lock_shared(&self) {
        self.mutex.lock_shared();
    }

    pub fn unlock_shared(&self) {
        self.mutex.unlock_shared();
    }

    pub fn lock_statistics(&self) -> LockStatsSnapshot {
        let total = self.stats.total_operations.load(Ordering::Relaxed);
        let total_us = self.stats.total_acquire_us.load(Ordering::Relaxed);
        LockStatsSnapshot {
            total_operations: total,
            lock_contentions: self.stats.lock_contentions.load(Ordering::Relaxed),
            lock_timeouts: self.stats.lock_timeouts.load(Ordering::Relaxed),
            average_acquire_us: if total > 0 { total_us / total } else { 0 },
            max_acquire_us: self.stats.max_acquire_us.load(Ordering::Relaxed),
            current_readers: self.stats.current_readers.load(Ordering::Relaxed),
        }
    }
}
