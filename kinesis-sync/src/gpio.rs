//! Thread-safe GPIO wrapper
//!
//! A recursive mutex serializes access: a task holding the explicit lock
//! can still call the forwarding operations without deadlocking, which
//! is what composite read-modify-write sections do.

use portable_atomic::{AtomicBool, Ordering};

use kinesis_hal::gpio::{
    Direction, DriveStrength, Gpio, GpioDiagnostics, GpioError, GpioResult, GpioStatistics,
    InterruptCallback, InterruptTrigger, OutputMode, PullMode,
};
use kinesis_hal::peripheral::Peripheral;
use kinesis_hal::types::TimeoutMs;

use crate::wrapper::{LockStatsSnapshot, SharedCore, TimeSource};
use crate::mutex::RawSharedMutex;

/// GPIO pin behind a recursive mutex.
pub struct SharedGpio<G: Gpio, M: RawSharedMutex> {
    core: SharedCore<G, M>,
    initialized: AtomicBool,
}

impl<G: Gpio, M: RawSharedMutex> SharedGpio<G, M> {
    /// Take exclusive ownership of a driver.
    pub fn new(inner: G) -> Self {
        let initialized = inner.is_initialized();
        Self {
            core: SharedCore::new(inner),
            initialized: AtomicBool::new(initialized),
        }
    }

    /// Attach a microsecond source for lock-acquisition timing.
    pub fn with_time_source(mut self, time: TimeSource) -> Self {
        self.core = self.core.with_time_source(time);
        self
    }

    pub fn into_inner(self) -> G {
        self.core.into_inner()
    }

    pub fn set_mutex_timeout(&self, timeout: TimeoutMs) {
        self.core.set_mutex_timeout(timeout);
    }

    fn write<R>(&self, f: impl FnOnce(&mut G) -> GpioResult<R>) -> GpioResult<R> {
        match self.core.with_write(|inner| {
            let result = f(inner);
            self.initialized
                .store(inner.is_initialized(), Ordering::Relaxed);
            result
        }) {
            Some(result) => result,
            None => Err(GpioError::Timeout),
        }
    }

    pub fn initialize(&self) -> GpioResult<()> {
        self.write(|g| g.initialize())
    }

    pub fn deinitialize(&self) -> GpioResult<()> {
        self.write(|g| g.deinitialize())
    }

    pub fn set_active(&self) -> GpioResult<()> {
        self.write(|g| g.set_active())
    }

    pub fn set_inactive(&self) -> GpioResult<()> {
        self.write(|g| g.set_inactive())
    }

    pub fn toggle(&self) -> GpioResult<()> {
        self.write(|g| g.toggle())
    }

    pub fn is_active(&self) -> GpioResult<bool> {
        self.write(|g| g.is_active())
    }

    pub fn set_level(&self, high: bool) -> GpioResult<()> {
        self.write(|g| g.set_level(high))
    }

    pub fn level(&self) -> GpioResult<bool> {
        self.write(|g| g.level())
    }

    pub fn set_direction(&self, direction: Direction) -> GpioResult<()> {
        self.write(|g| g.set_direction(direction))
    }

    pub fn set_output_mode(&self, mode: OutputMode) -> GpioResult<()> {
        self.write(|g| g.set_output_mode(mode))
    }

    pub fn set_pull_mode(&self, pull: PullMode) -> GpioResult<()> {
        self.write(|g| g.set_pull_mode(pull))
    }

    pub fn set_drive_strength(&self, strength: DriveStrength) -> GpioResult<()> {
        self.write(|g| g.set_drive_strength(strength))
    }

    pub fn verify_hardware_configuration(&self) -> GpioResult<()> {
        self.write(|g| g.verify_hardware_configuration())
    }

    pub fn configure_interrupt(
        &self,
        trigger: InterruptTrigger,
        callback: Option<InterruptCallback>,
        user: usize,
    ) -> GpioResult<()> {
        self.write(|g| g.configure_interrupt(trigger, callback, user))
    }

    pub fn enable_interrupt(&self) -> GpioResult<()> {
        self.write(|g| g.enable_interrupt())
    }

    pub fn disable_interrupt(&self) -> GpioResult<()> {
        self.write(|g| g.disable_interrupt())
    }

    pub fn wait_for_interrupt(&self, timeout: TimeoutMs) -> GpioResult<()> {
        self.write(|g| g.wait_for_interrupt(timeout))
    }

    pub fn statistics(&self) -> GpioResult<GpioStatistics> {
        self.core
            .with_read(|g| g.statistics())
            .ok_or(GpioError::Timeout)
    }

    pub fn diagnostics(&self) -> GpioResult<GpioDiagnostics> {
        self.core
            .with_read(|g| g.diagnostics())
            .ok_or(GpioError::Timeout)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Relaxed)
    }

    pub fn try_lock(&self) -> bool {
        self.core.try_lock()
    }

    pub fn lock(&self) {
        self.core.lock();
    }

    pub fn unlock(&self) {
        self.core.unlock();
    }

    /// Composite section under one acquisition.
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut G) -> R) -> GpioResult<R> {
        self.core.with_write(f).ok_or(GpioError::Timeout)
    }

    pub fn lock_statistics(&self) -> LockStatsSnapshot {
        self.core.lock_statistics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutex::StdRecursiveMutex;

    use std::sync::Arc;
    use std::thread;

    use kinesis_hal::gpio::GpioConfig;
    use kinesis_hal_esp32c6::port::soft::SoftGpio;
    use kinesis_hal_esp32c6::GpioPin;

    fn shared_pin() -> SharedGpio<GpioPin<SoftGpio>, StdRecursiveMutex> {
        SharedGpio::new(GpioPin::new(SoftGpio::new(), GpioConfig::output(8)))
    }

    #[test]
    fn test_concurrent_toggles_serialize() {
        let pin = Arc::new(shared_pin());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let pin = Arc::clone(&pin);
            handles.push(thread::spawn(move || {
                for _ in 0..25 {
                    pin.toggle().unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        // 100 toggles: back to inactive
        assert!(!pin.is_active().unwrap());
        assert_eq!(pin.statistics().unwrap().state_changes, 100);
    }

    #[test]
    fn test_recursive_lock_allows_nested_ops() {
        let pin = shared_pin();
        pin.lock();
        // The recursive mutex lets the same task re-enter
        pin.set_active().unwrap();
        assert!(pin.is_active().unwrap());
        pin.unlock();
    }

    #[test]
    fn test_lock_free_initialized_query() {
        let pin = shared_pin();
        assert!(!pin.is_initialized());
        pin.set_active().unwrap();
        pin.lock();
        assert!(pin.is_initialized());
        pin.unlock();
    }
}
