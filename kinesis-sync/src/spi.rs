//! Thread-safe SPI wrapper
//!
//! Transfers serialize on the recursive mutex; the CS-held sequence form
//! keeps both the lock and the chip select for the whole run, so no
//! other task can slip a transfer inside a device conversation.

use portable_atomic::{AtomicBool, Ordering};

use kinesis_hal::peripheral::Peripheral;
use kinesis_hal::spi::{
    SpiBus, SpiDiagnostics, SpiError, SpiMode, SpiResult, SpiStatistics, SpiTransfer,
};
use kinesis_hal::types::{FrequencyHz, TimeoutMs};

use crate::wrapper::{LockStatsSnapshot, SharedCore, TimeSource};
use crate::mutex::RawSharedMutex;

/// SPI master behind a recursive mutex.
pub struct SharedSpi<S: SpiBus, M: RawSharedMutex> {
    core: SharedCore<S, M>,
    initialized: AtomicBool,
}

impl<S: SpiBus, M: RawSharedMutex> SharedSpi<S, M> {
    /// Take exclusive ownership of a driver.
    pub fn new(inner: S) -> Self {
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

    pub fn into_inner(self) -> S {
        self.core.into_inner()
    }

    pub fn set_mutex_timeout(&self, timeout: TimeoutMs) {
        self.core.set_mutex_timeout(timeout);
    }

    fn write_op<R>(&self, f: impl FnOnce(&mut S) -> SpiResult<R>) -> SpiResult<R> {
        match self.core.with_write(|inner| {
            let result = f(inner);
            self.initialized
                .store(inner.is_initialized(), Ordering::Relaxed);
            result
        }) {
            Some(result) => result,
            None => Err(SpiError::Timeout),
        }
    }

    pub fn initialize(&self) -> SpiResult<()> {
        self.write_op(|s| s.initialize())
    }

    pub fn deinitialize(&self) -> SpiResult<()> {
        self.write_op(|s| s.deinitialize())
    }

    pub fn transfer(&self, tx: &[u8], rx: &mut [u8], timeout: TimeoutMs) -> SpiResult<()> {
        self.write_op(|s| s.transfer(tx, rx, timeout))
    }

    pub fn write(&self, tx: &[u8], timeout: TimeoutMs) -> SpiResult<()> {
        self.write_op(|s| s.write(tx, timeout))
    }

    pub fn read(&self, rx: &mut [u8], timeout: TimeoutMs) -> SpiResult<()> {
        self.write_op(|s| s.read(rx, timeout))
    }

    /// Run a CS-held sequence under one lock acquisition.
    pub fn transfer_sequence(&self, transfers: &mut [SpiTransfer<'_>]) -> SpiResult<()> {
        self.write_op(|s| s.transfer_sequence(transfers))
    }

    pub fn write_register(&self, register: u8, data: &[u8]) -> SpiResult<()> {
        self.write_op(|s| s.write_register(register, data))
    }

    pub fn read_register(&self, register: u8, out: &mut [u8]) -> SpiResult<()> {
        self.write_op(|s| s.read_register(register, out))
    }

    pub fn set_clock_speed(&self, speed_hz: FrequencyHz) -> SpiResult<()> {
        self.write_op(|s| s.set_clock_speed(speed_hz))
    }

    pub fn set_mode(&self, mode: SpiMode) -> SpiResult<()> {
        self.write_op(|s| s.set_mode(mode))
    }

    pub fn statistics(&self) -> SpiResult<SpiStatistics> {
        self.core
            .with_read(|s| s.statistics())
            .ok_or(SpiError::Timeout)
    }

    pub fn diagnostics(&self) -> SpiResult<SpiDiagnostics> {
        self.core
            .with_read(|s| s.diagnostics())
            .ok_or(SpiError::Timeout)
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
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut S) -> R) -> SpiResult<R> {
        self.core.with_write(f).ok_or(SpiError::Timeout)
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

    use kinesis_hal::spi::SpiConfig;
    use kinesis_hal_esp32c6::port::soft::SoftSpi;
    use kinesis_hal_esp32c6::SpiMaster;

    fn shared_host() -> SharedSpi<SpiMaster<SoftSpi>, StdRecursiveMutex> {
        let config = SpiConfig {
            mosi_pin: 1,
            miso_pin: 2,
            sclk_pin: 3,
            cs_pin: 4,
            ..SpiConfig::default()
        };
        SharedSpi::new(SpiMaster::new(SoftSpi::new(), config))
    }

    #[test]
    fn test_concurrent_transfers() {
        let spi = Arc::new(shared_host());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let spi = Arc::clone(&spi);
            handles.push(thread::spawn(move || {
                let tx = [0x5A; 4];
                let mut rx = [0u8; 4];
                for _ in 0..25 {
                    spi.transfer(&tx, &mut rx, 100).unwrap();
                    assert_eq!(rx, tx);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(spi.statistics().unwrap().successful_transfers, 100);
    }

    #[test]
    fn test_sequence_holds_lock_and_cs() {
        let spi = shared_host();
        spi.initialize().unwrap();
        let tx = [1u8, 2, 3];
        let mut steps = [SpiTransfer {
            tx: Some(&tx),
            rx: None,
            cs_hold_us: 10,
        }];
        spi.transfer_sequence(&mut steps).unwrap();
        assert!(!spi.with_lock(|s| s.is_chip_select_active()).unwrap());
    }
}
