//! Thread-safe I2C wrapper
//!
//! One bus transaction at a time, enforced by the recursive mutex. The
//! multi-register batch holds the lock across all element writes so
//! another task's traffic cannot land between them.

use portable_atomic::{AtomicBool, Ordering};

use kinesis_hal::i2c::{
    I2cBus, I2cDeviceConfig, I2cDiagnostics, I2cError, I2cResult, I2cStatistics,
};
use kinesis_hal::peripheral::Peripheral;
use kinesis_hal::types::TimeoutMs;

use crate::wrapper::{LockStatsSnapshot, SharedCore, TimeSource};
use crate::mutex::RawSharedMutex;

/// I2C master behind a recursive mutex.
pub struct SharedI2c<B: I2cBus, M: RawSharedMutex> {
    core: SharedCore<B, M>,
    initialized: AtomicBool,
}

impl<B: I2cBus, M: RawSharedMutex> SharedI2c<B, M> {
    /// Take exclusive ownership of a driver.
    pub fn new(inner: B) -> Self {
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

    pub fn into_inner(self) -> B {
        self.core.into_inner()
    }

    pub fn set_mutex_timeout(&self, timeout: TimeoutMs) {
        self.core.set_mutex_timeout(timeout);
    }

    fn write_op<R>(&self, f: impl FnOnce(&mut B) -> I2cResult<R>) -> I2cResult<R> {
        match self.core.with_write(|inner| {
            let result = f(inner);
            self.initialized
                .store(inner.is_initialized(), Ordering::Relaxed);
            result
        }) {
            Some(result) => result,
            None => Err(I2cError::Timeout),
        }
    }

    pub fn initialize(&self) -> I2cResult<()> {
        self.write_op(|b| b.initialize())
    }

    pub fn deinitialize(&self) -> I2cResult<()> {
        self.write_op(|b| b.deinitialize())
    }

    pub fn write(&self, address: u16, data: &[u8], timeout: TimeoutMs) -> I2cResult<()> {
        self.write_op(|b| b.write(address, data, timeout))
    }

    pub fn read(&self, address: u16, buf: &mut [u8], timeout: TimeoutMs) -> I2cResult<()> {
        self.write_op(|b| b.read(address, buf, timeout))
    }

    pub fn write_read(
        &self,
        address: u16,
        tx: &[u8],
        rx: &mut [u8],
        timeout: TimeoutMs,
    ) -> I2cResult<()> {
        self.write_op(|b| b.write_read(address, tx, rx, timeout))
    }

    pub fn write_register(&self, address: u16, register: u8, value: u8) -> I2cResult<()> {
        self.write_op(|b| b.write_register(address, register, value))
    }

    pub fn read_register(&self, address: u16, register: u8) -> I2cResult<u8> {
        self.write_op(|b| b.read_register(address, register))
    }

    /// Write a set of register/value pairs under one lock acquisition.
    pub fn write_multiple_registers(
        &self,
        address: u16,
        pairs: &[(u8, u8)],
    ) -> I2cResult<()> {
        self.write_op(|b| {
            for &(register, value) in pairs {
                b.write_register(address, register, value)?;
            }
            Ok(())
        })
    }

    pub fn probe_device(&self, address: u16) -> I2cResult<bool> {
        self.write_op(|b| b.probe_device(address))
    }

    pub fn scan_devices(&self, found: &mut [u16], first: u8, last: u8) -> I2cResult<usize> {
        self.write_op(|b| b.scan_devices(found, first, last))
    }

    pub fn add_device(&self, config: I2cDeviceConfig) -> I2cResult<()> {
        self.write_op(|b| b.add_device(config))
    }

    pub fn statistics(&self) -> I2cResult<I2cStatistics> {
        self.core
            .with_read(|b| b.statistics())
            .ok_or(I2cError::Timeout)
    }

    pub fn diagnostics(&self) -> I2cResult<I2cDiagnostics> {
        self.core
            .with_read(|b| b.diagnostics())
            .ok_or(I2cError::Timeout)
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
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut B) -> R) -> I2cResult<R> {
        self.core.with_write(f).ok_or(I2cError::Timeout)
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

    use kinesis_hal::i2c::I2cConfig;
    use kinesis_hal_esp32c6::port::soft::SoftI2c;
    use kinesis_hal_esp32c6::I2cMaster;

    fn shared_bus() -> SharedI2c<I2cMaster<SoftI2c>, StdRecursiveMutex> {
        let mut port = SoftI2c::new();
        port.add_sim_device(0x48, false);
        let config = I2cConfig {
            scl_pin: 6,
            sda_pin: 7,
            ..I2cConfig::default()
        };
        SharedI2c::new(I2cMaster::new(port, config))
    }

    #[test]
    fn test_concurrent_register_writes() {
        let i2c = Arc::new(shared_bus());
        let mut handles = Vec::new();
        for t in 0..4u8 {
            let i2c = Arc::clone(&i2c);
            handles.push(thread::spawn(move || {
                for i in 0..10 {
                    i2c.write_register(0x48, t, i).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(i2c.statistics().unwrap().successful_transactions, 40);
    }

    #[test]
    fn test_multi_register_batch() {
        let i2c = shared_bus();
        i2c.write_multiple_registers(0x48, &[(0x00, 1), (0x01, 2), (0x02, 3)])
            .unwrap();
        assert_eq!(i2c.read_register(0x48, 0x01), Ok(2));
    }

    #[test]
    fn test_shared_scan() {
        let i2c = shared_bus();
        let mut found = [0u16; 4];
        assert_eq!(i2c.scan_devices(&mut found, 0x08, 0x77), Ok(1));
        assert_eq!(found[0], 0x48);
    }
}
