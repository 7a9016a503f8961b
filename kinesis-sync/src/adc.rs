//! Thread-safe ADC wrapper
//!
//! Reader-writer discipline like the CAN wrapper: conversions go through
//! the exclusive lock (they touch driver statistics), snapshots ride the
//! shared side, and the batch read acquires the lock once.

use portable_atomic::{AtomicBool, Ordering};

use kinesis_hal::adc::{
    Adc, AdcAttenuation, AdcChannelConfig, AdcContinuousCallback, AdcContinuousConfig,
    AdcDiagnostics, AdcError, AdcResult, AdcStatistics,
};
use kinesis_hal::peripheral::Peripheral;
use kinesis_hal::types::{ChannelId, TimeoutMs};

use crate::wrapper::{LockStatsSnapshot, SharedCore, TimeSource};
use crate::mutex::RawSharedMutex;

/// ADC unit behind a reader-writer mutex.
pub struct SharedAdc<A: Adc, M: RawSharedMutex> {
    core: SharedCore<A, M>,
    initialized: AtomicBool,
    continuous_running: AtomicBool,
}

impl<A: Adc, M: RawSharedMutex> SharedAdc<A, M> {
    /// Take exclusive ownership of a driver.
    pub fn new(inner: A) -> Self {
        let initialized = inner.is_initialized();
        Self {
            core: SharedCore::new(inner),
            initialized: AtomicBool::new(initialized),
            continuous_running: AtomicBool::new(false),
        }
    }

    /// Attach a microsecond source for lock-acquisition timing.
    pub fn with_time_source(mut self, time: TimeSource) -> Self {
        self.core = self.core.with_time_source(time);
        self
    }

    pub fn into_inner(self) -> A {
        self.core.into_inner()
    }

    pub fn set_mutex_timeout(&self, timeout: TimeoutMs) {
        self.core.set_mutex_timeout(timeout);
    }

    fn write<R>(&self, f: impl FnOnce(&mut A) -> AdcResult<R>) -> AdcResult<R> {
        match self.core.with_write(|inner| {
            let result = f(inner);
            self.initialized
                .store(inner.is_initialized(), Ordering::Relaxed);
            self.continuous_running
                .store(inner.is_continuous_running(), Ordering::Relaxed);
            result
        }) {
            Some(result) => result,
            None => Err(AdcError::Timeout),
        }
    }

    fn read<R>(&self, f: impl FnOnce(&A) -> R) -> AdcResult<R> {
        self.core.with_read(f).ok_or(AdcError::Timeout)
    }

    pub fn initialize(&self) -> AdcResult<()> {
        self.write(|a| a.initialize())
    }

    pub fn deinitialize(&self) -> AdcResult<()> {
        self.write(|a| a.deinitialize())
    }

    pub fn configure_channel(&self, channel: ChannelId, config: AdcChannelConfig) -> AdcResult<()> {
        self.write(|a| a.configure_channel(channel, config))
    }

    pub fn enable_channel(&self, channel: ChannelId) -> AdcResult<()> {
        self.write(|a| a.enable_channel(channel))
    }

    pub fn disable_channel(&self, channel: ChannelId) -> AdcResult<()> {
        self.write(|a| a.disable_channel(channel))
    }

    pub fn read_raw(&self, channel: ChannelId) -> AdcResult<u16> {
        self.write(|a| a.read_raw(channel))
    }

    pub fn read_voltage(&self, channel: ChannelId) -> AdcResult<u32> {
        self.write(|a| a.read_voltage(channel))
    }

    pub fn read_averaged(
        &self,
        channel: ChannelId,
        samples: u16,
        interval_ms: u32,
    ) -> AdcResult<u16> {
        self.write(|a| a.read_averaged(channel, samples, interval_ms))
    }

    /// Convert a whole channel set under one lock acquisition.
    pub fn read_voltage_batch(
        &self,
        channels: &[ChannelId],
        voltages: &mut [u32],
    ) -> AdcResult<()> {
        if voltages.len() < channels.len() {
            return Err(AdcError::InvalidParameter);
        }
        self.write(|a| {
            for (i, &channel) in channels.iter().enumerate() {
                voltages[i] = a.read_voltage(channel)?;
            }
            Ok(())
        })
    }

    pub fn initialize_calibration(&self, attenuation: AdcAttenuation) -> AdcResult<()> {
        self.write(|a| a.initialize_calibration(attenuation))
    }

    pub fn raw_to_voltage(&self, raw: u16, attenuation: AdcAttenuation) -> AdcResult<u32> {
        self.read(|a| a.raw_to_voltage(raw, attenuation))?
    }

    pub fn configure_continuous(&self, config: AdcContinuousConfig) -> AdcResult<()> {
        self.write(|a| a.configure_continuous(config))
    }

    pub fn set_continuous_callback(
        &self,
        callback: AdcContinuousCallback,
        user: usize,
    ) -> AdcResult<()> {
        self.write(|a| {
            a.set_continuous_callback(callback, user);
            Ok(())
        })
    }

    pub fn start_continuous(&self) -> AdcResult<()> {
        self.write(|a| a.start_continuous())
    }

    pub fn stop_continuous(&self) -> AdcResult<()> {
        self.write(|a| a.stop_continuous())
    }

    pub fn statistics(&self) -> AdcResult<AdcStatistics> {
        self.read(|a| a.statistics())
    }

    pub fn diagnostics(&self) -> AdcResult<AdcDiagnostics> {
        self.read(|a| a.diagnostics())
    }

    // --- Lock-free queries ---

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Relaxed)
    }

    pub fn is_continuous_running(&self) -> bool {
        self.continuous_running.load(Ordering::Relaxed)
    }

    // --- Explicit locking ---

    pub fn try_lock(&self) -> bool {
        self.core.try_lock()
    }

    pub fn lock(&self) {
        self.core.lock();
    }

    pub fn unlock(&self) {
        self.core.unlock();
    }

    pub fn lock_shared(&self) {
        self.core.lock_shared();
    }

    pub fn unlock_shared(&self) {
        self.core.unlock_shared();
    }

    /// Composite section under one exclusive acquisition.
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut A) -> R) -> AdcResult<R> {
        self.core.with_write(f).ok_or(AdcError::Timeout)
    }

    pub fn lock_statistics(&self) -> LockStatsSnapshot {
        self.core.lock_statistics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutex::StdSharedMutex;

    use std::sync::Arc;
    use std::thread;

    use kinesis_hal::adc::AdcConfig;
    use kinesis_hal_esp32c6::port::soft::SoftAdc;
    use kinesis_hal_esp32c6::AdcUnit;

    fn shared_unit() -> SharedAdc<AdcUnit<SoftAdc>, StdSharedMutex> {
        let adc = SharedAdc::new(AdcUnit::new(SoftAdc::new(), AdcConfig::default()));
        adc.configure_channel(0, AdcChannelConfig::default()).unwrap();
        adc.enable_channel(0).unwrap();
        adc.with_lock(|a| a.port_mut().set_channel_raw(0, 2048))
            .unwrap();
        adc
    }

    #[test]
    fn test_concurrent_reads() {
        let adc = Arc::new(shared_unit());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let adc = Arc::clone(&adc);
            handles.push(thread::spawn(move || {
                for _ in 0..25 {
                    assert_eq!(adc.read_raw(0).unwrap(), 2048);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(adc.statistics().unwrap().successful_conversions, 100);
    }

    #[test]
    fn test_voltage_batch_single_lock() {
        let adc = shared_unit();
        adc.configure_channel(1, AdcChannelConfig::default()).unwrap();
        adc.enable_channel(1).unwrap();
        let mut voltages = [0u32; 2];
        adc.read_voltage_batch(&[0, 1], &mut voltages).unwrap();
        assert!(voltages[0] > 0);
    }

    #[test]
    fn test_continuous_flag_lock_free() {
        let adc = shared_unit();
        assert!(!adc.is_continuous_running());
        adc.start_continuous().unwrap();
        assert!(adc.is_continuous_running());
        adc.stop_continuous().unwrap();
        assert!(!adc.is_continuous_running());
    }

    #[test]
    fn test_lock_timeout_maps_to_adc_timeout() {
        let adc = Arc::new(shared_unit());
        adc.set_mutex_timeout(10);
        adc.lock();
        let contender = Arc::clone(&adc);
        let result = thread::spawn(move || contender.read_raw(0)).join().unwrap();
        assert_eq!(result, Err(AdcError::Timeout));
        adc.unlock();
    }
}
