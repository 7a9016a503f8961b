//! Thread-safe PWM wrapper
//!
//! Duty updates from control loops serialize on the recursive mutex; the
//! multi-channel batch holds the lock once so a set of outputs changes
//! as a group.

use portable_atomic::{AtomicBool, Ordering};

use kinesis_hal::peripheral::Peripheral;
use kinesis_hal::pwm::{
    Pwm, PwmChannelConfig, PwmChannelStatus, PwmDiagnostics, PwmError, PwmResult, PwmStatistics,
};
use kinesis_hal::types::{ChannelId, FrequencyHz, TimeoutMs};

use crate::wrapper::{LockStatsSnapshot, SharedCore, TimeSource};
use crate::mutex::RawSharedMutex;

/// PWM block behind a recursive mutex.
pub struct SharedPwm<P: Pwm, M: RawSharedMutex> {
    core: SharedCore<P, M>,
    initialized: AtomicBool,
}

impl<P: Pwm, M: RawSharedMutex> SharedPwm<P, M> {
    /// Take exclusive ownership of a driver.
    pub fn new(inner: P) -> Self {
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

    pub fn into_inner(self) -> P {
        self.core.into_inner()
    }

    pub fn set_mutex_timeout(&self, timeout: TimeoutMs) {
        self.core.set_mutex_timeout(timeout);
    }

    fn write_op<R>(&self, f: impl FnOnce(&mut P) -> PwmResult<R>) -> PwmResult<R> {
        match self.core.with_write(|inner| {
            let result = f(inner);
            self.initialized
                .store(inner.is_initialized(), Ordering::Relaxed);
            result
        }) {
            Some(result) => result,
            None => Err(PwmError::Timeout),
        }
    }

    pub fn initialize(&self) -> PwmResult<()> {
        self.write_op(|p| p.initialize())
    }

    pub fn deinitialize(&self) -> PwmResult<()> {
        self.write_op(|p| p.deinitialize())
    }

    pub fn configure_channel(&self, channel: ChannelId, config: PwmChannelConfig) -> PwmResult<()> {
        self.write_op(|p| p.configure_channel(channel, config))
    }

    pub fn enable_channel(&self, channel: ChannelId) -> PwmResult<()> {
        self.write_op(|p| p.enable_channel(channel))
    }

    pub fn disable_channel(&self, channel: ChannelId) -> PwmResult<()> {
        self.write_op(|p| p.disable_channel(channel))
    }

    pub fn set_duty_cycle(&self, channel: ChannelId, duty: f32) -> PwmResult<()> {
        self.write_op(|p| p.set_duty_cycle(channel, duty))
    }

    pub fn set_duty_cycle_raw(&self, channel: ChannelId, raw: u32) -> PwmResult<()> {
        self.write_op(|p| p.set_duty_cycle_raw(channel, raw))
    }

    /// Update a set of channels under one lock acquisition.
    pub fn set_multiple_duty_cycles(&self, updates: &[(ChannelId, f32)]) -> PwmResult<()> {
        self.write_op(|p| {
            for &(channel, duty) in updates {
                p.set_duty_cycle(channel, duty)?;
            }
            Ok(())
        })
    }

    pub fn set_frequency(&self, channel: ChannelId, frequency_hz: FrequencyHz) -> PwmResult<()> {
        self.write_op(|p| p.set_frequency(channel, frequency_hz))
    }

    pub fn start_all(&self) -> PwmResult<()> {
        self.write_op(|p| p.start_all())
    }

    pub fn stop_all(&self) -> PwmResult<()> {
        self.write_op(|p| p.stop_all())
    }

    pub fn set_hardware_fade(
        &self,
        channel: ChannelId,
        target_duty: f32,
        fade_ms: u32,
    ) -> PwmResult<()> {
        self.write_op(|p| p.set_hardware_fade(channel, target_duty, fade_ms))
    }

    pub fn channel_status(&self, channel: ChannelId) -> PwmResult<PwmChannelStatus> {
        self.core
            .with_read(|p| p.channel_status(channel))
            .ok_or(PwmError::Timeout)?
    }

    pub fn statistics(&self) -> PwmResult<PwmStatistics> {
        self.core
            .with_read(|p| p.statistics())
            .ok_or(PwmError::Timeout)
    }

    pub fn diagnostics(&self) -> PwmResult<PwmDiagnostics> {
        self.core
            .with_read(|p| p.diagnostics())
            .ok_or(PwmError::Timeout)
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
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut P) -> R) -> PwmResult<R> {
        self.core.with_write(f).ok_or(PwmError::Timeout)
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

    use kinesis_hal_esp32c6::port::soft::SoftLedc;
    use kinesis_hal_esp32c6::LedcPwm;

    fn shared_block() -> SharedPwm<LedcPwm<SoftLedc>, StdRecursiveMutex> {
        let pwm = SharedPwm::new(LedcPwm::new(SoftLedc::new()));
        for channel in 0..2 {
            pwm.configure_channel(
                channel,
                PwmChannelConfig {
                    output_pin: 4 + channel as i32,
                    frequency_hz: 5_000,
                    resolution_bits: 10,
                    ..PwmChannelConfig::default()
                },
            )
            .unwrap();
        }
        pwm
    }

    #[test]
    fn test_concurrent_duty_updates() {
        let pwm = Arc::new(shared_block());
        let mut handles = Vec::new();
        for channel in 0..2u32 {
            let pwm = Arc::clone(&pwm);
            handles.push(thread::spawn(move || {
                for step in 0..50 {
                    pwm.set_duty_cycle(channel, step as f32 / 50.0).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(pwm.statistics().unwrap().duty_updates, 100);
    }

    #[test]
    fn test_duty_batch_single_lock() {
        let pwm = shared_block();
        pwm.set_multiple_duty_cycles(&[(0, 0.25), (1, 0.75)]).unwrap();
        let s0 = pwm.channel_status(0).unwrap();
        let s1 = pwm.channel_status(1).unwrap();
        assert!((s0.duty - 0.25).abs() < 0.01);
        assert!((s1.duty - 0.75).abs() < 0.01);
    }

    #[test]
    fn test_invalid_raw_duty_propagates() {
        let pwm = shared_block();
        assert_eq!(
            pwm.set_duty_cycle_raw(0, 5000),
            Err(PwmError::InvalidParameter)
        );
    }
}
