//! Periodic timer driver
//!
//! A single callback on a fixed period, driven by the SoC's alarm
//! timebase. The callback and user token are captured at construction;
//! the period comes in at `start` and can be retuned on the fly.

use kinesis_hal::peripheral::Peripheral;
use kinesis_hal::timer::{
    PeriodicTimer, TimerCallback, TimerCapabilities, TimerError, TimerResult, TimerStats,
};

use crate::port::{PortError, TimerOps};

/// Shortest period the alarm can sustain.
const MIN_PERIOD_US: u64 = 10;

/// Longest supported period (one hour).
const MAX_PERIOD_US: u64 = 3_600_000_000;

/// Alarm-backed periodic timer.
pub struct AlarmTimer<P: TimerOps> {
    port: P,
    callback: TimerCallback,
    user: usize,
    initialized: bool,
    running: bool,
    period_us: u64,
    last_error: Option<TimerError>,
    /// Counter baselines, reset by `reset_stats`.
    expiry_base: u64,
    missed_base: u32,
}

impl<P: TimerOps> AlarmTimer<P> {
    /// Capture the callback; the alarm is created on first use.
    pub fn new(port: P, callback: TimerCallback, user: usize) -> Self {
        Self {
            port,
            callback,
            user,
            initialized: false,
            running: false,
            period_us: 0,
            last_error: None,
            expiry_base: 0,
            missed_base: 0,
        }
    }

    /// Direct access to the native port (simulation and test hook).
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    fn convert_port_error(err: PortError) -> TimerError {
        match err {
            PortError::Fail => TimerError::Failure,
            PortError::NoMem => TimerError::OutOfMemory,
            PortError::InvalidArg => TimerError::InvalidParameter,
            PortError::InvalidState => TimerError::NotRunning,
            PortError::NotFound => TimerError::InvalidParameter,
            PortError::NotSupported => TimerError::UnsupportedOperation,
            PortError::Timeout => TimerError::Failure,
            PortError::Busy => TimerError::AlreadyRunning,
        }
    }

    fn ready(&mut self) -> TimerResult<()> {
        if self.ensure_initialized().is_err() {
            return Err(TimerError::NotInitialized);
        }
        Ok(())
    }

    fn check_period(period_us: u64) -> TimerResult<()> {
        if !(MIN_PERIOD_US..=MAX_PERIOD_US).contains(&period_us) {
            return Err(TimerError::InvalidPeriod);
        }
        Ok(())
    }

    fn note<T>(&mut self, result: TimerResult<T>) -> TimerResult<T> {
        if let Err(e) = &result {
            self.last_error = Some(*e);
        }
        result
    }
}

impl<P: TimerOps> Peripheral for AlarmTimer<P> {
    type Error = TimerError;

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn initialize(&mut self) -> TimerResult<()> {
        if self.initialized {
            return Err(TimerError::AlreadyInitialized);
        }
        self.port
            .create(self.callback, self.user)
            .map_err(Self::convert_port_error)?;
        self.initialized = true;
        Ok(())
    }

    fn deinitialize(&mut self) -> TimerResult<()> {
        if !self.initialized {
            return Err(TimerError::NotInitialized);
        }
        if self.running {
            self.port.stop().map_err(Self::convert_port_error)?;
            self.running = false;
        }
        self.port.delete().map_err(Self::convert_port_error)?;
        self.initialized = false;
        Ok(())
    }
}

impl<P: TimerOps> PeriodicTimer for AlarmTimer<P> {
    fn start(&mut self, period_us: u64) -> TimerResult<()> {
        self.ready()?;
        if self.running {
            return self.note(Err(TimerError::AlreadyRunning));
        }
        Self::check_period(period_us)?;
        self.port
            .start_periodic(period_us)
            .map_err(Self::convert_port_error)?;
        self.period_us = period_us;
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) -> TimerResult<()> {
        self.ready()?;
        if !self.running {
            return self.note(Err(TimerError::NotRunning));
        }
        self.port.stop().map_err(Self::convert_port_error)?;
        self.running = false;
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn set_period(&mut self, period_us: u64) -> TimerResult<()> {
        self.ready()?;
        Self::check_period(period_us)?;
        // Valid both running and stopped; takes effect on next expiry.
        self.port
            .set_period(period_us)
            .map_err(Self::convert_port_error)?;
        self.period_us = period_us;
        Ok(())
    }

    fn period_us(&self) -> TimerResult<u64> {
        if self.period_us == 0 {
            return Err(TimerError::NotRunning);
        }
        Ok(self.period_us)
    }

    fn stats(&self) -> TimerStats {
        TimerStats {
            callback_count: self.port.expiry_count().saturating_sub(self.expiry_base),
            missed_callbacks: self.port.missed_count().saturating_sub(self.missed_base) as u64,
            last_error: self.last_error,
        }
    }

    fn reset_stats(&mut self) {
        self.expiry_base = self.port.expiry_count();
        self.missed_base = self.port.missed_count();
        self.last_error = None;
    }

    fn capabilities(&self) -> TimerCapabilities {
        TimerCapabilities {
            min_period_us: MIN_PERIOD_US,
            max_period_us: MAX_PERIOD_US,
            resolution_us: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::soft::SoftTimer;

    use core::sync::atomic::{AtomicUsize, Ordering};

    fn on_tick(_user: usize) {}

    fn timer() -> AlarmTimer<SoftTimer> {
        AlarmTimer::new(SoftTimer::new(), on_tick, 1)
    }

    #[test]
    fn test_start_fires_callbacks() {
        // Dedicated counter: this test asserts exact callback counts.
        static TICKS: AtomicUsize = AtomicUsize::new(0);
        fn counting_tick(user: usize) {
            TICKS.fetch_add(user, Ordering::Relaxed);
        }

        let mut t = AlarmTimer::new(SoftTimer::new(), counting_tick, 1);
        t.start(1000).unwrap();
        t.port_mut().fire(3);
        assert_eq!(TICKS.load(Ordering::Relaxed), 3);
        assert_eq!(t.stats().callback_count, 3);
        t.stop().unwrap();
        // Stopped timers deliver nothing
        t.port_mut().fire(2);
        assert_eq!(t.stats().callback_count, 3);
    }

    #[test]
    fn test_period_bounds() {
        let mut t = timer();
        assert_eq!(t.start(1), Err(TimerError::InvalidPeriod));
        assert_eq!(t.start(MAX_PERIOD_US + 1), Err(TimerError::InvalidPeriod));
        t.start(MIN_PERIOD_US).unwrap();
    }

    #[test]
    fn test_double_start_rejected() {
        let mut t = timer();
        t.start(1000).unwrap();
        assert_eq!(t.start(1000), Err(TimerError::AlreadyRunning));
        assert_eq!(t.stats().last_error, Some(TimerError::AlreadyRunning));
    }

    #[test]
    fn test_set_period_while_running() {
        let mut t = timer();
        t.start(1000).unwrap();
        t.set_period(500).unwrap();
        assert_eq!(t.period_us(), Ok(500));
        assert_eq!(t.port_mut().current_period(), 500);
        assert!(t.is_running());
    }

    #[test]
    fn test_set_period_while_stopped() {
        let mut t = timer();
        t.start(1000).unwrap();
        t.stop().unwrap();
        t.set_period(2000).unwrap();
        assert_eq!(t.period_us(), Ok(2000));
    }

    #[test]
    fn test_missed_callbacks_counted_once_per_overrun() {
        let mut t = timer();
        t.start(100).unwrap();
        t.port_mut().inject_missed(2);
        assert_eq!(t.stats().missed_callbacks, 2);
    }

    #[test]
    fn test_reset_stats_baselines() {
        let mut t = timer();
        t.start(100).unwrap();
        t.port_mut().fire(5);
        t.port_mut().inject_missed(1);
        t.reset_stats();
        let stats = t.stats();
        assert_eq!(stats.callback_count, 0);
        assert_eq!(stats.missed_callbacks, 0);
        t.port_mut().fire(1);
        assert_eq!(t.stats().callback_count, 1);
    }

    #[test]
    fn test_deinit_stops_timer() {
        let mut t = timer();
        t.start(100).unwrap();
        t.deinitialize().unwrap();
        assert!(!t.is_initialized());
        assert!(!t.is_running());
    }
}
