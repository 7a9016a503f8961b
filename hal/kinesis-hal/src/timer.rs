//! Periodic timer contract
//!
//! A single callback invoked at a fixed period from the driver's timer
//! task. The callback must not block; a tick that lands while the
//! previous callback is still running increments the missed counter by
//! exactly one, no matter how many ticks were coalesced.

use crate::peripheral::Peripheral;

/// Timer error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerError {
    Failure,
    NotInitialized,
    AlreadyInitialized,
    InvalidParameter,
    NullPointer,
    OutOfMemory,
    AlreadyRunning,
    NotRunning,
    /// Period outside `[min_period_us, max_period_us]`.
    InvalidPeriod,
    HardwareFault,
    UnsupportedOperation,
}

impl TimerError {
    /// Human-readable description of the error kind.
    pub const fn description(self) -> &'static str {
        match self {
            TimerError::Failure => "General failure",
            TimerError::NotInitialized => "Not initialized",
            TimerError::AlreadyInitialized => "Already initialized",
            TimerError::InvalidParameter => "Invalid parameter",
            TimerError::NullPointer => "Null pointer",
            TimerError::OutOfMemory => "Out of memory",
            TimerError::AlreadyRunning => "Already running",
            TimerError::NotRunning => "Not running",
            TimerError::InvalidPeriod => "Invalid period",
            TimerError::HardwareFault => "Hardware fault",
            TimerError::UnsupportedOperation => "Unsupported operation",
        }
    }
}

impl core::fmt::Display for TimerError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.description())
    }
}

/// Result alias for timer operations.
pub type TimerResult<T> = Result<T, TimerError>;

/// Timer callback, driver timer-task context.
pub type TimerCallback = fn(user: usize);

/// Native timebase bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimerCapabilities {
    pub min_period_us: u64,
    pub max_period_us: u64,
    /// Timebase granularity.
    pub resolution_us: u64,
}

/// Callback counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimerStats {
    pub callback_count: u64,
    pub missed_callbacks: u64,
    pub last_error: Option<TimerError>,
}

/// Periodic timer contract.
pub trait PeriodicTimer: Peripheral<Error = TimerError> {
    /// Arm the timer. Fails with `AlreadyRunning` on a running timer.
    fn start(&mut self, period_us: u64) -> TimerResult<()>;
    /// Disarm; pending expiries are cancelled.
    fn stop(&mut self) -> TimerResult<()>;
    fn is_running(&self) -> bool;

    /// Valid running or stopped; takes effect on the next expiry.
    fn set_period(&mut self, period_us: u64) -> TimerResult<()>;
    fn period_us(&self) -> TimerResult<u64>;

    fn stats(&self) -> TimerStats;
    fn reset_stats(&mut self);
    fn capabilities(&self) -> TimerCapabilities;
}
