//! PWM contract (LEDC-style block)
//!
//! Eight channels share four timers. A timer is shared only by channels
//! running at the same frequency and resolution; a channel's raw duty is
//! always within `[0, 2^resolution)`. Complementary pairs share a timer
//! and keep their edges apart by the configured dead time.

use crate::peripheral::Peripheral;
use crate::types::{ChannelId, FrequencyHz, PinNumber, TimestampUs, INVALID_PIN};

/// PWM error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PwmError {
    Failure,
    NotInitialized,
    AlreadyInitialized,
    InvalidParameter,
    NullPointer,
    OutOfMemory,
    InvalidChannel,
    ChannelNotConfigured,
    ChannelAlreadyEnabled,
    InvalidPin,
    PinBusy,
    InvalidFrequency,
    InvalidResolution,
    InvalidDuty,
    /// No free timer for the requested (frequency, resolution).
    ResourceUnavailable,
    TimerConflict,
    FadeInProgress,
    FadeNotActive,
    Timeout,
    HardwareFault,
    CommunicationFailure,
    InvalidConfiguration,
    UnsupportedOperation,
}

impl PwmError {
    /// Human-readable description of the error kind.
    pub const fn description(self) -> &'static str {
        match self {
            PwmError::Failure => "General failure",
            PwmError::NotInitialized => "Not initialized",
            PwmError::AlreadyInitialized => "Already initialized",
            PwmError::InvalidParameter => "Invalid parameter",
            PwmError::NullPointer => "Null pointer",
            PwmError::OutOfMemory => "Out of memory",
            PwmError::InvalidChannel => "Invalid channel",
            PwmError::ChannelNotConfigured => "Channel not configured",
            PwmError::ChannelAlreadyEnabled => "Channel already enabled",
            PwmError::InvalidPin => "Invalid pin",
            PwmError::PinBusy => "Pin busy",
            PwmError::InvalidFrequency => "Invalid frequency",
            PwmError::InvalidResolution => "Invalid resolution",
            PwmError::InvalidDuty => "Invalid duty cycle",
            PwmError::ResourceUnavailable => "Resource unavailable",
            PwmError::TimerConflict => "Timer conflict",
            PwmError::FadeInProgress => "Fade in progress",
            PwmError::FadeNotActive => "Fade not active",
            PwmError::Timeout => "Timeout",
            PwmError::HardwareFault => "Hardware fault",
            PwmError::CommunicationFailure => "Communication failure",
            PwmError::InvalidConfiguration => "Invalid configuration",
            PwmError::UnsupportedOperation => "Unsupported operation",
        }
    }
}

impl core::fmt::Display for PwmError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.description())
    }
}

/// Result alias for PWM operations.
pub type PwmResult<T> = Result<T, PwmError>;

/// Channel configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PwmChannelConfig {
    pub output_pin: PinNumber,
    pub frequency_hz: FrequencyHz,
    /// 1-14 bits on this block.
    pub resolution_bits: u8,
    /// Normalized initial duty, 0.0-1.0.
    pub initial_duty: f32,
    /// Pin a specific timer instead of letting the allocator pick.
    pub timer_id: Option<u8>,
    /// Invert the output polarity.
    pub invert: bool,
    /// Output level while the channel is stopped.
    pub idle_level: bool,
}

impl Default for PwmChannelConfig {
    fn default() -> Self {
        Self {
            output_pin: INVALID_PIN,
            frequency_hz: 5_000,
            resolution_bits: 10,
            initial_duty: 0.0,
            timer_id: None,
            invert: false,
            idle_level: false,
        }
    }
}

/// Cause delivered to the period callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PwmEvent {
    PeriodElapsed,
    /// Hardware fade reached its target.
    FadeComplete,
}

/// Period/fade callback, ISR context.
pub type PwmPeriodCallback = fn(channel: ChannelId, event: PwmEvent, user: usize);

/// Fault callback, ISR context.
pub type PwmFaultCallback = fn(channel: ChannelId, error: PwmError, user: usize);

/// Block capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PwmCapabilities {
    pub max_channels: u8,
    pub max_timers: u8,
    pub min_frequency_hz: FrequencyHz,
    pub max_frequency_hz: FrequencyHz,
    pub max_resolution_bits: u8,
    pub supports_hardware_fade: bool,
    pub supports_complementary: bool,
}

/// Per-channel status.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PwmChannelStatus {
    pub configured: bool,
    pub enabled: bool,
    pub frequency_hz: FrequencyHz,
    pub resolution_bits: u8,
    pub duty: f32,
    pub raw_duty: u32,
    pub assigned_timer: Option<u8>,
    pub fade_active: bool,
    pub last_error: Option<PwmError>,
}

/// Monotonic operation counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PwmStatistics {
    pub duty_updates: u64,
    pub frequency_changes: u32,
    pub fades_started: u32,
    pub fades_completed: u32,
    pub faults: u32,
    pub last_activity_us: TimestampUs,
}

/// Health snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PwmDiagnostics {
    pub healthy: bool,
    pub last_error: Option<PwmError>,
    pub last_error_us: TimestampUs,
    pub consecutive_errors: u32,
    pub active_channels: u8,
    pub timers_in_use: u8,
}

impl Default for PwmDiagnostics {
    fn default() -> Self {
        Self {
            healthy: true,
            last_error: None,
            last_error_us: 0,
            consecutive_errors: 0,
            active_channels: 0,
            timers_in_use: 0,
        }
    }
}

/// PWM block contract.
pub trait Pwm: Peripheral<Error = PwmError> {
    // --- Channel lifecycle ---

    /// Configure a channel, allocating a timer: reuse one already running
    /// at the same (frequency, resolution), else claim a free one.
    fn configure_channel(&mut self, channel: ChannelId, config: PwmChannelConfig) -> PwmResult<()>;
    fn enable_channel(&mut self, channel: ChannelId) -> PwmResult<()>;
    fn disable_channel(&mut self, channel: ChannelId) -> PwmResult<()>;
    fn is_channel_enabled(&self, channel: ChannelId) -> bool;
    fn channel_status(&self, channel: ChannelId) -> PwmResult<PwmChannelStatus>;

    // --- Duty / frequency / phase ---

    /// Normalized duty, clamped domain `[0.0, 1.0]`.
    fn set_duty_cycle(&mut self, channel: ChannelId, duty: f32) -> PwmResult<()>;
    fn duty_cycle(&self, channel: ChannelId) -> PwmResult<f32>;
    /// Raw counts; `raw >= 2^resolution` is `InvalidDuty`.
    fn set_duty_cycle_raw(&mut self, channel: ChannelId, raw: u32) -> PwmResult<()>;
    fn set_frequency(&mut self, channel: ChannelId, frequency_hz: FrequencyHz) -> PwmResult<()>;
    fn set_phase_shift(&mut self, channel: ChannelId, degrees: f32) -> PwmResult<()>;

    // --- Group control ---

    fn start_all(&mut self) -> PwmResult<()>;
    fn stop_all(&mut self) -> PwmResult<()>;
    /// Commit pending duty/frequency changes atomically.
    fn update_all(&mut self) -> PwmResult<()>;

    // --- Complementary outputs ---

    /// Drive `complementary` as the inverse of `primary` with a dead-time
    /// gap on both edges. Both channels must share a timer.
    fn set_complementary_output(
        &mut self,
        primary: ChannelId,
        complementary: ChannelId,
        dead_time_ns: u32,
    ) -> PwmResult<()>;

    // --- Hardware fade ---

    fn set_hardware_fade(
        &mut self,
        channel: ChannelId,
        target_duty: f32,
        fade_ms: u32,
    ) -> PwmResult<()>;
    fn stop_hardware_fade(&mut self, channel: ChannelId) -> PwmResult<()>;
    fn is_fade_active(&self, channel: ChannelId) -> bool;

    // --- Misc ---

    fn set_idle_level(&mut self, channel: ChannelId, level: bool) -> PwmResult<()>;
    /// Bypass the allocator (expert use).
    fn force_timer_assignment(&mut self, channel: ChannelId, timer_id: u8) -> PwmResult<()>;
    fn set_period_callback(&mut self, callback: PwmPeriodCallback, user: usize);
    fn set_fault_callback(&mut self, callback: PwmFaultCallback, user: usize);
    fn clear_callbacks(&mut self);
    fn capabilities(&self) -> PwmCapabilities;

    // --- Statistics / diagnostics ---

    fn statistics(&self) -> PwmStatistics;
    fn reset_statistics(&mut self);
    fn diagnostics(&self) -> PwmDiagnostics;
    fn reset_diagnostics(&mut self);
}

/// Highest raw duty for a resolution.
pub const fn max_raw_duty(resolution_bits: u8) -> u32 {
    if resolution_bits >= 32 {
        u32::MAX
    } else {
        (1u32 << resolution_bits) - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_raw_duty() {
        assert_eq!(max_raw_duty(10), 1023);
        assert_eq!(max_raw_duty(14), 16383);
        assert_eq!(max_raw_duty(1), 1);
    }

    #[test]
    fn test_default_channel_config() {
        let cfg = PwmChannelConfig::default();
        assert_eq!(cfg.frequency_hz, 5_000);
        assert_eq!(cfg.resolution_bits, 10);
        assert_eq!(cfg.initial_duty, 0.0);
        assert!(cfg.timer_id.is_none());
    }
}
