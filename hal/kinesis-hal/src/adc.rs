//! ADC unit contract
//!
//! One driver instance owns one hardware unit. Channels are configured with
//! an attenuation and bit width, optionally calibrated, and read either
//! one-shot or through the continuous (DMA) path. One-shot and continuous
//! modes are mutually exclusive per unit.

use crate::peripheral::Peripheral;
use crate::types::{ChannelId, FrequencyHz, HostId, TimestampUs};

/// ADC error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AdcError {
    Failure,
    NotInitialized,
    AlreadyInitialized,
    InvalidParameter,
    NullPointer,
    OutOfMemory,
    InvalidChannel,
    ChannelNotEnabled,
    ChannelBusy,
    HardwareFault,
    DeviceNotResponding,
    VoltageOutOfRange,
    InvalidConfiguration,
    UnsupportedOperation,
    /// No calibration scheme fitted for the requested attenuation.
    CalibrationNotAvailable,
    CalibrationFailure,
    /// Continuous mode active; one-shot reads rejected.
    ContinuousModeActive,
    ContinuousModeNotActive,
    ReadFailure,
    Timeout,
}

impl AdcError {
    /// Human-readable description of the error kind.
    pub const fn description(self) -> &'static str {
        match self {
            AdcError::Failure => "General failure",
            AdcError::NotInitialized => "Not initialized",
            AdcError::AlreadyInitialized => "Already initialized",
            AdcError::InvalidParameter => "Invalid parameter",
            AdcError::NullPointer => "Null pointer",
            AdcError::OutOfMemory => "Out of memory",
            AdcError::InvalidChannel => "Invalid channel",
            AdcError::ChannelNotEnabled => "Channel not enabled",
            AdcError::ChannelBusy => "Channel busy",
            AdcError::HardwareFault => "Hardware fault",
            AdcError::DeviceNotResponding => "Device not responding",
            AdcError::VoltageOutOfRange => "Voltage out of range",
            AdcError::InvalidConfiguration => "Invalid configuration",
            AdcError::UnsupportedOperation => "Unsupported operation",
            AdcError::CalibrationNotAvailable => "Calibration not available",
            AdcError::CalibrationFailure => "Calibration failure",
            AdcError::ContinuousModeActive => "Continuous mode active",
            AdcError::ContinuousModeNotActive => "Continuous mode not active",
            AdcError::ReadFailure => "Read failure",
            AdcError::Timeout => "Timeout",
        }
    }
}

impl core::fmt::Display for AdcError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.description())
    }
}

/// Result alias for ADC operations.
pub type AdcResult<T> = Result<T, AdcError>;

/// Input attenuation, which sets the measurable range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AdcAttenuation {
    /// ~0-950 mV
    Db0,
    /// ~0-1250 mV
    Db2_5,
    /// ~0-1750 mV
    Db6,
    /// ~0-3300 mV
    #[default]
    Db12,
}

/// Conversion bit width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AdcBitWidth {
    Bits9,
    Bits10,
    Bits11,
    #[default]
    Bits12,
}

impl AdcBitWidth {
    /// Number of bits.
    pub const fn bits(self) -> u8 {
        match self {
            AdcBitWidth::Bits9 => 9,
            AdcBitWidth::Bits10 => 10,
            AdcBitWidth::Bits11 => 11,
            AdcBitWidth::Bits12 => 12,
        }
    }

    /// Highest raw code for this width.
    pub const fn max_raw(self) -> u16 {
        (1u16 << self.bits()) - 1
    }
}

/// IIR filter coefficient, the small hardware-supported set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AdcIirCoefficient {
    X2,
    X4,
    X8,
    X16,
    X32,
    X64,
}

/// Threshold monitor configuration.
///
/// The callback fires once per crossing; hysteresis is at least 1 LSB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AdcMonitorConfig {
    pub channel: ChannelId,
    pub low_threshold: u16,
    pub high_threshold: u16,
}

/// Threshold crossing direction reported to the monitor callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AdcThresholdEvent {
    BelowLow,
    AboveHigh,
}

/// Monitor callback, ISR context.
pub type AdcMonitorCallback = fn(channel: ChannelId, event: AdcThresholdEvent, user: usize);

/// Per-channel configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AdcChannelConfig {
    pub attenuation: AdcAttenuation,
    pub bit_width: AdcBitWidth,
}

/// Continuous (DMA) mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AdcContinuousConfig {
    pub sample_freq_hz: FrequencyHz,
    pub samples_per_frame: u16,
    pub max_store_frames: u8,
}

impl Default for AdcContinuousConfig {
    fn default() -> Self {
        Self {
            sample_freq_hz: 20_000,
            samples_per_frame: 64,
            max_store_frames: 4,
        }
    }
}

/// Unit configuration captured at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AdcConfig {
    pub unit_id: HostId,
    pub bit_width: AdcBitWidth,
    pub calibration_enabled: bool,
    pub continuous: AdcContinuousConfig,
}

impl Default for AdcConfig {
    fn default() -> Self {
        Self {
            unit_id: 0,
            bit_width: AdcBitWidth::default(),
            calibration_enabled: true,
            continuous: AdcContinuousConfig::default(),
        }
    }
}

/// One converted sample from the continuous path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AdcSample {
    pub channel: ChannelId,
    pub raw: u16,
}

/// Continuous-mode frame callback, ISR-safe context.
///
/// The sample slice is valid only for the duration of the call. The return
/// value reports whether a higher-priority task was woken.
pub type AdcContinuousCallback = fn(samples: &[AdcSample], user: usize) -> bool;

/// Monotonic operation counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AdcStatistics {
    pub total_conversions: u64,
    pub successful_conversions: u64,
    pub failed_conversions: u64,
    pub continuous_frames: u64,
    pub continuous_overflows: u32,
    pub monitor_events: u32,
    pub last_activity_us: TimestampUs,
}

/// Health snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AdcDiagnostics {
    pub healthy: bool,
    pub last_error: Option<AdcError>,
    pub last_error_us: TimestampUs,
    pub consecutive_errors: u32,
    pub calibration_valid: bool,
}

impl Default for AdcDiagnostics {
    fn default() -> Self {
        Self {
            healthy: true,
            last_error: None,
            last_error_us: 0,
            consecutive_errors: 0,
            calibration_valid: false,
        }
    }
}

/// ADC unit contract.
pub trait Adc: Peripheral<Error = AdcError> {
    /// Unit index this driver owns.
    fn unit_id(&self) -> HostId;

    // --- Channel management ---

    fn configure_channel(&mut self, channel: ChannelId, config: AdcChannelConfig) -> AdcResult<()>;
    fn enable_channel(&mut self, channel: ChannelId) -> AdcResult<()>;
    fn disable_channel(&mut self, channel: ChannelId) -> AdcResult<()>;
    fn is_channel_enabled(&self, channel: ChannelId) -> bool;

    // --- One-shot reads ---

    fn read_raw(&mut self, channel: ChannelId) -> AdcResult<u16>;
    /// Raw read plus calibrated conversion to millivolts.
    fn read_voltage(&mut self, channel: ChannelId) -> AdcResult<u32>;
    /// Average of `samples` raw reads spaced `interval_ms` apart.
    fn read_averaged(&mut self, channel: ChannelId, samples: u16, interval_ms: u32)
        -> AdcResult<u16>;
    /// Read several channels in one pass. All-or-nothing: on the first
    /// failing channel the error is returned and later outputs are
    /// untouched.
    fn read_multiple_channels(
        &mut self,
        channels: &[ChannelId],
        raw_out: &mut [u16],
        voltage_out: &mut [u32],
    ) -> AdcResult<()>;

    // --- Calibration ---

    fn initialize_calibration(&mut self, attenuation: AdcAttenuation) -> AdcResult<()>;
    fn raw_to_voltage(&self, raw: u16, attenuation: AdcAttenuation) -> AdcResult<u32>;

    // --- Continuous (DMA) mode ---

    fn configure_continuous(&mut self, config: AdcContinuousConfig) -> AdcResult<()>;
    fn set_continuous_callback(&mut self, callback: AdcContinuousCallback, user: usize);
    fn clear_continuous_callback(&mut self);
    fn start_continuous(&mut self) -> AdcResult<()>;
    /// Synchronous stop: no callback fires after this returns.
    fn stop_continuous(&mut self) -> AdcResult<()>;
    fn is_continuous_running(&self) -> bool;

    // --- Filters / monitors / oversampling (advisory, §hardware) ---

    fn configure_iir_filter(
        &mut self,
        channel: ChannelId,
        coefficient: AdcIirCoefficient,
    ) -> AdcResult<()>;
    fn configure_monitor(
        &mut self,
        config: AdcMonitorConfig,
        callback: AdcMonitorCallback,
        user: usize,
    ) -> AdcResult<()>;
    fn disable_monitor(&mut self, channel: ChannelId) -> AdcResult<()>;
    /// Oversampling ratio, a power of two up to the platform maximum.
    fn configure_oversampling(&mut self, ratio: u16) -> AdcResult<()>;

    // --- Statistics / diagnostics ---

    fn statistics(&self) -> AdcStatistics;
    fn reset_statistics(&mut self);
    fn diagnostics(&self) -> AdcDiagnostics;
    fn reset_diagnostics(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_width_raw_bounds() {
        assert_eq!(AdcBitWidth::Bits12.max_raw(), 4095);
        assert_eq!(AdcBitWidth::Bits9.max_raw(), 511);
        assert_eq!(AdcBitWidth::Bits12.bits(), 12);
    }

    #[test]
    fn test_default_config() {
        let cfg = AdcConfig::default();
        assert_eq!(cfg.unit_id, 0);
        assert!(cfg.calibration_enabled);
        assert_eq!(cfg.continuous.samples_per_frame, 64);
    }
}
