//! GPIO pin contract
//!
//! A pin carries a direction, a logical polarity, pull and drive settings,
//! and optionally an interrupt, a glitch filter and sleep-retention state.
//! The contract distinguishes *logical* state (active/inactive, mapped
//! through the configured polarity) from *electrical* level (high/low);
//! implementations must keep the two consistent at all times.

use crate::peripheral::Peripheral;
use crate::types::{PinNumber, TimeoutMs, TimestampUs};

/// GPIO error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GpioError {
    /// General failure with no more specific kind.
    Failure,
    /// Operation attempted before `initialize`.
    NotInitialized,
    /// Second `initialize` on a live driver.
    AlreadyInitialized,
    /// Argument outside the documented domain.
    InvalidParameter,
    /// Required buffer or callback missing.
    NullPointer,
    /// Native driver allocation failed.
    OutOfMemory,
    /// Pin number outside the SoC's pin matrix.
    InvalidPin,
    /// Pin already claimed by another peripheral.
    PinBusy,
    /// Pin reserved (strapping, flash) and not available.
    AccessDenied,
    /// Hardware readback does not match the cached configuration.
    HardwareFault,
    /// Rejected configuration combination.
    InvalidConfiguration,
    /// Feature not available on this SoC.
    UnsupportedOperation,
    /// Operation requires the opposite direction.
    DirectionMismatch,
    /// Pull resistor could not be engaged.
    PullResistorFailure,
    /// Interrupt support not configured for this pin.
    InterruptNotConfigured,
    /// Interrupt already enabled.
    InterruptAlreadyEnabled,
    /// Wait elapsed without an event.
    Timeout,
    /// Driver communication failed.
    CommunicationFailure,
}

impl GpioError {
    /// Human-readable description of the error kind.
    pub const fn description(self) -> &'static str {
        match self {
            GpioError::Failure => "General failure",
            GpioError::NotInitialized => "Not initialized",
            GpioError::AlreadyInitialized => "Already initialized",
            GpioError::InvalidParameter => "Invalid parameter",
            GpioError::NullPointer => "Null pointer",
            GpioError::OutOfMemory => "Out of memory",
            GpioError::InvalidPin => "Invalid pin",
            GpioError::PinBusy => "Pin busy",
            GpioError::AccessDenied => "Access denied",
            GpioError::HardwareFault => "Hardware fault",
            GpioError::InvalidConfiguration => "Invalid configuration",
            GpioError::UnsupportedOperation => "Unsupported operation",
            GpioError::DirectionMismatch => "Direction mismatch",
            GpioError::PullResistorFailure => "Pull resistor failure",
            GpioError::InterruptNotConfigured => "Interrupt not configured",
            GpioError::InterruptAlreadyEnabled => "Interrupt already enabled",
            GpioError::Timeout => "Timeout",
            GpioError::CommunicationFailure => "Communication failure",
        }
    }
}

impl core::fmt::Display for GpioError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.description())
    }
}

impl embedded_hal::digital::Error for GpioError {
    fn kind(&self) -> embedded_hal::digital::ErrorKind {
        embedded_hal::digital::ErrorKind::Other
    }
}

/// Result alias for GPIO operations.
pub type GpioResult<T> = Result<T, GpioError>;

/// Pin direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    #[default]
    Input,
    Output,
}

/// Logical polarity mapping.
///
/// With `ActiveHigh`, logical active corresponds to electrical high; with
/// `ActiveLow` the mapping is inverted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ActiveState {
    ActiveLow,
    #[default]
    ActiveHigh,
}

/// Output driver topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OutputMode {
    #[default]
    PushPull,
    OpenDrain,
}

/// Pull resistor configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PullMode {
    #[default]
    Floating,
    PullUp,
    PullDown,
    /// Both resistors engaged (bus-keeper).
    UpDown,
}

/// Output drive strength, four hardware levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DriveStrength {
    Ma5,
    Ma10,
    #[default]
    Ma20,
    Ma40,
}

/// Interrupt trigger condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InterruptTrigger {
    #[default]
    None,
    RisingEdge,
    FallingEdge,
    BothEdges,
    LowLevel,
    HighLevel,
}

/// Interrupt callback, invoked in ISR context.
///
/// Keep the body minimal; the `user` token is the opaque value registered
/// with the callback and is passed through untouched.
pub type InterruptCallback = fn(pin: PinNumber, user: usize);

/// Pin configuration captured at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GpioConfig {
    pub pin: PinNumber,
    pub direction: Direction,
    pub active_state: ActiveState,
    pub output_mode: OutputMode,
    pub pull_mode: PullMode,
    pub drive_strength: DriveStrength,
}

impl GpioConfig {
    /// Output, active-high, push-pull, no pulls.
    pub const fn output(pin: PinNumber) -> Self {
        Self {
            pin,
            direction: Direction::Output,
            active_state: ActiveState::ActiveHigh,
            output_mode: OutputMode::PushPull,
            pull_mode: PullMode::Floating,
            drive_strength: DriveStrength::Ma20,
        }
    }

    /// Input, active-high, floating.
    pub const fn input(pin: PinNumber) -> Self {
        Self {
            pin,
            direction: Direction::Input,
            active_state: ActiveState::ActiveHigh,
            output_mode: OutputMode::PushPull,
            pull_mode: PullMode::Floating,
            drive_strength: DriveStrength::Ma20,
        }
    }
}

/// Glitch filter configuration.
///
/// Pulses shorter than the window are suppressed by hardware before they
/// reach the input path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GlitchFilterConfig {
    /// Suppression window in nanoseconds.
    pub window_ns: u32,
}

/// Pin behavior across light sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SleepConfig {
    /// Direction while asleep.
    pub direction: Direction,
    /// Pull configuration while asleep.
    pub pull_mode: PullMode,
    /// Keep the output latched through sleep entry/exit.
    pub hold: bool,
}

/// Wake-from-sleep trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WakeupConfig {
    pub trigger: InterruptTrigger,
    pub enable: bool,
}

/// Interrupt state snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InterruptStatus {
    pub configured: bool,
    pub enabled: bool,
    pub trigger: InterruptTrigger,
    /// Events observed since the last [`Gpio::clear_interrupt_stats`].
    pub count: u32,
}

/// Full configuration snapshot, for diagnostics dumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GpioSnapshot {
    pub config: GpioConfig,
    pub logical_active: bool,
    pub electrical_high: bool,
    pub interrupt: InterruptStatus,
    pub glitch_filter_enabled: bool,
    pub hold_enabled: bool,
}

/// Monotonic operation counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GpioStatistics {
    pub total_operations: u64,
    pub successful_operations: u64,
    pub failed_operations: u64,
    pub state_changes: u64,
    pub direction_changes: u32,
    pub interrupt_count: u32,
    pub last_activity_us: TimestampUs,
}

/// Health snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GpioDiagnostics {
    pub healthy: bool,
    pub last_error: Option<GpioError>,
    pub last_error_us: TimestampUs,
    pub consecutive_errors: u32,
    /// Pin usable on this package (not strapped/reserved).
    pub pin_available: bool,
}

impl Default for GpioDiagnostics {
    fn default() -> Self {
        Self {
            healthy: true,
            last_error: None,
            last_error_us: 0,
            consecutive_errors: 0,
            pin_available: true,
        }
    }
}

/// GPIO pin contract.
///
/// Invariants:
/// - logical state is always the polarity-mapped transform of electrical
///   level;
/// - direction changes are atomic with respect to reads;
/// - `verify_*` operations read hardware back and return `HardwareFault`
///   on any mismatch with the cached configuration.
pub trait Gpio: Peripheral<Error = GpioError> {
    /// Pin number this driver owns.
    fn pin(&self) -> PinNumber;

    // --- Configuration ---

    fn set_direction(&mut self, direction: Direction) -> GpioResult<()>;
    fn direction(&self) -> Direction;
    fn set_output_mode(&mut self, mode: OutputMode) -> GpioResult<()>;
    fn output_mode(&self) -> OutputMode;
    fn set_pull_mode(&mut self, pull: PullMode) -> GpioResult<()>;
    fn pull_mode(&self) -> PullMode;
    fn set_drive_strength(&mut self, strength: DriveStrength) -> GpioResult<()>;
    fn drive_strength(&self) -> DriveStrength;
    fn active_state(&self) -> ActiveState;

    // --- Logical state ---

    /// Drive the pin to its logical active state.
    fn set_active(&mut self) -> GpioResult<()>;
    /// Drive the pin to its logical inactive state.
    fn set_inactive(&mut self) -> GpioResult<()>;
    /// Invert the current logical state.
    fn toggle(&mut self) -> GpioResult<()>;
    /// Read the logical state (input pins read the line, output pins the
    /// latched value).
    fn is_active(&mut self) -> GpioResult<bool>;

    // --- Electrical level ---

    /// Drive the electrical level directly, bypassing polarity mapping.
    fn set_level(&mut self, high: bool) -> GpioResult<()>;
    /// Read the electrical level.
    fn level(&mut self) -> GpioResult<bool>;

    // --- Hardware verification ---

    /// Read direction back from hardware; `HardwareFault` on mismatch.
    fn verify_direction(&mut self) -> GpioResult<Direction>;
    /// Read output mode back from hardware; `HardwareFault` on mismatch.
    fn verify_output_mode(&mut self) -> GpioResult<OutputMode>;
    /// Cross-check direction, mode and pull against the cached
    /// configuration in one pass.
    fn verify_hardware_configuration(&mut self) -> GpioResult<()>;

    // --- Interrupts ---

    /// Register a trigger and optional callback. The callback runs in ISR
    /// context after the wait semaphore is given, strictly in that order.
    fn configure_interrupt(
        &mut self,
        trigger: InterruptTrigger,
        callback: Option<InterruptCallback>,
        user: usize,
    ) -> GpioResult<()>;
    fn enable_interrupt(&mut self) -> GpioResult<()>;
    fn disable_interrupt(&mut self) -> GpioResult<()>;
    /// Block until the configured trigger fires or the timeout elapses.
    fn wait_for_interrupt(&mut self, timeout: TimeoutMs) -> GpioResult<()>;
    fn interrupt_status(&self) -> InterruptStatus;
    fn clear_interrupt_stats(&mut self);

    // --- Advanced ---

    fn configure_glitch_filter(&mut self, config: GlitchFilterConfig) -> GpioResult<()>;
    fn enable_glitch_filter(&mut self) -> GpioResult<()>;
    fn disable_glitch_filter(&mut self) -> GpioResult<()>;
    fn configure_sleep(&mut self, config: SleepConfig) -> GpioResult<()>;
    /// Latch the current output through software-initiated state changes.
    fn set_hold(&mut self, enable: bool) -> GpioResult<()>;
    fn configure_wakeup(&mut self, config: WakeupConfig) -> GpioResult<()>;
    /// Configuration dump for diagnostics.
    fn snapshot(&mut self) -> GpioResult<GpioSnapshot>;

    // --- Statistics / diagnostics ---

    fn statistics(&self) -> GpioStatistics;
    fn reset_statistics(&mut self);
    fn diagnostics(&self) -> GpioDiagnostics;
    fn reset_diagnostics(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_descriptions_are_distinct() {
        let kinds = [
            GpioError::Failure,
            GpioError::NotInitialized,
            GpioError::AlreadyInitialized,
            GpioError::InvalidPin,
            GpioError::HardwareFault,
            GpioError::Timeout,
        ];
        for (i, a) in kinds.iter().enumerate() {
            for b in kinds.iter().skip(i + 1) {
                assert_ne!(a.description(), b.description());
            }
        }
    }

    #[test]
    fn test_config_constructors() {
        let out = GpioConfig::output(8);
        assert_eq!(out.direction, Direction::Output);
        assert_eq!(out.active_state, ActiveState::ActiveHigh);

        let inp = GpioConfig::input(4);
        assert_eq!(inp.direction, Direction::Input);
        assert_eq!(inp.pull_mode, PullMode::Floating);
    }
}
