//! Native driver port seam
//!
//! Each trait in this module mirrors the documented operations of one
//! vendor peripheral driver (TWAI, LEDC, RMT, ...). A chip driver owns
//! exactly one port instance - its native handle - and translates
//! contract calls into these operations.
//!
//! Two families of implementations exist: the SDK glue compiled for the
//! target (registers the real interrupt trampolines, out of this crate's
//! test surface), and [`soft`], a pure-logic simulation used by host
//! tests and by development without hardware.

pub mod soft;

use kinesis_hal::adc::{
    AdcAttenuation, AdcBitWidth, AdcContinuousCallback, AdcContinuousConfig, AdcIirCoefficient,
    AdcMonitorCallback, AdcMonitorConfig,
};
use kinesis_hal::can::{CanMessage, CanMode, CanReceiveCallback};
use kinesis_hal::gpio::{
    Direction, DriveStrength, InterruptCallback, InterruptTrigger, OutputMode, PullMode,
};
use kinesis_hal::i2c::{I2cConfig, I2cPowerMode};
use kinesis_hal::pio::RawSymbol;
use kinesis_hal::spi::{SpiConfig, SpiMode};
use kinesis_hal::timer::TimerCallback;
use kinesis_hal::types::{
    ChannelId, FrequencyHz, HostId, PinNumber, TimeoutMs, TimestampUs,
};
use kinesis_hal::uart::{
    FlowControl, IrdaConfig, PatternConfig, Rs485Config, SoftwareFlowConfig, UartConfig, UartMode,
};

/// Native driver error codes, as documented by the vendor SDK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PortError {
    /// Generic failure.
    Fail,
    /// Out of memory.
    NoMem,
    /// Invalid argument.
    InvalidArg,
    /// Driver in the wrong state for the call.
    InvalidState,
    /// Requested item does not exist.
    NotFound,
    /// Operation not supported by this silicon.
    NotSupported,
    /// Wait elapsed.
    Timeout,
    /// Resource temporarily unavailable.
    Busy,
}

/// Result alias for port operations.
pub type PortResult<T> = Result<T, PortError>;

/// Microsecond timebase shared by every port.
pub trait PortClock {
    /// Monotonic microseconds since boot.
    fn now_us(&self) -> TimestampUs;
}

// ---------------------------------------------------------------------------
// GPIO
// ---------------------------------------------------------------------------

/// Hardware pin setup as the GPIO matrix sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PinSetup {
    pub direction: Direction,
    pub output_mode: OutputMode,
    pub pull_mode: PullMode,
    pub drive_strength: DriveStrength,
}

/// GPIO matrix operations.
pub trait GpioOps: PortClock {
    fn configure(&mut self, pin: PinNumber, setup: PinSetup) -> PortResult<()>;
    fn release(&mut self, pin: PinNumber) -> PortResult<()>;
    fn set_level(&mut self, pin: PinNumber, high: bool) -> PortResult<()>;
    fn level(&mut self, pin: PinNumber) -> PortResult<bool>;
    /// Read the live configuration back from the pad registers.
    fn read_back(&mut self, pin: PinNumber) -> PortResult<PinSetup>;

    /// Install the ISR trampoline for `pin`. The native handler gives the
    /// pin's wait semaphore first, then invokes `callback`.
    fn attach_interrupt(
        &mut self,
        pin: PinNumber,
        trigger: InterruptTrigger,
        callback: Option<InterruptCallback>,
        user: usize,
    ) -> PortResult<()>;
    fn detach_interrupt(&mut self, pin: PinNumber) -> PortResult<()>;
    fn enable_interrupt(&mut self, pin: PinNumber) -> PortResult<()>;
    fn disable_interrupt(&mut self, pin: PinNumber) -> PortResult<()>;
    /// Take the pin's event semaphore.
    fn wait_for_event(&mut self, pin: PinNumber, timeout: TimeoutMs) -> PortResult<()>;
    /// Events seen since the last clear.
    fn event_count(&self, pin: PinNumber) -> u32;
    fn clear_event_count(&mut self, pin: PinNumber);

    fn configure_glitch_filter(&mut self, pin: PinNumber, window_ns: u32) -> PortResult<()>;
    fn set_glitch_filter_enabled(&mut self, pin: PinNumber, enable: bool) -> PortResult<()>;
    fn configure_sleep(&mut self, pin: PinNumber, setup: PinSetup, hold: bool) -> PortResult<()>;
    fn set_hold(&mut self, pin: PinNumber, enable: bool) -> PortResult<()>;
    fn configure_wakeup(
        &mut self,
        pin: PinNumber,
        trigger: InterruptTrigger,
        enable: bool,
    ) -> PortResult<()>;
}

// ---------------------------------------------------------------------------
// TWAI (CAN)
// ---------------------------------------------------------------------------

/// Bit timing handed to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TwaiTiming {
    pub brp: u16,
    pub tseg1: u8,
    pub tseg2: u8,
    pub sjw: u8,
    pub triple_sampling: bool,
}

/// Install-time controller configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TwaiNativeConfig {
    pub controller: HostId,
    pub tx_pin: PinNumber,
    pub rx_pin: PinNumber,
    pub timing: TwaiTiming,
    pub mode: CanMode,
    pub loopback: bool,
    pub tx_queue_len: u16,
    pub rx_queue_len: u16,
    pub filter_id: u32,
    pub filter_mask: u32,
    pub filter_extended: bool,
    pub single_filter: bool,
}

/// Controller state as the native driver reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TwaiNativeState {
    Stopped,
    Running,
    BusOff,
    Recovering,
}

/// Status block returned by the native driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TwaiStatusInfo {
    pub state: TwaiNativeState,
    pub tx_error_counter: u32,
    pub rx_error_counter: u32,
    pub msgs_to_tx: u32,
    pub msgs_to_rx: u32,
    pub tx_failed_count: u32,
    pub rx_missed_count: u32,
    pub bus_error_count: u32,
    pub arb_lost_count: u32,
}

/// TWAI controller operations.
///
/// Alert bits use the [`kinesis_hal::can::CanAlerts`] encoding; the SDK
/// glue translates to the native mask.
pub trait TwaiOps: PortClock {
    fn install(&mut self, config: &TwaiNativeConfig) -> PortResult<()>;
    fn uninstall(&mut self) -> PortResult<()>;
    fn start(&mut self) -> PortResult<()>;
    fn stop(&mut self) -> PortResult<()>;
    fn transmit(&mut self, message: &CanMessage, timeout: TimeoutMs) -> PortResult<()>;
    fn receive(&mut self, timeout: TimeoutMs) -> PortResult<CanMessage>;
    fn configure_alerts(&mut self, mask: u32) -> PortResult<()>;
    /// Block until an enabled alert fires; returns the accumulated set.
    fn read_alerts(&mut self, timeout: TimeoutMs) -> PortResult<u32>;
    /// Kick off bus-off recovery; completion is signalled via the
    /// BUS_RECOVERED alert and the status state.
    fn initiate_recovery(&mut self) -> PortResult<()>;
    fn status(&mut self) -> PortResult<TwaiStatusInfo>;
    fn clear_transmit_queue(&mut self) -> PortResult<()>;
    fn clear_receive_queue(&mut self) -> PortResult<()>;
    /// Frame-received trampoline, invoked in ISR context.
    fn set_receive_callback(&mut self, callback: Option<(CanReceiveCallback, usize)>);
    fn configure_sleep_retention(&mut self, enable: bool) -> PortResult<()>;
}

// ---------------------------------------------------------------------------
// ADC
// ---------------------------------------------------------------------------

/// Linear calibration curve fitted from eFuse data:
/// `mv = raw * coeff_a / 4096 + coeff_b`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AdcCalCurve {
    pub coeff_a: i32,
    pub coeff_b: i32,
}

impl AdcCalCurve {
    pub const fn raw_to_mv(&self, raw: u16) -> u32 {
        let mv = (raw as i64 * self.coeff_a as i64) / 4096 + self.coeff_b as i64;
        if mv < 0 {
            0
        } else {
            mv as u32
        }
    }
}

/// ADC unit operations.
pub trait AdcOps: PortClock {
    fn setup_oneshot(&mut self, unit: HostId) -> PortResult<()>;
    fn teardown(&mut self) -> PortResult<()>;
    fn configure_channel(
        &mut self,
        channel: ChannelId,
        attenuation: AdcAttenuation,
        width: AdcBitWidth,
    ) -> PortResult<()>;
    fn read_oneshot(&mut self, channel: ChannelId) -> PortResult<u16>;
    /// Busy-wait used by averaged reads.
    fn delay_ms(&mut self, ms: u32);
    /// Fit a calibration curve for the attenuation, or `NotSupported`
    /// when no eFuse scheme exists.
    fn calibration_fit(&mut self, attenuation: AdcAttenuation) -> PortResult<AdcCalCurve>;

    fn start_continuous(
        &mut self,
        config: &AdcContinuousConfig,
        channels: &[ChannelId],
        callback: Option<(AdcContinuousCallback, usize)>,
    ) -> PortResult<()>;
    fn stop_continuous(&mut self) -> PortResult<()>;

    fn configure_iir(&mut self, channel: ChannelId, coefficient: AdcIirCoefficient)
        -> PortResult<()>;
    fn configure_monitor(
        &mut self,
        config: &AdcMonitorConfig,
        callback: AdcMonitorCallback,
        user: usize,
    ) -> PortResult<()>;
    fn disable_monitor(&mut self, channel: ChannelId) -> PortResult<()>;
    fn configure_oversampling(&mut self, ratio: u16) -> PortResult<()>;
}

// ---------------------------------------------------------------------------
// UART
// ---------------------------------------------------------------------------

/// Sticky line error flags, cleared on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UartLineErrors {
    pub frame: u32,
    pub parity: u32,
    pub overrun: u32,
    pub noise: u32,
    pub break_detected: bool,
    pub collision: bool,
}

/// UART port operations.
pub trait UartOps: PortClock {
    fn install(&mut self, config: &UartConfig) -> PortResult<()>;
    fn uninstall(&mut self) -> PortResult<()>;
    /// Write into the TX ring; returns bytes accepted.
    fn write(&mut self, data: &[u8], timeout: TimeoutMs) -> PortResult<usize>;
    /// Read from the RX ring; blocks for the first byte up to `timeout`.
    fn read(&mut self, buf: &mut [u8], timeout: TimeoutMs) -> PortResult<usize>;
    fn rx_available(&mut self) -> PortResult<usize>;
    fn flush_tx(&mut self, timeout: TimeoutMs) -> PortResult<()>;
    fn flush_rx(&mut self) -> PortResult<()>;
    fn wait_tx_done(&mut self, timeout: TimeoutMs) -> PortResult<()>;
    fn set_baud(&mut self, baud: u32) -> PortResult<()>;
    fn set_flow_control(&mut self, flow: FlowControl) -> PortResult<()>;
    fn set_rts(&mut self, active: bool) -> PortResult<()>;
    fn cts(&mut self) -> PortResult<bool>;
    fn send_break(&mut self, duration_ms: u32) -> PortResult<()>;
    /// Drain and clear the sticky error flags.
    fn take_line_errors(&mut self) -> UartLineErrors;
    fn set_mode(&mut self, mode: UartMode) -> PortResult<()>;
    fn configure_rs485(&mut self, config: &Rs485Config) -> PortResult<()>;
    fn configure_irda(&mut self, config: &IrdaConfig) -> PortResult<()>;
    fn enable_pattern_detect(&mut self, config: &PatternConfig) -> PortResult<()>;
    fn disable_pattern_detect(&mut self) -> PortResult<()>;
    /// Oldest detected pattern position in the RX ring.
    fn pattern_position(&mut self, pop: bool) -> PortResult<Option<usize>>;
    fn configure_software_flow(&mut self, config: &SoftwareFlowConfig) -> PortResult<()>;
    fn configure_wakeup(&mut self, rx_threshold: u16) -> PortResult<()>;
    fn set_interrupt_thresholds(
        &mut self,
        rx_full: u8,
        tx_empty: u8,
        rx_timeout: u8,
    ) -> PortResult<()>;
    fn set_signal_inversion(&mut self, invert_tx: bool, invert_rx: bool) -> PortResult<()>;
    fn set_loopback(&mut self, enable: bool) -> PortResult<()>;
}

// ---------------------------------------------------------------------------
// I2C
// ---------------------------------------------------------------------------

/// I2C master operations.
pub trait I2cOps: PortClock {
    fn install(&mut self, config: &I2cConfig) -> PortResult<()>;
    fn uninstall(&mut self) -> PortResult<()>;
    /// Master write; `stop` ends the transaction, otherwise the bus is
    /// left armed for a repeated start.
    fn write(
        &mut self,
        address: u16,
        ten_bit: bool,
        data: &[u8],
        stop: bool,
        timeout: TimeoutMs,
    ) -> PortResult<()>;
    /// Master read; see [`write`](I2cOps::write) for `stop`.
    fn read(
        &mut self,
        address: u16,
        ten_bit: bool,
        buf: &mut [u8],
        stop: bool,
        timeout: TimeoutMs,
    ) -> PortResult<()>;
    /// Zero-length address probe.
    fn probe(&mut self, address: u16, timeout: TimeoutMs) -> PortResult<bool>;
    fn delay_us(&mut self, us: u32);
    fn suspend(&mut self) -> PortResult<()>;
    fn resume(&mut self) -> PortResult<()>;
    fn set_power_mode(&mut self, mode: I2cPowerMode) -> PortResult<()>;
}

// ---------------------------------------------------------------------------
// SPI
// ---------------------------------------------------------------------------

/// SPI host operations.
pub trait SpiOps: PortClock {
    fn install(&mut self, config: &SpiConfig) -> PortResult<()>;
    fn uninstall(&mut self) -> PortResult<()>;
    /// Full-duplex clocking of equal-length buffers.
    fn transfer(&mut self, tx: &[u8], rx: &mut [u8], timeout: TimeoutMs) -> PortResult<()>;
    fn write(&mut self, tx: &[u8], timeout: TimeoutMs) -> PortResult<()>;
    fn read(&mut self, rx: &mut [u8], timeout: TimeoutMs) -> PortResult<()>;
    /// Assert/deassert CS honoring the configured active level.
    fn set_cs(&mut self, asserted: bool) -> PortResult<()>;
    fn delay_us(&mut self, us: u32);
    fn set_clock(&mut self, speed_hz: FrequencyHz) -> PortResult<()>;
    fn set_mode(&mut self, mode: SpiMode) -> PortResult<()>;
}

// ---------------------------------------------------------------------------
// LEDC (PWM)
// ---------------------------------------------------------------------------

/// Timers in the LEDC block.
pub const LEDC_TIMERS: usize = 4;

/// Channels in the LEDC block.
pub const LEDC_CHANNELS: usize = 8;

/// LEDC block operations.
pub trait LedcOps: PortClock {
    fn configure_timer(
        &mut self,
        timer: u8,
        frequency_hz: FrequencyHz,
        resolution_bits: u8,
    ) -> PortResult<()>;
    fn release_timer(&mut self, timer: u8) -> PortResult<()>;
    fn pause_timer(&mut self, timer: u8) -> PortResult<()>;
    fn resume_timer(&mut self, timer: u8) -> PortResult<()>;
    fn configure_channel(
        &mut self,
        channel: u8,
        pin: PinNumber,
        timer: u8,
        raw_duty: u32,
        invert: bool,
        idle_level: bool,
    ) -> PortResult<()>;
    /// Park the output at `idle_level` and detach the channel.
    fn release_channel(&mut self, channel: u8, idle_level: bool) -> PortResult<()>;
    /// Latch duty and phase; visible after [`update_duty`](LedcOps::update_duty).
    fn set_duty(&mut self, channel: u8, raw_duty: u32, phase_raw: u32) -> PortResult<()>;
    fn update_duty(&mut self, channel: u8) -> PortResult<()>;
    fn set_frequency(&mut self, timer: u8, frequency_hz: FrequencyHz) -> PortResult<()>;
    fn current_duty(&self, channel: u8) -> PortResult<u32>;
    fn start_fade(&mut self, channel: u8, target_raw: u32, duration_ms: u32) -> PortResult<()>;
    fn stop_fade(&mut self, channel: u8) -> PortResult<()>;
    fn is_fade_running(&self, channel: u8) -> bool;
}

// ---------------------------------------------------------------------------
// RMT (PIO)
// ---------------------------------------------------------------------------

/// Symbol words per RMT memory block.
pub const RMT_SYMBOLS_PER_BLOCK: usize = 48;

/// RMT channel operations. Symbols cross this seam in the packed raw
/// format; conversion happens in the driver.
pub trait RmtOps: PortClock {
    fn create_tx_channel(
        &mut self,
        channel: u8,
        pin: PinNumber,
        resolution_hz: FrequencyHz,
        memory_blocks: u8,
        queue_depth: u8,
        with_dma: bool,
    ) -> PortResult<()>;
    fn create_rx_channel(
        &mut self,
        channel: u8,
        pin: PinNumber,
        resolution_hz: FrequencyHz,
        memory_blocks: u8,
        buffer_symbols: usize,
    ) -> PortResult<()>;
    fn delete_channel(&mut self, channel: u8) -> PortResult<()>;
    /// Queue a raw symbol stream for transmission.
    fn transmit(&mut self, channel: u8, raw: &[RawSymbol]) -> PortResult<()>;
    /// Stream a hardware-encoder output. Unlike [`transmit`](RmtOps::transmit)
    /// this is not bounded by the channel's symbol memory; the encoder
    /// refills it on the fly.
    fn transmit_encoded(&mut self, channel: u8, raw: &[RawSymbol]) -> PortResult<()>;
    fn wait_tx_done(&mut self, channel: u8, timeout: TimeoutMs) -> PortResult<()>;
    fn is_tx_done(&self, channel: u8) -> bool;
    /// Arm capture until idle timeout or buffer full.
    fn start_receive(&mut self, channel: u8, idle_timeout_us: u32) -> PortResult<()>;
    /// Disarm capture; returns symbols captured so far.
    fn stop_receive(&mut self, channel: u8) -> PortResult<usize>;
    /// Copy out captured raw symbols.
    fn read_received(&mut self, channel: u8, out: &mut [RawSymbol]) -> PortResult<usize>;
    fn configure_carrier(
        &mut self,
        channel: u8,
        frequency_hz: FrequencyHz,
        duty: f32,
    ) -> PortResult<()>;
    /// Route the channel's TX path back into its capture buffer.
    fn set_loopback(&mut self, channel: u8, enable: bool) -> PortResult<()>;
}

// ---------------------------------------------------------------------------
// Periodic timer
// ---------------------------------------------------------------------------

/// Timebase alarm operations.
pub trait TimerOps: PortClock {
    fn create(&mut self, callback: TimerCallback, user: usize) -> PortResult<()>;
    fn delete(&mut self) -> PortResult<()>;
    fn start_periodic(&mut self, period_us: u64) -> PortResult<()>;
    fn stop(&mut self) -> PortResult<()>;
    /// Re-arm with a new period; effective on the next expiry.
    fn set_period(&mut self, period_us: u64) -> PortResult<()>;
    /// Expiries delivered since `create`.
    fn expiry_count(&self) -> u64;
    /// Overrun occurrences since `create`: a tick landing while the
    /// previous callback still runs counts once, however many ticks were
    /// coalesced.
    fn missed_count(&self) -> u32;
}

// ---------------------------------------------------------------------------
// NVS
// ---------------------------------------------------------------------------

/// Stored value kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NvsValueKind {
    U32,
    Str,
    Blob,
}

/// Namespaced key/value store operations. Mutations land in the pending
/// area; `commit` makes them visible to readers.
pub trait NvsOps {
    fn open(&mut self, namespace: &str) -> PortResult<()>;
    fn close(&mut self);
    fn set_u32(&mut self, key: &str, value: u32) -> PortResult<()>;
    fn get_u32(&mut self, key: &str) -> PortResult<u32>;
    fn set_str(&mut self, key: &str, value: &str) -> PortResult<()>;
    fn get_str(&mut self, key: &str, buf: &mut [u8]) -> PortResult<usize>;
    fn set_blob(&mut self, key: &str, value: &[u8]) -> PortResult<()>;
    fn get_blob(&mut self, key: &str, buf: &mut [u8]) -> PortResult<usize>;
    fn erase_key(&mut self, key: &str) -> PortResult<()>;
    fn commit(&mut self) -> PortResult<()>;
    /// Kind and size of a committed entry.
    fn entry_info(&mut self, key: &str) -> PortResult<(NvsValueKind, usize)>;
}
