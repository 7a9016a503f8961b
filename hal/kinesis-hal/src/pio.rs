//! PIO / symbol engine contract (RMT-style block)
//!
//! Channels emit or capture sequences of `{duration_ticks, level}` symbols
//! at a configurable nanosecond resolution. This is the mechanism behind
//! IR protocols, addressable-LED strips and one-off digital protocols.
//!
//! A transmit is either fully queued or rejected; receive stores symbols
//! in arrival order until the idle timeout fires or the buffer fills.

use crate::peripheral::Peripheral;
use crate::types::{FrequencyHz, PinNumber, TimestampUs, INVALID_PIN};

/// PIO error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PioError {
    Failure,
    NotInitialized,
    AlreadyInitialized,
    InvalidParameter,
    NullPointer,
    OutOfMemory,
    InvalidChannel,
    ChannelNotConfigured,
    /// Channel already transmitting or receiving.
    ChannelBusy,
    ChannelNotBusy,
    InvalidPin,
    PinBusy,
    InvalidResolution,
    /// Symbol duration exceeds the hardware tick field.
    DurationTooLong,
    /// Packed stream does not fit the configured memory blocks.
    BufferOverflow,
    BufferTooSmall,
    TransmitFailure,
    ReceiveFailure,
    Timeout,
    HardwareFault,
    CommunicationFailure,
    InvalidConfiguration,
    UnsupportedOperation,
    EncoderFailure,
    /// No specialized encoder created for this channel.
    EncoderNotConfigured,
}

impl PioError {
    /// Human-readable description of the error kind.
    pub const fn description(self) -> &'static str {
        match self {
            PioError::Failure => "General failure",
            PioError::NotInitialized => "Not initialized",
            PioError::AlreadyInitialized => "Already initialized",
            PioError::InvalidParameter => "Invalid parameter",
            PioError::NullPointer => "Null pointer",
            PioError::OutOfMemory => "Out of memory",
            PioError::InvalidChannel => "Invalid channel",
            PioError::ChannelNotConfigured => "Channel not configured",
            PioError::ChannelBusy => "Channel busy",
            PioError::ChannelNotBusy => "Channel not busy",
            PioError::InvalidPin => "Invalid pin",
            PioError::PinBusy => "Pin busy",
            PioError::InvalidResolution => "Invalid resolution",
            PioError::DurationTooLong => "Duration too long",
            PioError::BufferOverflow => "Buffer overflow",
            PioError::BufferTooSmall => "Buffer too small",
            PioError::TransmitFailure => "Transmit failure",
            PioError::ReceiveFailure => "Receive failure",
            PioError::Timeout => "Timeout",
            PioError::HardwareFault => "Hardware fault",
            PioError::CommunicationFailure => "Communication failure",
            PioError::InvalidConfiguration => "Invalid configuration",
            PioError::UnsupportedOperation => "Unsupported operation",
            PioError::EncoderFailure => "Encoder failure",
            PioError::EncoderNotConfigured => "Encoder not configured",
        }
    }
}

impl core::fmt::Display for PioError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.description())
    }
}

/// Result alias for PIO operations.
pub type PioResult<T> = Result<T, PioError>;

/// One symbol: a level held for a number of channel ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PioSymbol {
    pub duration_ticks: u32,
    pub level: bool,
}

impl PioSymbol {
    pub const fn new(duration_ticks: u32, level: bool) -> Self {
        Self {
            duration_ticks,
            level,
        }
    }

    pub const fn high(duration_ticks: u32) -> Self {
        Self::new(duration_ticks, true)
    }

    pub const fn low(duration_ticks: u32) -> Self {
        Self::new(duration_ticks, false)
    }
}

/// Raw hardware symbol word: two `{15-bit duration, 1-bit level}` halves
/// packed into 32 bits per the peripheral ABI.
pub type RawSymbol = u32;

/// Largest duration one raw half-word can carry.
pub const MAX_RAW_DURATION_TICKS: u32 = 0x7FFF;

/// Channel direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PioDirection {
    #[default]
    Transmit,
    Receive,
}

/// Signal polarity on the pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PioPolarity {
    #[default]
    Normal,
    Inverted,
}

/// Line level between transmissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PioIdleState {
    #[default]
    Low,
    High,
}

/// Channel state per the per-channel lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PioChannelState {
    #[default]
    Unconfigured,
    Idle,
    BusyTransmit,
    BusyReceive,
}

/// Channel configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PioChannelConfig {
    pub gpio_pin: PinNumber,
    pub direction: PioDirection,
    /// Nanoseconds per tick, bounded by the capabilities.
    pub resolution_ns: u32,
    pub polarity: PioPolarity,
    pub idle_state: PioIdleState,
    /// RX idle timeout, microseconds.
    pub timeout_us: u32,
    /// RX buffer capacity in symbols.
    pub buffer_size: usize,
}

impl Default for PioChannelConfig {
    fn default() -> Self {
        Self {
            gpio_pin: INVALID_PIN,
            direction: PioDirection::Transmit,
            resolution_ns: 1000,
            polarity: PioPolarity::Normal,
            idle_state: PioIdleState::Low,
            timeout_us: 10_000,
            buffer_size: 64,
        }
    }
}

/// Advanced per-channel tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PioAdvancedConfig {
    /// Hardware symbol memory blocks dedicated to the channel.
    pub memory_blocks: u8,
    pub enable_dma: bool,
    /// TX queue depth for back-to-back transmissions.
    pub queue_depth: u8,
}

impl Default for PioAdvancedConfig {
    fn default() -> Self {
        Self {
            memory_blocks: 1,
            enable_dma: false,
            queue_depth: 4,
        }
    }
}

/// Engine capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PioCapabilities {
    pub max_channels: u8,
    pub tx_channels: u8,
    pub rx_channels: u8,
    pub min_resolution_ns: u32,
    pub max_resolution_ns: u32,
    pub max_duration_ticks: u32,
    /// Symbols per memory block.
    pub symbols_per_block: usize,
    pub max_buffer_size: usize,
    pub supports_dma: bool,
    pub supports_carrier: bool,
    pub supports_loopback: bool,
}

/// Channel status snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PioChannelStatus {
    pub state: PioChannelState,
    pub direction: PioDirection,
    pub resolution_ns: u32,
    pub symbols_queued: usize,
    pub symbols_received: usize,
    pub carrier_enabled: bool,
}

/// WS2812-family encoder timings, nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Ws2812Timing {
    pub t0h_ns: u32,
    pub t0l_ns: u32,
    pub t1h_ns: u32,
    pub t1l_ns: u32,
    /// Low period after the last byte; the strip latches on this.
    pub reset_ns: u32,
}

impl Default for Ws2812Timing {
    fn default() -> Self {
        // WS2812B datasheet nominals
        Self {
            t0h_ns: 400,
            t0l_ns: 850,
            t1h_ns: 800,
            t1l_ns: 450,
            reset_ns: 50_000,
        }
    }
}

/// Transmit-complete callback, ISR context.
pub type PioTransmitCallback = fn(channel: u8, user: usize);

/// Receive-complete callback, ISR context. The symbol slice is valid only
/// for the duration of the call; copy before returning.
pub type PioReceiveCallback = fn(channel: u8, symbols: &[PioSymbol], user: usize);

/// Error callback, ISR context.
pub type PioErrorCallback = fn(channel: u8, error: PioError, user: usize);

/// Monotonic operation counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PioStatistics {
    pub transmissions: u64,
    pub receptions: u64,
    pub symbols_transmitted: u64,
    pub symbols_received: u64,
    pub transmit_failures: u32,
    pub receive_failures: u32,
    pub receive_overflows: u32,
    pub last_activity_us: TimestampUs,
}

/// Health snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PioDiagnostics {
    pub healthy: bool,
    pub last_error: Option<PioError>,
    pub last_error_us: TimestampUs,
    pub consecutive_errors: u32,
}

impl Default for PioDiagnostics {
    fn default() -> Self {
        Self {
            healthy: true,
            last_error: None,
            last_error_us: 0,
            consecutive_errors: 0,
        }
    }
}

/// Symbol engine contract.
///
/// Channels are independent: several may transmit or receive at once, but
/// a single channel must be idle before starting a new operation
/// (`ChannelBusy` otherwise; the request is not queued).
pub trait Pio: Peripheral<Error = PioError> {
    fn configure_channel(&mut self, channel: u8, config: PioChannelConfig) -> PioResult<()>;

    /// Queue `symbols` for transmission. With `wait`, block until the
    /// hardware completes; the channel lock is released while waiting.
    fn transmit(&mut self, channel: u8, symbols: &[PioSymbol], wait: bool) -> PioResult<()>;

    /// Arm reception into the channel's buffer until the idle timeout or
    /// capacity is reached.
    fn start_receive(&mut self, channel: u8) -> PioResult<()>;
    /// Disarm reception; returns the number of symbols captured.
    fn stop_receive(&mut self, channel: u8) -> PioResult<usize>;
    /// Copy captured symbols out. Returns the count copied.
    fn read_received(&mut self, channel: u8, out: &mut [PioSymbol]) -> PioResult<usize>;

    fn is_channel_busy(&self, channel: u8) -> bool;
    fn channel_status(&self, channel: u8) -> PioResult<PioChannelStatus>;
    fn capabilities(&self) -> PioCapabilities;

    // --- Callbacks ---

    fn set_transmit_callback(&mut self, channel: u8, callback: PioTransmitCallback, user: usize);
    fn set_receive_callback(&mut self, channel: u8, callback: PioReceiveCallback, user: usize);
    fn set_error_callback(&mut self, channel: u8, callback: PioErrorCallback, user: usize);
    fn clear_channel_callbacks(&mut self, channel: u8);
    fn clear_callbacks(&mut self);

    // --- Raw symbol forms ---

    fn transmit_raw_symbols(&mut self, channel: u8, raw: &[RawSymbol], wait: bool) -> PioResult<()>;
    fn receive_raw_symbols(
        &mut self,
        channel: u8,
        raw: &mut [RawSymbol],
        timeout_us: u32,
    ) -> PioResult<usize>;

    // --- Advanced ---

    fn configure_advanced(&mut self, channel: u8, config: PioAdvancedConfig) -> PioResult<()>;
    /// Superimpose a carrier on active-high symbols; `freq_hz == 0`
    /// disables it. Duty is `0.0-1.0`.
    fn configure_carrier(&mut self, channel: u8, freq_hz: FrequencyHz, duty: f32) -> PioResult<()>;
    fn enable_loopback(&mut self, channel: u8, enable: bool) -> PioResult<()>;

    // --- WS2812-family encoder ---

    /// Create the hardware byte encoder for addressable LEDs on this
    /// channel.
    fn create_ws2812_encoder(
        &mut self,
        channel: u8,
        resolution_hz: FrequencyHz,
        timing: Ws2812Timing,
    ) -> PioResult<()>;
    /// Stream GRB bytes through the encoder.
    fn transmit_ws2812(&mut self, channel: u8, grb_bytes: &[u8], wait: bool) -> PioResult<()>;

    // --- Statistics / diagnostics ---

    fn statistics(&self, channel: u8) -> PioResult<PioStatistics>;
    fn reset_statistics(&mut self, channel: u8) -> PioResult<()>;
    fn diagnostics(&self, channel: u8) -> PioResult<PioDiagnostics>;
    fn reset_diagnostics(&mut self, channel: u8) -> PioResult<()>;
}

/// Pack two symbols into one raw word. The second half may be empty
/// (zero duration) for odd-length streams.
pub const fn pack_raw(first: PioSymbol, second: PioSymbol) -> RawSymbol {
    let d0 = first.duration_ticks & MAX_RAW_DURATION_TICKS;
    let l0 = first.level as u32;
    let d1 = second.duration_ticks & MAX_RAW_DURATION_TICKS;
    let l1 = second.level as u32;
    d0 | (l0 << 15) | (d1 << 16) | (l1 << 31)
}

/// Unpack a raw word into its two symbol halves.
pub const fn unpack_raw(raw: RawSymbol) -> (PioSymbol, PioSymbol) {
    (
        PioSymbol {
            duration_ticks: raw & MAX_RAW_DURATION_TICKS,
            level: (raw >> 15) & 1 == 1,
        },
        PioSymbol {
            duration_ticks: (raw >> 16) & MAX_RAW_DURATION_TICKS,
            level: (raw >> 31) & 1 == 1,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_unpack_round_trip() {
        let a = PioSymbol::high(0x1234);
        let b = PioSymbol::low(0x7FFF);
        let raw = pack_raw(a, b);
        let (ua, ub) = unpack_raw(raw);
        assert_eq!(ua, a);
        assert_eq!(ub, b);
    }

    #[test]
    fn test_pack_masks_oversized_duration() {
        let raw = pack_raw(PioSymbol::high(0xFFFF_FFFF), PioSymbol::low(0));
        let (a, _) = unpack_raw(raw);
        assert_eq!(a.duration_ticks, MAX_RAW_DURATION_TICKS);
        assert!(a.level);
    }

    #[test]
    fn test_ws2812_default_timing() {
        let t = Ws2812Timing::default();
        assert!(t.reset_ns >= 50_000);
        assert!(t.t1h_ns > t.t0h_ns);
    }
}
