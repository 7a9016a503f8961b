//! UART port contract
//!
//! Writes are totally ordered within a port; reads surface driver overruns
//! as `OverrunError` instead of silently dropping bytes. Mode changes
//! (RS-485, IrDA) require reinitialization.

use crate::peripheral::Peripheral;
use crate::types::{BaudRate, PinNumber, PortId, TimeoutMs, TimestampUs, INVALID_PIN, TIMEOUT_FOREVER};

/// UART error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UartError {
    Failure,
    NotInitialized,
    AlreadyInitialized,
    InvalidParameter,
    NullPointer,
    OutOfMemory,
    InvalidPin,
    PinBusy,
    InvalidConfiguration,
    UnsupportedOperation,
    InvalidBaudRate,
    Timeout,
    ReadFailure,
    WriteFailure,
    FrameError,
    ParityError,
    OverrunError,
    NoiseError,
    BreakDetected,
    /// RS-485 collision detected while transmitting.
    CollisionDetected,
    PatternNotFound,
    BufferFull,
    HardwareFault,
    CommunicationFailure,
}

impl UartError {
    /// Human-readable description of the error kind.
    pub const fn description(self) -> &'static str {
        match self {
            UartError::Failure => "General failure",
            UartError::NotInitialized => "Not initialized",
            UartError::AlreadyInitialized => "Already initialized",
            UartError::InvalidParameter => "Invalid parameter",
            UartError::NullPointer => "Null pointer",
            UartError::OutOfMemory => "Out of memory",
            UartError::InvalidPin => "Invalid pin",
            UartError::PinBusy => "Pin busy",
            UartError::InvalidConfiguration => "Invalid configuration",
            UartError::UnsupportedOperation => "Unsupported operation",
            UartError::InvalidBaudRate => "Invalid baud rate",
            UartError::Timeout => "Timeout",
            UartError::ReadFailure => "Read failure",
            UartError::WriteFailure => "Write failure",
            UartError::FrameError => "Frame error",
            UartError::ParityError => "Parity error",
            UartError::OverrunError => "Overrun error",
            UartError::NoiseError => "Noise error",
            UartError::BreakDetected => "Break detected",
            UartError::CollisionDetected => "Collision detected",
            UartError::PatternNotFound => "Pattern not found",
            UartError::BufferFull => "Buffer full",
            UartError::HardwareFault => "Hardware fault",
            UartError::CommunicationFailure => "Communication failure",
        }
    }
}

impl core::fmt::Display for UartError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.description())
    }
}

impl embedded_io::Error for UartError {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self {
            UartError::Timeout => embedded_io::ErrorKind::TimedOut,
            UartError::InvalidParameter => embedded_io::ErrorKind::InvalidInput,
            UartError::OutOfMemory => embedded_io::ErrorKind::OutOfMemory,
            _ => embedded_io::ErrorKind::Other,
        }
    }
}

/// Result alias for UART operations.
pub type UartResult<T> = Result<T, UartError>;

/// Parity setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
}

/// Stop bit count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StopBits {
    #[default]
    One,
    Two,
}

/// Hardware flow control lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlowControl {
    #[default]
    None,
    Rts,
    Cts,
    RtsCts,
}

/// Port operating mode. Transitions require reinitialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UartMode {
    #[default]
    Standard,
    Rs485HalfDuplex,
    Rs485CollisionDetect,
    Rs485AppControl,
    IrDA,
}

/// Port configuration captured at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UartConfig {
    pub port: PortId,
    pub baud_rate: BaudRate,
    /// 5-8.
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub flow_control: FlowControl,
    pub tx_pin: PinNumber,
    pub rx_pin: PinNumber,
    pub rts_pin: PinNumber,
    pub cts_pin: PinNumber,
    pub tx_buffer_size: u16,
    pub rx_buffer_size: u16,
    /// Default per-call timeout.
    pub timeout_ms: TimeoutMs,
}

impl Default for UartConfig {
    fn default() -> Self {
        Self {
            port: 0,
            baud_rate: 115_200,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
            tx_pin: INVALID_PIN,
            rx_pin: INVALID_PIN,
            rts_pin: INVALID_PIN,
            cts_pin: INVALID_PIN,
            tx_buffer_size: 256,
            rx_buffer_size: 512,
            timeout_ms: 1000,
        }
    }
}

/// RS-485 tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Rs485Config {
    /// Drive RTS as direction control.
    pub rts_as_direction: bool,
    /// Turnaround delay after the last stop bit, microseconds.
    pub turnaround_delay_us: u16,
}

/// IrDA framing tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct IrdaConfig {
    pub invert_tx: bool,
    pub invert_rx: bool,
}

/// Pattern detection configuration (e.g. AT-command `+++`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PatternConfig {
    pub pattern_char: u8,
    /// Consecutive occurrences required.
    pub count: u8,
    /// Maximum gap between pattern chars, in baud periods.
    pub char_timeout: u16,
    /// Idle required after the last char, in baud periods.
    pub post_idle: u16,
    /// Idle required before the first char, in baud periods.
    pub pre_idle: u16,
}

/// Software flow control thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SoftwareFlowConfig {
    pub enable: bool,
    /// RX fill level that sends XOFF.
    pub xoff_threshold: u16,
    /// RX drain level that sends XON.
    pub xon_threshold: u16,
}

/// Monotonic operation counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UartStatistics {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub write_operations: u64,
    pub read_operations: u64,
    pub failed_operations: u64,
    pub frame_errors: u32,
    pub parity_errors: u32,
    pub overrun_errors: u32,
    pub noise_errors: u32,
    pub breaks_detected: u32,
    pub patterns_detected: u32,
    pub last_activity_us: TimestampUs,
}

/// Health snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UartDiagnostics {
    pub healthy: bool,
    pub last_error: Option<UartError>,
    pub last_error_us: TimestampUs,
    pub consecutive_errors: u32,
}

impl Default for UartDiagnostics {
    fn default() -> Self {
        Self {
            healthy: true,
            last_error: None,
            last_error_us: 0,
            consecutive_errors: 0,
        }
    }
}

/// Size of the internal formatting buffer used by [`Uart::write_fmt`].
pub const UART_FMT_BUFFER_SIZE: usize = 256;

/// UART port contract.
pub trait Uart: Peripheral<Error = UartError> {
    fn port(&self) -> PortId;

    // --- Data path ---

    /// Write the whole buffer or fail.
    fn write(&mut self, data: &[u8], timeout: TimeoutMs) -> UartResult<()>;
    /// Read available bytes into `buf`, blocking until at least one byte
    /// arrives or the timeout elapses. Returns the count read.
    fn read(&mut self, buf: &mut [u8], timeout: TimeoutMs) -> UartResult<usize>;
    fn bytes_available(&mut self) -> UartResult<usize>;
    fn flush_tx(&mut self, timeout: TimeoutMs) -> UartResult<()>;
    fn flush_rx(&mut self) -> UartResult<()>;
    /// Block until the TX FIFO and shift register drain.
    fn wait_transmit_complete(&mut self, timeout: TimeoutMs) -> UartResult<()>;

    /// Format into an internal 256-byte buffer, then write. Output longer
    /// than the buffer is truncated. Returns the bytes written.
    fn write_fmt_buffered(&mut self, args: core::fmt::Arguments<'_>) -> UartResult<usize> {
        struct FmtBuf {
            buf: [u8; UART_FMT_BUFFER_SIZE],
            len: usize,
        }
        impl core::fmt::Write for FmtBuf {
            fn write_str(&mut self, s: &str) -> core::fmt::Result {
                let bytes = s.as_bytes();
                let room = self.buf.len() - self.len;
                let take = bytes.len().min(room);
                self.buf[self.len..self.len + take].copy_from_slice(&bytes[..take]);
                self.len += take;
                Ok(())
            }
        }
        let mut fmt = FmtBuf {
            buf: [0; UART_FMT_BUFFER_SIZE],
            len: 0,
        };
        // Truncation is not an error; formatting itself cannot fail here.
        let _ = core::fmt::write(&mut fmt, args);
        let len = fmt.len;
        self.write(&fmt.buf[..len], TIMEOUT_FOREVER)?;
        Ok(len)
    }

    /// Read until `terminator` (consumed, not stored) or timeout. Returns
    /// the count stored in `buf`.
    fn read_until(&mut self, buf: &mut [u8], terminator: u8, timeout: TimeoutMs)
        -> UartResult<usize>;
    /// Read one line, stripping a trailing CRLF or LF.
    fn read_line(&mut self, buf: &mut [u8], timeout: TimeoutMs) -> UartResult<usize>;

    // --- Line configuration ---

    fn set_baud_rate(&mut self, baud_rate: BaudRate) -> UartResult<()>;
    fn baud_rate(&self) -> BaudRate;
    fn set_flow_control(&mut self, flow: FlowControl) -> UartResult<()>;
    fn set_rts(&mut self, active: bool) -> UartResult<()>;
    fn get_cts(&mut self) -> UartResult<bool>;
    /// Hold the line in break condition for `duration_ms`.
    fn send_break(&mut self, duration_ms: u32) -> UartResult<()>;
    /// Sticky break flag; cleared by this read.
    fn is_break_detected(&mut self) -> bool;

    // --- Modes ---

    /// Switch operating mode. Reinitializes the port.
    fn set_communication_mode(&mut self, mode: UartMode) -> UartResult<()>;
    fn communication_mode(&self) -> UartMode;
    fn configure_rs485(&mut self, config: Rs485Config) -> UartResult<()>;
    fn is_rs485_collision_detected(&mut self) -> bool;
    fn configure_irda(&mut self, config: IrdaConfig) -> UartResult<()>;

    // --- Pattern detection ---

    fn configure_pattern_detection(&mut self, config: PatternConfig) -> UartResult<()>;
    fn disable_pattern_detection(&mut self) -> UartResult<()>;
    /// Pop the position of the oldest detected pattern in the RX buffer.
    fn get_pattern_position(&mut self, pop: bool) -> UartResult<usize>;

    // --- Advanced ---

    fn configure_software_flow_control(&mut self, config: SoftwareFlowConfig) -> UartResult<()>;
    fn configure_wakeup(&mut self, rx_threshold: u16) -> UartResult<()>;
    /// RX-full, TX-empty and RX-timeout interrupt thresholds.
    fn set_interrupt_thresholds(
        &mut self,
        rx_full: u8,
        tx_empty: u8,
        rx_timeout: u8,
    ) -> UartResult<()>;
    fn set_signal_inversion(&mut self, invert_tx: bool, invert_rx: bool) -> UartResult<()>;
    /// Internal loopback for self-test.
    fn set_loopback(&mut self, enable: bool) -> UartResult<()>;

    // --- Statistics / diagnostics ---

    fn statistics(&self) -> UartStatistics;
    fn reset_statistics(&mut self);
    fn diagnostics(&self) -> UartDiagnostics;
    fn reset_diagnostics(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_8n1() {
        let cfg = UartConfig::default();
        assert_eq!(cfg.data_bits, 8);
        assert_eq!(cfg.parity, Parity::None);
        assert_eq!(cfg.stop_bits, StopBits::One);
        assert_eq!(cfg.baud_rate, 115_200);
    }

    #[test]
    fn test_error_display() {
        assert_eq!(UartError::OverrunError.description(), "Overrun error");
        assert_eq!(UartError::BreakDetected.description(), "Break detected");
    }
}
