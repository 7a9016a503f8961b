//! SPI master contract
//!
//! Chip select is asserted for the full duration of a transfer, either
//! automatically per call or manually across a sequence. Transfers longer
//! than the host's DMA limit are rejected outright.

use crate::peripheral::Peripheral;
use crate::types::{FrequencyHz, HostId, PinNumber, TimeoutMs, TimestampUs, INVALID_PIN};

/// SPI error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SpiError {
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
    InvalidMode,
    InvalidClockSpeed,
    /// Transfer exceeds the host maximum.
    TransferTooLong,
    /// Full-duplex buffers of unequal length.
    LengthMismatch,
    TransferFailure,
    BusBusy,
    Timeout,
    HardwareFault,
    CommunicationFailure,
    DmaFailure,
}

impl SpiError {
    /// Human-readable description of the error kind.
    pub const fn description(self) -> &'static str {
        match self {
            SpiError::Failure => "General failure",
            SpiError::NotInitialized => "Not initialized",
            SpiError::AlreadyInitialized => "Already initialized",
            SpiError::InvalidParameter => "Invalid parameter",
            SpiError::NullPointer => "Null pointer",
            SpiError::OutOfMemory => "Out of memory",
            SpiError::InvalidPin => "Invalid pin",
            SpiError::PinBusy => "Pin busy",
            SpiError::InvalidConfiguration => "Invalid configuration",
            SpiError::UnsupportedOperation => "Unsupported operation",
            SpiError::InvalidMode => "Invalid mode",
            SpiError::InvalidClockSpeed => "Invalid clock speed",
            SpiError::TransferTooLong => "Transfer too long",
            SpiError::LengthMismatch => "Length mismatch",
            SpiError::TransferFailure => "Transfer failure",
            SpiError::BusBusy => "Bus busy",
            SpiError::Timeout => "Timeout",
            SpiError::HardwareFault => "Hardware fault",
            SpiError::CommunicationFailure => "Communication failure",
            SpiError::DmaFailure => "DMA failure",
        }
    }
}

impl core::fmt::Display for SpiError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.description())
    }
}

impl embedded_hal::spi::Error for SpiError {
    fn kind(&self) -> embedded_hal::spi::ErrorKind {
        embedded_hal::spi::ErrorKind::Other
    }
}

/// Result alias for SPI operations.
pub type SpiResult<T> = Result<T, SpiError>;

/// SPI mode (CPOL/CPHA).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SpiMode {
    #[default]
    Mode0,
    Mode1,
    Mode2,
    Mode3,
}

impl SpiMode {
    /// Construct from the conventional 0-3 number.
    pub const fn from_number(mode: u8) -> Option<Self> {
        match mode {
            0 => Some(SpiMode::Mode0),
            1 => Some(SpiMode::Mode1),
            2 => Some(SpiMode::Mode2),
            3 => Some(SpiMode::Mode3),
            _ => None,
        }
    }

    pub const fn cpol(self) -> bool {
        matches!(self, SpiMode::Mode2 | SpiMode::Mode3)
    }

    pub const fn cpha(self) -> bool {
        matches!(self, SpiMode::Mode1 | SpiMode::Mode3)
    }
}

/// Host configuration captured at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SpiConfig {
    pub host: HostId,
    pub mosi_pin: PinNumber,
    pub miso_pin: PinNumber,
    pub sclk_pin: PinNumber,
    pub cs_pin: PinNumber,
    pub cs_active_low: bool,
    pub mode: SpiMode,
    pub clock_speed_hz: FrequencyHz,
    pub timeout_ms: TimeoutMs,
    pub dma_enabled: bool,
    pub max_transfer_size: usize,
}

impl Default for SpiConfig {
    fn default() -> Self {
        Self {
            host: 0,
            mosi_pin: INVALID_PIN,
            miso_pin: INVALID_PIN,
            sclk_pin: INVALID_PIN,
            cs_pin: INVALID_PIN,
            cs_active_low: true,
            mode: SpiMode::Mode0,
            clock_speed_hz: 1_000_000,
            timeout_ms: 1000,
            dma_enabled: false,
            max_transfer_size: 4092,
        }
    }
}

/// One transfer in a CS-held sequence.
#[derive(Debug, Default)]
pub struct SpiTransfer<'a> {
    pub tx: Option<&'a [u8]>,
    pub rx: Option<&'a mut [u8]>,
    /// Delay after the transfer before the next one (or CS release).
    pub cs_hold_us: u32,
}

/// Monotonic operation counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SpiStatistics {
    pub transfers: u64,
    pub successful_transfers: u64,
    pub failed_transfers: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub max_transfer_bytes: usize,
    pub last_activity_us: TimestampUs,
}

/// Health snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SpiDiagnostics {
    pub healthy: bool,
    pub last_error: Option<SpiError>,
    pub last_error_us: TimestampUs,
    pub consecutive_errors: u32,
    pub cs_asserted: bool,
}

impl Default for SpiDiagnostics {
    fn default() -> Self {
        Self {
            healthy: true,
            last_error: None,
            last_error_us: 0,
            consecutive_errors: 0,
            cs_asserted: false,
        }
    }
}

/// SPI master contract.
pub trait SpiBus: Peripheral<Error = SpiError> {
    fn host(&self) -> HostId;

    // --- Transfers ---

    /// Full-duplex transfer; `tx` and `rx` must be the same length.
    fn transfer(&mut self, tx: &[u8], rx: &mut [u8], timeout: TimeoutMs) -> SpiResult<()>;
    /// Half-duplex write.
    fn write(&mut self, tx: &[u8], timeout: TimeoutMs) -> SpiResult<()>;
    /// Half-duplex read (clocks out idle bytes).
    fn read(&mut self, rx: &mut [u8], timeout: TimeoutMs) -> SpiResult<()>;
    /// Transfer, then keep CS asserted for `cs_hold_us` before release.
    fn transfer_with_timing(
        &mut self,
        tx: &[u8],
        rx: &mut [u8],
        cs_hold_us: u32,
        timeout: TimeoutMs,
    ) -> SpiResult<()>;
    /// Run all transfers under one CS assertion; CS is restored on exit
    /// even when an element fails.
    fn transfer_sequence(&mut self, transfers: &mut [SpiTransfer<'_>]) -> SpiResult<()>;

    // --- Chip select ---

    /// Manual CS control for composite operations.
    fn set_chip_select(&mut self, active: bool) -> SpiResult<()>;
    fn is_chip_select_active(&self) -> bool;

    // --- Register helpers ---

    fn write_register(&mut self, register: u8, data: &[u8]) -> SpiResult<()>;
    fn read_register(&mut self, register: u8, out: &mut [u8]) -> SpiResult<()>;

    // --- Configuration ---

    fn set_clock_speed(&mut self, speed_hz: FrequencyHz) -> SpiResult<()>;
    fn clock_speed(&self) -> FrequencyHz;
    fn set_mode(&mut self, mode: SpiMode) -> SpiResult<()>;
    fn mode(&self) -> SpiMode;
    /// Takes effect on the next initialization.
    fn set_dma_enabled(&mut self, enable: bool) -> SpiResult<()>;
    fn max_transfer_size(&self) -> usize;

    // --- Statistics / diagnostics ---

    fn statistics(&self) -> SpiStatistics;
    fn reset_statistics(&mut self);
    fn diagnostics(&self) -> SpiDiagnostics;
    fn reset_diagnostics(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_numbers() {
        assert_eq!(SpiMode::from_number(0), Some(SpiMode::Mode0));
        assert_eq!(SpiMode::from_number(3), Some(SpiMode::Mode3));
        assert_eq!(SpiMode::from_number(4), None);
    }

    #[test]
    fn test_mode_clock_phase() {
        assert!(!SpiMode::Mode0.cpol());
        assert!(!SpiMode::Mode0.cpha());
        assert!(SpiMode::Mode2.cpol());
        assert!(SpiMode::Mode3.cpha());
        assert!(!SpiMode::Mode1.cpol());
        assert!(SpiMode::Mode1.cpha());
    }

    #[test]
    fn test_default_config() {
        let cfg = SpiConfig::default();
        assert!(cfg.cs_active_low);
        assert_eq!(cfg.max_transfer_size, 4092);
    }
}
