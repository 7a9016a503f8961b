//! I2C master contract
//!
//! Exactly one bus-level transaction runs at a time. Multi-buffer
//! transactions are atomic with respect to stop conditions: a repeated
//! start separates the buffers, a single stop ends the run. Reserved
//! 7-bit addresses (0x00-0x07, 0x78-0x7F) are rejected.

use crate::peripheral::Peripheral;
use crate::types::{ClockSource, FrequencyHz, PinNumber, PortId, TimeoutMs, TimestampUs, INVALID_PIN};

/// I2C error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum I2cError {
    Failure,
    NotInitialized,
    AlreadyInitialized,
    InvalidParameter,
    NullPointer,
    OutOfMemory,
    InvalidPin,
    PinBusy,
    InvalidAddress,
    /// Address in a reserved range for its bit width.
    ReservedAddress,
    DeviceNotFound,
    DeviceNotResponding,
    /// NACK received during the address phase.
    AddressNack,
    /// NACK received during the data phase.
    DataNack,
    ArbitrationLost,
    /// Slave stretched the clock past the configured limit.
    ClockStretchTimeout,
    BusBusy,
    BusSuspended,
    Timeout,
    ReadFailure,
    WriteFailure,
    HardwareFault,
    CommunicationFailure,
    InvalidConfiguration,
    UnsupportedOperation,
    /// 7- and 10-bit devices mixed in one transaction.
    AddressWidthMismatch,
    /// Async operation table exhausted.
    TooManyPendingOperations,
    OperationAborted,
}

impl I2cError {
    /// Human-readable description of the error kind.
    pub const fn description(self) -> &'static str {
        match self {
            I2cError::Failure => "General failure",
            I2cError::NotInitialized => "Not initialized",
            I2cError::AlreadyInitialized => "Already initialized",
            I2cError::InvalidParameter => "Invalid parameter",
            I2cError::NullPointer => "Null pointer",
            I2cError::OutOfMemory => "Out of memory",
            I2cError::InvalidPin => "Invalid pin",
            I2cError::PinBusy => "Pin busy",
            I2cError::InvalidAddress => "Invalid address",
            I2cError::ReservedAddress => "Reserved address",
            I2cError::DeviceNotFound => "Device not found",
            I2cError::DeviceNotResponding => "Device not responding",
            I2cError::AddressNack => "Address not acknowledged",
            I2cError::DataNack => "Data not acknowledged",
            I2cError::ArbitrationLost => "Arbitration lost",
            I2cError::ClockStretchTimeout => "Clock stretching timeout",
            I2cError::BusBusy => "Bus busy",
            I2cError::BusSuspended => "Bus suspended",
            I2cError::Timeout => "Timeout",
            I2cError::ReadFailure => "Read failure",
            I2cError::WriteFailure => "Write failure",
            I2cError::HardwareFault => "Hardware fault",
            I2cError::CommunicationFailure => "Communication failure",
            I2cError::InvalidConfiguration => "Invalid configuration",
            I2cError::UnsupportedOperation => "Unsupported operation",
            I2cError::AddressWidthMismatch => "Address width mismatch",
            I2cError::TooManyPendingOperations => "Too many pending operations",
            I2cError::OperationAborted => "Operation aborted",
        }
    }
}

impl core::fmt::Display for I2cError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.description())
    }
}

impl embedded_hal::i2c::Error for I2cError {
    fn kind(&self) -> embedded_hal::i2c::ErrorKind {
        use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource};
        match self {
            I2cError::AddressNack | I2cError::DeviceNotFound | I2cError::DeviceNotResponding => {
                ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address)
            }
            I2cError::DataNack => ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data),
            I2cError::ArbitrationLost => ErrorKind::ArbitrationLoss,
            _ => ErrorKind::Other,
        }
    }
}

/// Result alias for I2C operations.
pub type I2cResult<T> = Result<T, I2cError>;

/// First probe-able 7-bit address.
pub const I2C_FIRST_VALID_ADDRESS: u8 = 0x08;
/// Last probe-able 7-bit address.
pub const I2C_LAST_VALID_ADDRESS: u8 = 0x77;

/// Address bit width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AddressBits {
    #[default]
    Seven,
    Ten,
}

/// Power management mode for the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum I2cPowerMode {
    #[default]
    Full,
    Low,
    Sleep,
}

/// Bus configuration captured at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct I2cConfig {
    pub port: PortId,
    pub clock_speed_hz: FrequencyHz,
    pub scl_pin: PinNumber,
    pub sda_pin: PinNumber,
    /// Engage the internal pull-ups.
    pub pullups: bool,
    pub timeout_ms: TimeoutMs,
    pub clock_source: ClockSource,
    pub digital_filter_enabled: bool,
    /// Digital glitch filter length in clock cycles.
    pub digital_filter_length: u8,
    pub analog_filter_enabled: bool,
    /// Clock stretch tolerance, microseconds.
    pub clock_stretch_timeout_us: u32,
    /// Preserve configuration across light sleep.
    pub sleep_retention: bool,
}

impl I2cConfig {
    /// Standard mode (100 kHz).
    pub const STANDARD_SPEED: FrequencyHz = 100_000;
    /// Fast mode (400 kHz).
    pub const FAST_SPEED: FrequencyHz = 400_000;
    /// Fast mode plus (1 MHz).
    pub const FAST_PLUS_SPEED: FrequencyHz = 1_000_000;
}

impl Default for I2cConfig {
    fn default() -> Self {
        Self {
            port: 0,
            clock_speed_hz: Self::STANDARD_SPEED,
            scl_pin: INVALID_PIN,
            sda_pin: INVALID_PIN,
            pullups: true,
            timeout_ms: 1000,
            clock_source: ClockSource::Default,
            digital_filter_enabled: true,
            digital_filter_length: 7,
            analog_filter_enabled: true,
            clock_stretch_timeout_us: 10_000,
            sleep_retention: false,
        }
    }
}

/// Per-device configuration in the device table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct I2cDeviceConfig {
    pub address: u16,
    pub address_bits: AddressBits,
    pub timeout_ms: TimeoutMs,
    pub retries: u8,
}

impl I2cDeviceConfig {
    /// 7-bit device with bus-default timeout and no retries.
    pub const fn seven_bit(address: u8) -> Self {
        Self {
            address: address as u16,
            address_bits: AddressBits::Seven,
            timeout_ms: 0,
            retries: 0,
        }
    }
}

/// Validate an address against its bit width, rejecting reserved ranges.
pub const fn is_valid_device_address(address: u16, bits: AddressBits) -> bool {
    match bits {
        AddressBits::Seven => {
            address >= I2C_FIRST_VALID_ADDRESS as u16 && address <= I2C_LAST_VALID_ADDRESS as u16
        }
        AddressBits::Ten => address <= 0x3FF,
    }
}

/// One element of a multi-buffer transaction.
#[derive(Debug)]
pub enum I2cOperation<'a> {
    Write(&'a [u8]),
    Read(&'a mut [u8]),
}

/// One step of a custom command sequence.
#[derive(Debug)]
pub enum I2cCommand<'a> {
    Start,
    RepeatedStart,
    Stop,
    /// Busy-wait between bus phases.
    DelayUs(u32),
    Write(&'a [u8]),
    Read(&'a mut [u8]),
}

/// Async completion callback, invoked from the driver's event context.
pub type I2cEventCallback = fn(operation_id: u32, result: Result<(), I2cError>, user: usize);

/// Monotonic operation counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct I2cStatistics {
    pub transactions: u64,
    pub successful_transactions: u64,
    pub failed_transactions: u64,
    pub bytes_written: u64,
    pub bytes_read: u64,
    pub nack_errors: u32,
    pub arbitration_losses: u32,
    pub clock_stretch_timeouts: u32,
    pub devices_found_last_scan: u8,
    pub last_activity_us: TimestampUs,
}

/// Health snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct I2cDiagnostics {
    pub healthy: bool,
    pub last_error: Option<I2cError>,
    pub last_error_us: TimestampUs,
    pub consecutive_errors: u32,
    /// SDA observed high at idle.
    pub sda_idle_high: bool,
    /// SCL observed high at idle.
    pub scl_idle_high: bool,
}

impl Default for I2cDiagnostics {
    fn default() -> Self {
        Self {
            healthy: true,
            last_error: None,
            last_error_us: 0,
            consecutive_errors: 0,
            sda_idle_high: true,
            scl_idle_high: true,
        }
    }
}

/// I2C master contract.
pub trait I2cBus: Peripheral<Error = I2cError> {
    fn port(&self) -> PortId;

    // --- Synchronous transfers ---

    fn write(&mut self, address: u16, data: &[u8], timeout: TimeoutMs) -> I2cResult<()>;
    fn read(&mut self, address: u16, buf: &mut [u8], timeout: TimeoutMs) -> I2cResult<()>;
    /// Write then read under a repeated start, no intermediate stop.
    fn write_read(
        &mut self,
        address: u16,
        tx: &[u8],
        rx: &mut [u8],
        timeout: TimeoutMs,
    ) -> I2cResult<()>;

    // --- Register helpers ---

    fn write_register(&mut self, address: u16, register: u8, value: u8) -> I2cResult<()>;
    fn read_register(&mut self, address: u16, register: u8) -> I2cResult<u8>;
    fn write_registers(&mut self, address: u16, register: u8, values: &[u8]) -> I2cResult<()>;
    fn read_registers(&mut self, address: u16, register: u8, out: &mut [u8]) -> I2cResult<()>;

    // --- Transactions ---

    /// Execute all operations under one start/stop pair, with repeated
    /// starts at write/read boundaries.
    fn transaction(
        &mut self,
        address: u16,
        operations: &mut [I2cOperation<'_>],
        timeout: TimeoutMs,
    ) -> I2cResult<()>;
    /// Execute an explicit command sequence.
    fn run_sequence(
        &mut self,
        address: u16,
        commands: &mut [I2cCommand<'_>],
        timeout: TimeoutMs,
    ) -> I2cResult<()>;

    // --- Asynchronous forms ---

    /// Queue a write; the callback fires from the driver's event context.
    /// Returns the operation id.
    fn write_async(
        &mut self,
        address: u16,
        data: &[u8],
        callback: I2cEventCallback,
        user: usize,
    ) -> I2cResult<u32>;
    /// Queue a read into `buf`; the buffer is filled before the
    /// completion callback fires.
    fn read_async(
        &mut self,
        address: u16,
        buf: &mut [u8],
        callback: I2cEventCallback,
        user: usize,
    ) -> I2cResult<u32>;
    fn cancel_async(&mut self, operation_id: u32) -> I2cResult<()>;

    // --- Device management ---

    fn add_device(&mut self, config: I2cDeviceConfig) -> I2cResult<()>;
    fn remove_device(&mut self, address: u16) -> I2cResult<()>;
    /// Probe a single address with a zero-length write.
    fn probe_device(&mut self, address: u16) -> I2cResult<bool>;
    /// Probe `first..=last`, collecting ACKing addresses into `found`.
    /// Returns the number found.
    fn scan_devices(&mut self, found: &mut [u16], first: u8, last: u8) -> I2cResult<usize>;

    // --- Power management ---

    fn set_power_mode(&mut self, mode: I2cPowerMode) -> I2cResult<()>;
    fn suspend_bus(&mut self) -> I2cResult<()>;
    fn resume_bus(&mut self) -> I2cResult<()>;

    // --- Statistics / diagnostics ---

    fn statistics(&self) -> I2cStatistics;
    fn reset_statistics(&mut self);
    fn diagnostics(&self) -> I2cDiagnostics;
    fn reset_diagnostics(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_addresses_rejected() {
        for addr in 0x00..=0x07u16 {
            assert!(!is_valid_device_address(addr, AddressBits::Seven));
        }
        for addr in 0x78..=0x7Fu16 {
            assert!(!is_valid_device_address(addr, AddressBits::Seven));
        }
        assert!(is_valid_device_address(0x08, AddressBits::Seven));
        assert!(is_valid_device_address(0x48, AddressBits::Seven));
        assert!(is_valid_device_address(0x77, AddressBits::Seven));
    }

    #[test]
    fn test_ten_bit_address_range() {
        assert!(is_valid_device_address(0x3FF, AddressBits::Ten));
        assert!(!is_valid_device_address(0x400, AddressBits::Ten));
        // Low addresses are fine in 10-bit mode
        assert!(is_valid_device_address(0x004, AddressBits::Ten));
    }
}
