//! I2C master driver
//!
//! Synchronous transfers, register helpers, multi-buffer transactions and
//! the async forms (completion delivered from the driver's event
//! context). Device addressing follows the per-device table: a device
//! registered as 10-bit is always addressed that way, and reserved 7-bit
//! addresses never reach the bus.

use heapless::{FnvIndexMap, Vec};

use kinesis_hal::i2c::{
    is_valid_device_address, AddressBits, I2cBus, I2cCommand, I2cConfig, I2cDeviceConfig,
    I2cDiagnostics, I2cError, I2cEventCallback, I2cOperation, I2cPowerMode, I2cResult,
    I2cStatistics, I2C_FIRST_VALID_ADDRESS, I2C_LAST_VALID_ADDRESS,
};
use kinesis_hal::peripheral::Peripheral;
use kinesis_hal::types::{is_valid_pin, PortId, TimeoutMs};

use crate::port::{I2cOps, PortClock, PortError};

/// Structural errors beyond this count mark the bus unhealthy.
const ERROR_THRESHOLD: u32 = 5;

/// Device table capacity.
const MAX_DEVICES: usize = 16;

/// Register write scratch (register byte plus payload).
const MAX_REGISTER_BURST: usize = 64;

/// I2C master driver.
pub struct I2cMaster<P: I2cOps> {
    port: P,
    config: I2cConfig,
    initialized: bool,
    suspended: bool,
    devices: FnvIndexMap<u16, I2cDeviceConfig, MAX_DEVICES>,
    next_operation_id: u32,
    stats: I2cStatistics,
    diag: I2cDiagnostics,
}

impl<P: I2cOps> I2cMaster<P> {
    /// Capture configuration; the bus is installed on first use.
    pub fn new(port: P, config: I2cConfig) -> Self {
        Self {
            port,
            config,
            initialized: false,
            suspended: false,
            devices: FnvIndexMap::new(),
            next_operation_id: 1,
            stats: I2cStatistics::default(),
            diag: I2cDiagnostics::default(),
        }
    }

    /// Captured configuration.
    pub fn config(&self) -> &I2cConfig {
        &self.config
    }

    /// Direct access to the native port (simulation and test hook).
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    fn convert_port_error(err: PortError) -> I2cError {
        match err {
            PortError::Fail => I2cError::Failure,
            PortError::NoMem => I2cError::OutOfMemory,
            PortError::InvalidArg => I2cError::InvalidParameter,
            PortError::InvalidState => I2cError::InvalidConfiguration,
            // No ACK on the address phase.
            PortError::NotFound => I2cError::AddressNack,
            PortError::NotSupported => I2cError::UnsupportedOperation,
            // The vendor driver reports the bus/stretch watchdog here.
            PortError::Timeout => I2cError::ClockStretchTimeout,
            PortError::Busy => I2cError::BusBusy,
        }
    }

    const fn is_structural(err: I2cError) -> bool {
        matches!(
            err,
            I2cError::HardwareFault
                | I2cError::CommunicationFailure
                | I2cError::DeviceNotResponding
        )
    }

    fn ready(&mut self) -> I2cResult<()> {
        if self.ensure_initialized().is_err() {
            self.stats.failed_transactions += 1;
            return Err(I2cError::NotInitialized);
        }
        if self.suspended {
            return Err(I2cError::BusSuspended);
        }
        Ok(())
    }

    /// Addressing parameters for a target: table entry or 7-bit default.
    fn resolve(&self, address: u16) -> I2cResult<(bool, TimeoutMs)> {
        if let Some(device) = self.devices.get(&address) {
            let timeout = if device.timeout_ms != 0 {
                device.timeout_ms
            } else {
                self.config.timeout_ms
            };
            return Ok((device.address_bits == AddressBits::Ten, timeout));
        }
        if !is_valid_device_address(address, AddressBits::Seven) {
            return Err(if address > 0x7F {
                I2cError::InvalidAddress
            } else {
                I2cError::ReservedAddress
            });
        }
        Ok((false, self.config.timeout_ms))
    }

    fn record<T>(&mut self, result: I2cResult<T>) -> I2cResult<T> {
        self.stats.transactions += 1;
        self.stats.last_activity_us = self.port.now_us();
        match &result {
            Ok(_) => {
                self.stats.successful_transactions += 1;
                self.diag.consecutive_errors = 0;
            }
            Err(e) => {
                self.stats.failed_transactions += 1;
                self.diag.last_error = Some(*e);
                self.diag.last_error_us = self.stats.last_activity_us;
                match e {
                    I2cError::AddressNack | I2cError::DataNack => self.stats.nack_errors += 1,
                    I2cError::ArbitrationLost => self.stats.arbitration_losses += 1,
                    I2cError::ClockStretchTimeout => self.stats.clock_stretch_timeouts += 1,
                    _ => {}
                }
                if Self::is_structural(*e) {
                    self.diag.consecutive_errors += 1;
                    if self.diag.consecutive_errors >= ERROR_THRESHOLD {
                        self.diag.healthy = false;
                    }
                }
            }
        }
        result
    }

    fn write_with_stop(
        &mut self,
        address: u16,
        data: &[u8],
        stop: bool,
        timeout: TimeoutMs,
    ) -> I2cResult<()> {
        let (ten_bit, default_timeout) = self.resolve(address)?;
        let timeout = if timeout != 0 { timeout } else { default_timeout };
        self.port
            .write(address, ten_bit, data, stop, timeout)
            .map_err(Self::convert_port_error)?;
        self.stats.bytes_written += data.len() as u64;
        Ok(())
    }

    fn read_with_stop(
        &mut self,
        address: u16,
        buf: &mut [u8],
        stop: bool,
        timeout: TimeoutMs,
    ) -> I2cResult<()> {
        let (ten_bit, default_timeout) = self.resolve(address)?;
        let timeout = if timeout != 0 { timeout } else { default_timeout };
        self.port
            .read(address, ten_bit, buf, stop, timeout)
            .map_err(Self::convert_port_error)?;
        self.stats.bytes_read += buf.len() as u64;
        Ok(())
    }
}

impl<P: I2cOps> Peripheral for I2cMaster<P> {
    type Error = I2cError;

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn initialize(&mut self) -> I2cResult<()> {
        if self.initialized {
            return Err(I2cError::AlreadyInitialized);
        }
        if !is_valid_pin(self.config.scl_pin) || !is_valid_pin(self.config.sda_pin) {
            return Err(I2cError::InvalidPin);
        }
        if self.config.clock_speed_hz == 0
            || self.config.clock_speed_hz > I2cConfig::FAST_PLUS_SPEED
        {
            return Err(I2cError::InvalidConfiguration);
        }
        self.port
            .install(&self.config)
            .map_err(Self::convert_port_error)?;
        self.initialized = true;
        self.suspended = false;
        Ok(())
    }

    fn deinitialize(&mut self) -> I2cResult<()> {
        if !self.initialized {
            return Err(I2cError::NotInitialized);
        }
        self.port.uninstall().map_err(Self::convert_port_error)?;
        self.initialized = false;
        Ok(())
    }
}

impl<P: I2cOps> I2cBus for I2cMaster<P> {
    fn port(&self) -> PortId {
        self.config.port
    }

    fn write(&mut self, address: u16, data: &[u8], timeout: TimeoutMs) -> I2cResult<()> {
        self.ready()?;
        let result = self.write_with_stop(address, data, true, timeout);
        self.record(result)
    }

    fn read(&mut self, address: u16, buf: &mut [u8], timeout: TimeoutMs) -> I2cResult<()> {
        self.ready()?;
        if buf.is_empty() {
            return self.record(Err(I2cError::InvalidParameter));
        }
        let result = self.read_with_stop(address, buf, true, timeout);
        self.record(result)
    }

    fn write_read(
        &mut self,
        address: u16,
        tx: &[u8],
        rx: &mut [u8],
        timeout: TimeoutMs,
    ) -> I2cResult<()> {
        self.ready()?;
        // Repeated start between the phases, single stop at the end.
        let result = self
            .write_with_stop(address, tx, false, timeout)
            .and_then(|()| self.read_with_stop(address, rx, true, timeout));
        self.record(result)
    }

    fn write_register(&mut self, address: u16, register: u8, value: u8) -> I2cResult<()> {
        self.write(address, &[register, value], 0)
    }

    fn read_register(&mut self, address: u16, register: u8) -> I2cResult<u8> {
        let mut value = [0u8; 1];
        self.write_read(address, &[register], &mut value, 0)?;
        Ok(value[0])
    }

    fn write_registers(&mut self, address: u16, register: u8, values: &[u8]) -> I2cResult<()> {
        if values.len() > MAX_REGISTER_BURST {
            return Err(I2cError::InvalidParameter);
        }
        let mut buf: Vec<u8, { MAX_REGISTER_BURST + 1 }> = Vec::new();
        let _ = buf.push(register);
        let _ = buf.extend_from_slice(values);
        self.write(address, &buf, 0)
    }

    fn read_registers(&mut self, address: u16, register: u8, out: &mut [u8]) -> I2cResult<()> {
        self.write_read(address, &[register], out, 0)
    }

    fn transaction(
        &mut self,
        address: u16,
        operations: &mut [I2cOperation<'_>],
        timeout: TimeoutMs,
    ) -> I2cResult<()> {
        self.ready()?;
        if operations.is_empty() {
            return self.record(Err(I2cError::InvalidParameter));
        }
        let last = operations.len() - 1;
        let mut result = Ok(());
        for (i, op) in operations.iter_mut().enumerate() {
            let stop = i == last;
            result = match op {
                I2cOperation::Write(data) => self.write_with_stop(address, data, stop, timeout),
                I2cOperation::Read(buf) => self.read_with_stop(address, buf, stop, timeout),
            };
            if result.is_err() {
                break;
            }
        }
        self.record(result)
    }

    fn run_sequence(
        &mut self,
        address: u16,
        commands: &mut [I2cCommand<'_>],
        timeout: TimeoutMs,
    ) -> I2cResult<()> {
        self.ready()?;
        if !matches!(commands.first(), Some(I2cCommand::Start)) {
            return self.record(Err(I2cError::InvalidParameter));
        }
        let mut result = Ok(());
        for command in commands.iter_mut() {
            result = match command {
                I2cCommand::Start | I2cCommand::RepeatedStart | I2cCommand::Stop => Ok(()),
                I2cCommand::DelayUs(us) => {
                    self.port.delay_us(*us);
                    Ok(())
                }
                I2cCommand::Write(data) => self.write_with_stop(address, data, false, timeout),
                I2cCommand::Read(buf) => self.read_with_stop(address, buf, false, timeout),
            };
            if result.is_err() {
                break;
            }
        }
        self.record(result)
    }

    fn write_async(
        &mut self,
        address: u16,
        data: &[u8],
        callback: I2cEventCallback,
        user: usize,
    ) -> I2cResult<u32> {
        self.ready()?;
        let operation_id = self.next_operation_id;
        self.next_operation_id = self.next_operation_id.wrapping_add(1);
        let result = self.write_with_stop(address, data, true, 0);
        let outcome = self.record(result);
        // Completion lands from the driver's event context.
        callback(operation_id, outcome, user);
        Ok(operation_id)
    }

    fn read_async(
        &mut self,
        address: u16,
        buf: &mut [u8],
        callback: I2cEventCallback,
        user: usize,
    ) -> I2cResult<u32> {
        self.ready()?;
        if buf.is_empty() {
            return Err(I2cError::InvalidParameter);
        }
        let operation_id = self.next_operation_id;
        self.next_operation_id = self.next_operation_id.wrapping_add(1);
        let result = self.read_with_stop(address, buf, true, 0);
        let outcome = self.record(result);
        callback(operation_id, outcome, user);
        Ok(operation_id)
    }

    fn cancel_async(&mut self, operation_id: u32) -> I2cResult<()> {
        // Synchronous completion model: nothing is ever in flight here.
        if operation_id == 0 || operation_id >= self.next_operation_id {
            return Err(I2cError::InvalidParameter);
        }
        Ok(())
    }

    fn add_device(&mut self, config: I2cDeviceConfig) -> I2cResult<()> {
        if !is_valid_device_address(config.address, config.address_bits) {
            return Err(match config.address_bits {
                AddressBits::Seven if config.address <= 0x7F => I2cError::ReservedAddress,
                _ => I2cError::InvalidAddress,
            });
        }
        self.devices
            .insert(config.address, config)
            .map_err(|_| I2cError::OutOfMemory)?;
        Ok(())
    }

    fn remove_device(&mut self, address: u16) -> I2cResult<()> {
        self.devices
            .remove(&address)
            .map(|_| ())
            .ok_or(I2cError::DeviceNotFound)
    }

    fn probe_device(&mut self, address: u16) -> I2cResult<bool> {
        self.ready()?;
        self.resolve(address)?;
        self.port
            .probe(address, self.config.timeout_ms)
            .map_err(Self::convert_port_error)
    }

    fn scan_devices(&mut self, found: &mut [u16], first: u8, last: u8) -> I2cResult<usize> {
        self.ready()?;
        if first < I2C_FIRST_VALID_ADDRESS || last > I2C_LAST_VALID_ADDRESS || first > last {
            return Err(I2cError::InvalidParameter);
        }
        let mut count = 0;
        for address in first..=last {
            if count == found.len() {
                break;
            }
            if self
                .port
                .probe(address as u16, self.config.timeout_ms)
                .map_err(Self::convert_port_error)?
            {
                found[count] = address as u16;
                count += 1;
            }
        }
        self.stats.devices_found_last_scan = count as u8;
        Ok(count)
    }

    fn set_power_mode(&mut self, mode: I2cPowerMode) -> I2cResult<()> {
        if self.ensure_initialized().is_err() {
            return Err(I2cError::NotInitialized);
        }
        self.port
            .set_power_mode(mode)
            .map_err(Self::convert_port_error)
    }

    fn suspend_bus(&mut self) -> I2cResult<()> {
        if self.ensure_initialized().is_err() {
            return Err(I2cError::NotInitialized);
        }
        self.port.suspend().map_err(Self::convert_port_error)?;
        self.suspended = true;
        Ok(())
    }

    fn resume_bus(&mut self) -> I2cResult<()> {
        if !self.initialized {
            return Err(I2cError::NotInitialized);
        }
        self.port.resume().map_err(Self::convert_port_error)?;
        self.suspended = false;
        Ok(())
    }

    fn statistics(&self) -> I2cStatistics {
        self.stats
    }

    fn reset_statistics(&mut self) {
        self.stats = I2cStatistics::default();
    }

    fn diagnostics(&self) -> I2cDiagnostics {
        self.diag
    }

    fn reset_diagnostics(&mut self) {
        self.diag = I2cDiagnostics::default();
    }
}

// embedded-hal, so ecosystem device drivers can share the bus type.

impl<P: I2cOps> embedded_hal::i2c::ErrorType for I2cMaster<P> {
    type Error = I2cError;
}

impl<P: I2cOps> embedded_hal::i2c::I2c for I2cMaster<P> {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [embedded_hal::i2c::Operation<'_>],
    ) -> Result<(), I2cError> {
        self.ready()?;
        if operations.is_empty() {
            return Err(I2cError::InvalidParameter);
        }
        let last = operations.len() - 1;
        let mut result = Ok(());
        for (i, op) in operations.iter_mut().enumerate() {
            let stop = i == last;
            result = match op {
                embedded_hal::i2c::Operation::Write(data) => {
                    self.write_with_stop(address as u16, data, stop, 0)
                }
                embedded_hal::i2c::Operation::Read(buf) => {
                    self.read_with_stop(address as u16, buf, stop, 0)
                }
            };
            if result.is_err() {
                break;
            }
        }
        self.record(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::soft::SoftI2c;

    use core::sync::atomic::{AtomicU32, Ordering};

    fn bus_with_devices(addresses: &[u16]) -> I2cMaster<SoftI2c> {
        let mut port = SoftI2c::new();
        for &addr in addresses {
            port.add_sim_device(addr, false);
        }
        let config = I2cConfig {
            scl_pin: 6,
            sda_pin: 7,
            ..I2cConfig::default()
        };
        I2cMaster::new(port, config)
    }

    #[test]
    fn test_lazy_init() {
        let mut i2c = bus_with_devices(&[0x48]);
        assert!(!i2c.is_initialized());
        i2c.write(0x48, &[0x00], 0).unwrap();
        assert!(i2c.is_initialized());
        assert_eq!(i2c.initialize(), Err(I2cError::AlreadyInitialized));
    }

    #[test]
    fn test_device_scan() {
        let mut i2c = bus_with_devices(&[0x48, 0x68]);
        let mut found = [0u16; 8];
        let count = i2c.scan_devices(&mut found, 0x08, 0x77).unwrap();
        assert_eq!(count, 2);
        assert_eq!(&found[..2], &[0x48, 0x68]);
        assert_eq!(i2c.statistics().devices_found_last_scan, 2);
    }

    #[test]
    fn test_scan_range_validation() {
        let mut i2c = bus_with_devices(&[]);
        let mut found = [0u16; 4];
        assert_eq!(
            i2c.scan_devices(&mut found, 0x00, 0x77),
            Err(I2cError::InvalidParameter)
        );
        assert_eq!(
            i2c.scan_devices(&mut found, 0x08, 0x78),
            Err(I2cError::InvalidParameter)
        );
    }

    #[test]
    fn test_register_round_trip() {
        let mut i2c = bus_with_devices(&[0x48]);
        i2c.write_register(0x48, 0x10, 0xAB).unwrap();
        assert_eq!(i2c.read_register(0x48, 0x10), Ok(0xAB));
    }

    #[test]
    fn test_multi_register_burst() {
        let mut i2c = bus_with_devices(&[0x48]);
        i2c.write_registers(0x48, 0x00, &[1, 2, 3, 4]).unwrap();
        let mut out = [0u8; 4];
        i2c.read_registers(0x48, 0x00, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn test_write_read_uses_repeated_start() {
        let mut i2c = bus_with_devices(&[0x48]);
        i2c.write(0x48, &[0x05, 0x77], 0).unwrap();
        let mut out = [0u8; 1];
        i2c.write_read(0x48, &[0x05], &mut out, 0).unwrap();
        assert_eq!(out[0], 0x77);
    }

    #[test]
    fn test_reserved_addresses_never_reach_the_bus() {
        let mut i2c = bus_with_devices(&[]);
        i2c.initialize().unwrap();
        assert_eq!(
            i2c.write(0x03, &[0], 0),
            Err(I2cError::ReservedAddress)
        );
        assert_eq!(
            i2c.write(0x7C, &[0], 0),
            Err(I2cError::ReservedAddress)
        );
        assert_eq!(i2c.write(0x3FF, &[0], 0), Err(I2cError::InvalidAddress));
    }

    #[test]
    fn test_missing_device_nacks() {
        let mut i2c = bus_with_devices(&[]);
        assert_eq!(i2c.write(0x50, &[0], 0), Err(I2cError::AddressNack));
        assert_eq!(i2c.statistics().nack_errors, 1);
    }

    #[test]
    fn test_clock_stretch_timeout_counted() {
        let mut i2c = bus_with_devices(&[0x48]);
        i2c.initialize().unwrap();
        i2c.port_mut().inject_clock_stretch(0x48);
        assert_eq!(
            i2c.write(0x48, &[0], 0),
            Err(I2cError::ClockStretchTimeout)
        );
        assert_eq!(i2c.statistics().clock_stretch_timeouts, 1);
        // The condition clears with the next transaction
        i2c.write(0x48, &[0], 0).unwrap();
    }

    #[test]
    fn test_ten_bit_device_table() {
        let mut i2c = bus_with_devices(&[]);
        i2c.port_mut().add_sim_device(0x150, true);
        i2c.add_device(I2cDeviceConfig {
            address: 0x150,
            address_bits: AddressBits::Ten,
            timeout_ms: 0,
            retries: 0,
        })
        .unwrap();
        i2c.write_register(0x150, 0x01, 0x5A).unwrap();
        assert_eq!(i2c.read_register(0x150, 0x01), Ok(0x5A));
    }

    #[test]
    fn test_transaction_multi_buffer() {
        let mut i2c = bus_with_devices(&[0x48]);
        let mut out = [0u8; 2];
        let mut ops = [
            I2cOperation::Write(&[0x00, 0x11, 0x22]),
            I2cOperation::Read(&mut out),
        ];
        i2c.transaction(0x48, &mut ops, 0).unwrap();
        drop(ops);
        assert_eq!(out, [0x11, 0x22]);
    }

    #[test]
    fn test_async_write_invokes_callback() {
        static COMPLETED: AtomicU32 = AtomicU32::new(0);
        fn on_done(operation_id: u32, result: Result<(), I2cError>, _user: usize) {
            assert!(result.is_ok());
            COMPLETED.store(operation_id, Ordering::Relaxed);
        }

        let mut i2c = bus_with_devices(&[0x48]);
        let id = i2c.write_async(0x48, &[0x00, 0x01], on_done, 0).unwrap();
        assert_eq!(COMPLETED.load(Ordering::Relaxed), id);
        assert_eq!(i2c.cancel_async(id), Ok(()));
        assert_eq!(i2c.cancel_async(id + 10), Err(I2cError::InvalidParameter));
    }

    #[test]
    fn test_suspend_blocks_traffic() {
        let mut i2c = bus_with_devices(&[0x48]);
        i2c.initialize().unwrap();
        i2c.suspend_bus().unwrap();
        assert_eq!(i2c.write(0x48, &[0], 0), Err(I2cError::BusSuspended));
        i2c.resume_bus().unwrap();
        i2c.write(0x48, &[0], 0).unwrap();
    }

    #[test]
    fn test_sequence_requires_start() {
        let mut i2c = bus_with_devices(&[0x48]);
        let mut commands = [I2cCommand::Write(&[0x00])];
        assert_eq!(
            i2c.run_sequence(0x48, &mut commands, 0),
            Err(I2cError::InvalidParameter)
        );
        let mut commands = [
            I2cCommand::Start,
            I2cCommand::Write(&[0x00, 0x42]),
            I2cCommand::DelayUs(10),
            I2cCommand::Stop,
        ];
        i2c.run_sequence(0x48, &mut commands, 0).unwrap();
        assert_eq!(i2c.read_register(0x48, 0x00), Ok(0x42));
    }
}
