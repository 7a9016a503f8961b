//! SPI master driver
//!
//! Full- and half-duplex transfers with automatic CS per call, or a
//! manually held CS across a transfer sequence. The host's DMA transfer
//! limit is enforced before anything reaches the bus.

use kinesis_hal::peripheral::Peripheral;
use kinesis_hal::spi::{
    SpiBus, SpiConfig, SpiDiagnostics, SpiError, SpiMode, SpiResult, SpiStatistics, SpiTransfer,
};
use kinesis_hal::types::{is_valid_pin, FrequencyHz, HostId, TimeoutMs};

use crate::port::{PortClock, PortError, SpiOps};

/// Structural errors beyond this count mark the host unhealthy.
const ERROR_THRESHOLD: u32 = 5;

/// SPI master driver.
pub struct SpiMaster<P: SpiOps> {
    port: P,
    config: SpiConfig,
    initialized: bool,
    cs_active: bool,
    /// Manual CS held by the application across calls.
    cs_manual: bool,
    stats: SpiStatistics,
    diag: SpiDiagnostics,
}

impl<P: SpiOps> SpiMaster<P> {
    /// Capture configuration; the host is installed on first use.
    pub fn new(port: P, config: SpiConfig) -> Self {
        Self {
            port,
            config,
            initialized: false,
            cs_active: false,
            cs_manual: false,
            stats: SpiStatistics::default(),
            diag: SpiDiagnostics::default(),
        }
    }

    /// Captured configuration.
    pub fn config(&self) -> &SpiConfig {
        &self.config
    }

    /// Direct access to the native port (simulation and test hook).
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    fn convert_port_error(err: PortError) -> SpiError {
        match err {
            PortError::Fail => SpiError::Failure,
            PortError::NoMem => SpiError::OutOfMemory,
            PortError::InvalidArg => SpiError::InvalidParameter,
            PortError::InvalidState => SpiError::InvalidConfiguration,
            PortError::NotFound => SpiError::InvalidPin,
            PortError::NotSupported => SpiError::UnsupportedOperation,
            PortError::Timeout => SpiError::Timeout,
            PortError::Busy => SpiError::BusBusy,
        }
    }

    fn ready(&mut self) -> SpiResult<()> {
        if self.ensure_initialized().is_err() {
            self.stats.failed_transfers += 1;
            return Err(SpiError::NotInitialized);
        }
        Ok(())
    }

    fn check_length(&self, len: usize) -> SpiResult<()> {
        if len > self.config.max_transfer_size {
            return Err(SpiError::TransferTooLong);
        }
        Ok(())
    }

    fn record<T>(&mut self, result: SpiResult<T>, bytes_out: usize, bytes_in: usize) -> SpiResult<T> {
        self.stats.transfers += 1;
        self.stats.last_activity_us = self.port.now_us();
        match &result {
            Ok(_) => {
                self.stats.successful_transfers += 1;
                self.stats.bytes_sent += bytes_out as u64;
                self.stats.bytes_received += bytes_in as u64;
                let total = bytes_out.max(bytes_in);
                if total > self.stats.max_transfer_bytes {
                    self.stats.max_transfer_bytes = total;
                }
                self.diag.consecutive_errors = 0;
            }
            Err(e) => {
                self.stats.failed_transfers += 1;
                self.diag.last_error = Some(*e);
                self.diag.last_error_us = self.stats.last_activity_us;
                if matches!(e, SpiError::HardwareFault | SpiError::CommunicationFailure) {
                    self.diag.consecutive_errors += 1;
                    if self.diag.consecutive_errors >= ERROR_THRESHOLD {
                        self.diag.healthy = false;
                    }
                }
            }
        }
        result
    }

    /// Assert CS for one transfer unless the application is holding it.
    fn with_cs<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> SpiResult<T>,
    ) -> SpiResult<T> {
        let auto = !self.cs_manual;
        if auto {
            self.port.set_cs(true).map_err(Self::convert_port_error)?;
            self.cs_active = true;
        }
        let result = f(self);
        if auto {
            let release = self.port.set_cs(false).map_err(Self::convert_port_error);
            self.cs_active = false;
            release?;
        }
        result
    }
}

impl<P: SpiOps> Peripheral for SpiMaster<P> {
    type Error = SpiError;

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn initialize(&mut self) -> SpiResult<()> {
        if self.initialized {
            return Err(SpiError::AlreadyInitialized);
        }
        if !is_valid_pin(self.config.sclk_pin) {
            return Err(SpiError::InvalidPin);
        }
        if self.config.clock_speed_hz == 0 {
            return Err(SpiError::InvalidClockSpeed);
        }
        if self.config.max_transfer_size == 0 {
            return Err(SpiError::InvalidConfiguration);
        }
        self.port
            .install(&self.config)
            .map_err(Self::convert_port_error)?;
        self.initialized = true;
        self.cs_active = false;
        self.cs_manual = false;
        Ok(())
    }

    fn deinitialize(&mut self) -> SpiResult<()> {
        if !self.initialized {
            return Err(SpiError::NotInitialized);
        }
        if self.cs_active {
            let _ = self.port.set_cs(false);
        }
        self.port.uninstall().map_err(Self::convert_port_error)?;
        self.initialized = false;
        Ok(())
    }
}

impl<P: SpiOps> SpiBus for SpiMaster<P> {
    fn host(&self) -> HostId {
        self.config.host
    }

    fn transfer(&mut self, tx: &[u8], rx: &mut [u8], timeout: TimeoutMs) -> SpiResult<()> {
        self.ready()?;
        if tx.len() != rx.len() {
            return self.record(Err(SpiError::LengthMismatch), 0, 0);
        }
        if let Err(e) = self.check_length(tx.len()) {
            return self.record(Err(e), 0, 0);
        }
        let result = self.with_cs(|bus| {
            bus.port
                .transfer(tx, rx, timeout)
                .map_err(Self::convert_port_error)
        });
        self.record(result, tx.len(), rx.len())
    }

    fn write(&mut self, tx: &[u8], timeout: TimeoutMs) -> SpiResult<()> {
        self.ready()?;
        if let Err(e) = self.check_length(tx.len()) {
            return self.record(Err(e), 0, 0);
        }
        let result = self.with_cs(|bus| {
            bus.port
                .write(tx, timeout)
                .map_err(Self::convert_port_error)
        });
        self.record(result, tx.len(), 0)
    }

    fn read(&mut self, rx: &mut [u8], timeout: TimeoutMs) -> SpiResult<()> {
        self.ready()?;
        if let Err(e) = self.check_length(rx.len()) {
            return self.record(Err(e), 0, 0);
        }
        let len = rx.len();
        let result = self.with_cs(|bus| {
            bus.port.read(rx, timeout).map_err(Self::convert_port_error)
        });
        self.record(result, 0, len)
    }

    fn transfer_with_timing(
        &mut self,
        tx: &[u8],
        rx: &mut [u8],
        cs_hold_us: u32,
        timeout: TimeoutMs,
    ) -> SpiResult<()> {
        self.ready()?;
        if tx.len() != rx.len() {
            return self.record(Err(SpiError::LengthMismatch), 0, 0);
        }
        if let Err(e) = self.check_length(tx.len()) {
            return self.record(Err(e), 0, 0);
        }
        let result = self.with_cs(|bus| {
            let r = bus
                .port
                .transfer(tx, rx, timeout)
                .map_err(Self::convert_port_error);
            if r.is_ok() && cs_hold_us > 0 {
                bus.port.delay_us(cs_hold_us);
            }
            r
        });
        self.record(result, tx.len(), rx.len())
    }

    fn transfer_sequence(&mut self, transfers: &mut [SpiTransfer<'_>]) -> SpiResult<()> {
        self.ready()?;
        let timeout = self.config.timeout_ms;
        self.port.set_cs(true).map_err(Self::convert_port_error)?;
        self.cs_active = true;

        let mut result = Ok(());
        let mut bytes_out = 0;
        let mut bytes_in = 0;
        for step in transfers.iter_mut() {
            let step_result = match (&step.tx, &mut step.rx) {
                (Some(tx), Some(rx)) => {
                    if tx.len() != rx.len() {
                        Err(SpiError::LengthMismatch)
                    } else {
                        self.port
                            .transfer(tx, rx, timeout)
                            .map_err(Self::convert_port_error)
                            .map(|()| (tx.len(), rx.len()))
                    }
                }
                (Some(tx), None) => self
                    .port
                    .write(tx, timeout)
                    .map_err(Self::convert_port_error)
                    .map(|()| (tx.len(), 0)),
                (None, Some(rx)) => self
                    .port
                    .read(rx, timeout)
                    .map_err(Self::convert_port_error)
                    .map(|()| (0, rx.len())),
                (None, None) => Err(SpiError::InvalidParameter),
            };
            match step_result {
                Ok((out, inn)) => {
                    bytes_out += out;
                    bytes_in += inn;
                    if step.cs_hold_us > 0 {
                        self.port.delay_us(step.cs_hold_us);
                    }
                }
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        // CS is restored even when an element failed.
        let release = self.port.set_cs(false).map_err(Self::convert_port_error);
        self.cs_active = false;
        let result = result.and(release);
        self.record(result, bytes_out, bytes_in)
    }

    fn set_chip_select(&mut self, active: bool) -> SpiResult<()> {
        self.ready()?;
        self.port
            .set_cs(active)
            .map_err(Self::convert_port_error)?;
        self.cs_active = active;
        self.cs_manual = active;
        self.diag.cs_asserted = active;
        Ok(())
    }

    fn is_chip_select_active(&self) -> bool {
        self.cs_active
    }

    fn write_register(&mut self, register: u8, data: &[u8]) -> SpiResult<()> {
        self.ready()?;
        if let Err(e) = self.check_length(data.len() + 1) {
            return self.record(Err(e), 0, 0);
        }
        let timeout = self.config.timeout_ms;
        let result = self.with_cs(|bus| {
            bus.port
                .write(&[register], timeout)
                .map_err(Self::convert_port_error)?;
            bus.port
                .write(data, timeout)
                .map_err(Self::convert_port_error)
        });
        self.record(result, data.len() + 1, 0)
    }

    fn read_register(&mut self, register: u8, out: &mut [u8]) -> SpiResult<()> {
        self.ready()?;
        if let Err(e) = self.check_length(out.len() + 1) {
            return self.record(Err(e), 0, 0);
        }
        let timeout = self.config.timeout_ms;
        let len = out.len();
        let result = self.with_cs(|bus| {
            bus.port
                .write(&[register | 0x80], timeout)
                .map_err(Self::convert_port_error)?;
            bus.port.read(out, timeout).map_err(Self::convert_port_error)
        });
        self.record(result, 1, len)
    }

    fn set_clock_speed(&mut self, speed_hz: FrequencyHz) -> SpiResult<()> {
        self.ready()?;
        if speed_hz == 0 || speed_hz > 80_000_000 {
            return Err(SpiError::InvalidClockSpeed);
        }
        self.port
            .set_clock(speed_hz)
            .map_err(Self::convert_port_error)?;
        self.config.clock_speed_hz = speed_hz;
        Ok(())
    }

    fn clock_speed(&self) -> FrequencyHz {
        self.config.clock_speed_hz
    }

    fn set_mode(&mut self, mode: SpiMode) -> SpiResult<()> {
        self.ready()?;
        self.port.set_mode(mode).map_err(Self::convert_port_error)?;
        self.config.mode = mode;
        Ok(())
    }

    fn mode(&self) -> SpiMode {
        self.config.mode
    }

    fn set_dma_enabled(&mut self, enable: bool) -> SpiResult<()> {
        // Takes effect on the next initialization.
        self.config.dma_enabled = enable;
        Ok(())
    }

    fn max_transfer_size(&self) -> usize {
        self.config.max_transfer_size
    }

    fn statistics(&self) -> SpiStatistics {
        self.stats
    }

    fn reset_statistics(&mut self) {
        self.stats = SpiStatistics::default();
    }

    fn diagnostics(&self) -> SpiDiagnostics {
        let mut diag = self.diag;
        diag.cs_asserted = self.cs_active;
        diag
    }

    fn reset_diagnostics(&mut self) {
        self.diag = SpiDiagnostics::default();
    }
}

// embedded-hal SpiBus, for ecosystem drivers.

impl<P: SpiOps> embedded_hal::spi::ErrorType for SpiMaster<P> {
    type Error = SpiError;
}

impl<P: SpiOps> embedded_hal::spi::SpiBus for SpiMaster<P> {
    fn read(&mut self, words: &mut [u8]) -> Result<(), SpiError> {
        let timeout = self.config.timeout_ms;
        SpiBus::read(self, words, timeout)
    }

    fn write(&mut self, words: &[u8]) -> Result<(), SpiError> {
        let timeout = self.config.timeout_ms;
        SpiBus::write(self, words, timeout)
    }

    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), SpiError> {
        let timeout = self.config.timeout_ms;
        SpiBus::transfer(self, write, read, timeout)
    }

    fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), SpiError> {
        let timeout = self.config.timeout_ms;
        self.ready()?;
        if let Err(e) = self.check_length(words.len()) {
            return self.record(Err(e), 0, 0);
        }
        let mut scratch = [0u8; 64];
        if words.len() > scratch.len() {
            return Err(SpiError::TransferTooLong);
        }
        scratch[..words.len()].copy_from_slice(words);
        let len = words.len();
        let result = self.with_cs(|bus| {
            bus.port
                .transfer(&scratch[..len], words, timeout)
                .map_err(Self::convert_port_error)
        });
        self.record(result, len, len)
    }

    fn flush(&mut self) -> Result<(), SpiError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::soft::SoftSpi;

    fn host() -> SpiMaster<SoftSpi> {
        let config = SpiConfig {
            mosi_pin: 1,
            miso_pin: 2,
            sclk_pin: 3,
            cs_pin: 4,
            ..SpiConfig::default()
        };
        SpiMaster::new(SoftSpi::new(), config)
    }

    #[test]
    fn test_lazy_init() {
        let mut spi = host();
        assert!(!spi.is_initialized());
        spi.write(&[1, 2, 3], 100).unwrap();
        assert!(spi.is_initialized());
        assert_eq!(spi.initialize(), Err(SpiError::AlreadyInitialized));
    }

    #[test]
    fn test_full_duplex_loopback() {
        let mut spi = host();
        let tx = [0xAA, 0x55, 0x0F];
        let mut rx = [0u8; 3];
        spi.transfer(&tx, &mut rx, 100).unwrap();
        assert_eq!(rx, tx);
        let stats = spi.statistics();
        assert_eq!(stats.bytes_sent, 3);
        assert_eq!(stats.bytes_received, 3);
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let mut spi = host();
        let tx = [0u8; 3];
        let mut rx = [0u8; 2];
        assert_eq!(
            spi.transfer(&tx, &mut rx, 100),
            Err(SpiError::LengthMismatch)
        );
    }

    #[test]
    fn test_transfer_too_long() {
        let mut spi = host();
        spi.initialize().unwrap();
        let big = [0u8; 5000];
        assert_eq!(spi.write(&big, 100), Err(SpiError::TransferTooLong));
        assert_eq!(spi.statistics().failed_transfers, 1);
    }

    #[test]
    fn test_cs_restored_after_sequence() {
        let mut spi = host();
        spi.initialize().unwrap();
        let tx1 = [1u8, 2];
        let mut rx2 = [0u8; 2];
        let mut steps = [
            SpiTransfer {
                tx: Some(&tx1),
                rx: None,
                cs_hold_us: 5,
            },
            SpiTransfer {
                tx: None,
                rx: Some(&mut rx2),
                cs_hold_us: 0,
            },
        ];
        spi.transfer_sequence(&mut steps).unwrap();
        assert!(!spi.is_chip_select_active());
    }

    #[test]
    fn test_sequence_failure_still_releases_cs() {
        let mut spi = host();
        spi.initialize().unwrap();
        let mut steps = [SpiTransfer {
            tx: None,
            rx: None,
            cs_hold_us: 0,
        }];
        assert_eq!(
            spi.transfer_sequence(&mut steps),
            Err(SpiError::InvalidParameter)
        );
        assert!(!spi.is_chip_select_active());
    }

    #[test]
    fn test_manual_cs_spans_transfers() {
        let mut spi = host();
        spi.initialize().unwrap();
        spi.set_chip_select(true).unwrap();
        spi.write(&[1], 100).unwrap();
        spi.write(&[2], 100).unwrap();
        assert!(spi.is_chip_select_active());
        spi.set_chip_select(false).unwrap();
        assert!(!spi.is_chip_select_active());
    }

    #[test]
    fn test_register_access() {
        let mut spi = host();
        spi.initialize().unwrap();
        spi.write_register(0x10, &[0xAB, 0xCD]).unwrap();
        assert_eq!(&spi.port_mut().tx_capture[..], &[0x10, 0xAB, 0xCD]);

        spi.port_mut().set_response(&[0x42]);
        let mut out = [0u8; 1];
        spi.read_register(0x10, &mut out).unwrap();
        assert_eq!(out[0], 0x42);
    }

    #[test]
    fn test_clock_and_mode_updates() {
        let mut spi = host();
        spi.initialize().unwrap();
        spi.set_clock_speed(10_000_000).unwrap();
        assert_eq!(spi.clock_speed(), 10_000_000);
        assert_eq!(spi.set_clock_speed(0), Err(SpiError::InvalidClockSpeed));
        spi.set_mode(SpiMode::Mode3).unwrap();
        assert_eq!(spi.mode(), SpiMode::Mode3);
    }

    #[test]
    fn test_dma_flag_deferred() {
        let mut spi = host();
        spi.set_dma_enabled(true).unwrap();
        assert!(spi.config().dma_enabled);
    }

    #[test]
    fn test_deinit_safety() {
        let mut spi = host();
        spi.initialize().unwrap();
        spi.deinitialize().unwrap();
        assert!(!spi.is_initialized());
        spi.write(&[9], 100).unwrap();
        assert!(spi.is_initialized());
    }
}
