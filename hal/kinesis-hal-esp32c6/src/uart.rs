//! UART port driver
//!
//! Ring-buffered serial port with the RS-485/IrDA modes, pattern
//! detection and the line-error bookkeeping of the contract: overruns
//! surface as errors instead of silently dropping bytes, break detection
//! is sticky until read.

use kinesis_hal::peripheral::Peripheral;
use kinesis_hal::types::{BaudRate, PortId, TimeoutMs};
use kinesis_hal::uart::{
    FlowControl, IrdaConfig, PatternConfig, Rs485Config, SoftwareFlowConfig, Uart, UartConfig,
    UartDiagnostics, UartError, UartMode, UartResult, UartStatistics,
};

use crate::port::{PortClock, PortError, UartOps};

/// Structural errors beyond this count mark the port unhealthy.
const ERROR_THRESHOLD: u32 = 5;

/// UART port driver.
pub struct UartDriver<P: UartOps> {
    port: P,
    config: UartConfig,
    mode: UartMode,
    initialized: bool,
    break_flag: bool,
    collision_flag: bool,
    stats: UartStatistics,
    diag: UartDiagnostics,
}

impl<P: UartOps> UartDriver<P> {
    /// Capture configuration; the port is installed on first use.
    pub fn new(port: P, config: UartConfig) -> Self {
        Self {
            port,
            config,
            mode: UartMode::Standard,
            initialized: false,
            break_flag: false,
            collision_flag: false,
            stats: UartStatistics::default(),
            diag: UartDiagnostics::default(),
        }
    }

    /// Captured configuration.
    pub fn config(&self) -> &UartConfig {
        &self.config
    }

    /// Direct access to the native port (simulation and test hook).
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    fn convert_port_error(err: PortError) -> UartError {
        match err {
            PortError::Fail => UartError::Failure,
            PortError::NoMem => UartError::OutOfMemory,
            PortError::InvalidArg => UartError::InvalidParameter,
            PortError::InvalidState => UartError::InvalidConfiguration,
            PortError::NotFound => UartError::InvalidPin,
            PortError::NotSupported => UartError::UnsupportedOperation,
            PortError::Timeout => UartError::Timeout,
            PortError::Busy => UartError::PinBusy,
        }
    }

    const fn is_structural(err: UartError) -> bool {
        matches!(
            err,
            UartError::HardwareFault | UartError::CommunicationFailure
        )
    }

    fn ready(&mut self) -> UartResult<()> {
        if self.ensure_initialized().is_err() {
            self.stats.failed_operations += 1;
            return Err(UartError::NotInitialized);
        }
        Ok(())
    }

    fn note_error(&mut self, err: UartError) {
        self.stats.failed_operations += 1;
        self.diag.last_error = Some(err);
        self.diag.last_error_us = self.port.now_us();
        if Self::is_structural(err) {
            self.diag.consecutive_errors += 1;
            if self.diag.consecutive_errors >= ERROR_THRESHOLD {
                self.diag.healthy = false;
            }
        }
    }

    /// Fold the driver's sticky line errors into statistics and flags.
    fn absorb_line_errors(&mut self) {
        let errors = self.port.take_line_errors();
        self.stats.frame_errors += errors.frame;
        self.stats.parity_errors += errors.parity;
        self.stats.overrun_errors += errors.overrun;
        self.stats.noise_errors += errors.noise;
        if errors.break_detected {
            self.stats.breaks_detected += 1;
            self.break_flag = true;
        }
        if errors.collision {
            self.collision_flag = true;
        }
        if errors.overrun > 0 {
            self.diag.last_error = Some(UartError::OverrunError);
            self.diag.last_error_us = self.port.now_us();
        }
    }

    /// Overrun since the last check?
    fn pending_overrun(&mut self) -> bool {
        let before = self.stats.overrun_errors;
        self.absorb_line_errors();
        self.stats.overrun_errors > before
    }
}

impl<P: UartOps> Peripheral for UartDriver<P> {
    type Error = UartError;

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn initialize(&mut self) -> UartResult<()> {
        if self.initialized {
            return Err(UartError::AlreadyInitialized);
        }
        if self.config.data_bits < 5 || self.config.data_bits > 8 {
            return Err(UartError::InvalidConfiguration);
        }
        if self.config.baud_rate == 0 {
            return Err(UartError::InvalidBaudRate);
        }
        self.port
            .install(&self.config)
            .map_err(Self::convert_port_error)?;
        if self.mode != UartMode::Standard {
            self.port
                .set_mode(self.mode)
                .map_err(Self::convert_port_error)?;
        }
        self.initialized = true;
        Ok(())
    }

    fn deinitialize(&mut self) -> UartResult<()> {
        if !self.initialized {
            return Err(UartError::NotInitialized);
        }
        self.port.uninstall().map_err(Self::convert_port_error)?;
        self.initialized = false;
        Ok(())
    }
}

impl<P: UartOps> Uart for UartDriver<P> {
    fn port(&self) -> PortId {
        self.config.port
    }

    fn write(&mut self, data: &[u8], timeout: TimeoutMs) -> UartResult<()> {
        self.ready()?;
        match self.port.write(data, timeout) {
            Ok(n) if n == data.len() => {
                self.stats.bytes_sent += n as u64;
                self.stats.write_operations += 1;
                self.stats.last_activity_us = self.port.now_us();
                self.diag.consecutive_errors = 0;
                Ok(())
            }
            Ok(_) => {
                self.note_error(UartError::WriteFailure);
                Err(UartError::WriteFailure)
            }
            Err(e) => {
                let err = Self::convert_port_error(e);
                self.note_error(err);
                Err(err)
            }
        }
    }

    fn read(&mut self, buf: &mut [u8], timeout: TimeoutMs) -> UartResult<usize> {
        self.ready()?;
        if self.pending_overrun() {
            self.note_error(UartError::OverrunError);
            return Err(UartError::OverrunError);
        }
        match self.port.read(buf, timeout) {
            Ok(0) => Err(UartError::Timeout),
            Ok(n) => {
                self.stats.bytes_received += n as u64;
                self.stats.read_operations += 1;
                self.stats.last_activity_us = self.port.now_us();
                Ok(n)
            }
            Err(e) => {
                let err = Self::convert_port_error(e);
                self.note_error(err);
                Err(err)
            }
        }
    }

    fn bytes_available(&mut self) -> UartResult<usize> {
        self.ready()?;
        self.port.rx_available().map_err(Self::convert_port_error)
    }

    fn flush_tx(&mut self, timeout: TimeoutMs) -> UartResult<()> {
        self.ready()?;
        self.port
            .flush_tx(timeout)
            .map_err(Self::convert_port_error)
    }

    fn flush_rx(&mut self) -> UartResult<()> {
        self.ready()?;
        self.port.flush_rx().map_err(Self::convert_port_error)
    }

    fn wait_transmit_complete(&mut self, timeout: TimeoutMs) -> UartResult<()> {
        self.ready()?;
        self.port
            .wait_tx_done(timeout)
            .map_err(Self::convert_port_error)
    }

    fn read_until(
        &mut self,
        buf: &mut [u8],
        terminator: u8,
        timeout: TimeoutMs,
    ) -> UartResult<usize> {
        self.ready()?;
        let mut count = 0;
        let mut byte = [0u8; 1];
        loop {
            if count == buf.len() {
                return Ok(count);
            }
            match self.port.read(&mut byte, timeout) {
                Ok(1) => {
                    if byte[0] == terminator {
                        self.stats.bytes_received += (count + 1) as u64;
                        self.stats.read_operations += 1;
                        return Ok(count);
                    }
                    buf[count] = byte[0];
                    count += 1;
                }
                Ok(_) => {
                    // Timed out waiting for more bytes.
                    if count == 0 {
                        return Err(UartError::Timeout);
                    }
                    self.stats.bytes_received += count as u64;
                    self.stats.read_operations += 1;
                    return Ok(count);
                }
                Err(e) => {
                    let err = Self::convert_port_error(e);
                    self.note_error(err);
                    return Err(err);
                }
            }
        }
    }

    fn read_line(&mut self, buf: &mut [u8], timeout: TimeoutMs) -> UartResult<usize> {
        let mut count = self.read_until(buf, b'\n', timeout)?;
        if count > 0 && buf[count - 1] == b'\r' {
            count -= 1;
        }
        Ok(count)
    }

    fn set_baud_rate(&mut self, baud_rate: BaudRate) -> UartResult<()> {
        self.ready()?;
        if baud_rate == 0 || baud_rate > 5_000_000 {
            return Err(UartError::InvalidBaudRate);
        }
        self.port
            .set_baud(baud_rate)
            .map_err(Self::convert_port_error)?;
        self.config.baud_rate = baud_rate;
        Ok(())
    }

    fn baud_rate(&self) -> BaudRate {
        self.config.baud_rate
    }

    fn set_flow_control(&mut self, flow: FlowControl) -> UartResult<()> {
        self.ready()?;
        self.port
            .set_flow_control(flow)
            .map_err(Self::convert_port_error)?;
        self.config.flow_control = flow;
        Ok(())
    }

    fn set_rts(&mut self, active: bool) -> UartResult<()> {
        self.ready()?;
        self.port.set_rts(active).map_err(Self::convert_port_error)
    }

    fn get_cts(&mut self) -> UartResult<bool> {
        self.ready()?;
        self.port.cts().map_err(Self::convert_port_error)
    }

    fn send_break(&mut self, duration_ms: u32) -> UartResult<()> {
        self.ready()?;
        if duration_ms == 0 {
            return Err(UartError::InvalidParameter);
        }
        self.port
            .send_break(duration_ms)
            .map_err(Self::convert_port_error)
    }

    fn is_break_detected(&mut self) -> bool {
        self.absorb_line_errors();
        core::mem::take(&mut self.break_flag)
    }

    fn set_communication_mode(&mut self, mode: UartMode) -> UartResult<()> {
        if self.mode == mode {
            return Ok(());
        }
        // Mode transitions reinitialize the port.
        if self.initialized {
            self.port.uninstall().map_err(Self::convert_port_error)?;
            self.initialized = false;
        }
        self.mode = mode;
        self.initialize()
    }

    fn communication_mode(&self) -> UartMode {
        self.mode
    }

    fn configure_rs485(&mut self, config: Rs485Config) -> UartResult<()> {
        self.ready()?;
        if !matches!(
            self.mode,
            UartMode::Rs485HalfDuplex | UartMode::Rs485CollisionDetect | UartMode::Rs485AppControl
        ) {
            return Err(UartError::InvalidConfiguration);
        }
        self.port
            .configure_rs485(&config)
            .map_err(Self::convert_port_error)
    }

    fn is_rs485_collision_detected(&mut self) -> bool {
        self.absorb_line_errors();
        core::mem::take(&mut self.collision_flag)
    }

    fn configure_irda(&mut self, config: IrdaConfig) -> UartResult<()> {
        self.ready()?;
        if self.mode != UartMode::IrDA {
            return Err(UartError::InvalidConfiguration);
        }
        self.port
            .configure_irda(&config)
            .map_err(Self::convert_port_error)
    }

    fn configure_pattern_detection(&mut self, config: PatternConfig) -> UartResult<()> {
        self.ready()?;
        if config.count == 0 {
            return Err(UartError::InvalidParameter);
        }
        self.port
            .enable_pattern_detect(&config)
            .map_err(Self::convert_port_error)
    }

    fn disable_pattern_detection(&mut self) -> UartResult<()> {
        self.ready()?;
        self.port
            .disable_pattern_detect()
            .map_err(Self::convert_port_error)
    }

    fn get_pattern_position(&mut self, pop: bool) -> UartResult<usize> {
        self.ready()?;
        match self.port.pattern_position(pop) {
            Ok(Some(position)) => {
                if pop {
                    self.stats.patterns_detected += 1;
                }
                Ok(position)
            }
            Ok(None) => Err(UartError::PatternNotFound),
            Err(e) => Err(Self::convert_port_error(e)),
        }
    }

    fn configure_software_flow_control(&mut self, config: SoftwareFlowConfig) -> UartResult<()> {
        self.ready()?;
        if config.enable && config.xon_threshold >= config.xoff_threshold {
            return Err(UartError::InvalidParameter);
        }
        self.port
            .configure_software_flow(&config)
            .map_err(Self::convert_port_error)
    }

    fn configure_wakeup(&mut self, rx_threshold: u16) -> UartResult<()> {
        self.ready()?;
        self.port
            .configure_wakeup(rx_threshold)
            .map_err(Self::convert_port_error)
    }

    fn set_interrupt_thresholds(
        &mut self,
        rx_full: u8,
        tx_empty: u8,
        rx_timeout: u8,
    ) -> UartResult<()> {
        self.ready()?;
        self.port
            .set_interrupt_thresholds(rx_full, tx_empty, rx_timeout)
            .map_err(Self::convert_port_error)
    }

    fn set_signal_inversion(&mut self, invert_tx: bool, invert_rx: bool) -> UartResult<()> {
        self.ready()?;
        self.port
            .set_signal_inversion(invert_tx, invert_rx)
            .map_err(Self::convert_port_error)
    }

    fn set_loopback(&mut self, enable: bool) -> UartResult<()> {
        self.ready()?;
        self.port
            .set_loopback(enable)
            .map_err(Self::convert_port_error)
    }

    fn statistics(&self) -> UartStatistics {
        self.stats
    }

    fn reset_statistics(&mut self) {
        self.stats = UartStatistics::default();
    }

    fn diagnostics(&self) -> UartDiagnostics {
        self.diag
    }

    fn reset_diagnostics(&mut self) {
        self.diag = UartDiagnostics::default();
    }
}

// embedded-io, so protocol crates can ride on the port directly.

impl<P: UartOps> embedded_io::ErrorType for UartDriver<P> {
    type Error = UartError;
}

impl<P: UartOps> embedded_io::Read for UartDriver<P> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, UartError> {
        let timeout = self.config.timeout_ms;
        Uart::read(self, buf, timeout)
    }
}

impl<P: UartOps> embedded_io::Write for UartDriver<P> {
    fn write(&mut self, buf: &[u8]) -> Result<usize, UartError> {
        let timeout = self.config.timeout_ms;
        Uart::write(self, buf, timeout)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), UartError> {
        let timeout = self.config.timeout_ms;
        self.flush_tx(timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::soft::SoftUart;
    use crate::port::UartLineErrors;

    fn driver() -> UartDriver<SoftUart> {
        UartDriver::new(SoftUart::new(), UartConfig::default())
    }

    #[test]
    fn test_lazy_init_and_double_init() {
        let mut uart = driver();
        assert!(!uart.is_initialized());
        uart.write(b"x", 100).unwrap();
        assert!(uart.is_initialized());
        assert_eq!(uart.initialize(), Err(UartError::AlreadyInitialized));
    }

    #[test]
    fn test_write_captures_bytes() {
        let mut uart = driver();
        uart.write(b"hello", 100).unwrap();
        assert_eq!(&uart.port_mut().tx_capture[..], b"hello");
        assert_eq!(uart.statistics().bytes_sent, 5);
    }

    #[test]
    fn test_read_line_strips_crlf() {
        let mut uart = driver();
        uart.initialize().unwrap();
        uart.port_mut().feed_rx(b"hello\r\nworld\r\n");

        let mut buf = [0u8; 64];
        let n = uart.read_line(&mut buf, 1000).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf[..n], b"hello");

        let n = uart.read_line(&mut buf, 1000).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf[..n], b"world");
    }

    #[test]
    fn test_read_line_strips_bare_lf() {
        let mut uart = driver();
        uart.initialize().unwrap();
        uart.port_mut().feed_rx(b"ok\n");
        let mut buf = [0u8; 16];
        let n = uart.read_line(&mut buf, 1000).unwrap();
        assert_eq!(&buf[..n], b"ok");
    }

    #[test]
    fn test_read_timeout_when_empty() {
        let mut uart = driver();
        uart.initialize().unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(uart.read(&mut buf, 10), Err(UartError::Timeout));
        assert_eq!(uart.read_line(&mut buf, 10), Err(UartError::Timeout));
    }

    #[test]
    fn test_bytes_available() {
        let mut uart = driver();
        uart.initialize().unwrap();
        assert_eq!(uart.bytes_available().unwrap(), 0);
        uart.port_mut().feed_rx(b"abc");
        assert_eq!(uart.bytes_available().unwrap(), 3);
    }

    #[test]
    fn test_printf_formats_into_buffer() {
        let mut uart = driver();
        uart.initialize().unwrap();
        let n = uart
            .write_fmt_buffered(format_args!("v={} s={}", 42, "ok"))
            .unwrap();
        assert_eq!(n, 9);
        assert_eq!(&uart.port_mut().tx_capture[..], b"v=42 s=ok");
    }

    #[test]
    fn test_break_flag_is_sticky_until_read() {
        let mut uart = driver();
        uart.initialize().unwrap();
        uart.port_mut().inject_line_errors(UartLineErrors {
            break_detected: true,
            ..UartLineErrors::default()
        });
        assert!(uart.is_break_detected());
        assert!(!uart.is_break_detected());
        assert_eq!(uart.statistics().breaks_detected, 1);
    }

    #[test]
    fn test_overrun_surfaces_on_read() {
        let mut uart = driver();
        uart.initialize().unwrap();
        uart.port_mut().feed_rx(b"data");
        uart.port_mut().inject_line_errors(UartLineErrors {
            overrun: 1,
            ..UartLineErrors::default()
        });
        let mut buf = [0u8; 8];
        assert_eq!(uart.read(&mut buf, 100), Err(UartError::OverrunError));
        // Data survives; the next read succeeds
        assert_eq!(uart.read(&mut buf, 100), Ok(4));
        assert_eq!(uart.statistics().overrun_errors, 1);
    }

    #[test]
    fn test_loopback_self_test() {
        let mut uart = driver();
        uart.initialize().unwrap();
        uart.set_loopback(true).unwrap();
        uart.write(b"ping", 100).unwrap();
        let mut buf = [0u8; 8];
        let n = uart.read(&mut buf, 100).unwrap();
        assert_eq!(&buf[..n], b"ping");
    }

    #[test]
    fn test_pattern_detection() {
        let mut uart = driver();
        uart.initialize().unwrap();
        uart.configure_pattern_detection(PatternConfig {
            pattern_char: b'+',
            count: 3,
            char_timeout: 9,
            post_idle: 12,
            pre_idle: 12,
        })
        .unwrap();
        uart.port_mut().feed_rx(b"at+++");
        let pos = uart.get_pattern_position(true).unwrap();
        assert_eq!(pos, 2);
        assert_eq!(
            uart.get_pattern_position(true),
            Err(UartError::PatternNotFound)
        );
        assert_eq!(uart.statistics().patterns_detected, 1);
    }

    #[test]
    fn test_rs485_requires_mode() {
        let mut uart = driver();
        uart.initialize().unwrap();
        assert_eq!(
            uart.configure_rs485(Rs485Config::default()),
            Err(UartError::InvalidConfiguration)
        );
        uart.set_communication_mode(UartMode::Rs485HalfDuplex)
            .unwrap();
        uart.configure_rs485(Rs485Config {
            rts_as_direction: true,
            turnaround_delay_us: 10,
        })
        .unwrap();
    }

    #[test]
    fn test_mode_change_reinitializes() {
        let mut uart = driver();
        uart.initialize().unwrap();
        uart.set_communication_mode(UartMode::IrDA).unwrap();
        assert!(uart.is_initialized());
        assert_eq!(uart.communication_mode(), UartMode::IrDA);
    }

    #[test]
    fn test_baud_rate_validation() {
        let mut uart = driver();
        uart.initialize().unwrap();
        assert_eq!(uart.set_baud_rate(0), Err(UartError::InvalidBaudRate));
        uart.set_baud_rate(921_600).unwrap();
        assert_eq!(uart.baud_rate(), 921_600);
    }

    #[test]
    fn test_software_flow_threshold_ordering() {
        let mut uart = driver();
        uart.initialize().unwrap();
        assert_eq!(
            uart.configure_software_flow_control(SoftwareFlowConfig {
                enable: true,
                xon_threshold: 100,
                xoff_threshold: 50,
            }),
            Err(UartError::InvalidParameter)
        );
        uart.configure_software_flow_control(SoftwareFlowConfig {
            enable: true,
            xon_threshold: 64,
            xoff_threshold: 450,
        })
        .unwrap();
    }

    #[test]
    fn test_deinit_safety() {
        let mut uart = driver();
        uart.initialize().unwrap();
        uart.deinitialize().unwrap();
        assert!(!uart.is_initialized());
        // Lazy re-init brings the port back
        uart.write(b"again", 100).unwrap();
        assert!(uart.is_initialized());
    }
}
