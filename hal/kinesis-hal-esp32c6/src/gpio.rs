//! GPIO pin driver
//!
//! One driver instance owns one pin of the GPIO matrix. Configuration is
//! captured at construction and applied on first use; the logical
//! active/inactive view is mapped through the configured polarity, and
//! `verify_*` operations read the pad registers back to catch drift.

use kinesis_hal::gpio::{
    ActiveState, Direction, DriveStrength, GlitchFilterConfig, Gpio, GpioConfig, GpioDiagnostics,
    GpioError, GpioResult, GpioSnapshot, GpioStatistics, InterruptCallback, InterruptStatus,
    InterruptTrigger, OutputMode, PullMode, SleepConfig, WakeupConfig,
};
use kinesis_hal::peripheral::Peripheral;
use kinesis_hal::types::{is_valid_pin, PinNumber, TimeoutMs};

use crate::port::{GpioOps, PinSetup, PortClock, PortError};

/// Structural errors beyond this count mark the pin unhealthy.
const ERROR_THRESHOLD: u32 = 5;

/// GPIO matrix pin.
pub struct GpioPin<P: GpioOps> {
    port: P,
    config: GpioConfig,
    initialized: bool,
    /// Cached logical state for outputs.
    active: bool,
    irq: InterruptStatus,
    glitch_configured: bool,
    glitch_enabled: bool,
    hold_enabled: bool,
    stats: GpioStatistics,
    diag: GpioDiagnostics,
}

impl<P: GpioOps> GpioPin<P> {
    /// Capture configuration; hardware is untouched until first use.
    pub fn new(port: P, config: GpioConfig) -> Self {
        Self {
            port,
            config,
            initialized: false,
            active: false,
            irq: InterruptStatus::default(),
            glitch_configured: false,
            glitch_enabled: false,
            hold_enabled: false,
            stats: GpioStatistics::default(),
            diag: GpioDiagnostics::default(),
        }
    }

    /// Captured configuration.
    pub fn config(&self) -> &GpioConfig {
        &self.config
    }

    /// Direct access to the native port (simulation and test hook).
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    fn convert_port_error(err: PortError) -> GpioError {
        match err {
            PortError::Fail => GpioError::Failure,
            PortError::NoMem => GpioError::OutOfMemory,
            PortError::InvalidArg => GpioError::InvalidParameter,
            PortError::InvalidState => GpioError::InvalidConfiguration,
            PortError::NotFound => GpioError::InvalidPin,
            PortError::NotSupported => GpioError::UnsupportedOperation,
            PortError::Timeout => GpioError::Timeout,
            PortError::Busy => GpioError::PinBusy,
        }
    }

    const fn is_structural(err: GpioError) -> bool {
        matches!(
            err,
            GpioError::HardwareFault
                | GpioError::CommunicationFailure
                | GpioError::PullResistorFailure
        )
    }

    fn setup(&self) -> PinSetup {
        PinSetup {
            direction: self.config.direction,
            output_mode: self.config.output_mode,
            pull_mode: self.config.pull_mode,
            drive_strength: self.config.drive_strength,
        }
    }

    fn electrical_for_active(&self, active: bool) -> bool {
        match self.config.active_state {
            ActiveState::ActiveHigh => active,
            ActiveState::ActiveLow => !active,
        }
    }

    fn ready(&mut self) -> GpioResult<()> {
        if self.ensure_initialized().is_err() {
            self.stats.total_operations += 1;
            self.stats.failed_operations += 1;
            return Err(GpioError::NotInitialized);
        }
        Ok(())
    }

    fn record<T>(&mut self, result: GpioResult<T>) -> GpioResult<T> {
        self.stats.total_operations += 1;
        self.stats.last_activity_us = self.port.now_us();
        match &result {
            Ok(_) => {
                self.stats.successful_operations += 1;
                self.diag.consecutive_errors = 0;
            }
            Err(e) => {
                self.stats.failed_operations += 1;
                self.diag.last_error = Some(*e);
                self.diag.last_error_us = self.stats.last_activity_us;
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
}

impl<P: GpioOps> Peripheral for GpioPin<P> {
    type Error = GpioError;

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn initialize(&mut self) -> GpioResult<()> {
        if self.initialized {
            return Err(GpioError::AlreadyInitialized);
        }
        if !is_valid_pin(self.config.pin) {
            return Err(GpioError::InvalidPin);
        }
        let setup = self.setup();
        self.port
            .configure(self.config.pin, setup)
            .map_err(Self::convert_port_error)?;
        if self.config.direction == Direction::Output {
            let level = self.electrical_for_active(false);
            self.port
                .set_level(self.config.pin, level)
                .map_err(Self::convert_port_error)?;
        }
        self.active = false;
        self.initialized = true;
        Ok(())
    }

    fn deinitialize(&mut self) -> GpioResult<()> {
        if !self.initialized {
            return Err(GpioError::NotInitialized);
        }
        // Quiesce the interrupt before the pad goes away.
        if self.irq.configured {
            let _ = self.port.disable_interrupt(self.config.pin);
            let _ = self.port.detach_interrupt(self.config.pin);
            self.irq = InterruptStatus::default();
        }
        self.port
            .release(self.config.pin)
            .map_err(Self::convert_port_error)?;
        self.initialized = false;
        Ok(())
    }
}

impl<P: GpioOps> Gpio for GpioPin<P> {
    fn pin(&self) -> PinNumber {
        self.config.pin
    }

    fn set_direction(&mut self, direction: Direction) -> GpioResult<()> {
        self.ready()?;
        self.config.direction = direction;
        let setup = self.setup();
        let result = self
            .port
            .configure(self.config.pin, setup)
            .map_err(Self::convert_port_error);
        if result.is_ok() {
            self.stats.direction_changes += 1;
        }
        self.record(result)
    }

    fn direction(&self) -> Direction {
        self.config.direction
    }

    fn set_output_mode(&mut self, mode: OutputMode) -> GpioResult<()> {
        self.ready()?;
        self.config.output_mode = mode;
        let setup = self.setup();
        let result = self
            .port
            .configure(self.config.pin, setup)
            .map_err(Self::convert_port_error);
        self.record(result)
    }

    fn output_mode(&self) -> OutputMode {
        self.config.output_mode
    }

    fn set_pull_mode(&mut self, pull: PullMode) -> GpioResult<()> {
        self.ready()?;
        self.config.pull_mode = pull;
        let setup = self.setup();
        let result = self
            .port
            .configure(self.config.pin, setup)
            .map_err(Self::convert_port_error);
        self.record(result)
    }

    fn pull_mode(&self) -> PullMode {
        self.config.pull_mode
    }

    fn set_drive_strength(&mut self, strength: DriveStrength) -> GpioResult<()> {
        self.ready()?;
        self.config.drive_strength = strength;
        let setup = self.setup();
        let result = self
            .port
            .configure(self.config.pin, setup)
            .map_err(Self::convert_port_error);
        self.record(result)
    }

    fn drive_strength(&self) -> DriveStrength {
        self.config.drive_strength
    }

    fn active_state(&self) -> ActiveState {
        self.config.active_state
    }

    fn set_active(&mut self) -> GpioResult<()> {
        self.ready()?;
        let level = self.electrical_for_active(true);
        let result = self
            .port
            .set_level(self.config.pin, level)
            .map_err(Self::convert_port_error);
        if result.is_ok() {
            self.active = true;
            self.stats.state_changes += 1;
        }
        self.record(result)
    }

    fn set_inactive(&mut self) -> GpioResult<()> {
        self.ready()?;
        let level = self.electrical_for_active(false);
        let result = self
            .port
            .set_level(self.config.pin, level)
            .map_err(Self::convert_port_error);
        if result.is_ok() {
            self.active = false;
            self.stats.state_changes += 1;
        }
        self.record(result)
    }

    fn toggle(&mut self) -> GpioResult<()> {
        if self.active {
            self.set_inactive()
        } else {
            self.set_active()
        }
    }

    fn is_active(&mut self) -> GpioResult<bool> {
        self.ready()?;
        let result = self
            .port
            .level(self.config.pin)
            .map_err(Self::convert_port_error)
            .map(|high| match self.config.active_state {
                ActiveState::ActiveHigh => high,
                ActiveState::ActiveLow => !high,
            });
        self.record(result)
    }

    fn set_level(&mut self, high: bool) -> GpioResult<()> {
        self.ready()?;
        let result = self
            .port
            .set_level(self.config.pin, high)
            .map_err(Self::convert_port_error);
        if result.is_ok() {
            self.active = high == self.electrical_for_active(true);
            self.stats.state_changes += 1;
        }
        self.record(result)
    }

    fn level(&mut self) -> GpioResult<bool> {
        self.ready()?;
        let result = self
            .port
            .level(self.config.pin)
            .map_err(Self::convert_port_error);
        self.record(result)
    }

    fn verify_direction(&mut self) -> GpioResult<Direction> {
        self.ready()?;
        let result = self
            .port
            .read_back(self.config.pin)
            .map_err(Self::convert_port_error)
            .and_then(|setup| {
                if setup.direction == self.config.direction {
                    Ok(setup.direction)
                } else {
                    Err(GpioError::HardwareFault)
                }
            });
        self.record(result)
    }

    fn verify_output_mode(&mut self) -> GpioResult<OutputMode> {
        self.ready()?;
        let result = self
            .port
            .read_back(self.config.pin)
            .map_err(Self::convert_port_error)
            .and_then(|setup| {
                if setup.output_mode == self.config.output_mode {
                    Ok(setup.output_mode)
                } else {
                    Err(GpioError::HardwareFault)
                }
            });
        self.record(result)
    }

    fn verify_hardware_configuration(&mut self) -> GpioResult<()> {
        self.ready()?;
        let expected = self.setup();
        let result = self
            .port
            .read_back(self.config.pin)
            .map_err(Self::convert_port_error)
            .and_then(|setup| {
                if setup == expected {
                    Ok(())
                } else {
                    Err(GpioError::HardwareFault)
                }
            });
        self.record(result)
    }

    fn configure_interrupt(
        &mut self,
        trigger: InterruptTrigger,
        callback: Option<InterruptCallback>,
        user: usize,
    ) -> GpioResult<()> {
        self.ready()?;
        let result = if trigger == InterruptTrigger::None {
            self.port
                .detach_interrupt(self.config.pin)
                .map_err(Self::convert_port_error)
        } else {
            self.port
                .attach_interrupt(self.config.pin, trigger, callback, user)
                .map_err(Self::convert_port_error)
        };
        if result.is_ok() {
            self.irq.configured = trigger != InterruptTrigger::None;
            self.irq.enabled = false;
            self.irq.trigger = trigger;
        }
        self.record(result)
    }

    fn enable_interrupt(&mut self) -> GpioResult<()> {
        self.ready()?;
        if !self.irq.configured {
            return self.record(Err(GpioError::InterruptNotConfigured));
        }
        let result = self
            .port
            .enable_interrupt(self.config.pin)
            .map_err(Self::convert_port_error);
        if result.is_ok() {
            self.irq.enabled = true;
        }
        self.record(result)
    }

    fn disable_interrupt(&mut self) -> GpioResult<()> {
        self.ready()?;
        if !self.irq.configured {
            return self.record(Err(GpioError::InterruptNotConfigured));
        }
        let result = self
            .port
            .disable_interrupt(self.config.pin)
            .map_err(Self::convert_port_error);
        if result.is_ok() {
            self.irq.enabled = false;
        }
        self.record(result)
    }

    fn wait_for_interrupt(&mut self, timeout: TimeoutMs) -> GpioResult<()> {
        self.ready()?;
        if !self.irq.configured {
            return self.record(Err(GpioError::InterruptNotConfigured));
        }
        let result = self
            .port
            .wait_for_event(self.config.pin, timeout)
            .map_err(Self::convert_port_error);
        self.record(result)
    }

    fn interrupt_status(&self) -> InterruptStatus {
        InterruptStatus {
            count: self.port.event_count(self.config.pin),
            ..self.irq
        }
    }

    fn clear_interrupt_stats(&mut self) {
        self.port.clear_event_count(self.config.pin);
    }

    fn configure_glitch_filter(&mut self, config: GlitchFilterConfig) -> GpioResult<()> {
        self.ready()?;
        if config.window_ns == 0 {
            return self.record(Err(GpioError::InvalidParameter));
        }
        let result = self
            .port
            .configure_glitch_filter(self.config.pin, config.window_ns)
            .map_err(Self::convert_port_error);
        if result.is_ok() {
            self.glitch_configured = true;
        }
        self.record(result)
    }

    fn enable_glitch_filter(&mut self) -> GpioResult<()> {
        self.ready()?;
        if !self.glitch_configured {
            return self.record(Err(GpioError::InvalidConfiguration));
        }
        let result = self
            .port
            .set_glitch_filter_enabled(self.config.pin, true)
            .map_err(Self::convert_port_error);
        if result.is_ok() {
            self.glitch_enabled = true;
        }
        self.record(result)
    }

    fn disable_glitch_filter(&mut self) -> GpioResult<()> {
        self.ready()?;
        let result = self
            .port
            .set_glitch_filter_enabled(self.config.pin, false)
            .map_err(Self::convert_port_error);
        if result.is_ok() {
            self.glitch_enabled = false;
        }
        self.record(result)
    }

    fn configure_sleep(&mut self, config: SleepConfig) -> GpioResult<()> {
        self.ready()?;
        let setup = PinSetup {
            direction: config.direction,
            output_mode: self.config.output_mode,
            pull_mode: config.pull_mode,
            drive_strength: self.config.drive_strength,
        };
        let result = self
            .port
            .configure_sleep(self.config.pin, setup, config.hold)
            .map_err(Self::convert_port_error);
        self.record(result)
    }

    fn set_hold(&mut self, enable: bool) -> GpioResult<()> {
        self.ready()?;
        let result = self
            .port
            .set_hold(self.config.pin, enable)
            .map_err(Self::convert_port_error);
        if result.is_ok() {
            self.hold_enabled = enable;
        }
        self.record(result)
    }

    fn configure_wakeup(&mut self, config: WakeupConfig) -> GpioResult<()> {
        self.ready()?;
        let result = self
            .port
            .configure_wakeup(self.config.pin, config.trigger, config.enable)
            .map_err(Self::convert_port_error);
        self.record(result)
    }

    fn snapshot(&mut self) -> GpioResult<GpioSnapshot> {
        self.ready()?;
        let electrical = self
            .port
            .level(self.config.pin)
            .map_err(Self::convert_port_error);
        let result = electrical.map(|electrical_high| GpioSnapshot {
            config: self.config,
            logical_active: self.active,
            electrical_high,
            interrupt: self.interrupt_status(),
            glitch_filter_enabled: self.glitch_enabled,
            hold_enabled: self.hold_enabled,
        });
        self.record(result)
    }

    fn statistics(&self) -> GpioStatistics {
        GpioStatistics {
            interrupt_count: self.port.event_count(self.config.pin),
            ..self.stats
        }
    }

    fn reset_statistics(&mut self) {
        self.stats = GpioStatistics::default();
        self.port.clear_event_count(self.config.pin);
    }

    fn diagnostics(&self) -> GpioDiagnostics {
        self.diag
    }

    fn reset_diagnostics(&mut self) {
        self.diag = GpioDiagnostics::default();
    }
}

// embedded-hal digital traits, so ecosystem drivers can take the pin.

impl<P: GpioOps> embedded_hal::digital::ErrorType for GpioPin<P> {
    type Error = GpioError;
}

impl<P: GpioOps> embedded_hal::digital::OutputPin for GpioPin<P> {
    fn set_low(&mut self) -> Result<(), GpioError> {
        self.set_level(false)
    }

    fn set_high(&mut self) -> Result<(), GpioError> {
        self.set_level(true)
    }
}

impl<P: GpioOps> embedded_hal::digital::StatefulOutputPin for GpioPin<P> {
    fn is_set_high(&mut self) -> Result<bool, GpioError> {
        self.level()
    }

    fn is_set_low(&mut self) -> Result<bool, GpioError> {
        self.level().map(|high| !high)
    }
}

impl<P: GpioOps> embedded_hal::digital::InputPin for GpioPin<P> {
    fn is_high(&mut self) -> Result<bool, GpioError> {
        self.level()
    }

    fn is_low(&mut self) -> Result<bool, GpioError> {
        self.level().map(|high| !high)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::soft::SoftGpio;

    use core::sync::atomic::{AtomicUsize, Ordering};

    fn output_pin(pin: PinNumber) -> GpioPin<SoftGpio> {
        GpioPin::new(SoftGpio::new(), GpioConfig::output(pin))
    }

    #[test]
    fn test_lazy_init_on_first_operation() {
        let mut pin = output_pin(8);
        assert!(!pin.is_initialized());
        pin.set_active().unwrap();
        assert!(pin.is_initialized());
    }

    #[test]
    fn test_double_initialize_rejected() {
        let mut pin = output_pin(8);
        pin.initialize().unwrap();
        assert_eq!(pin.initialize(), Err(GpioError::AlreadyInitialized));
    }

    #[test]
    fn test_invalid_pin_rejected() {
        let mut pin = output_pin(-1);
        assert_eq!(pin.initialize(), Err(GpioError::InvalidPin));
    }

    #[test]
    fn test_deinit_safety() {
        let mut pin = output_pin(8);
        pin.set_active().unwrap();
        pin.deinitialize().unwrap();
        assert!(!pin.is_initialized());
    }

    #[test]
    fn test_polarity_round_trip_active_high() {
        let mut pin = output_pin(8);
        pin.set_active().unwrap();
        assert!(pin.is_active().unwrap());
        pin.set_inactive().unwrap();
        assert!(!pin.is_active().unwrap());
    }

    #[test]
    fn test_polarity_round_trip_active_low() {
        let mut config = GpioConfig::output(9);
        config.active_state = ActiveState::ActiveLow;
        let mut pin = GpioPin::new(SoftGpio::new(), config);
        pin.set_active().unwrap();
        // Logical active maps to electrical low
        assert!(!pin.level().unwrap());
        assert!(pin.is_active().unwrap());
        pin.set_inactive().unwrap();
        assert!(pin.level().unwrap());
    }

    #[test]
    fn test_toggle() {
        let mut pin = output_pin(8);
        pin.set_inactive().unwrap();
        pin.toggle().unwrap();
        assert!(pin.is_active().unwrap());
        pin.toggle().unwrap();
        assert!(!pin.is_active().unwrap());
    }

    #[test]
    fn test_verify_direction_matches() {
        let mut pin = output_pin(8);
        pin.set_direction(Direction::Output).unwrap();
        assert_eq!(pin.verify_direction(), Ok(Direction::Output));
    }

    #[test]
    fn test_readback_drift_is_hardware_fault() {
        let mut pin = output_pin(8);
        pin.initialize().unwrap();
        pin.port_mut().inject_drift(
            8,
            PinSetup {
                direction: Direction::Input,
                ..PinSetup::default()
            },
        );
        assert_eq!(pin.verify_direction(), Err(GpioError::HardwareFault));
        assert_eq!(
            pin.verify_hardware_configuration(),
            Err(GpioError::HardwareFault)
        );
        assert_eq!(pin.diagnostics().consecutive_errors, 2);
    }

    #[test]
    fn test_consecutive_faults_mark_unhealthy() {
        let mut pin = output_pin(8);
        pin.initialize().unwrap();
        pin.port_mut().inject_drift(8, PinSetup::default());
        for _ in 0..ERROR_THRESHOLD {
            let _ = pin.verify_hardware_configuration();
        }
        assert!(!pin.diagnostics().healthy);
    }

    #[test]
    fn test_interrupt_wait_and_callback() {
        static FIRED: AtomicUsize = AtomicUsize::new(0);
        fn on_edge(_pin: PinNumber, user: usize) {
            FIRED.fetch_add(user, Ordering::Relaxed);
        }

        let mut pin = GpioPin::new(SoftGpio::new(), GpioConfig::input(4));
        pin.configure_interrupt(InterruptTrigger::RisingEdge, Some(on_edge), 1)
            .unwrap();
        pin.enable_interrupt().unwrap();
        pin.port_mut().set_input_level(4, true);
        assert_eq!(FIRED.load(Ordering::Relaxed), 1);
        // The semaphore was given before the callback ran
        pin.wait_for_interrupt(10).unwrap();
        assert_eq!(pin.wait_for_interrupt(0), Err(GpioError::Timeout));
        assert_eq!(pin.interrupt_status().count, 1);
    }

    #[test]
    fn test_interrupt_requires_configuration() {
        let mut pin = GpioPin::new(SoftGpio::new(), GpioConfig::input(4));
        assert_eq!(
            pin.enable_interrupt(),
            Err(GpioError::InterruptNotConfigured)
        );
        assert_eq!(
            pin.wait_for_interrupt(0),
            Err(GpioError::InterruptNotConfigured)
        );
    }

    #[test]
    fn test_glitch_filter_requires_configure() {
        let mut pin = GpioPin::new(SoftGpio::new(), GpioConfig::input(4));
        assert_eq!(
            pin.enable_glitch_filter(),
            Err(GpioError::InvalidConfiguration)
        );
        pin.configure_glitch_filter(GlitchFilterConfig { window_ns: 50 })
            .unwrap();
        pin.enable_glitch_filter().unwrap();
        pin.disable_glitch_filter().unwrap();
    }

    #[test]
    fn test_blink_scenario() {
        // Ten on/off cycles on pin 8, observing the logical state.
        let mut pin = output_pin(8);
        for _ in 0..10 {
            pin.set_active().unwrap();
            assert!(pin.is_active().unwrap());
            pin.set_inactive().unwrap();
            assert!(!pin.is_active().unwrap());
        }
        let stats = pin.statistics();
        assert!(stats.total_operations >= 40);
        assert_eq!(stats.failed_operations, 0);
        assert!(pin.diagnostics().healthy);
    }

    #[test]
    fn test_statistics_monotonic_and_reset() {
        let mut pin = output_pin(8);
        pin.set_active().unwrap();
        let first = pin.statistics().total_operations;
        pin.set_inactive().unwrap();
        assert!(pin.statistics().total_operations > first);
        pin.reset_statistics();
        assert_eq!(pin.statistics().total_operations, 0);
    }

    #[test]
    fn test_snapshot() {
        let mut pin = output_pin(8);
        pin.set_active().unwrap();
        let snap = pin.snapshot().unwrap();
        assert!(snap.logical_active);
        assert!(snap.electrical_high);
        assert_eq!(snap.config.pin, 8);
    }

    #[test]
    fn test_hold_latches_output() {
        let mut pin = output_pin(8);
        pin.set_active().unwrap();
        pin.set_hold(true).unwrap();
        pin.set_inactive().unwrap();
        // The pad stays at the held level even though the latch changed
        assert!(pin.level().unwrap());
        pin.set_hold(false).unwrap();
        pin.set_inactive().unwrap();
        assert!(!pin.level().unwrap());
    }
}
