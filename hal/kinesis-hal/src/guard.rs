//! RAII output guard
//!
//! Scoped "drive this pin active while I hold the guard" helper. On
//! construction the pin is (optionally) switched to output mode and set
//! active; on drop it is set inactive. The prior direction is not
//! restored, so a guard over an already-output pin leaves configuration
//! untouched.

use crate::gpio::{Direction, Gpio, GpioError};

/// Scoped GPIO output guard.
///
/// Construction failures do not panic; the guard records the error and
/// reports `is_valid() == false`, and drop then leaves the pin alone.
pub struct OutputGuard<'a, G: Gpio> {
    gpio: &'a mut G,
    valid: bool,
    last_error: Option<GpioError>,
}

impl<'a, G: Gpio> OutputGuard<'a, G> {
    /// Switch the pin to output mode (if requested) and set it active.
    pub fn new(gpio: &'a mut G, ensure_output_mode: bool) -> Self {
        let mut guard = Self {
            gpio,
            valid: false,
            last_error: None,
        };
        let result = guard.activate(ensure_output_mode);
        match result {
            Ok(()) => guard.valid = true,
            Err(e) => guard.last_error = Some(e),
        }
        guard
    }

    fn activate(&mut self, ensure_output_mode: bool) -> Result<(), GpioError> {
        if ensure_output_mode && self.gpio.direction() != Direction::Output {
            self.gpio.set_direction(Direction::Output)?;
        } else if self.gpio.direction() != Direction::Output {
            return Err(GpioError::DirectionMismatch);
        }
        self.gpio.set_active()
    }

    /// Whether construction fully succeeded.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Error recorded by construction or the last manual operation.
    pub fn last_error(&self) -> Option<GpioError> {
        self.last_error
    }

    /// Drive active again while the guard is alive.
    pub fn set_active(&mut self) -> Result<(), GpioError> {
        let result = self.gpio.set_active();
        if let Err(e) = result {
            self.last_error = Some(e);
        }
        result
    }

    /// Drive inactive without dropping the guard.
    pub fn set_inactive(&mut self) -> Result<(), GpioError> {
        let result = self.gpio.set_inactive();
        if let Err(e) = result {
            self.last_error = Some(e);
        }
        result
    }
}

impl<G: Gpio> Drop for OutputGuard<'_, G> {
    fn drop(&mut self) {
        if self.valid {
            // Best effort; drop must not panic.
            let _ = self.gpio.set_inactive();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio::*;
    use crate::peripheral::Peripheral;
    use crate::types::PinNumber;

    /// Minimal in-memory pin for guard behavior tests.
    struct StubPin {
        direction: Direction,
        active: bool,
        fail_direction: bool,
    }

    impl StubPin {
        fn input() -> Self {
            Self {
                direction: Direction::Input,
                active: false,
                fail_direction: false,
            }
        }
    }

    impl Peripheral for StubPin {
        type Error = GpioError;
        fn is_initialized(&self) -> bool {
            true
        }
        fn initialize(&mut self) -> Result<(), GpioError> {
            Err(GpioError::AlreadyInitialized)
        }
        fn deinitialize(&mut self) -> Result<(), GpioError> {
            Ok(())
        }
    }

    impl Gpio for StubPin {
        fn pin(&self) -> PinNumber {
            5
        }
        fn set_direction(&mut self, direction: Direction) -> GpioResult<()> {
            if self.fail_direction {
                return Err(GpioError::PinBusy);
            }
            self.direction = direction;
            Ok(())
        }
        fn direction(&self) -> Direction {
            self.direction
        }
        fn set_output_mode(&mut self, _: OutputMode) -> GpioResult<()> {
            Ok(())
        }
        fn output_mode(&self) -> OutputMode {
            OutputMode::PushPull
        }
        fn set_pull_mode(&mut self, _: PullMode) -> GpioResult<()> {
            Ok(())
        }
        fn pull_mode(&self) -> PullMode {
            PullMode::Floating
        }
        fn set_drive_strength(&mut self, _: DriveStrength) -> GpioResult<()> {
            Ok(())
        }
        fn drive_strength(&self) -> DriveStrength {
            DriveStrength::Ma20
        }
        fn active_state(&self) -> ActiveState {
            ActiveState::ActiveHigh
        }
        fn set_active(&mut self) -> GpioResult<()> {
            self.active = true;
            Ok(())
        }
        fn set_inactive(&mut self) -> GpioResult<()> {
            self.active = false;
            Ok(())
        }
        fn toggle(&mut self) -> GpioResult<()> {
            self.active = !self.active;
            Ok(())
        }
        fn is_active(&mut self) -> GpioResult<bool> {
            Ok(self.active)
        }
        fn set_level(&mut self, high: bool) -> GpioResult<()> {
            self.active = high;
            Ok(())
        }
        fn level(&mut self) -> GpioResult<bool> {
            Ok(self.active)
        }
        fn verify_direction(&mut self) -> GpioResult<Direction> {
            Ok(self.direction)
        }
        fn verify_output_mode(&mut self) -> GpioResult<OutputMode> {
            Ok(OutputMode::PushPull)
        }
        fn verify_hardware_configuration(&mut self) -> GpioResult<()> {
            Ok(())
        }
        fn configure_interrupt(
            &mut self,
            _: InterruptTrigger,
            _: Option<InterruptCallback>,
            _: usize,
        ) -> GpioResult<()> {
            Err(GpioError::UnsupportedOperation)
        }
        fn enable_interrupt(&mut self) -> GpioResult<()> {
            Err(GpioError::UnsupportedOperation)
        }
        fn disable_interrupt(&mut self) -> GpioResult<()> {
            Err(GpioError::UnsupportedOperation)
        }
        fn wait_for_interrupt(&mut self, _: crate::types::TimeoutMs) -> GpioResult<()> {
            Err(GpioError::UnsupportedOperation)
        }
        fn interrupt_status(&self) -> InterruptStatus {
            InterruptStatus::default()
        }
        fn clear_interrupt_stats(&mut self) {}
        fn configure_glitch_filter(&mut self, _: GlitchFilterConfig) -> GpioResult<()> {
            Err(GpioError::UnsupportedOperation)
        }
        fn enable_glitch_filter(&mut self) -> GpioResult<()> {
            Err(GpioError::UnsupportedOperation)
        }
        fn disable_glitch_filter(&mut self) -> GpioResult<()> {
            Err(GpioError::UnsupportedOperation)
        }
        fn configure_sleep(&mut self, _: SleepConfig) -> GpioResult<()> {
            Err(GpioError::UnsupportedOperation)
        }
        fn set_hold(&mut self, _: bool) -> GpioResult<()> {
            Err(GpioError::UnsupportedOperation)
        }
        fn configure_wakeup(&mut self, _: WakeupConfig) -> GpioResult<()> {
            Err(GpioError::UnsupportedOperation)
        }
        fn snapshot(&mut self) -> GpioResult<GpioSnapshot> {
            Err(GpioError::UnsupportedOperation)
        }
        fn statistics(&self) -> GpioStatistics {
            GpioStatistics::default()
        }
        fn reset_statistics(&mut self) {}
        fn diagnostics(&self) -> GpioDiagnostics {
            GpioDiagnostics::default()
        }
        fn reset_diagnostics(&mut self) {}
    }

    #[test]
    fn test_guard_sets_active_and_releases() {
        let mut pin = StubPin::input();
        {
            let guard = OutputGuard::new(&mut pin, true);
            assert!(guard.is_valid());
        }
        assert_eq!(pin.direction, Direction::Output);
        assert!(!pin.active);
    }

    #[test]
    fn test_guard_active_while_held() {
        let mut pin = StubPin::input();
        let guard = OutputGuard::new(&mut pin, true);
        assert!(guard.is_valid());
        drop(guard);
        assert!(!pin.active);
    }

    #[test]
    fn test_guard_without_mode_switch_on_input_pin() {
        let mut pin = StubPin::input();
        let guard = OutputGuard::new(&mut pin, false);
        assert!(!guard.is_valid());
        assert_eq!(guard.last_error(), Some(GpioError::DirectionMismatch));
    }

    #[test]
    fn test_guard_reports_construction_failure() {
        let mut pin = StubPin::input();
        pin.fail_direction = true;
        let guard = OutputGuard::new(&mut pin, true);
        assert!(!guard.is_valid());
        assert_eq!(guard.last_error(), Some(GpioError::PinBusy));
        drop(guard);
        // An invalid guard leaves the pin untouched on drop
        assert!(!pin.active);
    }

    #[test]
    fn test_manual_control_while_alive() {
        let mut pin = StubPin::input();
        let mut guard = OutputGuard::new(&mut pin, true);
        guard.set_inactive().unwrap();
        guard.set_active().unwrap();
        assert!(guard.is_valid());
    }
}
