//! ESP32-C6 drivers for the Kinesis HAL
//!
//! One driver per `kinesis-hal` contract, implemented against the SoC's
//! peripheral blocks: the GPIO matrix, the two TWAI controllers, the
//! LEDC PWM block, the RMT symbol engine, the ADC units, the serial
//! buses and the NVS partition.
//!
//! Every driver owns its native handle through the [`port`] seam - a set
//! of traits mirroring the documented vendor driver operations. The SDK
//! glue implements them on the target; [`port::soft`] implements them in
//! pure logic for host tests and bench development, with loopback and
//! fault injection where the test-suite needs it.
//!
//! Drivers follow the shared lazy-init lifecycle: construction captures
//! configuration, the first operation installs the native driver, and
//! `deinitialize` quiesces callbacks before the handle is released.

#![cfg_attr(not(test), no_std)]

pub mod adc;
pub mod can;
pub mod gpio;
pub mod i2c;
pub mod nvs;
pub mod pio;
pub mod port;
pub mod pwm;
pub mod spi;
pub mod timer;
pub mod uart;

pub use adc::AdcUnit;
pub use can::TwaiCan;
pub use gpio::GpioPin;
pub use i2c::I2cMaster;
pub use nvs::NvsNamespace;
pub use pio::RmtPio;
pub use pwm::LedcPwm;
pub use spi::SpiMaster;
pub use timer::AlarmTimer;
pub use uart::UartDriver;
