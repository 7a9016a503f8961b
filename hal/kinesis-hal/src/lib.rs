//! Kinesis Hardware Abstraction Layer
//!
//! This crate defines the peripheral contracts implemented by chip-specific
//! HALs (ESP32-C6 today, others later). Application and driver code
//! programs against these traits so the same motor-control logic runs on
//! any supported board.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  Application / motor-control code       │
//! └─────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────┐
//! │  kinesis-sync (thread-safe wrappers)    │
//! └─────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────┐
//! │  kinesis-hal (this crate - contracts)   │
//! └─────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────┐
//! │  kinesis-hal-esp32c6 (chip drivers)     │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Contracts
//!
//! - [`gpio::Gpio`] - digital I/O with polarity mapping and interrupts
//! - [`adc::Adc`] - one-shot and continuous conversion
//! - [`can::Can`] - classic CAN with alerts and bus-off recovery
//! - [`uart::Uart`] - serial ports incl. RS-485 and pattern detection
//! - [`i2c::I2cBus`] - I2C master with transactions and async forms
//! - [`spi::SpiBus`] - SPI master with CS-held sequences
//! - [`pwm::Pwm`] - LEDC-style PWM with timer sharing and fades
//! - [`pio::Pio`] - symbol engine (IR, addressable LEDs)
//! - [`timer::PeriodicTimer`] - periodic callback timer
//! - [`nvs::Nvs`] - namespaced key/value storage
//!
//! All drivers share the lazy-init lifecycle of [`peripheral::Peripheral`]
//! and the error-handling conventions described there: construction only
//! captures configuration, hardware is touched on first use, and every
//! operation reports a dense peripheral-specific error kind.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

pub mod adc;
pub mod can;
pub mod gpio;
pub mod guard;
pub mod i2c;
pub mod nvs;
pub mod peripheral;
pub mod pio;
pub mod pwm;
pub mod spi;
pub mod timer;
pub mod types;
pub mod uart;

// Re-export key traits at crate root for convenience
pub use adc::Adc;
pub use can::Can;
pub use gpio::Gpio;
pub use guard::OutputGuard;
pub use i2c::I2cBus;
pub use nvs::Nvs;
pub use peripheral::Peripheral;
pub use pio::Pio;
pub use pwm::Pwm;
pub use spi::SpiBus;
pub use timer::PeriodicTimer;
pub use uart::Uart;
