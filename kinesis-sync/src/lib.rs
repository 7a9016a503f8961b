//! Thread-safe wrappers for Kinesis HAL drivers
//!
//! A driver from `kinesis-hal-esp32c6` is single-owner: every operation
//! takes `&mut self`. Tasks that share a peripheral wrap it here: the
//! wrapper owns the driver, serializes access through a mutex adapter,
//! and keeps threading statistics (contentions, timeouts, acquisition
//! times).
//!
//! Two lock disciplines, per peripheral class:
//!
//! - **Reader-writer** ([`SharedCan`], [`SharedAdc`]): mutations take the
//!   exclusive side, snapshots ride the shared side, hot-path queries
//!   are lock-free against atomics. No reader upgrade - release the
//!   shared lock before asking for the exclusive one.
//! - **Recursive** ([`SharedGpio`], [`SharedUart`], [`SharedI2c`],
//!   [`SharedSpi`], [`SharedPwm`]): nested acquisition on the owning
//!   task, which lets composite sections call forwarded operations
//!   under an explicit `lock()`.
//!
//! Every wrapper exposes batch forms that acquire the lock once, a
//! `with_lock` escape hatch reaching any driver operation not forwarded
//! directly, and a configurable acquisition timeout that surfaces as the
//! peripheral's own `Timeout` error.
//!
//! The mutex adapters in [`mutex`] are trait seams; the board crate
//! implements them over the RTOS primitives, and `Std*` implementations
//! back them on the host.

#![cfg_attr(not(any(test, feature = "std")), no_std)]

pub mod adc;
pub mod can;
pub mod wrapper;
pub mod gpio;
pub mod i2c;
pub mod mutex;
pub mod pwm;
pub mod spi;
pub mod uart;

pub use adc::SharedAdc;
pub use can::SharedCan;
pub use wrapper::{LockStatsSnapshot, SharedCore, TimeSource};
pub use gpio::SharedGpio;
pub use i2c::SharedI2c;
pub use mutex::{RawMutex, RawSharedMutex};
pub use pwm::SharedPwm;
pub use spi::SharedSpi;
pub use uart::SharedUart;

#[cfg(any(test, feature = "std"))]
pub use mutex::{StdRawMutex, StdRecursiveMutex, StdSharedMutex};
