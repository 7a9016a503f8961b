//! Shared peripheral lifecycle
//!
//! Every driver follows the same lazy-init pattern: construction only
//! captures configuration, and the first operation configures the hardware.
//! This lets board code build a full table of peripheral objects without
//! reserving hardware for the ones that never get used.

/// Common lifecycle shared by all peripheral drivers.
///
/// State machine:
///
/// ```text
/// constructed ── initialize() ──▶ idle ── start()/first op ──▶ running
///    ▲                             │                             │
///    │                             ├── deinitialize() ───────────┤
///    └─────────────────────────────┴── fault (surfaced) ─────────┘
/// ```
///
/// Contract: every public operation begins with [`ensure_initialized`];
/// if that fails the operation returns the peripheral's `NotInitialized`
/// error without side effects. After [`deinitialize`] the native driver is
/// released and no operation may touch it.
///
/// [`ensure_initialized`]: Peripheral::ensure_initialized
/// [`deinitialize`]: Peripheral::deinitialize
pub trait Peripheral {
    /// Peripheral-specific error enumeration.
    type Error;

    /// Whether the native driver has been installed.
    fn is_initialized(&self) -> bool;

    /// Install the native driver with the configuration captured at
    /// construction.
    ///
    /// Returns the peripheral's `AlreadyInitialized` error when called on
    /// an initialized driver.
    fn initialize(&mut self) -> Result<(), Self::Error>;

    /// Release the native driver, quiesce callbacks and mark the
    /// peripheral uninitialized.
    fn deinitialize(&mut self) -> Result<(), Self::Error>;

    /// Initialize on first use.
    fn ensure_initialized(&mut self) -> Result<(), Self::Error> {
        if self.is_initialized() {
            Ok(())
        } else {
            self.initialize()
        }
    }
}
