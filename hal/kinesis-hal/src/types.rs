//! Platform-agnostic hardware scalar types
//!
//! These types are shared by every peripheral contract so that application
//! code never touches chip-specific pin or port representations. Negative
//! pin numbers and all-ones port/host/channel values are reserved as
//! "unassigned" sentinels.

/// GPIO pin number.
///
/// Signed so that [`INVALID_PIN`] can mark unassigned pins in configuration
/// records that are filled in lazily (e.g. optional RTS/CTS lines).
pub type PinNumber = i32;

/// Sentinel for an unassigned or invalid pin.
pub const INVALID_PIN: PinNumber = -1;

/// Highest pin number the abstraction layer will accept.
pub const MAX_PIN_NUMBER: PinNumber = 255;

/// Communication port identifier (UART port, I2C port, ...).
pub type PortId = u32;

/// Sentinel for an unassigned port.
pub const INVALID_PORT: PortId = u32::MAX;

/// Host/controller identifier (SPI host, CAN controller, ADC unit).
pub type HostId = u32;

/// Sentinel for an unassigned host.
pub const INVALID_HOST: HostId = u32::MAX;

/// Channel identifier (ADC channel, PWM channel, PIO channel).
pub type ChannelId = u32;

/// Sentinel for an unassigned channel.
pub const INVALID_CHANNEL: ChannelId = u32::MAX;

/// Frequency in Hz.
pub type FrequencyHz = u32;

/// Serial baud rate in bits per second.
pub type BaudRate = u32;

/// Timeout in milliseconds.
pub type TimeoutMs = u32;

/// Non-blocking: the operation returns immediately.
pub const TIMEOUT_NONE: TimeoutMs = 0;

/// Block indefinitely.
pub const TIMEOUT_FOREVER: TimeoutMs = u32::MAX;

/// Monotonic timestamp in microseconds.
pub type TimestampUs = u64;

/// Peripheral clock source selection.
///
/// Which sources are usable depends on the peripheral; drivers reject
/// sources their block cannot be fed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ClockSource {
    /// Whatever the peripheral block defaults to.
    #[default]
    Default,
    /// Crystal oscillator.
    Xtal,
    /// Internal RC oscillator.
    Rc,
    /// PLL-derived clock.
    Pll,
}

/// Check that a pin number is inside the supported range.
pub const fn is_valid_pin(pin: PinNumber) -> bool {
    pin >= 0 && pin <= MAX_PIN_NUMBER
}

/// Check that a port identifier is assigned.
pub const fn is_valid_port(port: PortId) -> bool {
    port != INVALID_PORT
}

/// Check that a host identifier is assigned.
pub const fn is_valid_host(host: HostId) -> bool {
    host != INVALID_HOST
}

/// Check that a channel identifier is assigned.
pub const fn is_valid_channel(channel: ChannelId) -> bool {
    channel != INVALID_CHANNEL
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_validation() {
        assert!(is_valid_pin(0));
        assert!(is_valid_pin(MAX_PIN_NUMBER));
        assert!(!is_valid_pin(INVALID_PIN));
        assert!(!is_valid_pin(MAX_PIN_NUMBER + 1));
    }

    #[test]
    fn test_sentinels_are_invalid() {
        assert!(!is_valid_port(INVALID_PORT));
        assert!(!is_valid_host(INVALID_HOST));
        assert!(!is_valid_channel(INVALID_CHANNEL));
        assert!(is_valid_port(0));
        assert!(is_valid_channel(7));
    }
}
