//! CAN controller contract
//!
//! Classic CAN (ISO 11898) with standard or extended identifiers, DLC 0-8.
//! The message record also carries the CAN-FD fields (FD/BRS/ESI, extended
//! DLC); controllers that do not implement FD keep the layout and reject
//! the mode through the capability query.

use crate::peripheral::Peripheral;
use crate::types::{BaudRate, HostId, PinNumber, TimeoutMs, TimestampUs, INVALID_PIN};

/// CAN error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CanError {
    Failure,
    NotInitialized,
    AlreadyInitialized,
    InvalidParameter,
    NullPointer,
    OutOfMemory,
    /// Controller is in bus-off and recovery has not succeeded.
    BusOff,
    /// Bus error (stuff/form/CRC/ACK/bit) reported by the controller.
    BusError,
    BusBusy,
    BusNotAvailable,
    /// Controller busy with a filter reconfiguration.
    ResourceBusy,
    StuffError,
    FormError,
    CrcError,
    AckError,
    BitError,
    ArbitrationLost,
    Timeout,
    MessageLost,
    InvalidMessage,
    MessageTooLong,
    QueueFull,
    QueueEmpty,
    FilterFull,
    FilterError,
    HardwareFault,
    CommunicationFailure,
    DeviceNotResponding,
    VoltageOutOfRange,
    InvalidConfiguration,
    UnsupportedOperation,
    InvalidBaudRate,
    NotStarted,
    AlreadyStarted,
    SystemError,
    PermissionDenied,
    OperationAborted,
}

impl CanError {
    /// Human-readable description of the error kind.
    pub const fn description(self) -> &'static str {
        match self {
            CanError::Failure => "General failure",
            CanError::NotInitialized => "Not initialized",
            CanError::AlreadyInitialized => "Already initialized",
            CanError::InvalidParameter => "Invalid parameter",
            CanError::NullPointer => "Null pointer",
            CanError::OutOfMemory => "Out of memory",
            CanError::BusOff => "Bus off state",
            CanError::BusError => "Bus error",
            CanError::BusBusy => "Bus busy",
            CanError::BusNotAvailable => "Bus not available",
            CanError::ResourceBusy => "Resource busy",
            CanError::StuffError => "Stuff error",
            CanError::FormError => "Form error",
            CanError::CrcError => "CRC error",
            CanError::AckError => "Acknowledge error",
            CanError::BitError => "Bit error",
            CanError::ArbitrationLost => "Arbitration lost",
            CanError::Timeout => "Message timeout",
            CanError::MessageLost => "Message lost",
            CanError::InvalidMessage => "Invalid message",
            CanError::MessageTooLong => "Message too long",
            CanError::QueueFull => "Queue full",
            CanError::QueueEmpty => "Queue empty",
            CanError::FilterFull => "Filter full",
            CanError::FilterError => "Filter error",
            CanError::HardwareFault => "Hardware fault",
            CanError::CommunicationFailure => "Communication failure",
            CanError::DeviceNotResponding => "Device not responding",
            CanError::VoltageOutOfRange => "Voltage out of range",
            CanError::InvalidConfiguration => "Invalid configuration",
            CanError::UnsupportedOperation => "Unsupported operation",
            CanError::InvalidBaudRate => "Invalid baud rate",
            CanError::NotStarted => "Controller not started",
            CanError::AlreadyStarted => "Controller already started",
            CanError::SystemError => "System error",
            CanError::PermissionDenied => "Permission denied",
            CanError::OperationAborted => "Operation aborted",
        }
    }
}

impl core::fmt::Display for CanError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.description())
    }
}

/// Result alias for CAN operations.
pub type CanResult<T> = Result<T, CanError>;

/// Maximum payload for a classic CAN frame.
pub const CAN_MAX_DLC: u8 = 8;

/// Controller operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CanMode {
    #[default]
    Normal,
    /// Transmit without requiring acknowledgment (self-test).
    NoAck,
    /// Receive-only; the controller never drives the bus.
    ListenOnly,
}

/// Controller state per the bus-fault state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CanControllerState {
    #[default]
    Stopped,
    Running,
    /// Bus-off recovery sequence in progress.
    Recovering,
    BusOff,
}

/// A CAN message.
///
/// The FD fields (`fd`, `brs`, `esi`) are carried for layout stability on
/// controllers that may gain FD support later; classic controllers reject
/// them at send time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CanMessage {
    /// 11-bit (standard) or 29-bit (extended) identifier.
    pub id: u32,
    pub extended: bool,
    /// Remote transmission request.
    pub rtr: bool,
    /// Do not retransmit on error or arbitration loss.
    pub single_shot: bool,
    /// Receive our own transmission (requires controller support).
    pub self_reception: bool,
    /// Data length code, 0-8 for classic frames.
    pub dlc: u8,
    pub data: [u8; 8],
    /// Reception timestamp, microseconds.
    pub timestamp_us: TimestampUs,
    /// Monotonic per-controller sequence number assigned at reception.
    pub sequence: u32,
    /// Retransmission attempts observed for this frame.
    pub retry_count: u8,
    /// Bus errors observed while this frame was pending.
    pub error_count: u8,
    /// CAN-FD frame (unsupported on this family; layout reserved).
    pub fd: bool,
    /// CAN-FD bit-rate switching.
    pub brs: bool,
    /// CAN-FD error state indicator.
    pub esi: bool,
}

impl Default for CanMessage {
    fn default() -> Self {
        Self::new(0)
    }
}

impl CanMessage {
    /// Standard-ID data frame with no payload.
    pub const fn new(id: u32) -> Self {
        Self {
            id,
            extended: false,
            rtr: false,
            single_shot: false,
            self_reception: false,
            dlc: 0,
            data: [0; 8],
            timestamp_us: 0,
            sequence: 0,
            retry_count: 0,
            error_count: 0,
            fd: false,
            brs: false,
            esi: false,
        }
    }

    /// Data frame with payload copied from `data`.
    ///
    /// Returns `InvalidMessage` when the payload exceeds 8 bytes or the ID
    /// does not fit the chosen format.
    pub fn with_data(id: u32, extended: bool, data: &[u8]) -> CanResult<Self> {
        if data.len() > CAN_MAX_DLC as usize {
            return Err(CanError::MessageTooLong);
        }
        if !is_valid_can_id(id, extended) {
            return Err(CanError::InvalidMessage);
        }
        let mut msg = Self::new(id);
        msg.extended = extended;
        msg.dlc = data.len() as u8;
        msg.data[..data.len()].copy_from_slice(data);
        Ok(msg)
    }

    /// Valid classic DLC.
    pub const fn is_valid_dlc(dlc: u8) -> bool {
        dlc <= CAN_MAX_DLC
    }

    /// Payload view limited to the DLC.
    pub fn payload(&self) -> &[u8] {
        let len = (self.dlc.min(CAN_MAX_DLC)) as usize;
        &self.data[..len]
    }
}

/// Check that an identifier fits its frame format.
pub const fn is_valid_can_id(id: u32, extended: bool) -> bool {
    if extended {
        id <= 0x1FFF_FFFF
    } else {
        id <= 0x7FF
    }
}

/// Controller configuration captured at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CanConfig {
    /// Controller index, 0 or 1.
    pub controller_id: HostId,
    pub tx_pin: PinNumber,
    pub rx_pin: PinNumber,
    pub baud_rate: BaudRate,
    pub mode: CanMode,
    pub loopback: bool,
    pub silent: bool,
    pub tx_queue_len: u16,
    pub rx_queue_len: u16,
    /// Alerts enabled at initialization.
    pub alerts: CanAlerts,
    /// Bus-off recovery attempts before giving up.
    pub max_recovery_attempts: u8,
    /// Per-attempt recovery wait.
    pub recovery_timeout_ms: TimeoutMs,
}

impl Default for CanConfig {
    fn default() -> Self {
        Self {
            controller_id: 0,
            tx_pin: INVALID_PIN,
            rx_pin: INVALID_PIN,
            baud_rate: 500_000,
            mode: CanMode::Normal,
            loopback: false,
            silent: false,
            tx_queue_len: 10,
            rx_queue_len: 10,
            alerts: CanAlerts::NONE,
            max_recovery_attempts: 3,
            recovery_timeout_ms: 2000,
        }
    }
}

/// Acceptance filter: a frame with identifier `x` is admitted iff
/// `(x & mask) == (id & mask)` and the frame format matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CanFilter {
    pub id: u32,
    pub mask: u32,
    pub extended: bool,
    /// Single-filter mode (one wide filter) vs dual-filter.
    pub single_filter: bool,
}

impl CanFilter {
    /// Accept every frame of the given format.
    pub const fn accept_all(extended: bool) -> Self {
        Self {
            id: 0,
            mask: 0,
            extended,
            single_filter: true,
        }
    }

    /// Whether `id`/`extended` passes this filter.
    pub const fn matches(&self, id: u32, extended: bool) -> bool {
        extended == self.extended && (id & self.mask) == (self.id & self.mask)
    }
}

/// Alert bit set.
///
/// Alerts are native-driver events surfaced either through
/// [`Can::read_alerts`] or the background alert monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CanAlerts(pub u32);

impl CanAlerts {
    pub const NONE: Self = Self(0);
    pub const TX_IDLE: Self = Self(1 << 0);
    pub const TX_SUCCESS: Self = Self(1 << 1);
    pub const TX_FAILED: Self = Self(1 << 2);
    pub const RX_DATA: Self = Self(1 << 3);
    pub const RX_QUEUE_FULL: Self = Self(1 << 4);
    pub const ABOVE_ERROR_WARNING: Self = Self(1 << 5);
    pub const ERROR_PASSIVE: Self = Self(1 << 6);
    pub const BUS_ERROR: Self = Self(1 << 7);
    pub const ARBITRATION_LOST: Self = Self(1 << 8);
    pub const BUS_OFF: Self = Self(1 << 9);
    pub const BUS_RECOVERED: Self = Self(1 << 10);
    pub const ALL: Self = Self(0x7FF);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    pub const fn intersects(self, other: Self) -> bool {
        (self.0 & other.0) != 0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl core::ops::BitOr for CanAlerts {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl core::ops::BitOrAssign for CanAlerts {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Bus status snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CanStatus {
    pub state: CanControllerState,
    pub tx_error_count: u32,
    pub rx_error_count: u32,
    pub tx_failed_count: u32,
    pub rx_missed_count: u32,
    pub msgs_to_tx: u32,
    pub msgs_to_rx: u32,
    pub bus_off: bool,
    pub error_warning: bool,
    pub error_passive: bool,
}

/// Controller capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CanCapabilities {
    pub controllers: u8,
    pub max_baud_rate: BaudRate,
    pub min_baud_rate: BaudRate,
    /// CAN-FD frames supported.
    pub supports_fd: bool,
    pub supports_listen_only: bool,
    pub supports_self_reception: bool,
}

/// Monotonic operation counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CanStatistics {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub send_failures: u64,
    pub receive_failures: u64,
    pub bus_error_count: u32,
    pub arbitration_lost_count: u32,
    pub bus_off_events: u32,
    pub controller_resets: u32,
    pub tx_queue_peak: u32,
    pub rx_queue_peak: u32,
    pub last_activity_us: TimestampUs,
}

/// Health snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CanDiagnostics {
    pub bus_healthy: bool,
    pub last_error: Option<CanError>,
    pub last_error_us: TimestampUs,
    pub consecutive_errors: u32,
    /// Approximate bus load, percent.
    pub bus_load_percent: u8,
    pub controller_resets: u32,
}

impl Default for CanDiagnostics {
    fn default() -> Self {
        Self {
            bus_healthy: true,
            last_error: None,
            last_error_us: 0,
            consecutive_errors: 0,
            bus_load_percent: 0,
            controller_resets: 0,
        }
    }
}

/// Receive callback, invoked in ISR context with the frame borrowed for
/// the duration of the call.
pub type CanReceiveCallback = fn(message: &CanMessage, user: usize);

/// CAN controller contract.
///
/// Transmit requires the running state. Acceptance filter changes after
/// start go through [`reconfigure_acceptance_filter`], which stops,
/// applies and restarts; operations racing the reconfiguration fail with
/// `ResourceBusy`.
///
/// [`reconfigure_acceptance_filter`]: Can::reconfigure_acceptance_filter
pub trait Can: Peripheral<Error = CanError> {
    fn start(&mut self) -> CanResult<()>;
    fn stop(&mut self) -> CanResult<()>;
    fn controller_state(&self) -> CanControllerState;

    /// Queue a message for transmission.
    ///
    /// A queued message is eventually transmitted, explicitly cancelled by
    /// `deinitialize`, or counted in `tx_failed`.
    fn send_message(&mut self, message: &CanMessage, timeout: TimeoutMs) -> CanResult<()>;
    fn receive_message(&mut self, timeout: TimeoutMs) -> CanResult<CanMessage>;

    /// Queue up to `messages.len()` frames, short-circuiting on the first
    /// failure. Returns the number queued.
    fn send_message_batch(&mut self, messages: &[CanMessage], timeout: TimeoutMs) -> usize {
        let mut sent = 0;
        for message in messages {
            if self.send_message(message, timeout).is_err() {
                break;
            }
            sent += 1;
        }
        sent
    }

    /// Drain up to `out.len()` frames, stopping early when the queue
    /// empties or the timeout elapses. Returns the number received.
    fn receive_message_batch(&mut self, out: &mut [CanMessage], timeout: TimeoutMs) -> usize {
        let mut received = 0;
        for slot in out.iter_mut() {
            match self.receive_message(timeout) {
                Ok(msg) => {
                    *slot = msg;
                    received += 1;
                }
                Err(_) => break,
            }
        }
        received
    }

    fn set_receive_callback(&mut self, callback: CanReceiveCallback, user: usize) -> CanResult<()>;
    fn clear_receive_callback(&mut self);

    /// Install an acceptance filter. Only valid before `start`.
    fn set_acceptance_filter(&mut self, filter: CanFilter) -> CanResult<()>;
    /// Remove filtering (accept all).
    fn clear_acceptance_filter(&mut self) -> CanResult<()>;
    /// Stop, apply the new filter, restart.
    fn reconfigure_acceptance_filter(&mut self, filter: CanFilter) -> CanResult<()>;

    fn configure_alerts(&mut self, alerts: CanAlerts) -> CanResult<()>;
    /// Block until an enabled alert fires or the timeout elapses.
    fn read_alerts(&mut self, timeout: TimeoutMs) -> CanResult<CanAlerts>;

    /// Preserve controller configuration across light sleep.
    fn configure_sleep_retention(&mut self, enable: bool) -> CanResult<()>;

    /// Run the bus-off recovery sequence. With `force`, recovery is
    /// initiated even when the controller does not report bus-off.
    fn recover_from_bus_off(&mut self, force: bool) -> CanResult<()>;

    fn get_status(&mut self) -> CanResult<CanStatus>;
    /// Stop, clear errors and queues, restart.
    fn reset(&mut self) -> CanResult<()>;

    fn capabilities(&self) -> CanCapabilities;

    // Lock-free queue state, backed by values cached on each operation.
    fn is_transmit_queue_full(&self) -> bool;
    fn is_receive_queue_empty(&self) -> bool;

    fn statistics(&self) -> CanStatistics;
    fn reset_statistics(&mut self);
    fn diagnostics(&self) -> CanDiagnostics;
    fn reset_diagnostics(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_payload_bounds() {
        let msg = CanMessage::with_data(0x123, false, &[1, 2, 3]).unwrap();
        assert_eq!(msg.dlc, 3);
        assert_eq!(msg.payload(), &[1, 2, 3]);

        let too_long = [0u8; 9];
        assert_eq!(
            CanMessage::with_data(0x123, false, &too_long),
            Err(CanError::MessageTooLong)
        );
    }

    #[test]
    fn test_id_range_per_format() {
        assert!(is_valid_can_id(0x7FF, false));
        assert!(!is_valid_can_id(0x800, false));
        assert!(is_valid_can_id(0x1FFF_FFFF, true));
        assert!(!is_valid_can_id(0x2000_0000, true));
        assert_eq!(
            CanMessage::with_data(0x800, false, &[]),
            Err(CanError::InvalidMessage)
        );
    }

    #[test]
    fn test_filter_matching() {
        let filter = CanFilter {
            id: 0x100,
            mask: 0x700,
            extended: false,
            single_filter: true,
        };
        assert!(filter.matches(0x123, false));
        assert!(filter.matches(0x1FF, false));
        assert!(!filter.matches(0x223, false));
        // Format mismatch never passes
        assert!(!filter.matches(0x123, true));

        assert!(CanFilter::accept_all(false).matches(0x7FF, false));
    }

    #[test]
    fn test_alert_bit_ops() {
        let alerts = CanAlerts::BUS_OFF | CanAlerts::BUS_ERROR;
        assert!(alerts.contains(CanAlerts::BUS_OFF));
        assert!(alerts.intersects(CanAlerts::BUS_ERROR));
        assert!(!alerts.contains(CanAlerts::TX_SUCCESS));
        assert!(CanAlerts::ALL.contains(alerts));
        assert!(CanAlerts::NONE.is_empty());
    }
}
