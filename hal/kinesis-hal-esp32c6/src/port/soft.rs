//! Soft port: pure-logic implementations of the native driver seam
//!
//! These back the drivers on the host - for tests and for development
//! without a board. Behavior follows the documented semantics of the
//! vendor drivers closely enough that the contract test-suite runs
//! unchanged against real hardware: queues have depths, filters are
//! evaluated on delivery, bus-off and line errors can be injected, and
//! "blocking" waits degrade to immediate timeout when no event is
//! pending.
//!
//! Time is a manually advanced microsecond counter that also ticks by one
//! on every read, so timestamps stay strictly monotonic.

use core::cell::Cell;

use heapless::{Deque, FnvIndexMap, String, Vec};

use kinesis_hal::adc::{
    AdcAttenuation, AdcBitWidth, AdcContinuousCallback, AdcContinuousConfig, AdcIirCoefficient,
    AdcMonitorCallback, AdcMonitorConfig, AdcSample, AdcThresholdEvent,
};
use kinesis_hal::can::{CanAlerts, CanMessage, CanReceiveCallback};
use kinesis_hal::gpio::{Direction, InterruptCallback, InterruptTrigger};
use kinesis_hal::i2c::{I2cConfig, I2cPowerMode};
use kinesis_hal::pio::RawSymbol;
use kinesis_hal::spi::{SpiConfig, SpiMode};
use kinesis_hal::timer::TimerCallback;
use kinesis_hal::types::{ChannelId, FrequencyHz, HostId, PinNumber, TimeoutMs, TimestampUs};
use kinesis_hal::uart::{
    FlowControl, IrdaConfig, PatternConfig, Rs485Config, SoftwareFlowConfig, UartConfig, UartMode,
};

use super::{
    AdcCalCurve, AdcOps, GpioOps, I2cOps, LedcOps, NvsOps, NvsValueKind, PinSetup, PortClock,
    PortError, PortResult, RmtOps, SpiOps, TimerOps, TwaiNativeConfig, TwaiNativeState, TwaiOps,
    TwaiStatusInfo, UartLineErrors, UartOps, LEDC_CHANNELS, LEDC_TIMERS, RMT_SYMBOLS_PER_BLOCK,
};

/// Manually advanced microsecond clock.
#[derive(Debug, Default)]
pub struct SoftClock {
    now: Cell<TimestampUs>,
}

impl SoftClock {
    pub fn advance(&self, us: TimestampUs) {
        self.now.set(self.now.get() + us);
    }

    fn tick(&self) -> TimestampUs {
        let t = self.now.get() + 1;
        self.now.set(t);
        t
    }
}

// ---------------------------------------------------------------------------
// GPIO
// ---------------------------------------------------------------------------

const SOFT_GPIO_PINS: usize = 32;

#[derive(Debug, Clone, Copy)]
struct SoftPin {
    setup: PinSetup,
    /// Output latch.
    level: bool,
    /// Line level seen by the input path.
    input_level: bool,
    trigger: InterruptTrigger,
    callback: Option<InterruptCallback>,
    user: usize,
    irq_attached: bool,
    irq_enabled: bool,
    events: u32,
    /// Wait-semaphore count.
    pending: u32,
    glitch_window_ns: u32,
    glitch_enabled: bool,
    hold: bool,
    /// Readback override used to emulate configuration drift.
    drift: Option<PinSetup>,
}

impl SoftPin {
    fn new(setup: PinSetup) -> Self {
        Self {
            setup,
            level: false,
            input_level: false,
            trigger: InterruptTrigger::None,
            callback: None,
            user: 0,
            irq_attached: false,
            irq_enabled: false,
            events: 0,
            pending: 0,
            glitch_window_ns: 0,
            glitch_enabled: false,
            hold: false,
            drift: None,
        }
    }
}

/// Soft GPIO matrix.
#[derive(Default)]
pub struct SoftGpio {
    clock: SoftClock,
    pins: [Option<SoftPin>; SOFT_GPIO_PINS],
}

impl SoftGpio {
    pub fn new() -> Self {
        Self::default()
    }

    fn pin(&mut self, pin: PinNumber) -> PortResult<&mut SoftPin> {
        let idx = Self::index(pin)?;
        self.pins[idx].as_mut().ok_or(PortError::InvalidState)
    }

    fn index(pin: PinNumber) -> PortResult<usize> {
        if (0..SOFT_GPIO_PINS as PinNumber).contains(&pin) {
            Ok(pin as usize)
        } else {
            Err(PortError::InvalidArg)
        }
    }

    /// Drive the external line level, firing edge/level interrupts.
    pub fn set_input_level(&mut self, pin: PinNumber, high: bool) {
        let Ok(p) = self.pin(pin) else { return };
        let prev = p.input_level;
        p.input_level = high;
        let fire = match p.trigger {
            InterruptTrigger::None => false,
            InterruptTrigger::RisingEdge => !prev && high,
            InterruptTrigger::FallingEdge => prev && !high,
            InterruptTrigger::BothEdges => prev != high,
            InterruptTrigger::LowLevel => !high,
            InterruptTrigger::HighLevel => high,
        };
        if fire && p.irq_attached && p.irq_enabled {
            p.events = p.events.wrapping_add(1);
            // Semaphore first, then the user callback, as the ISR does.
            p.pending = p.pending.saturating_add(1);
            let cb = p.callback;
            let user = p.user;
            if let Some(cb) = cb {
                cb(pin, user);
            }
        }
    }

    /// Make hardware readback disagree with the cached configuration.
    pub fn inject_drift(&mut self, pin: PinNumber, drifted: PinSetup) {
        if let Ok(p) = self.pin(pin) {
            p.drift = Some(drifted);
        }
    }

    pub fn clock(&self) -> &SoftClock {
        &self.clock
    }
}

impl PortClock for SoftGpio {
    fn now_us(&self) -> TimestampUs {
        self.clock.tick()
    }
}

impl GpioOps for SoftGpio {
    fn configure(&mut self, pin: PinNumber, setup: PinSetup) -> PortResult<()> {
        let idx = Self::index(pin)?;
        match &mut self.pins[idx] {
            Some(p) => p.setup = setup,
            slot @ None => *slot = Some(SoftPin::new(setup)),
        }
        Ok(())
    }

    fn release(&mut self, pin: PinNumber) -> PortResult<()> {
        let idx = Self::index(pin)?;
        self.pins[idx] = None;
        Ok(())
    }

    fn set_level(&mut self, pin: PinNumber, high: bool) -> PortResult<()> {
        let p = self.pin(pin)?;
        if p.hold {
            // Held outputs latch their level until hold is released.
            return Ok(());
        }
        p.level = high;
        Ok(())
    }

    fn level(&mut self, pin: PinNumber) -> PortResult<bool> {
        let p = self.pin(pin)?;
        Ok(match p.setup.direction {
            Direction::Input => p.input_level,
            Direction::Output => p.level,
        })
    }

    fn read_back(&mut self, pin: PinNumber) -> PortResult<PinSetup> {
        let p = self.pin(pin)?;
        Ok(p.drift.unwrap_or(p.setup))
    }

    fn attach_interrupt(
        &mut self,
        pin: PinNumber,
        trigger: InterruptTrigger,
        callback: Option<InterruptCallback>,
        user: usize,
    ) -> PortResult<()> {
        let p = self.pin(pin)?;
        p.trigger = trigger;
        p.callback = callback;
        p.user = user;
        p.irq_attached = true;
        p.irq_enabled = false;
        Ok(())
    }

    fn detach_interrupt(&mut self, pin: PinNumber) -> PortResult<()> {
        let p = self.pin(pin)?;
        p.irq_attached = false;
        p.irq_enabled = false;
        p.callback = None;
        p.trigger = InterruptTrigger::None;
        Ok(())
    }

    fn enable_interrupt(&mut self, pin: PinNumber) -> PortResult<()> {
        let p = self.pin(pin)?;
        if !p.irq_attached {
            return Err(PortError::InvalidState);
        }
        p.irq_enabled = true;
        Ok(())
    }

    fn disable_interrupt(&mut self, pin: PinNumber) -> PortResult<()> {
        let p = self.pin(pin)?;
        p.irq_enabled = false;
        Ok(())
    }

    fn wait_for_event(&mut self, pin: PinNumber, _timeout: TimeoutMs) -> PortResult<()> {
        let p = self.pin(pin)?;
        if p.pending > 0 {
            p.pending -= 1;
            Ok(())
        } else {
            Err(PortError::Timeout)
        }
    }

    fn event_count(&self, pin: PinNumber) -> u32 {
        Self::index(pin)
            .ok()
            .and_then(|idx| self.pins[idx].as_ref())
            .map(|p| p.events)
            .unwrap_or(0)
    }

    fn clear_event_count(&mut self, pin: PinNumber) {
        if let Ok(p) = self.pin(pin) {
            p.events = 0;
        }
    }

    fn configure_glitch_filter(&mut self, pin: PinNumber, window_ns: u32) -> PortResult<()> {
        let p = self.pin(pin)?;
        p.glitch_window_ns = window_ns;
        Ok(())
    }

    fn set_glitch_filter_enabled(&mut self, pin: PinNumber, enable: bool) -> PortResult<()> {
        let p = self.pin(pin)?;
        if enable && p.glitch_window_ns == 0 {
            return Err(PortError::InvalidState);
        }
        p.glitch_enabled = enable;
        Ok(())
    }

    fn configure_sleep(&mut self, pin: PinNumber, _setup: PinSetup, hold: bool) -> PortResult<()> {
        let p = self.pin(pin)?;
        p.hold = hold && p.hold;
        Ok(())
    }

    fn set_hold(&mut self, pin: PinNumber, enable: bool) -> PortResult<()> {
        let p = self.pin(pin)?;
        p.hold = enable;
        Ok(())
    }

    fn configure_wakeup(
        &mut self,
        pin: PinNumber,
        trigger: InterruptTrigger,
        enable: bool,
    ) -> PortResult<()> {
        // Only level triggers can wake the SoC from light sleep.
        if enable
            && !matches!(
                trigger,
                InterruptTrigger::LowLevel | InterruptTrigger::HighLevel
            )
        {
            return Err(PortError::NotSupported);
        }
        let _ = self.pin(pin)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// TWAI
// ---------------------------------------------------------------------------

const TWAI_QUEUE_DEPTH: usize = 32;

/// Soft TWAI controller with internal loopback.
pub struct SoftTwai {
    clock: SoftClock,
    installed: bool,
    started: bool,
    config: Option<TwaiNativeConfig>,
    state: TwaiNativeState,
    rx_queue: Deque<CanMessage, TWAI_QUEUE_DEPTH>,
    alerts_pending: u32,
    alert_mask: u32,
    receive_callback: Option<(CanReceiveCallback, usize)>,
    sequence: u32,
    tx_error_counter: u32,
    rx_error_counter: u32,
    tx_failed_count: u32,
    rx_missed_count: u32,
    bus_error_count: u32,
    arb_lost_count: u32,
    /// Recovery attempts that will time out before one succeeds.
    failing_recoveries: u32,
    recovery_armed: bool,
    sleep_retention: bool,
}

impl Default for SoftTwai {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftTwai {
    pub fn new() -> Self {
        Self {
            clock: SoftClock::default(),
            installed: false,
            started: false,
            config: None,
            state: TwaiNativeState::Stopped,
            rx_queue: Deque::new(),
            alerts_pending: 0,
            alert_mask: 0,
            receive_callback: None,
            sequence: 0,
            tx_error_counter: 0,
            rx_error_counter: 0,
            tx_failed_count: 0,
            rx_missed_count: 0,
            bus_error_count: 0,
            arb_lost_count: 0,
            failing_recoveries: 0,
            recovery_armed: false,
            sleep_retention: false,
        }
    }

    /// Force the controller into bus-off, as 256 TX errors would.
    pub fn inject_bus_off(&mut self) {
        self.state = TwaiNativeState::BusOff;
        self.started = false;
        self.tx_error_counter = 256;
        self.bus_error_count += 1;
        self.raise(CanAlerts::BUS_OFF.bits());
    }

    /// Deliver a frame as if it arrived from the wire.
    pub fn inject_frame(&mut self, message: CanMessage) {
        self.deliver(message);
    }

    /// The next `n` recovery attempts will hang past the driver timeout.
    pub fn fail_next_recoveries(&mut self, n: u32) {
        self.failing_recoveries = n;
    }

    pub fn clock(&self) -> &SoftClock {
        &self.clock
    }

    fn raise(&mut self, bits: u32) {
        self.alerts_pending |= bits & self.alert_mask;
    }

    fn filter_passes(&self, message: &CanMessage) -> bool {
        let Some(cfg) = &self.config else {
            return false;
        };
        message.extended == cfg.filter_extended
            && (message.id & cfg.filter_mask) == (cfg.filter_id & cfg.filter_mask)
    }

    fn deliver(&mut self, mut message: CanMessage) {
        if !self.filter_passes(&message) {
            return;
        }
        message.timestamp_us = self.clock.tick();
        self.sequence = self.sequence.wrapping_add(1);
        message.sequence = self.sequence;
        if self.rx_queue.push_back(message).is_err() {
            self.rx_missed_count += 1;
            self.raise(CanAlerts::RX_QUEUE_FULL.bits());
            return;
        }
        self.raise(CanAlerts::RX_DATA.bits());
        if let Some((cb, user)) = self.receive_callback {
            cb(&message, user);
        }
    }
}

impl PortClock for SoftTwai {
    fn now_us(&self) -> TimestampUs {
        self.clock.tick()
    }
}

impl TwaiOps for SoftTwai {
    fn install(&mut self, config: &TwaiNativeConfig) -> PortResult<()> {
        if self.installed {
            return Err(PortError::InvalidState);
        }
        self.installed = true;
        self.config = Some(*config);
        self.state = TwaiNativeState::Stopped;
        Ok(())
    }

    fn uninstall(&mut self) -> PortResult<()> {
        if !self.installed {
            return Err(PortError::InvalidState);
        }
        if self.started {
            return Err(PortError::InvalidState);
        }
        self.installed = false;
        self.config = None;
        self.rx_queue.clear();
        self.alerts_pending = 0;
        Ok(())
    }

    fn start(&mut self) -> PortResult<()> {
        if !self.installed || self.started {
            return Err(PortError::InvalidState);
        }
        if self.state == TwaiNativeState::BusOff {
            return Err(PortError::InvalidState);
        }
        self.started = true;
        self.state = TwaiNativeState::Running;
        Ok(())
    }

    fn stop(&mut self) -> PortResult<()> {
        if !self.started {
            return Err(PortError::InvalidState);
        }
        self.started = false;
        self.state = TwaiNativeState::Stopped;
        Ok(())
    }

    fn transmit(&mut self, message: &CanMessage, _timeout: TimeoutMs) -> PortResult<()> {
        if !self.installed {
            return Err(PortError::InvalidState);
        }
        match self.state {
            TwaiNativeState::Running => {}
            TwaiNativeState::BusOff | TwaiNativeState::Recovering => {
                return Err(PortError::InvalidState)
            }
            TwaiNativeState::Stopped => return Err(PortError::InvalidState),
        }
        let loopback = self
            .config
            .map(|c| c.loopback || message.self_reception)
            .unwrap_or(false);
        self.raise(CanAlerts::TX_SUCCESS.bits());
        if loopback {
            self.deliver(*message);
        }
        self.raise(CanAlerts::TX_IDLE.bits());
        Ok(())
    }

    fn receive(&mut self, _timeout: TimeoutMs) -> PortResult<CanMessage> {
        if !self.installed {
            return Err(PortError::InvalidState);
        }
        self.rx_queue.pop_front().ok_or(PortError::Timeout)
    }

    fn configure_alerts(&mut self, mask: u32) -> PortResult<()> {
        if !self.installed {
            return Err(PortError::InvalidState);
        }
        self.alert_mask = mask;
        self.alerts_pending &= mask;
        Ok(())
    }

    fn read_alerts(&mut self, _timeout: TimeoutMs) -> PortResult<u32> {
        if !self.installed {
            return Err(PortError::InvalidState);
        }
        if self.recovery_armed {
            // Recovery completes while the caller waits on the alert set,
            // unless a failure injection keeps it pending.
            if self.failing_recoveries > 0 {
                self.failing_recoveries -= 1;
            } else {
                self.recovery_armed = false;
                self.state = TwaiNativeState::Stopped;
                self.tx_error_counter = 0;
                self.rx_error_counter = 0;
                self.raise(CanAlerts::BUS_RECOVERED.bits());
            }
        }
        if self.alerts_pending == 0 {
            return Err(PortError::Timeout);
        }
        let alerts = self.alerts_pending;
        self.alerts_pending = 0;
        Ok(alerts)
    }

    fn initiate_recovery(&mut self) -> PortResult<()> {
        match self.state {
            TwaiNativeState::BusOff | TwaiNativeState::Recovering => {
                self.state = TwaiNativeState::Recovering;
                self.recovery_armed = true;
                Ok(())
            }
            _ => Err(PortError::InvalidState),
        }
    }

    fn status(&mut self) -> PortResult<TwaiStatusInfo> {
        if !self.installed {
            return Err(PortError::InvalidState);
        }
        Ok(TwaiStatusInfo {
            state: self.state,
            tx_error_counter: self.tx_error_counter,
            rx_error_counter: self.rx_error_counter,
            msgs_to_tx: 0,
            msgs_to_rx: self.rx_queue.len() as u32,
            tx_failed_count: self.tx_failed_count,
            rx_missed_count: self.rx_missed_count,
            bus_error_count: self.bus_error_count,
            arb_lost_count: self.arb_lost_count,
        })
    }

    fn clear_transmit_queue(&mut self) -> PortResult<()> {
        Ok(())
    }

    fn clear_receive_queue(&mut self) -> PortResult<()> {
        self.rx_queue.clear();
        Ok(())
    }

    fn set_receive_callback(&mut self, callback: Option<(CanReceiveCallback, usize)>) {
        self.receive_callback = callback;
    }

    fn configure_sleep_retention(&mut self, enable: bool) -> PortResult<()> {
        self.sleep_retention = enable;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ADC
// ---------------------------------------------------------------------------

const SOFT_ADC_CHANNELS: usize = 8;

struct SoftMonitor {
    config: AdcMonitorConfig,
    callback: AdcMonitorCallback,
    user: usize,
    /// Last side of the window, for hysteresis.
    above: Option<bool>,
}

/// Soft ADC unit.
pub struct SoftAdc {
    clock: SoftClock,
    ready: bool,
    unit: HostId,
    channels: [Option<(AdcAttenuation, AdcBitWidth)>; SOFT_ADC_CHANNELS],
    raw_values: [u16; SOFT_ADC_CHANNELS],
    monitors: [Option<SoftMonitor>; SOFT_ADC_CHANNELS],
    continuous: Option<(AdcContinuousConfig, Vec<ChannelId, 8>)>,
    continuous_callback: Option<(AdcContinuousCallback, usize)>,
    continuous_running: bool,
    /// eFuse calibration present.
    pub calibration_available: bool,
    oversampling_ratio: u16,
}

impl Default for SoftAdc {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftAdc {
    pub fn new() -> Self {
        Self {
            clock: SoftClock::default(),
            ready: false,
            unit: 0,
            channels: Default::default(),
            raw_values: [0; SOFT_ADC_CHANNELS],
            monitors: Default::default(),
            continuous: None,
            continuous_callback: None,
            continuous_running: false,
            calibration_available: true,
            oversampling_ratio: 1,
        }
    }

    /// Set the raw code the channel converts to.
    pub fn set_channel_raw(&mut self, channel: ChannelId, raw: u16) {
        if (channel as usize) < SOFT_ADC_CHANNELS {
            self.raw_values[channel as usize] = raw;
        }
    }

    /// Drive `frames` DMA frames through the continuous callback.
    /// Returns the number of frames actually delivered.
    pub fn emit_frames(&mut self, frames: usize) -> usize {
        if !self.continuous_running {
            return 0;
        }
        let Some((config, channels)) = self.continuous.clone() else {
            return 0;
        };
        let Some((cb, user)) = self.continuous_callback else {
            return 0;
        };
        let mut delivered = 0;
        for _ in 0..frames {
            let mut samples: Vec<AdcSample, 256> = Vec::new();
            for i in 0..config.samples_per_frame as usize {
                let channel = channels[i % channels.len()];
                let raw = self.raw_values[channel as usize % SOFT_ADC_CHANNELS];
                if samples.push(AdcSample { channel, raw }).is_err() {
                    break;
                }
            }
            cb(&samples, user);
            delivered += 1;
        }
        delivered
    }

    fn full_scale_mv(attenuation: AdcAttenuation) -> u32 {
        match attenuation {
            AdcAttenuation::Db0 => 950,
            AdcAttenuation::Db2_5 => 1250,
            AdcAttenuation::Db6 => 1750,
            AdcAttenuation::Db12 => 3300,
        }
    }

    fn check_monitor(&mut self, channel: ChannelId, raw: u16) {
        let idx = channel as usize;
        if idx >= SOFT_ADC_CHANNELS {
            return;
        }
        if let Some(mon) = &mut self.monitors[idx] {
            let above = if raw > mon.config.high_threshold {
                Some(true)
            } else if raw < mon.config.low_threshold {
                Some(false)
            } else {
                None
            };
            if let Some(above) = above {
                if mon.above != Some(above) {
                    mon.above = Some(above);
                    let event = if above {
                        AdcThresholdEvent::AboveHigh
                    } else {
                        AdcThresholdEvent::BelowLow
                    };
                    (mon.callback)(channel, event, mon.user);
                }
            }
        }
    }
}

impl PortClock for SoftAdc {
    fn now_us(&self) -> TimestampUs {
        self.clock.tick()
    }
}

impl AdcOps for SoftAdc {
    fn setup_oneshot(&mut self, unit: HostId) -> PortResult<()> {
        if self.ready {
            return Err(PortError::InvalidState);
        }
        self.ready = true;
        self.unit = unit;
        Ok(())
    }

    fn teardown(&mut self) -> PortResult<()> {
        if !self.ready {
            return Err(PortError::InvalidState);
        }
        self.ready = false;
        self.continuous_running = false;
        Ok(())
    }

    fn configure_channel(
        &mut self,
        channel: ChannelId,
        attenuation: AdcAttenuation,
        width: AdcBitWidth,
    ) -> PortResult<()> {
        let idx = channel as usize;
        if idx >= SOFT_ADC_CHANNELS {
            return Err(PortError::InvalidArg);
        }
        self.channels[idx] = Some((attenuation, width));
        Ok(())
    }

    fn read_oneshot(&mut self, channel: ChannelId) -> PortResult<u16> {
        let idx = channel as usize;
        if idx >= SOFT_ADC_CHANNELS {
            return Err(PortError::InvalidArg);
        }
        if self.continuous_running {
            return Err(PortError::InvalidState);
        }
        let (_, width) = self.channels[idx].ok_or(PortError::InvalidState)?;
        let raw = self.raw_values[idx].min(width.max_raw());
        self.check_monitor(channel, raw);
        Ok(raw)
    }

    fn delay_ms(&mut self, ms: u32) {
        self.clock.advance(ms as u64 * 1000);
    }

    fn calibration_fit(&mut self, attenuation: AdcAttenuation) -> PortResult<AdcCalCurve> {
        if !self.calibration_available {
            return Err(PortError::NotSupported);
        }
        let full_scale = Self::full_scale_mv(attenuation);
        Ok(AdcCalCurve {
            coeff_a: (full_scale as i64 * 4096 / 4095) as i32,
            coeff_b: 0,
        })
    }

    fn start_continuous(
        &mut self,
        config: &AdcContinuousConfig,
        channels: &[ChannelId],
        callback: Option<(AdcContinuousCallback, usize)>,
    ) -> PortResult<()> {
        if self.continuous_running {
            return Err(PortError::InvalidState);
        }
        if channels.is_empty() {
            return Err(PortError::InvalidArg);
        }
        let mut list = Vec::new();
        for &ch in channels {
            list.push(ch).map_err(|_| PortError::NoMem)?;
        }
        self.continuous = Some((*config, list));
        self.continuous_callback = callback;
        self.continuous_running = true;
        Ok(())
    }

    fn stop_continuous(&mut self) -> PortResult<()> {
        if !self.continuous_running {
            return Err(PortError::InvalidState);
        }
        self.continuous_running = false;
        Ok(())
    }

    fn configure_iir(
        &mut self,
        channel: ChannelId,
        _coefficient: AdcIirCoefficient,
    ) -> PortResult<()> {
        if channel as usize >= SOFT_ADC_CHANNELS {
            return Err(PortError::InvalidArg);
        }
        Ok(())
    }

    fn configure_monitor(
        &mut self,
        config: &AdcMonitorConfig,
        callback: AdcMonitorCallback,
        user: usize,
    ) -> PortResult<()> {
        let idx = config.channel as usize;
        if idx >= SOFT_ADC_CHANNELS {
            return Err(PortError::InvalidArg);
        }
        self.monitors[idx] = Some(SoftMonitor {
            config: *config,
            callback,
            user,
            above: None,
        });
        Ok(())
    }

    fn disable_monitor(&mut self, channel: ChannelId) -> PortResult<()> {
        let idx = channel as usize;
        if idx >= SOFT_ADC_CHANNELS {
            return Err(PortError::InvalidArg);
        }
        self.monitors[idx] = None;
        Ok(())
    }

    fn configure_oversampling(&mut self, ratio: u16) -> PortResult<()> {
        if !ratio.is_power_of_two() || ratio > 256 {
            return Err(PortError::InvalidArg);
        }
        self.oversampling_ratio = ratio;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// UART
// ---------------------------------------------------------------------------

const UART_RING: usize = 1024;

/// Soft UART with loopback and RX injection.
pub struct SoftUart {
    clock: SoftClock,
    installed: bool,
    rx: Deque<u8, UART_RING>,
    /// Everything written, for assertions.
    pub tx_capture: Vec<u8, UART_RING>,
    loopback: bool,
    line_errors: UartLineErrors,
    pattern: Option<PatternConfig>,
    pattern_positions: Deque<usize, 8>,
    rx_stream_pos: usize,
    baud: u32,
    mode: UartMode,
    rts: bool,
    cts_level: bool,
}

impl Default for SoftUart {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftUart {
    pub fn new() -> Self {
        Self {
            clock: SoftClock::default(),
            installed: false,
            rx: Deque::new(),
            tx_capture: Vec::new(),
            loopback: false,
            line_errors: UartLineErrors::default(),
            pattern: None,
            pattern_positions: Deque::new(),
            rx_stream_pos: 0,
            baud: 115_200,
            mode: UartMode::Standard,
            rts: false,
            cts_level: true,
        }
    }

    /// Push bytes into the RX path, as the wire would.
    pub fn feed_rx(&mut self, data: &[u8]) {
        for &byte in data {
            if self.rx.push_back(byte).is_err() {
                self.line_errors.overrun += 1;
                return;
            }
            self.scan_pattern(byte);
            self.rx_stream_pos += 1;
        }
    }

    /// Inject sticky line errors.
    pub fn inject_line_errors(&mut self, errors: UartLineErrors) {
        self.line_errors.frame += errors.frame;
        self.line_errors.parity += errors.parity;
        self.line_errors.overrun += errors.overrun;
        self.line_errors.noise += errors.noise;
        self.line_errors.break_detected |= errors.break_detected;
        self.line_errors.collision |= errors.collision;
    }

    pub fn set_cts_level(&mut self, high: bool) {
        self.cts_level = high;
    }

    fn scan_pattern(&mut self, byte: u8) {
        let Some(pattern) = self.pattern else { return };
        if byte != pattern.pattern_char {
            return;
        }
        let needed = pattern.count as usize;
        if needed == 0 {
            return;
        }
        // The pushed byte is already in the ring; detect the run exactly
        // once, when it reaches the configured length.
        if self.run_length_at_tail(pattern.pattern_char) == needed {
            let pos = self.rx_stream_pos + 1 - needed;
            let _ = self.pattern_positions.push_back(pos);
        }
    }

    fn run_length_at_tail(&self, ch: u8) -> usize {
        self.rx.iter().rev().take_while(|&&b| b == ch).count()
    }
}

impl PortClock for SoftUart {
    fn now_us(&self) -> TimestampUs {
        self.clock.tick()
    }
}

impl UartOps for SoftUart {
    fn install(&mut self, _config: &UartConfig) -> PortResult<()> {
        if self.installed {
            return Err(PortError::InvalidState);
        }
        self.installed = true;
        Ok(())
    }

    fn uninstall(&mut self) -> PortResult<()> {
        if !self.installed {
            return Err(PortError::InvalidState);
        }
        self.installed = false;
        self.rx.clear();
        Ok(())
    }

    fn write(&mut self, data: &[u8], _timeout: TimeoutMs) -> PortResult<usize> {
        if !self.installed {
            return Err(PortError::InvalidState);
        }
        let _ = self.tx_capture.extend_from_slice(data);
        if self.loopback {
            self.feed_rx(data);
        }
        Ok(data.len())
    }

    fn read(&mut self, buf: &mut [u8], _timeout: TimeoutMs) -> PortResult<usize> {
        if !self.installed {
            return Err(PortError::InvalidState);
        }
        let mut n = 0;
        while n < buf.len() {
            match self.rx.pop_front() {
                Some(byte) => {
                    buf[n] = byte;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }

    fn rx_available(&mut self) -> PortResult<usize> {
        Ok(self.rx.len())
    }

    fn flush_tx(&mut self, _timeout: TimeoutMs) -> PortResult<()> {
        Ok(())
    }

    fn flush_rx(&mut self) -> PortResult<()> {
        self.rx.clear();
        self.pattern_positions.clear();
        Ok(())
    }

    fn wait_tx_done(&mut self, _timeout: TimeoutMs) -> PortResult<()> {
        Ok(())
    }

    fn set_baud(&mut self, baud: u32) -> PortResult<()> {
        if baud == 0 {
            return Err(PortError::InvalidArg);
        }
        self.baud = baud;
        Ok(())
    }

    fn set_flow_control(&mut self, _flow: FlowControl) -> PortResult<()> {
        Ok(())
    }

    fn set_rts(&mut self, active: bool) -> PortResult<()> {
        self.rts = active;
        Ok(())
    }

    fn cts(&mut self) -> PortResult<bool> {
        Ok(self.cts_level)
    }

    fn send_break(&mut self, _duration_ms: u32) -> PortResult<()> {
        if self.loopback {
            self.line_errors.break_detected = true;
        }
        Ok(())
    }

    fn take_line_errors(&mut self) -> UartLineErrors {
        core::mem::take(&mut self.line_errors)
    }

    fn set_mode(&mut self, mode: UartMode) -> PortResult<()> {
        self.mode = mode;
        Ok(())
    }

    fn configure_rs485(&mut self, _config: &Rs485Config) -> PortResult<()> {
        if !matches!(
            self.mode,
            UartMode::Rs485HalfDuplex | UartMode::Rs485CollisionDetect | UartMode::Rs485AppControl
        ) {
            return Err(PortError::InvalidState);
        }
        Ok(())
    }

    fn configure_irda(&mut self, _config: &IrdaConfig) -> PortResult<()> {
        if self.mode != UartMode::IrDA {
            return Err(PortError::InvalidState);
        }
        Ok(())
    }

    fn enable_pattern_detect(&mut self, config: &PatternConfig) -> PortResult<()> {
        self.pattern = Some(*config);
        self.pattern_positions.clear();
        Ok(())
    }

    fn disable_pattern_detect(&mut self) -> PortResult<()> {
        self.pattern = None;
        self.pattern_positions.clear();
        Ok(())
    }

    fn pattern_position(&mut self, pop: bool) -> PortResult<Option<usize>> {
        if pop {
            Ok(self.pattern_positions.pop_front())
        } else {
            Ok(self.pattern_positions.front().copied())
        }
    }

    fn configure_software_flow(&mut self, _config: &SoftwareFlowConfig) -> PortResult<()> {
        Ok(())
    }

    fn configure_wakeup(&mut self, rx_threshold: u16) -> PortResult<()> {
        if rx_threshold == 0 {
            return Err(PortError::InvalidArg);
        }
        Ok(())
    }

    fn set_interrupt_thresholds(&mut self, _rx: u8, _tx: u8, _timeout: u8) -> PortResult<()> {
        Ok(())
    }

    fn set_signal_inversion(&mut self, _tx: bool, _rx: bool) -> PortResult<()> {
        Ok(())
    }

    fn set_loopback(&mut self, enable: bool) -> PortResult<()> {
        self.loopback = enable;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// I2C
// ---------------------------------------------------------------------------

const I2C_REG_FILE: usize = 64;

#[derive(Clone)]
struct SimDevice {
    ten_bit: bool,
    regs: [u8; I2C_REG_FILE],
    reg_ptr: usize,
    /// Next transaction hits the clock-stretch limit.
    stretch_next: bool,
}

/// Soft I2C bus with simulated register-file devices.
pub struct SoftI2c {
    clock: SoftClock,
    installed: bool,
    suspended: bool,
    devices: FnvIndexMap<u16, SimDevice, 8>,
    power_mode: I2cPowerMode,
}

impl Default for SoftI2c {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftI2c {
    pub fn new() -> Self {
        Self {
            clock: SoftClock::default(),
            installed: false,
            suspended: false,
            devices: FnvIndexMap::new(),
            power_mode: I2cPowerMode::Full,
        }
    }

    /// Attach a simulated device.
    pub fn add_sim_device(&mut self, address: u16, ten_bit: bool) {
        let _ = self.devices.insert(
            address,
            SimDevice {
                ten_bit,
                regs: [0; I2C_REG_FILE],
                reg_ptr: 0,
                stretch_next: false,
            },
        );
    }

    /// Preload a register on a simulated device.
    pub fn set_sim_register(&mut self, address: u16, register: u8, value: u8) {
        if let Some(dev) = self.devices.get_mut(&address) {
            dev.regs[register as usize % I2C_REG_FILE] = value;
        }
    }

    pub fn sim_register(&self, address: u16, register: u8) -> Option<u8> {
        self.devices
            .get(&address)
            .map(|d| d.regs[register as usize % I2C_REG_FILE])
    }

    /// The device's next transaction exceeds the clock-stretch limit.
    pub fn inject_clock_stretch(&mut self, address: u16) {
        if let Some(dev) = self.devices.get_mut(&address) {
            dev.stretch_next = true;
        }
    }
}

impl PortClock for SoftI2c {
    fn now_us(&self) -> TimestampUs {
        self.clock.tick()
    }
}

impl I2cOps for SoftI2c {
    fn install(&mut self, _config: &I2cConfig) -> PortResult<()> {
        if self.installed {
            return Err(PortError::InvalidState);
        }
        self.installed = true;
        Ok(())
    }

    fn uninstall(&mut self) -> PortResult<()> {
        if !self.installed {
            return Err(PortError::InvalidState);
        }
        self.installed = false;
        Ok(())
    }

    fn write(
        &mut self,
        address: u16,
        ten_bit: bool,
        data: &[u8],
        _stop: bool,
        _timeout: TimeoutMs,
    ) -> PortResult<()> {
        if !self.installed || self.suspended {
            return Err(PortError::InvalidState);
        }
        let dev = self.devices.get_mut(&address).ok_or(PortError::NotFound)?;
        if dev.ten_bit != ten_bit {
            return Err(PortError::NotFound);
        }
        if dev.stretch_next {
            dev.stretch_next = false;
            return Err(PortError::Timeout);
        }
        if let Some((&first, rest)) = data.split_first() {
            dev.reg_ptr = first as usize % I2C_REG_FILE;
            for &byte in rest {
                dev.regs[dev.reg_ptr] = byte;
                dev.reg_ptr = (dev.reg_ptr + 1) % I2C_REG_FILE;
            }
        }
        Ok(())
    }

    fn read(
        &mut self,
        address: u16,
        ten_bit: bool,
        buf: &mut [u8],
        _stop: bool,
        _timeout: TimeoutMs,
    ) -> PortResult<()> {
        if !self.installed || self.suspended {
            return Err(PortError::InvalidState);
        }
        let dev = self.devices.get_mut(&address).ok_or(PortError::NotFound)?;
        if dev.ten_bit != ten_bit {
            return Err(PortError::NotFound);
        }
        if dev.stretch_next {
            dev.stretch_next = false;
            return Err(PortError::Timeout);
        }
        for slot in buf.iter_mut() {
            *slot = dev.regs[dev.reg_ptr];
            dev.reg_ptr = (dev.reg_ptr + 1) % I2C_REG_FILE;
        }
        Ok(())
    }

    fn probe(&mut self, address: u16, _timeout: TimeoutMs) -> PortResult<bool> {
        if !self.installed || self.suspended {
            return Err(PortError::InvalidState);
        }
        Ok(self.devices.contains_key(&address))
    }

    fn delay_us(&mut self, us: u32) {
        self.clock.advance(us as u64);
    }

    fn suspend(&mut self) -> PortResult<()> {
        if !self.installed {
            return Err(PortError::InvalidState);
        }
        self.suspended = true;
        Ok(())
    }

    fn resume(&mut self) -> PortResult<()> {
        if !self.installed {
            return Err(PortError::InvalidState);
        }
        self.suspended = false;
        Ok(())
    }

    fn set_power_mode(&mut self, mode: I2cPowerMode) -> PortResult<()> {
        self.power_mode = mode;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SPI
// ---------------------------------------------------------------------------

/// Soft SPI host; echoes TX unless a response is programmed.
pub struct SoftSpi {
    clock: SoftClock,
    installed: bool,
    cs_asserted: bool,
    response: Vec<u8, 64>,
    response_pos: usize,
    /// Everything clocked out, for assertions.
    pub tx_capture: Vec<u8, 256>,
}

impl Default for SoftSpi {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftSpi {
    pub fn new() -> Self {
        Self {
            clock: SoftClock::default(),
            installed: false,
            cs_asserted: false,
            response: Vec::new(),
            response_pos: 0,
            tx_capture: Vec::new(),
        }
    }

    /// Program the bytes the "device" answers with.
    pub fn set_response(&mut self, data: &[u8]) {
        self.response.clear();
        let _ = self.response.extend_from_slice(data);
        self.response_pos = 0;
    }

    fn next_response_byte(&mut self, tx: u8) -> u8 {
        if self.response.is_empty() {
            // Loopback
            tx
        } else {
            let byte = self.response[self.response_pos % self.response.len()];
            self.response_pos += 1;
            byte
        }
    }
}

impl PortClock for SoftSpi {
    fn now_us(&self) -> TimestampUs {
        self.clock.tick()
    }
}

impl SpiOps for SoftSpi {
    fn install(&mut self, _config: &SpiConfig) -> PortResult<()> {
        if self.installed {
            return Err(PortError::InvalidState);
        }
        self.installed = true;
        Ok(())
    }

    fn uninstall(&mut self) -> PortResult<()> {
        if !self.installed {
            return Err(PortError::InvalidState);
        }
        self.installed = false;
        Ok(())
    }

    fn transfer(&mut self, tx: &[u8], rx: &mut [u8], _timeout: TimeoutMs) -> PortResult<()> {
        if !self.installed {
            return Err(PortError::InvalidState);
        }
        let _ = self.tx_capture.extend_from_slice(tx);
        for (i, slot) in rx.iter_mut().enumerate() {
            *slot = self.next_response_byte(tx[i]);
        }
        Ok(())
    }

    fn write(&mut self, tx: &[u8], _timeout: TimeoutMs) -> PortResult<()> {
        if !self.installed {
            return Err(PortError::InvalidState);
        }
        let _ = self.tx_capture.extend_from_slice(tx);
        Ok(())
    }

    fn read(&mut self, rx: &mut [u8], _timeout: TimeoutMs) -> PortResult<()> {
        if !self.installed {
            return Err(PortError::InvalidState);
        }
        for slot in rx.iter_mut() {
            *slot = self.next_response_byte(0xFF);
        }
        Ok(())
    }

    fn set_cs(&mut self, asserted: bool) -> PortResult<()> {
        if !self.installed {
            return Err(PortError::InvalidState);
        }
        self.cs_asserted = asserted;
        Ok(())
    }

    fn delay_us(&mut self, us: u32) {
        self.clock.advance(us as u64);
    }

    fn set_clock(&mut self, speed_hz: FrequencyHz) -> PortResult<()> {
        if speed_hz == 0 {
            return Err(PortError::InvalidArg);
        }
        Ok(())
    }

    fn set_mode(&mut self, _mode: SpiMode) -> PortResult<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// LEDC
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct SoftLedcTimer {
    frequency_hz: FrequencyHz,
    resolution_bits: u8,
    paused: bool,
}

#[derive(Debug, Clone, Copy)]
struct SoftLedcChannel {
    pin: PinNumber,
    timer: u8,
    duty_latched: u32,
    phase_latched: u32,
    duty_active: u32,
    invert: bool,
}

/// Soft LEDC block. Fades complete instantly.
pub struct SoftLedc {
    clock: SoftClock,
    timers: [Option<SoftLedcTimer>; LEDC_TIMERS],
    channels: [Option<SoftLedcChannel>; LEDC_CHANNELS],
}

impl Default for SoftLedc {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftLedc {
    pub fn new() -> Self {
        Self {
            clock: SoftClock::default(),
            timers: [None; LEDC_TIMERS],
            channels: [None; LEDC_CHANNELS],
        }
    }

    fn channel(&mut self, channel: u8) -> PortResult<&mut SoftLedcChannel> {
        self.channels
            .get_mut(channel as usize)
            .ok_or(PortError::InvalidArg)?
            .as_mut()
            .ok_or(PortError::InvalidState)
    }
}

impl PortClock for SoftLedc {
    fn now_us(&self) -> TimestampUs {
        self.clock.tick()
    }
}

impl LedcOps for SoftLedc {
    fn configure_timer(
        &mut self,
        timer: u8,
        frequency_hz: FrequencyHz,
        resolution_bits: u8,
    ) -> PortResult<()> {
        let slot = self
            .timers
            .get_mut(timer as usize)
            .ok_or(PortError::InvalidArg)?;
        *slot = Some(SoftLedcTimer {
            frequency_hz,
            resolution_bits,
            paused: false,
        });
        Ok(())
    }

    fn release_timer(&mut self, timer: u8) -> PortResult<()> {
        let slot = self
            .timers
            .get_mut(timer as usize)
            .ok_or(PortError::InvalidArg)?;
        *slot = None;
        Ok(())
    }

    fn pause_timer(&mut self, timer: u8) -> PortResult<()> {
        let t = self
            .timers
            .get_mut(timer as usize)
            .ok_or(PortError::InvalidArg)?
            .as_mut()
            .ok_or(PortError::InvalidState)?;
        t.paused = true;
        Ok(())
    }

    fn resume_timer(&mut self, timer: u8) -> PortResult<()> {
        let t = self
            .timers
            .get_mut(timer as usize)
            .ok_or(PortError::InvalidArg)?
            .as_mut()
            .ok_or(PortError::InvalidState)?;
        t.paused = false;
        Ok(())
    }

    fn configure_channel(
        &mut self,
        channel: u8,
        pin: PinNumber,
        timer: u8,
        raw_duty: u32,
        invert: bool,
        _idle_level: bool,
    ) -> PortResult<()> {
        if self
            .timers
            .get(timer as usize)
            .ok_or(PortError::InvalidArg)?
            .is_none()
        {
            return Err(PortError::InvalidState);
        }
        let slot = self
            .channels
            .get_mut(channel as usize)
            .ok_or(PortError::InvalidArg)?;
        *slot = Some(SoftLedcChannel {
            pin,
            timer,
            duty_latched: raw_duty,
            phase_latched: 0,
            duty_active: raw_duty,
            invert,
        });
        Ok(())
    }

    fn release_channel(&mut self, channel: u8, _idle_level: bool) -> PortResult<()> {
        let slot = self
            .channels
            .get_mut(channel as usize)
            .ok_or(PortError::InvalidArg)?;
        *slot = None;
        Ok(())
    }

    fn set_duty(&mut self, channel: u8, raw_duty: u32, phase_raw: u32) -> PortResult<()> {
        let ch = self.channel(channel)?;
        ch.duty_latched = raw_duty;
        ch.phase_latched = phase_raw;
        Ok(())
    }

    fn update_duty(&mut self, channel: u8) -> PortResult<()> {
        let ch = self.channel(channel)?;
        ch.duty_active = ch.duty_latched;
        Ok(())
    }

    fn set_frequency(&mut self, timer: u8, frequency_hz: FrequencyHz) -> PortResult<()> {
        let t = self
            .timers
            .get_mut(timer as usize)
            .ok_or(PortError::InvalidArg)?
            .as_mut()
            .ok_or(PortError::InvalidState)?;
        t.frequency_hz = frequency_hz;
        Ok(())
    }

    fn current_duty(&self, channel: u8) -> PortResult<u32> {
        self.channels
            .get(channel as usize)
            .ok_or(PortError::InvalidArg)?
            .as_ref()
            .map(|c| c.duty_active)
            .ok_or(PortError::InvalidState)
    }

    fn start_fade(&mut self, channel: u8, target_raw: u32, _duration_ms: u32) -> PortResult<()> {
        let ch = self.channel(channel)?;
        // The soft fade reaches its target immediately.
        ch.duty_latched = target_raw;
        ch.duty_active = target_raw;
        Ok(())
    }

    fn stop_fade(&mut self, _channel: u8) -> PortResult<()> {
        Ok(())
    }

    fn is_fade_running(&self, _channel: u8) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// RMT
// ---------------------------------------------------------------------------

pub const RMT_CHANNELS: usize = 4;

struct SoftRmtChannel {
    is_tx: bool,
    memory_symbols: usize,
    loopback: bool,
    capturing: bool,
    capture: Vec<RawSymbol, 256>,
    captured_overflow: bool,
    carrier_hz: FrequencyHz,
    carrier_duty: f32,
}

/// Soft RMT engine. Transmissions complete instantly; loopback routes
/// the TX stream into the channel's capture buffer.
pub struct SoftRmt {
    clock: SoftClock,
    channels: [Option<SoftRmtChannel>; RMT_CHANNELS],
}

impl Default for SoftRmt {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftRmt {
    pub fn new() -> Self {
        Self {
            clock: SoftClock::default(),
            channels: [None, None, None, None],
        }
    }

    fn channel(&mut self, channel: u8) -> PortResult<&mut SoftRmtChannel> {
        self.channels
            .get_mut(channel as usize)
            .ok_or(PortError::InvalidArg)?
            .as_mut()
            .ok_or(PortError::InvalidState)
    }

    /// Feed raw symbols into an armed receiver, as the pin would.
    pub fn inject_symbols(&mut self, channel: u8, raw: &[RawSymbol]) {
        if let Ok(ch) = self.channel(channel) {
            if ch.capturing {
                for &word in raw {
                    if ch.capture.push(word).is_err() {
                        ch.captured_overflow = true;
                        break;
                    }
                }
            }
        }
    }
}

impl PortClock for SoftRmt {
    fn now_us(&self) -> TimestampUs {
        self.clock.tick()
    }
}

impl RmtOps for SoftRmt {
    fn create_tx_channel(
        &mut self,
        channel: u8,
        _pin: PinNumber,
        _resolution_hz: FrequencyHz,
        memory_blocks: u8,
        _queue_depth: u8,
        _with_dma: bool,
    ) -> PortResult<()> {
        let slot = self
            .channels
            .get_mut(channel as usize)
            .ok_or(PortError::InvalidArg)?;
        if slot.is_some() {
            return Err(PortError::InvalidState);
        }
        *slot = Some(SoftRmtChannel {
            is_tx: true,
            memory_symbols: memory_blocks as usize * RMT_SYMBOLS_PER_BLOCK,
            loopback: false,
            capturing: false,
            capture: Vec::new(),
            captured_overflow: false,
            carrier_hz: 0,
            carrier_duty: 0.0,
        });
        Ok(())
    }

    fn create_rx_channel(
        &mut self,
        channel: u8,
        _pin: PinNumber,
        _resolution_hz: FrequencyHz,
        memory_blocks: u8,
        _buffer_symbols: usize,
    ) -> PortResult<()> {
        let slot = self
            .channels
            .get_mut(channel as usize)
            .ok_or(PortError::InvalidArg)?;
        if slot.is_some() {
            return Err(PortError::InvalidState);
        }
        *slot = Some(SoftRmtChannel {
            is_tx: false,
            memory_symbols: memory_blocks as usize * RMT_SYMBOLS_PER_BLOCK,
            loopback: false,
            capturing: false,
            capture: Vec::new(),
            captured_overflow: false,
            carrier_hz: 0,
            carrier_duty: 0.0,
        });
        Ok(())
    }

    fn delete_channel(&mut self, channel: u8) -> PortResult<()> {
        let slot = self
            .channels
            .get_mut(channel as usize)
            .ok_or(PortError::InvalidArg)?;
        if slot.is_none() {
            return Err(PortError::InvalidState);
        }
        *slot = None;
        Ok(())
    }

    fn transmit(&mut self, channel: u8, raw: &[RawSymbol]) -> PortResult<()> {
        let ch = self.channel(channel)?;
        if !ch.is_tx {
            return Err(PortError::InvalidState);
        }
        if raw.len() > ch.memory_symbols {
            return Err(PortError::InvalidArg);
        }
        if ch.loopback && ch.capturing {
            for &word in raw {
                if ch.capture.push(word).is_err() {
                    ch.captured_overflow = true;
                    break;
                }
            }
        }
        Ok(())
    }

    fn transmit_encoded(&mut self, channel: u8, raw: &[RawSymbol]) -> PortResult<()> {
        let ch = self.channel(channel)?;
        if !ch.is_tx {
            return Err(PortError::InvalidState);
        }
        if ch.loopback && ch.capturing {
            for &word in raw {
                if ch.capture.push(word).is_err() {
                    ch.captured_overflow = true;
                    break;
                }
            }
        }
        Ok(())
    }

    fn wait_tx_done(&mut self, channel: u8, _timeout: TimeoutMs) -> PortResult<()> {
        let _ = self.channel(channel)?;
        Ok(())
    }

    fn is_tx_done(&self, channel: u8) -> bool {
        self.channels
            .get(channel as usize)
            .map(|c| c.is_some())
            .unwrap_or(false)
    }

    fn start_receive(&mut self, channel: u8, _idle_timeout_us: u32) -> PortResult<()> {
        let ch = self.channel(channel)?;
        if ch.capturing {
            return Err(PortError::InvalidState);
        }
        ch.capturing = true;
        ch.capture.clear();
        ch.captured_overflow = false;
        Ok(())
    }

    fn stop_receive(&mut self, channel: u8) -> PortResult<usize> {
        let ch = self.channel(channel)?;
        if !ch.capturing {
            return Err(PortError::InvalidState);
        }
        ch.capturing = false;
        Ok(ch.capture.len())
    }

    fn read_received(&mut self, channel: u8, out: &mut [RawSymbol]) -> PortResult<usize> {
        let ch = self.channel(channel)?;
        let n = ch.capture.len().min(out.len());
        out[..n].copy_from_slice(&ch.capture[..n]);
        Ok(n)
    }

    fn configure_carrier(
        &mut self,
        channel: u8,
        frequency_hz: FrequencyHz,
        duty: f32,
    ) -> PortResult<()> {
        let ch = self.channel(channel)?;
        if !(0.0..=1.0).contains(&duty) {
            return Err(PortError::InvalidArg);
        }
        ch.carrier_hz = frequency_hz;
        ch.carrier_duty = duty;
        Ok(())
    }

    fn set_loopback(&mut self, channel: u8, enable: bool) -> PortResult<()> {
        let ch = self.channel(channel)?;
        ch.loopback = enable;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Periodic timer
// ---------------------------------------------------------------------------

/// Soft alarm timer, fired manually from tests.
pub struct SoftTimer {
    clock: SoftClock,
    created: bool,
    callback: Option<(TimerCallback, usize)>,
    running: bool,
    period_us: u64,
    expiries: u64,
    missed: u32,
}

impl Default for SoftTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftTimer {
    pub fn new() -> Self {
        Self {
            clock: SoftClock::default(),
            created: false,
            callback: None,
            running: false,
            period_us: 0,
            expiries: 0,
            missed: 0,
        }
    }

    /// Deliver `n` expiries.
    pub fn fire(&mut self, n: u32) {
        if !self.running {
            return;
        }
        for _ in 0..n {
            self.expiries += 1;
            self.clock.advance(self.period_us);
            if let Some((cb, user)) = self.callback {
                cb(user);
            }
        }
    }

    /// Record an overrun occurrence (ticks landing mid-callback).
    pub fn inject_missed(&mut self, occurrences: u32) {
        self.missed += occurrences;
    }

    pub fn current_period(&self) -> u64 {
        self.period_us
    }
}

impl PortClock for SoftTimer {
    fn now_us(&self) -> TimestampUs {
        self.clock.tick()
    }
}

impl TimerOps for SoftTimer {
    fn create(&mut self, callback: TimerCallback, user: usize) -> PortResult<()> {
        if self.created {
            return Err(PortError::InvalidState);
        }
        self.created = true;
        self.callback = Some((callback, user));
        Ok(())
    }

    fn delete(&mut self) -> PortResult<()> {
        if !self.created {
            return Err(PortError::InvalidState);
        }
        if self.running {
            return Err(PortError::InvalidState);
        }
        self.created = false;
        self.callback = None;
        Ok(())
    }

    fn start_periodic(&mut self, period_us: u64) -> PortResult<()> {
        if !self.created || self.running {
            return Err(PortError::InvalidState);
        }
        self.period_us = period_us;
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) -> PortResult<()> {
        if !self.running {
            return Err(PortError::InvalidState);
        }
        self.running = false;
        Ok(())
    }

    fn set_period(&mut self, period_us: u64) -> PortResult<()> {
        if !self.created {
            return Err(PortError::InvalidState);
        }
        self.period_us = period_us;
        Ok(())
    }

    fn expiry_count(&self) -> u64 {
        self.expiries
    }

    fn missed_count(&self) -> u32 {
        self.missed
    }
}

// ---------------------------------------------------------------------------
// NVS
// ---------------------------------------------------------------------------

const NVS_KEY_LEN: usize = 15;
const NVS_ENTRIES: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
enum SoftNvsEntry {
    U32(u32),
    Str(String<64>),
    Blob(Vec<u8, 128>),
}

impl SoftNvsEntry {
    fn kind(&self) -> NvsValueKind {
        match self {
            SoftNvsEntry::U32(_) => NvsValueKind::U32,
            SoftNvsEntry::Str(_) => NvsValueKind::Str,
            SoftNvsEntry::Blob(_) => NvsValueKind::Blob,
        }
    }

    fn size(&self) -> usize {
        match self {
            SoftNvsEntry::U32(_) => core::mem::size_of::<u32>(),
            SoftNvsEntry::Str(s) => s.len(),
            SoftNvsEntry::Blob(b) => b.len(),
        }
    }
}

type NvsKey = String<NVS_KEY_LEN>;

/// Soft NVS partition: committed state plus a pending overlay. The
/// backing store survives close/open, like flash does.
pub struct SoftNvs {
    open: bool,
    namespace: NvsKey,
    committed: FnvIndexMap<NvsKey, SoftNvsEntry, NVS_ENTRIES>,
    /// `None` marks a pending erase.
    pending: FnvIndexMap<NvsKey, Option<SoftNvsEntry>, NVS_ENTRIES>,
    /// Next commit fails, for durability tests.
    pub fail_next_commit: bool,
}

impl Default for SoftNvs {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftNvs {
    pub fn new() -> Self {
        Self {
            open: false,
            namespace: String::new(),
            committed: FnvIndexMap::new(),
            pending: FnvIndexMap::new(),
            fail_next_commit: false,
        }
    }

    fn key(key: &str) -> PortResult<NvsKey> {
        NvsKey::try_from(key).map_err(|_| PortError::InvalidArg)
    }

    fn set(&mut self, key: &str, entry: SoftNvsEntry) -> PortResult<()> {
        if !self.open {
            return Err(PortError::InvalidState);
        }
        let key = Self::key(key)?;
        self.pending
            .insert(key, Some(entry))
            .map_err(|_| PortError::NoMem)?;
        Ok(())
    }

    fn committed_entry(&mut self, key: &str) -> PortResult<&SoftNvsEntry> {
        if !self.open {
            return Err(PortError::InvalidState);
        }
        let key = Self::key(key)?;
        self.committed.get(&key).ok_or(PortError::NotFound)
    }
}

impl NvsOps for SoftNvs {
    fn open(&mut self, namespace: &str) -> PortResult<()> {
        if self.open {
            return Err(PortError::InvalidState);
        }
        if namespace.is_empty() || namespace.len() > NVS_KEY_LEN {
            return Err(PortError::InvalidArg);
        }
        self.namespace = Self::key(namespace)?;
        self.open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
        self.pending.clear();
    }

    fn set_u32(&mut self, key: &str, value: u32) -> PortResult<()> {
        self.set(key, SoftNvsEntry::U32(value))
    }

    fn get_u32(&mut self, key: &str) -> PortResult<u32> {
        match self.committed_entry(key)? {
            SoftNvsEntry::U32(v) => Ok(*v),
            _ => Err(PortError::InvalidArg),
        }
    }

    fn set_str(&mut self, key: &str, value: &str) -> PortResult<()> {
        let s = String::try_from(value).map_err(|_| PortError::NoMem)?;
        self.set(key, SoftNvsEntry::Str(s))
    }

    fn get_str(&mut self, key: &str, buf: &mut [u8]) -> PortResult<usize> {
        let entry = self.committed_entry(key)?;
        match entry {
            SoftNvsEntry::Str(s) => {
                let bytes = s.as_bytes();
                if buf.len() < bytes.len() {
                    return Err(PortError::NoMem);
                }
                buf[..bytes.len()].copy_from_slice(bytes);
                Ok(bytes.len())
            }
            _ => Err(PortError::InvalidArg),
        }
    }

    fn set_blob(&mut self, key: &str, value: &[u8]) -> PortResult<()> {
        let mut blob = Vec::new();
        blob.extend_from_slice(value).map_err(|_| PortError::NoMem)?;
        self.set(key, SoftNvsEntry::Blob(blob))
    }

    fn get_blob(&mut self, key: &str, buf: &mut [u8]) -> PortResult<usize> {
        let entry = self.committed_entry(key)?;
        match entry {
            SoftNvsEntry::Blob(b) => {
                if buf.len() < b.len() {
                    return Err(PortError::NoMem);
                }
                buf[..b.len()].copy_from_slice(b);
                Ok(b.len())
            }
            _ => Err(PortError::InvalidArg),
        }
    }

    fn erase_key(&mut self, key: &str) -> PortResult<()> {
        if !self.open {
            return Err(PortError::InvalidState);
        }
        let key = Self::key(key)?;
        if !self.committed.contains_key(&key) && !self.pending.contains_key(&key) {
            return Err(PortError::NotFound);
        }
        self.pending.insert(key, None).map_err(|_| PortError::NoMem)?;
        Ok(())
    }

    fn commit(&mut self) -> PortResult<()> {
        if !self.open {
            return Err(PortError::InvalidState);
        }
        if self.fail_next_commit {
            self.fail_next_commit = false;
            return Err(PortError::Fail);
        }
        // Apply the overlay in insertion order.
        for (key, value) in &self.pending {
            match value {
                Some(entry) => {
                    self.committed
                        .insert(key.clone(), entry.clone())
                        .map_err(|_| PortError::NoMem)?;
                }
                None => {
                    self.committed.remove(key);
                }
            }
        }
        self.pending.clear();
        Ok(())
    }

    fn entry_info(&mut self, key: &str) -> PortResult<(NvsValueKind, usize)> {
        let entry = self.committed_entry(key)?;
        Ok((entry.kind(), entry.size()))
    }
}
