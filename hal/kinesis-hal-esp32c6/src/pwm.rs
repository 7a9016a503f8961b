//! LEDC PWM driver
//!
//! Eight channels over four timers. The allocator reuses a timer already
//! running at the requested (frequency, resolution) and claims a free one
//! otherwise; the last channel leaving a timer releases it. Complementary
//! pairs ride the same timer with the inverse duty minus the dead-time
//! gap on both edges.

use kinesis_hal::peripheral::Peripheral;
use kinesis_hal::pwm::{
    max_raw_duty, Pwm, PwmCapabilities, PwmChannelConfig, PwmChannelStatus, PwmDiagnostics,
    PwmError, PwmEvent, PwmFaultCallback, PwmPeriodCallback, PwmResult, PwmStatistics,
};
use kinesis_hal::types::{is_valid_pin, ChannelId, FrequencyHz};

use crate::port::{LedcOps, PortClock, PortError, LEDC_CHANNELS, LEDC_TIMERS};

/// LEDC source clock bounding frequency x resolution.
const LEDC_CLOCK_HZ: u64 = 80_000_000;

#[derive(Debug, Clone, Copy)]
struct TimerSlot {
    frequency_hz: FrequencyHz,
    resolution_bits: u8,
    users: u8,
}

#[derive(Debug, Clone, Copy)]
struct ChannelState {
    config: PwmChannelConfig,
    timer: Option<u8>,
    enabled: bool,
    raw_duty: u32,
    phase_raw: u32,
    fade_active: bool,
    /// Complementary partner driven as this channel's inverse.
    complement: Option<u8>,
    dead_time_ns: u32,
    last_error: Option<PwmError>,
}

/// LEDC PWM block driver.
pub struct LedcPwm<P: LedcOps> {
    port: P,
    initialized: bool,
    timers: [Option<TimerSlot>; LEDC_TIMERS],
    channels: [Option<ChannelState>; LEDC_CHANNELS],
    period_cb: Option<(PwmPeriodCallback, usize)>,
    fault_cb: Option<(PwmFaultCallback, usize)>,
    stats: PwmStatistics,
    diag: PwmDiagnostics,
}

impl<P: LedcOps> LedcPwm<P> {
    pub fn new(port: P) -> Self {
        Self {
            port,
            initialized: false,
            timers: [None; LEDC_TIMERS],
            channels: [None; LEDC_CHANNELS],
            period_cb: None,
            fault_cb: None,
            stats: PwmStatistics::default(),
            diag: PwmDiagnostics::default(),
        }
    }

    /// Direct access to the native port (simulation and test hook).
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    fn convert_port_error(err: PortError) -> PwmError {
        match err {
            PortError::Fail => PwmError::Failure,
            PortError::NoMem => PwmError::OutOfMemory,
            PortError::InvalidArg => PwmError::InvalidParameter,
            PortError::InvalidState => PwmError::InvalidConfiguration,
            PortError::NotFound => PwmError::InvalidChannel,
            PortError::NotSupported => PwmError::UnsupportedOperation,
            PortError::Timeout => PwmError::Failure,
            PortError::Busy => PwmError::ResourceUnavailable,
        }
    }

    fn ready(&mut self) -> PwmResult<()> {
        if self.ensure_initialized().is_err() {
            return Err(PwmError::NotInitialized);
        }
        Ok(())
    }

    fn state(&mut self, channel: ChannelId) -> PwmResult<&mut ChannelState> {
        self.channels
            .get_mut(channel as usize)
            .ok_or(PwmError::InvalidChannel)?
            .as_mut()
            .ok_or(PwmError::ChannelNotConfigured)
    }

    fn state_ref(&self, channel: ChannelId) -> PwmResult<&ChannelState> {
        self.channels
            .get(channel as usize)
            .ok_or(PwmError::InvalidChannel)?
            .as_ref()
            .ok_or(PwmError::ChannelNotConfigured)
    }

    fn duty_to_raw(duty: f32, resolution_bits: u8) -> u32 {
        let max = max_raw_duty(resolution_bits) as f32;
        (duty * max + 0.5) as u32
    }

    /// Reuse a compatible timer or claim a free one.
    fn allocate_timer(
        &mut self,
        frequency_hz: FrequencyHz,
        resolution_bits: u8,
        forced: Option<u8>,
    ) -> PwmResult<u8> {
        if let Some(timer) = forced {
            if timer as usize >= LEDC_TIMERS {
                return Err(PwmError::InvalidParameter);
            }
            match &mut self.timers[timer as usize] {
                Some(slot) => {
                    if slot.frequency_hz != frequency_hz || slot.resolution_bits != resolution_bits
                    {
                        return Err(PwmError::TimerConflict);
                    }
                    slot.users += 1;
                }
                slot @ None => {
                    self.port
                        .configure_timer(timer, frequency_hz, resolution_bits)
                        .map_err(Self::convert_port_error)?;
                    *slot = Some(TimerSlot {
                        frequency_hz,
                        resolution_bits,
                        users: 1,
                    });
                }
            }
            return Ok(timer);
        }
        // Reuse first
        for (i, slot) in self.timers.iter_mut().enumerate() {
            if let Some(t) = slot {
                if t.frequency_hz == frequency_hz && t.resolution_bits == resolution_bits {
                    t.users += 1;
                    return Ok(i as u8);
                }
            }
        }
        // Claim a free one
        for i in 0..LEDC_TIMERS as u8 {
            if self.timers[i as usize].is_none() {
                self.port
                    .configure_timer(i, frequency_hz, resolution_bits)
                    .map_err(Self::convert_port_error)?;
                self.timers[i as usize] = Some(TimerSlot {
                    frequency_hz,
                    resolution_bits,
                    users: 1,
                });
                return Ok(i);
            }
        }
        Err(PwmError::ResourceUnavailable)
    }

    fn release_timer_user(&mut self, timer: u8) {
        if let Some(slot) = &mut self.timers[timer as usize] {
            slot.users = slot.users.saturating_sub(1);
            if slot.users == 0 {
                let _ = self.port.release_timer(timer);
                self.timers[timer as usize] = None;
            }
        }
    }

    /// Push a raw duty to the hardware, mirroring it onto the
    /// complementary partner when one is attached.
    fn apply_duty(&mut self, channel: ChannelId, raw: u32) -> PwmResult<()> {
        let state = self.state(channel)?;
        let phase = state.phase_raw;
        let resolution = state.config.resolution_bits;
        let complement = state.complement;
        let dead_time_ns = state.dead_time_ns;
        let frequency = state.config.frequency_hz;
        state.raw_duty = raw;

        self.port
            .set_duty(channel as u8, raw, phase)
            .map_err(Self::convert_port_error)?;
        self.port
            .update_duty(channel as u8)
            .map_err(Self::convert_port_error)?;

        if let Some(partner) = complement {
            let comp_raw = Self::complementary_raw(raw, resolution, frequency, dead_time_ns);
            self.port
                .set_duty(partner, comp_raw, phase)
                .map_err(Self::convert_port_error)?;
            self.port
                .update_duty(partner)
                .map_err(Self::convert_port_error)?;
            if let Ok(partner_state) = self.state(partner as ChannelId) {
                partner_state.raw_duty = comp_raw;
            }
        }
        self.stats.duty_updates += 1;
        self.stats.last_activity_us = self.port.now_us();
        Ok(())
    }

    /// Inverse duty shortened by the dead time on both edges.
    fn complementary_raw(
        primary_raw: u32,
        resolution_bits: u8,
        frequency_hz: FrequencyHz,
        dead_time_ns: u32,
    ) -> u32 {
        let max = max_raw_duty(resolution_bits);
        let ticks_per_second = frequency_hz as u64 * (max as u64 + 1);
        let dead_ticks = (dead_time_ns as u64 * ticks_per_second / 1_000_000_000) as u32;
        max.saturating_sub(primary_raw)
            .saturating_sub(2 * dead_ticks)
    }

    fn note_fault(&mut self, channel: ChannelId, err: PwmError) {
        self.stats.faults += 1;
        self.diag.last_error = Some(err);
        self.diag.last_error_us = self.port.now_us();
        if let Ok(state) = self.state(channel) {
            state.last_error = Some(err);
        }
        if let Some((cb, user)) = self.fault_cb {
            cb(channel, err, user);
        }
    }
}

impl<P: LedcOps> Peripheral for LedcPwm<P> {
    type Error = PwmError;

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn initialize(&mut self) -> PwmResult<()> {
        if self.initialized {
            return Err(PwmError::AlreadyInitialized);
        }
        self.initialized = true;
        Ok(())
    }

    fn deinitialize(&mut self) -> PwmResult<()> {
        if !self.initialized {
            return Err(PwmError::NotInitialized);
        }
        for channel in 0..LEDC_CHANNELS as u8 {
            if let Some(state) = self.channels[channel as usize] {
                let _ = self.port.release_channel(channel, state.config.idle_level);
                if let Some(timer) = state.timer {
                    self.release_timer_user(timer);
                }
                self.channels[channel as usize] = None;
            }
        }
        self.period_cb = None;
        self.fault_cb = None;
        self.initialized = false;
        Ok(())
    }
}

impl<P: LedcOps> Pwm for LedcPwm<P> {
    fn configure_channel(&mut self, channel: ChannelId, config: PwmChannelConfig) -> PwmResult<()> {
        self.ready()?;
        if channel as usize >= LEDC_CHANNELS {
            return Err(PwmError::InvalidChannel);
        }
        if !is_valid_pin(config.output_pin) {
            return Err(PwmError::InvalidPin);
        }
        if config.resolution_bits == 0 || config.resolution_bits > 14 {
            return Err(PwmError::InvalidResolution);
        }
        if config.frequency_hz == 0
            || (config.frequency_hz as u64) << config.resolution_bits > LEDC_CLOCK_HZ
        {
            return Err(PwmError::InvalidFrequency);
        }
        if !(0.0..=1.0).contains(&config.initial_duty) {
            return Err(PwmError::InvalidParameter);
        }
        // Reconfiguring releases the previous allocation first.
        if let Some(old) = self.channels[channel as usize] {
            if let Some(timer) = old.timer {
                self.release_timer_user(timer);
            }
        }
        let timer =
            self.allocate_timer(config.frequency_hz, config.resolution_bits, config.timer_id)?;
        let raw = Self::duty_to_raw(config.initial_duty, config.resolution_bits);
        if let Err(e) = self.port.configure_channel(
            channel as u8,
            config.output_pin,
            timer,
            raw,
            config.invert,
            config.idle_level,
        ) {
            self.release_timer_user(timer);
            return Err(Self::convert_port_error(e));
        }
        self.channels[channel as usize] = Some(ChannelState {
            config,
            timer: Some(timer),
            enabled: false,
            raw_duty: raw,
            phase_raw: 0,
            fade_active: false,
            complement: None,
            dead_time_ns: 0,
            last_error: None,
        });
        Ok(())
    }

    fn enable_channel(&mut self, channel: ChannelId) -> PwmResult<()> {
        self.ready()?;
        let state = self.state(channel)?;
        if state.enabled {
            return Err(PwmError::ChannelAlreadyEnabled);
        }
        if state.timer.is_none() {
            // Timer was released by a disable; reallocate.
            let config = state.config;
            let timer =
                self.allocate_timer(config.frequency_hz, config.resolution_bits, config.timer_id)?;
            let raw = self.state(channel)?.raw_duty;
            self.port
                .configure_channel(
                    channel as u8,
                    config.output_pin,
                    timer,
                    raw,
                    config.invert,
                    config.idle_level,
                )
                .map_err(Self::convert_port_error)?;
            self.state(channel)?.timer = Some(timer);
        }
        let raw = self.state(channel)?.raw_duty;
        self.apply_duty(channel, raw)?;
        self.state(channel)?.enabled = true;
        Ok(())
    }

    fn disable_channel(&mut self, channel: ChannelId) -> PwmResult<()> {
        self.ready()?;
        let state = self.state(channel)?;
        if !state.enabled {
            return Err(PwmError::ChannelNotConfigured);
        }
        let idle_level = state.config.idle_level;
        let timer = state.timer.take();
        state.enabled = false;
        self.port
            .release_channel(channel as u8, idle_level)
            .map_err(Self::convert_port_error)?;
        if let Some(timer) = timer {
            self.release_timer_user(timer);
        }
        Ok(())
    }

    fn is_channel_enabled(&self, channel: ChannelId) -> bool {
        self.state_ref(channel).map(|s| s.enabled).unwrap_or(false)
    }

    fn channel_status(&self, channel: ChannelId) -> PwmResult<PwmChannelStatus> {
        let state = self.state_ref(channel)?;
        let max = max_raw_duty(state.config.resolution_bits) as f32;
        Ok(PwmChannelStatus {
            configured: true,
            enabled: state.enabled,
            frequency_hz: state.config.frequency_hz,
            resolution_bits: state.config.resolution_bits,
            duty: state.raw_duty as f32 / max,
            raw_duty: state.raw_duty,
            assigned_timer: state.timer,
            fade_active: state.fade_active,
            last_error: state.last_error,
        })
    }

    fn set_duty_cycle(&mut self, channel: ChannelId, duty: f32) -> PwmResult<()> {
        self.ready()?;
        if !(0.0..=1.0).contains(&duty) {
            let err = PwmError::InvalidParameter;
            self.note_fault(channel, err);
            return Err(err);
        }
        let resolution = self.state(channel)?.config.resolution_bits;
        self.apply_duty(channel, Self::duty_to_raw(duty, resolution))
    }

    fn duty_cycle(&self, channel: ChannelId) -> PwmResult<f32> {
        let state = self.state_ref(channel)?;
        let max = max_raw_duty(state.config.resolution_bits) as f32;
        Ok(state.raw_duty as f32 / max)
    }

    fn set_duty_cycle_raw(&mut self, channel: ChannelId, raw: u32) -> PwmResult<()> {
        self.ready()?;
        let resolution = self.state(channel)?.config.resolution_bits;
        if raw > max_raw_duty(resolution) {
            let err = PwmError::InvalidParameter;
            self.note_fault(channel, err);
            return Err(err);
        }
        self.apply_duty(channel, raw)
    }

    fn set_frequency(&mut self, channel: ChannelId, frequency_hz: FrequencyHz) -> PwmResult<()> {
        self.ready()?;
        let state = self.state(channel)?;
        let resolution = state.config.resolution_bits;
        if frequency_hz == 0 || (frequency_hz as u64) << resolution > LEDC_CLOCK_HZ {
            return Err(PwmError::InvalidFrequency);
        }
        let Some(timer) = state.timer else {
            state.config.frequency_hz = frequency_hz;
            return Ok(());
        };
        let alone = self.timers[timer as usize]
            .map(|t| t.users == 1)
            .unwrap_or(false);
        if alone {
            self.port
                .set_frequency(timer, frequency_hz)
                .map_err(Self::convert_port_error)?;
            if let Some(slot) = &mut self.timers[timer as usize] {
                slot.frequency_hz = frequency_hz;
            }
        } else {
            // Shared timer: migrate to one matching the new rate.
            self.release_timer_user(timer);
            let new_timer = self.allocate_timer(frequency_hz, resolution, None)?;
            let state = self.state(channel)?;
            let config = state.config;
            let raw = state.raw_duty;
            state.timer = Some(new_timer);
            self.port
                .configure_channel(
                    channel as u8,
                    config.output_pin,
                    new_timer,
                    raw,
                    config.invert,
                    config.idle_level,
                )
                .map_err(Self::convert_port_error)?;
        }
        self.state(channel)?.config.frequency_hz = frequency_hz;
        self.stats.frequency_changes += 1;
        Ok(())
    }

    fn set_phase_shift(&mut self, channel: ChannelId, degrees: f32) -> PwmResult<()> {
        self.ready()?;
        let state = self.state(channel)?;
        let max = max_raw_duty(state.config.resolution_bits);
        let mut normalized = degrees % 360.0;
        if normalized < 0.0 {
            normalized += 360.0;
        }
        state.phase_raw = (normalized / 360.0 * (max as f32 + 1.0)) as u32;
        let raw = state.raw_duty;
        self.apply_duty(channel, raw)
    }

    fn start_all(&mut self) -> PwmResult<()> {
        self.ready()?;
        for channel in 0..LEDC_CHANNELS as ChannelId {
            if self.state_ref(channel).map(|s| !s.enabled).unwrap_or(false) {
                self.enable_channel(channel)?;
            }
        }
        Ok(())
    }

    fn stop_all(&mut self) -> PwmResult<()> {
        self.ready()?;
        for channel in 0..LEDC_CHANNELS as ChannelId {
            if self.state_ref(channel).map(|s| s.enabled).unwrap_or(false) {
                self.disable_channel(channel)?;
            }
        }
        Ok(())
    }

    fn update_all(&mut self) -> PwmResult<()> {
        self.ready()?;
        for channel in 0..LEDC_CHANNELS as u8 {
            let enabled = self
                .state_ref(channel as ChannelId)
                .map(|s| s.enabled)
                .unwrap_or(false);
            if enabled {
                self.port
                    .update_duty(channel)
                    .map_err(Self::convert_port_error)?;
            }
        }
        Ok(())
    }

    fn set_complementary_output(
        &mut self,
        primary: ChannelId,
        complementary: ChannelId,
        dead_time_ns: u32,
    ) -> PwmResult<()> {
        self.ready()?;
        if primary == complementary {
            return Err(PwmError::InvalidParameter);
        }
        let p = self.state_ref(primary)?;
        let c = self.state_ref(complementary)?;
        if p.config.frequency_hz != c.config.frequency_hz
            || p.config.resolution_bits != c.config.resolution_bits
        {
            return Err(PwmError::TimerConflict);
        }
        let p_timer = p.timer.ok_or(PwmError::ChannelNotConfigured)?;
        let c_timer = c.timer;
        let c_config = c.config;
        let raw = p.raw_duty;

        // Move the partner onto the primary's timer.
        if c_timer != Some(p_timer) {
            if let Some(old) = c_timer {
                self.release_timer_user(old);
            }
            if let Some(slot) = &mut self.timers[p_timer as usize] {
                slot.users += 1;
            }
            self.port
                .configure_channel(
                    complementary as u8,
                    c_config.output_pin,
                    p_timer,
                    0,
                    !c_config.invert,
                    c_config.idle_level,
                )
                .map_err(Self::convert_port_error)?;
            self.state(complementary)?.timer = Some(p_timer);
        }
        let state = self.state(primary)?;
        state.complement = Some(complementary as u8);
        state.dead_time_ns = dead_time_ns;
        self.apply_duty(primary, raw)
    }

    fn set_hardware_fade(
        &mut self,
        channel: ChannelId,
        target_duty: f32,
        fade_ms: u32,
    ) -> PwmResult<()> {
        self.ready()?;
        if !(0.0..=1.0).contains(&target_duty) {
            return Err(PwmError::InvalidParameter);
        }
        let state = self.state(channel)?;
        if state.fade_active {
            return Err(PwmError::FadeInProgress);
        }
        let target_raw = Self::duty_to_raw(target_duty, state.config.resolution_bits);
        state.fade_active = true;
        if let Err(e) = self.port.start_fade(channel as u8, target_raw, fade_ms) {
            self.state(channel)?.fade_active = false;
            return Err(Self::convert_port_error(e));
        }
        self.stats.fades_started += 1;
        // The fade-end interrupt lands here once the hardware walks the
        // duty to its target.
        if !self.port.is_fade_running(channel as u8) {
            let final_raw = self
                .port
                .current_duty(channel as u8)
                .map_err(Self::convert_port_error)?;
            let state = self.state(channel)?;
            state.fade_active = false;
            state.raw_duty = final_raw;
            self.stats.fades_completed += 1;
            if let Some((cb, user)) = self.period_cb {
                cb(channel, PwmEvent::FadeComplete, user);
            }
        }
        Ok(())
    }

    fn stop_hardware_fade(&mut self, channel: ChannelId) -> PwmResult<()> {
        self.ready()?;
        let active = self.state(channel)?.fade_active;
        if !active {
            return Err(PwmError::FadeNotActive);
        }
        self.port
            .stop_fade(channel as u8)
            .map_err(Self::convert_port_error)?;
        let raw = self
            .port
            .current_duty(channel as u8)
            .map_err(Self::convert_port_error)?;
        let state = self.state(channel)?;
        state.fade_active = false;
        state.raw_duty = raw;
        Ok(())
    }

    fn is_fade_active(&self, channel: ChannelId) -> bool {
        self.state_ref(channel)
            .map(|s| s.fade_active)
            .unwrap_or(false)
    }

    fn set_idle_level(&mut self, channel: ChannelId, level: bool) -> PwmResult<()> {
        self.ready()?;
        self.state(channel)?.config.idle_level = level;
        Ok(())
    }

    fn force_timer_assignment(&mut self, channel: ChannelId, timer_id: u8) -> PwmResult<()> {
        self.ready()?;
        let state = self.state(channel)?;
        let config = state.config;
        let raw = state.raw_duty;
        let old_timer = state.timer;
        if old_timer == Some(timer_id) {
            return Ok(());
        }
        if let Some(old) = old_timer {
            self.release_timer_user(old);
        }
        let timer =
            self.allocate_timer(config.frequency_hz, config.resolution_bits, Some(timer_id))?;
        self.port
            .configure_channel(
                channel as u8,
                config.output_pin,
                timer,
                raw,
                config.invert,
                config.idle_level,
            )
            .map_err(Self::convert_port_error)?;
        self.state(channel)?.timer = Some(timer);
        Ok(())
    }

    fn set_period_callback(&mut self, callback: PwmPeriodCallback, user: usize) {
        self.period_cb = Some((callback, user));
    }

    fn set_fault_callback(&mut self, callback: PwmFaultCallback, user: usize) {
        self.fault_cb = Some((callback, user));
    }

    fn clear_callbacks(&mut self) {
        self.period_cb = None;
        self.fault_cb = None;
    }

    fn capabilities(&self) -> PwmCapabilities {
        PwmCapabilities {
            max_channels: LEDC_CHANNELS as u8,
            max_timers: LEDC_TIMERS as u8,
            min_frequency_hz: 1,
            max_frequency_hz: 40_000_000,
            max_resolution_bits: 14,
            supports_hardware_fade: true,
            supports_complementary: true,
        }
    }

    fn statistics(&self) -> PwmStatistics {
        self.stats
    }

    fn reset_statistics(&mut self) {
        self.stats = PwmStatistics::default();
    }

    fn diagnostics(&self) -> PwmDiagnostics {
        let mut diag = self.diag;
        diag.active_channels = self
            .channels
            .iter()
            .filter(|c| c.map(|s| s.enabled).unwrap_or(false))
            .count() as u8;
        diag.timers_in_use = self.timers.iter().filter(|t| t.is_some()).count() as u8;
        diag
    }

    fn reset_diagnostics(&mut self) {
        self.diag = PwmDiagnostics::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::soft::SoftLedc;

    use core::sync::atomic::{AtomicU32, Ordering};

    fn block() -> LedcPwm<SoftLedc> {
        let mut pwm = LedcPwm::new(SoftLedc::new());
        pwm.initialize().unwrap();
        pwm
    }

    fn config(pin: i32, freq: FrequencyHz, bits: u8) -> PwmChannelConfig {
        PwmChannelConfig {
            output_pin: pin,
            frequency_hz: freq,
            resolution_bits: bits,
            ..PwmChannelConfig::default()
        }
    }

    #[test]
    fn test_configure_validates() {
        let mut pwm = block();
        assert_eq!(
            pwm.configure_channel(0, config(-1, 5000, 10)),
            Err(PwmError::InvalidPin)
        );
        assert_eq!(
            pwm.configure_channel(0, config(4, 5000, 15)),
            Err(PwmError::InvalidResolution)
        );
        // 40 kHz at 14 bits needs a 655 MHz clock
        assert_eq!(
            pwm.configure_channel(0, config(4, 40_000, 14)),
            Err(PwmError::InvalidFrequency)
        );
        pwm.configure_channel(0, config(4, 5000, 10)).unwrap();
    }

    #[test]
    fn test_raw_duty_bounds() {
        let mut pwm = block();
        pwm.configure_channel(0, config(4, 5000, 10)).unwrap();
        pwm.set_duty_cycle_raw(0, 1023).unwrap();
        assert_eq!(
            pwm.set_duty_cycle_raw(0, 1024),
            Err(PwmError::InvalidParameter)
        );
    }

    #[test]
    fn test_timer_sharing_same_settings() {
        let mut pwm = block();
        pwm.configure_channel(0, config(4, 5000, 10)).unwrap();
        pwm.configure_channel(1, config(5, 5000, 10)).unwrap();
        let t0 = pwm.channel_status(0).unwrap().assigned_timer;
        let t1 = pwm.channel_status(1).unwrap().assigned_timer;
        assert_eq!(t0, t1);
        assert_eq!(pwm.diagnostics().timers_in_use, 1);
    }

    #[test]
    fn test_timer_exhaustion() {
        let mut pwm = block();
        pwm.configure_channel(0, config(4, 1000, 10)).unwrap();
        pwm.configure_channel(1, config(5, 2000, 10)).unwrap();
        pwm.configure_channel(2, config(6, 3000, 10)).unwrap();
        pwm.configure_channel(3, config(7, 4000, 10)).unwrap();
        // A fifth distinct (frequency, resolution) has nowhere to go
        assert_eq!(
            pwm.configure_channel(4, config(8, 5000, 10)),
            Err(PwmError::ResourceUnavailable)
        );
    }

    #[test]
    fn test_disable_releases_timer() {
        let mut pwm = block();
        pwm.configure_channel(0, config(4, 1000, 10)).unwrap();
        pwm.enable_channel(0).unwrap();
        assert_eq!(pwm.diagnostics().timers_in_use, 1);
        pwm.disable_channel(0).unwrap();
        assert_eq!(pwm.diagnostics().timers_in_use, 0);
        // Re-enabling claims a timer again
        pwm.enable_channel(0).unwrap();
        assert_eq!(pwm.diagnostics().timers_in_use, 1);
    }

    #[test]
    fn test_fade_scenario() {
        static EVENTS: AtomicU32 = AtomicU32::new(0);
        fn on_period(channel: ChannelId, event: PwmEvent, _user: usize) {
            if channel == 2 && event == PwmEvent::FadeComplete {
                EVENTS.fetch_add(1, Ordering::Relaxed);
            }
        }

        let mut pwm = block();
        pwm.configure_channel(2, config(4, 5000, 10)).unwrap();
        pwm.set_period_callback(on_period, 0);
        pwm.start_all().unwrap();
        pwm.set_hardware_fade(2, 1.0, 2000).unwrap();

        let duty = pwm.duty_cycle(2).unwrap();
        assert!((duty - 1.0).abs() < 0.02);
        assert_eq!(EVENTS.load(Ordering::Relaxed), 1);
        assert!(!pwm.is_fade_active(2));
        assert_eq!(pwm.statistics().fades_completed, 1);
    }

    #[test]
    fn test_complementary_dead_time() {
        let mut pwm = block();
        pwm.configure_channel(0, config(4, 5000, 10)).unwrap();
        pwm.configure_channel(1, config(5, 5000, 10)).unwrap();
        pwm.set_duty_cycle_raw(0, 512).unwrap();
        pwm.set_complementary_output(0, 1, 1000).unwrap();

        // 1000 ns at 5 kHz x 1024 ticks = ~5 ticks per edge
        let comp = pwm.channel_status(1).unwrap().raw_duty;
        assert_eq!(comp, 1023 - 512 - 2 * 5);
        // Complementary updates track the primary
        pwm.set_duty_cycle_raw(0, 100).unwrap();
        let comp = pwm.channel_status(1).unwrap().raw_duty;
        assert_eq!(comp, 1023 - 100 - 2 * 5);
    }

    #[test]
    fn test_complementary_requires_matching_timer_settings() {
        let mut pwm = block();
        pwm.configure_channel(0, config(4, 5000, 10)).unwrap();
        pwm.configure_channel(1, config(5, 9000, 10)).unwrap();
        assert_eq!(
            pwm.set_complementary_output(0, 1, 500),
            Err(PwmError::TimerConflict)
        );
    }

    #[test]
    fn test_set_frequency_migrates_off_shared_timer() {
        let mut pwm = block();
        pwm.configure_channel(0, config(4, 5000, 10)).unwrap();
        pwm.configure_channel(1, config(5, 5000, 10)).unwrap();
        pwm.set_frequency(1, 8000).unwrap();
        let t0 = pwm.channel_status(0).unwrap().assigned_timer;
        let t1 = pwm.channel_status(1).unwrap().assigned_timer;
        assert_ne!(t0, t1);
        assert_eq!(pwm.channel_status(0).unwrap().frequency_hz, 5000);
        assert_eq!(pwm.channel_status(1).unwrap().frequency_hz, 8000);
    }

    #[test]
    fn test_forced_timer_assignment() {
        let mut pwm = block();
        pwm.configure_channel(0, config(4, 5000, 10)).unwrap();
        pwm.force_timer_assignment(0, 3).unwrap();
        assert_eq!(pwm.channel_status(0).unwrap().assigned_timer, Some(3));
    }

    #[test]
    fn test_lazy_init_and_deinit() {
        let mut pwm = LedcPwm::new(SoftLedc::new());
        assert!(!pwm.is_initialized());
        pwm.configure_channel(0, config(4, 5000, 10)).unwrap();
        assert!(pwm.is_initialized());
        assert_eq!(pwm.initialize(), Err(PwmError::AlreadyInitialized));
        pwm.deinitialize().unwrap();
        assert!(!pwm.is_initialized());
    }
}
