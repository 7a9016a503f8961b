//! ADC unit driver
//!
//! One-shot conversions with on-demand calibration fitting, and the
//! continuous (DMA) path with its frame callback. The two modes are
//! mutually exclusive per unit; one-shot reads while the DMA engine owns
//! the unit are rejected.

use kinesis_hal::adc::{
    Adc, AdcAttenuation, AdcBitWidth, AdcChannelConfig, AdcConfig, AdcContinuousCallback,
    AdcContinuousConfig, AdcDiagnostics, AdcError, AdcIirCoefficient, AdcMonitorCallback,
    AdcMonitorConfig, AdcResult, AdcStatistics,
};
use kinesis_hal::peripheral::Peripheral;
use kinesis_hal::types::{ChannelId, HostId};

use heapless::Vec;

use crate::port::{AdcCalCurve, AdcOps, PortClock, PortError};

/// Channels per unit on this SoC.
pub const ADC_CHANNELS: usize = 8;

/// Structural errors beyond this count mark the unit unhealthy.
const ERROR_THRESHOLD: u32 = 5;

/// ADC unit driver.
pub struct AdcUnit<P: AdcOps> {
    port: P,
    config: AdcConfig,
    initialized: bool,
    channels: [Option<AdcChannelConfig>; ADC_CHANNELS],
    enabled: [bool; ADC_CHANNELS],
    /// Fitted curves, indexed by attenuation.
    calibration: [Option<AdcCalCurve>; 4],
    continuous_callback: Option<(AdcContinuousCallback, usize)>,
    continuous_running: bool,
    stats: AdcStatistics,
    diag: AdcDiagnostics,
}

impl<P: AdcOps> AdcUnit<P> {
    /// Capture configuration; the unit is claimed on first use.
    pub fn new(port: P, config: AdcConfig) -> Self {
        Self {
            port,
            config,
            initialized: false,
            channels: [None; ADC_CHANNELS],
            enabled: [false; ADC_CHANNELS],
            calibration: [None; 4],
            continuous_callback: None,
            continuous_running: false,
            stats: AdcStatistics::default(),
            diag: AdcDiagnostics::default(),
        }
    }

    /// Direct access to the native port (simulation and test hook).
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    fn convert_port_error(err: PortError) -> AdcError {
        match err {
            PortError::Fail => AdcError::Failure,
            PortError::NoMem => AdcError::OutOfMemory,
            PortError::InvalidArg => AdcError::InvalidChannel,
            PortError::InvalidState => AdcError::InvalidConfiguration,
            PortError::NotFound => AdcError::InvalidChannel,
            PortError::NotSupported => AdcError::UnsupportedOperation,
            PortError::Timeout => AdcError::Timeout,
            PortError::Busy => AdcError::ChannelBusy,
        }
    }

    fn ready(&mut self) -> AdcResult<()> {
        if self.ensure_initialized().is_err() {
            self.stats.failed_conversions += 1;
            return Err(AdcError::NotInitialized);
        }
        Ok(())
    }

    const fn attenuation_index(attenuation: AdcAttenuation) -> usize {
        match attenuation {
            AdcAttenuation::Db0 => 0,
            AdcAttenuation::Db2_5 => 1,
            AdcAttenuation::Db6 => 2,
            AdcAttenuation::Db12 => 3,
        }
    }

    fn channel_config(&self, channel: ChannelId) -> AdcResult<AdcChannelConfig> {
        self.channels
            .get(channel as usize)
            .ok_or(AdcError::InvalidChannel)?
            .ok_or(AdcError::InvalidConfiguration)
    }

    fn record<T>(&mut self, result: AdcResult<T>) -> AdcResult<T> {
        self.stats.total_conversions += 1;
        self.stats.last_activity_us = self.port.now_us();
        match &result {
            Ok(_) => {
                self.stats.successful_conversions += 1;
                self.diag.consecutive_errors = 0;
            }
            Err(e) => {
                self.stats.failed_conversions += 1;
                self.diag.last_error = Some(*e);
                self.diag.last_error_us = self.stats.last_activity_us;
                if matches!(
                    e,
                    AdcError::HardwareFault
                        | AdcError::DeviceNotResponding
                        | AdcError::VoltageOutOfRange
                ) {
                    self.diag.consecutive_errors += 1;
                    if self.diag.consecutive_errors >= ERROR_THRESHOLD {
                        self.diag.healthy = false;
                    }
                }
            }
        }
        result
    }

    /// Curve for the attenuation, fitting one on demand when calibration
    /// is enabled.
    fn curve_for(&mut self, attenuation: AdcAttenuation) -> AdcResult<AdcCalCurve> {
        let idx = Self::attenuation_index(attenuation);
        if let Some(curve) = self.calibration[idx] {
            return Ok(curve);
        }
        if !self.config.calibration_enabled {
            return Err(AdcError::CalibrationNotAvailable);
        }
        let curve = match self.port.calibration_fit(attenuation) {
            Ok(curve) => curve,
            Err(PortError::NotSupported) => return Err(AdcError::CalibrationNotAvailable),
            Err(e) => return Err(Self::convert_port_error(e)),
        };
        self.calibration[idx] = Some(curve);
        self.diag.calibration_valid = true;
        Ok(curve)
    }

    fn read_raw_inner(&mut self, channel: ChannelId) -> AdcResult<u16> {
        if self.continuous_running {
            return Err(AdcError::ContinuousModeActive);
        }
        if channel as usize >= ADC_CHANNELS {
            return Err(AdcError::InvalidChannel);
        }
        if !self.enabled[channel as usize] {
            return Err(AdcError::ChannelNotEnabled);
        }
        self.port
            .read_oneshot(channel)
            .map_err(Self::convert_port_error)
    }
}

impl<P: AdcOps> Peripheral for AdcUnit<P> {
    type Error = AdcError;

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn initialize(&mut self) -> AdcResult<()> {
        if self.initialized {
            return Err(AdcError::AlreadyInitialized);
        }
        self.port
            .setup_oneshot(self.config.unit_id)
            .map_err(Self::convert_port_error)?;
        self.initialized = true;
        Ok(())
    }

    fn deinitialize(&mut self) -> AdcResult<()> {
        if !self.initialized {
            return Err(AdcError::NotInitialized);
        }
        if self.continuous_running {
            self.port
                .stop_continuous()
                .map_err(Self::convert_port_error)?;
            self.continuous_running = false;
        }
        self.port.teardown().map_err(Self::convert_port_error)?;
        self.initialized = false;
        Ok(())
    }
}

impl<P: AdcOps> Adc for AdcUnit<P> {
    fn unit_id(&self) -> HostId {
        self.config.unit_id
    }

    fn configure_channel(&mut self, channel: ChannelId, config: AdcChannelConfig) -> AdcResult<()> {
        self.ready()?;
        if channel as usize >= ADC_CHANNELS {
            return Err(AdcError::InvalidChannel);
        }
        self.port
            .configure_channel(channel, config.attenuation, config.bit_width)
            .map_err(Self::convert_port_error)?;
        self.channels[channel as usize] = Some(config);
        Ok(())
    }

    fn enable_channel(&mut self, channel: ChannelId) -> AdcResult<()> {
        self.ready()?;
        self.channel_config(channel)?;
        self.enabled[channel as usize] = true;
        Ok(())
    }

    fn disable_channel(&mut self, channel: ChannelId) -> AdcResult<()> {
        self.ready()?;
        if channel as usize >= ADC_CHANNELS {
            return Err(AdcError::InvalidChannel);
        }
        self.enabled[channel as usize] = false;
        Ok(())
    }

    fn is_channel_enabled(&self, channel: ChannelId) -> bool {
        self.enabled
            .get(channel as usize)
            .copied()
            .unwrap_or(false)
    }

    fn read_raw(&mut self, channel: ChannelId) -> AdcResult<u16> {
        self.ready()?;
        let result = self.read_raw_inner(channel);
        self.record(result)
    }

    fn read_voltage(&mut self, channel: ChannelId) -> AdcResult<u32> {
        self.ready()?;
        let result = (|| {
            let config = self.channel_config(channel)?;
            let raw = self.read_raw_inner(channel)?;
            let curve = self.curve_for(config.attenuation)?;
            Ok(curve.raw_to_mv(raw))
        })();
        self.record(result)
    }

    fn read_averaged(
        &mut self,
        channel: ChannelId,
        samples: u16,
        interval_ms: u32,
    ) -> AdcResult<u16> {
        self.ready()?;
        if samples == 0 {
            return self.record(Err(AdcError::InvalidParameter));
        }
        let result = (|| {
            let mut sum: u32 = 0;
            for i in 0..samples {
                sum += self.read_raw_inner(channel)? as u32;
                if interval_ms > 0 && i + 1 < samples {
                    self.port.delay_ms(interval_ms);
                }
            }
            Ok((sum / samples as u32) as u16)
        })();
        self.record(result)
    }

    fn read_multiple_channels(
        &mut self,
        channels: &[ChannelId],
        raw_out: &mut [u16],
        voltage_out: &mut [u32],
    ) -> AdcResult<()> {
        self.ready()?;
        if raw_out.len() < channels.len() || voltage_out.len() < channels.len() {
            return self.record(Err(AdcError::InvalidParameter));
        }
        // All-or-nothing: the first failing channel aborts the pass and
        // leaves the remaining outputs untouched.
        let result = (|| {
            for (i, &channel) in channels.iter().enumerate() {
                let raw = self.read_raw_inner(channel)?;
                raw_out[i] = raw;
                let attenuation = self.channel_config(channel)?.attenuation;
                voltage_out[i] = match self.curve_for(attenuation) {
                    Ok(curve) => curve.raw_to_mv(raw),
                    Err(AdcError::CalibrationNotAvailable) => 0,
                    Err(e) => return Err(e),
                };
            }
            Ok(())
        })();
        self.record(result)
    }

    fn initialize_calibration(&mut self, attenuation: AdcAttenuation) -> AdcResult<()> {
        self.ready()?;
        self.curve_for(attenuation).map(|_| ())
    }

    fn raw_to_voltage(&self, raw: u16, attenuation: AdcAttenuation) -> AdcResult<u32> {
        let idx = Self::attenuation_index(attenuation);
        let curve = self.calibration[idx].ok_or(AdcError::CalibrationNotAvailable)?;
        Ok(curve.raw_to_mv(raw))
    }

    fn configure_continuous(&mut self, config: AdcContinuousConfig) -> AdcResult<()> {
        self.ready()?;
        if self.continuous_running {
            return Err(AdcError::ContinuousModeActive);
        }
        if config.sample_freq_hz == 0
            || config.samples_per_frame == 0
            || config.samples_per_frame > 256
            || config.max_store_frames == 0
        {
            return Err(AdcError::InvalidConfiguration);
        }
        self.config.continuous = config;
        Ok(())
    }

    fn set_continuous_callback(&mut self, callback: AdcContinuousCallback, user: usize) {
        self.continuous_callback = Some((callback, user));
    }

    fn clear_continuous_callback(&mut self) {
        self.continuous_callback = None;
    }

    fn start_continuous(&mut self) -> AdcResult<()> {
        self.ready()?;
        if self.continuous_running {
            return Err(AdcError::ContinuousModeActive);
        }
        let mut active: Vec<ChannelId, ADC_CHANNELS> = Vec::new();
        for channel in 0..ADC_CHANNELS {
            if self.enabled[channel] {
                let _ = active.push(channel as ChannelId);
            }
        }
        if active.is_empty() {
            return Err(AdcError::ChannelNotEnabled);
        }
        self.port
            .start_continuous(&self.config.continuous, &active, self.continuous_callback)
            .map_err(Self::convert_port_error)?;
        self.continuous_running = true;
        Ok(())
    }

    fn stop_continuous(&mut self) -> AdcResult<()> {
        self.ready()?;
        if !self.continuous_running {
            return Err(AdcError::ContinuousModeNotActive);
        }
        // Synchronous: no frame callback fires past this point.
        self.port
            .stop_continuous()
            .map_err(Self::convert_port_error)?;
        self.continuous_running = false;
        Ok(())
    }

    fn is_continuous_running(&self) -> bool {
        self.continuous_running
    }

    fn configure_iir_filter(
        &mut self,
        channel: ChannelId,
        coefficient: AdcIirCoefficient,
    ) -> AdcResult<()> {
        self.ready()?;
        self.channel_config(channel)?;
        self.port
            .configure_iir(channel, coefficient)
            .map_err(Self::convert_port_error)
    }

    fn configure_monitor(
        &mut self,
        config: AdcMonitorConfig,
        callback: AdcMonitorCallback,
        user: usize,
    ) -> AdcResult<()> {
        self.ready()?;
        if config.low_threshold >= config.high_threshold {
            return Err(AdcError::InvalidParameter);
        }
        self.channel_config(config.channel)?;
        self.port
            .configure_monitor(&config, callback, user)
            .map_err(Self::convert_port_error)
    }

    fn disable_monitor(&mut self, channel: ChannelId) -> AdcResult<()> {
        self.ready()?;
        self.port
            .disable_monitor(channel)
            .map_err(Self::convert_port_error)
    }

    fn configure_oversampling(&mut self, ratio: u16) -> AdcResult<()> {
        self.ready()?;
        if !ratio.is_power_of_two() || ratio > 256 {
            return Err(AdcError::InvalidParameter);
        }
        self.port
            .configure_oversampling(ratio)
            .map_err(Self::convert_port_error)
    }

    fn statistics(&self) -> AdcStatistics {
        self.stats
    }

    fn reset_statistics(&mut self) {
        self.stats = AdcStatistics::default();
    }

    fn diagnostics(&self) -> AdcDiagnostics {
        self.diag
    }

    fn reset_diagnostics(&mut self) {
        self.diag = AdcDiagnostics::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::soft::SoftAdc;
    use kinesis_hal::adc::{AdcSample, AdcThresholdEvent};

    use core::sync::atomic::{AtomicUsize, Ordering};

    fn unit() -> AdcUnit<SoftAdc> {
        AdcUnit::new(SoftAdc::new(), AdcConfig::default())
    }

    fn unit_with_channel(channel: ChannelId, raw: u16) -> AdcUnit<SoftAdc> {
        let mut adc = unit();
        adc.configure_channel(channel, AdcChannelConfig::default())
            .unwrap();
        adc.enable_channel(channel).unwrap();
        adc.port_mut().set_channel_raw(channel, raw);
        adc
    }

    #[test]
    fn test_lazy_init() {
        let mut adc = unit();
        assert!(!adc.is_initialized());
        adc.configure_channel(0, AdcChannelConfig::default()).unwrap();
        assert!(adc.is_initialized());
        assert_eq!(adc.initialize(), Err(AdcError::AlreadyInitialized));
    }

    #[test]
    fn test_read_requires_enabled_channel() {
        let mut adc = unit();
        adc.configure_channel(0, AdcChannelConfig::default()).unwrap();
        assert_eq!(adc.read_raw(0), Err(AdcError::ChannelNotEnabled));
        adc.enable_channel(0).unwrap();
        adc.read_raw(0).unwrap();
        adc.disable_channel(0).unwrap();
        assert_eq!(adc.read_raw(0), Err(AdcError::ChannelNotEnabled));
    }

    #[test]
    fn test_read_raw_and_voltage() {
        let mut adc = unit_with_channel(2, 2048);
        assert_eq!(adc.read_raw(2), Ok(2048));
        // 12 dB attenuation spans ~3300 mV over 4095 counts
        let mv = adc.read_voltage(2).unwrap();
        assert!((1640..=1660).contains(&mv), "mv={mv}");
    }

    #[test]
    fn test_calibration_not_available() {
        let mut adc = unit_with_channel(0, 100);
        adc.port_mut().calibration_available = false;
        assert_eq!(adc.read_voltage(0), Err(AdcError::CalibrationNotAvailable));
        assert_eq!(
            adc.raw_to_voltage(100, AdcAttenuation::Db12),
            Err(AdcError::CalibrationNotAvailable)
        );
    }

    #[test]
    fn test_read_averaged() {
        let mut adc = unit_with_channel(1, 1000);
        assert_eq!(adc.read_averaged(1, 8, 1), Ok(1000));
        assert_eq!(adc.read_averaged(1, 0, 1), Err(AdcError::InvalidParameter));
    }

    #[test]
    fn test_multi_channel_all_or_nothing() {
        let mut adc = unit_with_channel(0, 500);
        adc.configure_channel(1, AdcChannelConfig::default()).unwrap();
        adc.enable_channel(1).unwrap();
        adc.port_mut().set_channel_raw(1, 700);

        let channels = [0, 1];
        let mut raw = [0u16; 2];
        let mut mv = [0u32; 2];
        adc.read_multiple_channels(&channels, &mut raw, &mut mv)
            .unwrap();
        assert_eq!(raw, [500, 700]);
        assert!(mv[0] > 0 && mv[1] > 0);

        // Channel 3 was never enabled: the pass fails and output slots
        // past the failure stay untouched.
        let channels = [3, 0];
        let mut raw = [0xFFFF; 2];
        let mut mv = [0xDEAD_BEEF; 2];
        assert_eq!(
            adc.read_multiple_channels(&channels, &mut raw, &mut mv),
            Err(AdcError::ChannelNotEnabled)
        );
        assert_eq!(raw[1], 0xFFFF);
        assert_eq!(mv[1], 0xDEAD_BEEF);
    }

    #[test]
    fn test_continuous_excludes_oneshot() {
        static FRAMES: AtomicUsize = AtomicUsize::new(0);
        fn on_frame(samples: &[AdcSample], _user: usize) -> bool {
            FRAMES.fetch_add(samples.len(), Ordering::Relaxed);
            false
        }

        let mut adc = unit_with_channel(0, 123);
        adc.configure_continuous(AdcContinuousConfig {
            sample_freq_hz: 20_000,
            samples_per_frame: 16,
            max_store_frames: 4,
        })
        .unwrap();
        adc.set_continuous_callback(on_frame, 0);
        adc.start_continuous().unwrap();
        assert!(adc.is_continuous_running());
        assert_eq!(adc.read_raw(0), Err(AdcError::ContinuousModeActive));
        assert_eq!(adc.start_continuous(), Err(AdcError::ContinuousModeActive));

        adc.port_mut().emit_frames(2);
        assert_eq!(FRAMES.load(Ordering::Relaxed), 32);

        adc.stop_continuous().unwrap();
        // Synchronous stop: nothing fires afterwards
        adc.port_mut().emit_frames(1);
        assert_eq!(FRAMES.load(Ordering::Relaxed), 32);
        adc.read_raw(0).unwrap();
    }

    #[test]
    fn test_continuous_requires_enabled_channel() {
        let mut adc = unit();
        adc.initialize().unwrap();
        assert_eq!(adc.start_continuous(), Err(AdcError::ChannelNotEnabled));
    }

    #[test]
    fn test_monitor_fires_on_crossing() {
        static EVENTS: AtomicUsize = AtomicUsize::new(0);
        fn on_threshold(channel: ChannelId, event: AdcThresholdEvent, _user: usize) {
            assert_eq!(channel, 0);
            if event == AdcThresholdEvent::AboveHigh {
                EVENTS.fetch_add(1, Ordering::Relaxed);
            }
        }

        let mut adc = unit_with_channel(0, 3000);
        adc.configure_monitor(
            AdcMonitorConfig {
                channel: 0,
                low_threshold: 100,
                high_threshold: 2000,
            },
            on_threshold,
            0,
        )
        .unwrap();
        adc.read_raw(0).unwrap();
        // Repeated reads on the same side fire once
        adc.read_raw(0).unwrap();
        assert_eq!(EVENTS.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_monitor_threshold_ordering() {
        let mut adc = unit_with_channel(0, 0);
        fn noop(_: ChannelId, _: AdcThresholdEvent, _: usize) {}
        assert_eq!(
            adc.configure_monitor(
                AdcMonitorConfig {
                    channel: 0,
                    low_threshold: 2000,
                    high_threshold: 100,
                },
                noop,
                0,
            ),
            Err(AdcError::InvalidParameter)
        );
    }

    #[test]
    fn test_oversampling_validation() {
        let mut adc = unit();
        adc.initialize().unwrap();
        adc.configure_oversampling(16).unwrap();
        assert_eq!(adc.configure_oversampling(3), Err(AdcError::InvalidParameter));
        assert_eq!(
            adc.configure_oversampling(512),
            Err(AdcError::InvalidParameter)
        );
    }

    #[test]
    fn test_statistics_track_conversions() {
        let mut adc = unit_with_channel(0, 10);
        adc.read_raw(0).unwrap();
        let _ = adc.read_raw(7);
        let stats = adc.statistics();
        assert_eq!(stats.successful_conversions, 1);
        assert_eq!(stats.failed_conversions, 1);
    }
}
