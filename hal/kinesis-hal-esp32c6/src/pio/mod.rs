//! RMT symbol engine driver
//!
//! Four channels of level/duration symbol streams at configurable
//! resolution. Oversized durations split across raw words on the way to
//! the hardware; a stream that does not fit the channel's symbol memory
//! is rejected whole. The WS2812 byte encoder streams through dedicated
//! hardware and is not bounded by channel memory.

pub mod ws2812;

use heapless::Vec;

use kinesis_hal::peripheral::Peripheral;
use kinesis_hal::pio::{
    pack_raw, unpack_raw, Pio, PioAdvancedConfig, PioCapabilities, PioChannelConfig,
    PioChannelState, PioChannelStatus, PioDiagnostics, PioDirection, PioError, PioErrorCallback,
    PioReceiveCallback, PioResult, PioStatistics, PioSymbol, PioTransmitCallback, RawSymbol,
    Ws2812Timing, MAX_RAW_DURATION_TICKS,
};
use kinesis_hal::types::{is_valid_pin, FrequencyHz, TIMEOUT_FOREVER};

use crate::port::{PortClock, PortError, RmtOps, RMT_SYMBOLS_PER_BLOCK};

use ws2812::{Ws2812Encoder, MAX_ENCODED_WORDS};

/// Channels on this SoC's RMT block.
pub const RMT_CHANNEL_COUNT: usize = 4;

/// Upper bound on one converted transmit stream.
const MAX_TX_WORDS: usize = 512;

/// Captured symbols kept per channel.
const MAX_RX_SYMBOLS: usize = 256;

struct ChannelSlot {
    config: PioChannelConfig,
    advanced: PioAdvancedConfig,
    state: PioChannelState,
    loopback: bool,
    carrier_hz: FrequencyHz,
    tx_cb: Option<(PioTransmitCallback, usize)>,
    rx_cb: Option<(PioReceiveCallback, usize)>,
    err_cb: Option<(PioErrorCallback, usize)>,
    encoder: Option<Ws2812Encoder>,
    received: Vec<PioSymbol, MAX_RX_SYMBOLS>,
    stats: PioStatistics,
    diag: PioDiagnostics,
}

impl ChannelSlot {
    fn new(config: PioChannelConfig, advanced: PioAdvancedConfig) -> Self {
        Self {
            config,
            advanced,
            state: PioChannelState::Idle,
            loopback: false,
            carrier_hz: 0,
            tx_cb: None,
            rx_cb: None,
            err_cb: None,
            encoder: None,
            received: Vec::new(),
            stats: PioStatistics::default(),
            diag: PioDiagnostics::default(),
        }
    }

    fn memory_symbols(&self) -> usize {
        self.advanced.memory_blocks as usize * RMT_SYMBOLS_PER_BLOCK
    }
}

/// RMT-backed symbol engine.
pub struct RmtPio<P: RmtOps> {
    port: P,
    initialized: bool,
    channels: [Option<ChannelSlot>; RMT_CHANNEL_COUNT],
}

impl<P: RmtOps> RmtPio<P> {
    pub fn new(port: P) -> Self {
        Self {
            port,
            initialized: false,
            channels: [None, None, None, None],
        }
    }

    /// Direct access to the native port (simulation and test hook).
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    fn convert_port_error(err: PortError) -> PioError {
        match err {
            PortError::Fail => PioError::Failure,
            PortError::NoMem => PioError::OutOfMemory,
            PortError::InvalidArg => PioError::InvalidParameter,
            PortError::InvalidState => PioError::InvalidConfiguration,
            PortError::NotFound => PioError::InvalidChannel,
            PortError::NotSupported => PioError::UnsupportedOperation,
            PortError::Timeout => PioError::Timeout,
            PortError::Busy => PioError::ChannelBusy,
        }
    }

    fn ready(&mut self) -> PioResult<()> {
        if self.ensure_initialized().is_err() {
            return Err(PioError::NotInitialized);
        }
        Ok(())
    }

    fn slot(&mut self, channel: u8) -> PioResult<&mut ChannelSlot> {
        self.channels
            .get_mut(channel as usize)
            .ok_or(PioError::InvalidChannel)?
            .as_mut()
            .ok_or(PioError::ChannelNotConfigured)
    }

    fn resolution_hz(config: &PioChannelConfig) -> FrequencyHz {
        (1_000_000_000u64 / config.resolution_ns as u64) as FrequencyHz
    }

    /// Pack a symbol stream, splitting oversized durations.
    fn symbols_to_raw(symbols: &[PioSymbol]) -> PioResult<Vec<RawSymbol, MAX_TX_WORDS>> {
        let mut halves: Vec<PioSymbol, { MAX_TX_WORDS * 2 }> = Vec::new();
        for symbol in symbols {
            if symbol.duration_ticks == 0 {
                return Err(PioError::InvalidParameter);
            }
            let mut remaining = symbol.duration_ticks;
            while remaining > 0 {
                let chunk = remaining.min(MAX_RAW_DURATION_TICKS);
                remaining -= chunk;
                halves
                    .push(PioSymbol::new(chunk, symbol.level))
                    .map_err(|_| PioError::BufferOverflow)?;
            }
        }
        let mut raw = Vec::new();
        let mut iter = halves.chunks_exact(2);
        for pair in iter.by_ref() {
            raw.push(pack_raw(pair[0], pair[1]))
                .map_err(|_| PioError::BufferOverflow)?;
        }
        if let [last] = iter.remainder() {
            // Zero-duration half terminates the stream.
            raw.push(pack_raw(*last, PioSymbol::new(0, false)))
                .map_err(|_| PioError::BufferOverflow)?;
        }
        Ok(raw)
    }

    /// Unpack captured raw words, dropping terminator halves.
    fn raw_to_symbols(raw: &[RawSymbol], out: &mut Vec<PioSymbol, MAX_RX_SYMBOLS>) {
        for &word in raw {
            let (a, b) = unpack_raw(word);
            for half in [a, b] {
                if half.duration_ticks > 0 {
                    let _ = out.push(half);
                }
            }
        }
    }

    fn finish_transmit(&mut self, channel: u8, symbols_sent: usize) {
        let now = self.port.now_us();
        if let Ok(slot) = self.slot(channel) {
            slot.state = PioChannelState::Idle;
            slot.stats.transmissions += 1;
            slot.stats.symbols_transmitted += symbols_sent as u64;
            slot.stats.last_activity_us = now;
            let cb = slot.tx_cb;
            if let Some((cb, user)) = cb {
                cb(channel, user);
            }
        }
    }

    fn note_error(&mut self, channel: u8, err: PioError) {
        let now = self.port.now_us();
        if let Ok(slot) = self.slot(channel) {
            slot.diag.last_error = Some(err);
            slot.diag.last_error_us = now;
            slot.diag.consecutive_errors += 1;
            let cb = slot.err_cb;
            if let Some((cb, user)) = cb {
                cb(channel, err, user);
            }
        }
    }

    fn transmit_words(
        &mut self,
        channel: u8,
        raw: &[RawSymbol],
        symbols_sent: usize,
        wait: bool,
        encoded: bool,
    ) -> PioResult<()> {
        let slot = self.slot(channel)?;
        if slot.config.direction != PioDirection::Transmit {
            return Err(PioError::InvalidConfiguration);
        }
        match slot.state {
            PioChannelState::Idle => {}
            PioChannelState::BusyTransmit | PioChannelState::BusyReceive => {
                return Err(PioError::ChannelBusy)
            }
            PioChannelState::Unconfigured => return Err(PioError::ChannelNotConfigured),
        }
        if !encoded && raw.len() > slot.memory_symbols() {
            return Err(PioError::BufferOverflow);
        }
        slot.state = PioChannelState::BusyTransmit;
        let result = if encoded {
            self.port.transmit_encoded(channel, raw)
        } else {
            self.port.transmit(channel, raw)
        };
        if let Err(e) = result {
            let err = Self::convert_port_error(e);
            if let Ok(slot) = self.slot(channel) {
                slot.state = PioChannelState::Idle;
                slot.stats.transmit_failures += 1;
            }
            self.note_error(channel, err);
            return Err(err);
        }
        if wait {
            self.port
                .wait_tx_done(channel, TIMEOUT_FOREVER)
                .map_err(Self::convert_port_error)?;
            self.finish_transmit(channel, symbols_sent);
        } else if self.port.is_tx_done(channel) {
            self.finish_transmit(channel, symbols_sent);
        }
        Ok(())
    }
}

impl<P: RmtOps> Peripheral for RmtPio<P> {
    type Error = PioError;

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn initialize(&mut self) -> PioResult<()> {
        if self.initialized {
            return Err(PioError::AlreadyInitialized);
        }
        self.initialized = true;
        Ok(())
    }

    fn deinitialize(&mut self) -> PioResult<()> {
        if !self.initialized {
            return Err(PioError::NotInitialized);
        }
        for channel in 0..RMT_CHANNEL_COUNT as u8 {
            if self.channels[channel as usize].is_some() {
                let _ = self.port.delete_channel(channel);
                self.channels[channel as usize] = None;
            }
        }
        self.initialized = false;
        Ok(())
    }
}

impl<P: RmtOps> Pio for RmtPio<P> {
    fn configure_channel(&mut self, channel: u8, config: PioChannelConfig) -> PioResult<()> {
        self.ready()?;
        let caps = self.capabilities();
        if channel as usize >= RMT_CHANNEL_COUNT {
            return Err(PioError::InvalidChannel);
        }
        if !is_valid_pin(config.gpio_pin) {
            return Err(PioError::InvalidPin);
        }
        if config.resolution_ns < caps.min_resolution_ns
            || config.resolution_ns > caps.max_resolution_ns
        {
            return Err(PioError::InvalidResolution);
        }
        if config.buffer_size == 0 || config.buffer_size > caps.max_buffer_size {
            return Err(PioError::InvalidParameter);
        }
        if let Some(slot) = &self.channels[channel as usize] {
            if slot.state == PioChannelState::BusyTransmit
                || slot.state == PioChannelState::BusyReceive
            {
                return Err(PioError::ChannelBusy);
            }
            self.port
                .delete_channel(channel)
                .map_err(Self::convert_port_error)?;
            self.channels[channel as usize] = None;
        }
        let advanced = PioAdvancedConfig::default();
        let resolution_hz = Self::resolution_hz(&config);
        match config.direction {
            PioDirection::Transmit => self
                .port
                .create_tx_channel(
                    channel,
                    config.gpio_pin,
                    resolution_hz,
                    advanced.memory_blocks,
                    advanced.queue_depth,
                    advanced.enable_dma,
                )
                .map_err(Self::convert_port_error)?,
            PioDirection::Receive => self
                .port
                .create_rx_channel(
                    channel,
                    config.gpio_pin,
                    resolution_hz,
                    advanced.memory_blocks,
                    config.buffer_size,
                )
                .map_err(Self::convert_port_error)?,
        }
        self.channels[channel as usize] = Some(ChannelSlot::new(config, advanced));
        Ok(())
    }

    fn transmit(&mut self, channel: u8, symbols: &[PioSymbol], wait: bool) -> PioResult<()> {
        self.ready()?;
        if symbols.is_empty() {
            return Err(PioError::InvalidParameter);
        }
        let raw = Self::symbols_to_raw(symbols)?;
        self.transmit_words(channel, &raw, symbols.len(), wait, false)
    }

    fn start_receive(&mut self, channel: u8) -> PioResult<()> {
        self.ready()?;
        let slot = self.slot(channel)?;
        if slot.config.direction != PioDirection::Receive && !slot.loopback {
            return Err(PioError::InvalidConfiguration);
        }
        match slot.state {
            PioChannelState::Idle => {}
            _ => return Err(PioError::ChannelBusy),
        }
        let timeout_us = slot.config.timeout_us;
        slot.state = PioChannelState::BusyReceive;
        if let Err(e) = self.port.start_receive(channel, timeout_us) {
            let err = Self::convert_port_error(e);
            if let Ok(slot) = self.slot(channel) {
                slot.state = PioChannelState::Idle;
            }
            return Err(err);
        }
        Ok(())
    }

    fn stop_receive(&mut self, channel: u8) -> PioResult<usize> {
        self.ready()?;
        let slot = self.slot(channel)?;
        if slot.state != PioChannelState::BusyReceive {
            return Err(PioError::ChannelNotBusy);
        }
        let raw_count = self
            .port
            .stop_receive(channel)
            .map_err(Self::convert_port_error)?;
        let mut raw_buf: Vec<RawSymbol, MAX_RX_SYMBOLS> = Vec::new();
        let take = raw_count.min(MAX_RX_SYMBOLS);
        raw_buf
            .resize(take, 0)
            .map_err(|_| PioError::BufferOverflow)?;
        self.port
            .read_received(channel, &mut raw_buf)
            .map_err(Self::convert_port_error)?;

        let mut symbols: Vec<PioSymbol, MAX_RX_SYMBOLS> = Vec::new();
        Self::raw_to_symbols(&raw_buf, &mut symbols);

        let now = self.port.now_us();
        let slot = self.slot(channel)?;
        slot.state = PioChannelState::Idle;
        slot.received.clear();
        let keep = symbols.len().min(slot.config.buffer_size);
        let _ = slot.received.extend_from_slice(&symbols[..keep]);
        slot.stats.receptions += 1;
        slot.stats.symbols_received += keep as u64;
        if symbols.len() > keep {
            slot.stats.receive_overflows += 1;
        }
        slot.stats.last_activity_us = now;
        let cb = slot.rx_cb;
        let count = slot.received.len();
        if let Some((cb, user)) = cb {
            // Borrow is only valid for the duration of the call.
            let slot = self.slot(channel)?;
            cb(channel, &slot.received, user);
        }
        Ok(count)
    }

    fn read_received(&mut self, channel: u8, out: &mut [PioSymbol]) -> PioResult<usize> {
        self.ready()?;
        let slot = self.slot(channel)?;
        let n = slot.received.len().min(out.len());
        out[..n].copy_from_slice(&slot.received[..n]);
        Ok(n)
    }

    fn is_channel_busy(&self, channel: u8) -> bool {
        self.channels
            .get(channel as usize)
            .and_then(|s| s.as_ref())
            .map(|s| {
                matches!(
                    s.state,
                    PioChannelState::BusyTransmit | PioChannelState::BusyReceive
                )
            })
            .unwrap_or(false)
    }

    fn channel_status(&self, channel: u8) -> PioResult<PioChannelStatus> {
        let slot = self
            .channels
            .get(channel as usize)
            .ok_or(PioError::InvalidChannel)?
            .as_ref()
            .ok_or(PioError::ChannelNotConfigured)?;
        Ok(PioChannelStatus {
            state: slot.state,
            direction: slot.config.direction,
            resolution_ns: slot.config.resolution_ns,
            symbols_queued: 0,
            symbols_received: slot.received.len(),
            carrier_enabled: slot.carrier_hz > 0,
        })
    }

    fn capabilities(&self) -> PioCapabilities {
        PioCapabilities {
            max_channels: RMT_CHANNEL_COUNT as u8,
            tx_channels: 2,
            rx_channels: 2,
            min_resolution_ns: 25,
            max_resolution_ns: 1_000_000,
            max_duration_ticks: MAX_RAW_DURATION_TICKS,
            symbols_per_block: RMT_SYMBOLS_PER_BLOCK,
            max_buffer_size: MAX_RX_SYMBOLS,
            supports_dma: false,
            supports_carrier: true,
            supports_loopback: true,
        }
    }

    fn set_transmit_callback(&mut self, channel: u8, callback: PioTransmitCallback, user: usize) {
        if let Ok(slot) = self.slot(channel) {
            slot.tx_cb = Some((callback, user));
        }
    }

    fn set_receive_callback(&mut self, channel: u8, callback: PioReceiveCallback, user: usize) {
        if let Ok(slot) = self.slot(channel) {
            slot.rx_cb = Some((callback, user));
        }
    }

    fn set_error_callback(&mut self, channel: u8, callback: PioErrorCallback, user: usize) {
        if let Ok(slot) = self.slot(channel) {
            slot.err_cb = Some((callback, user));
        }
    }

    fn clear_channel_callbacks(&mut self, channel: u8) {
        if let Ok(slot) = self.slot(channel) {
            slot.tx_cb = None;
            slot.rx_cb = None;
            slot.err_cb = None;
        }
    }

    fn clear_callbacks(&mut self) {
        for channel in 0..RMT_CHANNEL_COUNT as u8 {
            self.clear_channel_callbacks(channel);
        }
    }

    fn transmit_raw_symbols(&mut self, channel: u8, raw: &[RawSymbol], wait: bool) -> PioResult<()> {
        self.ready()?;
        if raw.is_empty() {
            return Err(PioError::InvalidParameter);
        }
        let mut symbols = 0;
        for &word in raw {
            let (a, b) = unpack_raw(word);
            symbols += (a.duration_ticks > 0) as usize + (b.duration_ticks > 0) as usize;
        }
        self.transmit_words(channel, raw, symbols, wait, false)
    }

    fn receive_raw_symbols(
        &mut self,
        channel: u8,
        raw: &mut [RawSymbol],
        timeout_us: u32,
    ) -> PioResult<usize> {
        self.ready()?;
        let slot = self.slot(channel)?;
        match slot.state {
            PioChannelState::BusyReceive => {
                // Drain an already-armed capture.
            }
            PioChannelState::Idle => {
                if slot.config.direction != PioDirection::Receive && !slot.loopback {
                    return Err(PioError::InvalidConfiguration);
                }
                slot.state = PioChannelState::BusyReceive;
                if let Err(e) = self.port.start_receive(channel, timeout_us) {
                    let err = Self::convert_port_error(e);
                    if let Ok(slot) = self.slot(channel) {
                        slot.state = PioChannelState::Idle;
                    }
                    return Err(err);
                }
            }
            _ => return Err(PioError::ChannelBusy),
        }
        let count = self
            .port
            .stop_receive(channel)
            .map_err(Self::convert_port_error)?;
        let n = self
            .port
            .read_received(channel, raw)
            .map_err(Self::convert_port_error)?;
        let slot = self.slot(channel)?;
        slot.state = PioChannelState::Idle;
        slot.stats.receptions += 1;
        slot.stats.symbols_received += n as u64;
        let _ = count;
        Ok(n)
    }

    fn configure_advanced(&mut self, channel: u8, config: PioAdvancedConfig) -> PioResult<()> {
        self.ready()?;
        if config.enable_dma {
            // No RMT DMA on this SoC.
            return Err(PioError::UnsupportedOperation);
        }
        if config.memory_blocks == 0 || config.memory_blocks > 4 {
            return Err(PioError::InvalidParameter);
        }
        if config.queue_depth == 0 || config.queue_depth > 16 {
            return Err(PioError::InvalidParameter);
        }
        let slot = self.slot(channel)?;
        if slot.state != PioChannelState::Idle {
            return Err(PioError::ChannelBusy);
        }
        let channel_config = slot.config;
        let resolution_hz = Self::resolution_hz(&channel_config);
        self.port
            .delete_channel(channel)
            .map_err(Self::convert_port_error)?;
        match channel_config.direction {
            PioDirection::Transmit => self
                .port
                .create_tx_channel(
                    channel,
                    channel_config.gpio_pin,
                    resolution_hz,
                    config.memory_blocks,
                    config.queue_depth,
                    config.enable_dma,
                )
                .map_err(Self::convert_port_error)?,
            PioDirection::Receive => self
                .port
                .create_rx_channel(
                    channel,
                    channel_config.gpio_pin,
                    resolution_hz,
                    config.memory_blocks,
                    channel_config.buffer_size,
                )
                .map_err(Self::convert_port_error)?,
        }
        let slot = self.slot(channel)?;
        slot.advanced = config;
        Ok(())
    }

    fn configure_carrier(&mut self, channel: u8, freq_hz: FrequencyHz, duty: f32) -> PioResult<()> {
        self.ready()?;
        if !(0.0..=1.0).contains(&duty) {
            return Err(PioError::InvalidParameter);
        }
        let _ = self.slot(channel)?;
        self.port
            .configure_carrier(channel, freq_hz, duty)
            .map_err(Self::convert_port_error)?;
        let slot = self.slot(channel)?;
        slot.carrier_hz = freq_hz;
        Ok(())
    }

    fn enable_loopback(&mut self, channel: u8, enable: bool) -> PioResult<()> {
        self.ready()?;
        let _ = self.slot(channel)?;
        self.port
            .set_loopback(channel, enable)
            .map_err(Self::convert_port_error)?;
        let slot = self.slot(channel)?;
        slot.loopback = enable;
        Ok(())
    }

    fn create_ws2812_encoder(
        &mut self,
        channel: u8,
        resolution_hz: FrequencyHz,
        timing: Ws2812Timing,
    ) -> PioResult<()> {
        self.ready()?;
        let slot = self.slot(channel)?;
        if slot.config.direction != PioDirection::Transmit {
            return Err(PioError::InvalidConfiguration);
        }
        slot.encoder = Some(Ws2812Encoder::new(resolution_hz, timing)?);
        Ok(())
    }

    fn transmit_ws2812(&mut self, channel: u8, grb_bytes: &[u8], wait: bool) -> PioResult<()> {
        self.ready()?;
        if grb_bytes.is_empty() {
            return Err(PioError::InvalidParameter);
        }
        let slot = self.slot(channel)?;
        let encoder = slot.encoder.ok_or(PioError::EncoderNotConfigured)?;
        let mut words: Vec<RawSymbol, MAX_ENCODED_WORDS> = Vec::new();
        encoder.encode(grb_bytes, &mut words)?;
        let symbols = grb_bytes.len() * 8;
        self.transmit_words(channel, &words, symbols, wait, true)
    }

    fn statistics(&self, channel: u8) -> PioResult<PioStatistics> {
        let slot = self
            .channels
            .get(channel as usize)
            .ok_or(PioError::InvalidChannel)?
            .as_ref()
            .ok_or(PioError::ChannelNotConfigured)?;
        Ok(slot.stats)
    }

    fn reset_statistics(&mut self, channel: u8) -> PioResult<()> {
        let slot = self.slot(channel)?;
        slot.stats = PioStatistics::default();
        Ok(())
    }

    fn diagnostics(&self, channel: u8) -> PioResult<PioDiagnostics> {
        let slot = self
            .channels
            .get(channel as usize)
            .ok_or(PioError::InvalidChannel)?
            .as_ref()
            .ok_or(PioError::ChannelNotConfigured)?;
        Ok(slot.diag)
    }

    fn reset_diagnostics(&mut self, channel: u8) -> PioResult<()> {
        let slot = self.slot(channel)?;
        slot.diag = PioDiagnostics::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::soft::SoftRmt;

    use core::sync::atomic::{AtomicUsize, Ordering};

    fn tx_config(pin: i32) -> PioChannelConfig {
        PioChannelConfig {
            gpio_pin: pin,
            direction: PioDirection::Transmit,
            resolution_ns: 1000,
            ..PioChannelConfig::default()
        }
    }

    fn rx_config(pin: i32) -> PioChannelConfig {
        PioChannelConfig {
            gpio_pin: pin,
            direction: PioDirection::Receive,
            ..PioChannelConfig::default()
        }
    }

    fn engine() -> RmtPio<SoftRmt> {
        let mut pio = RmtPio::new(SoftRmt::new());
        pio.initialize().unwrap();
        pio
    }

    fn loopback_tx(pio: &mut RmtPio<SoftRmt>, channel: u8) {
        pio.configure_channel(channel, tx_config(10)).unwrap();
        pio.enable_loopback(channel, true).unwrap();
    }

    #[test]
    fn test_configure_validates_bounds() {
        let mut pio = engine();
        assert_eq!(
            pio.configure_channel(9, tx_config(10)),
            Err(PioError::InvalidChannel)
        );
        let mut bad = tx_config(10);
        bad.resolution_ns = 1;
        assert_eq!(
            pio.configure_channel(0, bad),
            Err(PioError::InvalidResolution)
        );
        let mut bad_pin = tx_config(-1);
        bad_pin.gpio_pin = -1;
        assert_eq!(pio.configure_channel(0, bad_pin), Err(PioError::InvalidPin));
    }

    #[test]
    fn test_transmit_requires_configuration() {
        let mut pio = engine();
        let syms = [PioSymbol::high(10)];
        assert_eq!(
            pio.transmit(0, &syms, true),
            Err(PioError::ChannelNotConfigured)
        );
    }

    #[test]
    fn test_loopback_round_trip() {
        let mut pio = engine();
        loopback_tx(&mut pio, 0);
        pio.start_receive(0).unwrap();

        let pattern = [
            PioSymbol::high(100),
            PioSymbol::low(50),
            PioSymbol::high(3000),
            PioSymbol::low(1),
            PioSymbol::high(32767),
        ];
        pio.transmit(0, &pattern, true).unwrap();

        let count = pio.stop_receive(0).unwrap();
        assert_eq!(count, pattern.len());
        let mut out = [PioSymbol::default(); 16];
        let n = pio.read_received(0, &mut out).unwrap();
        assert_eq!(&out[..n], &pattern);
    }

    #[test]
    fn test_oversized_duration_splits() {
        let mut pio = engine();
        loopback_tx(&mut pio, 0);
        pio.start_receive(0).unwrap();
        pio.transmit(0, &[PioSymbol::high(40_000)], true).unwrap();
        pio.stop_receive(0).unwrap();

        let mut out = [PioSymbol::default(); 4];
        let n = pio.read_received(0, &mut out).unwrap();
        assert_eq!(n, 2);
        assert_eq!(out[0], PioSymbol::high(32_767));
        assert_eq!(out[1], PioSymbol::high(7_233));
    }

    #[test]
    fn test_zero_duration_rejected() {
        let mut pio = engine();
        pio.configure_channel(0, tx_config(10)).unwrap();
        assert_eq!(
            pio.transmit(0, &[PioSymbol::high(0)], true),
            Err(PioError::InvalidParameter)
        );
    }

    #[test]
    fn test_stream_must_fit_channel_memory() {
        let mut pio = engine();
        pio.configure_channel(0, tx_config(10)).unwrap();
        // 100 symbols pack into 50 words, over the single 48-word block
        let syms = [PioSymbol::high(10); 100];
        assert_eq!(pio.transmit(0, &syms, true), Err(PioError::BufferOverflow));
        // Two blocks make room
        pio.configure_advanced(
            0,
            PioAdvancedConfig {
                memory_blocks: 2,
                ..PioAdvancedConfig::default()
            },
        )
        .unwrap();
        pio.transmit(0, &syms, true).unwrap();
    }

    #[test]
    fn test_busy_channel_rejects_transmit() {
        let mut pio = engine();
        loopback_tx(&mut pio, 1);
        pio.start_receive(1).unwrap();
        assert!(pio.is_channel_busy(1));
        // The channel is still capturing: new operations are rejected
        // rather than queued.
        assert_eq!(pio.start_receive(1), Err(PioError::ChannelBusy));
        assert_eq!(
            pio.transmit(1, &[PioSymbol::high(5)], true),
            Err(PioError::ChannelBusy)
        );
        pio.stop_receive(1).unwrap();
        assert!(!pio.is_channel_busy(1));
    }

    #[test]
    fn test_rx_injection_and_callback() {
        static SYMS: AtomicUsize = AtomicUsize::new(0);
        fn on_rx(_channel: u8, symbols: &[PioSymbol], _user: usize) {
            SYMS.store(symbols.len(), Ordering::Relaxed);
        }

        let mut pio = engine();
        pio.configure_channel(2, rx_config(11)).unwrap();
        pio.set_receive_callback(2, on_rx, 0);
        pio.start_receive(2).unwrap();
        let raw = [pack_raw(PioSymbol::high(5), PioSymbol::low(9))];
        pio.port_mut().inject_symbols(2, &raw);
        let count = pio.stop_receive(2).unwrap();
        assert_eq!(count, 2);
        assert_eq!(SYMS.load(Ordering::Relaxed), 2);
        assert_eq!(pio.statistics(2).unwrap().receptions, 1);
    }

    #[test]
    fn test_transmit_callback_fires_on_completion() {
        static DONE: AtomicUsize = AtomicUsize::new(0);
        fn on_tx(_channel: u8, user: usize) {
            DONE.fetch_add(user, Ordering::Relaxed);
        }

        let mut pio = engine();
        pio.configure_channel(0, tx_config(10)).unwrap();
        pio.set_transmit_callback(0, on_tx, 1);
        pio.transmit(0, &[PioSymbol::high(10)], false).unwrap();
        assert_eq!(DONE.load(Ordering::Relaxed), 1);
        pio.clear_callbacks();
        pio.transmit(0, &[PioSymbol::high(10)], true).unwrap();
        assert_eq!(DONE.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_carrier_configuration() {
        let mut pio = engine();
        pio.configure_channel(0, tx_config(10)).unwrap();
        pio.configure_carrier(0, 38_000, 0.33).unwrap();
        assert!(pio.channel_status(0).unwrap().carrier_enabled);
        assert_eq!(
            pio.configure_carrier(0, 38_000, 1.5),
            Err(PioError::InvalidParameter)
        );
        // Zero frequency disables the carrier
        pio.configure_carrier(0, 0, 0.0).unwrap();
        assert!(!pio.channel_status(0).unwrap().carrier_enabled);
    }

    #[test]
    fn test_dma_not_supported() {
        let mut pio = engine();
        pio.configure_channel(0, tx_config(10)).unwrap();
        let config = PioAdvancedConfig {
            enable_dma: true,
            ..PioAdvancedConfig::default()
        };
        assert_eq!(
            pio.configure_advanced(0, config),
            Err(PioError::UnsupportedOperation)
        );
        assert!(!pio.capabilities().supports_dma);
    }

    #[test]
    fn test_ws2812_encoder_stream() {
        let mut pio = engine();
        loopback_tx(&mut pio, 0);
        pio.create_ws2812_encoder(0, 10_000_000, Ws2812Timing::default())
            .unwrap();
        pio.start_receive(0).unwrap();
        // One pixel, GRB
        pio.transmit_ws2812(0, &[0x80, 0x00, 0x00], true).unwrap();
        pio.stop_receive(0).unwrap();

        let mut out = [PioSymbol::default(); 64];
        let n = pio.read_received(0, &mut out).unwrap();
        // First bit is '1': high T1H then low T1L (100 ns ticks)
        assert_eq!(out[0], PioSymbol::high(8));
        assert_eq!(out[1], PioSymbol::low(4));
        // Second bit is '0'
        assert_eq!(out[2], PioSymbol::high(4));
        assert_eq!(out[3], PioSymbol::low(8));
        assert!(n >= 48);
    }

    #[test]
    fn test_ws2812_requires_encoder() {
        let mut pio = engine();
        pio.configure_channel(0, tx_config(10)).unwrap();
        assert_eq!(
            pio.transmit_ws2812(0, &[0xFF], true),
            Err(PioError::EncoderNotConfigured)
        );
    }

    #[test]
    fn test_deinitialize_releases_channels() {
        let mut pio = engine();
        pio.configure_channel(0, tx_config(10)).unwrap();
        pio.deinitialize().unwrap();
        assert!(!pio.is_initialized());
        // Lazy re-init leaves channels unconfigured
        assert_eq!(
            pio.transmit(0, &[PioSymbol::high(1)], true),
            Err(PioError::ChannelNotConfigured)
        );
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Any stream of in-range symbols survives pack and unpack.
            #[test]
            fn prop_symbol_round_trip(
                durations in prop::collection::vec(1u32..=32_767, 1..40),
                levels in prop::collection::vec(any::<bool>(), 40),
            ) {
                let symbols: std::vec::Vec<PioSymbol> = durations
                    .iter()
                    .zip(&levels)
                    .map(|(&d, &l)| PioSymbol::new(d, l))
                    .collect();
                let raw = RmtPio::<crate::port::soft::SoftRmt>::symbols_to_raw(&symbols).unwrap();
                let mut back: Vec<PioSymbol, MAX_RX_SYMBOLS> = Vec::new();
                RmtPio::<crate::port::soft::SoftRmt>::raw_to_symbols(&raw, &mut back);
                prop_assert_eq!(&back[..], &symbols[..]);
            }

            /// Split halves of an oversized duration sum to the input.
            #[test]
            fn prop_split_preserves_total(duration in 32_768u32..500_000) {
                let raw = RmtPio::<crate::port::soft::SoftRmt>::symbols_to_raw(
                    &[PioSymbol::high(duration)],
                ).unwrap();
                let mut back: Vec<PioSymbol, MAX_RX_SYMBOLS> = Vec::new();
                RmtPio::<crate::port::soft::SoftRmt>::raw_to_symbols(&raw, &mut back);
                let total: u64 = back.iter().map(|s| s.duration_ticks as u64).sum();
                prop_assert_eq!(total, duration as u64);
                prop_assert!(back.iter().all(|s| s.level));
            }
        }
    }

    #[test]
    fn test_receive_raw_symbols_drains_armed_capture() {
        let mut pio = engine();
        pio.configure_channel(3, rx_config(12)).unwrap();
        pio.start_receive(3).unwrap();
        let raw = [pack_raw(PioSymbol::high(7), PioSymbol::low(3))];
        pio.port_mut().inject_symbols(3, &raw);
        let mut out = [0u32; 8];
        let n = pio.receive_raw_symbols(3, &mut out, 1000).unwrap();
        assert_eq!(n, 1);
        assert_eq!(out[0], raw[0]);
    }
}
