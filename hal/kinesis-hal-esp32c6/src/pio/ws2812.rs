//! WS2812-family byte encoder
//!
//! Translates a GRB byte stream into the per-bit `{T0H,T0L}` / `{T1H,T1L}`
//! waveform, followed by the reset-low latch period. Each bit packs into
//! exactly one raw symbol word: high phase in the first half, low phase
//! in the second.

use heapless::Vec;

use kinesis_hal::pio::{
    pack_raw, PioError, PioResult, PioSymbol, RawSymbol, Ws2812Timing, MAX_RAW_DURATION_TICKS,
};
use kinesis_hal::types::FrequencyHz;

/// Upper bound on one encoded stream (bytes * 8 bits + reset tail).
pub const MAX_ENCODED_WORDS: usize = 512;

/// Ticks for a nanosecond figure at the encoder resolution.
const fn ns_to_ticks(ns: u32, resolution_hz: FrequencyHz) -> u64 {
    ns as u64 * resolution_hz as u64 / 1_000_000_000
}

/// Hardware byte encoder configured for one pixel family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ws2812Encoder {
    resolution_hz: FrequencyHz,
    t0h_ticks: u16,
    t0l_ticks: u16,
    t1h_ticks: u16,
    t1l_ticks: u16,
    reset_ticks: u32,
}

impl Ws2812Encoder {
    /// Fit the timings to the resolution. Each phase must round to at
    /// least one tick and fit the 15-bit duration field.
    pub fn new(resolution_hz: FrequencyHz, timing: Ws2812Timing) -> PioResult<Self> {
        if resolution_hz == 0 {
            return Err(PioError::InvalidResolution);
        }
        let phases = [
            timing.t0h_ns,
            timing.t0l_ns,
            timing.t1h_ns,
            timing.t1l_ns,
        ];
        let mut ticks = [0u16; 4];
        for (i, &ns) in phases.iter().enumerate() {
            let t = ns_to_ticks(ns, resolution_hz);
            if t == 0 || t > MAX_RAW_DURATION_TICKS as u64 {
                return Err(PioError::InvalidParameter);
            }
            ticks[i] = t as u16;
        }
        let reset = ns_to_ticks(timing.reset_ns, resolution_hz);
        if reset == 0 {
            return Err(PioError::InvalidParameter);
        }
        Ok(Self {
            resolution_hz,
            t0h_ticks: ticks[0],
            t0l_ticks: ticks[1],
            t1h_ticks: ticks[2],
            t1l_ticks: ticks[3],
            reset_ticks: reset as u32,
        })
    }

    pub fn resolution_hz(&self) -> FrequencyHz {
        self.resolution_hz
    }

    /// One raw word per bit, MSB first.
    fn bit_word(&self, bit: bool) -> RawSymbol {
        let (high, low) = if bit {
            (self.t1h_ticks, self.t1l_ticks)
        } else {
            (self.t0h_ticks, self.t0l_ticks)
        };
        pack_raw(
            PioSymbol::high(high as u32),
            PioSymbol::low(low as u32),
        )
    }

    /// Encode `bytes` plus the reset tail into `out`.
    pub fn encode(
        &self,
        bytes: &[u8],
        out: &mut Vec<RawSymbol, MAX_ENCODED_WORDS>,
    ) -> PioResult<()> {
        out.clear();
        for &byte in bytes {
            for bit in (0..8).rev() {
                let word = self.bit_word(byte & (1 << bit) != 0);
                out.push(word).map_err(|_| PioError::BufferOverflow)?;
            }
        }
        // Reset: hold the line low long enough for the strip to latch.
        let mut remaining = self.reset_ticks;
        while remaining > 0 {
            let first = remaining.min(MAX_RAW_DURATION_TICKS);
            remaining -= first;
            let second = remaining.min(MAX_RAW_DURATION_TICKS);
            remaining -= second;
            let word = pack_raw(PioSymbol::low(first), PioSymbol::low(second));
            out.push(word).map_err(|_| PioError::BufferOverflow)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kinesis_hal::pio::unpack_raw;

    const RES_HZ: FrequencyHz = 10_000_000; // 100 ns per tick

    fn encoder() -> Ws2812Encoder {
        Ws2812Encoder::new(RES_HZ, Ws2812Timing::default()).unwrap()
    }

    #[test]
    fn test_timing_fit() {
        let enc = encoder();
        // 400/850/800/450 ns at 100 ns per tick
        assert_eq!(enc.t0h_ticks, 4);
        assert_eq!(enc.t0l_ticks, 8);
        assert_eq!(enc.t1h_ticks, 8);
        assert_eq!(enc.t1l_ticks, 4);
        assert_eq!(enc.reset_ticks, 500);
    }

    #[test]
    fn test_rejects_sub_tick_resolution() {
        // 400 ns phase rounds to zero ticks at 1 MHz (1 us per tick)
        assert_eq!(
            Ws2812Encoder::new(1_000_000, Ws2812Timing::default()),
            Err(PioError::InvalidParameter)
        );
        assert_eq!(
            Ws2812Encoder::new(0, Ws2812Timing::default()),
            Err(PioError::InvalidResolution)
        );
    }

    #[test]
    fn test_bit_waveform() {
        let enc = encoder();
        let mut out: Vec<RawSymbol, MAX_ENCODED_WORDS> = Vec::new();
        enc.encode(&[0b1010_0000], &mut out).unwrap();

        // 8 bit words plus the reset tail
        assert!(out.len() > 8);
        let (h1, l1) = unpack_raw(out[0]);
        assert!(h1.level && !l1.level);
        assert_eq!(h1.duration_ticks, 8); // '1' high phase
        assert_eq!(l1.duration_ticks, 4);
        let (h0, l0) = unpack_raw(out[1]);
        assert_eq!(h0.duration_ticks, 4); // '0' high phase
        assert_eq!(l0.duration_ticks, 8);
    }

    #[test]
    fn test_reset_tail_is_low_and_long_enough() {
        let enc = encoder();
        let mut out: Vec<RawSymbol, MAX_ENCODED_WORDS> = Vec::new();
        enc.encode(&[0xFF], &mut out).unwrap();

        let mut tail_ticks = 0u64;
        for &word in &out[8..] {
            let (a, b) = unpack_raw(word);
            assert!(!a.level && !b.level);
            tail_ticks += (a.duration_ticks + b.duration_ticks) as u64;
        }
        // >= 50 us at 100 ns per tick
        assert!(tail_ticks >= 500);
    }

    #[test]
    fn test_encode_capacity_guard() {
        let enc = encoder();
        let mut out: Vec<RawSymbol, MAX_ENCODED_WORDS> = Vec::new();
        // 64 bytes -> 512 bit words; the reset tail no longer fits
        let bytes = [0u8; 64];
        assert_eq!(enc.encode(&bytes, &mut out), Err(PioError::BufferOverflow));
    }
}
