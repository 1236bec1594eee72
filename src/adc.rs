//! Bit-banged ADC sampler.
//!
//! Reads an 8-channel, 10-bit successive-approximation ADC (MCP3008 family) over four
//! plain GPIO lines. The rig reserves it for an infrared range sensor; the cycle
//! controller never calls it.
//!
//! # Transaction
//!
//! ```text
//! CS   ‾‾‾‾\______________________________________________/‾‾‾
//! CLK  _______/‾\_/‾\_/‾\_/‾\_/‾\__/‾\_/‾\ ... _/‾\_____________
//! DOUT        S   SGL D2  D1  D0           (5 command bits)
//! DIN                               x   0  B9 ... B0   (12 bits)
//! ```
//!
//! The command word is `(channel | 0b11000) << 3`: start bit, single-ended bit, then the
//! three channel bits, shifted out MSB first and latched on the rising clock edge. Twelve
//! clock pulses bring back one empty bit, one null bit and the ten data bits; the final
//! right shift drops the null bit.
//!
//! # Out-of-range channels
//!
//! A channel outside `0..=7` returns [`INVALID_CHANNEL`] (`-1`) as an ordinary value and
//! no line is touched. Callers compare against the sentinel before using a reading. GPIO
//! faults are still reported as errors.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::AppResult;
use crate::hardware::{AdcLines, GpioBackend, SignalBank};

/// Returned by [`AdcSampler::read_channel`] for a channel outside `0..=7`.
pub const INVALID_CHANNEL: i32 = -1;

/// Number of input channels on the converter.
pub const CHANNELS: i32 = 8;

const COMMAND_BITS: usize = 5;
const RESPONSE_BITS: usize = 12;

/// Command byte for `channel`; only its top five bits are transmitted.
pub fn command_word(channel: u8) -> u8 {
    (channel | 0x18) << 3
}

/// Clocked serial reader over the ADC lines of a signal bank.
pub struct AdcSampler<'a, B: GpioBackend> {
    bank: &'a mut SignalBank<B>,
    lines: AdcLines,
}

impl<'a, B: GpioBackend> AdcSampler<'a, B> {
    /// Sampler over already-claimed ADC lines.
    pub fn new(bank: &'a mut SignalBank<B>, lines: AdcLines) -> Self {
        Self { bank, lines }
    }

    /// Perform one conversion on `channel`.
    ///
    /// Returns a reading in `0..=2047` (ten meaningful bits), or [`INVALID_CHANNEL`] when
    /// `channel` is outside `0..=7`. A disconnected converter reads as zero.
    pub fn read_channel(&mut self, channel: i32) -> AppResult<i32> {
        if !(0..CHANNELS).contains(&channel) {
            return Ok(INVALID_CHANNEL);
        }
        let AdcLines {
            clock,
            data_out,
            data_in,
            chip_select,
        } = self.lines;

        self.bank.write(chip_select, true)?;
        self.bank.write(clock, false)?;
        self.bank.write(chip_select, false)?;

        let mut command = command_word(channel as u8);
        for _ in 0..COMMAND_BITS {
            self.bank.write(data_out, command & 0x80 != 0)?;
            command <<= 1;
            self.bank.write(clock, true)?;
            self.bank.write(clock, false)?;
        }

        let mut raw: u16 = 0;
        for _ in 0..RESPONSE_BITS {
            self.bank.write(clock, true)?;
            self.bank.write(clock, false)?;
            raw <<= 1;
            if self.bank.read(data_in)? {
                raw |= 0x1;
            }
        }

        self.bank.write(chip_select, true)?;

        let value = i32::from(raw >> 1);
        debug!(channel, raw, value, "ADC conversion");
        Ok(value)
    }
}

/// Where a reading falls relative to the usable infrared sensor window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeStatus {
    /// Below `min`: target too far or absent
    BelowRange,
    /// Inside `min..=max`
    InRange,
    /// Above `max`: target too close
    AboveRange,
    /// The sampler returned the sentinel
    InvalidChannel,
}

/// Usable ADC window of the infrared range sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IrRange {
    /// ADC channel the sensor is wired to
    #[serde(default)]
    pub adc_channel: i32,
    /// Lowest trustworthy reading
    #[serde(default = "default_ir_min")]
    pub min: i32,
    /// Highest trustworthy reading
    #[serde(default = "default_ir_max")]
    pub max: i32,
}

fn default_ir_min() -> i32 {
    170
}

fn default_ir_max() -> i32 {
    600
}

impl Default for IrRange {
    fn default() -> Self {
        Self {
            adc_channel: 0,
            min: default_ir_min(),
            max: default_ir_max(),
        }
    }
}

impl IrRange {
    /// Classify a sampler result.
    pub fn classify(&self, reading: i32) -> RangeStatus {
        if reading == INVALID_CHANNEL {
            RangeStatus::InvalidChannel
        } else if reading < self.min {
            RangeStatus::BelowRange
        } else if reading > self.max {
            RangeStatus::AboveRange
        } else {
            RangeStatus::InRange
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::{GpioEvent, MockGpio, PinId};

    fn lines() -> AdcLines {
        AdcLines {
            clock: PinId(18),
            data_out: PinId(24),
            data_in: PinId(23),
            chip_select: PinId(25),
        }
    }

    fn claimed_bank(gpio: &MockGpio) -> SignalBank<MockGpio> {
        let mut bank = SignalBank::new(gpio.clone());
        bank.claim_all(&lines().signals()).unwrap();
        bank
    }

    fn bits(value: u16, width: usize) -> Vec<bool> {
        (0..width).rev().map(|i| (value >> i) & 1 == 1).collect()
    }

    #[test]
    fn command_word_sets_start_and_single_ended_bits() {
        assert_eq!(command_word(0), 0b1100_0000);
        assert_eq!(command_word(5), 0b1110_1000);
        assert_eq!(command_word(7), 0b1111_1000);
    }

    #[test]
    fn transmits_top_five_command_bits() {
        for channel in 0..8u8 {
            let gpio = MockGpio::new();
            let mut bank = claimed_bank(&gpio);
            AdcSampler::new(&mut bank, lines())
                .read_channel(i32::from(channel))
                .unwrap();

            let sent = gpio.writes_to(PinId(24));
            let expected = bits(u16::from(command_word(channel) >> 3), 5);
            assert_eq!(sent, expected, "channel {}", channel);
        }
    }

    #[test]
    fn drops_null_bit_from_response() {
        let gpio = MockGpio::new();
        let raw: u16 = 0b0111_1111_1111;
        gpio.script_reads(PinId(23), bits(raw, 12));

        let mut bank = claimed_bank(&gpio);
        let value = AdcSampler::new(&mut bank, lines()).read_channel(3).unwrap();
        assert_eq!(value, i32::from(raw >> 1));
        assert_eq!(value, 1023);
    }

    #[test]
    fn full_scale_raw_stays_within_eleven_bits() {
        let gpio = MockGpio::new();
        gpio.set_input(PinId(23), true);
        let mut bank = claimed_bank(&gpio);
        let value = AdcSampler::new(&mut bank, lines()).read_channel(0).unwrap();
        assert_eq!(value, 2047);
    }

    #[test]
    fn chip_select_frames_the_transaction() {
        let gpio = MockGpio::new();
        let mut bank = claimed_bank(&gpio);
        AdcSampler::new(&mut bank, lines()).read_channel(1).unwrap();

        assert_eq!(gpio.writes_to(PinId(25)), vec![true, false, true]);
        // 5 command pulses + 12 response pulses, each high then low, after the idle low
        let clock = gpio.writes_to(PinId(18));
        assert_eq!(clock.len(), 1 + 2 * (5 + 12));
        assert!(!clock[0]);
        assert_eq!(gpio.read_count(PinId(23)), 12);
    }

    #[test]
    fn samples_after_falling_edge() {
        let gpio = MockGpio::new();
        let mut bank = claimed_bank(&gpio);
        AdcSampler::new(&mut bank, lines()).read_channel(2).unwrap();

        let events = gpio.events();
        let first_read = events
            .iter()
            .position(|e| matches!(e, GpioEvent::Read(PinId(23), _)))
            .unwrap();
        assert_eq!(events[first_read - 1], GpioEvent::Write(PinId(18), false));
        assert_eq!(events[first_read - 2], GpioEvent::Write(PinId(18), true));
    }

    #[test]
    fn out_of_range_channel_returns_sentinel_without_io() {
        let gpio = MockGpio::new();
        let mut bank = claimed_bank(&gpio);
        let before = gpio.events().len();

        let mut sampler = AdcSampler::new(&mut bank, lines());
        assert_eq!(sampler.read_channel(8).unwrap(), INVALID_CHANNEL);
        assert_eq!(sampler.read_channel(-1).unwrap(), INVALID_CHANNEL);
        assert_eq!(gpio.events().len(), before);
    }

    #[test]
    fn ir_range_classification() {
        let range = IrRange::default();
        assert_eq!(range.classify(INVALID_CHANNEL), RangeStatus::InvalidChannel);
        assert_eq!(range.classify(0), RangeStatus::BelowRange);
        assert_eq!(range.classify(170), RangeStatus::InRange);
        assert_eq!(range.classify(600), RangeStatus::InRange);
        assert_eq!(range.classify(601), RangeStatus::AboveRange);
    }
}
