//! APU noise channel implementation.
//!
//! See: <https://www.nesdev.org/wiki/APU_Noise>

use crate::{
    apu::{envelope::Envelope, length_counter::LengthCounter, timer::Timer},
    common::{NesRegion, Regional, Reset, ResetKind},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
#[must_use]
pub struct Noise {
    pub region: NesRegion,
    pub timer: Timer,
    pub envelope: Envelope,
    pub length: LengthCounter,
    /// 15-bit linear feedback shift register, never zero.
    pub shift: u16,
    /// Mode flag selecting the short (93-step) sequence.
    pub mode_short: bool,
}

impl Noise {
    const PERIOD_TABLE_NTSC: [u16; 16] = [
        4, 8, 16, 32, 64, 96, 128, 160, 202, 254, 380, 508, 762, 1016, 2034, 4068,
    ];
    const PERIOD_TABLE_PAL: [u16; 16] = [
        4, 8, 14, 30, 60, 88, 118, 148, 188, 236, 354, 472, 708, 944, 1890, 3778,
    ];

    pub const fn new(region: NesRegion) -> Self {
        Self {
            region,
            timer: Timer::new(0),
            envelope: Envelope::new(),
            length: LengthCounter::new(),
            shift: 0x0001,
            mode_short: false,
        }
    }

    const fn period(region: NesRegion, val: u8) -> u16 {
        let index = (val & 0x0F) as usize;
        match region {
            NesRegion::Ntsc => Self::PERIOD_TABLE_NTSC[index] - 1,
            NesRegion::Pal => Self::PERIOD_TABLE_PAL[index] - 1,
        }
    }

    /// $400C write.
    pub const fn write_ctrl(&mut self, val: u8) {
        self.length.halt = val & 0x20 != 0;
        self.envelope.write_ctrl(val);
    }

    /// $400E write.
    pub const fn write_timer(&mut self, val: u8) {
        self.mode_short = val & 0x80 != 0;
        self.timer.period = Self::period(self.region, val);
    }

    /// $400F write.
    pub const fn write_length(&mut self, val: u8) {
        self.length.write(val);
        self.envelope.restart();
    }

    /// Clocked every CPU cycle; shifts the LFSR when the timer expires.
    pub const fn clock(&mut self) {
        if self.timer.clock() {
            let tap = if self.mode_short { 6 } else { 1 };
            let feedback = (self.shift & 0x01) ^ ((self.shift >> tap) & 0x01);
            self.shift = (self.shift >> 1) | (feedback << 14);
        }
    }

    pub const fn clock_quarter_frame(&mut self) {
        self.envelope.clock();
    }

    pub const fn clock_half_frame(&mut self) {
        self.length.clock();
    }

    /// Current DAC input, 0-15.
    #[must_use]
    pub const fn output(&self) -> u8 {
        if self.shift & 0x01 == 0 && self.length.active() {
            self.envelope.output()
        } else {
            0
        }
    }
}

impl Regional for Noise {
    fn region(&self) -> NesRegion {
        self.region
    }

    fn set_region(&mut self, region: NesRegion) {
        self.region = region;
    }
}

impl Reset for Noise {
    fn reset(&mut self, kind: ResetKind) {
        self.timer.reset(kind);
        self.timer.period = Self::period(self.region, 0);
        self.envelope.reset(kind);
        self.length.reset(kind);
        self.shift = 0x0001;
        self.mode_short = false;
    }
}
