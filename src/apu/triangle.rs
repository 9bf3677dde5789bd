//! APU triangle channel implementation.
//!
//! See: <https://www.nesdev.org/wiki/APU_Triangle>

use crate::{
    apu::{length_counter::LengthCounter, timer::Timer},
    common::{Reset, ResetKind},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
#[must_use]
pub struct Triangle {
    pub timer: Timer,
    pub length: LengthCounter,
    pub linear_counter: u8,
    pub linear_reload_value: u8,
    pub linear_reload: bool,
    /// Length halt and linear control share $4008 bit 7.
    pub control: bool,
    sequencer_step: u8,
}

impl Triangle {
    const SEQUENCE: [u8; 32] = [
        15, 14, 13, 12, 11, 10, 9, 8, 7, 6, 5, 4, 3, 2, 1, 0, 0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10,
        11, 12, 13, 14, 15,
    ];

    pub const fn new() -> Self {
        Self {
            timer: Timer::new(0),
            length: LengthCounter::new(),
            linear_counter: 0,
            linear_reload_value: 0,
            linear_reload: false,
            control: false,
            sequencer_step: 0,
        }
    }

    /// $4008 write.
    pub const fn write_linear_counter(&mut self, val: u8) {
        self.control = val & 0x80 != 0;
        self.length.halt = self.control;
        self.linear_reload_value = val & 0x7F;
    }

    /// $400A write.
    pub const fn write_timer_lo(&mut self, val: u8) {
        self.timer.set_period_lo(val);
    }

    /// $400B write.
    pub const fn write_timer_hi(&mut self, val: u8) {
        self.timer.set_period_hi(val);
        self.length.write(val);
        self.linear_reload = true;
    }

    /// Clocked every CPU cycle; the sequencer only advances while both the
    /// linear and length counters are non-zero.
    pub const fn clock(&mut self) {
        if self.timer.clock() && self.linear_counter > 0 && self.length.active() {
            self.sequencer_step = (self.sequencer_step + 1) & 0x1F;
        }
    }

    pub const fn clock_quarter_frame(&mut self) {
        if self.linear_reload {
            self.linear_counter = self.linear_reload_value;
        } else if self.linear_counter > 0 {
            self.linear_counter -= 1;
        }
        if !self.control {
            self.linear_reload = false;
        }
    }

    pub const fn clock_half_frame(&mut self) {
        self.length.clock();
    }

    /// Current DAC input, 0-15.
    #[must_use]
    pub const fn output(&self) -> u8 {
        Self::SEQUENCE[self.sequencer_step as usize]
    }
}

impl Reset for Triangle {
    fn reset(&mut self, kind: ResetKind) {
        self.timer.reset(kind);
        self.length.reset(kind);
        self.linear_counter = 0;
        self.linear_reload_value = 0;
        self.linear_reload = false;
        self.control = false;
        self.sequencer_step = 0;
    }
}
