//! APU pulse channel implementation.
//!
//! See: <https://www.nesdev.org/wiki/APU_Pulse>

use crate::{
    apu::{envelope::Envelope, length_counter::LengthCounter, sweep::Sweep, timer::Timer},
    common::{Reset, ResetKind},
};
use serde::{Deserialize, Serialize};

#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[must_use]
pub enum PulseChannel {
    #[default]
    One,
    Two,
}

#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
#[must_use]
pub struct Pulse {
    pub channel: PulseChannel,
    pub timer: Timer,
    pub envelope: Envelope,
    pub sweep: Sweep,
    pub length: LengthCounter,
    pub duty: u8,
    pub duty_counter: u8,
}

impl Pulse {
    const DUTY_TABLE: [[u8; 8]; 4] = [
        [0, 0, 0, 0, 0, 0, 0, 1],
        [0, 0, 0, 0, 0, 0, 1, 1],
        [0, 0, 0, 0, 1, 1, 1, 1],
        [1, 1, 1, 1, 1, 1, 0, 0],
    ];

    pub const fn new(channel: PulseChannel) -> Self {
        Self {
            channel,
            timer: Timer::new(0),
            envelope: Envelope::new(),
            sweep: Sweep::new(),
            length: LengthCounter::new(),
            duty: 0,
            duty_counter: 0,
        }
    }

    const fn ones_complement(&self) -> bool {
        matches!(self.channel, PulseChannel::One)
    }

    /// $4000/$4004 write.
    pub const fn write_ctrl(&mut self, val: u8) {
        self.duty = (val >> 6) & 0x03;
        self.length.halt = val & 0x20 != 0;
        self.envelope.write_ctrl(val);
    }

    /// $4001/$4005 write.
    pub const fn write_sweep(&mut self, val: u8) {
        self.sweep.write(val);
    }

    /// $4002/$4006 write.
    pub const fn write_timer_lo(&mut self, val: u8) {
        self.timer.set_period_lo(val);
    }

    /// $4003/$4007 write: also reloads the length counter, restarts the
    /// envelope, and resets the duty phase.
    pub const fn write_timer_hi(&mut self, val: u8) {
        self.timer.set_period_hi(val);
        self.length.write(val);
        self.envelope.restart();
        self.duty_counter = 0;
    }

    /// Clocked every second CPU cycle.
    pub const fn clock(&mut self) {
        if self.timer.clock() {
            self.duty_counter = (self.duty_counter + 1) & 0x07;
        }
    }

    pub const fn clock_quarter_frame(&mut self) {
        self.envelope.clock();
    }

    pub fn clock_half_frame(&mut self) {
        self.length.clock();
        let ones = self.ones_complement();
        if self.sweep.divider == 0
            && self.sweep.enabled
            && self.sweep.shift > 0
            && !self.sweep.mutes(self.timer.period, ones)
        {
            self.timer.period = self.sweep.target_period(self.timer.period, ones) & 0x07FF;
        }
        if self.sweep.divider == 0 || self.sweep.reload {
            self.sweep.divider = self.sweep.period;
            self.sweep.reload = false;
        } else {
            self.sweep.divider -= 1;
        }
    }

    /// Current DAC input, 0-15.
    #[must_use]
    pub const fn output(&self) -> u8 {
        let active = Self::DUTY_TABLE[self.duty as usize][self.duty_counter as usize] == 1;
        if active
            && self.length.active()
            && !self.sweep.mutes(self.timer.period, self.ones_complement())
        {
            self.envelope.output()
        } else {
            0
        }
    }
}

impl Reset for Pulse {
    fn reset(&mut self, kind: ResetKind) {
        self.timer.reset(kind);
        self.envelope.reset(kind);
        self.sweep = Sweep::new();
        self.length.reset(kind);
        self.duty = 0;
        self.duty_counter = 0;
    }
}
