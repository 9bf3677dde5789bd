//! NES APU (Audio Processing Unit) implementation.
//!
//! The APU advances once per CPU-active master cycle. Audio mixing and
//! resampling are the embedder's concern; this core tracks the channel state
//! machines, the frame sequencer, and the IRQ/DMA signals they raise.
//!
//! See: <https://www.nesdev.org/wiki/APU>

use crate::{
    apu::{
        dmc::Dmc,
        frame_counter::FrameCounter,
        noise::Noise,
        pulse::{Pulse, PulseChannel},
        triangle::Triangle,
    },
    common::{NesRegion, Regional, Reset, ResetKind},
    console::Console,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;

pub mod dmc;
pub mod envelope;
pub mod frame_counter;
pub mod length_counter;
pub mod noise;
pub mod pulse;
pub mod sweep;
pub mod timer;
pub mod triangle;

/// Error when parsing `Channel` from a `usize`.
#[derive(Error, Debug)]
#[must_use]
#[error("failed to parse `Channel`")]
pub struct ParseChannelError;

/// [`Apu`] Channel.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[must_use]
pub enum Channel {
    Pulse1,
    Pulse2,
    Triangle,
    Noise,
    Dmc,
}

impl TryFrom<usize> for Channel {
    type Error = ParseChannelError;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Pulse1),
            1 => Ok(Self::Pulse2),
            2 => Ok(Self::Triangle),
            3 => Ok(Self::Noise),
            4 => Ok(Self::Dmc),
            _ => Err(ParseChannelError),
        }
    }
}

/// NES APU.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[must_use]
pub struct Apu {
    pub region: NesRegion,
    /// CPU cycles elapsed, driving the even/odd write behavior.
    pub cycle: u64,
    pub frame_counter: FrameCounter,
    pub pulse1: Pulse,
    pub pulse2: Pulse,
    pub triangle: Triangle,
    pub noise: Noise,
    pub dmc: Dmc,
    pub frame_irq_flag: bool,
}

impl Default for Apu {
    fn default() -> Self {
        Self::new(NesRegion::Ntsc)
    }
}

impl Apu {
    pub const CHANNEL_COUNT: usize = 5;

    pub const fn new(region: NesRegion) -> Self {
        Self {
            region,
            cycle: 0,
            frame_counter: FrameCounter::new(region),
            pulse1: Pulse::new(PulseChannel::One),
            pulse2: Pulse::new(PulseChannel::Two),
            triangle: Triangle::new(),
            noise: Noise::new(region),
            dmc: Dmc::new(region),
            frame_irq_flag: false,
        }
    }

    /// Advance the APU by one CPU cycle.
    pub fn clock(&mut self) {
        self.cycle = self.cycle.wrapping_add(1);

        let event = self.frame_counter.clock();
        if event.irq {
            trace!("APU Frame Counter IRQ - CYC:{}", self.cycle);
            self.frame_irq_flag = true;
        }
        // A half-frame clock implies a quarter-frame clock
        if event.quarter || event.half {
            self.pulse1.clock_quarter_frame();
            self.pulse2.clock_quarter_frame();
            self.triangle.clock_quarter_frame();
            self.noise.clock_quarter_frame();
        }
        if event.half {
            self.pulse1.clock_half_frame();
            self.pulse2.clock_half_frame();
            self.triangle.clock_half_frame();
            self.noise.clock_half_frame();
        }

        // Pulse timers run at half the CPU rate
        if self.cycle & 0x01 == 0x01 {
            self.pulse1.clock();
            self.pulse2.clock();
        }
        self.triangle.clock();
        self.noise.clock();
        self.dmc.clock();
    }

    /// Level of the APU's combined IRQ output.
    #[inline]
    #[must_use]
    pub const fn irq_line(&self) -> bool {
        self.frame_irq_flag || self.dmc.irq_pending
    }

    /// $4000-$4013 channel register write.
    pub fn write_register(&mut self, addr: u16, val: u8) {
        match addr {
            0x4000 => self.pulse1.write_ctrl(val),
            0x4001 => self.pulse1.write_sweep(val),
            0x4002 => self.pulse1.write_timer_lo(val),
            0x4003 => self.pulse1.write_timer_hi(val),
            0x4004 => self.pulse2.write_ctrl(val),
            0x4005 => self.pulse2.write_sweep(val),
            0x4006 => self.pulse2.write_timer_lo(val),
            0x4007 => self.pulse2.write_timer_hi(val),
            0x4008 => self.triangle.write_linear_counter(val),
            0x400A => self.triangle.write_timer_lo(val),
            0x400B => self.triangle.write_timer_hi(val),
            0x400C => self.noise.write_ctrl(val),
            0x400E => self.noise.write_timer(val),
            0x400F => self.noise.write_length(val),
            0x4010 => self.dmc.write_timer(val),
            0x4011 => self.dmc.write_output(val),
            0x4012 => self.dmc.write_addr(val),
            0x4013 => self.dmc.write_length(val),
            _ => (),
        }
    }

    /// $4015 read: per-channel length status plus the IRQ flags. Reading
    /// clears the frame IRQ (but not the DMC IRQ).
    pub fn read_status(&mut self) -> u8 {
        let val = self.peek_status();
        self.frame_irq_flag = false;
        val
    }

    /// Side-effect-free $4015 read.
    #[must_use]
    pub const fn peek_status(&self) -> u8 {
        let mut status = 0x00;
        if self.pulse1.length.active() {
            status |= 0x01;
        }
        if self.pulse2.length.active() {
            status |= 0x02;
        }
        if self.triangle.length.active() {
            status |= 0x04;
        }
        if self.noise.length.active() {
            status |= 0x08;
        }
        if self.dmc.bytes_remaining > 0 {
            status |= 0x10;
        }
        if self.frame_irq_flag {
            status |= 0x40;
        }
        if self.dmc.irq_pending {
            status |= 0x80;
        }
        status
    }

    /// $4015 write: channel enables. Clears the DMC IRQ and may start or
    /// stop the DMC sample.
    pub fn write_status(&mut self, val: u8) {
        self.pulse1.length.set_enabled(val & 0x01 != 0);
        self.pulse2.length.set_enabled(val & 0x02 != 0);
        self.triangle.length.set_enabled(val & 0x04 != 0);
        self.noise.length.set_enabled(val & 0x08 != 0);
        self.dmc.set_enabled(val & 0x10 != 0);
    }

    /// $4017 write: frame counter mode/inhibit.
    pub fn write_frame_counter(&mut self, val: u8) {
        self.frame_counter.write(val, self.cycle & 0x01 == 0x01);
        if self.frame_counter.inhibit_irq {
            self.frame_irq_flag = false;
        }
    }
}

impl Regional for Apu {
    fn region(&self) -> NesRegion {
        self.region
    }

    fn set_region(&mut self, region: NesRegion) {
        self.region = region;
        self.frame_counter.set_region(region);
        self.noise.set_region(region);
        self.dmc.set_region(region);
    }
}

impl Reset for Apu {
    fn reset(&mut self, kind: ResetKind) {
        self.cycle = 0;
        self.frame_counter.reset(kind);
        self.pulse1.reset(kind);
        self.pulse2.reset(kind);
        self.triangle.reset(kind);
        self.noise.reset(kind);
        self.dmc.reset(kind);
        self.frame_irq_flag = false;
    }
}

impl Console {
    pub(crate) fn apu_register_write(&mut self, addr: u16, val: u8) {
        self.apu.write_register(addr, val);
    }

    pub(crate) fn apu_read_status(&mut self) -> u8 {
        self.apu.read_status()
    }

    pub(crate) fn apu_peek_status(&self) -> u8 {
        self.apu.peek_status()
    }

    pub(crate) fn apu_write_status(&mut self, val: u8) {
        self.apu.write_status(val);
    }

    pub(crate) fn apu_write_frame_counter(&mut self, val: u8) {
        self.apu.write_frame_counter(val);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_read_clears_frame_irq_only() {
        let mut apu = Apu::new(NesRegion::Ntsc);
        apu.frame_irq_flag = true;
        apu.dmc.irq_pending = true;
        let val = apu.read_status();
        assert_eq!(val & 0xC0, 0xC0, "both IRQ flags visible");
        assert!(!apu.frame_irq_flag, "frame IRQ cleared by the read");
        assert!(apu.dmc.irq_pending, "DMC IRQ unaffected");
    }

    #[test]
    fn length_counters_report_through_status() {
        let mut apu = Apu::new(NesRegion::Ntsc);
        apu.write_status(0x0F);
        apu.write_register(0x4003, 0x08); // Pulse 1 length index 1
        apu.write_register(0x400B, 0x08); // Triangle
        assert_eq!(apu.peek_status() & 0x0F, 0x05);

        apu.write_status(0x00);
        assert_eq!(apu.peek_status() & 0x0F, 0x00, "disable zeroes counters");
    }

    #[test]
    fn frame_irq_raised_in_four_step_mode() {
        let mut apu = Apu::new(NesRegion::Ntsc);
        for _ in 0..29830 {
            apu.clock();
        }
        assert!(apu.frame_irq_flag);
        assert!(apu.irq_line());
    }

    #[test]
    fn inhibit_clears_and_suppresses_frame_irq() {
        let mut apu = Apu::new(NesRegion::Ntsc);
        for _ in 0..29830 {
            apu.clock();
        }
        assert!(apu.frame_irq_flag);
        apu.write_frame_counter(0x40);
        assert!(!apu.frame_irq_flag, "$4017 D6 clears the flag");
        for _ in 0..40000 {
            apu.clock();
        }
        assert!(!apu.frame_irq_flag, "no IRQ while inhibited");
    }
}
