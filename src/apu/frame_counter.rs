//! The APU Frame Counter implementation.
//!
//! Generates the low-frequency quarter/half-frame clocks for the channel
//! envelopes, sweeps, and length counters, and raises the frame IRQ in
//! 4-step mode.
//!
//! See: <https://www.nesdev.org/wiki/APU_Frame_Counter>

use crate::common::{NesRegion, Regional, Reset, ResetKind};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Clocks emitted by one frame-counter cycle.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
#[must_use]
pub struct FrameEvent {
    pub quarter: bool,
    pub half: bool,
    pub irq: bool,
}

#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
enum StepKind {
    Quarter,
    Half,
    #[default]
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[must_use]
pub struct FrameCounter {
    pub region: NesRegion,
    /// 0 = 4-step mode, 1 = 5-step mode.
    pub mode: u8,
    pub inhibit_irq: bool, // Set by $4017 D6
    step: usize,
    cycle: u64,
    step_cycles: [u64; 6],
    write_buffer: Option<u8>,
    write_delay: u8,
}

impl FrameCounter {
    const STEP4_CYCLES_NTSC: [u64; 6] = [7457, 14913, 22371, 29828, 29829, 29830];
    const STEP5_CYCLES_NTSC: [u64; 6] = [7457, 14913, 22371, 29829, 37281, 37282];
    const STEP4_CYCLES_PAL: [u64; 6] = [8313, 16627, 24939, 33252, 33253, 33254];
    const STEP5_CYCLES_PAL: [u64; 6] = [8313, 16627, 24939, 33253, 41565, 41566];

    const STEP_KIND: [StepKind; 6] = [
        StepKind::Quarter,
        StepKind::Half,
        StepKind::Quarter,
        StepKind::None,
        StepKind::Half,
        StepKind::None,
    ];

    pub const fn new(region: NesRegion) -> Self {
        let mode = 0;
        Self {
            region,
            mode,
            inhibit_irq: false,
            step: 0,
            cycle: 0,
            step_cycles: Self::step_cycles(mode, region),
            write_buffer: None,
            write_delay: 0,
        }
    }

    const fn step_cycles(mode: u8, region: NesRegion) -> [u64; 6] {
        match (mode, region) {
            (0, NesRegion::Ntsc) => Self::STEP4_CYCLES_NTSC,
            (0, NesRegion::Pal) => Self::STEP4_CYCLES_PAL,
            (_, NesRegion::Ntsc) => Self::STEP5_CYCLES_NTSC,
            (_, NesRegion::Pal) => Self::STEP5_CYCLES_PAL,
        }
    }

    /// $4017 write. Writes on odd CPU cycles are delayed one extra cycle
    /// before the sequencer resets.
    pub fn write(&mut self, val: u8, on_odd_cycle: bool) {
        self.write_buffer = Some(val);
        self.write_delay = if on_odd_cycle { 4 } else { 3 };
        self.inhibit_irq = val & 0x40 != 0; // D6
        if self.inhibit_irq {
            trace!("APU Frame Counter IRQ inhibit");
        }
    }

    // mode 0: 4-step  effective rate (approx)
    // ---------------------------------------
    // - - - f f f      60 Hz
    // - l - - l -     120 Hz
    // e e e - e -     240 Hz
    //
    // mode 1: 5-step  effective rate (approx)
    // ---------------------------------------
    // - - - - - -     (interrupt flag never set)
    // - l - - l -     96 Hz
    // e e e - e -     192 Hz
    pub fn clock(&mut self) -> FrameEvent {
        let mut event = FrameEvent::default();
        self.cycle += 1;

        if self.cycle >= self.step_cycles[self.step] {
            if self.mode == 0 && !self.inhibit_irq && self.step >= 3 {
                event.irq = true;
            }
            match Self::STEP_KIND[self.step] {
                StepKind::Quarter => event.quarter = true,
                StepKind::Half => event.half = true,
                StepKind::None => (),
            }
            self.step += 1;
            if self.step == 6 {
                self.step = 0;
                self.cycle = 0;
            }
        }

        if let Some(val) = self.write_buffer {
            self.write_delay -= 1;
            if self.write_delay == 0 {
                self.mode = (val & 0x80 != 0) as u8;
                self.step_cycles = Self::step_cycles(self.mode, self.region);
                self.step = 0;
                self.cycle = 0;
                self.write_buffer = None;
                if self.mode == 1 {
                    // Writing $4017 with bit 7 set immediately generates a
                    // quarter and half frame clock
                    event.quarter = true;
                    event.half = true;
                }
            }
        }

        event
    }
}

impl Regional for FrameCounter {
    fn region(&self) -> NesRegion {
        self.region
    }

    fn set_region(&mut self, region: NesRegion) {
        self.region = region;
        self.step_cycles = Self::step_cycles(self.mode, region);
    }
}

impl Reset for FrameCounter {
    fn reset(&mut self, kind: ResetKind) {
        self.cycle = 0;
        if kind == ResetKind::Hard {
            self.mode = 0;
            self.step_cycles = Self::step_cycles(self.mode, self.region);
            self.inhibit_irq = false;
        }
        self.step = 0;
        self.write_buffer = None;
        self.write_delay = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn four_step_sequence_clocks_quarters_and_halves() {
        let mut fc = FrameCounter::new(NesRegion::Ntsc);
        let mut quarters = 0;
        let mut halves = 0;
        let mut irqs = 0;
        for _ in 0..29830 {
            let ev = fc.clock();
            quarters += ev.quarter as u32;
            halves += ev.half as u32;
            irqs += ev.irq as u32;
        }
        assert_eq!(quarters, 2, "two pure quarter clocks per sequence");
        assert_eq!(halves, 2, "two half clocks per sequence");
        assert_eq!(irqs, 3, "IRQ raised on the last three cycles");
    }

    #[test]
    fn five_step_mode_never_raises_irq() {
        let mut fc = FrameCounter::new(NesRegion::Ntsc);
        fc.write(0x80, false);
        let mut irqs = 0;
        let mut immediate_half = false;
        for i in 0..37282 {
            let ev = fc.clock();
            irqs += ev.irq as u32;
            if i < 4 && ev.half {
                immediate_half = true;
            }
        }
        assert_eq!(irqs, 0);
        assert!(immediate_half, "mode-1 write clocks a half frame immediately");
    }
}
