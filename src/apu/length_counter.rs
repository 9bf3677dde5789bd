//! APU Length Counter implementation.
//!
//! See: <https://www.nesdev.org/wiki/APU_Length_Counter>

use crate::common::{Reset, ResetKind};
use serde::{Deserialize, Serialize};

/// Duration control for the APU waveform channels. While enabled, the
/// counter decrements on half-frame clocks and silences the channel at zero.
#[derive(Default, Debug, Copy, Clone, Serialize, Deserialize)]
#[must_use]
pub struct LengthCounter {
    pub enabled: bool,
    pub halt: bool,
    pub counter: u8,
}

impl LengthCounter {
    const LENGTH_TABLE: [u8; 32] = [
        10, 254, 20, 2, 40, 4, 80, 6, 160, 8, 60, 10, 14, 12, 26, 14, 12, 16, 24, 18, 48, 20, 96,
        22, 192, 24, 72, 26, 16, 28, 32, 30,
    ];

    pub const fn new() -> Self {
        Self {
            enabled: false,
            halt: false,
            counter: 0,
        }
    }

    /// Length register write: D7-D3 index the length table.
    pub const fn write(&mut self, val: u8) {
        if self.enabled {
            self.counter = Self::LENGTH_TABLE[(val >> 3) as usize];
        }
    }

    /// $4015 channel enable bit. Disabling zeroes the counter immediately.
    pub const fn set_enabled(&mut self, enabled: bool) {
        if !enabled {
            self.counter = 0;
        }
        self.enabled = enabled;
    }

    /// Half-frame clock.
    pub const fn clock(&mut self) {
        if self.counter > 0 && !self.halt {
            self.counter -= 1;
        }
    }

    #[inline]
    #[must_use]
    pub const fn active(&self) -> bool {
        self.counter > 0
    }
}

impl Reset for LengthCounter {
    fn reset(&mut self, _kind: ResetKind) {
        *self = Self::new();
    }
}
