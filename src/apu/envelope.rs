//! APU envelope generator.
//!
//! See: <https://www.nesdev.org/wiki/APU_Envelope>

use crate::common::{Reset, ResetKind};
use serde::{Deserialize, Serialize};

#[derive(Default, Debug, Copy, Clone, Serialize, Deserialize)]
#[must_use]
pub struct Envelope {
    pub start: bool,
    pub loops: bool,
    pub constant_volume: bool,
    /// Volume in constant mode, divider period otherwise.
    pub volume: u8,
    divider: u8,
    decay: u8,
}

impl Envelope {
    pub const fn new() -> Self {
        Self {
            start: false,
            loops: false,
            constant_volume: false,
            volume: 0,
            divider: 0,
            decay: 0,
        }
    }

    /// $4000/$4004/$400C bits 0-5.
    pub const fn write_ctrl(&mut self, val: u8) {
        self.volume = val & 0x0F;
        self.constant_volume = val & 0x10 != 0;
        self.loops = val & 0x20 != 0;
    }

    /// Restart on length-counter load.
    pub const fn restart(&mut self) {
        self.start = true;
    }

    /// Quarter-frame clock.
    pub const fn clock(&mut self) {
        if self.start {
            self.start = false;
            self.decay = 0x0F;
            self.divider = self.volume;
        } else if self.divider == 0 {
            self.divider = self.volume;
            if self.decay > 0 {
                self.decay -= 1;
            } else if self.loops {
                self.decay = 0x0F;
            }
        } else {
            self.divider -= 1;
        }
    }

    #[must_use]
    pub const fn output(&self) -> u8 {
        if self.constant_volume {
            self.volume
        } else {
            self.decay
        }
    }
}

impl Reset for Envelope {
    fn reset(&mut self, _kind: ResetKind) {
        *self = Self::new();
    }
}
