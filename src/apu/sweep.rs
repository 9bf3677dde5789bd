//! APU sweep unit for the pulse channels.
//!
//! See: <https://www.nesdev.org/wiki/APU_Sweep>

use serde::{Deserialize, Serialize};

#[derive(Default, Debug, Copy, Clone, Serialize, Deserialize)]
#[must_use]
pub struct Sweep {
    pub enabled: bool,
    pub period: u8,
    pub negate: bool,
    pub shift: u8,
    pub reload: bool,
    pub divider: u8,
}

impl Sweep {
    pub const fn new() -> Self {
        Self {
            enabled: false,
            period: 0,
            negate: false,
            shift: 0,
            reload: false,
            divider: 0,
        }
    }

    /// $4001/$4005 write.
    pub const fn write(&mut self, val: u8) {
        self.enabled = val & 0x80 != 0;
        self.period = (val >> 4) & 0x07;
        self.negate = val & 0x08 != 0;
        self.shift = val & 0x07;
        self.reload = true;
    }

    /// Target period for a current timer period. Pulse 1 uses one's
    /// complement negation, pulse 2 two's complement.
    #[must_use]
    pub const fn target_period(&self, period: u16, ones_complement: bool) -> u16 {
        let change = period >> self.shift;
        if self.negate {
            if ones_complement {
                period.wrapping_sub(change).wrapping_sub(1)
            } else {
                period.wrapping_sub(change)
            }
        } else {
            period.wrapping_add(change)
        }
    }

    /// Whether the sweep unit forces the channel silent for this period.
    #[must_use]
    pub const fn mutes(&self, period: u16, ones_complement: bool) -> bool {
        period < 8 || (!self.negate && self.target_period(period, ones_complement) > 0x7FF)
    }
}
