//! Channel timer abstraction for the [`Apu`](crate::apu::Apu).

use crate::common::{Reset, ResetKind};
use serde::{Deserialize, Serialize};

/// An 11-bit down-counter clocking a channel sequencer every (period + 1)
/// input cycles.
#[derive(Default, Debug, Copy, Clone, Serialize, Deserialize)]
#[must_use]
pub struct Timer {
    pub period: u16,
    pub counter: u16,
}

impl Timer {
    pub const fn new(period: u16) -> Self {
        Self {
            period,
            counter: period,
        }
    }

    pub const fn reload(&mut self) {
        self.counter = self.period;
    }

    pub const fn set_period_lo(&mut self, val: u8) {
        self.period = (self.period & 0xFF00) | val as u16;
    }

    pub const fn set_period_hi(&mut self, val: u8) {
        self.period = (self.period & 0x00FF) | ((val as u16 & 0x07) << 8);
    }

    /// Count down one input cycle; returns true when the sequencer clocks.
    pub const fn clock(&mut self) -> bool {
        if self.counter == 0 {
            self.counter = self.period;
            true
        } else {
            self.counter -= 1;
            false
        }
    }
}

impl Reset for Timer {
    fn reset(&mut self, _kind: ResetKind) {
        self.counter = 0;
        self.period = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clocks_every_period_plus_one() {
        let mut timer = Timer::new(3);
        let clocks: Vec<bool> = (0..8).map(|_| timer.clock()).collect();
        assert_eq!(clocks, [false, false, false, true, false, false, false, true]);
    }
}
