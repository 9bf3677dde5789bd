//! Master clock and CPU/APU tick phase derivation.

use serde::{Deserialize, Serialize};

/// Monotonic PPU-cycle counter driving the whole console.
///
/// Every call to [`Console::tick`](crate::console::Console::tick) advances the
/// counter by exactly one. The CPU and APU share a derived phase: they are
/// active on one out of every [`MasterClock::CPU_DIVIDER`] master cycles. All
/// ledger timestamps are expressed in master cycles.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[must_use]
pub struct MasterClock {
    cycles: u64,
}

impl MasterClock {
    /// PPU cycles per CPU/APU cycle.
    pub const CPU_DIVIDER: u64 = 3;

    pub const fn new() -> Self {
        Self { cycles: 0 }
    }

    /// Total master cycles elapsed since power-on.
    #[inline]
    #[must_use]
    pub const fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Advance the clock by exactly one master cycle.
    #[inline]
    pub const fn advance(&mut self) {
        self.cycles += 1;
    }

    /// Whether the CPU and APU advance on the current master cycle.
    ///
    /// The phase offset is fixed by `power_on`: cycle 0 is CPU-active, and the
    /// first tick advances the clock to 1, so the first CPU-active tick lands
    /// on master cycle [`MasterClock::CPU_DIVIDER`].
    #[inline]
    #[must_use]
    pub const fn cpu_active(&self) -> bool {
        self.cycles % Self::CPU_DIVIDER == 0
    }

    /// CPU cycles elapsed, rounded down.
    #[inline]
    #[must_use]
    pub const fn cpu_cycles(&self) -> u64 {
        self.cycles / Self::CPU_DIVIDER
    }

    /// Restart counting from zero. Used by `power_on` and `reset`.
    pub const fn restart(&mut self) {
        self.cycles = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_single_step() {
        let mut clock = MasterClock::new();
        for expected in 1..=10_000u64 {
            clock.advance();
            assert_eq!(clock.cycles(), expected, "one increment per advance");
        }
    }

    #[test]
    fn cpu_phase_every_third_cycle() {
        let mut clock = MasterClock::new();
        let mut cpu_ticks = 0;
        for _ in 0..9 {
            clock.advance();
            if clock.cpu_active() {
                cpu_ticks += 1;
            }
        }
        assert_eq!(cpu_ticks, 3, "three CPU ticks in nine master cycles");
        assert_eq!(clock.cpu_cycles(), 3);
    }
}
