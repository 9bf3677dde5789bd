//! PPUSTATUS register implementation.
//!
//! The VBlank bit is not stored here: the readable flag is owned by the
//! [VBlank ledger](crate::ppu::vblank::VblankLedger), which decouples it from
//! the latched NMI edge.
//!
//! See: <https://wiki.nesdev.com/w/index.php/PPU_registers#PPUSTATUS>

use crate::common::{Reset, ResetKind};
use serde::{Deserialize, Serialize};

/// $2002 PPUSTATUS
///
/// VSO. ....
/// |||+-++++- PPU open bus. Returns stale PPU bus contents.
/// ||+------- Sprite overflow, set during sprite evaluation and cleared at
/// ||         dot 1 of the pre-render line.
/// |+-------- Sprite 0 Hit, set when a nonzero pixel of sprite 0 overlaps a
/// |          nonzero background pixel; cleared at dot 1 of the pre-render
/// |          line.
/// +--------- Vertical blank has started.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[must_use]
pub struct Status {
    pub spr_overflow: bool,
    pub spr_zero_hit: bool,
}

impl Status {
    pub const VBLANK: u8 = 0x80;
    pub const SPR_ZERO_HIT: u8 = 0x40;
    pub const SPR_OVERFLOW: u8 = 0x20;

    pub const fn new() -> Self {
        Self {
            spr_overflow: false,
            spr_zero_hit: false,
        }
    }

    /// Compose the driven upper three bits; the caller merges the PPU open
    /// bus into the rest.
    #[must_use]
    pub const fn bits(&self, vblank_visible: bool) -> u8 {
        ((vblank_visible as u8) << 7)
            | ((self.spr_zero_hit as u8) << 6)
            | ((self.spr_overflow as u8) << 5)
    }
}

impl Reset for Status {
    // https://www.nesdev.org/wiki/PPU_power_up_state
    fn reset(&mut self, kind: ResetKind) {
        if kind == ResetKind::Hard {
            self.spr_overflow = false;
            self.spr_zero_hit = false;
        }
    }
}
