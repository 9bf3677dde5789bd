//! PPUCTRL register implementation.
//!
//! See: <https://wiki.nesdev.com/w/index.php/PPU_registers#PPUCTRL>

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    // $2000 PPUCTRL
    //
    // VPHB SINN
    // |||| ||++- Nametable Select: 0b00 = $2000; 0b01 = $2400;
    // |||| ||                      0b10 = $2800; 0b11 = $2C00
    // |||| |+--- VRAM Increment Mode: 0 = add 1, going across; 1 = add 32, going down
    // |||| +---- Sprite Pattern Select for 8x8: 0 = $0000, 1 = $1000, ignored in 8x16 mode
    // |||+------ Background Pattern Select: 0 = $0000, 1 = $1000
    // ||+------- Sprite Height: 0 = 8x8, 1 = 8x16
    // |+-------- PPU Master/Slave: 0 = read from EXT, 1 = write to EXT
    // +--------- NMI Enable: NMI at next vblank: 0 = off, 1: on
    #[derive(Default, Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
    #[must_use]
    pub struct Ctrl: u8 {
        const NAMETABLE_LO = 0x01;
        const NAMETABLE_HI = 0x02;
        const VRAM_INCREMENT = 0x04;
        const SPR_SELECT = 0x08;
        const BG_SELECT = 0x10;
        const SPR_HEIGHT = 0x20;
        const MASTER_SLAVE = 0x40;
        const NMI_ENABLE = 0x80;
    }
}

impl Ctrl {
    pub const fn new() -> Self {
        Self::empty()
    }

    pub fn write(&mut self, val: u8) {
        *self = Self::from_bits_truncate(val);
    }

    #[inline]
    #[must_use]
    pub const fn nmi_enabled(&self) -> bool {
        self.contains(Self::NMI_ENABLE)
    }

    /// $2007 access increment: 1 going across, 32 going down.
    #[inline]
    #[must_use]
    pub const fn vram_increment(&self) -> u16 {
        if self.contains(Self::VRAM_INCREMENT) {
            32
        } else {
            1
        }
    }

    /// Pattern table base for 8x8 sprites: $0000 or $1000.
    #[inline]
    #[must_use]
    pub const fn spr_select(&self) -> u16 {
        (self.contains(Self::SPR_SELECT) as u16) << 12
    }

    /// Background pattern table base: $0000 or $1000.
    #[inline]
    #[must_use]
    pub const fn bg_select(&self) -> u16 {
        (self.contains(Self::BG_SELECT) as u16) << 12
    }

    /// Sprite height in scanlines: 8 or 16.
    #[inline]
    #[must_use]
    pub const fn spr_height(&self) -> u32 {
        if self.contains(Self::SPR_HEIGHT) {
            16
        } else {
            8
        }
    }

    /// The two nametable select bits.
    #[inline]
    #[must_use]
    pub const fn nametable_select(&self) -> u8 {
        self.bits() & 0x03
    }
}
