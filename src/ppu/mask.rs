//! PPUMASK register implementation.
//!
//! See: <https://wiki.nesdev.com/w/index.php/PPU_registers#PPUMASK>

use crate::common::NesRegion;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    // $2001 PPUMASK
    //
    // BGRs bMmG
    // |||| |||+- Grayscale: 0 = normal color, 1 = grayscale
    // |||| ||+-- 1 = Show background in leftmost 8 pixels of screen, 0 = Hide
    // |||| |+--- 1 = Show sprites in leftmost 8 pixels of screen, 0 = Hide
    // |||| +---- 1 = Show background
    // |||+------ 1 = Show sprites
    // ||+------- Emphasize red (green on PAL)
    // |+-------- Emphasize green (red on PAL)
    // +--------- Emphasize blue
    #[derive(Default, Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
    #[must_use]
    pub struct Mask: u8 {
        const GRAYSCALE = 0x01;
        const SHOW_LEFT_BG = 0x02;
        const SHOW_LEFT_SPR = 0x04;
        const SHOW_BG = 0x08;
        const SHOW_SPR = 0x10;
        const EMPHASIZE_RED = 0x20;
        const EMPHASIZE_GREEN = 0x40;
        const EMPHASIZE_BLUE = 0x80;
    }
}

impl Mask {
    pub const fn new() -> Self {
        Self::empty()
    }

    pub fn write(&mut self, val: u8) {
        *self = Self::from_bits_truncate(val);
    }

    /// Rendering is enabled when either the background or sprites show.
    #[inline]
    #[must_use]
    pub const fn rendering_enabled(&self) -> bool {
        self.intersects(Self::SHOW_BG.union(Self::SHOW_SPR))
    }

    #[inline]
    #[must_use]
    pub const fn show_bg(&self) -> bool {
        self.contains(Self::SHOW_BG)
    }

    #[inline]
    #[must_use]
    pub const fn show_spr(&self) -> bool {
        self.contains(Self::SHOW_SPR)
    }

    #[inline]
    #[must_use]
    pub const fn show_left_bg(&self) -> bool {
        self.contains(Self::SHOW_LEFT_BG)
    }

    #[inline]
    #[must_use]
    pub const fn show_left_spr(&self) -> bool {
        self.contains(Self::SHOW_LEFT_SPR)
    }

    /// Palette mask applied to every output color.
    #[inline]
    #[must_use]
    pub const fn grayscale_mask(&self) -> u8 {
        if self.contains(Self::GRAYSCALE) {
            0x30
        } else {
            0x3F
        }
    }

    /// Emphasis bits placed above the 6-bit color in the framebuffer. The
    /// red/green emphasis lines are swapped on PAL hardware.
    #[must_use]
    pub fn emphasis(&self, region: NesRegion) -> u16 {
        let red = self.contains(Self::EMPHASIZE_RED);
        let green = self.contains(Self::EMPHASIZE_GREEN);
        let blue = self.contains(Self::EMPHASIZE_BLUE);
        let (red, green) = match region {
            NesRegion::Ntsc => (red, green),
            NesRegion::Pal => (green, red),
        };
        ((red as u16) << 6) | ((green as u16) << 7) | ((blue as u16) << 8)
    }
}
