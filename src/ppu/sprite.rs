//! Sprite latch data loaded during dots 257-320 for the next scanline.

use serde::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
#[must_use]
pub struct Sprite {
    pub x: u32,
    pub y: u32,
    pub tile_lo: u8,
    pub tile_hi: u8,
    pub palette: u8,
    pub bg_priority: bool,
    pub flip_horizontal: bool,
    pub flip_vertical: bool,
}

impl Sprite {
    pub const fn new() -> Self {
        Self {
            x: 0x0000,
            y: 0x0000,
            tile_lo: 0x00,
            tile_hi: 0x00,
            palette: 0x00,
            bg_priority: false,
            flip_horizontal: false,
            flip_vertical: false,
        }
    }
}

impl Default for Sprite {
    fn default() -> Self {
        Self::new()
    }
}
