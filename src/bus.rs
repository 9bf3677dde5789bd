//! CPU memory bus routing.
//!
//! `bus_read`/`bus_write` are the sole data paths between the CPU (and the
//! DMA engine) and the rest of the system. Every access lands here, updates
//! the open-bus latch, and is visible to the debugger gate. `bus_peek` is the
//! side-effect-free path used by the debugger.
//!
//! <http://wiki.nesdev.com/w/index.php/CPU_memory_map>
//!
//! |-----------------| $FFFF |-----------------|
//! | PRG-ROM         |       |                 |
//! |-----------------| $8000 |                 |
//! | PRG-RAM or SRAM |       |   Cartridge     |
//! |-----------------| $6000 |                 |
//! | Expansion       |       |                 |
//! |-----------------| $4020 |-----------------|
//! | APU/Input       |       |                 |
//! | Registers       |       |                 |
//! |- - - - - - - - -| $4000 |                 |
//! | PPU Mirrors     |       | I/O Registers   |
//! |- - - - - - - - -| $2008 |                 |
//! | PPU Registers   |       |                 |
//! |-----------------| $2000 |-----------------|
//! | WRAM Mirrors    |       |                 |
//! |- - - - - - - - -| $0800 | 2K Internal     |
//! | WRAM            |       | Work RAM        |
//! |-----------------| $0000 |-----------------|

use crate::{
    cart::{CartMem, CartSignals},
    common::{RamState, Reset, ResetKind},
    console::Console,
    input::Player,
};
use serde::{Deserialize, Serialize};

/// Bus-resident state: internal work RAM and the open-bus latch.
#[derive(Clone, Serialize, Deserialize)]
#[must_use]
pub struct Bus {
    pub wram: Vec<u8>,
    /// Residual value of the last bus activity, returned for unmapped reads.
    pub open_bus: u8,
    pub ram_state: RamState,
}

impl Default for Bus {
    fn default() -> Self {
        Self::new(RamState::default())
    }
}

impl Bus {
    /// 2K of work RAM available to the CPU, mirrored through $1FFF.
    pub const WRAM_SIZE: usize = 0x0800;

    pub fn new(ram_state: RamState) -> Self {
        let mut wram = vec![0x00; Self::WRAM_SIZE];
        ram_state.fill(&mut wram);
        Self {
            wram,
            open_bus: 0x00,
            ram_state,
        }
    }
}

impl Reset for Bus {
    fn reset(&mut self, kind: ResetKind) {
        if kind == ResetKind::Hard {
            self.ram_state.fill(&mut self.wram);
        }
        self.open_bus = 0x00;
    }
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus")
            .field("wram_len", &self.wram.len())
            .field("ram_state", &self.ram_state)
            .field("open_bus", &format_args!("${:02X}", &self.open_bus))
            .finish()
    }
}

impl Console {
    /// Read one byte through the CPU bus, with all register side effects.
    ///
    /// Every read updates the open-bus latch to the returned value, except
    /// $4015: the APU status byte is synthesized and must not pollute open
    /// bus.
    pub fn bus_read(&mut self, addr: u16) -> u8 {
        let val = match addr {
            0x0000..=0x1FFF => self.bus.wram[(addr & 0x07FF) as usize],
            0x2000..=0x3FFF => self.ppu_register_read(addr & 0x2007),
            0x4015 => {
                let val = self.apu_read_status();
                self.debug_check_access(addr, val, false);
                return val;
            }
            0x4016 => self.input.read(Player::One) | (self.bus.open_bus & 0xE0),
            0x4017 => self.input.read(Player::Two) | (self.bus.open_bus & 0xE0),
            0x4000..=0x4014 | 0x4018..=0x401F => self.bus.open_bus,
            0x4020..=0xFFFF => self
                .cart
                .cpu_read(addr)
                .unwrap_or(self.bus.open_bus),
        };
        self.bus.open_bus = val;
        self.debug_check_access(addr, val, false);
        val
    }

    /// Write one byte through the CPU bus, with all register side effects.
    pub fn bus_write(&mut self, addr: u16, val: u8) {
        match addr {
            0x0000..=0x1FFF => self.bus.wram[(addr & 0x07FF) as usize] = val,
            0x2000..=0x3FFF => self.ppu_register_write(addr & 0x2007, val),
            0x4000..=0x4013 => self.apu_register_write(addr, val),
            0x4014 => {
                // OAM DMA begins with an alignment wait iff triggered on an
                // odd CPU cycle
                let align_wait = self.cpu.cycle & 0x01 == 0x01;
                self.dma.start_oam(val, align_wait);
            }
            0x4015 => self.apu_write_status(val),
            0x4016 => self.input.write(val),
            0x4017 => self.apu_write_frame_counter(val),
            0x4018..=0x401F => (),
            0x4020..=0xFFFF => {
                self.cart.cpu_write(addr, val);
                // The write may have switched nametable arrangement
                self.ppu.set_mirroring(self.cart.mirroring());
            }
        }
        self.bus.open_bus = val;
        self.debug_check_access(addr, val, true);
    }

    /// Side-effect-free read of the value at `addr`.
    ///
    /// No open-bus update, no PPU register clears, no mapper state changes.
    /// This is the path the debugger inspection gate uses.
    #[must_use]
    pub fn bus_peek(&self, addr: u16) -> u8 {
        match addr {
            0x0000..=0x1FFF => self.bus.wram[(addr & 0x07FF) as usize],
            0x2000..=0x3FFF => self.ppu_register_peek(addr & 0x2007),
            0x4015 => self.apu_peek_status(),
            0x4016 => self.input.peek(Player::One) | (self.bus.open_bus & 0xE0),
            0x4017 => self.input.peek(Player::Two) | (self.bus.open_bus & 0xE0),
            0x4000..=0x4014 | 0x4018..=0x401F => self.bus.open_bus,
            0x4020..=0xFFFF => self.cart.cpu_peek(addr).unwrap_or(self.bus.open_bus),
        }
    }

    /// Little-endian 16-bit read.
    pub fn bus_read_u16(&mut self, addr: u16) -> u16 {
        let lo = self.bus_read(addr);
        let hi = self.bus_read(addr.wrapping_add(1));
        u16::from_le_bytes([lo, hi])
    }

    /// Little-endian 16-bit peek.
    #[must_use]
    pub fn bus_peek_u16(&self, addr: u16) -> u16 {
        let lo = self.bus_peek(addr);
        let hi = self.bus_peek(addr.wrapping_add(1));
        u16::from_le_bytes([lo, hi])
    }
}

#[cfg(test)]
mod tests {
    use crate::console::{Config, Console};

    #[test]
    fn wram_mirrors() {
        let mut console = Console::with_config(Config::default());
        console.bus_write(0x0001, 0x66);
        assert_eq!(console.bus_peek(0x0001), 0x66, "peek ram");
        assert_eq!(console.bus_read(0x0801), 0x66, "read mirror 1");
        assert_eq!(console.bus_read(0x1001), 0x66, "read mirror 2");
        assert_eq!(console.bus_read(0x1801), 0x66, "read mirror 3");

        console.bus_write(0x0802, 0x77);
        assert_eq!(console.bus_read(0x0002), 0x77, "write mirror 1");
        console.bus_write(0x1002, 0x88);
        assert_eq!(console.bus_read(0x0002), 0x88, "write mirror 2");
        console.bus_write(0x1802, 0x99);
        assert_eq!(console.bus_read(0x0002), 0x99, "write mirror 3");
    }

    #[test]
    fn open_bus_tracks_reads_and_writes() {
        let mut console = Console::with_config(Config::default());
        console.bus_write(0x0000, 0x42);
        assert_eq!(console.bus.open_bus, 0x42, "write updates open bus");

        let val = console.bus_read(0x0000);
        assert_eq!(console.bus.open_bus, val, "read updates open bus");

        // Unmapped I/O range returns the latch
        assert_eq!(console.bus_read(0x4018), 0x42, "unmapped read is open bus");

        // No cartridge: the whole cartridge range floats
        assert_eq!(console.bus_read(0x8000), 0x42, "empty cart is open bus");
    }

    #[test]
    fn apu_status_read_preserves_open_bus() {
        let mut console = Console::with_config(Config::default());
        console.bus_write(0x0000, 0x5A);
        let _ = console.bus_read(0x4015);
        assert_eq!(console.bus.open_bus, 0x5A, "$4015 must not pollute open bus");
    }

    #[test]
    fn controller_read_merges_open_bus_high_bits() {
        let mut console = Console::with_config(Config::default());
        console.bus_write(0x0000, 0xE0);
        let _ = console.bus_read(0x0000);
        let val = console.bus_read(0x4016);
        assert_eq!(val & 0xE0, 0xE0, "open-bus high bits bleed through");
    }
}
