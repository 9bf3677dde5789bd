//! Cartridge capability interface.
//!
//! The console owns exactly one cartridge at a time and talks to it through a
//! small, closed capability set: CPU/PPU reads and writes, nametable
//! mirroring, an IRQ poll, and an A12 rising-edge notification. Boards are a
//! closed set known at compile time, so dispatch goes through a tagged enum
//! rather than a vtable.
//!
//! <https://wiki.nesdev.org/w/index.php/Mapper>

use crate::{
    common::{Regional, Reset, ResetKind},
    ppu::Mirroring,
};
use enum_dispatch::enum_dispatch;
use serde::{Deserialize, Serialize};

/// Cartridge memory capability: reads resolve to `Some(value)` or `None` for
/// address ranges the board leaves undecoded (open bus).
///
/// `cpu_peek`/`ppu_peek` are the side-effect-free variants used by the
/// debugger inspection gate.
#[enum_dispatch(Cartridge)]
pub trait CartMem {
    fn cpu_read(&mut self, addr: u16) -> Option<u8> {
        self.cpu_peek(addr)
    }

    fn cpu_peek(&self, _addr: u16) -> Option<u8> {
        None
    }

    fn cpu_write(&mut self, _addr: u16, _val: u8) {}

    fn ppu_read(&mut self, addr: u16) -> u8 {
        self.ppu_peek(addr)
    }

    fn ppu_peek(&self, _addr: u16) -> u8 {
        0x00
    }

    fn ppu_write(&mut self, _addr: u16, _val: u8) {}
}

/// Cartridge signal capability: mirroring selection and IRQ generation.
#[enum_dispatch(Cartridge)]
pub trait CartSignals {
    fn mirroring(&self) -> Mirroring {
        Mirroring::default()
    }

    /// Level of the cartridge IRQ line.
    fn poll_irq(&self) -> bool {
        false
    }

    /// Notification of a 0-to-1 transition of PPU address bit 12. Boards with
    /// scanline counters clock them here.
    fn notify_a12_rising(&mut self) {}
}

/// The inserted cartridge. `Empty` leaves the whole cartridge space on the
/// open bus.
#[enum_dispatch]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[must_use]
pub enum Cartridge {
    Empty,
    TestRam,
    Nrom,
    Txrom,
}

impl Cartridge {
    pub fn none() -> Self {
        Empty.into()
    }

    /// Construct an NROM board from raw PRG/CHR images.
    pub fn nrom(prg_rom: Vec<u8>, chr: Vec<u8>, mirroring: Mirroring) -> Self {
        Nrom::new(prg_rom, chr, mirroring).into()
    }

    /// Construct a flat 64 KiB RAM board for unit tests: every CPU address is
    /// RAM, CHR is 8 KiB RAM, mirroring is vertical.
    pub fn test_ram() -> Self {
        TestRam::new().into()
    }
}

impl Default for Cartridge {
    fn default() -> Self {
        Self::none()
    }
}

#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
#[must_use]
pub struct Empty;

impl CartMem for Empty {}
impl CartSignals for Empty {}
impl Regional for Empty {}
impl Reset for Empty {}

/// Flat RAM board backing the unit and integration tests: the whole
/// CPU-visible cartridge range and the reset/interrupt vectors are writable.
#[derive(Clone, Serialize, Deserialize)]
#[must_use]
pub struct TestRam {
    ram: Vec<u8>,
    chr: Vec<u8>,
    mirroring: Mirroring,
}

impl TestRam {
    pub fn new() -> Self {
        Self {
            ram: vec![0x00; 0x1_0000],
            chr: vec![0x00; 0x2000],
            mirroring: Mirroring::Vertical,
        }
    }
}

impl Default for TestRam {
    fn default() -> Self {
        Self::new()
    }
}

impl CartMem for TestRam {
    fn cpu_peek(&self, addr: u16) -> Option<u8> {
        Some(self.ram[addr as usize])
    }

    fn cpu_write(&mut self, addr: u16, val: u8) {
        self.ram[addr as usize] = val;
    }

    fn ppu_peek(&self, addr: u16) -> u8 {
        self.chr[(addr & 0x1FFF) as usize]
    }

    fn ppu_write(&mut self, addr: u16, val: u8) {
        self.chr[(addr & 0x1FFF) as usize] = val;
    }
}

impl CartSignals for TestRam {
    fn mirroring(&self) -> Mirroring {
        self.mirroring
    }
}

impl Regional for TestRam {}

impl Reset for TestRam {
    fn reset(&mut self, kind: ResetKind) {
        if kind == ResetKind::Hard {
            self.ram.fill(0x00);
            self.chr.fill(0x00);
        }
    }
}

impl std::fmt::Debug for TestRam {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestRam")
            .field("mirroring", &self.mirroring)
            .finish_non_exhaustive()
    }
}

/// NROM (mapper 0): 16/32 KiB PRG-ROM, 8 KiB PRG-RAM at $6000, 8 KiB CHR.
///
/// <https://www.nesdev.org/wiki/NROM>
#[derive(Clone, Serialize, Deserialize)]
#[must_use]
pub struct Nrom {
    prg_rom: Vec<u8>,
    prg_ram: Vec<u8>,
    chr: Vec<u8>,
    chr_writable: bool,
    mirroring: Mirroring,
}

impl Nrom {
    const PRG_RAM_SIZE: usize = 0x2000;
    const CHR_SIZE: usize = 0x2000;

    pub fn new(prg_rom: Vec<u8>, chr: Vec<u8>, mirroring: Mirroring) -> Self {
        // An absent CHR image means the board provides CHR-RAM instead
        let chr_writable = chr.is_empty();
        let chr = if chr_writable {
            vec![0x00; Self::CHR_SIZE]
        } else {
            chr
        };
        Self {
            prg_rom,
            prg_ram: vec![0x00; Self::PRG_RAM_SIZE],
            chr,
            chr_writable,
            mirroring,
        }
    }
}

impl CartMem for Nrom {
    fn cpu_peek(&self, addr: u16) -> Option<u8> {
        match addr {
            0x6000..=0x7FFF => Some(self.prg_ram[(addr & 0x1FFF) as usize]),
            0x8000..=0xFFFF if !self.prg_rom.is_empty() => {
                Some(self.prg_rom[addr as usize % self.prg_rom.len()])
            }
            _ => None,
        }
    }

    fn cpu_write(&mut self, addr: u16, val: u8) {
        if let 0x6000..=0x7FFF = addr {
            self.prg_ram[(addr & 0x1FFF) as usize] = val;
        }
    }

    fn ppu_peek(&self, addr: u16) -> u8 {
        self.chr[addr as usize % self.chr.len()]
    }

    fn ppu_write(&mut self, addr: u16, val: u8) {
        if self.chr_writable {
            let idx = addr as usize % self.chr.len();
            self.chr[idx] = val;
        }
    }
}

impl CartSignals for Nrom {
    fn mirroring(&self) -> Mirroring {
        self.mirroring
    }
}

impl Regional for Nrom {}

impl Reset for Nrom {}

impl std::fmt::Debug for Nrom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Nrom")
            .field("prg_rom_len", &self.prg_rom.len())
            .field("chr_len", &self.chr.len())
            .field("chr_writable", &self.chr_writable)
            .field("mirroring", &self.mirroring)
            .finish()
    }
}

/// TxROM-class board (MMC3): dynamic mirroring plus the A12-clocked scanline
/// IRQ counter. PRG/CHR stay linearly mapped; full bank switching is the
/// loader's concern, not the core's.
///
/// <https://www.nesdev.org/wiki/MMC3>
#[derive(Clone, Serialize, Deserialize)]
#[must_use]
pub struct Txrom {
    prg_rom: Vec<u8>,
    prg_ram: Vec<u8>,
    chr: Vec<u8>,
    mirroring: Mirroring,
    irq_latch: u8,
    irq_counter: u8,
    irq_reload: bool,
    irq_enabled: bool,
    irq_pending: bool,
}

impl Txrom {
    pub fn new(prg_rom: Vec<u8>, chr: Vec<u8>, mirroring: Mirroring) -> Self {
        Self {
            prg_rom,
            prg_ram: vec![0x00; 0x2000],
            chr,
            mirroring,
            irq_latch: 0x00,
            irq_counter: 0x00,
            irq_reload: false,
            irq_enabled: false,
            irq_pending: false,
        }
    }
}

impl CartMem for Txrom {
    fn cpu_peek(&self, addr: u16) -> Option<u8> {
        match addr {
            0x6000..=0x7FFF => Some(self.prg_ram[(addr & 0x1FFF) as usize]),
            0x8000..=0xFFFF if !self.prg_rom.is_empty() => {
                Some(self.prg_rom[addr as usize % self.prg_rom.len()])
            }
            _ => None,
        }
    }

    fn cpu_write(&mut self, addr: u16, val: u8) {
        // Registers decode A0 and A13-A14 only
        match (addr, addr & 0x01) {
            (0x6000..=0x7FFF, _) => self.prg_ram[(addr & 0x1FFF) as usize] = val,
            (0xA000..=0xBFFF, 0) => {
                self.mirroring = if val & 0x01 == 0x01 {
                    Mirroring::Horizontal
                } else {
                    Mirroring::Vertical
                };
            }
            (0xC000..=0xDFFF, 0) => self.irq_latch = val,
            (0xC000..=0xDFFF, 1) => {
                self.irq_counter = 0x00;
                self.irq_reload = true;
            }
            (0xE000..=0xFFFF, 0) => {
                self.irq_enabled = false;
                self.irq_pending = false;
            }
            (0xE000..=0xFFFF, 1) => self.irq_enabled = true,
            _ => (),
        }
    }

    fn ppu_peek(&self, addr: u16) -> u8 {
        if self.chr.is_empty() {
            0x00
        } else {
            self.chr[addr as usize % self.chr.len()]
        }
    }
}

impl CartSignals for Txrom {
    fn mirroring(&self) -> Mirroring {
        self.mirroring
    }

    fn poll_irq(&self) -> bool {
        self.irq_pending
    }

    fn notify_a12_rising(&mut self) {
        if self.irq_counter == 0 || self.irq_reload {
            self.irq_counter = self.irq_latch;
            self.irq_reload = false;
        } else {
            self.irq_counter -= 1;
        }
        if self.irq_counter == 0 && self.irq_enabled {
            self.irq_pending = true;
        }
    }
}

impl Regional for Txrom {}

impl Reset for Txrom {
    fn reset(&mut self, _kind: ResetKind) {
        self.irq_latch = 0x00;
        self.irq_counter = 0x00;
        self.irq_reload = false;
        self.irq_enabled = false;
        self.irq_pending = false;
    }
}

impl std::fmt::Debug for Txrom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Txrom")
            .field("mirroring", &self.mirroring)
            .field("irq_latch", &self.irq_latch)
            .field("irq_counter", &self.irq_counter)
            .field("irq_enabled", &self.irq_enabled)
            .field("irq_pending", &self.irq_pending)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn txrom_scanline_irq_counts_down() {
        let mut cart = Txrom::new(vec![0x00; 0x8000], vec![], Mirroring::Vertical);
        cart.cpu_write(0xC000, 3); // latch
        cart.cpu_write(0xC001, 0); // reload
        cart.cpu_write(0xE001, 0); // enable

        // Reload edge, then 3 countdown edges
        for _ in 0..3 {
            cart.notify_a12_rising();
            assert!(!cart.poll_irq());
        }
        cart.notify_a12_rising();
        assert!(cart.poll_irq(), "IRQ after counter reaches zero");

        // Disabling acknowledges the IRQ
        cart.cpu_write(0xE000, 0);
        assert!(!cart.poll_irq());
    }

    #[test]
    fn txrom_dynamic_mirroring() {
        let mut cart = Txrom::new(vec![], vec![], Mirroring::Vertical);
        cart.cpu_write(0xA000, 0x01);
        assert_eq!(cart.mirroring(), Mirroring::Horizontal);
        cart.cpu_write(0xA000, 0x00);
        assert_eq!(cart.mirroring(), Mirroring::Vertical);
    }

    #[test]
    fn nrom_mirrors_16k_prg() {
        let mut prg = vec![0x00; 0x4000];
        prg[0x3FFC] = 0x34;
        prg[0x3FFD] = 0x12;
        let cart = Nrom::new(prg, vec![], Mirroring::Horizontal);
        assert_eq!(cart.cpu_peek(0xBFFC), Some(0x34), "first image");
        assert_eq!(cart.cpu_peek(0xFFFC), Some(0x34), "mirrored image");
        assert_eq!(cart.cpu_peek(0xFFFD), Some(0x12));
        assert_eq!(cart.cpu_peek(0x4020), None, "undecoded range is open bus");
    }
}
