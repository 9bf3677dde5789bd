//! NES PPU (Picture Processing Unit) implementation.
//!
//! The PPU advances one dot per master cycle. Position advance (including the
//! odd-frame dot skip) and dot execution are separate phases of the console
//! tick so that CPU bus activity earlier in the same master cycle is
//! observable by the VBlank ledger before the dot's events land.
//!
//! See: <https://wiki.nesdev.org/w/index.php/PPU>

use crate::{
    cart::{CartMem, CartSignals},
    common::{NesRegion, Regional, Reset, ResetKind},
    console::Console,
    ppu::{ctrl::Ctrl, frame::Frame, mask::Mask, scroll::Scroll, sprite::Sprite, status::Status,
          vblank::VblankLedger},
};
use serde::{Deserialize, Serialize};
use tracing::trace;

pub mod ctrl;
pub mod frame;
pub mod mask;
pub mod scroll;
pub mod sprite;
pub mod status;
pub mod vblank;

/// Nametable Mirroring Mode
///
/// <https://wiki.nesdev.org/w/index.php/Mirroring#Nametable_Mirroring>
#[derive(Default, Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[must_use]
pub enum Mirroring {
    Vertical = 0,
    #[default]
    Horizontal = 1,
    SingleScreenA = 2,
    SingleScreenB = 3,
    FourScreen = 4,
}

/// NES PPU.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[must_use]
pub struct Ppu {
    /// (0, 340) dots per scanline.
    pub dot: u32,
    /// (0, 261) NTSC or (0, 311) PAL scanlines per frame.
    pub scanline: u32,
    /// Scanline that Vertical Blank (VBlank) starts on.
    pub vblank_scanline: u32,
    /// Scanline that Prerender starts on.
    pub prerender_scanline: u32,
    pub region: NesRegion,
    pub frame: Frame,
    /// Whether pixel output is skipped (headless embedders).
    pub skip_rendering: bool,

    /// $2000 PPUCTRL (write-only).
    pub ctrl: Ctrl,
    /// $2001 PPUMASK (write-only).
    pub mask: Mask,
    /// $2002 PPUSTATUS sprite bits (read-only).
    pub status: Status,
    /// $2005 PPUSCROLL and $2006 PPUADDR internal registers.
    pub scroll: Scroll,
    /// Cycle-stamped VBlank/NMI record.
    pub ledger: VblankLedger,

    /// Nametable arrangement, re-queried from the cartridge on writes.
    pub mirroring: Mirroring,
    /// 2K of console-internal nametable RAM.
    pub ciram: Vec<u8>,
    /// 32 bytes of palette RAM.
    pub palette: Vec<u8>,

    /// $2004 Object Attribute Memory (OAM) data (read/write).
    pub oamdata: Vec<u8>,
    /// $2003 OAM addr (write-only).
    pub oamaddr: u8,
    /// Secondary OAM holding the sprites of the upcoming scanline.
    pub secondary_oamdata: Vec<u8>,
    /// Up to 8 sprite latches per scanline.
    pub sprites: [Sprite; 8],
    /// Whether a sprite covers the given x-coordinate.
    spr_present: Vec<bool>,

    // Sprite evaluation scratch state
    oam_fetch: u8,
    oam_eval_done: bool,
    secondary_oamaddr: u8,
    overflow_count: u8,
    spr_in_range: bool,
    spr_zero_in_range: bool,
    spr_zero_visible: bool,
    spr_count: usize,
    oamaddr_lo: u8,
    oamaddr_hi: u8,

    // Background fetch pipeline
    tile_shift_lo: u16,
    tile_shift_hi: u16,
    tile_lo: u8,
    tile_hi: u8,
    tile_addr: u16,
    prev_palette: u8,
    curr_palette: u8,
    next_palette: u8,

    /// $2007 PPUDATA read buffer.
    pub vram_buffer: u8,
    /// PPU I/O data latch, decayed value of the lower PPUSTATUS bits.
    pub open_bus: u8,

    /// Internal signal preventing register access until warmup completes.
    ///
    /// See: <https://www.nesdev.org/wiki/PPU_power_up_state>
    pub reset_signal: bool,
    pub emulate_warmup: bool,

    /// Level of the NMI output wired to the CPU at the end of every tick.
    pub nmi_line: bool,
    /// One-shot raised at VBlank start, consumed by `emulate_frame`.
    pub frame_complete: bool,
    /// Last observed level of PPU address bit 12, for edge detection.
    a12_state: bool,
}

impl Default for Ppu {
    fn default() -> Self {
        Self::new(NesRegion::Ntsc)
    }
}

impl Ppu {
    pub const WIDTH: u32 = Frame::WIDTH;
    pub const HEIGHT: u32 = Frame::HEIGHT;

    pub const NT_START: u16 = 0x2000;
    pub const PALETTE_START: u16 = 0x3F00;

    pub const OAM_SIZE: usize = 256; // 64 4-byte sprites per frame
    pub const SECONDARY_OAM_SIZE: usize = 32; // 8 4-byte sprites per scanline
    const CIRAM_SIZE: usize = 0x0800;
    const PALETTE_SIZE: usize = 32;

    // Dots
    // https://www.nesdev.org/wiki/PPU_rendering
    pub const VBLANK_DOT: u32 = 1;
    pub const VISIBLE_START: u32 = 1;
    pub const INC_Y: u32 = 256;
    pub const VISIBLE_END: u32 = 256;
    pub const SPR_FETCH_START: u32 = 257;
    pub const COPY_Y_START: u32 = 280;
    pub const COPY_Y_END: u32 = 304;
    pub const SPR_FETCH_END: u32 = 320;
    pub const BG_PREFETCH_START: u32 = 321;
    pub const BG_PREFETCH_END: u32 = 336;
    pub const BG_DUMMY_START: u32 = 337;
    pub const ODD_SKIP_DOT: u32 = 339;
    pub const DOT_END: u32 = 340;

    // Scanlines
    pub const VISIBLE_SCANLINE_END: u32 = 239;
    pub const VBLANK_SCANLINE: u32 = 241;
    pub const PRERENDER_SCANLINE_NTSC: u32 = 261;
    pub const PRERENDER_SCANLINE_PAL: u32 = 311;

    pub fn new(region: NesRegion) -> Self {
        let mut ppu = Self {
            dot: 0,
            scanline: 0,
            vblank_scanline: Self::VBLANK_SCANLINE,
            prerender_scanline: Self::PRERENDER_SCANLINE_NTSC,
            region,
            frame: Frame::new(),
            skip_rendering: false,

            ctrl: Ctrl::new(),
            mask: Mask::new(),
            status: Status::new(),
            scroll: Scroll::new(),
            ledger: VblankLedger::new(),

            mirroring: Mirroring::default(),
            ciram: vec![0x00; Self::CIRAM_SIZE],
            palette: vec![0x00; Self::PALETTE_SIZE],

            oamdata: vec![0x00; Self::OAM_SIZE],
            oamaddr: 0x00,
            secondary_oamdata: vec![0x00; Self::SECONDARY_OAM_SIZE],
            sprites: [Sprite::new(); 8],
            spr_present: vec![false; Self::WIDTH as usize],

            oam_fetch: 0x00,
            oam_eval_done: false,
            secondary_oamaddr: 0x00,
            overflow_count: 0,
            spr_in_range: false,
            spr_zero_in_range: false,
            spr_zero_visible: false,
            spr_count: 0,
            oamaddr_lo: 0x00,
            oamaddr_hi: 0x00,

            tile_shift_lo: 0x0000,
            tile_shift_hi: 0x0000,
            tile_lo: 0x00,
            tile_hi: 0x00,
            tile_addr: 0x0000,
            prev_palette: 0x00,
            curr_palette: 0x00,
            next_palette: 0x00,

            vram_buffer: 0x00,
            open_bus: 0x00,

            reset_signal: false,
            emulate_warmup: false,

            nmi_line: false,
            frame_complete: false,
            a12_state: false,
        };
        ppu.set_region(region);
        ppu.park_before_first_frame();
        ppu
    }

    /// Position the clock three dots before (0, 0) of frame 1. This fixes
    /// the CPU/PPU power-on alignment so that scanline 241 dot 1 lands on a
    /// CPU-active master cycle, making the $2002 race window reachable.
    fn park_before_first_frame(&mut self) {
        self.scanline = self.prerender_scanline;
        self.dot = Self::DOT_END - 2;
    }

    /// Return the current frame buffer of palette indices.
    #[inline]
    #[must_use]
    pub fn frame_buffer(&self) -> &[u16] {
        self.frame.buffer()
    }

    #[inline]
    #[must_use]
    pub const fn frame_number(&self) -> u32 {
        self.frame.number()
    }

    /// Whether background or sprite rendering is enabled.
    #[inline]
    #[must_use]
    pub const fn rendering_enabled(&self) -> bool {
        self.mask.rendering_enabled()
    }

    pub fn set_mirroring(&mut self, mirroring: Mirroring) {
        self.mirroring = mirroring;
    }

    /// Whether register access is still blocked by the power-up warmup
    /// period.
    #[inline]
    #[must_use]
    pub const fn warming_up(&self) -> bool {
        self.reset_signal && self.emulate_warmup
    }

    /// Observe a PPU address-bus value; returns true on an A12 rising edge.
    pub fn check_a12(&mut self, addr: u16) -> bool {
        let a12 = addr & 0x1000 != 0;
        let rising = a12 && !self.a12_state;
        self.a12_state = a12;
        rising
    }

    /// CIRAM index for a nametable address under the current mirroring.
    fn ciram_index(&self, addr: u16) -> usize {
        let addr = addr & 0x0FFF;
        let table = (addr >> 10) as usize;
        let offset = (addr & 0x03FF) as usize;
        let table = match self.mirroring {
            Mirroring::Vertical | Mirroring::FourScreen => table & 0x01,
            Mirroring::Horizontal => table >> 1,
            Mirroring::SingleScreenA => 0,
            Mirroring::SingleScreenB => 1,
        };
        (table << 10) | offset
    }

    #[must_use]
    pub fn read_ciram(&self, addr: u16) -> u8 {
        self.ciram[self.ciram_index(addr)]
    }

    pub fn write_ciram(&mut self, addr: u16, val: u8) {
        let index = self.ciram_index(addr);
        self.ciram[index] = val;
    }

    /// Palette index for an address, honoring the $3F10/$14/$18/$1C mirrors
    /// of the background entries.
    const fn palette_index(addr: u16) -> usize {
        let index = (addr & 0x1F) as usize;
        if index >= 0x10 && index & 0x03 == 0 {
            index - 0x10
        } else {
            index
        }
    }

    #[must_use]
    pub fn read_palette(&self, addr: u16) -> u8 {
        self.palette[Self::palette_index(addr)]
    }

    pub fn write_palette(&mut self, addr: u16, val: u8) {
        self.palette[Self::palette_index(addr)] = val & 0x3F;
    }

    /// $2004 value visible right now, including the secondary-OAM exposure
    /// during sprite fetches.
    #[must_use]
    pub fn peek_oamdata(&self) -> u8 {
        if self.scanline <= Self::VISIBLE_SCANLINE_END
            && self.rendering_enabled()
            && matches!(self.dot, Self::SPR_FETCH_START..=Self::SPR_FETCH_END)
        {
            self.secondary_oamdata[(self.secondary_oamaddr & 0x1F) as usize]
        } else {
            self.oamdata[self.oamaddr as usize]
        }
    }

    /// $2004 write. During rendering the value is dropped and OAMADDR takes
    /// a glitch increment of its high six bits.
    pub fn write_oamdata(&mut self, mut val: u8) {
        if self.rendering_enabled()
            && (self.scanline <= Self::VISIBLE_SCANLINE_END
                || self.scanline == self.prerender_scanline)
        {
            self.oamaddr = self.oamaddr.wrapping_add(4);
        } else {
            if self.oamaddr & 0x03 == 0x02 {
                // Attribute bits 2-4 are unimplemented and read back as 0
                val &= 0xE3;
            }
            self.oamdata[self.oamaddr as usize] = val;
            self.oamaddr = self.oamaddr.wrapping_add(1);
        }
    }

    fn increment_vram_addr(&mut self) {
        // During rendering, $2007 access increments coarse X and fine Y
        // simultaneously
        if self.mask.rendering_enabled()
            && (self.scanline == self.prerender_scanline
                || self.scanline <= Self::VISIBLE_SCANLINE_END)
        {
            self.scroll.increment_x();
            self.scroll.increment_y();
        } else {
            self.scroll.increment(self.ctrl.vram_increment());
        }
    }

    /// Refresh the NMI output level from the ledger.
    pub fn refresh_nmi_line(&mut self) {
        self.nmi_line = self.ledger.should_assert_nmi_line(self.ctrl.nmi_enabled());
    }
}

impl Regional for Ppu {
    fn region(&self) -> NesRegion {
        self.region
    }

    fn set_region(&mut self, region: NesRegion) {
        self.region = region;
        self.vblank_scanline = Self::VBLANK_SCANLINE;
        self.prerender_scanline = match region {
            NesRegion::Ntsc => Self::PRERENDER_SCANLINE_NTSC,
            NesRegion::Pal => Self::PRERENDER_SCANLINE_PAL,
        };
    }
}

impl Reset for Ppu {
    fn reset(&mut self, kind: ResetKind) {
        if kind == ResetKind::Hard {
            self.ctrl = Ctrl::new();
            self.mask = Mask::new();
            self.oamaddr = 0x00;
            self.ciram.fill(0x00);
            self.palette.fill(0x00);
            self.oamdata.fill(0x00);
            // Warmup only applies after a power cycle
            self.reset_signal = true;
        }
        self.status.reset(kind);
        self.scroll.reset(kind);
        self.ledger.reset(kind);
        self.frame = Frame::new();
        self.secondary_oamdata.fill(0x00);
        self.sprites = [Sprite::new(); 8];
        self.spr_present.fill(false);
        self.oam_fetch = 0x00;
        self.oam_eval_done = false;
        self.secondary_oamaddr = 0x00;
        self.overflow_count = 0;
        self.spr_in_range = false;
        self.spr_zero_in_range = false;
        self.spr_zero_visible = false;
        self.spr_count = 0;
        self.tile_shift_lo = 0x0000;
        self.tile_shift_hi = 0x0000;
        self.tile_lo = 0x00;
        self.tile_hi = 0x00;
        self.tile_addr = 0x0000;
        self.prev_palette = 0x00;
        self.curr_palette = 0x00;
        self.next_palette = 0x00;
        self.vram_buffer = 0x00;
        self.open_bus = 0x00;
        self.nmi_line = false;
        self.frame_complete = false;
        self.a12_state = false;
        self.park_before_first_frame();
    }
}

impl Console {
    /// Advance the PPU position by one dot, handling scanline/frame wrap and
    /// the odd-frame skip.
    ///
    /// On NTSC odd frames with rendering enabled, the pre-render line
    /// advances from dot 339 directly to dot 0 of scanline 0, eliding one
    /// dot. The master clock itself never skips.
    pub(crate) fn ppu_advance(&mut self) {
        let ppu = &mut self.ppu;
        let odd_skip = ppu.region.is_ntsc()
            && ppu.mask.rendering_enabled()
            && ppu.frame.is_odd()
            && ppu.scanline == ppu.prerender_scanline
            && ppu.dot == Ppu::ODD_SKIP_DOT;
        if odd_skip {
            trace!("Skipped odd frame dot: {}", ppu.frame_number());
            ppu.dot = Ppu::DOT_END;
        }
        ppu.dot += 1;
        if ppu.dot > Ppu::DOT_END {
            ppu.dot = 0;
            ppu.scanline += 1;
            if ppu.scanline > ppu.prerender_scanline {
                ppu.scanline = 0;
                ppu.frame.increment();
            }
        }
    }

    /// Execute one PPU rendering sub-cycle at the current (scanline, dot).
    pub(crate) fn ppu_cycle(&mut self) {
        let dot = self.ppu.dot;
        let scanline = self.ppu.scanline;
        let cycle = self.clock.cycles();
        let visible_scanline = scanline <= Ppu::VISIBLE_SCANLINE_END;
        let prerender_scanline = scanline == self.ppu.prerender_scanline;

        // One-shot: true only for the tick that enters VBlank
        self.ppu.frame_complete = false;
        if scanline == self.ppu.vblank_scanline && dot == Ppu::VBLANK_DOT {
            trace!("Start VBL - PPU:{dot:3},{scanline:3}");
            let nmi_enabled = self.ppu.ctrl.nmi_enabled();
            self.ppu.ledger.record_vblank_set(cycle, nmi_enabled);
            self.ppu.frame_complete = true;
        }
        if prerender_scanline && dot == Ppu::VBLANK_DOT {
            trace!("Stop VBL, Sprite0 Hit, Overflow - PPU:{dot:3},{scanline:3}");
            self.ppu.status.spr_zero_hit = false;
            self.ppu.status.spr_overflow = false;
            self.ppu.ledger.record_vblank_span_end(cycle);
            self.ppu.reset_signal = false;
        }

        if self.ppu.mask.rendering_enabled() && (visible_scanline || prerender_scanline) {
            match dot {
                Ppu::VISIBLE_START..=Ppu::VISIBLE_END => {
                    if visible_scanline {
                        self.ppu.evaluate_sprites();
                    }
                    self.fetch_background();
                    if prerender_scanline && dot <= 8 && self.ppu.oamaddr >= 0x08 {
                        // With OAMADDR unaligned at render start, the eight
                        // bytes at OAMADDR & $F8 are copied to the front of
                        // OAM
                        let idx = dot as usize - 1;
                        let oamindex = (self.ppu.oamaddr as usize & 0xF8) + idx;
                        self.ppu.oamdata[idx] = self.ppu.oamdata[oamindex];
                    }
                }
                Ppu::SPR_FETCH_START..=Ppu::SPR_FETCH_END => {
                    if dot == Ppu::SPR_FETCH_START {
                        self.ppu.scroll.copy_x();
                        self.ppu.spr_present.fill(false);
                    }
                    if prerender_scanline && matches!(dot, Ppu::COPY_Y_START..=Ppu::COPY_Y_END) {
                        self.ppu.scroll.copy_y();
                    }
                    self.fetch_sprites();
                }
                Ppu::BG_PREFETCH_START..=Ppu::DOT_END => {
                    if dot <= Ppu::BG_PREFETCH_END {
                        self.fetch_background();
                    } else {
                        // Dummy nametable fetches close out the line
                        self.fetch_bg_nt_byte();
                    }
                    self.ppu.oam_fetch = self.ppu.secondary_oamdata[0];
                }
                _ => (),
            }
        }

        // Pixels land even with rendering disabled; that is what blanks the
        // screen
        if visible_scanline && matches!(dot, Ppu::VISIBLE_START..=Ppu::VISIBLE_END) {
            if self.ppu.skip_rendering {
                self.ppu.headless_sprite_zero_hit();
            } else {
                self.ppu.render_pixel();
            }
        }
        let bg_fetch_dot = matches!(dot, Ppu::VISIBLE_START..=Ppu::VISIBLE_END)
            || matches!(dot, Ppu::BG_PREFETCH_START..=Ppu::BG_PREFETCH_END);
        if bg_fetch_dot {
            self.ppu.tile_shift_lo <<= 1;
            self.ppu.tile_shift_hi <<= 1;
        }

        self.ppu.refresh_nmi_line();
    }

    /// Pattern-table read on the PPU address bus: detects A12 edges for the
    /// cartridge IRQ counter.
    fn ppu_pattern_read(&mut self, addr: u16) -> u8 {
        if self.ppu.check_a12(addr) {
            self.cart.notify_a12_rising();
        }
        self.cart.ppu_read(addr)
    }

    /// Read the PPU memory space: pattern tables through the cartridge,
    /// nametables through CIRAM, palette RAM internally.
    pub(crate) fn ppu_vram_read(&mut self, addr: u16) -> u8 {
        let addr = addr & 0x3FFF;
        match addr {
            0x0000..=0x1FFF => self.ppu_pattern_read(addr),
            0x2000..=0x3EFF => self.ppu.read_ciram(addr),
            _ => self.ppu.read_palette(addr),
        }
    }

    pub(crate) fn ppu_vram_write(&mut self, addr: u16, val: u8) {
        let addr = addr & 0x3FFF;
        match addr {
            0x0000..=0x1FFF => {
                if self.ppu.check_a12(addr) {
                    self.cart.notify_a12_rising();
                }
                self.cart.ppu_write(addr, val);
            }
            0x2000..=0x3EFF => self.ppu.write_ciram(addr, val),
            _ => self.ppu.write_palette(addr, val),
        }
    }

    /// Read a PPU register ($2000-$2007, after mirroring).
    pub(crate) fn ppu_register_read(&mut self, reg: u16) -> u8 {
        match reg {
            0x2002 => self.ppu_read_status(),
            0x2004 => {
                if self.ppu.warming_up() {
                    return self.ppu.open_bus;
                }
                let val = self.ppu.peek_oamdata();
                self.ppu.open_bus = val;
                val
            }
            0x2007 => self.ppu_read_data(),
            // Write-only registers return the PPU I/O latch
            _ => self.ppu.open_bus,
        }
    }

    /// Side-effect-free PPU register read.
    pub(crate) fn ppu_register_peek(&self, reg: u16) -> u8 {
        match reg {
            0x2002 => {
                let vblank = self.ppu.ledger.vblank_visible();
                (self.ppu.status.bits(vblank) & 0xE0) | (self.ppu.open_bus & 0x1F)
            }
            0x2004 => self.ppu.peek_oamdata(),
            0x2007 => {
                let addr = self.ppu.scroll.addr();
                if addr >= Ppu::PALETTE_START {
                    self.ppu.read_palette(addr)
                } else {
                    self.ppu.vram_buffer
                }
            }
            _ => self.ppu.open_bus,
        }
    }

    /// $2002 PPUSTATUS read: returns the driven bits over the I/O latch,
    /// hides the VBlank flag, resets the scroll write toggle, and arms the
    /// race-window suppression when landing on the set cycle.
    fn ppu_read_status(&mut self) -> u8 {
        if self.ppu.warming_up() {
            return self.ppu.open_bus;
        }
        let cycle = self.clock.cycles();
        let vblank = self.ppu.ledger.vblank_visible();
        let status = (self.ppu.status.bits(vblank) & 0xE0) | (self.ppu.open_bus & 0x1F);

        // The PPU dot for this master cycle has not advanced yet: a read with
        // the clock parked at (241, 0) lands on the same master cycle as the
        // flag set and must suppress it
        if self.ppu.scanline == self.ppu.vblank_scanline && self.ppu.dot == Ppu::VBLANK_DOT - 1 {
            self.ppu.ledger.arm_race_suppression(cycle);
        }
        self.ppu.ledger.record_status_read(cycle);
        self.ppu.scroll.reset_latch();
        self.ppu.open_bus |= status & 0xE0;
        self.ppu.refresh_nmi_line();
        status
    }

    /// $2007 PPUDATA read: buffered for VRAM, immediate for palette RAM
    /// (which still refreshes the buffer from the nametable underneath).
    fn ppu_read_data(&mut self) -> u8 {
        if self.ppu.warming_up() {
            return self.ppu.open_bus;
        }
        let addr = self.ppu.scroll.addr();
        self.ppu.increment_vram_addr();
        let new_addr = self.ppu.scroll.addr();
        if self.ppu.check_a12(new_addr) {
            self.cart.notify_a12_rising();
        }

        let val = if addr >= Ppu::PALETTE_START {
            self.ppu.vram_buffer = self.ppu.read_ciram(addr);
            self.ppu.read_palette(addr)
        } else {
            let val = self.ppu.vram_buffer;
            self.ppu.vram_buffer = self.ppu_vram_read(addr);
            val
        };
        self.ppu.open_bus = val;
        val
    }

    /// Write a PPU register ($2000-$2007, after mirroring).
    pub(crate) fn ppu_register_write(&mut self, reg: u16, val: u8) {
        self.ppu.open_bus = val;
        match reg {
            0x2000 => {
                if self.ppu.warming_up() {
                    return;
                }
                let old_enabled = self.ppu.ctrl.nmi_enabled();
                self.ppu.ctrl.write(val);
                self.ppu.scroll.write_nametable_select(val);
                let new_enabled = self.ppu.ctrl.nmi_enabled();
                if old_enabled != new_enabled {
                    let cycle = self.clock.cycles();
                    self.ppu
                        .ledger
                        .record_ctrl_toggle(cycle, old_enabled, new_enabled);
                }
                self.ppu.refresh_nmi_line();
            }
            0x2001 => {
                if self.ppu.warming_up() {
                    return;
                }
                self.ppu.mask.write(val);
            }
            0x2003 => self.ppu.oamaddr = val,
            0x2004 => self.ppu.write_oamdata(val),
            0x2005 => {
                if self.ppu.warming_up() {
                    return;
                }
                self.ppu.scroll.write(val);
            }
            0x2006 => {
                if self.ppu.warming_up() {
                    return;
                }
                self.ppu.scroll.write_addr(val);
                // The second write drives v onto the PPU address bus
                if !self.ppu.scroll.write_latch {
                    let addr = self.ppu.scroll.addr();
                    if self.ppu.check_a12(addr) {
                        self.cart.notify_a12_rising();
                    }
                }
            }
            0x2007 => {
                let addr = self.ppu.scroll.addr();
                self.ppu_vram_write(addr, val);
                self.ppu.increment_vram_addr();
                let new_addr = self.ppu.scroll.addr();
                if self.ppu.check_a12(new_addr) {
                    self.cart.notify_a12_rising();
                }
            }
            _ => (),
        }
    }

    /// Fetch BG nametable byte and reload the shift registers.
    ///
    /// See: <https://wiki.nesdev.org/w/index.php/PPU_scrolling#Tile_and_attribute_fetching>
    fn fetch_bg_nt_byte(&mut self) {
        let ppu = &mut self.ppu;
        ppu.prev_palette = ppu.curr_palette;
        ppu.curr_palette = ppu.next_palette;
        ppu.tile_shift_lo |= u16::from(ppu.tile_lo);
        ppu.tile_shift_hi |= u16::from(ppu.tile_hi);

        let tile_index = u16::from(ppu.read_ciram(ppu.scroll.nt_addr()));
        ppu.tile_addr = ppu.ctrl.bg_select() | (tile_index << 4) | ppu.scroll.fine_y();
    }

    /// Fetch BG attribute byte.
    fn fetch_bg_attr_byte(&mut self) {
        let ppu = &mut self.ppu;
        let attr = ppu.read_ciram(ppu.scroll.attr_addr());
        ppu.next_palette = ((attr >> ppu.scroll.attr_shift()) & 0x03) << 2;
    }

    /// Fetch one of the 4 tile components every 2nd dot; increment scroll
    /// every 8th.
    fn fetch_background(&mut self) {
        match self.ppu.dot & 0x07 {
            0 => {
                self.ppu.scroll.increment_x();
                if self.ppu.dot == Ppu::INC_Y {
                    self.ppu.scroll.increment_y();
                }
            }
            1 => self.fetch_bg_nt_byte(),
            3 => self.fetch_bg_attr_byte(),
            5 => {
                let addr = self.ppu.tile_addr;
                self.ppu.tile_lo = self.ppu_pattern_read(addr);
            }
            7 => {
                let addr = self.ppu.tile_addr + 8;
                self.ppu.tile_hi = self.ppu_pattern_read(addr);
            }
            _ => (),
        }
    }

    /// Dots 257-320: garbage nametable fetches and sprite tile loads.
    ///
    /// <https://wiki.nesdev.org/w/index.php/PPU_OAM>
    fn fetch_sprites(&mut self) {
        // OAMADDR is forced to $00 across sprite fetches
        self.ppu.oamaddr = 0x00;
        match self.ppu.dot & 0x07 {
            1 => self.fetch_bg_nt_byte(),   // Garbage NT fetch
            3 => self.fetch_bg_attr_byte(), // Garbage attr fetch
            4 => self.load_sprite(),
            _ => (),
        }
    }

    /// Load one sprite latch from secondary OAM. Hidden fetches of tile $FF
    /// still hit the pattern table, which A12-clocked mappers depend on.
    fn load_sprite(&mut self) {
        let scanline = self.ppu.scanline;
        let spr_count = self.ppu.spr_count;
        let idx = (self.ppu.dot - Ppu::SPR_FETCH_START) as usize / 8;
        let oam_idx = idx << 2;

        let entry = &self.ppu.secondary_oamdata[oam_idx..oam_idx + 4];
        let (y, tile_index, attr, x) = (entry[0], entry[1], entry[2], entry[3]);
        let x = u32::from(x);
        let y = u32::from(y);
        let mut tile_index = u16::from(tile_index);
        let flip_vertical = attr & 0x80 == 0x80;

        let height = self.ppu.ctrl.spr_height();
        let mut line_offset = if (y..y + height).contains(&scanline) {
            scanline - y
        } else {
            0
        };
        if flip_vertical {
            line_offset = height - 1 - line_offset;
        }
        if idx >= spr_count {
            line_offset = 0;
            tile_index = 0xFF;
        }

        let tile_addr = if height == 16 {
            // Bit 0 of the tile index selects the pattern table in 8x16 mode
            let spr_select = (tile_index & 0x01) << 12;
            if line_offset >= 8 {
                line_offset += 8;
            }
            spr_select | ((tile_index & 0xFE) << 4) | line_offset as u16
        } else {
            self.ppu.ctrl.spr_select() | (tile_index << 4) | line_offset as u16
        };

        if idx < spr_count {
            let tile_lo = self.ppu_pattern_read(tile_addr);
            let tile_hi = self.ppu_pattern_read(tile_addr + 8);
            let sprite = &mut self.ppu.sprites[idx];
            sprite.x = x;
            sprite.y = y;
            sprite.tile_lo = tile_lo;
            sprite.tile_hi = tile_hi;
            sprite.palette = ((attr & 0x03) << 2) | 0x10;
            sprite.bg_priority = attr & 0x20 == 0x20;
            sprite.flip_horizontal = attr & 0x40 == 0x40;
            sprite.flip_vertical = flip_vertical;
            for present in self.ppu.spr_present.iter_mut().skip(x as usize).take(8) {
                *present = true;
            }
        } else {
            let _ = self.ppu_pattern_read(tile_addr);
            let _ = self.ppu_pattern_read(tile_addr + 8);
        }
    }
}

impl Ppu {
    const OAM_CLEAR_START: u32 = 1;
    const OAM_CLEAR_END: u32 = 64;
    const SPR_EVAL_START: u32 = 65;
    const SPR_EVAL_END: u32 = 256;

    /// Secondary OAM clear and the in-range scan.
    ///
    /// 1. Dots 1-64: clear secondary OAM.
    /// 2. Dots 65-256: scan OAM for the first eight in-range sprites.
    /// 3. Past eight sprites, the buggy overflow scan sets the overflow flag
    ///    with false positives and negatives, faithfully reproduced.
    fn evaluate_sprites(&mut self) {
        match self.dot {
            Self::OAM_CLEAR_START..=Self::OAM_CLEAR_END => {
                self.oam_fetch = 0xFF;
                self.secondary_oamdata.fill(0xFF);
            }
            Self::SPR_EVAL_START..=Self::SPR_EVAL_END => {
                if self.dot == Self::SPR_EVAL_START {
                    self.spr_in_range = false;
                    self.spr_zero_in_range = false;
                    self.secondary_oamaddr = 0x00;
                    self.oam_eval_done = false;
                    self.oamaddr_hi = (self.oamaddr >> 2) & 0x3F;
                    self.oamaddr_lo = self.oamaddr & 0x03;
                } else if self.dot == Self::SPR_EVAL_END {
                    self.spr_zero_visible = self.spr_zero_in_range;
                    self.spr_count = (self.secondary_oamaddr >> 2) as usize;
                }
                if self.dot & 0x01 == 0x01 {
                    // Odd dots read from primary OAM
                    self.oam_fetch = self.oamdata[self.oamaddr as usize];
                } else {
                    self.spr_eval_even_dot();
                }
            }
            _ => (),
        }
    }

    fn spr_eval_even_dot(&mut self) {
        let secondary_index = (self.secondary_oamaddr & 0x1F) as usize;

        if self.oam_eval_done {
            // OAMADDR rolled over; idle reads from secondary OAM
            self.oamaddr_hi = (self.oamaddr_hi + 1) & 0x3F;
            if self.secondary_oamaddr >= 0x20 {
                self.oam_fetch = self.secondary_oamdata[secondary_index];
            }
        } else {
            let y = u32::from(self.oam_fetch);
            let height = self.ctrl.spr_height();
            if !self.spr_in_range && (y..y + height).contains(&self.scanline) {
                self.spr_in_range = true;
            }

            if self.secondary_oamaddr < 0x20 {
                // Even dots write into secondary OAM
                self.secondary_oamdata[secondary_index] = self.oam_fetch;
                if self.spr_in_range {
                    self.oamaddr_lo += 1;
                    self.secondary_oamaddr += 1;
                    if self.oamaddr_hi == 0x00 {
                        self.spr_zero_in_range = true;
                    }
                    if self.oamaddr_lo == 0x04 {
                        // Whole entry copied; move to the next sprite
                        self.spr_in_range = false;
                        self.oamaddr_lo = 0x00;
                        self.oamaddr_hi = (self.oamaddr_hi + 1) & 0x3F;
                        if self.oamaddr_hi == 0x00 {
                            self.oam_eval_done = true;
                        }
                    }
                } else {
                    self.oamaddr_hi = (self.oamaddr_hi + 1) & 0x3F;
                    if self.oamaddr_hi == 0x00 {
                        self.oam_eval_done = true;
                    }
                }
            } else {
                // Secondary OAM is full: the overflow scan
                self.oam_fetch = self.secondary_oamdata[secondary_index];
                if self.spr_in_range {
                    self.status.spr_overflow = true;
                    self.oamaddr_lo += 1;
                    if self.oamaddr_lo == 0x04 {
                        self.oamaddr_lo = 0x00;
                        self.oamaddr_hi = (self.oamaddr_hi + 1) & 0x3F;
                    }
                    if self.overflow_count == 0 {
                        self.overflow_count = 3;
                    } else {
                        self.overflow_count -= 1;
                        if self.overflow_count == 0 {
                            self.oam_eval_done = true;
                            self.oamaddr_lo = 0x00;
                        }
                    }
                } else {
                    // The hardware bug: both halves of OAMADDR advance,
                    // diagonally scanning Y bytes
                    self.oamaddr_hi = (self.oamaddr_hi + 1) & 0x3F;
                    self.oamaddr_lo = (self.oamaddr_lo + 1) & 0x03;
                    if self.oamaddr_hi == 0x00 {
                        self.oam_eval_done = true;
                    }
                }
            }
        }
        self.oamaddr = (self.oamaddr_hi << 2) | (self.oamaddr_lo & 0x03);
    }

    /// Palette index of the pixel at the current dot.
    fn pixel_palette(&mut self) -> u8 {
        let x = self.dot - 1;
        let bg_color = if self.mask.show_bg() && (self.mask.show_left_bg() || x >= 8) {
            let shift = 15 - self.scroll.fine_x;
            ((((self.tile_shift_hi >> shift) & 0x01) << 1) | ((self.tile_shift_lo >> shift) & 0x01))
                as u8
        } else {
            0
        };

        if self.mask.show_spr()
            && (self.mask.show_left_spr() || x >= 8)
            && self.spr_present[x as usize]
        {
            for (i, sprite) in self.sprites.iter().take(self.spr_count).enumerate() {
                let shift = x.wrapping_sub(sprite.x);
                if shift > 7 {
                    continue;
                }
                let shift = if sprite.flip_horizontal {
                    shift
                } else {
                    7 - shift
                };
                let spr_color =
                    (((sprite.tile_hi >> shift) & 0x01) << 1) | ((sprite.tile_lo >> shift) & 0x01);
                if spr_color != 0 {
                    if i == 0
                        && bg_color != 0
                        && x != 255
                        && self.spr_zero_visible
                        && self.rendering_enabled()
                        && !self.status.spr_zero_hit
                    {
                        self.status.spr_zero_hit = true;
                    }
                    if bg_color == 0 || !sprite.bg_priority {
                        return sprite.palette + spr_color;
                    }
                    break;
                }
            }
        }

        if (self.scroll.fine_x + ((x & 0x07) as u16)) < 8 {
            self.prev_palette + bg_color
        } else {
            self.curr_palette + bg_color
        }
    }

    fn render_pixel(&mut self) {
        let addr = self.scroll.addr();
        let color = if self.rendering_enabled() || (addr & Self::PALETTE_START) != Self::PALETTE_START
        {
            let palette = u16::from(self.pixel_palette());
            self.read_palette(Self::PALETTE_START | ((palette & 0x03 > 0) as u16 * palette))
        } else {
            // With rendering disabled and v parked in palette space, the
            // backdrop shows that palette entry
            self.read_palette(addr)
        };
        let color = u16::from(color & self.mask.grayscale_mask()) | self.mask.emphasis(self.region);
        let x = self.dot - 1;
        let y = self.scanline;
        self.frame.set_pixel(x, y, color);
    }

    /// Sprite-zero detection for headless mode, skipping pixel writes.
    fn headless_sprite_zero_hit(&mut self) {
        if !self.rendering_enabled() || !self.spr_zero_visible || self.status.spr_zero_hit {
            return;
        }
        let x = self.dot - 1;
        if x == 255
            || (x < 8 && (!self.mask.show_left_bg() || !self.mask.show_left_spr()))
            || !self.spr_present[x as usize]
        {
            return;
        }
        let shift = 15 - self.scroll.fine_x;
        let bg_color =
            (((self.tile_shift_hi >> shift) & 0x01) << 1) | ((self.tile_shift_lo >> shift) & 0x01);
        if bg_color == 0 {
            return;
        }
        let sprite = &self.sprites[0];
        let shift = x.wrapping_sub(sprite.x);
        if shift > 7 {
            return;
        }
        let shift = if sprite.flip_horizontal {
            shift
        } else {
            7 - shift
        };
        let spr_color =
            (((sprite.tile_hi >> shift) & 0x01) << 1) | ((sprite.tile_lo >> shift) & 0x01);
        if spr_color != 0 {
            self.status.spr_zero_hit = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn palette_mirrors_sprite_backdrops() {
        let mut ppu = Ppu::new(NesRegion::Ntsc);
        ppu.write_palette(0x3F10, 0x2A);
        assert_eq!(ppu.read_palette(0x3F00), 0x2A, "$3F10 mirrors $3F00");
        ppu.write_palette(0x3F04, 0x11);
        assert_eq!(ppu.read_palette(0x3F04), 0x11, "$3F04 is distinct");
    }

    #[test]
    fn ciram_mirroring_modes() {
        let mut ppu = Ppu::new(NesRegion::Ntsc);
        ppu.set_mirroring(Mirroring::Vertical);
        ppu.write_ciram(0x2000, 0xAA);
        assert_eq!(ppu.read_ciram(0x2800), 0xAA, "vertical: $2800 mirrors $2000");
        assert_ne!(ppu.read_ciram(0x2400), 0xAA, "vertical: $2400 is distinct");

        ppu.set_mirroring(Mirroring::Horizontal);
        ppu.write_ciram(0x2000, 0xBB);
        assert_eq!(
            ppu.read_ciram(0x2400),
            0xBB,
            "horizontal: $2400 mirrors $2000"
        );
    }

    #[test]
    fn a12_edge_detection() {
        let mut ppu = Ppu::new(NesRegion::Ntsc);
        assert!(ppu.check_a12(0x1000), "0-to-1 is an edge");
        assert!(!ppu.check_a12(0x1008), "staying high is not");
        assert!(!ppu.check_a12(0x0000), "falling is not");
        assert!(ppu.check_a12(0x1FF8), "rising again is");
    }
}
