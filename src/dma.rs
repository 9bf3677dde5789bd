//! DMA engine: OAM sprite transfers and DMC sample fetches.
//!
//! Both sub-machines pull the shared RDY line low while active, freezing the
//! CPU. The engine performs its bus traffic through the normal
//! [`bus_read`](crate::console::Console::bus_read)/
//! [`bus_write`](crate::console::Console::bus_write) paths, so dummy and
//! repeat reads are observable by the open-bus latch and the cartridge.
//!
//! See: <https://www.nesdev.org/wiki/DMA>

use crate::{
    common::{Reset, ResetKind},
    console::Console,
};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// OAM DMA sub-state: 256 bytes copied from a CPU page to PPU OAM via $2004.
#[derive(Default, Debug, Copy, Clone, Serialize, Deserialize)]
#[must_use]
pub struct OamDma {
    pub active: bool,
    /// Source page: bytes come from `$PP00..=$PPFF`.
    pub page: u8,
    /// Next source byte offset (0-255), post-incremented on writes.
    pub offset: u16,
    /// The initial halt cycle was consumed.
    halt_done: bool,
    /// One extra wait cycle to land reads on even CPU cycles.
    pub align_wait: bool,
    /// Byte latched by the most recent read cycle.
    pub temp: u8,
    /// Read+write cycles completed (0-512).
    transfers: u16,
}

/// DMC DMA sub-state: a 4-cycle stall (3 idle + 1 fetch) loading the APU
/// sample buffer.
#[derive(Default, Debug, Copy, Clone, Serialize, Deserialize)]
#[must_use]
pub struct DmcDma {
    pub active: bool,
    /// Stall cycles left, counting down from 4; the fetch lands on the last.
    pub stall_remaining: u8,
    pub sample_addr: u16,
}

/// The DMA engine. Either sub-machine pulls the derived RDY output low.
#[derive(Default, Debug, Copy, Clone, Serialize, Deserialize)]
#[must_use]
pub struct Dma {
    pub oam: OamDma,
    pub dmc: DmcDma,
    /// Address of the most recent CPU read, replayed by the NTSC repeat-read
    /// corruption during DMC idle cycles.
    pub last_cpu_read_addr: u16,
    /// Master-cycle stamp of the last DMC preemption of a running OAM
    /// transfer.
    pub last_interruption: u64,
}

impl Dma {
    pub const fn new() -> Self {
        Self {
            oam: OamDma {
                active: false,
                page: 0x00,
                offset: 0,
                halt_done: false,
                align_wait: false,
                temp: 0x00,
                transfers: 0,
            },
            dmc: DmcDma {
                active: false,
                stall_remaining: 0,
                sample_addr: 0x0000,
            },
            last_cpu_read_addr: 0x0000,
            last_interruption: 0,
        }
    }

    /// $4014 write: begin a 256-byte OAM transfer from page `page`.
    pub fn start_oam(&mut self, page: u8, align_wait: bool) {
        trace!("OAM DMA start: page ${page:02X} align:{align_wait}");
        self.oam = OamDma {
            active: true,
            page,
            offset: 0,
            halt_done: false,
            align_wait,
            temp: 0x00,
            transfers: 0,
        };
    }

    /// APU sample-buffer underrun: begin a 4-cycle DMC stall.
    pub fn start_dmc(&mut self, sample_addr: u16) {
        trace!("DMC DMA start: ${sample_addr:04X}");
        self.dmc = DmcDma {
            active: true,
            stall_remaining: 4,
            sample_addr,
        };
    }

    /// Level of the RDY output: low while either sub-machine runs.
    #[inline]
    #[must_use]
    pub const fn rdy_line(&self) -> bool {
        !(self.oam.active || self.dmc.active)
    }
}

impl Reset for Dma {
    fn reset(&mut self, _kind: ResetKind) {
        *self = Self::new();
    }
}

impl Console {
    /// Execute one DMA cycle, if any transfer is active. Called once per
    /// CPU-active master cycle before the CPU microstep.
    ///
    /// DMC wins bus arbitration: a running OAM transfer pauses and resumes
    /// byte-accurately once the DMC fetch completes.
    pub(crate) fn dma_cycle(&mut self) {
        if self.dma.dmc.active {
            self.dmc_dma_cycle();
        } else if self.dma.oam.active {
            self.oam_dma_cycle();
        }
    }

    fn dmc_dma_cycle(&mut self) {
        if self.dma.oam.active {
            self.dma.last_interruption = self.clock.cycles();
        }
        self.dma.dmc.stall_remaining -= 1;
        if self.dma.dmc.stall_remaining == 0 {
            let addr = self.dma.dmc.sample_addr;
            let val = self.bus_read(addr);
            trace!("DMC DMA loaded ${addr:04X}: {val:02X} - CYC:{}", self.cpu.cycle);
            self.apu.dmc.load_buffer(val);
            self.dma.dmc.active = false;
        } else if self.config.region.is_ntsc() {
            // RP2A03 idle cycles repeat the CPU's current read. Replays of
            // $4016/$4017 advance the controller shift registers; replays of
            // $2002/$2007 repeat the PPU side effects. The RP2A07 is clean.
            let last = self.dma.last_cpu_read_addr;
            if matches!(last, 0x4016 | 0x4017 | 0x2002 | 0x2007) {
                let _ = self.bus_read(last);
            }
        }
    }

    fn oam_dma_cycle(&mut self) {
        if !self.dma.oam.halt_done {
            self.dma.oam.halt_done = true;
            return;
        }
        if self.dma.oam.align_wait {
            self.dma.oam.align_wait = false;
            return;
        }
        if self.dma.oam.transfers & 0x01 == 0 {
            // Even cycles read the source byte
            let addr = (u16::from(self.dma.oam.page) << 8) | self.dma.oam.offset;
            self.dma.oam.temp = self.bus_read(addr);
        } else {
            // Odd cycles write it to OAM through $2004
            let val = self.dma.oam.temp;
            self.bus_write(0x2004, val);
            self.dma.oam.offset += 1;
            if self.dma.oam.offset == 0x0100 {
                trace!("OAM DMA complete - CYC:{}", self.cpu.cycle);
                self.dma.oam.active = false;
            }
        }
        self.dma.oam.transfers += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rdy_follows_either_submachine() {
        let mut dma = Dma::new();
        assert!(dma.rdy_line());
        dma.start_oam(0x02, false);
        assert!(!dma.rdy_line());
        dma.oam.active = false;
        dma.start_dmc(0xC000);
        assert!(!dma.rdy_line());
        dma.dmc.active = false;
        assert!(dma.rdy_line());
    }
}
