//! APU DMC (Delta Modulation Channel) implementation.
//!
//! The playback unit consumes one sample byte each time its shift register
//! empties; an empty buffer with bytes remaining raises a DMA fetch request
//! that the [DMA engine](crate::dma) services by stalling the CPU.
//!
//! See: <https://www.nesdev.org/wiki/APU_DMC>

use crate::{
    apu::timer::Timer,
    common::{NesRegion, Regional, Reset, ResetKind},
};
use serde::{Deserialize, Serialize};
use tracing::trace;

#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
#[must_use]
pub struct Dmc {
    pub region: NesRegion,
    pub timer: Timer,
    pub irq_enabled: bool,
    pub irq_pending: bool,
    pub loops: bool,
    /// Current fetch address, wrapping from $FFFF to $8000.
    pub addr: u16,
    pub sample_addr: u16,
    pub sample_length: u16,
    pub bytes_remaining: u16,
    pub sample_buffer: u8,
    pub buffer_empty: bool,
    pub output_level: u8,
    bits_remaining: u8,
    shift: u8,
    silence: bool,
    dma_request: bool,
}

impl Default for Dmc {
    fn default() -> Self {
        Self::new(NesRegion::Ntsc)
    }
}

impl Dmc {
    const PERIOD_TABLE_NTSC: [u16; 16] = [
        428, 380, 340, 320, 286, 254, 226, 214, 190, 160, 142, 128, 106, 84, 72, 54,
    ];
    const PERIOD_TABLE_PAL: [u16; 16] = [
        398, 354, 316, 298, 276, 236, 210, 198, 176, 148, 132, 118, 98, 78, 66, 50,
    ];

    pub const fn new(region: NesRegion) -> Self {
        Self {
            region,
            timer: Timer::new(Self::period(region, 0)),
            irq_enabled: false,
            irq_pending: false,
            loops: false,
            addr: 0xC000,
            sample_addr: 0xC000,
            sample_length: 0x0001,
            bytes_remaining: 0x0000,
            sample_buffer: 0x00,
            buffer_empty: true,
            output_level: 0x00,
            bits_remaining: 0x08,
            shift: 0x00,
            silence: true,
            dma_request: false,
        }
    }

    const fn period(region: NesRegion, val: u8) -> u16 {
        let index = (val & 0x0F) as usize;
        match region {
            NesRegion::Ntsc => Self::PERIOD_TABLE_NTSC[index] - 1,
            NesRegion::Pal => Self::PERIOD_TABLE_PAL[index] - 1,
        }
    }

    /// Address the next DMA fetch should read.
    #[inline]
    #[must_use]
    pub const fn dma_addr(&self) -> u16 {
        self.addr
    }

    /// Consume the one-shot DMA fetch request.
    pub(crate) fn take_dma_request(&mut self) -> bool {
        std::mem::take(&mut self.dma_request)
    }

    fn init_sample(&mut self) {
        self.addr = self.sample_addr;
        self.bytes_remaining = self.sample_length;
        trace!(
            "APU DMC sample started. bytes remaining: {}",
            self.bytes_remaining
        );
    }

    /// DMA fetch completed: load the sample buffer.
    pub fn load_buffer(&mut self, val: u8) {
        if self.bytes_remaining == 0 {
            return;
        }
        self.sample_buffer = val;
        self.buffer_empty = false;
        if self.addr == 0xFFFF {
            self.addr = 0x8000;
        } else {
            self.addr += 1;
        }
        self.bytes_remaining -= 1;
        if self.bytes_remaining == 0 {
            if self.loops {
                self.init_sample();
            } else if self.irq_enabled {
                trace!("APU DMC IRQ pending");
                self.irq_pending = true;
            }
        }
    }

    /// $4010 DMC timer/flags.
    pub const fn write_timer(&mut self, val: u8) {
        self.irq_enabled = val & 0x80 != 0;
        self.loops = val & 0x40 != 0;
        self.timer.period = Self::period(self.region, val);
        if !self.irq_enabled {
            self.irq_pending = false;
        }
    }

    /// $4011 DMC direct output load.
    pub const fn write_output(&mut self, val: u8) {
        self.output_level = val & 0x7F;
    }

    /// $4012 DMC sample address: $C000 + val * 64.
    pub const fn write_addr(&mut self, val: u8) {
        self.sample_addr = 0xC000 | ((val as u16) << 6);
    }

    /// $4013 DMC sample length: val * 16 + 1 bytes.
    pub const fn write_length(&mut self, val: u8) {
        self.sample_length = ((val as u16) << 4) | 1;
    }

    /// $4015 write, bit 4.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.irq_pending = false;
        if !enabled {
            self.bytes_remaining = 0;
        } else if self.bytes_remaining == 0 {
            self.init_sample();
            if self.buffer_empty && self.bytes_remaining > 0 {
                self.dma_request = true;
            }
        }
    }

    //                          Timer
    //                            |
    //                            v
    // Reader ---> Buffer ---> Shifter ---> Output level ---> (to the mixer)
    pub fn clock(&mut self) {
        if !self.timer.clock() {
            return;
        }
        if !self.silence {
            // Delta-step the output level, clamped to 0..=127
            if self.shift & 0x01 == 0x01 {
                if self.output_level <= 125 {
                    self.output_level += 2;
                }
            } else if self.output_level >= 2 {
                self.output_level -= 2;
            }
            self.shift >>= 1;
        }

        if self.bits_remaining > 0 {
            self.bits_remaining -= 1;
        }
        if self.bits_remaining == 0 {
            self.bits_remaining = 8;
            self.silence = self.buffer_empty;
            if !self.buffer_empty {
                self.shift = self.sample_buffer;
                self.buffer_empty = true;
                if self.bytes_remaining > 0 {
                    trace!("APU DMC DMA fetch requested");
                    self.dma_request = true;
                }
            }
        }
    }

    /// Current DAC input, 0-127.
    #[must_use]
    pub const fn output(&self) -> u8 {
        self.output_level
    }
}

impl Regional for Dmc {
    fn region(&self) -> NesRegion {
        self.region
    }

    fn set_region(&mut self, region: NesRegion) {
        self.region = region;
        self.timer.period = Self::period(region, 0);
    }
}

impl Reset for Dmc {
    fn reset(&mut self, kind: ResetKind) {
        self.timer.reset(kind);
        self.timer.period = Self::period(self.region, 0);
        self.timer.reload();
        if let ResetKind::Hard = kind {
            self.sample_addr = 0xC000;
            self.sample_length = 1;
        }
        self.irq_enabled = false;
        self.irq_pending = false;
        self.loops = false;
        self.addr = 0x0000;
        self.bytes_remaining = 0;
        self.sample_buffer = 0x00;
        self.buffer_empty = true;
        self.output_level = 0x00;
        self.bits_remaining = 0x08;
        self.shift = 0x00;
        self.silence = true;
        self.dma_request = false;
    }
}
