//! Console implementation. The primary entry-point for emulation.
//!
//! [`Console`] is the sole owner of all mutable emulation state: CPU, PPU,
//! APU, DMA engine, bus, cartridge, controllers, master clock, and the
//! optional debugger gate. [`Console::tick`] is the pure state transition
//! `state[n+1] = tick(state[n])`, executed once per PPU master cycle with a
//! rigidly ordered sequence of sub-cycle effects.

use crate::{
    apu::Apu,
    bus::Bus,
    cart::{CartSignals, Cartridge},
    clock::MasterClock,
    common::{NesRegion, RamState, Regional, Reset, ResetKind},
    cpu::Cpu,
    debug::{self, CpuSnapshot, Debugger, Modification, Register},
    dma::Dma,
    input::{Input, JoypadState, Player},
    ppu::Ppu,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Console configuration settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[must_use]
pub struct Config {
    /// Console region, selecting NTSC or PAL timing constants.
    pub region: NesRegion,
    /// RAM initialization state on power-up.
    pub ram_state: RamState,
    /// Whether to emulate the PPU warmup period where early register access
    /// is ignored. Some test software depends on registers working
    /// immediately, so this defaults to off.
    ///
    /// See: <https://www.nesdev.org/wiki/PPU_power_up_state>
    pub emulate_ppu_warmup: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            region: NesRegion::Ntsc,
            ram_state: RamState::AllZeros,
            emulate_ppu_warmup: false,
        }
    }
}

/// The emulated console. Owns every component; no hidden globals.
#[derive(Debug)]
#[must_use]
pub struct Console {
    pub config: Config,
    pub clock: MasterClock,
    pub cpu: Cpu,
    pub ppu: Ppu,
    pub apu: Apu,
    pub dma: Dma,
    pub bus: Bus,
    pub cart: Cartridge,
    pub input: Input,
    pub debugger: Option<Box<Debugger>>,
    /// PC at the last `continue_()`; break checks are skipped until the CPU
    /// moves off the breakpoint it resumed from.
    resume_pc: Option<u16>,
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}

impl Console {
    /// Create a console with the default configuration.
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Create a console with the given configuration.
    pub fn with_config(config: Config) -> Self {
        let mut ppu = Ppu::new(config.region);
        ppu.emulate_warmup = config.emulate_ppu_warmup;
        Self {
            clock: MasterClock::new(),
            cpu: Cpu::new(),
            ppu,
            apu: Apu::new(config.region),
            dma: Dma::new(),
            bus: Bus::new(config.ram_state),
            cart: Cartridge::none(),
            input: Input::new(),
            debugger: None,
            resume_pc: None,
            config,
        }
    }

    /// Insert a cartridge, taking exclusive ownership. The nametable
    /// arrangement is queried once here and re-queried after every
    /// CPU-cartridge write.
    pub fn load_cart(&mut self, mut cart: Cartridge) {
        cart.set_region(self.config.region);
        self.ppu.set_mirroring(cart.mirroring());
        self.cart = cart;
    }

    /// Remove and return the inserted cartridge.
    pub fn eject_cart(&mut self) -> Cartridge {
        std::mem::replace(&mut self.cart, Cartridge::none())
    }

    /// Power-on: zero (or fill) RAM, reset every component, and load PC from
    /// the RESET vector at $FFFC/$FFFD.
    pub fn power_on(&mut self) {
        debug!("power on");
        self.clock.restart();
        self.bus.reset(ResetKind::Hard);
        self.cpu.reset(ResetKind::Hard);
        self.ppu.reset(ResetKind::Hard);
        self.apu.reset(ResetKind::Hard);
        self.dma.reset(ResetKind::Hard);
        self.input.reset(ResetKind::Hard);
        self.cart.reset(ResetKind::Hard);
        self.cpu.pc = self.bus_read_u16(Cpu::RESET_VECTOR);
    }

    /// Soft reset: like power-on, but RAM, PPU warmup, and most APU state
    /// survive.
    pub fn reset(&mut self) {
        debug!("soft reset");
        self.clock.restart();
        self.bus.reset(ResetKind::Soft);
        self.cpu.reset(ResetKind::Soft);
        self.ppu.reset(ResetKind::Soft);
        self.apu.reset(ResetKind::Soft);
        self.dma.reset(ResetKind::Soft);
        self.input.reset(ResetKind::Soft);
        self.cart.reset(ResetKind::Soft);
        self.cpu.pc = self.bus_read_u16(Cpu::RESET_VECTOR);
    }

    /// Advance the console by exactly one master cycle.
    ///
    /// Sub-cycle order (load-bearing):
    /// 1. Advance the master clock by 1.
    /// 2. Derive the CPU/APU activity flag.
    /// 3. If CPU-active: tick the APU, tick the DMA engine, wire RDY and IRQ
    ///    into the CPU, and execute one CPU sub-cycle (interrupt sampling
    ///    happens after execution inside the microstep).
    /// 4. Advance the PPU position (odd-frame skip happens here).
    /// 5. Execute one PPU rendering sub-cycle.
    /// 6. Rewire the CPU's NMI input from the PPU's NMI output.
    ///
    /// A held debugger gate makes this a no-op.
    pub fn tick(&mut self) {
        if let Some(mut debugger) = self.debugger.take() {
            if debugger.paused {
                self.debugger = Some(debugger);
                return;
            }
            if self.resume_pc.is_some() {
                if self.resume_pc != Some(self.cpu.pc) || !self.cpu.at_instr_boundary() {
                    self.resume_pc = None;
                }
            }
            if self.resume_pc.is_none() && debugger.should_break(self) {
                debug!("debugger break - CYC:{}", self.clock.cycles());
                debugger.paused = true;
                self.debugger = Some(debugger);
                return;
            }
            self.debugger = Some(debugger);
        }

        self.clock.advance();

        if self.clock.cpu_active() {
            self.cpu.cycle += 1;
            self.apu.clock();
            if self.apu.dmc.take_dma_request() {
                let addr = self.apu.dmc.dma_addr();
                self.dma.start_dmc(addr);
            }
            self.dma_cycle();
            self.cpu.rdy_line = self.dma.rdy_line();
            self.cpu.irq_line = self.apu.irq_line() || self.cart.poll_irq();
            if self.cpu.rdy_line {
                self.cpu_microstep();
            } else {
                // Stalled by DMA: the interrupt detectors keep sampling
                self.sample_interrupts();
            }
            if self.cpu.take_nmi_ack() {
                let cycle = self.clock.cycles();
                self.ppu.ledger.acknowledge_cpu(cycle);
            }
        }

        self.ppu_advance();
        self.ppu_cycle();

        self.cpu.nmi_line = self.ppu.nmi_line;
    }

    /// Tick until the PPU signals the start of the next VBlank. Returns the
    /// number of master cycles executed, which exposes the odd-frame skip:
    /// 89,342 on even NTSC frames, 89,341 on odd frames with rendering
    /// enabled.
    pub fn emulate_frame(&mut self) -> u64 {
        let mut cycles = 0;
        while !self.ppu.frame_complete {
            self.tick();
            cycles += 1;
            if self.is_paused() {
                break;
            }
        }
        self.ppu.frame_complete = false;
        cycles
    }

    /// Tick until `3n` master cycles elapse (one CPU cycle per 3 master
    /// cycles). Returns the number of master cycles executed.
    pub fn emulate_cpu_cycles(&mut self, n: u64) -> u64 {
        let cycles = n * MasterClock::CPU_DIVIDER;
        for _ in 0..cycles {
            self.tick();
            if self.is_paused() {
                break;
            }
        }
        cycles
    }

    /// Tick until the CPU finishes its current instruction (or interrupt
    /// sequence). Returns the CPU cycles consumed.
    pub fn step_instr(&mut self) -> u64 {
        let start = self.cpu.cycle;
        let mut left_boundary = false;
        loop {
            self.tick();
            if self.cpu.halted || self.is_paused() {
                break;
            }
            if self.clock.cpu_active() {
                if !self.cpu.at_instr_boundary() {
                    left_boundary = true;
                } else if left_boundary {
                    break;
                }
            }
        }
        self.cpu.cycle - start
    }

    /// The current frame buffer of palette indices.
    #[must_use]
    pub fn frame_buffer(&self) -> &[u16] {
        self.ppu.frame_buffer()
    }

    /// Enable or disable pixel output. Sprite-zero detection still runs with
    /// output disabled.
    pub fn set_framebuffer_enabled(&mut self, enabled: bool) {
        self.ppu.skip_rendering = !enabled;
    }

    /// Press or release a controller button.
    pub fn set_button(&mut self, player: Player, button: JoypadState, pressed: bool) {
        self.input.set_button(player, button, pressed);
    }

    /// Replace the whole button state of a controller.
    pub fn set_joypad(&mut self, player: Player, state: JoypadState) {
        self.input.set_joypad(player, state);
    }

    // Debugger gate

    /// Attach a debugger gate. Its history and modification buffers are
    /// sized at construction; nothing allocates on the tick path.
    pub fn attach_debugger(&mut self, debugger: Debugger) {
        self.debugger = Some(Box::new(debugger));
    }

    pub fn detach_debugger(&mut self) -> Option<Debugger> {
        self.debugger.take().map(|debugger| *debugger)
    }

    /// Whether the debugger holds the console paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.debugger.as_ref().is_some_and(|debugger| debugger.paused)
    }

    /// Release the debugger halt latch and let the next tick run.
    pub fn continue_(&mut self) {
        if let Some(debugger) = self.debugger.as_mut() {
            debugger.paused = false;
            self.resume_pc = Some(self.cpu.pc);
        }
    }

    /// Consult the gate's memory triggers for a bus access.
    pub(crate) fn debug_check_access(&mut self, addr: u16, value: u8, is_write: bool) {
        if self.debugger.is_none() {
            return;
        }
        if let Some(mut debugger) = self.debugger.take() {
            if debugger.check_memory_access(self, addr, value, is_write) {
                debug!("debugger memory break at ${addr:04X}");
                debugger.paused = true;
            }
            self.debugger = Some(debugger);
        }
    }

    /// Side-effect-free single-byte inspection.
    #[must_use]
    pub fn debug_read(&self, addr: u16) -> u8 {
        self.bus_peek(addr)
    }

    /// Side-effect-free range inspection.
    pub fn debug_read_range(&self, start: u16, buf: &mut [u8]) {
        for (i, slot) in buf.iter_mut().enumerate() {
            *slot = self.bus_peek(start.wrapping_add(i as u16));
        }
    }

    /// Write through the normal bus path, logging the modification. Writes
    /// to ROM regions are logged as intent even though storage is unchanged.
    pub fn debug_write(&mut self, addr: u16, val: u8) {
        let old = self.bus_peek(addr);
        self.bus_write(addr, val);
        let new = self.bus_peek(addr);
        let modification = Modification::Memory {
            addr,
            old,
            new,
            cycle: self.clock.cycles(),
            rom_intent: new != val,
        };
        if let Some(debugger) = self.debugger.as_mut() {
            debugger.log_modification(modification);
        }
    }

    /// Set a CPU register, logging the modification.
    pub fn debug_set_register(&mut self, reg: Register, val: u16) {
        let cpu = &mut self.cpu;
        let old = match reg {
            Register::Acc => u16::from(cpu.acc),
            Register::X => u16::from(cpu.x),
            Register::Y => u16::from(cpu.y),
            Register::Sp => u16::from(cpu.sp),
            Register::Pc => cpu.pc,
            Register::Status => u16::from(cpu.status.bits()),
        };
        match reg {
            Register::Acc => cpu.acc = val as u8,
            Register::X => cpu.x = val as u8,
            Register::Y => cpu.y = val as u8,
            Register::Sp => cpu.sp = val as u8,
            Register::Pc => cpu.pc = val,
            Register::Status => {
                cpu.status = crate::cpu::Status::from_bits_truncate(val as u8);
            }
        }
        let modification = Modification::Register {
            reg,
            old,
            new: val,
            cycle: self.clock.cycles(),
        };
        if let Some(debugger) = self.debugger.as_mut() {
            debugger.log_modification(modification);
        }
    }

    /// Capture the CPU state into the debugger's history ring.
    pub fn debug_capture_history(&mut self) {
        if let Some(mut debugger) = self.debugger.take() {
            debugger.capture_history(self);
            self.debugger = Some(debugger);
        }
    }

    /// Restore CPU registers from a history slot. Returns the snapshot that
    /// was applied.
    pub fn debug_restore_history(&mut self, slot: usize) -> debug::Result<CpuSnapshot> {
        let snapshot = self
            .debugger
            .as_ref()
            .ok_or(debug::Error::HistoryIndex(slot))?
            .history_snapshot(slot)?;
        self.cpu.pc = snapshot.pc;
        self.cpu.acc = snapshot.acc;
        self.cpu.x = snapshot.x;
        self.cpu.y = snapshot.y;
        self.cpu.sp = snapshot.sp;
        self.cpu.status = snapshot.status;
        Ok(snapshot)
    }
}

impl Regional for Console {
    fn region(&self) -> NesRegion {
        self.config.region
    }

    fn set_region(&mut self, region: NesRegion) {
        self.config.region = region;
        self.ppu.set_region(region);
        self.apu.set_region(region);
        self.cart.set_region(region);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cart::CartMem;

    fn console_with_test_ram() -> Console {
        let mut console = Console::with_config(Config::default());
        console.load_cart(Cartridge::test_ram());
        console.power_on();
        console
    }

    #[test]
    fn master_clock_advances_by_one() {
        let mut console = console_with_test_ram();
        for expected in 1..=1_000 {
            console.tick();
            assert_eq!(console.clock.cycles(), expected);
        }
    }

    #[test]
    fn power_on_state() {
        let mut console = Console::with_config(Config::default());
        let mut cart = Cartridge::test_ram();
        cart.cpu_write(0xFFFC, 0x34);
        cart.cpu_write(0xFFFD, 0x12);
        console.load_cart(cart);
        console.power_on();

        assert_eq!(console.cpu.pc, 0x1234, "PC from the reset vector");
        assert_eq!(console.cpu.sp, Cpu::POWER_ON_SP);
        assert_eq!(console.cpu.status, Cpu::POWER_ON_STATUS);
        assert!(!console.cpu.nmi_line);
        assert!(!console.cpu.irq_line);
        assert!(console.cpu.rdy_line);
        assert!(console.bus.wram.iter().all(|&b| b == 0), "RAM zeroed");
    }

    #[test]
    fn lda_immediate_two_cpu_cycles() {
        let mut console = console_with_test_ram();
        console.bus_write(0x0000, 0xA9); // LDA #$42
        console.bus_write(0x0001, 0x42);
        console.cpu.pc = 0x0000;

        let start = console.cpu.cycle;
        // Two CPU-active ticks = six master cycles
        for _ in 0..6 {
            console.tick();
        }
        assert_eq!(console.cpu.acc, 0x42);
        assert_eq!(console.cpu.pc, 0x0002);
        assert_eq!(console.cpu.cycle - start, 2, "LDA #imm takes 2 CPU cycles");
        assert!(!console.cpu.status.contains(crate::cpu::Status::Z));
        assert!(!console.cpu.status.contains(crate::cpu::Status::N));
    }

    #[test]
    fn paused_gate_makes_tick_a_no_op() {
        let mut console = console_with_test_ram();
        let mut debugger = Debugger::default();
        debugger.paused = true;
        console.attach_debugger(debugger);

        let before = console.clock.cycles();
        console.tick();
        console.tick();
        assert_eq!(console.clock.cycles(), before, "no advance while paused");

        console.continue_();
        console.tick();
        assert_eq!(console.clock.cycles(), before + 1);
    }
}
