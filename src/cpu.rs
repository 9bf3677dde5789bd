//! 6502 Central Processing Unit (CPU) implementation.
//!
//! The CPU is a microstep state machine: every bus access takes one CPU
//! cycle, and the console advances the machine by exactly one microstep per
//! CPU-active master cycle. Opcode semantics are pure functions in
//! [`instr`]; this module owns their invocation, the addressing-mode
//! microsteps, and the interrupt latch.
//!
//! <https://wiki.nesdev.org/w/index.php/CPU>

use crate::{
    common::{Reset, ResetKind},
    console::Console,
    cpu::instr::{execute_op, AddrMode, InstrDef, InstrKind, Registers, INSTRS},
};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use tracing::trace;

pub mod instr;

// Status Registers
// https://wiki.nesdev.org/w/index.php/Status_flags
// 7654 3210
// NVUB DIZC
// |||| ||||
// |||| |||+- Carry
// |||| ||+-- Zero
// |||| |+--- Interrupt Disable
// |||| +---- Decimal Mode - Not used in the NES but still has to function
// |||+------ Break - 1 when pushed to stack from PHP/BRK, 0 from IRQ/NMI
// ||+------- Unused - always set to 1 when pushed to stack
// |+-------- Overflow
// +--------- Negative
bitflags! {
    /// CPU Status Register.
    #[derive(Default, Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
    #[must_use]
    pub struct Status: u8 {
        const C = 1;      // Carry
        const Z = 1 << 1; // Zero
        const I = 1 << 2; // Disable Interrupt
        const D = 1 << 3; // Decimal Mode
        const B = 1 << 4; // Break
        const U = 1 << 5; // Unused
        const V = 1 << 6; // Overflow
        const N = 1 << 7; // Negative
    }
}

/// Coarse execution state of the CPU state machine. `step` indexes the
/// microstep within the current instruction (the opcode fetch is cycle 1).
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[must_use]
pub enum ExecState {
    #[default]
    FetchOpcode,
    FetchOperand,
    Execute,
    InterruptSequence,
}

/// Interrupt chosen at an instruction boundary, serviced next.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[must_use]
pub enum PendingInterrupt {
    #[default]
    None,
    Reset,
    Nmi,
    Irq,
}

/// The Central Processing Unit status, registers, and microstep overlay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[must_use]
pub struct Cpu {
    /// CPU cycles elapsed. Advances on every CPU-active master cycle,
    /// including cycles the DMA engine stole.
    pub cycle: u64,
    /// Program counter.
    pub pc: u16,
    /// Stack pointer - stack is at $0100-$01FF.
    pub sp: u8,
    /// Accumulator register.
    pub acc: u8,
    /// X register.
    pub x: u8,
    /// Y register.
    pub y: u8,
    /// Status register.
    pub status: Status,

    // Micro-architectural overlay
    pub state: ExecState,
    /// Currently decoded instruction.
    pub instr: InstrDef,
    /// Cycle index within the current instruction; opcode fetch is 1.
    pub step: u8,
    /// Effective address accumulator.
    pub addr: u16,
    /// Partially-fixed address used for the page-cross dummy read.
    pub partial: u16,
    /// Zero-page base or pointer temporary.
    pub base: u8,
    /// Fetched operand value.
    pub operand: u8,
    pub page_crossed: bool,
    /// Branch target while a taken branch fixes up PC.
    branch_target: u16,

    // Wired input lines, sampled by the state machine
    pub nmi_line: bool,
    pub irq_line: bool,
    pub rdy_line: bool,
    prev_nmi_line: bool,
    /// Edge detector output: a 0-to-1 on `nmi_line` was observed and not yet
    /// serviced.
    nmi_edge: bool,
    pub pending: PendingInterrupt,
    /// A JAM/KIL opcode locked the CPU; only a hardware reset recovers.
    pub halted: bool,

    /// One-shot raised when an NMI sequence begins, consumed by the console
    /// to acknowledge the VBlank ledger.
    nmi_ack: bool,
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

impl Cpu {
    pub const NMI_VECTOR: u16 = 0xFFFA;
    pub const RESET_VECTOR: u16 = 0xFFFC;
    pub const IRQ_VECTOR: u16 = 0xFFFE;
    pub const POWER_ON_STATUS: Status = Status::U.union(Status::I);
    pub const POWER_ON_SP: u8 = 0xFD;
    const SP_BASE: u16 = 0x0100;

    pub fn new() -> Self {
        Self {
            cycle: 0,
            pc: 0x0000,
            sp: 0x00,
            acc: 0x00,
            x: 0x00,
            y: 0x00,
            status: Self::POWER_ON_STATUS,
            state: ExecState::FetchOpcode,
            instr: InstrDef::default(),
            step: 0,
            addr: 0x0000,
            partial: 0x0000,
            base: 0x00,
            operand: 0x00,
            page_crossed: false,
            branch_target: 0x0000,
            nmi_line: false,
            irq_line: false,
            rdy_line: true,
            prev_nmi_line: false,
            nmi_edge: false,
            pending: PendingInterrupt::None,
            halted: false,
            nmi_ack: false,
        }
    }

    /// Snapshot of the register file for the pure opcode dispatch.
    pub const fn registers(&self) -> Registers {
        Registers {
            acc: self.acc,
            x: self.x,
            y: self.y,
            sp: self.sp,
            pc: self.pc,
            status: self.status,
        }
    }

    /// Whether the CPU sits at an instruction boundary.
    #[inline]
    #[must_use]
    pub fn at_instr_boundary(&self) -> bool {
        self.state == ExecState::FetchOpcode
    }

    /// Consume the one-shot NMI acknowledge signal.
    pub(crate) fn take_nmi_ack(&mut self) -> bool {
        std::mem::take(&mut self.nmi_ack)
    }

    fn set_zn(&mut self, val: u8) {
        self.status.set(Status::Z, val == 0x00);
        self.status.set(Status::N, val & 0x80 != 0);
    }

    /// Returns whether two addresses sit on different memory pages.
    #[inline]
    #[must_use]
    const fn pages_differ(addr1: u16, addr2: u16) -> bool {
        (addr1 & 0xFF00) != (addr2 & 0xFF00)
    }
}

impl Reset for Cpu {
    fn reset(&mut self, kind: ResetKind) {
        trace!("{kind:?} RESET");
        match kind {
            ResetKind::Soft => {
                self.status.insert(Status::I);
                // Reset runs the interrupt sequence with writes suppressed,
                // so only the stack pointer moves
                self.sp = self.sp.wrapping_sub(0x03);
            }
            ResetKind::Hard => {
                self.acc = 0x00;
                self.x = 0x00;
                self.y = 0x00;
                self.status = Self::POWER_ON_STATUS;
                self.sp = Self::POWER_ON_SP;
            }
        }
        self.cycle = 0;
        self.state = ExecState::FetchOpcode;
        self.instr = InstrDef::default();
        self.step = 0;
        self.page_crossed = false;
        self.nmi_line = false;
        self.irq_line = false;
        self.rdy_line = true;
        self.prev_nmi_line = false;
        self.nmi_edge = false;
        self.pending = PendingInterrupt::None;
        self.halted = false;
        self.nmi_ack = false;
    }
}

impl std::fmt::Display for Cpu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "PC:{:04X} A:{:02X} X:{:02X} Y:{:02X} P:{:02X} SP:{:02X} CYC:{}",
            self.pc,
            self.acc,
            self.x,
            self.y,
            self.status.bits(),
            self.sp,
            self.cycle
        )
    }
}

impl Console {
    /// Read through the bus on behalf of the CPU, recording the address for
    /// the DMC repeat-read quirk.
    pub(crate) fn cpu_read(&mut self, addr: u16) -> u8 {
        self.dma.last_cpu_read_addr = addr;
        self.bus_read(addr)
    }

    pub(crate) fn cpu_write(&mut self, addr: u16, val: u8) {
        self.bus_write(addr, val);
    }

    fn fetch_byte(&mut self) -> u8 {
        let val = self.cpu_read(self.cpu.pc);
        self.cpu.pc = self.cpu.pc.wrapping_add(1);
        val
    }

    fn push_byte(&mut self, val: u8) {
        self.cpu_write(Cpu::SP_BASE | u16::from(self.cpu.sp), val);
        self.cpu.sp = self.cpu.sp.wrapping_sub(1);
    }

    fn pull_byte(&mut self) -> u8 {
        self.cpu.sp = self.cpu.sp.wrapping_add(1);
        self.cpu_read(Cpu::SP_BASE | u16::from(self.cpu.sp))
    }

    /// Dummy read of the byte under the stack pointer (internal cycles).
    fn stack_dummy_read(&mut self) {
        let _ = self.cpu_read(Cpu::SP_BASE | u16::from(self.cpu.sp));
    }

    /// Execute exactly one CPU microstep. Called once per CPU-active master
    /// cycle while the RDY line is high.
    pub(crate) fn cpu_microstep(&mut self) {
        if self.cpu.halted {
            return;
        }
        match self.cpu.state {
            ExecState::FetchOpcode => {
                if self.cpu.pending != PendingInterrupt::None {
                    self.begin_interrupt_sequence();
                } else {
                    let opcode = self.fetch_byte();
                    self.cpu.instr = INSTRS[usize::from(opcode)];
                    self.cpu.step = 1;
                    self.cpu.page_crossed = false;
                    self.cpu.state = ExecState::FetchOperand;
                }
            }
            ExecState::FetchOperand | ExecState::Execute => {
                self.cpu.step += 1;
                self.instr_cycle();
            }
            ExecState::InterruptSequence => {
                self.cpu.step += 1;
                self.interrupt_cycle();
            }
        }
        self.sample_interrupts();
    }

    /// Interrupt edge/level sampling, run after every microstep.
    ///
    /// The NMI edge detector runs every cycle; the service decision latches
    /// only at an instruction boundary, i.e. after the last bus access of the
    /// instruction. That ordering gives trailing-write instructions one cycle
    /// to complete before an interrupt wins.
    pub(crate) fn sample_interrupts(&mut self) {
        let cpu = &mut self.cpu;
        if cpu.nmi_line && !cpu.prev_nmi_line {
            trace!("NMI edge detected - CYC:{}", cpu.cycle);
            cpu.nmi_edge = true;
        }
        cpu.prev_nmi_line = cpu.nmi_line;

        if cpu.state == ExecState::FetchOpcode {
            let irq_wanted = cpu.irq_line && !cpu.status.contains(Status::I);
            if cpu.nmi_edge {
                cpu.pending = PendingInterrupt::Nmi;
            } else if irq_wanted {
                cpu.pending = PendingInterrupt::Irq;
            } else if cpu.pending == PendingInterrupt::Irq {
                // IRQ is level-triggered: un-latch if the line dropped before
                // the sequence started
                cpu.pending = PendingInterrupt::None;
            }
        }
    }

    fn begin_interrupt_sequence(&mut self) {
        trace!(
            "{:?} sequence start - CYC:{}",
            self.cpu.pending,
            self.cpu.cycle
        );
        if self.cpu.pending == PendingInterrupt::Nmi {
            self.cpu.nmi_edge = false;
            self.cpu.nmi_ack = true;
        }
        self.cpu.state = ExecState::InterruptSequence;
        self.cpu.step = 1;
        let _ = self.cpu_read(self.cpu.pc); // Dummy opcode fetch
    }

    /// One cycle of the 7-cycle NMI/IRQ sequence.
    ///
    /// ```text
    ///  #  address R/W description
    /// --- ------- --- -----------------------------------------------
    ///  1    PC     R  fetch opcode (and throw it away)
    ///  2    PC     R  read next instruction byte (and throw it away)
    ///  3  $0100,S  W  push PCH to stack, decrement S
    ///  4  $0100,S  W  push PCL to stack, decrement S
    ///  5  $0100,S  W  push P to stack (B clear), decrement S
    ///  6   vector  R  fetch low byte of interrupt vector, set I
    ///  7   vector  R  fetch high byte of interrupt vector
    /// ```
    fn interrupt_cycle(&mut self) {
        match self.cpu.step {
            2 => {
                let _ = self.cpu_read(self.cpu.pc);
            }
            3 => self.push_byte((self.cpu.pc >> 8) as u8),
            4 => self.push_byte((self.cpu.pc & 0xFF) as u8),
            5 => {
                let status = (self.cpu.status | Status::U) & !Status::B;
                self.push_byte(status.bits());
                // An NMI edge arriving before the vector fetch hijacks an IRQ
                if self.cpu.pending == PendingInterrupt::Irq && self.cpu.nmi_edge {
                    self.cpu.pending = PendingInterrupt::Nmi;
                    self.cpu.nmi_edge = false;
                    self.cpu.nmi_ack = true;
                }
            }
            6 => {
                self.cpu.status.insert(Status::I);
                let vector = self.interrupt_vector();
                self.cpu.addr = u16::from(self.cpu_read(vector));
            }
            7 => {
                let vector = self.interrupt_vector();
                let hi = self.cpu_read(vector.wrapping_add(1));
                self.cpu.pc = (u16::from(hi) << 8) | self.cpu.addr;
                trace!("{:?} - PC:${:04X}", self.cpu.pending, self.cpu.pc);
                self.cpu.pending = PendingInterrupt::None;
                self.finish_instr();
            }
            _ => debug_assert!(false, "interrupt sequence step out of range"),
        }
    }

    const fn interrupt_vector(&self) -> u16 {
        match self.cpu.pending {
            PendingInterrupt::Nmi => Cpu::NMI_VECTOR,
            PendingInterrupt::Reset => Cpu::RESET_VECTOR,
            _ => Cpu::IRQ_VECTOR,
        }
    }

    fn finish_instr(&mut self) {
        self.cpu.state = ExecState::FetchOpcode;
        self.cpu.step = 0;
    }

    /// Apply a pure opcode delta to the register file. Bus writes and pushes
    /// are plumbed by the caller.
    fn apply_delta(&mut self, delta: instr::OpDelta) {
        let cpu = &mut self.cpu;
        if let Some(acc) = delta.acc {
            cpu.acc = acc;
        }
        if let Some(x) = delta.x {
            cpu.x = x;
        }
        if let Some(y) = delta.y {
            cpu.y = y;
        }
        if let Some(sp) = delta.sp {
            cpu.sp = sp;
        }
        if let Some(status) = delta.status {
            // U is hardwired high and B only exists on the stack
            cpu.status = (status | Status::U) & !Status::B;
        }
        if delta.halt {
            trace!("HLT - CPU jammed - CYC:{}", cpu.cycle);
            cpu.halted = true;
        }
    }

    fn execute_with(&mut self, operand: u8) -> instr::OpDelta {
        let delta = execute_op(self.cpu.instr, self.cpu.registers(), operand, self.cpu.addr);
        self.apply_delta(delta);
        delta
    }

    // Named addressing microsteps, shared across instruction kinds

    /// Fetch the low byte of a two-byte operand (or a whole zero-page
    /// address).
    fn fetch_operand_low(&mut self) {
        self.cpu.addr = u16::from(self.fetch_byte());
    }

    fn fetch_operand_high(&mut self) {
        self.cpu.addr |= u16::from(self.fetch_byte()) << 8;
    }

    /// Dummy read the unindexed zero-page base, then add an index register.
    fn add_index_to_base(&mut self, index: u8) {
        let base = (self.cpu.addr & 0xFF) as u8;
        let _ = self.cpu_read(u16::from(base));
        self.cpu.addr = u16::from(base.wrapping_add(index));
    }

    /// Fetch the high address byte and add an index, recording the
    /// partially-fixed address for the mandatory dummy access.
    fn calc_indexed(&mut self, index: u8) {
        self.fetch_operand_high();
        let base = self.cpu.addr;
        let addr = base.wrapping_add(u16::from(index));
        self.cpu.page_crossed = Cpu::pages_differ(base, addr);
        self.cpu.partial = (base & 0xFF00) | (addr & 0x00FF);
        self.cpu.addr = addr;
    }

    /// Add Y to the pointer just read from zero page.
    fn add_y_to_pointer(&mut self, hi: u8) {
        let base = (u16::from(hi) << 8) | (self.cpu.addr & 0xFF);
        let addr = base.wrapping_add(u16::from(self.cpu.y));
        self.cpu.page_crossed = Cpu::pages_differ(base, addr);
        self.cpu.partial = (base & 0xFF00) | (addr & 0x00FF);
        self.cpu.addr = addr;
    }

    /// Dummy read at the partially-fixed address, then fix the high byte.
    fn fix_high_byte(&mut self) {
        let _ = self.cpu_read(self.cpu.partial);
    }

    fn index_for_mode(&self) -> u8 {
        match self.cpu.instr.addr_mode {
            AddrMode::ZPY | AddrMode::ABY => self.cpu.y,
            _ => self.cpu.x,
        }
    }

    fn instr_cycle(&mut self) {
        match self.cpu.instr.kind {
            InstrKind::Read => self.read_instr_cycle(),
            InstrKind::Store => self.store_instr_cycle(),
            InstrKind::Rmw => self.rmw_instr_cycle(),
            InstrKind::Branch => self.branch_cycle(),
            InstrKind::Implied => self.implied_cycle(),
            InstrKind::Jump => self.jump_cycle(),
            InstrKind::JumpIndirect => self.jump_indirect_cycle(),
            InstrKind::Jsr => self.jsr_cycle(),
            InstrKind::Rts => self.rts_cycle(),
            InstrKind::Rti => self.rti_cycle(),
            InstrKind::Brk => self.brk_cycle(),
            InstrKind::Push => self.push_cycle(),
            InstrKind::Pull => self.pull_cycle(),
            InstrKind::Halt => self.halt_cycle(),
        }
    }

    /// Final cycle of a read instruction: read the operand and execute.
    fn read_effective(&mut self) {
        let operand = self.cpu_read(self.cpu.addr);
        self.cpu.state = ExecState::Execute;
        let _ = self.execute_with(operand);
        self.finish_instr();
    }

    fn read_instr_cycle(&mut self) {
        let step = self.cpu.step;
        match (self.cpu.instr.addr_mode, step) {
            (AddrMode::IMM, 2) => {
                let operand = self.fetch_byte();
                let _ = self.execute_with(operand);
                self.finish_instr();
            }
            (AddrMode::ZP0, 2) => self.fetch_operand_low(),
            (AddrMode::ZP0, 3) => self.read_effective(),
            (AddrMode::ZPX | AddrMode::ZPY, 2) => self.fetch_operand_low(),
            (AddrMode::ZPX | AddrMode::ZPY, 3) => self.add_index_to_base(self.index_for_mode()),
            (AddrMode::ZPX | AddrMode::ZPY, 4) => self.read_effective(),
            (AddrMode::ABS, 2) => self.fetch_operand_low(),
            (AddrMode::ABS, 3) => self.fetch_operand_high(),
            (AddrMode::ABS, 4) => self.read_effective(),
            (AddrMode::ABX | AddrMode::ABY, 2) => self.fetch_operand_low(),
            (AddrMode::ABX | AddrMode::ABY, 3) => self.calc_indexed(self.index_for_mode()),
            (AddrMode::ABX | AddrMode::ABY, 4) => {
                // The read at the partially-fixed address is the operand read
                // unless the page crossed
                if self.cpu.page_crossed {
                    self.fix_high_byte();
                } else {
                    self.read_effective();
                }
            }
            (AddrMode::ABX | AddrMode::ABY, 5) => self.read_effective(),
            (AddrMode::IDX, 2) => self.fetch_operand_low(),
            (AddrMode::IDX, 3) => self.add_index_to_base(self.cpu.x),
            (AddrMode::IDX, 4) => {
                self.cpu.base = (self.cpu.addr & 0xFF) as u8;
                self.cpu.addr = u16::from(self.cpu_read(u16::from(self.cpu.base)));
            }
            (AddrMode::IDX, 5) => {
                let hi = self.cpu_read(u16::from(self.cpu.base.wrapping_add(1)));
                self.cpu.addr |= u16::from(hi) << 8;
            }
            (AddrMode::IDX, 6) => self.read_effective(),
            (AddrMode::IDY, 2) => {
                self.cpu.base = self.fetch_byte();
            }
            (AddrMode::IDY, 3) => {
                self.cpu.addr = u16::from(self.cpu_read(u16::from(self.cpu.base)));
            }
            (AddrMode::IDY, 4) => {
                let hi = self.cpu_read(u16::from(self.cpu.base.wrapping_add(1)));
                self.add_y_to_pointer(hi);
            }
            (AddrMode::IDY, 5) => {
                if self.cpu.page_crossed {
                    self.fix_high_byte();
                } else {
                    self.read_effective();
                }
            }
            (AddrMode::IDY, 6) => self.read_effective(),
            _ => debug_assert!(false, "read microstep out of range"),
        }
    }

    /// Final cycle of a store: execute for the value, then write it.
    fn write_effective(&mut self) {
        self.cpu.state = ExecState::Execute;
        let delta = execute_op(self.cpu.instr, self.cpu.registers(), 0x00, self.cpu.addr);
        self.apply_delta(delta);
        let val = delta.write.unwrap_or(self.cpu.acc);
        self.cpu_write(self.cpu.addr, val);
        self.finish_instr();
    }

    fn store_instr_cycle(&mut self) {
        let step = self.cpu.step;
        match (self.cpu.instr.addr_mode, step) {
            (AddrMode::ZP0, 2) => self.fetch_operand_low(),
            (AddrMode::ZP0, 3) => self.write_effective(),
            (AddrMode::ZPX | AddrMode::ZPY, 2) => self.fetch_operand_low(),
            (AddrMode::ZPX | AddrMode::ZPY, 3) => self.add_index_to_base(self.index_for_mode()),
            (AddrMode::ZPX | AddrMode::ZPY, 4) => self.write_effective(),
            (AddrMode::ABS, 2) => self.fetch_operand_low(),
            (AddrMode::ABS, 3) => self.fetch_operand_high(),
            (AddrMode::ABS, 4) => self.write_effective(),
            (AddrMode::ABX | AddrMode::ABY, 2) => self.fetch_operand_low(),
            (AddrMode::ABX | AddrMode::ABY, 3) => self.calc_indexed(self.index_for_mode()),
            // Stores always burn the fix-up cycle
            (AddrMode::ABX | AddrMode::ABY, 4) => self.fix_high_byte(),
            (AddrMode::ABX | AddrMode::ABY, 5) => self.write_effective(),
            (AddrMode::IDX, 2) => self.fetch_operand_low(),
            (AddrMode::IDX, 3) => self.add_index_to_base(self.cpu.x),
            (AddrMode::IDX, 4) => {
                self.cpu.base = (self.cpu.addr & 0xFF) as u8;
                self.cpu.addr = u16::from(self.cpu_read(u16::from(self.cpu.base)));
            }
            (AddrMode::IDX, 5) => {
                let hi = self.cpu_read(u16::from(self.cpu.base.wrapping_add(1)));
                self.cpu.addr |= u16::from(hi) << 8;
            }
            (AddrMode::IDX, 6) => self.write_effective(),
            (AddrMode::IDY, 2) => {
                self.cpu.base = self.fetch_byte();
            }
            (AddrMode::IDY, 3) => {
                self.cpu.addr = u16::from(self.cpu_read(u16::from(self.cpu.base)));
            }
            (AddrMode::IDY, 4) => {
                let hi = self.cpu_read(u16::from(self.cpu.base.wrapping_add(1)));
                self.add_y_to_pointer(hi);
            }
            (AddrMode::IDY, 5) => self.fix_high_byte(),
            (AddrMode::IDY, 6) => self.write_effective(),
            _ => debug_assert!(false, "store microstep out of range"),
        }
    }

    /// Read-modify-write tail: read, dummy write of the original value, then
    /// the modified write. The dummy write is observable on the bus.
    fn rmw_tail(&mut self, step_offset: u8) {
        match self.cpu.step - step_offset {
            0 => {
                self.cpu.operand = self.cpu_read(self.cpu.addr);
            }
            1 => self.rmw_dummy_write(),
            2 => {
                self.cpu.state = ExecState::Execute;
                let delta = self.execute_with(self.cpu.operand);
                let val = delta.write.unwrap_or(self.cpu.operand);
                self.cpu_write(self.cpu.addr, val);
                self.finish_instr();
            }
            _ => debug_assert!(false, "rmw microstep out of range"),
        }
    }

    fn rmw_dummy_write(&mut self) {
        self.cpu_write(self.cpu.addr, self.cpu.operand);
    }

    fn rmw_instr_cycle(&mut self) {
        let step = self.cpu.step;
        match (self.cpu.instr.addr_mode, step) {
            (AddrMode::ZP0, 2) => self.fetch_operand_low(),
            (AddrMode::ZP0, 3..=5) => self.rmw_tail(3),
            (AddrMode::ZPX, 2) => self.fetch_operand_low(),
            (AddrMode::ZPX, 3) => self.add_index_to_base(self.cpu.x),
            (AddrMode::ZPX, 4..=6) => self.rmw_tail(4),
            (AddrMode::ABS, 2) => self.fetch_operand_low(),
            (AddrMode::ABS, 3) => self.fetch_operand_high(),
            (AddrMode::ABS, 4..=6) => self.rmw_tail(4),
            (AddrMode::ABX | AddrMode::ABY, 2) => self.fetch_operand_low(),
            (AddrMode::ABX | AddrMode::ABY, 3) => self.calc_indexed(self.index_for_mode()),
            (AddrMode::ABX | AddrMode::ABY, 4) => self.fix_high_byte(),
            (AddrMode::ABX | AddrMode::ABY, 5..=7) => self.rmw_tail(5),
            (AddrMode::IDX, 2) => self.fetch_operand_low(),
            (AddrMode::IDX, 3) => self.add_index_to_base(self.cpu.x),
            (AddrMode::IDX, 4) => {
                self.cpu.base = (self.cpu.addr & 0xFF) as u8;
                self.cpu.addr = u16::from(self.cpu_read(u16::from(self.cpu.base)));
            }
            (AddrMode::IDX, 5) => {
                let hi = self.cpu_read(u16::from(self.cpu.base.wrapping_add(1)));
                self.cpu.addr |= u16::from(hi) << 8;
            }
            (AddrMode::IDX, 6..=8) => self.rmw_tail(6),
            (AddrMode::IDY, 2) => {
                self.cpu.base = self.fetch_byte();
            }
            (AddrMode::IDY, 3) => {
                self.cpu.addr = u16::from(self.cpu_read(u16::from(self.cpu.base)));
            }
            (AddrMode::IDY, 4) => {
                let hi = self.cpu_read(u16::from(self.cpu.base.wrapping_add(1)));
                self.add_y_to_pointer(hi);
            }
            (AddrMode::IDY, 5) => self.fix_high_byte(),
            (AddrMode::IDY, 6..=8) => self.rmw_tail(6),
            _ => debug_assert!(false, "rmw microstep out of range"),
        }
    }

    /// ```text
    ///  #   address  R/W description
    /// --- --------- --- ---------------------------------------------
    ///  1     PC      R  fetch opcode, increment PC
    ///  2     PC      R  fetch operand, increment PC
    ///  3     PC      R  if taken: add operand to PCL
    ///  4     PC*     R  if PCH needs fixing: fix PCH
    /// ```
    fn branch_cycle(&mut self) {
        match self.cpu.step {
            2 => {
                let operand = self.fetch_byte();
                self.cpu.state = ExecState::Execute;
                let delta = execute_op(self.cpu.instr, self.cpu.registers(), operand, 0);
                if delta.branch == Some(true) {
                    self.cpu.branch_target =
                        (self.cpu.pc as i16).wrapping_add(i16::from(operand as i8)) as u16;
                } else {
                    self.finish_instr();
                }
            }
            3 => {
                // Dummy opcode fetch while PCL is patched
                let _ = self.cpu_read(self.cpu.pc);
                let target = self.cpu.branch_target;
                let same_page = !Cpu::pages_differ(self.cpu.pc, target);
                self.cpu.pc = (self.cpu.pc & 0xFF00) | (target & 0x00FF);
                if same_page {
                    self.cpu.pc = target;
                    self.finish_instr();
                }
            }
            4 => {
                // Dummy fetch at the unfixed address, then fix PCH
                let _ = self.cpu_read(self.cpu.pc);
                self.cpu.pc = self.cpu.branch_target;
                self.finish_instr();
            }
            _ => debug_assert!(false, "branch microstep out of range"),
        }
    }

    fn implied_cycle(&mut self) {
        debug_assert_eq!(self.cpu.step, 2);
        let _ = self.cpu_read(self.cpu.pc); // Dummy read
        self.cpu.state = ExecState::Execute;
        let operand = self.cpu.acc;
        let _ = self.execute_with(operand);
        self.finish_instr();
    }

    fn jump_cycle(&mut self) {
        match self.cpu.step {
            2 => self.fetch_operand_low(),
            3 => {
                let hi = self.cpu_read(self.cpu.pc);
                self.cpu.pc = (u16::from(hi) << 8) | self.cpu.addr;
                self.finish_instr();
            }
            _ => debug_assert!(false, "jmp microstep out of range"),
        }
    }

    /// JMP (indirect), including the hardware page-wrap pointer bug: a
    /// pointer ending in $FF fetches its high byte from the start of the same
    /// page.
    fn jump_indirect_cycle(&mut self) {
        match self.cpu.step {
            2 => self.fetch_operand_low(),
            3 => self.fetch_operand_high(),
            4 => {
                self.cpu.operand = self.cpu_read(self.cpu.addr);
            }
            5 => {
                let ptr = self.cpu.addr;
                let hi_ptr = (ptr & 0xFF00) | (ptr.wrapping_add(1) & 0x00FF);
                let hi = self.cpu_read(hi_ptr);
                self.cpu.pc = (u16::from(hi) << 8) | u16::from(self.cpu.operand);
                self.finish_instr();
            }
            _ => debug_assert!(false, "jmp indirect microstep out of range"),
        }
    }

    /// ```text
    ///  #  address R/W description
    /// --- ------- --- -------------------------------------------------
    ///  1    PC     R  fetch opcode, increment PC
    ///  2    PC     R  fetch low address byte, increment PC
    ///  3  $0100,S  R  internal operation (predecrement S?)
    ///  4  $0100,S  W  push PCH on stack, decrement S
    ///  5  $0100,S  W  push PCL on stack, decrement S
    ///  6    PC     R  copy low address byte to PCL, fetch high byte to PCH
    /// ```
    fn jsr_cycle(&mut self) {
        match self.cpu.step {
            2 => self.fetch_operand_low(),
            3 => self.stack_dummy_read(),
            4 => self.push_byte((self.cpu.pc >> 8) as u8),
            5 => self.push_byte((self.cpu.pc & 0xFF) as u8),
            6 => {
                let hi = self.cpu_read(self.cpu.pc);
                self.cpu.pc = (u16::from(hi) << 8) | self.cpu.addr;
                self.finish_instr();
            }
            _ => debug_assert!(false, "jsr microstep out of range"),
        }
    }

    fn rts_cycle(&mut self) {
        match self.cpu.step {
            2 => {
                let _ = self.cpu_read(self.cpu.pc);
            }
            3 => self.stack_dummy_read(),
            4 => {
                self.cpu.addr = u16::from(self.pull_byte());
            }
            5 => {
                let hi = self.pull_byte();
                self.cpu.pc = (u16::from(hi) << 8) | self.cpu.addr;
            }
            6 => {
                let _ = self.cpu_read(self.cpu.pc);
                self.cpu.pc = self.cpu.pc.wrapping_add(1);
                self.finish_instr();
            }
            _ => debug_assert!(false, "rts microstep out of range"),
        }
    }

    fn rti_cycle(&mut self) {
        match self.cpu.step {
            2 => {
                let _ = self.cpu_read(self.cpu.pc);
            }
            3 => self.stack_dummy_read(),
            4 => {
                let status = Status::from_bits_truncate(self.pull_byte());
                self.cpu.status = (status | Status::U) & !Status::B;
            }
            5 => {
                self.cpu.addr = u16::from(self.pull_byte());
            }
            6 => {
                let hi = self.pull_byte();
                self.cpu.pc = (u16::from(hi) << 8) | self.cpu.addr;
                self.finish_instr();
            }
            _ => debug_assert!(false, "rti microstep out of range"),
        }
    }

    /// BRK pushes PC+2 and the status with B and U set, loads PC from
    /// $FFFE/$FFFF, and sets I. An NMI edge before the vector fetch hijacks
    /// the vector.
    fn brk_cycle(&mut self) {
        match self.cpu.step {
            2 => {
                let _ = self.fetch_byte(); // Padding byte
            }
            3 => self.push_byte((self.cpu.pc >> 8) as u8),
            4 => self.push_byte((self.cpu.pc & 0xFF) as u8),
            5 => {
                let status = self.cpu.status | Status::B | Status::U;
                self.push_byte(status.bits());
                if self.cpu.nmi_edge {
                    self.cpu.pending = PendingInterrupt::Nmi;
                    self.cpu.nmi_edge = false;
                    self.cpu.nmi_ack = true;
                }
            }
            6 => {
                self.cpu.status.insert(Status::I);
                let vector = if self.cpu.pending == PendingInterrupt::Nmi {
                    Cpu::NMI_VECTOR
                } else {
                    Cpu::IRQ_VECTOR
                };
                self.cpu.addr = u16::from(self.cpu_read(vector));
            }
            7 => {
                let vector = if self.cpu.pending == PendingInterrupt::Nmi {
                    self.cpu.pending = PendingInterrupt::None;
                    Cpu::NMI_VECTOR
                } else {
                    Cpu::IRQ_VECTOR
                };
                let hi = self.cpu_read(vector.wrapping_add(1));
                self.cpu.pc = (u16::from(hi) << 8) | self.cpu.addr;
                self.finish_instr();
            }
            _ => debug_assert!(false, "brk microstep out of range"),
        }
    }

    fn push_cycle(&mut self) {
        match self.cpu.step {
            2 => {
                let _ = self.cpu_read(self.cpu.pc);
            }
            3 => {
                self.cpu.state = ExecState::Execute;
                let delta = execute_op(self.cpu.instr, self.cpu.registers(), 0x00, 0);
                if let Some(val) = delta.push {
                    self.push_byte(val);
                }
                self.finish_instr();
            }
            _ => debug_assert!(false, "push microstep out of range"),
        }
    }

    fn pull_cycle(&mut self) {
        use instr::Instr;
        match self.cpu.step {
            2 => {
                let _ = self.cpu_read(self.cpu.pc);
            }
            3 => self.stack_dummy_read(),
            4 => {
                self.cpu.state = ExecState::Execute;
                let val = self.pull_byte();
                match self.cpu.instr.instr {
                    Instr::PLA => {
                        self.cpu.acc = val;
                        self.cpu.set_zn(val);
                    }
                    Instr::PLP => {
                        let status = Status::from_bits_truncate(val);
                        self.cpu.status = (status | Status::U) & !Status::B;
                    }
                    _ => debug_assert!(false, "pull kind with non-pull instruction"),
                }
                self.finish_instr();
            }
            _ => debug_assert!(false, "pull microstep out of range"),
        }
    }

    fn halt_cycle(&mut self) {
        let _ = self.cpu_read(self.cpu.pc);
        let _ = self.execute_with(0x00);
        self.finish_instr();
    }
}
