//! CPU instruction table and pure opcode semantics.
//!
//! Opcode semantics are pure functions of the register file and the fetched
//! operand: they return an [`OpDelta`] describing the register/flag updates,
//! at most one bus write, at most one stack push, and a halt flag. All bus
//! side effects are applied by the execute stage in
//! [`cpu`](crate::cpu), never here.
//!
//! # References
//!
//! - <https://wiki.nesdev.org/w/index.php/6502_instructions>
//! - <http://archive.6502.org/datasheets/rockwell_r650x_r651x.pdf>

use crate::cpu::Status;
use serde::{Deserialize, Serialize};

/// List of all CPU official and unofficial operations.
#[rustfmt::skip]
#[allow(clippy::upper_case_acronyms, reason = "more idiomatic for cpu instructions")]
#[derive(Default, Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[must_use]
pub enum Instr {
    ADC, AND, ASL, BCC, BCS, BEQ, BIT, BMI, BNE, BPL, BRK, BVC, BVS, CLC, CLD, CLI, CLV, CMP, CPX,
    CPY, DEC, DEX, DEY, EOR, INC, INX, INY, JMP, JSR, LDA, LDX, LDY, LSR, NOP, ORA, PHA, PHP, PLA,
    PLP, ROL, ROR, RTI, RTS, SBC, SEC, SED, SEI, STA, STX, STY, TAX, TAY, TSX, TXA, TXS, TYA,
    // "Unofficial" opcodes
    AHX, ALR, ANC, ARR, ATX, AXS, DCP, ISB, LAS, LAX, RLA, RRA, SAX, SLO, SRE, SXA, SYA, TAS, XAA,
    #[default] HLT
}

/// CPU addressing mode. Read/write/modify cycle variants are derived from
/// [`InstrKind`], not encoded in the mode.
#[rustfmt::skip]
#[allow(clippy::upper_case_acronyms, reason = "more idiomatic for cpu addressing modes")]
#[derive(Default, Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[must_use]
pub enum AddrMode {
    ACC, #[default] IMP, IMM, REL,
    ZP0, ZPX, ZPY,
    ABS, ABX, ABY,
    IND, IDX, IDY,
}

/// Microstep schedule family an instruction executes under.
#[derive(Default, Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[must_use]
pub enum InstrKind {
    /// Reads its operand (memory or immediate), then applies the delta.
    Read,
    /// Writes a register-derived value to the effective address.
    Store,
    /// Read-modify-write: dummy write of the original value, then the
    /// modified value.
    Rmw,
    /// Relative branch.
    Branch,
    /// No memory operand; acts on registers only (includes accumulator
    /// shifts).
    #[default]
    Implied,
    /// JMP absolute.
    Jump,
    /// JMP (indirect), with the page-wrap pointer bug.
    JumpIndirect,
    /// JSR/RTS/RTI/BRK/PHA/PHP/PLA/PLP custom sequences.
    Jsr,
    Rts,
    Rti,
    Brk,
    Push,
    Pull,
    /// Illegal opcode that jams the CPU until reset.
    Halt,
}

/// One entry of the 256-entry instruction matrix.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[must_use]
pub struct InstrDef {
    pub opcode: u8,
    pub instr: Instr,
    pub addr_mode: AddrMode,
    pub kind: InstrKind,
    /// Base cycle count, excluding page-cross and branch penalties.
    pub cycles: u8,
}

impl std::fmt::Display for InstrDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        #[allow(
            clippy::wildcard_enum_match_arm,
            reason = "only unofficial instructions are marked with a *"
        )]
        let unofficial = match self.instr {
            Instr::HLT
            | Instr::AHX
            | Instr::ALR
            | Instr::ANC
            | Instr::ARR
            | Instr::ATX
            | Instr::AXS
            | Instr::DCP
            | Instr::ISB
            | Instr::LAS
            | Instr::LAX
            | Instr::RLA
            | Instr::RRA
            | Instr::SAX
            | Instr::SLO
            | Instr::SRE
            | Instr::SXA
            | Instr::SYA
            | Instr::TAS
            | Instr::XAA => "*",
            Instr::NOP if self.opcode != 0xEA => "*", // 0xEA is the only official NOP
            Instr::SBC if self.opcode == 0xEB => "*",
            _ => "",
        };
        write!(f, "{unofficial:1}{:?}", self.instr)
    }
}

macro_rules! instr {
    ($opcode:expr, $instr:ident, $addr_mode:ident, $kind:ident, $cycles:expr) => {
        InstrDef {
            opcode: $opcode,
            instr: Instr::$instr,
            addr_mode: AddrMode::$addr_mode,
            kind: InstrKind::$kind,
            cycles: $cycles,
        }
    };
}

/// 16x16 grid of 6502 opcodes. Matches the datasheet matrix for easy lookup.
#[rustfmt::skip]
pub const INSTRS: [InstrDef; 256] = [
    instr!(0x00, BRK, IMP, Brk, 7),     instr!(0x01, ORA, IDX, Read, 6),   instr!(0x02, HLT, IMP, Halt, 2),   instr!(0x03, SLO, IDX, Rmw, 8),    instr!(0x04, NOP, ZP0, Read, 3),   instr!(0x05, ORA, ZP0, Read, 3),   instr!(0x06, ASL, ZP0, Rmw, 5),    instr!(0x07, SLO, ZP0, Rmw, 5),    instr!(0x08, PHP, IMP, Push, 3),   instr!(0x09, ORA, IMM, Read, 2),   instr!(0x0A, ASL, ACC, Implied, 2), instr!(0x0B, ANC, IMM, Read, 2),   instr!(0x0C, NOP, ABS, Read, 4),   instr!(0x0D, ORA, ABS, Read, 4),   instr!(0x0E, ASL, ABS, Rmw, 6),    instr!(0x0F, SLO, ABS, Rmw, 6),
    instr!(0x10, BPL, REL, Branch, 2),  instr!(0x11, ORA, IDY, Read, 5),   instr!(0x12, HLT, IMP, Halt, 2),   instr!(0x13, SLO, IDY, Rmw, 8),    instr!(0x14, NOP, ZPX, Read, 4),   instr!(0x15, ORA, ZPX, Read, 4),   instr!(0x16, ASL, ZPX, Rmw, 6),    instr!(0x17, SLO, ZPX, Rmw, 6),    instr!(0x18, CLC, IMP, Implied, 2), instr!(0x19, ORA, ABY, Read, 4),  instr!(0x1A, NOP, IMP, Implied, 2), instr!(0x1B, SLO, ABY, Rmw, 7),    instr!(0x1C, NOP, ABX, Read, 4),   instr!(0x1D, ORA, ABX, Read, 4),   instr!(0x1E, ASL, ABX, Rmw, 7),    instr!(0x1F, SLO, ABX, Rmw, 7),
    instr!(0x20, JSR, ABS, Jsr, 6),     instr!(0x21, AND, IDX, Read, 6),   instr!(0x22, HLT, IMP, Halt, 2),   instr!(0x23, RLA, IDX, Rmw, 8),    instr!(0x24, BIT, ZP0, Read, 3),   instr!(0x25, AND, ZP0, Read, 3),   instr!(0x26, ROL, ZP0, Rmw, 5),    instr!(0x27, RLA, ZP0, Rmw, 5),    instr!(0x28, PLP, IMP, Pull, 4),   instr!(0x29, AND, IMM, Read, 2),   instr!(0x2A, ROL, ACC, Implied, 2), instr!(0x2B, ANC, IMM, Read, 2),   instr!(0x2C, BIT, ABS, Read, 4),   instr!(0x2D, AND, ABS, Read, 4),   instr!(0x2E, ROL, ABS, Rmw, 6),    instr!(0x2F, RLA, ABS, Rmw, 6),
    instr!(0x30, BMI, REL, Branch, 2),  instr!(0x31, AND, IDY, Read, 5),   instr!(0x32, HLT, IMP, Halt, 2),   instr!(0x33, RLA, IDY, Rmw, 8),    instr!(0x34, NOP, ZPX, Read, 4),   instr!(0x35, AND, ZPX, Read, 4),   instr!(0x36, ROL, ZPX, Rmw, 6),    instr!(0x37, RLA, ZPX, Rmw, 6),    instr!(0x38, SEC, IMP, Implied, 2), instr!(0x39, AND, ABY, Read, 4),  instr!(0x3A, NOP, IMP, Implied, 2), instr!(0x3B, RLA, ABY, Rmw, 7),    instr!(0x3C, NOP, ABX, Read, 4),   instr!(0x3D, AND, ABX, Read, 4),   instr!(0x3E, ROL, ABX, Rmw, 7),    instr!(0x3F, RLA, ABX, Rmw, 7),
    instr!(0x40, RTI, IMP, Rti, 6),     instr!(0x41, EOR, IDX, Read, 6),   instr!(0x42, HLT, IMP, Halt, 2),   instr!(0x43, SRE, IDX, Rmw, 8),    instr!(0x44, NOP, ZP0, Read, 3),   instr!(0x45, EOR, ZP0, Read, 3),   instr!(0x46, LSR, ZP0, Rmw, 5),    instr!(0x47, SRE, ZP0, Rmw, 5),    instr!(0x48, PHA, IMP, Push, 3),   instr!(0x49, EOR, IMM, Read, 2),   instr!(0x4A, LSR, ACC, Implied, 2), instr!(0x4B, ALR, IMM, Read, 2),   instr!(0x4C, JMP, ABS, Jump, 3),   instr!(0x4D, EOR, ABS, Read, 4),   instr!(0x4E, LSR, ABS, Rmw, 6),    instr!(0x4F, SRE, ABS, Rmw, 6),
    instr!(0x50, BVC, REL, Branch, 2),  instr!(0x51, EOR, IDY, Read, 5),   instr!(0x52, HLT, IMP, Halt, 2),   instr!(0x53, SRE, IDY, Rmw, 8),    instr!(0x54, NOP, ZPX, Read, 4),   instr!(0x55, EOR, ZPX, Read, 4),   instr!(0x56, LSR, ZPX, Rmw, 6),    instr!(0x57, SRE, ZPX, Rmw, 6),    instr!(0x58, CLI, IMP, Implied, 2), instr!(0x59, EOR, ABY, Read, 4),  instr!(0x5A, NOP, IMP, Implied, 2), instr!(0x5B, SRE, ABY, Rmw, 7),    instr!(0x5C, NOP, ABX, Read, 4),   instr!(0x5D, EOR, ABX, Read, 4),   instr!(0x5E, LSR, ABX, Rmw, 7),    instr!(0x5F, SRE, ABX, Rmw, 7),
    instr!(0x60, RTS, IMP, Rts, 6),     instr!(0x61, ADC, IDX, Read, 6),   instr!(0x62, HLT, IMP, Halt, 2),   instr!(0x63, RRA, IDX, Rmw, 8),    instr!(0x64, NOP, ZP0, Read, 3),   instr!(0x65, ADC, ZP0, Read, 3),   instr!(0x66, ROR, ZP0, Rmw, 5),    instr!(0x67, RRA, ZP0, Rmw, 5),    instr!(0x68, PLA, IMP, Pull, 4),   instr!(0x69, ADC, IMM, Read, 2),   instr!(0x6A, ROR, ACC, Implied, 2), instr!(0x6B, ARR, IMM, Read, 2),   instr!(0x6C, JMP, IND, JumpIndirect, 5), instr!(0x6D, ADC, ABS, Read, 4), instr!(0x6E, ROR, ABS, Rmw, 6),  instr!(0x6F, RRA, ABS, Rmw, 6),
    instr!(0x70, BVS, REL, Branch, 2),  instr!(0x71, ADC, IDY, Read, 5),   instr!(0x72, HLT, IMP, Halt, 2),   instr!(0x73, RRA, IDY, Rmw, 8),    instr!(0x74, NOP, ZPX, Read, 4),   instr!(0x75, ADC, ZPX, Read, 4),   instr!(0x76, ROR, ZPX, Rmw, 6),    instr!(0x77, RRA, ZPX, Rmw, 6),    instr!(0x78, SEI, IMP, Implied, 2), instr!(0x79, ADC, ABY, Read, 4),  instr!(0x7A, NOP, IMP, Implied, 2), instr!(0x7B, RRA, ABY, Rmw, 7),    instr!(0x7C, NOP, ABX, Read, 4),   instr!(0x7D, ADC, ABX, Read, 4),   instr!(0x7E, ROR, ABX, Rmw, 7),    instr!(0x7F, RRA, ABX, Rmw, 7),
    instr!(0x80, NOP, IMM, Read, 2),    instr!(0x81, STA, IDX, Store, 6),  instr!(0x82, NOP, IMM, Read, 2),   instr!(0x83, SAX, IDX, Store, 6),  instr!(0x84, STY, ZP0, Store, 3),  instr!(0x85, STA, ZP0, Store, 3),  instr!(0x86, STX, ZP0, Store, 3),  instr!(0x87, SAX, ZP0, Store, 3),  instr!(0x88, DEY, IMP, Implied, 2), instr!(0x89, NOP, IMM, Read, 2),  instr!(0x8A, TXA, IMP, Implied, 2), instr!(0x8B, XAA, IMM, Read, 2),   instr!(0x8C, STY, ABS, Store, 4),  instr!(0x8D, STA, ABS, Store, 4),  instr!(0x8E, STX, ABS, Store, 4),  instr!(0x8F, SAX, ABS, Store, 4),
    instr!(0x90, BCC, REL, Branch, 2),  instr!(0x91, STA, IDY, Store, 6),  instr!(0x92, HLT, IMP, Halt, 2),   instr!(0x93, AHX, IDY, Store, 6),  instr!(0x94, STY, ZPX, Store, 4),  instr!(0x95, STA, ZPX, Store, 4),  instr!(0x96, STX, ZPY, Store, 4),  instr!(0x97, SAX, ZPY, Store, 4),  instr!(0x98, TYA, IMP, Implied, 2), instr!(0x99, STA, ABY, Store, 5), instr!(0x9A, TXS, IMP, Implied, 2), instr!(0x9B, TAS, ABY, Store, 5),  instr!(0x9C, SYA, ABX, Store, 5),  instr!(0x9D, STA, ABX, Store, 5),  instr!(0x9E, SXA, ABY, Store, 5),  instr!(0x9F, AHX, ABY, Store, 5),
    instr!(0xA0, LDY, IMM, Read, 2),    instr!(0xA1, LDA, IDX, Read, 6),   instr!(0xA2, LDX, IMM, Read, 2),   instr!(0xA3, LAX, IDX, Read, 6),   instr!(0xA4, LDY, ZP0, Read, 3),   instr!(0xA5, LDA, ZP0, Read, 3),   instr!(0xA6, LDX, ZP0, Read, 3),   instr!(0xA7, LAX, ZP0, Read, 3),   instr!(0xA8, TAY, IMP, Implied, 2), instr!(0xA9, LDA, IMM, Read, 2),  instr!(0xAA, TAX, IMP, Implied, 2), instr!(0xAB, ATX, IMM, Read, 2),   instr!(0xAC, LDY, ABS, Read, 4),   instr!(0xAD, LDA, ABS, Read, 4),   instr!(0xAE, LDX, ABS, Read, 4),   instr!(0xAF, LAX, ABS, Read, 4),
    instr!(0xB0, BCS, REL, Branch, 2),  instr!(0xB1, LDA, IDY, Read, 5),   instr!(0xB2, HLT, IMP, Halt, 2),   instr!(0xB3, LAX, IDY, Read, 5),   instr!(0xB4, LDY, ZPX, Read, 4),   instr!(0xB5, LDA, ZPX, Read, 4),   instr!(0xB6, LDX, ZPY, Read, 4),   instr!(0xB7, LAX, ZPY, Read, 4),   instr!(0xB8, CLV, IMP, Implied, 2), instr!(0xB9, LDA, ABY, Read, 4),  instr!(0xBA, TSX, IMP, Implied, 2), instr!(0xBB, LAS, ABY, Read, 4),   instr!(0xBC, LDY, ABX, Read, 4),   instr!(0xBD, LDA, ABX, Read, 4),   instr!(0xBE, LDX, ABY, Read, 4),   instr!(0xBF, LAX, ABY, Read, 4),
    instr!(0xC0, CPY, IMM, Read, 2),    instr!(0xC1, CMP, IDX, Read, 6),   instr!(0xC2, NOP, IMM, Read, 2),   instr!(0xC3, DCP, IDX, Rmw, 8),    instr!(0xC4, CPY, ZP0, Read, 3),   instr!(0xC5, CMP, ZP0, Read, 3),   instr!(0xC6, DEC, ZP0, Rmw, 5),    instr!(0xC7, DCP, ZP0, Rmw, 5),    instr!(0xC8, INY, IMP, Implied, 2), instr!(0xC9, CMP, IMM, Read, 2),  instr!(0xCA, DEX, IMP, Implied, 2), instr!(0xCB, AXS, IMM, Read, 2),   instr!(0xCC, CPY, ABS, Read, 4),   instr!(0xCD, CMP, ABS, Read, 4),   instr!(0xCE, DEC, ABS, Rmw, 6),    instr!(0xCF, DCP, ABS, Rmw, 6),
    instr!(0xD0, BNE, REL, Branch, 2),  instr!(0xD1, CMP, IDY, Read, 5),   instr!(0xD2, HLT, IMP, Halt, 2),   instr!(0xD3, DCP, IDY, Rmw, 8),    instr!(0xD4, NOP, ZPX, Read, 4),   instr!(0xD5, CMP, ZPX, Read, 4),   instr!(0xD6, DEC, ZPX, Rmw, 6),    instr!(0xD7, DCP, ZPX, Rmw, 6),    instr!(0xD8, CLD, IMP, Implied, 2), instr!(0xD9, CMP, ABY, Read, 4),  instr!(0xDA, NOP, IMP, Implied, 2), instr!(0xDB, DCP, ABY, Rmw, 7),    instr!(0xDC, NOP, ABX, Read, 4),   instr!(0xDD, CMP, ABX, Read, 4),   instr!(0xDE, DEC, ABX, Rmw, 7),    instr!(0xDF, DCP, ABX, Rmw, 7),
    instr!(0xE0, CPX, IMM, Read, 2),    instr!(0xE1, SBC, IDX, Read, 6),   instr!(0xE2, NOP, IMM, Read, 2),   instr!(0xE3, ISB, IDX, Rmw, 8),    instr!(0xE4, CPX, ZP0, Read, 3),   instr!(0xE5, SBC, ZP0, Read, 3),   instr!(0xE6, INC, ZP0, Rmw, 5),    instr!(0xE7, ISB, ZP0, Rmw, 5),    instr!(0xE8, INX, IMP, Implied, 2), instr!(0xE9, SBC, IMM, Read, 2),  instr!(0xEA, NOP, IMP, Implied, 2), instr!(0xEB, SBC, IMM, Read, 2),   instr!(0xEC, CPX, ABS, Read, 4),   instr!(0xED, SBC, ABS, Read, 4),   instr!(0xEE, INC, ABS, Rmw, 6),    instr!(0xEF, ISB, ABS, Rmw, 6),
    instr!(0xF0, BEQ, REL, Branch, 2),  instr!(0xF1, SBC, IDY, Read, 5),   instr!(0xF2, HLT, IMP, Halt, 2),   instr!(0xF3, ISB, IDY, Rmw, 8),    instr!(0xF4, NOP, ZPX, Read, 4),   instr!(0xF5, SBC, ZPX, Read, 4),   instr!(0xF6, INC, ZPX, Rmw, 6),    instr!(0xF7, ISB, ZPX, Rmw, 6),    instr!(0xF8, SED, IMP, Implied, 2), instr!(0xF9, SBC, ABY, Read, 4),  instr!(0xFA, NOP, IMP, Implied, 2), instr!(0xFB, ISB, ABY, Rmw, 7),    instr!(0xFC, NOP, ABX, Read, 4),   instr!(0xFD, SBC, ABX, Read, 4),   instr!(0xFE, INC, ABX, Rmw, 7),    instr!(0xFF, ISB, ABX, Rmw, 7),
];

/// Snapshot of the CPU register file consumed by [`execute_op`].
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[must_use]
pub struct Registers {
    pub acc: u8,
    pub x: u8,
    pub y: u8,
    pub sp: u8,
    pub pc: u16,
    pub status: Status,
}

/// The effect of one opcode: optional register/flag updates, at most one bus
/// write, at most one stack push, a branch decision, and a halt flag.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
#[must_use]
pub struct OpDelta {
    pub acc: Option<u8>,
    pub x: Option<u8>,
    pub y: Option<u8>,
    pub sp: Option<u8>,
    pub status: Option<Status>,
    /// Value to write back to the effective address (stores and RMW).
    pub write: Option<u8>,
    /// Value to push onto the stack (PHA/PHP).
    pub push: Option<u8>,
    /// Branch condition result (relative instructions).
    pub branch: Option<bool>,
    pub halt: bool,
}

const fn zn(status: Status, val: u8) -> Status {
    status
        .difference(Status::Z.union(Status::N))
        .union(if val == 0 { Status::Z } else { Status::empty() })
        .union(if val & 0x80 != 0 {
            Status::N
        } else {
            Status::empty()
        })
}

fn load(status: Status, val: u8) -> (Option<u8>, Status) {
    (Some(val), zn(status, val))
}

fn compare(status: Status, reg: u8, val: u8) -> Status {
    let result = reg.wrapping_sub(val);
    let mut status = zn(status, result);
    status.set(Status::C, reg >= val);
    status
}

fn adc(status: Status, acc: u8, val: u8) -> (u8, Status) {
    let carry = status.contains(Status::C) as u16;
    let sum = u16::from(acc) + u16::from(val) + carry;
    let result = sum as u8;
    let mut status = zn(status, result);
    status.set(Status::C, sum > 0xFF);
    status.set(Status::V, (acc ^ result) & (val ^ result) & 0x80 != 0);
    (result, status)
}

fn asl(status: Status, val: u8) -> (u8, Status) {
    let result = val << 1;
    let mut status = zn(status, result);
    status.set(Status::C, val & 0x80 != 0);
    (result, status)
}

fn lsr(status: Status, val: u8) -> (u8, Status) {
    let result = val >> 1;
    let mut status = zn(status, result);
    status.set(Status::C, val & 0x01 != 0);
    (result, status)
}

fn rol(status: Status, val: u8) -> (u8, Status) {
    let carry_in = status.contains(Status::C) as u8;
    let result = (val << 1) | carry_in;
    let mut status = zn(status, result);
    status.set(Status::C, val & 0x80 != 0);
    (result, status)
}

fn ror(status: Status, val: u8) -> (u8, Status) {
    let carry_in = (status.contains(Status::C) as u8) << 7;
    let result = (val >> 1) | carry_in;
    let mut status = zn(status, result);
    status.set(Status::C, val & 0x01 != 0);
    (result, status)
}

/// Execute the semantic of one opcode.
///
/// Pure: identical `(def, regs, operand, addr)` inputs produce identical
/// deltas. `operand` is the fetched memory/immediate value (the accumulator
/// for `ACC` mode); `addr` is the effective address, consumed only by the
/// address-dependent unofficial stores.
pub fn execute_op(def: InstrDef, regs: Registers, operand: u8, addr: u16) -> OpDelta {
    let mut delta = OpDelta::default();
    let status = regs.status;
    let m = operand;

    // Shifts target the accumulator in ACC mode and memory otherwise
    let modify = |delta: &mut OpDelta, result: u8| {
        if def.addr_mode == AddrMode::ACC {
            delta.acc = Some(result);
        } else {
            delta.write = Some(result);
        }
    };

    match def.instr {
        Instr::LDA => (delta.acc, delta.status) = pair(load(status, m)),
        Instr::LDX => (delta.x, delta.status) = pair(load(status, m)),
        Instr::LDY => (delta.y, delta.status) = pair(load(status, m)),
        Instr::LAX => {
            let (val, status) = load(status, m);
            delta.acc = val;
            delta.x = val;
            delta.status = Some(status);
        }
        Instr::STA => delta.write = Some(regs.acc),
        Instr::STX => delta.write = Some(regs.x),
        Instr::STY => delta.write = Some(regs.y),
        Instr::SAX => delta.write = Some(regs.acc & regs.x),
        Instr::TAX => (delta.x, delta.status) = pair(load(status, regs.acc)),
        Instr::TAY => (delta.y, delta.status) = pair(load(status, regs.acc)),
        Instr::TXA => (delta.acc, delta.status) = pair(load(status, regs.x)),
        Instr::TYA => (delta.acc, delta.status) = pair(load(status, regs.y)),
        Instr::TSX => (delta.x, delta.status) = pair(load(status, regs.sp)),
        Instr::TXS => delta.sp = Some(regs.x),
        Instr::ADC => {
            let (result, status) = adc(status, regs.acc, m);
            delta.acc = Some(result);
            delta.status = Some(status);
        }
        Instr::SBC => {
            let (result, status) = adc(status, regs.acc, !m);
            delta.acc = Some(result);
            delta.status = Some(status);
        }
        Instr::CMP => delta.status = Some(compare(status, regs.acc, m)),
        Instr::CPX => delta.status = Some(compare(status, regs.x, m)),
        Instr::CPY => delta.status = Some(compare(status, regs.y, m)),
        Instr::AND => (delta.acc, delta.status) = pair(load(status, regs.acc & m)),
        Instr::ORA => (delta.acc, delta.status) = pair(load(status, regs.acc | m)),
        Instr::EOR => (delta.acc, delta.status) = pair(load(status, regs.acc ^ m)),
        Instr::BIT => {
            let mut status = status;
            status.set(Status::Z, regs.acc & m == 0);
            status.set(Status::N, m & 0x80 != 0);
            status.set(Status::V, m & 0x40 != 0);
            delta.status = Some(status);
        }
        Instr::ASL => {
            let (result, status) = asl(status, m);
            modify(&mut delta, result);
            delta.status = Some(status);
        }
        Instr::LSR => {
            let (result, status) = lsr(status, m);
            modify(&mut delta, result);
            delta.status = Some(status);
        }
        Instr::ROL => {
            let (result, status) = rol(status, m);
            modify(&mut delta, result);
            delta.status = Some(status);
        }
        Instr::ROR => {
            let (result, status) = ror(status, m);
            modify(&mut delta, result);
            delta.status = Some(status);
        }
        Instr::INC => {
            let result = m.wrapping_add(1);
            delta.write = Some(result);
            delta.status = Some(zn(status, result));
        }
        Instr::DEC => {
            let result = m.wrapping_sub(1);
            delta.write = Some(result);
            delta.status = Some(zn(status, result));
        }
        Instr::INX => (delta.x, delta.status) = pair(load(status, regs.x.wrapping_add(1))),
        Instr::INY => (delta.y, delta.status) = pair(load(status, regs.y.wrapping_add(1))),
        Instr::DEX => (delta.x, delta.status) = pair(load(status, regs.x.wrapping_sub(1))),
        Instr::DEY => (delta.y, delta.status) = pair(load(status, regs.y.wrapping_sub(1))),
        Instr::CLC => delta.status = Some(status.difference(Status::C)),
        Instr::SEC => delta.status = Some(status.union(Status::C)),
        Instr::CLI => delta.status = Some(status.difference(Status::I)),
        Instr::SEI => delta.status = Some(status.union(Status::I)),
        Instr::CLD => delta.status = Some(status.difference(Status::D)),
        Instr::SED => delta.status = Some(status.union(Status::D)),
        Instr::CLV => delta.status = Some(status.difference(Status::V)),
        Instr::NOP => (),
        Instr::BCC => delta.branch = Some(!status.contains(Status::C)),
        Instr::BCS => delta.branch = Some(status.contains(Status::C)),
        Instr::BNE => delta.branch = Some(!status.contains(Status::Z)),
        Instr::BEQ => delta.branch = Some(status.contains(Status::Z)),
        Instr::BPL => delta.branch = Some(!status.contains(Status::N)),
        Instr::BMI => delta.branch = Some(status.contains(Status::N)),
        Instr::BVC => delta.branch = Some(!status.contains(Status::V)),
        Instr::BVS => delta.branch = Some(status.contains(Status::V)),
        Instr::PHA => delta.push = Some(regs.acc),
        // PHP pushes with B and U set
        Instr::PHP => delta.push = Some((status | Status::B | Status::U).bits()),
        // RMW combos: the modified value is written back and the combined
        // operation is applied to the accumulator
        Instr::SLO => {
            let (result, status) = asl(status, m);
            delta.write = Some(result);
            (delta.acc, delta.status) = pair(load(status, regs.acc | result));
        }
        Instr::RLA => {
            let (result, status) = rol(status, m);
            delta.write = Some(result);
            (delta.acc, delta.status) = pair(load(status, regs.acc & result));
        }
        Instr::SRE => {
            let (result, status) = lsr(status, m);
            delta.write = Some(result);
            (delta.acc, delta.status) = pair(load(status, regs.acc ^ result));
        }
        Instr::RRA => {
            let (rotated, status) = ror(status, m);
            delta.write = Some(rotated);
            let (result, status) = adc(status, regs.acc, rotated);
            delta.acc = Some(result);
            delta.status = Some(status);
        }
        Instr::DCP => {
            let result = m.wrapping_sub(1);
            delta.write = Some(result);
            delta.status = Some(compare(status, regs.acc, result));
        }
        Instr::ISB => {
            let result = m.wrapping_add(1);
            delta.write = Some(result);
            let (acc, status) = adc(status, regs.acc, !result);
            delta.acc = Some(acc);
            delta.status = Some(status);
        }
        Instr::ANC => {
            let (acc, mut status) = load(status, regs.acc & m);
            status.set(Status::C, status.contains(Status::N));
            delta.acc = acc;
            delta.status = Some(status);
        }
        Instr::ALR => {
            let (result, status) = lsr(status, regs.acc & m);
            delta.acc = Some(result);
            delta.status = Some(status);
        }
        Instr::ARR => {
            let (result, mut status) = ror(status, regs.acc & m);
            status.set(Status::C, result & 0x40 != 0);
            status.set(Status::V, ((result >> 6) ^ (result >> 5)) & 0x01 != 0);
            delta.acc = Some(result);
            delta.status = Some(zn(status, result));
        }
        Instr::AXS => {
            let base = regs.acc & regs.x;
            let result = base.wrapping_sub(m);
            let mut status = zn(status, result);
            status.set(Status::C, base >= m);
            delta.x = Some(result);
            delta.status = Some(status);
        }
        Instr::LAS => {
            let result = regs.sp & m;
            delta.acc = Some(result);
            delta.x = Some(result);
            delta.sp = Some(result);
            delta.status = Some(zn(status, result));
        }
        Instr::ATX => {
            let (val, status) = load(status, m);
            delta.acc = val;
            delta.x = val;
            delta.status = Some(status);
        }
        Instr::XAA => (delta.acc, delta.status) = pair(load(status, regs.x & m)),
        // Unstable high-byte stores: the written value is ANDed with the
        // high byte of the target address plus one
        Instr::SXA => delta.write = Some(regs.x & ((addr >> 8) as u8).wrapping_add(1)),
        Instr::SYA => delta.write = Some(regs.y & ((addr >> 8) as u8).wrapping_add(1)),
        Instr::AHX => delta.write = Some(regs.acc & regs.x & ((addr >> 8) as u8).wrapping_add(1)),
        Instr::TAS => {
            let sp = regs.acc & regs.x;
            delta.sp = Some(sp);
            delta.write = Some(sp & ((addr >> 8) as u8).wrapping_add(1));
        }
        Instr::HLT => delta.halt = true,
        // Custom-sequence instructions never reach the pure dispatch
        Instr::JMP | Instr::JSR | Instr::RTS | Instr::RTI | Instr::BRK | Instr::PLA | Instr::PLP => {
            debug_assert!(false, "control-flow instruction in pure dispatch")
        }
    }

    delta
}

fn pair((val, status): (Option<u8>, Status)) -> (Option<u8>, Option<Status>) {
    (val, Some(status))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn regs(acc: u8, status: Status) -> Registers {
        Registers {
            acc,
            status,
            ..Registers::default()
        }
    }

    #[test]
    fn execute_op_is_pure() {
        for def in INSTRS.iter() {
            if matches!(
                def.kind,
                InstrKind::Jump
                    | InstrKind::JumpIndirect
                    | InstrKind::Jsr
                    | InstrKind::Rts
                    | InstrKind::Rti
                    | InstrKind::Brk
                    | InstrKind::Pull
            ) {
                continue;
            }
            let regs = Registers {
                acc: 0x37,
                x: 0x12,
                y: 0xFE,
                sp: 0xF0,
                pc: 0x8000,
                status: Status::U | Status::C,
            };
            let first = execute_op(*def, regs, 0x5A, 0x02FF);
            let second = execute_op(*def, regs, 0x5A, 0x02FF);
            assert_eq!(first, second, "${:02X} {:?}", def.opcode, def.instr);
        }
    }

    #[test]
    fn adc_overflow_and_carry() {
        let def = INSTRS[0x69];
        // 0x50 + 0x50 overflows into the sign bit
        let delta = execute_op(def, regs(0x50, Status::U), 0x50, 0);
        assert_eq!(delta.acc, Some(0xA0));
        let status = delta.status.unwrap();
        assert!(status.contains(Status::V), "signed overflow");
        assert!(!status.contains(Status::C));
        assert!(status.contains(Status::N));

        // 0xFF + 0x01 carries out
        let delta = execute_op(def, regs(0xFF, Status::U), 0x01, 0);
        assert_eq!(delta.acc, Some(0x00));
        let status = delta.status.unwrap();
        assert!(status.contains(Status::C));
        assert!(status.contains(Status::Z));
        assert!(!status.contains(Status::V));
    }

    #[test]
    fn sbc_borrows_through_carry() {
        let def = INSTRS[0xE9];
        let delta = execute_op(def, regs(0x40, Status::U | Status::C), 0x10, 0);
        assert_eq!(delta.acc, Some(0x30));
        assert!(delta.status.unwrap().contains(Status::C), "no borrow");

        let delta = execute_op(def, regs(0x10, Status::U | Status::C), 0x40, 0);
        assert_eq!(delta.acc, Some(0xD0));
        assert!(!delta.status.unwrap().contains(Status::C), "borrow");
    }

    #[test]
    fn rmw_delta_carries_exactly_one_write() {
        let def = INSTRS[0xE6]; // INC zp
        let delta = execute_op(def, regs(0x00, Status::U), 0xFF, 0x0010);
        assert_eq!(delta.write, Some(0x00));
        assert!(delta.status.unwrap().contains(Status::Z));
        assert_eq!(delta.acc, None);
        assert_eq!(delta.push, None);
    }

    #[test]
    fn acc_shift_targets_accumulator() {
        let def = INSTRS[0x0A]; // ASL A
        let delta = execute_op(def, regs(0x81, Status::U), 0x81, 0);
        assert_eq!(delta.acc, Some(0x02));
        assert_eq!(delta.write, None, "no bus write in ACC mode");
        assert!(delta.status.unwrap().contains(Status::C));
    }

    #[test]
    fn php_pushes_with_break_and_unused_set() {
        let def = INSTRS[0x08];
        let delta = execute_op(def, regs(0x00, Status::C), 0x00, 0);
        let pushed = Status::from_bits_truncate(delta.push.unwrap());
        assert!(pushed.contains(Status::B | Status::U | Status::C));
    }

    #[test]
    fn halt_sets_halt_flag_only() {
        let def = INSTRS[0x02];
        let delta = execute_op(def, Registers::default(), 0x00, 0);
        assert!(delta.halt);
        assert_eq!(delta.write, None);
        assert_eq!(delta.status, None);
    }
}
